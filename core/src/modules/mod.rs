pub mod aquatone;
pub mod crawler;
pub mod dns;
pub mod httpx;
pub mod nmap;
pub mod nuclei;
