pub mod catalog;
pub mod layout;
pub mod merger;
pub mod runner;
pub mod scheduler;
pub mod stage;
pub mod state;
pub mod target;
