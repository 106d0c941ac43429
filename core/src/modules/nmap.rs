use std::fs;
use std::path::Path;

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{ReconError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: String,
    pub service: String,
    pub product: String,
    pub version: String,
}

impl OpenPort {
    pub fn version_string(&self) -> String {
        format!("{} {}", self.product, self.version).trim().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScannedHost {
    pub address: String,
    pub hostnames: Vec<String>,
    pub open_ports: Vec<OpenPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortScan {
    pub hosts: Vec<ScannedHost>,
    /// The XML ended early; only fully closed `<host>` elements were kept.
    pub truncated: bool,
}

impl PortScan {
    pub fn open_port_count(&self) -> usize {
        self.hosts.iter().map(|h| h.open_ports.len()).sum()
    }
}

#[derive(Default)]
struct PendingPort {
    port: u16,
    protocol: String,
    open: bool,
    service: Option<String>,
    product: String,
    version: String,
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Parses nmap `-oX` output, keeping only ports whose state is `open`.
pub fn parse_nmap_xml(path: &Path) -> Result<PortScan> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PortScan::default()),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(PortScan::default());
    }
    parse_nmap_str(&content).map_err(|reason| ReconError::ParseError {
        path: path.to_path_buf(),
        reason,
    })
}

pub fn parse_nmap_str(content: &str) -> std::result::Result<PortScan, String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut scan = PortScan::default();
    let mut seen_root = false;
    let mut host: Option<ScannedHost> = None;
    let mut port: Option<PendingPort> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                if !seen_root {
                    return Err(e.to_string());
                }
                warn!("nmap XML ended early at byte {}: {}", reader.buffer_position(), e);
                scan.truncated = true;
                break;
            }
        };

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.name().as_ref() {
                    b"nmaprun" => seen_root = true,
                    b"host" => host = Some(ScannedHost::default()),
                    b"address" => {
                        if let Some(h) = host.as_mut() {
                            let kind = attr(e, b"addrtype").unwrap_or_default();
                            if h.address.is_empty() && kind != "mac" {
                                h.address = attr(e, b"addr").unwrap_or_default();
                            }
                        }
                    }
                    b"hostname" => {
                        if let (Some(h), Some(name)) = (host.as_mut(), attr(e, b"name")) {
                            if !h.hostnames.contains(&name) {
                                h.hostnames.push(name);
                            }
                        }
                    }
                    // A childless <port/> carries no open state.
                    b"port" if host.is_some() && !is_empty => {
                        port = Some(PendingPort {
                            port: attr(e, b"portid").and_then(|p| p.parse().ok()).unwrap_or(0),
                            protocol: attr(e, b"protocol").unwrap_or_default(),
                            ..PendingPort::default()
                        });
                    }
                    b"state" => {
                        if let Some(p) = port.as_mut() {
                            p.open = attr(e, b"state").as_deref() == Some("open");
                        }
                    }
                    b"service" => {
                        if let Some(p) = port.as_mut() {
                            p.service = attr(e, b"name");
                            p.product = attr(e, b"product").unwrap_or_default();
                            p.version = attr(e, b"version").unwrap_or_default();
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"port" => {
                    if let (Some(p), Some(h)) = (port.take(), host.as_mut()) {
                        if p.open {
                            h.open_ports.push(OpenPort {
                                port: p.port,
                                protocol: p.protocol,
                                service: p.service.filter(|s| !s.is_empty()).unwrap_or_else(|| "unknown".to_string()),
                                product: p.product,
                                version: p.version,
                            });
                        }
                    }
                }
                b"host" => {
                    if let Some(mut h) = host.take() {
                        if h.address.is_empty() {
                            h.address = "unknown".to_string();
                        }
                        scan.hosts.push(h);
                    }
                }
                _ => {}
            },
            Event::Eof => {
                if host.is_some() {
                    scan.truncated = true;
                }
                break;
            }
            _ => {}
        }
    }

    if !seen_root {
        return Err("not an nmap XML document".to_string());
    }
    Ok(scan)
}

/// Plain-text per-host open port table.
pub fn render_port_summary(domain: &str, scan: &PortScan) -> String {
    let mut out = String::new();
    out.push_str(&format!("PORT SCAN SUMMARY FOR: {}\n", domain));
    out.push_str(&"=".repeat(60));
    out.push_str("\n\n");

    if scan.hosts.is_empty() {
        out.push_str("No hosts found\n");
    }

    for host in &scan.hosts {
        out.push_str(&format!("Host: {}\n", host.address));
        if !host.hostnames.is_empty() {
            out.push_str(&format!("Hostnames: {}\n", host.hostnames.join(", ")));
        }
        out.push_str(&"-".repeat(60));
        out.push('\n');

        if host.open_ports.is_empty() {
            out.push_str("No open ports found\n\n");
            continue;
        }

        out.push_str(&format!("Open Ports: {}\n\n", host.open_ports.len()));
        out.push_str(&format!("{:<8} {:<10} {:<15} {}\n", "PORT", "PROTOCOL", "SERVICE", "VERSION"));
        out.push_str(&"-".repeat(60));
        out.push('\n');
        for p in &host.open_ports {
            out.push_str(&format!("{:<8} {:<10} {:<15} {}\n", p.port, p.protocol, p.service, p.version_string()));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ONE_OPEN_ONE_CLOSED: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap">
  <host>
    <address addr="93.184.216.34" addrtype="ipv4"/>
    <hostnames><hostname name="ex.com" type="user"/></hostnames>
    <ports>
      <port protocol="tcp" portid="443"><state state="open" reason="syn-ack"/><service name="https" product="nginx" version="1.25"/></port>
      <port protocol="tcp" portid="8080"><state state="closed" reason="reset"/></port>
    </ports>
  </host>
</nmaprun>"#;

    #[test]
    fn test_only_open_ports_are_listed() {
        let scan = parse_nmap_str(ONE_OPEN_ONE_CLOSED).unwrap();
        assert_eq!(scan.hosts.len(), 1);
        assert_eq!(scan.open_port_count(), 1);

        let host = &scan.hosts[0];
        assert_eq!(host.address, "93.184.216.34");
        assert_eq!(host.hostnames, vec!["ex.com"]);
        assert_eq!(host.open_ports[0].port, 443);
        assert_eq!(host.open_ports[0].version_string(), "nginx 1.25");
    }

    #[test]
    fn test_service_defaults_to_unknown() {
        let xml = r#"<nmaprun><host><address addr="10.0.0.1" addrtype="ipv4"/><ports>
            <port protocol="udp" portid="53"><state state="open"/></port></ports></host></nmaprun>"#;
        let scan = parse_nmap_str(xml).unwrap();
        let port = &scan.hosts[0].open_ports[0];
        assert_eq!(port.service, "unknown");
        assert_eq!(port.version_string(), "");
    }

    #[test]
    fn test_truncated_host_is_dropped() {
        let xml = r#"<nmaprun><host><address addr="10.0.0.1" addrtype="ipv4"/></host>
            <host><address addr="10.0.0.2" addrtype="ipv4"/><ports><port protocol="tcp" portid="22"><state state="op"#;
        let scan = parse_nmap_str(xml).unwrap();
        assert_eq!(scan.hosts.len(), 1);
        assert!(scan.truncated);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nmap.xml");
        std::fs::write(&path, "Starting Nmap 7.94\nNmap done").unwrap();
        assert!(matches!(parse_nmap_xml(&path), Err(ReconError::ParseError { .. })));
    }

    #[test]
    fn test_missing_file_is_empty_scan() {
        let dir = tempdir().unwrap();
        assert_eq!(parse_nmap_xml(&dir.path().join("nmap.xml")).unwrap(), PortScan::default());
    }

    #[test]
    fn test_port_summary_table() {
        let scan = parse_nmap_str(ONE_OPEN_ONE_CLOSED).unwrap();
        let summary = render_port_summary("ex.com", &scan);
        assert!(summary.contains("Host: 93.184.216.34"));
        assert!(summary.contains("Open Ports: 1"));
        assert!(summary.contains("443      tcp        https           nginx 1.25"));
        assert!(!summary.contains("8080"));
    }
}
