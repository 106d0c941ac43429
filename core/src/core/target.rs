use std::fmt;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{ReconError, Result};

/// The validated root domain every stage works against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target(String);

impl Target {
    /// Accepts a bare domain or a URL and keeps only its lower-cased host.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| ReconError::InvalidTarget {
            target: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("target is empty"));
        }

        let host = if trimmed.contains("://") {
            let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
            url.host_str()
                .map(|h| h.to_string())
                .ok_or_else(|| invalid("URL has no host"))?
        } else {
            trimmed.trim_end_matches('/').to_string()
        };

        if host.starts_with('-') {
            return Err(invalid("domain may not start with '-'"));
        }

        match Host::parse(&host) {
            Ok(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_lowercase();
                if !domain.contains('.') {
                    return Err(invalid("domain must contain a dot"));
                }
                if domain
                    .chars()
                    .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'))
                {
                    return Err(invalid("domain contains unsupported characters"));
                }
                Ok(Self(domain))
            }
            Ok(_) => Err(invalid("IP addresses are not domain targets")),
            Err(e) => Err(invalid(&e.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Target {
    type Error = ReconError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_domain() {
        let target = Target::parse("Example.COM").unwrap();
        assert_eq!(target.as_str(), "example.com");
    }

    #[test]
    fn test_extracts_host_from_url() {
        let target = Target::parse("https://sub.example.com/path?q=1").unwrap();
        assert_eq!(target.as_str(), "sub.example.com");
    }

    #[test]
    fn test_rejects_empty_and_dotless() {
        assert!(Target::parse("   ").is_err());
        assert!(Target::parse("localhost").is_err());
    }

    #[test]
    fn test_rejects_shell_metacharacters() {
        assert!(Target::parse("example.com;rm -rf").is_err());
        assert!(Target::parse("-oX.evil.com").is_err());
    }

    #[test]
    fn test_rejects_ip_address() {
        assert!(Target::parse("10.0.0.1").is_err());
    }
}
