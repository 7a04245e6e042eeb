//! `ifconfig-pool-persist` file parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPoolEntry {
    pub common_name: String,
    pub virtual_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPool {
    pub err: Option<String>,
    pub pool: Vec<IpPoolEntry>,
}

/// Read the pool file. `name` is the directive value, used in the error
/// message when `path` could not be resolved.
pub fn read_ip_pool(path: Option<&Path>, name: &str) -> IpPool {
    let Some(path) = path else {
        return IpPool {
            err: Some(format!(
                "no readable IP pool file has been found (ifconfig-pool-persist {})",
                name
            )),
            pool: Vec::new(),
        };
    };
    match std::fs::read_to_string(path) {
        Ok(text) => IpPool {
            err: None,
            pool: parse_ip_pool(&text),
        },
        Err(e) => IpPool {
            err: Some(format!("cannot read {}: {}", path.display(), e)),
            pool: Vec::new(),
        },
    }
}

/// `common_name,address` per line.
pub fn parse_ip_pool(text: &str) -> Vec<IpPoolEntry> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let mut fields = line.split(',');
            IpPoolEntry {
                common_name: fields.next().unwrap_or_default().to_string(),
                virtual_address: fields.next().map(str::to_string),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries() {
        let pool = parse_ip_pool("client1,10.8.0.4\nclient2,10.8.0.8\n\n");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[1].common_name, "client2");
        assert_eq!(pool[1].virtual_address.as_deref(), Some("10.8.0.8"));
    }

    #[test]
    fn line_without_address() {
        let pool = parse_ip_pool("lonely\n");
        assert_eq!(pool[0].virtual_address, None);
    }

    #[test]
    fn unresolved_file_is_soft_error() {
        let p = read_ip_pool(None, "ipp.txt");
        assert!(p.err.unwrap().contains("ipp.txt"));
        assert!(p.pool.is_empty());
    }

    #[test]
    fn reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipp.txt");
        std::fs::write(&path, "a,10.8.0.4\n").unwrap();
        let p = read_ip_pool(Some(&path), "ipp.txt");
        assert_eq!(p.err, None);
        assert_eq!(p.pool.len(), 1);
    }
}
