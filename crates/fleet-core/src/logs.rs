//! Registry of daemon log files.
//!
//! Daemons write their own logs; this registry only remembers which files
//! exist, which category they belong to, and whether they should be listed
//! to operators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// A registered log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    pub path: PathBuf,
    pub category: String,
    /// Hidden files are tracked (for cleanup) but not listed by default.
    pub hidden: bool,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>, category: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            category: category.into(),
            hidden: false,
        }
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

/// Thread-safe log registry.
#[derive(Default)]
pub struct LogRegistry {
    categories: RwLock<BTreeMap<String, String>>,
    files: RwLock<Vec<LogFile>>,
}

impl LogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a category with its display name.
    pub async fn register_category(&self, id: impl Into<String>, display_name: impl Into<String>) {
        self.categories
            .write()
            .await
            .insert(id.into(), display_name.into());
    }

    pub async fn categories(&self) -> BTreeMap<String, String> {
        self.categories.read().await.clone()
    }

    /// Register a file. Re-registering an existing path replaces its entry.
    pub async fn register(&self, file: LogFile) {
        let mut files = self.files.write().await;
        if let Some(existing) = files.iter_mut().find(|f| f.path == file.path) {
            *existing = file;
        } else {
            log::debug!("registered log file {}", file.path.display());
            files.push(file);
        }
    }

    /// Forget a file. Returns whether it was registered.
    pub async fn delete(&self, path: &Path) -> bool {
        let mut files = self.files.write().await;
        let before = files.len();
        files.retain(|f| f.path != path);
        files.len() != before
    }

    pub async fn all(&self) -> Vec<LogFile> {
        self.files.read().await.clone()
    }

    /// Files operators should see.
    pub async fn visible(&self) -> Vec<LogFile> {
        self.files
            .read()
            .await
            .iter()
            .filter(|f| !f.hidden)
            .cloned()
            .collect()
    }

    pub async fn contains(&self, path: &Path) -> bool {
        self.files.read().await.iter().any(|f| f.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent_by_path() {
        let reg = LogRegistry::new();
        reg.register(LogFile::new("/var/log/a.log", "openvpn")).await;
        reg.register(LogFile::new("/var/log/a.log", "openvpn").hidden(true))
            .await;
        let all = reg.all().await;
        assert_eq!(all.len(), 1);
        assert!(all[0].hidden);
    }

    #[tokio::test]
    async fn delete_by_path() {
        let reg = LogRegistry::new();
        reg.register(LogFile::new("/var/log/a.log", "openvpn")).await;
        reg.register(LogFile::new("/var/log/b.log", "openvpn")).await;
        assert!(reg.delete(Path::new("/var/log/a.log")).await);
        assert!(!reg.delete(Path::new("/var/log/a.log")).await);
        assert!(!reg.contains(Path::new("/var/log/a.log")).await);
        assert!(reg.contains(Path::new("/var/log/b.log")).await);
    }

    #[tokio::test]
    async fn hidden_files_are_not_visible() {
        let reg = LogRegistry::new();
        reg.register(LogFile::new("/var/log/a.log", "openvpn")).await;
        reg.register(LogFile::new("/var/log/b.log", "openvpn").hidden(true))
            .await;
        let visible = reg.visible().await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].path, PathBuf::from("/var/log/a.log"));
    }

    #[tokio::test]
    async fn categories_are_recorded() {
        let reg = LogRegistry::new();
        reg.register_category("openvpn", "OpenVPN").await;
        assert_eq!(
            reg.categories().await.get("openvpn").map(String::as_str),
            Some("OpenVPN")
        );
    }
}
