//! Resolution of files referenced from a daemon's configuration.
//!
//! Daemons are often started from their config directory with relative
//! paths (`ca ca.crt`, `status openvpn-status.log`), so a name is tried as
//! given, then relative to the daemon's working directory, then relative
//! to the directory holding the config file.

use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileResolver {
    pwd: Option<PathBuf>,
    conffile: String,
}

impl FileResolver {
    pub fn new(pwd: Option<impl Into<PathBuf>>, conffile: impl Into<String>) -> Self {
        Self {
            pwd: pwd.map(Into::into),
            conffile: conffile.into(),
        }
    }

    /// Candidate paths for `name`, in lookup order.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut attempts = vec![PathBuf::from(name)];
        if let Some(pwd) = &self.pwd {
            attempts.push(pwd.join(name));
        }
        if self.conffile.trim() != name.trim() {
            let dir = match Path::new(&self.conffile).parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            attempts.push(dir.join(name));
        }
        attempts
    }

    /// First readable candidate for `name`.
    pub fn find_file(&self, name: &str) -> Option<PathBuf> {
        if name.trim().is_empty() {
            return None;
        }
        self.candidates(name)
            .into_iter()
            .find(|p| File::open(p).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn literal_name_wins() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("ca.crt");
        fs::write(&f, "x").unwrap();
        let r = FileResolver::new(None::<PathBuf>, "");
        assert_eq!(r.find_file(f.to_str().unwrap()), Some(f));
    }

    #[test]
    fn resolves_relative_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("only-in-pwd.crt"), "x").unwrap();
        let r = FileResolver::new(Some(dir.path()), "/nonexistent/server.conf");
        assert_eq!(
            r.find_file("only-in-pwd.crt"),
            Some(dir.path().join("only-in-pwd.crt"))
        );
    }

    #[test]
    fn resolves_relative_to_conffile_dir() {
        let confdir = tempfile::tempdir().unwrap();
        let pwd = tempfile::tempdir().unwrap();
        fs::write(confdir.path().join("status.log"), "x").unwrap();
        let conf = confdir.path().join("server.conf");
        let r = FileResolver::new(Some(pwd.path()), conf.to_str().unwrap());
        assert_eq!(
            r.find_file("status.log"),
            Some(confdir.path().join("status.log"))
        );
    }

    #[test]
    fn conffile_dir_skipped_for_conffile_itself() {
        let r = FileResolver::new(None::<PathBuf>, " server.conf ");
        assert_eq!(r.candidates("server.conf"), vec![PathBuf::from("server.conf")]);
    }

    #[test]
    fn bare_conffile_uses_current_dir() {
        let r = FileResolver::new(None::<PathBuf>, "server.conf");
        assert_eq!(
            r.candidates("ca.crt"),
            vec![PathBuf::from("ca.crt"), PathBuf::from("./ca.crt")]
        );
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let r = FileResolver::new(Some(dir.path()), "");
        assert_eq!(r.find_file("nope.key"), None);
        assert_eq!(r.find_file("  "), None);
    }
}
