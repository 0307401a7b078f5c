use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Which of the three logical databases a location belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseRole {
    /// Baseline read by check, update and compare
    Input,
    /// Written by init and update
    Output,
    /// Second database read by compare
    New,
}

impl DatabaseRole {
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::Input => "database_in",
            Self::Output => "database_out",
            Self::New => "database_new",
        }
    }
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseLocation {
    pub path: PathBuf,
    /// gzip the stream; chosen by configuration, never detected
    #[serde(default)]
    pub compressed: bool,
}

impl DatabaseLocation {
    pub fn new(path: impl Into<PathBuf>, compressed: bool) -> Self {
        Self {
            path: path.into(),
            compressed,
        }
    }

    pub fn plain(path: impl Into<PathBuf>) -> Self {
        Self::new(path, false)
    }

    /// Absolute, lexically normalised path. Does not touch the filesystem,
    /// so it works for databases that do not exist yet.
    pub fn resolved(&self) -> PathBuf {
        let absolute = if self.path.is_absolute() {
            self.path.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.path))
                .unwrap_or_else(|_| self.path.clone())
        };
        normalize(&absolute)
    }

    pub fn same_as(&self, other: &DatabaseLocation) -> bool {
        self.resolved() == other.resolved()
    }
}

impl fmt::Display for DatabaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.compressed {
            write!(f, "gzip:{}", self.path.display())
        } else {
            write!(f, "file:{}", self.path.display())
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexically_equal_locations_are_the_same() {
        let a = DatabaseLocation::plain("/var/lib/fimguard/./db");
        let b = DatabaseLocation::new("/var/lib/other/../fimguard/db", true);
        assert!(a.same_as(&b));
        let c = DatabaseLocation::plain("/var/lib/fimguard/db.new");
        assert!(!a.same_as(&c));
    }

    #[test]
    fn relative_locations_resolve_against_cwd() {
        let rel = DatabaseLocation::plain("db");
        let abs = DatabaseLocation::plain(std::env::current_dir().unwrap().join("db"));
        assert!(rel.same_as(&abs));
    }
}
