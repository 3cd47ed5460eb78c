//! Filesystem access for host probes.
//!
//! The `FileSystem` trait lets [`ProcProbe`](super::ProcProbe) read the real
//! `/proc` on Linux or an in-memory mock in tests.

use std::io;
use std::path::Path;

/// Read-only filesystem operations needed by host probes.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn real_fs_reads_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "MemTotal: 1 kB").unwrap();

        let fs = RealFs::new();
        assert_eq!(fs.read_to_string(file.path()).unwrap(), "MemTotal: 1 kB");
    }

    #[test]
    fn real_fs_reports_missing_files() {
        let fs = RealFs::new();
        let missing = Path::new("/nonexistent/pvbench/meminfo");
        assert!(fs.read_to_string(missing).is_err());
    }
}
