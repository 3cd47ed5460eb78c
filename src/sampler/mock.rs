//! In-memory filesystem for probe tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use super::traits::FileSystem;

/// Simulated `/proc` contents.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files.insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    /// A 16 GiB host with 8 GiB available and an aggregate CPU line of
    /// 1000 busy / 9000 idle jiffies.
    pub fn typical_host() -> Self {
        let mut fs = Self::new();
        fs.add_file("/proc/meminfo", meminfo(16_777_216, 8_388_608));
        fs.add_file("/proc/stat", stat_line(600, 100, 300, 9000));
        fs
    }
}

/// `/proc/meminfo` with the given totals in kB.
pub fn meminfo(total_kb: u64, available_kb: u64) -> String {
    format!(
        "MemTotal:       {} kB\n\
         MemFree:         1048576 kB\n\
         MemAvailable:   {} kB\n\
         Buffers:          262144 kB\n\
         Cached:          4194304 kB\n\
         SwapCached:            0 kB\n",
        total_kb, available_kb
    )
}

/// `/proc/stat` with one aggregate line and a single CPU line.
pub fn stat_line(user: u64, nice: u64, system: u64, idle: u64) -> String {
    format!(
        "cpu  {user} {nice} {system} {idle} 0 0 0 0 0 0\n\
         cpu0 {user} {nice} {system} {idle} 0 0 0 0 0 0\n\
         ctxt 123456\n\
         btime 1700000000\n"
    )
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )
        })
    }
}
