//! Host load from `/proc/stat` and `/proc/meminfo`.

use std::path::PathBuf;

use super::parser::{CpuTotals, parse_cpu_totals, parse_meminfo};
use super::traits::FileSystem;
use super::{HostLoad, HostProbe, SampleError};

/// Reads CPU and memory utilization through a [`FileSystem`].
///
/// CPU percent is the busy share of the jiffies elapsed since the previous
/// call, so the first reading reports 0.0.
pub struct ProcProbe<F: FileSystem> {
    fs: F,
    proc_path: String,
    prev_cpu: Option<CpuTotals>,
}

impl<F: FileSystem> ProcProbe<F> {
    pub fn new(fs: F) -> Self {
        Self::with_proc_path(fs, "/proc")
    }

    pub fn with_proc_path(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            prev_cpu: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    fn read(&self, file: &str) -> Result<String, SampleError> {
        let path = PathBuf::from(format!("{}/{}", self.proc_path, file));
        Ok(self.fs.read_to_string(&path)?)
    }

    fn cpu_percent(&mut self, current: CpuTotals) -> f64 {
        let percent = match self.prev_cpu {
            Some(prev) if current.total() > prev.total() && current.busy >= prev.busy => {
                let busy = (current.busy - prev.busy) as f64;
                let total = (current.total() - prev.total()) as f64;
                busy / total * 100.0
            }
            _ => 0.0,
        };
        self.prev_cpu = Some(current);
        percent
    }
}

impl<F: FileSystem> HostProbe for ProcProbe<F> {
    fn sample(&mut self) -> Result<HostLoad, SampleError> {
        let mem = parse_meminfo(&self.read("meminfo")?)?;
        let cpu = parse_cpu_totals(&self.read("stat")?)?;

        let used_kb = mem.used_kb();
        Ok(HostLoad {
            cpu_percent: self.cpu_percent(cpu),
            memory_percent: used_kb as f64 / mem.mem_total as f64 * 100.0,
            memory_used_mb: used_kb as f64 / 1024.0,
        })
    }
}
