//! Parsers for the `/proc` files read by the host probe.
//!
//! Pure functions over file contents, testable with string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Memory totals from `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_available: u64,
}

impl MemInfo {
    pub fn used_kb(&self) -> u64 {
        self.mem_total.saturating_sub(self.mem_available)
    }
}

/// Parses `/proc/meminfo` content.
///
/// Kernels without `MemAvailable` fall back to `MemFree + Buffers + Cached`.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let parse_kb = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    let mut total = None;
    let mut available = None;
    let mut reclaimable = 0u64;
    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            total = Some(parse_kb(line));
        } else if line.starts_with("MemAvailable:") {
            available = Some(parse_kb(line));
        } else if line.starts_with("MemFree:")
            || line.starts_with("Buffers:")
            || line.starts_with("Cached:")
        {
            reclaimable += parse_kb(line);
        }
    }

    let mem_total = total.ok_or_else(|| ParseError::new("missing MemTotal in meminfo"))?;
    if mem_total == 0 {
        return Err(ParseError::new("MemTotal is zero"));
    }
    Ok(MemInfo {
        mem_total,
        mem_available: available.unwrap_or(reclaimable).min(mem_total),
    })
}

/// Aggregate jiffy counters of the `cpu` line in `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTotals {
    pub busy: u64,
    pub idle: u64,
}

impl CpuTotals {
    pub fn total(&self) -> u64 {
        self.busy + self.idle
    }
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
///
/// `idle` includes iowait; guest time is already part of user/nice and is
/// not counted twice.
pub fn parse_cpu_totals(content: &str) -> Result<CpuTotals, ParseError> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ParseError::new("missing aggregate cpu line in stat"))?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return Err(ParseError::new(format!(
            "expected at least 4 cpu counters, got {}",
            parts.len() - 1
        )));
    }
    let get_val = |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

    let (user, nice, system, idle) = (get_val(1), get_val(2), get_val(3), get_val(4));
    let (iowait, irq, softirq, steal) = (get_val(5), get_val(6), get_val(7), get_val(8));

    Ok(CpuTotals {
        busy: user + nice + system + irq + softirq + steal,
        idle: idle + iowait,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_meminfo_prefers_available() {
        let info = parse_meminfo(
            "MemTotal:       16000 kB\nMemFree:  1000 kB\nMemAvailable:   12000 kB\n",
        )
        .unwrap();
        assert_eq!(info.mem_total, 16000);
        assert_eq!(info.mem_available, 12000);
        assert_eq!(info.used_kb(), 4000);
    }

    #[test]
    fn parse_meminfo_falls_back_without_available() {
        let info = parse_meminfo(
            "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 150 kB\nSwapCached: 999 kB\n",
        )
        .unwrap();
        assert_eq!(info.mem_available, 300);
    }

    #[test]
    fn parse_meminfo_requires_total() {
        let err = parse_meminfo("MemFree: 100 kB\n").unwrap_err();
        assert!(err.message.contains("MemTotal"));
        assert!(parse_meminfo("MemTotal: 0 kB\n").is_err());
    }

    #[test]
    fn parse_cpu_totals_uses_aggregate_line() {
        let content = "cpu  100 20 30 800 50 0 0 0 0 0\ncpu0 1 1 1 1 1 0 0 0 0 0\nctxt 5\n";
        let totals = parse_cpu_totals(content).unwrap();
        assert_eq!(totals.busy, 150);
        assert_eq!(totals.idle, 850);
        assert_eq!(totals.total(), 1000);
    }

    #[test]
    fn parse_cpu_totals_rejects_missing_or_short_line() {
        assert!(parse_cpu_totals("cpu0 1 2 3 4\n").is_err());
        assert!(parse_cpu_totals("cpu 1 2\n").is_err());
    }
}
