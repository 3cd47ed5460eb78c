//! Run configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields a usable configuration. Durations are given in seconds as floats
//! and converted on use.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::{PvName, pv_names};
use crate::harness::HarnessConfig;
use crate::scenario::RunOptions;
use crate::stress::StressConfig;
use crate::subscription::BackendKind;

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
            ConfigError::Json(e) => write!(f, "malformed config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

/// Default camera PVs.
pub const DEFAULT_PVS: [&str; 3] = [
    "13ARV222:image1:ArrayData",
    "13ARV222:image2:ArrayData",
    "13ARV222:image3:ArrayData",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub pvs: Vec<String>,
    pub results_dir: PathBuf,
    /// `ca` or `pva`.
    pub protocol: String,
    pub latency: LatencySettings,
    pub throughput: ThroughputSettings,
    pub loss: LossSettings,
    pub stress: StressSettings,
    pub concurrent: ConcurrentSettings,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            pvs: DEFAULT_PVS.iter().map(|s| s.to_string()).collect(),
            results_dir: PathBuf::from("results"),
            protocol: "ca".to_string(),
            latency: LatencySettings::default(),
            throughput: ThroughputSettings::default(),
            loss: LossSettings::default(),
            stress: StressSettings::default(),
            concurrent: ConcurrentSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LatencySettings {
    /// How often collected intervals are handed to the sink.
    pub flush_interval_secs: f64,
    /// Unbounded when absent.
    pub duration_secs: Option<f64>,
}

impl Default for LatencySettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: 1.0,
            duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThroughputSettings {
    pub window_secs: f64,
    pub duration_secs: Option<f64>,
}

impl Default for ThroughputSettings {
    fn default() -> Self {
        Self {
            window_secs: 5.0,
            duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LossSettings {
    /// Assumed update cadence of every PV.
    pub avg_interval_secs: f64,
    pub report_interval_secs: f64,
    pub duration_secs: Option<f64>,
}

impl Default for LossSettings {
    fn default() -> Self {
        Self {
            avg_interval_secs: 0.05,
            report_interval_secs: 10.0,
            duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StressSettings {
    pub duration_secs: f64,
    pub sample_interval_secs: f64,
}

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            duration_secs: 60.0,
            sample_interval_secs: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrentSettings {
    pub clients: usize,
    /// 0 gives every client the full PV list.
    pub pvs_per_client: usize,
    pub duration_secs: f64,
}

impl Default for ConcurrentSettings {
    fn default() -> Self {
        Self {
            clients: 5,
            pvs_per_client: 0,
            duration_secs: 60.0,
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{} must be a positive number of seconds, got {}",
            name, value
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", name, e)))
}

fn optional_seconds(name: &str, value: Option<f64>) -> Result<Option<Duration>, ConfigError> {
    value.map(|v| seconds(name, v)).transpose()
}

impl BenchConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: BenchConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field without starting anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pvs.is_empty() {
            return Err(ConfigError::Invalid("PV list is empty".to_string()));
        }
        if let Some(blank) = self.pvs.iter().position(|pv| pv.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("PV #{} is blank", blank)));
        }
        self.backend_kind()?;
        self.latency_options()?;
        self.throughput_options()?;
        self.loss_options()?;
        self.stress_config()?;
        self.harness_config()?;
        Ok(())
    }

    pub fn pv_names(&self) -> Vec<PvName> {
        pv_names(&self.pvs)
    }

    pub fn backend_kind(&self) -> Result<BackendKind, ConfigError> {
        self.protocol
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{}", e)))
    }

    pub fn latency_options(&self) -> Result<RunOptions, ConfigError> {
        Ok(RunOptions {
            kind: self.backend_kind()?,
            cadence: seconds("latency.flush_interval_secs", self.latency.flush_interval_secs)?,
            duration: optional_seconds("latency.duration_secs", self.latency.duration_secs)?,
        })
    }

    pub fn throughput_options(&self) -> Result<RunOptions, ConfigError> {
        Ok(RunOptions {
            kind: self.backend_kind()?,
            cadence: seconds("throughput.window_secs", self.throughput.window_secs)?,
            duration: optional_seconds("throughput.duration_secs", self.throughput.duration_secs)?,
        })
    }

    /// Reporting options plus the assumed average interval.
    pub fn loss_options(&self) -> Result<(RunOptions, Duration), ConfigError> {
        let options = RunOptions {
            kind: self.backend_kind()?,
            cadence: seconds("loss.report_interval_secs", self.loss.report_interval_secs)?,
            duration: optional_seconds("loss.duration_secs", self.loss.duration_secs)?,
        };
        let assumed = seconds("loss.avg_interval_secs", self.loss.avg_interval_secs)?;
        Ok((options, assumed))
    }

    pub fn stress_config(&self) -> Result<StressConfig, ConfigError> {
        Ok(StressConfig {
            duration: seconds("stress.duration_secs", self.stress.duration_secs)?,
            sample_interval: seconds(
                "stress.sample_interval_secs",
                self.stress.sample_interval_secs,
            )?,
            kind: self.backend_kind()?,
        })
    }

    pub fn harness_config(&self) -> Result<HarnessConfig, ConfigError> {
        if self.concurrent.clients == 0 {
            return Err(ConfigError::Invalid(
                "concurrent.clients must be at least 1".to_string(),
            ));
        }
        Ok(HarnessConfig {
            client_count: self.concurrent.clients,
            pvs_per_client: self.concurrent.pvs_per_client,
            duration: seconds("concurrent.duration_secs", self.concurrent.duration_secs)?,
            kind: self.backend_kind()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_gives_defaults() {
        let config = BenchConfig::from_json("{}").unwrap();
        assert_eq!(config, BenchConfig::default());
        assert_eq!(config.pvs.len(), 3);
        assert_eq!(config.results_dir, PathBuf::from("results"));
        assert_eq!(config.backend_kind().unwrap(), BackendKind::Ca);
    }

    #[test]
    fn default_durations() {
        let config = BenchConfig::default();
        assert_eq!(config.throughput_options().unwrap().cadence, Duration::from_secs(5));
        let (loss, assumed) = config.loss_options().unwrap();
        assert_eq!(loss.cadence, Duration::from_secs(10));
        assert_eq!(assumed, Duration::from_millis(50));
        assert_eq!(loss.duration, None);
        assert_eq!(config.stress_config().unwrap().sample_interval, Duration::from_millis(500));
        let harness = config.harness_config().unwrap();
        assert_eq!(harness.client_count, 5);
        assert_eq!(harness.pvs_per_client, 0);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = BenchConfig::from_json(
            r#"{"protocol": "PVA", "pvs": ["X:1"], "concurrent": {"clients": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.backend_kind().unwrap(), BackendKind::Pva);
        assert_eq!(config.pv_names().len(), 1);
        assert_eq!(config.concurrent.clients, 2);
        assert_eq!(config.concurrent.duration_secs, 60.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            r#"{"pvs": []}"#,
            r#"{"pvs": ["  "]}"#,
            r#"{"protocol": "http"}"#,
            r#"{"throughput": {"window_secs": 0}}"#,
            r#"{"loss": {"avg_interval_secs": -1}}"#,
            r#"{"concurrent": {"clients": 0}}"#,
        ];
        for case in cases {
            assert!(
                matches!(BenchConfig::from_json(case), Err(ConfigError::Invalid(_))),
                "accepted {}",
                case
            );
        }
    }

    #[test]
    fn malformed_json_and_unknown_fields() {
        assert!(matches!(BenchConfig::from_json("{"), Err(ConfigError::Json(_))));
        assert!(matches!(
            BenchConfig::from_json(r#"{"pv_list": []}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"results_dir": "/tmp/out"}}"#).unwrap();
        let config = BenchConfig::load(file.path()).unwrap();
        assert_eq!(config.results_dir, PathBuf::from("/tmp/out"));

        let missing = BenchConfig::load(Path::new("/nonexistent/pvbench.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
