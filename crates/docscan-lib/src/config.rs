//! Pipeline configuration, stored as TOML in the platform config directory.
//!
//! Every tuning key is optional: an absent key keeps the attached model's
//! default from its capability table. Only `mode` and `poll_interval_us` have
//! values of their own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::Capabilities;

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str =
    "# docscan pipeline configuration. Absent keys use the scanner model's defaults.\n\n";

/// Where the acquisition producer runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionMode {
    /// Overlapped when the model supports queued reads, inline otherwise.
    #[default]
    Auto,
    /// Caller's thread issues every command.
    Inline,
    /// Producer on its own thread.
    Overlapped,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Auto => write!(f, "auto"),
            AcquisitionMode::Inline => write!(f, "inline"),
            AcquisitionMode::Overlapped => write!(f, "overlapped"),
        }
    }
}

impl std::str::FromStr for AcquisitionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(AcquisitionMode::Auto),
            "inline" => Ok(AcquisitionMode::Inline),
            "overlapped" => Ok(AcquisitionMode::Overlapped),
            other => Err(format!(
                "unknown mode \"{other}\" (expected auto, inline or overlapped)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of ring buffers (at least 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffers: Option<usize>,

    /// Size of each ring buffer in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,

    /// Read commands kept outstanding in overlapped mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_reads: Option<usize>,

    /// Busy retries per command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_budget: Option<u32>,

    /// Sleep between busy retries, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    /// Consumer/producer poll sleep, in microseconds. Default: 200.
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,

    /// Report ADF conditions (cover open, empty, jam) as errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complain_on_adf_error: Option<bool>,

    /// Report film scanning unit conditions as errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complain_on_fsu_error: Option<bool>,

    /// Producer placement. Default: "auto".
    #[serde(default)]
    pub mode: AcquisitionMode,
}

fn default_poll_interval_us() -> u64 {
    200
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            buffers: None,
            buffer_size: None,
            queued_reads: None,
            retry_budget: None,
            retry_delay_ms: None,
            poll_interval_us: default_poll_interval_us(),
            complain_on_adf_error: None,
            complain_on_fsu_error: None,
            mode: AcquisitionMode::Auto,
        }
    }
}

/// Validation errors that [`PipelineConfig::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Fewer than two ring buffers.
    TooFewBuffers(usize),
    /// `buffer_size` is zero.
    ZeroBufferSize,
    /// `queued_reads` is zero.
    ZeroQueuedReads,
    /// Poll interval longer than one second.
    PollIntervalTooLong(u64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooFewBuffers(n) => {
                write!(f, "Invalid buffers: {n} (need at least 2)")
            }
            ValidationError::ZeroBufferSize => write!(f, "Invalid buffer_size: must be non-zero"),
            ValidationError::ZeroQueuedReads => {
                write!(f, "Invalid queued_reads: must be at least 1")
            }
            ValidationError::PollIntervalTooLong(us) => {
                write!(f, "Invalid poll_interval_us: {us} (max 1000000)")
            }
        }
    }
}

impl PipelineConfig {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("docscan"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename can fail across filesystems; fall back to direct write + cleanup
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(n) = self.buffers
            && n < 2
        {
            errors.push(ValidationError::TooFewBuffers(n));
        }
        if self.buffer_size == Some(0) {
            errors.push(ValidationError::ZeroBufferSize);
        }
        if self.queued_reads == Some(0) {
            errors.push(ValidationError::ZeroQueuedReads);
        }
        if self.poll_interval_us > 1_000_000 {
            errors.push(ValidationError::PollIntervalTooLong(self.poll_interval_us));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Overlay the configured keys on a model's capability defaults.
    pub fn apply(&self, caps: &Capabilities) -> Capabilities {
        let mut out = *caps;
        if let Some(n) = self.buffers {
            out.buffer_count = n;
        }
        if let Some(n) = self.buffer_size {
            out.buffer_size = n;
        }
        if let Some(n) = self.queued_reads {
            out.queued_reads = n;
        }
        if let Some(n) = self.retry_budget {
            out.retry_budget = n;
        }
        if let Some(ms) = self.retry_delay_ms {
            out.retry_delay = Duration::from_millis(ms);
        }
        if let Some(b) = self.complain_on_adf_error {
            out.complain.adf = b;
        }
        if let Some(b) = self.complain_on_fsu_error {
            out.complain.fsu = b;
        }
        match self.mode {
            AcquisitionMode::Auto => {}
            AcquisitionMode::Inline => out.overlapped = false,
            AcquisitionMode::Overlapped => out.overlapped = true,
        }
        out
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}
