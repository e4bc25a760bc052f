//! Settings for an acquisition session, readable from a [ron] file.
//!
//! A config file looks like this; every field but the first four may be left
//! out.
//!
//! ```text
//! (
//!     address: "/dev/ttyACM0",
//!     baud_rate: 115200,
//!     channel_count: 4,
//!     log_path: "TestSubject_A00.csv",
//!     channel_labels: Some(["RVL", "RVM", "LVM", "LVL"]),
//!     poll_interval_ms: 30,
//! )
//! ```

use crate::framer::DEFAULT_MAX_LINE_LENGTH;
use crate::record_codec::FIELD_SEPARATOR;
use crate::sample_log::default_labels;

use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

/// Baud rate the sensor firmware ships with.
pub const DEFAULT_BAUD_RATE: u32 = 115200;
/// Channels on the standard four-muscle harness.
pub const DEFAULT_CHANNEL_COUNT: usize = 4;

/// Everything needed to run one acquisition session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Serial device path or name, e.g. `/dev/ttyACM0` or `COM3`.
    pub address: String,
    /// Line speed of the serial link.
    pub baud_rate: u32,
    /// Number of channels each live line must carry.
    pub channel_count: usize,
    /// Where samples are logged.
    pub log_path: PathBuf,
    /// Header labels; `Muscle1..MuscleN` when absent.
    #[serde(default)]
    pub channel_labels: Option<Vec<String>>,
    /// Longest a single device read may block.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Pause between reads that came back empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause after opening the port; the board resets when the port opens.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Longest `stop()` waits for the read loop to wind down.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Longest unterminated fragment kept by the framer, in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// `fsync` every row, not just flush it.
    #[serde(default)]
    pub sync_each_sample: bool,
    /// When appending to an existing log, continue its time axis instead of
    /// starting again from zero.
    #[serde(default)]
    pub resume_timeline: bool,
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    30
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

impl SessionConfig {
    /// A config for the given device and log, with defaults for everything
    /// else.
    pub fn new(
        address: impl Into<String>,
        baud_rate: u32,
        channel_count: usize,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            address: address.into(),
            baud_rate,
            channel_count,
            log_path: log_path.into(),
            channel_labels: None,
            read_timeout_ms: default_read_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            max_line_length: default_max_line_length(),
            sync_each_sample: false,
            resume_timeline: false,
        }
    }

    /// Read a [SessionConfig] from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
        ron::from_str(&text).map_err(ConfigError::RonSpanned)
    }

    /// Write this [SessionConfig] out to the path provided.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(ConfigError::Ron)?;
        fs::write(path, text).map_err(ConfigError::Io)
    }

    /// The labels to head the log with. Configured labels are only used if
    /// there is one per channel and none of them would break the header row.
    pub fn labels(&self) -> Vec<String> {
        match &self.channel_labels {
            Some(labels) if labels.len() != self.channel_count => {
                warn!(
                    "Ignoring {} channel labels for {} channels",
                    labels.len(),
                    self.channel_count
                );
                default_labels(self.channel_count)
            }
            Some(labels) if labels.iter().any(|label| !is_header_safe(label)) => {
                warn!(
                    "Ignoring channel labels {:?}: a label may not contain {:?} or a line break",
                    labels, FIELD_SEPARATOR
                );
                default_labels(self.channel_count)
            }
            Some(labels) => labels.clone(),
            None => default_labels(self.channel_count),
        }
    }

    /// See [SessionConfig::read_timeout_ms].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// See [SessionConfig::poll_interval_ms].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// See [SessionConfig::settle_delay_ms].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// See [SessionConfig::stop_timeout_ms].
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Label presets for the muscle groups the harness is worn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MuscleGroup {
    /// Right and left vastus lateralis and medialis.
    #[default]
    Quad,
    /// Right and left biceps femoris and semitendinosus.
    Hamstring,
}

impl MuscleGroup {
    /// The four channel labels, in harness order.
    pub fn labels(&self) -> [&'static str; 4] {
        match self {
            MuscleGroup::Quad => ["RVL", "RVM", "LVM", "LVL"],
            MuscleGroup::Hamstring => ["RBF", "RST", "LST", "LBF"],
        }
    }
}

fn is_header_safe(label: &str) -> bool {
    !label.contains(|c: char| c == FIELD_SEPARATOR || c == '\n' || c == '\r')
}

/// Errors from loading or saving a [SessionConfig].
#[derive(Debug)]
pub enum ConfigError {
    /// Returned when reading or writing the file fails.
    Io(io::Error),

    /// Returned when serialization fails.
    Ron(ron::Error),

    /// Returned when the file is not a valid config.
    RonSpanned(ron::de::SpannedError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::Io(error) => Cow::from(format!("io error: {}", error)),
            ConfigError::Ron(error) => Cow::from(format!("ron error: {}", error)),
            ConfigError::RonSpanned(error) => Cow::from(format!("invalid config: {}", error)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}
