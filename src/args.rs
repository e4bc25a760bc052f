//! Commandline argument parser using clap for StabiliKnee

use crate::config::{MuscleGroup, SessionConfig, DEFAULT_BAUD_RATE, DEFAULT_CHANNEL_COUNT};
use crate::sample_log::log_path_for_subject;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Record and review EMG from the StabiliKnee sensor
pub struct KneeArgs {
    #[command(subcommand)]
    /// Which task to perform
    pub command: CommandTask,
}

/// The tasks the binary can perform.
#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Record live samples from the sensor into a log
    #[command(about)]
    Record(RecordCommand),

    /// Print peak amplitude and total activity for an existing log
    #[command(about)]
    Summarize(SummarizeCommand),

    /// List the serial devices on this machine
    #[command(about)]
    Ports,
}

/// Where the log lives: an explicit path, or one derived from a subject id.
#[derive(Debug, Args, Clone)]
pub struct LogTarget {
    /// Log file to append to or read from
    #[arg(short = 'o', long = "log")]
    pub log_path: Option<PathBuf>,

    /// Test subject id; the log becomes TestSubject_<id>.csv
    #[arg(short = 's', long = "subject", default_value = "A0")]
    pub subject: String,
}

impl LogTarget {
    /// The log path these arguments point at.
    pub fn path(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| log_path_for_subject(&self.subject))
    }
}

/// Label presets selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MuscleGroupArg {
    /// RVL RVM LVM LVL
    Quad,
    /// RBF RST LST LBF
    Hamstring,
}

impl From<MuscleGroupArg> for MuscleGroup {
    fn from(value: MuscleGroupArg) -> Self {
        match value {
            MuscleGroupArg::Quad => MuscleGroup::Quad,
            MuscleGroupArg::Hamstring => MuscleGroup::Hamstring,
        }
    }
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
/// Arguments for `record`
pub struct RecordCommand {
    /// Session config in RON; the flags below override it
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Serial device, e.g. /dev/ttyACM0 or COM3
    #[arg(short = 'p', long = "port")]
    pub port: Option<String>,

    /// Baud rate of the serial link
    #[arg(short = 'b', long = "baud")]
    pub baud_rate: Option<u32>,

    /// Number of sensor channels
    #[arg(short = 'n', long = "channels")]
    pub channels: Option<usize>,

    // where to log
    #[command(flatten)]
    pub log: LogTarget,

    /// Name the channels after a muscle group
    #[arg(short = 'm', long = "muscles", value_enum)]
    pub muscles: Option<MuscleGroupArg>,

    /// Stop after this many seconds instead of waiting for Enter
    #[arg(short = 'd', long = "duration", value_parser = parse_seconds)]
    pub duration: Option<Duration>,

    /// How often to print a summary, in milliseconds
    #[arg(short = 'i', long = "interval", default_value_t = 1000)]
    pub interval_ms: u64,

    /// Read from a simulated sensor at this many samples per second
    #[arg(long = "simulate")]
    pub simulate: Option<f64>,
}

fn parse_seconds(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg
        .parse()
        .map_err(|_| format!("{:?} is not a number of seconds", arg))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{}: {}", arg, e))
}

impl RecordCommand {
    /// Folds the flags over `base` (a config file, or the defaults).
    pub fn apply(&self, base: Option<SessionConfig>) -> SessionConfig {
        let mut config = base.unwrap_or_else(|| {
            SessionConfig::new(
                "",
                DEFAULT_BAUD_RATE,
                DEFAULT_CHANNEL_COUNT,
                self.log.path(),
            )
        });
        if let Some(port) = &self.port {
            config.address = port.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(channels) = self.channels {
            config.channel_count = channels;
        }
        if self.log.log_path.is_some() {
            config.log_path = self.log.path();
        }
        if let Some(muscles) = self.muscles {
            let labels = MuscleGroup::from(muscles).labels();
            config.channel_labels = Some(labels.iter().map(|l| l.to_string()).collect());
        }
        if self.simulate.is_some() {
            config.settle_delay_ms = 0;
            if config.address.is_empty() {
                config.address = "simulator".to_owned();
            }
        }
        config
    }
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
/// Arguments for `summarize`
pub struct SummarizeCommand {
    // which log to read
    #[command(flatten)]
    pub log: LogTarget,

    /// Number of sensor channels in the log
    #[arg(short = 'n', long = "channels", default_value_t = DEFAULT_CHANNEL_COUNT)]
    pub channels: usize,
}
