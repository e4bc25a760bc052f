//! The [`Sample`], one timestamped vector of per-channel EMG amplitudes.

use std::fmt;

/// Seconds since the start of an acquisition session.
pub type Seconds = f64;

/// One row of the log: the elapsed time at which the sample arrived and one
/// amplitude per channel. Every accepted sample has exactly as many channels
/// as the session was configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Elapsed time, always rounded to millisecond resolution.
    pub elapsed_time: Seconds,
    /// Amplitudes, ordered by channel.
    pub channels: Vec<f64>,
}

impl Sample {
    /// Builds a new [`Sample`], rounding the elapsed time to 3 decimal places.
    pub fn new(elapsed_time: Seconds, channels: Vec<f64>) -> Self {
        Self {
            elapsed_time: round_millis(elapsed_time),
            channels,
        }
    }

    /// The number of channels carried by this sample.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}s]", self.elapsed_time)?;
        for value in &self.channels {
            write!(f, " {:.2}", value)?;
        }
        Ok(())
    }
}

/// Rounds a number of seconds to millisecond resolution.
pub fn round_millis(seconds: Seconds) -> Seconds {
    (seconds * 1000.0).round() / 1000.0
}
