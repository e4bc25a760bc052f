//! Per-channel summary metrics, recomputed from scratch by re-reading the log.
//!
//! Two metrics are derived for every channel:
//!
//! - the **peak**, the largest amplitude seen so far, and
//! - the **activity**, the area under the amplitude curve over elapsed time,
//!   integrated with the trapezoidal rule.
//!
//! Each pass re-reads the whole log and keeps no state between passes, so a
//! pass can never drift out of step with what is on disk. Channel indices in
//! the returned maps start at 1, matching the column order of the log.

use crate::record_codec::{parse_lenient, LenientRow};
use crate::sample::round_millis;
use crate::sample_log::{read_rows, LogError};
use crate::TransposableIter;

use std::{collections::BTreeMap, path::Path};

/// A 1-based channel index.
pub type ChannelIndex = usize;

/// The summary of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAggregate {
    /// Which channel, counting from 1.
    pub channel_index: ChannelIndex,
    /// The channel's label from the log header, if it had one.
    pub label: Option<String>,
    /// Largest value seen, or `0` if the channel has no valid values.
    pub peak: f64,
    /// Trapezoidal integral of value over time, or `0` with fewer than two
    /// valid points.
    pub activity: f64,
}

/// Time axis and per-channel values, as a plotting collaborator wants them.
/// A point is left out of a channel when its value or its timestamp did not
/// parse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelSeries {
    /// `(elapsed_time, value)` pairs, one `Vec` per channel.
    pub points: Vec<Vec<(f64, f64)>>,
}

/// One read of the log, from which every metric is derived.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSnapshot {
    channel_count: usize,
    labels: Vec<String>,
    rows: Vec<LenientRow>,
}

impl LogSnapshot {
    /// Reads the log at `path`, interpreting `channel_count` channel columns.
    pub fn read(path: impl AsRef<Path>, channel_count: usize) -> Result<Self, LogError> {
        let contents = read_rows(path)?;
        Ok(Self::from_rows(
            contents.labels,
            contents.rows.iter().map(String::as_str),
            channel_count,
        ))
    }

    /// Builds a snapshot from rows already in memory.
    pub fn from_rows<'a>(
        labels: Vec<String>,
        rows: impl IntoIterator<Item = &'a str>,
        channel_count: usize,
    ) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| parse_lenient(row, channel_count))
            .map(|mut row| {
                row.elapsed_time = row.elapsed_time.map(round_millis);
                row
            })
            .collect();
        Self {
            channel_count,
            labels,
            rows,
        }
    }

    /// Number of data rows read.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Channel labels from the header.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Every channel's values as a column, in row order.
    fn columns(&self) -> Vec<Vec<Option<f64>>> {
        if self.rows.is_empty() {
            return vec![Vec::new(); self.channel_count];
        }
        self.rows
            .iter()
            .map(|row| row.values.iter().copied())
            .transpose()
            .collect()
    }

    /// Largest value per channel. A corrupt value only drops itself; the
    /// other channels of its row still count.
    pub fn peaks(&self) -> BTreeMap<ChannelIndex, f64> {
        self.columns()
            .into_iter()
            .enumerate()
            .map(|(i, column)| (i + 1, peak(column.into_iter().flatten())))
            .collect()
    }

    /// Area under each channel's curve.
    pub fn activity(&self) -> BTreeMap<ChannelIndex, f64> {
        self.series()
            .points
            .iter()
            .enumerate()
            .map(|(i, points)| (i + 1, trapezoid(points)))
            .collect()
    }

    /// The points of each channel that have both a valid time and value.
    pub fn series(&self) -> ChannelSeries {
        let times: Vec<Option<f64>> = self.rows.iter().map(|r| r.elapsed_time).collect();
        let points = self
            .columns()
            .into_iter()
            .map(|column| {
                times
                    .iter()
                    .zip(column)
                    .filter_map(|(t, v)| Some(((*t)?, v?)))
                    .collect()
            })
            .collect();
        ChannelSeries { points }
    }

    /// Peak and activity for every channel.
    pub fn aggregates(&self) -> Vec<ChannelAggregate> {
        let peaks = self.peaks();
        let activity = self.activity();
        (1..=self.channel_count)
            .map(|i| ChannelAggregate {
                channel_index: i,
                label: self.labels.get(i - 1).cloned(),
                peak: peaks.get(&i).copied().unwrap_or(0.0),
                activity: activity.get(&i).copied().unwrap_or(0.0),
            })
            .collect()
    }
}

/// Reads the log and returns the peak of each of its `channel_count`
/// channels.
pub fn compute_peaks(
    path: impl AsRef<Path>,
    channel_count: usize,
) -> Result<BTreeMap<ChannelIndex, f64>, LogError> {
    Ok(LogSnapshot::read(path, channel_count)?.peaks())
}

/// Reads the log and returns the integrated activity of each of its
/// `channel_count` channels.
pub fn compute_activity(
    path: impl AsRef<Path>,
    channel_count: usize,
) -> Result<BTreeMap<ChannelIndex, f64>, LogError> {
    Ok(LogSnapshot::read(path, channel_count)?.activity())
}

fn peak(values: impl Iterator<Item = f64>) -> f64 {
    values.reduce(f64::max).unwrap_or(0.0)
}

/// Trapezoidal integral over `(t, y)` points taken in order. Fewer than two
/// points have no area.
pub fn trapezoid(points: &[(f64, f64)]) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let (t0, y0) = w[0];
            let (t1, y1) = w[1];
            (t1 - t0) * (y0 + y1) / 2.0
        })
        .sum()
}
