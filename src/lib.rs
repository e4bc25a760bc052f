//! StabiliKnee records surface EMG from a four-channel wearable sensor worn
//! on the quadriceps or hamstrings. The sensor streams one line of amplitudes
//! per sample over a serial link; this crate reads that stream, logs every
//! sample to a CSV file the moment it arrives, and derives per-muscle peak
//! amplitude and total muscle activity from the log for live and historical
//! review.
//!
//! The moving parts, leaves first:
//!
//! - [`record_codec`] turns lines into [`sample::Sample`]s and back.
//! - [`framer`] rebuilds lines from whatever chunks the serial port hands us.
//! - [`sample_log`] is the append-only log file.
//! - [`session`] owns the device and the log and runs the read loop, telling
//!   subscribers about new samples through [`events`].
//! - [`aggregator`] re-reads the log to compute the per-channel metrics.
//!
//! Whatever draws the results only needs the event channel and read access to
//! the log; it never touches the read loop.

#![warn(missing_docs)]
pub mod aggregator;
pub mod args;
pub mod config;
pub mod device;
pub mod events;
pub mod framer;
pub mod record_codec;
pub mod sample;
pub mod sample_log;
pub mod session;
pub mod simulated_device;

/// An iterator function that transposes the order of iteration based on
/// [this StackOverflow answer](https://stackoverflow.com/a/75477884/17443903).
/// Turns an iterator of rows into an iterator of columns; iteration stops at
/// the end of the shortest row.
pub struct TransposeIter<I, T>
where
    I: IntoIterator<Item = T>,
{
    iterators: Vec<I::IntoIter>,
}

#[allow(missing_docs)]
pub trait TransposableIter<I, T>
where
    Self: Sized,
    Self: IntoIterator<Item = I>,
    I: IntoIterator<Item = T>,
{
    fn transpose(self) -> TransposeIter<I, T> {
        let iterators: Vec<_> = self.into_iter().map(|i| i.into_iter()).collect();
        TransposeIter { iterators }
    }
}

impl<I, T> Iterator for TransposeIter<I, T>
where
    I: IntoIterator<Item = T>,
{
    type Item = Vec<T>;
    fn next(&mut self) -> Option<Self::Item> {
        // with no rows there are no columns, rather than endless empty ones
        if self.iterators.is_empty() {
            return None;
        }
        let output: Option<Vec<T>> = self.iterators.iter_mut().map(|iter| iter.next()).collect();
        output
    }
}

impl<I, T, Any> TransposableIter<I, T> for Any
where
    Any: IntoIterator<Item = I>,
    I: IntoIterator<Item = T>,
{
}
