//! A fake EMG sensor, for running the whole pipeline without hardware.
//!
//! The simulated device speaks the same line protocol as the real one: one
//! whitespace-separated line of amplitudes per sample. Every so often a
//! channel "contracts", which shows up as a decaying burst of amplitude. The
//! byte stream is handed out in randomly sized chunks, and a small share of
//! lines are deliberately corrupted, so the framer and the record codec get
//! the same kind of abuse a real serial link gives them.

use crate::device::{Connector, Device};

use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::VecDeque,
    io,
    thread,
    time::{Duration, Instant},
};

/// Resting amplitude of every channel.
const BASELINE: f64 = 20.0;
/// Peak amplitude added on top of the baseline at the height of a burst.
const BURST_AMPLITUDE: f64 = 600.0;
/// How much of a burst survives each sample.
const BURST_DECAY: f64 = 0.93;

/// Opens [`SimulatedDevice`]s. The address is ignored.
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    channel_count: usize,
    sample_rate_hz: f64,
    glitch_probability: f64,
    seed: Option<u64>,
}

impl SimulatedConnector {
    /// A simulator producing `channel_count` channels at `sample_rate_hz`.
    pub fn new(channel_count: usize, sample_rate_hz: f64) -> Self {
        Self {
            channel_count,
            sample_rate_hz,
            glitch_probability: 0.01,
            seed: None,
        }
    }

    /// The share of lines that come out corrupted, between 0 and 1.
    pub fn glitch_probability(mut self, p: f64) -> Self {
        self.glitch_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Fixes the random seed so runs are repeatable.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Connector for SimulatedConnector {
    type Device = SimulatedDevice;

    fn connect(
        &self,
        address: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> io::Result<SimulatedDevice> {
        if self.sample_rate_hz <= 0.0 || !self.sample_rate_hz.is_finite() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sample rate must be greater than zero",
            ));
        }
        debug!(
            "Simulating {} channels at {} Hz on {} ({} baud)",
            self.channel_count, self.sample_rate_hz, address, baud_rate
        );
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(SimulatedDevice {
            bursts: vec![0.0; self.channel_count],
            interval: Duration::from_secs_f64(1.0 / self.sample_rate_hz),
            next_due: Instant::now(),
            pending: VecDeque::new(),
            glitch_probability: self.glitch_probability,
            read_timeout,
            rng,
        })
    }
}

/// A running simulated sensor.
#[derive(Debug)]
pub struct SimulatedDevice {
    bursts: Vec<f64>,
    interval: Duration,
    next_due: Instant,
    pending: VecDeque<u8>,
    glitch_probability: f64,
    read_timeout: Duration,
    rng: StdRng,
}

impl SimulatedDevice {
    fn next_line(&mut self) -> String {
        for burst in self.bursts.iter_mut() {
            *burst *= BURST_DECAY;
            if self.rng.gen_bool(0.005) {
                *burst = 1.0;
            }
        }

        let values: Vec<String> = self
            .bursts
            .iter()
            .map(|burst| {
                let jitter: f64 = self.rng.gen_range(0.5..1.5);
                let resting = BASELINE * self.rng.gen_range(0.8..1.2);
                let value = resting + burst * BURST_AMPLITUDE * jitter;
                format!("{:.0}", value)
            })
            .collect();

        let mut line = values.join(" ");
        if self.rng.gen_bool(self.glitch_probability) {
            // drop the last value, the way a link that lost a few bytes would
            if let Some(idx) = line.rfind(' ') {
                line.truncate(idx);
            } else {
                line.push_str(" ?");
            }
        }
        line.push_str("\r\n");
        line
    }

    fn generate_due_lines(&mut self) {
        let now = Instant::now();
        while self.next_due <= now {
            let line = self.next_line();
            self.pending.extend(line.into_bytes());
            self.next_due += self.interval;
        }
    }
}

impl Device for SimulatedDevice {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let wait = self.next_due.saturating_duration_since(Instant::now());
            if wait > self.read_timeout {
                thread::sleep(self.read_timeout);
                return Ok(0);
            }
            thread::sleep(wait);
            self.generate_due_lines();
        }

        if self.pending.is_empty() || buf.is_empty() {
            return Ok(0);
        }

        // hand out a random share of what is waiting, so lines get split
        let available = self.pending.len().min(buf.len());
        let n = self.rng.gen_range(1..=available);
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
