//! The acquisition session: owns the device and the log, and runs the
//! read, frame, parse, append, notify loop on its own thread.
//!
//! ```text
//!          start()             ok              stop()           joined
//!   Idle ──────────▶ Connecting ──▶ Running ──────────▶ Stopping ──────▶ Closed
//!                        │             │                    │
//!                        └─────────────┴─────▶ Failed ◀─────┘
//! ```
//!
//! A session is driven by exactly one owner. `start` never blocks on the
//! device beyond opening it, and `stop` does not return until the read loop
//! has let go of the device and the log file.

use crate::config::SessionConfig;
use crate::device::{Connector, Device};
use crate::events::{self, EventSender, SessionEvent, SessionEvents};
use crate::framer::LineFramer;
use crate::record_codec::{self, RecordContext};
use crate::sample::Sample;
use crate::sample_log::{last_elapsed, LogError, SampleLog};

use log::{debug, error, info, warn};
use std::{
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Size of the buffer each device read lands in.
const READ_CHUNK: usize = 4096;

/// Where a [`Session`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never started.
    Idle,
    /// Opening the device and the log.
    Connecting,
    /// The read loop is running.
    Running,
    /// Waiting for the read loop to finish.
    Stopping,
    /// Stopped cleanly; may be started again.
    Closed,
    /// Setup failed or the read loop died. Terminal.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why [`Session::start`] did not get a session running.
#[derive(Debug)]
pub enum SessionError {
    /// The device could not be opened.
    DeviceOpenFailure(io::Error),
    /// The log could not be opened or prepared. The device was released.
    LogOpenFailure(LogError),
    /// `start` was called in a state it cannot be called from.
    InvalidState(SessionState),
    /// The config cannot describe a working session.
    InvalidConfig(String),
    /// The read loop thread could not be spawned.
    Spawn(io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::DeviceOpenFailure(e) => write!(f, "could not open device: {}", e),
            SessionError::LogOpenFailure(e) => write!(f, "could not open log: {}", e),
            SessionError::InvalidState(state) => {
                write!(f, "cannot start a session that is {}", state)
            }
            SessionError::InvalidConfig(reason) => write!(f, "invalid config: {}", reason),
            SessionError::Spawn(e) => write!(f, "could not spawn read loop: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::DeviceOpenFailure(e) | SessionError::Spawn(e) => Some(e),
            SessionError::LogOpenFailure(e) => Some(e),
            SessionError::InvalidState(_) | SessionError::InvalidConfig(_) => None,
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
    died: Arc<AtomicBool>,
    stop_timeout: Duration,
}

/// One acquisition session against one device and one log.
pub struct Session<C: Connector> {
    connector: C,
    state: SessionState,
    running: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl<C: Connector> Session<C> {
    /// A new, idle session that will open its device through `connector`.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: SessionState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// The current lifecycle state. A read loop that died shows up here as
    /// [`SessionState::Failed`] straight away, without waiting for `stop`.
    pub fn state(&self) -> SessionState {
        let died = self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.died.load(Ordering::Acquire));
        if self.state == SessionState::Running && died {
            SessionState::Failed
        } else {
            self.state
        }
    }

    /// Whether the read loop is running.
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Opens the device and the log, then starts the read loop on its own
    /// thread. Returns the channel on which the loop reports what it does.
    ///
    /// A config that could never work is rejected without touching the
    /// state. Any other failure leaves the session [`SessionState::Failed`];
    /// there is no retry.
    pub fn start(&mut self, config: SessionConfig) -> Result<SessionEvents, SessionError> {
        let state = self.state();
        if !matches!(state, SessionState::Idle | SessionState::Closed) {
            return Err(SessionError::InvalidState(state));
        }
        if config.channel_count == 0 {
            return Err(SessionError::InvalidConfig(
                "channel count must be at least 1".to_owned(),
            ));
        }
        self.state = SessionState::Connecting;
        info!(
            "Connecting to {} at {} baud",
            config.address, config.baud_rate
        );

        let device = match self.connector.connect(
            &config.address,
            config.baud_rate,
            config.read_timeout(),
        ) {
            Ok(device) => device,
            Err(e) => {
                error!("Could not open {}: {}", config.address, e);
                self.state = SessionState::Failed;
                return Err(SessionError::DeviceOpenFailure(e));
            }
        };

        let (log, time_offset) = match open_log(&config) {
            Ok(opened) => opened,
            Err((e, offset_lookup)) => {
                drop(device);
                error!(
                    "Could not {} {}: {}",
                    if offset_lookup { "read" } else { "open" },
                    config.log_path.display(),
                    e
                );
                self.state = SessionState::Failed;
                return Err(SessionError::LogOpenFailure(e));
            }
        };

        let (tx, events) = events::channel();
        let (done_tx, done) = mpsc::channel();
        let died = Arc::new(AtomicBool::new(false));
        let loop_died = Arc::clone(&died);
        let last_words = tx.clone();
        self.running.store(true, Ordering::Release);

        let read_loop = ReadLoop {
            device,
            log,
            framer: LineFramer::new(config.max_line_length),
            channel_count: config.channel_count,
            running: Arc::clone(&self.running),
            events: tx,
            poll_interval: config.poll_interval(),
            settle_delay: config.settle_delay(),
            time_offset,
        };

        let spawned = thread::Builder::new()
            .name("acquisition".to_owned())
            .spawn(move || {
                // the device and the log are dropped while unwinding
                match panic::catch_unwind(AssertUnwindSafe(|| read_loop.run())) {
                    Ok(()) => {
                        let _ = done_tx.send(());
                    }
                    Err(_) => {
                        error!("Read loop panicked, acquisition has ended");
                        loop_died.store(true, Ordering::Release);
                        last_words.send(SessionEvent::TransientError(
                            "read loop died".to_owned(),
                        ));
                        last_words.send(SessionEvent::Stopped);
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker {
                    handle,
                    done,
                    died,
                    stop_timeout: config.stop_timeout(),
                });
                self.state = SessionState::Running;
                info!("Session running, logging to {}", config.log_path.display());
                Ok(events)
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                error!("Could not spawn read loop: {}", e);
                self.state = SessionState::Failed;
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Asks the read loop to finish and waits for it to release the device
    /// and the log. Does nothing unless the session was started and not yet
    /// stopped, so it is safe to call any number of times. A dead read loop
    /// is reaped here and the session stays failed.
    pub fn stop(&mut self) {
        if self.state != SessionState::Running {
            debug!("stop() on a session that is {}, nothing to do", self.state);
            return;
        }
        self.state = SessionState::Stopping;
        self.running.store(false, Ordering::Release);

        // We have to `.take()` the worker because joining moves the
        // `JoinHandle`. If it is already gone, whoever took it owns the thread.
        let Some(worker) = self.worker.take() else {
            self.state = SessionState::Closed;
            return;
        };

        self.state = match worker.done.recv_timeout(worker.stop_timeout) {
            Ok(()) => match worker.handle.join() {
                Ok(()) => SessionState::Closed,
                Err(_) => SessionState::Failed,
            },
            Err(RecvTimeoutError::Disconnected) => {
                // the loop ended without saying so, which only a panic does
                let _ = worker.handle.join();
                error!("Read loop died");
                SessionState::Failed
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Read loop did not stop within {:?}, abandoning it",
                    worker.stop_timeout
                );
                SessionState::Failed
            }
        };
        info!("Session {}", self.state);
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens the log, and works out where on the time axis this session starts.
/// The flag on the error says whether it was the time lookup that failed.
fn open_log(config: &SessionConfig) -> Result<(SampleLog, f64), (LogError, bool)> {
    let time_offset = if config.resume_timeline {
        last_elapsed(&config.log_path)
            .map_err(|e| (e, true))?
            .unwrap_or(0.0)
    } else {
        0.0
    };
    let log = SampleLog::open_append(&config.log_path, &config.labels())
        .map_err(|e| (e, false))?
        .sync_each_sample(config.sync_each_sample);
    Ok((log, time_offset))
}

struct ReadLoop<D: Device> {
    device: D,
    log: SampleLog,
    framer: LineFramer,
    channel_count: usize,
    running: Arc<AtomicBool>,
    events: EventSender,
    poll_interval: Duration,
    settle_delay: Duration,
    time_offset: f64,
}

impl<D: Device> ReadLoop<D> {
    fn run(mut self) {
        self.settle();

        let start_time = Instant::now();
        let mut buf = vec![0u8; READ_CHUNK];
        self.events.send(SessionEvent::Started);

        while self.running.load(Ordering::Acquire) {
            match self.device.read_available(&mut buf) {
                Ok(0) => spin_sleep::sleep(self.poll_interval),
                Ok(n) => {
                    self.ingest(&buf[..n], start_time);
                    // a full buffer means there is probably more waiting
                    if n < buf.len() {
                        spin_sleep::sleep(self.poll_interval);
                    }
                }
                Err(e) => {
                    warn!("Serial read error: {}", e);
                    self.events
                        .send(SessionEvent::TransientError(format!("read failed: {}", e)));
                    spin_sleep::sleep(self.poll_interval);
                }
            }
        }

        let appended = self.log.appended();
        if let Err(e) = self.log.close() {
            warn!("Error closing log: {}", e);
        }
        drop(self.device);
        info!("Read loop finished after {} samples", appended);
        self.events.send(SessionEvent::Stopped);
    }

    /// Waits out the settle delay, in small steps so a stop request is not
    /// held up by it.
    fn settle(&self) {
        let deadline = Instant::now() + self.settle_delay;
        while self.running.load(Ordering::Acquire) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            spin_sleep::sleep(left.min(self.poll_interval.max(Duration::from_millis(1))));
        }
    }

    fn ingest(&mut self, chunk: &[u8], start_time: Instant) {
        let lines: Vec<String> = self.framer.push(chunk).collect();
        for line in lines {
            self.record(&line, start_time);
        }
    }

    fn record(&mut self, line: &str, start_time: Instant) {
        let channels = match record_codec::parse(line, RecordContext::LiveLine, self.channel_count) {
            Ok(sample) => sample.channels,
            Err(failure) => {
                debug!("Dropping line {:?}: {}", line, failure);
                return;
            }
        };

        let elapsed = self.time_offset + start_time.elapsed().as_secs_f64();
        let sample = Sample::new(elapsed, channels);
        match self.log.append(&sample) {
            Ok(()) => self.events.send(SessionEvent::SampleAppended(sample)),
            Err(e) => {
                warn!("Could not append to log: {}", e);
                self.events
                    .send(SessionEvent::TransientError(format!("append failed: {}", e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{ScriptedConnector, ScriptedDevice, Step};
    use crate::sample_log::read_rows;
    use std::{fs, path::Path};
    use tempfile::tempdir;

    fn test_config(log_path: &Path, channel_count: usize) -> SessionConfig {
        let mut config = SessionConfig::new("scripted", 115200, channel_count, log_path);
        config.settle_delay_ms = 0;
        config.poll_interval_ms = 1;
        config.read_timeout_ms = 10;
        config.stop_timeout_ms = 2000;
        config
    }

    fn connector(device: ScriptedDevice) -> ScriptedConnector {
        ScriptedConnector {
            device: Some(device),
        }
    }

    /// Collects events until `samples` samples have arrived or five seconds
    /// pass.
    fn wait_for_samples(events: &SessionEvents, samples: usize) -> Vec<SessionEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        let mut count = 0;
        while count < samples && Instant::now() < deadline {
            if let Some(event) = events.recv_timeout(Duration::from_millis(50)) {
                if matches!(event, SessionEvent::SampleAppended(_)) {
                    count += 1;
                }
                seen.push(event);
            }
        }
        seen
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let mut session = Session::new(ScriptedConnector { device: None });
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn missing_device_fails_the_session() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut session = Session::new(ScriptedConnector { device: None });

        let result = session.start(test_config(&path, 4));
        assert!(matches!(result, Err(SessionError::DeviceOpenFailure(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!path.exists());

        // failed is terminal
        let again = session.start(test_config(&path, 4));
        assert!(matches!(
            again,
            Err(SessionError::InvalidState(SessionState::Failed))
        ));
        session.stop();
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn unopenable_log_fails_the_session() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("log.csv");
        let device = ScriptedDevice::default();
        let mut session = Session::new(connector(device));

        let result = session.start(test_config(&path, 4));
        assert!(matches!(result, Err(SessionError::LogOpenFailure(_))));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn only_valid_lines_reach_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let text = "1 2 3 4\n5 6\n7 8 9 10\r\nx y z w\n\n11 12 13 14 15\n16 17 18 19\n20 2";
        let device = ScriptedDevice::from_text(text, 3);
        let mut session = Session::new(connector(device));

        let events = session.start(test_config(&path, 4)).unwrap();
        assert!(session.is_running());
        let seen = wait_for_samples(&events, 3);
        session.stop();
        assert_eq!(session.state(), SessionState::Closed);

        let samples: Vec<Sample> = seen
            .into_iter()
            .chain(events.try_iter())
            .filter_map(|e| match e {
                SessionEvent::SampleAppended(s) => Some(s),
                _ => None,
            })
            .collect();
        let channels: Vec<Vec<f64>> = samples.iter().map(|s| s.channels.clone()).collect();
        assert_eq!(
            channels,
            vec![
                vec![1.0, 2.0, 3.0, 4.0],
                vec![7.0, 8.0, 9.0, 10.0],
                vec![16.0, 17.0, 18.0, 19.0],
            ]
        );
        assert!(samples
            .windows(2)
            .all(|w| w[0].elapsed_time <= w[1].elapsed_time));

        let contents = read_rows(&path).unwrap();
        assert_eq!(contents.labels, vec!["Muscle1", "Muscle2", "Muscle3", "Muscle4"]);
        assert_eq!(contents.rows.len(), 3);
        for (row, sample) in contents.rows.iter().zip(&samples) {
            let parsed = record_codec::parse(row, RecordContext::LogRow, 4).unwrap();
            assert_eq!(&parsed, sample);
        }
    }

    #[test]
    fn stopped_event_follows_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let device = ScriptedDevice::from_text("1 2\n", 64);
        let mut session = Session::new(connector(device));

        let events = session.start(test_config(&path, 2)).unwrap();
        let seen = wait_for_samples(&events, 1);
        assert_eq!(seen.first(), Some(&SessionEvent::Started));
        session.stop();

        let rest: Vec<SessionEvent> = events.try_iter().collect();
        assert_eq!(rest.last(), Some(&SessionEvent::Stopped));
    }

    #[test]
    fn read_errors_do_not_end_the_loop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let device = ScriptedDevice::new([
            Step::Bytes(b"1 2\n".to_vec()),
            Step::Fail(io::ErrorKind::BrokenPipe),
            Step::Fail(io::ErrorKind::Other),
            Step::Bytes(b"3 4\n".to_vec()),
        ]);
        let mut session = Session::new(connector(device));

        let events = session.start(test_config(&path, 2)).unwrap();
        let seen = wait_for_samples(&events, 2);
        session.stop();

        let errors = seen
            .iter()
            .filter(|e| matches!(e, SessionEvent::TransientError(_)))
            .count();
        assert_eq!(errors, 2);
        assert_eq!(read_rows(&path).unwrap().rows.len(), 2);
    }

    #[test]
    fn resuming_keeps_single_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "Timestamp,Muscle1,Muscle2\n10.5,1,1\n").unwrap();

        let device = ScriptedDevice::from_text("2 2\n", 64);
        let mut session = Session::new(connector(device));
        let mut config = test_config(&path, 2);
        config.resume_timeline = true;

        let events = session.start(config).unwrap();
        wait_for_samples(&events, 1);
        session.stop();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Timestamp").count(), 1);
        let contents = read_rows(&path).unwrap();
        assert_eq!(contents.rows.len(), 2);
        let resumed = record_codec::parse(&contents.rows[1], RecordContext::LogRow, 2).unwrap();
        assert!(resumed.elapsed_time >= 10.5);
    }

    #[test]
    fn closed_session_can_start_again() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let device = ScriptedDevice::from_text("1\n", 64);
        let mut session = Session::new(connector(device.clone()));

        let events = session.start(test_config(&path, 1)).unwrap();
        wait_for_samples(&events, 1);
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Closed);

        let events = session.start(test_config(&path, 1)).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(matches!(
            session.start(test_config(&path, 1)),
            Err(SessionError::InvalidState(SessionState::Running))
        ));
        drop(session);
        assert!(events
            .try_iter()
            .any(|e| e == SessionEvent::Stopped));
        assert_eq!(device.remaining(), 0);
        assert_eq!(read_rows(&path).unwrap().rows.len(), 1);
    }

    #[test]
    fn zero_channels_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut session = Session::new(connector(ScriptedDevice::from_text("\n\n", 64)));

        let result = session.start(test_config(&path, 0));
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!path.exists());
    }

    #[test]
    fn panicking_device_fails_the_session() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let device = ScriptedDevice::new([Step::Bytes(b"1 2\n".to_vec()), Step::Panic]);
        let mut session = Session::new(connector(device));

        let events = session.start(test_config(&path, 2)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while !seen.contains(&SessionEvent::Stopped) && Instant::now() < deadline {
            if let Some(event) = events.recv_timeout(Duration::from_millis(50)) {
                seen.push(event);
            }
        }

        // no stop() yet
        assert_eq!(seen.last(), Some(&SessionEvent::Stopped));
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::TransientError(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.is_running());
        assert!(matches!(
            session.start(test_config(&path, 2)),
            Err(SessionError::InvalidState(SessionState::Failed))
        ));

        session.stop();
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(read_rows(&path).unwrap().rows.len(), 1);
    }

    #[test]
    fn stop_interrupts_settle_delay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut session = Session::new(connector(ScriptedDevice::default()));
        let mut config = test_config(&path, 4);
        config.settle_delay_ms = 60_000;

        let _events = session.start(config).unwrap();
        let begun = Instant::now();
        session.stop();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(begun.elapsed() < Duration::from_secs(10));
    }
}
