//! Command line front end: records a session, or summarizes an old one.

// Example:
// cargo run --bin stabiliknee -- record --port /dev/ttyACM0 --subject A00 --muscles quad
// cargo run --bin stabiliknee -- record --simulate 200 --duration 10 --log demo.csv
// cargo run --bin stabiliknee -- summarize --subject A00

use clap::Parser;
use log::{error, info, warn};
use stabiliknee::{
    aggregator::{ChannelAggregate, LogSnapshot},
    args::{CommandTask, KneeArgs, RecordCommand, SummarizeCommand},
    config::SessionConfig,
    device::{available_ports, Connector, SerialConnector},
    sample_log::LogStatus,
    session::Session,
    simulated_device::SimulatedConnector,
};
use std::{
    io,
    path::Path,
    process::ExitCode,
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

fn main() -> ExitCode {
    env_logger::init();
    let args = KneeArgs::parse();

    match args.command {
        CommandTask::Ports => list_ports(),
        CommandTask::Summarize(cmd) => summarize(&cmd),
        CommandTask::Record(cmd) => record(&cmd),
    }
}

fn list_ports() -> ExitCode {
    match available_ports() {
        Ok(ports) => {
            println!("Available devices:");
            for port in ports {
                println!("\t{}", port.to_string_lossy());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to get available ports: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn summarize(cmd: &SummarizeCommand) -> ExitCode {
    let path = cmd.log.path();
    match LogSnapshot::read(&path, cmd.channels) {
        Ok(snapshot) => {
            println!("{} ({} samples)", path.display(), snapshot.num_rows());
            print_aggregates(&snapshot.aggregates());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Could not read {}: {}", path.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn record(cmd: &RecordCommand) -> ExitCode {
    let base = match &cmd.config {
        Some(path) => match SessionConfig::from_path(path) {
            Ok(config) => Some(config),
            Err(e) => {
                error!("Could not load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    let config = cmd.apply(base);

    match cmd.simulate {
        Some(rate) => run_session(
            SimulatedConnector::new(config.channel_count, rate),
            config,
            cmd,
        ),
        None if config.address.is_empty() => {
            error!("No serial port given; pass --port or use `ports` to list them");
            ExitCode::FAILURE
        }
        None => run_session(SerialConnector, config, cmd),
    }
}

fn run_session<C: Connector>(
    connector: C,
    config: SessionConfig,
    cmd: &RecordCommand,
) -> ExitCode {
    let log_path = config.log_path.clone();
    let channel_count = config.channel_count;

    if let Ok(LogStatus::Populated { .. }) = LogStatus::probe(&log_path) {
        info!("Appending to existing log {}", log_path.display());
        report(&log_path, channel_count);
    }

    let mut session = Session::new(connector);
    let events = match session.start(config) {
        Ok(events) => events,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Stop when the user hits Enter. The reader thread is left blocked on
    // stdin if we stop for another reason; it goes away with the process.
    let (stop_tx, stop_rx) = mpsc::channel();
    if cmd.duration.is_none() {
        println!("Recording to {}. Press Enter to stop.", log_path.display());
        thread::spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().read_line(&mut line);
            let _ = stop_tx.send(());
        });
    }

    // a deadline past the end of the clock never arrives
    let deadline = cmd
        .duration
        .and_then(|duration| Instant::now().checked_add(duration));
    let interval = Duration::from_millis(cmd.interval_ms.max(1));
    let mut last_report = Instant::now();
    let mut fresh = false;

    loop {
        if stop_rx.try_recv().is_ok() || deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        if let Some(update) = events.next_update(interval) {
            for message in &update.errors {
                warn!("{}", message);
            }
            fresh |= update.has_new_samples();
            if update.stopped {
                break;
            }
        }

        // a burst of samples only costs one pass over the log
        if fresh && last_report.elapsed() >= interval {
            report(&log_path, channel_count);
            last_report = Instant::now();
            fresh = false;
        }
    }

    session.stop();
    report(&log_path, channel_count);
    info!("Data saved to {}", log_path.display());
    ExitCode::SUCCESS
}

fn report(log_path: &Path, channel_count: usize) {
    match LogSnapshot::read(log_path, channel_count) {
        Ok(snapshot) => print_aggregates(&snapshot.aggregates()),
        // the last good numbers stay on screen
        Err(e) => warn!("Could not summarize {}: {}", log_path.display(), e),
    }
}

fn print_aggregates(aggregates: &[ChannelAggregate]) {
    for agg in aggregates {
        let name = agg
            .label
            .clone()
            .unwrap_or_else(|| format!("Muscle #{}", agg.channel_index));
        println!(
            "{:>10}  peak {:>10.2} mV  total activity {:>12.2} mV·s",
            name, agg.peak, agg.activity
        );
    }
}
