//! The append-only, file-backed log of [`Sample`]s.
//!
//! A log is a UTF-8 CSV file: one header row, then one row per sample.
//!
//! ```text
//! Timestamp,Muscle1,Muscle2,Muscle3,Muscle4
//! 0.031,512,498,733,12
//! 0.062,515,497,730,14
//! ```
//!
//! The acquisition session is the only writer, and it only ever appends whole
//! rows and flushes them. Readers re-open the file from the top every time
//! they want to look at it; see [`read_rows`].

use crate::record_codec::{self, format_header, parse_header};
use crate::sample::Sample;

use log::{debug, info};
use std::{
    borrow::Cow,
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

/// Things that can go wrong reading or writing a log.
#[derive(Debug)]
pub enum LogError {
    /// Returned when io fails while opening, writing or reading the file.
    Io(io::Error),

    /// Returned when a log that should have a header does not start with one.
    MissingHeader,
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            LogError::Io(error) => Cow::from(format!("io error: {}", error)),
            LogError::MissingHeader => Cow::from("log does not start with a header row"),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogError::Io(error) => Some(error),
            LogError::MissingHeader => None,
        }
    }
}

impl From<io::Error> for LogError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// What is currently on disk at a log path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    /// Nothing there yet.
    Absent,
    /// A file of zero length.
    Empty,
    /// A file holding at least a header.
    Populated {
        /// Size of the file in bytes.
        bytes: u64,
    },
}

impl LogStatus {
    /// Looks at `path` and reports what is there.
    pub fn probe(path: impl AsRef<Path>) -> Result<Self, LogError> {
        match fs::metadata(path) {
            Ok(meta) if meta.len() == 0 => Ok(LogStatus::Empty),
            Ok(meta) => Ok(LogStatus::Populated { bytes: meta.len() }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LogStatus::Absent),
            Err(e) => Err(LogError::Io(e)),
        }
    }

    /// Whether a fresh header needs to be written.
    pub fn needs_header(&self) -> bool {
        !matches!(self, LogStatus::Populated { .. })
    }
}

/// The default channel labels: `Muscle1`, `Muscle2`, ...
pub fn default_labels(channel_count: usize) -> Vec<String> {
    (1..=channel_count).map(|i| format!("Muscle{}", i)).collect()
}

/// The log file name used for a test subject.
pub fn log_path_for_subject(subject: &str) -> PathBuf {
    PathBuf::from(format!("TestSubject_{}.csv", subject))
}

/// An open log, ready for appending.
#[derive(Debug)]
pub struct SampleLog {
    path: PathBuf,
    writer: BufWriter<File>,
    sync_each_sample: bool,
    appended: u64,
}

impl SampleLog {
    /// Opens the log at `path` for appending. If the file is absent or empty
    /// the header is written first; an existing header is left alone.
    pub fn open_append<S: AsRef<str>>(
        path: impl AsRef<Path>,
        labels: &[S],
    ) -> Result<Self, LogError> {
        let path = path.as_ref();
        let status = LogStatus::probe(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        if status.needs_header() {
            writer.write_all(format_header(labels).as_bytes())?;
            writer.flush()?;
            info!("Created log {}", path.display());
        } else {
            info!("Resuming log {} ({:?})", path.display(), status);
        }

        Ok(Self {
            path: path.to_owned(),
            writer,
            sync_each_sample: false,
            appended: 0,
        })
    }

    /// Also ask the OS to push every row to the device, not just to its cache.
    pub fn sync_each_sample(mut self, sync: bool) -> Self {
        self.sync_each_sample = sync;
        self
    }

    /// Appends one row and flushes it. The row goes out in a single write,
    /// so a concurrent reader sees either all of it or none of it.
    pub fn append(&mut self, sample: &Sample) -> Result<(), LogError> {
        self.writer
            .write_all(record_codec::format(sample).as_bytes())?;
        self.writer.flush()?;
        if self.sync_each_sample {
            self.writer.get_ref().sync_data()?;
        }
        self.appended += 1;
        Ok(())
    }

    /// Flushes and releases the file handle.
    pub fn close(mut self) -> Result<(), LogError> {
        self.writer.flush()?;
        debug!(
            "Closed log {} after appending {} rows",
            self.path.display(),
            self.appended
        );
        Ok(())
    }

    /// How many rows this handle has appended.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Where this log lives.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The contents of a log at one moment: its channel labels and raw data rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogContents {
    /// Labels from the header row, timestamp column excluded.
    pub labels: Vec<String>,
    /// Each complete data row, without its terminator.
    pub rows: Vec<String>,
}

/// Reads the whole log from the top.
///
/// The writer may be halfway through a row when we look, so a final line
/// without a terminator is taken to be partially flushed and left out.
/// A blank log reads as no labels and no rows.
pub fn read_rows(path: impl AsRef<Path>) -> Result<LogContents, LogError> {
    let text = fs::read(path)?;
    let text = String::from_utf8_lossy(&text);

    let mut lines = text.split_inclusive('\n').filter(|l| l.ends_with('\n'));

    let Some(header) = lines.next() else {
        return Ok(LogContents::default());
    };
    let labels = parse_header(header).ok_or(LogError::MissingHeader)?;

    let rows = lines
        .map(|l| l.trim_end_matches(['\r', '\n']))
        .filter(|l| !l.trim().is_empty())
        .map(str::to_owned)
        .collect();

    Ok(LogContents { labels, rows })
}

/// The elapsed time of the last complete row of a log, if there is one.
pub fn last_elapsed(path: impl AsRef<Path>) -> Result<Option<f64>, LogError> {
    let contents = match read_rows(path) {
        Ok(contents) => contents,
        Err(LogError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(contents
        .rows
        .iter()
        .rev()
        .find_map(|row| record_codec::parse_lenient(row, 0).elapsed_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn probe_reports_each_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        assert_eq!(LogStatus::probe(&path).unwrap(), LogStatus::Absent);

        File::create(&path).unwrap();
        assert_eq!(LogStatus::probe(&path).unwrap(), LogStatus::Empty);

        fs::write(&path, "Timestamp,Muscle1\n").unwrap();
        assert_eq!(
            LogStatus::probe(&path).unwrap(),
            LogStatus::Populated { bytes: 18 }
        );
    }

    #[test]
    fn fresh_log_gets_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = SampleLog::open_append(&path, &default_labels(2)).unwrap();
        log.append(&Sample::new(0.5, vec![1.0, 2.5])).unwrap();
        assert_eq!(log.appended(), 1);
        log.close().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Timestamp,Muscle1,Muscle2\n0.5,1,2.5\n");
    }

    #[test]
    fn empty_file_gets_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        File::create(&path).unwrap();
        SampleLog::open_append(&path, &["RVL"]).unwrap().close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Timestamp,RVL\n");
    }

    #[test]
    fn reopening_does_not_duplicate_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "Timestamp,Muscle1\n0.1,4\n").unwrap();

        let mut log = SampleLog::open_append(&path, &default_labels(1)).unwrap();
        log.append(&Sample::new(0.2, vec![5.0])).unwrap();
        log.close().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Timestamp,Muscle1\n0.1,4\n0.2,5\n");
        assert_eq!(text.matches("Timestamp").count(), 1);
    }

    #[test]
    fn rows_are_visible_before_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = SampleLog::open_append(&path, &default_labels(1))
            .unwrap()
            .sync_each_sample(true);
        log.append(&Sample::new(0.1, vec![1.0])).unwrap();

        let contents = read_rows(&path).unwrap();
        assert_eq!(contents.rows, vec!["0.1,1"]);
        log.close().unwrap();
    }

    #[test]
    fn read_skips_truncated_trailing_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "Timestamp,A,B\r\n0.1,1,2\r\n\n0.2,3,4\n0.3,5").unwrap();

        let contents = read_rows(&path).unwrap();
        assert_eq!(contents.labels, vec!["A", "B"]);
        assert_eq!(contents.rows, vec!["0.1,1,2", "0.2,3,4"]);
    }

    #[test]
    fn read_rejects_headerless_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "0.1,1,2\n").unwrap();
        assert!(matches!(read_rows(&path), Err(LogError::MissingHeader)));
    }

    #[test]
    fn last_elapsed_finds_final_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        assert_eq!(last_elapsed(&path).unwrap(), None);

        fs::write(&path, "Timestamp,A\n").unwrap();
        assert_eq!(last_elapsed(&path).unwrap(), None);

        fs::write(&path, "Timestamp,A\n0.1,1\n2.5,1\n").unwrap();
        assert_eq!(last_elapsed(&path).unwrap(), Some(2.5));
    }

    #[test]
    fn subject_file_name() {
        assert_eq!(
            log_path_for_subject("A00"),
            PathBuf::from("TestSubject_A00.csv")
        );
    }
}
