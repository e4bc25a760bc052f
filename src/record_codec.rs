//! Converts a [`Sample`] to and from its textual line form.
//!
//! Two kinds of line flow through the system:
//!
//! - **live lines** come from the device, e.g. `512 498 733 12`. They carry
//!   only the channel values, separated by runs of whitespace. The session
//!   assigns the elapsed time when the line arrives.
//! - **log rows** are what we write to disk, e.g. `1.25,512,498,733,12`. They
//!   are comma separated and lead with the elapsed time.
//!
//! Both are parsed with [`parse`], selecting the form with a [`RecordContext`].

use crate::sample::Sample;

use nom::{combinator::all_consuming, number::complete::double, IResult};
use std::fmt;

/// The separator between fields of a log row.
pub const FIELD_SEPARATOR: char = ',';

/// The name of the first column of the log.
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// Which form of line is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordContext {
    /// A whitespace-separated line straight off the device, no timestamp.
    LiveLine,
    /// A comma-separated row read back from the log, timestamp first.
    LogRow,
}

/// Why a line could not be turned into a [`Sample`]. Callers in the read loop
/// drop these lines; they are expected noise from a physical link.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseFailure {
    /// The line had the wrong number of channel values.
    ChannelCountMismatch {
        /// The channel count of the session.
        expected: usize,
        /// The number of channel tokens actually found.
        actual: usize,
    },
    /// A token was not a real number.
    NotNumeric(String),
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseFailure::ChannelCountMismatch { expected, actual } => write!(
                f,
                "channel count mismatch: expected {}, got {}",
                expected, actual
            ),
            ParseFailure::NotNumeric(token) => write!(f, "not a number: {:?}", token),
        }
    }
}

impl std::error::Error for ParseFailure {}

fn parse_real(s: &str) -> IResult<&str, f64> {
    all_consuming(double)(s)
}

/// Parses a single token as a real number.
pub fn parse_value(token: &str) -> Result<f64, ParseFailure> {
    match parse_real(token) {
        Ok((_, value)) => Ok(value),
        Err(_) => Err(ParseFailure::NotNumeric(token.to_owned())),
    }
}

/// Parses one line in the given context, checking it carries exactly
/// `expected_channel_count` channel values.
///
/// Live lines get an elapsed time of `0.0`; the session fills it in.
pub fn parse(
    line: &str,
    context: RecordContext,
    expected_channel_count: usize,
) -> Result<Sample, ParseFailure> {
    let (elapsed_time, channel_tokens): (f64, Vec<&str>) = match context {
        RecordContext::LiveLine => (0.0, line.split_whitespace().collect()),
        RecordContext::LogRow => {
            let mut fields = line.trim().split(FIELD_SEPARATOR).map(str::trim);
            let elapsed = match fields.next() {
                Some(token) if !token.is_empty() => parse_value(token)?,
                _ => {
                    return Err(ParseFailure::ChannelCountMismatch {
                        expected: expected_channel_count,
                        actual: 0,
                    })
                }
            };
            (elapsed, fields.collect())
        }
    };

    if channel_tokens.len() != expected_channel_count {
        return Err(ParseFailure::ChannelCountMismatch {
            expected: expected_channel_count,
            actual: channel_tokens.len(),
        });
    }

    let channels = channel_tokens
        .into_iter()
        .map(parse_value)
        .collect::<Result<Vec<f64>, ParseFailure>>()?;

    Ok(Sample::new(elapsed_time, channels))
}

/// Formats a sample as a log row, including the trailing line break.
pub fn format(sample: &Sample) -> String {
    let mut line = format_value(sample.elapsed_time);
    for value in &sample.channels {
        line.push(FIELD_SEPARATOR);
        line.push_str(&format_value(*value));
    }
    line.push('\n');
    line
}

// `{}` on an f64 is the shortest representation that reads back to the same
// value, so rows round-trip exactly.
fn format_value(value: f64) -> String {
    format!("{}", value)
}

/// Formats the header row of a log with the given channel labels.
pub fn format_header<S: AsRef<str>>(labels: &[S]) -> String {
    let mut line = TIMESTAMP_COLUMN.to_owned();
    for label in labels {
        line.push(FIELD_SEPARATOR);
        line.push_str(label.as_ref());
    }
    line.push('\n');
    line
}

/// Splits a header row back into its channel labels, dropping the timestamp
/// column. Returns `None` if the line is not a header.
pub fn parse_header(line: &str) -> Option<Vec<String>> {
    let mut fields = line.trim().split(FIELD_SEPARATOR).map(str::trim);
    match fields.next() {
        Some(first) if parse_value(first).is_err() => Some(fields.map(str::to_owned).collect()),
        _ => None,
    }
}

/// A log row parsed field by field, where each field either parsed or did not.
/// Used by the aggregator, for which a corrupt value in one column must not
/// throw away the rest of the row.
#[derive(Debug, Clone, PartialEq)]
pub struct LenientRow {
    /// The elapsed time, if it parsed.
    pub elapsed_time: Option<f64>,
    /// Exactly `channel_count` entries; missing or unparsable fields are `None`.
    pub values: Vec<Option<f64>>,
}

/// Parses a log row without rejecting it as a whole. Missing trailing fields
/// and extra fields are tolerated; the result always has `channel_count`
/// values.
pub fn parse_lenient(line: &str, channel_count: usize) -> LenientRow {
    let mut fields = line.trim().split(FIELD_SEPARATOR).map(str::trim);
    let elapsed_time = fields.next().and_then(|t| parse_value(t).ok());
    let mut values: Vec<Option<f64>> = fields
        .take(channel_count)
        .map(|t| parse_value(t).ok())
        .collect();
    values.resize(channel_count, None);
    LenientRow {
        elapsed_time,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_live_line() {
        let sample = parse("512 498\t733   12", RecordContext::LiveLine, 4).unwrap();
        assert_eq!(sample.channels, vec![512.0, 498.0, 733.0, 12.0]);
        assert_eq!(sample.elapsed_time, 0.0);
    }

    #[test]
    fn parse_live_line_wrong_count() {
        assert_eq!(
            parse("1 2 3", RecordContext::LiveLine, 4),
            Err(ParseFailure::ChannelCountMismatch {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            parse("1 2 3 4 5", RecordContext::LiveLine, 4),
            Err(ParseFailure::ChannelCountMismatch {
                expected: 4,
                actual: 5
            })
        );
        assert!(parse("", RecordContext::LiveLine, 4).is_err());
    }

    #[test]
    fn parse_live_line_not_numeric() {
        assert_eq!(
            parse("1 2 x3 4", RecordContext::LiveLine, 4),
            Err(ParseFailure::NotNumeric("x3".to_owned()))
        );
        // a number followed by junk is not a number
        assert!(parse("1 2 3 4.0.0", RecordContext::LiveLine, 4).is_err());
    }

    #[test]
    fn parse_log_row() {
        let sample = parse("1.5,10,-2.25,3e2", RecordContext::LogRow, 3).unwrap();
        assert_eq!(sample.elapsed_time, 1.5);
        assert_eq!(sample.channels, vec![10.0, -2.25, 300.0]);
    }

    #[test]
    fn parse_log_row_counts_after_timestamp() {
        assert_eq!(
            parse("1.5,10,20", RecordContext::LogRow, 3),
            Err(ParseFailure::ChannelCountMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn format_then_parse() {
        let samples = [
            Sample::new(0.0, vec![0.0, 0.0, 0.0, 0.0]),
            Sample::new(12.3456, vec![512.0, 498.5, -3.125, 1e-3]),
            Sample::new(3600.001, vec![0.1, 0.2, 0.3, 1234567.891]),
        ];
        for sample in samples {
            let line = format(&sample);
            assert!(line.ends_with('\n'));
            let parsed = parse(line.trim_end(), RecordContext::LogRow, 4).unwrap();
            assert_eq!(parsed, sample);
        }
    }

    #[test]
    fn format_rounds_elapsed_time() {
        assert_eq!(format(&Sample::new(1.23456, vec![7.0])), "1.235,7\n");
    }

    #[test]
    fn header_round_trip() {
        let header = format_header(&["RVL", "RVM"]);
        assert_eq!(header, "Timestamp,RVL,RVM\n");
        assert_eq!(
            parse_header(&header),
            Some(vec!["RVL".to_owned(), "RVM".to_owned()])
        );
        assert_eq!(parse_header("0.5,1,2"), None);
    }

    #[test]
    fn lenient_row_keeps_good_columns() {
        let row = parse_lenient("2.0,5,oops,7", 4);
        assert_eq!(row.elapsed_time, Some(2.0));
        assert_eq!(row.values, vec![Some(5.0), None, Some(7.0), None]);

        let row = parse_lenient("bad,1,2", 2);
        assert_eq!(row.elapsed_time, None);
        assert_eq!(row.values, vec![Some(1.0), Some(2.0)]);
    }
}
