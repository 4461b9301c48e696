//! Loading bars from delimited text files.
//!
//! The header names the columns. A time column (`date`, `datetime`, `time`
//! or `timestamp`) and `close` are required; `high` and `low` are optional
//! and default to the close. Other columns are ignored. Commas, semicolons
//! and tabs are accepted as delimiters.

use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;
use log::{debug, warn};

use crate::error::{DetectionError, Result};
use crate::series::{Bars, Series};

const TIME_COLUMNS: [&str; 4] = ["date", "datetime", "time", "timestamp"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn load_bars(path: &Path) -> Result<Bars> {
    let content = fs::read_to_string(path)
        .map_err(|e| DetectionError::Io(format!("{}: {}", path.display(), e)))?;
    let bars = parse_bars(&content)?;
    debug!("Loaded {} bars from {}", bars.len(), path.display());
    Ok(bars)
}

pub fn load_series(path: &Path) -> Result<Series> {
    Ok(load_bars(path)?.close_series())
}

struct Columns {
    delimiter: char,
    time: usize,
    close: usize,
    high: Option<usize>,
    low: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self> {
        let delimiter = ['\t', ';', ',']
            .into_iter()
            .find(|d| header.contains(*d))
            .unwrap_or(',');
        let names = header
            .split(delimiter)
            .map(|name| unquote(name).to_lowercase())
            .collect_vec();
        let position = |wanted: &str| names.iter().position(|name| name == wanted);

        let time = TIME_COLUMNS
            .iter()
            .find_map(|name| position(name))
            .ok_or_else(|| DetectionError::Parse {
                line: 1,
                reason: format!("no time column, expected one of {}", TIME_COLUMNS.join(", ")),
            })?;
        let close = position("close").ok_or_else(|| DetectionError::Parse {
            line: 1,
            reason: "no 'close' column".to_string(),
        })?;

        Ok(Columns {
            delimiter,
            time,
            close,
            high: position("high"),
            low: position("low"),
        })
    }
}

fn unquote(field: &str) -> &str {
    field.trim().trim_matches('"')
}

pub fn parse_timestamp(field: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(field, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(field, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Parse delimited bars, sorted by time.
pub fn parse_bars(content: &str) -> Result<Bars> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Err(DetectionError::Parse {
            line: 1,
            reason: "empty input".to_string(),
        });
    };
    let columns = Columns::from_header(header)?;

    let mut rows = vec![];
    for (line, text) in lines {
        let fields = text.split(columns.delimiter).map(unquote).collect_vec();
        let field = |index: usize, name: &str| {
            fields.get(index).copied().ok_or_else(|| DetectionError::Parse {
                line,
                reason: format!("missing {name}"),
            })
        };
        let number = |index: usize, name: &str| -> Result<f64> {
            let value = field(index, name)?;
            value.parse::<f64>().map_err(|e| DetectionError::Parse {
                line,
                reason: format!("cannot parse {name} '{value}': {e}"),
            })
        };

        let time_field = field(columns.time, "time")?;
        let timestamp = parse_timestamp(time_field).ok_or_else(|| DetectionError::Parse {
            line,
            reason: format!("cannot parse time '{time_field}'"),
        })?;
        let close = number(columns.close, "close")?;
        let high = match columns.high {
            Some(index) => number(index, "high")?,
            None => close,
        };
        let low = match columns.low {
            Some(index) => number(index, "low")?,
            None => close,
        };
        rows.push((timestamp, close, high, low));
    }

    if !rows.iter().tuple_windows().all(|(a, b)| a.0 <= b.0) {
        warn!("Input rows are not in time order, sorting them");
        rows.sort_by_key(|row| row.0);
    }

    let mut bars = Bars {
        timestamps: Vec::with_capacity(rows.len()),
        close: Vec::with_capacity(rows.len()),
        high: Vec::with_capacity(rows.len()),
        low: Vec::with_capacity(rows.len()),
    };
    for (timestamp, close, high, low) in rows {
        bars.timestamps.push(timestamp);
        bars.close.push(close);
        bars.high.push(high);
        bars.low.push(low);
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_daily_csv() {
        let content = "Date,Open,High,Low,Close,Volume\n\
                       2024-06-03,10.0,10.5,9.8,10.2,1000\n\
                       2024-06-04,10.2,10.9,10.1,10.8,1200\n";
        let bars = parse_bars(content).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars.close, vec![10.2, 10.8]);
        assert_eq!(bars.high, vec![10.5, 10.9]);
        assert_eq!(bars.low, vec![9.8, 10.1]);
        assert_eq!(bars.timestamps[1], parse_timestamp("2024-06-04").unwrap());
    }

    #[test]
    fn test_close_only_tab_separated() {
        let content = "datetime\tclose\n2024-06-03 10:30:00\t5\n2024-06-03 11:30:00\t6\n";
        let bars = parse_bars(content).unwrap();
        assert_eq!(bars.high, bars.close);
        assert_eq!(bars.low, bars.close);
        assert_eq!(bars.timestamps[0].format("%H:%M").to_string(), "10:30");
    }

    #[test]
    fn test_rows_are_sorted() {
        let content = "date;close\n\"2024-06-05\";3\n2024-06-03;1\n\n2024-06-04;2\n";
        let bars = parse_bars(content).unwrap();
        assert_eq!(bars.close, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        assert!(matches!(
            parse_bars(""),
            Err(DetectionError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse_bars("date,open\n2024-06-03,1\n"),
            Err(DetectionError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse_bars("date,close\n2024-06-03,1\n2024-06-04,abc\n"),
            Err(DetectionError::Parse { line: 3, .. })
        ));
        assert!(matches!(
            parse_bars("date,close\nyesterday,1\n"),
            Err(DetectionError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse_bars("date,close\n2024-06-03\n"),
            Err(DetectionError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,close").unwrap();
        writeln!(file, "2024-06-03T09:30:00,1.5").unwrap();
        let series = load_series(file.path()).unwrap();
        assert_eq!(series.values(), &[1.5]);
        assert!(series.timestamps().is_some());

        let missing = load_bars(Path::new("/nonexistent/bars.csv"));
        assert!(matches!(missing, Err(DetectionError::Io(_))));
    }
}
