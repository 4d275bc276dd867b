//! Local history import: one `<ID>.csv` file per instrument.
//!
//! Rows are `date,value[,open,high,low,volume]`, quoted or not. A leading
//! header row (such as FRED's `observation_date,UNRATE`), blank lines, and
//! `#` comments are skipped. Empty optional fields read as missing, and a
//! row whose value is `.` (FRED's missing marker) is dropped.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use finsight_core::{parse_date, InMemoryHistoryProvider, Instrument, InstrumentId, Observation};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::error::CliError;

/// Loads the files for `instruments` into a provider. An instrument without
/// a file stays unknown to the provider, so its fetches fail with
/// `provider.not_found`.
pub fn load_history_dir(
    dir: &Path,
    instruments: &[Instrument],
) -> Result<InMemoryHistoryProvider, CliError> {
    let provider = InMemoryHistoryProvider::new();
    for instrument in instruments {
        let path = dir.join(format!("{}.csv", instrument.id()));
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!(instrument = %instrument, path = %path.display(), "no history file");
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        let observations = parse_history(instrument.id(), &contents).map_err(|(line, message)| {
            CliError::HistoryFile {
                path: path.display().to_string(),
                line,
                message,
            }
        })?;
        debug!(instrument = %instrument, rows = observations.len(), "loaded history file");
        provider.extend(observations);
    }
    Ok(provider)
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    date: String,
    #[serde(deserialize_with = "optional_number")]
    value: Option<f64>,
    #[serde(default, deserialize_with = "optional_number")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "optional_number")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "optional_number")]
    low: Option<f64>,
    #[serde(default)]
    volume: Option<u64>,
}

/// Empty and `.` read as missing.
fn optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim() {
        "" | "." => Ok(None),
        raw => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected a number, found '{raw}'"))),
    }
}

/// Errors carry the 1-based line number.
pub fn parse_history(
    id: &InstrumentId,
    contents: &str,
) -> Result<Vec<Observation>, (usize, String)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(contents.as_bytes());

    let mut observations = Vec::new();
    let mut missing = 0usize;
    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|error| {
            let line = error.position().map_or(0, |position| position.line());
            (to_line(line), error.to_string())
        })?;
        let line = to_line(record.position().map_or(0, |position| position.line()));

        let starts_with_digit = record
            .get(0)
            .is_some_and(|field| field.starts_with(|c: char| c.is_ascii_digit()));
        if index == 0 && !starts_with_digit {
            continue;
        }
        if !(2..=6).contains(&record.len()) {
            return Err((line, format!("expected 2 to 6 fields, found {}", record.len())));
        }

        let row: HistoryRow = record.deserialize(None).map_err(|error| {
            let message = match error.kind() {
                csv::ErrorKind::Deserialize { err, .. } => err.to_string(),
                _ => error.to_string(),
            };
            (line, message)
        })?;
        match to_observation(id, row).map_err(|message| (line, message))? {
            Some(observation) => observations.push(observation),
            None => missing += 1,
        }
    }
    if missing > 0 {
        debug!(instrument = %id, missing, "skipped rows without a value");
    }
    Ok(observations)
}

fn to_observation(id: &InstrumentId, row: HistoryRow) -> Result<Option<Observation>, String> {
    let date = parse_date(&row.date).map_err(|error| error.to_string())?;
    let Some(value) = row.value else {
        return Ok(None);
    };
    Observation::new(id.clone(), date, value)
        .and_then(|observation| observation.with_bar(row.open, row.high, row.low, row.volume))
        .map(Some)
        .map_err(|error| error.to_string())
}

fn to_line(line: u64) -> usize {
    usize::try_from(line).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsight_core::{AssetClass, HistoryProvider, HistoryRequest};
    use tempfile::tempdir;

    fn spy() -> InstrumentId {
        InstrumentId::parse("SPY").expect("id")
    }

    #[test]
    fn parses_rows_with_optional_bar_fields() {
        let contents = "date,value,open,high,low,volume\n\
                        2025-07-18,627.58,626.0,628.9,624.1,71000000\n\
                        \n\
                        # holiday gap\n\
                        2025-07-21,628.77,,,,\n";
        let observations = parse_history(&spy(), contents).expect("parse");
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].volume, Some(71_000_000));
        assert_eq!(observations[0].high, Some(628.9));
        assert_eq!(observations[1].value, 628.77);
        assert_eq!(observations[1].open, None);
    }

    #[test]
    fn reports_the_offending_line() {
        let contents = "date,value\n2025-07-18,627.58\n2025-13-01,1.0\n";
        let (line, message) = parse_history(&spy(), contents).expect_err("bad date");
        assert_eq!(line, 3);
        assert!(message.contains("2025-13-01"));

        let (line, message) = parse_history(&spy(), "2025-07-18,abc\n").expect_err("bad value");
        assert_eq!(line, 1);
        assert!(message.contains("abc"));

        let (line, message) =
            parse_history(&spy(), "date,value\n2025-07-18,1,2,3,4,5,6\n").expect_err("too wide");
        assert_eq!(line, 2);
        assert!(message.contains("found 7"));
    }

    #[test]
    fn reads_fred_downloads_and_drops_missing_values() {
        let unrate = InstrumentId::parse("UNRATE").expect("id");
        let contents = "observation_date,UNRATE\n\
                        2025-04-01,4.2\n\
                        2025-05-01,.\n\
                        2025-06-01,4.1\n";
        let observations = parse_history(&unrate, contents).expect("parse");
        let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![4.2, 4.1]);
        assert_eq!(observations[1].date, parse_date("2025-06-01").expect("date"));
    }

    #[test]
    fn accepts_quoted_fields() {
        let contents = "\"date\",\"value\",\"open\"\n\
                        \"2025-06-01\",\"4.1\",\"\"\n\
                        \"2025-06-02\",\"4.3\",\"4.0\"\n";
        let observations = parse_history(&spy(), contents).expect("parse");
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].value, 4.1);
        assert_eq!(observations[0].open, None);
        assert_eq!(observations[1].value, 4.3);
        assert_eq!(observations[1].open, Some(4.0));
    }

    #[tokio::test]
    async fn missing_files_surface_as_not_found() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("SPY.csv"), "date,value\n2025-07-18,627.58\n").expect("write");
        let spy = Instrument::parse("SPY", AssetClass::Etf).expect("inst");
        let qqq = Instrument::parse("QQQ", AssetClass::Etf).expect("inst");

        let provider = load_history_dir(dir.path(), &[spy.clone(), qqq.clone()]).expect("load");

        let request = HistoryRequest::new(spy.id().clone(), None, 10).expect("request");
        assert_eq!(provider.fetch_history(&request).await.expect("fetch").len(), 1);

        let request = HistoryRequest::new(qqq.id().clone(), None, 10).expect("request");
        let error = provider.fetch_history(&request).await.expect_err("missing");
        assert_eq!(error.code(), "provider.not_found");
    }
}
