//! The local daily report (`*.csv`) and the rows merged into the remote aggregate.

use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use tracing::debug;

use crate::dates::format_report_date;
use crate::error::{PipelineError, PipelineResult};

/// First line of a freshly created remote aggregate.
pub const HEADER_LINE: &str = "Echoes Daily Report;";

const DELIMITER: u8 = b';';

/// The first entry of a directory listing that names a CSV file.
pub fn find_report(entries: &[String]) -> Option<&str> {
    entries
        .iter()
        .map(String::as_str)
        .find(|name| name.len() > ".csv".len() && name.ends_with(".csv"))
}

/// The lines a report contributes to the aggregate for one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRow {
    /// Column header row of the local report.
    pub columns: String,
    /// The row whose date column formats to the requested day.
    pub row: String,
}

impl DailyRow {
    /// Content appended to an existing aggregate.
    pub fn append_content(&self) -> String {
        format!("{}\n", self.row)
    }

    /// Content of a new aggregate: header, column headers, then the row.
    pub fn create_content(&self) -> String {
        format!("{HEADER_LINE}\n{}\n{}\n", self.columns, self.row)
    }
}

/// Reads `report` and extracts the row for `filename` (`YYYY-MM-DD`).
///
/// The column header row is the last undated row before the first dated one.
pub fn extract_daily_row(report: &Path, filename: &str) -> PipelineResult<DailyRow> {
    let mut reader = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_path(report)
        .map_err(|source| report_error(report, source))?;

    let mut columns: Option<String> = None;
    let mut first_line: Option<String> = None;
    let mut last_undated: Option<String> = None;
    let mut matched: Option<String> = None;

    for record in reader.byte_records() {
        let record = record.map_err(|source| report_error(report, source))?;
        let fields: Vec<String> = record.iter().map(decode_field).collect();
        let line = to_line(&fields).map_err(|source| report_error(report, source))?;
        let day = fields.first().and_then(|first| format_report_date(first));

        if first_line.is_none() {
            first_line = Some(line.clone());
        }
        match day {
            Some(day) => {
                if columns.is_none() {
                    columns = last_undated.clone();
                }
                if day == filename {
                    matched = Some(line);
                }
            }
            None => last_undated = Some(line),
        }
    }

    let Some(row) = matched else {
        return Err(PipelineError::RowNotFound {
            filename: filename.to_string(),
            report: report.to_path_buf(),
        });
    };
    let columns = columns.or(first_line).unwrap_or_default();
    debug!(report = %report.display(), filename, "Extracted daily report row");
    Ok(DailyRow { columns, row })
}

/// UTF-8 where valid, otherwise Latin-1 as written by spreadsheet exports.
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(field) => field.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Joins fields back into one `;`-delimited line, quoting where needed.
fn to_line(fields: &[String]) -> Result<String, csv::Error> {
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

fn report_error(report: &Path, source: csv::Error) -> PipelineError {
    if let csv::ErrorKind::Io(io) = source.kind() {
        if io.kind() == std::io::ErrorKind::NotFound {
            return PipelineError::SourceMissing(report.to_path_buf());
        }
    }
    PipelineError::Report {
        report: PathBuf::from(report),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const REPORT: &str = "\
Echoes report Fuenlabrada;;;
Date:;00h;;|;Daily totals;|
mar. sept. 8 2020;-;-;|;0;|
mié. sept. 9 2020;-110,58;-126,36;|;9;|
";

    fn write_report(content: &str) -> tempfile::NamedTempFile {
        write_report_bytes(content.as_bytes())
    }

    fn write_report_bytes(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn finds_the_first_csv_entry() {
        let entries = vec![
            "2020-09-10".to_string(),
            "notes.txt".to_string(),
            "daily.csv".to_string(),
            "other.csv".to_string(),
        ];
        assert_eq!(find_report(&entries), Some("daily.csv"));
        assert_eq!(find_report(&["2020-09-10.zip".to_string()]), None);
        assert_eq!(find_report(&[".csv".to_string()]), None);
    }

    #[test]
    fn picks_only_the_row_for_the_requested_day() {
        let file = write_report(REPORT);
        let daily = extract_daily_row(file.path(), "2020-09-09").unwrap();
        assert_eq!(daily.columns, "Date:;00h;;|;Daily totals;|");
        assert_eq!(daily.row, "mié. sept. 9 2020;-110,58;-126,36;|;9;|");
        assert_eq!(daily.append_content(), "mié. sept. 9 2020;-110,58;-126,36;|;9;|\n");
        assert_eq!(
            daily.create_content(),
            "Echoes Daily Report;\nDate:;00h;;|;Daily totals;|\nmié. sept. 9 2020;-110,58;-126,36;|;9;|\n"
        );
    }

    #[test]
    fn latin1_reports_are_decoded() {
        let file = write_report_bytes(b"Date:;00h\nmi\xE9. sept. 9 2020;-110,58\n");
        let daily = extract_daily_row(file.path(), "2020-09-09").unwrap();
        assert_eq!(daily.columns, "Date:;00h");
        assert_eq!(daily.row, "mié. sept. 9 2020;-110,58");
    }

    #[test]
    fn quoted_fields_keep_their_quoting() {
        let file = write_report("Date:;Notes\nmié. sept. 9 2020;\"a;b\"\n");
        let daily = extract_daily_row(file.path(), "2020-09-09").unwrap();
        assert_eq!(daily.row, "mié. sept. 9 2020;\"a;b\"");

        let reparsed = ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .from_reader(daily.row.as_bytes())
            .records()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(reparsed.len(), 2);
    }

    #[test]
    fn missing_row_is_reported() {
        let file = write_report(REPORT);
        let err = extract_daily_row(file.path(), "2020-09-10").unwrap_err();
        assert!(matches!(err, PipelineError::RowNotFound { ref filename, .. } if filename == "2020-09-10"));
    }

    #[test]
    fn missing_report_is_a_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_daily_row(&dir.path().join("daily.csv"), "2020-09-09").unwrap_err();
        assert!(matches!(err, PipelineError::SourceMissing(_)));
    }
}
