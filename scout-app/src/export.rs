//! Writes the finished result set to CSV and/or JSON, once per run.
use chrono::{DateTime, Utc};
use scout_common::ScoutError;
use scout_common::record::{Completion, ResultSet, SocialPlatform, StoreRecord};
use scout_config::{ExportConfig, ExportFormat};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Excel reads UTF-8 CSV correctly only with a byte-order mark.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub struct ExportSink {
    path: PathBuf,
    format: ExportFormat,
    delimiter: String,
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    generated_at: DateTime<Utc>,
    cap: usize,
    completion: &'a Completion,
    stores: &'a [StoreRecord],
}

/// Header row of the CSV export.
pub fn columns() -> Vec<&'static str> {
    let mut cols = vec!["domain", "url", "status", "emails", "phone_numbers"];
    cols.extend(SocialPlatform::ALL.iter().map(|p| p.column()));
    cols.extend(["physical_address", "contact_page_url"]);
    cols
}

/// One CSV row, in [`columns`] order.
pub fn row(record: &StoreRecord, delimiter: &str) -> Vec<String> {
    let mut cells = vec![
        record.domain.to_string(),
        record.url.clone(),
        record.status.to_string(),
        join(&record.emails, delimiter),
        join(&record.phones, delimiter),
    ];
    cells.extend(
        SocialPlatform::ALL
            .iter()
            .map(|p| record.social.get(p).cloned().unwrap_or_default()),
    );
    cells.push(record.address.clone().unwrap_or_default());
    cells.push(record.contact_page.clone().unwrap_or_default());
    cells
}

fn join<'a>(values: impl IntoIterator<Item = &'a String>, delimiter: &str) -> String {
    values
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(delimiter)
}

fn export_err(path: &Path, err: impl std::fmt::Display) -> ScoutError {
    ScoutError::Export(format!("{}: {err}", path.display()))
}

impl ExportSink {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            path: config.path.clone(),
            format: config.format,
            delimiter: config.delimiter.clone(),
        }
    }

    /// Write every configured format and return the files written.
    pub fn write(&self, results: &ResultSet) -> Result<Vec<PathBuf>, ScoutError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| export_err(parent, e))?;
        }
        let mut written = Vec::new();
        if matches!(self.format, ExportFormat::Csv | ExportFormat::Both) {
            let path = self.path.with_extension("csv");
            self.write_csv(results, &path)?;
            written.push(path);
        }
        if matches!(self.format, ExportFormat::Json | ExportFormat::Both) {
            let path = self.path.with_extension("json");
            self.write_json(results, &path)?;
            written.push(path);
        }
        for path in &written {
            info!(target: "scout.export", path = %path.display(), records = results.len(), "export.written");
        }
        Ok(written)
    }

    fn write_csv(&self, results: &ResultSet, path: &Path) -> Result<(), ScoutError> {
        let mut file = File::create(path).map_err(|e| export_err(path, e))?;
        file.write_all(UTF8_BOM).map_err(|e| export_err(path, e))?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(columns()).map_err(|e| export_err(path, e))?;
        for record in results.iter() {
            writer
                .write_record(row(record, &self.delimiter))
                .map_err(|e| export_err(path, e))?;
        }
        writer.flush().map_err(|e| export_err(path, e))
    }

    fn write_json(&self, results: &ResultSet, path: &Path) -> Result<(), ScoutError> {
        let doc = JsonDocument {
            generated_at: Utc::now(),
            cap: results.cap(),
            completion: results.completion(),
            stores: results.records(),
        };
        let file = File::create(path).map_err(|e| export_err(path, e))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, &doc).map_err(|e| export_err(path, e))?;
        out.flush().map_err(|e| export_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_common::domain::NormalizedDomain;
    use scout_common::record::{ExtractionStatus, SkipReason};
    use scout_common::{DiscoveryExhausted, ExhaustionReason};

    fn record(domain: &str, ordinal: usize) -> StoreRecord {
        let d = NormalizedDomain::parse(domain).unwrap();
        StoreRecord::pending(d, format!("https://{domain}"), ordinal)
    }

    fn sample() -> ResultSet {
        let mut a = record("mugs.example", 0);
        a.emails.insert("hello@mugs.example".into());
        a.emails.insert("orders@mugs.example".into());
        a.phones.insert("+14155550172".into());
        a.social.insert(SocialPlatform::Instagram, "https://instagram.com/mugs".into());
        a.address = Some("12 Kiln Street, Stoke-on-Trent".into());
        a.status = ExtractionStatus::Extracted;

        let mut b = record("knits.example", 1);
        b.status = ExtractionStatus::Skipped(SkipReason::RateLimited);
        ResultSet::new(vec![a, b], 10, Completion::CapReached)
    }

    fn sink(dir: &Path, format: ExportFormat) -> ExportSink {
        ExportSink::new(&ExportConfig {
            path: dir.join("contacts"),
            format,
            ..ExportConfig::default()
        })
    }

    #[test]
    fn csv_has_bom_header_and_joined_cells() {
        let dir = tempfile::tempdir().unwrap();
        let written = sink(dir.path(), ExportFormat::Csv).write(&sample()).unwrap();
        assert_eq!(written, vec![dir.path().join("contacts.csv")]);

        let bytes = fs::read(&written[0]).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));

        let mut reader = csv::Reader::from_reader(&bytes[UTF8_BOM.len()..]);
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, columns());
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "mugs.example");
        assert_eq!(&rows[0][2], "extracted");
        assert_eq!(&rows[0][3], "hello@mugs.example, orders@mugs.example");
        assert_eq!(&rows[0][6], "https://instagram.com/mugs");
        assert_eq!(&rows[0][11], "12 Kiln Street, Stoke-on-Trent");
        assert_eq!(&rows[1][2], "skipped: rate limited");
        assert_eq!(&rows[1][3], "");
    }

    #[test]
    fn json_carries_completion_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let written = sink(dir.path(), ExportFormat::Json).write(&sample()).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(doc["completion"], "cap_reached");
        assert_eq!(doc["stores"].as_array().unwrap().len(), 2);
        assert_eq!(doc["stores"][0]["domain"], "mugs.example");
        assert_eq!(doc["stores"][0]["social"]["instagram"], "https://instagram.com/mugs");
    }

    #[test]
    fn both_formats_and_empty_sets_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let empty = ResultSet::new(
            Vec::new(),
            10,
            Completion::Exhausted(DiscoveryExhausted {
                reason: ExhaustionReason::RetriesExhausted("blocked".into()),
                pages_fetched: 0,
                candidates_yielded: 0,
            }),
        );
        let written = sink(&dir.path().join("nested"), ExportFormat::Both)
            .write(&empty)
            .unwrap();
        assert_eq!(written.len(), 2);
        let csv_text = fs::read_to_string(&written[0]).unwrap();
        assert_eq!(csv_text.trim_start_matches('\u{feff}').lines().count(), 1);
    }

    #[test]
    fn unwritable_target_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("taken");
        fs::write(&blocker, "file, not a directory").unwrap();
        let err = sink(&blocker, ExportFormat::Csv).write(&sample()).unwrap_err();
        assert!(matches!(err, ScoutError::Export(_)));
    }
}
