use crate::error::Result;
use crate::models::{PaymentPayload, SubmissionRecord};
use crate::util::format_timestamp;

use chrono::NaiveDateTime;
use serde_json::Value;
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

pub const DEFAULT_STORE_PATH: &str = "successful_payloads.json";

/// Append-only log of accepted payloads, kept as one JSON array on disk.
#[derive(Debug, Clone)]
pub struct SubmissionStore {
    path: PathBuf,
}

impl SubmissionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records the typed model can read. Entries it cannot read are skipped here but stay on disk.
    pub fn load(&self) -> Result<Vec<SubmissionRecord>> {
        let entries = self.load_entries()?;
        let total = entries.len();
        let records: Vec<SubmissionRecord> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| match serde_json::from_value(entry) {
                Ok(record) => Some(record),
                Err(err) => {
                    log::warn!(
                        "Skipping unreadable record {} in {}: {}",
                        index,
                        self.path.display(),
                        err
                    );
                    None
                }
            })
            .collect();
        if records.len() < total {
            log::warn!(
                "Loaded {} of {} records from {}",
                records.len(),
                total,
                self.path.display()
            );
        }
        Ok(records)
    }

    // Missing or invalid JSON yields an empty log; the next append starts a fresh array.
    fn load_entries(&self) -> Result<Vec<Value>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(Value::Array(entries)) => Ok(entries),
            Ok(_) => {
                log::warn!(
                    "Ignoring submission store {}: top level is not an array",
                    self.path.display()
                );
                Ok(Vec::new())
            }
            Err(err) => {
                log::warn!(
                    "Ignoring malformed submission store {}: {}",
                    self.path.display(),
                    err
                );
                Ok(Vec::new())
            }
        }
    }

    pub fn append(&self, payload: &PaymentPayload, submitted_at: &NaiveDateTime) -> Result<()> {
        let mut entries = self.load_entries()?;
        entries.push(serde_json::to_value(SubmissionRecord {
            timestamp: format_timestamp(submitted_at),
            payload: payload.clone(),
        })?);
        self.write_all(&entries)?;
        log::debug!(
            "Stored {} ({} records in {})",
            payload.transaction_id,
            entries.len(),
            self.path.display()
        );
        Ok(())
    }

    fn write_all(&self, entries: &[Value]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), entries)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &str) -> PaymentPayload {
        PaymentPayload {
            transaction_id: id.to_string(),
            iban_debit: "KZ92886A220120705719".to_string(),
            amount: 1200.5,
            kbk: None,
            knp: "911".to_string(),
            purpose: Some("Purpose 911_1234".to_string()),
            taxes_payment_operation_type: None,
            period: Some("2025-01-31".to_string()),
            quarter: None,
            year: None,
            bin: None,
            ugd: None,
        }
    }

    fn ts() -> NaiveDateTime {
        "2025-04-03T19:38:21.798734".parse().unwrap()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubmissionStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn malformed_file_loads_empty_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = SubmissionStore::new(&path);
        assert!(store.load().unwrap().is_empty());

        store.append(&payload("T1"), &ts()).unwrap();
        let records = store.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload.transaction_id, "T1");
    }

    #[test]
    fn unreadable_records_survive_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let old = serde_json::to_value(SubmissionRecord {
            timestamp: "2025-04-01T10:00:00.5".to_string(),
            payload: payload("OLD1"),
        })
        .unwrap();
        let mut legacy = serde_json::to_value(SubmissionRecord {
            timestamp: "2025-04-02T10:00:00".to_string(),
            payload: payload("OLD2"),
        })
        .unwrap();
        legacy["payload"]["amount"] = serde_json::json!("2.00");
        std::fs::write(&path, serde_json::to_string(&vec![old, legacy]).unwrap()).unwrap();

        let store = SubmissionStore::new(&path);
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].payload.transaction_id, "OLD1");

        store.append(&payload("NEW"), &ts()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let ids: Vec<&str> = raw
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["payload"]["transactionId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["OLD1", "OLD2", "NEW"]);
        assert_eq!(raw[0]["timestamp"], "2025-04-01T10:00:00.5");
        assert_eq!(raw[1]["payload"]["amount"], "2.00");
    }

    #[test]
    fn append_preserves_order_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubmissionStore::new(dir.path().join("nested/store.json"));
        store.append(&payload("T1"), &ts()).unwrap();
        store.append(&payload("T2"), &ts()).unwrap();

        let records = store.load().unwrap();
        let ids: Vec<&str> = records
            .iter()
            .map(|record| record.payload.transaction_id.as_str())
            .collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert_eq!(records[0].timestamp, "2025-04-03T19:38:21.798734");
        assert_eq!(records[1].submitted_at().unwrap(), ts());
    }

    #[test]
    fn stored_json_is_an_array_of_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubmissionStore::new(dir.path().join("store.json"));
        store.append(&payload("T1"), &ts()).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["payload"]["transactionId"], "T1");
        assert_eq!(value[0]["payload"]["period"], "2025-01-31");
        assert!(value[0]["payload"].get("year").is_none());
    }
}
