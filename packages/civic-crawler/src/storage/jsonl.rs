//! JSONL sink: one append-only file per record kind under the data dir.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::records::StorageRecord;
use crate::storage::StorageSink;

/// Writes each record as one JSON line to `<data_dir>/<kind>.jsonl`.
/// Lines carry the record identity so a loader can apply last-write-wins
/// dedup; this sink itself appends blindly (at-least-once).
pub struct JsonlSink {
    data_dir: PathBuf,
    files: Mutex<std::collections::HashMap<&'static str, File>>,
}

impl JsonlSink {
    pub fn new(data_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            files: Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn append(&self, kind: &'static str, line: &str) -> std::io::Result<()> {
        let mut files = self.files.lock().expect("jsonl sink poisoned");
        if !files.contains_key(kind) {
            let path = self.data_dir.join(format!("{}.jsonl", kind));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            files.insert(kind, file);
        }
        let file = files.get_mut(kind).expect("just inserted");
        writeln!(file, "{}", line)
    }
}

#[async_trait]
impl StorageSink for JsonlSink {
    async fn write(&self, record: StorageRecord) -> Result<(), StorageError> {
        let kind = record.kind();
        let line = serde_json::json!({
            "identity": record.identity(),
            "record": record,
        });
        self.append(kind, &line.to_string())
            .map_err(|e| StorageError::Write(Box::new(e)))
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Category, PageRecord};
    use chrono::Utc;

    #[tokio::test]
    async fn writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path()).unwrap();

        for i in 0..3 {
            let record = StorageRecord::Page(PageRecord {
                url: format!("https://www.bolton.gov.uk/p{}", i),
                parent_url: None,
                title: Some("Page".into()),
                description: None,
                category: Category::Services,
                content_length: 10,
                quality_score: 55,
                crawled_at: Utc::now(),
            });
            sink.write(record).await.unwrap();
        }

        let raw = std::fs::read_to_string(dir.path().join("page.jsonl")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert!(parsed["identity"].as_str().unwrap().starts_with("page:"));
        assert_eq!(parsed["record"]["kind"], "page");
    }
}
