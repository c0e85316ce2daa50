use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only history of generations and edits, one JSON object per line.
///
/// Every record carries `event`, `session` and `ts`; the caller payload is
/// merged afterwards. Clones share one file lock so batch workers can record
/// concurrently.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    session: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                session: session.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn record(&self, event: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut row = Map::new();
        row.insert("event".to_string(), Value::String(event.to_string()));
        row.insert(
            "session".to_string(),
            Value::String(self.inner.session.clone()),
        );
        row.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        row.extend(payload);

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&row)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{line}")?;

        Ok(Value::Object(row))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn record_appends_one_line_per_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("outputs").join("events.jsonl");
        let log = EventLog::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("path".to_string(), json!("outputs/generated_a.png"));
        let first = log.record("artifact_created", payload)?;
        log.record("request_failed", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: Value = serde_json::from_str(lines[0])?;
        assert_eq!(parsed, first);
        assert_eq!(parsed["event"], json!("artifact_created"));
        assert_eq!(parsed["session"], json!("session-1"));
        assert_eq!(parsed["path"], json!("outputs/generated_a.png"));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;

        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(second["event"], json!("request_failed"));
        Ok(())
    }

    #[test]
    fn payload_wins_over_default_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventLog::new(temp.path().join("events.jsonl"), "session-1");

        let mut payload = EventPayload::new();
        payload.insert("session".to_string(), json!("batch-7"));
        let row = log.record("artifact_created", payload)?;

        assert_eq!(row["session"], json!("batch-7"));
        assert_eq!(row["event"], json!("artifact_created"));
        Ok(())
    }
}
