use crate::keys::fingerprint;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL record of what one run did. Key values never reach the
/// file; only their fingerprints do.
pub struct Journal {
    pub path: PathBuf,
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Entry<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    entry_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Journal {
    /// Open `<dir>/<run_id>.jsonl`, creating the directory when needed.
    pub fn open(dir: &Path, run_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create journal directory {}", dir.display()))?;
        let path = dir.join(format!("{}.jsonl", run_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal {}", path.display()))?;

        Ok(Self {
            path,
            run_id: run_id.to_string(),
            file,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log(&mut self, entry_type: &str, data: serde_json::Value) -> Result<()> {
        let entry = Entry {
            ts: Utc::now(),
            run_id: &self.run_id,
            entry_type,
            data,
        };
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn command(&mut self, line: &str) -> Result<()> {
        self.log("command", serde_json::json!({ "line": line }))
    }

    pub fn session_issued(&mut self, subject: &str, via: &str) -> Result<()> {
        self.log(
            "session_issued",
            serde_json::json!({ "subject": subject, "via": via }),
        )
    }

    pub fn session_denied(&mut self, via: &str) -> Result<()> {
        self.log("session_denied", serde_json::json!({ "via": via }))
    }

    pub fn logout(&mut self) -> Result<()> {
        self.log("logout", serde_json::json!({}))
    }

    /// Key lifecycle event. `value` is reduced to a fingerprint here.
    pub fn key_event(
        &mut self,
        action: &str,
        key_id: &str,
        value: &str,
        backend: &str,
    ) -> Result<()> {
        self.log(
            "key",
            serde_json::json!({
                "action": action,
                "key_id": key_id,
                "fingerprint": fingerprint(value),
                "backend": backend,
            }),
        )
    }

    pub fn catalog_change(&mut self, action: &str, target: &str, ok: bool) -> Result<()> {
        self.log(
            "catalog",
            serde_json::json!({ "action": action, "target": target, "ok": ok }),
        )
    }

    pub fn account_deleted(&mut self, user_id: &str) -> Result<()> {
        self.log("account_deleted", serde_json::json!({ "user_id": user_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_entries_are_jsonl_with_run_id() {
        let dir = tempdir().unwrap();
        let mut journal = Journal::open(&dir.path().join("journal"), "run-1").unwrap();
        journal.command("movies list --page 2").unwrap();
        journal.session_issued("admin", "credential").unwrap();

        let entries = lines(&journal.path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["type"], "command");
        assert_eq!(entries[0]["run_id"], "run-1");
        assert_eq!(entries[0]["line"], "movies list --page 2");
        assert_eq!(entries[1]["subject"], "admin");
        assert!(entries[1]["ts"].is_string());
        assert!(journal.path.ends_with("journal/run-1.jsonl"));
    }

    #[test]
    fn test_key_values_never_written() {
        let dir = tempdir().unwrap();
        let mut journal = Journal::open(dir.path(), "run-2").unwrap();
        let secret = "mk_live_0123456789abcdefghijklmnop";
        journal.key_event("create", "local_1", secret, "failed").unwrap();

        let raw = std::fs::read_to_string(&journal.path).unwrap();
        assert!(!raw.contains(secret));
        assert!(raw.contains(&fingerprint(secret)));
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempdir().unwrap();
        Journal::open(dir.path(), "run-3").unwrap().logout().unwrap();
        let mut journal = Journal::open(dir.path(), "run-3").unwrap();
        journal.logout().unwrap();
        assert_eq!(lines(&journal.path).len(), 2);
    }
}
