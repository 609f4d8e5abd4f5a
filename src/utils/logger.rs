// src/utils/logger.rs
//! Lifecycle transcript logger.
//! Enable by setting environment variable STREAMCALL_TRANSCRIPT_LOGGER=true
//!
//! Each logger writes one file under `log/` holding the raw snapshots a block
//! received and every lifecycle event it produced.

use crate::core::LifecycleEvent;
use crate::tools::Invocation;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const TRANSCRIPT_ENV: &str = "STREAMCALL_TRANSCRIPT_LOGGER";

/// Check if transcript logging is enabled via environment variable
pub fn is_logging_enabled() -> bool {
    std::env::var(TRANSCRIPT_ENV)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

pub struct TranscriptLogger {
    file_path: PathBuf,
}

impl TranscriptLogger {
    /// Create a logger in `log/`. Returns None if logging is disabled.
    pub fn new() -> Option<Arc<Self>> {
        if !is_logging_enabled() {
            return None;
        }
        Self::in_dir("log")
    }

    /// Create a logger writing into `dir`, regardless of the environment.
    pub fn in_dir(dir: impl AsRef<Path>) -> Option<Arc<Self>> {
        let log_dir = dir.as_ref();
        if !log_dir.exists() {
            if let Err(e) = fs::create_dir_all(log_dir) {
                crate::log_warn!("Cannot create transcript dir {}: {}", log_dir.display(), e);
                return None;
            }
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let file_path = log_dir.join(format!(
            "transcript_{}_{:03}_{}.log",
            now.as_secs(),
            now.subsec_millis(),
            std::process::id()
        ));
        crate::log_info!("Transcript logging enabled, writing to: {}", file_path.display());
        Some(Arc::new(Self { file_path }))
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn write(&self, content: &str) {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
        {
            let _ = file.write_all(content.as_bytes());
        }
    }

    pub fn log_snapshot(&self, source_id: &str, snapshot: &str) {
        self.write(&format!("\n=== SNAPSHOT {} ({} bytes) ===\n{}\n", source_id, snapshot.len(), snapshot));
    }

    pub fn log_event(&self, event: &LifecycleEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            self.write(&format!("=== EVENT === {}\n", json));
        }
    }

    pub fn log_invocation(&self, label: &str, invocation: &Invocation) {
        if let Ok(json) = serde_json::to_string_pretty(invocation) {
            self.write(&format!("\n=== {} INVOCATION ===\n{}\n", label.to_uppercase(), json));
        }
    }

    pub fn log_error(&self, error: &str) {
        self.write(&format!("\n=== ERROR ===\n{}\n", error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_transcript_written_to_dir() {
        let dir = std::env::temp_dir().join(format!("streamcall-transcript-{}", std::process::id()));
        let logger = TranscriptLogger::in_dir(&dir).unwrap();
        logger.log_snapshot("msg-1", "<function_calls>");
        logger.log_invocation("completed", &Invocation::new("search", "c1", Map::new()));
        logger.log_error("boom");

        let text = fs::read_to_string(logger.path()).unwrap();
        assert!(text.contains("=== SNAPSHOT msg-1 (16 bytes) ==="));
        assert!(text.contains("=== COMPLETED INVOCATION ==="));
        assert!(text.contains("\"function_name\": \"search\""));
        assert!(text.contains("boom"));
        let _ = fs::remove_dir_all(&dir);
    }
}
