//! Durable notification backlog: one JSON record per line.
//!
//! Producers append records; this subsystem reads them with multi-encoding
//! recovery, marks them spoken via a full-file rewrite, and never resets a
//! spoken record back to unspoken. A malformed line never aborts reading the
//! rest of the file: it is dropped and counted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SpeechError};

/// A single pending (or already spoken) notification.
///
/// `timestamp` is opaque to this subsystem: producers may write numbers or
/// strings, and identity comparison is plain JSON equality. Unknown fields on
/// a record line survive rewrites via the flattened map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub timestamp: Value,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub spoken: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl NotificationRecord {
    pub fn new(timestamp: Value, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            source: None,
            priority: None,
            spoken: false,
            extra: serde_json::Map::new(),
        }
    }

    /// Identity key: (timestamp, message).
    fn same_identity(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.message == other.message
    }
}

pub struct NotificationStore {
    path: PathBuf,
    dropped: AtomicU64,
}

impl NotificationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Running count of lines dropped because they failed to parse.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// All parsed records in file order. A missing file is an empty backlog.
    fn read_all(&self) -> Result<Vec<NotificationRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(&self.path)?;
        let content = decode_store_bytes(&bytes).ok_or(SpeechError::StoreDecode)?;

        let mut records = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<NotificationRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropping malformed store line: {e}");
                }
            }
        }

        Ok(records)
    }

    /// Every record whose `spoken` flag is still false, in file order.
    pub fn poll_unspoken(&self) -> Result<Vec<NotificationRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| !r.spoken)
            .collect())
    }

    /// Set `spoken = true` on every stored record matching the given record's
    /// (timestamp, message) identity, rewriting the whole file UTF-8 encoded.
    /// Idempotent: a second call for the same record changes nothing.
    pub fn mark_spoken(&self, record: &NotificationRecord) -> Result<()> {
        let mut records = self.read_all()?;

        for stored in &mut records {
            if stored.same_identity(record) {
                stored.spoken = true;
            }
        }

        self.write_all(&records)
    }

    fn write_all(&self, records: &[NotificationRecord]) -> Result<()> {
        let mut out = String::new();
        for record in records {
            match serde_json::to_string(record) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Err(e) => warn!("Failed to serialize store record: {e}"),
            }
        }
        fs::write(&self.path, out)?;
        Ok(())
    }

    /// Append one record as a UTF-8 JSON line (producer side).
    pub fn append(&self, record: &NotificationRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| SpeechError::SynthesisFailed(format!("unserializable record: {e}")))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Move the store aside to `<store>.backup` (overwriting any prior
    /// backup) and recreate an empty store. Unspoken history is gone, but
    /// exactly one prior snapshot survives.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            let backup = backup_path(&self.path);
            if backup.exists() {
                fs::remove_file(&backup)?;
            }
            fs::rename(&self.path, &backup)?;
        }
        fs::File::create(&self.path)?;
        Ok(())
    }

    /// The last successfully parsed record, regardless of spoken state.
    pub fn last(&self) -> Result<Option<NotificationRecord>> {
        Ok(self.read_all()?.into_iter().last())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    path.with_file_name(name)
}

/// Decode store bytes trying UTF-8, UTF-16 (BOM), UTF-16 LE, UTF-16 BE, then
/// Latin-1. Returns `None` only if no candidate matched.
///
/// A candidate only wins if the result is plausible store text: ASCII-heavy
/// UTF-16 is byte-wise valid UTF-8 (NUL high bytes), and byte-swapped UTF-16
/// decodes "successfully" into CJK garbage, so "decoded without error" alone
/// would pick the wrong encoding for three of the five supported formats.
fn decode_store_bytes(bytes: &[u8]) -> Option<String> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        if looks_like_store_text(s) {
            return Some(s.to_string());
        }
    }

    // BOM-tagged UTF-16
    match bytes {
        [0xFF, 0xFE, rest @ ..] => {
            if let Some(s) = decode_utf16(rest, true).filter(|s| looks_like_store_text(s)) {
                return Some(s);
            }
        }
        [0xFE, 0xFF, rest @ ..] => {
            if let Some(s) = decode_utf16(rest, false).filter(|s| looks_like_store_text(s)) {
                return Some(s);
            }
        }
        _ => {}
    }

    if let Some(s) = decode_utf16(bytes, true).filter(|s| looks_like_store_text(s)) {
        return Some(s);
    }
    if let Some(s) = decode_utf16(bytes, false).filter(|s| looks_like_store_text(s)) {
        return Some(s);
    }

    // Latin-1: every byte maps to the code point of the same value.
    Some(bytes.iter().map(|&b| b as char).collect())
}

/// The store is JSONL: no NULs, and any non-blank content carries at least
/// one object opener.
fn looks_like_store_text(s: &str) -> bool {
    !s.contains('\0') && (s.trim().is_empty() || s.contains('{'))
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}
