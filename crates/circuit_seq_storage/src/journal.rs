#![forbid(unsafe_code)]

//! Append-only JSONL journal backing [`crate::store::CircuitSeqStore`].
//!
//! One line per committed write. The journal is the durable state; the
//! in-memory tables are rebuilt from it on open.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use circuit_seq_contracts::sample::{ReferenceAttachment, SampleKey, SampleRecord};
use circuit_seq_contracts::settings::PlateSettings;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::store::StorageError;

pub const JOURNAL_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreEvent {
    SampleInserted(SampleRecord),
    ReferenceAttached {
        primary_key: SampleKey,
        attachment: ReferenceAttachment,
    },
    SettingsApplied(PlateSettings),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    schema_version: u32,
    event: StoreEvent,
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    // Set when a failed append could not be rolled back; no further appends.
    poisoned: AtomicBool,
}

impl Journal {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| journal_error(path, "create directory", err))?;
        }
        if !path.exists() {
            File::create(path).map_err(|err| journal_error(path, "create", err))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All events with their 1-based line numbers. Blank lines are skipped.
    ///
    /// An unterminated final line that does not decode is the tail of an
    /// interrupted append and is truncated away; one that does decode gets
    /// its newline. Any other bad line fails the read.
    pub fn read_events(&self) -> Result<Vec<(usize, StoreEvent)>, StorageError> {
        let bytes = fs::read(&self.path).map_err(|err| journal_error(&self.path, "read", err))?;
        let mut events = Vec::new();
        let mut offset = 0usize;
        for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
            let line_no = idx + 1;
            let line_start = offset;
            offset += line.len() + 1;
            let terminated = offset <= bytes.len();
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let entry = match decode_line(line) {
                Ok(entry) => entry,
                Err(reason) if !terminated => {
                    warn!(
                        path = %self.path.display(),
                        line_no,
                        torn_bytes = line.len(),
                        reason = %reason,
                        "truncating torn journal tail"
                    );
                    self.truncate_to(line_start as u64)?;
                    break;
                }
                Err(reason) => {
                    return Err(StorageError::Journal {
                        path: self.path.clone(),
                        reason: format!("parse failed at line {line_no}: {reason}"),
                    })
                }
            };
            if entry.schema_version != JOURNAL_SCHEMA_VERSION {
                return Err(StorageError::Journal {
                    path: self.path.clone(),
                    reason: format!(
                        "unsupported schema_version={} at line {line_no}",
                        entry.schema_version
                    ),
                });
            }
            if !terminated {
                self.terminate_tail()?;
            }
            events.push((line_no, entry.event));
        }
        Ok(events)
    }

    /// Appends one event and syncs it. On failure the file is cut back to
    /// its previous length so no partial or unapplied line survives.
    pub fn append(&self, event: &StoreEvent) -> Result<(), StorageError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(StorageError::Journal {
                path: self.path.clone(),
                reason: "journal poisoned by an earlier failed append".to_string(),
            });
        }
        let entry = JournalEntry {
            schema_version: JOURNAL_SCHEMA_VERSION,
            event: event.clone(),
        };
        let mut line = serde_json::to_string(&entry).map_err(|err| StorageError::Journal {
            path: self.path.clone(),
            reason: format!("encode failed: {err}"),
        })?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|err| journal_error(&self.path, "open for append", err))?;
        let committed_len = file
            .metadata()
            .map_err(|err| journal_error(&self.path, "stat", err))?
            .len();
        let written = file
            .write_all(line.as_bytes())
            .and_then(|_| file.sync_data());
        match written {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "journal append failed");
                if let Err(rollback) = file.set_len(committed_len).and_then(|_| file.sync_data())
                {
                    self.poisoned.store(true, Ordering::Release);
                    error!(
                        path = %self.path.display(),
                        committed_len,
                        error = %rollback,
                        "journal rollback failed, refusing further appends"
                    );
                }
                Err(journal_error(&self.path, "append", err))
            }
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    // A complete final line missing its newline; later appends must not run into it.
    fn terminate_tail(&self) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|err| journal_error(&self.path, "open for repair", err))?;
        file.write_all(b"\n")
            .and_then(|_| file.sync_data())
            .map_err(|err| journal_error(&self.path, "terminate tail", err))
    }

    fn truncate_to(&self, len: u64) -> Result<(), StorageError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|err| journal_error(&self.path, "open for truncate", err))?;
        file.set_len(len)
            .and_then(|_| file.sync_data())
            .map_err(|err| journal_error(&self.path, "truncate", err))
    }
}

fn decode_line(line: &[u8]) -> Result<JournalEntry, String> {
    let text = std::str::from_utf8(line).map_err(|err| err.to_string())?;
    serde_json::from_str(text).map_err(|err| err.to_string())
}

fn journal_error(path: &Path, op: &str, err: std::io::Error) -> StorageError {
    StorageError::Journal {
        path: path.to_path_buf(),
        reason: format!("{op} failed: {err}"),
    }
}
