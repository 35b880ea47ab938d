//! File-backed transcript persistence.
//!
//! A transcript is the JSON form of a [`Ledger`]:
//!
//! ```json
//! { "max_turns": 4, "messages": [ { "role": "system", "ordinal": 0, "content": "…", "timestamp": "…" } ] }
//! ```
//!
//! Loading re-validates the ledger invariants, so a hand-edited file that
//! breaks them is reported as
//! [`LedgerError::CorruptTranscript`](turnledger_core::LedgerError::CorruptTranscript) instead of
//! producing a ledger. Saves go through a temporary file and a rename, so a
//! crash mid-write leaves the previous transcript intact.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use turnledger_config::LedgerConfig;
use turnledger_core::error::Result;
use turnledger_core::ledger::{Ledger, LedgerState};
use turnledger_core::message::SessionId;

/// Reads and writes one transcript file.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    path: PathBuf,
}

impl TranscriptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The transcript file for `id` inside `dir`.
    pub fn for_session(dir: &Path, id: &SessionId) -> Self {
        Self::new(dir.join(format!("{id}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored ledger. Returns `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<Ledger>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: LedgerState = serde_json::from_str(&content)?;
        let ledger = Ledger::try_from(state)?;
        debug!(path = %self.path.display(), messages = ledger.len(), "Loaded transcript");
        Ok(Some(ledger))
    }

    /// Load the stored ledger re-bounded to `config.max_turns`, or build a
    /// fresh one from `config` when nothing is stored.
    ///
    /// A stored system message is kept as is, even if `config` names a
    /// different one.
    pub fn load_or_new(&self, config: &LedgerConfig) -> Result<Ledger> {
        match self.load()? {
            Some(ledger) if ledger.max_turns() == config.max_turns => Ok(ledger),
            Some(ledger) => {
                info!(
                    stored = ledger.max_turns(),
                    configured = config.max_turns,
                    "Re-bounding stored transcript to configured window"
                );
                Ok(Ledger::from_messages(ledger.snapshot().to_vec(), config.max_turns)?)
            }
            None => Ok(config.build()?),
        }
    }

    /// Write `ledger` to disk, creating parent directories as needed.
    pub fn save(&self, ledger: &Ledger) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(ledger)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), messages = ledger.len(), "Saved transcript");
        Ok(())
    }

    /// Delete the transcript file. Missing files are not an error.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
