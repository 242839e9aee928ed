//! Ledger file persistence.
//!
//! Reads and writes the JSON ledger with diff-friendly, deterministic
//! output. A write only touches the filesystem when the encoded bytes
//! actually differ from what is on disk; in that case the previous contents
//! are first copied to a `.bak` sibling so a corrupting write can always be
//! recovered by hand.

use crate::error::{SyncError, SyncResult};
use crate::validate::validate_names;
use idledger_model::{Ledger, MODEL_VERSION, MODEL_VERSION_PARSER_MINIMUM};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Handle to the ledger file on disk.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the backup sibling (`<ledger>.bak`).
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Loads the ledger, falling back to a fresh empty one when the file is
    /// missing or unparseable. A parseable file from an incompatible
    /// generator version is a hard error, not a fallback.
    pub fn load(&self) -> SyncResult<Ledger> {
        let Ok(bytes) = fs::read(&self.path) else {
            info!(path = %self.path.display(), "no ledger file yet, starting fresh");
            return Ok(Ledger::default());
        };
        let ledger: Ledger = match serde_json::from_slice(&bytes) {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "ledger file unparseable, treating as fresh");
                return Ok(Ledger::default());
            }
        };
        check_compatibility(&ledger)?;
        Ok(ledger)
    }

    /// Validates and writes the ledger. Returns `false` when the encoded
    /// bytes match the file exactly and nothing was written (no backup is
    /// created in that case).
    pub fn save(&self, ledger: &Ledger) -> SyncResult<bool> {
        validate_names(ledger)?;
        let encoded = encode(ledger)?;

        match fs::read(&self.path) {
            Ok(previous) if previous == encoded.as_bytes() => {
                info!(path = %self.path.display(), "ledger file unchanged");
                return Ok(false);
            }
            Ok(previous) => {
                let backup = self.backup_path();
                info!(path = %self.path.display(), backup = %backup.display(), "ledger file changed, creating backup");
                fs::write(&backup, previous)?;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "creating ledger file");
            }
            // An existing file we cannot read must not be overwritten
            // without its backup.
            Err(err) => return Err(err.into()),
        }

        fs::write(&self.path, encoded)?;
        Ok(true)
    }
}

/// Encodes the ledger deterministically: fixed key order (struct declaration
/// order), two-space indentation, optional fields omitted, trailing newline.
pub fn encode(ledger: &Ledger) -> SyncResult<String> {
    let mut out = serde_json::to_string_pretty(ledger)?;
    out.push('\n');
    Ok(out)
}

/// Closed compatibility set: this engine reads format version
/// [`MODEL_VERSION_PARSER_MINIMUM`]..=[`MODEL_VERSION`] and nothing else.
fn check_compatibility(ledger: &Ledger) -> SyncResult<()> {
    if ledger.model_version < MODEL_VERSION_PARSER_MINIMUM {
        return Err(SyncError::IncompatibleVersion {
            found: ledger.model_version,
            expected: MODEL_VERSION_PARSER_MINIMUM,
        });
    }
    if ledger.model_version_parser_minimum > MODEL_VERSION {
        return Err(SyncError::IncompatibleVersion {
            found: ledger.model_version_parser_minimum,
            expected: MODEL_VERSION,
        });
    }
    Ok(())
}
