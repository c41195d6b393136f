use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use types::OutputStatus;

/// JSON file holding the last applied state of every output.
///
/// Restoring it at boot keeps the hysteresis state across restarts, so an
/// output sitting inside its dead band is not toggled again.
#[derive(Debug)]
pub struct OutputStateStore {
    path: PathBuf,
    saved: Option<OutputStatus>,
}

impl OutputStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            saved: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&mut self) -> Result<Option<OutputStatus>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read state file {}", self.path.display()))
            }
        };
        let status: OutputStatus = serde_json::from_str(&content)
            .with_context(|| format!("parse state file {}", self.path.display()))?;
        self.saved = Some(status);
        Ok(Some(status))
    }

    /// Write `status` unless it matches what is already on disk. Returns whether a write happened.
    pub fn save(&mut self, status: &OutputStatus) -> Result<bool> {
        if self.saved.as_ref() == Some(status) {
            return Ok(false);
        }

        let payload = serde_json::to_string_pretty(status).context("serialize output state")?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, payload).with_context(|| format!("write state file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace state file {}", self.path.display()))?;

        debug!(path = %self.path.display(), "output state saved");
        self.saved = Some(*status);
        Ok(true)
    }
}
