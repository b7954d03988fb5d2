use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::commands::{END_SCRIPT, LOAD_SCRIPT};
use super::connection::InstrumentConnection;
use crate::error::SmuError;

/// Progress of a single upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Loading,
    Loaded,
}

/// Transient record of one script upload
#[derive(Debug, Clone)]
pub struct ScriptUploadSession {
    pub name: String,
    pub lines: Vec<String>,
    pub state: UploadState,
    /// Lines whose write failed and was skipped
    pub failed_writes: usize,
}

impl ScriptUploadSession {
    fn new(name: &str, lines: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            lines,
            state: UploadState::Idle,
            failed_writes: 0,
        }
    }
}

/// Uploads TSP files from a configured directory as the anonymous script
#[derive(Debug, Clone)]
pub struct ScriptLoader {
    script_dir: PathBuf,
}

impl ScriptLoader {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
        }
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    pub fn resolve(&self, script: &str) -> PathBuf {
        self.script_dir.join(script)
    }

    /// Send `loadscript`, every line of `script` verbatim, then `endscript`
    ///
    /// The file is read completely before anything is written, so a missing
    /// script leaves the instrument untouched. A write that fails transiently
    /// is logged and skipped; the upload only aborts when the session is gone.
    pub fn upload(
        &self,
        connection: &mut InstrumentConnection,
        script: &str,
    ) -> Result<ScriptUploadSession, SmuError> {
        let path = self.resolve(script);
        let source = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                warn!(
                    "Could not find TSP script, check path: {}",
                    self.script_dir.display()
                );
                SmuError::ScriptNotFound(path.clone())
            }
            _ => SmuError::Io {
                source: e,
                context: format!("reading {}", path.display()),
            },
        })?;

        let lines = source.lines().map(str::to_string).collect();
        let mut session = ScriptUploadSession::new(script, lines);

        if !connection.is_open() {
            return Err(SmuError::NotConnected(format!(
                "cannot upload {script}: no connection established"
            )));
        }

        session.state = UploadState::Loading;
        Self::send(connection, &mut session.failed_writes, LOAD_SCRIPT)?;
        for line in &session.lines {
            Self::send(connection, &mut session.failed_writes, line)?;
        }
        Self::send(connection, &mut session.failed_writes, END_SCRIPT)?;
        session.state = UploadState::Loaded;

        if session.failed_writes > 0 {
            warn!(
                "Uploaded TSP script {script} with {} failed line write(s)",
                session.failed_writes
            );
        } else {
            info!("Uploaded TSP script: {script} ({} lines)", session.lines.len());
        }
        Ok(session)
    }

    fn send(
        connection: &mut InstrumentConnection,
        failed_writes: &mut usize,
        line: &str,
    ) -> Result<(), SmuError> {
        match connection.write(line) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal_for_session() => Err(e),
            Err(e) => {
                *failed_writes += 1;
                warn!("Write failed during upload, continuing: {e}");
                Ok(())
            }
        }
    }
}
