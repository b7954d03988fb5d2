use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SmuError;
use crate::sweep::SweepReport;
use crate::types::SweepOutcome;

/// Terminal state of a recorded run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// One line of the run history file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub sample: String,
    pub job: String,
    pub outcome: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Row count of each saved table, in scan order
    #[serde(default)]
    pub rows: Vec<usize>,
    pub elapsed_s: f64,
}

impl RunRecord {
    pub fn from_outcome(
        job: &str,
        sample: &str,
        outcome: &SweepOutcome<SweepReport>,
        elapsed: Duration,
    ) -> Self {
        let (status, failure, rows) = match outcome {
            SweepOutcome::Completed(report) => (
                RunStatus::Completed,
                None,
                report.scans.iter().map(|scan| scan.table.len()).collect(),
            ),
            SweepOutcome::Cancelled => (RunStatus::Cancelled, None, Vec::new()),
            SweepOutcome::Failed(e) => (RunStatus::Failed, Some(e.to_string()), Vec::new()),
        };

        Self {
            timestamp: Utc::now(),
            sample: sample.to_string(),
            job: job.to_string(),
            outcome: status,
            failure,
            rows,
            elapsed_s: elapsed.as_secs_f64(),
        }
    }
}

/// Append-only JSONL log of finished runs
///
/// A failed append is logged and tolerated until `max_failures` happen in a
/// row; only then does [`RunHistory::append`] return an error.
#[derive(Debug)]
pub struct RunHistory {
    path: PathBuf,
    failures: usize,
    max_failures: usize,
}

impl RunHistory {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let mut path = path.into();
        if path.extension().is_none_or(|ext| ext != "jsonl") {
            path.set_extension("jsonl");
        }
        Self {
            path,
            failures: 0,
            max_failures: 5,
        }
    }

    pub fn with_max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &RunRecord) -> Result<(), SmuError> {
        match self.write_line(record) {
            Ok(()) => {
                self.failures = 0;
                info!("Recorded {:?} run of {} in history", record.outcome, record.sample);
                Ok(())
            }
            Err(e) => {
                self.failures += 1;
                error!(
                    "History write failure {}/{}: {e}",
                    self.failures, self.max_failures
                );
                if self.failures >= self.max_failures {
                    return Err(SmuError::Io {
                        source: std::io::Error::other(e.to_string()),
                        context: format!(
                            "{} consecutive history write failures for {}",
                            self.failures,
                            self.path.display()
                        ),
                    });
                }
                warn!("Run not recorded, continuing");
                Ok(())
            }
        }
    }

    fn write_line(&self, record: &RunRecord) -> Result<(), SmuError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SmuError::Io {
                source,
                context: format!("creating {}", parent.display()),
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SmuError::Io {
                source,
                context: format!("opening {}", self.path.display()),
            })?;

        let mut writer = BufWriter::new(file);
        let line = serde_json::to_string(record)?;
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|source| SmuError::Io {
                source,
                context: format!("writing {}", self.path.display()),
            })
    }

    /// Every record in the file; blank lines are skipped
    pub fn load(&self) -> Result<Vec<RunRecord>, SmuError> {
        let content = fs::read_to_string(&self.path).map_err(|source| SmuError::Io {
            source,
            context: format!("reading {}", self.path.display()),
        })?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SmuError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: RunStatus) -> RunRecord {
        RunRecord {
            timestamp: Utc::now(),
            sample: "blank-20-1".to_string(),
            job: "transfer".to_string(),
            outcome: status,
            failure: None,
            rows: vec![21, 21],
            elapsed_s: 12.5,
        }
    }

    #[test]
    fn test_appends_jsonl_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = RunHistory::new(dir.path().join("logs").join("runs"));
        assert_eq!(history.path().extension().unwrap(), "jsonl");

        history.append(&record(RunStatus::Completed)).unwrap();
        history.append(&record(RunStatus::Cancelled)).unwrap();

        let loaded = history.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].outcome, RunStatus::Cancelled);

        let text = fs::read_to_string(history.path()).unwrap();
        assert!(text.lines().next().unwrap().contains("\"outcome\":\"completed\""));
    }

    #[test]
    fn test_failed_outcome_carries_message() {
        let outcome: SweepOutcome<SweepReport> =
            SweepOutcome::Failed(SmuError::Timeout(Duration::from_secs(3)));
        let record = RunRecord::from_outcome("output", "s", &outcome, Duration::from_secs(1));

        assert_eq!(record.outcome, RunStatus::Failed);
        assert!(record.failure.unwrap().contains("3s"));
        assert!(record.rows.is_empty());
    }

    #[test]
    fn test_tolerates_failures_until_limit() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be makes every open fail
        let blocked = dir.path().join("history.jsonl");
        fs::create_dir(&blocked).unwrap();

        let mut history = RunHistory::new(&blocked).with_max_failures(3);
        assert!(history.append(&record(RunStatus::Completed)).is_ok());
        assert!(history.append(&record(RunStatus::Completed)).is_ok());
        assert!(history.append(&record(RunStatus::Completed)).is_err());
    }
}
