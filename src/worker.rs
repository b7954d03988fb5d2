//! Background execution of a sweep job
//!
//! The worker thread is the only place that touches the connection while a
//! job runs. The controlling side keeps a [`SweepHandle`]: it can request
//! cancellation (which only sets the shared flag), drain snapshots on its own
//! schedule, and collect the terminal outcome.

use crossbeam_channel::{Receiver, unbounded};
use log::{info, warn};
use std::thread::{self, JoinHandle};

use crate::error::SmuError;
use crate::smu::InstrumentConnection;
use crate::sweep::{Orchestrator, SweepJob, SweepReport};
use crate::types::{CancellationFlag, Snapshot, SweepOutcome};

/// Closes the wrapped connection however the worker exits
struct ConnectionGuard(InstrumentConnection);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.0.is_open() {
            if let Err(e) = self.0.close() {
                warn!("Closing connection after sweep failed: {e}");
            }
        }
    }
}

pub struct SweepWorker;

impl SweepWorker {
    /// Move `connection` into a new thread and run `job` there
    ///
    /// Any sink already set on the job is replaced by the handle's snapshot
    /// channel.
    pub fn spawn(
        connection: InstrumentConnection,
        orchestrator: Orchestrator,
        job: SweepJob,
    ) -> Result<SweepHandle, SmuError> {
        let (sender, snapshots) = unbounded();
        let cancel = job.cancel.clone();
        let job = job.with_sink(sender);
        let label = format!("{}-{}", job.name, job.sample);

        let thread = thread::Builder::new()
            .name(format!("sweep-{label}"))
            .spawn(move || {
                let mut guard = ConnectionGuard(connection);
                info!("Worker started for {label}");
                let outcome = orchestrator.run_job(&job, &mut guard.0);
                info!("Worker finished for {label}");
                outcome
            })
            .map_err(|source| SmuError::Io {
                source,
                context: "spawning sweep worker".to_string(),
            })?;

        Ok(SweepHandle {
            thread: Some(thread),
            cancel,
            snapshots,
        })
    }
}

/// Controlling side of a running sweep
pub struct SweepHandle {
    thread: Option<JoinHandle<SweepOutcome<SweepReport>>>,
    cancel: CancellationFlag,
    snapshots: Receiver<Snapshot>,
}

impl SweepHandle {
    /// Ask the worker to stop at the next line boundary
    pub fn cancel(&self) {
        self.cancel.request();
    }

    pub fn cancel_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn snapshots(&self) -> &Receiver<Snapshot> {
        &self.snapshots
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the worker and return its terminal outcome
    pub fn join(mut self) -> SweepOutcome<SweepReport> {
        let Some(thread) = self.thread.take() else {
            return SweepOutcome::Failed(SmuError::Unknown("worker already joined".to_string()));
        };
        match thread.join() {
            Ok(outcome) => outcome,
            Err(_) => SweepOutcome::Failed(SmuError::Unknown("sweep worker panicked".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smu::{ScriptLoader, SimInstrument};
    use crate::storage::TableStore;
    use crate::sweep::SweepScripts;
    use std::fs;
    use std::time::Duration;

    fn setup() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        for name in ["transfer-charact.tsp", "transfer-charact-2.tsp"] {
            fs::write(dir.path().join(name), "smua.reset()\n").unwrap();
        }
        let orchestrator = Orchestrator::new(
            ScriptLoader::new(dir.path()),
            TableStore::new(dir.path().join("out")),
        );
        (dir, orchestrator)
    }

    fn open(sim: &SimInstrument) -> InstrumentConnection {
        InstrumentConnection::builder()
            .address("sim://worker")
            .poll_interval(Duration::from_millis(1))
            .simulator(sim.clone())
            .open()
            .unwrap()
    }

    #[test]
    fn test_worker_completes_and_streams_snapshots() {
        let (_dir, orchestrator) = setup();
        let sim = SimInstrument::new();
        sim.on_run(["@@1,0,0,1", "@@2,0,0,2", "EE"]);
        sim.on_run(["@@2,0,0,2", "EE"]);

        let job = SweepJob::transfer("s1", &SweepScripts::default());
        let handle = SweepWorker::spawn(open(&sim), orchestrator, job).unwrap();
        let snapshots = handle.snapshots().clone();

        let report = handle.join().completed().unwrap();
        assert_eq!(report.scans.len(), 2);
        assert_eq!(sim.open_sessions(), 0);

        let scans: Vec<(String, usize)> = snapshots
            .try_iter()
            .map(|s| (s.scan, s.table.len()))
            .collect();
        assert_eq!(
            scans,
            vec![
                ("neg-pos-transfer".to_string(), 1),
                ("neg-pos-transfer".to_string(), 2),
                ("pos-neg-transfer".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_cancel_from_controller_stops_stalled_scan() {
        let (_dir, orchestrator) = setup();
        let sim = SimInstrument::new();
        // never terminates: the worker stalls waiting for more lines
        sim.on_run(["@@1,0,0,1"]);

        let job = SweepJob::transfer("s1", &SweepScripts::default());
        let handle = SweepWorker::spawn(open(&sim), orchestrator, job).unwrap();

        let first = handle
            .snapshots()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(first.table.len(), 1);

        handle.cancel();
        assert!(handle.join().is_cancelled());
        assert_eq!(sim.open_sessions(), 0);

        let sent = sim.sent_lines();
        let aborts = sent.iter().filter(|l| l.as_str() == "reset()").count();
        assert_eq!(aborts, 1);
    }

    #[test]
    fn test_connection_released_after_failure() {
        let (dir, orchestrator) = setup();
        fs::remove_file(dir.path().join("transfer-charact.tsp")).unwrap();
        let sim = SimInstrument::new();

        let job = SweepJob::transfer("s1", &SweepScripts::default());
        let handle = SweepWorker::spawn(open(&sim), orchestrator, job).unwrap();

        assert!(matches!(
            handle.join(),
            SweepOutcome::Failed(SmuError::ScriptNotFound(_))
        ));
        assert_eq!(sim.open_sessions(), 0);
    }
}
