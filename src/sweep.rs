//! Sequencing of scripted sweeps for one sample

use crossbeam_channel::Sender;
use log::info;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::SmuError;
use crate::smu::{
    InstrumentConnection, ScriptLoader, SnapshotSink, StreamReader, abort, read_buffers,
    run_anonymous,
};
use crate::storage::TableStore;
use crate::types::{
    CancellationFlag, MeasurementTable, Readout, ScanDirection, Snapshot, SweepOutcome,
};

/// Script names used by the standard sweeps
#[derive(Debug, Clone)]
pub struct SweepScripts {
    pub transfer_forward: String,
    pub transfer_reverse: String,
    pub output: String,
}

impl Default for SweepScripts {
    fn default() -> Self {
        Self {
            transfer_forward: "transfer-charact.tsp".to_string(),
            transfer_reverse: "transfer-charact-2.tsp".to_string(),
            output: "output-charact.tsp".to_string(),
        }
    }
}

/// One script run and the file its table is saved to
#[derive(Debug, Clone, PartialEq)]
pub struct ScanStep {
    pub script: String,
    /// Filename suffix, e.g. `neg-pos-transfer`
    pub suffix: String,
    pub readout: Readout,
}

impl ScanStep {
    pub fn transfer(script: &str, direction: ScanDirection) -> Self {
        Self {
            script: script.to_string(),
            suffix: format!("{}-transfer", direction.label()),
            readout: Readout::RealTime,
        }
    }

    pub fn output(script: &str) -> Self {
        Self {
            script: script.to_string(),
            suffix: "output".to_string(),
            readout: Readout::Buffer,
        }
    }
}

/// A request to measure one sample
#[derive(Debug, Clone)]
pub struct SweepJob {
    pub name: String,
    pub sample: String,
    pub steps: Vec<ScanStep>,
    pub cancel: CancellationFlag,
    pub sink: Option<Sender<Snapshot>>,
}

impl SweepJob {
    pub fn new(name: &str, sample: &str, steps: Vec<ScanStep>) -> Self {
        Self {
            name: name.to_string(),
            sample: sample.to_string(),
            steps,
            cancel: CancellationFlag::new(),
            sink: None,
        }
    }

    /// Forward then reverse transfer scan
    pub fn transfer(sample: &str, scripts: &SweepScripts) -> Self {
        Self::new(
            "transfer",
            sample,
            vec![
                ScanStep::transfer(&scripts.transfer_forward, ScanDirection::Forward),
                ScanStep::transfer(&scripts.transfer_reverse, ScanDirection::Reverse),
            ],
        )
    }

    /// Output characteristic read back from the instrument buffers
    pub fn output(sample: &str, scripts: &SweepScripts) -> Self {
        Self::new("output", sample, vec![ScanStep::output(&scripts.output)])
    }

    pub fn with_cancel(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sink(mut self, sink: Sender<Snapshot>) -> Self {
        self.sink = Some(sink);
        self
    }
}

/// A captured and saved table
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub step: ScanStep,
    pub table: MeasurementTable,
    pub path: PathBuf,
}

/// Everything a completed job produced
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub job: String,
    pub sample: String,
    pub scans: Vec<ScanResult>,
    pub elapsed: Duration,
}

/// Forward and reverse tables of a transfer measurement
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub forward: MeasurementTable,
    pub reverse: MeasurementTable,
    pub elapsed: Duration,
}

/// Runs sweep jobs on an open connection
#[derive(Debug, Clone)]
pub struct Orchestrator {
    loader: ScriptLoader,
    store: TableStore,
    scripts: SweepScripts,
    idle_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(loader: ScriptLoader, store: TableStore) -> Self {
        Self {
            loader,
            store,
            scripts: SweepScripts::default(),
            idle_timeout: None,
        }
    }

    pub fn with_scripts(mut self, scripts: SweepScripts) -> Self {
        self.scripts = scripts;
        self
    }

    /// Fail a real-time scan when the instrument is silent for this long
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn scripts(&self) -> &SweepScripts {
        &self.scripts
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Run every step of `job` in order, saving each table as soon as it is complete
    pub fn run_job(
        &self,
        job: &SweepJob,
        connection: &mut InstrumentConnection,
    ) -> SweepOutcome<SweepReport> {
        let begin = Instant::now();
        let mut scans = Vec::with_capacity(job.steps.len());

        for step in &job.steps {
            match self.run_step(job, step, connection) {
                Ok(scan) => scans.push(scan),
                Err(SmuError::Cancelled) => {
                    info!("{} sweep of {} cancelled", job.name, job.sample);
                    return SweepOutcome::Cancelled;
                }
                Err(e) => return SweepOutcome::Failed(e),
            }
        }

        let elapsed = begin.elapsed();
        info!(
            "{} sweeps of {} complete. Elapsed time {:.2} mins.",
            job.name,
            job.sample,
            elapsed.as_secs_f64() / 60.0
        );

        SweepOutcome::Completed(SweepReport {
            job: job.name.clone(),
            sample: job.sample.clone(),
            scans,
            elapsed,
        })
    }

    fn run_step(
        &self,
        job: &SweepJob,
        step: &ScanStep,
        connection: &mut InstrumentConnection,
    ) -> Result<ScanResult, SmuError> {
        if job.cancel.is_requested() {
            info!("Cancellation requested before {}", step.script);
            let _ = abort(connection);
            return Err(SmuError::Cancelled);
        }

        self.loader.upload(connection, &step.script)?;
        run_anonymous(connection)?;

        let table = match step.readout {
            Readout::RealTime => {
                let mut reader =
                    StreamReader::new(&job.cancel).with_idle_timeout(self.idle_timeout);
                if let Some(sender) = &job.sink {
                    reader = reader.with_sink(SnapshotSink::new(sender.clone(), &step.suffix));
                }
                reader.read_table(connection)?
            }
            Readout::Buffer => {
                if job.cancel.is_requested() {
                    let _ = abort(connection);
                    return Err(SmuError::Cancelled);
                }
                read_buffers(connection)?
            }
        };

        let path = self.store.save(&job.sample, &step.suffix, &table)?;
        Ok(ScanResult {
            step: step.clone(),
            table,
            path,
        })
    }

    /// Forward scan, then reverse scan, each saved as `<sample>-<direction>-transfer.csv`
    pub fn run_transfer(
        &self,
        sample: &str,
        connection: &mut InstrumentConnection,
        cancel: &CancellationFlag,
        sink: Option<&Sender<Snapshot>>,
    ) -> SweepOutcome<TransferResult> {
        let mut job = SweepJob::transfer(sample, &self.scripts).with_cancel(cancel.clone());
        if let Some(sink) = sink {
            job = job.with_sink(sink.clone());
        }

        self.run_job(&job, connection).map(|report| {
            let mut tables = report.scans.into_iter().map(|scan| scan.table);
            TransferResult {
                forward: tables.next().unwrap_or_else(MeasurementTable::realtime),
                reverse: tables.next().unwrap_or_else(MeasurementTable::realtime),
                elapsed: report.elapsed,
            }
        })
    }

    /// Output sweep read from the instrument buffers, saved as `<sample>-output.csv`
    pub fn run_output(
        &self,
        sample: &str,
        connection: &mut InstrumentConnection,
        cancel: &CancellationFlag,
    ) -> SweepOutcome<MeasurementTable> {
        let job = SweepJob::output(sample, &self.scripts).with_cancel(cancel.clone());
        self.run_job(&job, connection).map(|mut report| {
            report
                .scans
                .pop()
                .map(|scan| scan.table)
                .unwrap_or_else(|| MeasurementTable::new(&crate::types::Column::FULL))
        })
    }
}
