pub mod error;
pub mod history;
pub mod plotting;
pub mod smu;
pub mod storage;
pub mod sweep;
pub mod types;
pub mod worker;

pub use error::SmuError;
pub use history::{RunHistory, RunRecord, RunStatus};
pub use plotting::plot_transfer;
pub use smu::{
    Address, ConnectionBuilder, ConnectionSettings, InstrumentConnection, ScriptLoader,
    ScriptUploadSession, SimInstrument, StreamReader, UploadState, probe, read_error_queue,
};
pub use storage::{TableStore, read_table, write_table};
pub use sweep::{
    Orchestrator, ScanResult, ScanStep, SweepJob, SweepReport, SweepScripts, TransferResult,
};
pub use types::{
    CancellationFlag, Column, MeasurementRecord, MeasurementTable, Readout, ScanDirection,
    Snapshot, SweepOutcome,
};
pub use worker::{SweepHandle, SweepWorker};
