//! Real-time reader for the `@@` / `EE` line protocol printed by sweep scripts

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};

use super::commands::{DATA_SENTINEL, END_SENTINEL};
use super::connection::InstrumentConnection;
use super::executor::abort;
use crate::error::SmuError;
use crate::types::{CancellationFlag, MeasurementTable, Snapshot, SweepOutcome};

/// Classification of one line of instrument output
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// Accepted data record: gate voltage and channel current
    Data { gate_voltage: f64, channel_current: f64 },
    /// `@@` line with too few or unparsable fields
    Malformed(String),
    Terminated,
    Noise,
}

/// Classify a raw line
///
/// `@@vg,vd,id,ig` keeps only the first and fourth fields.
pub fn classify_line(line: &str) -> LineKind {
    let line = line.trim();

    if let Some(payload) = line.strip_prefix(DATA_SENTINEL) {
        let fields: Vec<&str> = payload.trim().split(',').map(str::trim).collect();
        if fields.len() < 4 {
            return LineKind::Malformed(format!("expected 4 fields, got {}", fields.len()));
        }
        return match (fields[0].parse::<f64>(), fields[3].parse::<f64>()) {
            (Ok(gate_voltage), Ok(channel_current)) => LineKind::Data {
                gate_voltage,
                channel_current,
            },
            _ => LineKind::Malformed(format!("unparsable values in '{payload}'")),
        };
    }

    if line.starts_with(END_SENTINEL) {
        LineKind::Terminated
    } else {
        LineKind::Noise
    }
}

/// Non-blocking destination for incremental snapshots
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    sender: Sender<Snapshot>,
    scan: String,
}

impl SnapshotSink {
    pub fn new(sender: Sender<Snapshot>, scan: impl Into<String>) -> Self {
        Self {
            sender,
            scan: scan.into(),
        }
    }

    /// Hand over a copy of `table`; never blocks
    pub fn emit(&self, table: &MeasurementTable) {
        let snapshot = Snapshot {
            scan: self.scan.clone(),
            table: table.clone(),
        };
        match self.sender.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!("Snapshot channel full, dropping {} row snapshot", table.len());
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("Snapshot receiver gone");
            }
        }
    }
}

/// Reads the real-time stream of one scan
///
/// Checks the cancellation flag before every poll of the connection. On
/// cancellation the abort sequence is sent and everything collected so far
/// is discarded.
pub struct StreamReader<'a> {
    cancel: &'a CancellationFlag,
    sink: Option<SnapshotSink>,
    idle_timeout: Option<Duration>,
}

impl<'a> StreamReader<'a> {
    pub fn new(cancel: &'a CancellationFlag) -> Self {
        Self {
            cancel,
            sink: None,
            idle_timeout: None,
        }
    }

    pub fn with_sink(mut self, sink: SnapshotSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Fail the scan when no line at all arrives for `timeout`
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn read(&self, connection: &mut InstrumentConnection) -> SweepOutcome<MeasurementTable> {
        self.read_table(connection).into()
    }

    /// Same as [`read`](Self::read) but with cancellation as `SmuError::Cancelled`
    pub fn read_table(
        &self,
        connection: &mut InstrumentConnection,
    ) -> Result<MeasurementTable, SmuError> {
        let mut table = MeasurementTable::realtime();
        let mut last_line = Instant::now();

        loop {
            if self.cancel.is_requested() {
                info!("Cancel operation has been detected -> Aborting measurement");
                // a failed abort is logged by `abort`; the scan still ends as cancelled
                let _ = abort(connection);
                return Err(SmuError::Cancelled);
            }

            let Some(line) = connection.poll_line()? else {
                if let Some(timeout) = self.idle_timeout {
                    if last_line.elapsed() >= timeout {
                        return Err(SmuError::Timeout(timeout));
                    }
                }
                continue;
            };
            last_line = Instant::now();

            match classify_line(&line) {
                LineKind::Data {
                    gate_voltage,
                    channel_current,
                } => {
                    debug!("Realtime: {}", line.trim());
                    table.push_row(&[gate_voltage, channel_current])?;
                    if let Some(sink) = &self.sink {
                        sink.emit(&table);
                    }
                }
                LineKind::Malformed(reason) => {
                    warn!("Discarding malformed data line '{}': {reason}", line.trim());
                }
                LineKind::Terminated => {
                    info!("Scan finished with {} points", table.len());
                    return Ok(table);
                }
                LineKind::Noise => {
                    debug!("Ignoring instrument output: {line}");
                }
            }
        }
    }
}
