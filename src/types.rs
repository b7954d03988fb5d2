use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SmuError;

/// Named measurement columns, in the order the instrument reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    GateVoltage,
    ChannelVoltage,
    ChannelCurrent,
    GateLeakage,
}

impl Column {
    /// All four columns of a fully populated table
    pub const FULL: [Column; 4] = [
        Column::GateVoltage,
        Column::ChannelVoltage,
        Column::ChannelCurrent,
        Column::GateLeakage,
    ];

    /// Columns captured by the real-time stream
    pub const REALTIME: [Column; 2] = [Column::GateVoltage, Column::ChannelCurrent];

    pub fn header(&self) -> &'static str {
        match self {
            Column::GateVoltage => "Gate Voltage [V]",
            Column::ChannelVoltage => "Channel Voltage [V]",
            Column::ChannelCurrent => "Channel Current [A]",
            Column::GateLeakage => "Gate Leakage [A]",
        }
    }

    pub fn from_header(header: &str) -> Option<Column> {
        Column::FULL
            .into_iter()
            .find(|column| column.header() == header.trim())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// One fully populated measurement point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub gate_voltage: f64,
    pub channel_voltage: f64,
    pub channel_current: f64,
    pub gate_leakage: f64,
}

impl MeasurementRecord {
    pub fn new(
        gate_voltage: f64,
        channel_voltage: f64,
        channel_current: f64,
        gate_leakage: f64,
    ) -> Self {
        Self {
            gate_voltage,
            channel_voltage,
            channel_current,
            gate_leakage,
        }
    }

    pub fn value(&self, column: Column) -> f64 {
        match column {
            Column::GateVoltage => self.gate_voltage,
            Column::ChannelVoltage => self.channel_voltage,
            Column::ChannelCurrent => self.channel_current,
            Column::GateLeakage => self.gate_leakage,
        }
    }
}

/// Column-major table of measurement values
///
/// Rows are appended whole, so every column always holds the same number of
/// values. A table built by the real-time stream carries only gate voltage
/// and channel current; a buffer readout carries all four columns.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementTable {
    columns: Vec<Column>,
    values: Vec<Vec<f64>>,
}

impl MeasurementTable {
    pub fn new(columns: &[Column]) -> Self {
        Self {
            columns: columns.to_vec(),
            values: vec![Vec::new(); columns.len()],
        }
    }

    /// Empty table with the two columns the real-time stream fills
    pub fn realtime() -> Self {
        Self::new(&Column::REALTIME)
    }

    pub fn from_records(records: &[MeasurementRecord]) -> Self {
        let mut table = Self::new(&Column::FULL);
        for record in records {
            for (index, column) in Column::FULL.iter().enumerate() {
                table.values[index].push(record.value(*column));
            }
        }
        table
    }

    /// Append one row; `row` must have one value per column
    pub fn push_row(&mut self, row: &[f64]) -> Result<(), SmuError> {
        if row.len() != self.columns.len() {
            return Err(SmuError::Protocol(format!(
                "row has {} values but table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.values.iter_mut().zip(row) {
            column.push(*value);
        }
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, column: Column) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| *c == column)
            .map(|index| self.values[index].as_slice())
    }

    pub fn row(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.len() {
            return None;
        }
        Some(self.values.iter().map(|column| column[index]).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        (0..self.len()).map(|index| self.values.iter().map(|column| column[index]).collect())
    }

    pub fn len(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Direction of a transfer scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanDirection {
    /// Negative to positive gate voltage
    Forward,
    /// Positive to negative gate voltage
    Reverse,
}

impl ScanDirection {
    pub fn label(&self) -> &'static str {
        match self {
            ScanDirection::Forward => "neg-pos",
            ScanDirection::Reverse => "pos-neg",
        }
    }
}

/// How a scan's data is collected after the script starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readout {
    /// Parse `@@` lines printed by the script until `EE`
    RealTime,
    /// Query the four nvbuffers once the script has finished
    Buffer,
}

/// Shared cancellation request
///
/// Written by a controlling context, read by the worker between lines. The
/// flag never touches the instrument itself.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Incremental copy of a table while it is being captured
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Output suffix of the scan that produced it, e.g. `neg-pos-transfer`
    pub scan: String,
    pub table: MeasurementTable,
}

/// Terminal result of a sweep: data, a requested stop, or a fault
#[derive(Debug)]
pub enum SweepOutcome<T> {
    Completed(T),
    Cancelled,
    Failed(SmuError),
}

impl<T> SweepOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, SweepOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SweepOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            SweepOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SweepOutcome<U> {
        match self {
            SweepOutcome::Completed(value) => SweepOutcome::Completed(f(value)),
            SweepOutcome::Cancelled => SweepOutcome::Cancelled,
            SweepOutcome::Failed(err) => SweepOutcome::Failed(err),
        }
    }

    /// Fold back into a `Result`, turning a cancellation into `SmuError::Cancelled`
    pub fn into_result(self) -> Result<T, SmuError> {
        match self {
            SweepOutcome::Completed(value) => Ok(value),
            SweepOutcome::Cancelled => Err(SmuError::Cancelled),
            SweepOutcome::Failed(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, SmuError>> for SweepOutcome<T> {
    fn from(result: Result<T, SmuError>) -> Self {
        match result {
            Ok(value) => SweepOutcome::Completed(value),
            Err(SmuError::Cancelled) => SweepOutcome::Cancelled,
            Err(err) => SweepOutcome::Failed(err),
        }
    }
}
