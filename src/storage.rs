//! Tab-separated persistence of measurement tables

use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SmuError;
use crate::types::{Column, MeasurementTable};

/// Writes and reloads `<sample>-<suffix>.csv` files in one directory
#[derive(Debug, Clone)]
pub struct TableStore {
    output_dir: PathBuf,
}

impl TableStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// e.g. `path_for("blank-20-1", "neg-pos-transfer")` -> `blank-20-1-neg-pos-transfer.csv`
    pub fn path_for(&self, sample: &str, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{sample}-{suffix}.csv"))
    }

    pub fn save(
        &self,
        sample: &str,
        suffix: &str,
        table: &MeasurementTable,
    ) -> Result<PathBuf, SmuError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| SmuError::Io {
            source,
            context: format!("creating {}", self.output_dir.display()),
        })?;

        let path = self.path_for(sample, suffix);
        write_table(&path, table)?;
        info!("Saved {} rows to {}", table.len(), path.display());
        Ok(path)
    }

    /// Reload a saved table; relative paths resolve against the output directory
    pub fn load(&self, path: &Path) -> Result<MeasurementTable, SmuError> {
        let path = if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        };
        let table = read_table(&path)?;
        info!("Loaded {} rows from {}", table.len(), path.display());
        Ok(table)
    }
}

/// Write `table` as tab-separated values with a header row
pub fn write_table(path: &Path, table: &MeasurementTable) -> Result<(), SmuError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;

    writer.write_record(table.columns().iter().map(Column::header))?;
    for row in table.rows() {
        writer.write_record(row.iter().map(f64::to_string))?;
    }
    writer.flush().map_err(|source| SmuError::Io {
        source,
        context: format!("flushing {}", path.display()),
    })?;
    Ok(())
}

/// Read a table written by [`write_table`]
pub fn read_table(path: &Path) -> Result<MeasurementTable, SmuError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;

    let columns = reader
        .headers()?
        .iter()
        .map(|header| {
            Column::from_header(header)
                .ok_or_else(|| SmuError::Protocol(format!("unknown column '{header}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut table = MeasurementTable::new(&columns);
    for record in reader.records() {
        let record = record?;
        let row = record
            .iter()
            .map(|field| {
                field
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| SmuError::Protocol(format!("unparsable value '{field}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        table.push_row(&row)?;
    }
    Ok(table)
}
