use log::info;

use super::commands::NamedBuffer;
use super::connection::InstrumentConnection;
use crate::error::SmuError;
use crate::types::{MeasurementRecord, MeasurementTable};

/// Parse a `printbuffer` response into floats
pub fn parse_buffer(response: &str) -> Result<Vec<f64>, SmuError> {
    let response = response.trim();
    if response.is_empty() {
        return Ok(Vec::new());
    }
    response
        .split(',')
        .map(|field| {
            field.trim().parse::<f64>().map_err(|_| {
                SmuError::Protocol(format!("unparsable buffer value '{}'", field.trim()))
            })
        })
        .collect()
}

/// Read the four nvbuffers of a finished sweep into a four-column table
///
/// Any busy transport aborts the readout; there is no internal retry.
pub fn read_buffers(connection: &mut InstrumentConnection) -> Result<MeasurementTable, SmuError> {
    let mut buffers = Vec::with_capacity(NamedBuffer::ALL.len());
    for buffer in NamedBuffer::ALL {
        let response = connection.query(buffer.query())?;
        buffers.push(parse_buffer(&response)?);
    }

    let [gate_source, gate_reading, drain_source, drain_reading] =
        <[Vec<f64>; 4]>::try_from(buffers)
            .map_err(|_| SmuError::Protocol("expected four buffers".to_string()))?;

    let points = gate_source.len();
    if [&gate_reading, &drain_source, &drain_reading]
        .iter()
        .any(|values| values.len() != points)
    {
        return Err(SmuError::Protocol(format!(
            "buffer lengths differ: {} / {} / {} / {}",
            points,
            gate_reading.len(),
            drain_source.len(),
            drain_reading.len()
        )));
    }

    let records: Vec<MeasurementRecord> = (0..points)
        .map(|i| {
            MeasurementRecord::new(
                gate_source[i],
                drain_source[i],
                drain_reading[i],
                gate_reading[i],
            )
        })
        .collect();

    info!("Read {points} points from instrument buffers");
    Ok(MeasurementTable::from_records(&records))
}
