use log::{error, info, warn};

use super::commands::{ABORT_SEQUENCE, RUN_ANONYMOUS};
use super::connection::InstrumentConnection;
use crate::error::SmuError;

/// Start the anonymous script; completion is only visible in its output
pub fn run_anonymous(connection: &mut InstrumentConnection) -> Result<(), SmuError> {
    connection.write(RUN_ANONYMOUS)?;
    info!("Measurement in progress...");
    Ok(())
}

/// Switch both outputs off and reset the instrument
///
/// The three commands go out in one transport write so the instrument never
/// sees half of the sequence.
pub fn abort(connection: &mut InstrumentConnection) -> Result<(), SmuError> {
    warn!("Aborting measurement: outputs off and instrument reset");
    connection.write_batch(&ABORT_SEQUENCE).inspect_err(|e| {
        error!("Abort sequence could not be sent: {e}");
    })
}
