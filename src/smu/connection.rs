use log::{debug, info, warn};
use std::io;
use std::time::{Duration, Instant};

use super::address::Address;
use super::commands::{ERROR_QUEUE_NEXT, ERROR_QUEUE_PRINT};
use super::sim::SimInstrument;
use super::transport::{SerialTransport, Transport};
use crate::error::SmuError;

/// Fixed serial speed of the 2636B RS-232 interface
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Connection parameters for an instrument session
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rusty_smu::ConnectionSettings;
///
/// let settings = ConnectionSettings {
///     address: "ASRL/dev/ttyUSB0::INSTR".to_string(),
///     read_timeout: Some(Duration::from_secs(600)),
///     ..Default::default()
/// };
/// assert_eq!(settings.baud_rate, 57600);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub address: String,
    /// Character that ends every line in both directions
    pub terminator: char,
    pub baud_rate: u32,
    /// Deadline for a blocking [`InstrumentConnection::read`]; `None` waits forever
    pub read_timeout: Option<Duration>,
    /// Granularity of transport polling
    pub poll_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            address: String::new(),
            terminator: '\n',
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Builder for [`InstrumentConnection`]
///
/// ```no_run
/// use rusty_smu::InstrumentConnection;
///
/// let connection = InstrumentConnection::builder()
///     .address("ASRL/dev/ttyUSB0::INSTR")
///     .baud_rate(57600)
///     .open()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Default)]
pub struct ConnectionBuilder {
    settings: ConnectionSettings,
    simulator: Option<SimInstrument>,
}

impl ConnectionBuilder {
    pub fn address(mut self, address: &str) -> Self {
        self.settings.address = address.to_string();
        self
    }

    pub fn terminator(mut self, terminator: char) -> Self {
        self.settings.terminator = terminator;
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.read_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Simulator used when the address is `sim://...`
    ///
    /// Without one, `sim://` addresses get a fresh synthetic simulator.
    pub fn simulator(mut self, simulator: SimInstrument) -> Self {
        self.simulator = Some(simulator);
        self
    }

    pub fn open(self) -> Result<InstrumentConnection, SmuError> {
        let settings = self.settings;
        let address = Address::parse(&settings.address)?;

        let transport: Box<dyn Transport> = match &address {
            Address::Sim(_) => Box::new(
                self.simulator
                    .unwrap_or_else(SimInstrument::synthetic)
                    .transport(settings.poll_interval),
            ),
            _ => Box::new(SerialTransport::open(
                &address,
                settings.baud_rate,
                settings.poll_interval,
            )?),
        };

        info!("Connected to {} ({})", address, transport.describe());
        Ok(InstrumentConnection::with_transport(settings, transport))
    }
}

/// Line-oriented session with a single instrument
///
/// Owned by exactly one execution context at a time; every method takes
/// `&mut self`.
pub struct InstrumentConnection {
    settings: ConnectionSettings,
    transport: Option<Box<dyn Transport>>,
    read_buf: Vec<u8>,
}

impl InstrumentConnection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::default()
    }

    /// Open a session from explicit settings
    pub fn open(settings: &ConnectionSettings) -> Result<Self, SmuError> {
        Self::builder().settings(settings.clone()).open()
    }

    /// Wrap an already open transport
    pub fn with_transport(settings: ConnectionSettings, transport: Box<dyn Transport>) -> Self {
        Self {
            settings,
            transport: Some(transport),
            read_buf: Vec::with_capacity(256),
        }
    }

    pub fn address(&self) -> &str {
        &self.settings.address
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn transport_mut(&mut self) -> Result<&mut Box<dyn Transport>, SmuError> {
        self.transport
            .as_mut()
            .ok_or_else(|| SmuError::NotConnected("No connection established".to_string()))
    }

    /// Send one command line
    pub fn write(&mut self, line: &str) -> Result<(), SmuError> {
        let payload = format!("{line}{}", self.settings.terminator);
        debug!("-> {line}");
        self.transport_mut()?
            .write_bytes(payload.as_bytes())
            .map_err(|e| SmuError::from_transport(e, "write"))
    }

    /// Send several command lines in a single transport write
    pub fn write_batch(&mut self, lines: &[&str]) -> Result<(), SmuError> {
        let terminator = self.settings.terminator;
        let payload: String = lines.iter().map(|line| format!("{line}{terminator}")).collect();
        debug!("-> {}", lines.join(" | "));
        self.transport_mut()?
            .write_bytes(payload.as_bytes())
            .map_err(|e| SmuError::from_transport(e, "write"))
    }

    /// Wait at most one poll interval for a complete line
    ///
    /// Returns `Ok(None)` when the instrument stayed silent; partial data is
    /// kept for the next call.
    pub fn poll_line(&mut self) -> Result<Option<String>, SmuError> {
        if let Some(line) = self.take_buffered_line() {
            return Ok(Some(line));
        }

        let mut chunk = [0u8; 512];
        let transport = self.transport_mut()?;
        match transport.read_chunk(&mut chunk) {
            Ok(0) => Err(SmuError::NotConnected("Transport closed by peer".to_string())),
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                Ok(self.take_buffered_line())
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(SmuError::from_transport(e, "read")),
        }
    }

    /// Block until one line is available
    ///
    /// Honours `read_timeout` when set, otherwise waits indefinitely.
    pub fn read(&mut self) -> Result<String, SmuError> {
        let started = Instant::now();
        loop {
            if let Some(line) = self.poll_line()? {
                return Ok(line);
            }
            if let Some(timeout) = self.settings.read_timeout {
                if started.elapsed() >= timeout {
                    return Err(SmuError::Timeout(timeout));
                }
            }
        }
    }

    /// Write a command and read the single line it answers with
    pub fn query(&mut self, command: &str) -> Result<String, SmuError> {
        self.write(command)?;
        self.read()
    }

    /// Release the session
    ///
    /// Closing twice, or closing a session that never opened, reports
    /// `NotConnected` and leaves the connection unchanged.
    pub fn close(&mut self) -> Result<(), SmuError> {
        match self.transport.take() {
            Some(transport) => {
                info!("Closed connection to {}", transport.describe());
                self.read_buf.clear();
                Ok(())
            }
            None => {
                warn!("Close requested but no connection established");
                Err(SmuError::NotConnected(
                    "No connection established".to_string(),
                ))
            }
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let mut encoded = [0u8; 4];
        let terminator = self.settings.terminator.encode_utf8(&mut encoded).as_bytes();
        let end = self
            .read_buf
            .windows(terminator.len())
            .position(|window| window == terminator)?;
        let raw: Vec<u8> = self.read_buf.drain(..end + terminator.len()).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        let line = line.trim_end_matches('\r').to_string();
        debug!("<- {line}");
        Some(line)
    }
}

impl Drop for InstrumentConnection {
    fn drop(&mut self) {
        if self.transport.is_some() {
            let _ = self.close();
        }
    }
}

/// Check that an instrument answers at `settings`, then close again
pub fn probe(settings: &ConnectionSettings) -> Result<(), SmuError> {
    let mut connection = InstrumentConnection::open(settings)?;
    connection.close()
}

/// Pop the oldest entry of the instrument error queue
pub fn read_error_queue(connection: &mut InstrumentConnection) -> Result<String, SmuError> {
    connection.write(ERROR_QUEUE_NEXT)?;
    connection.query(ERROR_QUEUE_PRINT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_connection(sim: &SimInstrument) -> InstrumentConnection {
        InstrumentConnection::builder()
            .address("sim://0")
            .poll_interval(Duration::from_millis(1))
            .simulator(sim.clone())
            .open()
            .unwrap()
    }

    #[test]
    fn test_close_is_idempotent() {
        let sim = SimInstrument::new();
        let mut connection = sim_connection(&sim);

        assert!(connection.close().is_ok());
        assert!(matches!(connection.close(), Err(SmuError::NotConnected(_))));
        assert!(matches!(connection.close(), Err(SmuError::NotConnected(_))));
        assert!(!connection.is_open());
    }

    #[test]
    fn test_io_on_closed_connection() {
        let sim = SimInstrument::new();
        let mut connection = sim_connection(&sim);
        connection.close().unwrap();

        assert!(matches!(connection.write("reset()"), Err(SmuError::NotConnected(_))));
        assert!(matches!(connection.query("print(1)"), Err(SmuError::NotConnected(_))));
        assert!(matches!(connection.poll_line(), Err(SmuError::NotConnected(_))));
    }

    #[test]
    fn test_unsupported_address_fails_to_open() {
        let result = InstrumentConnection::builder()
            .address("TCPIP0::10.0.0.2::INSTR")
            .open();
        assert!(matches!(result, Err(SmuError::ConnectionFailed(_))));
    }

    #[test]
    fn test_query_reads_one_line() {
        let sim = SimInstrument::new();
        sim.respond("print(smua.source.levelv)", "1.50000e+00");
        let mut connection = sim_connection(&sim);

        assert_eq!(connection.query("print(smua.source.levelv)").unwrap(), "1.50000e+00");
    }

    #[test]
    fn test_busy_transport_reported_on_write() {
        let sim = SimInstrument::new();
        sim.fail_next_writes(1);
        let mut connection = sim_connection(&sim);

        assert!(matches!(connection.write("reset()"), Err(SmuError::TransportBusy(_))));
        assert!(connection.write("reset()").is_ok());
    }

    #[test]
    fn test_read_deadline() {
        let sim = SimInstrument::new();
        let mut connection = InstrumentConnection::builder()
            .address("sim://stalled")
            .poll_interval(Duration::from_millis(1))
            .read_timeout(Some(Duration::from_millis(20)))
            .simulator(sim)
            .open()
            .unwrap();

        assert!(matches!(connection.read(), Err(SmuError::Timeout(_))));
    }

    #[test]
    fn test_write_batch_is_one_write() {
        let sim = SimInstrument::new();
        sim.fail_next_writes(1);
        let mut connection = sim_connection(&sim);

        assert!(connection.write_batch(&["a", "b", "c"]).is_err());
        assert!(sim.sent_lines().is_empty());

        connection.write_batch(&["a", "b", "c"]).unwrap();
        assert_eq!(sim.sent_lines(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_error_queue() {
        let sim = SimInstrument::new();
        let mut connection = sim_connection(&sim);

        let entry = read_error_queue(&mut connection).unwrap();
        assert!(entry.contains("Queue Is Empty"));
    }

    #[test]
    fn test_probe_sim() {
        let settings = ConnectionSettings {
            address: "sim://probe".to_string(),
            ..Default::default()
        };
        assert!(probe(&settings).is_ok());

        let settings = ConnectionSettings {
            address: "GPIB0::26::INSTR".to_string(),
            ..Default::default()
        };
        assert!(matches!(probe(&settings), Err(SmuError::ConnectionFailed(_))));
    }

    /// Hands out fixed bytes in small chunks, then stays silent
    struct ChunkedTransport {
        bytes: Vec<u8>,
    }

    impl Transport for ChunkedTransport {
        fn write_bytes(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.bytes.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "idle"));
            }
            let count = buf.len().min(self.bytes.len()).min(3);
            buf[..count].copy_from_slice(&self.bytes[..count]);
            self.bytes.drain(..count);
            Ok(count)
        }

        fn describe(&self) -> String {
            "chunked".to_string()
        }
    }

    #[test]
    fn test_multibyte_terminator_splits_lines() {
        let settings = ConnectionSettings {
            address: "sim://chunked".to_string(),
            terminator: '¶',
            read_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let transport = ChunkedTransport {
            bytes: "@@1,0,0,2¶EE¶".as_bytes().to_vec(),
        };
        let mut connection = InstrumentConnection::with_transport(settings, Box::new(transport));

        assert_eq!(connection.read().unwrap(), "@@1,0,0,2");
        assert_eq!(connection.read().unwrap(), "EE");
        assert!(matches!(connection.read(), Err(SmuError::Timeout(_))));
    }
}
