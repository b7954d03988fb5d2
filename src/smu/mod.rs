pub mod address;
pub mod buffer;
pub mod commands;
pub mod connection;
pub mod executor;
pub mod script;
pub mod sim;
pub mod stream;
pub mod transport;

pub use address::Address;
pub use buffer::read_buffers;
pub use connection::{
    ConnectionBuilder, ConnectionSettings, InstrumentConnection, probe, read_error_queue,
};
pub use executor::{abort, run_anonymous};
pub use script::{ScriptLoader, ScriptUploadSession, UploadState};
pub use sim::SimInstrument;
pub use stream::{LineKind, SnapshotSink, StreamReader, classify_line};
pub use transport::{SerialTransport, Transport};
