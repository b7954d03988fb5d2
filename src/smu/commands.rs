//! TSP command strings understood by the 2636B

/// Start of an anonymous script upload
pub const LOAD_SCRIPT: &str = "loadscript";
/// End of an anonymous script upload
pub const END_SCRIPT: &str = "endscript";
/// Run the anonymous script currently held by the instrument
pub const RUN_ANONYMOUS: &str = "script.anonymous.run()";

/// Switch both channels off and reset; always written as one unit
pub const ABORT_SEQUENCE: [&str; 3] = [
    "smua.source.output = smua.OUTPUT_OFF",
    "smub.source.output = smub.OUTPUT_OFF",
    "reset()",
];

/// Prefix of a real-time data line
pub const DATA_SENTINEL: &str = "@@";
/// Prefix of the line that ends a real-time stream
pub const END_SENTINEL: &str = "EE";

pub const ERROR_QUEUE_NEXT: &str = "errorCode, message, severity, errorNode = errorqueue.next()";
pub const ERROR_QUEUE_PRINT: &str = "print(errorCode, message)";

/// Non-volatile reading buffers filled by the sweep scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedBuffer {
    GateSource,
    GateReading,
    DrainSource,
    DrainReading,
}

impl NamedBuffer {
    /// Query order used by the buffer readout
    pub const ALL: [NamedBuffer; 4] = [
        NamedBuffer::GateSource,
        NamedBuffer::GateReading,
        NamedBuffer::DrainSource,
        NamedBuffer::DrainReading,
    ];

    pub fn query(&self) -> &'static str {
        match self {
            NamedBuffer::GateSource => {
                "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.sourcevalues)"
            }
            NamedBuffer::GateReading => {
                "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.readings)"
            }
            NamedBuffer::DrainSource => {
                "printbuffer(1, smub.nvbuffer1.n, smub.nvbuffer1.sourcevalues)"
            }
            NamedBuffer::DrainReading => {
                "printbuffer(1, smub.nvbuffer1.n, smub.nvbuffer1.readings)"
            }
        }
    }
}
