use std::{fmt, time::Duration};

/// Result alias that carries the custom [`PanelError`] type.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Boxed source error produced by a concrete bus backend.
pub type BusError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Direction of a single register transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read,
    Write,
}

impl fmt::Display for BusOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusOp::Read => f.write_str("read"),
            BusOp::Write => f.write_str("write"),
        }
    }
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// The bus session could not be established or the device did not
    /// identify itself correctly. Fatal at startup.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A single register transfer failed. Never retried internally.
    #[error("failed to {op} register 0x{register:02X}: {source}")]
    Register {
        op: BusOp,
        register: u8,
        #[source]
        source: BusError,
    },
    /// The register map does not allow this kind of access.
    #[error("register 0x{register:02X} does not support {op}")]
    Access { op: BusOp, register: u8 },
    /// A register returned a byte outside its enumerated domain.
    #[error("register 0x{register:02X} returned unexpected value 0x{value:02X}")]
    UnexpectedValue { register: u8, value: u8 },
    /// The playback-control collaborator did not finish in time.
    #[error("command timed out after {timeout:?}: {command}")]
    CommandTimeout { command: String, timeout: Duration },
    /// The playback-control collaborator reported failure.
    #[error("command failed ({status}): {command}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    /// An audio chunk could not be turned into samples.
    #[error("malformed audio chunk: {0}")]
    StreamParse(String),
    /// Configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl PanelError {
    /// Builds a register transfer failure from any backend error.
    pub fn register<E>(op: BusOp, register: u8, source: E) -> Self
    where
        E: Into<BusError>,
    {
        Self::Register {
            op,
            register,
            source: source.into(),
        }
    }

    /// Creates a configuration error from a message.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    /// Returns `true` for failures of an individual register transfer.
    pub fn is_bus_failure(&self) -> bool {
        matches!(self, Self::Register { .. })
    }
}
