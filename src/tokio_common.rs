//! Common error types for the `tokio` based gateway modules.
//!
//! The `Error` enum is the gateway's failure taxonomy. Every operation fails
//! in exactly one of these classes, which keeps failure attribution precise:
//! a configuration-level rejection never looks like a device-level one.

use crate::protocol as proto;

/// Represents all possible errors a gateway operation can surface.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested function (or, for a bit write, neither the atomic nor
    /// the fallback path) is absent from the configured capability set.
    /// No device I/O was attempted.
    #[error("Modbus function {0} is not supported by this gateway")]
    UnsupportedFunction(proto::ModbusFunction),

    /// The device connection could not be established.
    #[error("Modbus device unavailable: {0}")]
    Unavailable(#[source] std::io::Error),

    /// Wraps `proto::Error`: the request itself was malformed.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `tokio_modbus::ExceptionCode`: the device rejected the call.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`: the call failed at the transport level.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),
}

/// The result type for tokio operations.
pub type Result<T> = std::result::Result<T, Error>;
