//! # Voltage SunSpec Error Handling
//!
//! This module provides error handling for the Voltage SunSpec library,
//! covering transport failures, device discovery, schema materialization,
//! model verification and value-range violations.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **I/O Errors**: network communication failures
//! - **Connection Errors**: connection establishment and maintenance problems
//! - **Timeout / Cancellation**: operations that exceeded their deadline or
//!   were aborted through a cancellation handle
//!
//! ### Protocol Errors
//! - **Exception Responses**: standard Modbus exception codes from devices
//! - **Frame Errors**: MBAP/PDU framing violations
//! - **Marker Errors**: none of the well-known base addresses holds `SunS`
//!
//! ### Model Errors
//! - **Materialization**: a definition could not be instantiated
//! - **Verification**: an instantiated model violates the SunSpec rules
//! - **Address / Value Range**: register selections or point values outside
//!   their admissible range
//!
//! ## Partial Progress
//!
//! Batched transfers never retry. When a sub-run fails mid-transfer the
//! error is wrapped in [`SunSpecError::Transfer`] carrying the number of
//! points that completed before the failure:
//!
//! ```rust
//! use voltage_sunspec::SunSpecError;
//!
//! fn report(err: &SunSpecError) {
//!     if let SunSpecError::Transfer { completed, source } = err {
//!         println!("{} points transferred before failure: {}", completed, source);
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for SunSpec operations
pub type SunSpecResult<T> = Result<T, SunSpecError>;

/// Modbus exception codes surfaced by a SunSpec server.
///
/// The server dispatch translates every internal failure into one of the
/// two codes mandated by the SunSpec specification; the remaining codes
/// exist so device-reported exceptions can be decoded on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from the raw exception code
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::SlaveDeviceBusy),
            0x08 => Some(Self::MemoryParityError),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailedToRespond),
            _ => None,
        }
    }

    /// Convert to the raw exception code
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get a human-readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal Function",
            Self::IllegalDataAddress => "Illegal Data Address",
            Self::IllegalDataValue => "Illegal Data Value",
            Self::SlaveDeviceFailure => "Slave Device Failure",
            Self::Acknowledge => "Acknowledge",
            Self::SlaveDeviceBusy => "Slave Device Busy",
            Self::MemoryParityError => "Memory Parity Error",
            Self::GatewayPathUnavailable => "Gateway Path Unavailable",
            Self::GatewayTargetFailedToRespond => "Gateway Target Device Failed to Respond",
        }
    }
}

impl std::fmt::Display for ModbusException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X} ({})", self.to_u8(), self.description())
    }
}

/// SunSpec error types
///
/// Each variant provides context about the specific failure, making it
/// easier to diagnose issues and implement appropriate recovery strategies.
#[derive(Error, Debug, Clone)]
pub enum SunSpecError {
    /// I/O related errors (network)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment and maintenance errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation exceeded its configured timeout
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Operation aborted through its cancellation handle
    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    /// Modbus exception reported by the remote device
    #[error("Modbus exception: function=0x{function:02X}, code={code}")]
    Exception { function: u8, code: ModbusException },

    /// MBAP/PDU frame parsing errors
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// None of the candidate base addresses returned the `SunS` literal
    #[error("SunS marker not found at any known base address")]
    MarkerNotFound,

    /// A definition could not be turned into a live model instance
    ///
    /// Raised for unknown point type names, count references that name a
    /// missing or non-integer point, and callback failures during
    /// materialization.
    #[error("Materialization error: {message}")]
    Materialization { message: String },

    /// An instantiated model violates the SunSpec structural rules
    ///
    /// Raised for identifier rule violations, non-contiguous addresses,
    /// groups without points and a length header that does not correlate
    /// with the model quantity.
    #[error("Verification error: {message}")]
    Verification { message: String },

    /// A requested register range does not line up with the model tree
    #[error("Address range error: start={start}, quantity={quantity}: {message}")]
    AddressRange {
        start: u16,
        quantity: u16,
        message: String,
    },

    /// A value outside its admissible range (scale factor, bit position)
    #[error("Value range error: {message}")]
    ValueRange { message: String },

    /// A write selection contained no writable points
    #[error("No writable points for the given index")]
    NoWritablePoints,

    /// Schema document errors (malformed JSON, wrong field types)
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// A batched transfer failed after part of the selection completed
    ///
    /// `completed` counts the points that were fully transferred (and, for
    /// reads, decoded) before the failing sub-run. Nothing is rolled back.
    #[error("Transfer failed after {completed} points: {source}")]
    Transfer {
        completed: usize,
        #[source]
        source: Box<SunSpecError>,
    },
}

impl SunSpecError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled { operation: operation.into() }
    }

    /// Create an exception error from a device response
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function,
            code: ModbusException::from_u8(code).unwrap_or(ModbusException::SlaveDeviceFailure),
        }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a materialization error
    pub fn materialization<S: Into<String>>(message: S) -> Self {
        Self::Materialization { message: message.into() }
    }

    /// Create a verification error
    pub fn verification<S: Into<String>>(message: S) -> Self {
        Self::Verification { message: message.into() }
    }

    /// Create an address range error
    pub fn address_range<S: Into<String>>(start: u16, quantity: u16, message: S) -> Self {
        Self::AddressRange {
            start,
            quantity,
            message: message.into(),
        }
    }

    /// Create a value range error
    pub fn value_range<S: Into<String>>(message: S) -> Self {
        Self::ValueRange { message: message.into() }
    }

    /// Create a schema error
    pub fn schema<S: Into<String>>(message: S) -> Self {
        Self::Schema { message: message.into() }
    }

    /// Wrap an error with the number of points transferred before it
    pub fn transfer(completed: usize, source: SunSpecError) -> Self {
        Self::Transfer {
            completed,
            source: Box::new(source),
        }
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// The core itself never retries; this helps callers implement their
    /// own retry strategies.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::Exception { code, .. } => {
                matches!(code, ModbusException::Acknowledge | ModbusException::SlaveDeviceBusy)
            }
            Self::Transfer { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Check if the error originated in the transport layer
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. } | Self::Cancelled { .. }
        )
    }

    /// Number of points transferred before the failure, if tracked
    pub fn completed(&self) -> Option<usize> {
        match self {
            Self::Transfer { completed, .. } => Some(*completed),
            _ => None,
        }
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for SunSpecError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
impl From<tokio::time::error::Elapsed> for SunSpecError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for SunSpecError {
    fn from(err: serde_json::Error) -> Self {
        Self::schema(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SunSpecError::timeout("read header", 5000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());

        let err = SunSpecError::exception(0x03, 0x02);
        assert!(!err.is_recoverable());
        assert!(!err.is_transport_error());

        let err = SunSpecError::cancelled("scan");
        assert!(err.is_transport_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_exception_mapping() {
        assert_eq!(ModbusException::from_u8(0x02).unwrap(), ModbusException::IllegalDataAddress);
        assert_eq!(ModbusException::IllegalDataAddress.to_u8(), 0x02);
        assert_eq!(ModbusException::from_u8(0x07), None);
    }

    #[test]
    fn test_transfer_wrapping() {
        let inner = SunSpecError::timeout("read run", 1000);
        let err = SunSpecError::transfer(3, inner);
        assert_eq!(err.completed(), Some(3));
        assert!(err.is_recoverable());
        let msg = format!("{}", err);
        assert!(msg.contains("after 3 points"));
    }
}
