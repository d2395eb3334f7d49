//! # Voltage SunSpec - Schema-Driven SunSpec Client/Server Library
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.2.0
//! **License:** MIT
//!
//! A SunSpec client/server implementation in pure Rust: a schema-driven,
//! typed model tree layered on top of Modbus holding-register I/O, designed
//! for solar inverters, meters, batteries and other smart grid devices.
//!
//! ## Features
//!
//! - **🌞 Full Model Materialization**: declarative JSON definitions become
//!   live, address-assigned point trees, including repeat-counted groups
//!   whose count is read from the device during the scan
//! - **🔢 Complete Type System**: all ~20 SunSpec point types with their
//!   register widths, big-endian codecs and "unimplemented" sentinels
//! - **📡 Device Discovery**: SunS marker probing and model-chain walking
//!   until the `0xFFFF` terminator
//! - **⚡ Batched Transfers**: arbitrary point selections split into
//!   contiguous runs within the 125/123 register limits
//! - **🔧 Transport Agnostic**: the core is driven through two Modbus
//!   primitives; a Modbus TCP transport and server are included
//! - **🛑 Cancellation Support**: every blocking entry point takes a
//!   cancellation handle that aborts the pending transaction
//!
//! ## Quick Start
//!
//! ### Client Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use voltage_sunspec::{ModelDef, SunSpecResult, SunSpecTcpClient};
//!
//! #[tokio::main]
//! async fn main() -> SunSpecResult<()> {
//!     let defs: Vec<ModelDef> = serde_json::from_str(include_str!("../demos/models.json"))?;
//!
//!     let mut client = SunSpecTcpClient::connect("127.0.0.1:502", Duration::from_secs(5)).await?;
//!     let ctx = CancellationToken::new();
//!
//!     // discover the device and read everything it implements
//!     client.scan(&ctx, &defs).await?;
//!     for point in client.read(&ctx, &[]).await? {
//!         println!("{}", point);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Server Example
//!
//! ```rust,no_run
//! use voltage_sunspec::{noop_handler, ModelDef, ServerConfig, SunSpecTcpServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let defs: Vec<ModelDef> = serde_json::from_str(include_str!("../demos/models.json"))?;
//!
//!     let config = ServerConfig {
//!         bind_address: "127.0.0.1:502".parse()?,
//!         ..Default::default()
//!     };
//!     let mut server = SunSpecTcpServer::new(config, &defs, noop_handler()).await?;
//!     server.serve(&CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │  SunSpec Client │    │  SunSpec Server │
//! │ scan/read/write │    │    dispatch     │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Device Tree   │    │   Device Tree   │
//! │ models → groups │    │ models → groups │
//! │       → points  │    │       → points  │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Transport     │◄──►│   TCP Front End │
//! │ (FC 0x03/0x10)  │    │ (MBAP framing)  │
//! └─────────────────┘    └─────────────────┘
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Modbus address interval algebra
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod index;

/// Symbol tables for enumerated and bitfield points
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod symbol;

/// Typed point values, codecs and sentinels
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod value;

/// Points and their schema definitions
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod point;

/// Groups of points and nested groups
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod group;

/// Models, materialization and verification
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod model;

/// Device trees and point collection
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod device;

/// Modbus transport layer (trait and TCP implementation)
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// SunSpec client implementation
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod client;

/// SunSpec server implementations
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod server;

// Re-export main types for convenience
pub use client::{SunSpecClient, SunSpecTcpClient};
pub use device::Device;
pub use error::{ModbusException, SunSpecError, SunSpecResult};
pub use group::{Group, GroupDef, GroupType};
pub use index::{merge, Index};
pub use model::{verify, Meta, Model, ModelDef, NoFetch, PointFetcher};
pub use point::{Access, Count, Point, PointDef, ScaleDef};
pub use server::{noop_handler, Dispatcher, ServeHandler, ServerConfig, ServerStats, SunSpecTcpServer};
pub use symbol::{Symbol, SymbolDef, Symbols};
pub use transport::{ModbusTransport, TcpTransport, TransportStats};
pub use value::{Scale, ScaleCell, Value};

/// Maximum number of registers in a single read request (function 0x03)
pub const READ_REGISTER_LIMIT: u16 = 125;

/// Maximum number of registers in a single write request (function 0x10)
pub const WRITE_REGISTER_LIMIT: u16 = 123;

/// The 4-byte ASCII marker anchoring a SunSpec register map
pub const SUNS_MARKER: [u8; 4] = *b"SunS";

/// Base addresses probed for the SunS marker, in order
pub const BASE_ADDRESSES: [u16; 3] = [0, 40000, 50000];

/// Model identifier terminating the model chain
pub const END_MODEL_ID: u16 = 0xFFFF;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage SunSpec v{} - Schema-driven SunSpec client/server library by Evan Liu",
        VERSION
    )
}
