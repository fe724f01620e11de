//! A gateway library exposing Modbus TCP data-access primitives as
//! strongly-typed operations.
//!
//! The crate translates between the wire-level conventions of the Modbus
//! protocol (big-endian 16-bit registers, bit-packed boolean payloads) and
//! addressed value sequences, while enforcing which Modbus function codes an
//! operator has declared supported for a deployment.
//!
//! ## Layers
//!
//! 1. **[`protocol`]** — pure codecs and the data model: no I/O, fully
//!    testable in isolation.
//! 2. **[`tokio_device`]** — the narrow, byte-level device interface and its
//!    `tokio-modbus` TCP implementation.
//! 3. **[`tokio_gateway`]** — the per-operation dispatcher: capability gate,
//!    lazy connect, device call, codec transform, classified errors. The
//!    single device handle is mutex-serialized, so the gateway can be cloned
//!    and shared across concurrent callers (an RPC transport, for example)
//!    without interleaving request/response cycles on the transport.
//!
//! ## Quick Start
//!
//! ```no_run
//! use modbus_gateway_lib::{
//!     protocol::SupportedFunctionSet,
//!     tokio_device::TcpConnector,
//!     tokio_gateway::Gateway,
//! };
//! use std::time::Duration;
//! use tokio_modbus::Slave;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = TcpConnector::new(
//!         "192.168.1.100:502".parse()?,
//!         Slave(1),
//!         Duration::from_secs(10),
//!     );
//!     let gateway = Gateway::new(connector, SupportedFunctionSet::default());
//!
//!     // The first operation connects; later ones reuse the handle.
//!     for register in gateway.read_holding_registers(0x0000, 4).await? {
//!         println!("{}: {}", register.address, register.value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod protocol;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp")))]
#[cfg(feature = "tokio-tcp")]
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp")))]
#[cfg(feature = "tokio-tcp")]
pub mod tokio_device;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp")))]
#[cfg(feature = "tokio-tcp")]
pub mod tokio_gateway;

#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
#[cfg(feature = "serde")]
pub mod config;
