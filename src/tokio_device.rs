//! The narrow Device Connection interface consumed by the gateway dispatcher.
//!
//! [`ModbusDevice`] is byte-level: reads hand back the raw Modbus data payload
//! (bit-packed booleans, big-endian register pairs) and writes accept it. The
//! production implementation wraps `tokio_modbus::client::Context`, which owns
//! the TCP connection lifecycle, framing and transaction matching.
//! [`TcpConnector`] is the factory for fresh connections; the dispatcher calls
//! it lazily and keeps the resulting handle for the process lifetime.

use crate::protocol as proto;
use crate::tokio_common::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_modbus::prelude::{Reader, Writer};

/// Helper function to map the nested tokio-modbus result to our result.
fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T> {
    match result {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err.into()), // Modbus exception
        Err(err) => Err(err.into()),     // IO error
    }
}

/// One logical Modbus device, addressed by register/coil address.
///
/// All payloads cross this boundary in Modbus wire layout: coils and discrete
/// inputs as bit-packed bytes (LSB of the first byte is the lowest addressed
/// item, padded to whole bytes), registers as big-endian byte pairs, a single
/// coil as its `0xFF00`/`0x0000` wire value.
#[async_trait]
pub trait ModbusDevice: Send {
    async fn read_coils(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>>;

    async fn read_discrete_inputs(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>>;

    async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>>;

    async fn read_input_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>>;

    async fn write_single_coil(&mut self, address: u16, wire_value: u16) -> Result<()>;

    async fn write_multiple_coils(&mut self, address: u16, quantity: u16, data: &[u8])
        -> Result<()>;

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()>;

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        data: &[u8],
    ) -> Result<()>;

    async fn mask_write_register(
        &mut self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<()>;
}

/// `tokio-modbus` speaks typed `Vec<bool>`/`Vec<u16>` values; this adapter
/// converts to and from the byte-level contract with the `protocol` codecs.
#[async_trait]
impl ModbusDevice for tokio_modbus::client::Context {
    async fn read_coils(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>> {
        let coils = map_tokio_result(Reader::read_coils(self, address, quantity).await)?;
        Ok(proto::bools_to_bytes(&coils))
    }

    async fn read_discrete_inputs(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>> {
        let inputs = map_tokio_result(Reader::read_discrete_inputs(self, address, quantity).await)?;
        Ok(proto::bools_to_bytes(&inputs))
    }

    async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>> {
        let words = map_tokio_result(Reader::read_holding_registers(self, address, quantity).await)?;
        Ok(proto::encode_registers(&words))
    }

    async fn read_input_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>> {
        let words = map_tokio_result(Reader::read_input_registers(self, address, quantity).await)?;
        Ok(proto::encode_registers(&words))
    }

    async fn write_single_coil(&mut self, address: u16, wire_value: u16) -> Result<()> {
        map_tokio_result(
            Writer::write_single_coil(self, address, wire_value == proto::COIL_ON).await,
        )
    }

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        quantity: u16,
        data: &[u8],
    ) -> Result<()> {
        let coils = proto::bytes_to_bools(data, quantity);
        map_tokio_result(Writer::write_multiple_coils(self, address, &coils).await)
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        map_tokio_result(Writer::write_single_register(self, address, value).await)
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        data: &[u8],
    ) -> Result<()> {
        let mut words = proto::decode_words(data);
        words.truncate(quantity as usize);
        map_tokio_result(Writer::write_multiple_registers(self, address, &words).await)
    }

    async fn mask_write_register(
        &mut self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<()> {
        map_tokio_result(Writer::masked_write_register(self, address, and_mask, or_mask).await)
    }
}

/// Connection factory for the gateway's single shared device handle.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    type Device: ModbusDevice;

    /// Establishes a fresh connection to the configured device.
    async fn connect(&self) -> std::io::Result<Self::Device>;
}

/// Connects to one Modbus TCP endpoint with a fixed slave id, bounding the
/// connect attempt with the configured timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    socket_addr: SocketAddr,
    slave: tokio_modbus::Slave,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(socket_addr: SocketAddr, slave: tokio_modbus::Slave, connect_timeout: Duration) -> Self {
        Self {
            socket_addr,
            slave,
            connect_timeout,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.socket_addr
    }
}

#[async_trait]
impl DeviceConnector for TcpConnector {
    type Device = tokio_modbus::client::Context;

    async fn connect(&self) -> std::io::Result<Self::Device> {
        log::debug!(
            "Connecting to Modbus TCP device {} (slave {})",
            self.socket_addr,
            self.slave.0
        );
        match tokio::time::timeout(
            self.connect_timeout,
            tokio_modbus::client::tcp::connect_slave(self.socket_addr, self.slave),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("Connect to {} timed out", self.socket_addr),
            )),
        }
    }
}
