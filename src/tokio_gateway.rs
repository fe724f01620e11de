//! The per-operation gateway dispatcher.
//!
//! Every operation runs the same pipeline: capability gate, lazy connect,
//! device call, codec transform, typed response. Any stage failure
//! short-circuits into the classified [`Error`](crate::tokio_common::Error);
//! nothing is retried at this layer.
//!
//! The gateway owns the single shared device handle behind a
//! `tokio::sync::Mutex`: each operation holds the lock for its whole
//! connect+call+decode sequence, so concurrent callers queue instead of
//! interleaving their request/response cycles on the shared transport.

use crate::protocol as proto;
use crate::tokio_common::{Error, Result};
use crate::tokio_device::{DeviceConnector, ModbusDevice};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Dispatches typed Modbus operations against one configured TCP device,
/// enforcing the operator's function allow-list before any device I/O.
pub struct Gateway<C: DeviceConnector> {
    connector: C,
    supported: proto::SupportedFunctionSet,
    device: Arc<Mutex<Option<C::Device>>>,
}

impl<C: DeviceConnector + Clone> Clone for Gateway<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            supported: self.supported.clone(),
            device: self.device.clone(),
        }
    }
}

impl<C: DeviceConnector> Gateway<C> {
    /// Creates a gateway for one device with the configured capability set.
    ///
    /// No connection is attempted here; the device handle is established
    /// lazily by the first operation and reused afterwards.
    pub fn new(connector: C, supported: proto::SupportedFunctionSet) -> Self {
        Self {
            connector,
            supported,
            device: Arc::new(Mutex::new(None)),
        }
    }

    /// The functions this gateway instance is allowed to invoke.
    pub fn supported_functions(&self) -> &proto::SupportedFunctionSet {
        &self.supported
    }

    /// Fails fast with the unsupported-operation classification before any
    /// device I/O is attempted.
    fn gate(&self, function: proto::ModbusFunction) -> Result<()> {
        if self.supported.is_supported(function) {
            Ok(())
        } else {
            Err(Error::UnsupportedFunction(function))
        }
    }

    /// Returns the shared device handle, connecting first if none is cached.
    /// A connect failure is classified as [`Error::Unavailable`].
    async fn ensure_connected<'a>(
        connector: &C,
        device: &'a mut Option<C::Device>,
    ) -> Result<&'a mut C::Device> {
        if device.is_none() {
            *device = Some(connector.connect().await.map_err(Error::Unavailable)?);
        }
        // The handle was either cached or stored just above.
        Ok(device.as_mut().expect("device handle present"))
    }

    /// Passes a device call result through, discarding the cached handle on a
    /// transport-level failure so the next operation reconnects.
    fn settle<T>(device: &mut Option<C::Device>, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::TokioError(_))) {
            log::debug!("Discarding device handle after transport error");
            device.take();
        }
        result
    }

    /// Reads `quantity` coils starting at `address`.
    pub async fn read_coils(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<proto::AddressedBool>> {
        self.gate(proto::ModbusFunction::ReadCoils)?;
        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;
        let result = device.read_coils(address, quantity).await;
        let raw = Self::settle(&mut guard, result)?;
        Ok(proto::decode_bools(&raw, address, quantity as u32))
    }

    /// Reads `quantity` discrete inputs starting at `address`.
    pub async fn read_discrete_inputs(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<proto::AddressedBool>> {
        self.gate(proto::ModbusFunction::ReadDiscreteInputs)?;
        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;
        let result = device.read_discrete_inputs(address, quantity).await;
        let raw = Self::settle(&mut guard, result)?;
        Ok(proto::decode_bools(&raw, address, quantity as u32))
    }

    /// Reads `quantity` holding registers starting at `address`.
    pub async fn read_holding_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<proto::AddressedRegister>> {
        self.gate(proto::ModbusFunction::ReadHoldingRegisters)?;
        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;
        let result = device.read_holding_registers(address, quantity).await;
        let raw = Self::settle(&mut guard, result)?;
        Ok(proto::decode_registers(&raw, address))
    }

    /// Reads `quantity` input registers starting at `address`.
    pub async fn read_input_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<proto::AddressedRegister>> {
        self.gate(proto::ModbusFunction::ReadInputRegisters)?;
        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;
        let result = device.read_input_registers(address, quantity).await;
        let raw = Self::settle(&mut guard, result)?;
        Ok(proto::decode_registers(&raw, address))
    }

    /// Writes one coil, encoding the boolean as its Modbus wire value.
    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<()> {
        self.gate(proto::ModbusFunction::WriteSingleCoil)?;
        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;
        let result = device
            .write_single_coil(address, proto::coil_to_wire(value))
            .await;
        Self::settle(&mut guard, result)
    }

    /// Writes a run of coils starting at `address`, bit-packing the values.
    pub async fn write_multiple_coils(&self, address: u16, values: &[bool]) -> Result<()> {
        self.gate(proto::ModbusFunction::WriteMultipleCoils)?;
        let data = proto::bools_to_bytes(values);
        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;
        let result = device
            .write_multiple_coils(address, values.len() as u16, &data)
            .await;
        Self::settle(&mut guard, result)
    }

    /// Writes one holding register.
    pub async fn write_single_register(&self, address: u16, value: u16) -> Result<()> {
        self.gate(proto::ModbusFunction::WriteSingleRegister)?;
        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;
        let result = device.write_single_register(address, value).await;
        Self::settle(&mut guard, result)
    }

    /// Writes a run of holding registers starting at `address`.
    pub async fn write_multiple_registers(&self, address: u16, values: &[u16]) -> Result<()> {
        self.gate(proto::ModbusFunction::WriteMultipleRegisters)?;
        let data = proto::encode_registers(values);
        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;
        let result = device
            .write_multiple_registers(address, values.len() as u16, &data)
            .await;
        Self::settle(&mut guard, result)
    }

    /// Forces one bit of a holding register to `value`, leaving the other
    /// bits untouched.
    ///
    /// Prefers the atomic MaskWriteSingleRegister function (one round-trip,
    /// race-free against other writers). When the device does not support it,
    /// falls back to a read-modify-write cycle, which requires both
    /// ReadHoldingRegisters and WriteSingleRegister to be supported. The
    /// fallback is not atomic: a concurrent writer to the same register
    /// between the read and the write can be lost.
    pub async fn write_bit_in_register(
        &self,
        address: u16,
        bit: proto::Bit,
        value: bool,
    ) -> Result<()> {
        let primary_enabled = self
            .supported
            .is_supported(proto::ModbusFunction::MaskWriteSingleRegister);
        let fallback_enabled = self
            .supported
            .is_supported(proto::ModbusFunction::WriteSingleRegister)
            && self
                .supported
                .is_supported(proto::ModbusFunction::ReadHoldingRegisters);
        if !primary_enabled && !fallback_enabled {
            return Err(Error::UnsupportedFunction(
                proto::ModbusFunction::MaskWriteSingleRegister,
            ));
        }

        let mut guard = self.device.lock().await;
        let device = Self::ensure_connected(&self.connector, &mut guard).await?;

        if primary_enabled {
            let (and_mask, or_mask) = proto::bit_write_masks(bit, value);
            let result = device.mask_write_register(address, and_mask, or_mask).await;
            Self::settle(&mut guard, result)
        } else {
            log::debug!(
                "MaskWriteSingleRegister not supported, using read-modify-write fallback for register {address} bit {bit}"
            );
            let result = device.read_holding_registers(address, 1).await;
            let raw = Self::settle(&mut guard, result)?;
            let current = proto::decode_words(&raw).first().copied().ok_or_else(|| {
                Error::TokioError(tokio_modbus::Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Device returned an empty register payload",
                )))
            })?;
            let device = Self::ensure_connected(&self.connector, &mut guard).await?;
            let result = device
                .write_single_register(address, proto::apply_bit(current, bit, value))
                .await;
            Self::settle(&mut guard, result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModbusFunction;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        ReadCoils(u16, u16),
        ReadDiscreteInputs(u16, u16),
        ReadHoldingRegisters(u16, u16),
        ReadInputRegisters(u16, u16),
        WriteSingleCoil(u16, u16),
        WriteMultipleCoils(u16, u16, Vec<u8>),
        WriteSingleRegister(u16, u16),
        WriteMultipleRegisters(u16, u16, Vec<u8>),
        MaskWriteRegister(u16, u16, u16),
    }

    #[derive(Debug, Default)]
    struct MockState {
        calls: Vec<Call>,
        read_payload: Vec<u8>,
        fail_next_call: bool,
        in_flight: bool,
    }

    /// Records every call and detects interleaved connect/call sequences.
    #[derive(Debug, Clone, Default)]
    struct MockDevice {
        state: Arc<StdMutex<MockState>>,
        call_delay: Option<Duration>,
    }

    impl MockDevice {
        async fn enter(&self, call: Call) -> Result<()> {
            {
                let mut state = self.state.lock().unwrap();
                state.calls.push(call);
                assert!(!state.in_flight, "device calls interleaved");
                state.in_flight = true;
                if state.fail_next_call {
                    state.fail_next_call = false;
                    state.in_flight = false;
                    return Err(Error::TokioError(tokio_modbus::Error::Transport(
                        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer went away"),
                    )));
                }
            }
            if let Some(delay) = self.call_delay {
                tokio::time::sleep(delay).await;
            }
            self.state.lock().unwrap().in_flight = false;
            Ok(())
        }

        fn payload(&self) -> Vec<u8> {
            self.state.lock().unwrap().read_payload.clone()
        }

        fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }
    }

    #[async_trait]
    impl ModbusDevice for MockDevice {
        async fn read_coils(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>> {
            self.enter(Call::ReadCoils(address, quantity)).await?;
            Ok(self.payload())
        }

        async fn read_discrete_inputs(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>> {
            self.enter(Call::ReadDiscreteInputs(address, quantity))
                .await?;
            Ok(self.payload())
        }

        async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>> {
            self.enter(Call::ReadHoldingRegisters(address, quantity))
                .await?;
            Ok(self.payload())
        }

        async fn read_input_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>> {
            self.enter(Call::ReadInputRegisters(address, quantity))
                .await?;
            Ok(self.payload())
        }

        async fn write_single_coil(&mut self, address: u16, wire_value: u16) -> Result<()> {
            self.enter(Call::WriteSingleCoil(address, wire_value)).await
        }

        async fn write_multiple_coils(
            &mut self,
            address: u16,
            quantity: u16,
            data: &[u8],
        ) -> Result<()> {
            self.enter(Call::WriteMultipleCoils(address, quantity, data.to_vec()))
                .await
        }

        async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
            self.enter(Call::WriteSingleRegister(address, value)).await
        }

        async fn write_multiple_registers(
            &mut self,
            address: u16,
            quantity: u16,
            data: &[u8],
        ) -> Result<()> {
            self.enter(Call::WriteMultipleRegisters(
                address,
                quantity,
                data.to_vec(),
            ))
            .await
        }

        async fn mask_write_register(
            &mut self,
            address: u16,
            and_mask: u16,
            or_mask: u16,
        ) -> Result<()> {
            self.enter(Call::MaskWriteRegister(address, and_mask, or_mask))
                .await
        }
    }

    #[derive(Debug, Clone)]
    struct MockConnector {
        device: MockDevice,
        refuse: bool,
        connects: Arc<StdMutex<u32>>,
    }

    impl MockConnector {
        fn new(device: MockDevice) -> Self {
            Self {
                device,
                refuse: false,
                connects: Arc::new(StdMutex::new(0)),
            }
        }

        fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::new(MockDevice::default())
            }
        }

        fn connect_count(&self) -> u32 {
            *self.connects.lock().unwrap()
        }
    }

    #[async_trait]
    impl DeviceConnector for MockConnector {
        type Device = MockDevice;

        async fn connect(&self) -> std::io::Result<MockDevice> {
            *self.connects.lock().unwrap() += 1;
            if self.refuse {
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))
            } else {
                Ok(self.device.clone())
            }
        }
    }

    fn gateway_with(
        payload: Vec<u8>,
        functions: Vec<ModbusFunction>,
    ) -> (Gateway<MockConnector>, MockDevice, MockConnector) {
        let device = MockDevice::default();
        device.state.lock().unwrap().read_payload = payload;
        let connector = MockConnector::new(device.clone());
        let gateway = Gateway::new(
            connector.clone(),
            proto::SupportedFunctionSet::new(functions),
        );
        (gateway, device, connector)
    }

    #[tokio::test]
    async fn gate_rejects_unsupported_function_without_io() {
        let (gateway, device, connector) = gateway_with(vec![], vec![]);
        assert_matches!(
            gateway.read_coils(0, 8).await,
            Err(Error::UnsupportedFunction(ModbusFunction::ReadCoils))
        );
        assert!(device.calls().is_empty());
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn connect_failure_is_classified_unavailable() {
        let connector = MockConnector::refusing();
        let gateway = Gateway::new(connector.clone(), proto::SupportedFunctionSet::default());
        assert_matches!(gateway.read_coils(0, 8).await, Err(Error::Unavailable(_)));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn read_coils_decodes_and_caps_payload() {
        let (gateway, device, _) =
            gateway_with(vec![0b10101010], vec![ModbusFunction::ReadCoils]);
        let coils = gateway.read_coils(0, 8).await.unwrap();
        assert_eq!(coils.len(), 8);
        for (i, coil) in coils.iter().enumerate() {
            assert_eq!(coil.address, i as u32);
            assert_eq!(coil.value, i % 2 == 1);
        }
        assert_eq!(device.calls(), vec![Call::ReadCoils(0, 8)]);

        // A shorter quantity trims the byte-aligned payload.
        let coils = gateway.read_coils(0, 3).await.unwrap();
        assert_eq!(coils.len(), 3);
    }

    #[tokio::test]
    async fn read_holding_registers_decodes_big_endian() {
        let (gateway, device, _) = gateway_with(
            vec![0x12, 0x34, 0xAB, 0xCD],
            vec![ModbusFunction::ReadHoldingRegisters],
        );
        let registers = gateway.read_holding_registers(100, 2).await.unwrap();
        assert_eq!(
            registers,
            vec![
                proto::AddressedRegister {
                    address: 100,
                    value: 0x1234
                },
                proto::AddressedRegister {
                    address: 101,
                    value: 0xABCD
                },
            ]
        );
        assert_eq!(device.calls(), vec![Call::ReadHoldingRegisters(100, 2)]);
    }

    #[tokio::test]
    async fn write_single_coil_uses_wire_encoding() {
        let (gateway, device, _) = gateway_with(vec![], vec![ModbusFunction::WriteSingleCoil]);
        gateway.write_single_coil(5, true).await.unwrap();
        gateway.write_single_coil(5, false).await.unwrap();
        assert_eq!(
            device.calls(),
            vec![
                Call::WriteSingleCoil(5, 0xFF00),
                Call::WriteSingleCoil(5, 0x0000),
            ]
        );
    }

    #[tokio::test]
    async fn write_multiple_coils_packs_and_counts() {
        let (gateway, device, _) = gateway_with(vec![], vec![ModbusFunction::WriteMultipleCoils]);
        gateway
            .write_multiple_coils(9, &[true, true, true])
            .await
            .unwrap();
        assert_eq!(
            device.calls(),
            vec![Call::WriteMultipleCoils(9, 3, vec![0x07])]
        );
    }

    #[tokio::test]
    async fn write_multiple_registers_encodes_big_endian() {
        let (gateway, device, _) =
            gateway_with(vec![], vec![ModbusFunction::WriteMultipleRegisters]);
        gateway
            .write_multiple_registers(7, &[0x1234, 0x00FF])
            .await
            .unwrap();
        assert_eq!(
            device.calls(),
            vec![Call::WriteMultipleRegisters(
                7,
                2,
                vec![0x12, 0x34, 0x00, 0xFF]
            )]
        );
    }

    #[tokio::test]
    async fn bit_write_prefers_atomic_mask_write() {
        let (gateway, device, _) = gateway_with(vec![], ModbusFunction::ALL.to_vec());
        let bit = proto::Bit::try_from(3).unwrap();
        gateway.write_bit_in_register(1, bit, true).await.unwrap();
        // Exactly one mask-write, no reads.
        assert_eq!(device.calls(), vec![Call::MaskWriteRegister(1, 0xFFFF, 0x0008)]);
    }

    #[tokio::test]
    async fn bit_write_clear_masks() {
        let (gateway, device, _) = gateway_with(vec![], ModbusFunction::ALL.to_vec());
        let bit = proto::Bit::try_from(3).unwrap();
        gateway.write_bit_in_register(1, bit, false).await.unwrap();
        assert_eq!(device.calls(), vec![Call::MaskWriteRegister(1, 0xFFF7, 0x0000)]);
    }

    #[tokio::test]
    async fn bit_write_falls_back_to_read_modify_write() {
        let (gateway, device, _) = gateway_with(
            vec![0x00, 0x0F],
            vec![
                ModbusFunction::ReadHoldingRegisters,
                ModbusFunction::WriteSingleRegister,
            ],
        );
        let bit = proto::Bit::try_from(3).unwrap();
        gateway.write_bit_in_register(1, bit, false).await.unwrap();
        assert_eq!(
            device.calls(),
            vec![
                Call::ReadHoldingRegisters(1, 1),
                Call::WriteSingleRegister(1, 0x0007),
            ]
        );
    }

    #[tokio::test]
    async fn bit_write_fallback_requires_both_functions() {
        // WriteSingleRegister alone is not enough for the fallback cycle.
        let (gateway, device, connector) =
            gateway_with(vec![], vec![ModbusFunction::WriteSingleRegister]);
        let bit = proto::Bit::try_from(0).unwrap();
        assert_matches!(
            gateway.write_bit_in_register(1, bit, true).await,
            Err(Error::UnsupportedFunction(
                ModbusFunction::MaskWriteSingleRegister
            ))
        );
        assert!(device.calls().is_empty());
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn connection_is_reused_across_operations() {
        let (gateway, _, connector) =
            gateway_with(vec![0x00, 0x00], ModbusFunction::ALL.to_vec());
        gateway.read_holding_registers(0, 1).await.unwrap();
        gateway.read_input_registers(0, 1).await.unwrap();
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn transport_error_forces_reconnect() {
        let (gateway, device, connector) =
            gateway_with(vec![0x00, 0x00], ModbusFunction::ALL.to_vec());
        gateway.read_holding_registers(0, 1).await.unwrap();
        device.state.lock().unwrap().fail_next_call = true;
        assert_matches!(
            gateway.read_holding_registers(0, 1).await,
            Err(Error::TokioError(_))
        );
        gateway.read_holding_registers(0, 1).await.unwrap();
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_operations_do_not_interleave() {
        let device = MockDevice {
            call_delay: Some(Duration::from_millis(10)),
            ..MockDevice::default()
        };
        device.state.lock().unwrap().read_payload = vec![0xFF];
        let connector = MockConnector::new(device.clone());
        let gateway = Gateway::new(connector, proto::SupportedFunctionSet::default());

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let gateway = gateway.clone();
            tasks.push(tokio::spawn(
                async move { gateway.read_coils(0, 8).await },
            ));
        }
        for task in tasks {
            // The mock panics inside `enter` if two calls overlap.
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(device.calls().len(), 4);
    }
}
