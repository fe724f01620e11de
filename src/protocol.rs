//! Data model and pure codecs for the Modbus gateway.
//!
//! This module is transport-free: it converts between raw Modbus byte payloads
//! and addressed value sequences, and defines the capability tokens the
//! dispatcher is gated on. All functions here are pure and perform no I/O.
//!
//! Bit ordering follows the Modbus specification: within a coil/discrete-input
//! payload byte, the least significant bit is the lowest addressed item.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Errors for values that fail protocol-level validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The bit index of a register bit write is outside `0..=15`.
    #[error("Bit index {0} out of range ({min} to {max})", min = Bit::MIN, max = Bit::MAX)]
    BitOutOfRange(u8),
    /// A Modbus function name did not match any known function.
    #[error("Unknown Modbus function name: {0}")]
    UnknownFunction(String),
}

/// Wire value a Modbus device expects for an energized coil.
pub const COIL_ON: u16 = 0xFF00;
/// Wire value for a de-energized coil.
pub const COIL_OFF: u16 = 0x0000;

/// Encodes a boolean coil state as its 16-bit Modbus wire value.
///
/// A coil is physically represented by an all-ones or all-zeros pattern,
/// never a partial one.
pub const fn coil_to_wire(value: bool) -> u16 {
    if value { COIL_ON } else { COIL_OFF }
}

/// One coil or discrete-input bit at an absolute device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AddressedBool {
    pub address: u32,
    pub value: bool,
}

/// One 16-bit register value at an absolute device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AddressedRegister {
    pub address: u32,
    pub value: u16,
}

/// The Modbus function codes this gateway can be configured to expose.
///
/// Used purely as capability tokens for the allow-list check, never as
/// executable code. Names match the Modbus application-layer function names
/// and are stable across the configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModbusFunction {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    WriteSingleRegister,
    MaskWriteSingleRegister,
}

impl ModbusFunction {
    /// All functions, in function-code order. This is the factory default
    /// for [`SupportedFunctionSet`].
    pub const ALL: [ModbusFunction; 9] = [
        ModbusFunction::ReadCoils,
        ModbusFunction::ReadDiscreteInputs,
        ModbusFunction::ReadHoldingRegisters,
        ModbusFunction::ReadInputRegisters,
        ModbusFunction::WriteSingleCoil,
        ModbusFunction::WriteMultipleCoils,
        ModbusFunction::WriteMultipleRegisters,
        ModbusFunction::WriteSingleRegister,
        ModbusFunction::MaskWriteSingleRegister,
    ];

    const fn name(self) -> &'static str {
        match self {
            ModbusFunction::ReadCoils => "ReadCoils",
            ModbusFunction::ReadDiscreteInputs => "ReadDiscreteInputs",
            ModbusFunction::ReadHoldingRegisters => "ReadHoldingRegisters",
            ModbusFunction::ReadInputRegisters => "ReadInputRegisters",
            ModbusFunction::WriteSingleCoil => "WriteSingleCoil",
            ModbusFunction::WriteMultipleCoils => "WriteMultipleCoils",
            ModbusFunction::WriteMultipleRegisters => "WriteMultipleRegisters",
            ModbusFunction::WriteSingleRegister => "WriteSingleRegister",
            ModbusFunction::MaskWriteSingleRegister => "MaskWriteSingleRegister",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModbusFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModbusFunction::ALL
            .into_iter()
            .find(|function| function.name() == s)
            .ok_or_else(|| Error::UnknownFunction(s.to_string()))
    }
}

/// The set of Modbus functions an operator has declared supported for a
/// deployment.
///
/// Loaded once at startup and read-only afterwards; the dispatcher queries it
/// on every request before any device I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SupportedFunctionSet(Vec<ModbusFunction>);

impl SupportedFunctionSet {
    pub fn new(functions: Vec<ModbusFunction>) -> Self {
        Self(functions)
    }

    /// Pure membership test, no I/O.
    pub fn is_supported(&self, function: ModbusFunction) -> bool {
        self.0.contains(&function)
    }

    pub fn iter(&self) -> impl Iterator<Item = ModbusFunction> + '_ {
        self.0.iter().copied()
    }
}

impl Default for SupportedFunctionSet {
    /// All nine functions enabled.
    fn default() -> Self {
        Self(ModbusFunction::ALL.to_vec())
    }
}

impl fmt::Display for SupportedFunctionSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for function in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{function}")?;
            first = false;
        }
        Ok(())
    }
}

/// A validated bit position within a 16-bit register (`0` = LSB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Bit(u8);

impl Bit {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 15;
}

impl TryFrom<u8> for Bit {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Bit::MIN..=Bit::MAX).contains(&value) {
            Ok(Bit(value))
        } else {
            Err(Error::BitOutOfRange(value))
        }
    }
}

impl Deref for Bit {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Bit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes the AND/OR mask pair for an atomic mask-write that forces exactly
/// one bit to `value` and passes every other bit through unchanged.
pub fn bit_write_masks(bit: Bit, value: bool) -> (u16, u16) {
    if value {
        (!0, 1 << *bit)
    } else {
        (!(1u16 << *bit), 0)
    }
}

/// Sets or clears one bit in a register value read from the device.
/// Used by the non-atomic read-modify-write fallback.
pub fn apply_bit(current: u16, bit: Bit, value: bool) -> u16 {
    if value {
        current | (1 << *bit)
    } else {
        current & !(1u16 << *bit)
    }
}

/// Expands a byte into its 8 bits, LSB first.
pub fn byte_to_bools(byte: u8) -> [bool; 8] {
    let mut bools = [false; 8];
    for (i, bit) in bools.iter_mut().enumerate() {
        *bit = byte & (1 << i) != 0;
    }
    bools
}

/// Packs 8 bits into a byte, inverse of [`byte_to_bools`].
pub fn bools_to_byte(bools: &[bool; 8]) -> u8 {
    bools
        .iter()
        .enumerate()
        .fold(0, |byte, (i, &bit)| byte | (u8::from(bit) << i))
}

/// Packs a boolean sequence into bytes, right-padding with `false` up to the
/// next multiple of 8. An empty input yields an empty output.
pub fn bools_to_bytes(bools: &[bool]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(bools.len().div_ceil(8));
    for chunk in bools.chunks(8) {
        let mut padded = [false; 8];
        padded[..chunk.len()].copy_from_slice(chunk);
        bytes.push(bools_to_byte(&padded));
    }
    bytes
}

/// Expands a packed byte payload into `quantity` booleans, dropping the
/// byte-alignment padding. Inverse of [`bools_to_bytes`] modulo padding.
pub fn bytes_to_bools(data: &[u8], quantity: u16) -> Vec<bool> {
    data.iter()
        .flat_map(|&byte| byte_to_bools(byte))
        .take(quantity as usize)
        .collect()
}

/// Decodes a bit-packed coil/discrete-input payload into addressed booleans.
///
/// Emits at most `max_quantity` entries with consecutive addresses starting
/// at `start_address`; the trailing pad bits of the last byte are discarded.
/// Empty data or a zero cap yields an empty sequence.
pub fn decode_bools(data: &[u8], start_address: u16, max_quantity: u32) -> Vec<AddressedBool> {
    let mut bools = Vec::new();
    for (i, &byte) in data.iter().enumerate() {
        for (j, bit) in byte_to_bools(byte).into_iter().enumerate() {
            let offset = (i * 8 + j) as u32;
            if offset >= max_quantity {
                return bools;
            }
            bools.push(AddressedBool {
                address: start_address as u32 + offset,
                value: bit,
            });
        }
    }
    bools
}

/// Decodes a register payload into addressed 16-bit values, consuming two
/// big-endian bytes per entry. A trailing odd byte is a malformed device
/// response and is silently dropped.
pub fn decode_registers(data: &[u8], start_address: u16) -> Vec<AddressedRegister> {
    data.chunks_exact(2)
        .enumerate()
        .map(|(k, pair)| AddressedRegister {
            address: start_address as u32 + k as u32,
            value: u16::from_be_bytes([pair[0], pair[1]]),
        })
        .collect()
}

/// Decodes a register payload into bare values, same layout as
/// [`decode_registers`].
pub fn decode_words(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encodes register values as big-endian byte pairs, the inverse of
/// [`decode_registers`]'s byte layout.
pub fn encode_registers(values: &[u16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * 2);
    for value in values {
        data.extend_from_slice(&value.to_be_bytes());
    }
    data
}
