use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use modbus_gateway_lib::protocol as proto;
use std::path::PathBuf;
use std::time::Duration;

fn parse_address(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid address format: {e}"))
}

fn parse_register_value(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register value format: {e}"))
}

fn parse_bit(s: &str) -> Result<proto::Bit, String> {
    let bit = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid bit index format: {e}"))?;
    proto::Bit::try_from(bit).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Print the Modbus functions this gateway instance is configured to expose.
    Functions,

    /// Read coils and print one `address: state` line per coil.
    ReadCoils {
        /// Start address of the first coil.
        /// Can be specified in decimal or hexadecimal (e.g. "0x0010").
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Number of coils to read.
        quantity: u16,
    },

    /// Read discrete inputs and print one `address: state` line per input.
    ReadDiscreteInputs {
        /// Start address of the first discrete input.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Number of inputs to read.
        quantity: u16,
    },

    /// Read holding registers and print one `address: value` line per register.
    ReadHoldingRegisters {
        /// Start address of the first register.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Number of registers to read.
        quantity: u16,
    },

    /// Read input registers and print one `address: value` line per register.
    ReadInputRegisters {
        /// Start address of the first register.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Number of registers to read.
        quantity: u16,
    },

    /// Write one coil.
    WriteSingleCoil {
        /// Address of the coil.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// New coil state ("true" or "false").
        value: bool,
    },

    /// Write a run of consecutive coils starting at the given address.
    WriteMultipleCoils {
        /// Address of the first coil.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Coil states in address order ("true" or "false").
        #[arg(required = true, num_args = 1..)]
        values: Vec<bool>,
    },

    /// Write one holding register.
    WriteSingleRegister {
        /// Address of the register.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// New 16-bit register value, decimal or hexadecimal (e.g. "0xFF00").
        #[arg(value_parser = parse_register_value)]
        value: u16,
    },

    /// Write a run of consecutive holding registers starting at the given address.
    WriteMultipleRegisters {
        /// Address of the first register.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// 16-bit register values in address order, decimal or hexadecimal.
        #[arg(required = true, num_args = 1.., value_parser = parse_register_value)]
        values: Vec<u16>,
    },

    /// Force a single bit of a holding register, leaving the other bits untouched.
    /// Uses the atomic MaskWriteSingleRegister function when the gateway is
    /// configured for it; otherwise falls back to a non-atomic
    /// read-modify-write cycle (a concurrent writer to the same register can
    /// be lost).
    #[clap(verbatim_doc_comment)]
    WriteBit {
        /// Address of the register.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Bit position within the register, 0 (LSB) to 15.
        #[arg(value_parser = parse_bit)]
        bit: proto::Bit,
        /// New bit state ("true" or "false").
        value: bool,
    },

    /// Continuously poll holding registers and print them at a fixed interval.
    Poll {
        /// Start address of the first register.
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Number of registers to read per cycle.
        quantity: u16,
        /// Interval between reads (e.g. "2s", "500ms").
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "2sec")]
        poll_interval: Duration,
    },
}

const fn about_text() -> &'static str {
    "Modbus TCP gateway CLI - read and write coils and registers on the configured device, gated by the function allow-list."
}

#[derive(Parser, Debug)]
#[command(name="mbgate", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is off.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Location of the gateway configuration file.
    /// A missing file is not an error: built-in defaults are used instead
    /// (localhost:502, slave 1, all functions supported).
    #[arg(global = true, short, long, default_value = "mbgate.yaml", verbatim_doc_comment)]
    pub config: PathBuf,

    /// The operation to perform against the configured device.
    #[command(subcommand)]
    pub command: CliCommands,
}
