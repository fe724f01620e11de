//! Modbus TCP Gateway CLI
//!
//! A command-line front end for the gateway library: it connects to the one
//! Modbus TCP device named in the configuration file and exposes every
//! gateway operation as a subcommand.
//!
//! This tool allows users to:
//! - Read coils, discrete inputs, holding registers and input registers.
//! - Write single or multiple coils and registers.
//! - Force a single bit of a holding register (atomic mask-write when the
//!   device supports it, read-modify-write fallback otherwise).
//! - Continuously poll a register range at a fixed interval.
//!
//! Which Modbus functions may be invoked is controlled by the configured
//! allow-list; operations outside it are rejected before any device I/O.

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use modbus_gateway_lib::{
    config::GatewayConfig,
    protocol as proto,
    tokio_device::TcpConnector,
    tokio_gateway::Gateway,
};
use std::panic;

mod commandline;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

fn print_coils(coils: &[proto::AddressedBool]) {
    for coil in coils {
        println!("{}: {}", coil.address, if coil.value { "ON" } else { "OFF" });
    }
}

fn print_registers(registers: &[proto::AddressedRegister]) {
    for register in registers {
        println!("{}: {} (0x{:04X})", register.address, register.value, register.value);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Modbus gateway CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("Cannot load config file {}", args.config.display()))?;
    let socket_addr = config
        .modbus
        .socket_addr()
        .with_context(|| "Cannot resolve device address")?;
    info!(
        "Device: {socket_addr} (slave {}), functions supported: {}",
        config.modbus.slave, config.modbus.functions_supported
    );

    let connector = TcpConnector::new(
        socket_addr,
        tokio_modbus::Slave(config.modbus.slave),
        config.modbus.connection_timeout,
    );
    let gateway = Gateway::new(connector, config.modbus.functions_supported.clone());

    match &args.command {
        commandline::CliCommands::Functions => {
            println!("{}", gateway.supported_functions());
        }
        commandline::CliCommands::ReadCoils { address, quantity } => {
            info!("Executing: Read Coils {address}+{quantity}");
            let coils = gateway
                .read_coils(*address, *quantity)
                .await
                .with_context(|| "Cannot read coils")?;
            print_coils(&coils);
        }
        commandline::CliCommands::ReadDiscreteInputs { address, quantity } => {
            info!("Executing: Read Discrete Inputs {address}+{quantity}");
            let inputs = gateway
                .read_discrete_inputs(*address, *quantity)
                .await
                .with_context(|| "Cannot read discrete inputs")?;
            print_coils(&inputs);
        }
        commandline::CliCommands::ReadHoldingRegisters { address, quantity } => {
            info!("Executing: Read Holding Registers {address}+{quantity}");
            let registers = gateway
                .read_holding_registers(*address, *quantity)
                .await
                .with_context(|| "Cannot read holding registers")?;
            print_registers(&registers);
        }
        commandline::CliCommands::ReadInputRegisters { address, quantity } => {
            info!("Executing: Read Input Registers {address}+{quantity}");
            let registers = gateway
                .read_input_registers(*address, *quantity)
                .await
                .with_context(|| "Cannot read input registers")?;
            print_registers(&registers);
        }
        commandline::CliCommands::WriteSingleCoil { address, value } => {
            info!("Executing: Write Single Coil {address} = {value}");
            gateway
                .write_single_coil(*address, *value)
                .await
                .with_context(|| format!("Cannot write coil {address}"))?;
            println!("Coil {address} set to {value} successfully.");
        }
        commandline::CliCommands::WriteMultipleCoils { address, values } => {
            info!("Executing: Write Multiple Coils {address} ({} values)", values.len());
            gateway
                .write_multiple_coils(*address, values)
                .await
                .with_context(|| format!("Cannot write {} coils at {address}", values.len()))?;
            println!("{} coils written starting at {address}.", values.len());
        }
        commandline::CliCommands::WriteSingleRegister { address, value } => {
            info!("Executing: Write Single Register {address} = {value}");
            gateway
                .write_single_register(*address, *value)
                .await
                .with_context(|| format!("Cannot write register {address}"))?;
            println!("Register {address} set to {value} successfully.");
        }
        commandline::CliCommands::WriteMultipleRegisters { address, values } => {
            info!(
                "Executing: Write Multiple Registers {address} ({} values)",
                values.len()
            );
            gateway
                .write_multiple_registers(*address, values)
                .await
                .with_context(|| format!("Cannot write {} registers at {address}", values.len()))?;
            println!("{} registers written starting at {address}.", values.len());
        }
        commandline::CliCommands::WriteBit {
            address,
            bit,
            value,
        } => {
            info!("Executing: Write Bit {bit} of register {address} = {value}");
            gateway
                .write_bit_in_register(*address, *bit, *value)
                .await
                .with_context(|| format!("Cannot write bit {bit} of register {address}"))?;
            println!("Bit {bit} of register {address} set to {value} successfully.");
        }
        commandline::CliCommands::Poll {
            address,
            quantity,
            poll_interval,
        } => {
            info!("Starting poll mode: {address}+{quantity}, interval={poll_interval:?}");
            loop {
                debug!("Poll: reading holding registers {address}+{quantity}");
                let registers = gateway
                    .read_holding_registers(*address, *quantity)
                    .await
                    .with_context(|| "Cannot read holding registers")?;
                print_registers(&registers);
                tokio::time::sleep(*poll_interval).await;
            }
        }
    }

    Ok(())
}
