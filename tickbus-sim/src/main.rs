//! # tickbus
//!
//! Command line driver for the tickbus engines.
//!
//! The codec commands transform hex byte strings. The protocol commands build an engine from
//! the global options, connect it to a simulated target and print what the host would see.
mod input;
mod scenario;

use std::error::Error;

use clap::{Parser, Subcommand, ValueEnum};
use clap_num::maybe_hex;
use crc::{CRC_8_SMBUS, CRC_16_IBM_SDLC, CRC_32_ISO_HDLC, CRC_64_XZ, Crc};
use env_logger::Env;
use input::{Bytes, format_hex, parse_hex};
use tickbus_codec::checksum::{self, RunningCrc8, RunningCrc16, RunningCrc32, RunningCrc64};
use tickbus_codec::cobs;
use tickbus_core::pins::PinMap;
use tickbus_probe::config::Builder;
use tickbus_probe::host::mdio::{MdioBridge, header};
use tickbus_probe::host::packet::PacketBridge;
use tickbus_probe::host::swd::{self as swd_host, SwdBridge};
use tickbus_probe::i2c;
use tickbus_probe::jtag::{self, Command as JtagCommand, Sequencer};
use tickbus_probe::mdio::Transaction;
use tickbus_probe::swd::{self, Ack, Command as SwdCommand};
use tickbus_probe::target::{i2c::I2cTarget, jtag::JtagTap, mdio::MdioPhy, swd::SwdTarget};

/// Identification register of the simulated debug port.
const DEFAULT_DPIDR: u32 = 0x0bc1_1477;
/// Identifier of the simulated PHY.
const DEFAULT_PHY_ID: u32 = 0x0141_0cc2;

static CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Algorithm {
    Crc8,
    Crc16,
    Crc32,
    Crc64,
}

#[derive(Subcommand, Clone)]
enum CobsOp {
    /// Encode one packet, terminated by a zero byte
    Encode {
        #[arg(value_parser = parse_hex)]
        data: Bytes,
    },
    /// Decode zero terminated packets
    Decode {
        #[arg(value_parser = parse_hex)]
        data: Bytes,
    },
}

#[derive(Subcommand, Clone)]
enum CrcOp {
    /// Append the checksum, least significant byte first
    Append {
        #[arg(value_parser = parse_hex)]
        data: Bytes,
        #[arg(short, long, value_enum, default_value_t = Algorithm::Crc32)]
        algorithm: Algorithm,
    },
    /// Check the trailing checksum and print the payload
    Verify {
        #[arg(value_parser = parse_hex)]
        data: Bytes,
        #[arg(short, long, value_enum, default_value_t = Algorithm::Crc32)]
        algorithm: Algorithm,
    },
}

#[derive(Subcommand, Clone)]
enum SwdOp {
    /// Read a DP or AP register
    Read {
        #[arg(long, help = "Access the AP instead of the DP")]
        ap: bool,
        #[arg(value_parser = maybe_hex::<u8>, help = "Register address bits A[3:2]")]
        addr: u8,
        #[arg(long, default_value = "0", help = "Answer the first headers with WAIT")]
        waits: usize,
    },
    /// Write a DP or AP register
    Write {
        #[arg(long, help = "Access the AP instead of the DP")]
        ap: bool,
        #[arg(value_parser = maybe_hex::<u8>, help = "Register address bits A[3:2]")]
        addr: u8,
        #[arg(value_parser = maybe_hex::<u32>)]
        data: u32,
        #[arg(long, default_value = "0", help = "Answer the first headers with WAIT")]
        waits: usize,
    },
}

#[derive(Subcommand, Clone)]
enum I2cOp {
    /// Write bytes to the memory of a target
    Write {
        #[arg(value_parser = maybe_hex::<u8>)]
        address: u8,
        #[arg(value_parser = maybe_hex::<u8>)]
        offset: u8,
        #[arg(value_parser = parse_hex)]
        data: Bytes,
    },
    /// Read bytes from the memory of a target
    Read {
        #[arg(value_parser = maybe_hex::<u8>)]
        address: u8,
        #[arg(value_parser = maybe_hex::<u8>)]
        offset: u8,
        #[arg(value_parser = maybe_hex::<u16>)]
        count: u16,
    },
}

#[derive(Subcommand, Clone)]
enum MdioOp {
    Read {
        #[arg(value_parser = maybe_hex::<u8>)]
        phy: u8,
        #[arg(value_parser = maybe_hex::<u8>)]
        reg: u8,
    },
    Write {
        #[arg(value_parser = maybe_hex::<u8>)]
        phy: u8,
        #[arg(value_parser = maybe_hex::<u8>)]
        reg: u8,
        #[arg(value_parser = maybe_hex::<u16>)]
        data: u16,
    },
}

#[derive(Subcommand, Clone)]
enum JtagOp {
    /// Reset the TAP and read the IDCODE register
    Idcode {
        #[arg(long, default_value = "0x4ba00477", value_parser = maybe_hex::<u32>)]
        idcode: u32,
    },
}

#[derive(Subcommand, Clone)]
enum Cmd {
    /// COBS framing of hex bytes
    Cobs {
        #[clap(subcommand)]
        op: CobsOp,
    },
    /// CRC framing of hex bytes
    Crc {
        #[clap(subcommand)]
        op: CrcOp,
    },
    /// Print the clock divisor every engine derives
    Clock,
    /// Serial Wire Debug against a simulated debug port
    Swd {
        #[clap(subcommand)]
        op: SwdOp,
    },
    /// COBS framed SWD and management packets against a simulated debug port
    Packet {
        #[arg(value_parser = parse_hex, required = true)]
        packets: Vec<Bytes>,
    },
    /// I2C against a simulated memory at address 0x50
    I2c {
        #[arg(long, default_value = "0x50", value_parser = maybe_hex::<u8>)]
        target: u8,
        #[clap(subcommand)]
        op: I2cOp,
    },
    /// MDIO against a simulated PHY
    Mdio {
        #[arg(long, default_value = "1", value_parser = maybe_hex::<u8>)]
        target: u8,
        #[clap(subcommand)]
        op: MdioOp,
    },
    /// JTAG against a simulated TAP
    Jtag {
        #[clap(subcommand)]
        op: JtagOp,
    },
}

#[derive(Parser)]
#[command(about = "Tick accurate probe engines against simulated targets", long_about = None)]
struct Args {
    #[arg(long, default_value = "48000000", help = "Reference clock frequency in Hz")]
    sys_clk_hz: u32,

    #[arg(short, long, default_value = "1000000", help = "Line clock frequency in Hz")]
    frequency: u32,

    #[arg(short, long, default_value = "65535", help = "Retries of a WAIT acknowledgement")]
    timeout: u16,

    #[arg(long, help = "Pin assignment, e.g. swclk=A0,swdio=A1")]
    pins: Option<PinMap>,

    #[clap(subcommand)]
    command: Cmd,
}

impl Args {
    fn builder(&self) -> Builder {
        let builder = Builder::new()
            .sys_clk_hz(self.sys_clk_hz)
            .frequency(self.frequency)
            .timeout(self.timeout);
        match &self.pins {
            Some(pins) => builder.pins(pins.clone()),
            None => builder,
        }
    }
}

fn crc_append(algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>, Box<dyn Error>> {
    Ok(match algorithm {
        Algorithm::Crc8 => checksum::append(RunningCrc8::new(&CRC8), data)?,
        Algorithm::Crc16 => checksum::append(RunningCrc16::new(&CRC16), data)?,
        Algorithm::Crc32 => checksum::append(RunningCrc32::new(&CRC32), data)?,
        Algorithm::Crc64 => checksum::append(RunningCrc64::new(&CRC64), data)?,
    })
}

fn crc_verify(algorithm: Algorithm, data: &[u8]) -> Result<Option<Vec<u8>>, Box<dyn Error>> {
    Ok(match algorithm {
        Algorithm::Crc8 => checksum::verify(RunningCrc8::new(&CRC8), data)?,
        Algorithm::Crc16 => checksum::verify(RunningCrc16::new(&CRC16), data)?,
        Algorithm::Crc32 => checksum::verify(RunningCrc32::new(&CRC32), data)?,
        Algorithm::Crc64 => checksum::verify(RunningCrc64::new(&CRC64), data)?,
    })
}

fn clock(builder: Builder) -> Result<(), Box<dyn Error>> {
    let config = builder.config();
    for (name, ticks_per_cycle) in [
        ("swclk", swd::TICKS_PER_CYCLE),
        ("scl", i2c::TICKS_PER_CYCLE),
        ("mdc", tickbus_probe::mdio::TICKS_PER_CYCLE),
        ("tck", jtag::TICKS_PER_CYCLE),
    ] {
        let clock = config.clock(name, ticks_per_cycle)?;
        println!(
            "{:<5} divisor={:<5} frequency={} Hz (min {} Hz, max {} Hz)",
            name,
            clock.divisor(),
            clock.get_frequency(),
            clock.min_frequency(),
            clock.max_frequency()
        );
    }
    Ok(())
}

fn swd(builder: Builder, op: SwdOp) -> Result<(), Box<dyn Error>> {
    let (command, waits) = match op {
        SwdOp::Read { ap, addr, waits } => (SwdCommand::read(ap, addr), waits),
        SwdOp::Write {
            ap,
            addr,
            data,
            waits,
        } => (SwdCommand::write(ap, addr, data), waits),
    };
    let mut target = SwdTarget::new();
    target.set_register(false, 0, DEFAULT_DPIDR);
    target.respond_with(std::iter::repeat_n(Ack::Wait, waits));

    let mut request = vec![swd_host::RESET, swd_host::encode(&command)];
    if let SwdCommand::Transfer { header, data } = command
        && !header.r_nw
    {
        request.extend(data.to_le_bytes());
    }
    log::debug!("Host request {}", format_hex(&request));

    let bridge: SwdBridge = builder.build()?;
    let bytes = scenario::run(bridge, &mut target, request, |bench| {
        match bench.sink.received().first() {
            // a data response is followed by the word
            Some(byte) if byte & 0x30 == 0x00 => bench.sink.received().len() >= 5,
            Some(_) => true,
            None => false,
        }
    })?;
    log::info!(
        "Target saw {} headers and {} line resets",
        target.headers(),
        target.line_resets()
    );

    let status = bytes[0];
    let ack = match Ack::from_bits(status & 0b111) {
        Some(ack) => format!("{:?}", ack).to_uppercase(),
        None => format!("invalid ack {:03b}", status & 0b111),
    };
    match status & 0x30 {
        0x00 => {
            let word = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
            println!("{} {:#010x}", ack, word);
        }
        0x10 => println!("{}", ack),
        _ => println!("ERROR ({})", ack),
    }
    Ok(())
}

fn packet(builder: Builder, packets: Vec<Bytes>) -> Result<Vec<Vec<u8>>, Box<dyn Error>> {
    let mut target = SwdTarget::new();
    target.set_register(false, 0, DEFAULT_DPIDR);
    let request: Vec<u8> = packets
        .iter()
        .flat_map(|Bytes(packet)| cobs::encode(packet))
        .collect();
    log::debug!("Host request {}", format_hex(&request));

    let bridge: PacketBridge = builder.build()?;
    let bytes = scenario::run(bridge, &mut target, request, |bench| {
        bench.source.is_empty() && bench.dut.is_idle()
    })?;
    Ok(cobs::decode(&bytes)?)
}

fn i2c(builder: Builder, address: u8, op: I2cOp) -> Result<(), Box<dyn Error>> {
    let mut target = I2cTarget::new(address);
    for (offset, byte) in target.memory_mut().iter_mut().enumerate() {
        *byte = offset as u8;
    }
    let controller: i2c::Controller = builder.build()?;
    match op {
        I2cOp::Write {
            address,
            offset,
            data: Bytes(data),
        } => {
            let count = u16::try_from(data.len() + 2)?;
            let mut request = vec![0x00, 0x02];
            request.extend(count.to_le_bytes());
            request.extend([address << 1, offset]);
            request.extend(&data);
            request.push(0x01);
            let bytes = scenario::run(controller, &mut target, request, scenario::answers(4))?;
            let unacked = u16::from_le_bytes([bytes[1], bytes[2]]);
            println!(
                "{} of {} bytes acknowledged",
                count.saturating_sub(unacked),
                count
            );
        }
        I2cOp::Read {
            address,
            offset,
            count,
        } => {
            let mut request = vec![0x00, 0x02, 0x02, 0x00, address << 1, offset];
            request.extend([0x00, 0x02, 0x01, 0x00, address << 1 | 1]);
            request.push(0x03);
            request.extend(count.to_le_bytes());
            request.push(0x01);
            let expected = 7 + usize::from(count);
            let bytes =
                scenario::run(controller, &mut target, request, scenario::answers(expected))?;
            if bytes[1..3] != [0, 0] || bytes[4..6] != [0, 0] {
                log::warn!("Address {:#04x} was not acknowledged", address);
            }
            println!("{}", format_hex(&bytes[6..6 + usize::from(count)]));
        }
    }
    log::info!("Target saw {} starts and {} stops", target.starts(), target.stops());
    Ok(())
}

fn mdio(builder: Builder, address: u8, op: MdioOp) -> Result<(), Box<dyn Error>> {
    let mut target = MdioPhy::new(address).with_id(DEFAULT_PHY_ID);
    let bridge: MdioBridge = builder.build()?;
    match op {
        MdioOp::Read { phy, reg } => {
            let request = header(&Transaction::read(phy, reg)).to_le_bytes();
            let bytes = scenario::run(bridge, &mut target, request, scenario::answers(2))?;
            println!("{:#06x}", u16::from_le_bytes([bytes[0], bytes[1]]));
        }
        MdioOp::Write { phy, reg, data } => {
            let mut request = header(&Transaction::write(phy, reg, data))
                .to_le_bytes()
                .to_vec();
            request.extend(data.to_le_bytes());
            scenario::run(bridge, &mut target, request, |bench| {
                bench.source.is_empty() && bench.dut.is_idle()
            })?;
            println!("ok");
        }
    }
    log::info!(
        "PHY saw {} reads and {} writes",
        target.reads(),
        target.writes()
    );
    Ok(())
}

fn jtag(builder: Builder, op: JtagOp) -> Result<(), Box<dyn Error>> {
    let JtagOp::Idcode { idcode } = op;
    let mut target = JtagTap::new(idcode);
    let sequencer: Sequencer = builder.build()?;
    let words = scenario::run(
        sequencer,
        &mut target,
        [
            JtagCommand::Reset,
            JtagCommand::GetDr {
                size: 32,
                data: u32::MAX,
            },
        ],
        scenario::answers(1),
    )?;
    println!("{:#010x}", words[0]);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!(
        "Parsed arguments: sys_clk_hz={}, frequency={}, timeout={}",
        args.sys_clk_hz,
        args.frequency,
        args.timeout
    );
    let builder = args.builder();

    match args.command {
        Cmd::Cobs {
            op: CobsOp::Encode { data },
        } => println!("{}", format_hex(&cobs::encode(&data.0))),
        Cmd::Cobs {
            op: CobsOp::Decode { data },
        } => {
            for packet in cobs::decode(&data.0)? {
                println!("{}", format_hex(&packet));
            }
        }
        Cmd::Crc {
            op: CrcOp::Append { data, algorithm },
        } => println!("{}", format_hex(&crc_append(algorithm, &data.0)?)),
        Cmd::Crc {
            op: CrcOp::Verify { data, algorithm },
        } => match crc_verify(algorithm, &data.0)? {
            Some(payload) => println!("match {}", format_hex(&payload)),
            None => println!("mismatch"),
        },
        Cmd::Clock => clock(builder)?,
        Cmd::Swd { op } => {
            log::info!("Running SWD at {} Hz", args.frequency);
            swd(builder, op)?
        }
        Cmd::Packet { packets } => {
            for response in packet(builder, packets)? {
                println!("{}", format_hex(&response));
            }
        }
        Cmd::I2c { target, op } => i2c(builder, target, op)?,
        Cmd::Mdio { target, op } => mdio(builder, target, op)?,
        Cmd::Jtag { op } => jtag(builder, op)?,
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn global_options_reach_the_builder() {
        let args = Args::try_parse_from([
            "tickbus",
            "--frequency",
            "4000000",
            "--timeout",
            "3",
            "--pins",
            "swclk=A0,swdio=A1",
            "swd",
            "read",
            "0x1",
        ])
        .unwrap();
        let config = args.builder().config();
        assert_eq!(config.frequency, 4_000_000);
        assert_eq!(config.timeout, 3);
        assert_eq!(config.pins.map(|pins| pins.len()), Some(2));
        assert!(matches!(
            args.command,
            Cmd::Swd {
                op: SwdOp::Read {
                    ap: false,
                    addr: 1,
                    waits: 0
                }
            }
        ));
    }

    #[test]
    fn hex_arguments() {
        let args = Args::try_parse_from(["tickbus", "cobs", "encode", "01 00 02 03"]).unwrap();
        assert!(matches!(
            args.command,
            Cmd::Cobs {
                op: CobsOp::Encode { data }
            } if data.0 == vec![0x01, 0x00, 0x02, 0x03]
        ));
        assert!(Args::try_parse_from(["tickbus", "cobs", "decode", "0"]).is_err());
    }

    #[test]
    fn crc_commands_round_trip() {
        for algorithm in [
            Algorithm::Crc8,
            Algorithm::Crc16,
            Algorithm::Crc32,
            Algorithm::Crc64,
        ] {
            let framed = crc_append(algorithm, b"tickbus").unwrap();
            assert_eq!(
                crc_verify(algorithm, &framed).unwrap(),
                Some(b"tickbus".to_vec())
            );
        }
    }

    #[test]
    fn every_protocol_command_completes() {
        let builder = || Builder::new().frequency(4_000_000);
        swd(
            builder(),
            SwdOp::Read {
                ap: false,
                addr: 0,
                waits: 2,
            },
        )
        .unwrap();
        i2c(
            builder(),
            0x50,
            I2cOp::Read {
                address: 0x50,
                offset: 0x10,
                count: 4,
            },
        )
        .unwrap();
        mdio(
            builder(),
            1,
            MdioOp::Write {
                phy: 1,
                reg: 0,
                data: 0x1140,
            },
        )
        .unwrap();
        jtag(builder(), JtagOp::Idcode { idcode: 0x1234_5677 }).unwrap();
    }

    #[test]
    fn packets_are_answered_in_order() {
        let args =
            Args::try_parse_from(["tickbus", "-f", "12000000", "packet", "0000", "01 40 02"])
                .unwrap();
        let builder = args.builder();
        let Cmd::Packet { packets } = args.command else {
            panic!("expected a packet command");
        };
        let responses = packet(builder, packets).unwrap();
        let mut identify = vec![0x00];
        identify.extend(b"tickbus,v00");
        // OK acknowledgement, then DPIDR least significant byte first
        let mut dpidr = vec![0x01, 0x01];
        dpidr.extend(DEFAULT_DPIDR.to_le_bytes());
        assert_eq!(responses, vec![identify, dpidr]);
    }
}
