use tickbus_core::sim::Bench;
use tickbus_probe::config::Builder;
use tickbus_probe::host::mdio::{MdioBridge, header};
use tickbus_probe::i2c::Controller;
use tickbus_probe::jtag::{Command, Sequencer};
use tickbus_probe::mdio::Transaction;
use tickbus_probe::target::i2c::I2cTarget;
use tickbus_probe::target::jtag::{IDCODE, JtagTap, USER};
use tickbus_probe::target::mdio::MdioPhy;
use tickbus_tests::{exchange, fast};

fn i2c_write(address: u8, offset: u8, data: &[u8]) -> Vec<u8> {
    let count = u16::try_from(data.len() + 2).unwrap();
    let mut bytes = vec![0x00, 0x02];
    bytes.extend(count.to_le_bytes());
    bytes.extend([address << 1, offset]);
    bytes.extend(data);
    bytes.push(0x01);
    bytes
}

fn i2c_read(address: u8, offset: u8, count: u16) -> Vec<u8> {
    let mut bytes = vec![0x00, 0x02, 0x02, 0x00, address << 1, offset];
    bytes.extend([0x00, 0x02, 0x01, 0x00, address << 1 | 1, 0x03]);
    bytes.extend(count.to_le_bytes());
    bytes.push(0x01);
    bytes
}

#[test]
fn eeprom_pointer_wraps() {
    let mut target = I2cTarget::new(0x50);
    let mut bench = Bench::new(
        Builder::new()
            .frequency(4_000_000)
            .build::<Controller>()
            .unwrap(),
    );
    let data = [0x10, 0x20, 0x30, 0x40, 0x50, 0x60];
    bench.source.extend(i2c_write(0x50, 0xfc, &data));
    assert_eq!(exchange(&mut bench, &mut target, 4), vec![0x00; 4]);
    assert_eq!(target.memory()[0xff], 0x40);
    assert_eq!(target.memory()[0x00], 0x50);

    bench.source.extend(i2c_read(0x50, 0xfc, 6));
    bench.sink.ready_every(25);
    let answers = exchange(&mut bench, &mut target, 13);
    assert_eq!(answers[..6], [0x00; 6]);
    assert_eq!(answers[6..12], data);
    assert_eq!(answers[12], 0x00);
    assert_eq!(target.starts(), 3);
    assert_eq!(target.stops(), 2);
}

#[test]
fn missing_device_reads_released_lines() {
    let mut target = I2cTarget::new(0x50);
    let mut bench = Bench::new(
        Builder::new()
            .frequency(4_000_000)
            .build::<Controller>()
            .unwrap(),
    );
    bench.source.extend(i2c_read(0x51, 0x00, 2));
    let answers = exchange(&mut bench, &mut target, 9);
    // both address bytes are refused, the rest of the pointer write is drained
    assert_eq!(answers, vec![0x00, 0x02, 0x00, 0x00, 0x01, 0x00, 0xff, 0xff, 0x00]);
}

#[test]
fn phy_registers_through_host_bytes() {
    let mut phy = MdioPhy::new(5).with_id(0x0022_1622);
    let mut bench = Bench::new(
        Builder::new()
            .frequency(2_000_000)
            .build::<MdioBridge>()
            .unwrap(),
    );
    let mut bytes = Vec::new();
    for transaction in [
        Transaction::read(5, 2),
        Transaction::read(5, 3),
        Transaction::write(5, 4, 0x01e1),
        Transaction::read(5, 4),
        Transaction::read(6, 4),
    ] {
        bytes.extend(header(&transaction).to_le_bytes());
        if transaction.write {
            bytes.extend(transaction.data.to_le_bytes());
        }
    }
    bench.source.extend(bytes);
    let answers = exchange(&mut bench, &mut phy, 8);
    assert_eq!(
        answers,
        vec![0x22, 0x00, 0x22, 0x16, 0xe1, 0x01, 0xff, 0xff]
    );
    assert_eq!(phy.register(4), 0x01e1);
    assert_eq!(phy.reads(), 3);
    assert_eq!(phy.writes(), 1);
}

#[test]
fn tap_identification_and_user_register() {
    let mut tap = JtagTap::new(0x4ba0_0477);
    let mut bench = Bench::new(fast().build::<Sequencer>().unwrap());
    bench.source.extend([
        Command::Reset,
        Command::GetDr {
            size: 32,
            data: u32::MAX,
        },
        Command::SetIr {
            size: 4,
            data: u32::from(USER),
        },
        Command::GetDr {
            size: 32,
            data: 0x1111_2222,
        },
        Command::GetDr {
            size: 32,
            data: 0x3333_4444,
        },
        Command::RunTest { cycles: 4 },
        Command::SetIr {
            size: 4,
            data: u32::from(IDCODE),
        },
        Command::GetDr { size: 32, data: 0 },
    ]);
    bench.sink.ready_every(50);
    let words = exchange(&mut bench, &mut tap, 4);
    assert_eq!(words, vec![0x4ba0_0477, 0, 0x1111_2222, 0x4ba0_0477]);
    assert_eq!(tap.user(), 0x3333_4444);
    assert_eq!(tap.ir(), IDCODE);
}
