use tickbus_codec::cobs;
use tickbus_core::sim::Bench;
use tickbus_probe::host::packet::PacketBridge;
use tickbus_probe::host::swd::{RESET, SwdBridge};
use tickbus_probe::swd::{Ack, Command, Controller, Reply, Response};
use tickbus_probe::target::swd::SwdTarget;
use tickbus_tests::{exchange, fast, idle};

fn bridge(timeout: u16) -> Bench<SwdBridge> {
    Bench::new(fast().timeout(timeout).build::<SwdBridge>().unwrap())
}

#[test]
fn fault_then_reset_then_data() {
    let mut target = SwdTarget::new();
    target.set_register(false, 0, 0x1234_5678);
    target.respond_with([Ack::Fault]);
    let mut bench = bridge(8);
    bench.source.extend([RESET, 0x02, RESET, 0x02]);
    let bytes = exchange(&mut bench, &mut target, 6);
    assert_eq!(bytes, vec![0x14, 0x01, 0x78, 0x56, 0x34, 0x12]);
    assert_eq!(target.line_resets(), 2);
    assert_eq!(
        target
            .answered()
            .iter()
            .map(|(_, ack)| *ack)
            .collect::<Vec<_>>(),
        vec![Ack::Fault, Ack::Ok]
    );
}

#[test]
fn fault_then_data_in_packets() {
    let mut target = SwdTarget::new();
    target.set_register(false, 0, 0x1234_5678);
    target.respond_with([Ack::Fault]);
    let mut bench = Bench::new(fast().timeout(8).build::<PacketBridge>().unwrap());
    for request in [[0x01, RESET, 0x02], [0x01, RESET, 0x02]] {
        bench.source.extend(cobs::encode(&request));
    }
    // 03 01 14 00, then 07 01 01 78 56 34 12 00
    let bytes = exchange(&mut bench, &mut target, 12);
    assert_eq!(
        cobs::decode(&bytes).unwrap(),
        vec![vec![0x01, 0x14], vec![0x01, 0x01, 0x78, 0x56, 0x34, 0x12]]
    );
    assert_eq!(target.line_resets(), 2);
}

#[test]
fn fault_without_reset_stays() {
    let mut target = SwdTarget::new();
    target.respond_with([Ack::Fault]);
    let mut bench = bridge(8);
    bench.source.extend([RESET, 0x02, 0x06, 0x02]);
    let bytes = exchange(&mut bench, &mut target, 3);
    assert_eq!(bytes, vec![0x14, 0x14, 0x14]);
}

#[test]
fn wait_is_retried_timeout_plus_one_times() {
    for timeout in [0, 1, 5] {
        let mut target = SwdTarget::new();
        target.set_default_ack(Ack::Wait);
        let mut bench = bridge(timeout);
        bench.source.extend([RESET, 0x02]);
        let bytes = exchange(&mut bench, &mut target, 1);
        assert_eq!(bytes, vec![0x12], "timeout {}", timeout);
        assert_eq!(target.headers(), u64::from(timeout) + 1, "timeout {}", timeout);
    }
}

#[test]
fn wait_then_ok_within_timeout() {
    let mut target = SwdTarget::new();
    target.set_register(true, 3, 0xa5a5_0f0f);
    target.respond_with([Ack::Wait; 3]);
    let mut bench = bridge(3);
    bench.source.extend([RESET, 0x0f]);
    let bytes = exchange(&mut bench, &mut target, 5);
    assert_eq!(bytes, vec![0x01, 0x0f, 0x0f, 0xa5, 0xa5]);
    assert_eq!(target.headers(), 4);
}

#[test]
fn replies_survive_a_stalled_host() {
    let mut target = SwdTarget::new();
    for addr in 0..4 {
        target.set_register(false, addr, 0x1000 + u32::from(addr));
    }
    let mut bench = Bench::new(fast().timeout(4).build::<Controller>().unwrap());
    bench.source.push(Command::Reset);
    bench
        .source
        .extend((0..4).map(|addr| Command::read(false, addr)));
    bench.sink.ready_every(97);
    let replies = exchange(&mut bench, &mut target, 4);
    let expected: Vec<_> = (0..4)
        .map(|addr| Reply {
            rsp: Response::Data,
            ack: Ack::Ok.bits(),
            data: 0x1000 + addr,
        })
        .collect();
    assert_eq!(replies, expected);
    assert_eq!(target.headers(), 4);
}

#[test]
fn idle_bridge_keeps_quiet() {
    let mut target = SwdTarget::new();
    let mut bench = bridge(8);
    idle(&mut bench, &mut target, 1_000);
    assert!(bench.sink.received().is_empty());
    assert!(bench.dut.is_idle());
    assert_eq!(target.headers(), 0);
}
