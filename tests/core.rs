mod common;

use harpcore::{
    Timing,
    dispatch::ReceiveState,
    message::{MessageType, PayloadType, DEFAULT_PORT, HEADER_SIZE},
    registers::*,
    };
use common::*;


const ACTIVE: u8 = 0x01;
const DUMP: u8 = 0x08;
const MUTE: u8 = 0x10;
const ALIVE: u8 = 0x80;


#[test]
fn control_bits() {
    let control = OperationControl::from(ACTIVE | DUMP | MUTE | ALIVE);
    assert_eq!(control.mode(), OperationMode::Active);
    assert!(control.dump());
    assert!(control.mute_replies());
    assert!(!control.visual_indicators());
    assert!(!control.operation_led());
    assert!(control.alive());

    let reset = ResetControl::from(0x01);
    assert!(reset.restore_defaults());
    assert!(!reset.save());
}

#[test]
fn identity_registers() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &read(WHO_AM_I.address()));
    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert_eq!(reply.kind, MessageType::Read);
    assert_eq!(reply.address, 0);
    assert_eq!(reply.port, DEFAULT_PORT);
    assert_eq!(reply.payload_type, PayloadType::U16.with_timestamp());
    assert!(reply.timestamp.is_some());
    assert_eq!(reply.payload, 1216u16.to_le_bytes());

    let replies = exchange(&mut core, &read(DEVICE_NAME.address()));
    assert_eq!(&replies[0].payload[.. 13], b"harpcore-test");
    assert_eq!(replies[0].payload.len(), DEVICE_NAME_SIZE);

    assert_eq!(core.registers().get(SERIAL_NUMBER), 0x0bee);
    assert_eq!(core.registers().get(HARP_VERSION_L), 12);
    assert_eq!(core.registers().get(DEVICE_NAME).as_str(), Ok("harpcore-test"));
    assert_eq!(core.mode(), OperationMode::Standby);
}

#[test]
fn write_then_read() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(SERIAL_NUMBER.address(), PayloadType::U16, &[0x34, 0x12]));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::Write);
    assert_eq!(replies[0].payload, [0x34, 0x12]);

    let replies = exchange(&mut core, &read(SERIAL_NUMBER.address()));
    assert_eq!(replies[0].kind, MessageType::Read);
    assert_eq!(replies[0].payload, [0x34, 0x12]);

    let name = [b'x'; DEVICE_NAME_SIZE];
    let replies = exchange(&mut core, &write(DEVICE_NAME.address(), PayloadType::U8, &name));
    assert_eq!(replies[0].payload, name);
    assert_eq!(core.registers().get(DEVICE_NAME).as_bytes(), &name);
}

#[test]
fn read_only_write() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(WHO_AM_I.address(), PayloadType::U16, &[0, 0]));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::WriteError);
    assert_eq!(replies[0].payload, 1216u16.to_le_bytes());
    assert_eq!(core.registers().get(WHO_AM_I), 1216);

    // errors are not muted
    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[MUTE]));
    let replies = exchange(&mut core, &write(FW_VERSION_H.address(), PayloadType::U8, &[9]));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::WriteError);
    assert_eq!(replies[0].payload, [0]);
}

#[test]
fn muted_acknowledgements() {
    let clock = clock();
    let mut core = device(&clock, ());

    // the write enabling mute is already muted
    let replies = exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[MUTE]));
    assert!(replies.is_empty());
    assert!(core.control().mute_replies());

    let replies = exchange(&mut core, &write(CLOCK_CONFIG.address(), PayloadType::U8, &[3]));
    assert!(replies.is_empty());
    // reads are still answered
    let replies = exchange(&mut core, &read(CLOCK_CONFIG.address()));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].payload, [3]);
}

#[test]
fn short_write() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(SERIAL_NUMBER.address(), PayloadType::U8, &[7]));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::WriteError);
    assert_eq!(replies[0].payload, 0x0beeu16.to_le_bytes());
}

#[test]
fn batch_write() {
    let clock = clock();
    let mut core = device(&clock, ());

    // serial number, clock config and timestamp offset in one frame
    let replies = exchange(&mut core, &write(SERIAL_NUMBER.address(), PayloadType::U8, &[1, 2, 3, 4]));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].payload, [1, 2]);
    assert_eq!(core.registers().get(SERIAL_NUMBER), 0x0201);
    assert_eq!(u8::from(core.registers().get(CLOCK_CONFIG)), 3);
    assert_eq!(core.registers().get(TIMESTAMP_OFFSET), 4);
}

#[test]
fn dump() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE | DUMP]));
    assert_eq!(replies.len(), 1 + CORE_REG_COUNT);
    assert_eq!(replies[0].kind, MessageType::Write);
    assert_eq!(replies[0].address, OPERATION_CTRL.address());
    // the dump bit is never stored
    assert_eq!(replies[0].payload, [ACTIVE]);
    for (address, reply) in replies[1 ..].iter().enumerate() {
        assert_eq!(reply.kind, MessageType::Read);
        assert_eq!(usize::from(reply.address), address);
    }
    assert_eq!(replies[1 + usize::from(OPERATION_CTRL.address())].payload, [ACTIVE]);
    assert_eq!(core.mode(), OperationMode::Active);
    assert!(!core.control().dump());
}

#[test]
fn muted_dump() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[DUMP | MUTE]));
    assert_eq!(replies.len(), CORE_REG_COUNT);
    assert!(replies.iter().all(|reply| reply.kind == MessageType::Read));
}

#[test]
fn reset_defaults() {
    let clock = clock();
    let mut core = device(&clock, ());

    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE]));
    assert_eq!(core.mode(), OperationMode::Active);

    let replies = exchange(&mut core, &write(RESET_DEF.address(), PayloadType::U8, &[0x01]));
    assert!(replies.is_empty());
    assert_eq!(core.mode(), OperationMode::Standby);

    // persistence requests are acknowledged as plain writes
    let replies = exchange(&mut core, &write(RESET_DEF.address(), PayloadType::U8, &[0x04]));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::Write);
    assert_eq!(replies[0].payload, [0x04]);
}

#[test]
fn timestamp_read() {
    let clock = clock();
    clock.timer().set(5_000_064);
    let mut core = device(&clock, ());

    clock.timer().advance(1_000_000);
    let replies = exchange(&mut core, &read(TIMESTAMP_SECOND.address()));
    assert_eq!(replies[0].payload, 6u32.to_le_bytes());
    assert_eq!(replies[0].timestamp.map(|time| time.seconds()), Some(6));

    let replies = exchange(&mut core, &read(TIMESTAMP_MICRO.address()));
    assert_eq!(replies[0].payload, 2u16.to_le_bytes());
}

#[test]
fn timestamp_write() {
    let clock = clock();
    clock.timer().set(1_500_000);
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(TIMESTAMP_SECOND.address(), PayloadType::U32, &100u32.to_le_bytes()));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::Write);
    assert_eq!(replies[0].payload, 100u32.to_le_bytes());
    assert_eq!(clock.now().as_micros(), 100_500_000);
    assert_eq!(clock.local_us(), 1_500_000);

    let replies = exchange(&mut core, &write(TIMESTAMP_MICRO.address(), PayloadType::U16, &15_625u16.to_le_bytes()));
    assert_eq!(replies[0].kind, MessageType::Write);
    assert_eq!(replies[0].payload, 15_625u16.to_le_bytes());
    assert_eq!(clock.now().as_micros(), 100_500_000);

    let replies = exchange(&mut core, &write(TIMESTAMP_MICRO.address(), PayloadType::U16, &31_249u16.to_le_bytes()));
    assert_eq!(replies[0].kind, MessageType::Write);
    assert_eq!(clock.now().as_micros(), 100_999_968);
}

#[test]
fn timestamp_write_out_of_second() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(TIMESTAMP_MICRO.address(), PayloadType::U16, &31_250u16.to_le_bytes()));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::WriteError);
    assert_eq!(clock.offset_us(), 0);
}

#[test]
fn heartbeat() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE | ALIVE]));
    assert_eq!(replies.len(), 1);

    let mut run = |time: u64| {
        clock.timer().set(time);
        core.run();
        core.bus_mut().replies()
    };
    assert!(run(999_999).is_empty());
    let events = run(1_000_000);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, MessageType::Event);
    assert_eq!(events[0].address, TIMESTAMP_SECOND.address());
    assert_eq!(events[0].payload, 1u32.to_le_bytes());
    // at most once per interval
    assert!(run(1_000_000).is_empty());
    assert!(run(1_999_999).is_empty());
    assert_eq!(run(2_000_001).len(), 1);
    // a late loop does not burst
    assert_eq!(run(5_500_000).len(), 1);
    assert!(run(5_900_000).is_empty());
    assert_eq!(run(6_000_000).len(), 1);
}

#[test]
fn heartbeat_requires_alive_and_active() {
    let clock = clock();
    let mut core = device(&clock, ());

    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ALIVE]));
    clock.timer().set(3_000_000);
    core.run();
    assert!(core.bus_mut().replies().is_empty());

    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE]));
    clock.timer().set(6_000_000);
    core.run();
    assert!(core.bus_mut().replies().is_empty());
}

#[test]
fn heartbeat_enabled_while_active() {
    let clock = clock();
    let mut core = device(&clock, ());

    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE]));
    clock.timer().set(5_300_000);
    let replies = exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE | ALIVE]));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::Write);

    // first heartbeat waits for the next round interval
    clock.timer().set(5_999_999);
    core.run();
    assert!(core.bus_mut().replies().is_empty());
    clock.timer().set(6_000_000);
    core.run();
    let events = core.bus_mut().replies();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, MessageType::Event);

    // switching alive off and on again does not add a heartbeat
    clock.timer().set(6_400_000);
    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE]));
    let replies = exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE | ALIVE]));
    assert_eq!(replies.len(), 1);
    clock.timer().set(6_999_999);
    core.run();
    assert!(core.bus_mut().replies().is_empty());
    clock.timer().set(7_000_000);
    core.run();
    assert_eq!(core.bus_mut().replies().len(), 1);
}

#[test]
fn clock_config_bits() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &write(CLOCK_CONFIG.address(), PayloadType::U8, &[0x42]));
    assert_eq!(replies[0].payload, [0x42]);
    let config = core.registers().get(CLOCK_CONFIG);
    assert!(config.generator());
    assert!(config.unlock());
    assert!(!config.repeater());
    assert!(!config.lock());
    assert_eq!(ClockConfig::from(0x18).repeater_capable(), true);
    assert_eq!(ClockConfig::from(0x18).generator_capable(), true);
}

#[test]
fn custom_timing() {
    let clock = clock();
    let mut core = device(&clock, ()).with_timing(Timing {
        heartbeat_interval_us: 250_000,
        .. Timing::default()
    });
    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE | ALIVE | MUTE]));

    let mut events = 0;
    for step in 1 ..= 100 {
        clock.timer().set(step * 10_000);
        core.run();
        events += core.bus_mut().replies().len();
    }
    assert_eq!(events, 4);
}

#[test]
fn disconnection() {
    let clock = clock();
    let mut core = device(&clock, ());
    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE]));

    core.bus_mut().disconnected = true;
    core.run();
    clock.timer().advance(2_999_999);
    core.run();
    assert_eq!(core.mode(), OperationMode::Active);

    clock.timer().advance(1);
    core.run();
    assert_eq!(core.mode(), OperationMode::Standby);
    assert_eq!(core.registers().get(OPERATION_CTRL).mode(), OperationMode::Standby);
}

#[test]
fn short_disconnection() {
    let clock = clock();
    let mut core = device(&clock, ());
    exchange(&mut core, &write(OPERATION_CTRL.address(), PayloadType::U8, &[ACTIVE]));

    core.bus_mut().disconnected = true;
    core.run();
    clock.timer().advance(2_000_000);
    core.run();
    core.bus_mut().disconnected = false;
    core.run();
    core.bus_mut().disconnected = true;
    clock.timer().advance(2_000_000);
    core.run();
    assert_eq!(core.mode(), OperationMode::Active);
}

#[test]
fn out_of_range() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &read(20));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::ReadError);
    assert_eq!(replies[0].address, 20);
    assert!(replies[0].payload.is_empty());

    let replies = exchange(&mut core, &write(APP_REG_START, PayloadType::U8, &[1]));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::WriteError);
}

#[test]
fn corrupted_frames() {
    let clock = clock();
    let mut core = device(&clock, ());

    let mut corrupted = read(WHO_AM_I.address());
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0x55;
    let mut bytes = vec![0x00];
    bytes.extend_from_slice(&corrupted);
    bytes.extend_from_slice(&read(SERIAL_NUMBER.address()));

    let replies = exchange(&mut core, &bytes);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].address, SERIAL_NUMBER.address());
    assert_eq!(core.receive_state(), ReceiveState::Idle);
}

#[test]
fn retry_after_corrupted_payload() {
    let clock = clock();
    let mut core = device(&clock, ());

    // the host retries right after a frame damaged in transit, the retry is answered at once
    let mut corrupted = write(SERIAL_NUMBER.address(), PayloadType::U16, &[0x34, 0x12]);
    corrupted[HEADER_SIZE] ^= 0xff;
    let mut bytes = corrupted.to_vec();
    bytes.extend_from_slice(&write(SERIAL_NUMBER.address(), PayloadType::U16, &[0x34, 0x12]));

    let replies = exchange(&mut core, &bytes);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageType::Write);
    assert_eq!(replies[0].payload, [0x34, 0x12]);
    assert_eq!(core.registers().get(SERIAL_NUMBER), 0x1234);
    assert_eq!(core.receive_state(), ReceiveState::Idle);
}

#[test]
fn fragmented_arrival() {
    let clock = clock();
    let mut core = device(&clock, ());

    let frame = write(CLOCK_CONFIG.address(), PayloadType::U8, &[5]);
    core.bus_mut().feed(&frame[.. 3]);
    core.run();
    assert_eq!(core.receive_state(), ReceiveState::HeaderPending);
    core.bus_mut().feed(&frame[3 .. 6]);
    core.run();
    assert_eq!(core.receive_state(), ReceiveState::PayloadPending);
    assert!(core.bus_mut().replies().is_empty());

    core.bus_mut().feed(&frame[6 ..]);
    core.run();
    assert_eq!(core.receive_state(), ReceiveState::Idle);
    let replies = core.bus_mut().replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].payload, [5]);
}

#[test]
fn replies_in_request_order() {
    let clock = clock();
    let mut core = device(&clock, ());
    core.bus_mut().chunk = 4;

    let mut bytes = Vec::new();
    for address in [SERIAL_NUMBER.address(), WHO_AM_I.address(), 50, TIMESTAMP_SECOND.address()] {
        bytes.extend_from_slice(&read(address));
    }
    let replies = exchange(&mut core, &bytes);
    let order: Vec<_> = replies.iter().map(|reply| (reply.kind, reply.address)).collect();
    assert_eq!(order, [
        (MessageType::Read, 13),
        (MessageType::Read, 0),
        (MessageType::ReadError, 50),
        (MessageType::Read, 8),
        ]);
}

#[test]
fn host_events_are_ignored() {
    let clock = clock();
    let mut core = device(&clock, ());

    let replies = exchange(&mut core, &request(MessageType::Event, WHO_AM_I.address(), PayloadType::U8, &[]));
    assert!(replies.is_empty());
}
