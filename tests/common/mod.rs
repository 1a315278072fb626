#![allow(dead_code)]

use std::{
    cell::Cell,
    collections::VecDeque,
    convert::Infallible,
    };
use embedded_io::{ErrorType, Read, ReadReady, Write};

use harpcore::{
    Core, Transport, Clock, HarpTime, Monotonic,
    app::Application,
    message::{Message, MessageType, PayloadType, Frame, assemble, DEFAULT_PORT},
    registers::{Identity, Version, DeviceName},
    };


/// in-memory transport: the test pushes host bytes in `input` and collects device bytes from `output`
#[derive(Default)]
pub struct Loopback {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
    pub disconnected: bool,
    /// maximum number of bytes returned by one read, unlimited if zero
    pub chunk: usize,
}
impl Loopback {
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }
    /// parse and remove all frames sent by the device so far
    pub fn replies(&mut self) -> Vec<Reply> {
        let output = std::mem::take(&mut self.output);
        parse_all(&output)
    }
}
impl ErrorType for Loopback {
    type Error = Infallible;
}
impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut size = buf.len().min(self.input.len());
        if self.chunk != 0 {
            size = size.min(self.chunk);
        }
        for (dst, src) in buf.iter_mut().zip(self.input.drain(.. size)) {
            *dst = src;
        }
        Ok(size)
    }
}
impl ReadReady for Loopback {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.input.is_empty())
    }
}
impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
impl Transport for Loopback {
    fn connected(&mut self) -> bool {
        !self.disconnected
    }
}


/// microsecond counter advanced by hand
#[derive(Default)]
pub struct ManualTimer {
    now: Cell<u64>,
}
impl ManualTimer {
    pub fn new(now: u64) -> Self {
        Self {now: Cell::new(now)}
    }
    pub fn advance(&self, micros: u64) {
        self.now.set(self.now.get() + micros);
    }
    pub fn set(&self, micros: u64) {
        self.now.set(micros);
    }
}
impl Monotonic for ManualTimer {
    fn now_us(&self) -> u64 {self.now.get()}
}


/// owned copy of a frame sent by the device
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub kind: MessageType,
    pub address: u8,
    pub port: u8,
    pub payload_type: PayloadType,
    pub timestamp: Option<HarpTime>,
    pub payload: Vec<u8>,
}

pub fn parse_all(mut bytes: &[u8]) -> Vec<Reply> {
    let mut replies = Vec::new();
    while !bytes.is_empty() {
        let (message, size) = Message::parse(bytes)
            .expect("device sent an invalid frame")
            .expect("device sent an incomplete frame");
        replies.push(Reply {
            kind: message.kind(),
            address: message.address(),
            port: message.header.port,
            payload_type: message.header.payload_type,
            timestamp: message.timestamp,
            payload: message.payload.to_vec(),
        });
        bytes = &bytes[size ..];
    }
    replies
}

/// request as sent by a host, without timestamp
pub fn request(kind: MessageType, address: u8, payload_type: PayloadType, payload: &[u8]) -> Frame {
    assemble(kind, address, DEFAULT_PORT, payload_type, None, payload).unwrap()
}
pub fn read(address: u8) -> Frame {
    request(MessageType::Read, address, PayloadType::U8, &[])
}
pub fn write(address: u8, payload_type: PayloadType, payload: &[u8]) -> Frame {
    request(MessageType::Write, address, payload_type, payload)
}

/// send one request and run the device once, returns everything it replied
pub fn exchange<A: Application>(core: &mut Core<'_, Loopback, ManualTimer, A>, frame: &[u8]) -> Vec<Reply> {
    core.bus_mut().feed(frame);
    core.run();
    core.bus_mut().replies()
}

pub fn identity() -> Identity {
    Identity {
        who_am_i: 1216,
        hardware_version: Version::new(1, 2),
        assembly_version: 3,
        harp_version: Version::new(1, 12),
        firmware_version: Version::new(0, 4),
        serial_number: 0x0bee,
        name: DeviceName::try_from("harpcore-test").unwrap(),
    }
}

pub fn clock() -> Clock<ManualTimer> {
    Clock::new(ManualTimer::default())
}

pub fn device<'c, A: Application>(clock: &'c Clock<ManualTimer>, app: A) -> Core<'c, Loopback, ManualTimer, A> {
    init_logs();
    Core::new(Loopback::default(), clock, identity(), app)
}

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}
