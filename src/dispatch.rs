/*!
    the harp device core

    [Core] owns the core registers and the sending half of the transport, it buffers incoming bytes, cuts them into frames, routes every request to its register handler and runs the operation state machine (mode changes, heartbeat, disconnection).

    It never blocks: [Core::run] is meant to be called in a tight loop or once per scheduler tick, and only processes what already arrived.
*/

use embedded_io::{Read, ReadReady, Write};
use log::*;

use crate::{
    app::Application,
    bank::{RegisterBank, Origin},
    clock::{Clock, Monotonic, TICKS_PER_SECOND, MICROS_PER_SECOND},
    message::{Message, MessageType, PayloadType, Header, Frame, FrameError, MAX_FRAME},
    registers::*,
    reply::{Output, Replier, read_generic, write_generic, write_read_only, refuse_write},
    };


/**
    byte stream to the host, typically an usb-cdc or uart port

    reads must not block: the core only reads when [ReadReady::read_ready] reports available bytes
*/
pub trait Transport: Read + ReadReady + Write {
    /// whether a host is currently attached, devices with no way to tell always report `true`
    fn connected(&mut self) -> bool {true}
}

/// periods of the operation state machine
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// period of the heartbeat events while active
    pub heartbeat_interval_us: u64,
    /// continuous disconnection after which the device falls back to standby
    pub disconnect_timeout_us: u64,
}
impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_interval_us: MICROS_PER_SECOND,
            disconnect_timeout_us: 3 * MICROS_PER_SECOND,
        }
    }
}

/// progress of the frame being received
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReceiveState {
    /// nothing buffered
    Idle,
    /// some bytes arrived but not a complete header
    HeaderPending,
    /// header received, waiting for the rest of the frame
    PayloadPending,
    /// a complete frame is buffered and will be dispatched
    Ready,
}


/// storage of the core registers
pub type CoreRegisters = RegisterBank<CORE_MEMORY, CORE_REG_COUNT>;

#[derive(Copy, Clone, Debug)]
enum ReadHandler {
    Generic,
    /// refresh from the clock before reading
    Timestamp,
}
#[derive(Copy, Clone, Debug)]
enum WriteHandler {
    Generic,
    ReadOnly,
    TimestampSecond,
    TimestampMicro,
    OperationControl,
    ResetDefault,
}

/// handlers of the core registers, indexed by address
const CORE_HANDLERS: [(ReadHandler, WriteHandler); CORE_REG_COUNT] = [
    (ReadHandler::Generic, WriteHandler::ReadOnly),
    (ReadHandler::Generic, WriteHandler::ReadOnly),
    (ReadHandler::Generic, WriteHandler::ReadOnly),
    (ReadHandler::Generic, WriteHandler::ReadOnly),
    (ReadHandler::Generic, WriteHandler::ReadOnly),
    (ReadHandler::Generic, WriteHandler::ReadOnly),
    (ReadHandler::Generic, WriteHandler::ReadOnly),
    (ReadHandler::Generic, WriteHandler::ReadOnly),
    (ReadHandler::Timestamp, WriteHandler::TimestampSecond),
    (ReadHandler::Timestamp, WriteHandler::TimestampMicro),
    (ReadHandler::Generic, WriteHandler::OperationControl),
    (ReadHandler::Generic, WriteHandler::ResetDefault),
    (ReadHandler::Generic, WriteHandler::Generic),
    (ReadHandler::Generic, WriteHandler::Generic),
    (ReadHandler::Generic, WriteHandler::Generic),
    (ReadHandler::Generic, WriteHandler::Generic),
    ];


/**
    harp device, answering the host on transport `B`, timestamping with a clock driven by `M` and extended by application `A`
*/
pub struct Core<'c, B, M, A> {
    registers: CoreRegisters,
    output: Output<'c, B, M>,
    app: A,
    timing: Timing,
    receive: [u8; MAX_FRAME],
    received: usize,
    /// local time of the next heartbeat
    next_heartbeat: u64,
    /// local time the transport was first reported disconnected
    disconnected_since: Option<u64>,
}

impl<'c, B: Transport, M: Monotonic, A: Application> Core<'c, B, M, A> {
    /// create a device in standby mode
    pub fn new(bus: B, clock: &'c Clock<M>, identity: Identity, app: A) -> Self {
        let mut registers = CoreRegisters::new(Origin::Core, 0, CORE_LAYOUT);
        registers.set(WHO_AM_I, identity.who_am_i);
        registers.set(HW_VERSION_H, identity.hardware_version.major);
        registers.set(HW_VERSION_L, identity.hardware_version.minor);
        registers.set(ASSEMBLY_VERSION, identity.assembly_version);
        registers.set(HARP_VERSION_H, identity.harp_version.major);
        registers.set(HARP_VERSION_L, identity.harp_version.minor);
        registers.set(FW_VERSION_H, identity.firmware_version.major);
        registers.set(FW_VERSION_L, identity.firmware_version.minor);
        registers.set(SERIAL_NUMBER, identity.serial_number);
        registers.set(DEVICE_NAME, identity.name);

        let mut core = Self {
            registers,
            output: Output {
                bus,
                clock,
                control: OperationControl::default(),
                losses: 0,
            },
            app,
            timing: Timing::default(),
            receive: [0; MAX_FRAME],
            received: 0,
            next_heartbeat: 0,
            disconnected_since: None,
        };
        core.set_control(OperationControl::default());
        core.refresh_timestamp();
        info!("device {:?} ({}) ready", identity.name, identity.who_am_i);
        core
    }
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
    pub fn timing(&self) -> Timing {self.timing}
    pub fn registers(&self) -> &CoreRegisters {&self.registers}
    pub fn app(&self) -> &A {&self.app}
    pub fn app_mut(&mut self) -> &mut A {&mut self.app}
    pub fn bus(&self) -> &B {&self.output.bus}
    pub fn bus_mut(&mut self) -> &mut B {&mut self.output.bus}
    pub fn clock(&self) -> &'c Clock<M> {self.output.clock}
    /// emit messages outside of a request, typically application events
    pub fn replier(&mut self) -> &mut dyn Replier {&mut self.output}
    /// current content of the operation control register
    pub fn control(&self) -> OperationControl {self.output.control}
    pub fn mode(&self) -> OperationMode {self.output.control.mode()}
    /// number of messages that could not be sent or received because of transport failures
    pub fn losses(&self) -> u32 {self.output.losses}

    /// progress of the frame currently buffered
    pub fn receive_state(&self) -> ReceiveState {
        let pending = &self.receive[.. self.received];
        match Header::parse(pending) {
            None if pending.is_empty() => ReceiveState::Idle,
            None => ReceiveState::HeaderPending,
            Some(header) if pending.len() < header.frame_length() => ReceiveState::PayloadPending,
            Some(_) => ReceiveState::Ready,
        }
    }

    /**
        process everything that arrived since the last call, then update the operation state and the application

        replies are sent in the order requests arrived
    */
    pub fn run(&mut self) {
        self.receive();
        while let Some(frame) = self.take_frame() {
            self.dispatch(&frame);
        }
        self.update_state();
        self.app.update(&mut self.output);
    }

    /// move available transport bytes to the receive buffer, without blocking
    fn receive(&mut self) {
        while self.received < self.receive.len() {
            match self.output.bus.read_ready() {
                Ok(true) => {},
                Ok(false) => break,
                Err(err) => {
                    warn!("failed to poll transport: {:?}", err);
                    self.output.losses = self.output.losses.saturating_add(1);
                    break
                },
            }
            match self.output.bus.read(&mut self.receive[self.received ..]) {
                Ok(0) => break,
                Ok(size) => self.received += size,
                Err(err) => {
                    warn!("failed to receive: {:?}", err);
                    self.output.losses = self.output.losses.saturating_add(1);
                    break
                },
            }
        }
    }
    /// extract the next complete and valid frame, dropping invalid bytes until one is found
    fn take_frame(&mut self) -> Option<Frame> {
        loop {
            let parsed = Message::parse(&self.receive[.. self.received])
                .map(|parsed| parsed.map(|(_, size)| size));
            match parsed {
                Ok(None) => return None,
                Ok(Some(size)) => {
                    let frame = Frame::from_slice(&self.receive[.. size]).ok();
                    self.consume(size);
                    return frame;
                },
                Err(err) => {
                    // a bad checksum discards the announced frame, a bad header only its first byte
                    let skip = match err {
                        FrameError::Checksum {..} => Header::parse(&self.receive[.. self.received])
                            .map_or(1, |header| header.frame_length()),
                        _ => 1,
                    };
                    warn!("dropping {} received bytes: {}", skip, err);
                    self.consume(skip);
                },
            }
        }
    }
    fn consume(&mut self, size: usize) {
        self.receive.copy_within(size .. self.received, 0);
        self.received -= size;
    }

    fn dispatch(&mut self, frame: &[u8]) {
        let Ok(Some((message, _))) = Message::parse(frame)
            else {return};
        debug!("receive {:?} for register {}", message.kind(), message.address());
        let address = message.address();
        let error = match message.kind() {
            MessageType::Read => MessageType::ReadError,
            MessageType::Write => MessageType::WriteError,
            kind => {
                warn!("ignoring {:?} message from host", kind);
                return
            },
        };
        if let Ok(index) = self.registers.position(address) {
            let (read, write) = CORE_HANDLERS[index];
            match message.kind() {
                MessageType::Write => self.write_core(write, &message),
                _ => self.read_core(read, address),
            }
        }
        else if self.app.contains(address) {
            self.app.handle(&message, &mut self.output);
        }
        else {
            warn!("no register at address {}", address);
            self.output.reply(error, address, &[], PayloadType::U8);
        }
    }

    fn read_core(&mut self, handler: ReadHandler, address: u8) {
        if let ReadHandler::Timestamp = handler {
            self.refresh_timestamp();
        }
        read_generic(&mut self.registers, address, &mut self.output);
    }
    fn write_core(&mut self, handler: WriteHandler, message: &Message<'_>) {
        match handler {
            WriteHandler::Generic => write_generic(&mut self.registers, message, &mut self.output),
            WriteHandler::ReadOnly => write_read_only(&mut self.registers, message, &mut self.output),
            WriteHandler::TimestampSecond => self.write_timestamp_second(message),
            WriteHandler::TimestampMicro => self.write_timestamp_micro(message),
            WriteHandler::OperationControl => self.write_operation_control(message),
            WriteHandler::ResetDefault => self.write_reset_default(message),
        }
    }

    fn write_timestamp_second(&mut self, message: &Message<'_>) {
        let Some(&seconds) = message.payload.first_chunk::<4>()
            else {return self.refuse(message)};
        let time = self.output.clock.set_seconds(u32::from_le_bytes(seconds));
        info!("harp time set to {} s", time.seconds());
        self.refresh_timestamp();
        self.acknowledge(message.address());
    }
    fn write_timestamp_micro(&mut self, message: &Message<'_>) {
        let Some(&ticks) = message.payload.first_chunk::<2>()
            else {return self.refuse(message)};
        let ticks = u16::from_le_bytes(ticks);
        if ticks >= TICKS_PER_SECOND {
            warn!("{} ticks exceed one second", ticks);
            return self.refuse(message);
        }
        self.output.clock.set_ticks(ticks);
        self.refresh_timestamp();
        self.acknowledge(message.address());
    }
    fn write_operation_control(&mut self, message: &Message<'_>) {
        let Some(&raw) = message.payload.first()
            else {return self.refuse(message)};
        let mut control = OperationControl::from(raw);
        let dump = control.dump();
        control.set_dump(false);
        self.set_control(control);
        self.acknowledge(message.address());
        if dump {
            self.dump();
        }
    }
    fn write_reset_default(&mut self, message: &Message<'_>) {
        let Some(&raw) = message.payload.first()
            else {return self.refuse(message)};
        let reset = ResetControl::from(raw);
        if reset.restore_defaults() {
            info!("restoring default registers");
            let mut control = self.output.control;
            control.set_mode(OperationMode::Standby);
            self.set_control(control);
            self.app.reset();
        }
        else {
            if reset.restore_eeprom() || reset.save() || reset.boot_defaults() || reset.boot_eeprom() {
                debug!("no persistent storage, ignoring {:?}", reset);
            }
            write_generic(&mut self.registers, message, &mut self.output);
        }
    }
    fn refuse(&mut self, message: &Message<'_>) {
        warn!("malformed write on register {}", message.address());
        refuse_write(&self.registers, message.address(), &mut self.output);
    }
    /// acknowledge a write with the register's new value, unless replies are muted
    fn acknowledge(&mut self, address: u8) {
        if self.output.muted()
            {return}
        if let Ok((value, ty)) = self.registers.read(address) {
            self.output.reply(MessageType::Write, address, value, ty);
        }
    }

    /// send the value of every core register, then of every application register
    fn dump(&mut self) {
        debug!("dump registers");
        for (address, &(read, _)) in (0 ..).zip(CORE_HANDLERS.iter()) {
            self.read_core(read, address);
        }
        self.app.dump(&mut self.output);
    }

    /// store a new operation control, applying mode transitions
    fn set_control(&mut self, control: OperationControl) {
        let previous = self.output.control;
        self.registers.set(OPERATION_CTRL, control);
        self.output.control = control;
        if control.mode() != previous.mode() {
            info!("operation mode {:?} -> {:?}", previous.mode(), control.mode());
        }
        // the first heartbeat comes one round interval after heartbeats get enabled
        if beating(control) && !beating(previous) {
            self.schedule_heartbeat();
        }
        self.app.set_visual_indicators(control.visual_indicators());
    }
    /// next heartbeat happens at the next round multiple of the interval in local time
    fn schedule_heartbeat(&mut self) {
        let interval = self.timing.heartbeat_interval_us.max(1);
        let now = self.output.clock.local_us();
        self.next_heartbeat = (now / interval).saturating_add(1).saturating_mul(interval);
    }
    fn refresh_timestamp(&mut self) {
        let now = self.output.clock.now();
        self.registers.set(TIMESTAMP_SECOND, now.seconds());
        self.registers.set(TIMESTAMP_MICRO, now.ticks());
    }

    fn update_state(&mut self) {
        let now = self.output.clock.local_us();
        if self.output.bus.connected() {
            self.disconnected_since = None;
        }
        else {
            let since = *self.disconnected_since.get_or_insert(now);
            if now.saturating_sub(since) >= self.timing.disconnect_timeout_us
            && self.output.control.mode() != OperationMode::Standby
            {
                warn!("host disconnected for {} us, falling back to standby", now - since);
                let mut control = self.output.control;
                control.set_mode(OperationMode::Standby);
                self.set_control(control);
            }
        }

        if beating(self.output.control) && now >= self.next_heartbeat {
            self.refresh_timestamp();
            let address = TIMESTAMP_SECOND.address();
            if let Ok((value, ty)) = self.registers.read(address) {
                self.output.reply(MessageType::Event, address, value, ty);
            }
            self.schedule_heartbeat();
        }
    }
}

/// heartbeat events are sent in this operation state
fn beating(control: OperationControl) -> bool {
    control.mode() == OperationMode::Active && control.alive()
}
