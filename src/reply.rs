/*!
    emission of device messages

    register handlers, from the core or from the application, never touch the transport directly: they emit through a [Replier] which timestamps and serializes each frame.
*/

use embedded_io::Write;
use log::*;

use crate::{
    bank::RegisterBank,
    clock::{Clock, HarpTime, Monotonic},
    message::{Message, MessageType, PayloadType, assemble_reply},
    registers::{OperationControl, OperationMode},
    };


/// capability to send timestamped messages to the host
pub trait Replier {
    /// send a message for the given register, timestamped with the current harp time
    fn reply(&mut self, kind: MessageType, address: u8, payload: &[u8], payload_type: PayloadType);
    /// write acknowledgements must not be sent
    fn muted(&self) -> bool;
    /// the device is active, events may be sent
    fn events_enabled(&self) -> bool;
    /// current harp time
    fn now(&self) -> HarpTime;
}


/// generic read handler: reply with the current value of the register
pub fn read_generic<const MEM: usize, const COUNT: usize>(
        bank: &mut RegisterBank<MEM, COUNT>,
        address: u8,
        replier: &mut dyn Replier,
    )
{
    match bank.read(address) {
        Ok((value, ty)) => replier.reply(MessageType::Read, address, value, ty),
        Err(err) => {
            warn!("refused read: {}", err);
            replier.reply(MessageType::ReadError, address, &[], PayloadType::U8);
        },
    }
}

/**
    generic write handler: store the payload and acknowledge with the new value of the register

    a payload longer than the register continues into the following registers
*/
pub fn write_generic<const MEM: usize, const COUNT: usize>(
        bank: &mut RegisterBank<MEM, COUNT>,
        message: &Message<'_>,
        replier: &mut dyn Replier,
    )
{
    let address = message.address();
    match bank.write(address, message.payload) {
        Ok(written) => {
            if written < message.payload.len() {
                warn!("dropped {} bytes written past register {}", message.payload.len() - written, address);
            }
            if !replier.muted() {
                if let Ok((value, ty)) = bank.read(address) {
                    replier.reply(MessageType::Write, address, value, ty);
                }
            }
        },
        Err(err) => {
            warn!("refused write: {}", err);
            refuse_write(bank, address, replier);
        },
    }
}

/// write handler for read-only registers: reply with an error and the unchanged value
pub fn write_read_only<const MEM: usize, const COUNT: usize>(
        bank: &mut RegisterBank<MEM, COUNT>,
        message: &Message<'_>,
        replier: &mut dyn Replier,
    )
{
    debug!("register {} is read-only", message.address());
    refuse_write(bank, message.address(), replier);
}

/// reply with a write error carrying the current value of the register, error replies are never muted
pub fn refuse_write<const MEM: usize, const COUNT: usize>(
        bank: &RegisterBank<MEM, COUNT>,
        address: u8,
        replier: &mut dyn Replier,
    )
{
    match bank.read(address) {
        Ok((value, ty)) => replier.reply(MessageType::WriteError, address, value, ty),
        Err(_) => replier.reply(MessageType::WriteError, address, &[], PayloadType::U8),
    }
}


/// sending half of the device: transport, clock and the flags gating replies
pub(crate) struct Output<'c, B, M> {
    pub bus: B,
    pub clock: &'c Clock<M>,
    pub control: OperationControl,
    /// number of transport failures
    pub losses: u32,
}

impl<B: Write, M: Monotonic> Replier for Output<'_, B, M> {
    fn reply(&mut self, kind: MessageType, address: u8, payload: &[u8], payload_type: PayloadType) {
        let frame = match assemble_reply(kind, address, payload, payload_type, self.clock.now()) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("cannot reply for register {}: {}", address, err);
                return
            },
        };
        debug!("send {:?} for register {}", kind, address);
        let sent = self.bus.write_all(&frame)
            .and_then(|_| self.bus.flush());
        if let Err(err) = sent {
            warn!("failed to send reply: {:?}", err);
            self.losses = self.losses.saturating_add(1);
        }
    }
    fn muted(&self) -> bool {
        self.control.mute_replies()
    }
    fn events_enabled(&self) -> bool {
        self.control.mode() == OperationMode::Active
    }
    fn now(&self) -> HarpTime {
        self.clock.now()
    }
}
