/*!
    device-specific registers

    a device plugs its own registers into the core by implementing [Application]. They are addressed from [APP_REG_START] on, and every request to that range is handed over to the application.

    [RegisterApp] covers the common case of a fixed register table with one read and one write handler per register.
*/

use log::*;

use crate::{
    bank::{RegisterBank, RegisterSpec, Origin},
    message::{Message, MessageType, PayloadType},
    registers::APP_REG_START,
    reply::{Replier, read_generic, write_generic, write_read_only},
    };


/// hooks through which the core drives the application
pub trait Application {
    /// number of application registers, contiguous from [APP_REG_START]
    fn register_count(&self) -> u8;
    /// current value and type of an application register
    fn read(&self, address: u8) -> Option<(&[u8], PayloadType)>;
    /// answer a read or write request addressed to an application register
    fn handle(&mut self, message: &Message<'_>, replier: &mut dyn Replier);

    /// called once per core cycle, registers can be refreshed and events emitted here
    fn update(&mut self, _replier: &mut dyn Replier) {}
    /// restore application defaults, called when the host requests a reset
    fn reset(&mut self) {}
    /// switch the device's visual indicators
    fn set_visual_indicators(&mut self, _enabled: bool) {}
    /// send one read reply per application register, in address order
    fn dump(&mut self, replier: &mut dyn Replier) {
        for address in app_addresses(self.register_count()) {
            if let Some((value, ty)) = self.read(address) {
                replier.reply(MessageType::Read, address, value, ty);
            }
        }
    }
    /// whether the address belongs to the application range
    fn contains(&self, address: u8) -> bool {
        address >= APP_REG_START
        && u16::from(address) < u16::from(APP_REG_START) + u16::from(self.register_count())
    }
}

fn app_addresses(count: u8) -> impl Iterator<Item=u8> {
    (0 .. count).filter_map(|index| APP_REG_START.checked_add(index))
}

/// device without application registers
impl Application for () {
    fn register_count(&self) -> u8 {0}
    fn read(&self, _address: u8) -> Option<(&[u8], PayloadType)> {None}
    fn handle(&mut self, message: &Message<'_>, _replier: &mut dyn Replier) {
        debug!("no application to handle register {}", message.address());
    }
}


/// handler answering a read request on an application register
pub type ReadFn<const MEM: usize, const COUNT: usize> = fn(&mut RegisterBank<MEM, COUNT>, u8, &mut dyn Replier);
/// handler answering a write request on an application register
pub type WriteFn<const MEM: usize, const COUNT: usize> = fn(&mut RegisterBank<MEM, COUNT>, &Message<'_>, &mut dyn Replier);
/// periodic update of the application registers
pub type UpdateFn<const MEM: usize, const COUNT: usize> = fn(&mut RegisterBank<MEM, COUNT>, &mut dyn Replier);
/// restoration of the application registers defaults
pub type ResetFn<const MEM: usize, const COUNT: usize> = fn(&mut RegisterBank<MEM, COUNT>);

/// read and write handlers of one register
pub struct Handlers<const MEM: usize, const COUNT: usize> {
    pub read: ReadFn<MEM, COUNT>,
    pub write: WriteFn<MEM, COUNT>,
}
impl<const MEM: usize, const COUNT: usize> Handlers<MEM, COUNT> {
    /// register readable and writable without side effects
    pub fn generic() -> Self {
        Self {read: read_generic::<MEM, COUNT>, write: write_generic::<MEM, COUNT>}
    }
    /// register only readable by the host
    pub fn read_only() -> Self {
        Self {read: read_generic::<MEM, COUNT>, write: write_read_only::<MEM, COUNT>}
    }
}
impl<const MEM: usize, const COUNT: usize> Clone for Handlers<MEM, COUNT> {
    fn clone(&self) -> Self {*self}
}
impl<const MEM: usize, const COUNT: usize> Copy for Handlers<MEM, COUNT> {}


/// application made of a register table and a handler table, indexed the same way
pub struct RegisterApp<const MEM: usize, const COUNT: usize> {
    bank: RegisterBank<MEM, COUNT>,
    handlers: [Handlers<MEM, COUNT>; COUNT],
    update: Option<UpdateFn<MEM, COUNT>>,
    reset: Option<ResetFn<MEM, COUNT>>,
}

impl<const MEM: usize, const COUNT: usize> RegisterApp<MEM, COUNT> {
    /**
        create an application with registers starting at [APP_REG_START]

        panics if the layout does not fit in `MEM` bytes
    */
    pub fn new(layout: [RegisterSpec; COUNT], handlers: [Handlers<MEM, COUNT>; COUNT]) -> Self {
        Self {
            bank: RegisterBank::new(Origin::App, APP_REG_START, layout),
            handlers,
            update: None,
            reset: None,
        }
    }
    /// function called once per core cycle
    pub fn with_update(mut self, update: UpdateFn<MEM, COUNT>) -> Self {
        self.update = Some(update);
        self
    }
    /// function called when the host requests a reset
    pub fn with_reset(mut self, reset: ResetFn<MEM, COUNT>) -> Self {
        self.reset = Some(reset);
        self
    }
    pub fn registers(&self) -> &RegisterBank<MEM, COUNT> {&self.bank}
    pub fn registers_mut(&mut self) -> &mut RegisterBank<MEM, COUNT> {&mut self.bank}
}

impl<const MEM: usize, const COUNT: usize> Application for RegisterApp<MEM, COUNT> {
    fn register_count(&self) -> u8 {
        COUNT as u8
    }
    fn read(&self, address: u8) -> Option<(&[u8], PayloadType)> {
        self.bank.read(address).ok()
    }
    fn handle(&mut self, message: &Message<'_>, replier: &mut dyn Replier) {
        let Ok(index) = self.bank.position(message.address())
            else {return};
        let handlers = self.handlers[index];
        match message.kind() {
            MessageType::Read => (handlers.read)(&mut self.bank, message.address(), replier),
            MessageType::Write => (handlers.write)(&mut self.bank, message, replier),
            kind => debug!("ignoring {:?} request on register {}", kind, message.address()),
        }
    }
    fn update(&mut self, replier: &mut dyn Replier) {
        if let Some(update) = self.update {
            update(&mut self.bank, replier);
        }
    }
    fn reset(&mut self) {
        if let Some(reset) = self.reset {
            reset(&mut self.bank);
        }
    }
}
