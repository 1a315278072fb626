/*!
    define standard harp registers

    each core register is described by a serializable data type and a constant of type [Register] giving its address, its storage is laid out by [CORE_LAYOUT].
*/

use core::marker::PhantomData;
use packbytes::{FromBytes, ToBytes, ByteArray};
use bilge::prelude::*;

use crate::{
    pack_bits,
    message::PayloadType,
    bank::{RegisterSpec, layout_size},
    };


/**
    a register is a typed address in a register bank.

    it only holds the address of the register, hence can be created, copied or destroyed at no cost
*/
#[derive(PartialEq, Hash)]
pub struct Register<T> {
    addr: u8,
    ty: PhantomData<T>,
}
impl<T> Register<T> {
    pub const fn new(address: u8) -> Self {
        Self{addr: address, ty: PhantomData}
    }
    pub const fn address(&self) -> u8 {self.addr}
}
impl<T: FromBytes> Register<T> {
    /// size in bytes of the register value
    pub const fn size(&self) -> usize {T::Bytes::SIZE}
}
impl<T> Clone for Register<T> {
    fn clone(&self) -> Self {
        Self::new(self.address())
    }
}
impl<T> Copy for Register<T> {}


/// number of registers in the core bank
pub const CORE_REG_COUNT: usize = 16;
/// address of the first application register
pub const APP_REG_START: u8 = 32;

/// device identifier
pub const WHO_AM_I: Register<u16> = Register::new(0);
pub const HW_VERSION_H: Register<u8> = Register::new(1);
pub const HW_VERSION_L: Register<u8> = Register::new(2);
pub const ASSEMBLY_VERSION: Register<u8> = Register::new(3);
/// version of the harp protocol implemented
pub const HARP_VERSION_H: Register<u8> = Register::new(4);
pub const HARP_VERSION_L: Register<u8> = Register::new(5);
pub const FW_VERSION_H: Register<u8> = Register::new(6);
pub const FW_VERSION_L: Register<u8> = Register::new(7);
/// whole seconds of harp time, refreshed before being read
pub const TIMESTAMP_SECOND: Register<u32> = Register::new(8);
/// sub-second harp time in 32us ticks, refreshed before being read
pub const TIMESTAMP_MICRO: Register<u16> = Register::new(9);
pub const OPERATION_CTRL: Register<OperationControl> = Register::new(10);
/// reset request, see [ResetControl]
pub const RESET_DEF: Register<ResetControl> = Register::new(11);
pub const DEVICE_NAME: Register<DeviceName> = Register::new(12);
pub const SERIAL_NUMBER: Register<u16> = Register::new(13);
/// clock synchronization role, see [ClockConfig]
pub const CLOCK_CONFIG: Register<ClockConfig> = Register::new(14);
pub const TIMESTAMP_OFFSET: Register<u8> = Register::new(15);

/// storage layout of the core registers, indexed by address
pub const CORE_LAYOUT: [RegisterSpec; CORE_REG_COUNT] = [
    RegisterSpec::read_only(PayloadType::U16, 1),
    RegisterSpec::read_only(PayloadType::U8, 1),
    RegisterSpec::read_only(PayloadType::U8, 1),
    RegisterSpec::read_only(PayloadType::U8, 1),
    RegisterSpec::read_only(PayloadType::U8, 1),
    RegisterSpec::read_only(PayloadType::U8, 1),
    RegisterSpec::read_only(PayloadType::U8, 1),
    RegisterSpec::read_only(PayloadType::U8, 1),
    RegisterSpec::read_write(PayloadType::U32, 1),
    RegisterSpec::read_write(PayloadType::U16, 1),
    RegisterSpec::read_write(PayloadType::U8, 1),
    RegisterSpec::read_write(PayloadType::U8, 1),
    RegisterSpec::read_write(PayloadType::U8, DEVICE_NAME_SIZE as u8),
    RegisterSpec::read_write(PayloadType::U16, 1),
    RegisterSpec::read_write(PayloadType::U8, 1),
    RegisterSpec::read_write(PayloadType::U8, 1),
    ];
/// bytes needed to store the core registers
pub const CORE_MEMORY: usize = layout_size(&CORE_LAYOUT);


/// device operation mode
#[bitsize(2)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq, Default)]
pub enum OperationMode {
    /// no events, initial mode
    #[default]
    Standby = 0,
    /// events and heartbeat enabled
    Active = 1,
    Reserved = 2,
    /// not implemented, behaves as standby
    Speed = 3,
}

/// content of register [OPERATION_CTRL]
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct OperationControl {
    pub mode: OperationMode,
    _reserved: u1,
    /// write-only, request a dump of all registers. Always reads 0
    pub dump: bool,
    /// suppress acknowledgements of writes
    pub mute_replies: bool,
    /// enable the device's visual indicators
    pub visual_indicators: bool,
    /// enable the operation led
    pub operation_led: bool,
    /// emit a heartbeat event every second while active
    pub alive: bool,
}
pack_bits!(OperationControl);

/// content of register [RESET_DEF]
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct ResetControl {
    /// reset the device to its default register values
    pub restore_defaults: bool,
    /// reset the device to the register values saved in non-volatile memory
    pub restore_eeprom: bool,
    /// save the current register values to non-volatile memory
    pub save: bool,
    _reserved: u3,
    pub boot_defaults: bool,
    pub boot_eeprom: bool,
}
pack_bits!(ResetControl);

/// content of register [CLOCK_CONFIG]
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct ClockConfig {
    /// repeat the synchronization signal to other devices
    pub repeater: bool,
    /// generate the synchronization signal
    pub generator: bool,
    _reserved0: u1,
    /// read-only, the device can repeat the synchronization signal
    pub repeater_capable: bool,
    /// read-only, the device can generate the synchronization signal
    pub generator_capable: bool,
    _reserved1: u1,
    /// host request to unlock the timestamp registers, stored without effect
    pub unlock: bool,
    /// host request to lock the timestamp registers, stored without effect
    pub lock: bool,
}
pack_bits!(ClockConfig);


/// number of bytes of register [DEVICE_NAME]
pub const DEVICE_NAME_SIZE: usize = 25;

/// register format for the device name, a zero-padded string
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct DeviceName {
    buffer: [u8; DEVICE_NAME_SIZE],
}
impl TryFrom<&str> for DeviceName {
    type Error = &'static str;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.as_bytes();
        let mut dst = Self::default();
        if value.len() > dst.buffer.len()
            {return Err("device name too long");}
        dst.buffer[.. value.len()].copy_from_slice(value);
        Ok(dst)
    }
}
impl DeviceName {
    pub fn as_str(&self) -> Result<&'_ str, core::str::Utf8Error> {
        let size = self.buffer.iter().position(|&byte| byte == 0).unwrap_or(self.buffer.len());
        core::str::from_utf8(&self.buffer[.. size])
    }
    pub fn as_bytes(&self) -> &[u8; DEVICE_NAME_SIZE] {&self.buffer}
}
impl core::fmt::Debug for DeviceName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.as_str() {
            Ok(name) => write!(f, "{:?}", name),
            Err(_) => write!(f, "{:?}", self.buffer),
        }
    }
}
impl ToBytes for DeviceName {
    type Bytes = [u8; DEVICE_NAME_SIZE];
    fn to_le_bytes(self) -> Self::Bytes {self.buffer}
    fn to_be_bytes(self) -> Self::Bytes {self.buffer}
}
impl FromBytes for DeviceName {
    type Bytes = [u8; DEVICE_NAME_SIZE];
    fn from_le_bytes(bytes: Self::Bytes) -> Self {Self {buffer: bytes}}
    fn from_be_bytes(bytes: Self::Bytes) -> Self {Self {buffer: bytes}}
}


/// major and minor numbers of a version
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}
impl Version {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self {major, minor}
    }
}

/// device standard informations, exposed in the read-only core registers
#[derive(Clone, Debug)]
pub struct Identity {
    /// identifier of the device model
    pub who_am_i: u16,
    /// version of the device's hardware
    pub hardware_version: Version,
    pub assembly_version: u8,
    /// version of the harp protocol implemented
    pub harp_version: Version,
    /// version of the device's firmware
    pub firmware_version: Version,
    /// serial number of this specific hardware item
    pub serial_number: u16,
    pub name: DeviceName,
}
