/*!
    register storage

    a [RegisterBank] holds a contiguous range of register addresses. Their values are packed one after the other in a single byte buffer, in address order, so that a write longer than its register continues in the following ones.
*/

use packbytes::{FromBytes, ToBytes, ByteArray};
use thiserror::Error;

use crate::{
    message::PayloadType,
    registers::Register,
    };


/// who may write a register from the bus
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}
/// bank a register belongs to
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// registers mandated by the harp protocol
    Core,
    /// device-specific registers
    App,
}

/// declaration of one register in a bank layout
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterSpec {
    pub ty: PayloadType,
    /// number of elements of type `ty`, more than one for array registers
    pub elements: u8,
    pub access: Access,
}
impl RegisterSpec {
    pub const fn read_only(ty: PayloadType, elements: u8) -> Self {
        Self {ty, elements, access: Access::ReadOnly}
    }
    pub const fn read_write(ty: PayloadType, elements: u8) -> Self {
        Self {ty, elements, access: Access::ReadWrite}
    }
    /// size in bytes of the register value
    pub const fn width(&self) -> usize {
        self.ty.element_width() as usize * self.elements as usize
    }
}

/// number of bytes needed to store the given layout
pub const fn layout_size<const COUNT: usize>(layout: &[RegisterSpec; COUNT]) -> usize {
    let mut size = 0;
    let mut i = 0;
    while i < COUNT {
        size += layout[i].width();
        i += 1;
    }
    size
}

/// placement of a register in its bank
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub address: u8,
    /// position of the first byte in bank memory
    pub offset: usize,
    pub width: usize,
    pub ty: PayloadType,
    pub access: Access,
    pub origin: Origin,
}


/// values and descriptors of `COUNT` consecutive registers stored in `MEM` bytes
pub struct RegisterBank<const MEM: usize, const COUNT: usize> {
    origin: Origin,
    base: u8,
    descriptors: [Descriptor; COUNT],
    memory: [u8; MEM],
}

impl<const MEM: usize, const COUNT: usize> RegisterBank<MEM, COUNT> {
    /**
        create a zero-initialized bank whose first register is at address `base`

        panics if the layout does not fit in `MEM` bytes or in the 8-bit address space
    */
    pub fn new(origin: Origin, base: u8, layout: [RegisterSpec; COUNT]) -> Self {
        assert!(layout_size(&layout) <= MEM, "register layout exceeds bank memory");
        assert!(usize::from(base) + COUNT <= 1 + usize::from(u8::MAX), "register layout exceeds address space");
        let mut offset = 0;
        let descriptors = core::array::from_fn(|i| {
            let spec = layout[i];
            let descriptor = Descriptor {
                address: base + i as u8,
                offset,
                width: spec.width(),
                ty: spec.ty,
                access: spec.access,
                origin,
                };
            offset += spec.width();
            descriptor
        });
        Self {origin, base, descriptors, memory: [0; MEM]}
    }
    pub fn origin(&self) -> Origin {self.origin}
    /// address of the first register
    pub fn base(&self) -> u8 {self.base}
    /// number of registers
    pub fn count(&self) -> usize {COUNT}
    pub fn contains(&self, address: u8) -> bool {
        self.position(address).is_ok()
    }
    /// all register addresses, ascending
    pub fn addresses(&self) -> impl Iterator<Item=u8> + '_ {
        self.descriptors.iter().map(|descriptor| descriptor.address)
    }
    /// index of the given address in this bank
    pub fn position(&self, address: u8) -> Result<usize, AccessError> {
        address.checked_sub(self.base)
            .map(usize::from)
            .filter(|&index| index < COUNT)
            .ok_or(AccessError::AddressOutOfRange(address))
    }
    pub fn descriptor(&self, address: u8) -> Result<&Descriptor, AccessError> {
        Ok(&self.descriptors[self.position(address)?])
    }

    /// current bytes and type of a register
    pub fn read(&self, address: u8) -> Result<(&[u8], PayloadType), AccessError> {
        let descriptor = self.descriptor(address)?;
        Ok((&self.memory[descriptor.offset ..][.. descriptor.width], descriptor.ty))
    }
    /**
        write a register from bus data, returns the number of bytes stored

        the payload must cover at least the addressed register. Extra bytes go to the following registers in address order, stopping at the end of the bank or at the first read-only register.
    */
    pub fn write(&mut self, address: u8, payload: &[u8]) -> Result<usize, AccessError> {
        let index = self.position(address)?;
        let first = self.descriptors[index];
        if first.access == Access::ReadOnly {
            return Err(AccessError::ReadOnlyWrite(address));
        }
        if payload.len() < first.width {
            return Err(AccessError::InvalidSize {address, expected: first.width, found: payload.len()});
        }
        let mut written = 0;
        for descriptor in &self.descriptors[index ..] {
            if written == payload.len() || descriptor.access == Access::ReadOnly
                {break}
            let size = descriptor.width.min(payload.len() - written);
            self.memory[descriptor.offset ..][.. size]
                .copy_from_slice(&payload[written ..][.. size]);
            written += size;
        }
        Ok(written)
    }

    /**
        get the current register's value

        panics if the register is not part of this bank
    */
    pub fn get<T: FromBytes>(&self, register: Register<T>) -> T {
        let offset = self.descriptors[usize::from(register.address().wrapping_sub(self.base))].offset;
        let mut dst = T::Bytes::zeroed();
        dst.as_mut().copy_from_slice(&self.memory[offset ..][.. T::Bytes::SIZE]);
        T::from_le_bytes(dst)
    }
    /**
        set the given register's value, regardless of its access rights

        panics if the register is not part of this bank
    */
    pub fn set<T: ToBytes>(&mut self, register: Register<T>, value: T) {
        let offset = self.descriptors[usize::from(register.address().wrapping_sub(self.base))].offset;
        let src = value.to_le_bytes();
        self.memory[offset ..][.. T::Bytes::SIZE].copy_from_slice(src.as_ref());
    }
}


/// error raised by a refused register access
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("no register at address {0}")]
    AddressOutOfRange(u8),
    #[error("register {0} is read-only")]
    ReadOnlyWrite(u8),
    #[error("register {address} expects {expected} bytes but {found} were given")]
    InvalidSize {address: u8, expected: usize, found: usize},
}
