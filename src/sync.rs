/*!
    harp clock synchronization

    a clock master sends every second on a dedicated uart line (100 kbps, 8 data bits, 1 stop bit, no parity) the frame `0xAA 0xAF <seconds: u32 little-endian>`, the end of its last byte marks (with a fixed latency) the start of the announced second.

    The [Synchronizer] recognizes these frames one byte at a time, either fed from a uart receive interrupt with [Synchronizer::feed] or from a polled serial port with [Synchronizer::poll], and sets the [Clock] accordingly.
*/

use embedded_io::{Read, ReadReady};
use log::*;

use crate::clock::{Clock, HarpTime, Monotonic, MICROS_PER_SECOND};


/// baud rate of the synchronization line
pub const SYNC_BAUD_RATE: u32 = 100_000;
/// bytes opening every synchronization frame
pub const SYNC_HEADER: [u8; 2] = [0xAA, 0xAF];
/// delay between the end of a frame's last byte and the instant it announces
pub const SYNC_LATENCY_US: u64 = 672 - 90;


/// progress in the current synchronization frame
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    AwaitHeader0,
    AwaitHeader1,
    AccumulateTimestamp,
}

/// byte-level receiver of synchronization frames
pub struct Synchronizer<'c, M> {
    clock: &'c Clock<M>,
    state: SyncState,
    buffer: [u8; 4],
    index: usize,
}

impl<'c, M: Monotonic> Synchronizer<'c, M> {
    pub fn new(clock: &'c Clock<M>) -> Self {
        Self {
            clock,
            state: SyncState::AwaitHeader0,
            buffer: [0; 4],
            index: 0,
        }
    }
    pub fn state(&self) -> SyncState {self.state}

    /**
        process one byte received on the synchronization line

        returns the harp time applied to the clock when this byte completes a frame
    */
    pub fn feed(&mut self, byte: u8) -> Option<HarpTime> {
        match self.state {
            SyncState::AwaitHeader0 => {
                if byte == SYNC_HEADER[0] {
                    self.state = SyncState::AwaitHeader1;
                }
            },
            SyncState::AwaitHeader1 => {
                if byte == SYNC_HEADER[1] {
                    self.index = 0;
                    self.state = SyncState::AccumulateTimestamp;
                }
                else {
                    self.state = SyncState::AwaitHeader0;
                }
            },
            SyncState::AccumulateTimestamp => {
                self.buffer[self.index] = byte;
                self.index += 1;
                if self.index == self.buffer.len() {
                    self.index = 0;
                    self.state = SyncState::AwaitHeader0;
                    return Some(self.apply(u32::from_le_bytes(self.buffer)));
                }
            },
        }
        None
    }
    /// process a sequence of bytes, returns the last time applied if any
    pub fn feed_all(&mut self, bytes: &[u8]) -> Option<HarpTime> {
        bytes.iter().fold(None, |applied, &byte| self.feed(byte).or(applied))
    }
    /// process all bytes currently available on the given uart without blocking
    pub fn poll<R: Read + ReadReady>(&mut self, uart: &mut R) -> Result<Option<HarpTime>, R::Error> {
        let mut applied = None;
        let mut chunk = [0; 8];
        while uart.read_ready()? {
            let size = uart.read(&mut chunk)?;
            if size == 0
                {break}
            applied = self.feed_all(&chunk[.. size]).or(applied);
        }
        Ok(applied)
    }

    fn apply(&self, seconds: u32) -> HarpTime {
        let time = HarpTime::from_micros(
            (u64::from(seconds) * MICROS_PER_SECOND).saturating_sub(SYNC_LATENCY_US)
            );
        self.clock.set(time);
        info!("synchronized clock to {} s", seconds);
        time
    }
}
