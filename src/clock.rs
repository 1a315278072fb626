/*!
    harp time keeping

    the local clock is a free-running microsecond counter owned by the hardware, it is never rewritten. Harp time is derived from it by subtracting an offset, so that setting the time or synchronizing it only moves the offset.

    The offset can be changed from an interrupt (see [crate::sync::Synchronizer]) while the main loop reads the time, so every access samples the counter and the offset within a single critical section.
*/

use core::cell::Cell;
use critical_section::Mutex;


pub const MICROS_PER_SECOND: u64 = 1_000_000;
/// harp sub-second ticks are 32us long
pub const TICK_SHIFT: u32 = 5;
/// number of ticks in one second
pub const TICKS_PER_SECOND: u16 = (MICROS_PER_SECOND >> TICK_SHIFT) as u16;


/// free-running microsecond counter, typically a hardware timer counting from boot
pub trait Monotonic {
    /// microseconds elapsed since an arbitrary origin, must never decrease
    fn now_us(&self) -> u64;
}
impl<M: Monotonic + ?Sized> Monotonic for &M {
    fn now_us(&self) -> u64 {(**self).now_us()}
}


/// instant on the harp time scale, with microsecond resolution
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HarpTime {
    micros: u64,
}
impl HarpTime {
    pub const fn from_micros(micros: u64) -> Self {
        Self {micros}
    }
    /// time as transmitted in frames: whole seconds and 32us ticks
    pub fn from_ticks(seconds: u32, ticks: u16) -> Self {
        Self::from_micros(u64::from(seconds) * MICROS_PER_SECOND + (u64::from(ticks) << TICK_SHIFT))
    }
    pub const fn as_micros(self) -> u64 {self.micros}
    /// whole seconds, wrapping after 2^32 seconds
    pub fn seconds(self) -> u32 {
        (self.micros / MICROS_PER_SECOND) as u32
    }
    /// microseconds elapsed in the current second
    pub fn subsec_micros(self) -> u32 {
        (self.micros % MICROS_PER_SECOND) as u32
    }
    /// 32us ticks elapsed in the current second, below [TICKS_PER_SECOND]
    pub fn ticks(self) -> u16 {
        (self.subsec_micros() >> TICK_SHIFT) as u16
    }
}


/// local monotonic clock disciplined into harp time
pub struct Clock<M> {
    timer: M,
    /// local time minus harp time
    offset: Mutex<Cell<i64>>,
}

impl<M: Monotonic> Clock<M> {
    /// harp time starts equal to local time
    pub const fn new(timer: M) -> Self {
        Self {
            timer,
            offset: Mutex::new(Cell::new(0)),
        }
    }
    pub fn timer(&self) -> &M {&self.timer}

    /// local time in microseconds, unaffected by synchronization
    pub fn local_us(&self) -> u64 {
        self.timer.now_us()
    }
    /// current offset between local time and harp time
    pub fn offset_us(&self) -> i64 {
        critical_section::with(|cs| self.offset.borrow(cs).get())
    }
    /// current harp time
    pub fn now(&self) -> HarpTime {
        critical_section::with(|cs| {
            harp_time(self.timer.now_us(), self.offset.borrow(cs).get())
        })
    }
    /// redefine the current harp time
    pub fn set(&self, time: HarpTime) {
        self.update(|_| time);
    }
    /// replace the seconds of harp time, keeping the current sub-second part
    pub fn set_seconds(&self, seconds: u32) -> HarpTime {
        self.update(|now| HarpTime::from_micros(
            u64::from(seconds) * MICROS_PER_SECOND + u64::from(now.subsec_micros())
            ))
    }
    /// replace the sub-second part of harp time, given in 32us ticks
    pub fn set_ticks(&self, ticks: u16) -> HarpTime {
        self.update(|now| HarpTime::from_ticks(now.seconds(), ticks))
    }
    /// forget any synchronization, harp time becomes local time again
    pub fn reset(&self) {
        critical_section::with(|cs| self.offset.borrow(cs).set(0));
    }

    /// compute a new harp time from the current one and apply it, atomically regarding other clock users
    fn update(&self, change: impl FnOnce(HarpTime) -> HarpTime) -> HarpTime {
        critical_section::with(|cs| {
            let offset = self.offset.borrow(cs);
            let local = self.timer.now_us();
            let time = change(harp_time(local, offset.get()));
            let shift = i128::from(local) - i128::from(time.as_micros());
            offset.set(shift.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64);
            time
        })
    }
}

fn harp_time(local: u64, offset: i64) -> HarpTime {
    let micros = i128::from(local) - i128::from(offset);
    HarpTime::from_micros(micros.clamp(0, i128::from(u64::MAX)) as u64)
}
