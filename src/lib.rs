/*!
    firmware side of the harp device protocol

    a harp device exposes typed registers that a host reads and writes with small checksummed frames over a serial link, every reply from the device being timestamped with a clock that can be synchronized across devices.

    - [message] encodes and decodes frames
    - [registers] and [bank] describe and store registers
    - [clock] and [sync] keep harp time
    - [dispatch] runs the device, [app] plugs device-specific registers into it
*/
#![no_std]
#[cfg(feature = "std")]
extern crate std;

mod utils;

pub mod message;
pub mod registers;
pub mod bank;
pub mod clock;
pub mod sync;
pub mod reply;
pub mod app;
pub mod dispatch;

pub use utils::checksum;
pub use dispatch::{Core, Transport, Timing};
pub use clock::{Clock, HarpTime, Monotonic};
pub use sync::Synchronizer;
pub use app::{Application, RegisterApp};
