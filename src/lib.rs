//! Userspace driver for a two-generation ("NP", "BN") phased-array radio
//! frequency DAQ board family.
//!
//! [`device::Device`] is the entry point: open a board (and, for a
//! coincidence array, its synchronized slave) over `/dev/spidevN`, issue
//! a reset, configure thresholds/masks/attenuation, then alternate
//! [`device::Device::wait`] and [`device::Device::read_ready_buffers`] to
//! drain triggered events as [`header::Header`]/[`header::Event`] pairs.

pub mod bits;
pub mod board;
pub mod buffer_ring;
pub mod cmd;
pub mod config;
pub mod consts;
pub mod device;
pub mod error;
pub mod header;
pub mod link;
pub mod port;
pub mod reader;
pub mod regio;
pub mod regs;
pub mod reset;
pub mod scaler;
pub mod spi;
pub mod state;
pub mod sync_cmd;
pub mod wait;

pub use board::Generation;
pub use device::{Device, DeviceOpenOptions, LinuxDevice};
pub use error::{Error, Result};
pub use header::{Event, Header, PerBoard, ScalerSnapshot};
pub use reset::ResetLevel;
