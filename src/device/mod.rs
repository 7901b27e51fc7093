//! Receiver ownership: the device session and the arbiter that serializes
//! access to it across acquisition activities.

pub mod arbiter;
pub mod session;

pub use arbiter::{Arbiter, CancelToken};
pub use session::{DeviceConfig, DeviceSession, SampleSource, SETTLE_SAMPLES};
