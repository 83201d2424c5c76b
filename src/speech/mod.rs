//! Speech output: device abstraction and the queueing engine on top of it.

pub mod device;
pub mod engine;

pub use device::{default_device, DeviceEvent, SpeechDevice, UtteranceRequest};
pub use engine::{Speaker, SpeakerStatus};
