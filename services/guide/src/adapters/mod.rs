pub mod device;
pub mod engine;
pub mod store;

pub use device::FsDeviceIdentity;
pub use engine::RodioAudioEngine;
pub use store::FsSegmentStore;
