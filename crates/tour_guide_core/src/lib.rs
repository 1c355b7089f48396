pub mod domain;
pub mod ports;
pub mod proximity;

pub use domain::{
    BoundingBox, CapturePrefs, ConnectionState, GeoLocation, GuideMeta, GuideRequest, Language,
    SessionSummary,
};
pub use ports::{
    AudioEngine, DeviceIdentity, EngineStatus, PortError, PortResult, SegmentHandle, SegmentStore,
};
pub use proximity::{haversine_distance_m, PointOfInterest, ProximityTrigger};
