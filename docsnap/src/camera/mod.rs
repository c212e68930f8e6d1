//! Camera hardware session.
//!
//! - `CameraHardware` / `CameraPermission` traits abstract the platform
//! - `CaptureSessionController` owns the session state machine and funnels
//!   every hardware mutation through one serial worker
//! - `StillImageCamera` is a file-backed device used by the CLI

mod hardware;
mod session;
mod still;

pub use hardware::{
    AuthorizationStatus, CameraDevice, CameraHardware, CameraPermission, CaptureTuning,
    DeviceKind, FlashMode, FocusRange, PhotoCodec, PhotoCompletion, PhotoSettings,
};
pub use session::{
    select_device, CaptureSessionController, DeviceDescriptor, FailureReason, RawCapture,
    SessionSettings, SessionState,
};
pub use still::{GrantedPermission, StillImageCamera};
