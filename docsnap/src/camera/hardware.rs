use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Virtual device fronting several physical lenses.
    MultiLens,
    WideAngle,
    UltraWide,
    Telephoto,
}

/// A camera as reported by device discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDevice {
    pub id: String,
    pub kind: DeviceKind,
    /// Switches to the macro-capable lens automatically at close range.
    pub supports_macro_switch: bool,
    pub has_flash: bool,
    pub zoom_range: (f32, f32),
}

/// Photo codecs, most efficient first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhotoCodec {
    WebP,
    Jpeg,
    Png,
}

impl PhotoCodec {
    pub const PREFERENCE: [PhotoCodec; 3] = [PhotoCodec::WebP, PhotoCodec::Jpeg, PhotoCodec::Png];

    /// Most efficient codec out of `available`.
    pub fn most_efficient(available: &[PhotoCodec]) -> Option<PhotoCodec> {
        Self::PREFERENCE
            .into_iter()
            .find(|codec| available.contains(codec))
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            PhotoCodec::WebP => image::ImageFormat::WebP,
            PhotoCodec::Jpeg => image::ImageFormat::Jpeg,
            PhotoCodec::Png => image::ImageFormat::Png,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<PhotoCodec> {
        match format {
            image::ImageFormat::WebP => Some(PhotoCodec::WebP),
            image::ImageFormat::Jpeg => Some(PhotoCodec::Jpeg),
            image::ImageFormat::Png => Some(PhotoCodec::Png),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    #[default]
    Off,
    On,
    Auto,
}

impl FromStr for FlashMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(FlashMode::Off),
            "on" => Ok(FlashMode::On),
            "auto" => Ok(FlashMode::Auto),
            other => Err(format!("unknown flash mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoSettings {
    pub codec: PhotoCodec,
    pub flash: FlashMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusRange {
    Near,
    Far,
    Unrestricted,
}

/// Focus and exposure applied once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureTuning {
    pub focus_range: FocusRange,
    pub continuous_autofocus: bool,
    /// Normalized (0..1) point of interest for metering.
    pub exposure_point: (f32, f32),
    pub continuous_auto_exposure: bool,
}

impl CaptureTuning {
    /// Close-range document capture: near focus, center-weighted exposure.
    pub const DOCUMENT: CaptureTuning = CaptureTuning {
        focus_range: FocusRange::Near,
        continuous_autofocus: true,
        exposure_point: (0.5, 0.5),
        continuous_auto_exposure: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

/// OS camera permission.
#[async_trait]
pub trait CameraPermission: Send + Sync {
    fn status(&self) -> AuthorizationStatus;

    /// Prompt the user. Resolves to whether access was granted.
    async fn request_access(&self) -> bool;
}

type CompletionSlot = Arc<Mutex<Option<oneshot::Sender<Result<Vec<u8>, CaptureError>>>>>;

/// One-shot completion handed to the hardware with each photo request.
///
/// Cloning is allowed so platform callbacks can hold on to it, but only the
/// first [`resolve`](PhotoCompletion::resolve) is delivered.
#[derive(Clone)]
pub struct PhotoCompletion {
    slot: CompletionSlot,
}

impl PhotoCompletion {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<Vec<u8>, CaptureError>>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (completion, rx)
    }

    /// Deliver the capture result. Returns `false` if already resolved.
    pub fn resolve(&self, result: Result<Vec<u8>, CaptureError>) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                // the receiver may be gone if the session shut down
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for PhotoCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoCompletion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Platform capture session.
///
/// Every method is called from the controller's serial worker only, so
/// implementations need no internal locking for session mutation.
pub trait CameraHardware: Send + 'static {
    fn discover_devices(&self) -> Vec<CameraDevice>;

    /// Open a configuration transaction.
    fn begin_configuration(&mut self);

    /// Drop all inputs and outputs from the session.
    fn remove_all(&mut self);

    /// Returns `false` if the session rejects the input.
    fn add_input(&mut self, device: &CameraDevice) -> bool;

    /// Returns `false` if the session rejects the photo output.
    fn add_photo_output(&mut self) -> bool;

    fn apply_tuning(&mut self, device: &CameraDevice, tuning: &CaptureTuning)
        -> Result<(), String>;

    fn commit_configuration(&mut self);

    /// Discard everything done since [`begin_configuration`](CameraHardware::begin_configuration).
    fn rollback_configuration(&mut self);

    fn start_running(&mut self);

    fn stop_running(&mut self);

    fn is_running(&self) -> bool;

    fn available_codecs(&self) -> Vec<PhotoCodec>;

    fn output_supports_flash(&self) -> bool;

    /// Start a photo capture. The result must be delivered through
    /// `completion`, either before returning or later from any thread.
    fn capture_photo(&mut self, settings: PhotoSettings, completion: PhotoCompletion);
}
