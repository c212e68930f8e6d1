//! File-backed camera for headless runs: every capture returns the current
//! contents of one image file.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::hardware::{
    AuthorizationStatus, CameraDevice, CameraHardware, CameraPermission, CaptureTuning,
    DeviceKind, PhotoCodec, PhotoCompletion, PhotoSettings,
};
use crate::error::{CaptureError, PreprocessingError};

const DEVICE_ID: &str = "still-image";

#[derive(Debug, Default, Clone, Copy)]
struct Wiring {
    input: bool,
    output: bool,
}

#[derive(Debug)]
pub struct StillImageCamera {
    path: PathBuf,
    codec: PhotoCodec,
    committed: Wiring,
    pending: Option<Wiring>,
    running: bool,
}

impl StillImageCamera {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PreprocessingError> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path).map_err(|e| {
            PreprocessingError::InvalidImageData(format!("{}: {e}", path.display()))
        })?;
        let codec = image::guess_format(&bytes)
            .ok()
            .and_then(PhotoCodec::from_image_format)
            .ok_or_else(|| {
                PreprocessingError::InvalidImageData(format!(
                    "{}: not a WebP, JPEG or PNG image",
                    path.display()
                ))
            })?;

        Ok(Self {
            path,
            codec,
            committed: Wiring::default(),
            pending: None,
            running: false,
        })
    }

    fn wiring(&mut self) -> &mut Wiring {
        self.pending.as_mut().unwrap_or(&mut self.committed)
    }
}

impl CameraHardware for StillImageCamera {
    fn discover_devices(&self) -> Vec<CameraDevice> {
        vec![CameraDevice {
            id: DEVICE_ID.to_string(),
            kind: DeviceKind::WideAngle,
            supports_macro_switch: false,
            has_flash: false,
            zoom_range: (1.0, 1.0),
        }]
    }

    fn begin_configuration(&mut self) {
        self.pending = Some(self.committed);
    }

    fn remove_all(&mut self) {
        *self.wiring() = Wiring::default();
    }

    fn add_input(&mut self, device: &CameraDevice) -> bool {
        let wiring = self.wiring();
        if wiring.input || device.id != DEVICE_ID {
            return false;
        }
        wiring.input = true;
        true
    }

    fn add_photo_output(&mut self) -> bool {
        let wiring = self.wiring();
        if wiring.output {
            return false;
        }
        wiring.output = true;
        true
    }

    fn apply_tuning(
        &mut self,
        _device: &CameraDevice,
        tuning: &CaptureTuning,
    ) -> Result<(), String> {
        debug!(?tuning, "Still camera ignores tuning");
        Ok(())
    }

    fn commit_configuration(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.committed = pending;
        }
    }

    fn rollback_configuration(&mut self) {
        self.pending = None;
    }

    fn start_running(&mut self) {
        self.running = self.committed.input && self.committed.output;
    }

    fn stop_running(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn available_codecs(&self) -> Vec<PhotoCodec> {
        vec![self.codec]
    }

    fn output_supports_flash(&self) -> bool {
        false
    }

    fn capture_photo(&mut self, settings: PhotoSettings, completion: PhotoCompletion) {
        if settings.codec != self.codec {
            completion.resolve(Err(CaptureError::HardwareCaptureFailed(format!(
                "codec {:?} not available",
                settings.codec
            ))));
            return;
        }

        let result = fs::read(&self.path)
            .map_err(|e| CaptureError::HardwareCaptureFailed(format!("read failed: {e}")));
        completion.resolve(result);
    }
}

/// Permission source for environments without a permission prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedPermission;

#[async_trait]
impl CameraPermission for GrantedPermission {
    fn status(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    async fn request_access(&self) -> bool {
        true
    }
}
