#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use docsnap::camera::{
    AuthorizationStatus, CameraDevice, CameraHardware, CameraPermission, CaptureSessionController,
    CaptureTuning, DeviceKind, PhotoCodec, PhotoCompletion, PhotoSettings, SessionSettings,
};
use docsnap::telemetry::{RetryEvent, TelemetryEvent, TelemetrySink};

/// Encode a small striped image so normalization has real pixels to work on.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgb([30, 30, 30])
        } else {
            Rgb([220, 220, 220])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn device(id: &str, kind: DeviceKind, macro_switch: bool, has_flash: bool) -> CameraDevice {
    CameraDevice {
        id: id.to_string(),
        kind,
        supports_macro_switch: macro_switch,
        has_flash,
        zoom_range: (1.0, 10.0),
    }
}

/// Behaviour and observations of a [`ScriptedCamera`].
pub struct CameraScript {
    pub devices: Vec<CameraDevice>,
    pub reject_input: bool,
    pub reject_output: bool,
    /// Number of `start_running` calls that fail to bring the session up.
    pub start_failures: u32,
    /// How long a successful `start_running` takes before `is_running` reports it.
    pub start_latency: Duration,
    pub codecs: Vec<PhotoCodec>,
    pub flash_output: bool,
    pub photo: Vec<u8>,
    /// Hold on to completions instead of resolving them immediately.
    pub defer_capture: bool,

    pub running: bool,
    pub started_at: Option<Instant>,
    pub configuring: bool,
    pub start_calls: u32,
    pub stop_calls: u32,
    pub commits: u32,
    pub rollbacks: u32,
    pub capture_calls: u32,
    pub last_settings: Option<PhotoSettings>,
    pub pending: Vec<PhotoCompletion>,
}

impl Default for CameraScript {
    fn default() -> Self {
        Self {
            devices: vec![
                device("wide", DeviceKind::WideAngle, false, true),
                device("triple", DeviceKind::MultiLens, true, true),
            ],
            reject_input: false,
            reject_output: false,
            start_failures: 0,
            start_latency: Duration::ZERO,
            codecs: vec![PhotoCodec::Png],
            flash_output: true,
            photo: png_bytes(64, 48),
            defer_capture: false,
            running: false,
            started_at: None,
            configuring: false,
            start_calls: 0,
            stop_calls: 0,
            commits: 0,
            rollbacks: 0,
            capture_calls: 0,
            last_settings: None,
            pending: Vec::new(),
        }
    }
}

/// Camera hardware driven by a shared [`CameraScript`].
#[derive(Clone, Default)]
pub struct ScriptedCamera {
    pub script: Arc<Mutex<CameraScript>>,
}

impl ScriptedCamera {
    pub fn new(script: CameraScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut CameraScript) -> R) -> R {
        f(&mut self.script.lock().unwrap())
    }

    /// Resolve the oldest deferred capture.
    pub fn complete_pending(&self, result: Result<Vec<u8>, docsnap::error::CaptureError>) {
        let completion = self.with(|s| s.pending.remove(0));
        completion.resolve(result);
    }
}

impl CameraHardware for ScriptedCamera {
    fn discover_devices(&self) -> Vec<CameraDevice> {
        self.with(|s| s.devices.clone())
    }

    fn begin_configuration(&mut self) {
        self.with(|s| s.configuring = true);
    }

    fn remove_all(&mut self) {}

    fn add_input(&mut self, _device: &CameraDevice) -> bool {
        self.with(|s| !s.reject_input)
    }

    fn add_photo_output(&mut self) -> bool {
        self.with(|s| !s.reject_output)
    }

    fn apply_tuning(&mut self, _device: &CameraDevice, _tuning: &CaptureTuning) -> Result<(), String> {
        Ok(())
    }

    fn commit_configuration(&mut self) {
        self.with(|s| {
            s.configuring = false;
            s.commits += 1;
        });
    }

    fn rollback_configuration(&mut self) {
        self.with(|s| {
            s.configuring = false;
            s.rollbacks += 1;
        });
    }

    fn start_running(&mut self) {
        self.with(|s| {
            s.start_calls += 1;
            if s.start_calls > s.start_failures {
                s.running = true;
                s.started_at = Some(Instant::now());
            }
        });
    }

    fn stop_running(&mut self) {
        self.with(|s| {
            s.stop_calls += 1;
            s.running = false;
        });
    }

    fn is_running(&self) -> bool {
        self.with(|s| {
            s.running && s.started_at.is_some_and(|at| at.elapsed() >= s.start_latency)
        })
    }

    fn available_codecs(&self) -> Vec<PhotoCodec> {
        self.with(|s| s.codecs.clone())
    }

    fn output_supports_flash(&self) -> bool {
        self.with(|s| s.flash_output)
    }

    fn capture_photo(&mut self, settings: PhotoSettings, completion: PhotoCompletion) {
        let immediate = self.with(|s| {
            s.capture_calls += 1;
            s.last_settings = Some(settings);
            if s.defer_capture {
                s.pending.push(completion.clone());
                None
            } else {
                Some(s.photo.clone())
            }
        });
        if let Some(photo) = immediate {
            completion.resolve(Ok(photo));
        }
    }
}

pub struct ScriptedPermission {
    pub status: Mutex<AuthorizationStatus>,
    pub grant: bool,
    pub requests: AtomicU32,
}

impl ScriptedPermission {
    pub fn new(status: AuthorizationStatus, grant: bool) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            grant,
            requests: AtomicU32::new(0),
        })
    }

    pub fn granted() -> Arc<Self> {
        Self::new(AuthorizationStatus::Authorized, true)
    }

    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraPermission for ScriptedPermission {
    fn status(&self) -> AuthorizationStatus {
        *self.status.lock().unwrap()
    }

    async fn request_access(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let next = if self.grant {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
        *self.status.lock().unwrap() = next;
        self.grant
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    pub events: Mutex<Vec<TelemetryEvent>>,
    pub retries: Mutex<Vec<RetryEvent>>,
}

impl RecordingTelemetry {
    pub fn operations(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.operation)
            .collect()
    }

    pub fn event(&self, operation: &str) -> Option<TelemetryEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.operation == operation)
            .cloned()
    }

    pub fn retry_count(&self) -> usize {
        self.retries.lock().unwrap().len()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn retry(&self, event: RetryEvent) {
        self.retries.lock().unwrap().push(event);
    }
}

/// Session settings with millisecond start delays.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        start_grace: Duration::from_millis(1),
        ..SessionSettings::default()
    }
    .with_start_retry_base(Duration::from_millis(2))
}

/// Authorize, configure and start a session over `camera`.
pub async fn running_session(camera: ScriptedCamera) -> CaptureSessionController {
    let session =
        CaptureSessionController::new(camera, ScriptedPermission::granted(), fast_settings());
    session.request_authorization().await.unwrap();
    session.configure().await.unwrap();
    session.start().await.unwrap();
    session
}
