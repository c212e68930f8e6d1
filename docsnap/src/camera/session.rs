use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hardware::{
    AuthorizationStatus, CameraDevice, CameraHardware, CameraPermission, CaptureTuning,
    DeviceKind, FlashMode, PhotoCodec, PhotoCompletion, PhotoSettings,
};
use crate::error::{AuthorizationError, CaptureError, PipelineError, Result, SetupError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    AuthorizationDenied,
    AuthorizationRestricted,
    Setup(SetupError),
}

/// Published state of the capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthorized,
    AwaitingPermission,
    Configuring,
    Ready,
    Running,
    Capturing,
    Failed(FailureReason),
    /// The worker has shut down; every later call fails with `SessionClosed`.
    Closed,
}

/// Snapshot of the configured device, fixed until the next `configure()`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub kind: DeviceKind,
    pub has_flash: bool,
    pub zoom_range: (f32, f32),
    pub supports_macro_switch: bool,
}

impl From<&CameraDevice> for DeviceDescriptor {
    fn from(device: &CameraDevice) -> Self {
        Self {
            device_id: device.id.clone(),
            kind: device.kind,
            has_flash: device.has_flash,
            zoom_range: device.zoom_range,
            supports_macro_switch: device.supports_macro_switch,
        }
    }
}

/// Bytes of one captured photo, consumed by normalization.
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub id: Uuid,
    pub bytes: Vec<u8>,
    pub format: PhotoCodec,
    pub captured_at: DateTime<Utc>,
}

impl RawCapture {
    pub fn new(bytes: Vec<u8>, format: PhotoCodec) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
            format,
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How long to wait after `start_running` before checking the hardware.
    pub start_grace: Duration,
    /// Delay before each extra start attempt.
    pub start_retry_delays: Vec<Duration>,
    pub flash_mode: FlashMode,
}

impl SessionSettings {
    /// Three retries at `base`, `2 * base`, `3 * base`.
    pub fn with_start_retry_base(mut self, base: Duration) -> Self {
        self.start_retry_delays = (1..=3).map(|n| base * n).collect();
        self
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            start_grace: Duration::from_millis(200),
            start_retry_delays: vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1500),
            ],
            flash_mode: FlashMode::Off,
        }
    }
}

/// Prefer a multi-lens device with automatic macro switching, then any
/// wide-angle camera.
pub fn select_device(devices: &[CameraDevice]) -> Option<CameraDevice> {
    devices
        .iter()
        .find(|d| d.kind == DeviceKind::MultiLens && d.supports_macro_switch)
        .or_else(|| devices.iter().find(|d| d.kind == DeviceKind::WideAngle))
        .cloned()
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Authorize(Reply<SessionState>),
    Configure(Reply<DeviceDescriptor>),
    Start(Reply<SessionState>),
    Stop,
    Capture(Reply<RawCapture>),
    CaptureFinished,
    SetFlashMode(FlashMode),
    Descriptor(oneshot::Sender<Option<DeviceDescriptor>>),
    Shutdown,
}

/// Owns the camera session.
///
/// All hardware mutation runs on one worker task fed by a command queue, so
/// concurrent callers never race on the device. State is published through a
/// watch channel and can be read from anywhere.
///
/// Must be created inside a Tokio runtime.
pub struct CaptureSessionController {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl CaptureSessionController {
    pub fn new<H: CameraHardware>(
        hardware: H,
        permission: Arc<dyn CameraPermission>,
        settings: SessionSettings,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Unauthorized);

        let worker = SessionWorker {
            hardware: Box::new(hardware),
            permission,
            state: state_tx,
            device: None,
            settings,
            commands: commands.downgrade(),
        };
        tokio::spawn(worker.run(receiver));

        Self {
            commands,
            state: state_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub async fn request_authorization(&self) -> Result<SessionState> {
        self.request(Command::Authorize).await
    }

    pub async fn configure(&self) -> Result<DeviceDescriptor> {
        self.request(Command::Configure).await
    }

    pub async fn start(&self) -> Result<SessionState> {
        self.request(Command::Start).await
    }

    /// Fire-and-forget; stopping an idle session does nothing.
    pub fn stop(&self) {
        if self.commands.send(Command::Stop).is_err() {
            debug!("stop() after session shutdown");
        }
    }

    /// Take one photo. Fails with `Busy` instead of waiting if another
    /// capture is in flight.
    pub async fn capture(&self) -> Result<RawCapture> {
        match self.state() {
            SessionState::Capturing => return Err(CaptureError::Busy.into()),
            SessionState::Closed => return Err(SetupError::SessionClosed.into()),
            _ => {}
        }
        self.request(Command::Capture).await
    }

    /// Flash mode for subsequent captures, used only where the device and
    /// output both support flash.
    pub fn set_flash_mode(&self, mode: FlashMode) {
        if self.commands.send(Command::SetFlashMode(mode)).is_err() {
            debug!("set_flash_mode() after session shutdown");
        }
    }

    pub async fn descriptor(&self) -> Option<DeviceDescriptor> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Descriptor(tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// Stop the hardware and end the worker. Later calls fail with
    /// `SessionClosed`.
    pub fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_err() {
            debug!("shutdown() after session shutdown");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SetupError::SessionClosed)?;
        rx.await.map_err(|_| SetupError::SessionClosed)?
    }
}

struct SessionWorker {
    hardware: Box<dyn CameraHardware>,
    permission: Arc<dyn CameraPermission>,
    state: watch::Sender<SessionState>,
    device: Option<DeviceDescriptor>,
    settings: SessionSettings,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl SessionWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Authorize(reply) => {
                    let result = self.authorize().await;
                    let _ = reply.send(result);
                }
                Command::Configure(reply) => {
                    let _ = reply.send(self.configure());
                }
                Command::Start(reply) => {
                    let result = self.start().await;
                    let _ = reply.send(result);
                }
                Command::Stop => self.stop(),
                Command::Capture(reply) => self.begin_capture(reply),
                Command::CaptureFinished => self.finish_capture(),
                Command::SetFlashMode(mode) => self.settings.flash_mode = mode,
                Command::Descriptor(reply) => {
                    let _ = reply.send(self.device.clone());
                }
                Command::Shutdown => break,
            }
        }

        if self.hardware.is_running() {
            self.hardware.stop_running();
        }
        // An in-flight capture can no longer report back through the queue.
        self.set_state(SessionState::Closed);
        debug!("Capture session worker stopped");
    }

    fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn set_state(&self, next: SessionState) {
        debug!(from = ?self.current(), to = ?next, "Session state change");
        self.state.send_replace(next);
    }

    async fn authorize(&mut self) -> Result<SessionState> {
        let current = self.current();
        if !matches!(
            current,
            SessionState::Unauthorized | SessionState::Failed(_)
        ) {
            return Ok(current);
        }

        match self.permission.status() {
            AuthorizationStatus::Authorized => {}
            AuthorizationStatus::NotDetermined => {
                self.set_state(SessionState::AwaitingPermission);
                if !self.permission.request_access().await {
                    warn!("Camera access denied by user");
                    self.set_state(SessionState::Failed(FailureReason::AuthorizationDenied));
                    return Err(AuthorizationError::Denied.into());
                }
            }
            AuthorizationStatus::Denied => {
                warn!("Camera access previously denied");
                self.set_state(SessionState::Failed(FailureReason::AuthorizationDenied));
                return Err(AuthorizationError::Denied.into());
            }
            AuthorizationStatus::Restricted => {
                warn!("Camera access restricted");
                self.set_state(SessionState::Failed(
                    FailureReason::AuthorizationRestricted,
                ));
                return Err(AuthorizationError::Restricted.into());
            }
        }

        info!("Camera access granted");
        self.device = None;
        self.set_state(SessionState::Configuring);
        Ok(SessionState::Configuring)
    }

    fn configure(&mut self) -> Result<DeviceDescriptor> {
        match self.current() {
            SessionState::Unauthorized
            | SessionState::AwaitingPermission
            | SessionState::Failed(FailureReason::AuthorizationDenied)
            | SessionState::Failed(FailureReason::AuthorizationRestricted) => {
                return Err(SetupError::NotAuthorized.into());
            }
            SessionState::Capturing => return Err(CaptureError::Busy.into()),
            SessionState::Closed => return Err(SetupError::SessionClosed.into()),
            SessionState::Running => self.hardware.stop_running(),
            SessionState::Configuring | SessionState::Ready | SessionState::Failed(_) => {}
        }

        self.device = None;
        self.set_state(SessionState::Configuring);

        match self.configure_session() {
            Ok(descriptor) => {
                self.device = Some(descriptor.clone());
                self.set_state(SessionState::Ready);
                Ok(descriptor)
            }
            Err(error) => {
                warn!(%error, "Camera configuration failed");
                self.set_state(SessionState::Failed(FailureReason::Setup(error.clone())));
                Err(error.into())
            }
        }
    }

    fn configure_session(&mut self) -> std::result::Result<DeviceDescriptor, SetupError> {
        let device =
            select_device(&self.hardware.discover_devices()).ok_or(SetupError::NoDevice)?;

        self.hardware.begin_configuration();
        self.hardware.remove_all();

        if !self.hardware.add_input(&device) {
            self.hardware.rollback_configuration();
            return Err(SetupError::InvalidInput);
        }
        if !self.hardware.add_photo_output() {
            self.hardware.rollback_configuration();
            return Err(SetupError::InvalidOutput);
        }

        if let Err(e) = self
            .hardware
            .apply_tuning(&device, &CaptureTuning::DOCUMENT)
        {
            warn!(device = %device.id, error = %e, "Could not apply document tuning");
        }

        self.hardware.commit_configuration();

        info!(
            device = %device.id,
            kind = ?device.kind,
            macro_switch = device.supports_macro_switch,
            flash = device.has_flash,
            "Camera configured"
        );
        Ok(DeviceDescriptor::from(&device))
    }

    async fn start(&mut self) -> Result<SessionState> {
        match self.current() {
            state @ (SessionState::Running | SessionState::Capturing) => return Ok(state),
            SessionState::Ready => {}
            _ => return Err(SetupError::NotConfigured.into()),
        }

        // Every start gets the grace period before the hardware is checked.
        let mut delays = self.settings.start_retry_delays.clone().into_iter();
        let mut attempts = 0;
        loop {
            self.hardware.start_running();
            attempts += 1;
            tokio::time::sleep(self.settings.start_grace).await;
            if self.hardware.is_running() {
                break;
            }
            let Some(delay) = delays.next() else {
                break;
            };
            warn!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Capture session not running, retrying start"
            );
            tokio::time::sleep(delay).await;
        }

        if self.hardware.is_running() {
            info!(attempts, "Capture session running");
            self.set_state(SessionState::Running);
            return Ok(SessionState::Running);
        }

        let error = SetupError::StartFailed { attempts };
        warn!(%error, "Giving up on capture session start");
        self.hardware.stop_running();
        self.set_state(SessionState::Failed(FailureReason::Setup(error.clone())));
        Err(error.into())
    }

    fn stop(&mut self) {
        match self.current() {
            SessionState::Running | SessionState::Capturing => {
                self.hardware.stop_running();
                self.set_state(SessionState::Ready);
                info!("Capture session stopped");
            }
            _ => debug!("stop() ignored, session not running"),
        }
    }

    fn begin_capture(&mut self, reply: Reply<RawCapture>) {
        let (codec, receiver) = match self.dispatch_capture() {
            Ok(pending) => pending,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        // Hop back onto the queue before answering so the next capture
        // request always sees `Running`, even if the caller went away.
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = match receiver.await {
                Ok(result) => result,
                Err(_) => Err(CaptureError::HardwareCaptureFailed(
                    "completion dropped without a result".to_string(),
                )),
            };
            let result = result.and_then(|bytes| {
                if bytes.is_empty() {
                    Err(CaptureError::HardwareCaptureFailed(
                        "empty photo data".to_string(),
                    ))
                } else {
                    Ok(RawCapture::new(bytes, codec))
                }
            });

            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::CaptureFinished);
            }
            let _ = reply.send(result.map_err(PipelineError::from));
        });
    }

    fn dispatch_capture(
        &mut self,
    ) -> Result<(
        PhotoCodec,
        oneshot::Receiver<std::result::Result<Vec<u8>, CaptureError>>,
    )> {
        match self.current() {
            SessionState::Running => {}
            SessionState::Capturing => {
                debug!("Capture rejected, another capture in flight");
                return Err(CaptureError::Busy.into());
            }
            _ => return Err(CaptureError::NotReady.into()),
        }

        let codec = PhotoCodec::most_efficient(&self.hardware.available_codecs())
            .ok_or(SetupError::CodecUnavailable)?;

        let device_has_flash = self.device.as_ref().is_some_and(|d| d.has_flash);
        let flash = if device_has_flash && self.hardware.output_supports_flash() {
            self.settings.flash_mode
        } else {
            FlashMode::Off
        };

        let (completion, receiver) = PhotoCompletion::new();
        self.set_state(SessionState::Capturing);
        debug!(?codec, ?flash, "Capturing photo");
        self.hardware
            .capture_photo(PhotoSettings { codec, flash }, completion);

        Ok((codec, receiver))
    }

    fn finish_capture(&mut self) {
        if self.current() == SessionState::Capturing {
            self.set_state(SessionState::Running);
        }
    }
}
