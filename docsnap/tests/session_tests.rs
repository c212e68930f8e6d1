use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use docsnap::camera::{
    AuthorizationStatus, CaptureSessionController, DeviceKind, FailureReason, FlashMode,
    PhotoCodec, SessionSettings, SessionState,
};
use docsnap::error::{AuthorizationError, CaptureError, PipelineError, SetupError};

mod common;
use common::{
    device, fast_settings, png_bytes, running_session, CameraScript, ScriptedCamera,
    ScriptedPermission,
};

async fn wait_for_state(session: &CaptureSessionController, expected: SessionState) {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"))
        .unwrap();
}

async fn wait_for_pending(camera: &ScriptedCamera) {
    for _ in 0..200 {
        if camera.with(|s| !s.pending.is_empty()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("capture never reached the hardware");
}

#[tokio::test]
async fn test_full_lifecycle_from_unauthorized() {
    let camera = ScriptedCamera::default();
    let permission = ScriptedPermission::new(AuthorizationStatus::NotDetermined, true);
    let session =
        CaptureSessionController::new(camera.clone(), permission.clone(), fast_settings());

    assert_eq!(session.state(), SessionState::Unauthorized);

    let state = session.request_authorization().await.unwrap();
    assert_eq!(state, SessionState::Configuring);
    assert_eq!(permission.request_count(), 1);

    let descriptor = session.configure().await.unwrap();
    assert_eq!(descriptor.device_id, "triple");
    assert_eq!(descriptor.kind, DeviceKind::MultiLens);
    assert!(descriptor.supports_macro_switch);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.descriptor().await, Some(descriptor));

    assert_eq!(session.start().await.unwrap(), SessionState::Running);
    assert_eq!(session.state(), SessionState::Running);
    assert!(camera.with(|s| s.running));

    // already running
    assert_eq!(session.start().await.unwrap(), SessionState::Running);
    assert_eq!(camera.with(|s| s.start_calls), 1);

    let capture = session.capture().await.unwrap();
    assert_eq!(capture.format, PhotoCodec::Png);
    assert_eq!(capture.bytes, png_bytes(64, 48));
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_denied_permission_fails_session() {
    let permission = ScriptedPermission::new(AuthorizationStatus::NotDetermined, false);
    let session =
        CaptureSessionController::new(ScriptedCamera::default(), permission, fast_settings());

    let result = session.request_authorization().await;
    assert_eq!(
        result,
        Err(PipelineError::Authorization(AuthorizationError::Denied))
    );
    assert_eq!(
        session.state(),
        SessionState::Failed(FailureReason::AuthorizationDenied)
    );

    assert_eq!(
        session.configure().await.unwrap_err(),
        PipelineError::Setup(SetupError::NotAuthorized)
    );
}

#[tokio::test]
async fn test_restricted_permission_does_not_prompt() {
    let permission = ScriptedPermission::new(AuthorizationStatus::Restricted, true);
    let session = CaptureSessionController::new(
        ScriptedCamera::default(),
        permission.clone(),
        fast_settings(),
    );

    assert_eq!(
        session.request_authorization().await,
        Err(PipelineError::Authorization(AuthorizationError::Restricted))
    );
    assert_eq!(permission.request_count(), 0);
    assert_eq!(
        session.state(),
        SessionState::Failed(FailureReason::AuthorizationRestricted)
    );
}

#[tokio::test]
async fn test_capture_while_capturing_is_busy() {
    let camera = ScriptedCamera::new(CameraScript {
        defer_capture: true,
        ..CameraScript::default()
    });
    let session = Arc::new(running_session(camera.clone()).await);

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.capture().await })
    };
    wait_for_state(&session, SessionState::Capturing).await;

    let second = session.capture().await;
    assert_eq!(second.unwrap_err(), PipelineError::Capture(CaptureError::Busy));
    assert_eq!(camera.with(|s| s.capture_calls), 1);
    assert_eq!(session.state(), SessionState::Capturing);

    wait_for_pending(&camera).await;
    camera.complete_pending(Ok(vec![1, 2, 3]));

    let capture = first.await.unwrap().unwrap();
    assert_eq!(capture.bytes, vec![1, 2, 3]);
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_abandoned_capture_returns_to_running() {
    let camera = ScriptedCamera::new(CameraScript {
        defer_capture: true,
        ..CameraScript::default()
    });
    let session = Arc::new(running_session(camera.clone()).await);

    let abandoned = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.capture().await })
    };
    wait_for_state(&session, SessionState::Capturing).await;
    abandoned.abort();

    wait_for_pending(&camera).await;
    camera.complete_pending(Ok(vec![9]));
    wait_for_state(&session, SessionState::Running).await;

    camera.with(|s| s.defer_capture = false);
    let capture = session.capture().await.unwrap();
    assert_eq!(capture.bytes, png_bytes(64, 48));
    assert_eq!(camera.with(|s| s.capture_calls), 2);
}

#[tokio::test]
async fn test_empty_photo_is_hardware_failure() {
    let camera = ScriptedCamera::new(CameraScript {
        photo: Vec::new(),
        ..CameraScript::default()
    });
    let session = running_session(camera).await;

    let result = session.capture().await;
    assert!(matches!(
        result,
        Err(PipelineError::Capture(CaptureError::HardwareCaptureFailed(_)))
    ));
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_no_codec_available() {
    let camera = ScriptedCamera::new(CameraScript {
        codecs: Vec::new(),
        ..CameraScript::default()
    });
    let session = running_session(camera.clone()).await;

    assert_eq!(
        session.capture().await.unwrap_err(),
        PipelineError::Setup(SetupError::CodecUnavailable)
    );
    assert_eq!(camera.with(|s| s.capture_calls), 0);
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_rejected_input_rolls_back_then_recovers() {
    let camera = ScriptedCamera::new(CameraScript {
        reject_input: true,
        ..CameraScript::default()
    });
    let session =
        CaptureSessionController::new(camera.clone(), ScriptedPermission::granted(), fast_settings());
    session.request_authorization().await.unwrap();

    assert_eq!(
        session.configure().await.unwrap_err(),
        PipelineError::Setup(SetupError::InvalidInput)
    );
    assert_eq!(camera.with(|s| (s.rollbacks, s.commits)), (1, 0));
    assert_eq!(
        session.state(),
        SessionState::Failed(FailureReason::Setup(SetupError::InvalidInput))
    );
    assert_eq!(session.descriptor().await, None);

    camera.with(|s| s.reject_input = false);
    session.configure().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(camera.with(|s| s.commits), 1);
}

#[tokio::test]
async fn test_rejected_output_rolls_back() {
    let camera = ScriptedCamera::new(CameraScript {
        reject_output: true,
        ..CameraScript::default()
    });
    let session =
        CaptureSessionController::new(camera.clone(), ScriptedPermission::granted(), fast_settings());
    session.request_authorization().await.unwrap();

    assert_eq!(
        session.configure().await.unwrap_err(),
        PipelineError::Setup(SetupError::InvalidOutput)
    );
    assert_eq!(camera.with(|s| s.rollbacks), 1);
    assert!(!camera.with(|s| s.configuring));
}

#[tokio::test]
async fn test_no_suitable_device() {
    let camera = ScriptedCamera::new(CameraScript {
        devices: vec![device("tele", DeviceKind::Telephoto, false, false)],
        ..CameraScript::default()
    });
    let session =
        CaptureSessionController::new(camera, ScriptedPermission::granted(), fast_settings());
    session.request_authorization().await.unwrap();

    assert_eq!(
        session.configure().await.unwrap_err(),
        PipelineError::Setup(SetupError::NoDevice)
    );
    assert_eq!(
        session.state(),
        SessionState::Failed(FailureReason::Setup(SetupError::NoDevice))
    );
}

#[tokio::test]
async fn test_start_retries_until_running() {
    let camera = ScriptedCamera::new(CameraScript {
        start_failures: 2,
        ..CameraScript::default()
    });
    let session = running_session(camera.clone()).await;

    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(camera.with(|s| s.start_calls), 3);
}

#[tokio::test]
async fn test_slow_starting_hardware_gets_grace_on_every_attempt() {
    let camera = ScriptedCamera::new(CameraScript {
        start_failures: 3,
        start_latency: Duration::from_millis(20),
        ..CameraScript::default()
    });
    let settings = SessionSettings {
        start_grace: Duration::from_millis(60),
        ..SessionSettings::default()
    }
    .with_start_retry_base(Duration::from_millis(2));
    let session = CaptureSessionController::new(camera.clone(), ScriptedPermission::granted(), settings);
    session.request_authorization().await.unwrap();
    session.configure().await.unwrap();

    assert_eq!(session.start().await.unwrap(), SessionState::Running);
    assert_eq!(camera.with(|s| s.start_calls), 4);
}

#[tokio::test]
async fn test_start_gives_up_after_retries() {
    let camera = ScriptedCamera::new(CameraScript {
        start_failures: 10,
        ..CameraScript::default()
    });
    let session =
        CaptureSessionController::new(camera.clone(), ScriptedPermission::granted(), fast_settings());
    session.request_authorization().await.unwrap();
    session.configure().await.unwrap();

    let expected = SetupError::StartFailed { attempts: 4 };
    assert_eq!(
        session.start().await.unwrap_err(),
        PipelineError::Setup(expected.clone())
    );
    assert_eq!(camera.with(|s| s.start_calls), 4);
    assert!(!camera.with(|s| s.running));
    assert_eq!(
        session.state(),
        SessionState::Failed(FailureReason::Setup(expected))
    );
}

#[tokio::test]
async fn test_out_of_order_calls() {
    let session = CaptureSessionController::new(
        ScriptedCamera::default(),
        ScriptedPermission::granted(),
        fast_settings(),
    );

    assert_eq!(
        session.configure().await.unwrap_err(),
        PipelineError::Setup(SetupError::NotAuthorized)
    );
    session.request_authorization().await.unwrap();
    assert_eq!(
        session.start().await.unwrap_err(),
        PipelineError::Setup(SetupError::NotConfigured)
    );
    session.configure().await.unwrap();
    assert_eq!(
        session.capture().await.unwrap_err(),
        PipelineError::Capture(CaptureError::NotReady)
    );
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let camera = ScriptedCamera::default();
    let session = running_session(camera.clone()).await;

    session.stop();
    session.stop();
    // queued after both stops
    session.descriptor().await;

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(camera.with(|s| s.stop_calls), 1);
    assert!(!camera.with(|s| s.running));

    session.start().await.unwrap();
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_flash_and_codec_follow_hardware_support() {
    let camera = ScriptedCamera::new(CameraScript {
        codecs: vec![PhotoCodec::Png, PhotoCodec::Jpeg],
        ..CameraScript::default()
    });
    let session = running_session(camera.clone()).await;

    session.set_flash_mode(FlashMode::On);
    session.capture().await.unwrap();
    let settings = camera.with(|s| s.last_settings).unwrap();
    assert_eq!(settings.flash, FlashMode::On);
    assert_eq!(settings.codec, PhotoCodec::Jpeg);

    camera.with(|s| s.flash_output = false);
    session.capture().await.unwrap();
    assert_eq!(camera.with(|s| s.last_settings).unwrap().flash, FlashMode::Off);
}

#[tokio::test]
async fn test_shutdown_closes_session() {
    let camera = ScriptedCamera::default();
    let session = running_session(camera.clone()).await;

    session.shutdown();
    assert_eq!(
        session.capture().await.unwrap_err(),
        PipelineError::Setup(SetupError::SessionClosed)
    );
    assert!(!camera.with(|s| s.running));
    wait_for_state(&session, SessionState::Closed).await;

    // commands after close are dropped quietly
    session.set_flash_mode(FlashMode::On);
    session.stop();
    session.shutdown();
    assert_eq!(session.descriptor().await, None);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_shutdown_during_capture_closes_session() {
    let camera = ScriptedCamera::new(CameraScript {
        defer_capture: true,
        ..CameraScript::default()
    });
    let session = Arc::new(running_session(camera.clone()).await);

    let in_flight = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.capture().await })
    };
    wait_for_pending(&camera).await;

    session.shutdown();
    wait_for_state(&session, SessionState::Closed).await;
    assert_eq!(
        session.capture().await.unwrap_err(),
        PipelineError::Setup(SetupError::SessionClosed)
    );

    camera.complete_pending(Ok(vec![4, 2]));
    assert_eq!(in_flight.await.unwrap().unwrap().bytes, vec![4, 2]);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        session.configure().await.unwrap_err(),
        PipelineError::Setup(SetupError::SessionClosed)
    );
}
