use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docsnap::camera::{CaptureSessionController, FlashMode, GrantedPermission, StillImageCamera};
use docsnap::config::{Config, LocalOcrConfig};
use docsnap::credentials::{CredentialStore, EnvCredentialStore};
use docsnap::extraction::{
    BackendPreference, BackendSelector, CloudVisionExtractor, LocalOcrExtractor, TextRecognizer,
    UnavailableRecognizer,
};
use docsnap::normalize::{EncodeFormat, ResizePolicy};
use docsnap::pipeline::Orchestrator;
use docsnap::telemetry::TracingTelemetry;

#[derive(Parser)]
#[command(name = "docsnap")]
#[command(about = "Capture a document image and extract its text")]
struct Args {
    /// Image file served by the virtual still camera
    #[arg(long)]
    image: PathBuf,

    /// Extraction backend: auto, cloud or local
    #[arg(long)]
    backend: Option<BackendPreference>,

    /// Longest side of the normalized image
    #[arg(long)]
    max_dimension: Option<u32>,

    /// Resize policy: uniform or exact
    #[arg(long)]
    policy: Option<ResizePolicy>,

    /// Output encoding: jpeg or png
    #[arg(long)]
    format: Option<EncodeFormat>,

    /// JPEG quality, 1-100
    #[arg(long)]
    quality: Option<u8>,

    /// Skip contrast enhancement
    #[arg(long)]
    no_contrast: bool,

    /// Cloud model id
    #[arg(long)]
    model: Option<String>,

    /// Instruction sent with the image to the cloud model
    #[arg(long)]
    prompt: Option<String>,

    /// Sampling temperature passed in the generation config
    #[arg(long)]
    temperature: Option<f64>,

    /// Total extraction attempts, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Flash mode: off, on or auto
    #[arg(long)]
    flash: Option<FlashMode>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        let run = &mut config.run;
        if let Some(backend) = self.backend {
            run.backend = backend;
        }
        if let Some(dimension) = self.max_dimension {
            run.target_width = dimension;
            run.target_height = dimension;
        }
        if let Some(policy) = self.policy {
            run.resize_policy = policy;
        }
        if let Some(format) = self.format {
            run.format = format;
        }
        if let Some(quality) = self.quality {
            run.quality = quality;
        }
        if self.no_contrast {
            run.enhance_contrast = false;
        }
        if let Some(model) = &self.model {
            run.model_id = model.clone();
        }
        if let Some(prompt) = &self.prompt {
            run.prompt = prompt.clone();
        }
        if let Some(temperature) = self.temperature {
            run.generation_options
                .insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_attempts) = self.max_attempts {
            run.max_attempts = max_attempts;
        }
        if let Some(flash) = self.flash {
            config.session.flash_mode = flash;
        }
    }
}

fn local_recognizer(config: &LocalOcrConfig) -> Arc<dyn TextRecognizer> {
    #[cfg(feature = "tesseract")]
    {
        match docsnap::extraction::TesseractRecognizer::new(&config.languages) {
            Ok(recognizer) => return Arc::new(recognizer),
            Err(e) => tracing::warn!("Tesseract unavailable: {}", e),
        }
    }

    Arc::new(UnavailableRecognizer::new(format!(
        "no on-device recognizer for '{}' (build with --features tesseract)",
        config.languages
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docsnap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env();
    args.apply(&mut config);

    let camera = StillImageCamera::open(&args.image)?;
    let session = Arc::new(CaptureSessionController::new(
        camera,
        Arc::new(GrantedPermission),
        config.session.settings(),
    ));

    session.request_authorization().await?;
    let device = session.configure().await?;
    tracing::info!("Using camera device {} ({:?})", device.device_id, device.kind);
    session.start().await?;

    let client = CloudVisionExtractor::build_client(config.cloud.timeout())?;
    let local = LocalOcrExtractor::new(
        local_recognizer(&config.local_ocr),
        config.local_ocr.recognition_options(),
    );
    let selector = BackendSelector::new(client, config.cloud.base_url.clone(), local);

    let credentials = Arc::new(EnvCredentialStore::new(config.cloud.credential_var.clone()));
    if credentials.fetch().is_none() && config.run.backend == BackendPreference::Auto {
        tracing::info!(
            "{} is not set - falling back to on-device OCR",
            credentials.var()
        );
    }

    let orchestrator = Orchestrator::new(
        Arc::clone(&session),
        credentials,
        selector,
        Arc::new(TracingTelemetry),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling run...");
            on_signal.cancel();
        }
    });

    let result = orchestrator.run(&config.run, &cancel).await;
    session.stop();
    session.shutdown();

    let text = result?;
    println!("{text}");
    Ok(())
}
