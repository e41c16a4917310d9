use anyhow::{Context, Result};
use rollcall_core::{FrameRecognizer, OnnxFaceMatcher};
use rollcalld::{create_router, seed, spawn_engine, spawn_sweeper, AppState, Config, Storage, V4lOpener};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollcalld=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    std::fs::create_dir_all(&config.upload_dir).with_context(|| {
        format!("failed to create upload dir {}", config.upload_dir.display())
    })?;

    let store = Storage::open(&config.db_path)
        .await
        .context("failed to open attendance database")?;
    if config.seed_sample_data && seed::seed_sample_data(&store).await? {
        info!("empty database seeded with sample data");
    }

    // Models load synchronously so a missing file stops startup.
    let detector_path = config.detector_model_path();
    let encoder_path = config.encoder_model_path();
    let matcher = OnnxFaceMatcher::load(&detector_path, &encoder_path)
        .context("failed to load face models")?;
    info!(detector = %detector_path, encoder = %encoder_path, "face models loaded");

    let engine = spawn_engine(
        Box::new(matcher),
        Box::new(V4lOpener {
            device: config.camera_device.clone(),
            width: config.camera_width,
            height: config.camera_height,
        }),
        FrameRecognizer::new(config.tolerance, config.downscale),
        config.jpeg_quality,
    )
    .context("failed to start recognition engine")?;

    let state = Arc::new(AppState::new(
        store,
        engine,
        config.upload_dir.clone(),
        config.cooldown,
        config.suppression_capacity,
    ));
    state
        .roster
        .reload(&state.store)
        .await
        .context("failed to load registered faces")?;

    let sweep_every = config.cooldown.max(Duration::from_secs(1));
    let _sweeper = spawn_sweeper(&state, sweep_every);

    let app = create_router(state.clone(), config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        camera = %config.camera_device,
        tolerance = config.tolerance,
        "rollcalld ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Err(e) = state.engine.stop_camera().await {
        tracing::warn!(error = %e, "failed to release camera on shutdown");
    }
    info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
    }
}
