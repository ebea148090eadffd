use std::sync::{Arc, Mutex};

use anyhow::Result;
use mirage_app::{HeadlessRenderer, Renderer, RendererContext, SharedDriver};
use mirage_core::{FrameDriver, MirageConfig, SceneState, Viewport};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();
    let driver = bootstrap()?;
    info!("Starting Mirage overlay demo");
    let renderer = HeadlessRenderer::from_env();
    renderer.run(RendererContext { driver })?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap() -> Result<SharedDriver> {
    let config = MirageConfig {
        rng_seed: env_u64("MIRAGE_SEED"),
        ..MirageConfig::default()
    };
    let viewport = env_viewport().unwrap_or(Viewport::new(1280, 720));
    let scene = SceneState::new(config, viewport)?;
    info!(
        width = viewport.width,
        height = viewport.height,
        entities = scene.entity_count(),
        lanes = scene.lanes().len(),
        "Scene bootstrapped",
    );
    Ok(Arc::new(Mutex::new(FrameDriver::new(scene))))
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

/// Parses `MIRAGE_VIEWPORT` of the form `WIDTHxHEIGHT`, e.g. `1920x1080`.
fn env_viewport() -> Option<Viewport> {
    let raw = std::env::var("MIRAGE_VIEWPORT").ok()?;
    let (width, height) = raw.split_once('x')?;
    Some(Viewport::new(
        width.trim().parse().ok()?,
        height.trim().parse().ok()?,
    ))
}
