use std::sync::{Arc, Mutex};
use std::time::Duration;

use mirage_app::{HeadlessRenderer, Renderer, RendererContext};
use mirage_core::{FrameDriver, MirageConfig, SceneState, Tick, Viewport};

fn shared_driver(seed: u64) -> Arc<Mutex<FrameDriver>> {
    let config = MirageConfig {
        rng_seed: Some(seed),
        ..MirageConfig::default()
    };
    let scene = SceneState::new(config, Viewport::new(1280, 720)).expect("scene");
    Arc::new(Mutex::new(FrameDriver::new(scene)))
}

#[test]
fn headless_session_pumps_frames() {
    let driver = shared_driver(0x5EED);
    let renderer = HeadlessRenderer {
        frame_budget: 30,
        frame_interval: Duration::from_millis(1),
        dump_first_frame: true,
    };
    assert_eq!(renderer.name(), "headless");
    renderer
        .run(RendererContext {
            driver: Arc::clone(&driver),
        })
        .expect("headless run");

    let driver = driver.lock().expect("driver lock");
    // First pump re-arms the clock; every later pump advances one tick.
    assert!(driver.scene().tick() >= Tick(20));
    let frame = driver.latest_frame();
    assert_eq!(frame.readings.len(), driver.scene().entity_count());
    assert!(!frame.readings.is_empty());
    assert!(driver.scene().history().count() > 0);
}

#[test]
fn stopped_driver_ignores_further_pumps() {
    let driver = shared_driver(0x5EED);
    {
        let mut guard = driver.lock().expect("driver lock");
        guard.pump(0.0);
        guard.pump(16.0);
        guard.stop();
    }
    let renderer = HeadlessRenderer {
        frame_budget: 10,
        frame_interval: Duration::ZERO,
        dump_first_frame: false,
    };
    renderer
        .run(RendererContext {
            driver: Arc::clone(&driver),
        })
        .expect("headless run");

    let guard = driver.lock().expect("driver lock");
    assert_eq!(guard.scene().tick(), Tick(1));
}
