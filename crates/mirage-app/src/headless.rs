//! Headless frame pump: drives the overlay against the wall clock and logs
//! frame summaries instead of drawing anything.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::renderer::{Renderer, RendererContext};

/// How often a running summary line is emitted, in frames.
const SUMMARY_INTERVAL: usize = 60;

/// Renderer that pumps the driver for a bounded number of frames.
pub struct HeadlessRenderer {
    /// Total frames to pump before returning.
    pub frame_budget: usize,
    /// Sleep between pumps; roughly the display refresh interval.
    pub frame_interval: Duration,
    /// Emit the first frame packet as pretty JSON at debug level.
    pub dump_first_frame: bool,
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self {
            frame_budget: 600,
            frame_interval: Duration::from_millis(16),
            dump_first_frame: false,
        }
    }
}

impl HeadlessRenderer {
    /// Build a renderer honoring `MIRAGE_FRAMES` and `MIRAGE_DUMP_FRAME`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut renderer = Self::default();
        if let Ok(frames) = std::env::var("MIRAGE_FRAMES")
            && let Ok(frames) = frames.parse::<usize>()
        {
            renderer.frame_budget = frames;
        }
        if std::env::var("MIRAGE_DUMP_FRAME").is_ok_and(|value| value == "1") {
            renderer.dump_first_frame = true;
        }
        renderer
    }
}

impl Renderer for HeadlessRenderer {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn run(&self, ctx: RendererContext) -> Result<()> {
        let started = Instant::now();
        let mut dumped = !self.dump_first_frame;
        for frame in 0..self.frame_budget {
            let now_ms = started.elapsed().as_secs_f64() * 1000.0;
            {
                let mut driver = ctx
                    .driver
                    .lock()
                    .map_err(|_| anyhow!("frame driver mutex poisoned"))?;
                if driver.pump(now_ms).is_some() {
                    if !dumped {
                        dumped = true;
                        let packet = serde_json::to_string_pretty(driver.latest_frame())
                            .context("serializing frame packet")?;
                        debug!(frame, "first frame packet:\n{packet}");
                    }
                    if frame % SUMMARY_INTERVAL == 0
                        && let Some(summary) = driver.scene().history().last()
                    {
                        info!(
                            tick = summary.tick.0,
                            entities = summary.entity_count,
                            wrapped = summary.wrapped,
                            lane_moves = summary.lane_moves,
                            avg_confidence = summary.average_confidence,
                            "frame summary",
                        );
                    }
                }
            }
            if !self.frame_interval.is_zero() {
                thread::sleep(self.frame_interval);
            }
        }
        info!(
            frames = self.frame_budget,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "headless session complete",
        );
        Ok(())
    }
}
