//! Shared application plumbing for the Mirage overlay demo.

use std::sync::{Arc, Mutex};

use mirage_core::FrameDriver;

/// Frame driver shared between the shell and whichever renderer runs it.
pub type SharedDriver = Arc<Mutex<FrameDriver>>;

pub mod headless;

pub mod renderer {
    use anyhow::Result;

    use crate::SharedDriver;

    /// Shared context passed to renderer implementations.
    pub struct RendererContext {
        pub driver: SharedDriver,
    }

    pub trait Renderer {
        /// Stable identifier describing the renderer implementation (e.g., "headless").
        fn name(&self) -> &'static str;

        /// Drive the overlay; blocks until the rendering session completes.
        fn run(&self, ctx: RendererContext) -> Result<()>;
    }
}

pub use headless::HeadlessRenderer;
pub use renderer::{Renderer, RendererContext};
