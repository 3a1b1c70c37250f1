// =============================================================================
// HELLO TRIANGLE - Vulkan swapchain renderer
// =============================================================================
//
// Draws one colored triangle per frame and keeps presenting through window
// resizes and minimization.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  AppWindow (winit, pumped events)                               │
// │    └── RenderLoop (frame slots, images-in-flight, rebuilds)     │
// │          └── Renderer                                           │
// │                ├── VulkanDevice (instance, surface, queues)     │
// │                ├── SwapchainResources (views, pipeline, fbs)    │
// │                ├── Command buffers (one per image, prerecorded) │
// │                └── Frame slots (semaphores + fence)             │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Poll window events
// 2. Wait for this slot's previous frame
// 3. Acquire swapchain image
// 4. Wait for whichever frame still renders into that image
// 5. Submit pre-recorded commands to GPU
// 6. Present rendered image to screen
// 7. Rebuild the swapchain if the surface changed
//
// =============================================================================

mod backend;
mod config;
mod render_loop;
mod window;

use anyhow::{Context, Result};
use backend::Renderer;
use config::Config;
use render_loop::{FrameTarget, RenderLoop, WindowSource};
use std::process::ExitCode;
use window::AppWindow;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    // Load configuration from config.toml; problems are reported once
    // the logger is up
    let (config, config_error) = Config::load();

    init_logging(&config);
    log::info!("Starting hello-triangle v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::debug!("Config: {:?}", config);
    log::info!(
        "Validation layers: {}",
        if config.validation_enabled() { "enabled" } else { "disabled" }
    );

    match run(&config) {
        Ok(()) => {
            log::info!("Cleanup complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging: config level first, `RUST_LOG` overrides it
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();
    builder.init();
}

fn run(config: &Config) -> Result<()> {
    let mut window = AppWindow::create(&config.window)?;
    let (display_handle, window_handle) = window.raw_handles()?;

    // Declared after the window so it is destroyed before the surface's window
    let mut renderer = Renderer::new(
        config,
        display_handle,
        window_handle,
        window.drawable_extent(),
    )
    .context("Failed to initialize Vulkan")?;

    RenderLoop::new(renderer.image_count(), config.debug.show_fps)
        .run(&mut window, &mut renderer)
        .context("Render loop failed")?;

    Ok(())
}
