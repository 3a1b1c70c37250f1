// =============================================================================
// WINDOW - winit window driven by explicit event pumping
// =============================================================================
//
// The render loop owns control flow, so instead of handing the thread to
// `run_app` the event loop is pumped: without blocking once per frame, and
// blocking while the window is minimized.

use crate::config::WindowConfig;
use crate::render_loop::WindowSource;
use anyhow::{bail, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

pub struct AppWindow {
    state: WindowState,
    event_loop: EventLoop<()>,
}

struct WindowState {
    attributes: WindowAttributes,
    window: Option<Window>,
    create_error: Option<String>,
    close_requested: bool,
    resized: bool,
}

impl AppWindow {
    /// Open a window and pump until the platform has created it
    pub fn create(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;

        let attributes = Window::default_attributes()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        let mut window = Self {
            state: WindowState::new(attributes),
            event_loop,
        };

        while window.state.window.is_none() {
            if let Some(e) = window.state.create_error.take() {
                bail!("Failed to create window: {}", e);
            }
            if window.state.close_requested {
                bail!("Event loop exited before the window was created");
            }
            window.pump(Some(Duration::ZERO));
        }

        // Drain the initial configure/resize events
        window.pump(Some(Duration::ZERO));
        window.state.finish_startup();

        log::info!(
            "Window: {}x{} ({})",
            config.width,
            config.height,
            config.title
        );

        Ok(window)
    }

    /// Handles the surface is created from
    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        match self.state.window.as_ref() {
            Some(window) => Ok((window.raw_display_handle(), window.raw_window_handle())),
            None => bail!("Window is not available"),
        }
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }
}

impl WindowSource for AppWindow {
    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn should_close(&self) -> bool {
        self.state.close_requested || self.state.window.is_none()
    }

    fn drawable_extent(&self) -> vk::Extent2D {
        let size = self
            .state
            .window
            .as_ref()
            .map_or(PhysicalSize::new(0, 0), Window::inner_size);

        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }
}

impl WindowState {
    fn new(attributes: WindowAttributes) -> Self {
        Self {
            attributes,
            window: None,
            create_error: None,
            close_requested: false,
            resized: false,
        }
    }

    /// Platforms report the initial size as a resize while the window is
    /// created; the first swapchain is already built for that size.
    fn finish_startup(&mut self) {
        self.resized = false;
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                }
            }

            _ => {}
        }
    }
}
