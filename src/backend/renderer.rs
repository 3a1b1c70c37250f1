// Renderer - owns every GPU object and exposes the frame primitives
//
// OWNERSHIP (dropped top to bottom):
// ┌─────────────────────────────────────────────────────────────────┐
// │  command buffers      (per swapchain image, rebuilt on resize)  │
// │  swapchain resources  (views, render pass, pipeline, fbs)       │
// │  frame slots          (semaphores + fence per frame in flight)  │
// │  command pool                                                   │
// │  device               (logical device → surface → instance)     │
// └─────────────────────────────────────────────────────────────────┘

use super::commands::{self, CommandBufferSet, CommandPool};
use super::error::{RendererError, Result};
use super::shader::ShaderSet;
use super::swapchain::{AcquireOutcome, PresentOutcome, SwapchainResources};
use super::sync::FrameSlots;
use super::VulkanDevice;
use crate::config::Config;
use crate::render_loop::FrameTarget;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

pub struct Renderer {
    command_buffers: Option<CommandBufferSet>,
    swapchain: Option<SwapchainResources>,
    frames: FrameSlots,
    command_pool: CommandPool,
    shaders: ShaderSet,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
}

impl Renderer {
    /// Initialize all Vulkan resources for a window.
    ///
    /// Shaders are read before any GPU object exists so a missing `.spv`
    /// fails fast.
    pub fn new(
        config: &Config,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        window_extent: vk::Extent2D,
    ) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let shaders = ShaderSet::load(config.shaders.vertex_path(), config.shaders.fragment_path())?;

        let device = VulkanDevice::new(
            &config.window.title,
            display_handle,
            window_handle,
            config.validation_enabled(),
        )?;

        let swapchain = SwapchainResources::build(device.clone(), &shaders, window_extent)?;
        let command_pool = CommandPool::new(device.clone())?;
        let command_buffers = commands::record_all(&command_pool, &swapchain, config.graphics.clear_color)?;
        let frames = FrameSlots::new(&device)?;

        log::info!("Vulkan initialized on {}", device.name);

        Ok(Self {
            command_buffers: Some(command_buffers),
            swapchain: Some(swapchain),
            frames,
            command_pool,
            shaders,
            clear_color: config.graphics.clear_color,
            device,
        })
    }

    fn swapchain(&self) -> Result<&SwapchainResources> {
        self.swapchain.as_ref().ok_or(RendererError::SwapchainLost)
    }
}

impl FrameTarget for Renderer {
    type Fence = vk::Fence;

    fn slot_fence(&self, slot: usize) -> vk::Fence {
        self.frames.get(slot).in_flight_fence
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(RendererError::FenceWait)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.frames.get(slot).image_available;
        self.swapchain()?.acquire_next_image(semaphore)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let sync = self.frames.get(slot);
        let cmd = self
            .command_buffers
            .as_ref()
            .and_then(|set| set.get(image_index))
            .ok_or(RendererError::SwapchainLost)?;

        // Only reset once work is certain to be submitted, or the next
        // wait on this slot would block forever.
        unsafe { self.device.device.reset_fences(&[sync.in_flight_fence]) }
            .map_err(RendererError::QueueSubmit)?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .map_err(RendererError::QueueSubmit)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.frames.get(slot).render_finished;
        self.swapchain()?
            .present(self.device.present_queue, image_index, &[render_finished])
    }

    fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, SwapchainResources::image_count)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn rebuild(&mut self, window_extent: vk::Extent2D) -> Result<()> {
        // Old set goes first: a surface can back only one swapchain
        self.command_buffers = None;
        self.swapchain = None;

        let swapchain = SwapchainResources::build(self.device.clone(), &self.shaders, window_extent)?;
        let command_buffers = commands::record_all(&self.command_pool, &swapchain, self.clear_color)?;

        debug_assert_eq!(command_buffers.len(), swapchain.image_count());

        self.swapchain = Some(swapchain);
        self.command_buffers = Some(command_buffers);

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during cleanup: {}", e);
        }
    }
}
