// Command pool and pre-recorded draw commands
//
// The triangle never changes, so each swapchain image gets one command
// buffer recorded up front and resubmitted every frame. Buffers are
// re-recorded only when the swapchain is rebuilt.

use super::error::{RendererError, Result};
use super::swapchain::SwapchainResources;
use super::VulkanDevice;
use ash::vk;
use std::sync::Arc;

/// Owns the pool every command buffer is allocated from
pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(device.queue_families.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(RendererError::CommandRecording)?;

        Ok(Self { pool, device })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Also frees any buffer still allocated from it
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// One recorded command buffer per swapchain image, index-aligned with the framebuffers
pub struct CommandBufferSet {
    pub buffers: Vec<vk::CommandBuffer>,
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandBufferSet {
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn get(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index as usize).copied()
    }
}

impl Drop for CommandBufferSet {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.pool, &self.buffers)
            };
        }
    }
}

/// Record clear → bind → draw(3) → end for every framebuffer
pub fn record_all(
    pool: &CommandPool,
    resources: &SwapchainResources,
    clear_color: [f32; 4],
) -> Result<CommandBufferSet> {
    let device = &pool.device;

    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool.pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(resources.framebuffers.len() as u32);

    let buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .map_err(RendererError::CommandRecording)?;

    // Owned from here so a recording failure frees them
    let set = CommandBufferSet {
        buffers,
        pool: pool.pool,
        device: device.clone(),
    };

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue { float32: clear_color },
    }];

    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: resources.extent,
    };

    for (&cmd, &framebuffer) in set.buffers.iter().zip(&resources.framebuffers) {
        let begin_info = vk::CommandBufferBeginInfo::builder();

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(resources.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            device
                .device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(RendererError::CommandRecording)?;

            device
                .device
                .cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
            device
                .device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, resources.pipeline);
            device.device.cmd_draw(cmd, 3, 1, 0, 0);
            device.device.cmd_end_render_pass(cmd);

            device
                .device
                .end_command_buffer(cmd)
                .map_err(RendererError::CommandRecording)?;
        }
    }

    log::info!("Recorded {} command buffers", set.len());

    Ok(set)
}
