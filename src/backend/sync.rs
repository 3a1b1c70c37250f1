// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// Slots are reused round-robin and are independent of swapchain image indices.

use super::error::{RendererError, Result};
use super::VulkanDevice;
use ash::vk;
use std::sync::Arc;

/// Number of frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            device: device.clone(),
        };

        unsafe {
            sync.image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RendererError::SyncObjectCreation)?;
            sync.render_finished = device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RendererError::SyncObjectCreation)?;
            sync.in_flight_fence = device
                .device
                .create_fence(&fence_info, None)
                .map_err(RendererError::SyncObjectCreation)?;
        }

        Ok(sync)
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Fixed pool of frame slots
pub struct FrameSlots {
    slots: [FrameSync; MAX_FRAMES_IN_FLIGHT],
}

impl FrameSlots {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let slots: Vec<FrameSync> = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(device))
            .collect::<Result<_>>()?;

        let slots = <[FrameSync; MAX_FRAMES_IN_FLIGHT]>::try_from(slots)
            .unwrap_or_else(|_| unreachable!("exactly MAX_FRAMES_IN_FLIGHT slots are created"));

        log::debug!("Created {} frame slots", MAX_FRAMES_IN_FLIGHT);

        Ok(Self { slots })
    }

    pub fn get(&self, slot: usize) -> &FrameSync {
        &self.slots[slot % MAX_FRAMES_IN_FLIGHT]
    }
}

/// Swapchain image index → fence of the slot last rendering into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagesInFlight<F> {
    fences: Vec<Option<F>>,
}

impl<F: Copy> ImagesInFlight<F> {
    pub fn new(image_count: usize) -> Self {
        Self {
            fences: vec![None; image_count],
        }
    }

    /// Forget every pending fence and track `image_count` images
    pub fn reset(&mut self, image_count: usize) {
        self.fences.clear();
        self.fences.resize(image_count, None);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn pending(&self, image_index: u32) -> Option<F> {
        self.fences.get(image_index as usize).copied().flatten()
    }

    /// Record `fence` as the one guarding `image_index`
    pub fn assign(&mut self, image_index: u32, fence: F) {
        let index = image_index as usize;
        if index >= self.fences.len() {
            self.fences.resize(index + 1, None);
        }
        self.fences[index] = Some(fence);
    }
}
