// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// together with everything sized or formatted after it: image views,
// render pass, pipeline and framebuffers. The whole set is built and
// destroyed as a unit whenever the surface changes.

use super::error::{RendererError, Result};
use super::pipeline;
use super::shader::ShaderSet;
use super::{QueueFamilies, VulkanDevice};
use ash::vk;
use std::sync::Arc;

/// Surface state queried fresh for every (re)build
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(device: &VulkanDevice) -> Result<Self> {
        let loader = &device.context.surface_loader;
        let surface = device.context.surface;
        let physical_device = device.physical_device;

        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(RendererError::SwapchainCreation)?,
                formats: loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map_err(RendererError::SwapchainCreation)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map_err(RendererError::SwapchainCreation)?,
            })
        }
    }
}

/// A current extent of u32::MAX means the surface size follows the swapchain
fn extent_is_undefined(capabilities: &vk::SurfaceCapabilitiesKHR) -> bool {
    capabilities.current_extent.width == u32::MAX
}

/// Reported current extent is authoritative; otherwise clamp the window size.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if !extent_is_undefined(capabilities) {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Prefer 8-bit BGRA sRGB, else whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is the only mode every implementation must support.
pub fn choose_present_mode(_available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// One more than the minimum, capped by a nonzero maximum
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Concurrent sharing only when graphics and present live in different families
pub fn choose_sharing(queue_families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if queue_families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![queue_families.graphics, queue_families.present],
        )
    }
}

/// Negotiated swapchain parameters
#[derive(Debug, Clone)]
pub struct SwapchainPlan {
    pub extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn negotiate(
        support: &SurfaceSupport,
        window_extent: vk::Extent2D,
        queue_families: QueueFamilies,
    ) -> Result<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .ok_or(RendererError::SwapchainCreation(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
        let (sharing_mode, queue_family_indices) = choose_sharing(queue_families);

        Ok(Self {
            extent: choose_extent(&support.capabilities, window_extent),
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            image_count: choose_image_count(&support.capabilities),
            sharing_mode,
            queue_family_indices,
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Everything that must be rebuilt when the surface changes.
///
/// Invariant: `image_views`, `framebuffers` and `images` have equal length.
pub struct SwapchainResources {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub framebuffers: Vec<vk::Framebuffer>,
    device: Arc<VulkanDevice>,
}

impl SwapchainResources {
    /// Build swapchain → views → render pass → pipeline → framebuffers.
    pub fn build(
        device: Arc<VulkanDevice>,
        shaders: &ShaderSet,
        window_extent: vk::Extent2D,
    ) -> Result<Self> {
        let support = SurfaceSupport::query(&device)?;
        let plan = SwapchainPlan::negotiate(&support, window_extent, device.queue_families)?;

        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images requested",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.context.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing_mode)
            .queue_family_indices(&plan.queue_family_indices)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RendererError::SwapchainCreation)?;

        // Null handles are valid no-ops for vkDestroy*, so a partially built
        // set is still torn down correctly if a later step fails.
        let mut resources = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: plan.surface_format.format,
            extent: plan.extent,
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::new(),
            device,
        };

        resources.images = unsafe { resources.device.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(RendererError::SwapchainCreation)?;

        for &image in &resources.images {
            let view = create_image_view(&resources.device, image, resources.format)?;
            resources.image_views.push(view);
        }

        resources.render_pass = pipeline::create_render_pass(&resources.device, resources.format)?;

        let (pipeline, pipeline_layout) = pipeline::create_graphics_pipeline(
            &resources.device,
            resources.render_pass,
            resources.extent,
            shaders,
        )?;
        resources.pipeline = pipeline;
        resources.pipeline_layout = pipeline_layout;

        resources.framebuffers = pipeline::create_framebuffers(
            &resources.device,
            &resources.image_views,
            resources.render_pass,
            resources.extent,
        )?;

        debug_assert_eq!(resources.image_views.len(), resources.images.len());
        debug_assert_eq!(resources.framebuffers.len(), resources.images.len());

        log::info!("Created swapchain with {} images", resources.images.len());

        Ok(resources)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next presentable image, signalling `semaphore` once it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RendererError::AcquireImage(e)),
        }
    }

    /// Queue `image_index` for display once `wait_semaphores` signal
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.device.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RendererError::Present(e)),
        }
    }
}

impl Drop for SwapchainResources {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_render_pass(self.render_pass, None);
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }
            self.device.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_image_view(device: &VulkanDevice, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.device.create_image_view(&create_info, None) }
        .map_err(RendererError::SwapchainCreation)
}

/// Result of asking the swapchain for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of queueing an image for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}
