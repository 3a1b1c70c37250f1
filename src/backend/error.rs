// Renderer errors
//
// Every variant is fatal where it is raised. Out-of-date and suboptimal
// swapchains are not errors; they travel as acquire/present outcomes.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("failed to create Vulkan instance: {0}")]
    InstanceCreation(vk::Result),

    #[error("failed to create window surface: {0}")]
    SurfaceCreation(vk::Result),

    #[error("no Vulkan-capable device present")]
    DeviceEnumeration,

    #[error("no device supports graphics, presentation, the swapchain extension and at least one surface format and present mode")]
    NoSuitableDevice,

    #[error("required extension {0} is not available")]
    MissingExtension(String),

    #[error("required layer {0} is not available")]
    MissingLayer(String),

    #[error("validation requested but unavailable")]
    ValidationUnavailable(#[source] Box<RendererError>),

    #[error("failed to create logical device: {0}")]
    DeviceCreation(vk::Result),

    #[error("failed to create swapchain resources: {0}")]
    SwapchainCreation(vk::Result),

    #[error("swapchain resources are unavailable after a failed rebuild")]
    SwapchainLost,

    #[error("failed to load shader {path:?}: {reason}")]
    ShaderLoad { path: PathBuf, reason: String },

    #[error("failed to create graphics pipeline: {0}")]
    PipelineCreation(vk::Result),

    #[error("failed to record command buffers: {0}")]
    CommandRecording(vk::Result),

    #[error("failed to create synchronization objects: {0}")]
    SyncObjectCreation(vk::Result),

    #[error("failed waiting on the GPU: {0}")]
    FenceWait(vk::Result),

    #[error("failed to acquire swapchain image: {0}")]
    AcquireImage(vk::Result),

    #[error("failed to submit to the graphics queue: {0}")]
    QueueSubmit(vk::Result),

    #[error("failed to present: {0}")]
    Present(vk::Result),
}

pub type Result<T, E = RendererError> = std::result::Result<T, E>;
