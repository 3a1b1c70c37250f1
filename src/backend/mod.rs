// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Every object is owned by exactly one
// struct and destroyed in reverse creation order when that struct drops.

pub mod commands;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::{QueueFamilies, VulkanDevice};
pub use error::RendererError;
pub use renderer::Renderer;
pub use swapchain::{AcquireOutcome, PresentOutcome};
pub use sync::{ImagesInFlight, MAX_FRAMES_IN_FLIGHT};
