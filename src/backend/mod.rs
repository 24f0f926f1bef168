// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash; every type owns its handles and frees
// them on Drop, holding an Arc<VulkanDevice> to keep the device alive.

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use buffer::Buffer;
pub use device::VulkanDevice;
pub use framebuffer::{SwapchainFramebuffers, VulkanFrameBuffer};
pub use render_pass::VulkanRenderPass;
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use texture::Texture2D;
