// Framebuffers and their attachments
//
// FramebufferAttachment owns one image + allocation + view.
// VulkanFrameBuffer collects attachments, derives a render pass from them
// and exposes the results for sampling in later passes (G-buffer style).
// SwapchainFramebuffers wraps the per-image framebuffers of the presentation pass.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::render_pass::{RenderPassDesc, VulkanRenderPass};
use super::{Swapchain, VulkanDevice};

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn is_stencil_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn is_depth_stencil_format(format: vk::Format) -> bool {
    is_depth_format(format) || is_stencil_format(format)
}

/// Image aspects an attachment of `format` used as `usage` covers
pub fn aspect_mask(format: vk::Format, usage: vk::ImageUsageFlags) -> Result<vk::ImageAspectFlags> {
    if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        if is_depth_stencil_format(format) {
            anyhow::bail!("{:?} cannot be a color attachment", format);
        }
        return Ok(vk::ImageAspectFlags::COLOR);
    }

    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        let mut aspect = vk::ImageAspectFlags::empty();
        if is_depth_format(format) {
            aspect |= vk::ImageAspectFlags::DEPTH;
        }
        if is_stencil_format(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        if aspect.is_empty() {
            anyhow::bail!("{:?} cannot be a depth/stencil attachment", format);
        }
        return Ok(aspect);
    }

    anyhow::bail!("Usage {:?} is not an attachment usage", usage)
}

/// Attachment description for a render target whose contents are sampled afterwards
pub fn attachment_description(
    format: vk::Format,
    samples: vk::SampleCountFlags,
) -> vk::AttachmentDescription {
    let stencil = is_stencil_format(format);

    let final_layout = if is_depth_stencil_format(format) {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    };

    vk::AttachmentDescription {
        format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: if stencil {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::DONT_CARE
        },
        stencil_store_op: if stencil {
            vk::AttachmentStoreOp::STORE
        } else {
            vk::AttachmentStoreOp::DONT_CARE
        },
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout,
        ..Default::default()
    }
}

/// Parameters for a new framebuffer attachment
#[derive(Debug, Clone, Copy)]
pub struct AttachmentCreateInfo {
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
}

impl AttachmentCreateInfo {
    /// Single-layer, single-sample attachment
    pub fn new(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            width,
            height,
            layer_count: 1,
            format,
            usage,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

/// One image used as a render target
pub struct FramebufferAttachment {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub layer_count: u32,
    pub description: vk::AttachmentDescription,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl FramebufferAttachment {
    pub fn new(device: &Arc<VulkanDevice>, info: &AttachmentCreateInfo, name: &str) -> Result<Self> {
        if info.layer_count == 0 {
            anyhow::bail!("Attachment '{}' needs at least one layer", name);
        }

        let aspect = aspect_mask(info.format, info.usage)?;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(info.format)
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(info.layer_count)
            .samples(info.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create attachment image '{}'", name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = match device.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let memory = unsafe { allocation.memory() };
        let offset = allocation.offset();

        // Drop owns the image and allocation from here on
        let mut attachment = Self {
            image,
            view: vk::ImageView::null(),
            format: info.format,
            layer_count: info.layer_count,
            description: attachment_description(info.format, info.samples),
            allocation: Some(allocation),
            device: device.clone(),
        };

        unsafe {
            device
                .device
                .bind_image_memory(image, memory, offset)
                .with_context(|| format!("Failed to bind memory for attachment '{}'", name))?;
        }

        // Depth and stencil can't be sampled through one view
        let sampled = info.usage.contains(vk::ImageUsageFlags::SAMPLED);
        let view_range = vk::ImageSubresourceRange {
            aspect_mask: if sampled && aspect.contains(vk::ImageAspectFlags::DEPTH) {
                vk::ImageAspectFlags::DEPTH
            } else {
                aspect
            },
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: info.layer_count,
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(if info.layer_count == 1 {
                vk::ImageViewType::TYPE_2D
            } else {
                vk::ImageViewType::TYPE_2D_ARRAY
            })
            .format(info.format)
            .subresource_range(view_range);

        attachment.view = unsafe { device.device.create_image_view(&view_info, None) }
            .with_context(|| format!("Failed to create attachment view '{}'", name))?;

        Ok(attachment)
    }

    pub fn has_depth(&self) -> bool {
        is_depth_format(self.format)
    }

    pub fn has_stencil(&self) -> bool {
        is_stencil_format(self.format)
    }

    pub fn is_depth_stencil(&self) -> bool {
        self.has_depth() || self.has_stencil()
    }
}

impl Drop for FramebufferAttachment {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// Offscreen framebuffer with any number of color attachments and at most one depth attachment
pub struct VulkanFrameBuffer {
    pub width: u32,
    pub height: u32,
    attachments: Vec<FramebufferAttachment>,
    render_pass: Option<VulkanRenderPass>,
    framebuffer: vk::Framebuffer,
    sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl VulkanFrameBuffer {
    pub fn new(device: &Arc<VulkanDevice>, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            attachments: Vec::new(),
            render_pass: None,
            framebuffer: vk::Framebuffer::null(),
            sampler: vk::Sampler::null(),
            device: device.clone(),
        }
    }

    /// Add an attachment; returns its index
    pub fn add_attachment(&mut self, info: AttachmentCreateInfo, name: &str) -> Result<usize> {
        if is_depth_stencil_format(info.format)
            && self.attachments.iter().any(|a| a.is_depth_stencil())
        {
            anyhow::bail!("Framebuffer already has a depth attachment, can't add {}", name);
        }
        let attachment = FramebufferAttachment::new(&self.device, &info, name)?;
        self.attachments.push(attachment);
        Ok(self.attachments.len() - 1)
    }

    /// Sampler used to read the attachments in later passes
    pub fn create_sampler(
        &mut self,
        mag_filter: vk::Filter,
        min_filter: vk::Filter,
        address_mode: vk::SamplerAddressMode,
    ) -> Result<()> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(mag_filter)
            .min_filter(min_filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_anisotropy(1.0)
            .min_lod(0.0)
            .max_lod(1.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        let sampler = unsafe { self.device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create framebuffer sampler")?;

        if self.sampler != vk::Sampler::null() {
            unsafe { self.device.device.destroy_sampler(self.sampler, None) };
        }
        self.sampler = sampler;
        Ok(())
    }

    /// Build the render pass matching the attachments, then the framebuffer itself
    pub fn create_render_pass(&mut self) -> Result<()> {
        let descriptions: Vec<_> = self.attachments.iter().map(|a| a.description).collect();
        let render_pass = RenderPassDesc::from_attachments(&descriptions)?.build(&self.device)?;

        let views: Vec<_> = self.attachments.iter().map(|a| a.view).collect();
        let layers = self
            .attachments
            .iter()
            .map(|a| a.layer_count)
            .max()
            .unwrap_or(1);

        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.render_pass)
            .attachments(&views)
            .width(self.width)
            .height(self.height)
            .layers(layers);

        let framebuffer = unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
            .context("Failed to create offscreen framebuffer")?;

        if self.framebuffer != vk::Framebuffer::null() {
            unsafe { self.device.device.destroy_framebuffer(self.framebuffer, None) };
        }

        log::debug!(
            "Offscreen framebuffer {}x{} with {} attachments",
            self.width,
            self.height,
            self.attachments.len()
        );

        self.framebuffer = framebuffer;
        self.render_pass = Some(render_pass);
        Ok(())
    }

    pub fn render_pass(&self) -> Result<&VulkanRenderPass> {
        self.render_pass
            .as_ref()
            .context("Framebuffer render pass not created")
    }

    pub fn render_pass_mut(&mut self) -> Result<&mut VulkanRenderPass> {
        self.render_pass
            .as_mut()
            .context("Framebuffer render pass not created")
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Image descriptor for sampling attachment `index` after the pass has ended
    pub fn descriptor_info(&self, index: usize) -> Result<vk::DescriptorImageInfo> {
        let attachment = self
            .attachments
            .get(index)
            .with_context(|| format!("No attachment {}", index))?;

        if self.sampler == vk::Sampler::null() {
            anyhow::bail!("Framebuffer sampler not created");
        }

        Ok(vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: attachment.view,
            image_layout: attachment.description.final_layout,
        })
    }
}

impl Drop for VulkanFrameBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.framebuffer != vk::Framebuffer::null() {
                self.device.device.destroy_framebuffer(self.framebuffer, None);
            }
            if self.sampler != vk::Sampler::null() {
                self.device.device.destroy_sampler(self.sampler, None);
            }
        }
    }
}

/// Framebuffers for every swapchain image, sharing one depth attachment
pub struct SwapchainFramebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    _depth: FramebufferAttachment,
    device: Arc<VulkanDevice>,
}

impl SwapchainFramebuffers {
    pub fn new(
        device: &Arc<VulkanDevice>,
        swapchain: &Swapchain,
        render_pass: &VulkanRenderPass,
    ) -> Result<Self> {
        let depth_format = render_pass
            .depth_format()
            .context("Presentation render pass has no depth attachment")?;

        let depth = FramebufferAttachment::new(
            device,
            &AttachmentCreateInfo::new(
                swapchain.extent.width,
                swapchain.extent.height,
                depth_format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ),
            "swapchain depth",
        )?;

        let mut targets = Self {
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
            _depth: depth,
            device: device.clone(),
        };

        for &view in &swapchain.image_views {
            let attachments = [view, targets._depth.view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.render_pass)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            targets.framebuffers.push(framebuffer);
        }

        Ok(targets)
    }
}

impl Drop for SwapchainFramebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_classification() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(!is_stencil_format(vk::Format::D32_SFLOAT));
        assert!(is_stencil_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(is_depth_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(is_stencil_format(vk::Format::S8_UINT));
        assert!(!is_depth_format(vk::Format::S8_UINT));
        assert!(!is_depth_stencil_format(vk::Format::R16G16B16A16_SFLOAT));
    }

    #[test]
    fn color_usage_gives_color_aspect() {
        let aspect = aspect_mask(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )
        .unwrap();
        assert_eq!(aspect, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn combined_depth_stencil_gets_both_aspects() {
        let usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            aspect_mask(vk::Format::D32_SFLOAT_S8_UINT, usage).unwrap(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask(vk::Format::D16_UNORM, usage).unwrap(),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn mismatched_usage_is_rejected() {
        assert!(aspect_mask(
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        )
        .is_err());
        assert!(aspect_mask(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        )
        .is_err());
        assert!(aspect_mask(vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED).is_err());
    }

    #[test]
    fn color_description_ends_shader_readable() {
        let desc = attachment_description(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::SampleCountFlags::TYPE_1,
        );
        assert_eq!(desc.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(desc.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(desc.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(desc.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(desc.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn depth_description_keeps_stencil_only_when_present() {
        let with_stencil =
            attachment_description(vk::Format::D24_UNORM_S8_UINT, vk::SampleCountFlags::TYPE_1);
        assert_eq!(with_stencil.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(with_stencil.stencil_store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(
            with_stencil.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );

        let depth_only =
            attachment_description(vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_4);
        assert_eq!(depth_only.stencil_store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(depth_only.samples, vk::SampleCountFlags::TYPE_4);
    }
}
