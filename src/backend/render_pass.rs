// Render pass description and ownership
//
// RenderPassDesc is plain data (attachments, references, dependencies) so the
// layout rules can be checked without a GPU; build() turns it into a
// VulkanRenderPass that also knows how to clear each of its attachments.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::framebuffer::is_depth_stencil_format;
use super::VulkanDevice;

/// Single-subpass render pass layout
#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub color_refs: Vec<vk::AttachmentReference>,
    pub depth_ref: Option<vk::AttachmentReference>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassDesc {
    /// Swapchain color target plus a transient depth buffer
    pub fn presentation(color_format: vk::Format, depth_format: vk::Format) -> Self {
        let color = vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };

        // Depth is never read after the pass
        let depth = vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::CLEAR,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        };

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;

        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            dst_stage_mask: stages,
            src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        };

        Self {
            attachments: vec![color, depth],
            color_refs: vec![vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
            depth_ref: Some(vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
            dependencies: vec![dependency],
        }
    }

    /// Offscreen pass writing every attachment for sampling by a later pass
    pub fn from_attachments(attachments: &[vk::AttachmentDescription]) -> Result<Self> {
        if attachments.is_empty() {
            anyhow::bail!("Render pass needs at least one attachment");
        }

        let mut color_refs = Vec::new();
        let mut depth_ref = None;

        for (index, attachment) in attachments.iter().enumerate() {
            if is_depth_stencil_format(attachment.format) {
                if depth_ref.is_some() {
                    anyhow::bail!("Only one depth attachment per render pass");
                }
                depth_ref = Some(vk::AttachmentReference {
                    attachment: index as u32,
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                });
            } else {
                color_refs.push(vk::AttachmentReference {
                    attachment: index as u32,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                });
            }
        }

        let write_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let write_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

        let dependencies = vec![
            // Previous frame's sampling must finish before we overwrite
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage_mask: write_stages,
                src_access_mask: vk::AccessFlags::SHADER_READ,
                dst_access_mask: write_access,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            // Writes must land before the next pass samples them
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: write_stages,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: write_access,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ];

        Ok(Self {
            attachments: attachments.to_vec(),
            color_refs,
            depth_ref,
            dependencies,
        })
    }

    pub fn color_attachment_count(&self) -> usize {
        self.color_refs.len()
    }

    pub fn depth_attachment(&self) -> Option<&vk::AttachmentDescription> {
        self.depth_ref
            .map(|reference| &self.attachments[reference.attachment as usize])
    }

    pub fn build(self, device: &Arc<VulkanDevice>) -> Result<VulkanRenderPass> {
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&self.color_refs);
        if let Some(depth_ref) = self.depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass.build()];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&self.attachments)
            .subpasses(&subpasses)
            .dependencies(&self.dependencies);

        let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;

        let clear_values = self
            .attachments
            .iter()
            .map(|attachment| clear_value_for(attachment.format, [0.0, 0.0, 0.0, 0.0]))
            .collect();

        Ok(VulkanRenderPass {
            render_pass,
            color_attachment_count: self.color_refs.len(),
            depth_format: self.depth_attachment().map(|a| a.format),
            formats: self.attachments.iter().map(|a| a.format).collect(),
            clear_values,
            device: device.clone(),
        })
    }
}

fn clear_value_for(format: vk::Format, color: [f32; 4]) -> vk::ClearValue {
    if is_depth_stencil_format(format) {
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        }
    } else {
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        }
    }
}

/// Owned render pass that begins itself with the right clear values
pub struct VulkanRenderPass {
    pub render_pass: vk::RenderPass,
    color_attachment_count: usize,
    depth_format: Option<vk::Format>,
    formats: Vec<vk::Format>,
    clear_values: Vec<vk::ClearValue>,
    device: Arc<VulkanDevice>,
}

impl VulkanRenderPass {
    pub fn presentation(
        device: &Arc<VulkanDevice>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        RenderPassDesc::presentation(color_format, depth_format).build(device)
    }

    pub fn color_attachment_count(&self) -> usize {
        self.color_attachment_count
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// Clear color for every color attachment
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        for (value, &format) in self.clear_values.iter_mut().zip(&self.formats) {
            if !is_depth_stencil_format(format) {
                *value = clear_value_for(format, color);
            }
        }
    }

    pub fn begin(&self, cmd: vk::CommandBuffer, framebuffer: vk::Framebuffer, extent: vk::Extent2D) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&self.clear_values);

        unsafe {
            self.device
                .device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    pub fn end(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.device.cmd_end_render_pass(cmd) };
    }
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::framebuffer::attachment_description;

    fn gbuffer_attachments() -> Vec<vk::AttachmentDescription> {
        [
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::D32_SFLOAT,
            vk::Format::R8G8B8A8_UNORM,
        ]
        .into_iter()
        .map(|format| attachment_description(format, vk::SampleCountFlags::TYPE_1))
        .collect()
    }

    #[test]
    fn color_refs_keep_attachment_indices() {
        let desc = RenderPassDesc::from_attachments(&gbuffer_attachments()).unwrap();

        let indices: Vec<u32> = desc.color_refs.iter().map(|r| r.attachment).collect();
        assert_eq!(indices, vec![0, 1, 3]);
        assert!(desc
            .color_refs
            .iter()
            .all(|r| r.layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert_eq!(desc.color_attachment_count(), 3);
    }

    #[test]
    fn depth_attachment_gets_depth_reference() {
        let desc = RenderPassDesc::from_attachments(&gbuffer_attachments()).unwrap();

        let depth_ref = desc.depth_ref.unwrap();
        assert_eq!(depth_ref.attachment, 2);
        assert_eq!(
            depth_ref.layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(desc.depth_attachment().unwrap().format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn offscreen_pass_syncs_with_sampling_on_both_sides() {
        let desc = RenderPassDesc::from_attachments(&gbuffer_attachments()).unwrap();

        assert_eq!(desc.dependencies.len(), 2);
        let (into, out_of) = (desc.dependencies[0], desc.dependencies[1]);
        assert_eq!(into.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(into.dst_subpass, 0);
        assert_eq!(out_of.src_subpass, 0);
        assert_eq!(out_of.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert!(out_of.dst_access_mask.contains(vk::AccessFlags::SHADER_READ));
        assert!(out_of
            .dependency_flags
            .contains(vk::DependencyFlags::BY_REGION));
    }

    #[test]
    fn color_only_pass_has_no_depth() {
        let attachments =
            [attachment_description(vk::Format::R8G8B8A8_UNORM, vk::SampleCountFlags::TYPE_1)];
        let desc = RenderPassDesc::from_attachments(&attachments).unwrap();
        assert!(desc.depth_ref.is_none());
        assert!(desc.depth_attachment().is_none());
    }

    #[test]
    fn two_depth_attachments_are_rejected() {
        let attachments = [
            attachment_description(vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_1),
            attachment_description(vk::Format::D16_UNORM, vk::SampleCountFlags::TYPE_1),
        ];
        assert!(RenderPassDesc::from_attachments(&attachments).is_err());
    }

    #[test]
    fn empty_pass_is_rejected() {
        assert!(RenderPassDesc::from_attachments(&[]).is_err());
    }

    #[test]
    fn presentation_pass_ends_presentable() {
        let desc =
            RenderPassDesc::presentation(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(desc.attachments[1].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(desc.color_attachment_count(), 1);
        assert_eq!(desc.depth_ref.unwrap().attachment, 1);
    }
}
