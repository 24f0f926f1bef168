// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
// Viewport and scissor are dynamic so pipelines survive window resizes.

use anyhow::{Context, Result};
use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;

use super::render_pass::VulkanRenderPass;
use super::shader::load_shader_module;
use super::VulkanDevice;

/// Vertex buffer layout consumed by a pipeline
#[derive(Debug, Clone, Default)]
pub struct VertexInput {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Everything needed to build one graphics pipeline
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// None for passes that generate vertices in the shader (fullscreen triangle)
    pub vertex_input: Option<VertexInput>,
    pub color_attachment_count: usize,
    pub alpha_blending: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_mode: vk::CullModeFlags,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub subpass: u32,
}

impl GraphicsPipelineDesc {
    pub fn new(vertex_shader: PathBuf, fragment_shader: PathBuf) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            vertex_input: None,
            color_attachment_count: 1,
            alpha_blending: false,
            depth_test: true,
            depth_write: true,
            cull_mode: vk::CullModeFlags::BACK,
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            subpass: 0,
        }
    }
}

/// One blend state per color attachment
pub fn blend_attachments(count: usize, alpha_blending: bool) -> Vec<vk::PipelineColorBlendAttachmentState> {
    let state = if alpha_blending {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    } else {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        }
    };

    vec![state; count]
}

/// Pipeline plus its layout
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl GraphicsPipeline {
    pub fn new(
        device: &Arc<VulkanDevice>,
        desc: &GraphicsPipelineDesc,
        render_pass: &VulkanRenderPass,
    ) -> Result<Self> {
        if desc.color_attachment_count != render_pass.color_attachment_count() {
            anyhow::bail!(
                "Pipeline writes {} color attachments but the render pass has {}",
                desc.color_attachment_count,
                render_pass.color_attachment_count()
            );
        }

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&desc.set_layouts)
            .push_constant_ranges(&desc.push_constant_ranges);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        match Self::create_pipeline(device, desc, render_pass, layout) {
            Ok(pipeline) => Ok(Self {
                pipeline,
                layout,
                device: device.clone(),
            }),
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                Err(e)
            }
        }
    }

    fn create_pipeline(
        device: &VulkanDevice,
        desc: &GraphicsPipelineDesc,
        render_pass: &VulkanRenderPass,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let vert_shader = load_shader_module(device, &desc.vertex_shader)?;
        let frag_shader = match load_shader_module(device, &desc.fragment_shader) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert_shader, None) };
                return Err(e);
            }
        };

        let entry_point = c"main";

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_shader)
                .name(entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader)
                .name(entry_point)
                .build(),
        ];

        let vertex_input = desc.vertex_input.clone().unwrap_or_default();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_input.bindings)
            .vertex_attribute_descriptions(&vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        // glTF front faces are counter-clockwise; the projection flips Y
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments =
            blend_attachments(desc.color_attachment_count, desc.alpha_blending);
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.render_pass)
            .subpass(desc.subpass)
            .build();

        let result = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        // Modules are only needed during creation
        unsafe {
            device.device.destroy_shader_module(vert_shader, None);
            device.device.destroy_shader_module(frag_shader, None);
        }

        let pipelines = result
            .map_err(|(_, e)| e)
            .with_context(|| {
                format!(
                    "Failed to create graphics pipeline ({:?}, {:?})",
                    desc.vertex_shader, desc.fragment_shader
                )
            })?;

        Ok(pipelines[0])
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Full-extent viewport and scissor for the dynamic pipeline state
pub fn set_viewport(device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };

    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_blend_state_per_attachment() {
        let states = blend_attachments(4, false);
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|s| s.blend_enable == vk::FALSE
            && s.color_write_mask == vk::ColorComponentFlags::RGBA));
    }

    #[test]
    fn alpha_blending_uses_source_alpha() {
        let states = blend_attachments(1, true);
        assert_eq!(states[0].blend_enable, vk::TRUE);
        assert_eq!(states[0].src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            states[0].dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }

    #[test]
    fn default_desc_is_opaque_depth_tested() {
        let desc = GraphicsPipelineDesc::new("a.vert.spv".into(), "a.frag.spv".into());
        assert!(desc.depth_test && desc.depth_write);
        assert!(!desc.alpha_blending);
        assert_eq!(desc.color_attachment_count, 1);
        assert!(desc.vertex_input.is_none());
    }
}
