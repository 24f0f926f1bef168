// Forward path: the model is shaded straight into the presentation pass
//
// Opaque and masked primitives go first with depth writes, blended ones
// after with depth writes off.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::{CameraData, CameraUniforms, SceneRenderer, MATERIAL_SET};
use crate::backend::pipeline::{set_viewport, GraphicsPipeline, GraphicsPipelineDesc};
use crate::backend::{VulkanDevice, VulkanRenderPass};
use crate::config::Config;
use crate::scene::{AlphaPass, Camera, PrimitivePushConstants, Vertex, VulkanGLTFModel};

struct ForwardPipelines {
    opaque: GraphicsPipeline,
    blend: GraphicsPipeline,
}

pub struct ForwardRenderer {
    pipelines: ForwardPipelines,
    camera: CameraUniforms,
    render_pass: VulkanRenderPass,
    material_layout: vk::DescriptorSetLayout,
    cull_mode: vk::CullModeFlags,
    vertex_shader: std::path::PathBuf,
    fragment_shader: std::path::PathBuf,
    device: Arc<VulkanDevice>,
}

impl ForwardRenderer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        config: &Config,
        color_format: vk::Format,
        material_layout: vk::DescriptorSetLayout,
        double_sided: bool,
    ) -> Result<Self> {
        let mut render_pass =
            VulkanRenderPass::presentation(device, color_format, device.depth_format()?)?;
        render_pass.set_clear_color(config.graphics.clear_color);

        let camera = CameraUniforms::new(device, config.graphics.max_frames_in_flight)?;
        let cull_mode = if double_sided {
            vk::CullModeFlags::NONE
        } else {
            vk::CullModeFlags::BACK
        };
        let vertex_shader = config.shader_path("model.vert");
        let fragment_shader = config.shader_path("model.frag");

        let pipelines = Self::create_pipelines(
            device,
            &render_pass,
            &vertex_shader,
            &fragment_shader,
            [camera.layout(), material_layout],
            cull_mode,
        )?;

        log::info!("Forward renderer ready");

        Ok(Self {
            pipelines,
            camera,
            render_pass,
            material_layout,
            cull_mode,
            vertex_shader,
            fragment_shader,
            device: device.clone(),
        })
    }

    fn create_pipelines(
        device: &Arc<VulkanDevice>,
        render_pass: &VulkanRenderPass,
        vertex_shader: &std::path::Path,
        fragment_shader: &std::path::Path,
        set_layouts: [vk::DescriptorSetLayout; 2],
        cull_mode: vk::CullModeFlags,
    ) -> Result<ForwardPipelines> {
        let mut desc =
            GraphicsPipelineDesc::new(vertex_shader.to_path_buf(), fragment_shader.to_path_buf());
        desc.vertex_input = Some(Vertex::vertex_input());
        desc.set_layouts = set_layouts.to_vec();
        desc.push_constant_ranges = vec![PrimitivePushConstants::range()];
        desc.cull_mode = cull_mode;

        let opaque = GraphicsPipeline::new(device, &desc, render_pass)?;

        desc.alpha_blending = true;
        desc.depth_write = false;
        let blend = GraphicsPipeline::new(device, &desc, render_pass)?;

        Ok(ForwardPipelines { opaque, blend })
    }
}

impl SceneRenderer for ForwardRenderer {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn presentation_pass(&self) -> &VulkanRenderPass {
        &self.render_pass
    }

    fn update(&mut self, frame: usize, camera: &Camera, aspect: f32, _time: f32) -> Result<()> {
        self.camera.update(frame, &CameraData::new(camera, aspect))
    }

    fn record(
        &self,
        cmd: vk::CommandBuffer,
        frame: usize,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        model: &VulkanGLTFModel,
    ) -> Result<()> {
        let device = &self.device.device;

        self.render_pass.begin(cmd, framebuffer, extent);
        set_viewport(device, cmd, extent);

        self.pipelines.opaque.bind(cmd);
        self.camera
            .bind(device, cmd, self.pipelines.opaque.layout, frame);
        model.draw_pass(cmd, self.pipelines.opaque.layout, MATERIAL_SET, AlphaPass::Opaque);

        if model.has_blended_materials() {
            self.pipelines.blend.bind(cmd);
            self.camera.bind(device, cmd, self.pipelines.blend.layout, frame);
            model.draw_pass(cmd, self.pipelines.blend.layout, MATERIAL_SET, AlphaPass::Blend);
        }

        self.render_pass.end(cmd);
        Ok(())
    }

    fn resize(&mut self, _extent: vk::Extent2D) -> Result<()> {
        // Viewport and scissor are dynamic
        Ok(())
    }

    fn reload_shaders(&mut self) -> Result<()> {
        self.pipelines = Self::create_pipelines(
            &self.device,
            &self.render_pass,
            &self.vertex_shader,
            &self.fragment_shader,
            [self.camera.layout(), self.material_layout],
            self.cull_mode,
        )?;
        log::info!("Forward pipelines rebuilt");
        Ok(())
    }
}
