// Deferred path
//
// Pass 1 writes position, normal, albedo and metallic/roughness/AO into an
// offscreen G-buffer. Pass 2 is a fullscreen triangle in the presentation
// pass that samples the G-buffer and lights it with animated point lights.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::path::PathBuf;
use std::sync::Arc;

use super::{CameraData, CameraUniforms, SceneRenderer, MATERIAL_SET};
use crate::backend::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorWriter, LayoutBinding};
use crate::backend::framebuffer::AttachmentCreateInfo;
use crate::backend::pipeline::{set_viewport, GraphicsPipeline, GraphicsPipelineDesc};
use crate::backend::{Buffer, VulkanDevice, VulkanFrameBuffer, VulkanRenderPass};
use crate::config::Config;
use crate::scene::{Camera, PrimitivePushConstants, Vertex, VulkanGLTFModel};

pub const MAX_LIGHTS: usize = 6;

/// Number of selectable outputs: composite, position, normal, albedo, pbr
pub const DEBUG_VIEW_COUNT: u32 = 5;

/// G-buffer color attachments in binding order
const GBUFFER_LAYOUT: [(vk::Format, &str); 4] = [
    (vk::Format::R16G16B16A16_SFLOAT, "gbuffer position"),
    (vk::Format::R16G16B16A16_SFLOAT, "gbuffer normal"),
    (vk::Format::R8G8B8A8_UNORM, "gbuffer albedo"),
    (vk::Format::R8G8B8A8_UNORM, "gbuffer pbr"),
];

const LIGHT_COLORS: [[f32; 3]; MAX_LIGHTS] = [
    [1.0, 0.9, 0.8],
    [1.0, 0.3, 0.2],
    [0.2, 0.5, 1.0],
    [0.3, 1.0, 0.4],
    [1.0, 0.8, 0.2],
    [0.8, 0.4, 1.0],
];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    /// xyz world position, w unused
    pub position: [f32; 4],
    /// rgb color, a falloff radius
    pub color_radius: [f32; 4],
}

/// Composition block (std140)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingData {
    pub view_pos: [f32; 4],
    pub lights: [PointLight; MAX_LIGHTS],
    pub light_count: u32,
    pub exposure: f32,
    pub gamma: f32,
    pub debug_view: u32,
}

/// Lights spread evenly on a ring around `center`, turning with `time`.
/// Slots past `count` are zeroed.
pub fn animate_lights(time: f32, center: Vec3, radius: f32, count: usize) -> [PointLight; MAX_LIGHTS] {
    let mut lights = [PointLight::zeroed(); MAX_LIGHTS];
    let count = count.min(MAX_LIGHTS);

    for (i, light) in lights.iter_mut().take(count).enumerate() {
        let angle = time * 0.5 + i as f32 * std::f32::consts::TAU / count as f32;
        // Alternate above and below the model
        let height = radius * if i % 2 == 0 { 0.5 } else { -0.25 };
        let position = center + Vec3::new(angle.cos() * radius, height, angle.sin() * radius);
        let [r, g, b] = LIGHT_COLORS[i];

        *light = PointLight {
            position: position.extend(1.0).to_array(),
            color_radius: [r, g, b, radius * 2.5],
        };
    }

    lights
}

/// sRGB targets encode on store, so the shader must not apply gamma again
pub fn output_gamma(color_format: vk::Format, gamma: f32) -> f32 {
    match color_format {
        vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB | vk::Format::A8B8G8R8_SRGB_PACK32 => 1.0,
        _ => gamma,
    }
}

/// Per-frame composition set: G-buffer samplers 0..=3, lighting UBO at 4
fn composition_bindings() -> Vec<LayoutBinding> {
    let mut bindings: Vec<_> = (0..GBUFFER_LAYOUT.len() as u32)
        .map(|binding| LayoutBinding::sampled_image(binding, vk::ShaderStageFlags::FRAGMENT))
        .collect();
    bindings.push(LayoutBinding::uniform_buffer(
        GBUFFER_LAYOUT.len() as u32,
        vk::ShaderStageFlags::FRAGMENT,
    ));
    bindings
}

struct ShaderPaths {
    model_vert: PathBuf,
    gbuffer_frag: PathBuf,
    composition_vert: PathBuf,
    composition_frag: PathBuf,
}

pub struct DeferredRenderer {
    gbuffer_pipeline: GraphicsPipeline,
    composition_pipeline: GraphicsPipeline,
    composition_sets: Vec<vk::DescriptorSet>,
    _composition_pool: DescriptorPool,
    composition_layout: DescriptorSetLayout,
    lighting_buffers: Vec<Buffer>,
    gbuffer: VulkanFrameBuffer,
    camera: CameraUniforms,
    render_pass: VulkanRenderPass,
    material_layout: vk::DescriptorSetLayout,
    cull_mode: vk::CullModeFlags,
    shaders: ShaderPaths,
    light_count: u32,
    exposure: f32,
    gamma: f32,
    debug_view: u32,
    device: Arc<VulkanDevice>,
}

impl DeferredRenderer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        config: &Config,
        color_format: vk::Format,
        extent: vk::Extent2D,
        material_layout: vk::DescriptorSetLayout,
        double_sided: bool,
    ) -> Result<Self> {
        let frames = config.graphics.max_frames_in_flight;

        let mut render_pass =
            VulkanRenderPass::presentation(device, color_format, device.depth_format()?)?;
        render_pass.set_clear_color(config.graphics.clear_color);

        let camera = CameraUniforms::new(device, frames)?;
        let gbuffer = Self::create_gbuffer(device, extent)?;

        let lighting_buffers = (0..frames)
            .map(|frame| {
                Buffer::with_data(
                    device,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    &[LightingData::zeroed()],
                    &format!("lighting ubo {}", frame),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let composition_layout = DescriptorSetLayout::new(device, &composition_bindings())?;
        let composition_pool = DescriptorPool::new(device, &[(&composition_layout, frames as u32)])?;
        let composition_sets = (0..frames)
            .map(|_| composition_pool.allocate(&composition_layout))
            .collect::<Result<Vec<_>>>()?;

        let shaders = ShaderPaths {
            model_vert: config.shader_path("model.vert"),
            gbuffer_frag: config.shader_path("gbuffer.frag"),
            composition_vert: config.shader_path("composition.vert"),
            composition_frag: config.shader_path("composition.frag"),
        };
        let cull_mode = if double_sided {
            vk::CullModeFlags::NONE
        } else {
            vk::CullModeFlags::BACK
        };

        let gbuffer_pipeline = Self::create_gbuffer_pipeline(
            device,
            &gbuffer,
            &shaders,
            [camera.layout(), material_layout],
            cull_mode,
        )?;
        let composition_pipeline =
            Self::create_composition_pipeline(device, &render_pass, &shaders, &composition_layout)?;

        let renderer = Self {
            gbuffer_pipeline,
            composition_pipeline,
            composition_sets,
            _composition_pool: composition_pool,
            composition_layout,
            lighting_buffers,
            gbuffer,
            camera,
            render_pass,
            material_layout,
            cull_mode,
            shaders,
            light_count: config.deferred.light_count,
            exposure: config.deferred.exposure,
            gamma: output_gamma(color_format, config.deferred.gamma),
            debug_view: config.deferred.debug_view % DEBUG_VIEW_COUNT,
            device: device.clone(),
        };
        renderer.write_composition_sets()?;

        log::info!(
            "Deferred renderer ready: {}x{} G-buffer, {} lights",
            extent.width,
            extent.height,
            renderer.light_count
        );

        Ok(renderer)
    }

    fn create_gbuffer(device: &Arc<VulkanDevice>, extent: vk::Extent2D) -> Result<VulkanFrameBuffer> {
        let mut gbuffer = VulkanFrameBuffer::new(device, extent.width, extent.height);

        for (format, name) in GBUFFER_LAYOUT {
            gbuffer.add_attachment(
                AttachmentCreateInfo::new(
                    extent.width,
                    extent.height,
                    format,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                ),
                name,
            )?;
        }
        gbuffer.add_attachment(
            AttachmentCreateInfo::new(
                extent.width,
                extent.height,
                device.depth_format()?,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ),
            "gbuffer depth",
        )?;

        gbuffer.create_sampler(
            vk::Filter::NEAREST,
            vk::Filter::NEAREST,
            vk::SamplerAddressMode::CLAMP_TO_EDGE,
        )?;
        gbuffer.create_render_pass()?;
        // Zero alpha marks background texels for the composition pass
        gbuffer.render_pass_mut()?.set_clear_color([0.0; 4]);

        Ok(gbuffer)
    }

    fn create_gbuffer_pipeline(
        device: &Arc<VulkanDevice>,
        gbuffer: &VulkanFrameBuffer,
        shaders: &ShaderPaths,
        set_layouts: [vk::DescriptorSetLayout; 2],
        cull_mode: vk::CullModeFlags,
    ) -> Result<GraphicsPipeline> {
        let mut desc =
            GraphicsPipelineDesc::new(shaders.model_vert.clone(), shaders.gbuffer_frag.clone());
        desc.vertex_input = Some(Vertex::vertex_input());
        desc.color_attachment_count = GBUFFER_LAYOUT.len();
        desc.set_layouts = set_layouts.to_vec();
        desc.push_constant_ranges = vec![PrimitivePushConstants::range()];
        desc.cull_mode = cull_mode;

        GraphicsPipeline::new(device, &desc, gbuffer.render_pass()?)
    }

    fn create_composition_pipeline(
        device: &Arc<VulkanDevice>,
        render_pass: &VulkanRenderPass,
        shaders: &ShaderPaths,
        layout: &DescriptorSetLayout,
    ) -> Result<GraphicsPipeline> {
        let mut desc = GraphicsPipelineDesc::new(
            shaders.composition_vert.clone(),
            shaders.composition_frag.clone(),
        );
        desc.depth_test = false;
        desc.depth_write = false;
        desc.cull_mode = vk::CullModeFlags::NONE;
        desc.set_layouts = vec![layout.layout];

        GraphicsPipeline::new(device, &desc, render_pass)
    }

    /// Point every composition set at the current G-buffer and its frame's UBO
    fn write_composition_sets(&self) -> Result<()> {
        for (set, buffer) in self.composition_sets.iter().zip(&self.lighting_buffers) {
            let mut writer = DescriptorWriter::new(*set);
            for binding in 0..GBUFFER_LAYOUT.len() {
                writer = writer.sampled_image(binding as u32, self.gbuffer.descriptor_info(binding)?);
            }
            writer
                .uniform_buffer(GBUFFER_LAYOUT.len() as u32, buffer.descriptor_info())
                .update(&self.device);
        }
        Ok(())
    }
}

impl SceneRenderer for DeferredRenderer {
    fn name(&self) -> &'static str {
        "deferred"
    }

    fn presentation_pass(&self) -> &VulkanRenderPass {
        &self.render_pass
    }

    fn update(&mut self, frame: usize, camera: &Camera, aspect: f32, time: f32) -> Result<()> {
        let camera_data = CameraData::new(camera, aspect);
        self.camera.update(frame, &camera_data)?;

        let lighting = LightingData {
            view_pos: camera_data.position,
            lights: animate_lights(
                time,
                camera.target,
                camera.distance * 0.6,
                self.light_count as usize,
            ),
            light_count: self.light_count,
            exposure: self.exposure,
            gamma: self.gamma,
            debug_view: self.debug_view,
        };

        match self.lighting_buffers.get_mut(frame) {
            Some(buffer) => buffer.write(std::slice::from_ref(&lighting)),
            None => anyhow::bail!("No lighting buffer for frame {}", frame),
        }
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

        // G-buffer
        let gbuffer_pass = self.gbuffer.render_pass()?;
        gbuffer_pass.begin(cmd, self.gbuffer.framebuffer(), self.gbuffer.extent());
        set_viewport(device, cmd, self.gbuffer.extent());
        self.gbuffer_pipeline.bind(cmd);
        self.camera
            .bind(device, cmd, self.gbuffer_pipeline.layout, frame);
        model.draw(cmd, self.gbuffer_pipeline.layout, MATERIAL_SET);
        gbuffer_pass.end(cmd);

        // Composition; the render pass dependencies order the reads after the writes
        self.render_pass.begin(cmd, framebuffer, extent);
        set_viewport(device, cmd, extent);
        self.composition_pipeline.bind(cmd);
        unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.composition_pipeline.layout,
                0,
                &[self.composition_sets[frame]],
                &[],
            );
            device.cmd_draw(cmd, 3, 1, 0, 0);
        }
        self.render_pass.end(cmd);

        Ok(())
    }

    fn resize(&mut self, extent: vk::Extent2D) -> Result<()> {
        if extent == self.gbuffer.extent() {
            return Ok(());
        }

        self.gbuffer = Self::create_gbuffer(&self.device, extent)?;
        self.gbuffer_pipeline = Self::create_gbuffer_pipeline(
            &self.device,
            &self.gbuffer,
            &self.shaders,
            [self.camera.layout(), self.material_layout],
            self.cull_mode,
        )?;
        self.write_composition_sets()?;

        log::info!("G-buffer resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn reload_shaders(&mut self) -> Result<()> {
        let gbuffer_pipeline = Self::create_gbuffer_pipeline(
            &self.device,
            &self.gbuffer,
            &self.shaders,
            [self.camera.layout(), self.material_layout],
            self.cull_mode,
        )?;
        let composition_pipeline = Self::create_composition_pipeline(
            &self.device,
            &self.render_pass,
            &self.shaders,
            &self.composition_layout,
        )?;

        self.gbuffer_pipeline = gbuffer_pipeline;
        self.composition_pipeline = composition_pipeline;
        log::info!("Deferred pipelines rebuilt");
        Ok(())
    }

    fn cycle_debug_view(&mut self) {
        self.debug_view = (self.debug_view + 1) % DEBUG_VIEW_COUNT;
        log::info!("Debug view {}", self.debug_view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lighting_block_matches_std140() {
        assert_eq!(std::mem::size_of::<PointLight>(), 32);
        assert_eq!(std::mem::size_of::<LightingData>(), 224);
        assert_eq!(std::mem::offset_of!(LightingData, light_count), 208);
    }

    #[test]
    fn lights_are_deterministic() {
        let a = animate_lights(1.25, Vec3::ONE, 3.0, 4);
        let b = animate_lights(1.25, Vec3::ONE, 3.0, 4);
        assert_eq!(a, b);
        assert_ne!(a, animate_lights(2.5, Vec3::ONE, 3.0, 4));
    }

    #[test]
    fn lights_ring_the_centre() {
        let center = Vec3::new(2.0, 1.0, -1.0);
        let lights = animate_lights(0.7, center, 4.0, MAX_LIGHTS);

        for light in &lights {
            let p = Vec3::new(light.position[0], light.position[1], light.position[2]);
            let horizontal = Vec3::new(p.x - center.x, 0.0, p.z - center.z).length();
            assert!((horizontal - 4.0).abs() < 1e-4);
            assert_eq!(light.color_radius[3], 10.0);
        }
    }

    #[test]
    fn unused_slots_are_zero_and_count_is_capped() {
        let lights = animate_lights(0.0, Vec3::ZERO, 1.0, 2);
        assert!(lights[2..].iter().all(|l| *l == PointLight::zeroed()));
        assert_ne!(lights[1], PointLight::zeroed());

        let capped = animate_lights(0.0, Vec3::ZERO, 1.0, 99);
        assert!(capped.iter().all(|l| l.color_radius[3] > 0.0));

        let none = animate_lights(0.0, Vec3::ZERO, 1.0, 0);
        assert!(none.iter().all(|l| *l == PointLight::zeroed()));
    }

    #[test]
    fn gamma_is_skipped_for_srgb_targets() {
        assert_eq!(output_gamma(vk::Format::B8G8R8A8_SRGB, 2.2), 1.0);
        assert_eq!(output_gamma(vk::Format::B8G8R8A8_UNORM, 2.2), 2.2);
    }

    #[test]
    fn composition_layout_has_gbuffer_then_ubo() {
        let bindings = composition_bindings();
        assert_eq!(bindings.len(), 5);
        assert!(bindings[..4]
            .iter()
            .all(|b| b.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
        assert_eq!(bindings[4].binding, 4);
        assert_eq!(bindings[4].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    }
}
