// Renderer module - draws a glTF model into the presentation pass
//
// Both render paths share the camera uniforms (set 0) and the material
// sets owned by the model (set 1). The app owns command buffers and the
// swapchain framebuffers; a renderer only records into them.

pub mod deferred;
pub mod forward;

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use crate::backend::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorWriter, LayoutBinding};
use crate::backend::{Buffer, VulkanDevice, VulkanRenderPass};
use crate::scene::{Camera, VulkanGLTFModel};

pub use deferred::DeferredRenderer;
pub use forward::ForwardRenderer;

/// Descriptor set slots shared by every scene pipeline
pub const CAMERA_SET: u32 = 0;
pub const MATERIAL_SET: u32 = 1;

pub trait SceneRenderer {
    fn name(&self) -> &'static str;

    /// Pass the swapchain framebuffers are built against
    fn presentation_pass(&self) -> &VulkanRenderPass;

    /// Write the per-frame uniforms for frame slot `frame`
    fn update(&mut self, frame: usize, camera: &Camera, aspect: f32, time: f32) -> Result<()>;

    /// Record all passes into `cmd`, ending in the presentation pass on `framebuffer`
    fn record(
        &self,
        cmd: vk::CommandBuffer,
        frame: usize,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        model: &VulkanGLTFModel,
    ) -> Result<()>;

    /// Recreate size-dependent resources; the device must be idle
    fn resize(&mut self, extent: vk::Extent2D) -> Result<()>;

    /// Rebuild pipelines from the SPIR-V on disk; the device must be idle.
    /// On error the previous pipelines stay in use.
    fn reload_shaders(&mut self) -> Result<()>;

    /// Step through debug outputs, if the renderer has any
    fn cycle_debug_view(&mut self) {}
}

/// Camera block as laid out in the shaders (std140)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraData {
    pub projection: [f32; 16],
    pub view: [f32; 16],
    pub position: [f32; 4],
}

impl CameraData {
    pub fn new(camera: &Camera, aspect: f32) -> Self {
        Self {
            projection: camera.projection(aspect).to_cols_array(),
            view: camera.view().to_cols_array(),
            position: camera.position().extend(1.0).to_array(),
        }
    }
}

/// One host-visible camera UBO and descriptor set per frame in flight
pub struct CameraUniforms {
    sets: Vec<vk::DescriptorSet>,
    buffers: Vec<Buffer>,
    _pool: DescriptorPool,
    layout: DescriptorSetLayout,
}

impl CameraUniforms {
    pub fn new(device: &Arc<VulkanDevice>, frames: usize) -> Result<Self> {
        let layout = DescriptorSetLayout::new(
            device,
            &[LayoutBinding::uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let pool = DescriptorPool::new(device, &[(&layout, frames as u32)])?;

        let mut buffers = Vec::with_capacity(frames);
        let mut sets = Vec::with_capacity(frames);
        for frame in 0..frames {
            let buffer = Buffer::with_data(
                device,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                &[CameraData::zeroed()],
                &format!("camera ubo {}", frame),
            )?;
            let set = pool.allocate(&layout)?;
            DescriptorWriter::new(set)
                .uniform_buffer(0, buffer.descriptor_info())
                .update(device);

            buffers.push(buffer);
            sets.push(set);
        }

        Ok(Self {
            sets,
            buffers,
            _pool: pool,
            layout,
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.layout
    }

    pub fn update(&mut self, frame: usize, data: &CameraData) -> Result<()> {
        match self.buffers.get_mut(frame) {
            Some(buffer) => buffer.write(std::slice::from_ref(data)),
            None => anyhow::bail!("No camera buffer for frame {}", frame),
        }
    }

    pub fn bind(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        frame: usize,
    ) {
        unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                CAMERA_SET,
                &[self.sets[frame]],
                &[],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn camera_block_matches_std140() {
        assert_eq!(std::mem::size_of::<CameraData>(), 144);
        assert_eq!(std::mem::offset_of!(CameraData, view), 64);
        assert_eq!(std::mem::offset_of!(CameraData, position), 128);
    }

    #[test]
    fn camera_data_carries_eye_position() {
        let camera = Camera {
            target: Vec3::new(1.0, 0.0, 0.0),
            distance: 2.0,
            ..Default::default()
        };
        let data = CameraData::new(&camera, 16.0 / 9.0);
        assert_eq!(data.position, [1.0, 0.0, 2.0, 1.0]);
        assert_eq!(data.view, camera.view().to_cols_array());
    }
}
