// glTF model on the GPU
//
// One device-local vertex buffer and one index buffer for the whole file,
// one texture per glTF image and one descriptor set per material.
// Primitives without a material use an extra set built from the fallbacks.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::model_data::{AlphaMode, DrawCommand, Material, ModelData};
use crate::backend::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorWriter, LayoutBinding};
use crate::backend::{Buffer, Texture2D, VulkanDevice};

/// Per-primitive constants, pushed to both shader stages
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PrimitivePushConstants {
    pub model: [f32; 16],
    pub base_color_factor: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub alpha_cutoff: f32,
    /// 1 when fragments below `alpha_cutoff` are discarded
    pub alpha_mask: u32,
}

impl PrimitivePushConstants {
    pub fn new(draw: &DrawCommand, material: Option<&Material>) -> Self {
        let default = Material::default();
        let material = material.unwrap_or(&default);

        Self {
            model: draw.world.to_cols_array(),
            base_color_factor: material.base_color_factor.to_array(),
            metallic: material.metallic_factor,
            roughness: material.roughness_factor,
            alpha_cutoff: material.alpha_cutoff,
            alpha_mask: (material.alpha_mode == AlphaMode::Mask) as u32,
        }
    }

    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<Self>() as u32,
        }
    }
}

/// Which primitives a draw call covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaPass {
    All,
    Opaque,
    Blend,
}

impl AlphaPass {
    fn includes(self, material: Option<&Material>) -> bool {
        let blended = material.map_or(false, |m| m.alpha_mode == AlphaMode::Blend);
        match self {
            AlphaPass::All => true,
            AlphaPass::Opaque => !blended,
            AlphaPass::Blend => blended,
        }
    }
}

/// Formats each image is uploaded in
///
/// Base color is sampled as sRGB, data maps (normal, metallic-roughness) as
/// UNORM. An image used both ways gets one texture per format; an unused
/// image is still uploaded once as UNORM.
pub fn image_formats(materials: &[Material], image_count: usize) -> Vec<Vec<vk::Format>> {
    let mut srgb = vec![false; image_count];
    let mut linear = vec![false; image_count];
    for material in materials {
        if let Some(used) = material.base_color_texture.and_then(|i| srgb.get_mut(i)) {
            *used = true;
        }
        for index in [material.normal_texture, material.metallic_roughness_texture]
            .into_iter()
            .flatten()
        {
            if let Some(used) = linear.get_mut(index) {
                *used = true;
            }
        }
    }

    srgb.into_iter()
        .zip(linear)
        .map(|(srgb, linear)| {
            let mut formats = Vec::with_capacity(2);
            if srgb {
                formats.push(vk::Format::R8G8B8A8_SRGB);
            }
            if linear || !srgb {
                formats.push(vk::Format::R8G8B8A8_UNORM);
            }
            formats
        })
        .collect()
}

struct FallbackTextures {
    base_color: Texture2D,
    normal: Texture2D,
    metallic_roughness: Texture2D,
}

impl FallbackTextures {
    fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        Ok(Self {
            base_color: Texture2D::solid(device, [255; 4], vk::Format::R8G8B8A8_SRGB, "fallback base color")?,
            normal: Texture2D::solid(device, [128, 128, 255, 255], vk::Format::R8G8B8A8_UNORM, "fallback normal")?,
            // Factors pass through unchanged
            metallic_roughness: Texture2D::solid(
                device,
                [255; 4],
                vk::Format::R8G8B8A8_UNORM,
                "fallback metallic-roughness",
            )?,
        })
    }
}

pub struct VulkanGLTFModel {
    data: ModelData,
    draws: Vec<DrawCommand>,
    material_sets: Vec<vk::DescriptorSet>,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    _textures: HashMap<(usize, vk::Format), Texture2D>,
    _fallback: FallbackTextures,
    _pool: DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl VulkanGLTFModel {
    /// Layout of the per-material set: base color, normal, metallic-roughness
    pub fn material_set_layout(device: &Arc<VulkanDevice>) -> Result<DescriptorSetLayout> {
        DescriptorSetLayout::new(
            device,
            &[
                LayoutBinding::sampled_image(0, vk::ShaderStageFlags::FRAGMENT),
                LayoutBinding::sampled_image(1, vk::ShaderStageFlags::FRAGMENT),
                LayoutBinding::sampled_image(2, vk::ShaderStageFlags::FRAGMENT),
            ],
        )
    }

    pub fn load(
        device: &Arc<VulkanDevice>,
        path: &Path,
        material_layout: &DescriptorSetLayout,
        generate_mips: bool,
    ) -> Result<Self> {
        let data = ModelData::load(path)?;
        Self::from_data(device, data, material_layout, generate_mips)
            .with_context(|| format!("Failed to upload {:?}", path))
    }

    pub fn from_data(
        device: &Arc<VulkanDevice>,
        data: ModelData,
        material_layout: &DescriptorSetLayout,
        generate_mips: bool,
    ) -> Result<Self> {
        if data.vertices.is_empty() || data.indices.is_empty() {
            anyhow::bail!("Model has no triangle geometry");
        }

        let vertex_buffer = Buffer::device_local_with_data(
            device,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &data.vertices,
            "model vertices",
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &data.indices,
            "model indices",
        )?;

        let formats = image_formats(&data.materials, data.images.len());
        let mut textures = HashMap::new();
        for (i, (image, formats)) in data.images.iter().zip(formats).enumerate() {
            for format in formats {
                let texture = Texture2D::from_rgba8(
                    device,
                    image.width,
                    image.height,
                    &image.pixels,
                    format,
                    generate_mips,
                    &format!("model image {} ({:?})", i, format),
                )?;
                textures.insert((i, format), texture);
            }
        }

        let fallback = FallbackTextures::new(device)?;

        // One set per material plus one for primitives without a material
        let set_count = data.materials.len() as u32 + 1;
        let pool = DescriptorPool::new(device, &[(material_layout, set_count)])?;

        let texture_info = |index: Option<usize>, format: vk::Format, fallback: &Texture2D| {
            index
                .and_then(|i| textures.get(&(i, format)))
                .unwrap_or(fallback)
                .descriptor_info()
        };
        let (srgb, unorm) = (vk::Format::R8G8B8A8_SRGB, vk::Format::R8G8B8A8_UNORM);

        let default_material = Material::default();
        let mut material_sets = Vec::with_capacity(set_count as usize);
        for material in data.materials.iter().chain(std::iter::once(&default_material)) {
            let set = pool.allocate(material_layout)?;
            DescriptorWriter::new(set)
                .sampled_image(
                    0,
                    texture_info(material.base_color_texture, srgb, &fallback.base_color),
                )
                .sampled_image(1, texture_info(material.normal_texture, unorm, &fallback.normal))
                .sampled_image(
                    2,
                    texture_info(
                        material.metallic_roughness_texture,
                        unorm,
                        &fallback.metallic_roughness,
                    ),
                )
                .update(device);
            material_sets.push(set);
        }

        let draws = data.draw_list();
        log::info!(
            "Model uploaded: {} draws, {} textures, {} material sets",
            draws.len(),
            textures.len(),
            material_sets.len()
        );

        Ok(Self {
            data,
            draws,
            material_sets,
            vertex_buffer,
            index_buffer,
            _textures: textures,
            _fallback: fallback,
            _pool: pool,
            device: device.clone(),
        })
    }

    pub fn data(&self) -> &ModelData {
        &self.data
    }

    /// True if any material asks for back faces to be drawn
    pub fn has_double_sided_materials(&self) -> bool {
        self.data.materials.iter().any(|m| m.double_sided)
    }

    pub fn has_blended_materials(&self) -> bool {
        self.data
            .materials
            .iter()
            .any(|m| m.alpha_mode == AlphaMode::Blend)
    }

    fn material_set(&self, material: Option<usize>) -> vk::DescriptorSet {
        let default = self.material_sets[self.material_sets.len() - 1];
        material
            .and_then(|i| self.material_sets.get(i))
            .copied()
            .unwrap_or(default)
    }

    /// Draw every primitive; materials are bound at `material_set`
    pub fn draw(&self, cmd: vk::CommandBuffer, pipeline_layout: vk::PipelineLayout, material_set: u32) {
        self.draw_pass(cmd, pipeline_layout, material_set, AlphaPass::All);
    }

    pub fn draw_pass(
        &self,
        cmd: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        material_set: u32,
        pass: AlphaPass,
    ) {
        let device = &self.device.device;

        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
        }

        let mut bound = None;
        for draw in &self.draws {
            let material = self.data.material(draw.material);
            if !pass.includes(material) {
                continue;
            }

            let set = self.material_set(draw.material);
            if bound != Some(set) {
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        pipeline_layout,
                        material_set,
                        &[set],
                        &[],
                    );
                }
                bound = Some(set);
            }

            let constants = PrimitivePushConstants::new(draw, material);
            unsafe {
                device.cmd_push_constants(
                    cmd,
                    pipeline_layout,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    0,
                    bytemuck::bytes_of(&constants),
                );
                device.cmd_draw_indexed(cmd, draw.index_count, 1, draw.first_index, 0, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3, Vec4};

    fn draw(material: Option<usize>) -> DrawCommand {
        DrawCommand {
            node: 0,
            world: Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            first_index: 0,
            index_count: 3,
            material,
        }
    }

    #[test]
    fn push_constants_fit_the_guaranteed_minimum() {
        assert_eq!(std::mem::size_of::<PrimitivePushConstants>(), 96);
        assert!(PrimitivePushConstants::range().size <= 128);
    }

    #[test]
    fn push_constants_carry_material_factors() {
        let material = Material {
            base_color_factor: Vec4::new(0.5, 0.25, 1.0, 0.8),
            metallic_factor: 0.1,
            roughness_factor: 0.9,
            alpha_mode: AlphaMode::Mask,
            alpha_cutoff: 0.4,
            ..Default::default()
        };

        let constants = PrimitivePushConstants::new(&draw(Some(0)), Some(&material));
        assert_eq!(constants.base_color_factor, [0.5, 0.25, 1.0, 0.8]);
        assert_eq!(constants.metallic, 0.1);
        assert_eq!(constants.roughness, 0.9);
        assert_eq!(constants.alpha_cutoff, 0.4);
        assert_eq!(constants.alpha_mask, 1);
        assert_eq!(&constants.model[12..15], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn missing_material_uses_gltf_defaults() {
        let constants = PrimitivePushConstants::new(&draw(None), None);
        assert_eq!(constants.base_color_factor, [1.0; 4]);
        assert_eq!(constants.metallic, 1.0);
        assert_eq!(constants.roughness, 1.0);
        assert_eq!(constants.alpha_mask, 0);
    }

    #[test]
    fn base_color_images_are_srgb() {
        let materials = vec![
            Material {
                base_color_texture: Some(2),
                normal_texture: Some(0),
                metallic_roughness_texture: Some(1),
                ..Default::default()
            },
            Material {
                base_color_texture: Some(7),
                ..Default::default()
            },
        ];

        assert_eq!(
            image_formats(&materials, 4),
            vec![
                vec![vk::Format::R8G8B8A8_UNORM],
                vec![vk::Format::R8G8B8A8_UNORM],
                vec![vk::Format::R8G8B8A8_SRGB],
                vec![vk::Format::R8G8B8A8_UNORM],
            ]
        );
    }

    #[test]
    fn image_shared_by_color_and_data_maps_is_uploaded_twice() {
        let materials = vec![
            Material {
                base_color_texture: Some(0),
                ..Default::default()
            },
            Material {
                normal_texture: Some(0),
                ..Default::default()
            },
        ];

        assert_eq!(
            image_formats(&materials, 1),
            vec![vec![vk::Format::R8G8B8A8_SRGB, vk::Format::R8G8B8A8_UNORM]]
        );
    }

    #[test]
    fn alpha_pass_splits_blended_primitives() {
        let blend = Material {
            alpha_mode: AlphaMode::Blend,
            ..Default::default()
        };
        let mask = Material {
            alpha_mode: AlphaMode::Mask,
            ..Default::default()
        };

        assert!(AlphaPass::Opaque.includes(None));
        assert!(AlphaPass::Opaque.includes(Some(&mask)));
        assert!(!AlphaPass::Opaque.includes(Some(&blend)));
        assert!(AlphaPass::Blend.includes(Some(&blend)));
        assert!(!AlphaPass::Blend.includes(Some(&mask)));
        assert!(AlphaPass::All.includes(Some(&blend)));
    }
}
