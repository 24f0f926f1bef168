// glTF scene data on the CPU side
//
// Geometry of every mesh is flattened into one vertex array and one index
// array; nodes are kept as an arena with parent/children indices. Walking
// the node tree yields the draw commands the GPU model replays.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::mem::{offset_of, size_of};
use std::path::Path;

use crate::backend::pipeline::VertexInput;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 3],
    pub tangent: [f32; 4],
}

impl Vertex {
    pub fn vertex_input() -> VertexInput {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };

        VertexInput {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: size_of::<Vertex>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
                attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
                attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
                attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
                attribute(4, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Vertex, tangent)),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Opaque,
    Mask,
    Blend,
}

/// Metallic-roughness material; texture fields index `ModelData::images`
#[derive(Debug, Clone)]
pub struct Material {
    pub base_color_factor: Vec4,
    pub base_color_texture: Option<usize>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub metallic_roughness_texture: Option<usize>,
    pub normal_texture: Option<usize>,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color_factor: Vec4::ONE,
            base_color_texture: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
            normal_texture: None,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
        }
    }
}

/// Decoded image, always tightly packed RGBA8
#[derive(Debug, Clone)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A range of the shared index buffer drawn with one material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Primitive {
    pub first_index: u32,
    pub index_count: u32,
    pub material: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Local transform relative to the parent
    pub matrix: Mat4,
    pub mesh: Option<usize>,
}

/// One primitive instance with its resolved world transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub node: usize,
    pub world: Mat4,
    pub first_index: u32,
    pub index_count: u32,
    pub material: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<Mesh>,
    pub nodes: Vec<Node>,
    pub roots: Vec<usize>,
    pub materials: Vec<Material>,
    pub images: Vec<ImageData>,
}

impl ModelData {
    /// Load a .gltf (with external or embedded buffers) or .glb file
    pub fn load(path: &Path) -> Result<Self> {
        let (document, buffers, images) =
            gltf::import(path).with_context(|| format!("Failed to import glTF {:?}", path))?;
        let model = Self::from_gltf(&document, &buffers, &images)
            .with_context(|| format!("Failed to load glTF {:?}", path))?;

        log::info!(
            "Loaded {:?}: {} nodes, {} meshes, {} vertices, {} indices, {} materials, {} images",
            path,
            model.nodes.len(),
            model.meshes.len(),
            model.vertices.len(),
            model.indices.len(),
            model.materials.len(),
            model.images.len()
        );

        Ok(model)
    }

    /// Load from an in-memory .glb (or self-contained .gltf)
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let (document, buffers, images) =
            gltf::import_slice(bytes).context("Failed to import glTF data")?;
        Self::from_gltf(&document, &buffers, &images)
    }

    pub fn from_gltf(
        document: &gltf::Document,
        buffers: &[gltf::buffer::Data],
        images: &[gltf::image::Data],
    ) -> Result<Self> {
        let mut model = ModelData {
            materials: document.materials().map(load_material).collect(),
            images: images
                .iter()
                .enumerate()
                .map(|(i, image)| {
                    to_rgba8(image.format, image.width, image.height, &image.pixels)
                        .with_context(|| format!("Image {}", i))
                })
                .collect::<Result<_>>()?,
            ..Default::default()
        };

        for mesh in document.meshes() {
            let loaded = load_mesh(&mesh, buffers, &mut model.vertices, &mut model.indices)
                .with_context(|| format!("Mesh {} ({:?})", mesh.index(), mesh.name()))?;
            model.meshes.push(loaded);
        }

        model.nodes = document
            .nodes()
            .map(|node| Node {
                name: node.name().map(str::to_owned),
                parent: None,
                children: node.children().map(|child| child.index()).collect(),
                matrix: Mat4::from_cols_array_2d(&node.transform().matrix()),
                mesh: node.mesh().map(|mesh| mesh.index()),
            })
            .collect();

        for parent in 0..model.nodes.len() {
            for child in model.nodes[parent].children.clone() {
                let node = model
                    .nodes
                    .get_mut(child)
                    .with_context(|| format!("Node {} has missing child {}", parent, child))?;
                if node.parent.is_some() {
                    anyhow::bail!("Node {} has more than one parent", child);
                }
                node.parent = Some(parent);
            }
        }

        // A parent chain longer than the node count must revisit a node
        for start in 0..model.nodes.len() {
            let mut parent = model.nodes[start].parent;
            let mut steps = 0;
            while let Some(index) = parent {
                steps += 1;
                if steps > model.nodes.len() {
                    anyhow::bail!("Node {} is part of a cycle", start);
                }
                parent = model.nodes[index].parent;
            }
        }

        model.roots = match document.default_scene().or_else(|| document.scenes().next()) {
            Some(scene) => scene.nodes().map(|node| node.index()).collect(),
            None => (0..model.nodes.len())
                .filter(|&i| model.nodes[i].parent.is_none())
                .collect(),
        };
        if let Some(&root) = model.roots.iter().find(|&&i| model.nodes[i].parent.is_some()) {
            anyhow::bail!("Scene root {} is the child of another node", root);
        }

        Ok(model)
    }

    /// Local matrices multiplied from the root down to `node`
    pub fn world_matrix(&self, node: usize) -> Mat4 {
        let mut matrix = self.nodes[node].matrix;
        let mut parent = self.nodes[node].parent;
        while let Some(index) = parent {
            matrix = self.nodes[index].matrix * matrix;
            parent = self.nodes[index].parent;
        }
        matrix
    }

    pub fn material(&self, index: Option<usize>) -> Option<&Material> {
        index.and_then(|i| self.materials.get(i))
    }

    fn is_blended(&self, material: Option<usize>) -> bool {
        self.material(material)
            .map_or(false, |m| m.alpha_mode == AlphaMode::Blend)
    }

    /// Depth-first walk from the roots; blended primitives go last
    pub fn draw_list(&self) -> Vec<DrawCommand> {
        let mut opaque = Vec::new();
        let mut blended = Vec::new();
        let mut visited = vec![false; self.nodes.len()];

        let mut stack: Vec<(usize, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|&root| (root, Mat4::IDENTITY))
            .collect();

        while let Some((index, parent_world)) = stack.pop() {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            if std::mem::replace(&mut visited[index], true) {
                continue;
            }

            let world = parent_world * node.matrix;

            if let Some(mesh) = node.mesh.and_then(|m| self.meshes.get(m)) {
                for primitive in &mesh.primitives {
                    let command = DrawCommand {
                        node: index,
                        world,
                        first_index: primitive.first_index,
                        index_count: primitive.index_count,
                        material: primitive.material,
                    };
                    if self.is_blended(primitive.material) {
                        blended.push(command);
                    } else {
                        opaque.push(command);
                    }
                }
            }

            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }

        opaque.extend(blended);
        opaque
    }

    /// World-space bounding box of everything the draw list renders
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut bounds: Option<(Vec3, Vec3)> = None;

        for command in self.draw_list() {
            let start = command.first_index as usize;
            let end = start + command.index_count as usize;
            for &index in &self.indices[start..end] {
                let local = Vec3::from_array(self.vertices[index as usize].position);
                let p = command.world.transform_point3(local);
                bounds = Some(match bounds {
                    Some((min, max)) => (min.min(p), max.max(p)),
                    None => (p, p),
                });
            }
        }

        bounds
    }
}

fn load_material(material: gltf::Material) -> Material {
    let pbr = material.pbr_metallic_roughness();

    Material {
        base_color_factor: Vec4::from_array(pbr.base_color_factor()),
        base_color_texture: pbr
            .base_color_texture()
            .map(|info| info.texture().source().index()),
        metallic_factor: pbr.metallic_factor(),
        roughness_factor: pbr.roughness_factor(),
        metallic_roughness_texture: pbr
            .metallic_roughness_texture()
            .map(|info| info.texture().source().index()),
        normal_texture: material
            .normal_texture()
            .map(|normal| normal.texture().source().index()),
        alpha_mode: match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
            gltf::material::AlphaMode::Mask => AlphaMode::Mask,
            gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        },
        alpha_cutoff: material.alpha_cutoff().unwrap_or(0.5),
        double_sided: material.double_sided(),
    }
}

fn load_mesh(
    mesh: &gltf::Mesh,
    buffers: &[gltf::buffer::Data],
    vertices: &mut Vec<Vertex>,
    indices: &mut Vec<u32>,
) -> Result<Mesh> {
    let mut primitives = Vec::new();

    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            log::warn!(
                "Skipping primitive {} of mesh {}: mode {:?} is not supported",
                primitive.index(),
                mesh.index(),
                primitive.mode()
            );
            continue;
        }

        let reader =
            primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .context("Primitive has no POSITION attribute")?
            .collect();
        let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(Iterator::collect);
        let uvs: Option<Vec<[f32; 2]>> = reader
            .read_tex_coords(0)
            .map(|uvs| uvs.into_f32().collect());
        let colors: Option<Vec<[f32; 3]>> = reader
            .read_colors(0)
            .map(|colors| colors.into_rgb_f32().collect());
        let tangents: Option<Vec<[f32; 4]>> = reader.read_tangents().map(Iterator::collect);

        let first_vertex = vertices.len() as u32;
        vertices.extend((0..positions.len()).map(|i| Vertex {
            position: positions[i],
            normal: attribute_or(&normals, i, [0.0, 0.0, 1.0]),
            uv: attribute_or(&uvs, i, [0.0, 0.0]),
            color: attribute_or(&colors, i, [1.0, 1.0, 1.0]),
            tangent: attribute_or(&tangents, i, [1.0, 0.0, 0.0, 1.0]),
        }));

        let local_indices: Vec<u32> = match reader.read_indices() {
            Some(read) => read.into_u32().collect(),
            None => (0..positions.len() as u32).collect(),
        };

        if let Some(&bad) = local_indices.iter().find(|&&i| i as usize >= positions.len()) {
            anyhow::bail!(
                "Index {} out of range for {} vertices",
                bad,
                positions.len()
            );
        }

        let first_index = indices.len() as u32;
        indices.extend(local_indices.iter().map(|&i| i + first_vertex));

        primitives.push(Primitive {
            first_index,
            index_count: local_indices.len() as u32,
            material: primitive.material().index(),
        });
    }

    Ok(Mesh { primitives })
}

fn attribute_or<T: Copy>(values: &Option<Vec<T>>, index: usize, default: T) -> T {
    values
        .as_ref()
        .and_then(|values| values.get(index).copied())
        .unwrap_or(default)
}

/// Expand 8- and 16-bit channel layouts to RGBA8
pub fn to_rgba8(
    format: gltf::image::Format,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<ImageData> {
    use gltf::image::Format;

    let (channels, bytes_per_channel) = match format {
        Format::R8 => (1, 1),
        Format::R8G8 => (2, 1),
        Format::R8G8B8 => (3, 1),
        Format::R8G8B8A8 => (4, 1),
        Format::R16 => (1, 2),
        Format::R16G16 => (2, 2),
        Format::R16G16B16 => (3, 2),
        Format::R16G16B16A16 => (4, 2),
        other => anyhow::bail!("Unsupported image format {:?}", other),
    };

    let pixel_count = width as usize * height as usize;
    let stride = channels * bytes_per_channel;
    if pixels.len() != pixel_count * stride {
        anyhow::bail!(
            "{}x{} {:?} image has {} bytes, expected {}",
            width,
            height,
            format,
            pixels.len(),
            pixel_count * stride
        );
    }

    let mut rgba = Vec::with_capacity(pixel_count * 4);
    for pixel in pixels.chunks_exact(stride) {
        // Little-endian 16-bit: keep the high byte
        let channel = |c: usize| pixel[c * bytes_per_channel + bytes_per_channel - 1];
        let texel = match channels {
            1 => [channel(0), channel(0), channel(0), 255],
            2 => [channel(0), channel(1), 0, 255],
            3 => [channel(0), channel(1), channel(2), 255],
            _ => [channel(0), channel(1), channel(2), channel(3)],
        };
        rgba.extend_from_slice(&texel);
    }

    Ok(ImageData {
        width,
        height,
        pixels: rgba,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    /// Assemble a binary glTF container from a JSON chunk and a BIN chunk
    fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json_chunk = json.as_bytes().to_vec();
        while json_chunk.len() % 4 != 0 {
            json_chunk.push(b' ');
        }
        let mut bin_chunk = bin.to_vec();
        while bin_chunk.len() % 4 != 0 {
            bin_chunk.push(0);
        }

        let bin_len = if bin_chunk.is_empty() { 0 } else { 8 + bin_chunk.len() };
        let total = 12 + 8 + json_chunk.len() + bin_len;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(b"JSON");
        out.extend_from_slice(&json_chunk);
        if !bin_chunk.is_empty() {
            out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
            out.extend_from_slice(b"BIN\0");
            out.extend_from_slice(&bin_chunk);
        }
        out
    }

    fn push_vec3s(bin: &mut Vec<u8>, values: &[[f32; 3]]) {
        for v in values {
            for c in v {
                bin.extend_from_slice(&c.to_le_bytes());
            }
        }
    }

    /// Two meshes under a small hierarchy:
    ///
    /// root (translate x+10)
    /// ├── blended (mesh 1, non-indexed, material 1 = BLEND)
    /// └── child (scale 2, mesh 0, material 0 = MASK)
    ///     └── grandchild (translate y+5, mesh 0)
    fn hierarchy_glb() -> Vec<u8> {
        let mut bin = Vec::new();
        push_vec3s(&mut bin, &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        for i in [0u16, 1, 2] {
            bin.extend_from_slice(&i.to_le_bytes());
        }
        bin.extend_from_slice(&[0, 0]);
        push_vec3s(&mut bin, &[[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 1.0]]);
        push_vec3s(&mut bin, &[[0.0, 1.0, 0.0]; 3]);
        assert_eq!(bin.len(), 116);

        let json = r#"{
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [ { "nodes": [0] } ],
            "nodes": [
                { "name": "root", "translation": [10, 0, 0], "children": [1, 2] },
                { "name": "blended", "mesh": 1 },
                { "name": "child", "scale": [2, 2, 2], "mesh": 0, "children": [3] },
                { "name": "grandchild", "translation": [0, 5, 0], "mesh": 0 }
            ],
            "meshes": [
                { "primitives": [ { "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 } ] },
                { "primitives": [ { "attributes": { "POSITION": 2, "NORMAL": 3 }, "material": 1 } ] }
            ],
            "materials": [
                {
                    "pbrMetallicRoughness": {
                        "baseColorFactor": [1, 0, 0, 1],
                        "metallicFactor": 0.25,
                        "roughnessFactor": 0.75
                    },
                    "alphaMode": "MASK",
                    "alphaCutoff": 0.3
                },
                { "alphaMode": "BLEND", "doubleSided": true }
            ],
            "buffers": [ { "byteLength": 116 } ],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 },
                { "buffer": 0, "byteOffset": 44, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 80, "byteLength": 36 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0, 0, 0], "max": [1, 1, 0] },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" },
                { "bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0, 0, 0], "max": [1, 0, 1] },
                { "bufferView": 3, "componentType": 5126, "count": 3, "type": "VEC3" }
            ]
        }"#;

        glb(json, &bin)
    }

    fn triangle_glb(indices: [u16; 3]) -> Vec<u8> {
        let mut bin = Vec::new();
        push_vec3s(&mut bin, &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        for i in indices {
            bin.extend_from_slice(&i.to_le_bytes());
        }

        let json = r#"{
            "asset": { "version": "2.0" },
            "nodes": [ { "mesh": 0 } ],
            "meshes": [ { "primitives": [ { "attributes": { "POSITION": 0 }, "indices": 1 } ] } ],
            "buffers": [ { "byteLength": 42 } ],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0, 0, 0], "max": [1, 1, 0] },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
            ]
        }"#;

        glb(json, &bin)
    }

    fn node_named(model: &ModelData, name: &str) -> usize {
        model
            .nodes
            .iter()
            .position(|n| n.name.as_deref() == Some(name))
            .unwrap()
    }

    #[test]
    fn meshes_share_one_vertex_and_index_array() {
        let model = ModelData::from_slice(&hierarchy_glb()).unwrap();

        assert_eq!(model.vertices.len(), 6);
        // Second mesh is non-indexed and rebased past the first mesh's vertices
        assert_eq!(model.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(
            model.meshes[1].primitives[0],
            Primitive {
                first_index: 3,
                index_count: 3,
                material: Some(1)
            }
        );
    }

    #[test]
    fn missing_attributes_get_defaults() {
        let model = ModelData::from_slice(&hierarchy_glb()).unwrap();

        let plain = model.vertices[0];
        assert_eq!(plain.normal, [0.0, 0.0, 1.0]);
        assert_eq!(plain.uv, [0.0, 0.0]);
        assert_eq!(plain.color, [1.0, 1.0, 1.0]);
        assert_eq!(plain.tangent, [1.0, 0.0, 0.0, 1.0]);

        let with_normals = model.vertices[4];
        assert_eq!(with_normals.normal, [0.0, 1.0, 0.0]);
        assert_eq!(with_normals.position, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn hierarchy_is_linked_both_ways() {
        let model = ModelData::from_slice(&hierarchy_glb()).unwrap();

        let root = node_named(&model, "root");
        let child = node_named(&model, "child");
        let grandchild = node_named(&model, "grandchild");

        assert_eq!(model.roots, vec![root]);
        assert_eq!(model.nodes[root].parent, None);
        assert_eq!(model.nodes[child].parent, Some(root));
        assert_eq!(model.nodes[grandchild].parent, Some(child));
        assert_eq!(model.nodes[child].children, vec![grandchild]);
    }

    #[test]
    fn world_matrix_composes_from_root() {
        let model = ModelData::from_slice(&hierarchy_glb()).unwrap();
        let grandchild = node_named(&model, "grandchild");

        let origin = model.world_matrix(grandchild).transform_point3(Vec3::ZERO);
        assert!(origin.abs_diff_eq(Vec3::new(10.0, 10.0, 0.0), 1e-5));
    }

    #[test]
    fn draw_list_is_depth_first_with_blend_last() {
        let model = ModelData::from_slice(&hierarchy_glb()).unwrap();
        let draws = model.draw_list();

        let names: Vec<_> = draws
            .iter()
            .map(|d| model.nodes[d.node].name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["child", "grandchild", "blended"]);

        for draw in &draws {
            assert_eq!(draw.world, model.world_matrix(draw.node));
        }
    }

    #[test]
    fn materials_keep_factors_and_alpha() {
        let model = ModelData::from_slice(&hierarchy_glb()).unwrap();

        let mask = &model.materials[0];
        assert_eq!(mask.alpha_mode, AlphaMode::Mask);
        assert!((mask.alpha_cutoff - 0.3).abs() < 1e-6);
        assert!((mask.metallic_factor - 0.25).abs() < 1e-6);
        assert!((mask.roughness_factor - 0.75).abs() < 1e-6);
        assert_eq!(mask.base_color_factor, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert!(mask.base_color_texture.is_none());

        let blend = &model.materials[1];
        assert_eq!(blend.alpha_mode, AlphaMode::Blend);
        assert!(blend.double_sided);
        assert_eq!(blend.alpha_cutoff, 0.5);
        assert_eq!(blend.metallic_factor, 1.0);
    }

    #[test]
    fn bounds_cover_every_instance() {
        let model = ModelData::from_slice(&hierarchy_glb()).unwrap();
        let (min, max) = model.bounds().unwrap();

        assert!(min.abs_diff_eq(Vec3::new(10.0, 0.0, 0.0), 1e-5));
        assert!(max.abs_diff_eq(Vec3::new(12.0, 12.0, 1.0), 1e-5));
    }

    #[test]
    fn scene_less_file_uses_parentless_nodes_as_roots() {
        let model = ModelData::from_slice(&triangle_glb([0, 1, 2])).unwrap();
        assert_eq!(model.roots, vec![0]);
        assert_eq!(model.draw_list().len(), 1);
        assert_eq!(model.draw_list()[0].material, None);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        assert!(ModelData::from_slice(&triangle_glb([0, 1, 7])).is_err());
    }

    #[test]
    fn empty_model_has_no_bounds() {
        assert!(ModelData::default().bounds().is_none());
        assert!(ModelData::default().draw_list().is_empty());
    }

    #[test]
    fn cyclic_node_graph_is_rejected() {
        let json = r#"{
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [ { "nodes": [0] } ],
            "nodes": [
                { "name": "a", "children": [1] },
                { "name": "b", "children": [0] }
            ]
        }"#;

        let err = ModelData::from_slice(&glb(json, &[])).unwrap_err();
        assert!(format!("{:#}", err).contains("cycle"));
    }

    #[test]
    fn scene_root_with_parent_is_rejected() {
        let json = r#"{
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [ { "nodes": [1] } ],
            "nodes": [
                { "name": "parent", "children": [1] },
                { "name": "child" }
            ]
        }"#;

        assert!(ModelData::from_slice(&glb(json, &[])).is_err());
    }

    #[test]
    fn draw_list_tolerates_cycles() {
        let mut model = ModelData::default();
        model.nodes = (0..2)
            .map(|i| Node {
                name: None,
                parent: Some(1 - i),
                children: vec![1 - i],
                matrix: Mat4::IDENTITY,
                mesh: None,
            })
            .collect();
        model.roots = vec![0];
        assert!(model.draw_list().is_empty());
    }

    #[test]
    fn rgb_images_gain_opaque_alpha() {
        let image = to_rgba8(gltf::image::Format::R8G8B8, 2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(image.pixels, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn grayscale_and_16_bit_images_are_narrowed() {
        let gray = to_rgba8(gltf::image::Format::R8, 1, 1, &[7]).unwrap();
        assert_eq!(gray.pixels, vec![7, 7, 7, 255]);

        let wide = to_rgba8(
            gltf::image::Format::R16G16B16A16,
            1,
            1,
            &[0x00, 0x10, 0xff, 0x20, 0x00, 0x30, 0x00, 0xff],
        )
        .unwrap();
        assert_eq!(wide.pixels, vec![0x10, 0x20, 0x30, 0xff]);
    }

    #[test]
    fn float_images_and_short_buffers_are_errors() {
        assert!(to_rgba8(gltf::image::Format::R32G32B32FLOAT, 1, 1, &[0; 12]).is_err());
        assert!(to_rgba8(gltf::image::Format::R8G8B8A8, 2, 2, &[0; 4]).is_err());
    }

    #[test]
    fn vertex_layout_matches_struct() {
        let input = Vertex::vertex_input();
        assert_eq!(input.bindings[0].stride as usize, size_of::<Vertex>());
        let offsets: Vec<u32> = input.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32, 44]);
    }
}
