// Descriptor set layouts, pools and writes

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::VulkanDevice;

/// One binding slot of a descriptor set layout
#[derive(Debug, Clone, Copy)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl LayoutBinding {
    pub fn uniform_buffer(binding: u32, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages,
        }
    }

    pub fn sampled_image(binding: u32, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 1,
            stages,
        }
    }
}

pub struct DescriptorSetLayout {
    pub layout: vk::DescriptorSetLayout,
    bindings: Vec<LayoutBinding>,
    device: Arc<VulkanDevice>,
}

impl DescriptorSetLayout {
    pub fn new(device: &Arc<VulkanDevice>, bindings: &[LayoutBinding]) -> Result<Self> {
        let vk_bindings: Vec<_> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
                    .build()
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);

        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(Self {
            layout,
            bindings: bindings.to_vec(),
            device: device.clone(),
        })
    }

    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None)
        };
    }
}

/// Merge (type, count) requirements into one pool size per descriptor type
pub fn pool_sizes<I>(requirements: I) -> Vec<vk::DescriptorPoolSize>
where
    I: IntoIterator<Item = (vk::DescriptorType, u32)>,
{
    let mut totals: BTreeMap<vk::DescriptorType, u32> = BTreeMap::new();
    for (ty, count) in requirements {
        if count > 0 {
            *totals.entry(ty).or_default() += count;
        }
    }

    totals
        .into_iter()
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect()
}

pub struct DescriptorPool {
    pub pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl DescriptorPool {
    /// Pool with room for `sets` sets of each given layout
    pub fn new(device: &Arc<VulkanDevice>, layouts: &[(&DescriptorSetLayout, u32)]) -> Result<Self> {
        let requirements = layouts.iter().flat_map(|(layout, sets)| {
            layout
                .bindings()
                .iter()
                .map(move |b| (b.descriptor_type, b.count * sets))
        });
        let sizes = pool_sizes(requirements);
        let max_sets: u32 = layouts.iter().map(|(_, sets)| sets).sum();

        if sizes.is_empty() || max_sets == 0 {
            anyhow::bail!("Descriptor pool would be empty");
        }

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(max_sets);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?;

        Ok(sets[0])
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}

enum PendingWrite {
    Buffer(u32, vk::DescriptorType, vk::DescriptorBufferInfo),
    Image(u32, vk::DescriptorImageInfo),
}

/// Collects writes for one set and applies them in a single update
pub struct DescriptorWriter {
    set: vk::DescriptorSet,
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    pub fn new(set: vk::DescriptorSet) -> Self {
        Self {
            set,
            writes: Vec::new(),
        }
    }

    pub fn uniform_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.writes.push(PendingWrite::Buffer(
            binding,
            vk::DescriptorType::UNIFORM_BUFFER,
            info,
        ));
        self
    }

    pub fn sampled_image(mut self, binding: u32, info: vk::DescriptorImageInfo) -> Self {
        self.writes.push(PendingWrite::Image(binding, info));
        self
    }

    pub fn update(self, device: &VulkanDevice) {
        // Infos live in self.writes, which outlives the update call
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| match write {
                PendingWrite::Buffer(binding, ty, info) => vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
                PendingWrite::Image(binding, info) => vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info))
                    .build(),
            })
            .collect();

        unsafe { device.device.update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_by_type() {
        let sizes = pool_sizes([
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3),
            (vk::DescriptorType::UNIFORM_BUFFER, 2),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4),
        ]);

        assert_eq!(sizes.len(), 2);
        let samplers = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(samplers.descriptor_count, 7);
        let uniforms = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(uniforms.descriptor_count, 2);
    }

    #[test]
    fn pool_sizes_are_deterministic_and_skip_zero() {
        let a = pool_sizes([
            (vk::DescriptorType::UNIFORM_BUFFER, 1),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
            (vk::DescriptorType::STORAGE_BUFFER, 0),
        ]);
        let b = pool_sizes([
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
            (vk::DescriptorType::UNIFORM_BUFFER, 1),
        ]);

        let types = |sizes: &[vk::DescriptorPoolSize]| -> Vec<_> {
            sizes.iter().map(|s| s.ty).collect()
        };
        assert_eq!(types(&a), types(&b));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn empty_requirements_give_no_sizes() {
        assert!(pool_sizes(std::iter::empty()).is_empty());
    }
}
