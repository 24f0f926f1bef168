// Buffer utilities for vertex, index, uniform and staging buffers
//
// Memory comes from the gpu-allocator sub-allocator owned by VulkanDevice.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// A GPU buffer and its backing allocation
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        if size == 0 {
            anyhow::bail!("Buffer '{}' would be empty", name);
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = match device.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let memory = unsafe { allocation.memory() };
        let offset = allocation.offset();

        // Drop releases the buffer and its allocation if binding fails
        let buffer = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device: device.clone(),
        };

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer.buffer, memory, offset)
                .with_context(|| format!("Failed to bind memory for buffer '{}'", name))?;
        }

        Ok(buffer)
    }

    /// Host-visible buffer filled with `data`
    pub fn with_data<T: Pod>(
        device: &Arc<VulkanDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            device,
            bytes.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
            name,
        )?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Device-local buffer filled with `data` through a staging copy
    pub fn device_local_with_data<T: Pod>(
        device: &Arc<VulkanDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let staging = Self::with_data(
            device,
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
            &format!("{} (staging)", name),
        )?;

        let buffer = Self::new(
            device,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };

        device.one_time_submit(|dev, cmd| unsafe {
            dev.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
        })?;

        Ok(buffer)
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer is not host visible")?;

        if bytes.len() > mapped.len() {
            anyhow::bail!(
                "Write of {} bytes overflows buffer of {} bytes",
                bytes.len(),
                mapped.len()
            );
        }

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}
