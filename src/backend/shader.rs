// Shader module loading
//
// Vulkan consumes SPIR-V; build.rs compiles the GLSL sources next to them.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

use super::VulkanDevice;

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Read a .spv file (read_spv handles alignment and endianness) and create a module
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open shader {:?}. Was it compiled with glslc?", path))?;
    let code = ash::util::read_spv(&mut file)
        .with_context(|| format!("Invalid SPIR-V in {:?}", path))?;

    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    create_shader_module(device, &code)
}
