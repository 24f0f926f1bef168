// Scene module - glTF models and the camera

pub mod camera;
pub mod gltf_model;
pub mod model_data;

pub use camera::Camera;
pub use gltf_model::{AlphaPass, PrimitivePushConstants, VulkanGLTFModel};
pub use model_data::Vertex;
