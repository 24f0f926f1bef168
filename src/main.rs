// =============================================================================
// VULKAN SAMPLES - glTF scene viewer with forward and deferred render paths
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, camera, input)                          │
// │    └── GpuState                                                 │
// │          ├── VulkanDevice + Surface + Swapchain                 │
// │          ├── SwapchainFramebuffers (presentation pass targets)  │
// │          ├── VulkanGLTFModel (buffers, textures, materials)     │
// │          └── SceneRenderer (forward or deferred)                │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the fence of this frame slot
// 2. Acquire swapchain image
// 3. Reset the fence, update uniforms
// 4. Re-record the slot's command buffer
// 5. Submit and present
//
// =============================================================================

mod backend;
mod config;
mod hot_reload;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use ash::vk;
use backend::descriptor::DescriptorSetLayout;
use backend::swapchain::AcquiredImage;
use backend::sync::FrameSync;
use backend::{Surface, Swapchain, SwapchainFramebuffers, VulkanDevice};
use config::{Config, RenderPath};
use hot_reload::ShaderWatcher;
use raw_window_handle::HasDisplayHandle;
use renderer::{DeferredRenderer, ForwardRenderer, SceneRenderer};
use scene::{Camera, VulkanGLTFModel};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

/// Radians per arrow key press
const ORBIT_STEP: f32 = 0.1;
const ZOOM_STEP: f32 = 1.1;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan samples");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Renderer: {:?}, present mode: {}",
        config.graphics.renderer,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Info by default, RUST_LOG overrides; optionally piped to a file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    let mut file_error = None;
    if config.debug.log_to_file {
        match std::fs::File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => file_error = Some(e),
        }
    }

    builder.init();

    if let Some(e) = file_error {
        log::warn!("Can't open log file {}: {}", config.debug.log_file, e);
    }
}

// =============================================================================
// GPU STATE
// =============================================================================

/// Everything that lives as long as the window.
///
/// Field order matters for Drop: the renderer and model go before the
/// swapchain, the swapchain before the surface, and the device last.
struct GpuState {
    watcher: Option<ShaderWatcher>,
    renderer: Box<dyn SceneRenderer>,
    model: VulkanGLTFModel,
    _material_layout: DescriptorSetLayout,
    framebuffers: Option<SwapchainFramebuffers>,
    swapchain: Option<Swapchain>,
    color_format: vk::Format,
    command_pool: vk::CommandPool,
    /// One per frame in flight, re-recorded every frame
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    surface: Surface,
    device: Arc<VulkanDevice>,
}

/// What happened to a frame
enum FrameOutcome {
    Presented { needs_resize: bool },
    SwapchainOutOfDate,
}

impl GpuState {
    fn new(config: &Config, window: &Window) -> Result<(Self, Camera)> {
        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device and surface
        // ─────────────────────────────────────────────────────────────────────
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let device = VulkanDevice::new(&config.window.title, enable_validation, display)?;

        let surface = Surface::new(device.clone(), window)?;
        if !surface.supports_presentation()? {
            anyhow::bail!("GPU doesn't support presenting to this surface");
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Swapchain
        // ─────────────────────────────────────────────────────────────────────
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            size.width.max(1),
            size.height.max(1),
            config.present_mode(),
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Scene
        // ─────────────────────────────────────────────────────────────────────
        let material_layout = VulkanGLTFModel::material_set_layout(&device)?;
        let model = VulkanGLTFModel::load(
            &device,
            &config.scene.model,
            &material_layout,
            config.graphics.generate_mipmaps,
        )?;

        let mut camera = Camera::new(config.scene.fov);
        if let Some((min, max)) = model.data().bounds() {
            camera.frame_bounds(min, max);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Renderer and the framebuffers for its presentation pass
        // ─────────────────────────────────────────────────────────────────────
        let double_sided = model.has_double_sided_materials();
        let renderer: Box<dyn SceneRenderer> = match config.graphics.renderer {
            RenderPath::Forward => Box::new(ForwardRenderer::new(
                &device,
                config,
                swapchain.format,
                material_layout.layout,
                double_sided,
            )?),
            RenderPath::Deferred => Box::new(DeferredRenderer::new(
                &device,
                config,
                swapchain.format,
                swapchain.extent,
                material_layout.layout,
                double_sided,
            )?),
        };

        let framebuffers =
            SwapchainFramebuffers::new(&device, &swapchain, renderer.presentation_pass())?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Commands and synchronization
        // ─────────────────────────────────────────────────────────────────────
        let frames = config.graphics.max_frames_in_flight;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames as u32);
        let command_buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(e).context("Failed to allocate command buffers");
            }
        };

        let mut frame_sync = Vec::with_capacity(frames);
        for _ in 0..frames {
            match FrameSync::new(&device) {
                Ok(sync) => frame_sync.push(sync),
                Err(e) => {
                    for sync in &frame_sync {
                        sync.destroy(&device.device);
                    }
                    unsafe { device.device.destroy_command_pool(command_pool, None) };
                    return Err(e);
                }
            }
        }

        let watcher = if config.shaders.hot_reload {
            match ShaderWatcher::new(&config.shaders.directory) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!(
            "Vulkan initialized: {} renderer, {} frames in flight",
            renderer.name(),
            frames
        );

        let state = Self {
            watcher,
            renderer,
            model,
            _material_layout: material_layout,
            framebuffers: Some(framebuffers),
            color_format: swapchain.format,
            swapchain: Some(swapchain),
            command_pool,
            command_buffers,
            frame_sync,
            surface,
            device,
        };

        Ok((state, camera))
    }

    /// Rebuild the swapchain and everything sized after it
    fn recreate_swapchain(&mut self, width: u32, height: u32, present_mode: vk::PresentModeKHR) -> Result<()> {
        self.device.wait_idle()?;

        // The surface can only have one swapchain at a time
        self.framebuffers = None;
        self.swapchain = None;

        let swapchain = Swapchain::new(self.device.clone(), &self.surface, width, height, present_mode)?;
        if swapchain.format != self.color_format {
            anyhow::bail!(
                "Swapchain format changed from {:?} to {:?}",
                self.color_format,
                swapchain.format
            );
        }

        self.renderer.resize(swapchain.extent)?;
        self.framebuffers = Some(SwapchainFramebuffers::new(
            &self.device,
            &swapchain,
            self.renderer.presentation_pass(),
        )?);
        self.swapchain = Some(swapchain);

        Ok(())
    }

    /// Rebuild pipelines if a compiled shader changed on disk
    fn poll_shader_changes(&mut self) -> Result<()> {
        let changed = self.watcher.as_ref().map_or(false, |w| w.poll());
        if !changed {
            return Ok(());
        }

        self.device.wait_idle()?;
        match self.renderer.reload_shaders() {
            Ok(()) => log::info!("Shaders reloaded"),
            Err(e) => log::error!("Shader reload failed, keeping old pipelines: {:#}", e),
        }
        Ok(())
    }

    fn draw_frame(&mut self, frame: usize, camera: &Camera, time: f32) -> Result<FrameOutcome> {
        let device = self.device.clone();
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let framebuffers = self
            .framebuffers
            .as_ref()
            .context("Framebuffers not initialized")?;
        let sync = &self.frame_sync[frame];

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this slot
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            device
                .device
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)
                .context("Failed to wait for frame fence")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire
        // ─────────────────────────────────────────────────────────────────────
        let (image_index, suboptimal) =
            match swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
                AcquiredImage::Ready { index, suboptimal } => (index, suboptimal),
                AcquiredImage::OutOfDate => return Ok(FrameOutcome::SwapchainOutOfDate),
            };
        let render_finished = swapchain.render_finished(image_index)?;

        // Only reset once work is certain to be submitted
        unsafe {
            device
                .device
                .reset_fences(&[sync.in_flight_fence])
                .context("Failed to reset frame fence")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Uniforms and command recording
        // ─────────────────────────────────────────────────────────────────────
        let extent = swapchain.extent;
        let framebuffer = framebuffers.framebuffers[image_index as usize];
        let cmd = self.command_buffers[frame];

        self.renderer
            .update(frame, camera, swapchain.aspect_ratio(), time)?;

        unsafe {
            device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
            device
                .device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::builder())
                .context("Failed to begin command buffer")?;
        }

        self.renderer
            .record(cmd, frame, framebuffer, extent, &self.model)?;

        unsafe { device.device.end_command_buffer(cmd) }.context("Failed to end command buffer")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Submit and present
        // ─────────────────────────────────────────────────────────────────────
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], sync.in_flight_fence)
                .context("Failed to submit frame")?;
        }

        let present_wants_resize =
            swapchain.present(device.graphics_queue, image_index, &signal_semaphores)?;

        Ok(FrameOutcome::Presented {
            needs_resize: suboptimal || present_wants_resize,
        })
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();

        for sync in &self.frame_sync {
            sync.destroy(&self.device.device);
        }
        // Also frees the command buffers
        unsafe { self.device.device.destroy_command_pool(self.command_pool, None) };
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

pub struct App {
    config: Config,
    window: Option<Arc<Window>>,
    gpu: Option<GpuState>,
    camera: Camera,
    is_fullscreen: bool,
    auto_rotate: bool,

    /// Which sync slot we're currently using (0 to max_frames_in_flight-1)
    current_frame: usize,

    /// Set when the window is resized or the swapchain reports suboptimal
    needs_resize: bool,
    /// Window has zero size - skip rendering
    is_minimized: bool,

    // FPS tracking
    start_time: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            is_fullscreen: config.window.fullscreen,
            auto_rotate: config.scene.auto_rotate,
            camera: Camera::new(config.scene.fov),
            config,
            window: None,
            gpu: None,
            current_frame: 0,
            needs_resize: false,
            is_minimized: false,
            start_time: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// Render a single frame. Returns false when nothing was presented.
    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        let window = self.window.clone().context("Window not created")?;
        let gpu = self.gpu.as_mut().context("Vulkan not initialized")?;

        if self.needs_resize {
            let size = window.inner_size();
            if size.width == 0 || size.height == 0 {
                self.is_minimized = true;
                return Ok(false);
            }
            gpu.recreate_swapchain(size.width, size.height, self.config.present_mode())?;
            self.needs_resize = false;
        }

        gpu.poll_shader_changes()?;

        // Camera animation uses the time since the previous frame
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        if self.auto_rotate {
            self.camera.orbit(self.config.scene.rotation_speed * dt, 0.0);
        }
        let time = now.duration_since(self.start_time).as_secs_f32();

        match gpu.draw_frame(self.current_frame, &self.camera, time)? {
            FrameOutcome::SwapchainOutOfDate => {
                self.needs_resize = true;
                Ok(false)
            }
            FrameOutcome::Presented { needs_resize } => {
                self.needs_resize |= needs_resize;
                self.current_frame =
                    (self.current_frame + 1) % self.config.graphics.max_frames_in_flight;
                Ok(true)
            }
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    fn update_fps(&mut self) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        if !self.config.debug.show_fps {
            return;
        }
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let (Some(window), Some(gpu)) = (&self.window, &self.gpu) {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    gpu.renderer.name()
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: winit::keyboard::KeyCode) {
        use winit::keyboard::KeyCode;

        match key {
            KeyCode::Escape => {
                log::info!("ESC pressed, exiting...");
                event_loop.exit();
            }
            KeyCode::F11 => self.toggle_fullscreen(),
            KeyCode::ArrowLeft => self.camera.orbit(-ORBIT_STEP, 0.0),
            KeyCode::ArrowRight => self.camera.orbit(ORBIT_STEP, 0.0),
            KeyCode::ArrowUp => self.camera.orbit(0.0, ORBIT_STEP),
            KeyCode::ArrowDown => self.camera.orbit(0.0, -ORBIT_STEP),
            KeyCode::Equal | KeyCode::NumpadAdd => self.camera.zoom(1.0 / ZOOM_STEP),
            KeyCode::Minus | KeyCode::NumpadSubtract => self.camera.zoom(ZOOM_STEP),
            KeyCode::Space => {
                self.auto_rotate = !self.auto_rotate;
                log::info!("Auto-rotate {}", if self.auto_rotate { "on" } else { "off" });
            }
            KeyCode::KeyV => {
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.renderer.cycle_debug_view();
                }
            }
            _ => {}
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match GpuState::new(&self.config, &window) {
            Ok((gpu, camera)) => {
                self.gpu = Some(gpu);
                self.camera = camera;
            }
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        let now = Instant::now();
        self.start_time = now;
        self.last_frame_time = now;
        self.last_fps_update = now;
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        self.handle_key(event_loop, key);
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("Cleaning up Vulkan resources...");
        // GPU objects reference the window's surface; drop them first
        self.gpu = None;
        log::info!("Cleanup complete");
    }
}
