// Window surface - connects a platform window to Vulkan presentation
//
// Handles come from raw-window-handle 0.6 (what winit 0.30 hands out).

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{
    HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use std::ffi::CStr;
use std::sync::Arc;

use super::VulkanDevice;

/// Instance extensions needed to create surfaces on `display`
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };

    Ok(vec![khr::Surface::name(), platform])
}

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    device: Arc<VulkanDevice>,
}

impl Surface {
    pub fn new<W>(device: Arc<VulkanDevice>, window: &W) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();

        let entry = &device.entry;
        let instance = &device.instance;

        let surface = unsafe {
            match (display_handle, window_handle) {
                (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                    let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0)
                        as *const std::ffi::c_void;
                    let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
                    let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                        .hinstance(hinstance)
                        .hwnd(hwnd);
                    khr::Win32Surface::new(entry, instance)
                        .create_win32_surface(&create_info, None)?
                }
                (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                    let dpy = display
                        .display
                        .context("Xlib display handle has no display")?;
                    let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                        .dpy(dpy.as_ptr().cast())
                        .window(handle.window);
                    khr::XlibSurface::new(entry, instance)
                        .create_xlib_surface(&create_info, None)?
                }
                (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                    let connection = display
                        .connection
                        .context("Xcb display handle has no connection")?;
                    let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                        .connection(connection.as_ptr())
                        .window(handle.window.get());
                    khr::XcbSurface::new(entry, instance)
                        .create_xcb_surface(&create_info, None)?
                }
                (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                    let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                        .display(display.display.as_ptr())
                        .surface(handle.surface.as_ptr());
                    khr::WaylandSurface::new(entry, instance)
                        .create_wayland_surface(&create_info, None)?
                }
                _ => anyhow::bail!("Unsupported window handle type"),
            }
        };

        let loader = khr::Surface::new(entry, instance);

        Ok(Self {
            surface,
            loader,
            device,
        })
    }

    /// Whether the device's graphics queue can present to this surface
    pub fn supports_presentation(&self) -> Result<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                self.device.physical_device,
                self.device.graphics_queue_family,
                self.surface,
            )
        }?;
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{AppKitDisplayHandle, WaylandDisplayHandle, XlibDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn xlib_needs_surface_and_xlib_extensions() {
        let display = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let extensions = required_extensions(display).unwrap();
        assert_eq!(extensions, vec![khr::Surface::name(), khr::XlibSurface::name()]);
    }

    #[test]
    fn wayland_needs_wayland_extension() {
        let mut dummy = 0u8;
        let ptr = NonNull::from(&mut dummy).cast();
        let display = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(ptr));
        let extensions = required_extensions(display).unwrap();
        assert_eq!(extensions[1], khr::WaylandSurface::name());
    }

    #[test]
    fn unsupported_platform_is_an_error() {
        let display = RawDisplayHandle::AppKit(AppKitDisplayHandle::new());
        assert!(required_extensions(display).is_err());
    }
}
