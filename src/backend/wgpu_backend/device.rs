// wgpu instance, adapter and logical device for one flavor

use super::WgpuFlavor;
use anyhow::{Context, Result};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

pub struct WgpuDevice {
    pub flavor: WgpuFlavor,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl WgpuDevice {
    /// Open a device that can present to `window`, returning the surface with it
    pub fn with_surface(
        flavor: WgpuFlavor,
        validation: bool,
        window: (RawDisplayHandle, RawWindowHandle),
    ) -> Result<(Self, wgpu::Surface<'static>)> {
        let instance = create_instance(flavor, validation);
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: window.0,
                raw_window_handle: window.1,
            })
        }
        .context("Failed to create wgpu surface")?;

        let device = Self::open(instance, flavor, Some(&surface))?;
        Ok((device, surface))
    }

    /// Device without a surface, for uploads and tests
    pub fn headless(flavor: WgpuFlavor) -> Result<Self> {
        Self::open(create_instance(flavor, false), flavor, None)
    }

    fn open(instance: wgpu::Instance, flavor: WgpuFlavor, surface: Option<&wgpu::Surface<'_>>) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: surface,
        }))
        .with_context(|| format!("No {} adapter available", flavor.label()))?;

        let info = adapter.get_info();
        log::info!(
            "wgpu adapter: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("render-core device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
            },
            None,
        ))
        .context("Failed to create wgpu device")?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu: {}", error);
        }));

        Ok(Self {
            flavor,
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    pub fn name(&self) -> String {
        self.adapter.get_info().name
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    pub fn wait_idle(&self) {
        block_on_queue(&self.device, wgpu::Maintain::Wait, "device idle");
    }
}

/// Block on `maintain`, returning whether the queue drained.
///
/// A full wait that leaves work behind is logged; waiting on one submission
/// may legitimately leave later ones in flight.
pub fn block_on_queue(device: &wgpu::Device, maintain: wgpu::Maintain, what: &str) -> bool {
    let full_wait = matches!(maintain, wgpu::Maintain::Wait);
    let drained = device.poll(maintain).is_queue_empty();
    if full_wait && !drained {
        log::warn!("wgpu queue still busy after waiting for {}", what);
    } else {
        log::trace!("Waited for {} (queue drained: {})", what, drained);
    }
    drained
}

fn create_instance(flavor: WgpuFlavor, validation: bool) -> wgpu::Instance {
    let flags = if validation {
        wgpu::InstanceFlags::debugging()
    } else {
        wgpu::InstanceFlags::empty()
    };
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: flavor.backends(),
        flags,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_report_a_drained_queue() {
        let gpu = match WgpuDevice::headless(WgpuFlavor::Explicit) {
            Ok(gpu) => gpu,
            Err(e) => {
                eprintln!("skipping: no wgpu adapter ({:#})", e);
                return;
            }
        };

        let encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("empty") });
        let index = gpu.queue.submit(Some(encoder.finish()));
        assert!(block_on_queue(&gpu.device, wgpu::Maintain::WaitForSubmissionIndex(index), "test submission"));
        assert!(block_on_queue(&gpu.device, wgpu::Maintain::Wait, "idle device"));
        gpu.wait_idle();
    }
}
