// Surface configuration as a swapchain
//
// wgpu hides the swapchain images; configuring the surface is the create /
// recreate step, and the depth target is the rest of the dependent set.

use super::device::block_on_queue;
use super::pipeline::DEPTH_FORMAT;
use crate::backend::lifecycle::{ChainBuilder, ChainInfo};
use crate::context::PresentModePreference;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Prefer a plain 8-bit UNORM format, matching the Vulkan backend
pub fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|f| matches!(f, wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Rgba8Unorm))
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(preference: PresentModePreference, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    let wanted = match preference {
        PresentModePreference::Auto => None,
        PresentModePreference::Immediate => Some(wgpu::PresentMode::Immediate),
        PresentModePreference::Mailbox => Some(wgpu::PresentMode::Mailbox),
        PresentModePreference::Fifo => Some(wgpu::PresentMode::Fifo),
        PresentModePreference::FifoRelaxed => Some(wgpu::PresentMode::FifoRelaxed),
    };
    wanted
        .into_iter()
        .chain([wgpu::PresentMode::Mailbox])
        .find(|mode| available.contains(mode))
        .unwrap_or(wgpu::PresentMode::Fifo)
}

pub fn clamp_extent(requested: (u32, u32), max_dimension: u32) -> (u32, u32) {
    (
        requested.0.clamp(1, max_dimension),
        requested.1.clamp(1, max_dimension),
    )
}

pub struct SurfaceChain {
    pub config: wgpu::SurfaceConfiguration,
    pub depth: wgpu::Texture,
    pub depth_view: wgpu::TextureView,
}

impl ChainInfo for SurfaceChain {
    fn image_count(&self) -> usize {
        // wgpu asks the driver for one image more than the allowed latency
        self.config.desired_maximum_frame_latency as usize + 1
    }

    fn format_name(&self) -> String {
        format!("{:?}", self.config.format)
    }

    fn extent(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }
}

pub struct SurfaceBuilder {
    pub surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    pub format: wgpu::TextureFormat,
    present_mode: wgpu::PresentMode,
    alpha_mode: wgpu::CompositeAlphaMode,
    max_dimension: u32,
    frame_latency: u32,
}

impl SurfaceBuilder {
    pub fn new(
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        device: Arc<wgpu::Device>,
        preference: PresentModePreference,
        frame_latency: u32,
    ) -> Result<Self> {
        let capabilities = surface.get_capabilities(adapter);
        let format = choose_surface_format(&capabilities.formats).context("Surface reports no formats")?;
        let present_mode = choose_present_mode(preference, &capabilities.present_modes);
        let alpha_mode = capabilities
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        log::debug!("Surface format {:?}, present mode {:?}", format, present_mode);

        let max_dimension = device.limits().max_texture_dimension_2d;
        Ok(Self {
            surface,
            device,
            format,
            present_mode,
            alpha_mode,
            max_dimension,
            frame_latency: frame_latency.max(1),
        })
    }

    pub fn surface_extent(&self, requested: (u32, u32)) -> (u32, u32) {
        clamp_extent(requested, self.max_dimension)
    }
}

impl ChainBuilder for SurfaceBuilder {
    type Chain = SurfaceChain;

    fn wait_idle(&mut self) -> Result<()> {
        block_on_queue(&self.device, wgpu::Maintain::Wait, "surface rebuild");
        Ok(())
    }

    fn build(&mut self, extent: (u32, u32)) -> Result<SurfaceChain> {
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: self.format,
            width: extent.0,
            height: extent.1,
            present_mode: self.present_mode,
            desired_maximum_frame_latency: self.frame_latency,
            alpha_mode: self.alpha_mode,
            view_formats: vec![],
        };
        self.surface.configure(&self.device, &config);

        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth"),
            size: wgpu::Extent3d {
                width: extent.0,
                height: extent.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(SurfaceChain {
            config,
            depth,
            depth_view,
        })
    }

    fn teardown(&mut self, chain: SurfaceChain) {
        drop(chain.depth_view);
        chain.depth.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::{PresentMode, TextureFormat};

    #[test]
    fn unorm_format_preferred() {
        let formats = [TextureFormat::Bgra8UnormSrgb, TextureFormat::Bgra8Unorm];
        assert_eq!(choose_surface_format(&formats), Some(TextureFormat::Bgra8Unorm));
        assert_eq!(
            choose_surface_format(&[TextureFormat::Rgba16Float]),
            Some(TextureFormat::Rgba16Float)
        );
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_falls_back_to_mailbox_then_fifo() {
        let all = [PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate];
        assert_eq!(choose_present_mode(PresentModePreference::Immediate, &all), PresentMode::Immediate);
        assert_eq!(choose_present_mode(PresentModePreference::Auto, &all), PresentMode::Mailbox);
        assert_eq!(
            choose_present_mode(PresentModePreference::FifoRelaxed, &[PresentMode::Fifo]),
            PresentMode::Fifo
        );
    }

    #[test]
    fn extent_is_clamped() {
        assert_eq!(clamp_extent((9000, 0), 8192), (8192, 1));
        assert_eq!(clamp_extent((640, 480), 8192), (640, 480));
    }
}
