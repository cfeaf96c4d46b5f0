// Swapchain - Window presentation
//
// Everything that depends on the surface extent or format lives in one
// SwapchainSet (swapchain, views, depth target, render pass, framebuffers)
// so recreation is a single teardown + build.

use super::device::VulkanDevice;
use super::memory::{create_depth_buffer, subresource_range, GpuImage, DEPTH_FORMAT};
use super::surface::SurfaceSupport;
use crate::backend::frame::{Acquire, Present};
use crate::backend::lifecycle::{ChainBuilder, ChainInfo};
use crate::context::PresentModePreference;
use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

/// Prefer B8G8R8A8_UNORM + SRGB_NONLINEAR; a lone UNDEFINED entry means any format is fine
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return Some(preferred);
    }

    formats
        .iter()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first())
        .copied()
}

/// Configured mode if the surface offers it, else MAILBOX, else FIFO
pub fn choose_present_mode(
    preference: PresentModePreference,
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    let wanted = match preference {
        PresentModePreference::Auto => None,
        PresentModePreference::Immediate => Some(vk::PresentModeKHR::IMMEDIATE),
        PresentModePreference::Mailbox => Some(vk::PresentModeKHR::MAILBOX),
        PresentModePreference::Fifo => Some(vk::PresentModeKHR::FIFO),
        PresentModePreference::FifoRelaxed => Some(vk::PresentModeKHR::FIFO_RELAXED),
    };

    wanted
        .filter(|mode| available.contains(mode))
        .or_else(|| available.iter().copied().find(|&m| m == vk::PresentModeKHR::MAILBOX))
        .unwrap_or(vk::PresentModeKHR::FIFO) // FIFO is always supported
}

/// The surface's current extent, or the requested size clamped to its limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: requested
            .0
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .1
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, limited by the maximum (0 = unlimited)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub struct SwapchainSet {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub depth: GpuImage,
    pub render_pass: vk::RenderPass,
    /// Indexed by acquired image index
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl ChainInfo for SwapchainSet {
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn format_name(&self) -> String {
        format!("{:?}", self.format)
    }

    fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }
}

pub struct SwapchainBuilder {
    device: Arc<VulkanDevice>,
    pub loader: khr::Swapchain,
    present_mode: PresentModePreference,
}

impl SwapchainBuilder {
    pub fn new(device: Arc<VulkanDevice>, present_mode: PresentModePreference) -> Self {
        let loader = khr::Swapchain::new(&device.instance, &device.device);
        Self {
            device,
            loader,
            present_mode,
        }
    }

    fn support(&self) -> Result<(SurfaceSupport, vk::SurfaceKHR)> {
        let presentation = self
            .device
            .presentation
            .as_ref()
            .context("Device was created without a surface")?;
        let support = SurfaceSupport::query(
            &presentation.loader,
            self.device.physical_device,
            presentation.surface,
        )?;
        Ok((support, presentation.surface))
    }

    /// Extent a chain built now would get; zero while minimized
    pub fn surface_extent(&self, requested: (u32, u32)) -> Result<(u32, u32)> {
        let (support, _) = self.support()?;
        let extent = choose_extent(&support.capabilities, requested);
        Ok((extent.width, extent.height))
    }

    pub fn acquire(&self, chain: &SwapchainSet, semaphore: vk::Semaphore) -> Result<Acquire> {
        let result = unsafe {
            self.loader
                .acquire_next_image(chain.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, false)) => Ok(Acquire::Image(index)),
            Ok((index, true)) => Ok(Acquire::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    pub fn present(
        &self,
        chain: &SwapchainSet,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<Present> {
        let swapchains = [chain.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(self.device.queue, &present_info) };

        match result {
            Ok(false) => Ok(Present::Done),
            Ok(true) => Ok(Present::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

impl ChainBuilder for SwapchainBuilder {
    type Chain = SwapchainSet;

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn build(&mut self, requested: (u32, u32)) -> Result<SwapchainSet> {
        let device = &self.device;
        let (support, surface) = self.support()?;
        let caps = &support.capabilities;

        let surface_format =
            choose_surface_format(&support.formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(self.present_mode, &support.present_modes);
        let extent = choose_extent(caps, requested);
        let image_count = choose_image_count(caps);

        log::debug!(
            "Swapchain choice: {:?} / {:?}, {:?}, {}x{}, {} images",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // Everything built so far is collected in a partial set so a failure
        // part way through can still be torn down
        let mut set = PartialSet {
            swapchain,
            ..Default::default()
        };
        let result = (|| -> Result<SwapchainSet> {
            set.images = unsafe { self.loader.get_swapchain_images(swapchain) }
                .context("Failed to get swapchain images")?;

            for &image in &set.images {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR));
                let view = unsafe { device.device.create_image_view(&view_info, None) }
                    .context("Failed to create image view")?;
                set.views.push(view);
            }

            set.depth = Some(create_depth_buffer(device, extent)?);
            set.render_pass = create_render_pass(device, surface_format.format)?;

            let depth_view = set.depth.as_ref().map(|d| d.view).unwrap_or_default();
            for &view in &set.views {
                let attachments = [view, depth_view];
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(set.render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                    .context("Failed to create framebuffer")?;
                set.framebuffers.push(framebuffer);
            }

            let depth = set.depth.take().context("Depth buffer missing")?;
            Ok(SwapchainSet {
                swapchain,
                images: std::mem::take(&mut set.images),
                views: std::mem::take(&mut set.views),
                format: surface_format.format,
                extent,
                depth,
                render_pass: set.render_pass,
                framebuffers: std::mem::take(&mut set.framebuffers),
            })
        })();

        match result {
            Ok(chain) => {
                log::info!(
                    "Created swapchain with {} images ({}x{})",
                    chain.images.len(),
                    extent.width,
                    extent.height
                );
                Ok(chain)
            }
            Err(e) => {
                set.destroy(device, &self.loader);
                Err(e)
            }
        }
    }

    fn teardown(&mut self, chain: SwapchainSet) {
        let device = &self.device;
        unsafe {
            for &framebuffer in &chain.framebuffers {
                device.device.destroy_framebuffer(framebuffer, None);
            }
            device.device.destroy_render_pass(chain.render_pass, None);
        }
        chain.depth.destroy(device);
        unsafe {
            for &view in &chain.views {
                device.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(chain.swapchain, None);
        }
    }
}

#[derive(Default)]
struct PartialSet {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<GpuImage>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl PartialSet {
    fn destroy(self, device: &VulkanDevice, loader: &khr::Swapchain) {
        unsafe {
            for framebuffer in self.framebuffers {
                device.device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.device.destroy_render_pass(self.render_pass, None);
            }
        }
        if let Some(depth) = self.depth {
            depth.destroy(device);
        }
        unsafe {
            for view in self.views {
                device.device.destroy_image_view(view, None);
            }
            loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Render pass for colour + depth, cleared on load, colour presented at the end
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let depth_attachment = vk::AttachmentDescription::builder()
        .format(DEPTH_FORMAT)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)
        .build();

    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = [color_attachment, depth_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];
    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create render pass")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min_images: u32, max_images: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: min_images,
            max_image_count: max_images,
            ..Default::default()
        }
    }

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn lone_undefined_format_is_forced_to_bgra() {
        let chosen = choose_surface_format(&[format(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn preferred_format_beats_first_entry() {
        let formats = [format(vk::Format::R8G8B8A8_SRGB), format(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(
            choose_surface_format(&formats[..1]).unwrap().format,
            vk::Format::R8G8B8A8_SRGB
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_mailbox_then_fifo() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(PresentModePreference::Immediate, &all),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(PresentModePreference::Auto, &all),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(PresentModePreference::Immediate, &[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_or_clamps_request() {
        assert_eq!(
            choose_extent(&caps((800, 600), 2, 3), (1, 1)),
            vk::Extent2D { width: 800, height: 600 }
        );
        assert_eq!(
            choose_extent(&caps((u32::MAX, u32::MAX), 2, 3), (9000, 0)),
            vk::Extent2D { width: 4096, height: 1 }
        );
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        assert_eq!(choose_image_count(&caps((1, 1), 2, 0)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 2, 3)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 3, 3)), 3);
    }
}
