// ModernExplicit backend - raw Vulkan through ash
//
// Responsibilities:
// - Frame slots (command buffer, fence, semaphores, global uniforms) driven
//   by the shared FrameScheduler
// - Swapchain-dependent set managed by the shared SwapchainLifecycle
// - Staging uploads for meshes, textures and fonts
// - Pipelines per shader, rebuilt when the surface format changes
//
// Objects destroyed while a frame is recording are parked on that slot and
// freed after its fence has been waited on again.

pub mod device;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

use self::device::VulkanDevice;
use self::memory::{GpuBuffer, GpuImage};
use self::pipeline::PipelineLayouts;
use self::swapchain::{create_render_pass, SwapchainBuilder};
use self::sync::VulkanFrameSlot;
use self::transfer::Transfer;
use super::frame::{Acquire, DeferredReleases, FrameDevice, FrameScheduler, Present};
use super::lifecycle::SwapchainLifecycle;
use super::{
    DrawGlyph, DrawModel, FontHandle, ModelHandle, RenderApi, RenderBackend, ShaderDesc,
    ShaderHandle, TextureHandle,
};
use crate::context::RendererContext;
use crate::platform::Platform;
use crate::types::{
    FontData, GlobalUniforms, Mesh, ShaderType, TextureData, TextureFormat, GLYPH_INDICES,
    GLYPH_STRIDE,
};
use anyhow::{Context, Result};
use ash::vk;
use slotmap::SlotMap;
use std::sync::Arc;

struct VkShader {
    pipeline: vk::Pipeline,
    shader_type: ShaderType,
    // Kept to rebuild the pipeline after a format change
    vertex: Vec<u8>,
    fragment: Vec<u8>,
}

struct VkModel {
    vertices: GpuBuffer,
    indices: Option<GpuBuffer>,
    draw_count: u32,
}

struct VkTexture {
    image: GpuImage,
    set: vk::DescriptorSet,
}

struct VkFont {
    vertices: GpuBuffer,
    atlas: VkTexture,
    glyph_count: usize,
}

enum Release {
    Pipeline(vk::Pipeline),
    Model(VkModel),
    Texture(VkTexture),
    Font(VkFont),
}

/// Frame-side state: everything the scheduler drives
pub struct VulkanPresenter {
    device: Arc<VulkanDevice>,
    platform: Arc<dyn Platform>,
    lifecycle: SwapchainLifecycle<SwapchainBuilder>,
    slots: Vec<VulkanFrameSlot>,
    command_pool: vk::CommandPool,
    layouts: PipelineLayouts,
    transfer: Transfer,
    // Pipelines are built against this pass; compatible with the chain's
    // pass as long as the formats match
    pipeline_pass: vk::RenderPass,
    pipeline_format: vk::Format,
    format_changed: bool,
    requested_extent: (u32, u32),
    clear_colour: [f32; 4],
}

impl VulkanPresenter {
    fn new(device: Arc<VulkanDevice>, ctx: &RendererContext, slot_count: usize) -> Result<Self> {
        let layouts = PipelineLayouts::new(&device, slot_count as u32)?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { device.device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                layouts.destroy(&device);
                return Err(e).context("Failed to create command pool");
            }
        };
        let transfer = match Transfer::new(&device) {
            Ok(transfer) => transfer,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                layouts.destroy(&device);
                return Err(e);
            }
        };

        let builder = SwapchainBuilder::new(device.clone(), ctx.settings.present_mode);
        let mut presenter = Self {
            device,
            platform: ctx.platform.clone(),
            lifecycle: SwapchainLifecycle::new(builder),
            slots: Vec::with_capacity(slot_count),
            command_pool,
            layouts,
            transfer,
            pipeline_pass: vk::RenderPass::null(),
            pipeline_format: vk::Format::B8G8R8A8_UNORM,
            format_changed: false,
            requested_extent: (0, 0),
            clear_colour: ctx.settings.clear_colour,
        };

        // From here on Drop cleans up whatever was built
        for index in 0..slot_count {
            let slot = VulkanFrameSlot::new(&presenter.device, command_pool, &presenter.layouts, index)?;
            presenter.slots.push(slot);
        }

        let requested = ctx.surface_size();
        let extent = presenter.lifecycle.builder().surface_extent(requested)?;
        presenter.lifecycle.create(extent)?;
        presenter.requested_extent = requested;
        if let Some(chain) = presenter.lifecycle.chain() {
            presenter.pipeline_format = chain.format;
        }
        presenter.pipeline_pass = create_render_pass(&presenter.device, presenter.pipeline_format)?;

        Ok(presenter)
    }

    fn surface_changed(&self) -> bool {
        self.platform.surface_size() != self.requested_extent
    }

    fn take_format_change(&mut self) -> bool {
        std::mem::take(&mut self.format_changed)
    }

    fn release(&self, release: Release) {
        let device = &self.device;
        match release {
            Release::Pipeline(pipeline) => unsafe {
                device.device.destroy_pipeline(pipeline, None);
            },
            Release::Model(model) => {
                model.vertices.destroy(device);
                if let Some(indices) = model.indices {
                    indices.destroy(device);
                }
            }
            Release::Texture(texture) => self.release_texture(texture),
            Release::Font(font) => {
                font.vertices.destroy(device);
                self.release_texture(font.atlas);
            }
        }
    }

    fn release_texture(&self, texture: VkTexture) {
        self.layouts.free_set(&self.device, texture.set);
        texture.image.destroy(&self.device);
    }

    fn upload_texture(&self, texture: &TextureData, name: &str) -> Result<VkTexture> {
        let image = self.transfer.upload_image(&self.device, texture, name)?;
        match self.layouts.texture_set(&self.device, image.view) {
            Ok(set) => Ok(VkTexture { image, set }),
            Err(e) => {
                image.destroy(&self.device);
                Err(e)
            }
        }
    }
}

impl FrameDevice for VulkanPresenter {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slots[slot].in_flight;
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("Failed to wait for frame fence")
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
        let Some(chain) = self.lifecycle.chain() else {
            return Ok(Acquire::OutOfDate);
        };
        self.lifecycle
            .builder()
            .acquire(chain, self.slots[slot].image_available)
    }

    fn recreate_swapchain(&mut self, slot: usize, acquire_signaled: bool) -> Result<bool> {
        if acquire_signaled {
            // Consume the signal so the semaphore can be reused for the next acquire
            let wait = [self.slots[slot].image_available];
            let stages = [vk::PipelineStageFlags::BOTTOM_OF_PIPE];
            let submit = vk::SubmitInfo::builder()
                .wait_semaphores(&wait)
                .wait_dst_stage_mask(&stages)
                .build();
            unsafe {
                self.device
                    .device
                    .queue_submit(self.device.queue, &[submit], vk::Fence::null())
            }
            .context("Failed to release acquire semaphore")?;
        }

        let requested = self.platform.surface_size();
        if requested.0 == 0 || requested.1 == 0 {
            return Ok(false);
        }
        let extent = self.lifecycle.builder().surface_extent(requested)?;
        if !self.lifecycle.recreate(extent)? {
            return Ok(false);
        }
        self.requested_extent = requested;

        if let Some(chain) = self.lifecycle.chain() {
            if chain.format != self.pipeline_format {
                log::debug!("Surface format changed {:?} -> {:?}", self.pipeline_format, chain.format);
                let pass = create_render_pass(&self.device, chain.format)?;
                unsafe { self.device.device.destroy_render_pass(self.pipeline_pass, None) };
                self.pipeline_pass = pass;
                self.pipeline_format = chain.format;
                self.format_changed = true;
            }
        }
        Ok(true)
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let slot = &self.slots[slot];
        unsafe {
            self.device
                .device
                .reset_fences(&[slot.in_flight])
                .context("Failed to reset frame fence")?;
            self.device
                .device
                .reset_command_buffer(slot.command_buffer, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
        }
        Ok(())
    }

    fn begin_recording(&mut self, slot: usize, image: u32) -> Result<()> {
        let chain = self.lifecycle.chain().context("No swapchain to record into")?;
        let slot = &self.slots[slot];
        let cmd = slot.command_buffer;
        let d = &self.device.device;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { d.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin command buffer")?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_colour,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: chain.extent,
        };
        let pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(chain.render_pass)
            .framebuffer(chain.framebuffers[image as usize])
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: chain.extent.width as f32,
            height: chain.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            d.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[render_area]);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layouts.layout,
                0,
                &[slot.globals_set],
                &[],
            );
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize, _image: u32) -> Result<()> {
        let slot = &self.slots[slot];
        let d = &self.device.device;
        unsafe {
            d.cmd_end_render_pass(slot.command_buffer);
            d.end_command_buffer(slot.command_buffer)
                .context("Failed to end command buffer")?;
        }

        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer];
        let signal_semaphores = [slot.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe { d.queue_submit(self.device.queue, &[submit_info], slot.in_flight) }
            .context("Failed to submit frame")
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
        let Some(chain) = self.lifecycle.chain() else {
            return Ok(Present::OutOfDate);
        };
        self.lifecycle
            .builder()
            .present(chain, image, self.slots[slot].render_finished)
    }
}

impl Drop for VulkanPresenter {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        if let Err(e) = self.lifecycle.destroy() {
            log::warn!("Failed to destroy swapchain: {:#}", e);
        }
        for slot in self.slots.drain(..) {
            slot.destroy(&self.device);
        }
        unsafe {
            if self.pipeline_pass != vk::RenderPass::null() {
                self.device.device.destroy_render_pass(self.pipeline_pass, None);
            }
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
        self.transfer.destroy(&self.device);
        self.layouts.destroy(&self.device);
    }
}

pub struct VulkanBackend {
    scheduler: FrameScheduler,
    frames: VulkanPresenter,
    deferred: DeferredReleases<Release>,
    shaders: SlotMap<ShaderHandle, VkShader>,
    models: SlotMap<ModelHandle, VkModel>,
    textures: SlotMap<TextureHandle, VkTexture>,
    fonts: SlotMap<FontHandle, VkFont>,
    glyph_indices: Option<GpuBuffer>,
    default_texture: Option<VkTexture>,
    device_name: String,
}

impl VulkanBackend {
    pub fn new(ctx: &mut RendererContext) -> Result<Self> {
        let window = ctx
            .platform
            .window_handles()
            .context("Vulkan needs a window surface to present to")?;
        let slot_count = ctx.settings.frames_in_flight.max(1);

        let device = VulkanDevice::new(&ctx.settings.app_name, ctx.settings.validation, Some(window))?;
        let device_name = device.device_name();
        let frames = VulkanPresenter::new(device, ctx, slot_count)?;

        let glyph_indices = frames.transfer.upload_buffer(
            &frames.device,
            bytemuck::cast_slice(&GLYPH_INDICES),
            vk::BufferUsageFlags::INDEX_BUFFER,
            "glyph indices",
        )?;
        let white = TextureData::new(TextureFormat::Rgba8, 1, 1, vec![255; 4]);
        let default_texture = match frames.upload_texture(&white, "default texture") {
            Ok(texture) => texture,
            Err(e) => {
                glyph_indices.destroy(&frames.device);
                return Err(e);
            }
        };

        log::info!("Vulkan backend ready on {} with {} frame slots", device_name, slot_count);

        Ok(Self {
            scheduler: FrameScheduler::new(slot_count),
            frames,
            deferred: DeferredReleases::new(slot_count),
            shaders: SlotMap::with_key(),
            models: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            fonts: SlotMap::with_key(),
            glyph_indices: Some(glyph_indices),
            default_texture: Some(default_texture),
            device_name,
        })
    }

    /// Free now, or park on the recording slot until its fence comes around
    fn retire(&mut self, release: Release) -> Result<()> {
        match self.scheduler.current() {
            Some(token) => self.deferred.defer(token.slot, release),
            None => {
                self.frames.device.wait_idle()?;
                self.frames.release(release);
            }
        }
        Ok(())
    }

    fn recording(&self) -> Option<vk::CommandBuffer> {
        self.scheduler
            .current()
            .map(|token| self.frames.slots[token.slot].command_buffer)
    }

    fn rebuild_pipelines(&mut self) {
        let frames = &self.frames;
        for (_, shader) in self.shaders.iter_mut() {
            if shader.pipeline != vk::Pipeline::null() {
                unsafe { frames.device.device.destroy_pipeline(shader.pipeline, None) };
            }
            shader.pipeline = match pipeline::create_graphics_pipeline(
                &frames.device,
                &frames.layouts,
                frames.pipeline_pass,
                shader.shader_type,
                &shader.vertex,
                &shader.fragment,
            ) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    log::error!("Failed to rebuild pipeline: {:#}", e);
                    vk::Pipeline::null()
                }
            };
        }
    }

    fn release_all(&mut self) {
        if let Err(e) = self.frames.device.wait_idle() {
            log::warn!("Releasing resources without an idle device: {:#}", e);
        }
        let mut releases: Vec<Release> = self.deferred.drain_all();
        releases.extend(self.shaders.drain().map(|(_, s)| Release::Pipeline(s.pipeline)));
        releases.extend(self.models.drain().map(|(_, m)| Release::Model(m)));
        releases.extend(self.textures.drain().map(|(_, t)| Release::Texture(t)));
        releases.extend(self.fonts.drain().map(|(_, f)| Release::Font(f)));
        releases.extend(self.default_texture.take().map(Release::Texture));

        for release in releases {
            self.frames.release(release);
        }
        if let Some(indices) = self.glyph_indices.take() {
            indices.destroy(&self.frames.device);
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl RenderBackend for VulkanBackend {
    fn api(&self) -> RenderApi {
        RenderApi::ModernExplicit
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn frame_index(&self) -> usize {
        self.scheduler.index()
    }

    fn begin_frame(&mut self, _ctx: &mut RendererContext, globals: &GlobalUniforms) -> Result<bool> {
        let resized = self.frames.surface_changed();
        let token = self.scheduler.begin_frame(&mut self.frames, resized)?;
        if self.frames.take_format_change() {
            self.rebuild_pipelines();
        }
        let Some(token) = token else {
            return Ok(false);
        };

        for release in self.deferred.collect(token.slot) {
            self.frames.release(release);
        }
        self.frames.slots[token.slot]
            .globals
            .write(0, bytemuck::bytes_of(globals))?;
        Ok(true)
    }

    fn end_frame(&mut self, _ctx: &mut RendererContext) -> Result<()> {
        self.scheduler.end_frame(&mut self.frames)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.frames.device.wait_idle()
    }

    fn shutdown(&mut self, _ctx: &mut RendererContext) -> Result<()> {
        log::info!("Shutting down Vulkan backend");
        self.release_all();
        self.frames.lifecycle.destroy()
    }

    fn create_shader(&mut self, _ctx: &mut RendererContext, desc: &ShaderDesc<'_>) -> Result<Option<ShaderHandle>> {
        let frames = &self.frames;
        let pipeline = match pipeline::create_graphics_pipeline(
            &frames.device,
            &frames.layouts,
            frames.pipeline_pass,
            desc.shader_type,
            desc.vertex,
            desc.fragment,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::error!("Vulkan rejected shader {}: {:#}", desc.name, e);
                return Ok(None);
            }
        };

        Ok(Some(self.shaders.insert(VkShader {
            pipeline,
            shader_type: desc.shader_type,
            vertex: desc.vertex.to_vec(),
            fragment: desc.fragment.to_vec(),
        })))
    }

    fn destroy_shader(&mut self, ctx: &mut RendererContext, shader: ShaderHandle) -> Result<()> {
        if let Some(shader_data) = self.shaders.remove(shader) {
            ctx.bind_cache.forget_shader(shader);
            if shader_data.pipeline != vk::Pipeline::null() {
                self.retire(Release::Pipeline(shader_data.pipeline))?;
            }
        }
        Ok(())
    }

    fn use_mesh(&mut self, _ctx: &mut RendererContext, mesh: &Mesh) -> Result<ModelHandle> {
        let frames = &self.frames;
        let vertices = frames.transfer.upload_buffer(
            &frames.device,
            mesh.vertex_bytes(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "vertices",
        )?;

        let indices = if mesh.is_indexed() {
            match frames.transfer.upload_buffer(
                &frames.device,
                mesh.index_bytes(),
                vk::BufferUsageFlags::INDEX_BUFFER,
                "indices",
            ) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    vertices.destroy(&frames.device);
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(self.models.insert(VkModel {
            vertices,
            indices,
            draw_count: mesh.draw_count(),
        }))
    }

    fn destroy_model(&mut self, ctx: &mut RendererContext, model: ModelHandle) -> Result<()> {
        if let Some(data) = self.models.remove(model) {
            ctx.bind_cache.forget_model(model);
            self.retire(Release::Model(data))?;
        }
        Ok(())
    }

    fn use_texture(&mut self, _ctx: &mut RendererContext, texture: &TextureData) -> Result<TextureHandle> {
        let uploaded = self.frames.upload_texture(texture, "texture")?;
        Ok(self.textures.insert(uploaded))
    }

    fn destroy_texture(&mut self, ctx: &mut RendererContext, texture: TextureHandle) -> Result<()> {
        if let Some(data) = self.textures.remove(texture) {
            ctx.bind_cache.forget_texture(texture);
            self.retire(Release::Texture(data))?;
        }
        Ok(())
    }

    fn use_font(&mut self, _ctx: &mut RendererContext, font: &FontData) -> Result<FontHandle> {
        let frames = &self.frames;
        let atlas = frames.upload_texture(&font.atlas, "font atlas")?;
        let vertices = match frames.transfer.upload_buffer(
            &frames.device,
            bytemuck::cast_slice(&font.vertex_data()),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "glyph vertices",
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                frames.release_texture(atlas);
                return Err(e);
            }
        };

        Ok(self.fonts.insert(VkFont {
            vertices,
            atlas,
            glyph_count: font.glyphs.len(),
        }))
    }

    fn destroy_font(&mut self, _ctx: &mut RendererContext, font: FontHandle) -> Result<()> {
        if let Some(data) = self.fonts.remove(font) {
            self.retire(Release::Font(data))?;
        }
        Ok(())
    }

    fn draw_model(&mut self, ctx: &mut RendererContext, draw: &DrawModel) -> Result<()> {
        let Some(cmd) = self.recording() else {
            return Ok(());
        };
        let (Some(model), Some(shader)) = (self.models.get(draw.model), self.shaders.get(draw.shader)) else {
            log::trace!("Skipping draw of a model or shader that no longer exists");
            return Ok(());
        };
        if shader.pipeline == vk::Pipeline::null() || shader.shader_type.uses_glyph_vertices() {
            return Ok(());
        }

        let d = &self.frames.device.device;
        let layout = self.frames.layouts.layout;
        unsafe {
            if ctx.bind_cache.bind_shader(draw.shader) {
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, shader.pipeline);
            }
            if ctx.bind_cache.bind_model(draw.model) {
                d.cmd_bind_vertex_buffers(cmd, 0, &[model.vertices.buffer], &[0]);
                if let Some(indices) = &model.indices {
                    d.cmd_bind_index_buffer(cmd, indices.buffer, 0, vk::IndexType::UINT32);
                }
            }

            let texture_set = match draw.texture.and_then(|t| self.textures.get(t).map(|data| (t, data.set))) {
                Some((handle, set)) => ctx.bind_cache.bind_texture(handle).then_some(set),
                None => {
                    ctx.bind_cache.texture = None;
                    self.default_texture.as_ref().map(|t| t.set)
                }
            };
            if let Some(set) = texture_set {
                d.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, layout, 1, &[set], &[]);
            }

            d.cmd_push_constants(
                cmd,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&draw.uniforms),
            );

            if model.indices.is_some() {
                d.cmd_draw_indexed(cmd, model.draw_count, 1, 0, 0, 0);
            } else {
                d.cmd_draw(cmd, model.draw_count, 1, 0, 0);
            }
        }
        Ok(())
    }

    fn draw_glyph(&mut self, ctx: &mut RendererContext, draw: &DrawGlyph) -> Result<()> {
        let Some(cmd) = self.recording() else {
            return Ok(());
        };
        let (Some(font), Some(shader), Some(indices)) = (
            self.fonts.get(draw.font),
            self.shaders.get(draw.shader),
            self.glyph_indices.as_ref(),
        ) else {
            return Ok(());
        };
        if draw.glyph >= font.glyph_count {
            log::warn!("Glyph {} out of range for font with {} glyphs", draw.glyph, font.glyph_count);
            return Ok(());
        }
        if shader.pipeline == vk::Pipeline::null() {
            return Ok(());
        }

        let d = &self.frames.device.device;
        let layout = self.frames.layouts.layout;
        let offset = (draw.glyph * GLYPH_STRIDE) as vk::DeviceSize;
        unsafe {
            if ctx.bind_cache.bind_shader(draw.shader) {
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, shader.pipeline);
            }
            d.cmd_bind_vertex_buffers(cmd, 0, &[font.vertices.buffer], &[offset]);
            d.cmd_bind_index_buffer(cmd, indices.buffer, 0, vk::IndexType::UINT32);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                1,
                &[font.atlas.set],
                &[],
            );
            d.cmd_push_constants(
                cmd,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&draw.uniforms),
            );
            d.cmd_draw_indexed(cmd, GLYPH_INDICES.len() as u32, 1, 0, 0, 0);
        }

        // Glyphs rebind vertex, index and texture state
        ctx.bind_cache.model = None;
        ctx.bind_cache.texture = None;
        Ok(())
    }
}
