// LegacyExplicit and FixedFunction backends on wgpu
//
// One implementation, two flavors: Explicit runs on Vulkan / DX12 / Metal and
// consumes SPIR-V, Gl runs on the OpenGL backend and consumes GLSL. Both are
// driven by the shared FrameScheduler and SwapchainLifecycle.
//
// Frame flow differs from raw Vulkan in two places:
// - wgpu has no explicit fences, so a slot waits on its last SubmissionIndex
// - draws are buffered during the frame and replayed into one render pass at
//   submit, with per-object uniforms in a dynamic-offset buffer

pub mod device;
pub mod pipeline;
pub mod surface;
pub mod sync;
pub mod transfer;

use self::device::WgpuDevice;
use self::pipeline::BindLayouts;
use self::surface::SurfaceBuilder;
use self::sync::{Command, WgpuFrameSlot};
use self::transfer::{Transfer, UploadedTexture};
use super::frame::{Acquire, DeferredReleases, FrameDevice, FrameScheduler, Present};
use super::lifecycle::SwapchainLifecycle;
use super::{
    DrawGlyph, DrawModel, FontHandle, ModelHandle, RenderApi, RenderBackend, ShaderDesc,
    ShaderHandle, TextureHandle,
};
use crate::context::RendererContext;
use crate::platform::Platform;
use crate::types::{FontData, GlobalUniforms, Mesh, TextureData, TextureFormat, GLYPH_INDICES};
use anyhow::{Context, Result};
use slotmap::SlotMap;
use std::sync::Arc;
use wgpu::naga::ShaderStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WgpuFlavor {
    /// Vulkan, DX12 or Metal with SPIR-V shaders
    Explicit,
    /// OpenGL with GLSL shaders
    Gl,
}

impl WgpuFlavor {
    pub fn backends(self) -> wgpu::Backends {
        match self {
            WgpuFlavor::Explicit => wgpu::Backends::VULKAN | wgpu::Backends::DX12 | wgpu::Backends::METAL,
            WgpuFlavor::Gl => wgpu::Backends::GL,
        }
    }

    pub fn api(self) -> RenderApi {
        match self {
            WgpuFlavor::Explicit => RenderApi::LegacyExplicit,
            WgpuFlavor::Gl => RenderApi::FixedFunction,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WgpuFlavor::Explicit => "wgpu (Vulkan/DX12/Metal)",
            WgpuFlavor::Gl => "wgpu (OpenGL)",
        }
    }
}

struct WgpuShader {
    pipeline: Arc<wgpu::RenderPipeline>,
    shader_type: crate::types::ShaderType,
}

struct WgpuModel {
    vertices: Arc<wgpu::Buffer>,
    indices: Option<Arc<wgpu::Buffer>>,
    draw_count: u32,
}

struct WgpuTexture {
    texture: wgpu::Texture,
    group: Arc<wgpu::BindGroup>,
}

struct WgpuFont {
    vertices: Arc<wgpu::Buffer>,
    atlas: WgpuTexture,
    glyph_count: usize,
}

enum Release {
    Model(WgpuModel),
    Texture(WgpuTexture),
    Font(WgpuFont),
}

impl Release {
    fn free(self) {
        match self {
            Release::Model(model) => {
                model.vertices.destroy();
                if let Some(indices) = model.indices {
                    indices.destroy();
                }
            }
            Release::Texture(texture) => texture.texture.destroy(),
            Release::Font(font) => {
                font.vertices.destroy();
                font.atlas.texture.destroy();
            }
        }
    }
}

/// Frame-side state driven by the scheduler
pub struct WgpuPresenter {
    gpu: WgpuDevice,
    platform: Arc<dyn Platform>,
    lifecycle: SwapchainLifecycle<SurfaceBuilder>,
    slots: Vec<WgpuFrameSlot>,
    layouts: BindLayouts,
    transfer: Transfer,
    // Acquired but not yet presented
    frame: Option<wgpu::SurfaceTexture>,
    requested_extent: (u32, u32),
    clear_colour: wgpu::Color,
}

impl WgpuPresenter {
    fn new(gpu: WgpuDevice, surface: wgpu::Surface<'static>, ctx: &RendererContext, slot_count: usize) -> Result<Self> {
        let layouts = BindLayouts::new(&gpu.device);
        let slots = (0..slot_count)
            .map(|index| WgpuFrameSlot::new(&gpu.device, &layouts, index, ctx.settings.max_draws_per_frame))
            .collect();
        let builder = SurfaceBuilder::new(
            surface,
            &gpu.adapter,
            gpu.device.clone(),
            ctx.settings.present_mode,
            (slot_count as u32).saturating_sub(1),
        )?;
        let transfer = Transfer::new(gpu.device.clone(), gpu.queue.clone());
        let [r, g, b, a] = ctx.settings.clear_colour;

        let mut presenter = Self {
            gpu,
            platform: ctx.platform.clone(),
            lifecycle: SwapchainLifecycle::new(builder),
            slots,
            layouts,
            transfer,
            frame: None,
            requested_extent: (0, 0),
            clear_colour: wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            },
        };

        let requested = ctx.surface_size();
        if requested.0 > 0 && requested.1 > 0 {
            let extent = presenter.lifecycle.builder().surface_extent(requested);
            presenter.lifecycle.create(extent)?;
        }
        presenter.requested_extent = requested;
        Ok(presenter)
    }

    fn surface_changed(&self) -> bool {
        self.platform.surface_size() != self.requested_extent
    }

    fn upload_texture(&self, texture: &TextureData, label: &str) -> Result<WgpuTexture> {
        let UploadedTexture { texture, view } = self.transfer.upload_texture(texture, label)?;
        let group = self.layouts.texture_group(&self.gpu.device, &view);
        Ok(WgpuTexture {
            texture,
            group: Arc::new(group),
        })
    }

    fn upload_buffer(&self, data: &[u8], usage: wgpu::BufferUsages, label: &str) -> Result<Arc<wgpu::Buffer>> {
        Ok(Arc::new(self.transfer.upload_buffer(data, usage, label)?.buffer))
    }
}

impl FrameDevice for WgpuPresenter {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        if let Some(index) = self.slots[slot].submission.take() {
            device::block_on_queue(&self.gpu.device, wgpu::Maintain::WaitForSubmissionIndex(index), "frame slot");
        }
        Ok(())
    }

    fn acquire_image(&mut self, _slot: usize) -> Result<Acquire> {
        if self.lifecycle.chain().is_none() {
            return Ok(Acquire::OutOfDate);
        }
        match self.lifecycle.builder().surface.get_current_texture() {
            Ok(frame) => {
                let suboptimal = frame.suboptimal;
                self.frame = Some(frame);
                // wgpu never exposes the image index
                Ok(if suboptimal { Acquire::Suboptimal(0) } else { Acquire::Image(0) })
            }
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => Ok(Acquire::OutOfDate),
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Timed out acquiring a surface texture");
                Ok(Acquire::OutOfDate)
            }
            Err(e) => Err(e).context("Failed to acquire surface texture"),
        }
    }

    fn recreate_swapchain(&mut self, _slot: usize, acquire_signaled: bool) -> Result<bool> {
        if acquire_signaled {
            // Must be released before the surface is configured again
            self.frame = None;
        }

        let requested = self.platform.surface_size();
        if requested.0 == 0 || requested.1 == 0 {
            return Ok(false);
        }
        let extent = self.lifecycle.builder().surface_extent(requested);
        if !self.lifecycle.recreate(extent)? {
            return Ok(false);
        }
        self.requested_extent = requested;
        Ok(true)
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.slots[slot].reset();
        Ok(())
    }

    fn begin_recording(&mut self, _slot: usize, _image: u32) -> Result<()> {
        // Commands are buffered; the pass opens at submit
        Ok(())
    }

    fn submit(&mut self, slot: usize, _image: u32) -> Result<()> {
        let frame = self.frame.as_ref().context("No surface texture acquired")?;
        let chain = self.lifecycle.chain().context("No surface configured")?;
        let gpu = &self.gpu;
        let slot = &mut self.slots[slot];

        if !slot.object_data().is_empty() {
            gpu.queue.write_buffer(&slot.objects, 0, slot.object_data());
        }

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("main pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &chain.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            sync::replay(&mut pass, slot);
        }

        slot.submission = Some(gpu.queue.submit(Some(encoder.finish())));
        slot.commands.clear();
        Ok(())
    }

    fn present(&mut self, _slot: usize, _image: u32) -> Result<Present> {
        match self.frame.take() {
            Some(frame) => {
                frame.present();
                Ok(Present::Done)
            }
            None => Ok(Present::OutOfDate),
        }
    }
}

pub struct WgpuBackend {
    flavor: WgpuFlavor,
    scheduler: FrameScheduler,
    frames: WgpuPresenter,
    deferred: DeferredReleases<Release>,
    shaders: SlotMap<ShaderHandle, WgpuShader>,
    models: SlotMap<ModelHandle, WgpuModel>,
    textures: SlotMap<TextureHandle, WgpuTexture>,
    fonts: SlotMap<FontHandle, WgpuFont>,
    glyph_indices: Arc<wgpu::Buffer>,
    default_texture: Option<WgpuTexture>,
    device_name: String,
}

impl WgpuBackend {
    pub fn new(ctx: &mut RendererContext, flavor: WgpuFlavor) -> Result<Self> {
        let window = ctx
            .platform
            .window_handles()
            .with_context(|| format!("{} needs a window surface to present to", flavor.label()))?;
        let slot_count = ctx.settings.frames_in_flight.max(1);

        let (gpu, surface) = WgpuDevice::with_surface(flavor, ctx.settings.validation, window)?;
        let device_name = gpu.name();
        let frames = WgpuPresenter::new(gpu, surface, ctx, slot_count)?;

        let glyph_indices = frames.upload_buffer(
            bytemuck::cast_slice(&GLYPH_INDICES),
            wgpu::BufferUsages::INDEX,
            "glyph indices",
        )?;
        let white = TextureData::new(TextureFormat::Rgba8, 1, 1, vec![255; 4]);
        let default_texture = frames.upload_texture(&white, "default texture")?;

        log::info!(
            "{} backend ready on {} with {} frame slots",
            flavor.label(),
            device_name,
            slot_count
        );

        Ok(Self {
            flavor,
            scheduler: FrameScheduler::new(slot_count),
            frames,
            deferred: DeferredReleases::new(slot_count),
            shaders: SlotMap::with_key(),
            models: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            fonts: SlotMap::with_key(),
            glyph_indices,
            default_texture: Some(default_texture),
            device_name,
        })
    }

    fn retire(&mut self, release: Release) {
        match self.scheduler.current() {
            Some(token) => self.deferred.defer(token.slot, release),
            None => {
                self.frames.gpu.wait_idle();
                release.free();
            }
        }
    }

    /// Compile both stages and build the pipeline inside a validation scope.
    /// None when wgpu rejected either.
    fn build_pipeline(&self, desc: &ShaderDesc<'_>) -> Option<wgpu::RenderPipeline> {
        let sources = pipeline::shader_source(self.flavor, ShaderStage::Vertex, desc.vertex).and_then(|vertex| {
            pipeline::shader_source(self.flavor, ShaderStage::Fragment, desc.fragment).map(|fragment| (vertex, fragment))
        });
        let (vertex, fragment) = match sources {
            Ok(sources) => sources,
            Err(e) => {
                log::error!("{} rejected shader {}: {:#}", self.flavor.label(), desc.name, e);
                return None;
            }
        };

        let device = &self.frames.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.name),
            source: vertex,
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.name),
            source: fragment,
        });
        let pipeline = pipeline::create_pipeline(
            device,
            &self.frames.layouts,
            self.frames.lifecycle.builder().format,
            desc.shader_type,
            (&vertex, &fragment),
            desc.name,
        );

        match pollster::block_on(device.pop_error_scope()) {
            Some(error) => {
                log::error!("{} rejected shader {}: {}", self.flavor.label(), desc.name, error);
                None
            }
            None => Some(pipeline),
        }
    }

    fn release_all(&mut self) {
        self.frames.gpu.wait_idle();
        let mut releases: Vec<Release> = self.deferred.drain_all();
        self.shaders.clear();
        releases.extend(self.models.drain().map(|(_, m)| Release::Model(m)));
        releases.extend(self.textures.drain().map(|(_, t)| Release::Texture(t)));
        releases.extend(self.fonts.drain().map(|(_, f)| Release::Font(f)));
        releases.extend(self.default_texture.take().map(Release::Texture));
        for release in releases {
            release.free();
        }
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl RenderBackend for WgpuBackend {
    fn api(&self) -> RenderApi {
        self.flavor.api()
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn frame_index(&self) -> usize {
        self.scheduler.index()
    }

    fn begin_frame(&mut self, _ctx: &mut RendererContext, globals: &GlobalUniforms) -> Result<bool> {
        let resized = self.frames.surface_changed();
        let Some(token) = self.scheduler.begin_frame(&mut self.frames, resized)? else {
            return Ok(false);
        };

        for release in self.deferred.collect(token.slot) {
            release.free();
        }
        let slot = &self.frames.slots[token.slot];
        self.frames
            .gpu
            .queue
            .write_buffer(&slot.globals, 0, bytemuck::bytes_of(globals));
        Ok(true)
    }

    fn end_frame(&mut self, _ctx: &mut RendererContext) -> Result<()> {
        self.scheduler.end_frame(&mut self.frames)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.frames.gpu.wait_idle();
        Ok(())
    }

    fn shutdown(&mut self, _ctx: &mut RendererContext) -> Result<()> {
        log::info!("Shutting down {} backend", self.flavor.label());
        self.frames.frame = None;
        self.release_all();
        self.frames.lifecycle.destroy()
    }

    fn create_shader(&mut self, _ctx: &mut RendererContext, desc: &ShaderDesc<'_>) -> Result<Option<ShaderHandle>> {
        Ok(self.build_pipeline(desc).map(|pipeline| {
            self.shaders.insert(WgpuShader {
                pipeline: Arc::new(pipeline),
                shader_type: desc.shader_type,
            })
        }))
    }

    fn destroy_shader(&mut self, ctx: &mut RendererContext, shader: ShaderHandle) -> Result<()> {
        // Recorded commands hold their own reference to the pipeline
        if self.shaders.remove(shader).is_some() {
            ctx.bind_cache.forget_shader(shader);
        }
        Ok(())
    }

    fn use_mesh(&mut self, _ctx: &mut RendererContext, mesh: &Mesh) -> Result<ModelHandle> {
        let vertices = self
            .frames
            .upload_buffer(mesh.vertex_bytes(), wgpu::BufferUsages::VERTEX, "vertices")?;
        let indices = if mesh.is_indexed() {
            Some(
                self.frames
                    .upload_buffer(mesh.index_bytes(), wgpu::BufferUsages::INDEX, "indices")?,
            )
        } else {
            None
        };

        Ok(self.models.insert(WgpuModel {
            vertices,
            indices,
            draw_count: mesh.draw_count(),
        }))
    }

    fn destroy_model(&mut self, ctx: &mut RendererContext, model: ModelHandle) -> Result<()> {
        if let Some(data) = self.models.remove(model) {
            ctx.bind_cache.forget_model(model);
            self.retire(Release::Model(data));
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
            self.retire(Release::Texture(data));
        }
        Ok(())
    }

    fn use_font(&mut self, _ctx: &mut RendererContext, font: &FontData) -> Result<FontHandle> {
        let atlas = self.frames.upload_texture(&font.atlas, "font atlas")?;
        let vertices = self.frames.upload_buffer(
            bytemuck::cast_slice(&font.vertex_data()),
            wgpu::BufferUsages::VERTEX,
            "glyph vertices",
        )?;
        Ok(self.fonts.insert(WgpuFont {
            vertices,
            atlas,
            glyph_count: font.glyphs.len(),
        }))
    }

    fn destroy_font(&mut self, _ctx: &mut RendererContext, font: FontHandle) -> Result<()> {
        if let Some(data) = self.fonts.remove(font) {
            self.retire(Release::Font(data));
        }
        Ok(())
    }

    fn draw_model(&mut self, ctx: &mut RendererContext, draw: &DrawModel) -> Result<()> {
        let Some(token) = self.scheduler.current() else {
            return Ok(());
        };
        let (Some(model), Some(shader)) = (self.models.get(draw.model), self.shaders.get(draw.shader)) else {
            log::trace!("Skipping draw of a model or shader that no longer exists");
            return Ok(());
        };
        if shader.shader_type.uses_glyph_vertices() {
            return Ok(());
        }

        let stride = self.frames.layouts.object_stride;
        let slot = &mut self.frames.slots[token.slot];
        let Some(object_offset) = ctx
            .next_draw_slot()
            .and_then(|draw_index| slot.push_object(draw_index, stride, bytemuck::bytes_of(&draw.uniforms)))
        else {
            log::warn!("Per-frame draw limit reached, dropping draw");
            return Ok(());
        };

        if ctx.bind_cache.bind_shader(draw.shader) {
            slot.commands.push(Command::SetPipeline(shader.pipeline.clone()));
        }
        if ctx.bind_cache.bind_model(draw.model) {
            slot.commands.push(Command::SetModel {
                vertices: model.vertices.clone(),
                indices: model.indices.clone(),
            });
        }

        let texture_group = match draw.texture.and_then(|t| self.textures.get(t).map(|data| (t, &data.group))) {
            Some((handle, group)) => ctx.bind_cache.bind_texture(handle).then_some(group),
            None => {
                ctx.bind_cache.texture = None;
                self.default_texture.as_ref().map(|t| &t.group)
            }
        };
        if let Some(group) = texture_group {
            slot.commands.push(Command::SetTexture(group.clone()));
        }

        slot.commands.push(Command::Draw {
            indexed: model.indices.is_some(),
            count: model.draw_count,
            object_offset,
        });
        Ok(())
    }

    fn draw_glyph(&mut self, ctx: &mut RendererContext, draw: &DrawGlyph) -> Result<()> {
        let Some(token) = self.scheduler.current() else {
            return Ok(());
        };
        let (Some(font), Some(shader)) = (self.fonts.get(draw.font), self.shaders.get(draw.shader)) else {
            return Ok(());
        };
        if draw.glyph >= font.glyph_count {
            log::warn!("Glyph {} out of range for font with {} glyphs", draw.glyph, font.glyph_count);
            return Ok(());
        }

        let stride = self.frames.layouts.object_stride;
        let slot = &mut self.frames.slots[token.slot];
        let Some(object_offset) = ctx
            .next_draw_slot()
            .and_then(|draw_index| slot.push_object(draw_index, stride, bytemuck::bytes_of(&draw.uniforms)))
        else {
            log::warn!("Per-frame draw limit reached, dropping glyph");
            return Ok(());
        };

        if ctx.bind_cache.bind_shader(draw.shader) {
            slot.commands.push(Command::SetPipeline(shader.pipeline.clone()));
        }
        slot.commands.push(Command::DrawGlyph {
            vertices: font.vertices.clone(),
            indices: self.glyph_indices.clone(),
            atlas: font.atlas.group.clone(),
            glyph: draw.glyph as u64,
            object_offset,
        });

        // Glyphs rebind vertex, index and texture state
        ctx.bind_cache.model = None;
        ctx.bind_cache.texture = None;
        Ok(())
    }
}
