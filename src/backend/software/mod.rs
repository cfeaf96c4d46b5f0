// SoftwareRasterizer backend
//
// Mirrors the explicit GPU backends on the CPU: N frame slots with fences and
// command lists, a swapchain of host images, a transfer path through staging
// buffers. Command lists execute at submit time, which also signals the
// slot's fence.

pub mod memory;
pub mod raster;
pub mod swapchain;

use self::memory::{BufferId, BufferUsage, DeviceMemory, HostImage, ImageId};
use self::raster::{Fragment, RasterState, RasterVertex, Target};
use self::swapchain::SoftwareChainBuilder;
use super::frame::{Acquire, DeferredReleases, FrameDevice, FrameScheduler, Present};
use super::lifecycle::{ChainInfo, SwapchainLifecycle};
use super::{
    DrawGlyph, DrawModel, FontHandle, ModelHandle, RenderApi, RenderBackend, ShaderDesc,
    ShaderHandle, TextureHandle,
};
use crate::context::RendererContext;
use crate::platform::Platform;
use crate::types::{
    FontData, FontUniforms, GlobalUniforms, GlyphVertex, Mesh, ModelUniforms, ShaderType,
    TextureData, Vertex, GLYPH_INDICES, GLYPH_VERTEX_COUNT,
};
use anyhow::{Context, Result};
use glam::{Vec2, Vec3, Vec4};
use slotmap::SlotMap;
use std::sync::Arc;

/// Built-in shading programs, selected by the text of the shader "bytecode"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    VertexColour,
    Textured,
    Glyph,
}

impl Program {
    fn parse(vertex: &[u8], fragment: &[u8]) -> Option<(Program, bool)> {
        let vertex = std::str::from_utf8(vertex).ok()?.trim();
        let fragment = std::str::from_utf8(fragment).ok()?.trim();
        let glyph_input = match vertex {
            "mesh" => false,
            "glyph" => true,
            _ => return None,
        };
        let program = match fragment {
            "vertex_colour" => Program::VertexColour,
            "textured" => Program::Textured,
            "glyph" => Program::Glyph,
            _ => return None,
        };
        Some((program, glyph_input))
    }
}

struct SoftwareShader {
    program: Program,
    shader_type: ShaderType,
}

#[derive(Clone, Copy)]
struct SoftwareModel {
    vertices: BufferId,
    indices: Option<BufferId>,
    draw_count: u32,
}

#[derive(Clone, Copy)]
struct SoftwareFont {
    vertices: BufferId,
    atlas: ImageId,
    glyph_count: usize,
}

/// Objects whose release waits for a slot's fence
enum Release {
    Model(SoftwareModel),
    Texture(ImageId),
    Font(SoftwareFont),
}

/// Recorded command. Resources are referenced by memory id so a destroy
/// during recording cannot invalidate the list.
#[derive(Clone, Copy)]
enum Command {
    BindModel(SoftwareModel),
    BindShader(Program, ShaderType),
    BindTexture(ImageId),
    Draw(ModelUniforms),
    DrawGlyph {
        vertices: BufferId,
        atlas: ImageId,
        glyph: usize,
        uniforms: FontUniforms,
    },
}

#[derive(Default)]
struct CpuFence {
    signaled: bool,
    waits: u64,
    resets: u64,
}

struct SoftwareSlot {
    fence: CpuFence,
    commands: Vec<Command>,
    globals: GlobalUniforms,
    image: u32,
}

/// Everything the frame scheduler drives
pub struct SoftwareDevice {
    platform: Arc<dyn Platform>,
    memory: DeviceMemory,
    lifecycle: SwapchainLifecycle<SoftwareChainBuilder>,
    slots: Vec<SoftwareSlot>,
    clear_colour: [f32; 4],
    glyph_indices: BufferId,
}

impl SoftwareDevice {
    fn surface_changed(&self) -> bool {
        let size = self.platform.surface_size();
        self.lifecycle.chain().map(|c| c.extent()) != Some(size)
    }

    fn execute(&mut self, slot: usize) -> Result<()> {
        let Some(chain) = self.lifecycle.chain_mut() else {
            return Ok(());
        };
        let slot = &self.slots[slot];
        let (width, height) = chain.extent;
        let mut target = Target {
            width,
            height,
            colour: &mut chain.images[slot.image as usize],
            depth: &mut chain.depth,
        };
        target.clear(self.clear_colour);

        let memory = &self.memory;
        let view_projection = slot.globals.projection * slot.globals.view;
        let mut model: Option<SoftwareModel> = None;
        let mut program = (Program::VertexColour, ShaderType::Mesh);
        let mut texture: Option<&HostImage> = None;

        for command in &slot.commands {
            match *command {
                Command::BindModel(m) => model = Some(m),
                Command::BindShader(p, t) => program = (p, t),
                Command::BindTexture(id) => texture = memory.image(id),
                Command::Draw(uniforms) => {
                    let Some(model) = model else { continue };
                    let vertices = memory
                        .buffer(model.vertices)
                        .context("Vertex buffer freed while still referenced")?
                        .as_slice::<Vertex>();
                    let indices: Vec<u32> = match model.indices {
                        Some(id) => memory
                            .buffer(id)
                            .context("Index buffer freed while still referenced")?
                            .as_slice::<u32>()
                            .to_vec(),
                        None => (0..model.draw_count).collect(),
                    };

                    let mvp = view_projection * uniforms.model;
                    let fragment = match (program.0, texture) {
                        (Program::Textured, Some(image)) => Fragment::Textured(image),
                        _ => Fragment::VertexColour,
                    };
                    let state = if program.1.blends() {
                        RasterState::OVERLAY
                    } else {
                        RasterState::OPAQUE
                    };

                    for triangle in indices[..model.draw_count as usize].chunks_exact(3) {
                        let corners = [triangle[0], triangle[1], triangle[2]].map(|i| {
                            let v = vertices[i as usize];
                            RasterVertex {
                                clip: mvp * Vec3::from_array(v.position).extend(1.0),
                                colour: Vec4::from_array(v.colour),
                                uv: Vec2::from_array(v.texture_coordinate),
                            }
                        });
                        raster::draw_triangle(&mut target, corners, &fragment, state);
                    }
                }
                Command::DrawGlyph {
                    vertices,
                    atlas,
                    glyph,
                    uniforms,
                } => {
                    let quad = memory
                        .buffer(vertices)
                        .context("Glyph buffer freed while still referenced")?
                        .as_slice::<GlyphVertex>();
                    let indices = memory
                        .buffer(self.glyph_indices)
                        .context("Glyph index buffer missing")?
                        .as_slice::<u32>();
                    let Some(atlas) = memory.image(atlas) else { continue };
                    let base = glyph * GLYPH_VERTEX_COUNT;
                    let fragment = Fragment::Glyph {
                        atlas,
                        colour: uniforms.colour,
                    };

                    for triangle in indices.chunks_exact(3) {
                        let corners = [triangle[0], triangle[1], triangle[2]].map(|i| {
                            let v = quad[base + i as usize];
                            RasterVertex {
                                clip: uniforms.transform * Vec3::from_array(v.position).extend(1.0),
                                colour: Vec4::ONE,
                                uv: Vec2::from_array(v.texture_coordinate),
                            }
                        });
                        raster::draw_triangle(&mut target, corners, &fragment, RasterState::OVERLAY);
                    }
                }
            }
        }
        Ok(())
    }

    fn release(&mut self, release: Release) {
        match release {
            Release::Model(model) => {
                self.memory.free_buffer(model.vertices);
                if let Some(indices) = model.indices {
                    self.memory.free_buffer(indices);
                }
            }
            Release::Texture(image) => self.memory.free_image(image),
            Release::Font(font) => {
                self.memory.free_buffer(font.vertices);
                self.memory.free_image(font.atlas);
            }
        }
    }
}

impl FrameDevice for SoftwareDevice {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = &mut self.slots[slot].fence;
        if !fence.signaled {
            anyhow::bail!("Fence for slot {} was reset but never submitted", slot);
        }
        fence.waits += 1;
        Ok(())
    }

    fn acquire_image(&mut self, _slot: usize) -> Result<Acquire> {
        if self.surface_changed() {
            return Ok(Acquire::OutOfDate);
        }
        match self.lifecycle.chain_mut() {
            Some(chain) => Ok(Acquire::Image(chain.acquire())),
            None => Ok(Acquire::OutOfDate),
        }
    }

    fn recreate_swapchain(&mut self, _slot: usize, _acquire_signaled: bool) -> Result<bool> {
        let extent = self.platform.surface_size();
        self.lifecycle.recreate(extent)
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let slot = &mut self.slots[slot];
        slot.fence.signaled = false;
        slot.fence.resets += 1;
        slot.commands.clear();
        Ok(())
    }

    fn begin_recording(&mut self, slot: usize, image: u32) -> Result<()> {
        self.slots[slot].image = image;
        Ok(())
    }

    fn submit(&mut self, slot: usize, _image: u32) -> Result<()> {
        self.execute(slot)?;
        self.slots[slot].fence.signaled = true;
        Ok(())
    }

    fn present(&mut self, _slot: usize, image: u32) -> Result<Present> {
        match self.lifecycle.chain() {
            Some(chain) => {
                let (width, height) = chain.extent;
                self.platform.present_pixels(width, height, &chain.images[image as usize]);
                Ok(Present::Done)
            }
            None => Ok(Present::OutOfDate),
        }
    }
}

pub struct SoftwareBackend {
    scheduler: FrameScheduler,
    device: SoftwareDevice,
    deferred: DeferredReleases<Release>,
    shaders: SlotMap<ShaderHandle, SoftwareShader>,
    models: SlotMap<ModelHandle, SoftwareModel>,
    textures: SlotMap<TextureHandle, ImageId>,
    fonts: SlotMap<FontHandle, SoftwareFont>,
    default_texture: ImageId,
    device_name: String,
}

impl SoftwareBackend {
    pub fn new(ctx: &mut RendererContext) -> Result<Self> {
        Self::with_memory(ctx, DeviceMemory::default())
    }

    /// Backend whose allocations fail past a fixed budget
    pub fn with_memory(ctx: &mut RendererContext, mut memory: DeviceMemory) -> Result<Self> {
        let slot_count = ctx.settings.frames_in_flight.max(1);
        log::info!("Initializing software rasterizer with {} frame slots", slot_count);

        let glyph_indices = memory::upload_buffer(
            &mut memory,
            bytemuck::cast_slice(&GLYPH_INDICES),
            BufferUsage::Index,
        )
        .context("Failed to create shared glyph index buffer")?;
        let default_texture = memory
            .insert_image(HostImage::solid([255, 255, 255, 255]))
            .context("Failed to create default texture")?;

        let slots = (0..slot_count)
            .map(|_| SoftwareSlot {
                // Start signaled so the first wait on every slot returns
                fence: CpuFence {
                    signaled: true,
                    ..Default::default()
                },
                commands: Vec::new(),
                globals: GlobalUniforms::default(),
                image: 0,
            })
            .collect();

        let mut lifecycle = SwapchainLifecycle::new(SoftwareChainBuilder::new(slot_count));
        lifecycle.create(ctx.surface_size())?;

        Ok(Self {
            scheduler: FrameScheduler::new(slot_count),
            device: SoftwareDevice {
                platform: ctx.platform.clone(),
                memory,
                lifecycle,
                slots,
                clear_colour: ctx.settings.clear_colour,
                glyph_indices,
            },
            deferred: DeferredReleases::new(slot_count),
            shaders: SlotMap::with_key(),
            models: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            fonts: SlotMap::with_key(),
            default_texture,
            device_name: "CPU rasterizer".to_string(),
        })
    }

    /// (waits, resets) per slot fence
    pub fn fence_stats(&self) -> Vec<(u64, u64)> {
        self.device
            .slots
            .iter()
            .map(|s| (s.fence.waits, s.fence.resets))
            .collect()
    }

    /// (chains built, chains torn down)
    pub fn swapchain_counts(&self) -> (u64, u64) {
        self.device.lifecycle.counts()
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.device.memory
    }

    /// Release now, or after the recording slot's fence when mid-frame
    fn retire(&mut self, release: Release) {
        match self.scheduler.current() {
            Some(token) => self.deferred.defer(token.slot, release),
            None => self.device.release(release),
        }
    }

    fn record(&mut self, command: Command) -> bool {
        match self.scheduler.current() {
            Some(token) => {
                self.device.slots[token.slot].commands.push(command);
                true
            }
            None => false,
        }
    }
}

impl RenderBackend for SoftwareBackend {
    fn api(&self) -> RenderApi {
        RenderApi::SoftwareRasterizer
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn frame_index(&self) -> usize {
        self.scheduler.index()
    }

    fn begin_frame(&mut self, _ctx: &mut RendererContext, globals: &GlobalUniforms) -> Result<bool> {
        let resized = self.device.surface_changed();
        let Some(token) = self.scheduler.begin_frame(&mut self.device, resized)? else {
            return Ok(false);
        };

        for release in self.deferred.collect(token.slot) {
            self.device.release(release);
        }
        self.device.slots[token.slot].globals = *globals;
        Ok(true)
    }

    fn end_frame(&mut self, _ctx: &mut RendererContext) -> Result<()> {
        self.scheduler.end_frame(&mut self.device)
    }

    fn wait_idle(&mut self) -> Result<()> {
        // Work completes at submit; nothing to wait for
        Ok(())
    }

    fn shutdown(&mut self, _ctx: &mut RendererContext) -> Result<()> {
        log::info!("Shutting down software rasterizer");
        for release in self.deferred.drain_all() {
            self.device.release(release);
        }
        let models: Vec<_> = self.models.drain().map(|(_, m)| Release::Model(m)).collect();
        let textures: Vec<_> = self.textures.drain().map(|(_, t)| Release::Texture(t)).collect();
        let fonts: Vec<_> = self.fonts.drain().map(|(_, f)| Release::Font(f)).collect();
        for release in models.into_iter().chain(textures).chain(fonts) {
            self.device.release(release);
        }
        self.shaders.clear();
        self.device.lifecycle.destroy()
    }

    fn create_shader(&mut self, _ctx: &mut RendererContext, desc: &ShaderDesc<'_>) -> Result<Option<ShaderHandle>> {
        let Some((program, glyph_input)) = Program::parse(desc.vertex, desc.fragment) else {
            log::error!("Software rasterizer has no program for shader {}", desc.name);
            return Ok(None);
        };
        if glyph_input != desc.shader_type.uses_glyph_vertices() {
            log::error!(
                "Shader {} vertex input does not match shader type {:?}",
                desc.name,
                desc.shader_type
            );
            return Ok(None);
        }

        log::debug!("Software shader {}: {:?}", desc.name, program);
        Ok(Some(self.shaders.insert(SoftwareShader {
            program,
            shader_type: desc.shader_type,
        })))
    }

    fn destroy_shader(&mut self, ctx: &mut RendererContext, shader: ShaderHandle) -> Result<()> {
        // Recorded commands copy the program, so no deferral is needed
        self.shaders.remove(shader);
        ctx.bind_cache.forget_shader(shader);
        Ok(())
    }

    fn use_mesh(&mut self, _ctx: &mut RendererContext, mesh: &Mesh) -> Result<ModelHandle> {
        let memory = &mut self.device.memory;
        let vertices = memory::upload_buffer(memory, mesh.vertex_bytes(), BufferUsage::Vertex)
            .context("Failed to upload vertex buffer")?;
        let indices = if mesh.is_indexed() {
            Some(
                memory::upload_buffer(memory, mesh.index_bytes(), BufferUsage::Index)
                    .context("Failed to upload index buffer")?,
            )
        } else {
            None
        };

        Ok(self.models.insert(SoftwareModel {
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
        let image = memory::upload_image(&mut self.device.memory, texture)
            .context("Failed to upload texture")?;
        Ok(self.textures.insert(image))
    }

    fn destroy_texture(&mut self, ctx: &mut RendererContext, texture: TextureHandle) -> Result<()> {
        if let Some(image) = self.textures.remove(texture) {
            ctx.bind_cache.forget_texture(texture);
            self.retire(Release::Texture(image));
        }
        Ok(())
    }

    fn use_font(&mut self, _ctx: &mut RendererContext, font: &FontData) -> Result<FontHandle> {
        let memory = &mut self.device.memory;
        let atlas = memory::upload_image(memory, &font.atlas).context("Failed to upload font atlas")?;
        let vertices = memory::upload_buffer(
            memory,
            bytemuck::cast_slice(&font.vertex_data()),
            BufferUsage::Vertex,
        )
        .context("Failed to upload glyph vertices")?;

        Ok(self.fonts.insert(SoftwareFont {
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
        let (Some(&model), Some(shader)) = (self.models.get(draw.model), self.shaders.get(draw.shader)) else {
            log::trace!("Skipping draw of a model or shader that no longer exists");
            return Ok(());
        };
        let (program, shader_type) = (shader.program, shader.shader_type);
        let image = draw
            .texture
            .and_then(|t| self.textures.get(t).copied())
            .unwrap_or(self.default_texture);

        if ctx.bind_cache.bind_model(draw.model) {
            self.record(Command::BindModel(model));
        }
        if ctx.bind_cache.bind_shader(draw.shader) {
            self.record(Command::BindShader(program, shader_type));
        }
        match draw.texture {
            Some(texture) if ctx.bind_cache.bind_texture(texture) => {
                self.record(Command::BindTexture(image));
            }
            Some(_) => {}
            None => {
                ctx.bind_cache.texture = None;
                self.record(Command::BindTexture(image));
            }
        }
        self.record(Command::Draw(draw.uniforms));
        Ok(())
    }

    fn draw_glyph(&mut self, ctx: &mut RendererContext, draw: &DrawGlyph) -> Result<()> {
        let Some(&font) = self.fonts.get(draw.font) else {
            return Ok(());
        };
        if draw.glyph >= font.glyph_count {
            log::warn!("Glyph {} out of range for font with {} glyphs", draw.glyph, font.glyph_count);
            return Ok(());
        }
        if let Some(shader) = self.shaders.get(draw.shader) {
            let (program, shader_type) = (shader.program, shader.shader_type);
            if ctx.bind_cache.bind_shader(draw.shader) {
                self.record(Command::BindShader(program, shader_type));
            }
        }
        // Glyph quads bind their own vertex range
        ctx.bind_cache.model = None;
        self.record(Command::DrawGlyph {
            vertices: font.vertices,
            atlas: font.atlas,
            glyph: draw.glyph,
            uniforms: draw.uniforms,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RenderSettings;
    use crate::platform::HeadlessPlatform;
    use crate::types::FRAMES_IN_FLIGHT;

    fn context(platform: Arc<HeadlessPlatform>, slots: usize) -> RendererContext {
        let settings = RenderSettings {
            frames_in_flight: slots,
            clear_colour: [0.0, 0.0, 0.0, 1.0],
            ..Default::default()
        };
        RendererContext::new(platform, settings)
    }

    fn triangle() -> Mesh {
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        Mesh::new(
            "",
            vec![
                Vertex::new(Vec3::new(-1.0, -1.0, 0.5), red, Vec2::ZERO, Vec3::Z),
                Vertex::new(Vec3::new(3.0, -1.0, 0.5), red, Vec2::ZERO, Vec3::Z),
                Vertex::new(Vec3::new(-1.0, 3.0, 0.5), red, Vec2::ZERO, Vec3::Z),
            ],
            vec![],
        )
    }

    fn shader(backend: &mut SoftwareBackend, ctx: &mut RendererContext) -> ShaderHandle {
        let desc = ShaderDesc {
            name: "mesh",
            vertex: b"mesh",
            fragment: b"vertex_colour",
            shader_type: ShaderType::Mesh,
        };
        backend.create_shader(ctx, &desc).unwrap().unwrap()
    }

    #[test]
    fn fences_are_waited_and_reset_for_every_slot() {
        for slots in 2..=4 {
            let platform = Arc::new(HeadlessPlatform::new(8, 8));
            let mut ctx = context(platform, slots);
            let mut backend = SoftwareBackend::new(&mut ctx).unwrap();

            for _ in 0..3 * slots {
                assert!(backend.begin_frame(&mut ctx, &GlobalUniforms::default()).unwrap());
                backend.end_frame(&mut ctx).unwrap();
            }
            for (waits, resets) in backend.fence_stats() {
                assert!(waits >= 3 && resets >= 3);
            }
        }
    }

    #[test]
    fn drawn_triangle_reaches_the_platform() {
        let platform = Arc::new(HeadlessPlatform::new(8, 8));
        let mut ctx = context(platform.clone(), FRAMES_IN_FLIGHT);
        let mut backend = SoftwareBackend::new(&mut ctx).unwrap();
        let shader = shader(&mut backend, &mut ctx);
        let model = backend.use_mesh(&mut ctx, &triangle()).unwrap();

        assert!(backend.begin_frame(&mut ctx, &GlobalUniforms::default()).unwrap());
        let draw = DrawModel {
            model,
            shader,
            texture: None,
            uniforms: ModelUniforms::default(),
        };
        backend.draw_model(&mut ctx, &draw).unwrap();
        backend.end_frame(&mut ctx).unwrap();

        let frame = platform.last_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 8));
        assert!(frame.pixels.iter().all(|&p| p == 0xFFFF0000));
    }

    #[test]
    fn resize_rebuilds_the_swapchain() {
        let platform = Arc::new(HeadlessPlatform::new(8, 8));
        let mut ctx = context(platform.clone(), FRAMES_IN_FLIGHT);
        let mut backend = SoftwareBackend::new(&mut ctx).unwrap();
        assert_eq!(backend.swapchain_counts(), (1, 0));

        platform.set_size(16, 4);
        assert!(backend.begin_frame(&mut ctx, &GlobalUniforms::default()).unwrap());
        backend.end_frame(&mut ctx).unwrap();
        assert_eq!(backend.swapchain_counts(), (2, 1));
        assert_eq!(platform.last_frame().map(|f| (f.width, f.height)), Some((16, 4)));
    }

    #[test]
    fn minimized_surface_skips_frames() {
        let platform = Arc::new(HeadlessPlatform::new(8, 8));
        let mut ctx = context(platform.clone(), FRAMES_IN_FLIGHT);
        let mut backend = SoftwareBackend::new(&mut ctx).unwrap();

        platform.set_size(0, 0);
        assert!(!backend.begin_frame(&mut ctx, &GlobalUniforms::default()).unwrap());
        assert_eq!(backend.frame_index(), 0);
        assert_eq!(platform.presented_frames(), 0);
    }

    #[test]
    fn destroying_mid_frame_defers_the_release() {
        let platform = Arc::new(HeadlessPlatform::new(8, 8));
        let mut ctx = context(platform, 3);
        let mut backend = SoftwareBackend::new(&mut ctx).unwrap();
        let shader = shader(&mut backend, &mut ctx);
        let model = backend.use_mesh(&mut ctx, &triangle()).unwrap();
        let baseline = backend.memory().buffer_count();

        backend.begin_frame(&mut ctx, &GlobalUniforms::default()).unwrap();
        let draw = DrawModel {
            model,
            shader,
            texture: None,
            uniforms: ModelUniforms::default(),
        };
        backend.draw_model(&mut ctx, &draw).unwrap();
        backend.destroy_model(&mut ctx, model).unwrap();
        assert_eq!(backend.memory().buffer_count(), baseline);
        backend.end_frame(&mut ctx).unwrap();

        // The buffer goes once slot 0 comes around again
        for _ in 0..3 {
            backend.begin_frame(&mut ctx, &GlobalUniforms::default()).unwrap();
            backend.end_frame(&mut ctx).unwrap();
        }
        assert_eq!(backend.memory().buffer_count(), baseline - 1);
    }

    #[test]
    fn unknown_program_is_a_soft_failure() {
        let platform = Arc::new(HeadlessPlatform::new(8, 8));
        let mut ctx = context(platform, 3);
        let mut backend = SoftwareBackend::new(&mut ctx).unwrap();
        let desc = ShaderDesc {
            name: "bad",
            vertex: b"mesh",
            fragment: b"raytrace",
            shader_type: ShaderType::Mesh,
        };
        assert!(backend.create_shader(&mut ctx, &desc).unwrap().is_none());
    }

    #[test]
    fn out_of_memory_is_an_error() {
        let platform = Arc::new(HeadlessPlatform::new(8, 8));
        let mut ctx = context(platform, 3);
        let mut backend = SoftwareBackend::with_memory(&mut ctx, DeviceMemory::with_budget(256)).unwrap();
        let big = Mesh::new("", vec![Vertex::default(); 64], vec![]);
        assert!(backend.use_mesh(&mut ctx, &big).is_err());
    }
}
