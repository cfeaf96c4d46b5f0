// Render facade
//
// Name-keyed registries for shaders, models, textures, materials and fonts in
// front of the backend chosen at startup. Asset problems come back as
// AssetError; any backend error is fatal and goes to Platform::fatal_error.

use crate::assets::{AssetPaths, AssetSource, FileAssets};
use crate::backend::{
    self, DrawGlyph, DrawModel, FontHandle, ModelHandle, RenderApi, RenderBackend, ShaderDesc,
    ShaderHandle, TextureHandle,
};
use crate::context::{RenderSettings, RendererContext};
use crate::error::AssetError;
use crate::hot_reload::ShaderWatcher;
use crate::platform::Platform;
use crate::registry::AssetMap;
use crate::types::{
    FontData, FontUniforms, GlobalUniforms, Mesh, ModelUniforms, ShaderType, TextureData,
    TextureFormat, Vertex,
};
use glam::{Vec2, Vec4};
use std::collections::HashMap;
use std::sync::Arc;

/// Shader used by models without a material
pub const DEFAULT_MESH_SHADER: &str = "mesh";
/// Shader used to draw glyphs
pub const DEFAULT_FONT_SHADER: &str = "font";

#[derive(Debug, Clone)]
pub struct Shader {
    pub name: String,
    pub shader_type: ShaderType,
    /// None when the backend rejected the bytecode
    pub handle: Option<ShaderHandle>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    /// Material name from the mesh, resolved at draw time
    pub material: String,
    pub vertex_count: usize,
    pub index_count: usize,
    pub handle: ModelHandle,
}

#[derive(Debug, Clone)]
pub struct RenderTexture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub handle: TextureHandle,
}

/// A shader and optional texture, both referenced by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    pub name: String,
    pub shader: String,
    pub texture: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderFont {
    pub name: String,
    pub handle: FontHandle,
    pub glyph_size: u32,
    /// Glyph index into the font's vertex data and its advance in ems
    pub glyphs: HashMap<char, (usize, f32)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextOptions {
    /// Top-left of the first line, in pixels
    pub position: Vec2,
    /// Glyph height in pixels
    pub scale: f32,
    pub colour: Vec4,
    /// Extra spacing between characters (x) and lines (y)
    pub padding: Vec2,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: 32.0,
            colour: Vec4::ONE,
            padding: Vec2::ZERO,
        }
    }
}

/// Terminate through the platform when a backend call failed
fn or_fatal<T>(platform: &Arc<dyn Platform>, what: &str, result: anyhow::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => platform.fatal_error(&format!("{}: {:#}", what, e)),
    }
}

pub struct Renderer {
    ctx: RendererContext,
    backend: Option<Box<dyn RenderBackend>>,
    api: RenderApi,
    device_name: String,
    paths: AssetPaths,
    assets: Box<dyn AssetSource>,
    watcher: Option<ShaderWatcher>,

    shaders: AssetMap<Shader>,
    models: AssetMap<Model>,
    textures: AssetMap<RenderTexture>,
    materials: AssetMap<Material>,
    fonts: AssetMap<RenderFont>,
}

impl Renderer {
    /// Bring up the first backend that initializes, reading assets from disk
    pub fn initialize(settings: RenderSettings, platform: Arc<dyn Platform>, paths: AssetPaths) -> Self {
        Self::with_assets(settings, platform, paths, Box::new(FileAssets))
    }

    pub fn with_assets(
        settings: RenderSettings,
        platform: Arc<dyn Platform>,
        paths: AssetPaths,
        assets: Box<dyn AssetSource>,
    ) -> Self {
        let candidates = RenderApi::candidates(&settings.backend);
        let mut ctx = RendererContext::new(platform, settings);

        let mut selected = None;
        for api in candidates {
            match backend::create_backend(api, &mut ctx) {
                Ok(backend) => {
                    selected = Some((api, backend));
                    break;
                }
                Err(e) => log::warn!("{} backend unavailable: {:#}", api, e),
            }
        }
        let Some((api, backend)) = selected else {
            ctx.platform.fatal_error("No render backend could be initialized");
        };

        let device_name = backend.device_name().to_string();
        log::info!("Renderer initialized with {} on {}", api, device_name);

        Self {
            ctx,
            backend: Some(backend),
            api,
            device_name,
            paths,
            assets,
            watcher: None,
            shaders: AssetMap::new(),
            models: AssetMap::new(),
            textures: AssetMap::new(),
            materials: AssetMap::new(),
            fonts: AssetMap::new(),
        }
    }

    /// Watch the backend's shader directory and reload changed shaders
    pub fn enable_hot_reload(&mut self) -> anyhow::Result<()> {
        let watcher = ShaderWatcher::new(&self.paths.shader_dir(self.api))?;
        self.watcher = Some(watcher);
        Ok(())
    }

    pub fn api(&self) -> RenderApi {
        self.api
    }

    pub fn api_name(&self) -> &'static str {
        self.api.name()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn frame_index(&self) -> usize {
        self.backend.as_ref().map_or(0, |b| b.frame_index())
    }

    pub fn rendered_frames(&self) -> u64 {
        self.ctx.rendered_frames
    }

    pub fn in_frame(&self) -> bool {
        self.ctx.in_frame
    }

    pub fn paths(&self) -> &AssetPaths {
        &self.paths
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Start a frame. False when nothing will be drawn (minimized, shut down).
    pub fn begin_commands(&mut self, globals: &GlobalUniforms) -> bool {
        if self.ctx.in_frame {
            log::warn!("begin_commands called inside a frame");
            return true;
        }
        let (width, height) = self.ctx.surface_size();
        if width == 0 || height == 0 {
            return false;
        }
        self.reload_changed_shaders();

        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        self.ctx.start_frame();
        let result = backend.begin_frame(&mut self.ctx, globals);
        let started = or_fatal(&self.ctx.platform, "Failed to begin frame", result);
        self.ctx.in_frame = started;
        started
    }

    pub fn present_frame(&mut self) {
        if !self.ctx.in_frame {
            return;
        }
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        let result = backend.end_frame(&mut self.ctx);
        or_fatal(&self.ctx.platform, "Failed to present frame", result);
        self.ctx.in_frame = false;
        self.ctx.rendered_frames += 1;
    }

    /// Destroy every registered asset and the backend. Safe to call twice.
    pub fn shutdown(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        log::info!("Shutting down {} renderer", self.api);
        self.watcher = None;

        if self.ctx.in_frame {
            let result = backend.end_frame(&mut self.ctx);
            or_fatal(&self.ctx.platform, "Failed to finish frame", result);
            self.ctx.in_frame = false;
        }
        let result = backend.wait_idle();
        or_fatal(&self.ctx.platform, "Failed to wait for the device", result);

        self.materials = AssetMap::new();
        for (_, font) in self.fonts.drain() {
            let result = backend.destroy_font(&mut self.ctx, font.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy font", result);
        }
        for (_, texture) in self.textures.drain() {
            let result = backend.destroy_texture(&mut self.ctx, texture.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy texture", result);
        }
        for (_, model) in self.models.drain() {
            let result = backend.destroy_model(&mut self.ctx, model.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy model", result);
        }
        for (_, shader) in self.shaders.drain() {
            if let Some(handle) = shader.handle {
                let result = backend.destroy_shader(&mut self.ctx, handle);
                or_fatal(&self.ctx.platform, "Failed to destroy shader", result);
            }
        }

        let result = backend.shutdown(&mut self.ctx);
        or_fatal(&self.ctx.platform, "Failed to shut down backend", result);
    }

    // =========================================================================
    // Shaders
    // =========================================================================

    /// Build a pipeline from stage bytecode.
    ///
    /// Empty bytecode is refused before the backend sees it. A shader the
    /// backend rejects is still registered, with no handle, so it can be
    /// replaced by a later reload.
    pub fn create_shader(
        &mut self,
        name: &str,
        vertex: &[u8],
        fragment: &[u8],
        shader_type: ShaderType,
    ) -> Result<&Shader, AssetError> {
        if vertex.is_empty() || fragment.is_empty() {
            log::warn!("Shader {} has empty bytecode", name);
            return Err(AssetError::EmptyShader(name.to_string()));
        }
        let Some(backend) = self.backend.as_mut() else {
            return Err(AssetError::ShaderRejected(name.to_string()));
        };

        let desc = ShaderDesc {
            name,
            vertex,
            fragment,
            shader_type,
        };
        let result = backend.create_shader(&mut self.ctx, &desc);
        let handle = or_fatal(&self.ctx.platform, "Failed to create shader", result);

        if handle.is_none() {
            log::error!("{} backend rejected shader {}", self.api, name);
            // A rejected rebuild leaves the previous pipeline in place
            if !self.shaders.contains(name) {
                self.shaders.insert(
                    name,
                    Shader {
                        name: name.to_string(),
                        shader_type,
                        handle,
                    },
                );
            }
            return Err(AssetError::ShaderRejected(name.to_string()));
        }

        let displaced = self.shaders.insert(
            name,
            Shader {
                name: name.to_string(),
                shader_type,
                handle,
            },
        );
        if let Some(handle) = displaced.and_then(|s| s.handle) {
            let result = backend.destroy_shader(&mut self.ctx, handle);
            or_fatal(&self.ctx.platform, "Failed to destroy replaced shader", result);
        }
        log::info!("Created shader {}", name);
        self.shaders
            .get(name)
            .ok_or_else(|| AssetError::not_found("shader", name))
    }

    /// Read `name`'s stage files for the active backend and create the shader
    pub fn load_shader(&mut self, name: &str, shader_type: ShaderType) -> Result<&Shader, AssetError> {
        let (vertex_path, fragment_path) = self.paths.shader(self.api, name);
        let read = |path: &std::path::Path| {
            self.ctx.platform.read_file(path).map_err(|source| AssetError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        let vertex = read(&vertex_path)?;
        let fragment = read(&fragment_path)?;
        self.create_shader(name, &vertex, &fragment, shader_type)
    }

    pub fn destroy_shader(&mut self, name: &str) {
        let Some(shader) = self.shaders.remove(name) else {
            log::warn!("Cannot destroy unknown shader {}", name);
            return;
        };
        if let (Some(handle), Some(backend)) = (shader.handle, self.backend.as_mut()) {
            let result = backend.destroy_shader(&mut self.ctx, handle);
            or_fatal(&self.ctx.platform, "Failed to destroy shader", result);
        }
    }

    pub fn shader(&self, name: &str) -> Option<&Shader> {
        self.shaders.get(name)
    }

    fn reload_changed_shaders(&mut self) {
        let Some(watcher) = self.watcher.as_ref() else {
            return;
        };
        for name in watcher.poll_changes() {
            let Some(shader_type) = self.shaders.get(&name).map(|s| s.shader_type) else {
                continue;
            };
            log::info!("Reloading shader {}", name);
            if let Err(e) = self.load_shader(&name, shader_type) {
                log::warn!("Reload of shader {} failed: {}", name, e);
            }
        }
    }

    // =========================================================================
    // Models
    // =========================================================================

    pub fn create_model(
        &mut self,
        name: &str,
        material: &str,
        vertices: Vec<Vertex>,
        indices: Vec<[u32; 3]>,
    ) -> Result<&Model, AssetError> {
        self.use_mesh(name, &Mesh::new(material, vertices, indices))
    }

    /// Load `models/<name>.pmdl` and register it as `<name>-<index>`
    pub fn load_model(&mut self, name: &str, index: usize) -> Result<&Model, AssetError> {
        let mesh = self.assets.load_mesh(&self.paths.model(name))?;
        self.use_mesh(&format!("{}-{}", name, index), &mesh)
    }

    /// Upload a mesh under `name`, replacing any model already registered there
    pub fn use_mesh(&mut self, name: &str, mesh: &Mesh) -> Result<&Model, AssetError> {
        mesh.validate().map_err(|reason| AssetError::InvalidMesh {
            name: name.to_string(),
            reason,
        })?;
        let Some(backend) = self.backend.as_mut() else {
            return Err(AssetError::not_found("backend", name));
        };

        let result = backend.use_mesh(&mut self.ctx, mesh);
        let handle = or_fatal(&self.ctx.platform, "Failed to upload mesh", result);
        let displaced = self.models.insert(
            name,
            Model {
                name: name.to_string(),
                material: mesh.material.clone(),
                vertex_count: mesh.vertex_count(),
                index_count: mesh.index_count(),
                handle,
            },
        );
        if let Some(old) = displaced {
            let result = backend.destroy_model(&mut self.ctx, old.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy replaced model", result);
        }

        log::info!(
            "Created model {} ({} vertices, {} indices)",
            name,
            mesh.vertex_count(),
            mesh.index_count()
        );
        self.models.get(name).ok_or_else(|| AssetError::not_found("model", name))
    }

    /// Unknown names are ignored
    pub fn destroy_model(&mut self, name: &str) {
        let Some(model) = self.models.remove(name) else {
            log::debug!("destroy_model: no model named {}", name);
            return;
        };
        if let Some(backend) = self.backend.as_mut() {
            let result = backend.destroy_model(&mut self.ctx, model.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy model", result);
        }
    }

    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    // =========================================================================
    // Textures
    // =========================================================================

    pub fn create_texture(
        &mut self,
        name: &str,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<&RenderTexture, AssetError> {
        self.use_texture(name, &TextureData::new(format, width, height, pixels))
    }

    /// Load `textures/<name>.png`
    pub fn load_texture(&mut self, name: &str) -> Result<&RenderTexture, AssetError> {
        let texture = self.assets.load_texture(&self.paths.texture(name))?;
        self.use_texture(name, &texture)
    }

    pub fn use_texture(&mut self, name: &str, texture: &TextureData) -> Result<&RenderTexture, AssetError> {
        texture.validate().map_err(|reason| AssetError::InvalidTexture {
            name: name.to_string(),
            reason,
        })?;
        let Some(backend) = self.backend.as_mut() else {
            return Err(AssetError::not_found("backend", name));
        };

        let result = backend.use_texture(&mut self.ctx, texture);
        let handle = or_fatal(&self.ctx.platform, "Failed to upload texture", result);
        let displaced = self.textures.insert(
            name,
            RenderTexture {
                name: name.to_string(),
                width: texture.width,
                height: texture.height,
                format: texture.format,
                handle,
            },
        );
        if let Some(old) = displaced {
            let result = backend.destroy_texture(&mut self.ctx, old.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy replaced texture", result);
        }

        log::info!("Created texture {} ({}x{})", name, texture.width, texture.height);
        self.textures
            .get(name)
            .ok_or_else(|| AssetError::not_found("texture", name))
    }

    pub fn destroy_texture(&mut self, name: &str) {
        let Some(texture) = self.textures.remove(name) else {
            log::warn!("Cannot destroy unknown texture {}", name);
            return;
        };
        if let Some(backend) = self.backend.as_mut() {
            let result = backend.destroy_texture(&mut self.ctx, texture.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy texture", result);
        }
    }

    pub fn texture(&self, name: &str) -> Option<&RenderTexture> {
        self.textures.get(name)
    }

    // =========================================================================
    // Materials
    // =========================================================================

    /// Register a material. The shader and texture may be created later.
    pub fn add_material(&mut self, name: &str, shader: &str, texture: Option<&str>) {
        let material = Material {
            name: name.to_string(),
            shader: shader.to_string(),
            texture: texture.map(str::to_string),
        };
        if self.materials.insert(name, material).is_some() {
            log::debug!("Replaced material {}", name);
        }
    }

    pub fn delete_material(&mut self, name: &str) {
        if self.materials.remove(name).is_none() {
            log::warn!("Cannot delete unknown material {}", name);
        }
    }

    pub fn material(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    // =========================================================================
    // Fonts
    // =========================================================================

    /// Load `fonts/<name>.png` with its `fonts/<name>.json` glyph index
    pub fn load_font(&mut self, name: &str) -> Result<&RenderFont, AssetError> {
        let (atlas, index) = self.paths.font(name);
        let font = self.assets.load_font(&atlas, &index)?;
        self.use_font(name, &font)
    }

    pub fn use_font(&mut self, name: &str, font: &FontData) -> Result<&RenderFont, AssetError> {
        font.atlas.validate().map_err(|reason| AssetError::InvalidTexture {
            name: name.to_string(),
            reason,
        })?;
        if font.glyphs.is_empty() {
            log::warn!("Font {} has no glyphs", name);
            return Err(AssetError::InvalidFont {
                name: name.to_string(),
                reason: "no glyphs".to_string(),
            });
        }
        let Some(backend) = self.backend.as_mut() else {
            return Err(AssetError::not_found("backend", name));
        };

        let result = backend.use_font(&mut self.ctx, font);
        let handle = or_fatal(&self.ctx.platform, "Failed to upload font", result);
        let glyphs = font
            .glyphs
            .iter()
            .enumerate()
            .map(|(i, g)| (g.character, (i, g.advance)))
            .collect();
        let displaced = self.fonts.insert(
            name,
            RenderFont {
                name: name.to_string(),
                handle,
                glyph_size: font.glyph_size,
                glyphs,
            },
        );
        if let Some(old) = displaced {
            let result = backend.destroy_font(&mut self.ctx, old.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy replaced font", result);
        }

        log::info!("Created font {} ({} glyphs)", name, font.glyphs.len());
        self.fonts.get(name).ok_or_else(|| AssetError::not_found("font", name))
    }

    pub fn destroy_font(&mut self, name: &str) {
        let Some(font) = self.fonts.remove(name) else {
            log::warn!("Cannot destroy unknown font {}", name);
            return;
        };
        if let Some(backend) = self.backend.as_mut() {
            let result = backend.destroy_font(&mut self.ctx, font.handle);
            or_fatal(&self.ctx.platform, "Failed to destroy font", result);
        }
    }

    pub fn font(&self, name: &str) -> Option<&RenderFont> {
        self.fonts.get(name)
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    /// Draw a registered model with its material. Outside a frame this does nothing.
    pub fn draw_model(&mut self, name: &str, uniforms: &ModelUniforms) {
        if !self.ctx.in_frame {
            return;
        }
        let Some(model) = self.models.get(name) else {
            log::trace!("draw_model: no model named {}", name);
            return;
        };

        let (shader_name, texture_name) = match self.materials.get(&model.material) {
            Some(material) => (material.shader.as_str(), material.texture.as_deref()),
            None => (DEFAULT_MESH_SHADER, None),
        };
        let Some(shader) = self.shaders.get(shader_name).and_then(|s| s.handle) else {
            log::trace!("draw_model: shader {} unavailable for {}", shader_name, name);
            return;
        };
        let texture = texture_name.and_then(|t| self.textures.get(t)).map(|t| t.handle);

        let draw = DrawModel {
            model: model.handle,
            shader,
            texture,
            uniforms: *uniforms,
        };
        if let Some(backend) = self.backend.as_mut() {
            let result = backend.draw_model(&mut self.ctx, &draw);
            or_fatal(&self.ctx.platform, "Failed to record draw", result);
        }
    }

    /// Draw one character with its top-left at `position` (pixels).
    /// Returns the horizontal advance in pixels, 0 for an unknown font or glyph.
    pub fn draw_character(&mut self, font: &str, scale: f32, colour: Vec4, position: Vec2, character: char) -> f32 {
        let Some(record) = self.fonts.get(font) else {
            log::trace!("draw_character: no font named {}", font);
            return 0.0;
        };
        let Some(&(glyph, advance)) = record.glyphs.get(&character) else {
            log::trace!("draw_character: {:?} not in font {}", character, font);
            return 0.0;
        };
        let advance = advance * scale;
        if !self.ctx.in_frame {
            return advance;
        }
        let Some(shader) = self.shaders.get(DEFAULT_FONT_SHADER).and_then(|s| s.handle) else {
            log::trace!("draw_character: no {} shader", DEFAULT_FONT_SHADER);
            return advance;
        };

        let (width, height) = self.ctx.surface_size();
        let draw = DrawGlyph {
            font: record.handle,
            shader,
            glyph,
            uniforms: FontUniforms::new(FontUniforms::screen_projection(width, height), position, scale, colour),
        };
        if let Some(backend) = self.backend.as_mut() {
            let result = backend.draw_glyph(&mut self.ctx, &draw);
            or_fatal(&self.ctx.platform, "Failed to record glyph", result);
        }
        advance
    }

    /// Draw a string, starting a new line at each '\n'. Returns the widest line in pixels.
    pub fn draw_text(&mut self, font: &str, options: &TextOptions, text: &str) -> f32 {
        let mut cursor = options.position;
        let mut widest = 0.0f32;
        for character in text.chars() {
            if character == '\n' {
                widest = widest.max(cursor.x - options.position.x);
                cursor.x = options.position.x;
                cursor.y += options.scale + options.padding.y;
                continue;
            }
            cursor.x += self.draw_character(font, options.scale, options.colour, cursor, character) + options.padding.x;
        }
        widest.max(cursor.x - options.position.x)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
