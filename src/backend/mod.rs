// Backend module - the dispatch seam between the facade and native APIs
//
// Design: one trait object chosen once at startup. The facade never branches
// on the backend after create_backend() returns.

pub mod frame;
pub mod lifecycle;
pub mod software;
#[cfg(feature = "vulkan")]
pub mod vulkan;
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

use crate::context::RendererContext;
use crate::types::{FontData, FontUniforms, Mesh, ModelUniforms, ShaderType, TextureData};
use anyhow::Result;
use std::fmt;

slotmap::new_key_type! {
    pub struct ShaderHandle;
    pub struct ModelHandle;
    pub struct TextureHandle;
    pub struct FontHandle;
}

/// The four backend variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderApi {
    /// Raw Vulkan through ash
    ModernExplicit,
    /// wgpu on Vulkan / DX12 / Metal, SPIR-V shaders
    LegacyExplicit,
    /// wgpu on OpenGL, GLSL shaders
    FixedFunction,
    /// CPU rasterizer
    SoftwareRasterizer,
}

impl RenderApi {
    pub const ALL: [RenderApi; 4] = [
        RenderApi::ModernExplicit,
        RenderApi::LegacyExplicit,
        RenderApi::FixedFunction,
        RenderApi::SoftwareRasterizer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RenderApi::ModernExplicit => "Vulkan",
            RenderApi::LegacyExplicit => "wgpu",
            RenderApi::FixedFunction => "OpenGL",
            RenderApi::SoftwareRasterizer => "Software",
        }
    }

    /// Whether support for this backend was compiled in
    pub fn is_compiled(self) -> bool {
        match self {
            RenderApi::ModernExplicit => cfg!(feature = "vulkan"),
            RenderApi::LegacyExplicit | RenderApi::FixedFunction => cfg!(feature = "wgpu"),
            RenderApi::SoftwareRasterizer => true,
        }
    }

    /// Backends to try, in order, for a configured preference.
    ///
    /// "auto" walks every compiled backend from most to least capable; a
    /// named backend that was not compiled in falls back to "auto".
    pub fn candidates(preference: &str) -> Vec<RenderApi> {
        let requested = match preference.to_lowercase().as_str() {
            "auto" | "" => None,
            "vulkan" | "modern" => Some(RenderApi::ModernExplicit),
            "wgpu" | "dx12" | "metal" | "legacy" => Some(RenderApi::LegacyExplicit),
            "gl" | "opengl" | "gles" => Some(RenderApi::FixedFunction),
            "software" | "cpu" => Some(RenderApi::SoftwareRasterizer),
            other => {
                log::warn!("Unknown backend '{}', selecting automatically", other);
                None
            }
        };

        match requested {
            Some(api) if api.is_compiled() => vec![api],
            Some(api) => {
                log::warn!("{} backend not compiled in, selecting automatically", api);
                Self::auto_order()
            }
            None => Self::auto_order(),
        }
    }

    fn auto_order() -> Vec<RenderApi> {
        [
            RenderApi::ModernExplicit,
            RenderApi::LegacyExplicit,
            RenderApi::SoftwareRasterizer,
        ]
        .into_iter()
        .filter(|api| api.is_compiled())
        .collect()
    }
}

impl fmt::Display for RenderApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shader bytecode for one pipeline
#[derive(Debug, Clone, Copy)]
pub struct ShaderDesc<'a> {
    pub name: &'a str,
    pub vertex: &'a [u8],
    pub fragment: &'a [u8],
    pub shader_type: ShaderType,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawModel {
    pub model: ModelHandle,
    pub shader: ShaderHandle,
    pub texture: Option<TextureHandle>,
    pub uniforms: ModelUniforms,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawGlyph {
    pub font: FontHandle,
    pub shader: ShaderHandle,
    /// Index into the font's packed glyph vertex data
    pub glyph: usize,
    pub uniforms: FontUniforms,
}

/// The contract every backend fulfils.
///
/// Errors returned from here are infrastructure failures; the facade treats
/// them as fatal. Soft failures are expressed in the return values.
pub trait RenderBackend {
    fn api(&self) -> RenderApi;

    fn device_name(&self) -> &str;

    /// Slot used by the frame currently (or next) being recorded
    fn frame_index(&self) -> usize;

    /// Wait for the slot, acquire an image and open recording.
    /// Returns false when there is nothing to render into (minimized).
    fn begin_frame(&mut self, ctx: &mut RendererContext, globals: &crate::types::GlobalUniforms) -> Result<bool>;

    /// Close recording, submit and present
    fn end_frame(&mut self, ctx: &mut RendererContext) -> Result<()>;

    /// Block until all submitted work has completed
    fn wait_idle(&mut self) -> Result<()>;

    /// Release every native object. The backend is unusable afterwards.
    fn shutdown(&mut self, ctx: &mut RendererContext) -> Result<()>;

    /// Build a pipeline. Ok(None) means the native API rejected the shader.
    fn create_shader(&mut self, ctx: &mut RendererContext, desc: &ShaderDesc<'_>) -> Result<Option<ShaderHandle>>;

    fn destroy_shader(&mut self, ctx: &mut RendererContext, shader: ShaderHandle) -> Result<()>;

    fn use_mesh(&mut self, ctx: &mut RendererContext, mesh: &Mesh) -> Result<ModelHandle>;

    fn destroy_model(&mut self, ctx: &mut RendererContext, model: ModelHandle) -> Result<()>;

    fn use_texture(&mut self, ctx: &mut RendererContext, texture: &TextureData) -> Result<TextureHandle>;

    fn destroy_texture(&mut self, ctx: &mut RendererContext, texture: TextureHandle) -> Result<()>;

    fn use_font(&mut self, ctx: &mut RendererContext, font: &FontData) -> Result<FontHandle>;

    fn destroy_font(&mut self, ctx: &mut RendererContext, font: FontHandle) -> Result<()>;

    fn draw_model(&mut self, ctx: &mut RendererContext, draw: &DrawModel) -> Result<()>;

    fn draw_glyph(&mut self, ctx: &mut RendererContext, draw: &DrawGlyph) -> Result<()>;
}

/// Construct the backend for `api`. The only place the engine branches on it.
pub fn create_backend(api: RenderApi, ctx: &mut RendererContext) -> Result<Box<dyn RenderBackend>> {
    log::info!("Creating {} backend", api);
    match api {
        #[cfg(feature = "vulkan")]
        RenderApi::ModernExplicit => Ok(Box::new(vulkan::VulkanBackend::new(ctx)?)),
        #[cfg(feature = "wgpu")]
        RenderApi::LegacyExplicit => Ok(Box::new(wgpu_backend::WgpuBackend::new(
            ctx,
            wgpu_backend::WgpuFlavor::Explicit,
        )?)),
        #[cfg(feature = "wgpu")]
        RenderApi::FixedFunction => Ok(Box::new(wgpu_backend::WgpuBackend::new(
            ctx,
            wgpu_backend::WgpuFlavor::Gl,
        )?)),
        RenderApi::SoftwareRasterizer => Ok(Box::new(software::SoftwareBackend::new(ctx)?)),
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("{} backend was not compiled in", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_preference_yields_single_candidate() {
        assert_eq!(
            RenderApi::candidates("software"),
            vec![RenderApi::SoftwareRasterizer]
        );
    }

    #[test]
    fn auto_always_ends_with_software() {
        let candidates = RenderApi::candidates("auto");
        assert_eq!(candidates.last(), Some(&RenderApi::SoftwareRasterizer));
        assert!(candidates.iter().all(|api| api.is_compiled()));
    }

    #[test]
    fn unknown_preference_selects_automatically() {
        assert_eq!(RenderApi::candidates("glide"), RenderApi::candidates("auto"));
    }
}
