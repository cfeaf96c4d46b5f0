// =============================================================================
// RENDER CORE - Backend abstraction and frame synchronization
// =============================================================================
//
// One stable interface ("begin frame / draw model / end frame") in front of
// four interchangeable backends:
//
// ┌─────────────────────────────────────────────────────────────────┐
// │  Renderer (facade, name-keyed registries)                       │
// │    └── RenderBackend (trait object, chosen once at startup)     │
// │          ├── ModernExplicit      (ash + gpu-allocator)          │
// │          ├── LegacyExplicit      (wgpu, SPIR-V)                 │
// │          ├── FixedFunction       (wgpu, GL + GLSL)              │
// │          └── SoftwareRasterizer  (CPU)                          │
// └─────────────────────────────────────────────────────────────────┘
//
// Every explicit backend shares the same FrameScheduler (N slots, fence
// back-pressure) and SwapchainLifecycle (create / recreate / destroy).
//
// =============================================================================

pub mod assets;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod hot_reload;
pub mod platform;
pub mod registry;
pub mod renderer;
pub mod types;

pub use backend::RenderApi;
pub use context::{RenderSettings, RendererContext};
pub use error::AssetError;
pub use platform::{HeadlessPlatform, Platform};
pub use renderer::{Material, Model, RenderFont, RenderTexture, Renderer, Shader, TextOptions};
pub use types::{
    FontData, GlobalUniforms, Glyph, Mesh, ModelUniforms, ShaderType, TextureData,
    TextureFormat, Vertex,
};
