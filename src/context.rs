// Renderer context - state shared between the facade and the active backend
//
// Owned by the Renderer and passed by &mut to every backend entry point.

use crate::backend::{ModelHandle, ShaderHandle, TextureHandle};
use crate::platform::Platform;
use crate::types::FRAMES_IN_FLIGHT;
use std::sync::Arc;

/// Present mode preference, resolved per backend against what the surface supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentModePreference {
    /// Mailbox when available, otherwise vsync
    #[default]
    Auto,
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

impl PresentModePreference {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "immediate" => Some(Self::Immediate),
            "mailbox" => Some(Self::Mailbox),
            "fifo" | "vsync" => Some(Self::Fifo),
            "fifo_relaxed" => Some(Self::FifoRelaxed),
            _ => None,
        }
    }
}

/// Backend-agnostic startup settings
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub app_name: String,
    /// Backend preference resolved by RenderApi::candidates
    pub backend: String,
    pub frames_in_flight: usize,
    pub present_mode: PresentModePreference,
    pub clear_colour: [f32; 4],
    pub validation: bool,
    /// Upper bound on draw calls recorded per frame (sizes per-frame uniform storage)
    pub max_draws_per_frame: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_name: "render-core".to_string(),
            backend: "auto".to_string(),
            frames_in_flight: FRAMES_IN_FLIGHT,
            present_mode: PresentModePreference::Auto,
            clear_colour: [0.1, 0.2, 0.8, 1.0],
            validation: cfg!(debug_assertions),
            max_draws_per_frame: 4096,
        }
    }
}

/// Last-bound state, used to skip redundant binds within a frame
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BindCache {
    pub model: Option<ModelHandle>,
    pub shader: Option<ShaderHandle>,
    pub texture: Option<TextureHandle>,
}

impl BindCache {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns true when the model differs from the last one bound
    pub fn bind_model(&mut self, model: ModelHandle) -> bool {
        Self::swap(&mut self.model, model)
    }

    pub fn bind_shader(&mut self, shader: ShaderHandle) -> bool {
        Self::swap(&mut self.shader, shader)
    }

    pub fn bind_texture(&mut self, texture: TextureHandle) -> bool {
        Self::swap(&mut self.texture, texture)
    }

    /// Forget a handle that is being destroyed so a recycled key is rebound
    pub fn forget_model(&mut self, model: ModelHandle) {
        if self.model == Some(model) {
            self.model = None;
        }
    }

    pub fn forget_texture(&mut self, texture: TextureHandle) {
        if self.texture == Some(texture) {
            self.texture = None;
        }
    }

    pub fn forget_shader(&mut self, shader: ShaderHandle) {
        if self.shader == Some(shader) {
            self.shader = None;
        }
    }

    fn swap<T: PartialEq + Copy>(slot: &mut Option<T>, value: T) -> bool {
        if *slot == Some(value) {
            false
        } else {
            *slot = Some(value);
            true
        }
    }
}

pub struct RendererContext {
    pub platform: Arc<dyn Platform>,
    pub settings: RenderSettings,
    pub bind_cache: BindCache,
    /// True between a successful begin_frame and the matching end_frame
    pub in_frame: bool,
    pub rendered_frames: u64,
    /// Draw calls recorded in the current frame
    pub draws_this_frame: u32,
}

impl RendererContext {
    pub fn new(platform: Arc<dyn Platform>, settings: RenderSettings) -> Self {
        Self {
            platform,
            settings,
            bind_cache: BindCache::default(),
            in_frame: false,
            rendered_frames: 0,
            draws_this_frame: 0,
        }
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.platform.surface_size()
    }

    /// Hand out the next per-frame draw slot, None once the frame is full
    pub fn next_draw_slot(&mut self) -> Option<u32> {
        if self.draws_this_frame >= self.settings.max_draws_per_frame {
            return None;
        }
        let slot = self.draws_this_frame;
        self.draws_this_frame += 1;
        Some(slot)
    }

    pub(crate) fn start_frame(&mut self) {
        self.bind_cache.reset();
        self.draws_this_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn bind_cache_skips_repeated_binds_until_reset() {
        let mut models: SlotMap<ModelHandle, ()> = SlotMap::with_key();
        let a = models.insert(());
        let b = models.insert(());

        let mut cache = BindCache::default();
        assert!(cache.bind_model(a));
        assert!(!cache.bind_model(a));
        assert!(cache.bind_model(b));
        cache.reset();
        assert!(cache.bind_model(b));
    }

    #[test]
    fn present_mode_names() {
        assert_eq!(PresentModePreference::parse("MAILBOX"), Some(PresentModePreference::Mailbox));
        assert_eq!(PresentModePreference::parse("vsync"), Some(PresentModePreference::Fifo));
        assert_eq!(PresentModePreference::parse("bogus"), None);
    }
}
