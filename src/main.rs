// =============================================================================
// RENDER CORE DEMO - a spinning triangle through whichever backend comes up
// =============================================================================
//
// FRAME FLOW:
// 1. begin_commands (fence wait, acquire, recreate on resize)
// 2. draw_model for the triangle, draw_text for the overlay
// 3. present_frame (submit, present, advance the frame slot)
//
// F11 toggles fullscreen, Escape quits.
//
// =============================================================================

use anyhow::Result;
use glam::{Mat4, Vec2, Vec3, Vec4};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use render_core::assets::AssetPaths;
use render_core::config::Config;
use render_core::renderer::TextOptions;
use render_core::{GlobalUniforms, ModelUniforms, Platform, Renderer, ShaderType, Vertex};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting render-core demo");
    log::info!(
        "Window: {}x{} ({}), backend preference: {}",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" },
        config.graphics.backend
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging with optional file output
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Render Core Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }
    builder.init();
}

// =============================================================================
// PLATFORM
// =============================================================================

/// Platform backed by a winit window
struct WindowPlatform {
    window: Arc<Window>,
}

impl Platform for WindowPlatform {
    fn surface_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn window_handles(&self) -> Option<(RawDisplayHandle, RawWindowHandle)> {
        let display = self.window.display_handle().ok()?.as_raw();
        let window = self.window.window_handle().ok()?.as_raw();
        Some((display, window))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    /// Dropped before the window so the backend releases its surface first
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    started: Instant,
    frame_count: u32,
    fps: f32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            started: now,
            frame_count: 0,
            fps: 0.0,
            last_fps_update: now,
        }
    }

    fn init_renderer(&mut self, window: Arc<Window>) {
        let platform = Arc::new(WindowPlatform { window });
        let paths = AssetPaths::new(self.config.assets.root.clone());
        let mut renderer = Renderer::initialize(self.config.to_settings(), platform, paths);
        log::info!("Rendering with {} on {}", renderer.api_name(), renderer.device_name());

        for (name, shader_type) in [("mesh", ShaderType::Mesh), ("font", ShaderType::Font)] {
            if let Err(e) = renderer.load_shader(name, shader_type) {
                log::warn!("Shader {} unavailable: {}", name, e);
            }
        }
        if let Err(e) = renderer.load_font("default") {
            log::info!("No overlay font: {}", e);
        }
        if self.config.debug.hot_reload_shaders {
            if let Err(e) = renderer.enable_hot_reload() {
                log::warn!("Shader hot reload disabled: {:#}", e);
            }
        }

        let triangle = vec![
            Vertex::new(Vec3::new(0.0, -0.5, 0.0), Vec4::new(1.0, 0.0, 0.0, 1.0), Vec2::new(0.5, 0.0), Vec3::Z),
            Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec4::new(0.0, 1.0, 0.0, 1.0), Vec2::new(1.0, 1.0), Vec3::Z),
            Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec4::new(0.0, 0.0, 1.0, 1.0), Vec2::new(0.0, 1.0), Vec3::Z),
        ];
        if let Err(e) = renderer.create_model("triangle", "", triangle, Vec::new()) {
            log::error!("Failed to create triangle: {}", e);
        }

        self.renderer = Some(renderer);
    }

    fn render_frame(&mut self) -> bool {
        let Some(renderer) = self.renderer.as_mut() else {
            return false;
        };
        if !renderer.begin_commands(&GlobalUniforms::default()) {
            return false;
        }

        let angle = self.started.elapsed().as_secs_f32();
        renderer.draw_model(
            "triangle",
            &ModelUniforms {
                model: Mat4::from_rotation_z(angle),
            },
        );
        if self.config.debug.show_fps {
            let options = TextOptions {
                position: Vec2::new(8.0, 8.0),
                scale: 24.0,
                ..Default::default()
            };
            let overlay = format!("{} {:.0} fps", renderer.api_name(), self.fps);
            renderer.draw_text("default", &options, &overlay);
        }

        renderer.present_frame();
        true
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed < 1.0 {
            return;
        }
        self.fps = self.frame_count as f32 / elapsed;
        self.frame_count = 0;
        self.last_fps_update = now;

        if let (true, Some(window), Some(renderer)) = (self.config.debug.show_fps, &self.window, &self.renderer) {
            window.set_title(&format!(
                "{} - {:.0} FPS [{}]",
                self.config.window.title,
                self.fps,
                renderer.api_name()
            ));
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        self.init_renderer(window.clone());
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // The backends compare the surface size against their swapchain
            // at the start of every frame
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }

            WindowEvent::RedrawRequested => {
                if self.render_frame() {
                    self.update_fps();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            log::info!("Rendered {} frames", renderer.rendered_frames());
            renderer.shutdown();
        }
        log::info!("Cleanup complete");
    }
}
