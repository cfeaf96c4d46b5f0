// Facade tests on the software rasterizer with a headless platform

use glam::{Mat4, Vec2, Vec3, Vec4};
use render_core::assets::{encode_mesh, AssetPaths};
use render_core::renderer::TextOptions;
use render_core::{
    AssetError, FontData, GlobalUniforms, Glyph, HeadlessPlatform, Mesh, ModelUniforms,
    RenderApi, RenderSettings, Renderer, ShaderType, TextureData, TextureFormat, Vertex,
};
use std::sync::Arc;
use tempfile::tempdir;

const CLEAR: u32 = 0xFF000000;
const RED: u32 = 0xFFFF0000;

fn settings() -> RenderSettings {
    RenderSettings {
        backend: "software".to_string(),
        frames_in_flight: 3,
        clear_colour: [0.0, 0.0, 0.0, 1.0],
        ..Default::default()
    }
}

fn renderer_at(root: &std::path::Path) -> (Renderer, Arc<HeadlessPlatform>) {
    let platform = Arc::new(HeadlessPlatform::new(16, 16).panic_on_fatal());
    let renderer = Renderer::initialize(settings(), platform.clone(), AssetPaths::new(root));
    (renderer, platform)
}

fn renderer() -> (Renderer, Arc<HeadlessPlatform>) {
    renderer_at(std::path::Path::new("."))
}

fn red_triangle(material: &str) -> Mesh {
    let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
    Mesh::new(
        material,
        vec![
            Vertex::new(Vec3::new(-1.0, -1.0, 0.5), red, Vec2::ZERO, Vec3::Z),
            Vertex::new(Vec3::new(3.0, -1.0, 0.5), red, Vec2::ZERO, Vec3::Z),
            Vertex::new(Vec3::new(-1.0, 3.0, 0.5), red, Vec2::ZERO, Vec3::Z),
        ],
        vec![],
    )
}

fn mesh_shader(renderer: &mut Renderer) {
    renderer
        .create_shader("mesh", b"mesh", b"vertex_colour", ShaderType::Mesh)
        .unwrap();
}

fn one_glyph_font() -> FontData {
    FontData {
        atlas: TextureData::new(TextureFormat::Rgba8, 2, 2, vec![255; 16]),
        glyph_size: 32,
        glyphs: vec![Glyph {
            character: 'A',
            corners: [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [0.0, 1.0, 0.0], [0.5, 1.0, 0.0]],
            texture_coordinates: [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            advance: 0.5,
        }],
    }
}

#[test]
fn software_backend_is_selected() {
    let (renderer, _) = renderer();
    assert_eq!(renderer.api(), RenderApi::SoftwareRasterizer);
    assert_eq!(renderer.api_name(), "Software");
    assert!(!renderer.device_name().is_empty());
}

#[test]
fn ten_frames_cycle_the_frame_index_then_destroy_cleanly() {
    let (mut renderer, platform) = renderer();
    mesh_shader(&mut renderer);
    renderer.use_mesh("tri", &red_triangle("")).unwrap();
    assert_eq!(renderer.model("tri").map(|m| (m.vertex_count, m.index_count)), Some((3, 0)));

    let mut indices = Vec::new();
    for _ in 0..10 {
        assert!(renderer.begin_commands(&GlobalUniforms::default()));
        indices.push(renderer.frame_index());
        renderer.draw_model("tri", &ModelUniforms::default());
        renderer.present_frame();
    }

    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(renderer.rendered_frames(), 10);
    assert_eq!(platform.presented_frames(), 10);

    renderer.destroy_model("tri");
    assert!(renderer.model("tri").is_none());
    renderer.shutdown();
}

#[test]
fn drawn_model_fills_the_frame() {
    let (mut renderer, platform) = renderer();
    mesh_shader(&mut renderer);
    renderer.use_mesh("tri", &red_triangle("")).unwrap();

    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("tri", &ModelUniforms::default());
    renderer.present_frame();

    let frame = platform.last_frame().unwrap();
    assert_eq!((frame.width, frame.height), (16, 16));
    assert!(frame.pixels.iter().all(|&p| p == RED));
}

#[test]
fn draws_outside_a_frame_are_ignored() {
    let (mut renderer, platform) = renderer();
    mesh_shader(&mut renderer);
    renderer.use_mesh("tri", &red_triangle("")).unwrap();

    renderer.draw_model("tri", &ModelUniforms::default());
    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.present_frame();

    let frame = platform.last_frame().unwrap();
    assert!(frame.pixels.iter().all(|&p| p == CLEAR));
}

#[test]
fn destroying_a_missing_model_changes_nothing() {
    let (mut renderer, _) = renderer();
    renderer.use_mesh("tri", &red_triangle("")).unwrap();
    let before = renderer.model_count();

    renderer.destroy_model("missing");
    assert_eq!(renderer.model_count(), before);
    assert!(renderer.model("tri").is_some());
}

#[test]
fn empty_shader_is_refused_and_not_registered() {
    let (mut renderer, _) = renderer();
    let result = renderer.create_shader("empty", b"", b"", ShaderType::Mesh);
    assert!(matches!(result, Err(AssetError::EmptyShader(_))));
    assert!(renderer.shader("empty").is_none());

    let result = renderer.create_shader("half", b"mesh", b"", ShaderType::Mesh);
    assert!(matches!(result, Err(AssetError::EmptyShader(_))));
    assert!(renderer.shader("half").is_none());
}

#[test]
fn rejected_shader_is_registered_without_a_handle() {
    let (mut renderer, _) = renderer();
    let result = renderer.create_shader("bogus", b"nonsense", b"vertex_colour", ShaderType::Mesh);
    assert!(matches!(result, Err(AssetError::ShaderRejected(_))));
    assert!(renderer.shader("bogus").is_some_and(|s| s.handle.is_none()));
}

#[test]
fn rejected_rebuild_keeps_the_previous_shader() {
    let (mut renderer, platform) = renderer();
    mesh_shader(&mut renderer);
    renderer.use_mesh("tri", &red_triangle("")).unwrap();

    let result = renderer.create_shader("mesh", b"nonsense", b"vertex_colour", ShaderType::Mesh);
    assert!(matches!(result, Err(AssetError::ShaderRejected(_))));
    assert!(renderer.shader("mesh").is_some_and(|s| s.handle.is_some()));

    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("tri", &ModelUniforms::default());
    renderer.present_frame();

    let frame = platform.last_frame().unwrap();
    assert!(frame.pixels.iter().all(|&p| p == RED));
}

#[test]
fn invalid_mesh_is_not_registered() {
    let (mut renderer, _) = renderer();
    let mut mesh = red_triangle("");
    mesh.indices = vec![[0, 1, 7]];
    assert!(matches!(
        renderer.use_mesh("broken", &mesh),
        Err(AssetError::InvalidMesh { .. })
    ));
    assert!(renderer.model("broken").is_none());
}

#[test]
fn model_destroyed_mid_frame_still_renders() {
    let (mut renderer, platform) = renderer();
    mesh_shader(&mut renderer);
    renderer.use_mesh("tri", &red_triangle("")).unwrap();

    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("tri", &ModelUniforms::default());
    renderer.destroy_model("tri");
    assert!(renderer.model("tri").is_none());
    renderer.present_frame();

    let frame = platform.last_frame().unwrap();
    assert!(frame.pixels.iter().all(|&p| p == RED));

    // Cycle past the slot that held the release
    for _ in 0..4 {
        assert!(renderer.begin_commands(&GlobalUniforms::default()));
        renderer.draw_model("tri", &ModelUniforms::default());
        renderer.present_frame();
    }
    let frame = platform.last_frame().unwrap();
    assert!(frame.pixels.iter().all(|&p| p == CLEAR));

    renderer.use_mesh("tri", &red_triangle("")).unwrap();
    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("tri", &ModelUniforms::default());
    renderer.present_frame();
    assert!(platform.last_frame().unwrap().pixels.iter().all(|&p| p == RED));
    renderer.shutdown();
}

#[test]
fn texture_destroyed_mid_frame_still_renders() {
    let (mut renderer, platform) = renderer();
    renderer
        .create_shader("lit", b"mesh", b"textured", ShaderType::Mesh)
        .unwrap();
    renderer
        .create_texture("green", TextureFormat::Rgba8, 2, 2, [0u8, 255, 0, 255].repeat(4))
        .unwrap();
    renderer.add_material("grass", "lit", Some("green"));
    let mut mesh = red_triangle("grass");
    for vertex in &mut mesh.vertices {
        vertex.colour = [1.0; 4];
    }
    renderer.use_mesh("tri", &mesh).unwrap();

    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("tri", &ModelUniforms::default());
    renderer.destroy_texture("green");
    renderer.present_frame();

    let frame = platform.last_frame().unwrap();
    assert!(frame.pixels.iter().all(|&p| p == 0xFF00FF00));

    for _ in 0..4 {
        assert!(renderer.begin_commands(&GlobalUniforms::default()));
        renderer.present_frame();
    }
    renderer.shutdown();
}

#[test]
fn replacing_a_model_keeps_one_record() {
    let (mut renderer, _) = renderer();
    renderer.use_mesh("tri", &red_triangle("")).unwrap();
    let first = renderer.model("tri").unwrap().handle;
    renderer.use_mesh("tri", &red_triangle("other")).unwrap();

    let model = renderer.model("tri").unwrap();
    assert_ne!(model.handle, first);
    assert_eq!(model.material, "other");
    assert_eq!(renderer.model_count(), 1);
}

#[test]
fn material_selects_shader_and_texture() {
    let (mut renderer, platform) = renderer();
    renderer
        .create_shader("lit", b"mesh", b"textured", ShaderType::Mesh)
        .unwrap();
    let green = [0u8, 255, 0, 255].repeat(4);
    renderer
        .create_texture("green", TextureFormat::Rgba8, 2, 2, green)
        .unwrap();
    renderer.add_material("grass", "lit", Some("green"));
    assert_eq!(renderer.material("grass").map(|m| m.shader.as_str()), Some("lit"));

    // White vertices so the texture decides the colour
    let mut mesh = red_triangle("grass");
    for vertex in &mut mesh.vertices {
        vertex.colour = [1.0; 4];
    }
    renderer.use_mesh("field", &mesh).unwrap();

    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("field", &ModelUniforms::default());
    renderer.present_frame();
    let frame = platform.last_frame().unwrap();
    assert!(frame.pixels.iter().all(|&p| p == 0xFF00FF00));

    renderer.delete_material("grass");
    assert!(renderer.material("grass").is_none());
    renderer.delete_material("grass");
}

#[test]
fn model_without_shader_is_skipped() {
    let (mut renderer, platform) = renderer();
    renderer.use_mesh("tri", &red_triangle("")).unwrap();

    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("tri", &ModelUniforms::default());
    renderer.present_frame();
    assert!(platform.last_frame().unwrap().pixels.iter().all(|&p| p == CLEAR));
}

#[test]
fn moved_model_uses_its_uniforms() {
    let (mut renderer, platform) = renderer();
    mesh_shader(&mut renderer);
    renderer.use_mesh("tri", &red_triangle("")).unwrap();

    // Pushed fully off screen
    let uniforms = ModelUniforms {
        model: Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
    };
    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("tri", &uniforms);
    renderer.present_frame();
    assert!(platform.last_frame().unwrap().pixels.iter().all(|&p| p == CLEAR));
}

#[test]
fn minimized_window_skips_frames() {
    let (mut renderer, platform) = renderer();
    platform.set_size(0, 0);
    assert!(!renderer.begin_commands(&GlobalUniforms::default()));
    assert!(!renderer.in_frame());
    renderer.present_frame();
    assert_eq!(renderer.rendered_frames(), 0);

    platform.set_size(32, 8);
    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.present_frame();
    let frame = platform.last_frame().unwrap();
    assert_eq!((frame.width, frame.height), (32, 8));
}

#[test]
fn textures_are_validated() {
    let (mut renderer, _) = renderer();
    let result = renderer.create_texture("short", TextureFormat::Rgba8, 4, 4, vec![0; 3]);
    assert!(matches!(result, Err(AssetError::InvalidTexture { .. })));
    assert!(renderer.texture("short").is_none());

    let texture = renderer
        .create_texture("rgb", TextureFormat::Rgb8, 1, 2, vec![1, 2, 3, 4, 5, 6])
        .unwrap();
    assert_eq!((texture.width, texture.height), (1, 2));
    renderer.destroy_texture("rgb");
    renderer.destroy_texture("rgb");
    assert!(renderer.texture("rgb").is_none());
}

#[test]
fn font_without_glyphs_is_refused() {
    let (mut renderer, _) = renderer();
    let mut font = one_glyph_font();
    font.glyphs.clear();

    assert!(matches!(
        renderer.use_font("empty", &font),
        Err(AssetError::InvalidFont { .. })
    ));
    assert!(renderer.font("empty").is_none());
}

#[test]
fn characters_advance_by_scaled_width() {
    let (mut renderer, _) = renderer();
    renderer
        .create_shader("font", b"glyph", b"glyph", ShaderType::Font)
        .unwrap();
    renderer.use_font("ui", &one_glyph_font()).unwrap();
    assert_eq!(renderer.font("ui").map(|f| f.glyph_size), Some(32));

    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    let white = Vec4::ONE;
    assert_eq!(renderer.draw_character("ui", 8.0, white, Vec2::ZERO, 'A'), 4.0);
    assert_eq!(renderer.draw_character("ui", 8.0, white, Vec2::ZERO, 'Z'), 0.0);
    assert_eq!(renderer.draw_character("missing", 8.0, white, Vec2::ZERO, 'A'), 0.0);

    let options = TextOptions {
        scale: 8.0,
        ..Default::default()
    };
    assert_eq!(renderer.draw_text("ui", &options, "AA\nA"), 8.0);
    renderer.present_frame();

    renderer.destroy_font("ui");
    assert!(renderer.font("ui").is_none());
}

#[test]
fn model_loads_from_the_asset_root() {
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("models")).unwrap();
    std::fs::write(
        dir.path().join("models/tri.pmdl"),
        encode_mesh(&red_triangle("stone")),
    )
    .unwrap();

    let (mut renderer, _) = renderer_at(dir.path());
    let model = renderer.load_model("tri", 2).unwrap();
    assert_eq!(model.name, "tri-2");
    assert_eq!(model.material, "stone");

    assert!(matches!(
        renderer.load_model("absent", 0),
        Err(AssetError::Io { .. })
    ));
}

#[test]
fn shader_loads_from_the_backend_directory() {
    let dir = tempdir().unwrap();
    let shaders = dir.path().join("shaders/software");
    std::fs::create_dir_all(&shaders).unwrap();
    std::fs::write(shaders.join("mesh.vs"), "mesh\n").unwrap();
    std::fs::write(shaders.join("mesh.ps"), "vertex_colour\n").unwrap();

    let (mut renderer, _) = renderer_at(dir.path());
    let shader = renderer.load_shader("mesh", ShaderType::Mesh).unwrap();
    assert!(shader.handle.is_some());
    assert!(matches!(
        renderer.load_shader("font", ShaderType::Font),
        Err(AssetError::Io { .. })
    ));
}

#[test]
fn shutdown_is_idempotent() {
    let (mut renderer, _) = renderer();
    mesh_shader(&mut renderer);
    renderer.use_mesh("tri", &red_triangle("")).unwrap();
    assert!(renderer.begin_commands(&GlobalUniforms::default()));
    renderer.draw_model("tri", &ModelUniforms::default());

    renderer.shutdown();
    assert!(!renderer.in_frame());
    renderer.shutdown();
    assert!(!renderer.begin_commands(&GlobalUniforms::default()));
}
