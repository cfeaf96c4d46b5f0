// Asset loading - paths per backend and decoders for the on-disk formats
//
// Mesh files: little-endian, magic "PMSH", version 5
//   [0..4)   magic
//   [4..8)   version (u32)
//   [8..40)  material name, NUL padded
//   [40..48) vertex count (u64)
//   [48..56) triangle count (u64)
//   then vertex_count * 48 bytes of Vertex, triangle_count * 12 bytes of u32x3
//
// Textures are PNG. Fonts are a PNG atlas plus an msdf-atlas-gen JSON index.

use crate::backend::RenderApi;
use crate::error::AssetError;
use crate::types::{FontData, Glyph, Mesh, TextureData, TextureFormat, Vertex};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MESH_MAGIC: &[u8; 4] = b"PMSH";
pub const MESH_VERSION: u32 = 5;
pub const MESH_HEADER_SIZE: usize = 56;
const MATERIAL_NAME_SIZE: usize = 32;

/// Resolves asset names to files under a root directory
#[derive(Debug, Clone)]
pub struct AssetPaths {
    root: PathBuf,
}

impl AssetPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the shaders a backend consumes
    pub fn shader_dir(&self, api: RenderApi) -> PathBuf {
        let dir = match api {
            RenderApi::ModernExplicit => "vulkan",
            RenderApi::LegacyExplicit => "spirv",
            RenderApi::FixedFunction => "glsl",
            RenderApi::SoftwareRasterizer => "software",
        };
        self.root.join("shaders").join(dir)
    }

    /// Vertex and fragment stage files for shader `name`
    pub fn shader(&self, api: RenderApi, name: &str) -> (PathBuf, PathBuf) {
        let (vertex, fragment) = match api {
            RenderApi::ModernExplicit => ("vert.spv", "frag.spv"),
            RenderApi::LegacyExplicit => ("vs.spv", "ps.spv"),
            RenderApi::FixedFunction => ("vs.glsl", "ps.glsl"),
            RenderApi::SoftwareRasterizer => ("vs", "ps"),
        };
        let dir = self.shader_dir(api);
        (
            dir.join(format!("{}.{}", name, vertex)),
            dir.join(format!("{}.{}", name, fragment)),
        )
    }

    pub fn model(&self, name: &str) -> PathBuf {
        self.root.join("models").join(format!("{}.pmdl", name))
    }

    pub fn texture(&self, name: &str) -> PathBuf {
        self.root.join("textures").join(format!("{}.png", name))
    }

    /// Atlas image and JSON index
    pub fn font(&self, name: &str) -> (PathBuf, PathBuf) {
        let dir = self.root.join("fonts");
        (dir.join(format!("{}.png", name)), dir.join(format!("{}.json", name)))
    }
}

/// Shader name a changed file belongs to: everything before the first '.'
pub fn shader_name(path: &Path) -> Option<String> {
    let file = path.file_name()?.to_str()?;
    let name = file.split('.').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Where the facade gets decoded assets from
pub trait AssetSource {
    fn load_mesh(&self, path: &Path) -> Result<Mesh, AssetError>;
    fn load_texture(&self, path: &Path) -> Result<TextureData, AssetError>;
    fn load_font(&self, atlas: &Path, index: &Path) -> Result<FontData, AssetError>;
}

/// Reads assets from the filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAssets;

fn read(path: &Path) -> Result<Vec<u8>, AssetError> {
    std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl AssetSource for FileAssets {
    fn load_mesh(&self, path: &Path) -> Result<Mesh, AssetError> {
        log::info!("Loading mesh {}", path.display());
        decode_mesh(&read(path)?).map_err(|reason| AssetError::decode(path, reason))
    }

    fn load_texture(&self, path: &Path) -> Result<TextureData, AssetError> {
        log::info!("Loading texture {}", path.display());
        decode_png(&read(path)?).map_err(|reason| AssetError::decode(path, reason))
    }

    fn load_font(&self, atlas: &Path, index: &Path) -> Result<FontData, AssetError> {
        log::info!("Loading font with atlas {} and index {}", atlas.display(), index.display());
        let atlas = self.load_texture(atlas)?;
        decode_font_index(&read(index)?, atlas).map_err(|reason| AssetError::decode(index, reason))
    }
}

pub fn decode_mesh(bytes: &[u8]) -> Result<Mesh, String> {
    if bytes.len() < MESH_HEADER_SIZE {
        return Err(format!(
            "mesh is {} bytes, shorter than its {} byte header",
            bytes.len(),
            MESH_HEADER_SIZE
        ));
    }
    if &bytes[0..4] != MESH_MAGIC {
        return Err("bad magic".to_string());
    }
    let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let u64_at = |at: usize| {
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(word)
    };

    let version = u32_at(4);
    if version != MESH_VERSION {
        return Err(format!("version {} is not {}", version, MESH_VERSION));
    }

    let material = &bytes[8..8 + MATERIAL_NAME_SIZE];
    let material_len = material.iter().position(|&b| b == 0).unwrap_or(MATERIAL_NAME_SIZE);
    let material = String::from_utf8_lossy(&material[..material_len]).into_owned();

    let vertex_count = u64_at(40) as usize;
    let triangle_count = u64_at(48) as usize;
    let vertex_bytes = vertex_count
        .checked_mul(std::mem::size_of::<Vertex>())
        .ok_or("vertex count overflows")?;
    let index_bytes = triangle_count.checked_mul(12).ok_or("index count overflows")?;
    let expected = vertex_bytes
        .checked_add(index_bytes)
        .and_then(|payload| payload.checked_add(MESH_HEADER_SIZE))
        .ok_or("mesh size overflows")?;
    if bytes.len() < expected {
        return Err(format!("truncated: {} bytes, expected {}", bytes.len(), expected));
    }

    let payload = &bytes[MESH_HEADER_SIZE..expected];
    let vertices: Vec<Vertex> = bytemuck::pod_collect_to_vec(&payload[..vertex_bytes]);
    let indices: Vec<[u32; 3]> = bytemuck::pod_collect_to_vec(&payload[vertex_bytes..]);
    Ok(Mesh::new(material, vertices, indices))
}

pub fn encode_mesh(mesh: &Mesh) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MESH_HEADER_SIZE + mesh.vertex_bytes().len() + mesh.index_bytes().len());
    bytes.extend_from_slice(MESH_MAGIC);
    bytes.extend_from_slice(&MESH_VERSION.to_le_bytes());
    let mut material = [0u8; MATERIAL_NAME_SIZE];
    // Always leave room for the terminator
    let len = mesh.material.len().min(MATERIAL_NAME_SIZE - 1);
    material[..len].copy_from_slice(&mesh.material.as_bytes()[..len]);
    bytes.extend_from_slice(&material);
    bytes.extend_from_slice(&(mesh.vertex_count() as u64).to_le_bytes());
    bytes.extend_from_slice(&(mesh.index_count() as u64).to_le_bytes());
    bytes.extend_from_slice(mesh.vertex_bytes());
    bytes.extend_from_slice(mesh.index_bytes());
    bytes
}

pub fn decode_png(bytes: &[u8]) -> Result<TextureData, String> {
    let image = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(TextureData::new(TextureFormat::Rgba8, width, height, rgba.into_raw()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtlasInfo {
    width: f32,
    height: f32,
    #[serde(default)]
    size: f32,
    #[serde(default = "default_y_origin")]
    y_origin: String,
}

fn default_y_origin() -> String {
    "bottom".to_string()
}

#[derive(Debug, Deserialize)]
struct Bounds {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlyphEntry {
    unicode: u32,
    #[serde(default)]
    advance: f32,
    plane_bounds: Option<Bounds>,
    atlas_bounds: Option<Bounds>,
}

#[derive(Debug, Deserialize)]
struct AtlasIndex {
    atlas: AtlasInfo,
    glyphs: Vec<GlyphEntry>,
}

/// Build glyph quads from an atlas index.
///
/// Plane bounds are in em units with y up from the baseline; quads are
/// emitted y down so the pixel-space projection draws them upright. Glyphs
/// without bounds (space) get an empty quad and keep their advance.
pub fn decode_font_index(json: &[u8], atlas: TextureData) -> Result<FontData, String> {
    let index: AtlasIndex = serde_json::from_slice(json).map_err(|e| e.to_string())?;
    let info = &index.atlas;
    if info.width <= 0.0 || info.height <= 0.0 {
        return Err(format!("invalid atlas size {}x{}", info.width, info.height));
    }
    let flip_v = info.y_origin == "bottom";
    let uv = |x: f32, y: f32| {
        let v = if flip_v { info.height - y } else { y };
        [x / info.width, v / info.height]
    };

    let mut glyphs = Vec::with_capacity(index.glyphs.len());
    for entry in &index.glyphs {
        let Some(character) = char::from_u32(entry.unicode) else {
            log::warn!("Skipping glyph with invalid code point {}", entry.unicode);
            continue;
        };

        let (corners, texture_coordinates) = match (&entry.plane_bounds, &entry.atlas_bounds) {
            (Some(plane), Some(bounds)) => (
                [
                    [plane.left, -plane.top, 0.0],
                    [plane.right, -plane.top, 0.0],
                    [plane.left, -plane.bottom, 0.0],
                    [plane.right, -plane.bottom, 0.0],
                ],
                [
                    uv(bounds.left, bounds.top),
                    uv(bounds.right, bounds.top),
                    uv(bounds.left, bounds.bottom),
                    uv(bounds.right, bounds.bottom),
                ],
            ),
            _ => ([[0.0; 3]; 4], [[0.0; 2]; 4]),
        };

        glyphs.push(Glyph {
            character,
            corners,
            texture_coordinates,
            advance: entry.advance,
        });
    }

    Ok(FontData {
        atlas,
        glyph_size: info.size as u32,
        glyphs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3, Vec4};
    use tempfile::tempdir;

    fn triangle() -> Mesh {
        let vertex = |x: f32, y: f32| Vertex::new(Vec3::new(x, y, 0.0), Vec4::ONE, Vec2::ZERO, Vec3::Z);
        Mesh::new(
            "brick",
            vec![vertex(0.0, -0.5), vertex(0.5, 0.5), vertex(-0.5, 0.5)],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn mesh_file_loads_from_disk() {
        let dir = tempdir().unwrap();
        let paths = AssetPaths::new(dir.path());
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(paths.model("tri"), encode_mesh(&triangle())).unwrap();

        let mesh = FileAssets.load_mesh(&paths.model("tri")).unwrap();
        assert_eq!(mesh, triangle());
        assert_eq!(mesh.material, "brick");
    }

    #[test]
    fn header_is_fifty_six_bytes() {
        let mesh = Mesh::new("m", vec![Vertex::default()], vec![]);
        assert_eq!(encode_mesh(&mesh).len(), MESH_HEADER_SIZE + 48);
    }

    #[test]
    fn bad_meshes_are_decode_errors() {
        let mut bytes = encode_mesh(&triangle());
        assert!(decode_mesh(&bytes[..20]).is_err());

        let truncated = &bytes[..bytes.len() - 4];
        assert!(decode_mesh(truncated).unwrap_err().contains("truncated"));

        bytes[4] = 4;
        assert!(decode_mesh(&bytes).unwrap_err().contains("version"));
        bytes[0] = b'X';
        assert_eq!(decode_mesh(&bytes).unwrap_err(), "bad magic");
    }

    #[test]
    fn huge_counts_are_decode_errors() {
        let mut bytes = vec![0u8; MESH_HEADER_SIZE];
        bytes[0..4].copy_from_slice(MESH_MAGIC);
        bytes[4..8].copy_from_slice(&MESH_VERSION.to_le_bytes());
        bytes[40..48].copy_from_slice(&(u64::MAX / 48).to_le_bytes());
        bytes[48..56].copy_from_slice(&(u64::MAX / 12).to_le_bytes());

        assert!(decode_mesh(&bytes).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = FileAssets.load_mesh(&dir.path().join("nope.pmdl")).unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }

    #[test]
    fn png_decodes_to_rgba() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbImage::from_pixel(3, 2, image::Rgb([255, 0, 0])).save(&path).unwrap();

        let texture = FileAssets.load_texture(&path).unwrap();
        assert_eq!((texture.width, texture.height), (3, 2));
        assert_eq!(texture.format, TextureFormat::Rgba8);
        assert_eq!(&texture.pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn atlas_index_builds_y_down_quads() {
        let json = br#"{
            "atlas": { "type": "msdf", "size": 32, "width": 64, "height": 64, "yOrigin": "bottom" },
            "glyphs": [
                { "unicode": 32, "advance": 0.25 },
                { "unicode": 65, "advance": 0.6,
                  "planeBounds": { "left": 0.0, "top": 0.75, "right": 0.5, "bottom": -0.25 },
                  "atlasBounds": { "left": 0, "top": 64, "right": 32, "bottom": 32 } }
            ]
        }"#;
        let atlas = TextureData::new(TextureFormat::Rgba8, 1, 1, vec![0; 4]);
        let font = decode_font_index(json, atlas).unwrap();

        assert_eq!(font.glyph_size, 32);
        assert_eq!(font.glyph_index(' '), Some(0));
        assert_eq!(font.glyphs[0].corners, [[0.0; 3]; 4]);
        assert_eq!(font.glyphs[0].advance, 0.25);

        let a = &font.glyphs[font.glyph_index('A').unwrap()];
        assert_eq!(a.corners[0], [0.0, -0.75, 0.0]);
        assert_eq!(a.corners[3], [0.5, 0.25, 0.0]);
        assert_eq!(a.texture_coordinates[0], [0.0, 0.0]);
        assert_eq!(a.texture_coordinates[3], [0.5, 0.5]);
    }

    #[test]
    fn shader_paths_follow_backend() {
        let paths = AssetPaths::new("assets");
        let (vs, fs) = paths.shader(RenderApi::ModernExplicit, "mesh");
        assert!(vs.ends_with("shaders/vulkan/mesh.vert.spv"));
        assert!(fs.ends_with("shaders/vulkan/mesh.frag.spv"));
        let (vs, _) = paths.shader(RenderApi::FixedFunction, "font");
        assert!(vs.ends_with("shaders/glsl/font.vs.glsl"));
        assert_eq!(shader_name(Path::new("a/b/font.ps.glsl")), Some("font".to_string()));
    }
}
