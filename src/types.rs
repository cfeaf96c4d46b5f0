// Engine data model shared by every backend
//
// Plain-old-data layouts here are uploaded byte-for-byte, so every GPU-facing
// struct is #[repr(C)] + bytemuck::Pod.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::borrow::Cow;

/// Default number of frame slots in flight
pub const FRAMES_IN_FLIGHT: usize = 3;

/// Vertices per glyph quad
pub const GLYPH_VERTEX_COUNT: usize = 4;

/// Index pattern shared by every glyph quad (two triangles)
pub const GLYPH_INDICES: [u32; 6] = [0, 1, 2, 1, 2, 3];

/// Mesh vertex (48 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub colour: [f32; 4],
    pub texture_coordinate: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex {
    pub fn new(position: Vec3, colour: Vec4, texture_coordinate: Vec2, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            colour: colour.to_array(),
            texture_coordinate: texture_coordinate.to_array(),
            normal: normal.to_array(),
        }
    }
}

/// Mesh as handed over by the asset layer.
///
/// Indices are stored as triangles; a mesh with no indices is drawn
/// non-indexed using its vertex count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub material: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(material: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<[u32; 3]>) -> Self {
        Self {
            material: material.into(),
            vertices,
            indices,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Triangle count
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    /// Number of vertices the draw call consumes
    pub fn draw_count(&self) -> u32 {
        if self.is_indexed() {
            (self.indices.len() * 3) as u32
        } else {
            self.vertices.len() as u32
        }
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Checks the invariants every backend relies on before uploading
    pub fn validate(&self) -> Result<(), String> {
        if self.vertices.is_empty() {
            return Err("mesh has no vertices".to_string());
        }
        let count = self.vertices.len() as u32;
        if let Some(bad) = self.indices.iter().flatten().find(|&&i| i >= count) {
            return Err(format!("index {} out of range for {} vertices", bad, count));
        }
        Ok(())
    }
}

/// Pixel formats understood by the backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Depth,
    Rgba8,
    Rgb8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Depth => 4,
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgb8 => 3,
        }
    }
}

/// Decoded texture pixels
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn new(format: TextureFormat, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            format,
            width,
            height,
            pixels,
        }
    }

    /// Bytes per row
    pub fn pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("invalid size {}x{}", self.width, self.height));
        }
        if self.format == TextureFormat::Depth {
            return Err("depth textures cannot be sampled".to_string());
        }
        let expected = self.pitch() * self.height as usize;
        if self.pixels.len() != expected {
            return Err(format!(
                "expected {} bytes of pixel data, got {}",
                expected,
                self.pixels.len()
            ));
        }
        Ok(())
    }

    /// Pixels as tightly packed RGBA8. RGB8 has no native GPU format on most
    /// devices, so it is expanded with an opaque alpha channel.
    pub fn to_rgba8(&self) -> Cow<'_, [u8]> {
        match self.format {
            TextureFormat::Rgb8 => Cow::Owned(
                self.pixels
                    .chunks_exact(3)
                    .flat_map(|p| [p[0], p[1], p[2], 0xFF])
                    .collect(),
            ),
            _ => Cow::Borrowed(&self.pixels),
        }
    }
}

/// Shader kind, decides the vertex layout and blend state of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderType {
    #[default]
    Mesh,
    Font,
    Ui,
    PostProcess,
}

impl ShaderType {
    /// Shaders that consume glyph quads instead of mesh vertices
    pub fn uses_glyph_vertices(self) -> bool {
        matches!(self, ShaderType::Font | ShaderType::Ui)
    }

    pub fn blends(self) -> bool {
        matches!(self, ShaderType::Font | ShaderType::Ui)
    }
}

/// Per-frame uniform data (camera)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUniforms {
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for GlobalUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Per-object uniform data for models
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelUniforms {
    pub model: Mat4,
}

impl Default for ModelUniforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
        }
    }
}

/// Per-glyph uniform data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FontUniforms {
    pub transform: Mat4,
    pub colour: Vec4,
}

impl FontUniforms {
    /// Place a glyph at `position` (pixels, y down) scaled by `scale`
    pub fn new(projection: Mat4, position: Vec2, scale: f32, colour: Vec4) -> Self {
        Self {
            transform: projection
                * Mat4::from_translation(position.extend(0.0))
                * Mat4::from_scale(Vec3::splat(scale)),
            colour,
        }
    }

    /// Pixel-space projection for a surface, (0, 0) at the top-left
    pub fn screen_projection(width: u32, height: u32) -> Mat4 {
        Mat4::orthographic_rh(0.0, width.max(1) as f32, 0.0, height.max(1) as f32, -1.0, 1.0)
    }
}

/// Glyph quad vertex (20 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GlyphVertex {
    pub position: [f32; 3],
    pub texture_coordinate: [f32; 2],
}

/// Byte stride of one glyph in a font's vertex buffer
pub const GLYPH_STRIDE: usize = GLYPH_VERTEX_COUNT * std::mem::size_of::<GlyphVertex>();

/// One character of a font atlas.
///
/// Corners are ordered top-left, top-right, bottom-left, bottom-right so that
/// GLYPH_INDICES produces two triangles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub character: char,
    pub corners: [[f32; 3]; 4],
    pub texture_coordinates: [[f32; 2]; 4],
    pub advance: f32,
}

impl Glyph {
    pub fn vertices(&self) -> [GlyphVertex; GLYPH_VERTEX_COUNT] {
        std::array::from_fn(|i| GlyphVertex {
            position: self.corners[i],
            texture_coordinate: self.texture_coordinates[i],
        })
    }
}

/// Decoded font: atlas pixels plus glyph geometry
#[derive(Debug, Clone, PartialEq)]
pub struct FontData {
    pub atlas: TextureData,
    pub glyph_size: u32,
    pub glyphs: Vec<Glyph>,
}

impl FontData {
    pub fn glyph_index(&self, character: char) -> Option<usize> {
        self.glyphs.iter().position(|g| g.character == character)
    }

    /// All glyph quads packed back to back, GLYPH_STRIDE bytes per glyph
    pub fn vertex_data(&self) -> Vec<GlyphVertex> {
        self.glyphs.iter().flat_map(|g| g.vertices()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layouts_have_expected_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        assert_eq!(std::mem::size_of::<GlyphVertex>(), 20);
        assert_eq!(GLYPH_STRIDE, 80);
        assert_eq!(std::mem::size_of::<GlobalUniforms>(), 128);
        assert_eq!(std::mem::size_of::<ModelUniforms>(), 64);
        assert_eq!(std::mem::size_of::<FontUniforms>(), 80);
    }

    #[test]
    fn draw_count_falls_back_to_vertices() {
        let mut mesh = Mesh::new("m", vec![Vertex::default(); 3], vec![]);
        assert_eq!(mesh.draw_count(), 3);
        mesh.indices.push([0, 1, 2]);
        mesh.indices.push([2, 1, 0]);
        assert_eq!(mesh.draw_count(), 6);
    }

    #[test]
    fn validate_rejects_out_of_range_indices() {
        let mesh = Mesh::new("m", vec![Vertex::default(); 3], vec![[0, 1, 3]]);
        assert!(mesh.validate().is_err());
        assert!(Mesh::default().validate().is_err());
    }

    #[test]
    fn rgb_textures_expand_to_rgba() {
        let texture = TextureData::new(TextureFormat::Rgb8, 2, 1, vec![1, 2, 3, 4, 5, 6]);
        assert!(texture.validate().is_ok());
        assert_eq!(&*texture.to_rgba8(), &[1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn texture_size_mismatch_is_rejected() {
        let texture = TextureData::new(TextureFormat::Rgba8, 2, 2, vec![0; 15]);
        assert!(texture.validate().is_err());
    }
}
