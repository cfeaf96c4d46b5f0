// Triangle rasterizer
//
// Clip space follows the Vulkan convention: y points down, depth runs 0..1.
// Coverage uses edge functions sampled at pixel centres; attributes are
// interpolated perspective-correctly.

use super::memory::HostImage;
use glam::{Vec2, Vec3, Vec3Swizzles, Vec4, Vec4Swizzles};

/// Triangles with a vertex this close to (or behind) the eye are dropped
const NEAR_W: f32 = 1e-5;

pub struct Target<'a> {
    pub width: u32,
    pub height: u32,
    pub colour: &'a mut [u32],
    pub depth: &'a mut [f32],
}

impl Target<'_> {
    pub fn clear(&mut self, colour: [f32; 4]) {
        self.colour.fill(pack_colour(Vec4::from_array(colour)));
        self.depth.fill(1.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterVertex {
    pub clip: Vec4,
    pub colour: Vec4,
    pub uv: Vec2,
}

/// Fragment stage
pub enum Fragment<'a> {
    VertexColour,
    Textured(&'a HostImage),
    /// Coverage from the atlas alpha, tinted by a flat colour
    Glyph { atlas: &'a HostImage, colour: Vec4 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub blend: bool,
}

impl RasterState {
    pub const OPAQUE: RasterState = RasterState {
        depth_test: true,
        depth_write: true,
        blend: false,
    };

    pub const OVERLAY: RasterState = RasterState {
        depth_test: false,
        depth_write: false,
        blend: true,
    };
}

/// 0xAARRGGBB
pub fn pack_colour(colour: Vec4) -> u32 {
    let c = (colour.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    ((c.w as u32) << 24) | ((c.x as u32) << 16) | ((c.y as u32) << 8) | (c.z as u32)
}

pub fn unpack_colour(packed: u32) -> Vec4 {
    Vec4::new(
        ((packed >> 16) & 0xFF) as f32,
        ((packed >> 8) & 0xFF) as f32,
        (packed & 0xFF) as f32,
        (packed >> 24) as f32,
    ) / 255.0
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Rasterize one triangle, returning the number of pixels written
pub fn draw_triangle(
    target: &mut Target<'_>,
    vertices: [RasterVertex; 3],
    fragment: &Fragment<'_>,
    state: RasterState,
) -> usize {
    if vertices.iter().any(|v| v.clip.w <= NEAR_W) {
        return 0;
    }

    let (width, height) = (target.width as f32, target.height as f32);
    let screen: [Vec3; 3] = vertices.map(|v| {
        let ndc = v.clip.xyz() / v.clip.w;
        Vec3::new((ndc.x * 0.5 + 0.5) * width, (ndc.y * 0.5 + 0.5) * height, ndc.z)
    });
    let inv_w = vertices.map(|v| 1.0 / v.clip.w);
    let [s0, s1, s2] = screen.map(|s| s.xy());

    let area = edge(s0, s1, s2);
    if area.abs() <= f32::EPSILON {
        return 0;
    }

    let min = s0.min(s1).min(s2).floor().max(Vec2::ZERO);
    let max = s0.max(s1).max(s2).ceil().min(Vec2::new(width - 1.0, height - 1.0));
    if min.x > max.x || min.y > max.y {
        return 0;
    }

    let mut written = 0;
    for y in min.y as u32..=max.y as u32 {
        for x in min.x as u32..=max.x as u32 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            // Dividing by the signed area accepts both windings
            let b = Vec3::new(edge(s1, s2, p), edge(s2, s0, p), edge(s0, s1, p)) / area;
            if b.x < 0.0 || b.y < 0.0 || b.z < 0.0 {
                continue;
            }

            let z = b.x * screen[0].z + b.y * screen[1].z + b.z * screen[2].z;
            if !(0.0..=1.0).contains(&z) {
                continue;
            }

            let index = (y * target.width + x) as usize;
            if state.depth_test && z >= target.depth[index] {
                continue;
            }

            let persp = Vec3::new(b.x * inv_w[0], b.y * inv_w[1], b.z * inv_w[2]);
            let persp = persp / (persp.x + persp.y + persp.z);
            let colour = vertices[0].colour * persp.x
                + vertices[1].colour * persp.y
                + vertices[2].colour * persp.z;
            let uv = vertices[0].uv * persp.x + vertices[1].uv * persp.y + vertices[2].uv * persp.z;

            let source = match fragment {
                Fragment::VertexColour => colour,
                Fragment::Textured(image) => colour * image.sample(uv),
                Fragment::Glyph { atlas, colour } => {
                    let coverage = atlas.sample(uv).w;
                    colour.xyz().extend(colour.w * coverage)
                }
            };

            let out = if state.blend {
                let destination = unpack_colour(target.colour[index]);
                let alpha = source.w;
                (source.xyz() * alpha + destination.xyz() * (1.0 - alpha))
                    .extend(alpha + destination.w * (1.0 - alpha))
            } else {
                source
            };

            target.colour[index] = pack_colour(out);
            if state.depth_write {
                target.depth[index] = z;
            }
            written += 1;
        }
    }

    written
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u32 = 16;

    fn buffers() -> (Vec<u32>, Vec<f32>) {
        (vec![0; (SIZE * SIZE) as usize], vec![1.0; (SIZE * SIZE) as usize])
    }

    fn vertex(x: f32, y: f32, z: f32, colour: Vec4) -> RasterVertex {
        RasterVertex {
            clip: Vec4::new(x, y, z, 1.0),
            colour,
            uv: Vec2::ZERO,
        }
    }

    fn fullscreen(z: f32, colour: Vec4) -> [RasterVertex; 3] {
        [
            vertex(-1.0, -1.0, z, colour),
            vertex(3.0, -1.0, z, colour),
            vertex(-1.0, 3.0, z, colour),
        ]
    }

    #[test]
    fn fullscreen_triangle_covers_every_pixel() {
        let (mut colour, mut depth) = buffers();
        let mut target = Target {
            width: SIZE,
            height: SIZE,
            colour: &mut colour,
            depth: &mut depth,
        };
        let written = draw_triangle(
            &mut target,
            fullscreen(0.5, Vec4::new(1.0, 0.0, 0.0, 1.0)),
            &Fragment::VertexColour,
            RasterState::OPAQUE,
        );
        assert_eq!(written, (SIZE * SIZE) as usize);
        assert!(colour.iter().all(|&c| c == 0xFFFF0000));
    }

    #[test]
    fn depth_test_keeps_nearest_surface() {
        let (mut colour, mut depth) = buffers();
        let mut target = Target {
            width: SIZE,
            height: SIZE,
            colour: &mut colour,
            depth: &mut depth,
        };
        let green = Vec4::new(0.0, 1.0, 0.0, 1.0);
        let blue = Vec4::new(0.0, 0.0, 1.0, 1.0);
        draw_triangle(&mut target, fullscreen(0.2, green), &Fragment::VertexColour, RasterState::OPAQUE);
        let written = draw_triangle(&mut target, fullscreen(0.8, blue), &Fragment::VertexColour, RasterState::OPAQUE);
        assert_eq!(written, 0);
        assert!(colour.iter().all(|&c| c == pack_colour(green)));
    }

    #[test]
    fn triangles_behind_the_eye_are_dropped() {
        let (mut colour, mut depth) = buffers();
        let mut target = Target {
            width: SIZE,
            height: SIZE,
            colour: &mut colour,
            depth: &mut depth,
        };
        let mut tri = fullscreen(0.5, Vec4::ONE);
        tri[1].clip.w = -1.0;
        assert_eq!(draw_triangle(&mut target, tri, &Fragment::VertexColour, RasterState::OPAQUE), 0);
    }

    #[test]
    fn glyph_coverage_blends_over_destination() {
        let (mut colour, mut depth) = buffers();
        let mut target = Target {
            width: SIZE,
            height: SIZE,
            colour: &mut colour,
            depth: &mut depth,
        };
        target.clear([0.0, 0.0, 0.0, 1.0]);
        let atlas = HostImage::solid([255, 255, 255, 128]);
        let fragment = Fragment::Glyph {
            atlas: &atlas,
            colour: Vec4::new(1.0, 1.0, 1.0, 1.0),
        };
        draw_triangle(&mut target, fullscreen(0.5, Vec4::ONE), &fragment, RasterState::OVERLAY);
        let pixel = unpack_colour(colour[0]);
        assert!((pixel.x - 0.5).abs() < 0.02, "got {}", pixel.x);
    }

    #[test]
    fn pack_and_unpack_agree() {
        let colour = Vec4::new(0.2, 0.4, 0.6, 1.0);
        let back = unpack_colour(pack_colour(colour));
        assert!((back - colour).abs().max_element() < 1.0 / 255.0);
    }
}
