// Bind group layouts, shader decoding and render pipelines on wgpu
//
// Group 0: per-slot globals. Group 1: per-object uniforms, one dynamic-offset
// binding into the slot's object buffer. Group 2: texture + sampler.

use super::WgpuFlavor;
use crate::types::{FontUniforms, GlobalUniforms, GlyphVertex, ShaderType, Vertex};
use anyhow::{Context, Result};
use std::borrow::Cow;
use std::num::NonZeroU64;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Largest per-object block any shader reads
pub const OBJECT_BINDING_SIZE: u64 = std::mem::size_of::<FontUniforms>() as u64;

const SPIRV_MAGIC: u32 = 0x0723_0203;

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 4] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x4, 2 => Float32x2, 3 => Float32x3];
const GLYPH_ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

pub fn vertex_layout(shader_type: ShaderType) -> wgpu::VertexBufferLayout<'static> {
    if shader_type.uses_glyph_vertices() {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GlyphVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &GLYPH_ATTRIBUTES,
        }
    } else {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &MESH_ATTRIBUTES,
        }
    }
}

/// Decode shader bytes for the flavor: SPIR-V words or GLSL text
pub fn shader_source(flavor: WgpuFlavor, stage: wgpu::naga::ShaderStage, bytes: &[u8]) -> Result<wgpu::ShaderSource<'static>> {
    match flavor {
        WgpuFlavor::Explicit => {
            if bytes.len() % 4 != 0 {
                anyhow::bail!("SPIR-V length {} is not a multiple of 4", bytes.len());
            }
            let words: Vec<u32> = bytes
                .chunks_exact(4)
                .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                .collect();
            if words.first() != Some(&SPIRV_MAGIC) {
                anyhow::bail!("missing SPIR-V magic number");
            }
            Ok(wgpu::ShaderSource::SpirV(Cow::Owned(words)))
        }
        WgpuFlavor::Gl => {
            let text = std::str::from_utf8(bytes).context("GLSL source is not UTF-8")?;
            Ok(wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(text.to_string()),
                stage,
                defines: Default::default(),
            })
        }
    }
}

pub struct BindLayouts {
    pub globals: wgpu::BindGroupLayout,
    pub object: wgpu::BindGroupLayout,
    pub texture: wgpu::BindGroupLayout,
    pub pipeline: wgpu::PipelineLayout,
    pub sampler: wgpu::Sampler,
    /// Distance between per-object blocks in a slot's object buffer
    pub object_stride: u64,
}

impl BindLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform = |visibility, dynamic| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: dynamic,
                min_binding_size: None,
            },
            count: None,
        };

        let globals = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("globals layout"),
            entries: &[uniform(wgpu::ShaderStages::VERTEX, false)],
        });
        let object = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("object layout"),
            entries: &[uniform(wgpu::ShaderStages::VERTEX_FRAGMENT, true)],
        });
        let texture = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pipeline layout"),
            bind_group_layouts: &[&globals, &object, &texture],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("texture sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        Self {
            globals,
            object,
            texture,
            pipeline,
            sampler,
            object_stride: super::transfer::align_to(OBJECT_BINDING_SIZE, alignment),
        }
    }

    pub fn globals_buffer(&self, device: &wgpu::Device, index: usize) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("frame {} globals", index)),
            size: std::mem::size_of::<GlobalUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("globals"),
            layout: &self.globals,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        (buffer, group)
    }

    /// Object buffer with room for `max_draws` blocks
    pub fn object_buffer(&self, device: &wgpu::Device, index: usize, max_draws: u32) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("frame {} objects", index)),
            size: self.object_stride * max_draws.max(1) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("objects"),
            layout: &self.object,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(OBJECT_BINDING_SIZE),
                }),
            }],
        });
        (buffer, group)
    }

    pub fn texture_group(&self, device: &wgpu::Device, view: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture"),
            layout: &self.texture,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

/// Build a pipeline for `shader_type`. Glyph and UI shaders blend and skip
/// the depth test; everything else writes depth.
pub fn create_pipeline(
    device: &wgpu::Device,
    layouts: &BindLayouts,
    format: wgpu::TextureFormat,
    shader_type: ShaderType,
    modules: (&wgpu::ShaderModule, &wgpu::ShaderModule),
    label: &str,
) -> wgpu::RenderPipeline {
    let blends = shader_type.blends();
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layouts.pipeline),
        vertex: wgpu::VertexState {
            module: modules.0,
            entry_point: "main",
            compilation_options: Default::default(),
            buffers: &[vertex_layout(shader_type)],
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: !blends,
            depth_compare: if blends {
                wgpu::CompareFunction::Always
            } else {
                wgpu::CompareFunction::LessEqual
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: modules.1,
            entry_point: "main",
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(if blends {
                    wgpu::BlendState::ALPHA_BLENDING
                } else {
                    wgpu::BlendState::REPLACE
                }),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::naga::ShaderStage;

    #[test]
    fn mesh_layout_matches_vertex() {
        let layout = vertex_layout(ShaderType::Mesh);
        assert_eq!(layout.array_stride, 48);
        let offsets: Vec<u64> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 28, 36]);
    }

    #[test]
    fn glyph_layout_matches_glyph_vertex() {
        let layout = vertex_layout(ShaderType::Ui);
        assert_eq!(layout.array_stride, 20);
        let offsets: Vec<u64> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12]);
    }

    #[test]
    fn spirv_without_magic_is_rejected() {
        assert!(shader_source(WgpuFlavor::Explicit, ShaderStage::Vertex, &[1, 2, 3]).is_err());
        assert!(shader_source(WgpuFlavor::Explicit, ShaderStage::Vertex, &[0; 8]).is_err());
        let header = SPIRV_MAGIC.to_le_bytes();
        assert!(shader_source(WgpuFlavor::Explicit, ShaderStage::Vertex, &header).is_ok());
    }

    #[test]
    fn glsl_must_be_text() {
        assert!(shader_source(WgpuFlavor::Gl, ShaderStage::Fragment, &[0xFF, 0xFE]).is_err());
        let source = b"#version 450\nvoid main() {}\n";
        assert!(matches!(
            shader_source(WgpuFlavor::Gl, ShaderStage::Fragment, source),
            Ok(wgpu::ShaderSource::Glsl { .. })
        ));
    }
}
