// Per-slot frame state on wgpu
//
// The slot's fence is the index of its last submission. Draws are buffered as
// commands while the frame records and replayed into a single render pass at
// submit; per-object uniforms are packed into the slot's object buffer.

use super::pipeline::BindLayouts;
use crate::types::{GLYPH_INDICES, GLYPH_STRIDE};
use std::sync::Arc;

pub enum Command {
    SetPipeline(Arc<wgpu::RenderPipeline>),
    SetModel {
        vertices: Arc<wgpu::Buffer>,
        indices: Option<Arc<wgpu::Buffer>>,
    },
    SetTexture(Arc<wgpu::BindGroup>),
    Draw {
        indexed: bool,
        count: u32,
        object_offset: u32,
    },
    DrawGlyph {
        vertices: Arc<wgpu::Buffer>,
        indices: Arc<wgpu::Buffer>,
        atlas: Arc<wgpu::BindGroup>,
        glyph: u64,
        object_offset: u32,
    },
}

pub struct WgpuFrameSlot {
    pub submission: Option<wgpu::SubmissionIndex>,
    pub globals: wgpu::Buffer,
    pub globals_group: wgpu::BindGroup,
    pub objects: wgpu::Buffer,
    pub objects_group: wgpu::BindGroup,
    object_data: Vec<u8>,
    pub commands: Vec<Command>,
}

impl WgpuFrameSlot {
    pub fn new(device: &wgpu::Device, layouts: &BindLayouts, index: usize, max_draws: u32) -> Self {
        let (globals, globals_group) = layouts.globals_buffer(device, index);
        let (objects, objects_group) = layouts.object_buffer(device, index, max_draws);
        Self {
            submission: None,
            globals,
            globals_group,
            objects,
            objects_group,
            object_data: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.commands.clear();
        self.object_data.clear();
    }

    /// Store per-object uniforms for draw number `draw`, returning the
    /// dynamic offset. None when the block would overrun the object buffer.
    pub fn push_object(&mut self, draw: u32, stride: u64, bytes: &[u8]) -> Option<u32> {
        let offset = draw as u64 * stride;
        if offset + stride > self.objects.size() {
            return None;
        }
        let (start, end) = (offset as usize, (offset + stride) as usize);
        if self.object_data.len() < end {
            self.object_data.resize(end, 0);
        }
        self.object_data[start..start + bytes.len()].copy_from_slice(bytes);
        Some(offset as u32)
    }

    pub fn object_data(&self) -> &[u8] {
        &self.object_data
    }
}

/// Replay buffered commands into an open render pass
pub fn replay<'a>(pass: &mut wgpu::RenderPass<'a>, slot: &'a WgpuFrameSlot) {
    pass.set_bind_group(0, &slot.globals_group, &[]);
    let glyph_stride = GLYPH_STRIDE as u64;

    for command in &slot.commands {
        match command {
            Command::SetPipeline(pipeline) => pass.set_pipeline(pipeline),
            Command::SetModel { vertices, indices } => {
                pass.set_vertex_buffer(0, vertices.slice(..));
                if let Some(indices) = indices {
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                }
            }
            Command::SetTexture(group) => pass.set_bind_group(2, group, &[]),
            Command::Draw {
                indexed,
                count,
                object_offset,
            } => {
                pass.set_bind_group(1, &slot.objects_group, &[*object_offset]);
                if *indexed {
                    pass.draw_indexed(0..*count, 0, 0..1);
                } else {
                    pass.draw(0..*count, 0..1);
                }
            }
            Command::DrawGlyph {
                vertices,
                indices,
                atlas,
                glyph,
                object_offset,
            } => {
                let start = glyph * glyph_stride;
                pass.set_vertex_buffer(0, vertices.slice(start..start + glyph_stride));
                pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.set_bind_group(2, atlas, &[]);
                pass.set_bind_group(1, &slot.objects_group, &[*object_offset]);
                pass.draw_indexed(0..GLYPH_INDICES.len() as u32, 0, 0..1);
            }
        }
    }
}
