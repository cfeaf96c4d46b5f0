// Host-side "device memory" for the software rasterizer
//
// Buffers and images live in host memory, but creation still goes through a
// staging copy so the software path exercises the same transfer contract as
// the GPU backends: stage, copy, wait, free staging.

use crate::types::TextureData;
use anyhow::Result;
use bytemuck::Pod;
use glam::{Vec2, Vec4};
use slotmap::SlotMap;

slotmap::new_key_type! {
    pub struct BufferId;
    pub struct ImageId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Staging,
    Vertex,
    Index,
    Uniform,
}

/// Word-aligned byte storage so typed views never need a copy
pub struct HostBuffer {
    words: Vec<u32>,
    size: usize,
    usage: BufferUsage,
}

impl HostBuffer {
    fn new(size: usize, usage: BufferUsage) -> Self {
        Self {
            words: vec![0; size.div_ceil(4)],
            size,
            usage,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.size]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.size]
    }

    /// Typed view; trailing bytes that do not fill a whole T are ignored
    pub fn as_slice<T: Pod>(&self) -> &[T] {
        let stride = std::mem::size_of::<T>();
        let whole = (self.size / stride) * stride;
        bytemuck::cast_slice(&bytemuck::cast_slice::<u32, u8>(&self.words)[..whole])
    }
}

/// RGBA8 image sampled with nearest filtering and repeat addressing
pub struct HostImage {
    pub width: u32,
    pub height: u32,
    texels: Vec<[u8; 4]>,
}

impl HostImage {
    pub fn solid(colour: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            texels: vec![colour],
        }
    }

    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let wrap = |t: f32| t - t.floor();
        let x = ((wrap(uv.x) * self.width as f32) as u32).min(self.width - 1);
        let y = ((wrap(uv.y) * self.height as f32) as u32).min(self.height - 1);
        let [r, g, b, a] = self.texels[(y * self.width + x) as usize];
        Vec4::new(r as f32, g as f32, b as f32, a as f32) / 255.0
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }
}

pub struct DeviceMemory {
    buffers: SlotMap<BufferId, HostBuffer>,
    images: SlotMap<ImageId, HostImage>,
    allocated: usize,
    budget: usize,
}

impl Default for DeviceMemory {
    fn default() -> Self {
        Self::with_budget(usize::MAX)
    }
}

impl DeviceMemory {
    /// Memory that refuses allocations past `budget` bytes
    pub fn with_budget(budget: usize) -> Self {
        Self {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            allocated: 0,
            budget,
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn reserve(&mut self, size: usize) -> Result<()> {
        if self.allocated.saturating_add(size) > self.budget {
            anyhow::bail!(
                "Out of device memory: {} bytes requested, {} of {} in use",
                size,
                self.allocated,
                self.budget
            );
        }
        self.allocated += size;
        Ok(())
    }

    pub fn create_buffer(&mut self, size: usize, usage: BufferUsage) -> Result<BufferId> {
        self.reserve(size)?;
        Ok(self.buffers.insert(HostBuffer::new(size, usage)))
    }

    pub fn free_buffer(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.remove(id) {
            self.allocated -= buffer.size;
        }
    }

    pub fn buffer(&self, id: BufferId) -> Option<&HostBuffer> {
        self.buffers.get(id)
    }

    pub fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("Write to freed buffer"))?;
        let end = offset + data.len();
        if end > buffer.size {
            anyhow::bail!("Buffer write of {} bytes at {} overflows {} bytes", data.len(), offset, buffer.size);
        }
        buffer.bytes_mut()[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// The software equivalent of vkCmdCopyBuffer
    fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: usize) -> Result<()> {
        let data = self
            .buffers
            .get(src)
            .map(|b| b.bytes()[..size].to_vec())
            .ok_or_else(|| anyhow::anyhow!("Copy from freed buffer"))?;
        self.write_buffer(dst, 0, &data)
    }

    pub fn image(&self, id: ImageId) -> Option<&HostImage> {
        self.images.get(id)
    }

    pub fn insert_image(&mut self, image: HostImage) -> Result<ImageId> {
        self.reserve(image.texels.len() * 4)?;
        Ok(self.images.insert(image))
    }

    pub fn free_image(&mut self, id: ImageId) {
        if let Some(image) = self.images.remove(id) {
            self.allocated -= image.texels.len() * 4;
        }
    }
}

/// Upload `data` into a new buffer through a staging buffer sized exactly `data.len()`
pub fn upload_buffer(memory: &mut DeviceMemory, data: &[u8], usage: BufferUsage) -> Result<BufferId> {
    let staging = memory.create_buffer(data.len(), BufferUsage::Staging)?;
    memory.write_buffer(staging, 0, data)?;

    let result = memory
        .create_buffer(data.len(), usage)
        .and_then(|dst| memory.copy_buffer(staging, dst, data.len()).map(|_| dst));

    memory.free_buffer(staging);
    result
}

/// Upload texture pixels (RGB8 is expanded to RGBA8 first)
pub fn upload_image(memory: &mut DeviceMemory, texture: &TextureData) -> Result<ImageId> {
    let rgba = texture.to_rgba8();
    let staging = upload_buffer(memory, &rgba, BufferUsage::Staging)?;

    let texels = memory
        .buffer(staging)
        .map(|b| b.as_slice::<[u8; 4]>().to_vec())
        .unwrap_or_default();
    memory.free_buffer(staging);

    memory.insert_image(HostImage {
        width: texture.width,
        height: texture.height,
        texels,
    })
}

/// Copy a buffer's contents back out
pub fn read_back(memory: &DeviceMemory, id: BufferId) -> Result<Vec<u8>> {
    memory
        .buffer(id)
        .map(|b| b.bytes().to_vec())
        .ok_or_else(|| anyhow::anyhow!("Read back of freed buffer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureFormat;

    #[test]
    fn upload_then_read_back_round_trips() {
        let mut memory = DeviceMemory::default();
        for len in [1usize, 3, 4, 47, 48, 1000] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let id = upload_buffer(&mut memory, &data, BufferUsage::Vertex).unwrap();
            assert_eq!(read_back(&memory, id).unwrap(), data);
        }
    }

    #[test]
    fn staging_buffer_is_freed_after_upload() {
        let mut memory = DeviceMemory::default();
        let id = upload_buffer(&mut memory, &[1, 2, 3, 4], BufferUsage::Index).unwrap();
        assert_eq!(memory.buffer_count(), 1);
        assert_eq!(memory.allocated_bytes(), 4);
        memory.free_buffer(id);
        assert_eq!(memory.allocated_bytes(), 0);
    }

    #[test]
    fn allocation_past_budget_fails() {
        let mut memory = DeviceMemory::with_budget(16);
        assert!(upload_buffer(&mut memory, &[0; 12], BufferUsage::Vertex).is_err());
        assert_eq!(memory.allocated_bytes(), 0);
    }

    #[test]
    fn rgb_images_are_sampled_as_rgba() {
        let mut memory = DeviceMemory::default();
        let texture = TextureData::new(TextureFormat::Rgb8, 2, 1, vec![255, 0, 0, 0, 0, 255]);
        let id = upload_image(&mut memory, &texture).unwrap();
        let image = memory.image(id).unwrap();
        assert_eq!(image.sample(Vec2::new(0.25, 0.5)), Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(image.sample(Vec2::new(0.75, 0.5)), Vec4::new(0.0, 0.0, 1.0, 1.0));
        // repeat addressing
        assert_eq!(image.sample(Vec2::new(1.25, 0.5)), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }
}
