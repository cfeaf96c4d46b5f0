// Transfer engine on wgpu
//
// Same contract as the Vulkan one: data goes through a mapped staging buffer,
// a copy is submitted and the CPU waits on that submission's index before the
// staging buffer is destroyed. wgpu reports failures through error scopes, so
// each transfer runs inside one and surfaces them as a Result.

use super::device::block_on_queue;
use crate::types::TextureData;
use anyhow::{Context, Result};
use std::sync::Arc;

pub fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// A device-local buffer plus the byte length that was uploaded into it
pub struct UploadedBuffer {
    pub buffer: wgpu::Buffer,
    pub len: usize,
}

pub struct UploadedTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

pub struct Transfer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl Transfer {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Run `work` inside validation and out-of-memory error scopes
    fn scoped<T>(&self, what: &str, work: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = work();
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let invalid = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = out_of_memory.or(invalid) {
            anyhow::bail!("{} failed: {}", what, error);
        }
        Ok(value)
    }

    fn submit_and_wait(&self, record: impl FnOnce(&mut wgpu::CommandEncoder)) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("transfer") });
        record(&mut encoder);
        let index = self.queue.submit(Some(encoder.finish()));
        block_on_queue(&self.device, wgpu::Maintain::WaitForSubmissionIndex(index), "transfer");
    }

    fn staging(&self, contents: impl FnOnce(&mut [u8]), size: u64) -> wgpu::Buffer {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        contents(&mut staging.slice(..).get_mapped_range_mut());
        staging.unmap();
        staging
    }

    /// Upload `data` into a new buffer. Copies move whole words, so the
    /// buffer is padded up to COPY_BUFFER_ALIGNMENT.
    pub fn upload_buffer(&self, data: &[u8], usage: wgpu::BufferUsages, label: &str) -> Result<UploadedBuffer> {
        if data.is_empty() {
            anyhow::bail!("Refusing to upload an empty buffer ({})", label);
        }
        let size = align_to(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);

        let buffer = self.scoped(label, || {
            let staging = self.staging(|mapped| mapped[..data.len()].copy_from_slice(data), size);
            let target = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: usage | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            self.submit_and_wait(|encoder| {
                encoder.copy_buffer_to_buffer(&staging, 0, &target, 0, size);
            });
            staging.destroy();
            target
        })?;

        Ok(UploadedBuffer {
            buffer,
            len: data.len(),
        })
    }

    /// Upload texture pixels as RGBA8, rows padded to COPY_BYTES_PER_ROW_ALIGNMENT
    pub fn upload_texture(&self, texture: &TextureData, label: &str) -> Result<UploadedTexture> {
        let pixels = texture.to_rgba8();
        let row = texture.width as u64 * 4;
        let padded_row = align_to(row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64);
        let size = wgpu::Extent3d {
            width: texture.width,
            height: texture.height,
            depth_or_array_layers: 1,
        };

        let uploaded = self.scoped(label, || {
            let staging = self.staging(
                |mapped| {
                    for (src, dst) in pixels
                        .chunks_exact(row as usize)
                        .zip(mapped.chunks_exact_mut(padded_row as usize))
                    {
                        dst[..src.len()].copy_from_slice(src);
                    }
                },
                padded_row * texture.height as u64,
            );

            let target = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });

            self.submit_and_wait(|encoder| {
                encoder.copy_buffer_to_texture(
                    wgpu::ImageCopyBuffer {
                        buffer: &staging,
                        layout: wgpu::ImageDataLayout {
                            offset: 0,
                            bytes_per_row: Some(padded_row as u32),
                            rows_per_image: Some(texture.height),
                        },
                    },
                    wgpu::ImageCopyTexture {
                        texture: &target,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    size,
                );
            });
            staging.destroy();

            let view = target.create_view(&wgpu::TextureViewDescriptor::default());
            UploadedTexture { texture: target, view }
        })?;

        Ok(uploaded)
    }

    /// Copy an uploaded buffer back to the host
    pub fn read_back(&self, uploaded: &UploadedBuffer) -> Result<Vec<u8>> {
        let size = uploaded.buffer.size();
        let readback = self.scoped("read back", || {
            let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.submit_and_wait(|encoder| {
                encoder.copy_buffer_to_buffer(&uploaded.buffer, 0, &readback, 0, size);
            });
            readback
        })?;

        let slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        block_on_queue(&self.device, wgpu::Maintain::Wait, "read back");
        receiver
            .recv()
            .context("Read back buffer was never mapped")?
            .context("Failed to map read back buffer")?;

        let data = slice.get_mapped_range()[..uploaded.len].to_vec();
        readback.unmap();
        readback.destroy();
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::super::device::WgpuDevice;
    use super::super::WgpuFlavor;
    use super::*;
    use crate::types::TextureFormat;

    fn headless() -> Option<Transfer> {
        match WgpuDevice::headless(WgpuFlavor::Explicit) {
            Ok(gpu) => Some(Transfer::new(gpu.device, gpu.queue)),
            Err(e) => {
                eprintln!("skipping: no wgpu adapter ({:#})", e);
                None
            }
        }
    }

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_to(1, 4), 4);
        assert_eq!(align_to(8, 4), 8);
        assert_eq!(align_to(12, 256), 256);
    }

    #[test]
    fn uploaded_bytes_read_back_unchanged() {
        let Some(transfer) = headless() else { return };
        for len in [4usize, 48, 4097, 65_537] {
            let data: Vec<u8> = (0..len).map(|i| (i * 13 + 1) as u8).collect();
            let uploaded = transfer
                .upload_buffer(&data, wgpu::BufferUsages::VERTEX, "test")
                .unwrap();
            assert_eq!(transfer.read_back(&uploaded).unwrap(), data);
        }
    }

    #[test]
    fn empty_upload_is_refused() {
        let Some(transfer) = headless() else { return };
        assert!(transfer.upload_buffer(&[], wgpu::BufferUsages::VERTEX, "empty").is_err());
    }

    #[test]
    fn odd_width_texture_uploads() {
        let Some(transfer) = headless() else { return };
        let texture = TextureData::new(TextureFormat::Rgb8, 3, 2, vec![90; 18]);
        let uploaded = transfer.upload_texture(&texture, "rgb").unwrap();
        assert_eq!(uploaded.texture.width(), 3);
        assert_eq!(uploaded.texture.height(), 2);
    }
}
