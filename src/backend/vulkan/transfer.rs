// Transfer engine - staging uploads and read back
//
// Each transfer records a one-shot command buffer, submits it with a private
// fence and blocks on that fence before the staging buffer is freed. Frame
// slot fences are never touched here.

use super::device::VulkanDevice;
use super::memory::{subresource_range, GpuBuffer, GpuImage};
use crate::types::TextureData;
use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;

const TRANSFER_TIMEOUT_NS: u64 = u64::MAX;

pub struct Transfer {
    pool: vk::CommandPool,
    fence: vk::Fence,
}

impl Transfer {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create transfer command pool")?;

        let fence = match unsafe { device.device.create_fence(&vk::FenceCreateInfo::builder(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e).context("Failed to create transfer fence");
            }
        };

        Ok(Self { pool, fence })
    }

    /// Record with `record`, submit, and wait for completion
    fn submit_and_wait(
        &self,
        device: &VulkanDevice,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> Result<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate transfer command buffer")?;
        let cmd = command_buffers[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.device.begin_command_buffer(cmd, &begin_info) }
                .context("Failed to begin transfer commands")?;
            record(cmd);
            unsafe { device.device.end_command_buffer(cmd) }
                .context("Failed to end transfer commands")?;

            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            unsafe {
                device
                    .device
                    .queue_submit(device.queue, &[submit_info], self.fence)
                    .context("Failed to submit transfer")?;
                device
                    .device
                    .wait_for_fences(&[self.fence], true, TRANSFER_TIMEOUT_NS)
                    .context("Timed out waiting for transfer")?;
                device
                    .device
                    .reset_fences(&[self.fence])
                    .context("Failed to reset transfer fence")?;
            }
            Ok(())
        })();

        unsafe { device.device.free_command_buffers(self.pool, &command_buffers) };
        result
    }

    /// Upload `data` into a new device-local buffer through a staging buffer
    /// of exactly `data.len()` bytes
    pub fn upload_buffer(
        &self,
        device: &VulkanDevice,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        let size = data.len() as vk::DeviceSize;
        let mut staging = GpuBuffer::new(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging",
        )?;

        let result = staging.write(0, data).and_then(|_| {
            let target = GpuBuffer::new(
                device,
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::GpuOnly,
                name,
            )?;
            let region = vk::BufferCopy::builder().size(size).build();
            let (src, dst) = (staging.buffer, target.buffer);
            match self.submit_and_wait(device, |cmd| unsafe {
                device.device.cmd_copy_buffer(cmd, src, dst, &[region]);
            }) {
                Ok(()) => Ok(target),
                Err(e) => {
                    target.destroy(device);
                    Err(e)
                }
            }
        });

        staging.destroy(device);
        result
    }

    /// Upload texture pixels into a sampled RGBA8 image, leaving it in
    /// SHADER_READ_ONLY_OPTIMAL
    pub fn upload_image(&self, device: &VulkanDevice, texture: &TextureData, name: &str) -> Result<GpuImage> {
        let pixels = texture.to_rgba8();
        let mut staging = GpuBuffer::new(
            device,
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "texture staging",
        )?;

        let extent = vk::Extent2D {
            width: texture.width,
            height: texture.height,
        };

        let result = staging.write(0, &pixels).and_then(|_| {
            let image = GpuImage::new(
                device,
                extent,
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                vk::ImageAspectFlags::COLOR,
                name,
            )?;
            let src = staging.buffer;
            let recorded = self.submit_and_wait(device, |cmd| unsafe {
                transition(
                    device,
                    cmd,
                    image.image,
                    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                    (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
                    (vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TRANSFER),
                );

                let region = vk::BufferImageCopy::builder()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .build();
                device.device.cmd_copy_buffer_to_image(
                    cmd,
                    src,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );

                transition(
                    device,
                    cmd,
                    image.image,
                    (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                    (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
                    (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER),
                );
            });
            match recorded {
                Ok(()) => Ok(image),
                Err(e) => {
                    image.destroy(device);
                    Err(e)
                }
            }
        });

        staging.destroy(device);
        result
    }

    /// Copy a device-local buffer back to the host
    pub fn read_back(&self, device: &VulkanDevice, buffer: &GpuBuffer) -> Result<Vec<u8>> {
        let readback = GpuBuffer::new(
            device,
            buffer.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "readback",
        )?;
        let region = vk::BufferCopy::builder().size(buffer.size).build();
        let (src, dst) = (buffer.buffer, readback.buffer);
        let result = self
            .submit_and_wait(device, |cmd| unsafe {
                device.device.cmd_copy_buffer(cmd, src, dst, &[region]);
            })
            .and_then(|_| readback.read());

        readback.destroy(device);
        result
    }

    pub fn destroy(&self, device: &VulkanDevice) {
        unsafe {
            device.device.destroy_fence(self.fence, None);
            device.device.destroy_command_pool(self.pool, None);
        }
    }
}

unsafe fn transition(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    layouts: (vk::ImageLayout, vk::ImageLayout),
    access: (vk::AccessFlags, vk::AccessFlags),
    stages: (vk::PipelineStageFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(layouts.0)
        .new_layout(layouts.1)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR))
        .src_access_mask(access.0)
        .dst_access_mask(access.1)
        .build();

    device.device.cmd_pipeline_barrier(
        cmd,
        stages.0,
        stages.1,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureFormat;

    fn headless() -> Option<std::sync::Arc<VulkanDevice>> {
        match VulkanDevice::new("transfer-test", false, None) {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("skipping: no Vulkan device ({:#})", e);
                None
            }
        }
    }

    #[test]
    fn uploaded_bytes_read_back_unchanged() {
        let Some(device) = headless() else { return };
        let transfer = Transfer::new(&device).unwrap();

        for len in [4usize, 48, 4096, 65_537] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();
            let buffer = transfer
                .upload_buffer(&device, &data, vk::BufferUsageFlags::VERTEX_BUFFER, "test")
                .unwrap();
            assert_eq!(transfer.read_back(&device, &buffer).unwrap(), data);
            buffer.destroy(&device);
        }

        transfer.destroy(&device);
    }

    #[test]
    fn rgb_texture_uploads() {
        let Some(device) = headless() else { return };
        let transfer = Transfer::new(&device).unwrap();
        let texture = TextureData::new(TextureFormat::Rgb8, 2, 2, vec![200; 12]);
        let image = transfer.upload_image(&device, &texture, "rgb").unwrap();
        assert_eq!(image.extent.width, 2);
        image.destroy(&device);
        transfer.destroy(&device);
    }

    #[test]
    fn transfers_wait_without_a_deadline() {
        assert_eq!(TRANSFER_TIMEOUT_NS, u64::MAX);
    }
}
