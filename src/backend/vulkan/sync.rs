// Per-slot frame resources
//
// One slot per frame in flight: its command buffer, the fence that guards
// all of them, and the semaphores that order acquire -> render -> present.

use super::device::VulkanDevice;
use super::memory::GpuBuffer;
use super::pipeline::PipelineLayouts;
use crate::types::GlobalUniforms;
use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;

pub struct VulkanFrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub globals: GpuBuffer,
    pub globals_set: vk::DescriptorSet,
}

impl VulkanFrameSlot {
    pub fn new(
        device: &VulkanDevice,
        pool: vk::CommandPool,
        layouts: &PipelineLayouts,
        index: usize,
    ) -> Result<Self> {
        let d = &device.device;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { d.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate frame command buffer")?[0];

        let size = std::mem::size_of::<GlobalUniforms>() as u64;
        let globals = match GpuBuffer::new(
            device,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            &format!("frame {} globals", index),
        ) {
            Ok(globals) => globals,
            Err(e) => {
                unsafe { d.free_command_buffers(pool, &[command_buffer]) };
                return Err(e);
            }
        };

        // Null handles are skipped by destroy, so a partial slot can be released
        let mut slot = Self {
            command_buffer,
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            globals,
            globals_set: vk::DescriptorSet::null(),
        };
        if let Err(e) = slot.create_sync_objects(device, layouts, size) {
            log::error!("Frame slot {} incomplete: {:#}", index, e);
            slot.release(device, pool);
            return Err(e);
        }
        Ok(slot)
    }

    fn create_sync_objects(&mut self, device: &VulkanDevice, layouts: &PipelineLayouts, size: u64) -> Result<()> {
        let d = &device.device;
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns at once
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        self.globals_set = layouts.globals_set(device, self.globals.buffer, size)?;
        unsafe {
            self.image_available = d
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create semaphore")?;
            self.render_finished = d
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create semaphore")?;
            self.in_flight = d.create_fence(&fence_info, None).context("Failed to create fence")?;
        }
        Ok(())
    }

    /// Destroy the slot and hand its command buffer back to `pool`
    pub fn release(self, device: &VulkanDevice, pool: vk::CommandPool) {
        let command_buffer = self.command_buffer;
        self.destroy(device);
        unsafe { device.device.free_command_buffers(pool, &[command_buffer]) };
    }

    pub fn destroy(self, device: &VulkanDevice) {
        unsafe {
            if self.image_available != vk::Semaphore::null() {
                device.device.destroy_semaphore(self.image_available, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                device.device.destroy_semaphore(self.render_finished, None);
            }
            if self.in_flight != vk::Fence::null() {
                device.device.destroy_fence(self.in_flight, None);
            }
        }
        self.globals.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partially_built_slot_releases_cleanly() {
        let device = match VulkanDevice::new("sync-test", false, None) {
            Ok(device) => device,
            Err(e) => {
                eprintln!("skipping: no Vulkan device ({:#})", e);
                return;
            }
        };
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }.unwrap();
        let layouts = PipelineLayouts::new(&device, 2).unwrap();

        let complete = VulkanFrameSlot::new(&device, pool, &layouts, 0).unwrap();
        assert_ne!(complete.in_flight, vk::Fence::null());
        complete.release(&device, pool);

        // As left behind when fence creation fails
        let mut partial = VulkanFrameSlot::new(&device, pool, &layouts, 1).unwrap();
        unsafe {
            device.device.destroy_semaphore(partial.render_finished, None);
            device.device.destroy_fence(partial.in_flight, None);
        }
        partial.render_finished = vk::Semaphore::null();
        partial.in_flight = vk::Fence::null();
        partial.release(&device, pool);

        unsafe { device.device.device_wait_idle() }.unwrap();
        layouts.destroy(&device);
        unsafe { device.device.destroy_command_pool(pool, None) };
    }
}
