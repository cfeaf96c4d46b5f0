// Graphics pipeline creation and management
//
// All pipelines share one layout: set 0 holds the per-slot global uniforms,
// set 1 a combined image sampler, and per-object data goes through a 128-byte
// push constant range visible to both stages. Viewport and scissor are
// dynamic so pipelines survive a resize; only a format change rebuilds them.

use super::device::VulkanDevice;
use crate::types::{GlyphVertex, ShaderType, Vertex};
use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::mem::{offset_of, size_of};

pub const PUSH_CONSTANT_SIZE: u32 = 128;

/// Texture descriptor sets the pool can hold at once
const MAX_TEXTURE_SETS: u32 = 1024;

pub struct PipelineLayouts {
    pub globals: vk::DescriptorSetLayout,
    pub texture: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    pub pool: vk::DescriptorPool,
    pub sampler: vk::Sampler,
}

impl PipelineLayouts {
    pub fn new(device: &VulkanDevice, slot_count: u32) -> Result<Self> {
        let d = &device.device;

        let globals_binding = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()];
        let globals = unsafe {
            d.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&globals_binding),
                None,
            )
        }
        .context("Failed to create global descriptor layout")?;

        let texture_binding = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];
        let texture = unsafe {
            d.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&texture_binding),
                None,
            )
        }
        .context("Failed to create texture descriptor layout")?;

        let push_constant_ranges = [vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE)
            .build()];
        let set_layouts = [globals, texture];
        let layout = unsafe {
            d.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(&push_constant_ranges),
                None,
            )
        }
        .context("Failed to create pipeline layout")?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: slot_count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_TEXTURE_SETS,
            },
        ];
        let pool = unsafe {
            d.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(slot_count + MAX_TEXTURE_SETS)
                    .pool_sizes(&pool_sizes),
                None,
            )
        }
        .context("Failed to create descriptor pool")?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(device.sampler_anisotropy)
            .max_anisotropy(if device.sampler_anisotropy {
                device.properties.limits.max_sampler_anisotropy
            } else {
                1.0
            })
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { d.create_sampler(&sampler_info, None) }
            .context("Failed to create sampler")?;

        Ok(Self {
            globals,
            texture,
            layout,
            pool,
            sampler,
        })
    }

    fn allocate(&self, device: &VulkanDevice, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?;
        Ok(sets[0])
    }

    /// Set 0 for one frame slot, pointing at its uniform buffer
    pub fn globals_set(&self, device: &VulkanDevice, buffer: vk::Buffer, range: u64) -> Result<vk::DescriptorSet> {
        let set = self.allocate(device, self.globals)?;
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build();
        unsafe { device.device.update_descriptor_sets(&[write], &[]) };
        Ok(set)
    }

    /// Set 1 for one texture
    pub fn texture_set(&self, device: &VulkanDevice, view: vk::ImageView) -> Result<vk::DescriptorSet> {
        let set = self.allocate(device, self.texture)?;
        let image_info = [vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build();
        unsafe { device.device.update_descriptor_sets(&[write], &[]) };
        Ok(set)
    }

    pub fn free_set(&self, device: &VulkanDevice, set: vk::DescriptorSet) {
        if let Err(e) = unsafe { device.device.free_descriptor_sets(self.pool, &[set]) } {
            log::warn!("Failed to free descriptor set: {:?}", e);
        }
    }

    pub fn destroy(&self, device: &VulkanDevice) {
        unsafe {
            device.device.destroy_sampler(self.sampler, None);
            device.device.destroy_descriptor_pool(self.pool, None);
            device.device.destroy_pipeline_layout(self.layout, None);
            device.device.destroy_descriptor_set_layout(self.texture, None);
            device.device.destroy_descriptor_set_layout(self.globals, None);
        }
    }
}

fn attribute(location: u32, format: vk::Format, offset: usize) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        binding: 0,
        location,
        format,
        offset: offset as u32,
    }
}

/// Vertex layout for a shader type
pub fn vertex_input(
    shader_type: ShaderType,
) -> (
    vk::VertexInputBindingDescription,
    Vec<vk::VertexInputAttributeDescription>,
) {
    if shader_type.uses_glyph_vertices() {
        let binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<GlyphVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        let attributes = vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(GlyphVertex, position)),
            attribute(1, vk::Format::R32G32_SFLOAT, offset_of!(GlyphVertex, texture_coordinate)),
        ];
        return (binding, attributes);
    }

    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = vec![
        attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Vertex, colour)),
        attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, texture_coordinate)),
        attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
    ];
    (binding, attributes)
}

/// SPIR-V bytes to a shader module. Malformed bytecode is an Err the caller
/// reports as a rejected shader.
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Malformed SPIR-V")?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// Build a pipeline for `shader_type` against `render_pass`
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    layouts: &PipelineLayouts,
    render_pass: vk::RenderPass,
    shader_type: ShaderType,
    vertex_spv: &[u8],
    fragment_spv: &[u8],
) -> Result<vk::Pipeline> {
    let vert_shader = create_shader_module(device, vertex_spv)?;
    let frag_shader = match create_shader_module(device, fragment_spv) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vert_shader, None) };
            return Err(e);
        }
    };

    let entry_point = c"main";
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_shader)
            .name(entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_shader)
            .name(entry_point)
            .build(),
    ];

    let (binding, attributes) = vertex_input(shader_type);
    let bindings = [binding];
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Counts only; the rectangles are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Overlays draw on top of everything and leave depth alone
    let opaque = !shader_type.blends();
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(opaque)
        .depth_write_enable(opaque)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(shader_type.blends())
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build()];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layouts.layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    // Modules are only needed during creation
    unsafe {
        device.device.destroy_shader_module(vert_shader, None);
        device.device.destroy_shader_module(frag_shader, None);
    }

    let pipelines = pipelines
        .map_err(|(_, e)| e)
        .context("Failed to create graphics pipeline")?;
    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_layout_covers_whole_vertex() {
        let (binding, attributes) = vertex_input(ShaderType::Mesh);
        assert_eq!(binding.stride, 48);
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 28, 36]);
    }

    #[test]
    fn glyph_layout_uses_glyph_vertices() {
        let (binding, attributes) = vertex_input(ShaderType::Font);
        assert_eq!(binding.stride, 20);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[1].offset, 12);
    }

    #[test]
    fn model_uniforms_fit_the_push_constant_range() {
        // 128 bytes is the minimum maxPushConstantsSize every device guarantees
        assert_eq!(PUSH_CONSTANT_SIZE, 128);
        assert!(size_of::<crate::types::ModelUniforms>() as u32 <= PUSH_CONSTANT_SIZE);
    }

    #[test]
    fn malformed_spirv_is_rejected_before_reaching_the_driver() {
        assert!(ash::util::read_spv(&mut Cursor::new(&[1u8, 2, 3][..])).is_err());
    }
}
