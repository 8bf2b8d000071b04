use std::ffi::CString;

use anyhow::{anyhow, Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use shaderc::ShaderKind;
use winit::window::Window;

use crate::frame::Frame;
use crate::render::config::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
};

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const BYTES_PER_PIXEL: usize = 4;
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

const FULLSCREEN_VERT: &str = r#"
#version 450
layout(location = 0) out vec2 v_uv;
void main() {
    vec2 uv = vec2((gl_VertexIndex << 1) & 2, gl_VertexIndex & 2);
    gl_Position = vec4(uv * 2.0 - 1.0, 0.0, 1.0);
    v_uv = uv;
}
"#;

// Frames are display-referred and stored top row first, which matches
// Vulkan's y-down clip space.
const BLIT_FRAG: &str = r#"
#version 450
layout(set = 0, binding = 0) uniform sampler2D u_frame;
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 o_color;
void main() {
    o_color = vec4(texture(u_frame, v_uv).rgb, 1.0);
}
"#;

/// True when `err` was caused by a lost Vulkan device. The presenter has to
/// be rebuilt from scratch after that.
pub fn is_device_lost(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<vk::Result>() == Some(&vk::Result::ERROR_DEVICE_LOST))
}

/// Instance, surface, device and queue. Everything else borrows from it.
struct Gpu {
    _entry: ash::Entry,
    instance: ash::Instance,
    surface_fn: khr::Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    swapchain_fn: khr::Swapchain,
}

impl Gpu {
    fn new(window: &Window) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.context("load Vulkan loader")?;
        let name = CString::new("phosphor-smoke")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&name)
            .engine_name(&name)
            .api_version(vk::API_VERSION_1_0);
        let extensions = ash_window::enumerate_required_extensions(window.raw_display_handle())
            .context("query surface extensions")?;
        let instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(extensions);
        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .context("create Vulkan instance")?;
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("create window surface")?;
        let surface_fn = khr::Surface::new(&entry, &instance);
        let (physical_device, queue_family) =
            pick_physical_device(&instance, &surface_fn, surface)?;
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let priorities = [1.0_f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)
            .build()];
        let device_extensions = [khr::Swapchain::name().as_ptr()];
        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions);
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .context("create logical device")?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_fn = khr::Swapchain::new(&instance, &device);
        Ok(Self {
            _entry: entry,
            instance,
            surface_fn,
            surface,
            physical_device,
            memory_properties,
            device,
            queue,
            queue_family,
            swapchain_fn,
        })
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let count = self.memory_properties.memory_type_count as usize;
        let index = self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .position(|(i, ty)| {
                requirements.memory_type_bits & (1 << i) != 0 && ty.property_flags.contains(flags)
            })
            .ok_or_else(|| anyhow!("no memory type with {flags:?}"))?;
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(index as u32);
        unsafe { self.device.allocate_memory(&info, None) }.context("allocate device memory")
    }

    fn image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_range());
        unsafe { self.device.create_image_view(&info, None) }.context("create image view")
    }

    fn shader_module(&self, source: &str, kind: ShaderKind, name: &str) -> Result<vk::ShaderModule> {
        let compiler =
            shaderc::Compiler::new().ok_or_else(|| anyhow!("shader compiler unavailable"))?;
        let spirv = compiler
            .compile_into_spirv(source, kind, name, "main", None)
            .with_context(|| format!("compile {name}"))?;
        let info = vk::ShaderModuleCreateInfo::builder().code(spirv.as_binary());
        unsafe { self.device.create_shader_module(&info, None) }
            .with_context(|| format!("create shader module {name}"))
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_fn: &khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("enumerate physical devices")?;
    devices
        .into_iter()
        .find_map(|device| {
            let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            families.iter().enumerate().find_map(|(index, family)| {
                let index = index as u32;
                let presents = unsafe {
                    surface_fn.get_physical_device_surface_support(device, index, surface)
                }
                .unwrap_or(false);
                (presents && family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .then_some((device, index))
            })
        })
        .ok_or_else(|| anyhow!("no Vulkan device can present to this window"))
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Render pass, pipeline and the single descriptor set that binds the frame
/// texture. Viewport and scissor are dynamic so a resize never rebuilds it.
struct BlitPipeline {
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
}

impl BlitPipeline {
    fn new(gpu: &Gpu, format: vk::Format) -> Result<Self> {
        let device = &gpu.device;
        let attachments = [vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build()];
        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        }];
        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { device.create_render_pass(&render_pass_info, None) }
            .context("create render pass")?;

        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_info, None) }
            .context("create descriptor set layout")?;
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .context("create pipeline layout")?;
        let pipeline = create_blit_pipeline(gpu, render_pass, layout)?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .context("create descriptor pool")?;
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .context("allocate descriptor set")?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("descriptor pool returned no set"))?;
        Ok(Self {
            render_pass,
            set_layout,
            layout,
            pipeline,
            descriptor_pool,
            descriptor_set,
        })
    }

    /// Points the descriptor at `texture`. The device must not be using the
    /// set.
    fn bind_texture(&self, gpu: &Gpu, texture: &FrameTexture) {
        let image_info = [vk::DescriptorImageInfo {
            sampler: texture.sampler,
            image_view: texture.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { gpu.device.update_descriptor_sets(&[write.build()], &[]) };
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.descriptor_pool, None);
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
        device.destroy_render_pass(self.render_pass, None);
    }
}

fn create_blit_pipeline(
    gpu: &Gpu,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline> {
    let vert = gpu.shader_module(FULLSCREEN_VERT, ShaderKind::Vertex, "fullscreen.vert")?;
    let frag = match gpu.shader_module(BLIT_FRAG, ShaderKind::Fragment, "blit.frag") {
        Ok(module) => module,
        Err(err) => {
            unsafe { gpu.device.destroy_shader_module(vert, None) };
            return Err(err);
        }
    };
    let entry = CString::new("main")?;
    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert)
            .name(&entry)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag)
            .name(&entry)
            .build(),
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let rasterization = vk::PipelineRasterizationStateCreateInfo {
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let blend_attachments = [vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        ..Default::default()
    }];
    let blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);
    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();
    let result = unsafe {
        gpu.device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
    };
    unsafe {
        gpu.device.destroy_shader_module(vert, None);
        gpu.device.destroy_shader_module(frag, None);
    }
    result
        .map_err(|(_, err)| err)
        .context("create blit pipeline")?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("driver returned no pipeline"))
}

/// Swapchain images with their views and framebuffers.
struct SwapchainResources {
    swapchain: vk::SwapchainKHR,
    extent: vk::Extent2D,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainResources {
    fn new(
        gpu: &Gpu,
        surface_format: vk::SurfaceFormatKHR,
        render_pass: vk::RenderPass,
        window_size: (u32, u32),
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let capabilities = unsafe {
            gpu.surface_fn
                .get_physical_device_surface_capabilities(gpu.physical_device, gpu.surface)
        }
        .context("query surface capabilities")?;
        let modes = unsafe {
            gpu.surface_fn
                .get_physical_device_surface_present_modes(gpu.physical_device, gpu.surface)
        }
        .context("query present modes")?;
        let extent = choose_extent(&capabilities, window_size);
        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(gpu.surface)
            .min_image_count(choose_image_count(&capabilities))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(choose_present_mode(&modes))
            .clipped(true)
            .old_swapchain(old);
        let swapchain = unsafe { gpu.swapchain_fn.create_swapchain(&info, None) }
            .context("create swapchain")?;
        let mut resources = Self {
            swapchain,
            extent,
            views: Vec::new(),
            framebuffers: Vec::new(),
        };
        // Partially built resources are torn down on failure.
        if let Err(err) = resources.build_targets(gpu, surface_format.format, render_pass) {
            unsafe { resources.destroy(gpu) };
            return Err(err);
        }
        Ok(resources)
    }

    fn build_targets(
        &mut self,
        gpu: &Gpu,
        format: vk::Format,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        let images = unsafe { gpu.swapchain_fn.get_swapchain_images(self.swapchain) }
            .context("get swapchain images")?;
        for image in images {
            let view = gpu.image_view(image, format)?;
            self.views.push(view);
            let attachments = [view];
            let info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { gpu.device.create_framebuffer(&info, None) }
                .context("create framebuffer")?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    unsafe fn destroy(&self, gpu: &Gpu) {
        for framebuffer in &self.framebuffers {
            gpu.device.destroy_framebuffer(*framebuffer, None);
        }
        for view in &self.views {
            gpu.device.destroy_image_view(*view, None);
        }
        gpu.swapchain_fn.destroy_swapchain(self.swapchain, None);
    }
}

/// Sampled RGBA8 image fed from a persistently mapped staging buffer.
struct FrameTexture {
    extent: vk::Extent2D,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    staging: vk::Buffer,
    staging_memory: vk::DeviceMemory,
    mapped: *mut u8,
    layout: vk::ImageLayout,
    pixels: Vec<u8>,
    dirty: bool,
}

impl FrameTexture {
    fn new(gpu: &Gpu, size: (u32, u32)) -> Result<Self> {
        let device = &gpu.device;
        let extent = vk::Extent2D {
            width: size.0.max(1),
            height: size.1.max(1),
        };
        let byte_len = extent.width as usize * extent.height as usize * BYTES_PER_PIXEL;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&image_info, None) }.context("create frame image")?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = gpu.allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        unsafe { device.bind_image_memory(image, memory, 0) }.context("bind frame image memory")?;
        let view = gpu.image_view(image, TEXTURE_FORMAT)?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        let sampler = unsafe { device.create_sampler(&sampler_info, None) }
            .context("create frame sampler")?;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(byte_len as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let staging = unsafe { device.create_buffer(&buffer_info, None) }
            .context("create staging buffer")?;
        let requirements = unsafe { device.get_buffer_memory_requirements(staging) };
        let staging_memory = gpu.allocate(
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        unsafe { device.bind_buffer_memory(staging, staging_memory, 0) }
            .context("bind staging memory")?;
        let mapped = unsafe {
            device.map_memory(staging_memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
        .context("map staging memory")? as *mut u8;

        Ok(Self {
            extent,
            image,
            memory,
            view,
            sampler,
            staging,
            staging_memory,
            mapped,
            layout: vk::ImageLayout::UNDEFINED,
            // Uploaded on the first draw so the image never samples undefined.
            pixels: vec![0; byte_len],
            dirty: true,
        })
    }

    fn size(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    fn stage(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = frame.size();
        if (width as u32, height as u32) != self.size() {
            return Err(anyhow!(
                "frame is {width}x{height} but the texture is {}x{}",
                self.extent.width,
                self.extent.height
            ));
        }
        frame.write_rgba8(&mut self.pixels);
        self.dirty = true;
        Ok(())
    }

    /// Copies staged pixels into the mapped buffer and records the transfer.
    /// The caller guarantees the previous frame has finished on the GPU.
    fn record_upload(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        unsafe {
            std::ptr::copy_nonoverlapping(self.pixels.as_ptr(), self.mapped, self.pixels.len());
        }
        transition(device, cmd, self.image, self.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        let region = vk::BufferImageCopy {
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
            ..Default::default()
        };
        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                self.staging,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        transition(
            device,
            cmd,
            self.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        self.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        self.dirty = false;
        Ok(())
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        device.unmap_memory(self.staging_memory);
        device.destroy_buffer(self.staging, None);
        device.free_memory(self.staging_memory, None);
        device.destroy_sampler(self.sampler, None);
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Transition {
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
}

fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<Transition> {
    use vk::ImageLayout as L;
    let (src_stage, src_access) = match old {
        L::UNDEFINED => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
        L::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        L::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        _ => return Err(anyhow!("unsupported source layout {old:?}")),
    };
    let (dst_stage, dst_access) = match new {
        L::TRANSFER_DST_OPTIMAL if old != L::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        L::SHADER_READ_ONLY_OPTIMAL if old == L::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        _ => return Err(anyhow!("unsupported layout transition {old:?} -> {new:?}")),
    };
    Ok(Transition {
        src_stage,
        dst_stage,
        src_access,
        dst_access,
    })
}

fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(old, new)?;
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_range())
        .build();
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// Shows effect frames in a window. Each draw uploads the latest staged frame
/// and stretches it over the swapchain image with one fullscreen triangle.
pub struct Presenter {
    surface_format: vk::SurfaceFormatKHR,
    window_size: (u32, u32),
    blit: BlitPipeline,
    swapchain: SwapchainResources,
    texture: FrameTexture,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    // Declared last so it is dropped after everything created from it.
    gpu: Gpu,
}

impl Presenter {
    pub fn new(window: &Window, texture_size: (u32, u32)) -> Result<Self> {
        let gpu = Gpu::new(window)?;
        let formats = unsafe {
            gpu.surface_fn
                .get_physical_device_surface_formats(gpu.physical_device, gpu.surface)
        }
        .context("query surface formats")?;
        let surface_format = choose_surface_format(&formats);
        let size = window.inner_size();
        let window_size = (size.width, size.height);

        let blit = BlitPipeline::new(&gpu, surface_format.format)?;
        let swapchain = SwapchainResources::new(
            &gpu,
            surface_format,
            blit.render_pass,
            window_size,
            vk::SwapchainKHR::null(),
        )?;
        let texture = FrameTexture::new(&gpu, texture_size)?;
        blit.bind_texture(&gpu, &texture);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(gpu.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { gpu.device.create_command_pool(&pool_info, None) }
            .context("create command pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { gpu.device.allocate_command_buffers(&alloc_info) }
            .context("allocate command buffer")?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("command pool returned no buffer"))?;
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let (image_available, render_finished, in_flight) = unsafe {
            (
                gpu.device
                    .create_semaphore(&semaphore_info, None)
                    .context("create acquire semaphore")?,
                gpu.device
                    .create_semaphore(&semaphore_info, None)
                    .context("create present semaphore")?,
                gpu.device
                    .create_fence(&fence_info, None)
                    .context("create frame fence")?,
            )
        };
        log::info!(
            "presenter ready: {}x{} {:?}, frame texture {}x{}",
            swapchain.extent.width,
            swapchain.extent.height,
            surface_format.format,
            texture.extent.width,
            texture.extent.height
        );
        Ok(Self {
            surface_format,
            window_size,
            blit,
            swapchain,
            texture,
            command_pool,
            command_buffer,
            image_available,
            render_finished,
            in_flight,
            gpu,
        })
    }

    pub fn texture_size(&self) -> (u32, u32) {
        self.texture.size()
    }

    /// Rebuilds the swapchain for a new window size and reallocates the frame
    /// texture when its size changed.
    pub fn resize(&mut self, window_size: (u32, u32), texture_size: (u32, u32)) -> Result<()> {
        unsafe { self.gpu.device.device_wait_idle() }.context("wait for device idle")?;
        self.window_size = window_size;
        self.recreate_swapchain()?;
        if texture_size != self.texture.size() {
            let texture = FrameTexture::new(&self.gpu, texture_size)?;
            let old = std::mem::replace(&mut self.texture, texture);
            unsafe { old.destroy(&self.gpu.device) };
            self.blit.bind_texture(&self.gpu, &self.texture);
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let fresh = SwapchainResources::new(
            &self.gpu,
            self.surface_format,
            self.blit.render_pass,
            self.window_size,
            self.swapchain.swapchain,
        )?;
        let old = std::mem::replace(&mut self.swapchain, fresh);
        unsafe { old.destroy(&self.gpu) };
        log::debug!(
            "swapchain rebuilt at {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(())
    }

    /// Stages `frame` for the next [`render`](Self::render).
    pub fn update_texture(&mut self, frame: &Frame) -> Result<()> {
        self.texture.stage(frame)
    }

    /// Draws the staged frame. A stale swapchain is rebuilt and the frame
    /// skipped; a lost device comes back as an error that [`is_device_lost`]
    /// recognises.
    pub fn render(&mut self) -> Result<()> {
        if self.window_size.0 == 0 || self.window_size.1 == 0 {
            return Ok(());
        }
        let device = &self.gpu.device;
        unsafe { device.wait_for_fences(&[self.in_flight], true, u64::MAX) }
            .context("wait for frame fence")?;
        let acquired = unsafe {
            self.gpu.swapchain_fn.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                self.image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match acquired {
            Ok((index, _)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                unsafe { device.device_wait_idle() }.context("wait for device idle")?;
                return self.recreate_swapchain();
            }
            Err(err) => return Err(err).context("acquire swapchain image"),
        };
        unsafe { device.reset_fences(&[self.in_flight]) }.context("reset frame fence")?;
        self.record(image_index)?;

        let device = &self.gpu.device;
        let wait = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let commands = [self.command_buffer];
        let signal = [self.render_finished];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&commands)
            .signal_semaphores(&signal)
            .build();
        unsafe { device.queue_submit(self.gpu.queue, &[submit], self.in_flight) }
            .context("submit frame")?;

        let swapchains = [self.swapchain.swapchain];
        let indices = [image_index];
        let present = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let stale = match unsafe { self.gpu.swapchain_fn.queue_present(self.gpu.queue, &present) } {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(err) => return Err(err).context("present frame"),
        };
        if stale {
            unsafe { self.gpu.device.device_wait_idle() }.context("wait for device idle")?;
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        let device = &self.gpu.device;
        let cmd = self.command_buffer;
        let begin = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("reset command buffer")?;
            device
                .begin_command_buffer(cmd, &begin)
                .context("begin command buffer")?;
        }
        self.texture.record_upload(device, cmd)?;

        let extent = self.swapchain.extent;
        let framebuffer = *self
            .swapchain
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| anyhow!("swapchain image {image_index} has no framebuffer"))?;
        let clear = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        }];
        let area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let pass = vk::RenderPassBeginInfo::builder()
            .render_pass(self.blit.render_pass)
            .framebuffer(framebuffer)
            .render_area(area)
            .clear_values(&clear);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            device.cmd_begin_render_pass(cmd, &pass, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[area]);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.blit.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.blit.layout,
                0,
                &[self.blit.descriptor_set],
                &[],
            );
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).context("end command buffer")?;
        }
        Ok(())
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        let device = &self.gpu.device;
        unsafe {
            let _ = device.device_wait_idle();
            device.destroy_fence(self.in_flight, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_command_pool(self.command_pool, None);
            self.texture.destroy(device);
            self.swapchain.destroy(&self.gpu);
            self.blit.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_is_found_behind_context() {
        let lost = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .context("submit frame")
            .context("render")
            .unwrap_err();
        assert!(is_device_lost(&lost));
        let oom = Err::<(), _>(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
            .context("submit frame")
            .unwrap_err();
        assert!(!is_device_lost(&oom));
        assert!(!is_device_lost(&anyhow!("plain failure")));
    }

    #[test]
    fn upload_transitions_cover_first_and_repeat_uploads() {
        use vk::ImageLayout as L;
        let first = transition_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).expect("first upload");
        assert_eq!(first.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        let repeat = transition_masks(L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL)
            .expect("repeat upload");
        assert_eq!(repeat.src_access, vk::AccessFlags::SHADER_READ);
        let ready = transition_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL)
            .expect("sampling");
        assert_eq!(ready.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert!(transition_masks(L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL).is_err());
        assert!(transition_masks(L::TRANSFER_DST_OPTIMAL, L::TRANSFER_DST_OPTIMAL).is_err());
    }
}
