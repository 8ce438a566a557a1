//! Vulkan instance, device, and per-tick submission resources.

use ash::vk;

use crate::gpu::GpuError;

/// Process-wide Vulkan state.
///
/// One instance, the first enumerated physical device, one graphics queue,
/// and the command buffer and fence reused by every reduction. All of it
/// lives for the whole run and is torn down in [`Drop`]. Setup failure is
/// fatal to the process, so partially built state is simply abandoned to
/// the driver.
pub struct GpuContext {
    _entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) device: ash::Device,
    pub(crate) memory_props: vk::PhysicalDeviceMemoryProperties,
    pub(crate) queue: vk::Queue,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) fence: vk::Fence,
    pub(crate) external_memory_fd: ash::khr::external_memory_fd::Device,
    command_pool: vk::CommandPool,
}

impl GpuContext {
    /// Bring up Vulkan with the external-memory extensions the dmabuf
    /// import needs.
    pub fn new() -> Result<Self, GpuError> {
        unsafe {
            let entry = ash::Entry::load()?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"lumo")
                .api_version(vk::API_VERSION_1_1);
            let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);
            let instance = entry.create_instance(&instance_info, None)?;

            let physical = *instance
                .enumerate_physical_devices()?
                .first()
                .ok_or(GpuError::NoPhysicalDevice)?;

            let queue_family = instance
                .get_physical_device_queue_family_properties(physical)
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .ok_or(GpuError::NoGraphicsQueue)? as u32;

            let priorities = [1.0_f32];
            let queue_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(queue_family)
                .queue_priorities(&priorities)];
            let extensions = [
                ash::khr::external_memory_fd::NAME.as_ptr(),
                ash::ext::external_memory_dma_buf::NAME.as_ptr(),
            ];
            let device_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_infos)
                .enabled_extension_names(&extensions);
            let device = instance.create_device(physical, &device_info, None)?;
            let queue = device.get_device_queue(queue_family, 0);

            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(queue_family);
            let command_pool = device.create_command_pool(&pool_info, None)?;

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = *device
                .allocate_command_buffers(&allocate_info)?
                .first()
                .ok_or(GpuError::Vk(vk::Result::ERROR_UNKNOWN))?;

            let fence = device.create_fence(&vk::FenceCreateInfo::default(), None)?;

            let memory_props = instance.get_physical_device_memory_properties(physical);
            let external_memory_fd = ash::khr::external_memory_fd::Device::new(&instance, &device);

            Ok(Self {
                _entry: entry,
                instance,
                device,
                memory_props,
                queue,
                command_buffer,
                fence,
                external_memory_fd,
                command_pool,
            })
        }
    }

    /// Index of a memory type allowed by `type_bits` and carrying
    /// `properties`, if one exists.
    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        let count = self.memory_props.memory_type_count as usize;
        self.memory_props.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(index, memory_type)| {
                type_bits & (1 << index) != 0 && memory_type.property_flags.contains(properties)
            })
            .map(|(index, _)| index as u32)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
