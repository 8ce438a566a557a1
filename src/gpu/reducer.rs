//! Reduction of a captured frame to its average color.
//!
//! The captured dmabuf is imported as a Vulkan image and blitted, with
//! linear filtering, down a manual mipmap cascade whose tip is a single
//! pixel; that pixel is then copied into a 4-byte host-visible buffer. No
//! full-frame data ever crosses to the CPU.
//!
//! The owned chain image is created at half the capture size with
//! `floor(log2(max(w, h)))` levels, one fewer down-step than a textbook
//! chain. Generating mips directly on the imported image is not an option:
//! its tiling comes from the compositor and need not support it.

use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};

use ash::vk;

use crate::capture::{Frame, FrameObject};
use crate::gpu::{GpuContext, GpuError};

/// Both the imported frame and the reduction chain use plain 8-bit RGBA;
/// the compositor's 32-bit formats alias onto it for averaging purposes.
const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// How long one reduction may hold the tick hostage.
const FENCE_TIMEOUT_NS: u64 = 100_000_000;

/// Reduces captured frames to a single averaged pixel.
///
/// Owns the [`GpuContext`] plus the lazily created chain image and
/// readback buffer, all reused across frames. The chain is sized on the
/// first frame and never resized; a capture with different dimensions is
/// an error.
pub struct FrameReducer {
    ctx: GpuContext,
    resources: Option<ReducerResources>,
    in_flight: bool,
}

/// The long-lived reduction resources, created on the first frame.
struct ReducerResources {
    frame_width: u32,
    frame_height: u32,
    mip_levels: u32,
    base_width: u32,
    base_height: u32,
    image: vk::Image,
    memory: vk::DeviceMemory,
    readback_buffer: vk::Buffer,
    readback_memory: vk::DeviceMemory,
    readback_ptr: *const u8,
}

impl FrameReducer {
    /// Wrap an initialized context.
    #[must_use]
    pub fn new(ctx: GpuContext) -> Self {
        Self {
            ctx,
            resources: None,
            in_flight: false,
        }
    }

    /// Reduce one captured frame to its average `(r, g, b)`.
    ///
    /// Every transient resource created here (the imported image and its
    /// memory) is released on all exit paths, including errors and the
    /// fence timeout.
    pub fn reduce(&mut self, frame: &Frame) -> Result<(u8, u8, u8), GpuError> {
        let object = frame.primary_object().ok_or(GpuError::NoPrimaryPlane)?;

        self.settle_previous()?;
        self.ensure_resources(frame.width, frame.height)?;
        let Some(resources) = self.resources.as_ref() else {
            return Err(GpuError::EmptyFrame);
        };

        let imported = import_frame(&self.ctx, frame, object)?;

        let submitted = record_and_submit(&self.ctx, resources, imported.image, frame);
        if submitted.is_ok() {
            self.in_flight = true;
        }
        let outcome = submitted.and_then(|()| wait_and_reset(&self.ctx));
        if outcome.is_ok() {
            self.in_flight = false;
        }

        drop(imported);
        outcome?;

        // Host-coherent memory: mapped bytes are current once the fence
        // has signaled.
        let pixel = unsafe { std::slice::from_raw_parts(resources.readback_ptr, 4) };
        Ok((pixel[0], pixel[1], pixel[2]))
    }

    /// A fence left signaled-or-pending by an earlier timeout must be
    /// settled before the command buffer can be reused.
    fn settle_previous(&mut self) -> Result<(), GpuError> {
        if self.in_flight {
            wait_and_reset(&self.ctx)?;
            self.in_flight = false;
        }
        Ok(())
    }

    fn ensure_resources(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if let Some(resources) = &self.resources {
            if resources.frame_width == width && resources.frame_height == height {
                return Ok(());
            }
            return Err(GpuError::FrameSizeChanged);
        }
        if width == 0 || height == 0 {
            return Err(GpuError::EmptyFrame);
        }

        let base_width = (width / 2).max(1);
        let base_height = (height / 2).max(1);
        let mip_levels = (31 - width.max(height).leading_zeros()).max(1);

        let device = &self.ctx.device;
        unsafe {
            let image_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(FORMAT)
                .extent(vk::Extent3D {
                    width: base_width,
                    height: base_height,
                    depth: 1,
                })
                .mip_levels(mip_levels)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let image = device.create_image(&image_info, None)?;

            let requirements = device.get_image_memory_requirements(image);
            let memory_type = self
                .ctx
                .find_memory_type(
                    requirements.memory_type_bits,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )
                .or_else(|| {
                    self.ctx
                        .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::empty())
                });
            let Some(memory_type) = memory_type else {
                device.destroy_image(image, None);
                return Err(GpuError::NoCompatibleMemory);
            };

            let allocate_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            let memory = match device.allocate_memory(&allocate_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    device.destroy_image(image, None);
                    return Err(GpuError::Vk(e));
                }
            };
            if let Err(e) = device.bind_image_memory(image, memory, 0) {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
                return Err(GpuError::Vk(e));
            }

            let readback = create_readback_buffer(&self.ctx);
            let (readback_buffer, readback_memory, readback_ptr) = match readback {
                Ok(parts) => parts,
                Err(e) => {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                    return Err(e);
                }
            };

            log::debug!(
                "reduction chain: {base_width}x{base_height}, {mip_levels} levels for {width}x{height} frames"
            );
            self.resources = Some(ReducerResources {
                frame_width: width,
                frame_height: height,
                mip_levels,
                base_width,
                base_height,
                image,
                memory,
                readback_buffer,
                readback_memory,
                readback_ptr,
            });
        }
        Ok(())
    }
}

impl Drop for FrameReducer {
    fn drop(&mut self) {
        if let Some(resources) = self.resources.take() {
            unsafe {
                let _ = self.ctx.device.device_wait_idle();
                self.ctx.device.unmap_memory(resources.readback_memory);
                self.ctx.device.destroy_buffer(resources.readback_buffer, None);
                self.ctx.device.free_memory(resources.readback_memory, None);
                self.ctx.device.destroy_image(resources.image, None);
                self.ctx.device.free_memory(resources.memory, None);
            }
        }
    }
}

/// The imported external image; destroyed on every path out of a
/// reduction.
struct ImportedFrame<'a> {
    device: &'a ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
}

impl Drop for ImportedFrame<'_> {
    fn drop(&mut self) {
        unsafe {
            if self.image != vk::Image::null() {
                self.device.destroy_image(self.image, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Wrap plane 0's dmabuf as a Vulkan image backed by imported memory.
fn import_frame<'a>(
    ctx: &'a GpuContext,
    frame: &Frame,
    object: &FrameObject,
) -> Result<ImportedFrame<'a>, GpuError> {
    let mut guard = ImportedFrame {
        device: &ctx.device,
        image: vk::Image::null(),
        memory: vk::DeviceMemory::null(),
    };

    unsafe {
        let mut external_info = vk::ExternalMemoryImageCreateInfo::default()
            .handle_types(vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT);
        let image_info = vk::ImageCreateInfo::default()
            .push_next(&mut external_info)
            .image_type(vk::ImageType::TYPE_2D)
            .format(FORMAT)
            .extent(vk::Extent3D {
                width: frame.width,
                height: frame.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::LINEAR)
            .usage(vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        guard.image = ctx.device.create_image(&image_info, None)?;

        let requirements = ctx.device.get_image_memory_requirements(guard.image);
        let mut fd_props = vk::MemoryFdPropertiesKHR::default();
        ctx.external_memory_fd.get_memory_fd_properties(
            vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT,
            object.fd.as_raw_fd(),
            &mut fd_props,
        )?;

        let memory_type = ctx
            .find_memory_type(
                requirements.memory_type_bits & fd_props.memory_type_bits,
                vk::MemoryPropertyFlags::empty(),
            )
            .ok_or(GpuError::NoCompatibleMemory)?;

        // The import consumes the descriptor on success, so hand Vulkan a
        // duplicate and let the frame keep its own.
        let raw_fd = object.fd.try_clone().map_err(GpuError::Io)?.into_raw_fd();

        let mut import_info = vk::ImportMemoryFdInfoKHR::default()
            .handle_type(vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT)
            .fd(raw_fd);
        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::default().image(guard.image);
        let allocate_info = vk::MemoryAllocateInfo::default()
            .push_next(&mut import_info)
            .push_next(&mut dedicated_info)
            .allocation_size(u64::from(object.size).max(requirements.size))
            .memory_type_index(memory_type);

        guard.memory = match ctx.device.allocate_memory(&allocate_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                // A failed import leaves descriptor ownership with us.
                drop(OwnedFd::from_raw_fd(raw_fd));
                return Err(GpuError::Vk(e));
            }
        };

        ctx.device.bind_image_memory(guard.image, guard.memory, 0)?;
    }

    Ok(guard)
}

fn create_readback_buffer(
    ctx: &GpuContext,
) -> Result<(vk::Buffer, vk::DeviceMemory, *const u8), GpuError> {
    let device = &ctx.device;
    unsafe {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(4)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = device.create_buffer(&buffer_info, None)?;

        let requirements = device.get_buffer_memory_requirements(buffer);
        let memory_type = ctx.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        let Some(memory_type) = memory_type else {
            device.destroy_buffer(buffer, None);
            return Err(GpuError::NoCompatibleMemory);
        };

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let outcome = device
            .allocate_memory(&allocate_info, None)
            .and_then(|memory| {
                device
                    .bind_buffer_memory(buffer, memory, 0)
                    .and_then(|()| {
                        device
                            .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                            .map(|ptr| (memory, ptr as *const u8))
                    })
                    .map_err(|e| {
                        device.free_memory(memory, None);
                        e
                    })
            });
        match outcome {
            Ok((memory, ptr)) => Ok((buffer, memory, ptr)),
            Err(e) => {
                device.destroy_buffer(buffer, None);
                Err(GpuError::Vk(e))
            }
        }
    }
}

/// Record the barrier/blit cascade and submit it behind the shared fence.
fn record_and_submit(
    ctx: &GpuContext,
    resources: &ReducerResources,
    external_image: vk::Image,
    frame: &Frame,
) -> Result<(), GpuError> {
    let device = &ctx.device;
    let cb = ctx.command_buffer;

    unsafe {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(cb, &begin_info)?;

        // The imported frame becomes a blit source and the whole chain a
        // blit destination in one shot at the top of the pipe.
        let entry_barriers = [
            image_barrier(
                external_image,
                0,
                1,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_READ,
            ),
            image_barrier(
                resources.image,
                0,
                resources.mip_levels,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
            ),
        ];
        device.cmd_pipeline_barrier(
            cb,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &entry_barriers,
        );

        // Full resolution into the half-size level 0.
        blit(
            device,
            cb,
            external_image,
            0,
            (frame.width, frame.height),
            resources.image,
            0,
            level_extent(resources, 0),
        );

        // Standard manual cascade: each level feeds the next, halving and
        // never dropping below one pixel.
        for level in 1..resources.mip_levels {
            let feed = [image_barrier(
                resources.image,
                level - 1,
                1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            )];
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &feed,
            );
            blit(
                device,
                cb,
                resources.image,
                level - 1,
                level_extent(resources, level - 1),
                resources.image,
                level,
                level_extent(resources, level),
            );
        }

        // Expose the tip and pull its single pixel into the buffer.
        let tip = resources.mip_levels - 1;
        let tip_barrier = [image_barrier(
            resources.image,
            tip,
            1,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
        )];
        device.cmd_pipeline_barrier(
            cb,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &tip_barrier,
        );

        let copy = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(tip)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            });
        device.cmd_copy_image_to_buffer(
            cb,
            resources.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            resources.readback_buffer,
            &[copy],
        );

        device.end_command_buffer(cb)?;

        let command_buffers = [cb];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        device.queue_submit(ctx.queue, &[submit], ctx.fence)?;
    }
    Ok(())
}

fn wait_and_reset(ctx: &GpuContext) -> Result<(), GpuError> {
    unsafe {
        match ctx.device.wait_for_fences(&[ctx.fence], true, FENCE_TIMEOUT_NS) {
            Ok(()) => {
                ctx.device.reset_fences(&[ctx.fence])?;
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => Err(GpuError::FenceTimeout),
            Err(e) => Err(GpuError::Vk(e)),
        }
    }
}

/// Extent of `level` within the chain image.
fn level_extent(resources: &ReducerResources, level: u32) -> (u32, u32) {
    (
        (resources.base_width >> level).max(1),
        (resources.base_height >> level).max(1),
    )
}

fn image_barrier(
    image: vk::Image,
    base_mip: u32,
    mip_count: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(base_mip)
                .level_count(mip_count)
                .base_array_layer(0)
                .layer_count(1),
        )
}

#[allow(clippy::too_many_arguments)]
fn blit(
    device: &ash::Device,
    cb: vk::CommandBuffer,
    src_image: vk::Image,
    src_level: u32,
    src_extent: (u32, u32),
    dst_image: vk::Image,
    dst_level: u32,
    dst_extent: (u32, u32),
) {
    let subresource = |level: u32| {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(level)
            .base_array_layer(0)
            .layer_count(1)
    };
    let corner = |extent: (u32, u32)| vk::Offset3D {
        x: extent.0 as i32,
        y: extent.1 as i32,
        z: 1,
    };

    let region = vk::ImageBlit::default()
        .src_subresource(subresource(src_level))
        .src_offsets([vk::Offset3D::default(), corner(src_extent)])
        .dst_subresource(subresource(dst_level))
        .dst_offsets([vk::Offset3D::default(), corner(dst_extent)]);

    unsafe {
        device.cmd_blit_image(
            cb,
            src_image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
            vk::Filter::LINEAR,
        );
    }
}
