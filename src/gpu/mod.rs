//! Vulkan frame reduction.
//!
//! This layer is deliberately low and mostly unsafe; nothing Vulkan-flavored
//! leaks past it. [`GpuContext`] owns the instance, device, queue, and the
//! single command buffer and fence the daemon reuses every tick;
//! [`FrameReducer`] imports each captured frame and collapses it to one
//! average pixel.

mod context;
mod reducer;

pub use context::GpuContext;
pub use reducer::FrameReducer;

use std::fmt;

use ash::vk;

/// Errors from Vulkan setup or per-frame reduction.
#[derive(Debug)]
pub enum GpuError {
    /// The Vulkan loader could not be found or initialized.
    Loading(ash::LoadingError),
    /// A Vulkan call failed outright.
    Vk(vk::Result),
    /// No physical device is present.
    NoPhysicalDevice,
    /// No queue family supports graphics (blits need one).
    NoGraphicsQueue,
    /// No memory type satisfies an allocation's requirements.
    NoCompatibleMemory,
    /// The GPU did not finish the reduction within the 100 ms wait.
    FenceTimeout,
    /// The captured frame carries no plane 0 object.
    NoPrimaryPlane,
    /// The captured frame has a zero dimension.
    EmptyFrame,
    /// The frame dimensions changed mid-run; resize is not supported.
    FrameSizeChanged,
    /// Descriptor duplication for the memory import failed.
    Io(std::io::Error),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading(e) => write!(f, "Vulkan loader unavailable: {e}"),
            Self::Vk(e) => write!(f, "Vulkan call failed: {e}"),
            Self::NoPhysicalDevice => write!(f, "no Vulkan physical device"),
            Self::NoGraphicsQueue => write!(f, "no graphics-capable queue family"),
            Self::NoCompatibleMemory => write!(f, "no compatible memory type"),
            Self::FenceTimeout => write!(f, "GPU reduction timed out"),
            Self::NoPrimaryPlane => write!(f, "frame has no plane 0 object"),
            Self::EmptyFrame => write!(f, "frame has a zero dimension"),
            Self::FrameSizeChanged => write!(f, "frame dimensions changed mid-run"),
            Self::Io(e) => write!(f, "descriptor duplication failed: {e}"),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Loading(e) => Some(e),
            Self::Vk(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<vk::Result> for GpuError {
    fn from(e: vk::Result) -> Self {
        Self::Vk(e)
    }
}

impl From<ash::LoadingError> for GpuError {
    fn from(e: ash::LoadingError) -> Self {
        Self::Loading(e)
    }
}
