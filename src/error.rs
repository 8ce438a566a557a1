//! Crate-level error types.

use std::fmt;

use crate::capture::CaptureError;
use crate::gpu::GpuError;

/// Errors produced by the lumo crate.
#[derive(Debug)]
pub enum LumoError {
    /// No usable backlight device was found under `/sys/class/backlight`.
    NoBacklight,
    /// No ambient light sensor was found under the IIO base directory.
    NoAmbientLightSensor,
    /// Vulkan setup or per-frame reduction failure.
    Gpu(GpuError),
    /// Compositor session failure.
    Capture(CaptureError),
    /// Generic I/O failure.
    Io(std::io::Error),
    /// The persistence path could not be resolved (no `XDG_DATA_HOME`
    /// and no `HOME` in the environment).
    NoDataDir,
}

impl fmt::Display for LumoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBacklight => {
                write!(f, "no backlight device found under /sys/class/backlight")
            }
            Self::NoAmbientLightSensor => {
                write!(f, "no ambient light sensor (name \"als\") found")
            }
            Self::Gpu(e) => write!(f, "GPU error: {e}"),
            Self::Capture(e) => write!(f, "capture error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::NoDataDir => {
                write!(f, "cannot resolve data directory: neither XDG_DATA_HOME nor HOME is set")
            }
        }
    }
}

impl std::error::Error for LumoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Gpu(e) => Some(e),
            Self::Capture(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GpuError> for LumoError {
    fn from(e: GpuError) -> Self {
        Self::Gpu(e)
    }
}

impl From<CaptureError> for LumoError {
    fn from(e: CaptureError) -> Self {
        Self::Capture(e)
    }
}

impl From<std::io::Error> for LumoError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
