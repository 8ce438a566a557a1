//! Ambient light sensor access through the IIO sysfs interface.
//!
//! An ALS device is a directory under the IIO base (default
//! `/sys/bus/iio/devices`, overridable with `LUMO_ALS_BASE`) whose `name`
//! attribute reads `als`. `in_illuminance_scale` and
//! `in_illuminance_offset` are read once at discovery; `in_illuminance_raw`
//! is kept open and re-read every tick.

mod window;

pub use window::{LuxWindow, SAMPLE_WINDOW};

use std::fs::File;
use std::io::{Error, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::LumoError;

const DEFAULT_BASE: &str = "/sys/bus/iio/devices";
const BASE_ENV: &str = "LUMO_ALS_BASE";

/// A discovered ambient light sensor.
#[derive(Debug)]
pub struct AmbientLightSensor {
    raw: File,
    scale: f64,
    offset: f64,
}

impl AmbientLightSensor {
    /// Find the first IIO device advertising itself as `als`.
    pub fn discover() -> Result<Self, LumoError> {
        let base = std::env::var(BASE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_BASE));

        let entries = std::fs::read_dir(&base).map_err(|_| LumoError::NoAmbientLightSensor)?;
        for entry in entries.flatten() {
            let dir = entry.path();
            let Ok(name) = std::fs::read_to_string(dir.join("name")) else {
                continue;
            };
            if name.trim() == "als" {
                log::info!("using ambient light sensor at {}", dir.display());
                return Self::open(&dir).map_err(LumoError::Io);
            }
        }
        Err(LumoError::NoAmbientLightSensor)
    }

    /// Open the sensor rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, Error> {
        let scale = read_optional_factor(&dir.join("in_illuminance_scale")).unwrap_or(1.0);
        let offset = read_optional_factor(&dir.join("in_illuminance_offset")).unwrap_or(0.0);
        let raw = File::open(dir.join("in_illuminance_raw"))?;

        Ok(Self { raw, scale, offset })
    }

    /// Current illuminance: `round((raw + offset) * scale)`, floored at 0.
    pub fn read_lux(&mut self) -> Result<u32, Error> {
        let _ = self.raw.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        let _ = self.raw.read_to_string(&mut content)?;

        let raw: f64 = content
            .trim()
            .parse()
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("bad raw reading: {e}")))?;

        Ok(((raw + self.offset) * self.scale).round().max(0.0) as u32)
    }
}

/// Parse an optional single-value sysfs attribute, ignoring it entirely if
/// it is absent or unreadable.
fn read_optional_factor(path: &Path) -> Option<f64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::AmbientLightSensor;

    fn fake_sensor(raw: &str, scale: Option<&str>, offset: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("name"), "als\n").unwrap();
        std::fs::write(dir.path().join("in_illuminance_raw"), raw).unwrap();
        if let Some(scale) = scale {
            std::fs::write(dir.path().join("in_illuminance_scale"), scale).unwrap();
        }
        if let Some(offset) = offset {
            std::fs::write(dir.path().join("in_illuminance_offset"), offset).unwrap();
        }
        dir
    }

    #[test]
    fn raw_reading_with_defaults() {
        let dir = fake_sensor("412\n", None, None);
        let mut sensor = AmbientLightSensor::open(dir.path()).unwrap();
        assert_eq!(sensor.read_lux().unwrap(), 412);
    }

    #[test]
    fn scale_and_offset_apply() {
        let dir = fake_sensor("100\n", Some("0.5\n"), Some("10\n"));
        let mut sensor = AmbientLightSensor::open(dir.path()).unwrap();
        // (100 + 10) * 0.5 = 55
        assert_eq!(sensor.read_lux().unwrap(), 55);
    }

    #[test]
    fn negative_results_floor_at_zero() {
        let dir = fake_sensor("3\n", Some("1.0\n"), Some("-50\n"));
        let mut sensor = AmbientLightSensor::open(dir.path()).unwrap();
        assert_eq!(sensor.read_lux().unwrap(), 0);
    }

    #[test]
    fn rereads_current_value() {
        let dir = fake_sensor("1\n", None, None);
        let mut sensor = AmbientLightSensor::open(dir.path()).unwrap();
        assert_eq!(sensor.read_lux().unwrap(), 1);

        std::fs::write(dir.path().join("in_illuminance_raw"), "2\n").unwrap();
        assert_eq!(sensor.read_lux().unwrap(), 2);
    }

    #[test]
    fn garbage_reading_is_an_error() {
        let dir = fake_sensor("not-a-number\n", None, None);
        let mut sensor = AmbientLightSensor::open(dir.path()).unwrap();
        assert!(sensor.read_lux().is_err());
    }
}
