//! Backlight device access and stepped transitions.
//!
//! The kernel exposes a backlight as a directory under
//! `/sys/class/backlight` with a fixed `max_brightness` and a read-write
//! `brightness` attribute in raw device units. Lumo works in percent
//! internally and converts at the device boundary: `raw = percent * max /
//! 100`, truncated, matching what the kernel reports back.

mod transition;

pub use transition::{step_delay, step_plan};

use std::fs::{File, OpenOptions};
use std::io::{Error, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::LumoError;

const SYSFS_BASE: &str = "/sys/class/backlight";

/// The held-open backlight device.
#[derive(Debug)]
pub struct Backlight {
    brightness: File,
    max_raw: u32,
}

impl Backlight {
    /// Open the first device under `/sys/class/backlight`.
    pub fn discover() -> Result<Self, LumoError> {
        let entries = std::fs::read_dir(SYSFS_BASE).map_err(|_| LumoError::NoBacklight)?;
        for entry in entries.flatten() {
            let dir = entry.path();
            if dir.join("brightness").exists() {
                log::info!("using backlight at {}", dir.display());
                return Self::open(&dir).map_err(LumoError::Io);
            }
        }
        Err(LumoError::NoBacklight)
    }

    /// Open the backlight rooted at `dir`.
    ///
    /// `max_brightness` is read once; `brightness` stays open read-write
    /// for the process lifetime.
    pub fn open(dir: &Path) -> Result<Self, Error> {
        let max_content = std::fs::read_to_string(dir.join("max_brightness"))?;
        let max_raw: u32 = max_content
            .trim()
            .parse()
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("bad max_brightness: {e}")))?;
        if max_raw == 0 {
            return Err(Error::new(ErrorKind::InvalidData, "max_brightness is 0"));
        }

        let brightness = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join("brightness"))?;

        Ok(Self {
            brightness,
            max_raw,
        })
    }

    /// Current level as a percentage of `max_brightness`, truncated.
    pub fn percent(&mut self) -> Result<u8, Error> {
        let _ = self.brightness.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        let _ = self.brightness.read_to_string(&mut content)?;

        let raw: u32 = content
            .trim()
            .parse()
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("bad brightness: {e}")))?;

        Ok((raw.min(self.max_raw) * 100 / self.max_raw) as u8)
    }

    /// Step the device from `current` to `target` percent, one percent per
    /// write, paced so the whole transition takes roughly 300 ms.
    ///
    /// A no-op when the two are equal. Sleeps resume after signal
    /// interruption, so a transition always runs to completion once
    /// started. A write failure aborts the walk with the device stopped at
    /// the last level written; the caller resynchronizes from the device.
    pub fn transition(&mut self, current: u8, target: u8) -> Result<(), Error> {
        if current == target {
            return Ok(());
        }

        let delay = step_delay(current, target);
        for step in step_plan(current, target) {
            self.write_raw(u32::from(step) * self.max_raw / 100)?;
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn write_raw(&mut self, raw: u32) -> Result<(), Error> {
        self.brightness.set_len(0)?;
        let _ = self.brightness.seek(SeekFrom::Start(0))?;
        write!(self.brightness, "{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::Backlight;

    fn fake_device(max: &str, brightness: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("max_brightness"), max).unwrap();
        std::fs::write(dir.path().join("brightness"), brightness).unwrap();
        dir
    }

    #[test]
    fn percent_truncates_toward_zero() {
        let dir = fake_device("255\n", "128\n");
        let mut backlight = Backlight::open(dir.path()).unwrap();
        // 128 * 100 / 255 = 50.19... -> 50
        assert_eq!(backlight.percent().unwrap(), 50);
    }

    #[test]
    fn transition_writes_final_raw_value() {
        let dir = fake_device("1000\n", "200\n");
        let mut backlight = Backlight::open(dir.path()).unwrap();

        backlight.transition(20, 24).unwrap();

        let content = std::fs::read_to_string(dir.path().join("brightness")).unwrap();
        assert_eq!(content, "240");
        assert_eq!(backlight.percent().unwrap(), 24);
    }

    #[test]
    fn zero_max_brightness_is_rejected() {
        let dir = fake_device("0\n", "0\n");
        assert!(Backlight::open(dir.path()).is_err());
    }
}
