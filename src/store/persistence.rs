//! On-disk persistence for the preference store.
//!
//! The format is one record per line, `lux luma backlight`, decimal
//! integers separated by single spaces, no header or trailer. The file is
//! opened once with `O_SYNC` and held for the process lifetime; every save
//! truncates and rewrites it from offset zero, so a crash mid-session never
//! leaves a partial trailing record for the next load to trip over.

use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::LumoError;
use crate::store::{DataPoint, PreferenceStore};

/// The held-open preference data file.
#[derive(Debug)]
pub struct DataFile {
    file: File,
}

impl DataFile {
    /// Open (creating if needed) the preference file at its default
    /// location: `$XDG_DATA_HOME/lumo/data`, falling back to
    /// `$HOME/.local/share/lumo/data`.
    ///
    /// The directory is created with mode `0700` and the file with `0600`.
    pub fn open() -> Result<Self, LumoError> {
        let path = default_path().ok_or(LumoError::NoDataDir)?;
        Self::open_at(&path).map_err(LumoError::Io)
    }

    /// Open (creating if needed) a preference file at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, Error> {
        use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

        if let Some(dir) = path.parent() {
            if !dir.exists() {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(dir)?;
            }
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .custom_flags(libc::O_SYNC)
            .open(path)?;

        Ok(Self { file })
    }

    /// Read every record into `store` without pruning (the file holds a
    /// previously pruned set) and raise the store's observed lux ceiling.
    pub fn load(&mut self, store: &mut PreferenceStore) -> Result<(), Error> {
        let _ = self.file.seek(SeekFrom::Start(0))?;

        for line in BufReader::new(&self.file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            store.restore(parse_record(&line)?);
        }
        Ok(())
    }

    /// Rewrite the file from offset zero with the store's current points,
    /// in store order.
    pub fn persist(&mut self, store: &PreferenceStore) -> Result<(), Error> {
        self.file.set_len(0)?;
        let _ = self.file.seek(SeekFrom::Start(0))?;

        for point in store.points() {
            writeln!(self.file, "{} {} {}", point.lux, point.luma, point.backlight)?;
        }
        Ok(())
    }
}

fn parse_record(line: &str) -> Result<DataPoint, Error> {
    let mut fields = line.split(' ');
    let mut next = || {
        fields
            .next()
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, format!("short record: {line:?}")))
    };

    let lux: u32 = parse_field(next()?)?;
    let luma: u8 = parse_field(next()?)?;
    let backlight: u8 = parse_field(next()?)?;

    // The percentage fields carry hard ranges (luma 0..=100, backlight
    // 1..=100); a record outside them is as corrupt as a non-numeric one.
    if luma > 100 || backlight == 0 || backlight > 100 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("out-of-range record: {line:?}"),
        ));
    }

    Ok(DataPoint {
        lux,
        luma,
        backlight,
    })
}

fn parse_field<T>(field: &str) -> Result<T, Error>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    field
        .parse()
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("bad field {field:?}: {e}")))
}

/// `$XDG_DATA_HOME/lumo/data`, or `$HOME/.local/share/lumo/data`.
fn default_path() -> Option<PathBuf> {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        if !data_home.is_empty() {
            return Some(PathBuf::from(data_home).join("lumo").join("data"));
        }
    }
    let home = std::env::var("HOME").ok().filter(|h| !h.is_empty())?;
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("lumo")
            .join("data"),
    )
}

#[cfg(test)]
mod tests {
    use super::DataFile;
    use crate::store::{DataPoint, PreferenceStore};

    fn point(lux: u32, luma: u8, backlight: u8) -> DataPoint {
        DataPoint {
            lux,
            luma,
            backlight,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");

        let mut store = PreferenceStore::new();
        store.add(point(0, 10, 20));
        store.add(point(1000, 90, 80));
        store.add(point(500, 50, 50));

        let mut file = DataFile::open_at(&path).unwrap();
        file.persist(&store).unwrap();

        let mut restored = PreferenceStore::new();
        let mut file = DataFile::open_at(&path).unwrap();
        file.load(&mut restored).unwrap();

        assert_eq!(restored.points(), store.points());
        assert_eq!(restored.max_seen_lux(), 1000);
    }

    #[test]
    fn load_of_empty_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DataFile::open_at(&dir.path().join("data")).unwrap();

        let mut store = PreferenceStore::new();
        file.load(&mut store).unwrap();

        assert!(store.is_empty());
        assert_eq!(store.max_seen_lux(), 1);
    }

    #[test]
    fn persist_truncates_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let mut file = DataFile::open_at(&path).unwrap();

        let mut big = PreferenceStore::new();
        big.add(point(100, 10, 20));
        big.add(point(200, 90, 80));
        file.persist(&big).unwrap();

        let mut small = PreferenceStore::new();
        small.add(point(7, 7, 7));
        file.persist(&small).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "7 7 7\n");
    }

    #[test]
    fn malformed_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, "100 40\n").unwrap();

        let mut store = PreferenceStore::new();
        let mut file = DataFile::open_at(&path).unwrap();
        assert!(file.load(&mut store).is_err());
    }

    #[test]
    fn out_of_range_record_is_an_error() {
        // Numeric but nonsensical fields must not wrap into range.
        for record in ["100 300 500\n", "100 101 50\n", "100 40 0\n"] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("data");
            std::fs::write(&path, record).unwrap();

            let mut store = PreferenceStore::new();
            let mut file = DataFile::open_at(&path).unwrap();
            assert!(file.load(&mut store).is_err(), "accepted {record:?}");
            assert!(store.is_empty());
        }
    }

    #[test]
    fn serialized_format_is_line_per_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");

        let mut store = PreferenceStore::new();
        store.add(point(450, 62, 38));
        store.add(point(12, 5, 90));

        let mut file = DataFile::open_at(&path).unwrap();
        file.persist(&store).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "450 62 38\n12 5 90\n"
        );
    }
}
