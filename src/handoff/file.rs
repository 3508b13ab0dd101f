//! File-backed handoff store.
//!
//! Writes go to a uniquely named temporary file in the same directory, are
//! flushed to disk, and are then renamed over the record, so readers see
//! either the old record or the new one. The directory is synced after the
//! rename so the new entry survives a crash.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use uuid::Uuid;

use super::{HandoffRecord, HandoffStore, HandoffStoreError, validate_record};

/// Stores the handoff record as pretty-printed JSON in a single file.
#[derive(Clone, Debug)]
pub struct FileHandoffStore {
    path: Utf8PathBuf,
}

impl FileHandoffStore {
    /// Creates a store for the record at `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the record location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn io_error(path: &Utf8Path, err: &io::Error) -> HandoffStoreError {
        HandoffStoreError::Io {
            location: path.to_string(),
            message: err.to_string(),
        }
    }

    pub(super) fn split(&self) -> Result<(&Utf8Path, &str), HandoffStoreError> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| HandoffStoreError::Invalid {
                location: self.path.to_string(),
                message: String::from("state file path is missing a filename"),
            })?;
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Ok((parent, file_name))
    }
}

impl HandoffStore for FileHandoffStore {
    fn read(&self) -> Result<Option<HandoffRecord>, HandoffStoreError> {
        let (parent, file_name) = self.split()?;
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_error(parent, &err)),
        };

        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_error(&self.path, &err)),
        };

        let record: HandoffRecord =
            serde_json::from_str(&contents).map_err(|err| HandoffStoreError::Parse {
                location: self.path.to_string(),
                message: err.to_string(),
            })?;
        validate_record(self.path.as_str(), &record)?;
        Ok(Some(record))
    }

    fn write(&self, record: &HandoffRecord) -> Result<(), HandoffStoreError> {
        let (parent, file_name) = self.split()?;
        let mut rendered =
            serde_json::to_string_pretty(record).map_err(|err| HandoffStoreError::Parse {
                location: self.path.to_string(),
                message: err.to_string(),
            })?;
        rendered.push('\n');

        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| Self::io_error(parent, &err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| Self::io_error(parent, &err))?;

        let temp_name = format!(".{file_name}.{}.tmp", Uuid::new_v4().simple());
        let staged = write_synced(&dir, &temp_name, rendered.as_bytes())
            .and_then(|()| dir.rename(&temp_name, &dir, file_name));
        if let Err(err) = staged {
            dir.remove_file(&temp_name).ok();
            return Err(Self::io_error(&self.path, &err));
        }
        sync_directory(&dir).map_err(|err| Self::io_error(parent, &err))
    }
}

fn write_synced(dir: &Dir, name: &str, bytes: &[u8]) -> io::Result<()> {
    let mut file = dir.create(name)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
pub(super) fn sync_directory(dir: &Dir) -> io::Result<()> {
    dir.as_cap_std().try_clone()?.into_std_file().sync_all()
}

#[cfg(not(unix))]
pub(super) fn sync_directory(_dir: &Dir) -> io::Result<()> {
    Ok(())
}
