//! Blob payload locations.
//!
//! Large payloads are not inlined in JSON request bodies; instead a
//! `Location` names where the bytes physically live so the other side of
//! the plugin boundary can stream them.

use std::io::Write;
use std::path::{Path, PathBuf};

use ocmr_core::error::{OcmError, Result};
use serde::{Deserialize, Serialize};

/// Kind of physical location a payload lives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocationType {
    RemoteUrl,
    UnixNamedPipe,
    LocalFile,
}

/// Where a blob payload physically lives when passed across the plugin
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_type: LocationType,
    pub value: String,
}

impl Location {
    pub fn remote_url(url: impl Into<String>) -> Self {
        Self {
            location_type: LocationType::RemoteUrl,
            value: url.into(),
        }
    }

    pub fn local_file(path: impl AsRef<Path>) -> Self {
        Self {
            location_type: LocationType::LocalFile,
            value: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    pub fn unix_named_pipe(path: impl AsRef<Path>) -> Self {
        Self {
            location_type: LocationType::UnixNamedPipe,
            value: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// Spill `reader` into a fresh file under `dir` and return a local-file
    /// location pointing at it. The file is not cleaned up automatically;
    /// the receiving side owns it once the location has been handed over.
    pub fn from_reader(dir: &Path, reader: &mut dyn std::io::Read) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            OcmError::IoError(std::io::Error::new(
                e.kind(),
                format!("failed to create payload dir {}: {}", dir.display(), e),
            ))
        })?;
        let mut file = tempfile::Builder::new()
            .prefix("payload-")
            .tempfile_in(dir)
            .map_err(OcmError::IoError)?;
        std::io::copy(reader, file.as_file_mut()).map_err(OcmError::IoError)?;
        file.as_file_mut().flush().map_err(OcmError::IoError)?;
        let (_, path) = file.keep().map_err(|e| {
            OcmError::Other(format!("failed to persist payload file: {}", e))
        })?;
        Ok(Self::local_file(path))
    }

    /// Open a local-file location for reading.
    ///
    /// Fails for non-file location types; remote URLs are fetched by the
    /// transport layer, not here.
    pub fn open(&self) -> Result<std::fs::File> {
        match self.location_type {
            LocationType::LocalFile => {
                std::fs::File::open(&self.value).map_err(|e| {
                    OcmError::IoError(std::io::Error::new(
                        e.kind(),
                        format!("failed to open payload file {}: {}", self.value, e),
                    ))
                })
            }
            other => Err(OcmError::Unsupported(format!(
                "cannot open location of type {:?} as a file",
                other
            ))),
        }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.value)
    }
}
