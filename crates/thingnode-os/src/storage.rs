use std::fs;
use std::path::{Path, PathBuf};

use thingnode::error::{Error as CoreError, ErrorKind as CoreErrorKind, Result as CoreResult};
use thingnode::settings::Storage;

use tracing::{debug, warn};

use crate::error::{Error, Result};

// Value of an erased byte.
const ERASED: u8 = 0xFF;

/// A settings region backed by a file.
///
/// The whole region is kept in memory and written back on
/// [`Storage::commit`]. A missing file reads as an erased region.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    bytes: Vec<u8>,
    dirty: bool,
}

impl FileStorage {
    /// Opens the region stored at `path`, sized to `capacity` bytes.
    ///
    /// A shorter file is padded with erased bytes, a longer one is
    /// truncated.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at `{}`, starting erased", path.display());
                Vec::new()
            }
            Err(e) => return Err(Error::from(e)),
        };

        if bytes.len() != capacity {
            if !bytes.is_empty() {
                warn!(
                    "Settings file `{}` has {} bytes, resizing to {capacity}",
                    path.display(),
                    bytes.len()
                );
            }
            bytes.resize(capacity, ERASED);
        }

        Ok(Self {
            path,
            bytes,
            dirty: false,
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn range(&self, address: usize, len: usize) -> CoreResult<std::ops::Range<usize>> {
        address
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .map(|end| address..end)
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorKind::Storage,
                    format!(
                        "Range {address}+{len} exceeds the {} bytes region",
                        self.bytes.len()
                    ),
                )
            })
    }
}

impl Storage for FileStorage {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&mut self, address: usize, buffer: &mut [u8]) -> CoreResult<()> {
        let range = self.range(address, buffer.len())?;
        buffer.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, address: usize, bytes: &[u8]) -> CoreResult<()> {
        let range = self.range(address, bytes.len())?;
        if self.bytes[range.clone()] != *bytes {
            self.bytes[range].copy_from_slice(bytes);
            self.dirty = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> CoreResult<()> {
        if !self.dirty {
            return Ok(());
        }

        fs::write(&self.path, &self.bytes)
            .map_err(|e| Error::from(e).into_core(CoreErrorKind::Storage))?;
        self.dirty = false;
        debug!("Settings written to `{}`", self.path.display());
        Ok(())
    }
}
