// SPDX-License-Identifier: MIT

//! Plain-file route drivers: `file:`, `filea:` and `fileov:`.

use crate::{Route, RouteError};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Truncate on the first write of this open.
    Plain,
    /// Append to whatever is there.
    Append,
    /// Truncate on every write.
    Overwrite,
}

pub(crate) struct FileRoute {
    url: String,
    path: PathBuf,
    mode: Mode,
    written: bool,
}

impl FileRoute {
    pub(crate) fn open(url: &str, path: &str, mode: Mode) -> Result<Box<dyn Route>, RouteError> {
        if path.is_empty() {
            return Err(RouteError::Format {
                url: url.to_string(),
                message: "empty file path".to_string(),
            });
        }
        Ok(Box::new(Self {
            url: url.to_string(),
            path: PathBuf::from(path),
            mode,
            written: false,
        }))
    }

    fn io(&self, source: std::io::Error) -> RouteError {
        RouteError::Io {
            url: self.url.clone(),
            source,
        }
    }
}

impl Route for FileRoute {
    fn url(&self) -> &str {
        &self.url
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, RouteError> {
        let truncate = match self.mode {
            Mode::Plain => !self.written,
            Mode::Append => false,
            Mode::Overwrite => true,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(!truncate)
            .write(true)
            .truncate(truncate)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        file.write_all(data).map_err(|e| self.io(e))?;
        self.written = true;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), RouteError> {
        // Writes are open-write-close, nothing buffered.
        Ok(())
    }

    fn read_all(&mut self) -> Result<Vec<u8>, RouteError> {
        let mut buf = Vec::new();
        std::fs::File::open(&self.path)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .map_err(|e| self.io(e))?;
        Ok(buf)
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
