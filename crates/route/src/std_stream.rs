// SPDX-License-Identifier: MIT

//! Standard-stream routes.
//!
//! `stdout:` and `stderr:` are also the fallback destinations when a
//! job's configured routes fail to open.

use crate::{Route, RouteError};
use std::io::{Read, Write};

enum Stream {
    In,
    Out,
    Err,
}

struct StdRoute {
    url: String,
    stream: Stream,
}

pub(crate) fn stdin(url: &str) -> Box<dyn Route> {
    Box::new(StdRoute {
        url: url.to_string(),
        stream: Stream::In,
    })
}

pub(crate) fn stdout(url: &str) -> Box<dyn Route> {
    Box::new(StdRoute {
        url: url.to_string(),
        stream: Stream::Out,
    })
}

pub(crate) fn stderr(url: &str) -> Box<dyn Route> {
    Box::new(StdRoute {
        url: url.to_string(),
        stream: Stream::Err,
    })
}

impl StdRoute {
    fn io(&self, source: std::io::Error) -> RouteError {
        RouteError::Io {
            url: self.url.clone(),
            source,
        }
    }
}

impl Route for StdRoute {
    fn url(&self) -> &str {
        &self.url
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, RouteError> {
        match self.stream {
            Stream::In => Err(RouteError::Format {
                url: self.url.clone(),
                message: "stdin is not writable".to_string(),
            }),
            Stream::Out => std::io::stdout()
                .write_all(data)
                .map(|_| data.len())
                .map_err(|e| self.io(e)),
            Stream::Err => std::io::stderr()
                .write_all(data)
                .map(|_| data.len())
                .map_err(|e| self.io(e)),
        }
    }

    fn flush(&mut self) -> Result<(), RouteError> {
        match self.stream {
            Stream::In => Ok(()),
            Stream::Out => std::io::stdout().flush().map_err(|e| self.io(e)),
            Stream::Err => std::io::stderr().flush().map_err(|e| self.io(e)),
        }
    }

    fn read_all(&mut self) -> Result<Vec<u8>, RouteError> {
        match self.stream {
            Stream::In => {
                let mut buf = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut buf)
                    .map_err(|e| self.io(e))?;
                Ok(buf)
            }
            _ => Err(RouteError::NotReadable(self.url.clone())),
        }
    }
}
