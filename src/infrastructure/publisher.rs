//! Publisher
//!
//! Serializes surfaced control changes and writes them to the output
//! transport. Each record gets a single write; failed or short writes are
//! reported, never retried.

use crate::domain::controller::ControlChange;
use crate::domain::line::ControlLine;
use std::io::{self, Write};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport write failed for {id}: {source}")]
    Write {
        id: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("short write for {id}: {written} of {len} bytes")]
    Short {
        id: &'static str,
        written: usize,
        len: usize,
    },
}

pub struct Publisher {
    transport: Box<dyn Write + Send>,
    echo: bool,
}

impl Publisher {
    /// `echo` mirrors every written line to the debug log.
    pub fn new(transport: Box<dyn Write + Send>, echo: bool) -> Self {
        Self { transport, echo }
    }

    /// Write one change as a single record.
    pub fn publish(&mut self, change: &ControlChange) -> Result<(), PublishError> {
        let line = ControlLine::from(change).to_string();
        if self.echo {
            debug!("Output: {}", line.trim_end());
        }

        let id = change.id.as_str();
        let written = self
            .transport
            .write(line.as_bytes())
            .and_then(|n| self.transport.flush().map(|_| n))
            .map_err(|source| PublishError::Write { id, source })?;

        if written < line.len() {
            return Err(PublishError::Short {
                id,
                written,
                len: line.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::models::{ControlId, ControlValue};
    use std::sync::{Arc, Mutex};

    /// Transport capturing everything written, shared with the test body.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    /// Accepts at most three bytes per write.
    #[derive(Clone, Default)]
    struct Trickle(SharedBuffer);

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn change(id: ControlId, value: ControlValue) -> ControlChange {
        ControlChange {
            id,
            value,
            publish: true,
        }
    }

    #[test]
    fn writes_one_line_per_change() {
        let buffer = SharedBuffer::default();
        let mut publisher = Publisher::new(Box::new(buffer.clone()), true);
        publisher
            .publish(&change(ControlId::Lab, ControlValue::Button(true)))
            .unwrap();
        publisher
            .publish(&change(ControlId::Rtr, ControlValue::Trigger(50.0)))
            .unwrap();
        assert_eq!(buffer.contents(), "LAB;1\nRTR;50.00\n");
    }

    #[test]
    fn write_failure_is_reported_not_retried() {
        let mut publisher = Publisher::new(Box::new(BrokenPipe), false);
        let err = publisher
            .publish(&change(ControlId::Lab, ControlValue::Button(true)))
            .unwrap_err();
        assert!(err.to_string().contains("LAB"));
    }

    #[test]
    fn short_write_is_reported_not_completed() {
        let trickle = Trickle::default();
        let mut publisher = Publisher::new(Box::new(trickle.clone()), false);
        let err = publisher
            .publish(&change(ControlId::Rtr, ControlValue::Trigger(50.0)))
            .unwrap_err();

        assert!(matches!(
            err,
            PublishError::Short {
                id: "RTR",
                written: 3,
                len: 10
            }
        ));
        assert_eq!(trickle.0.contents(), "RTR");
    }
}
