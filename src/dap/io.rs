//! `Content-Length` framing of DAP messages.

use crate::dap::tracer::FileTracer;
use anyhow::{anyhow, Context};
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, Write};

/// Largest message body accepted from a client.
pub const MAX_CONTENT_LENGTH: usize = 16 * 1024 * 1024;

pub struct DapReader<R> {
    reader: R,
    tracer: Option<(FileTracer, u16)>,
}

impl<R: BufRead> DapReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            tracer: None,
        }
    }

    pub fn with_tracer(mut self, tracer: Option<FileTracer>, port: u16) -> Self {
        self.tracer = tracer.map(|t| (t, port));
        self
    }

    /// Read next message, `Ok(None)` on a clean end of stream.
    ///
    /// A frame whose body is not valid JSON is logged and skipped, the
    /// framing itself stays intact.
    pub fn read_message(&mut self) -> anyhow::Result<Option<Value>> {
        loop {
            let Some(payload) = self.read_frame()? else {
                return Ok(None);
            };
            if let Some((tracer, port)) = &self.tracer {
                tracer.message(*port, "<-", &payload);
            }
            match serde_json::from_slice(&payload) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => log::warn!(target: "dap", "skip malformed message: {e}"),
            }
        }
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let mut content_length: Option<usize> = None;
        let mut header_seen = false;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                if header_seen {
                    return Err(anyhow!("connection closed inside message header"));
                }
                return Ok(None);
            }
            header_seen = true;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse().context("parse Content-Length")?);
            }
        }

        let len = content_length.ok_or_else(|| anyhow!("missing Content-Length header"))?;
        if len > MAX_CONTENT_LENGTH {
            return Err(anyhow!(
                "Content-Length {len} exceeds the limit of {MAX_CONTENT_LENGTH} bytes"
            ));
        }
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(Some(buf))
    }
}

pub struct DapWriter<W> {
    writer: W,
    tracer: Option<(FileTracer, u16)>,
}

impl<W: Write> DapWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            tracer: None,
        }
    }

    pub fn with_tracer(mut self, tracer: Option<FileTracer>, port: u16) -> Self {
        self.tracer = tracer.map(|t| (t, port));
        self
    }

    pub fn write_message<T: Serialize>(&mut self, v: &T) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(v)?;
        if let Some((tracer, port)) = &self.tracer {
            tracer.message(*port, "->", &payload);
        }
        write!(self.writer, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn frame(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{body}", body.len())
    }

    #[test]
    fn test_read_sequence() {
        let input = [
            frame(r#"{"seq":1}"#),
            frame("{not json"),
            frame(r#"{"seq":2}"#),
        ]
        .concat();
        let mut reader = DapReader::new(Cursor::new(input.into_bytes()));

        assert_eq!(reader.read_message().unwrap(), Some(json!({"seq": 1})));
        assert_eq!(reader.read_message().unwrap(), Some(json!({"seq": 2})));
        assert_eq!(reader.read_message().unwrap(), None);
    }

    #[test]
    fn test_read_broken_header() {
        let mut reader = DapReader::new(Cursor::new(b"X-Other: 1\r\n\r\n{}".to_vec()));
        assert!(reader.read_message().is_err());

        let mut reader = DapReader::new(Cursor::new(b"Content-Length: 10\r\n".to_vec()));
        assert!(reader.read_message().is_err());
    }

    #[test]
    fn test_oversized_content_length() {
        for len in [usize::MAX, MAX_CONTENT_LENGTH + 1] {
            let input = format!("Content-Length: {len}\r\n\r\n{{}}");
            let mut reader = DapReader::new(Cursor::new(input.into_bytes()));
            let err = reader.read_message().unwrap_err();
            assert!(err.to_string().contains("exceeds the limit"), "{err}");
        }
    }

    #[test]
    fn test_write_frame() {
        let mut out = Vec::new();
        DapWriter::new(&mut out)
            .write_message(&json!({"a": 1}))
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&out),
            "Content-Length: 7\r\n\r\n{\"a\":1}"
        );
    }
}
