//! Buffered, line-framed IPC over pipes.
//!
//! Each message is one JSON document followed by `\n`. The same reader and
//! writer are used on both ends: the parent wraps a child's stdout/stdin, the
//! worker wraps its own stdin/stdout.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

/// Default buffer size for IPC (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Reads newline-delimited JSON messages.
pub struct LineReader<R: Read> {
    reader: BufReader<R>,
    line_buffer: String,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, inner),
            line_buffer: String::with_capacity(4096),
        }
    }

    /// Read one line without its terminator. Returns `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line_buffer.clear();
        if self.reader.read_line(&mut self.line_buffer)? == 0 {
            return Ok(None);
        }
        let trimmed = self.line_buffer.trim_end_matches(['\n', '\r']);
        Ok(Some(trimmed))
    }

    /// Read and decode the next message, skipping blank lines.
    ///
    /// Returns `None` once the other end closes the pipe.
    pub fn recv<T: DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        loop {
            match self.read_line()? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    return serde_json::from_str(line)
                        .map(Some)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
                }
            }
        }
    }
}

/// Writes newline-delimited JSON messages, flushing after each one.
pub struct LineWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, inner),
        }
    }

    /// Encode `message` as a single line and flush it.
    pub fn send<T: Serialize>(&mut self, message: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// The underlying writer. Everything sent so far has been flushed to it.
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }
}
