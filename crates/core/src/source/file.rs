//! Framed capture files
//!
//! Replay sources read length-delimited bincode frames from a capture file;
//! [`FramedWriter`] produces the same format. One file carries one record
//! representation. A corrupt frame poisons the remainder of the file (the
//! framing cannot be resynchronized), so after reporting it the source
//! answers `EndOfInput`.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{Error, Result};
use crate::source::{RecordSource, SourcePoll};

/// Frames larger than this are rejected as corrupt.
const MAX_FRAME_BYTES: usize = 64 << 20;

/// Writes length-delimited record frames to a capture file.
pub struct FramedWriter {
    out: BufWriter<File>,
    path: String,
    frames: u64,
}

impl FramedWriter {
    /// Create (or truncate) a capture file.
    pub async fn create(path: impl AsRef<Path>) -> Result<FramedWriter> {
        let file = File::create(path.as_ref()).await?;
        Ok(FramedWriter {
            out: BufWriter::new(file),
            path: path.as_ref().display().to_string(),
            frames: 0,
        })
    }

    /// Append one record.
    pub async fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let frame = bincode::serialize(record).map_err(|e| {
            Error::Other(format!("failed to encode frame for '{}': {}", self.path, e))
        })?;
        self.out.write_u32_le(frame.len() as u32).await?;
        self.out.write_all(&frame).await?;
        self.frames += 1;
        Ok(())
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Flush and close the file.
    pub async fn finish(mut self) -> Result<()> {
        self.out.flush().await?;
        Ok(())
    }
}

/// Replays one representation from a framed capture file.
pub struct FileSource<T> {
    reader: BufReader<File>,
    path: String,
    pos: u64,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FileSource<T> {
    /// Open a capture file for replay.
    pub async fn open(path: impl AsRef<Path>) -> Result<FileSource<T>> {
        let file = File::open(path.as_ref()).await?;
        Ok(FileSource {
            reader: BufReader::new(file),
            path: path.as_ref().display().to_string(),
            pos: 0,
            finished: false,
            _marker: PhantomData,
        })
    }

    fn malformed_at(&self, offset: u64, message: impl Into<String>) -> Error {
        Error::MalformedRecord {
            origin: self.path.clone(),
            offset: offset as usize,
            message: message.into(),
        }
    }
}

/// Fill `buf` completely, or report a clean end of file when no bytes at
/// all were available.
async fn fill_or_eof(reader: &mut BufReader<File>, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "end of file inside frame",
            ));
        }
        filled += n;
    }
    Ok(true)
}

#[async_trait]
impl<T> RecordSource<T> for FileSource<T>
where
    T: DeserializeOwned + Send,
{
    fn describe(&self) -> &str {
        &self.path
    }

    fn has_next(&self) -> bool {
        !self.finished
    }

    async fn next(&mut self) -> Result<SourcePoll<T>> {
        if self.finished {
            return Ok(SourcePoll::EndOfInput);
        }

        let mut len_buf = [0u8; 4];
        match fill_or_eof(&mut self.reader, &mut len_buf).await {
            Ok(true) => {}
            Ok(false) => {
                self.finished = true;
                return Ok(SourcePoll::EndOfInput);
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finished = true;
                return Err(self.malformed_at(self.pos, "truncated frame header"));
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            self.finished = true;
            return Err(self.malformed_at(
                self.pos,
                format!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_BYTES),
            ));
        }

        let mut frame = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut frame).await {
            self.finished = true;
            if e.kind() == ErrorKind::UnexpectedEof {
                return Err(self.malformed_at(self.pos + 4, "truncated frame body"));
            }
            return Err(e.into());
        }

        let record: T = match bincode::deserialize(&frame) {
            Ok(record) => record,
            Err(e) => {
                self.finished = true;
                return Err(self.malformed_at(self.pos + 4, format!("frame decode failed: {}", e)));
            }
        };

        self.pos += 4 + len as u64;
        Ok(SourcePoll::Record(record))
    }
}
