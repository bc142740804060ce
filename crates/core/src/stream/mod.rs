use std::{
    fs::File,
    io::{self, ErrorKind, Read},
    path::Path,
    thread,
    time::Duration,
};

use tracing::{info, warn};

use crate::{timing::RunFlag, PanelError, Result};

/// Bytes in one interleaved stereo frame of 32-bit floats.
pub const FRAME_BYTES: usize = 2 * SAMPLE_BYTES;
const SAMPLE_BYTES: usize = 4;
const PIPE_WAIT: Duration = Duration::from_secs(1);

/// Decodes interleaved little-endian `f32` stereo samples.
///
/// Bytes past the last complete frame are discarded. Chunks carrying NaN or
/// infinite samples are rejected as a whole.
pub fn parse_chunk(bytes: &[u8]) -> Result<Vec<f32>> {
    let usable = bytes.len() - bytes.len() % FRAME_BYTES;
    let samples: Vec<f32> = bytes[..usable]
        .chunks_exact(SAMPLE_BYTES)
        .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .collect();

    if let Some(position) = samples.iter().position(|sample| !sample.is_finite()) {
        return Err(PanelError::StreamParse(format!(
            "non-finite sample at index {position}"
        )));
    }
    Ok(samples)
}

/// Outcome of one read from the audio stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Interleaved stereo samples (may be empty for a sub-frame read).
    Samples(Vec<f32>),
    /// Nothing available right now.
    Idle,
}

/// Fixed-size chunk reader over a byte stream of stereo `f32` frames.
#[derive(Debug)]
pub struct AudioStream<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> AudioStream<R> {
    pub fn new(reader: R, chunk_bytes: usize) -> Self {
        Self {
            reader,
            buffer: vec![0; chunk_bytes.max(FRAME_BYTES)],
        }
    }

    /// Reads at most one chunk. End of stream and `WouldBlock` both count as
    /// [`Chunk::Idle`].
    pub fn read_chunk(&mut self) -> Result<Chunk> {
        let read = loop {
            match self.reader.read(&mut self.buffer) {
                Ok(read) => break read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Chunk::Idle),
                Err(err) => return Err(err.into()),
            }
        };

        if read == 0 {
            return Ok(Chunk::Idle);
        }
        parse_chunk(&self.buffer[..read]).map(Chunk::Samples)
    }
}

/// Waits for `path` to appear, checking once per `interval`.
///
/// Returns `Ok(false)` if `running` is cleared first and an error once
/// `retries` checks have come up empty.
pub fn wait_for_path(
    path: &Path,
    retries: u32,
    interval: Duration,
    running: &RunFlag,
) -> Result<bool> {
    let mut attempts = 0;
    while !path.exists() {
        if !running.is_running() {
            return Ok(false);
        }
        if attempts >= retries {
            return Err(PanelError::Io(io::Error::new(
                ErrorKind::NotFound,
                format!("{} not found after {attempts} retries", path.display()),
            )));
        }
        warn!(path = %path.display(), "audio stream does not exist yet, waiting");
        thread::sleep(interval);
        attempts += 1;
    }
    Ok(true)
}

/// Opens the audio pipe for reading once it exists.
///
/// Returns `None` when `running` is cleared while waiting. The pipe is opened
/// non-blocking: with no writer connected, or a writer that has gone quiet,
/// reads come back as [`Chunk::Idle`].
pub fn open_pipe(
    path: &Path,
    retries: u32,
    chunk_bytes: usize,
    running: &RunFlag,
) -> Result<Option<AudioStream<File>>> {
    if !wait_for_path(path, retries, PIPE_WAIT, running)? {
        info!("stopped while waiting for the audio stream");
        return Ok(None);
    }
    info!(path = %path.display(), "opening audio stream");
    Ok(Some(AudioStream::new(open_nonblocking(path)?, chunk_bytes)))
}

#[cfg(unix)]
fn open_nonblocking(path: &Path) -> io::Result<File> {
    use std::{fs::OpenOptions, os::unix::fs::OpenOptionsExt};

    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(not(unix))]
fn open_nonblocking(path: &Path) -> io::Result<File> {
    File::open(path)
}
