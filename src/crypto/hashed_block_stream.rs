//! The KDBX payload framing: numbered blocks, each carrying the SHA-256 of
//! its payload. A zero-length block with an all-zero hash terminates the
//! stream.

use std::io::{Error, ErrorKind, Read, Result, Write};

use sha2::{Digest, Sha256};

use crate::memutil;

/// Default block size used when writing.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

fn corrupt(message: &'static str) -> Error {
    Error::new(ErrorKind::InvalidData, message)
}

pub struct HashedBlockRead<R: Read> {
    inner: R,
    block_index: u32,
    /// position in the buffer
    buf_offset: usize,
    buffer: Vec<u8>,
    done: bool,
    verify: bool,
}

impl<R: Read> HashedBlockRead<R> {
    pub fn new(inner: R, verify: bool) -> HashedBlockRead<R> {
        HashedBlockRead {
            inner,
            block_index: 0,
            buf_offset: 0,
            buffer: Vec::new(),
            done: false,
            verify,
        }
    }

    /// Reads the next block into the buffer. Returns false at the stream
    /// terminator.
    fn read_hashed_block(&mut self) -> Result<bool> {
        debug_assert!(!self.done, "read past the end of the hashed block stream");

        let mut index_bytes = [0u8; 4];
        self.inner.read_exact(&mut index_bytes)?;
        let index = memutil::bytes_to_u32(&index_bytes);
        if index != self.block_index {
            return Err(corrupt("unexpected hashed stream block index"));
        }
        self.block_index += 1;

        let mut expected_hash = [0u8; 32];
        self.inner.read_exact(&mut expected_hash)?;

        let mut size_bytes = [0u8; 4];
        self.inner.read_exact(&mut size_bytes)?;
        let size = memutil::bytes_to_u32(&size_bytes) as usize;

        if size == 0 {
            if expected_hash.iter().any(|&b| b != 0) {
                return Err(corrupt("invalid hashed stream terminator"));
            }
            self.done = true;
            return Ok(false);
        }

        self.buffer.resize(size, 0);
        self.inner.read_exact(&mut self.buffer)?;

        if self.verify {
            let hash = Sha256::digest(&self.buffer);
            if hash[..] != expected_hash[..] {
                return Err(corrupt("hashed stream block checksum mismatch"));
            }
        }

        self.buf_offset = 0;
        Ok(true)
    }
}

impl<R: Read> Read for HashedBlockRead<R> {
    fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        if self.done {
            return Ok(0);
        }

        let mut read = 0;
        while read < dest.len() {
            if self.buf_offset < self.buffer.len() {
                let count = std::cmp::min(dest.len() - read, self.buffer.len() - self.buf_offset);
                dest[read..read + count]
                    .copy_from_slice(&self.buffer[self.buf_offset..self.buf_offset + count]);
                self.buf_offset += count;
                read += count;
            } else if !self.read_hashed_block()? {
                break;
            }
        }

        Ok(read)
    }
}

pub struct HashedBlockWrite<W: Write> {
    inner: W,
    block_index: u32,
    block_size: usize,
    buffer: Vec<u8>,
}

impl<W: Write> HashedBlockWrite<W> {
    pub fn new(inner: W) -> HashedBlockWrite<W> {
        HashedBlockWrite::with_block_size(inner, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(inner: W, block_size: usize) -> HashedBlockWrite<W> {
        assert!(block_size > 0, "block size must be non-zero");
        HashedBlockWrite {
            inner,
            block_index: 0,
            block_size,
            buffer: Vec::with_capacity(block_size),
        }
    }

    fn flush_block(&mut self) -> Result<()> {
        self.inner.write_all(&self.block_index.to_le_bytes())?;
        self.block_index += 1;

        if self.buffer.is_empty() {
            self.inner.write_all(&[0u8; 32])?;
            self.inner.write_all(&0u32.to_le_bytes())?;
        } else {
            let hash = Sha256::digest(&self.buffer);
            self.inner.write_all(&hash[..])?;
            self.inner.write_all(&(self.buffer.len() as u32).to_le_bytes())?;
            self.inner.write_all(&self.buffer)?;
            self.buffer.clear();
        }

        Ok(())
    }

    /// Writes the final partial block (if any) followed by the empty
    /// terminator block, and hands back the wrapped writer.
    pub fn finish(mut self) -> Result<W> {
        if !self.buffer.is_empty() {
            self.flush_block()?;
        }
        self.flush_block()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for HashedBlockWrite<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let room = self.block_size - self.buffer.len();
            let count = std::cmp::min(room, buf.len() - written);
            self.buffer.extend_from_slice(&buf[written..written + count]);
            written += count;

            if self.buffer.len() == self.block_size {
                self.flush_block()?;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        // Partial blocks and the terminator are only emitted by `finish`;
        // flushing mid-stream must not truncate the framing.
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_stream(data: &[u8], block_size: usize) -> Vec<u8> {
        let mut writer = HashedBlockWrite::with_block_size(Vec::new(), block_size);
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn read_stream(bytes: &[u8]) -> Result<Vec<u8>> {
        let mut reader = HashedBlockRead::new(Cursor::new(bytes), true);
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn round_trip_at_various_sizes() {
        for &(len, block_size) in
            &[(0usize, 128usize), (26, 128), (128, 128), (130, 128), (260, 128), (1000, 64)]
        {
            let data: Vec<u8> = (0..len).map(|n| (n % 251) as u8).collect();
            let stream = write_stream(&data, block_size);
            assert_eq!(read_stream(&stream).unwrap(), data, "len {}", len);
        }
    }

    #[test]
    fn wire_layout_of_a_single_block() {
        let data = b"abcdefghijklmnopqrstuvwxyz";
        let stream = write_stream(data, 128);

        // index 0, 32-byte hash, size, payload, then the terminator block.
        assert_eq!(stream.len(), 4 + 32 + 4 + 26 + 4 + 32 + 4);
        assert_eq!(&stream[0..4], &[0, 0, 0, 0]);
        assert_eq!(&stream[4..36], &Sha256::digest(data)[..]);
        assert_eq!(&stream[36..40], &26u32.to_le_bytes());
        assert_eq!(&stream[40..66], &data[..]);

        // Terminator: index 1, zero hash, size 0.
        assert_eq!(&stream[66..70], &1u32.to_le_bytes());
        assert_eq!(&stream[70..102], &[0u8; 32]);
        assert_eq!(&stream[102..106], &[0, 0, 0, 0]);
    }

    #[test]
    fn empty_stream_is_just_a_terminator() {
        let stream = write_stream(&[], 128);
        assert_eq!(stream.len(), 4 + 32 + 4);
        assert_eq!(read_stream(&stream).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let data: Vec<u8> = (0..260).map(|n| n as u8).collect();
        let mut stream = write_stream(&data, 128);

        // Flip a byte inside the first block's payload.
        stream[45] ^= 0xFF;
        assert!(read_stream(&stream).is_err());
    }

    #[test]
    fn bad_block_index_is_detected() {
        let data = [7u8; 32];
        let mut stream = write_stream(&data, 128);
        stream[0] = 9;
        assert!(read_stream(&stream).is_err());
    }

    #[test]
    fn bad_terminator_hash_is_detected() {
        let mut stream = write_stream(&[], 128);
        stream[10] = 1;
        assert!(read_stream(&stream).is_err());
    }

    #[test]
    fn truncated_stream_is_detected() {
        let data = [7u8; 64];
        let stream = write_stream(&data, 128);
        assert!(read_stream(&stream[0..stream.len() - 20]).is_err());
    }
}
