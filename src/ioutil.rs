use crate::error::Error;
use crate::memutil;

/// A reader that stores a copy of every byte read from the wrapped reader.
/// Used to hash header bytes while they are being parsed.
pub struct StoredReadRef<'r, R: std::io::Read> {
    inner: &'r mut R,
    store: Vec<u8>,
}

impl<'r, R: std::io::Read> StoredReadRef<'r, R> {
    pub fn new(read: &'r mut R) -> StoredReadRef<'r, R> {
        StoredReadRef {
            inner: read,
            store: Vec::new(),
        }
    }

    pub fn data(self) -> Vec<u8> {
        self.store
    }
}

impl<'r, R: std::io::Read> std::io::Read for StoredReadRef<'r, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.inner.read(buf)?;
        self.store.extend_from_slice(&buf[0..bytes_read]);
        Ok(bytes_read)
    }
}

pub fn io_read_u8<R: std::io::Read>(input: &mut R) -> Result<u8, Error> {
    let mut dest = [0u8; 1];
    input.read_exact(&mut dest).map_err(Error::Io)?;
    Ok(dest[0])
}

/// Reads 2 bytes in little-endian order from a reader and converts them into a u16.
#[inline]
pub fn io_read_u16<R: std::io::Read>(input: &mut R) -> Result<u16, Error> {
    let mut dest = [0u8; 2];
    input.read_exact(&mut dest).map_err(Error::Io)?;
    Ok(memutil::bytes_to_u16(&dest))
}

/// Reads 4 bytes in little-endian order from a reader and converts them into a u32.
#[inline]
pub fn io_read_u32<R: std::io::Read>(input: &mut R) -> Result<u32, Error> {
    let mut dest = [0u8; 4];
    input.read_exact(&mut dest).map_err(Error::Io)?;
    Ok(memutil::bytes_to_u32(&dest))
}

/// Reads 8 bytes in little-endian order from a reader and converts them into a u64.
pub fn io_read_u64<R: std::io::Read>(input: &mut R) -> Result<u64, Error> {
    let mut dest = [0u8; 8];
    input.read_exact(&mut dest).map_err(Error::Io)?;
    Ok(memutil::bytes_to_u64(&dest))
}

/// Reads a fixed number of bytes.
pub fn io_read_array<R: std::io::Read, const N: usize>(input: &mut R) -> Result<[u8; N], Error> {
    let mut dest = [0u8; N];
    input.read_exact(&mut dest).map_err(Error::Io)?;
    Ok(dest)
}

/// Reads `len` raw bytes into a vector.
pub fn io_read_bytes<R: std::io::Read>(input: &mut R, len: usize) -> Result<Vec<u8>, Error> {
    let mut dest = vec![0u8; len];
    input.read_exact(&mut dest).map_err(Error::Io)?;
    Ok(dest)
}

/// Reads a string of `len` bytes, stopping at the first NUL. The bytes after
/// the NUL (if any) are consumed but discarded.
pub fn io_read_string_nul<R: std::io::Read>(input: &mut R, len: usize) -> Result<String, Error> {
    let bytes = io_read_bytes(input, len)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8(bytes[0..end].to_vec())
        .map_err(|_| Error::Format("Invalid UTF-8 string."))
}

pub fn io_write_u8<W: std::io::Write>(output: &mut W, n: u8) -> Result<(), Error> {
    output.write_all(&[n]).map_err(Error::Io)
}

/// Writes a u16 in little-endian byte order.
#[inline]
pub fn io_write_u16<W: std::io::Write>(output: &mut W, n: u16) -> Result<(), Error> {
    output.write_all(&n.to_le_bytes()).map_err(Error::Io)
}

/// Writes a u32 in little-endian byte order.
#[inline]
pub fn io_write_u32<W: std::io::Write>(output: &mut W, n: u32) -> Result<(), Error> {
    output.write_all(&n.to_le_bytes()).map_err(Error::Io)
}

/// Writes a u64 in little-endian byte order.
pub fn io_write_u64<W: std::io::Write>(output: &mut W, n: u64) -> Result<(), Error> {
    output.write_all(&n.to_le_bytes()).map_err(Error::Io)
}

/// Writes raw bytes.
pub fn io_write_bytes<W: std::io::Write>(output: &mut W, bytes: &[u8]) -> Result<(), Error> {
    output.write_all(bytes).map_err(Error::Io)
}

/// Writes a string followed by a terminating NUL. The on-wire length is
/// `len + 1`.
pub fn io_write_string_nul<W: std::io::Write>(output: &mut W, s: &str) -> Result<(), Error> {
    output.write_all(s.as_bytes()).map_err(Error::Io)?;
    output.write_all(&[0]).map_err(Error::Io)
}
