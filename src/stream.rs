//! Small binary-stream helpers shared by the container parsers.
//!
//! Both containers use u32-LE length-prefixed chunks; truncation surfaces as
//! `io::ErrorKind::UnexpectedEof` so probing can map it to a format mismatch
//! instead of panicking.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

/// Read a u32-LE length prefix followed by exactly that many bytes.
pub fn read_chunk<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut chunk = vec![0u8; len];
    reader.read_exact(&mut chunk)?;
    Ok(chunk)
}

/// Skip a u32-LE length-prefixed chunk, returning its payload length.
pub fn skip_chunk<R: Read + io::Seek + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let len = reader.read_u32::<LittleEndian>()? as u64;
    reader.seek(io::SeekFrom::Current(len as i64))?;
    Ok(len)
}
