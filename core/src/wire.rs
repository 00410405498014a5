//! Little-endian primitives shared by the ROS1 message and bag codecs.
//!
//! All integers are little-endian. Strings and byte arrays are prefixed with a `u32`
//! length, matching ROS1 serialization.
use crate::error::{Result, SpoofError};

/// Bounds-checked reader over a byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(SpoofError::Format(format!(
                "unexpected end of data: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    /// Length-prefixed byte array.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SpoofError::Format(format!("invalid UTF-8 string: {e}")))
    }

    /// ROS time (`u32` seconds, `u32` nanoseconds) as nanoseconds.
    pub fn read_time(&mut self) -> Result<u64> {
        let sec = self.read_u32()? as u64;
        let nsec = self.read_u32()? as u64;
        Ok(sec * 1_000_000_000 + nsec)
    }
}

pub fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_bytes(out: &mut Vec<u8>, b: &[u8]) {
    write_u32(out, b.len() as u32);
    out.extend_from_slice(b);
}

pub fn write_string(out: &mut Vec<u8>, s: &str) {
    write_bytes(out, s.as_bytes());
}

/// Nanoseconds as ROS time (`u32` seconds, `u32` nanoseconds).
pub fn write_time(out: &mut Vec<u8>, stamp_ns: u64) {
    write_u32(out, (stamp_ns / 1_000_000_000) as u32);
    write_u32(out, (stamp_ns % 1_000_000_000) as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_read_back() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 7);
        write_u32(&mut buf, 0xdead_beef);
        write_u64(&mut buf, 1 << 40);
        write_string(&mut buf, "velodyne");
        write_time(&mut buf, 12_500_000_001);

        let mut cur = Cursor::new(&buf);
        assert_eq!(cur.read_u8().unwrap(), 7);
        assert_eq!(cur.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(cur.read_u64().unwrap(), 1 << 40);
        assert_eq!(cur.read_string().unwrap(), "velodyne");
        assert_eq!(cur.read_time().unwrap(), 12_500_000_001);
        assert!(cur.is_empty());
    }

    #[test]
    fn short_read_is_format_error() {
        let buf = [1u8, 2, 3];
        let mut cur = Cursor::new(&buf);
        assert!(matches!(cur.read_u32(), Err(SpoofError::Format(_))));
        // failed read does not advance
        assert_eq!(cur.position(), 0);
    }
}
