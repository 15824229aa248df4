use super::WireError;
use uuid::Uuid;

/// Longest string accepted on the wire, in bytes
pub const MAX_STRING_LEN: usize = 32_767;

/// Longest length-prefixed blob accepted on the wire, in bytes
pub const MAX_BLOB_LEN: usize = 1 << 20;

/// Append-only big-endian packet writer
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// LEB128-style variable length int (1-5 bytes)
    pub fn write_varint(&mut self, value: i32) {
        let mut value = value as u32;
        loop {
            if value & !0x7F == 0 {
                self.buf.push(value as u8);
                return;
            }
            self.buf.push((value & 0x7F) as u8 | 0x80);
            value >>= 7;
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Two big-endian 64-bit halves
    pub fn write_uuid(&mut self, value: Uuid) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Varint byte length followed by UTF-8 bytes.
    ///
    /// The string is written whole. Readers reject strings longer than
    /// [`MAX_STRING_LEN`], so callers must bound what they send.
    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Varint length followed by raw bytes
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_varint(value.len() as i32);
        self.buf.extend_from_slice(value);
    }

    /// Raw bytes with no length prefix
    pub fn write_raw(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received packet
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_varint(&mut self) -> Result<i32, WireError> {
        let mut value: u32 = 0;
        for i in 0..5 {
            let byte = self.take(1)?[0];
            value |= u32::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(WireError::VarIntTooLong)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, WireError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, WireError> {
        Ok(Uuid::from_bytes(self.take_array()?))
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_prefixed(MAX_STRING_LEN)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], WireError> {
        self.read_prefixed(MAX_BLOB_LEN)
    }

    fn read_prefixed(&mut self, max: usize) -> Result<&'a [u8], WireError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WireError::LengthOutOfRange {
            len: i64::from(len),
            max,
        })?;
        if len > max {
            return Err(WireError::LengthOutOfRange {
                len: len as i64,
                max,
            });
        }
        self.take(len)
    }

    /// Everything not read yet
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Fail if any bytes were left unread.
    pub fn finish(self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}
