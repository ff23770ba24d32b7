//! RBSP bit-level access
//!
//! Parameter sets are stored escaped: every `00 00 0x` (x <= 3) inside a NAL
//! payload carries an emulation-prevention `03`. The rewriters unescape the
//! payload, walk it with a [`Transcriber`] that copies every syntax element it
//! reads, splice in their changes, then escape the result again.

use super::error::{BitstreamError, BitstreamResult};

/// Strip emulation-prevention bytes
pub fn unescape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut zeros = 0;
    for &byte in payload {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// Insert emulation-prevention bytes
pub fn escape(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64);
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// MSB-first bit reader over an unescaped RBSP
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    nal: &'static str,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8], nal: &'static str) -> Self {
        Self { data, pos: 0, nal }
    }

    /// Current position in bits
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bit index of the `rbsp_stop_one_bit`, i.e. the last set bit
    pub fn stop_bit(&self) -> Option<usize> {
        let (index, byte) = self.data.iter().enumerate().rev().find(|(_, b)| **b != 0)?;
        Some(index * 8 + 7 - byte.trailing_zeros() as usize)
    }

    pub fn read_bit(&mut self) -> BitstreamResult<u32> {
        let byte = self.data.get(self.pos / 8).ok_or(BitstreamError::Truncated {
            nal: self.nal,
            bit: self.pos,
        })?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit as u32)
    }

    pub fn read_bits(&mut self, count: u32) -> BitstreamResult<u32> {
        debug_assert!(count <= 32);
        let mut value = 0u32;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    /// Unsigned Exp-Golomb
    pub fn read_ue(&mut self) -> BitstreamResult<u32> {
        let mut leading = 0u32;
        while self.read_bit()? == 0 {
            leading += 1;
            if leading > 31 {
                return Err(BitstreamError::InvalidField {
                    nal: self.nal,
                    field: "exp-golomb prefix",
                    value: leading,
                });
            }
        }
        let suffix = self.read_bits(leading)?;
        Ok(((1u64 << leading) - 1 + suffix as u64) as u32)
    }

    /// Signed Exp-Golomb
    pub fn read_se(&mut self) -> BitstreamResult<i32> {
        let code = self.read_ue()? as i64;
        let value = if code % 2 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        Ok(value as i32)
    }
}

/// MSB-first bit writer
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bit(&mut self, bit: u32) {
        self.current = (self.current << 1) | (bit & 1) as u8;
        self.filled += 1;
        if self.filled == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    pub fn write_bits(&mut self, value: u32, count: u32) {
        for shift in (0..count).rev() {
            self.write_bit((value >> shift) & 1);
        }
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.write_bit(flag as u32);
    }

    pub fn write_ue(&mut self, value: u32) {
        let code = value as u64 + 1;
        let bits = 64 - code.leading_zeros();
        self.write_bits(0, bits - 1);
        for shift in (0..bits).rev() {
            self.write_bit(((code >> shift) & 1) as u32);
        }
    }

    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_ue(code);
    }

    /// `rbsp_trailing_bits()`: stop bit then zero alignment
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(1);
        while self.filled != 0 {
            self.write_bit(0);
        }
    }

    /// Finish writing. Any partial byte is zero padded.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.filled != 0 {
            let pad = 8 - self.filled;
            self.bytes.push(self.current << pad);
        }
        self.bytes
    }
}

/// Reads syntax elements and writes them back unchanged.
///
/// Rewriters use the `copy_*` methods for everything they keep and drop down
/// to the raw `reader`/`writer` for the fields they replace.
#[derive(Debug)]
pub struct Transcriber<'a> {
    pub reader: BitReader<'a>,
    pub writer: BitWriter,
}

impl<'a> Transcriber<'a> {
    pub fn new(rbsp: &'a [u8], nal: &'static str) -> Self {
        Self {
            reader: BitReader::new(rbsp, nal),
            writer: BitWriter::new(),
        }
    }

    pub fn copy_bits(&mut self, count: u32) -> BitstreamResult<u32> {
        let value = self.reader.read_bits(count)?;
        self.writer.write_bits(value, count);
        Ok(value)
    }

    pub fn copy_flag(&mut self) -> BitstreamResult<bool> {
        Ok(self.copy_bits(1)? == 1)
    }

    pub fn copy_ue(&mut self) -> BitstreamResult<u32> {
        let value = self.reader.read_ue()?;
        self.writer.write_ue(value);
        Ok(value)
    }

    pub fn copy_se(&mut self) -> BitstreamResult<i32> {
        let value = self.reader.read_se()?;
        self.writer.write_se(value);
        Ok(value)
    }

    /// Copy everything up to (not including) the stop bit, then write fresh
    /// trailing bits.
    pub fn copy_to_stop_bit(&mut self) -> BitstreamResult<()> {
        let stop = self.reader.stop_bit().unwrap_or(self.reader.position());
        while self.reader.position() < stop {
            self.copy_bits(1)?;
        }
        self.writer.write_trailing_bits();
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.into_bytes()
    }
}
