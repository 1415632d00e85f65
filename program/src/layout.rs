//! Fixed-width little-endian decoding over borrowed account data.
//!
//! Fixed width records derive `BorshDeserialize` and declare their encoded
//! length through [`Fixed`]. Tagged unions implement [`Decode`] by reading their
//! tag, then the fields of the selected branch, off a [`Reader`]. Nothing here
//! allocates besides owned byte strings, and the input slice is never mutated.
use borsh::BorshDeserialize;
use num_traits::FromPrimitive;
use solana_program::pubkey::Pubkey;

use crate::error::{AoError, AoResult};

/// Width of the padding which follows a one byte length prefix.
pub const LENGTH_PREFIX_PADDING: usize = 3;

/// A value with a fixed encoded width of `LEN` bytes.
pub trait Fixed: BorshDeserialize + Sized {
    const LEN: usize;
}

macro_rules! impl_fixed {
    ($($t:ty),*) => {
        $(impl Fixed for $t {
            const LEN: usize = std::mem::size_of::<$t>();
        })*
    };
}

impl_fixed!(u8, u16, u32, u64, u128, [u8; 32]);

/// A record whose schema depends on a leading tag.
pub trait Decode: Sized {
    fn decode(reader: &mut Reader<'_>) -> AoResult<Self>;
}

/// Cursor over a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Start reading at `offset`. The offset itself is checked lazily on the first read.
    pub fn at(buf: &'a [u8], offset: usize) -> Self {
        Self { buf, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    fn take(&mut self, needed: usize) -> AoResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(needed)
            .filter(|end| *end <= self.buf.len())
            .ok_or(AoError::TruncatedBuffer {
                offset: self.offset,
                needed,
                len: self.buf.len(),
            })?;
        let bytes = &self.buf[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    /// Reads a fixed width value. Borsh errors are reported as truncation at the value's start.
    pub fn read<T: Fixed>(&mut self) -> AoResult<T> {
        let offset = self.offset;
        let len = self.buf.len();
        let needed = T::LEN;
        let mut bytes = self.take(needed)?;
        T::deserialize(&mut bytes).map_err(|_| AoError::TruncatedBuffer {
            offset,
            needed,
            len,
        })
    }

    pub fn read_bool(&mut self) -> AoResult<bool> {
        Ok(self.read::<u8>()? != 0)
    }

    pub fn read_pubkey(&mut self) -> AoResult<Pubkey> {
        Ok(Pubkey::new_from_array(self.read::<[u8; 32]>()?))
    }

    /// Skip padding. Its content is not inspected.
    pub fn skip(&mut self, n: usize) -> AoResult {
        self.take(n).map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> AoResult<&'a [u8]> {
        self.take(n)
    }

    /// Reads a `u8` length, three bytes of alignment padding, then the payload.
    pub fn read_length_prefixed(&mut self) -> AoResult<&'a [u8]> {
        let len = self.read::<u8>()? as usize;
        self.skip(LENGTH_PREFIX_PADDING)?;
        self.take(len)
    }

    /// Length-prefixed UTF-8 string. Invalid sequences are replaced rather than rejected.
    pub fn read_string(&mut self) -> AoResult<String> {
        Ok(String::from_utf8_lossy(self.read_length_prefixed()?).into_owned())
    }

    /// A `u8` count, three bytes of padding, then that many length-prefixed strings.
    pub fn read_string_vec(&mut self) -> AoResult<Vec<String>> {
        let count = self.read::<u8>()? as usize;
        self.skip(LENGTH_PREFIX_PADDING)?;
        (0..count).map(|_| self.read_string()).collect()
    }

    /// Reads a discriminator of type `W` and maps it onto the tag enum `T`.
    pub fn read_tag<W, T>(&mut self, kind: &'static str) -> AoResult<T>
    where
        W: Fixed + Into<u64>,
        T: FromPrimitive,
    {
        let raw: u64 = self.read::<W>()?.into();
        T::from_u64(raw).ok_or(AoError::UnknownTag { kind, tag: raw })
    }

    pub fn decode<T: Decode>(&mut self) -> AoResult<T> {
        T::decode(self)
    }
}

/// Decode a single tagged record from the start of `buf`.
pub fn decode_from<T: Decode>(buf: &[u8]) -> AoResult<T> {
    Reader::new(buf).decode()
}

/// Read a single fixed width record from the start of `buf`.
pub fn read_from<T: Fixed>(buf: &[u8]) -> AoResult<T> {
    Reader::new(buf).read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_derive::FromPrimitive;

    #[derive(FromPrimitive, Debug, PartialEq)]
    enum Shape {
        Square,
        Circle,
    }

    #[test]
    fn little_endian_integers() {
        let buf = [0x01, 0x02, 0x00, 0x00, 0x00, 0xff];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read::<u32>().unwrap(), 0x0201);
        assert_eq!(r.read::<u8>().unwrap(), 0);
        assert_eq!(r.offset(), 5);
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn truncation_reports_position() {
        let buf = [0u8; 10];
        let mut r = Reader::new(&buf);
        r.skip(4).unwrap();
        assert_eq!(
            r.read::<u128>(),
            Err(AoError::TruncatedBuffer {
                offset: 4,
                needed: 16,
                len: 10
            })
        );
    }

    #[test]
    fn length_prefix_padding_is_skipped_not_validated() {
        let buf = [3, 0xaa, 0xbb, 0xcc, b'y', b'e', b's', 7];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_string().unwrap(), "yes");
        assert_eq!(r.read::<u8>().unwrap(), 7);
    }

    #[test]
    fn string_vectors() {
        let mut buf = vec![2, 0, 0, 0];
        buf.extend_from_slice(&[2, 0, 0, 0, b'n', b'o']);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        let strings = Reader::new(&buf).read_string_vec().unwrap();
        assert_eq!(strings, vec!["no".to_string(), String::new()]);

        let short = [1, 0, 0, 0, 5, 0, 0, 0, b'a'];
        assert!(matches!(
            Reader::new(&short).read_string_vec(),
            Err(AoError::TruncatedBuffer { .. })
        ));
    }

    #[test]
    fn tags() {
        let buf = [1u8, 9u8];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_tag::<u8, Shape>("shape").unwrap(), Shape::Circle);
        assert_eq!(
            r.read_tag::<u8, Shape>("shape"),
            Err(AoError::UnknownTag {
                kind: "shape",
                tag: 9
            })
        );
    }

    #[test]
    fn offset_past_end() {
        let buf = [0u8; 4];
        let mut r = Reader::at(&buf, 8);
        assert_eq!(r.remaining(), 0);
        assert!(matches!(r.read::<u8>(), Err(AoError::TruncatedBuffer { .. })));
    }
}
