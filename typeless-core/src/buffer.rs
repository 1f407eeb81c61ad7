//! Byte buffers used as the write sink and read source of erased boxes
//!
//! `WriteBuffer` owns a growable byte vector and appends little-endian
//! encodings. `ReadBuffer` borrows a byte slice and consumes it front to back,
//! reporting how many bytes remain so higher-level callers can tell when a
//! stream of records is exhausted.

use std::mem::size_of;

use crate::typed::{DecodeError, Streamable};

/// Append-only byte sink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBuffer {
    data: Vec<u8>,
}

impl WriteBuffer {
    /// Create an empty write buffer
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create an empty write buffer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Append a streamable value
    ///
    /// # Panics
    ///
    /// Collections are prefixed with a u32 length, so writing a `String` or
    /// `Vec` (at any nesting depth) with more than `u32::MAX` elements panics.
    pub fn write<T: Streamable>(&mut self, value: &T) {
        value.write_to(self);
    }

    /// Append raw bytes without any length prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Bytes written so far
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop all written bytes, keeping the allocation
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Consume the buffer and return the written bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Cursor over a borrowed byte slice
#[derive(Debug, Clone)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Decode a value in place
    ///
    /// On failure `out` is left untouched. The read offset may have advanced
    /// past a partially decoded value.
    pub fn read<T: Streamable>(&mut self, out: &mut T) -> Result<(), DecodeError> {
        *out = T::read_from(self)?;
        Ok(())
    }

    /// Decode and return a value
    pub fn read_value<T: Streamable>(&mut self) -> Result<T, DecodeError> {
        T::read_from(self)
    }

    /// Consume exactly `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.bytes_remaining();
        if len > remaining {
            return Err(DecodeError::UnexpectedEnd {
                needed: len,
                remaining,
            });
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    /// Number of bytes not yet consumed
    pub fn bytes_remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Number of bytes consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.bytes_remaining() == 0
    }

    /// Read a u32 collection length
    fn read_length(&mut self) -> Result<usize, DecodeError> {
        let length = self.read_value::<u32>()?;
        usize::try_from(length).map_err(|_| {
            DecodeError::CorruptedData(format!("length prefix {} does not fit in usize", length))
        })
    }
}

/// Length prefix for a collection of `length` elements
///
/// # Panics
///
/// Panics if `length` does not fit in the u32 prefix.
fn length_prefix(length: usize) -> u32 {
    u32::try_from(length).expect("collection length exceeds u32::MAX")
}

fn write_length(buffer: &mut WriteBuffer, length: usize) {
    buffer.write(&length_prefix(length));
}

macro_rules! impl_streamable_number {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Streamable for $ty {
                fn write_to(&self, buffer: &mut WriteBuffer) {
                    buffer.write_bytes(&self.to_le_bytes());
                }

                fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
                    let bytes = buffer.read_bytes(size_of::<$ty>())?;
                    let array = bytes
                        .try_into()
                        .map_err(|_| DecodeError::CorruptedData(stringify!($ty).to_string()))?;
                    Ok(<$ty>::from_le_bytes(array))
                }
            }
        )*
    };
}

impl_streamable_number!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

// Pointer-sized integers are always 8 bytes on the wire
impl Streamable for usize {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        buffer.write(&(*self as u64));
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        let value = buffer.read_value::<u64>()?;
        usize::try_from(value)
            .map_err(|_| DecodeError::CorruptedData(format!("usize out of range: {}", value)))
    }
}

impl Streamable for isize {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        buffer.write(&(*self as i64));
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        let value = buffer.read_value::<i64>()?;
        isize::try_from(value)
            .map_err(|_| DecodeError::CorruptedData(format!("isize out of range: {}", value)))
    }
}

impl Streamable for char {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        buffer.write(&u32::from(*self));
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        let value = buffer.read_value::<u32>()?;
        char::from_u32(value).ok_or(DecodeError::InvalidChar(value))
    }
}

// Zero bytes on the wire
impl Streamable for () {
    fn write_to(&self, _buffer: &mut WriteBuffer) {}

    fn read_from(_buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl Streamable for bool {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        buffer.write(&u8::from(*self));
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        match buffer.read_value::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }
}

impl Streamable for String {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        write_length(buffer, self.len());
        buffer.write_bytes(self.as_bytes());
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        let length = buffer.read_length()?;
        if length > buffer.bytes_remaining() {
            return Err(DecodeError::CorruptedData(format!(
                "length prefix {} exceeds remaining {} bytes",
                length,
                buffer.bytes_remaining()
            )));
        }
        let bytes = buffer.read_bytes(length)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

impl<T: Streamable> Streamable for Vec<T> {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        write_length(buffer, self.len());
        for item in self {
            buffer.write(item);
        }
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        // Elements may encode to zero bytes, so the prefix is only trusted
        // as far as the preallocation goes
        let length = buffer.read_length()?;
        let mut items = Vec::with_capacity(length.min(buffer.bytes_remaining()));
        for _ in 0..length {
            items.push(T::read_from(buffer)?);
        }
        Ok(items)
    }
}

impl<T: Streamable> Streamable for Option<T> {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        match self {
            Some(value) => {
                buffer.write(&true);
                buffer.write(value);
            }
            None => buffer.write(&false),
        }
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        if buffer.read_value::<bool>()? {
            Ok(Some(T::read_from(buffer)?))
        } else {
            Ok(None)
        }
    }
}
