//! Typed codec traits for values that can live inside an erased box
//!
//! Types opt into serialization by implementing one of two families:
//! - `Streamable`: primitive-style values that the buffers know how to write
//!   and read directly (integers, floats, strings, vectors of streamables...)
//! - `WriteToBuffer` / `ReadFromBuffer`: member-style hooks for structured
//!   types that serialize field by field into an existing instance
//!
//! Every `Streamable` type automatically gets the member-style hooks, so the
//! capability probing only ever has to look at the member-style traits.

use crate::buffer::{ReadBuffer, WriteBuffer};

/// Values with a fixed primitive encoding understood by the buffers
///
/// This is the Rust counterpart of "a type the write buffer can stream
/// directly". Implementations must be symmetric: whatever `write_to` emits,
/// `read_from` must consume exactly.
///
/// # Example
///
/// ```rust
/// # use typeless_core::buffer::{ReadBuffer, WriteBuffer};
/// # use typeless_core::typed::{DecodeError, Streamable};
///
/// #[derive(Debug, PartialEq)]
/// struct Millis(u64);
///
/// impl Streamable for Millis {
///     fn write_to(&self, buffer: &mut WriteBuffer) {
///         buffer.write(&self.0);
///     }
///
///     fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
///         Ok(Millis(buffer.read_value()?))
///     }
/// }
///
/// let mut out = WriteBuffer::new();
/// out.write(&Millis(7));
/// let mut input = ReadBuffer::new(out.data());
/// assert_eq!(input.read_value::<Millis>().unwrap(), Millis(7));
/// ```
pub trait Streamable: Sized {
    /// Append the encoded value to the buffer
    fn write_to(&self, buffer: &mut WriteBuffer);

    /// Decode a value from the front of the buffer
    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError>;
}

/// Member-style serialization hook
pub trait WriteToBuffer {
    /// Serialize `self` into the write buffer
    fn write_to_buffer(&self, buffer: &mut WriteBuffer);
}

/// Member-style deserialization hook
///
/// Reads into an already constructed instance. Erased boxes default-construct
/// the instance first, which is why round-tripping through a box also needs
/// `Default`.
pub trait ReadFromBuffer {
    /// Overwrite `self` with data decoded from the read buffer
    fn read_from_buffer(&mut self, buffer: &mut ReadBuffer<'_>) -> Result<(), DecodeError>;
}

impl<T: Streamable> WriteToBuffer for T {
    fn write_to_buffer(&self, buffer: &mut WriteBuffer) {
        buffer.write(self);
    }
}

impl<T: Streamable> ReadFromBuffer for T {
    fn read_from_buffer(&mut self, buffer: &mut ReadBuffer<'_>) -> Result<(), DecodeError> {
        buffer.read(self)
    }
}

/// Error type for decoding operations
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unexpected end of buffer: needed {needed} bytes but only {remaining} remain")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("Invalid bool byte: {0:#04x}")]
    InvalidBool(u8),
    #[error("Invalid char scalar value: {0:#x}")]
    InvalidChar(u32),
    #[error("Invalid UTF-8 string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl WriteToBuffer for Position {
        fn write_to_buffer(&self, buffer: &mut WriteBuffer) {
            buffer.write(&self.x);
            buffer.write(&self.y);
        }
    }

    impl ReadFromBuffer for Position {
        fn read_from_buffer(&mut self, buffer: &mut ReadBuffer<'_>) -> Result<(), DecodeError> {
            buffer.read(&mut self.x)?;
            buffer.read(&mut self.y)
        }
    }

    #[test]
    fn test_member_hooks_roundtrip() {
        let position = Position { x: 1.5, y: -2.0 };
        let mut out = WriteBuffer::new();
        position.write_to_buffer(&mut out);
        assert_eq!(out.len(), 8);

        let mut decoded = Position::default();
        let mut input = ReadBuffer::new(out.data());
        decoded.read_from_buffer(&mut input).unwrap();

        assert_eq!(decoded, position);
        assert_eq!(input.bytes_remaining(), 0);
    }

    #[test]
    fn test_streamable_gets_member_hooks() {
        let mut out = WriteBuffer::new();
        0xABCDu16.write_to_buffer(&mut out);
        assert_eq!(out.data(), &[0xCD, 0xAB]);

        let mut value = 0u16;
        value.read_from_buffer(&mut ReadBuffer::new(out.data())).unwrap();
        assert_eq!(value, 0xABCD);
    }

    #[test]
    fn test_truncated_member_read() {
        let mut out = WriteBuffer::new();
        out.write(&1.0f32);

        let mut decoded = Position::default();
        let result = decoded.read_from_buffer(&mut ReadBuffer::new(out.data()));

        match result {
            Err(DecodeError::UnexpectedEnd { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 0);
            }
            other => panic!("Expected UnexpectedEnd error, got {:?}", other),
        }
        // The first field was still decoded
        assert_eq!(decoded.x, 1.0);
    }
}
