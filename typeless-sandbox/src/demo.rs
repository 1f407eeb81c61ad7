//! Demo value types and the write/read scenario
//!
//! The scenario stores one value of each demo type in a single erased box,
//! writing it after every store. Types that cannot round-trip are written as
//! empty tags, and the destructible value is released out of the box instead
//! of being written at all.

use std::sync::Arc;

use tracing::{debug, info};
use typeless_core::{
    erasable, CapabilityRegistry, DecodeError, ErasedBox, ReadBuffer, ReadError, ReadFromBuffer,
    Streamable, WriteBuffer, WriteToBuffer,
};

/// Serialized through the member-style buffer hooks
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemberStreamable {
    pub value: i32,
}

impl WriteToBuffer for MemberStreamable {
    fn write_to_buffer(&self, buffer: &mut WriteBuffer) {
        buffer.write(&self.value);
    }
}

impl ReadFromBuffer for MemberStreamable {
    fn read_from_buffer(&mut self, buffer: &mut ReadBuffer<'_>) -> Result<(), DecodeError> {
        buffer.read(&mut self.value)
    }
}

/// Serialized through the primitive codec
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FreeStreamable {
    pub value: i32,
}

impl Streamable for FreeStreamable {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        buffer.write(&self.value);
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            value: buffer.read_value()?,
        })
    }
}

/// Default-constructible, but without any codec
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NonStreamable {
    pub value: i32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub nanos: i64,
}

impl Streamable for Timestamp {
    fn write_to(&self, buffer: &mut WriteBuffer) {
        buffer.write(&self.nanos);
    }

    fn read_from(buffer: &mut ReadBuffer<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            nanos: buffer.read_value()?,
        })
    }
}

/// Has a destructor and nothing else
#[derive(Debug)]
pub struct Destructible {
    pub value: i32,
}

impl Drop for Destructible {
    fn drop(&mut self) {
        debug!(value = self.value, "Destructible dropped");
    }
}

erasable!(MemberStreamable as "sandbox.member_streamable");
erasable!(FreeStreamable as "sandbox.free_streamable");
erasable!(NonStreamable as "sandbox.non_streamable");
erasable!(Timestamp as "sandbox.timestamp");
erasable!(Destructible as "sandbox.destructible");

/// Number of records the scenario writes per round
pub const RECORDS_PER_ROUND: usize = 5;

/// Write the scenario `rounds` times and return the encoded stream
pub fn run_scenario(registry: &Arc<CapabilityRegistry>, rounds: u32) -> WriteBuffer {
    let mut boxed = ErasedBox::with_registry(Arc::clone(registry));
    let mut out = WriteBuffer::new();

    for round in 0..rounds {
        let base = i32::try_from(round % 100_000).unwrap_or_default() * 10;

        boxed.store(MemberStreamable { value: base + 1 });
        boxed.write(&mut out);
        boxed.store(FreeStreamable { value: base + 2 });
        boxed.write(&mut out);
        boxed.store(NonStreamable { value: base + 3 });
        boxed.write(&mut out);
        boxed.store(base + 6);
        boxed.write(&mut out);
        boxed.store(Timestamp {
            nanos: i64::from(base) + 7,
        });
        boxed.write(&mut out);

        boxed.store(Destructible { value: base + 8 });
        if let Some(released) = boxed.release::<Destructible>() {
            info!(value = released.value, "Released destructible value");
        }
    }

    info!(
        rounds,
        records = rounds as usize * RECORDS_PER_ROUND,
        bytes = out.len(),
        "Scenario written"
    );
    out
}

/// Decode every record in `bytes` and describe it
pub fn decode_stream(
    registry: &Arc<CapabilityRegistry>,
    bytes: &[u8],
) -> Result<Vec<String>, ReadError> {
    let mut input = ReadBuffer::new(bytes);
    let mut boxed = ErasedBox::with_registry(Arc::clone(registry));
    let mut records = Vec::new();

    while !input.is_exhausted() {
        boxed.read(&mut input)?;
        records.push(describe(&boxed));
    }
    Ok(records)
}

/// Human-readable form of whatever the box holds
pub fn describe(boxed: &ErasedBox) -> String {
    if let Some(value) = boxed.get::<MemberStreamable>() {
        return format!("{:?}", value);
    }
    if let Some(value) = boxed.get::<FreeStreamable>() {
        return format!("{:?}", value);
    }
    if let Some(value) = boxed.get::<NonStreamable>() {
        return format!("{:?}", value);
    }
    if let Some(value) = boxed.get::<Timestamp>() {
        return format!("{:?}", value);
    }
    if let Some(value) = boxed.get::<i32>() {
        return value.to_string();
    }
    match boxed.type_name() {
        Some(name) => format!("<{}>", name),
        None => "<empty>".to_string(),
    }
}
