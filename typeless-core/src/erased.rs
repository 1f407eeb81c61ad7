//! Erased box: an owning, move-only container for a value of any type
//!
//! The box stores the value behind `Box<dyn Any + Send>` together with the
//! capability entry of its type. Typed access is exact: `get::<T>()` only
//! succeeds when `T` is the stored type, never a related one.
//!
//! Serialization writes a `u64` type tag followed by the type's payload:
//!
//! | Field   | Encoding       | Meaning                                   |
//! |---------|----------------|-------------------------------------------|
//! | tag     | u64, LE        | `EMPTY_TAG` for nothing, else a `TypeKey` |
//! | payload | type-specific  | present only when tag is non-zero         |
//!
//! Tags are only meaningful between processes running the same build with
//! the same registered types. They are not a persistence format.

use std::any::Any;
use std::fmt;
use std::mem;
use std::sync::Arc;

use tracing::{error, trace, warn};

use crate::adapter::Erasable;
use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::registry::{Capability, CapabilityEntry, CapabilityRegistry, TypeKey, EMPTY_TAG};
use crate::typed::DecodeError;

/// Error returned by `ErasedBox::read`
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Failed to read type tag: {0}")]
    Tag(#[source] DecodeError),
    #[error("Unknown type tag {tag:#018x}: type was never registered in this process")]
    UnknownTypeTag { tag: u64 },
    #[error("Type {type_name} cannot be read: missing {missing}")]
    Unreadable {
        type_name: &'static str,
        missing: Capability,
    },
    #[error("Failed to read {type_name} payload: {source}")]
    Payload {
        type_name: &'static str,
        #[source]
        source: DecodeError,
    },
}

impl ReadError {
    /// Whether the stream can no longer be trusted
    ///
    /// Fatal errors mean the writer and the reader disagree on which types
    /// exist. Nothing after the offending tag can be decoded, so the whole
    /// stream must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReadError::UnknownTypeTag { .. } | ReadError::Unreadable { .. }
        )
    }
}

struct Slot {
    entry: Arc<CapabilityEntry>,
    value: Box<dyn Any + Send>,
}

/// Move-only holder of zero or one value of any type
///
/// # Example
///
/// ```rust
/// # use typeless_core::buffer::{ReadBuffer, WriteBuffer};
/// # use typeless_core::ErasedBox;
/// let mut boxed = ErasedBox::new();
/// boxed.store(42i32);
/// assert_eq!(boxed.get::<i32>(), Some(&42));
/// assert_eq!(boxed.get::<i64>(), None);
///
/// let mut out = WriteBuffer::new();
/// boxed.write(&mut out);
///
/// let mut copy = ErasedBox::new();
/// copy.read(&mut ReadBuffer::new(out.data())).unwrap();
/// assert_eq!(copy.get::<i32>(), Some(&42));
/// ```
pub struct ErasedBox {
    registry: Arc<CapabilityRegistry>,
    slot: Option<Slot>,
}

impl ErasedBox {
    /// Empty box using the process-wide registry
    pub fn new() -> Self {
        Self::with_registry(CapabilityRegistry::global())
    }

    /// Empty box using the given registry
    pub fn with_registry(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            slot: None,
        }
    }

    /// Box holding `value`, using the process-wide registry
    pub fn from_value<T: Erasable>(value: T) -> Self {
        let mut boxed = Self::new();
        boxed.store(value);
        boxed
    }

    /// Registry this box registers and looks up types in
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Take ownership of `value`, dropping whatever was held before
    ///
    /// # Panics
    ///
    /// Panics when `T` is stored for the first time and another type is
    /// already registered under the same type key. Keys come from type names,
    /// and `std::any::type_name` is not guaranteed unique: two versions of one
    /// dependency can print the same path. Give such types explicit names with
    /// `erasable!(T as "name")`.
    pub fn store<T: Erasable>(&mut self, value: T) {
        self.store_boxed(Box::new(value));
    }

    /// Take ownership of an already allocated value
    ///
    /// # Panics
    ///
    /// Same as `store`.
    pub fn store_boxed<T: Erasable>(&mut self, value: Box<T>) {
        self.reset();
        let entry = self.registry.ensure_registered::<T>();
        self.fill(entry, value);
    }

    /// Take ownership of a value whose type does not implement `Erasable`
    ///
    /// The value can be retrieved, released and dropped like any other, but
    /// its type has no default construction or buffer hooks, so `write`
    /// emits `EMPTY_TAG` for it. If `T` is `Erasable` and already registered,
    /// its full capabilities are used.
    ///
    /// # Panics
    ///
    /// Same as `store`.
    pub fn store_opaque<T: Any + Send>(&mut self, value: T) {
        self.store_boxed_opaque(Box::new(value));
    }

    /// Boxed form of `store_opaque`
    ///
    /// # Panics
    ///
    /// Same as `store`.
    pub fn store_boxed_opaque<T: Any + Send>(&mut self, value: Box<T>) {
        self.reset();
        let entry = self.registry.ensure_registered_opaque::<T>();
        self.fill(entry, value);
    }

    /// Store `Some` value or leave the box empty for `None`
    pub fn set<T: Erasable>(&mut self, value: Option<Box<T>>) {
        match value {
            Some(value) => self.store_boxed(value),
            None => self.reset(),
        }
    }

    /// The held value if it is exactly a `T`
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.slot.as_ref()?.value.downcast_ref::<T>()
    }

    /// Mutable access to the held value if it is exactly a `T`
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.slot.as_mut()?.value.downcast_mut::<T>()
    }

    /// Whether the box holds a value of exactly type `T`
    pub fn is<T: Any>(&self) -> bool {
        self.slot.as_ref().map_or(false, |slot| slot.value.is::<T>())
    }

    /// Move the held value out if it is exactly a `T`
    ///
    /// The box is left empty and no destroy operation runs; the returned box
    /// now owns the value. On a type mismatch the box is left untouched.
    pub fn release<T: Any>(&mut self) -> Option<Box<T>> {
        if !self.is::<T>() {
            return None;
        }
        let slot = self.slot.take()?;
        slot.value.downcast::<T>().ok()
    }

    /// Destroy the held value, if any
    pub fn reset(&mut self) {
        if let Some(slot) = self.slot.take() {
            trace!(type_name = slot.entry.type_name(), "destroying value");
            match slot.entry.destroy() {
                Some(destroy) => destroy(slot.value),
                None => drop(slot.value),
            }
        }
    }

    /// Whether the box holds a value at all
    pub fn has_value(&self) -> bool {
        self.slot.is_some()
    }

    /// Move the contents into a new box, leaving this one empty
    pub fn take(&mut self) -> ErasedBox {
        ErasedBox {
            registry: Arc::clone(&self.registry),
            slot: self.slot.take(),
        }
    }

    /// Exchange contents with another box
    ///
    /// Each box keeps its own registry.
    pub fn swap(&mut self, other: &mut ErasedBox) {
        mem::swap(&mut self.slot, &mut other.slot);
    }

    pub fn type_key(&self) -> Option<TypeKey> {
        self.slot.as_ref().map(|slot| slot.entry.key())
    }

    pub fn type_name(&self) -> Option<&'static str> {
        self.slot.as_ref().map(|slot| slot.entry.type_name())
    }

    /// Capability entry of the held type
    pub fn entry(&self) -> Option<&Arc<CapabilityEntry>> {
        self.slot.as_ref().map(|slot| &slot.entry)
    }

    /// Serialize the held value as tag and payload
    ///
    /// Only values that could be read back are written: the type needs
    /// default construction as well as both buffer hooks. Anything else, and
    /// an empty box, writes `EMPTY_TAG` alone so the output always stays
    /// readable.
    ///
    /// # Panics
    ///
    /// Panics if the payload contains a `String` or `Vec` longer than
    /// `u32::MAX` elements, see `WriteBuffer::write`.
    pub fn write(&self, buffer: &mut WriteBuffer) {
        let Some(slot) = &self.slot else {
            buffer.write(&EMPTY_TAG);
            return;
        };

        let entry = &slot.entry;
        match (
            entry.default_construct(),
            entry.write_to_buffer(),
            entry.read_from_buffer(),
        ) {
            (Some(_), Some(write), Some(_)) => {
                buffer.write(&entry.key().get());
                write(&*slot.value, buffer);
            }
            _ => {
                for missing in entry.missing_for_roundtrip() {
                    warn!(
                        type_name = entry.type_name(),
                        "Type does not support {}, writing empty tag", missing
                    );
                }
                buffer.write(&EMPTY_TAG);
            }
        }
    }

    /// Replace the contents with a value decoded from the buffer
    ///
    /// An empty tag empties the box. Otherwise a fresh instance of the tagged
    /// type is default-constructed and filled by the type's read hook. If that
    /// hook fails the box keeps the partially read instance and the error is
    /// returned.
    ///
    /// A tag this box's registry does not know is fatal for the stream, see
    /// `ReadError::is_fatal`; the box is left empty in that case.
    pub fn read(&mut self, buffer: &mut ReadBuffer<'_>) -> Result<(), ReadError> {
        let tag: u64 = buffer.read_value().map_err(ReadError::Tag)?;
        let Some(key) = TypeKey::from_raw(tag) else {
            self.reset();
            return Ok(());
        };

        let Some(entry) = self.registry.lookup(key) else {
            self.reset();
            error!(tag = %key, "Read unknown type tag, stream is out of sync");
            return Err(ReadError::UnknownTypeTag { tag });
        };
        let (construct, read) = match (entry.default_construct(), entry.read_from_buffer()) {
            (Some(construct), Some(read)) => (construct, read),
            (None, _) => return Err(self.unreadable(&entry, Capability::DefaultConstruct)),
            (_, None) => return Err(self.unreadable(&entry, Capability::ReadFromBuffer)),
        };

        self.reset();
        let mut value = construct();
        let outcome = read(&mut *value, buffer);
        let type_name = entry.type_name();
        self.slot = Some(Slot { entry, value });

        outcome.map_err(|source| ReadError::Payload { type_name, source })
    }

    fn fill(&mut self, entry: Arc<CapabilityEntry>, value: Box<dyn Any + Send>) {
        trace!(type_name = entry.type_name(), "storing value");
        self.slot = Some(Slot { entry, value });
    }

    fn unreadable(&mut self, entry: &CapabilityEntry, missing: Capability) -> ReadError {
        self.reset();
        error!(
            type_name = entry.type_name(),
            "Read tag of a type without {}, stream is out of sync", missing
        );
        ReadError::Unreadable {
            type_name: entry.type_name(),
            missing,
        }
    }
}

impl Default for ErasedBox {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ErasedBox {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for ErasedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedBox")
            .field("type_name", &self.type_name())
            .field("type_key", &self.type_key())
            .finish()
    }
}
