//! Adapter layer converting typed values to erased capability entries
//!
//! A type becomes storable in an `ErasedBox` by implementing `Erasable`,
//! which describes the type's capabilities as a `Capabilities<T>` value. The
//! typed operations are turned into plain `fn` pointers over `dyn Any` here,
//! so the registry and the box never need to know the concrete type again.
//!
//! Most types use the `erasable!` macro, which detects the capabilities of a
//! concrete type at compile time:
//!
//! ```rust
//! # use typeless_core::{erasable, ErasedBox};
//! #[derive(Default)]
//! struct Score(u32);
//!
//! erasable!(Score);
//!
//! let boxed = ErasedBox::from_value(Score(3));
//! assert_eq!(boxed.get::<Score>().map(|s| s.0), Some(3));
//! ```
//!
//! Types that want to hand-pick their capabilities implement the trait
//! directly with the builder methods on `Capabilities`. Types that implement
//! neither can still be stored through `ErasedBox::store_opaque`, which
//! registers them with `Capabilities::new()` and nothing else.

use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;
use std::mem;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::registry::{CapabilityEntry, DefaultConstructFn, ReadFn, TypeKey, WriteFn};
use crate::typed::{DecodeError, ReadFromBuffer, WriteToBuffer};

/// Types that can be stored in an erased box
///
/// # Example
///
/// ```rust
/// # use typeless_core::{Capabilities, Erasable};
/// #[derive(Default)]
/// struct Config {
///     retries: u8,
/// }
///
/// impl Erasable for Config {
///     fn capabilities() -> Capabilities<Self> {
///         Capabilities::new()
///             .named("sandbox.config")
///             .with_default_construct()
///     }
/// }
/// ```
pub trait Erasable: Any + Send + Sized {
    /// Describe what an erased box may do with this type
    ///
    /// Called once per registry, the first time the type is stored.
    fn capabilities() -> Capabilities<Self>;
}

/// Capability description for one concrete type
///
/// Destruction is not listed here: whether a destroy operation is needed is
/// decided from the type's drop glue when the entry is built.
pub struct Capabilities<T> {
    name: &'static str,
    default_construct: Option<DefaultConstructFn>,
    write_to_buffer: Option<WriteFn>,
    read_from_buffer: Option<ReadFn>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send> Capabilities<T> {
    /// No capabilities, named after the Rust type
    pub fn new() -> Self {
        Self {
            name: type_name::<T>(),
            default_construct: None,
            write_to_buffer: None,
            read_from_buffer: None,
            _marker: PhantomData,
        }
    }

    #[doc(hidden)]
    pub fn from_detected(
        name: &'static str,
        default_construct: Option<DefaultConstructFn>,
        write_to_buffer: Option<WriteFn>,
        read_from_buffer: Option<ReadFn>,
    ) -> Self {
        Self {
            name,
            default_construct,
            write_to_buffer,
            read_from_buffer,
            _marker: PhantomData,
        }
    }

    /// Use an explicit name for the type key
    ///
    /// Names feed the wire tag, so producers and consumers that want to agree
    /// on tags independently of Rust's type paths should pick explicit names.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_default_construct(mut self) -> Self
    where
        T: Default,
    {
        self.default_construct = Some(construct_default::<T>);
        self
    }

    pub fn with_write_to_buffer(mut self) -> Self
    where
        T: WriteToBuffer,
    {
        self.write_to_buffer = Some(write_erased::<T>);
        self
    }

    pub fn with_read_from_buffer(mut self) -> Self
    where
        T: ReadFromBuffer,
    {
        self.read_from_buffer = Some(read_erased::<T>);
        self
    }

    /// Default construction plus both buffer hooks
    pub fn roundtrippable(self) -> Self
    where
        T: Default + WriteToBuffer + ReadFromBuffer,
    {
        self.with_default_construct()
            .with_write_to_buffer()
            .with_read_from_buffer()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self) -> TypeKey {
        TypeKey::from_name(self.name)
    }

    pub(crate) fn into_entry(self) -> CapabilityEntry {
        CapabilityEntry {
            key: self.key(),
            type_id: TypeId::of::<T>(),
            type_name: self.name,
            default_construct: self.default_construct,
            destroy: if mem::needs_drop::<T>() {
                Some(destroy_boxed::<T>)
            } else {
                None
            },
            write_to_buffer: self.write_to_buffer,
            read_from_buffer: self.read_from_buffer,
        }
    }
}

impl<T: Any + Send> Default for Capabilities<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn construct_default<T: Default + Any + Send>() -> Box<dyn Any + Send> {
    Box::new(T::default())
}

fn destroy_boxed<T: Any>(value: Box<dyn Any + Send>) {
    match value.downcast::<T>() {
        Ok(typed) => drop(typed),
        Err(other) => drop(other),
    }
}

fn write_erased<T: WriteToBuffer + Any>(value: &(dyn Any + Send), buffer: &mut WriteBuffer) {
    if let Some(typed) = value.downcast_ref::<T>() {
        typed.write_to_buffer(buffer);
    }
}

fn read_erased<T: ReadFromBuffer + Any>(
    value: &mut (dyn Any + Send),
    buffer: &mut ReadBuffer<'_>,
) -> Result<(), DecodeError> {
    match value.downcast_mut::<T>() {
        Some(typed) => typed.read_from_buffer(buffer),
        None => Err(DecodeError::CorruptedData(format!(
            "erased value is not a {}",
            type_name::<T>()
        ))),
    }
}

/// Compile-time capability detection for concrete types
///
/// Each capability has a fallback trait whose associated const is `None`,
/// and an inherent const on `Detect<T>` that is `Some` when `T` implements the
/// required trait. Naming `Detect::<Concrete>::CONST` with the fallback traits
/// in scope picks the inherent const when its bounds hold and the fallback
/// otherwise. This only works where the type is concrete, which is why it is
/// used through the `erasable!` macro and never from generic code.
#[doc(hidden)]
pub mod detect {
    use super::*;

    pub struct Detect<T>(PhantomData<T>);

    pub trait DefaultConstructFallback {
        const DEFAULT_CONSTRUCT: Option<DefaultConstructFn> = None;
    }
    impl<T> DefaultConstructFallback for Detect<T> {}
    impl<T: Default + Any + Send> Detect<T> {
        pub const DEFAULT_CONSTRUCT: Option<DefaultConstructFn> = Some(construct_default::<T>);
    }

    pub trait WriteToBufferFallback {
        const WRITE_TO_BUFFER: Option<WriteFn> = None;
    }
    impl<T> WriteToBufferFallback for Detect<T> {}
    impl<T: WriteToBuffer + Any> Detect<T> {
        pub const WRITE_TO_BUFFER: Option<WriteFn> = Some(write_erased::<T>);
    }

    pub trait ReadFromBufferFallback {
        const READ_FROM_BUFFER: Option<ReadFn> = None;
    }
    impl<T> ReadFromBufferFallback for Detect<T> {}
    impl<T: ReadFromBuffer + Any> Detect<T> {
        pub const READ_FROM_BUFFER: Option<ReadFn> = Some(read_erased::<T>);
    }
}

/// Implement `Erasable` for concrete types, detecting their capabilities
///
/// Default construction, `WriteToBuffer` and `ReadFromBuffer` are picked up
/// when the type implements them (any `Streamable` type implements both
/// buffer hooks). Destruction is decided from the type's drop glue.
///
/// ```ignore
/// erasable!(Player, Enemy);
/// erasable!(Player as "game.player");
/// ```
#[macro_export]
macro_rules! erasable {
    (@impl $ty:ty, $name:expr) => {
        impl $crate::adapter::Erasable for $ty {
            fn capabilities() -> $crate::adapter::Capabilities<Self> {
                #[allow(unused_imports)]
                use $crate::adapter::detect::{
                    DefaultConstructFallback, Detect, ReadFromBufferFallback, WriteToBufferFallback,
                };
                $crate::adapter::Capabilities::from_detected(
                    $name,
                    Detect::<$ty>::DEFAULT_CONSTRUCT,
                    Detect::<$ty>::WRITE_TO_BUFFER,
                    Detect::<$ty>::READ_FROM_BUFFER,
                )
            }
        }
    };
    ($ty:ty as $name:expr) => {
        $crate::erasable!(@impl $ty, $name);
    };
    ($($ty:ty),+ $(,)?) => {
        $(
            $crate::erasable!(@impl $ty, ::core::any::type_name::<$ty>());
        )+
    };
}

erasable!(bool, char, (), String);
erasable!(u8, u16, u32, u64, u128, usize);
erasable!(i8, i16, i32, i64, i128, isize);
erasable!(f32, f64);

// Foreign containers can only be made erasable here
macro_rules! erasable_containers {
    ($($ty:ty),* $(,)?) => {
        $(
            erasable!(Option<$ty>, Vec<$ty>);
        )*
    };
}

erasable_containers!(
    bool, char, (), String, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32,
    f64,
);

#[cfg(test)]
mod tests {
    use super::detect::*;
    use super::*;
    use crate::registry::Capability;

    #[derive(Default)]
    struct Counter {
        hits: u64,
    }

    impl WriteToBuffer for Counter {
        fn write_to_buffer(&self, buffer: &mut WriteBuffer) {
            buffer.write(&self.hits);
        }
    }

    impl ReadFromBuffer for Counter {
        fn read_from_buffer(&mut self, buffer: &mut ReadBuffer<'_>) -> Result<(), DecodeError> {
            buffer.read(&mut self.hits)
        }
    }

    struct Handle {
        _name: String,
    }

    // Serializable, but deliberately only registered as write-only
    #[derive(Default)]
    struct Outbound(u8);

    impl WriteToBuffer for Outbound {
        fn write_to_buffer(&self, buffer: &mut WriteBuffer) {
            buffer.write(&self.0);
        }
    }

    impl Erasable for Outbound {
        fn capabilities() -> Capabilities<Self> {
            Capabilities::new()
                .named("adapter-tests.outbound")
                .with_default_construct()
                .with_write_to_buffer()
        }
    }

    erasable!(Counter, Handle);

    #[test]
    fn test_detect_finds_traits() {
        assert!(Detect::<Counter>::DEFAULT_CONSTRUCT.is_some());
        assert!(Detect::<Counter>::WRITE_TO_BUFFER.is_some());
        assert!(Detect::<Counter>::READ_FROM_BUFFER.is_some());

        assert!(Detect::<Handle>::DEFAULT_CONSTRUCT.is_none());
        assert!(Detect::<Handle>::WRITE_TO_BUFFER.is_none());
        assert!(Detect::<Handle>::READ_FROM_BUFFER.is_none());

        // Primitives reach the buffer hooks through Streamable
        assert!(Detect::<f64>::WRITE_TO_BUFFER.is_some());
        assert!(Detect::<f64>::READ_FROM_BUFFER.is_some());
    }

    #[test]
    fn test_macro_capabilities() {
        let entry = Counter::capabilities().into_entry();

        assert!(entry.is_roundtrippable());
        assert!(!entry.has(Capability::Destroy));
        assert!(entry.type_name().ends_with("Counter"));
        assert_eq!(entry.key(), TypeKey::from_name(entry.type_name()));
    }

    #[test]
    fn test_manual_capabilities() {
        let capabilities = Outbound::capabilities();
        assert_eq!(capabilities.name(), "adapter-tests.outbound");
        assert_eq!(capabilities.key(), TypeKey::from_name("adapter-tests.outbound"));

        let entry = capabilities.into_entry();
        assert!(entry.has(Capability::DefaultConstruct));
        assert!(entry.has(Capability::WriteToBuffer));
        assert!(!entry.has(Capability::ReadFromBuffer));
        assert_eq!(entry.missing_for_roundtrip(), vec![Capability::ReadFromBuffer]);
    }

    #[test]
    fn test_destroy_follows_drop_glue() {
        assert!(Handle::capabilities().into_entry().has(Capability::Destroy));
        assert!(String::capabilities().into_entry().has(Capability::Destroy));
        assert!(!u32::capabilities().into_entry().has(Capability::Destroy));
    }

    #[test]
    fn test_core_containers_are_erasable() {
        assert!(usize::capabilities().into_entry().is_roundtrippable());
        assert!(char::capabilities().into_entry().is_roundtrippable());
        assert!(<()>::capabilities().into_entry().is_roundtrippable());

        let options = Option::<u8>::capabilities().into_entry();
        assert!(options.is_roundtrippable());
        assert_eq!(options.type_name(), "core::option::Option<u8>");

        let numbers = Vec::<i32>::capabilities().into_entry();
        assert!(numbers.is_roundtrippable());
        assert!(numbers.has(Capability::Destroy));
    }

    #[test]
    fn test_plain_capabilities_for_foreign_type() {
        let entry = Capabilities::<std::time::Duration>::new().into_entry();

        assert_eq!(entry.type_name(), "core::time::Duration");
        assert!(!entry.has(Capability::DefaultConstruct));
        assert!(!entry.has(Capability::WriteToBuffer));
        assert!(!entry.has(Capability::ReadFromBuffer));
    }

    #[test]
    fn test_erased_functions_dispatch_to_type() {
        let entry = Counter::capabilities().into_entry();
        let construct = entry.default_construct().unwrap();
        let write = entry.write_to_buffer().unwrap();
        let read = entry.read_from_buffer().unwrap();

        let mut out = WriteBuffer::new();
        write(&Counter { hits: 9 }, &mut out);
        assert_eq!(out.data(), &9u64.to_le_bytes());

        let mut fresh = construct();
        read(&mut *fresh, &mut ReadBuffer::new(out.data())).unwrap();
        assert_eq!(fresh.downcast_ref::<Counter>().unwrap().hits, 9);
    }

    #[test]
    fn test_read_rejects_wrong_erased_type() {
        let entry = Counter::capabilities().into_entry();
        let read = entry.read_from_buffer().unwrap();

        let mut wrong: Box<dyn Any + Send> = Box::new(5u32);
        let result = read(&mut *wrong, &mut ReadBuffer::new(&[0; 8]));

        assert!(matches!(result, Err(DecodeError::CorruptedData(_))));
    }
}
