//! Capability registry for erased boxes
//!
//! Maps a `TypeKey` to the immutable `CapabilityEntry` describing what an
//! erased box may do with a value of that type. Entries are computed once per
//! type, on first store, and shared afterwards.
//!
//! The registry is an explicit object. Boxes created with `ErasedBox::new()`
//! use the process-wide instance returned by `CapabilityRegistry::global()`;
//! tests and embedders can inject their own through
//! `ErasedBox::with_registry`. All access goes through a read-write lock:
//! lookups only ever take the read side, and registration takes the write
//! side once per type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::adapter::{Capabilities, Erasable};
use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::typed::DecodeError;

/// Wire tag written for an empty or unserializable box
pub const EMPTY_TAG: u64 = 0;

/// Allocate and default-initialize a new instance
pub type DefaultConstructFn = fn() -> Box<dyn Any + Send>;
/// Run the type's drop glue and free the storage
pub type DestroyFn = fn(Box<dyn Any + Send>);
/// Serialize an instance into the write buffer
pub type WriteFn = fn(&(dyn Any + Send), &mut WriteBuffer);
/// Deserialize into an existing instance
pub type ReadFn = fn(&mut (dyn Any + Send), &mut ReadBuffer<'_>) -> Result<(), DecodeError>;

static GLOBAL: Lazy<Arc<CapabilityRegistry>> = Lazy::new(|| Arc::new(CapabilityRegistry::new()));

/// Opaque per-type identity
///
/// Derived from a type name with 64-bit FNV-1a, so processes running the same
/// build agree on keys. Keys are not a cross-build format and must not be
/// persisted. Zero is reserved for `EMPTY_TAG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(NonZeroU64);

impl TypeKey {
    /// Compute the key for a type name
    pub const fn from_name(name: &str) -> Self {
        const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let bytes = name.as_bytes();
        let mut hash = FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
            i += 1;
        }
        match NonZeroU64::new(hash) {
            Some(key) => TypeKey(key),
            None => TypeKey(NonZeroU64::MIN),
        }
    }

    /// Interpret a wire tag, `None` for `EMPTY_TAG`
    pub fn from_raw(tag: u64) -> Option<Self> {
        NonZeroU64::new(tag).map(TypeKey)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0.get())
    }
}

/// One of the four optional operations a type may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    DefaultConstruct,
    Destroy,
    WriteToBuffer,
    ReadFromBuffer,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::DefaultConstruct => "default construction",
            Capability::Destroy => "non-trivial destruction",
            Capability::WriteToBuffer => "writing to WriteBuffer",
            Capability::ReadFromBuffer => "reading from ReadBuffer",
        };
        f.write_str(name)
    }
}

/// Immutable record of what a registered type supports
#[derive(Debug, Clone)]
pub struct CapabilityEntry {
    pub(crate) key: TypeKey,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) default_construct: Option<DefaultConstructFn>,
    pub(crate) destroy: Option<DestroyFn>,
    pub(crate) write_to_buffer: Option<WriteFn>,
    pub(crate) read_from_buffer: Option<ReadFn>,
}

impl CapabilityEntry {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn default_construct(&self) -> Option<DefaultConstructFn> {
        self.default_construct
    }

    pub fn destroy(&self) -> Option<DestroyFn> {
        self.destroy
    }

    pub fn write_to_buffer(&self) -> Option<WriteFn> {
        self.write_to_buffer
    }

    pub fn read_from_buffer(&self) -> Option<ReadFn> {
        self.read_from_buffer
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::DefaultConstruct => self.default_construct.is_some(),
            Capability::Destroy => self.destroy.is_some(),
            Capability::WriteToBuffer => self.write_to_buffer.is_some(),
            Capability::ReadFromBuffer => self.read_from_buffer.is_some(),
        }
    }

    /// Capabilities a round-trip needs that this type lacks
    ///
    /// Writing is only allowed when the value could also be read back, which
    /// requires default construction as well as both buffer hooks.
    pub fn missing_for_roundtrip(&self) -> Vec<Capability> {
        [
            Capability::DefaultConstruct,
            Capability::WriteToBuffer,
            Capability::ReadFromBuffer,
        ]
        .into_iter()
        .filter(|capability| !self.has(*capability))
        .collect()
    }

    pub fn is_roundtrippable(&self) -> bool {
        self.missing_for_roundtrip().is_empty()
    }
}

#[derive(Default)]
struct RegistryTables {
    by_key: HashMap<TypeKey, Arc<CapabilityEntry>>,
    by_type: HashMap<TypeId, TypeKey>,
}

/// Thread-safe, append-only map from type identity to capabilities
#[derive(Default)]
pub struct CapabilityRegistry {
    tables: RwLock<RegistryTables>,
}

impl CapabilityRegistry {
    /// Create an empty, isolated registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by `ErasedBox::new()`
    pub fn global() -> Arc<CapabilityRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Register `T` if this is the first time it is seen and return its entry
    ///
    /// Capabilities are detected outside the lock; the write lock is only held
    /// for the presence re-check and insert. Calling this again for the same
    /// type returns the entry created the first time.
    ///
    /// # Panics
    ///
    /// Panics if a different type already owns the key `T`'s name hashes to.
    /// That happens when two types are given the same explicit name.
    pub fn ensure_registered<T: Erasable>(&self) -> Arc<CapabilityEntry> {
        self.register_with(T::capabilities)
    }

    /// Register `T` without any capability beyond destruction
    ///
    /// Used for types that do not implement `Erasable`. Their values can be
    /// stored and retrieved, but never written or read. If `T` is already
    /// registered, the existing entry is returned unchanged.
    ///
    /// # Panics
    ///
    /// Same as `ensure_registered`.
    pub fn ensure_registered_opaque<T: Any + Send>(&self) -> Arc<CapabilityEntry> {
        self.register_with(Capabilities::<T>::new)
    }

    fn register_with<T: Any + Send>(
        &self,
        capabilities: impl FnOnce() -> Capabilities<T>,
    ) -> Arc<CapabilityEntry> {
        let type_id = TypeId::of::<T>();
        if let Some(entry) = self.entry_for_type(type_id) {
            return entry;
        }

        let entry = capabilities().into_entry();

        let mut tables = self.write();
        if let Some(key) = tables.by_type.get(&type_id) {
            if let Some(existing) = tables.by_key.get(key) {
                return Arc::clone(existing);
            }
        }
        if let Some(existing) = tables.by_key.get(&entry.key) {
            panic!(
                "type key collision: `{}` and `{}` both map to {}",
                existing.type_name, entry.type_name, entry.key
            );
        }

        debug!(
            type_name = entry.type_name,
            key = %entry.key,
            default_construct = entry.default_construct.is_some(),
            destroy = entry.destroy.is_some(),
            write = entry.write_to_buffer.is_some(),
            read = entry.read_from_buffer.is_some(),
            "registered erased type"
        );

        let entry = Arc::new(entry);
        tables.by_type.insert(type_id, entry.key);
        tables.by_key.insert(entry.key, Arc::clone(&entry));
        entry
    }

    /// Look up the entry registered for a key
    pub fn lookup(&self, key: TypeKey) -> Option<Arc<CapabilityEntry>> {
        self.read().by_key.get(&key).cloned()
    }

    /// Whether a type is registered under `key`
    pub fn contains(&self, key: TypeKey) -> bool {
        self.read().by_key.contains_key(&key)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.read().by_key.len()
    }

    /// Whether no type has been registered yet
    pub fn is_empty(&self) -> bool {
        self.read().by_key.is_empty()
    }

    /// Names of all registered types, sorted
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.read().by_key.values().map(|entry| entry.type_name).collect();
        names.sort_unstable();
        names
    }

    fn entry_for_type(&self, type_id: TypeId) -> Option<Arc<CapabilityEntry>> {
        let tables = self.read();
        let key = tables.by_type.get(&type_id)?;
        tables.by_key.get(key).cloned()
    }

    // Entries are immutable once inserted, so a panic while holding the lock
    // cannot leave a half-written entry behind.
    fn read(&self) -> RwLockReadGuard<'_, RegistryTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryTables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erasable;
    use std::thread;

    #[derive(Debug, Default, PartialEq)]
    struct Plain {
        value: u32,
    }

    #[derive(Debug)]
    struct Labelled {
        label: String,
    }

    struct Twin;
    struct OtherTwin;

    erasable!(Plain, Labelled);
    erasable!(Twin as "registry-tests.twin");
    erasable!(OtherTwin as "registry-tests.twin");

    #[test]
    fn test_type_key_is_stable_and_nonzero() {
        let first = TypeKey::from_name("game.player");
        let second = TypeKey::from_name("game.player");
        let other = TypeKey::from_name("game.enemy");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_ne!(first.get(), EMPTY_TAG);
        assert_eq!(TypeKey::from_raw(first.get()), Some(first));
        assert_eq!(TypeKey::from_raw(EMPTY_TAG), None);
    }

    #[test]
    fn test_type_key_matches_fnv1a() {
        // Reference values for 64-bit FNV-1a
        assert_eq!(TypeKey::from_name("").get(), 0xcbf2_9ce4_8422_2325);
        assert_eq!(TypeKey::from_name("a").get(), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_ensure_registered_is_idempotent() {
        let registry = CapabilityRegistry::new();
        assert!(registry.is_empty());

        let first = registry.ensure_registered::<Plain>();
        let second = registry.ensure_registered::<Plain>();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(first.key()));
    }

    #[test]
    fn test_detected_capabilities() {
        let registry = CapabilityRegistry::new();

        let plain = registry.ensure_registered::<Plain>();
        assert!(plain.has(Capability::DefaultConstruct));
        // No drop glue, no destroy operation
        assert!(!plain.has(Capability::Destroy));
        assert!(!plain.has(Capability::WriteToBuffer));
        assert!(!plain.has(Capability::ReadFromBuffer));

        let labelled = registry.ensure_registered::<Labelled>();
        assert!(!labelled.has(Capability::DefaultConstruct));
        assert!(labelled.has(Capability::Destroy));

        let number = registry.ensure_registered::<i32>();
        assert!(number.is_roundtrippable());
        assert!(!number.has(Capability::Destroy));

        let text = registry.ensure_registered::<String>();
        assert!(text.is_roundtrippable());
        assert!(text.has(Capability::Destroy));
    }

    #[test]
    fn test_missing_for_roundtrip() {
        let registry = CapabilityRegistry::new();
        let entry = registry.ensure_registered::<Labelled>();

        assert_eq!(
            entry.missing_for_roundtrip(),
            vec![
                Capability::DefaultConstruct,
                Capability::WriteToBuffer,
                Capability::ReadFromBuffer
            ]
        );
        assert!(!entry.is_roundtrippable());
    }

    #[test]
    fn test_lookup_unknown_key() {
        let registry = CapabilityRegistry::new();
        registry.ensure_registered::<Plain>();

        assert!(registry.lookup(TypeKey::from_name("never-registered")).is_none());
        assert!(!registry.contains(TypeKey::from_name("never-registered")));
    }

    #[test]
    fn test_lookup_returns_registered_entry() {
        let registry = CapabilityRegistry::new();
        let entry = registry.ensure_registered::<u64>();

        let found = registry.lookup(entry.key()).unwrap();
        assert_eq!((*found).type_id(), TypeId::of::<u64>());
        assert_eq!(found.type_name(), "u64");
    }

    #[test]
    fn test_type_names_sorted() {
        let registry = CapabilityRegistry::new();
        registry.ensure_registered::<u8>();
        registry.ensure_registered::<bool>();
        registry.ensure_registered::<String>();

        assert_eq!(registry.type_names(), vec!["alloc::string::String", "bool", "u8"]);
    }

    #[test]
    fn test_registries_are_isolated() {
        let first = CapabilityRegistry::new();
        let second = CapabilityRegistry::new();

        let entry = first.ensure_registered::<Plain>();

        assert!(first.contains(entry.key()));
        assert!(!second.contains(entry.key()));
    }

    #[test]
    fn test_concurrent_first_registration() {
        let registry = Arc::new(CapabilityRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.ensure_registered::<Labelled>())
            })
            .collect();

        let entries: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(registry.len(), 1);
        let canonical = registry.lookup(entries[0].key()).unwrap();
        for entry in &entries {
            assert!(Arc::ptr_eq(entry, &canonical));
        }
    }

    #[test]
    #[should_panic(expected = "type key collision")]
    fn test_key_collision_panics() {
        let registry = CapabilityRegistry::new();
        registry.ensure_registered::<Twin>();
        registry.ensure_registered::<OtherTwin>();
    }

    #[test]
    fn test_opaque_registration_only_destroys() {
        let registry = CapabilityRegistry::new();

        let duration = registry.ensure_registered_opaque::<std::time::Duration>();
        assert_eq!(duration.type_name(), "core::time::Duration");
        assert_eq!(
            duration.missing_for_roundtrip(),
            vec![
                Capability::DefaultConstruct,
                Capability::WriteToBuffer,
                Capability::ReadFromBuffer
            ]
        );
        assert!(!duration.has(Capability::Destroy));

        let names = registry.ensure_registered_opaque::<Vec<&'static str>>();
        assert!(names.has(Capability::Destroy));
        assert!(!names.has(Capability::DefaultConstruct));
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = CapabilityRegistry::new();

        let full = registry.ensure_registered::<Plain>();
        let opaque = registry.ensure_registered_opaque::<Plain>();

        assert!(Arc::ptr_eq(&full, &opaque));
        assert!(opaque.has(Capability::DefaultConstruct));
    }

    #[test]
    fn test_global_registry_is_shared() {
        let first = CapabilityRegistry::global();
        let second = CapabilityRegistry::global();

        assert!(Arc::ptr_eq(&first, &second));
        let entry = first.ensure_registered::<Plain>();
        assert!(second.contains(entry.key()));
    }
}
