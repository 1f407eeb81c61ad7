//! Capability registry initialization
//!
//! Registers every type the sandbox can put on the wire. Doing this at one
//! deterministic point on startup means a process can decode streams before
//! it has ever stored a value of the types involved.

use tracing::info;
use typeless_core::CapabilityRegistry;

use crate::demo::{Destructible, FreeStreamable, MemberStreamable, NonStreamable, Timestamp};

/// Register all sandbox types with the given registry
///
/// This function should be called once at startup, before any value is read.
pub fn initialize_registry(registry: &CapabilityRegistry) {
    registry.ensure_registered::<MemberStreamable>();
    registry.ensure_registered::<FreeStreamable>();
    registry.ensure_registered::<NonStreamable>();
    registry.ensure_registered::<Timestamp>();
    registry.ensure_registered::<Destructible>();
    registry.ensure_registered::<i32>();

    info!("Initialized capability registry with {} types", registry.len());

    for type_name in registry.type_names() {
        info!("  - {}", type_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typeless_core::{Capability, TypeKey};

    #[test]
    fn test_initialize_registry() {
        let registry = CapabilityRegistry::new();
        initialize_registry(&registry);

        assert_eq!(registry.len(), 6);
        let timestamp = registry.lookup(TypeKey::from_name("sandbox.timestamp")).unwrap();
        assert!(timestamp.is_roundtrippable());

        let destructible = registry.lookup(TypeKey::from_name("sandbox.destructible")).unwrap();
        assert!(destructible.has(Capability::Destroy));
        assert!(!destructible.has(Capability::DefaultConstruct));
    }

    #[test]
    fn test_initialize_twice_is_harmless() {
        let registry = CapabilityRegistry::new();
        initialize_registry(&registry);
        initialize_registry(&registry);
        assert_eq!(registry.len(), 6);
    }
}
