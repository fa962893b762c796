//! Scope resolution contract.
//!
//! The engine never owns the entity hierarchy — an external collaborator
//! answers "what are the ancestors of this entity" (task → project →
//! retainer/brand → client, invoice → client, chat space → client) and
//! "what is this scope called". Detectors fill whatever levels the resolver
//! can see; partially-null chains are fine.

use crate::types::{ScopeChain, ScopeLevel};

/// Read-only lookup of an entity's ancestor scope ids and scope names.
pub trait ScopeResolver {
    /// Ancestor ids for an observed entity, or `None` when the entity is
    /// unknown to the resolver.
    fn resolve(&self, entity_type: &str, entity_id: &str) -> Option<ScopeChain>;

    /// Display name for a scope id, used in issue headlines.
    fn scope_name(&self, level: ScopeLevel, scope_id: &str) -> Option<String>;
}

/// Resolver that knows nothing. Signals keep empty scope chains and
/// headlines fall back to the neutral scope name.
pub struct NullScopeResolver;

impl ScopeResolver for NullScopeResolver {
    fn resolve(&self, _entity_type: &str, _entity_id: &str) -> Option<ScopeChain> {
        None
    }

    fn scope_name(&self, _level: ScopeLevel, _scope_id: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use super::*;

    /// In-memory resolver for tests: entity id → chain, scope id → name.
    #[derive(Default)]
    pub struct MapScopeResolver {
        pub chains: HashMap<(String, String), ScopeChain>,
        pub names: HashMap<String, String>,
    }

    impl MapScopeResolver {
        pub fn with_chain(mut self, entity_type: &str, entity_id: &str, chain: ScopeChain) -> Self {
            self.chains
                .insert((entity_type.to_string(), entity_id.to_string()), chain);
            self
        }

        pub fn with_name(mut self, scope_id: &str, name: &str) -> Self {
            self.names.insert(scope_id.to_string(), name.to_string());
            self
        }
    }

    impl ScopeResolver for MapScopeResolver {
        fn resolve(&self, entity_type: &str, entity_id: &str) -> Option<ScopeChain> {
            self.chains
                .get(&(entity_type.to_string(), entity_id.to_string()))
                .cloned()
        }

        fn scope_name(&self, _level: ScopeLevel, scope_id: &str) -> Option<String> {
            self.names.get(scope_id).cloned()
        }
    }
}
