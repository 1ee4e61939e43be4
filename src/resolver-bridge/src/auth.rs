//! Lookup of externally managed login state.
//!
//! Some resolvers delegate authentication to a host-side authenticator; when
//! one is registered for a resolver, its login state decides whether the
//! resolver counts as enabled.

use resolver_core::models::ResolverId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub trait AuthRegistry: Send + Sync {
    /// `Some(logged_in)` when an authenticator is registered for the id.
    fn login_state(&self, resolver_id: &ResolverId) -> Option<bool>;
}

/// Registry updated by the host whenever an authenticator logs in or out.
#[derive(Debug, Default)]
pub struct SharedLoginStates {
    states: RwLock<HashMap<ResolverId, bool>>,
}

impl SharedLoginStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resolver_id: ResolverId, logged_in: bool) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resolver_id, logged_in);
    }

    pub fn unregister(&self, resolver_id: &ResolverId) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resolver_id);
    }
}

impl AuthRegistry for SharedLoginStates {
    fn login_state(&self, resolver_id: &ResolverId) -> Option<bool> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resolver_id)
            .copied()
    }
}
