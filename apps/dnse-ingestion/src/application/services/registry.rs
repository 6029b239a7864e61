//! Subscription Registry
//!
//! The authoritative set of active ticker symbols. The registry holds the
//! desired state: a failed upstream call never rolls back a mutation, the
//! next reconciliation re-asserts it.
//!
//! Mutations resolve the live upstream handle only after taking the registry
//! lock. A connect flips the session to `Connected` before `reconcile` takes
//! the same lock, so every mutation is either applied to the live session or
//! picked up by the reconciliation that follows it.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::UpstreamPort;
use crate::domain::streaming::ChannelNamespace;
use crate::domain::subscription::Symbol;
use crate::infrastructure::metrics;

/// Outcome of a registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    /// Symbol was inserted.
    Added(Symbol),
    /// Symbol was removed.
    Removed(Symbol),
    /// Symbol was already in the requested state.
    Unchanged(Symbol),
    /// Raw input normalized to nothing.
    Invalid,
}

impl RegistryChange {
    /// Whether the registry was modified.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        matches!(self, Self::Added(_) | Self::Removed(_))
    }
}

/// Lock-guarded set of active symbols.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    symbols: Mutex<HashSet<Symbol>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with raw symbols. Blank entries are skipped.
    #[must_use]
    pub fn seeded<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = raw
            .into_iter()
            .filter_map(|s| Symbol::normalize(s.as_ref()))
            .collect();
        Self {
            symbols: Mutex::new(symbols),
        }
    }

    /// Insert a symbol; subscribe its topics if `live` yields an upstream.
    ///
    /// `live` runs under the registry lock.
    pub fn activate<F>(&self, raw: &str, live: F) -> RegistryChange
    where
        F: FnOnce() -> Option<Arc<dyn UpstreamPort>>,
    {
        let Some(symbol) = Symbol::normalize(raw) else {
            return RegistryChange::Invalid;
        };

        let mut symbols = self.symbols.lock();
        if !symbols.insert(symbol.clone()) {
            return RegistryChange::Unchanged(symbol);
        }
        metrics::set_active_symbols(symbols.len());

        match live() {
            Some(upstream) => {
                subscribe_symbol(upstream.as_ref(), &symbol);
            }
            None => {
                tracing::debug!(symbol = %symbol, "Upstream not live, subscription deferred");
            }
        }
        drop(symbols);

        tracing::info!(symbol = %symbol, "Symbol activated");
        RegistryChange::Added(symbol)
    }

    /// Remove a symbol; unsubscribe its topics if `live` yields an upstream.
    ///
    /// `live` runs under the registry lock.
    pub fn deactivate<F>(&self, raw: &str, live: F) -> RegistryChange
    where
        F: FnOnce() -> Option<Arc<dyn UpstreamPort>>,
    {
        let Some(symbol) = Symbol::normalize(raw) else {
            return RegistryChange::Invalid;
        };

        let mut symbols = self.symbols.lock();
        if !symbols.remove(&symbol) {
            return RegistryChange::Unchanged(symbol);
        }
        metrics::set_active_symbols(symbols.len());

        if let Some(upstream) = live() {
            let topics = symbol.topics();
            if let Err(e) = upstream.unsubscribe(&topics) {
                metrics::record_upstream_error("unsubscribe");
                tracing::warn!(symbol = %symbol, error = %e, "Upstream unsubscribe failed");
            }
        }
        drop(symbols);

        tracing::info!(symbol = %symbol, "Symbol deactivated");
        RegistryChange::Removed(symbol)
    }

    /// Subscribe every active symbol on `upstream`.
    ///
    /// Holds the lock for the whole pass so no mutation interleaves with
    /// reconciliation. Returns the number of subscribe calls issued.
    pub fn reconcile(&self, upstream: &dyn UpstreamPort) -> usize {
        let symbols = self.symbols.lock();
        let calls = symbols
            .iter()
            .map(|symbol| subscribe_symbol(upstream, symbol))
            .sum();
        tracing::info!(symbols = symbols.len(), calls, "Subscriptions reconciled");
        calls
    }

    /// Whether a symbol is active.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.lock().contains(symbol)
    }

    /// Copy of the active symbols, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.symbols.lock().iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Number of active symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.lock().len()
    }

    /// Whether no symbol is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.lock().is_empty()
    }

    /// Every downstream channel implied by the active symbols.
    #[must_use]
    pub fn channels(&self, namespace: &ChannelNamespace) -> Vec<String> {
        self.snapshot()
            .iter()
            .flat_map(|symbol| namespace.channels_for(symbol))
            .collect()
    }
}

/// Issue one subscribe per topic. Failures are logged, not returned.
fn subscribe_symbol(upstream: &dyn UpstreamPort, symbol: &Symbol) -> usize {
    let topics = symbol.topics();
    for topic in &topics {
        if let Err(e) = upstream.subscribe(topic) {
            metrics::record_upstream_error("subscribe");
            tracing::warn!(symbol = %symbol, topic = %topic, error = %e, "Upstream subscribe failed");
        }
    }
    tracing::debug!(symbol = %symbol, topics = topics.len(), "Subscribed symbol");
    topics.len()
}
