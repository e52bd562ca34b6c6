//! Local bookkeeping of confirmed subscriptions.
//!
//! The ledger is the source of truth for what must be re-established after a
//! reconnect. Entries are added and removed only in response to confirmed
//! acknowledgements from the wire — never speculatively — and the recovery
//! routine iterates a snapshot of it to re-issue every tracked feed.

use serde_json::Value;

/// Insertion-ordered, duplicate-free collection of subscription descriptors.
///
/// A descriptor is a protocol-shaped JSON object describing one logical feed
/// (channel plus symbols/pairs). What counts as a duplicate is dialect
/// specific, so matching is supplied per call as a predicate.
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    entries: Vec<Value>,
}

impl SubscriptionLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked descriptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger tracks nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `descriptor`, first dropping every existing entry that
    /// `matches` it. Keeps the ledger duplicate-free under repeated
    /// acknowledgements of the same feed.
    pub fn insert(&mut self, descriptor: Value, matches: impl Fn(&Value, &Value) -> bool) {
        self.entries.retain(|existing| !matches(existing, &descriptor));
        self.entries.push(descriptor);
    }

    /// Removes the first entry that `matches` `descriptor`. Returns whether
    /// anything was removed, so duplicate unsubscribe acks are a no-op.
    pub fn remove(&mut self, descriptor: &Value, matches: impl Fn(&Value, &Value) -> bool) -> bool {
        match self.entries.iter().position(|existing| matches(existing, descriptor)) {
            Some(position) => {
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }

    /// Returns a copy of the tracked descriptors in insertion order.
    ///
    /// The copy is deep: callers (including the recovery routine, which sends
    /// between awaits while the live ledger may change) cannot observe or
    /// corrupt internal state through it.
    pub fn snapshot(&self) -> Vec<Value> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exact(a: &Value, b: &Value) -> bool {
        a == b
    }

    #[test]
    fn insert_replaces_duplicates() {
        let mut ledger = SubscriptionLedger::new();
        let sub = json!({"event": "subscribe", "pair": ["XBT/USD"]});

        ledger.insert(sub.clone(), exact);
        ledger.insert(sub.clone(), exact);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.snapshot(), vec![sub]);
    }

    #[test]
    fn insert_keeps_distinct_entries_in_order() {
        let mut ledger = SubscriptionLedger::new();
        let first = json!({"channel": "ticker", "symbol": ["BTC/USD"]});
        let second = json!({"channel": "ticker", "symbol": ["ETH/USD"]});

        ledger.insert(first.clone(), exact);
        ledger.insert(second.clone(), exact);

        assert_eq!(ledger.snapshot(), vec![first, second]);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut ledger = SubscriptionLedger::new();
        let sub = json!({"channel": "book"});
        ledger.insert(sub.clone(), exact);

        assert!(ledger.remove(&sub, exact));
        assert!(!ledger.remove(&sub, exact));
        assert!(ledger.is_empty());
    }

    #[test]
    fn remove_honors_custom_matching() {
        let mut ledger = SubscriptionLedger::new();
        ledger.insert(json!({"channel": "book", "symbol": ["BTC/USD"], "depth": 10}), exact);

        let probe = json!({"channel": "book", "symbol": ["BTC/USD"]});
        let by_channel_and_symbol = |a: &Value, b: &Value| {
            a.get("channel") == b.get("channel") && a.get("symbol") == b.get("symbol")
        };

        assert!(ledger.remove(&probe, by_channel_and_symbol));
        assert!(ledger.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_the_ledger() {
        let mut ledger = SubscriptionLedger::new();
        ledger.insert(json!({"channel": "trade"}), exact);

        let mut snapshot = ledger.snapshot();
        snapshot.clear();

        assert_eq!(ledger.len(), 1);
    }
}
