use alloy::primitives::{Address, B256, BlockNumber};
use tracing::warn;

/// An ABI-derived event signature registered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignature {
    /// Human-readable event name, e.g. `Transfer`.
    pub name: String,
    /// `keccak256` hash of the canonical signature, matched against `topics[0]`.
    pub topic0: B256,
}

impl EventSignature {
    #[must_use]
    pub fn new(name: impl Into<String>, topic0: B256) -> Self {
        Self { name: name.into(), topic0 }
    }
}

/// A registered (contract, event) combination being indexed.
///
/// Subscriptions are created from resolved configuration at startup (or appended at runtime)
/// and are immutable thereafter; sync progress lives in the externally persisted
/// [`Checkpoint`](crate::Checkpoint), not here.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    /// Network this subscription indexes; selects the RPC pool.
    pub network: String,
    /// Contract addresses to match. Empty means all addresses.
    pub addresses: Vec<Address>,
    /// Event signatures to match. Empty means all events on the addresses.
    events: Vec<EventSignature>,
    /// First block to index. `None` means genesis.
    pub start_block: Option<BlockNumber>,
    /// Last block to index. `None` means live indefinitely.
    pub end_block: Option<BlockNumber>,
}

impl Subscription {
    /// Creates a subscription, deduplicating colliding event signatures.
    ///
    /// When two registered ABIs resolve to the same `topics[0]` hash, the first registration
    /// wins and the duplicate is skipped with a warning.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        network: impl Into<String>,
        addresses: Vec<Address>,
        events: Vec<EventSignature>,
    ) -> Self {
        let mut registered: Vec<EventSignature> = Vec::with_capacity(events.len());
        for event in events {
            if let Some(existing) = registered.iter().find(|e| e.topic0 == event.topic0) {
                warn!(
                    kept = %existing.name,
                    skipped = %event.name,
                    topic0 = %event.topic0,
                    "Colliding event signatures, first registration wins"
                );
                continue;
            }
            registered.push(event);
        }

        Self {
            id: id.into(),
            network: network.into(),
            addresses,
            events: registered,
            start_block: None,
            end_block: None,
        }
    }

    /// Sets the first block to index. Unset means genesis.
    #[must_use]
    pub fn start_block(mut self, start_block: BlockNumber) -> Self {
        self.start_block = Some(start_block);
        self
    }

    /// Sets the last block to index. Unset means live indefinitely.
    #[must_use]
    pub fn end_block(mut self, end_block: BlockNumber) -> Self {
        self.end_block = Some(end_block);
        self
    }

    /// Registered signature hashes, in registration order.
    #[must_use]
    pub fn topics(&self) -> Vec<B256> {
        self.events.iter().map(|e| e.topic0).collect()
    }

    /// Resolves a `topics[0]` hash back to its registered event name.
    #[must_use]
    pub fn event_name(&self, topic0: &B256) -> Option<&str> {
        self.events.iter().find(|e| &e.topic0 == topic0).map(|e| e.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;

    const TOPIC: B256 =
        b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

    #[test]
    fn colliding_signatures_keep_first_registration() {
        let sub = Subscription::new(
            "sub",
            "mainnet",
            vec![],
            vec![
                EventSignature::new("Transfer", TOPIC),
                EventSignature::new("TransferShadow", TOPIC),
            ],
        );

        assert_eq!(sub.topics().len(), 1);
        assert_eq!(sub.event_name(&TOPIC), Some("Transfer"));
    }

    #[test]
    fn unset_bounds_stay_unset() {
        let sub = Subscription::new("sub", "mainnet", vec![], vec![]);

        assert!(sub.start_block.is_none());
        assert!(sub.end_block.is_none());
    }

    #[test]
    fn unknown_topic_has_no_event_name() {
        let sub =
            Subscription::new("sub", "mainnet", vec![], vec![EventSignature::new("T", TOPIC)]);

        let other = b256!("0x00000000000000000000000000000000000000000000000000000000000000aa");
        assert_eq!(sub.event_name(&other), None);
    }
}
