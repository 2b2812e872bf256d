use crate::model::NodeId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sequential node id generator for one store
///
/// Ids have the form `{seed}-{n}`. The counter only moves forward, so an id is
/// never handed out twice even after its node is deleted and purged.
#[derive(Debug)]
pub struct IdGenerator {
    seed: String,
    count: AtomicU64,
}

impl IdGenerator {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            count: AtomicU64::new(0),
        }
    }

    /// Generator with a random 8-hex-digit seed
    pub fn random() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self::new(&uuid[..8])
    }

    /// Generate next sequential ID
    pub fn new_id(&self) -> NodeId {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        NodeId::new(format!("{}-{}", self.seed, n))
    }

    /// Advance past an id that already exists (e.g. loaded from a snapshot)
    pub fn observe(&self, id: &NodeId) {
        let Some(rest) = id
            .as_str()
            .strip_prefix(self.seed.as_str())
            .and_then(|r| r.strip_prefix('-'))
        else {
            return;
        };
        if let Ok(n) = rest.parse::<u64>() {
            self.count.fetch_max(n, Ordering::Relaxed);
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let gen = IdGenerator::new("doc");

        let id1 = gen.new_id();
        let id2 = gen.new_id();
        let id3 = gen.new_id();

        assert_eq!(id1.as_str(), "doc-1");
        assert_eq!(id2.as_str(), "doc-2");
        assert_eq!(id3.as_str(), "doc-3");
    }

    #[test]
    fn test_observe_skips_existing_ids() {
        let gen = IdGenerator::new("doc");
        gen.observe(&NodeId::from("doc-41"));
        gen.observe(&NodeId::from("other-900"));
        gen.observe(&NodeId::from("doc-7"));

        assert_eq!(gen.new_id().as_str(), "doc-42");
    }

    #[test]
    fn test_random_seeds_differ() {
        let a = IdGenerator::random();
        let b = IdGenerator::random();
        assert_eq!(a.seed().len(), 8);
        assert_ne!(a.seed(), b.seed());
    }
}
