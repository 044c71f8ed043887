use std::sync::atomic::{AtomicU64, Ordering};

/// Cheap per-process request identifiers: a random seed mixed with a counter.
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub(crate) fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.seed ^ u128::from(request_seq))
    }

    /// Next completion id, `chatcmpl-<32 hex digits>`.
    #[must_use]
    pub(crate) fn next_completion_id(&self) -> String {
        let uuid = self.request_uuid(self.next_seq());
        format!("chatcmpl-{}", uuid.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_ids_are_unique_and_prefixed() {
        let ids = RequestIdGenerator::new();
        let first = ids.next_completion_id();
        let second = ids.next_completion_id();
        assert!(first.starts_with("chatcmpl-"));
        assert_eq!(first.len(), "chatcmpl-".len() + 32);
        assert_ne!(first, second);
    }
}
