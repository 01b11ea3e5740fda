use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Usage;

/// Token usage accumulator shared by every run of one job invocation.
///
/// Each counter is updated with a single atomic add, so concurrent runs can
/// record usage through a shared `Arc<Stats>` without locking.
#[derive(Debug, Default)]
pub struct Stats {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one provider call's usage.
    pub fn record(&self, usage: Usage) {
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
    }

    /// Current totals.
    pub fn snapshot(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_accumulates() {
        let stats = Stats::new();
        stats.record(Usage::new(10, 5));
        stats.record(Usage::new(1, 2));
        assert_eq!(stats.snapshot(), Usage::new(11, 7));
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let stats = Arc::new(Stats::new());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let stats = stats.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        stats.record(Usage::new(10, 5));
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(stats.snapshot(), Usage::new(10 * 3200, 5 * 3200));
    }
}
