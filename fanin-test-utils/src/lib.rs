//! FANIN Test Utilities
//!
//! Shared test infrastructure for the FANIN workspace:
//! - A recording bulk fetch double with injectable failures and latency
//! - Proptest generators for identifiers and loader configs
//! - Fixtures for common record sets
//! - Assertions over recorded bulk calls

pub use fanin_core::{
    BatchFetch, FetcherBuilder, IdExtractor, Identify, LoaderConfig, RequestContext,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// RECORDS
// ============================================================================

/// Minimal entity keyed by an integer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub name: String,
}

impl Record {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("record-{id}"),
        }
    }
}

impl Identify<u64> for Record {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Error returned by [`RecordingFetch`] when a failure is injected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("injected failure: {0}")]
pub struct InjectedError(pub String);

// ============================================================================
// MOCK BULK FETCH
// ============================================================================

/// One observed bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    /// `Debug` rendering of the parameter.
    pub param: String,
    pub ids: Vec<u64>,
}

#[derive(Debug, Default)]
struct RecordingState {
    calls: Vec<FetchCall>,
    failure: Option<String>,
}

/// In-memory bulk fetch over a fixed record set that records every call.
///
/// Parameter-agnostic: the same records answer every parameter.
#[derive(Debug, Clone, Default)]
pub struct RecordingFetch {
    records: Arc<BTreeMap<u64, Record>>,
    latency: Duration,
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingFetch {
    /// Serve `records`; ids not among them are simply not returned.
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: Arc::new(records.into_iter().map(|r| (r.id, r)).collect()),
            latency: Duration::ZERO,
            state: Arc::default(),
        }
    }

    /// Serve a generated record for each id in `ids`.
    pub fn with_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self::new(ids.into_iter().map(Record::new))
    }

    /// Sleep this long inside every bulk call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every subsequent call with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        self.lock().failure = Some(message.into());
    }

    /// Stop failing.
    pub fn recover(&self) {
        self.lock().failure = None;
    }

    /// Every bulk call observed so far, in call order.
    pub fn calls(&self) -> Vec<FetchCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<P> BatchFetch<u64, P, Record> for RecordingFetch
where
    P: Debug + Send + 'static,
{
    type Error = InjectedError;

    async fn fetch_many(
        &self,
        _ctx: RequestContext,
        param: P,
        ids: Vec<u64>,
    ) -> Result<Vec<Record>, InjectedError> {
        let failure = {
            let mut state = self.lock();
            state.calls.push(FetchCall {
                param: format!("{param:?}"),
                ids: ids.clone(),
            });
            state.failure.clone()
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(message) = failure {
            return Err(InjectedError(message));
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for loader inputs.

    use super::*;
    use proptest::prelude::*;

    /// Ids from a small range so repeats are common.
    pub fn arb_id() -> impl Strategy<Value = u64> {
        0u64..64
    }

    /// A request's worth of lookups, duplicates included.
    pub fn arb_lookups() -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(arb_id(), 1..80)
    }

    /// Loader configs with small batch limits, to force early dispatch.
    pub fn arb_loader_config() -> impl Strategy<Value = LoaderConfig> {
        (1usize..=16, 1u64..=10).prop_map(|(max_batch, delay_ms)| {
            LoaderConfig::new()
                .with_max_batch(max_batch)
                .with_delay(Duration::from_millis(delay_ms))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built record sets.

    use super::*;

    /// Records 1 through `n`.
    pub fn records(n: u64) -> Vec<Record> {
        (1..=n).map(Record::new).collect()
    }

    /// Records for the odd ids in 1 through `n`.
    pub fn odd_records(n: u64) -> Vec<Record> {
        (1..=n).filter(|id| id % 2 == 1).map(Record::new).collect()
    }

    /// Extractor reading [`Record::id`].
    pub fn record_extractor() -> IdExtractor<u64, Record> {
        IdExtractor::identify()
    }

    /// Builder for a record loader with a short delay window.
    pub fn record_builder(max_batch: usize) -> FetcherBuilder<u64, Record> {
        FetcherBuilder::new(record_extractor())
            .name("records")
            .max_batch(max_batch)
            .delay(Duration::from_millis(5))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Checks over recorded bulk calls.

    use super::*;
    use std::collections::BTreeSet;

    /// Every id in `expected` was sent exactly once across `calls`, and no
    /// other id was sent.
    pub fn assert_each_id_fetched_once(calls: &[FetchCall], expected: impl IntoIterator<Item = u64>) {
        let mut sent: Vec<u64> = calls.iter().flat_map(|c| c.ids.iter().copied()).collect();
        sent.sort_unstable();
        let expected: Vec<u64> = expected.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        assert_eq!(sent, expected, "ids sent across bulk calls");
    }

    /// No bulk call carried more than `max_batch` ids.
    pub fn assert_batches_within(calls: &[FetchCall], max_batch: usize) {
        for call in calls {
            assert!(
                call.ids.len() <= max_batch,
                "bulk call with {} ids exceeds max batch {}",
                call.ids.len(),
                max_batch
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_fetch_serves_known_and_records() {
        let fetch = RecordingFetch::new(fixtures::odd_records(5));

        let got = fetch
            .fetch_many(RequestContext::new(), (), vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(got, vec![Record::new(1), Record::new(3)]);
        assert_eq!(
            fetch.calls(),
            vec![FetchCall {
                param: "()".to_string(),
                ids: vec![1, 2, 3]
            }]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_and_recovery() {
        let fetch = RecordingFetch::with_ids([1]);
        fetch.fail_with("down");

        let err = BatchFetch::<u64, (), Record>::fetch_many(&fetch, RequestContext::new(), (), vec![1])
            .await
            .unwrap_err();
        assert_eq!(err, InjectedError("down".to_string()));

        fetch.recover();
        let ok = BatchFetch::<u64, (), Record>::fetch_many(&fetch, RequestContext::new(), (), vec![1])
            .await
            .unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(fetch.call_count(), 2);
    }
}
