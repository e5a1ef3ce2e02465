//! One-to-many lookups over the batching fetcher.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::config::LoaderConfig;
use crate::context::RequestContext;
use crate::error::{ConfigError, LoadResult};
use crate::fetcher::{BatchFetch, Fetcher, FetcherBuilder};
use crate::identity::IdExtractor;
use crate::stats::FetcherStats;

/// Every value sharing one identifier, in the order the bulk fetch returned
/// them.
#[derive(Debug, Clone, PartialEq)]
pub struct Group<K, V> {
    pub id: K,
    pub values: Arc<[V]>,
}

/// Group a flat result by identifier. Values without one are dropped.
pub fn group_by<K, V>(extractor: &IdExtractor<K, V>, values: Vec<V>) -> Vec<Group<K, V>>
where
    K: Eq + Hash + Clone,
{
    let mut order: Vec<K> = Vec::new();
    let mut groups: HashMap<K, Vec<V>> = HashMap::new();
    for value in values {
        let Some(id) = extractor.extract(&value) else {
            continue;
        };
        groups
            .entry(id)
            .or_insert_with_key(|id| {
                order.push(id.clone());
                Vec::new()
            })
            .push(value);
    }

    order
        .into_iter()
        .filter_map(|id| {
            let values = groups.remove(&id)?;
            Some(Group {
                id,
                values: values.into(),
            })
        })
        .collect()
}

/// Fetcher for "all values belonging to id X".
///
/// The bulk fetch returns a flat list for the whole batch; it is grouped
/// once per dispatched batch and each caller gets its group. An id with no
/// values yields an empty slice, never an error.
pub struct AggregateFetcher<K, P, V, E> {
    inner: Fetcher<K, P, Group<K, V>, E>,
}

impl<K, P, V, E> Clone for AggregateFetcher<K, P, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> FetcherBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Build an [`AggregateFetcher`]; the builder's extractor maps each
    /// member value to the id it is grouped under.
    pub fn build_aggregate<P, E, F>(
        self,
        scope: RequestContext,
        fetch: F,
    ) -> Result<AggregateFetcher<K, P, V, E>, ConfigError>
    where
        F: BatchFetch<K, P, V, Error = E>,
        P: Send + 'static,
        E: Send + 'static,
    {
        let (name, config, extractor) = self.into_parts();
        config.validate()?;

        let flat = Arc::new(fetch);
        let grouping = extractor;
        let grouped = move |ctx: RequestContext, param: P, ids: Vec<K>| {
            let flat = Arc::clone(&flat);
            let grouping = grouping.clone();
            async move {
                let values = flat.fetch_many(ctx, param, ids).await?;
                Ok::<_, E>(group_by(&grouping, values))
            }
        };

        Ok(AggregateFetcher {
            inner: Fetcher::from_parts(
                name,
                config,
                scope,
                Arc::new(grouped),
                IdExtractor::from_fn(|g: &Group<K, V>| g.id.clone()),
            ),
        })
    }
}

impl<K, P, V, E> AggregateFetcher<K, P, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// All values for `id` under the default parameter.
    pub async fn fetch_aggregate(&self, ctx: &RequestContext, id: K) -> LoadResult<Arc<[V]>, E>
    where
        P: Default,
    {
        self.fetch_aggregate_param(ctx, id, P::default()).await
    }

    /// All values for `id` under `param`.
    pub async fn fetch_aggregate_param(&self, ctx: &RequestContext, id: K, param: P) -> LoadResult<Arc<[V]>, E> {
        let group = self.inner.fetch_one_param(ctx, id, param).await?;
        Ok(match group {
            Some(group) => Arc::clone(&group.values),
            None => Arc::from(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn config(&self) -> &LoaderConfig {
        self.inner.config()
    }

    pub fn stats(&self) -> FetcherStats {
        self.inner.stats()
    }

    /// Drain outstanding dispatch tasks.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct LogEntry {
        alert_id: u32,
        message: &'static str,
    }

    fn entry(alert_id: u32, message: &'static str) -> LogEntry {
        LogEntry { alert_id, message }
    }

    #[test]
    fn test_group_by_keeps_first_seen_order() {
        let ex = IdExtractor::from_fn(|e: &LogEntry| e.alert_id);
        let groups = group_by(
            &ex,
            vec![entry(2, "a"), entry(1, "b"), entry(2, "c")],
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id, 2);
        assert_eq!(&*groups[0].values, &[entry(2, "a"), entry(2, "c")]);
        assert_eq!(groups[1].id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_groups_and_empty() {
        let calls: Arc<Mutex<Vec<Vec<u32>>>> = Arc::default();
        let seen = Arc::clone(&calls);
        let logs = FetcherBuilder::new(IdExtractor::from_fn(|e: &LogEntry| e.alert_id))
            .name("alert_logs")
            .build_aggregate(
                RequestContext::new(),
                move |_ctx: RequestContext, _: (), ids: Vec<u32>| {
                    seen.lock().unwrap().push(ids);
                    async {
                        Ok::<_, String>(vec![entry(1, "created"), entry(1, "escalated"), entry(1, "closed")])
                    }
                },
            )
            .unwrap();
        let ctx = RequestContext::new();

        let (x, y) = tokio::join!(logs.fetch_aggregate(&ctx, 1), logs.fetch_aggregate(&ctx, 2));
        assert_eq!(x.unwrap().len(), 3);
        assert!(y.unwrap().is_empty());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_error_fans_out() {
        let logs = FetcherBuilder::new(IdExtractor::from_fn(|e: &LogEntry| e.alert_id))
            .build_aggregate(
                RequestContext::new(),
                |_ctx: RequestContext, _: (), _ids: Vec<u32>| async {
                    Err::<Vec<LogEntry>, _>("log store down".to_string())
                },
            )
            .unwrap();
        let ctx = RequestContext::new();

        let (x, y) = tokio::join!(logs.fetch_aggregate(&ctx, 1), logs.fetch_aggregate(&ctx, 2));
        let expected = LoadError::Fetch("log store down".to_string());
        assert_eq!(x.unwrap_err(), expected);
        assert_eq!(y.unwrap_err(), expected);
    }
}
