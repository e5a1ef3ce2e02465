//! One fetcher per parameter value.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;

use crate::cell::Outcome;
use crate::config::LoaderConfig;
use crate::context::RequestContext;
use crate::error::ConfigError;
use crate::fetcher::{BatchFetch, Fetcher, FetcherBuilder, SharedBatchFetch};
use crate::identity::IdExtractor;
use crate::stats::FetcherStats;

/// Lazily creates and memoizes one unparameterized [`Fetcher`] per parameter.
///
/// Unlike a parameterized [`Fetcher`], distinct parameters share neither a
/// cache nor a delay window: each parameter's fetcher times its own batches.
/// Cloning is cheap and clones share the fetchers.
pub struct ParamRegistry<K, P, V, E> {
    inner: Arc<RegistryInner<K, P, V, E>>,
}

struct RegistryInner<K, P, V, E> {
    name: String,
    config: LoaderConfig,
    scope: RequestContext,
    extractor: IdExtractor<K, V>,
    fetch: SharedBatchFetch<K, P, V, E>,
    fetchers: DashMap<P, Fetcher<K, (), V, E>>,
}

impl<K, P, V, E> Clone for ParamRegistry<K, P, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> FetcherBuilder<K, V> {
    /// Build a [`ParamRegistry`] whose per-parameter fetchers all use this
    /// builder's name, config, and extractor.
    pub fn build_registry<P, E, F>(
        self,
        scope: RequestContext,
        fetch: F,
    ) -> Result<ParamRegistry<K, P, V, E>, ConfigError>
    where
        F: BatchFetch<K, P, V, Error = E>,
        P: Eq + Hash,
    {
        let (name, config, extractor) = self.into_parts();
        config.validate()?;
        Ok(ParamRegistry {
            inner: Arc::new(RegistryInner {
                name,
                config,
                scope,
                extractor,
                fetch: Arc::new(fetch),
                fetchers: DashMap::new(),
            }),
        })
    }
}

impl<K, P, V, E> ParamRegistry<K, P, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Fetch the value for `id` through the fetcher for `param`, creating it
    /// on first use.
    pub async fn fetch_one_param(&self, ctx: &RequestContext, id: K, param: P) -> Outcome<V, E> {
        let fetcher = self.fetcher(param);
        fetcher.fetch_one(ctx, id).await
    }

    /// Fetch several ids under `param`, outcomes in input order.
    pub async fn fetch_many_param(
        &self,
        ctx: &RequestContext,
        ids: impl IntoIterator<Item = K>,
        param: P,
    ) -> Vec<Outcome<V, E>> {
        let fetcher = self.fetcher(param);
        fetcher.fetch_many(ctx, ids).await
    }

    /// The fetcher for `param`, created at most once per registry.
    pub fn fetcher(&self, param: P) -> Fetcher<K, (), V, E> {
        // The map shard is locked only for the get-or-insert.
        let inner = &self.inner;
        let bound_param = param.clone();
        inner
            .fetchers
            .entry(param)
            .or_insert_with(|| {
                tracing::debug!(loader = %inner.name, "creating per-parameter fetcher");
                let fetch = Arc::clone(&inner.fetch);
                let param = bound_param;
                let bound = move |ctx: RequestContext, _: (), ids: Vec<K>| {
                    let fetch = Arc::clone(&fetch);
                    let param = param.clone();
                    async move { fetch.fetch_many(ctx, param, ids).await }
                };
                Fetcher::from_parts(
                    inner.name.clone(),
                    inner.config.clone(),
                    inner.scope.clone(),
                    Arc::new(bound),
                    inner.extractor.clone(),
                )
            })
            .clone()
    }

    /// Number of parameters seen so far.
    pub fn len(&self) -> usize {
        self.inner.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fetchers.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Counters summed over every per-parameter fetcher.
    pub fn stats(&self) -> FetcherStats {
        self.inner
            .fetchers
            .iter()
            .fold(FetcherStats::default(), |acc, f| acc.merge(&f.stats()))
    }

    /// Drain the dispatch tasks of every per-parameter fetcher.
    pub async fn close(&self) {
        let fetchers: Vec<_> = self.inner.fetchers.iter().map(|f| f.value().clone()).collect();
        join_all(fetchers.iter().map(|f| f.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Member {
        tenant: &'static str,
        id: u32,
    }

    type Calls = Arc<Mutex<Vec<(&'static str, Vec<u32>)>>>;

    fn registry() -> (ParamRegistry<u32, &'static str, Member, String>, Calls) {
        let calls: Calls = Arc::default();
        let seen = Arc::clone(&calls);
        let registry = FetcherBuilder::new(IdExtractor::from_fn(|m: &Member| m.id))
            .name("members")
            .build_registry(
                RequestContext::new(),
                move |_ctx: RequestContext, tenant: &'static str, ids: Vec<u32>| {
                    seen.lock().unwrap().push((tenant, ids.clone()));
                    async move {
                        Ok::<_, String>(ids.into_iter().map(|id| Member { tenant, id }).collect())
                    }
                },
            )
            .unwrap();
        (registry, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_fetcher_per_param() {
        let (registry, calls) = registry();
        let ctx = RequestContext::new();

        let (a, b, c) = tokio::join!(
            registry.fetch_one_param(&ctx, 1, "acme"),
            registry.fetch_one_param(&ctx, 2, "acme"),
            registry.fetch_one_param(&ctx, 1, "globex"),
        );
        assert_eq!(a.unwrap().unwrap().tenant, "acme");
        assert_eq!(b.unwrap().unwrap().id, 2);
        assert_eq!(c.unwrap().unwrap().tenant, "globex");
        assert_eq!(registry.len(), 2);

        let mut calls = calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec![("acme", vec![1, 2]), ("globex", vec![1])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetcher_memoized() {
        let (registry, _calls) = registry();
        let ctx = RequestContext::new();

        registry.fetch_one_param(&ctx, 1, "acme").await.unwrap();
        registry.fetch_one_param(&ctx, 1, "acme").await.unwrap();
        assert_eq!(registry.len(), 1);

        let stats = registry.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.batches, 1);
        registry.close().await;
    }
}
