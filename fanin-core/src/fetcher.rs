//! Batched, request-scoped point lookups.
//!
//! A [`Fetcher`] collects lookups issued within a short delay window,
//! merges them into one bulk call per parameter, and fans the outcome back
//! out to every waiting caller. Each (identifier, parameter) pair is
//! fetched at most once per fetcher; repeated lookups share the first
//! outcome, including "absent" and errors.
//!
//! # Example
//!
//! ```ignore
//! let users = Fetcher::from_store(
//!     scope.clone(),
//!     IdExtractor::from_fn(|u: &User| u.id),
//!     move |ctx, ids| store.find_many_users(ctx, ids),
//! );
//!
//! // Issued concurrently from different resolvers; one bulk call results.
//! let (a, b) = tokio::join!(users.fetch_one(&ctx, 1), users.fetch_one(&ctx, 2));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use crate::batch::Batch;
use crate::cell::{Outcome, ResultCell};
use crate::config::LoaderConfig;
use crate::context::RequestContext;
use crate::error::{ConfigError, LoadError};
use crate::identity::IdExtractor;
use crate::stats::{FetcherStats, StatsCounters};

/// Bulk backend call behind a [`Fetcher`].
///
/// Receives every identifier of one dispatched batch and may return values
/// in any order, for any subset of them. Values for identifiers that were
/// not asked for are ignored.
///
/// Any `Fn(RequestContext, P, Vec<K>) -> impl Future<Output = Result<Vec<V>, E>>`
/// implements this trait.
#[async_trait]
pub trait BatchFetch<K, P, V>: Send + Sync + 'static {
    /// Error returned to every caller of a failed batch.
    type Error;

    /// Fetch the values for `ids` under `param`.
    async fn fetch_many(
        &self,
        ctx: RequestContext,
        param: P,
        ids: Vec<K>,
    ) -> Result<Vec<V>, Self::Error>;
}

#[async_trait]
impl<K, P, V, E, F, Fut> BatchFetch<K, P, V> for F
where
    F: Fn(RequestContext, P, Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
    K: Send + 'static,
    P: Send + 'static,
    V: Send + 'static,
    E: Send + 'static,
{
    type Error = E;

    async fn fetch_many(&self, ctx: RequestContext, param: P, ids: Vec<K>) -> Result<Vec<V>, E> {
        (self)(ctx, param, ids).await
    }
}

pub(crate) type SharedBatchFetch<K, P, V, E> = Arc<dyn BatchFetch<K, P, V, Error = E>>;

/// Cache key: one cell per (identifier, parameter) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey<K, P> {
    id: K,
    param: P,
}

struct State<K, P, V, E> {
    cache: HashMap<CacheKey<K, P>, Arc<ResultCell<V, E>>>,
    /// Batch currently accepting identifiers, per parameter.
    open: HashMap<P, Batch<K>>,
    /// Full batches detached early, waiting for their task to pick them up.
    sealed: HashMap<u64, Batch<K>>,
    next_seq: u64,
}

impl<K, P, V, E> Default for State<K, P, V, E> {
    fn default() -> Self {
        Self {
            cache: HashMap::new(),
            open: HashMap::new(),
            sealed: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K, P, V, E> State<K, P, V, E>
where
    K: Eq + Hash + Clone,
    P: Eq + Hash + Clone,
{
    fn cell(&self, id: &K, param: &P) -> Option<&Arc<ResultCell<V, E>>> {
        self.cache.get(&CacheKey {
            id: id.clone(),
            param: param.clone(),
        })
    }
}

struct Inner<K, P, V, E> {
    name: String,
    config: LoaderConfig,
    scope: RequestContext,
    fetch: SharedBatchFetch<K, P, V, E>,
    extractor: IdExtractor<K, V>,
    state: Mutex<State<K, P, V, E>>,
    tasks: TaskTracker,
    stats: StatsCounters,
}

/// Request-scoped batching loader for one entity type.
///
/// Cloning is cheap and clones share the cache and pending batches.
///
/// # Type Parameters
///
/// - `K`: identifier requested by callers
/// - `P`: parameter partitioning cache and batches (`()` when unused)
/// - `V`: fetched value
/// - `E`: bulk fetch error, cloned to every caller of a failed batch
pub struct Fetcher<K, P, V, E> {
    inner: Arc<Inner<K, P, V, E>>,
}

impl<K, P, V, E> Clone for Fetcher<K, P, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`Fetcher`].
pub struct FetcherBuilder<K, V> {
    name: String,
    config: LoaderConfig,
    extractor: IdExtractor<K, V>,
}

impl<K, V> FetcherBuilder<K, V> {
    /// Start a builder routing results through `extractor`.
    pub fn new(extractor: IdExtractor<K, V>) -> Self {
        Self {
            name: "fetcher".to_string(),
            config: LoaderConfig::default(),
            extractor,
        }
    }

    /// Name used in traces and metrics.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the whole batching config.
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum batch size.
    pub fn max_batch(mut self, max_batch: usize) -> Self {
        self.config.max_batch = max_batch;
        self
    }

    /// Set the delay window.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Build a fetcher bound to the request `scope`.
    ///
    /// `scope` bounds the dispatch tasks and is handed to every bulk fetch;
    /// individual callers pass their own context to each lookup.
    pub fn build<P, E, F>(self, scope: RequestContext, fetch: F) -> Result<Fetcher<K, P, V, E>, ConfigError>
    where
        F: BatchFetch<K, P, V, Error = E>,
    {
        self.config.validate()?;
        Ok(Fetcher::from_parts(self.name, self.config, scope, Arc::new(fetch), self.extractor))
    }

    pub(crate) fn into_parts(self) -> (String, LoaderConfig, IdExtractor<K, V>) {
        (self.name, self.config, self.extractor)
    }
}

impl<K, P, V, E> Fetcher<K, P, V, E> {
    pub(crate) fn from_parts(
        name: String,
        config: LoaderConfig,
        scope: RequestContext,
        fetch: SharedBatchFetch<K, P, V, E>,
        extractor: IdExtractor<K, V>,
    ) -> Self {
        Fetcher {
            inner: Arc::new(Inner {
                name,
                config,
                scope,
                fetch,
                extractor,
                state: Mutex::new(State::default()),
                tasks: TaskTracker::new(),
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Name used in traces and metrics.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Batching configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// The request scope this fetcher is bound to.
    pub fn scope(&self) -> &RequestContext {
        &self.inner.scope
    }

    /// Snapshot of this fetcher's counters.
    pub fn stats(&self) -> FetcherStats {
        self.inner.stats.snapshot()
    }

    /// Wait for every dispatch task started so far to finish.
    ///
    /// Call at the end of the request so no dispatch outlives it.
    pub async fn close(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }
}

impl<K, V, E> Fetcher<K, (), V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Unparameterized fetcher over a `(ctx, ids)` store function, with the
    /// default batching config.
    pub fn from_store<F, Fut>(scope: RequestContext, extractor: IdExtractor<K, V>, fetch_many: F) -> Self
    where
        F: Fn(RequestContext, Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
    {
        let fetch = move |ctx: RequestContext, _: (), ids: Vec<K>| fetch_many(ctx, ids);
        Fetcher::from_parts(
            std::any::type_name::<V>().to_string(),
            LoaderConfig::default(),
            scope,
            Arc::new(fetch),
            extractor,
        )
    }
}

impl<K, P, V, E> Fetcher<K, P, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Fetch the value for `id` under the default parameter.
    ///
    /// `Ok(None)` means the bulk fetch ran and returned nothing for `id`.
    pub async fn fetch_one(&self, ctx: &RequestContext, id: K) -> Outcome<V, E>
    where
        P: Default,
    {
        self.fetch_one_param(ctx, id, P::default()).await
    }

    /// Fetch the value for `id` under `param`.
    ///
    /// Lookups under different parameters never share a bulk call. If `ctx`
    /// ends first the caller gets the context error; the batch carries on
    /// for everyone else.
    pub async fn fetch_one_param(&self, ctx: &RequestContext, id: K, param: P) -> Outcome<V, E> {
        let cell = self.inner.cell_for(id, param);
        cell.wait(ctx).await
    }

    /// Fetch several identifiers under one parameter, outcomes in input order.
    pub async fn fetch_many_param(
        &self,
        ctx: &RequestContext,
        ids: impl IntoIterator<Item = K>,
        param: P,
    ) -> Vec<Outcome<V, E>> {
        let cells: Vec<_> = ids
            .into_iter()
            .map(|id| self.inner.cell_for(id, param.clone()))
            .collect();
        join_all(cells.iter().map(|cell| cell.wait(ctx))).await
    }

    /// [`Fetcher::fetch_many_param`] under the default parameter.
    pub async fn fetch_many(&self, ctx: &RequestContext, ids: impl IntoIterator<Item = K>) -> Vec<Outcome<V, E>>
    where
        P: Default,
    {
        self.fetch_many_param(ctx, ids, P::default()).await
    }

    /// Number of (identifier, parameter) pairs with a cell.
    pub fn cached_len(&self) -> usize {
        self.inner.lock_state().cache.len()
    }
}

impl<K, P, V, E> Inner<K, P, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, State<K, P, V, E>> {
        // Every critical section leaves the maps consistent, so a panic
        // elsewhere while holding the lock does not invalidate them.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cell for (id, param), registering a miss into a batch.
    fn cell_for(self: &Arc<Self>, id: K, param: P) -> Arc<ResultCell<V, E>> {
        let mut state = self.lock_state();
        let key = CacheKey { id, param };
        if let Some(cell) = state.cache.get(&key) {
            self.stats.record_request(true);
            return Arc::clone(cell);
        }
        self.stats.record_request(false);

        let cell = Arc::new(ResultCell::new());
        state.cache.insert(key.clone(), Arc::clone(&cell));
        self.enqueue(&mut state, key.id, key.param);
        cell
    }

    fn enqueue(self: &Arc<Self>, state: &mut State<K, P, V, E>, id: K, param: P) {
        let max = self.config.max_batch;
        let full = if let Some(batch) = state.open.get_mut(&param) {
            batch.push(id);
            batch.is_full(max)
        } else {
            let seq = state.next_seq;
            state.next_seq += 1;

            let batch = Batch::open(seq, id);
            let trigger = batch.trigger();
            let deadline = Instant::now() + self.config.delay;
            let full = batch.is_full(max);
            state.open.insert(param.clone(), batch);
            tracing::debug!(loader = %self.name, seq, "opened batch");

            let inner = Arc::clone(self);
            let task_param = param.clone();
            self.tasks
                .spawn(async move { inner.run_batch(task_param, seq, deadline, trigger).await });
            full
        };

        if full {
            Self::seal(&self.name, state, &param);
        }
    }

    /// Detach a full batch so new misses open a fresh one, and wake its task.
    fn seal(name: &str, state: &mut State<K, P, V, E>, param: &P) {
        if let Some(batch) = state.open.remove(param) {
            tracing::debug!(loader = %name, seq = batch.seq(), size = batch.len(), "batch full");
            batch.trigger().notify_one();
            state.sealed.insert(batch.seq(), batch);
        }
    }

    /// Wait until the window that opened with the batch closes, the batch
    /// fills, or the scope ends, then dispatch it.
    async fn run_batch(self: Arc<Self>, param: P, seq: u64, deadline: Instant, trigger: Arc<Notify>) {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = trigger.notified() => {}
            _ = self.scope.done() => {}
        }

        let Some(batch) = self.detach(&param, seq) else {
            return;
        };
        self.dispatch(param, batch).await;
    }

    fn detach(&self, param: &P, seq: u64) -> Option<Batch<K>> {
        let mut state = self.lock_state();
        if state.open.get(param).is_some_and(|b| b.seq() == seq) {
            return state.open.remove(param);
        }
        state.sealed.remove(&seq)
    }

    async fn dispatch(&self, param: P, batch: Batch<K>) {
        let ids = batch.ids().to_vec();
        self.stats.record_dispatch(ids.len());
        tracing::debug!(
            loader = %self.name,
            seq = batch.seq(),
            size = ids.len(),
            request_id = %self.scope.request_id(),
            "dispatching batch"
        );

        let fetched = AssertUnwindSafe(self.fetch.fetch_many(self.scope.clone(), param.clone(), ids))
            .catch_unwind()
            .await;

        let Ok(fetched) = fetched else {
            tracing::warn!(loader = %self.name, seq = batch.seq(), "bulk fetch panicked");
            self.abandon(&param, &batch);
            return;
        };

        // The extractor is caller code and may panic too.
        let distributed = panic::catch_unwind(AssertUnwindSafe(|| self.distribute(&param, &batch, fetched)));
        if distributed.is_err() {
            tracing::warn!(loader = %self.name, seq = batch.seq(), "id extractor panicked");
            self.abandon(&param, &batch);
        }
    }

    fn distribute(&self, param: &P, batch: &Batch<K>, fetched: Result<Vec<V>, E>) {
        let state = self.lock_state();

        match fetched {
            Ok(values) => {
                for value in values {
                    let Some(id) = self.extractor.extract(&value) else {
                        continue;
                    };
                    if !batch.contains(&id) {
                        continue;
                    }
                    if let Some(cell) = state.cell(&id, param) {
                        cell.resolve_value(Arc::new(value));
                    }
                }
                for id in batch.ids() {
                    if let Some(cell) = state.cell(id, param) {
                        cell.resolve_absent();
                    }
                }
            }
            Err(err) => {
                self.stats.record_fetch_error();
                for id in batch.ids() {
                    if let Some(cell) = state.cell(id, param) {
                        cell.resolve_err(LoadError::Fetch(err.clone()));
                    }
                }
            }
        }
    }

    /// Resolve every still-pending cell of `batch` as abandoned.
    fn abandon(&self, param: &P, batch: &Batch<K>) {
        let state = self.lock_state();
        for id in batch.ids() {
            if let Some(cell) = state.cell(id, param) {
                cell.resolve_err(LoadError::Abandoned);
            }
        }
    }
}
