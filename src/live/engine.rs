//! # Live Query Engine
//!
//! Turns a query into a stream of snapshots.
//!
//! ## Lifecycle
//!
//! `Opening → Snapshotting → Tailing → Completed`
//!
//! 1. **Opening**: translate the filter, build the feed filter and open the
//!    change feed. The feed is opened before the snapshot so no mutation
//!    between the two is lost; events queue in the feed handle meanwhile.
//! 2. **Snapshotting**: run the sorted, paged query, count all matches,
//!    seed the window and emit the first value. Any failure up to here is
//!    returned to the caller and the feed is released.
//! 3. **Tailing**: one task per subscription applies events in feed order.
//!    A failing event is logged and skipped; a failing feed read ends the
//!    subscription.
//! 4. **Completed**: reached exactly once, whatever ended the loop. Cleanup
//!    cancels the subscription token, closes the feed and completes the
//!    output channel. The output channel never carries an error.

use std::future::pending;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::change_filter::ChangeFilterBuilder;
use super::channel::{CompletionReason, ReplaySubject, Snapshots};
use super::config::LiveQueryConfig;
use super::document::{from_store, Document, DocumentId};
use super::errors::{LiveError, LiveResult};
use super::event::{ChangeEvent, OperationType};
use super::filter::{self, Filter, NativeFilter};
use super::query::{Paging, QueryContext, Sorting};
use super::store::{ChangeFeed, DocumentStore};
use super::window::ResultWindow;
use crate::observability::{Event, LiveMetrics};

/// One emitted value of a multi-document live query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    /// Documents currently in the window
    pub items: Vec<T>,
    /// Matching documents in the store, ignoring paging
    pub total_items: u64,
}

/// Maps the subscription state to the value pushed downstream
type Project<T, V> = fn(&ResultWindow<T>, &QueryContext) -> V;

fn project_snapshot<T: Document>(window: &ResultWindow<T>, context: &QueryContext) -> Snapshot<T> {
    Snapshot {
        items: window.documents(),
        total_items: context.total_items(),
    }
}

fn project_single<T: Document>(window: &ResultWindow<T>, _: &QueryContext) -> Option<T> {
    window.first().cloned()
}

/// Consumer handle on a running live query
///
/// Dropping the handle unsubscribes.
pub struct LiveQuery<V: Clone> {
    id: Uuid,
    subject: ReplaySubject<V>,
}

impl<V: Clone> LiveQuery<V> {
    /// Subscription identifier, as used in log fields
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Attach a subscriber; it first receives the latest snapshot
    pub fn subscribe(&self) -> Snapshots<V> {
        self.subject.subscribe()
    }

    /// Latest emitted snapshot
    pub fn latest(&self) -> Option<V> {
        self.subject.latest()
    }

    /// Stop the live query; true if this call stopped it
    pub fn unsubscribe(&self) -> bool {
        self.subject.complete(CompletionReason::Unsubscribed)
    }

    pub fn is_completed(&self) -> bool {
        self.subject.is_completed()
    }

    /// Why the live query stopped, once it has
    pub fn completion(&self) -> Option<CompletionReason> {
        self.subject.completion()
    }

    /// Wait for the live query to complete
    pub async fn completed(&self) -> CompletionReason {
        let mut rest = self.subject.subscribe();
        while rest.recv().await.is_some() {}
        self.subject.completion().unwrap_or(CompletionReason::Cancelled)
    }
}

impl<V: Clone> Drop for LiveQuery<V> {
    fn drop(&mut self) {
        self.subject.complete(CompletionReason::Unsubscribed);
    }
}

/// Live query engine over a shared document store
#[derive(Clone)]
pub struct LiveQueryEngine {
    store: Arc<dyn DocumentStore>,
    config: LiveQueryConfig,
    metrics: Arc<LiveMetrics>,
    shutdown: CancellationToken,
    change_filters: ChangeFilterBuilder,
}

impl LiveQueryEngine {
    /// Create an engine with its own metrics registry
    pub fn new(store: Arc<dyn DocumentStore>, config: LiveQueryConfig) -> Self {
        Self::with_metrics(store, config, Arc::new(LiveMetrics::new()))
    }

    /// Create an engine reporting into a shared metrics registry
    pub fn with_metrics(store: Arc<dyn DocumentStore>, config: LiveQueryConfig, metrics: Arc<LiveMetrics>) -> Self {
        Self {
            store,
            config,
            metrics,
            shutdown: CancellationToken::new(),
            change_filters: ChangeFilterBuilder::new(),
        }
    }

    pub fn config(&self) -> &LiveQueryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    /// Subscriptions currently running
    pub fn active_subscriptions(&self) -> u64 {
        self.metrics.active_subscriptions()
    }

    /// Cancel every running subscription and refuse new ones
    pub fn shutdown(&self) {
        debug!(event = %Event::ShutdownStart, collection = %self.config.collection, "shutting down live queries");
        self.shutdown.cancel();
    }

    /// Observe the documents matching `filter`, sorted and paged
    pub async fn observe<T: Document>(
        &self,
        filter: &Filter,
        sorting: Option<Sorting>,
        paging: Option<Paging>,
    ) -> LiveResult<LiveQuery<Snapshot<T>>> {
        let capacity = paging.map(|p| p.size);
        let context = QueryContext::new(sorting, paging);
        self.open(filter, context, capacity, project_snapshot::<T>).await
    }

    /// Observe the first document matching `filter`, or its absence
    pub async fn observe_single<T: Document>(&self, filter: &Filter) -> LiveResult<LiveQuery<Option<T>>> {
        self.open(filter, QueryContext::unbounded(), Some(1), project_single::<T>)
            .await
    }

    /// Observe one document by identity
    pub async fn observe_by_id<T: Document, I: Serialize + ?Sized>(
        &self,
        id: &I,
    ) -> LiveResult<LiveQuery<Option<T>>> {
        let id = DocumentId::from_concept(id)?;
        let filter = Filter::eq(self.config.id_field.clone(), id.as_value().clone());
        self.observe_single(&filter).await
    }

    async fn open<T, V>(
        &self,
        filter: &Filter,
        context: QueryContext,
        capacity: Option<usize>,
        project: Project<T, V>,
    ) -> LiveResult<LiveQuery<V>>
    where
        T: Document,
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        let subscription_id = Uuid::new_v4();
        let collection = self.config.collection.clone();

        let opened = self.open_feed(filter).await;
        let (native, feed) = match opened {
            Ok(opened) => opened,
            Err(e) => return Err(self.setup_failed(subscription_id, e)),
        };

        let cancellation = self.shutdown.child_token();
        let window = ResultWindow::new(capacity, context.sorting().cloned())
            .with_id_field(self.config.id_field.clone());
        let mut subscription = LiveSubscription {
            id: subscription_id,
            collection,
            store: Arc::clone(&self.store),
            filter: native,
            context,
            window,
            project,
            subject: ReplaySubject::linked(cancellation.clone()),
            metrics: Arc::clone(&self.metrics),
        };

        match subscription.load().await {
            Ok((documents, total)) => {
                subscription.window.initialize(documents);
                subscription.context.set_total_items(total);
            }
            Err(e) => {
                feed.close();
                return Err(self.setup_failed(subscription_id, e));
            }
        }

        trace!(
            event = %Event::SnapshotTaken,
            subscription_id = %subscription_id,
            items = subscription.window.len(),
            total_items = subscription.context.total_items()
        );
        subscription.emit();
        self.metrics.increment_subscriptions_opened();
        trace!(event = %Event::Subscribed, subscription_id = %subscription_id, collection = %subscription.collection);

        let live_query = LiveQuery {
            id: subscription_id,
            subject: subscription.subject.clone(),
        };
        let teardown = Teardown {
            subscription_id,
            cancellation,
            feed: Some(feed),
            subject: subscription.subject.clone(),
            metrics: Arc::clone(&self.metrics),
            cleaned_up: false,
        };
        let reconcile = self.config.reconcile_interval();
        tokio::spawn(subscription.run(teardown, reconcile));

        Ok(live_query)
    }

    async fn open_feed(&self, filter: &Filter) -> LiveResult<(NativeFilter, Box<dyn ChangeFeed>)> {
        if self.shutdown.is_cancelled() {
            return Err(LiveError::Cancelled);
        }
        let native = filter::translate(filter)?;
        let feed_filter = self.change_filters.build_native(&native)?;
        let feed = self.store.watch(&feed_filter).await?;
        Ok((native, feed))
    }

    fn setup_failed(&self, subscription_id: Uuid, error: LiveError) -> LiveError {
        self.metrics.increment_setup_failures();
        warn!(
            event = %Event::SetupFailed,
            subscription_id = %subscription_id,
            code = error.code(),
            error = %error,
            "live query setup failed"
        );
        error
    }
}

/// State owned by one subscription's task
struct LiveSubscription<T, V: Clone> {
    id: Uuid,
    collection: String,
    store: Arc<dyn DocumentStore>,
    filter: NativeFilter,
    context: QueryContext,
    window: ResultWindow<T>,
    project: Project<T, V>,
    subject: ReplaySubject<V>,
    metrics: Arc<LiveMetrics>,
}

impl<T, V> LiveSubscription<T, V>
where
    T: Document,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn run(mut self, mut teardown: Teardown<V>, reconcile: Option<std::time::Duration>) {
        let mut reconcile = reconcile.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let reason = self.tail(&mut teardown, &mut reconcile).await;
        teardown.run(reason);
    }

    async fn tail(&mut self, teardown: &mut Teardown<V>, reconcile: &mut Option<Interval>) -> CompletionReason {
        let cancellation = teardown.cancellation.clone();
        loop {
            let Some(feed) = teardown.feed.as_mut() else {
                return CompletionReason::FeedEnded;
            };

            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    let event = if self.subject.is_completed() { Event::Unsubscribed } else { Event::Cancelled };
                    trace!(event = %event, subscription_id = %self.id);
                    return CompletionReason::Cancelled;
                }
                _ = tick(reconcile) => {
                    self.reconcile().await;
                }
                next = feed.next() => match next {
                    Some(Ok(event)) => self.apply(event).await,
                    None => {
                        trace!(event = %Event::CursorCompleted, subscription_id = %self.id);
                        return CompletionReason::FeedEnded;
                    }
                    Some(Err(e)) if e.is_expected_shutdown() => {
                        trace!(event = %Event::CursorCompleted, subscription_id = %self.id, error = %e);
                        return CompletionReason::Cancelled;
                    }
                    Some(Err(e)) => {
                        self.metrics.increment_feed_failures();
                        warn!(
                            event = %Event::FeedFailed,
                            subscription_id = %self.id,
                            collection = %self.collection,
                            code = e.code(),
                            error = %e,
                            "change feed read failed"
                        );
                        return CompletionReason::Failed(e.to_string());
                    }
                },
            }
        }
    }

    /// Apply one event; failures are logged and the loop goes on
    async fn apply(&mut self, event: ChangeEvent) {
        let operation = event.operation_type;
        let document_id = event.document_id.clone();

        match self.handle(event).await {
            Ok(true) => {
                self.metrics.increment_events_applied();
                trace!(event = %Event::EventApplied, subscription_id = %self.id, operation = %operation, id = %document_id);
                self.emit();
            }
            Ok(false) => {
                self.metrics.increment_events_ignored();
                trace!(event = %Event::EventIgnored, subscription_id = %self.id, operation = %operation, id = %document_id);
            }
            Err(e) => {
                self.metrics.increment_events_failed();
                warn!(
                    event = %Event::EventFailed,
                    subscription_id = %self.id,
                    operation = %operation,
                    id = %document_id,
                    code = e.code(),
                    error = %e,
                    "failed to apply change event"
                );
            }
        }
    }

    /// Mutate window and context for one event; true if either changed
    async fn handle(&mut self, event: ChangeEvent) -> LiveResult<bool> {
        match self.context.paging() {
            Some(paging) => self.handle_paged(event, paging).await,
            None => self.handle_unpaged(event),
        }
    }

    /// An unpaged window holds every match, so membership decides the total
    ///
    /// Single-document windows also land here; their total is not projected.
    fn handle_unpaged(&mut self, event: ChangeEvent) -> LiveResult<bool> {
        match event.operation_type {
            OperationType::Delete => {
                let removed = self.window.remove(&event.document_id);
                if removed {
                    self.context.decrement_total();
                }
                Ok(removed)
            }
            OperationType::Insert => {
                let document = self.document(event)?;
                // a redelivered insert must not be counted twice
                let counted = !self.window.contains(&self.window.id_of(&document));
                if counted {
                    self.context.increment_total();
                }
                Ok(self.window.upsert(document) || counted)
            }
            OperationType::Update | OperationType::Replace => {
                let document = self.document(event)?;
                Ok(self.window.upsert(document))
            }
        }
    }

    /// A page holds part of the matches: the total is re-read from the store
    /// and a change before the page start re-runs the page query
    async fn handle_paged(&mut self, event: ChangeEvent, paging: Paging) -> LiveResult<bool> {
        match event.operation_type {
            OperationType::Delete => {
                let removed = self.remove_and_backfill(&event.document_id, paging).await;
                if !removed && paging.skip > 0 {
                    // the deleted document may have preceded the page
                    return self.shift_page().await;
                }
                let estimate: fn(&mut QueryContext) = if removed {
                    QueryContext::decrement_total
                } else {
                    |_| {}
                };
                Ok(self.recount(estimate).await || removed)
            }
            OperationType::Insert => {
                let document = self.document(event)?;
                if paging.skip > 0 && self.window.precedes(&document) {
                    return self.shift_page().await;
                }
                let held = self.window.contains(&self.window.id_of(&document));
                let changed = self.window.upsert(document);
                let estimate: fn(&mut QueryContext) = if held {
                    |_| {}
                } else {
                    QueryContext::increment_total
                };
                Ok(self.recount(estimate).await || changed)
            }
            OperationType::Update | OperationType::Replace => {
                let document = self.document(event)?;
                Ok(self.window.upsert(document))
            }
        }
    }

    async fn remove_and_backfill(&mut self, id: &DocumentId, paging: Paging) -> bool {
        let subscription_id = self.id;
        let store: &dyn DocumentStore = self.store.as_ref();
        let filter = &self.filter;
        let sorting = self.context.sorting();
        let metrics: &LiveMetrics = &self.metrics;
        self.window
            .remove_and_backfill(id, move |held| {
                let skip = paging.skip.saturating_add(held);
                metrics.increment_backfills();
                trace!(event = %Event::Backfilled, subscription_id = %subscription_id, skip);
                fetch_next::<T>(store, filter, sorting, skip)
            })
            .await
    }

    async fn shift_page(&mut self) -> LiveResult<bool> {
        let changed = self.refresh().await?;
        trace!(event = %Event::PageShifted, subscription_id = %self.id, changed);
        Ok(changed)
    }

    /// Re-read the total from the store; true if it moved
    ///
    /// When the count fails, `estimate` adjusts the held total instead.
    async fn recount(&mut self, estimate: fn(&mut QueryContext)) -> bool {
        let before = self.context.total_items();
        match self.store.count(&self.filter).await {
            Ok(total) => self.context.set_total_items(total),
            Err(e) => {
                estimate(&mut self.context);
                warn!(
                    event = %Event::RecountFailed,
                    subscription_id = %self.id,
                    code = e.code(),
                    error = %e,
                    "total recount failed"
                );
            }
        }
        self.context.total_items() != before
    }

    fn document(&self, event: ChangeEvent) -> LiveResult<T> {
        let body = event.full_document.ok_or_else(|| {
            LiveError::MalformedEvent(format!("{} event without fullDocument", event.operation_type))
        })?;
        let document: T = from_store(body)?;
        let id = self.window.id_of(&document);
        if id != event.document_id {
            return Err(LiveError::MalformedEvent(format!(
                "documentKey {} does not match document id {}",
                event.document_id, id
            )));
        }
        Ok(document)
    }

    /// Run the snapshot query: window contents plus the unpaged total
    async fn load(&self) -> LiveResult<(Vec<T>, u64)> {
        let skip = self.context.paging().map(|p| p.skip).unwrap_or(0);
        let raw = self
            .store
            .find(&self.filter, self.context.sorting(), skip, self.window.capacity())
            .await?;
        let total = self.store.count(&self.filter).await?;
        let documents = raw.into_iter().map(from_store).collect::<LiveResult<Vec<T>>>()?;
        if documents.iter().any(|d| self.window.id_of(d).as_value().is_null()) {
            return Err(LiveError::IdentityMapping(format!(
                "document without identity field {}",
                self.window.id_field()
            )));
        }
        Ok((documents, total))
    }

    /// Re-run the snapshot query; true if the window or total moved
    async fn refresh(&mut self) -> LiveResult<bool> {
        let (documents, total) = self.load().await?;
        if self.window.matches(&documents) && self.context.total_items() == total {
            return Ok(false);
        }
        self.window.initialize(documents);
        self.context.set_total_items(total);
        Ok(true)
    }

    /// Re-run the snapshot and emit if the window drifted
    async fn reconcile(&mut self) {
        match self.refresh().await {
            Ok(false) => {}
            Ok(true) => {
                self.metrics.increment_reconciliations();
                debug!(
                    event = %Event::Reconciled,
                    subscription_id = %self.id,
                    items = self.window.len(),
                    total_items = self.context.total_items()
                );
                self.emit();
            }
            Err(e) => {
                warn!(
                    event = %Event::ReconcileFailed,
                    subscription_id = %self.id,
                    code = e.code(),
                    error = %e,
                    "reconciliation sweep failed"
                );
            }
        }
    }

    /// Push the current value unless it equals the last one pushed
    fn emit(&mut self) {
        let value = (self.project)(&self.window, &self.context);
        if self.subject.latest().as_ref() == Some(&value) {
            return;
        }
        if self.subject.next(value) {
            self.metrics.increment_snapshots_emitted();
        }
    }
}

async fn fetch_next<T: Document>(
    store: &dyn DocumentStore,
    filter: &NativeFilter,
    sorting: Option<&Sorting>,
    skip: usize,
) -> LiveResult<Option<T>> {
    let mut next = store.find(filter, sorting, skip, Some(1)).await?;
    next.pop().map(from_store).transpose()
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Releases a subscription's resources exactly once
///
/// Also runs on drop, so a panicking task still completes its channel and
/// releases its feed.
struct Teardown<V: Clone> {
    subscription_id: Uuid,
    cancellation: CancellationToken,
    feed: Option<Box<dyn ChangeFeed>>,
    subject: ReplaySubject<V>,
    metrics: Arc<LiveMetrics>,
    cleaned_up: bool,
}

impl<V: Clone> Teardown<V> {
    fn run(&mut self, reason: CompletionReason) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        self.cancellation.cancel();
        if let Some(feed) = self.feed.take() {
            feed.close();
        }
        self.subject.complete(reason);
        self.metrics.increment_subscriptions_closed();

        trace!(
            event = %Event::Cleanup,
            subscription_id = %self.subscription_id,
            reason = ?self.subject.completion()
        );
    }
}

impl<V: Clone> Drop for Teardown<V> {
    fn drop(&mut self) {
        self.run(CompletionReason::Failed("subscription task ended unexpectedly".to_string()));
    }
}
