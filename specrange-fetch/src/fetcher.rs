//! Per-range sum and image queries.
//!
//! The fetcher follows published selection updates. Every live range gets a
//! `Sum` query over its energy span; the displayed range additionally gets an
//! `Image` query over its channel span. Queries run on the configured
//! executor and report back through a channel, and [`RangeDataFetcher::poll`]
//! applies the completions on the control thread. A completion is only
//! applied if no newer query for the same `(dataset, range, kind)` has been
//! issued since; everything else is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use specrange_core::{
    DataService, DatasetContext, DatasetRef, Matrix, RangeEntry, RangeId, RegistrySnapshot,
    ResolvedBounds, SelectionChange, SelectionUpdate,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cells::{FetchStatus, Generation, Resolution, ResultCells};
use crate::executor::{RayonSpawner, Spawn};
use crate::message::FetchMessage;

/// Query kind issued per range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FetchKind {
    /// Total counts over the range's energy span.
    Sum,
    /// Per-pixel counts over the range's channel span.
    Image,
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchKind::Sum => write!(f, "sum"),
            FetchKind::Image => write!(f, "image"),
        }
    }
}

/// Identity of one result cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    /// Dataset the query ran against.
    pub dataset: DatasetRef,
    /// Range slot.
    pub range: RangeId,
    /// Query kind.
    pub kind: FetchKind,
}

/// Value of a completed query.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchValue {
    /// Aggregate sum.
    Sum(f64),
    /// Filtered image.
    Image(Arc<Matrix>),
}

impl FetchValue {
    /// The sum, if this is a sum result.
    #[must_use]
    pub fn as_sum(&self) -> Option<f64> {
        match self {
            FetchValue::Sum(value) => Some(*value),
            FetchValue::Image(_) => None,
        }
    }

    /// The image, if this is an image result.
    #[must_use]
    pub fn as_image(&self) -> Option<&Matrix> {
        match self {
            FetchValue::Image(image) => Some(image),
            FetchValue::Sum(_) => None,
        }
    }
}

/// Visible state of one range query.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    /// Range slot.
    pub range: RangeId,
    /// Query kind.
    pub kind: FetchKind,
    /// Generation of the latest issued query, `None` while idle.
    pub generation: Option<Generation>,
    /// Current status.
    pub status: FetchStatus<FetchValue>,
}

/// Fetcher options.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FetchConfig {
    /// Whether the displayed range gets image queries.
    pub fetch_images: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { fetch_images: true }
    }
}

impl FetchConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables image queries.
    #[must_use]
    pub fn with_images(mut self, enabled: bool) -> Self {
        self.fetch_images = enabled;
        self
    }
}

/// Keeps sum and image queries in step with the published selection.
pub struct RangeDataFetcher<S: ?Sized> {
    service: Arc<S>,
    spawner: Arc<dyn Spawn>,
    config: FetchConfig,
    tx: Sender<FetchMessage>,
    rx: Receiver<FetchMessage>,
    cells: ResultCells<FetchKey, FetchValue>,
    /// Bounds used by the latest query per range and kind.
    issued: HashMap<(RangeId, FetchKind), ResolvedBounds>,
    context: Option<Arc<DatasetContext>>,
    snapshot: Arc<RegistrySnapshot>,
    last_version: Option<u64>,
}

impl<S: DataService + ?Sized + 'static> RangeDataFetcher<S> {
    /// Creates a fetcher running queries on the rayon pool.
    pub fn new(service: Arc<S>) -> Self {
        Self::with_spawner(service, Arc::new(RayonSpawner), FetchConfig::default())
    }

    /// Creates a fetcher with an explicit executor and configuration.
    pub fn with_spawner(service: Arc<S>, spawner: Arc<dyn Spawn>, config: FetchConfig) -> Self {
        let (tx, rx) = channel();
        Self {
            service,
            spawner,
            config,
            tx,
            rx,
            cells: ResultCells::new(),
            issued: HashMap::new(),
            context: None,
            snapshot: Arc::new(RegistrySnapshot::default()),
            last_version: None,
        }
    }

    /// Brings queries in line with a published update.
    ///
    /// Updates older than one already observed are ignored.
    pub fn observe(&mut self, update: &SelectionUpdate) {
        if self.last_version.is_some_and(|seen| update.version <= seen) {
            trace!("ignoring selection update v{} (already at v{:?})", update.version, self.last_version);
            return;
        }
        self.last_version = Some(update.version);

        if update.change == SelectionChange::DatasetChanged
            || self.context_changed(update.context.as_ref())
        {
            self.reset(update.context.clone());
        }
        self.snapshot = Arc::clone(&update.snapshot);

        let (force_sum, force_image) = match update.change {
            SelectionChange::Updated(id) => (Some(id), Some(id)),
            SelectionChange::DisplayChanged { current, .. } => (None, current),
            _ => (None, None),
        };
        self.reconcile(force_sum, force_image);
    }

    /// Re-issues one query for a live range, e.g. after a failure.
    ///
    /// Returns false if the range is not live, or for an image query on a
    /// range that is not displayed.
    pub fn refresh(&mut self, range: RangeId, kind: FetchKind) -> bool {
        let Some(context) = self.context.clone() else {
            return false;
        };
        let snapshot = Arc::clone(&self.snapshot);
        let Some(entry) = snapshot.get(range) else {
            return false;
        };
        if kind == FetchKind::Image
            && (!self.config.fetch_images || snapshot.displayed != Some(range))
        {
            return false;
        }
        self.issue(&context, entry, kind);
        true
    }

    /// Applies every completion received so far. Returns how many became visible.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.rx.try_recv() {
            applied += usize::from(self.handle(message));
        }
        applied
    }

    /// Waits up to `timeout` for one completion, then drains the rest.
    pub fn poll_blocking(&mut self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => usize::from(self.handle(message)) + self.poll(),
            Err(_) => 0,
        }
    }

    /// Polls until no query is pending or `timeout` elapses.
    ///
    /// Returns true if the fetcher became idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.poll();
        while !self.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.poll_blocking(deadline - now);
        }
        true
    }

    /// Visible state of a range query on the active dataset.
    #[must_use]
    pub fn state(&self, range: RangeId, kind: FetchKind) -> FetchResult {
        let cell = self.context.as_ref().and_then(|context| {
            self.cells.get(&FetchKey {
                dataset: context.dataset.clone(),
                range,
                kind,
            })
        });
        match cell {
            Some((generation, status)) => FetchResult {
                range,
                kind,
                generation: Some(generation),
                status: status.clone(),
            },
            None => FetchResult {
                range,
                kind,
                generation: None,
                status: FetchStatus::Idle,
            },
        }
    }

    /// Returns true if no query is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.cells.pending_count() == 0
    }

    /// Number of pending queries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.cells.pending_count()
    }

    /// Dataset context of the last observed update.
    #[must_use]
    pub fn context(&self) -> Option<&DatasetContext> {
        self.context.as_deref()
    }

    fn context_changed(&self, next: Option<&Arc<DatasetContext>>) -> bool {
        match (&self.context, next) {
            (None, None) => false,
            (Some(current), Some(next)) => !(Arc::ptr_eq(current, next) || **current == **next),
            _ => true,
        }
    }

    fn reset(&mut self, context: Option<Arc<DatasetContext>>) {
        if let Some(context) = &context {
            debug!(
                "range fetcher switched to dataset '{}' signal {}",
                context.dataset, context.signal_index
            );
        }
        self.cells.clear();
        self.issued.clear();
        self.context = context;
    }

    fn reconcile(&mut self, force_sum: Option<RangeId>, force_image: Option<RangeId>) {
        let Some(context) = self.context.clone() else {
            return;
        };
        let snapshot = Arc::clone(&self.snapshot);

        let obsolete: Vec<(RangeId, FetchKind)> = self
            .issued
            .keys()
            .copied()
            .filter(|(id, kind)| match kind {
                FetchKind::Sum => snapshot.get(*id).is_none(),
                FetchKind::Image => {
                    !self.config.fetch_images || snapshot.displayed != Some(*id)
                }
            })
            .collect();
        for (id, kind) in obsolete {
            self.invalidate(&context.dataset, id, kind);
        }

        for entry in snapshot.entries.values() {
            if force_sum == Some(entry.id) || self.bounds_changed(entry, FetchKind::Sum) {
                self.issue(&context, entry, FetchKind::Sum);
            }
        }

        if self.config.fetch_images {
            if let Some(entry) = snapshot.displayed_entry() {
                if force_image == Some(entry.id) || self.bounds_changed(entry, FetchKind::Image) {
                    self.issue(&context, entry, FetchKind::Image);
                }
            }
        }
    }

    fn bounds_changed(&self, entry: &RangeEntry, kind: FetchKind) -> bool {
        self.issued.get(&(entry.id, kind)) != Some(&entry.bounds())
    }

    fn invalidate(&mut self, dataset: &DatasetRef, range: RangeId, kind: FetchKind) {
        self.issued.remove(&(range, kind));
        let key = FetchKey {
            dataset: dataset.clone(),
            range,
            kind,
        };
        if self.cells.invalidate(&key) {
            trace!("invalidated {kind} query for range {range}");
        }
    }

    fn issue(&mut self, context: &DatasetContext, entry: &RangeEntry, kind: FetchKind) {
        let key = FetchKey {
            dataset: context.dataset.clone(),
            range: entry.id,
            kind,
        };
        let generation = self.cells.issue(key.clone());
        self.issued.insert((entry.id, kind), entry.bounds());

        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        let signal_index = context.signal_index;

        match kind {
            FetchKind::Sum => {
                let energy = entry.energy;
                debug!("issuing sum {generation} for range {} over {energy}", entry.id);
                self.spawner.spawn(Box::new(move || {
                    let outcome = service
                        .aggregate_sum(&key.dataset, signal_index, energy)
                        .map(FetchValue::Sum);
                    let _ = tx.send(FetchMessage::Completed {
                        key,
                        generation,
                        outcome,
                    });
                }));
            }
            FetchKind::Image => {
                let indices = entry.indices;
                debug!("issuing image {generation} for range {} over {indices}", entry.id);
                self.spawner.spawn(Box::new(move || {
                    let outcome = service
                        .range_image(&key.dataset, signal_index, indices)
                        .map(|image| FetchValue::Image(Arc::new(image)));
                    let _ = tx.send(FetchMessage::Completed {
                        key,
                        generation,
                        outcome,
                    });
                }));
            }
        }
    }

    /// Offers one completion to its cell. Returns true if it was applied.
    fn handle(&mut self, message: FetchMessage) -> bool {
        match message {
            FetchMessage::Completed {
                key,
                generation,
                outcome,
            } => {
                let failure = outcome.as_ref().err().map(ToString::to_string);
                let outcome = outcome.map_err(|err| err.to_string());
                match self.cells.resolve(&key, generation, outcome) {
                    Resolution::Applied => {
                        if let Some(message) = failure {
                            warn!("{} query for range {} failed: {message}", key.kind, key.range);
                        }
                        true
                    }
                    Resolution::Stale => {
                        trace!(
                            "dropping stale {} result {generation} for range {}",
                            key.kind,
                            key.range
                        );
                        false
                    }
                }
            }
        }
    }
}

impl<S: ?Sized> fmt::Debug for RangeDataFetcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeDataFetcher")
            .field("config", &self.config)
            .field("tracked", &self.cells.len())
            .field("last_version", &self.last_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueuedSpawner;
    use crate::testing::StubService;
    use specrange_core::{
        CalibrationConverter, CalibrationParameters, RangeBounds, RangeRequest, SelectionSession,
    };

    struct Harness {
        session: SelectionSession,
        fetcher: RangeDataFetcher<StubService>,
        spawner: QueuedSpawner,
        service: Arc<StubService>,
        updates: Receiver<SelectionUpdate>,
    }

    impl Harness {
        fn new() -> Self {
            let service = Arc::new(StubService::default());
            let spawner = QueuedSpawner::new();
            let fetcher = RangeDataFetcher::with_spawner(
                Arc::clone(&service),
                Arc::new(spawner.clone()),
                FetchConfig::default(),
            );
            let mut session = SelectionSession::new();
            let updates = session.subscribe_channel();
            let mut harness = Self {
                session,
                fetcher,
                spawner,
                service,
                updates,
            };
            harness.open("cube");
            harness
        }

        fn open(&mut self, dataset: &str) {
            let converter =
                CalibrationConverter::new(CalibrationParameters::new(0.0, 0.01, "keV"), 2048)
                    .unwrap();
            self.session
                .open_dataset(DatasetContext::new(dataset.into(), 0, converter));
            self.sync();
        }

        fn sync(&mut self) {
            for update in self.updates.try_iter() {
                self.fetcher.observe(&update);
            }
        }

        fn sum(&self, id: RangeId) -> FetchStatus<FetchValue> {
            self.fetcher.state(id, FetchKind::Sum).status
        }

        fn image(&self, id: RangeId) -> FetchStatus<FetchValue> {
            self.fetcher.state(id, FetchKind::Image).status
        }
    }

    #[test]
    fn test_added_range_gets_sum_only() {
        let mut h = Harness::new();
        let id = h.session.add_range(RangeRequest::indices(100, 200)).unwrap();
        h.sync();

        assert!(h.sum(id).is_pending());
        assert_eq!(h.image(id), FetchStatus::Idle);
        assert_eq!(h.spawner.len(), 1);

        h.spawner.run_all();
        assert_eq!(h.fetcher.poll(), 1);
        assert_eq!(h.sum(id), FetchStatus::Ready(FetchValue::Sum(3.0)));
        assert!(h.fetcher.is_idle());
    }

    #[test]
    fn test_out_of_order_completion_keeps_latest_issue() {
        let mut h = Harness::new();
        let id = h.session.add_range(RangeRequest::indices(100, 200)).unwrap();
        h.sync();
        h.session
            .update_range(id, RangeBounds::Indices(specrange_core::IndexSpan::new(300, 400).unwrap()))
            .unwrap();
        h.sync();
        assert_eq!(h.spawner.len(), 2);

        // Newer query resolves first, the older one arrives afterwards.
        h.spawner.run_last();
        assert_eq!(h.fetcher.poll(), 1);
        h.spawner.run_next();
        assert_eq!(h.fetcher.poll(), 0);

        assert_eq!(h.sum(id), FetchStatus::Ready(FetchValue::Sum(7.0)));
    }

    #[test]
    fn test_sum_and_image_resolve_independently() {
        let mut h = Harness::new();
        let id = h.session.add_range(RangeRequest::indices(10, 20)).unwrap();
        h.session.set_displayed(Some(id)).unwrap();
        h.sync();
        h.service.fail_images(true);

        h.spawner.run_all();
        h.fetcher.poll();

        assert!(matches!(h.sum(id), FetchStatus::Ready(FetchValue::Sum(_))));
        assert!(matches!(h.image(id), FetchStatus::Failed(_)));
        assert!(h.fetcher.is_idle());
    }

    #[test]
    fn test_failed_query_waits_for_new_trigger() {
        let mut h = Harness::new();
        let id = h.session.add_range(RangeRequest::indices(10, 20)).unwrap();
        h.session.set_displayed(Some(id)).unwrap();
        h.sync();
        h.service.fail_images(true);
        h.spawner.run_all();
        h.fetcher.poll();
        assert!(h.spawner.is_empty());

        // Renaming is not a trigger.
        h.session.rename_range(id, "peak").unwrap();
        h.sync();
        assert!(h.spawner.is_empty());
        assert!(matches!(h.image(id), FetchStatus::Failed(_)));

        // Redisplaying is.
        h.service.fail_images(false);
        h.session.set_displayed(Some(id)).unwrap();
        h.sync();
        assert!(h.image(id).is_pending());
        h.spawner.run_all();
        h.fetcher.poll();
        assert!(h.image(id).value().and_then(FetchValue::as_image).is_some());
    }

    #[test]
    fn test_removal_discards_in_flight_results() {
        let mut h = Harness::new();
        let id = h.session.add_range(RangeRequest::indices(10, 20)).unwrap();
        h.session.set_displayed(Some(id)).unwrap();
        h.sync();
        h.session.remove_range(id).unwrap();
        h.sync();

        h.spawner.run_all();
        assert_eq!(h.fetcher.poll(), 0);
        assert_eq!(h.sum(id), FetchStatus::Idle);
        assert_eq!(h.image(id), FetchStatus::Idle);
    }

    #[test]
    fn test_reused_slot_ignores_previous_occupant() {
        let mut h = Harness::new();
        let first = h.session.add_range(RangeRequest::indices(10, 20)).unwrap();
        h.sync();
        h.session.remove_range(first).unwrap();
        let second = h.session.add_range(RangeRequest::indices(500, 600)).unwrap();
        h.sync();
        assert_eq!(first, second);

        h.spawner.run_next();
        assert_eq!(h.fetcher.poll(), 0);
        assert!(h.sum(second).is_pending());
        h.spawner.run_next();
        assert_eq!(h.fetcher.poll(), 1);
        assert_eq!(h.sum(second), FetchStatus::Ready(FetchValue::Sum(11.0)));
    }

    #[test]
    fn test_dataset_switch_discards_old_results() {
        let mut h = Harness::new();
        h.session.add_range(RangeRequest::indices(10, 20)).unwrap();
        h.sync();
        h.open("other");
        let id = h.session.add_range(RangeRequest::indices(100, 200)).unwrap();
        h.sync();

        h.spawner.run_all();
        assert_eq!(h.fetcher.poll(), 1);
        assert_eq!(h.sum(id), FetchStatus::Ready(FetchValue::Sum(3.0)));
        assert_eq!(h.fetcher.context().unwrap().dataset.as_str(), "other");
    }

    #[test]
    fn test_display_switch_drops_previous_image() {
        let mut h = Harness::new();
        let a = h.session.add_range(RangeRequest::indices(10, 20)).unwrap();
        let b = h.session.add_range(RangeRequest::indices(30, 40)).unwrap();
        h.session.set_displayed(Some(a)).unwrap();
        h.sync();
        h.spawner.run_all();
        h.fetcher.poll();
        assert!(h.image(a).value().is_some());

        h.session.set_displayed(Some(b)).unwrap();
        h.sync();
        assert_eq!(h.image(a), FetchStatus::Idle);
        assert!(h.image(b).is_pending());
        assert!(h.sum(a).value().is_some());
    }

    #[test]
    fn test_refresh_and_stale_update_ignored() {
        let mut h = Harness::new();
        let id = h.session.add_range(RangeRequest::indices(10, 20)).unwrap();
        let old = h.session.latest().clone();
        h.sync();
        h.spawner.run_all();
        h.fetcher.poll();

        h.fetcher.observe(&old);
        assert!(h.spawner.is_empty());

        assert!(h.fetcher.refresh(id, FetchKind::Sum));
        assert!(!h.fetcher.refresh(id, FetchKind::Image));
        assert!(h.sum(id).is_pending());
    }
}
