//! Session, fetcher and line deriver wired together for a single-threaded host.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;
use specrange_core::{
    DataService, DatasetRef, LineName, RangeId, ReferenceElement, Result, SelectionSession,
    SelectionUpdate, SessionCommand,
};

use crate::emission::{DeriverConfig, EmissionLineDeriver, WidthSide};
use crate::executor::{RayonSpawner, Spawn};
use crate::fetcher::{FetchConfig, FetchKind, FetchResult, RangeDataFetcher};

/// Longest single wait inside [`SelectionEngine::settle`].
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Owns the selection session and keeps both query pipelines in step with it.
///
/// Every mutating call runs on the caller's thread; [`SelectionEngine::sync`]
/// forwards published updates to the fetcher and deriver and applies any
/// completed queries.
pub struct SelectionEngine<S: ?Sized> {
    service: Arc<S>,
    session: SelectionSession,
    fetcher: RangeDataFetcher<S>,
    deriver: EmissionLineDeriver<S>,
    updates: Receiver<SelectionUpdate>,
}

impl<S: DataService + ?Sized + 'static> SelectionEngine<S> {
    /// Creates an engine running queries on the rayon pool.
    pub fn new(service: Arc<S>) -> Self {
        Self::with_spawner(
            service,
            Arc::new(RayonSpawner),
            FetchConfig::default(),
            DeriverConfig::default(),
        )
    }

    /// Creates an engine with an explicit executor and configuration.
    pub fn with_spawner(
        service: Arc<S>,
        spawner: Arc<dyn Spawn>,
        fetch: FetchConfig,
        deriver: DeriverConfig,
    ) -> Self {
        let mut session = SelectionSession::new();
        let updates = session.subscribe_channel();
        Self {
            fetcher: RangeDataFetcher::with_spawner(Arc::clone(&service), Arc::clone(&spawner), fetch),
            deriver: EmissionLineDeriver::with_spawner(Arc::clone(&service), spawner, deriver),
            service,
            session,
            updates,
        }
    }

    /// The selection session.
    #[must_use]
    pub fn session(&self) -> &SelectionSession {
        &self.session
    }

    /// Mutable access to the session; call [`Self::sync`] afterwards.
    pub fn session_mut(&mut self) -> &mut SelectionSession {
        &mut self.session
    }

    /// The range fetcher.
    #[must_use]
    pub fn fetcher(&self) -> &RangeDataFetcher<S> {
        &self.fetcher
    }

    /// The emission line deriver.
    #[must_use]
    pub fn deriver(&self) -> &EmissionLineDeriver<S> {
        &self.deriver
    }

    /// Loads calibration for a dataset signal and activates it.
    ///
    /// # Errors
    /// Returns the service or calibration error; the session is unchanged.
    pub fn open_dataset(&mut self, dataset: DatasetRef, signal_index: usize) -> Result<()> {
        self.session
            .open_from_service(self.service.as_ref(), dataset, signal_index)?;
        self.sync();
        Ok(())
    }

    /// Applies a session command.
    ///
    /// # Errors
    /// The error of the underlying operation.
    pub fn apply(&mut self, command: SessionCommand) -> Result<()> {
        let outcome = self.session.apply(command);
        self.sync();
        outcome
    }

    /// Selects the reference element for line ranges.
    ///
    /// # Errors
    /// Returns the session error if a previous line range cannot be removed.
    pub fn select_element(&mut self, element: Option<ReferenceElement>) -> Result<()> {
        let outcome = self.deriver.select_element(&mut self.session, element);
        self.sync();
        outcome
    }

    /// Adds a line's window as a range.
    ///
    /// # Errors
    /// See [`EmissionLineDeriver::toggle_on`].
    pub fn toggle_line(&mut self, line: LineName) -> Result<RangeId> {
        let outcome = self.deriver.toggle_on(&mut self.session, line);
        self.sync();
        outcome
    }

    /// Removes a line's range.
    ///
    /// # Errors
    /// See [`EmissionLineDeriver::toggle_off`].
    pub fn untoggle_line(&mut self, line: LineName) -> Result<bool> {
        let outcome = self.deriver.toggle_off(&mut self.session, line);
        self.sync();
        outcome
    }

    /// Overrides one side of a line window.
    ///
    /// # Errors
    /// See [`EmissionLineDeriver::set_half_width`].
    pub fn set_line_width(
        &mut self,
        line: LineName,
        side: WidthSide,
        value: Option<f64>,
    ) -> Result<()> {
        let outcome = self
            .deriver
            .set_half_width(&mut self.session, line, side, value);
        self.sync();
        outcome
    }

    /// Visible state of a range query.
    #[must_use]
    pub fn range_state(&self, range: RangeId, kind: FetchKind) -> FetchResult {
        self.fetcher.state(range, kind)
    }

    /// Forwards published updates and applies completed queries.
    ///
    /// Returns the number of results that became visible.
    pub fn sync(&mut self) -> usize {
        let mut applied = 0;
        loop {
            self.forward_updates();
            applied += self.fetcher.poll();
            applied += self.deriver.poll();

            match self.deriver.sync_ranges(&mut self.session) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("could not move line ranges to their windows: {err}");
                    break;
                }
            }
        }
        self.forward_updates();
        for failure in self.session.drain_deferred_failures() {
            warn!("deferred {:?} failed: {}", failure.command, failure.error);
        }
        applied
    }

    /// Syncs until both pipelines are idle or `timeout` elapses.
    ///
    /// Returns true if everything settled.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.sync();
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = POLL_SLICE.min(deadline - now);
            if self.fetcher.is_idle() {
                self.deriver.poll_blocking(slice);
            } else {
                self.fetcher.poll_blocking(slice);
            }
        }
    }

    /// Returns true if no query is pending in either pipeline.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.fetcher.is_idle() && self.deriver.is_idle()
    }

    fn forward_updates(&mut self) {
        for update in self.updates.try_iter() {
            self.deriver.observe(&update);
            self.fetcher.observe(&update);
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for SelectionEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionEngine")
            .field("session", &self.session)
            .field("fetcher", &self.fetcher)
            .field("deriver", &self.deriver)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::FetchStatus;
    use crate::testing::StubService;
    use specrange_core::RangeRequest;

    #[test]
    fn test_engine_settles_on_rayon() {
        let service = Arc::new(StubService::default());
        service.set_zero_peak(Some(0.12));
        let mut engine = SelectionEngine::new(service);
        engine.open_dataset("cube".into(), 0).unwrap();

        engine
            .apply(SessionCommand::AddRange {
                request: RangeRequest::indices(100, 200),
            })
            .unwrap();
        let id = RangeId::new(1).unwrap();
        engine
            .apply(SessionCommand::SetDisplayed { id: Some(id) })
            .unwrap();
        engine
            .select_element(Some(ReferenceElement::new("Fe", 26).with_line(LineName::Ka1, 6.4)))
            .unwrap();
        let line_range = engine.toggle_line(LineName::Ka1).unwrap();

        assert!(engine.settle(Duration::from_secs(5)));
        assert_eq!(
            engine.range_state(id, FetchKind::Sum).status,
            FetchStatus::Ready(crate::FetchValue::Sum(3.0))
        );
        assert!(engine.range_state(id, FetchKind::Image).status.value().is_some());

        // The toggled range follows the resolved zero-peak width.
        let entry = engine.session().registry().get(line_range).unwrap();
        assert!((entry.energy.start - (6.4 - 0.12)).abs() < 1e-9);
        assert!(engine.range_state(line_range, FetchKind::Sum).status.value().is_some());
    }
}
