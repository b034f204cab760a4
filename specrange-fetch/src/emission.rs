//! Ranges derived from a reference element's emission lines.
//!
//! Each line with a tabulated energy gets a window
//! `[energy - start, energy + end]` (low side clamped at zero). The half-widths
//! default to the dataset's zero-peak width, estimated once per dataset in the
//! background, or to [`DeriverConfig::fallback_half_width`] when no usable
//! estimate exists. Either side can be overridden per line; the effective
//! width is resolved whenever it is read, so a late estimate only moves the
//! sides nobody has edited.
//!
//! Every line window gets a sum query, whether or not it is toggled into the
//! registry as a range.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use specrange_core::{
    DataService, DatasetContext, DatasetRef, DomainError, EnergySpan, Error, LineName,
    RangeBounds, RangeId, RangeRequest, ReferenceElement, Result, SelectionChange,
    SelectionSession, SelectionUpdate,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cells::{FetchStatus, Resolution, ResultCells};
use crate::executor::{RayonSpawner, Spawn};
use crate::message::LineMessage;

/// Deriver options.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeriverConfig {
    /// Half-width used when the zero-peak estimate is missing or unusable.
    pub fallback_half_width: f64,
    /// Whether to request a zero-peak estimate for each dataset.
    pub estimate_zero_peak: bool,
}

impl Default for DeriverConfig {
    fn default() -> Self {
        Self {
            fallback_half_width: 0.1,
            estimate_zero_peak: true,
        }
    }
}

impl DeriverConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback half-width.
    #[must_use]
    pub fn with_fallback_half_width(mut self, width: f64) -> Self {
        self.fallback_half_width = width;
        self
    }

    /// Enables or disables the zero-peak estimate.
    #[must_use]
    pub fn with_zero_peak_estimate(mut self, enabled: bool) -> Self {
        self.estimate_zero_peak = enabled;
        self
    }
}

/// Side of a line window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WidthSide {
    /// Below the line energy.
    Start,
    /// Above the line energy.
    End,
}

/// Effective half-widths of a line window.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HalfWidths {
    pub start: f64,
    pub end: f64,
}

/// Per-line half-width overrides; `None` follows the dataset default.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WidthOverride {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl WidthOverride {
    /// Returns true if both sides are overridden.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    /// Returns true if neither side is overridden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    fn set(&mut self, side: WidthSide, value: Option<f64>) {
        match side {
            WidthSide::Start => self.start = value,
            WidthSide::End => self.end = value,
        }
    }

    fn resolve(&self, default: f64) -> HalfWidths {
        HalfWidths {
            start: self.start.unwrap_or(default),
            end: self.end.unwrap_or(default),
        }
    }
}

/// Identity of one per-line sum cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub dataset: DatasetRef,
    pub line: LineName,
}

/// Everything a host shows for one emission line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineState {
    /// Line name.
    pub line: LineName,
    /// Tabulated energy.
    pub energy: f64,
    /// Window around the energy.
    pub window: EnergySpan,
    /// Effective half-widths.
    pub widths: HalfWidths,
    /// Overridden sides.
    pub overrides: WidthOverride,
    /// Range id while the line is toggled on.
    pub range: Option<RangeId>,
    /// Sum over the window.
    pub sum: FetchStatus<f64>,
}

/// A line toggled into the registry.
#[derive(Debug, Clone, Copy)]
struct Toggle {
    id: RangeId,
    /// Energy the deriver last wrote to the range.
    applied: EnergySpan,
}

/// Derives line windows and their sums for the selected reference element.
pub struct EmissionLineDeriver<S: ?Sized> {
    service: Arc<S>,
    spawner: Arc<dyn Spawn>,
    config: DeriverConfig,
    tx: Sender<LineMessage>,
    rx: Receiver<LineMessage>,
    context: Option<Arc<DatasetContext>>,
    last_version: Option<u64>,
    element: Option<ReferenceElement>,
    overrides: BTreeMap<LineName, WidthOverride>,
    toggled: BTreeMap<LineName, Toggle>,
    sums: ResultCells<LineKey, f64>,
    estimate: ResultCells<DatasetRef, f64>,
}

impl<S: DataService + ?Sized + 'static> EmissionLineDeriver<S> {
    /// Creates a deriver running queries on the rayon pool.
    pub fn new(service: Arc<S>) -> Self {
        Self::with_spawner(service, Arc::new(RayonSpawner), DeriverConfig::default())
    }

    /// Creates a deriver with an explicit executor and configuration.
    pub fn with_spawner(service: Arc<S>, spawner: Arc<dyn Spawn>, config: DeriverConfig) -> Self {
        let (tx, rx) = channel();
        Self {
            service,
            spawner,
            config,
            tx,
            rx,
            context: None,
            last_version: None,
            element: None,
            overrides: BTreeMap::new(),
            toggled: BTreeMap::new(),
            sums: ResultCells::new(),
            estimate: ResultCells::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Element and widths
    // ---------------------------------------------------------------------

    /// Selects the reference element, or none.
    ///
    /// Lines toggled for the previous element are removed from the session
    /// and width overrides are reset.
    ///
    /// # Errors
    /// Returns the session error if a toggled range cannot be removed.
    pub fn select_element(
        &mut self,
        session: &mut SelectionSession,
        element: Option<ReferenceElement>,
    ) -> Result<()> {
        let toggled = std::mem::take(&mut self.toggled);
        for Toggle { id, .. } in toggled.into_values() {
            if session.registry().get(id).is_some() {
                session.remove_range(id)?;
            }
        }

        if let Some(element) = &element {
            debug!(
                "selected reference element {} ({} lines)",
                element.symbol,
                element.available_lines().count()
            );
        }
        self.overrides.clear();
        self.sums.clear();
        self.element = element;
        self.issue_all_sums();
        Ok(())
    }

    /// Selected reference element.
    #[must_use]
    pub fn element(&self) -> Option<&ReferenceElement> {
        self.element.as_ref()
    }

    /// Overrides one side of a line window, or restores the default with `None`.
    ///
    /// The line's sum is re-issued, and its range is updated if toggled on.
    ///
    /// # Errors
    /// [`DomainError::InvalidWidth`] for a negative or non-finite width,
    /// [`DomainError::MissingLineEnergy`] if the line has no energy, or the
    /// session error from updating the toggled range. State is unchanged on error.
    pub fn set_half_width(
        &mut self,
        session: &mut SelectionSession,
        line: LineName,
        side: WidthSide,
        value: Option<f64>,
    ) -> Result<()> {
        if let Some(width) = value {
            if !width.is_finite() || width < 0.0 {
                return Err(DomainError::InvalidWidth(width).into());
            }
        }
        let mut overrides = self.overrides.get(&line).copied().unwrap_or_default();
        overrides.set(side, value);
        let window = self.window_with(line, &overrides)?;

        if let Some(toggle) = self.toggled.get(&line).copied() {
            if session.registry().get(toggle.id).is_some() {
                session.update_range(toggle.id, RangeBounds::Energy(window))?;
                self.record_applied(session, line, toggle.id);
            }
        }

        if overrides.is_empty() {
            self.overrides.remove(&line);
        } else {
            self.overrides.insert(line, overrides);
        }
        self.issue_sum(line);
        Ok(())
    }

    /// Dataset default half-width: the zero-peak estimate when ready, else the fallback.
    #[must_use]
    pub fn default_half_width(&self) -> f64 {
        self.context
            .as_ref()
            .and_then(|context| self.estimate.get(&context.dataset))
            .and_then(|(_, status)| status.value().copied())
            .unwrap_or(self.config.fallback_half_width)
    }

    /// Effective half-widths of a line.
    #[must_use]
    pub fn half_widths(&self, line: LineName) -> HalfWidths {
        self.overrides
            .get(&line)
            .copied()
            .unwrap_or_default()
            .resolve(self.default_half_width())
    }

    /// Overridden sides of a line.
    #[must_use]
    pub fn overrides(&self, line: LineName) -> WidthOverride {
        self.overrides.get(&line).copied().unwrap_or_default()
    }

    /// Energy window of a line under its effective half-widths.
    ///
    /// # Errors
    /// [`DomainError::MissingLineEnergy`] if no element is selected or the
    /// element has no energy for `line`.
    pub fn window(&self, line: LineName) -> std::result::Result<EnergySpan, DomainError> {
        self.window_with(line, &self.overrides(line))
    }

    fn window_with(
        &self,
        line: LineName,
        overrides: &WidthOverride,
    ) -> std::result::Result<EnergySpan, DomainError> {
        let energy = self
            .element
            .as_ref()
            .and_then(|element| element.energy(line))
            .ok_or_else(|| DomainError::MissingLineEnergy(line.to_string()))?;
        let widths = overrides.resolve(self.default_half_width());
        EnergySpan::new((energy - widths.start).max(0.0), energy + widths.end)
    }

    // ---------------------------------------------------------------------
    // Toggles
    // ---------------------------------------------------------------------

    /// Adds the line window as a range. A line already toggled keeps its range.
    ///
    /// # Errors
    /// [`Error::Capacity`] when the registry is full, a [`DomainError`] for a
    /// line without energy, or any other add error. Nothing is recorded on error.
    pub fn toggle_on(&mut self, session: &mut SelectionSession, line: LineName) -> Result<RangeId> {
        if let Some(toggle) = self.toggled.get(&line) {
            if session.registry().get(toggle.id).is_some() {
                return Ok(toggle.id);
            }
        }
        let window = self.window(line)?;
        let symbol = self
            .element
            .as_ref()
            .map(|element| element.symbol.clone())
            .unwrap_or_default();
        let request = RangeRequest::energy(window.start, window.end)
            .with_label(format!("{symbol} {line}"))
            .with_source(symbol, line);

        let id = session.add_range(request)?;
        debug!("toggled {line} on as range {id} over {window}");
        self.record_applied(session, line, id);
        Ok(id)
    }

    /// Removes the line's range. Returns false if the line was not toggled.
    ///
    /// # Errors
    /// Returns the session error if the range cannot be removed.
    pub fn toggle_off(&mut self, session: &mut SelectionSession, line: LineName) -> Result<bool> {
        let Some(Toggle { id, .. }) = self.toggled.remove(&line) else {
            return Ok(false);
        };
        if session.registry().get(id).is_some() {
            session.remove_range(id)?;
        }
        debug!("toggled {line} off (range {id})");
        Ok(true)
    }

    /// Range id of a toggled line.
    #[must_use]
    pub fn toggled(&self, line: LineName) -> Option<RangeId> {
        self.toggled.get(&line).map(|toggle| toggle.id)
    }

    /// Moves toggled ranges to their current windows, e.g. after the default
    /// width resolved. Returns how many ranges were updated.
    ///
    /// A range edited through the session since the deriver last placed it
    /// keeps the edit; only [`Self::set_half_width`] moves it again.
    ///
    /// # Errors
    /// Returns the first session error.
    pub fn sync_ranges(&mut self, session: &mut SelectionSession) -> Result<usize> {
        let mut updated = 0;
        let toggled: Vec<(LineName, Toggle)> =
            self.toggled.iter().map(|(line, toggle)| (*line, *toggle)).collect();
        for (line, toggle) in toggled {
            let Some(current) = session.registry().get(toggle.id).map(|entry| entry.energy) else {
                continue;
            };
            if current != toggle.applied {
                continue;
            }
            let window = self.window(line)?;
            let resolved = session
                .context()
                .map(|context| context.converter.resolve(RangeBounds::Energy(window)))
                .transpose()?;
            if resolved.is_some_and(|bounds| bounds.energy == current) {
                continue;
            }
            session.update_range(toggle.id, RangeBounds::Energy(window))?;
            self.record_applied(session, line, toggle.id);
            updated += 1;
        }
        Ok(updated)
    }

    fn record_applied(&mut self, session: &SelectionSession, line: LineName, id: RangeId) {
        if let Some(entry) = session.registry().get(id) {
            self.toggled.insert(
                line,
                Toggle {
                    id,
                    applied: entry.energy,
                },
            );
        }
    }

    // ---------------------------------------------------------------------
    // Selection updates and results
    // ---------------------------------------------------------------------

    /// Follows a published selection update.
    ///
    /// A dataset switch re-requests the zero-peak estimate and every line sum.
    /// Toggles whose range no longer exists are forgotten.
    pub fn observe(&mut self, update: &SelectionUpdate) {
        if self.last_version.is_some_and(|seen| update.version <= seen) {
            return;
        }
        self.last_version = Some(update.version);

        if update.change == SelectionChange::DatasetChanged
            || self.context_changed(update.context.as_ref())
        {
            self.context = update.context.clone();
            self.sums.clear();
            self.estimate.clear();
            self.request_estimate();
            self.issue_all_sums();
        }

        let snapshot = &update.snapshot;
        self.toggled.retain(|line, toggle| {
            let live = snapshot
                .get(toggle.id)
                .is_some_and(|entry| entry.source_line == Some(*line));
            if !live {
                debug!("forgetting toggle for {line}: range {} is gone", toggle.id);
            }
            live
        });
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

    /// Polls until nothing is pending or `timeout` elapses.
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

    /// Returns true if no sum or estimate is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.sums.pending_count() == 0 && self.estimate.pending_count() == 0
    }

    /// Sum over a line window on the active dataset.
    #[must_use]
    pub fn line_sum(&self, line: LineName) -> FetchStatus<f64> {
        self.context
            .as_ref()
            .and_then(|context| {
                self.sums.get(&LineKey {
                    dataset: context.dataset.clone(),
                    line,
                })
            })
            .map_or(FetchStatus::Idle, |(_, status)| status.clone())
    }

    /// State of every line the selected element has, in table order.
    #[must_use]
    pub fn lines(&self) -> Vec<LineState> {
        let Some(element) = &self.element else {
            return Vec::new();
        };
        element
            .available_lines()
            .filter_map(|(line, energy)| {
                let window = self.window(line).ok()?;
                Some(LineState {
                    line,
                    energy,
                    window,
                    widths: self.half_widths(line),
                    overrides: self.overrides(line),
                    range: self.toggled(line),
                    sum: self.line_sum(line),
                })
            })
            .collect()
    }

    fn context_changed(&self, next: Option<&Arc<DatasetContext>>) -> bool {
        match (&self.context, next) {
            (None, None) => false,
            (Some(current), Some(next)) => !(Arc::ptr_eq(current, next) || **current == **next),
            _ => true,
        }
    }

    fn request_estimate(&mut self) {
        if !self.config.estimate_zero_peak {
            return;
        }
        let Some(context) = self.context.clone() else {
            return;
        };
        let dataset = context.dataset.clone();
        let generation = self.estimate.issue(dataset.clone());
        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        debug!("requesting zero-peak width {generation} for '{dataset}'");
        self.spawner.spawn(Box::new(move || {
            let width = service.zero_peak_width(&dataset, context.signal_index);
            let _ = tx.send(LineMessage::ZeroPeakEstimated {
                dataset,
                generation,
                width,
            });
        }));
    }

    fn issue_all_sums(&mut self) {
        let lines: Vec<LineName> = self
            .element
            .as_ref()
            .map(|element| element.available_lines().map(|(line, _)| line).collect())
            .unwrap_or_default();
        for line in lines {
            self.issue_sum(line);
        }
    }

    fn issue_sum(&mut self, line: LineName) {
        let Some(context) = self.context.clone() else {
            return;
        };
        let Ok(window) = self.window(line) else {
            return;
        };
        let key = LineKey {
            dataset: context.dataset.clone(),
            line,
        };
        let generation = self.sums.issue(key.clone());
        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        trace!("issuing line sum {generation} for {line} over {window}");
        self.spawner.spawn(Box::new(move || {
            let outcome = service.aggregate_sum(&key.dataset, context.signal_index, window);
            let _ = tx.send(LineMessage::SumCompleted {
                key,
                generation,
                outcome,
            });
        }));
    }

    fn handle(&mut self, message: LineMessage) -> bool {
        match message {
            LineMessage::SumCompleted {
                key,
                generation,
                outcome,
            } => {
                let failure = outcome.as_ref().err().map(ToString::to_string);
                match self
                    .sums
                    .resolve(&key, generation, outcome.map_err(|err| err.to_string()))
                {
                    Resolution::Applied => {
                        if let Some(message) = failure {
                            warn!("sum for line {} failed: {message}", key.line);
                        }
                        true
                    }
                    Resolution::Stale => {
                        trace!("dropping stale line sum {generation} for {}", key.line);
                        false
                    }
                }
            }
            LineMessage::ZeroPeakEstimated {
                dataset,
                generation,
                width,
            } => {
                let before = self.default_half_width();
                let outcome = match width {
                    Some(width) if width.is_finite() && width > 0.0 => Ok(width),
                    Some(width) => Err(format!("unusable zero-peak width {width}")),
                    None => Err("zero-peak width unavailable".to_string()),
                };
                if let Err(reason) = &outcome {
                    debug!("{reason} for '{dataset}', using {before}");
                }
                if self.estimate.resolve(&dataset, generation, outcome) == Resolution::Stale {
                    return false;
                }
                #[allow(clippy::float_cmp)]
                let changed = self.default_half_width() != before;
                if changed {
                    debug!(
                        "default half-width for '{dataset}' is now {}",
                        self.default_half_width()
                    );
                    let lines: Vec<LineName> = self
                        .element
                        .as_ref()
                        .map(|element| {
                            element
                                .available_lines()
                                .map(|(line, _)| line)
                                .filter(|line| !self.overrides(*line).is_complete())
                                .collect()
                        })
                        .unwrap_or_default();
                    for line in lines {
                        self.issue_sum(line);
                    }
                }
                true
            }
        }
    }
}

impl<S: ?Sized> fmt::Debug for EmissionLineDeriver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmissionLineDeriver")
            .field("config", &self.config)
            .field("element", &self.element.as_ref().map(|e| e.symbol.as_str()))
            .field("toggled", &self.toggled)
            .finish_non_exhaustive()
    }
}

/// Converts a toggle failure into a message for the host.
#[must_use]
pub fn describe_toggle_error(line: LineName, error: &Error) -> String {
    match error {
        Error::Capacity(_) => format!("cannot add {line}: all range slots are in use"),
        other => format!("cannot add {line}: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueuedSpawner;
    use crate::testing::StubService;
    use approx::assert_relative_eq;
    use specrange_core::{CalibrationConverter, CalibrationParameters, IndexSpan};

    struct Harness {
        session: SelectionSession,
        deriver: EmissionLineDeriver<StubService>,
        spawner: QueuedSpawner,
        service: Arc<StubService>,
        updates: Receiver<SelectionUpdate>,
    }

    impl Harness {
        fn new() -> Self {
            let service = Arc::new(StubService::default());
            let spawner = QueuedSpawner::new();
            let deriver = EmissionLineDeriver::with_spawner(
                Arc::clone(&service),
                Arc::new(spawner.clone()),
                DeriverConfig::default(),
            );
            let mut session = SelectionSession::new();
            let updates = session.subscribe_channel();
            let converter =
                CalibrationConverter::new(CalibrationParameters::new(0.0, 0.01, "keV"), 2048)
                    .unwrap();
            session.open_dataset(DatasetContext::new("cube".into(), 0, converter));
            let mut harness = Self {
                session,
                deriver,
                spawner,
                service,
                updates,
            };
            harness.sync();
            harness
        }

        fn sync(&mut self) {
            for update in self.updates.try_iter() {
                self.deriver.observe(&update);
            }
        }

        fn settle(&mut self) {
            self.spawner.run_all();
            self.deriver.poll();
        }

        fn select_iron(&mut self) {
            self.deriver
                .select_element(&mut self.session, Some(iron()))
                .unwrap();
            self.sync();
        }
    }

    fn iron() -> ReferenceElement {
        ReferenceElement::new("Fe", 26)
            .with_line(LineName::Ka1, 6.4)
            .with_line(LineName::Kb1, 7.06)
    }

    #[test]
    fn test_fallback_width_without_estimate() {
        let mut h = Harness::new();
        h.select_iron();
        h.settle();

        assert_relative_eq!(h.deriver.default_half_width(), 0.1);
        let window = h.deriver.window(LineName::Ka1).unwrap();
        assert_relative_eq!(window.start, 6.3, epsilon = 1e-9);
        assert_relative_eq!(window.end, 6.5, epsilon = 1e-9);
    }

    #[test]
    fn test_sums_follow_selection_not_toggles() {
        let mut h = Harness::new();
        h.select_iron();
        assert!(h.deriver.line_sum(LineName::Ka1).is_pending());
        assert!(h.deriver.line_sum(LineName::Kb1).is_pending());
        assert_eq!(h.deriver.line_sum(LineName::La1), FetchStatus::Idle);
        h.settle();

        let sum = *h.deriver.line_sum(LineName::Ka1).value().unwrap();
        assert_relative_eq!(sum, 12.8, epsilon = 1e-9);
        assert!(h.session.registry().is_empty());
    }

    #[test]
    fn test_toggle_on_adds_labelled_range() {
        let mut h = Harness::new();
        h.select_iron();
        let id = h.deriver.toggle_on(&mut h.session, LineName::Ka1).unwrap();
        h.sync();

        let entry = h.session.registry().get(id).unwrap().clone();
        assert_eq!(entry.label, "Fe Ka1");
        assert_eq!(entry.source_line, Some(LineName::Ka1));
        assert_eq!(entry.indices.start, 630);
        assert_eq!(entry.indices.end, 650);
        assert_eq!(h.deriver.toggled(LineName::Ka1), Some(id));

        assert!(h.deriver.toggle_off(&mut h.session, LineName::Ka1).unwrap());
        assert!(h.session.registry().is_empty());
        assert!(!h.deriver.toggle_off(&mut h.session, LineName::Ka1).unwrap());
    }

    #[test]
    fn test_toggle_on_full_registry_records_nothing() {
        let mut h = Harness::new();
        h.select_iron();
        for i in 0..10 {
            h.session.add_range(RangeRequest::indices(i, i + 1)).unwrap();
        }
        let err = h.deriver.toggle_on(&mut h.session, LineName::Ka1).unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
        assert_eq!(h.deriver.toggled(LineName::Ka1), None);
        assert!(describe_toggle_error(LineName::Ka1, &err).contains("slots"));
    }

    #[test]
    fn test_missing_line_energy() {
        let mut h = Harness::new();
        h.select_iron();
        let err = h.deriver.toggle_on(&mut h.session, LineName::Ma1).unwrap_err();
        assert_eq!(
            err,
            Error::Domain(DomainError::MissingLineEnergy("Ma1".into()))
        );
    }

    #[test]
    fn test_window_clamped_at_zero() {
        let mut h = Harness::new();
        h.deriver
            .select_element(
                &mut h.session,
                Some(ReferenceElement::new("B", 5).with_line(LineName::Ka1, 0.05)),
            )
            .unwrap();
        let window = h.deriver.window(LineName::Ka1).unwrap();
        assert_relative_eq!(window.start, 0.0);
        assert_relative_eq!(window.end, 0.15, epsilon = 1e-9);
    }

    #[test]
    fn test_late_estimate_keeps_overrides() {
        let mut h = Harness::new();
        h.service.set_zero_peak(Some(0.15));
        // Estimate was requested when the dataset opened; hold it back.
        h.select_iron();
        h.deriver
            .set_half_width(&mut h.session, LineName::Ka1, WidthSide::Start, Some(0.05))
            .unwrap();
        h.settle();

        assert_relative_eq!(h.deriver.default_half_width(), 0.15);
        let widths = h.deriver.half_widths(LineName::Ka1);
        assert_relative_eq!(widths.start, 0.05);
        assert_relative_eq!(widths.end, 0.15);
        let kb = h.deriver.half_widths(LineName::Kb1);
        assert_relative_eq!(kb.start, 0.15);
    }

    #[test]
    fn test_unusable_estimate_falls_back() {
        let mut h = Harness::new();
        h.service.set_zero_peak(Some(-0.2));
        h.select_iron();
        h.settle();
        assert_relative_eq!(h.deriver.default_half_width(), 0.1);
        assert!(h.deriver.is_idle());
    }

    #[test]
    fn test_width_edit_moves_toggled_range() {
        let mut h = Harness::new();
        h.select_iron();
        let id = h.deriver.toggle_on(&mut h.session, LineName::Ka1).unwrap();
        h.deriver
            .set_half_width(&mut h.session, LineName::Ka1, WidthSide::End, Some(0.3))
            .unwrap();

        let entry = h.session.registry().get(id).unwrap();
        assert_relative_eq!(entry.energy.end, 6.7, epsilon = 1e-9);
        assert_relative_eq!(entry.energy.start, 6.3, epsilon = 1e-9);

        let err = h
            .deriver
            .set_half_width(&mut h.session, LineName::Ka1, WidthSide::End, Some(-1.0))
            .unwrap_err();
        assert_eq!(err, Error::Domain(DomainError::InvalidWidth(-1.0)));
        assert_relative_eq!(h.deriver.half_widths(LineName::Ka1).end, 0.3);
    }

    #[test]
    fn test_sync_ranges_after_estimate() {
        let mut h = Harness::new();
        h.service.set_zero_peak(Some(0.2));
        h.select_iron();
        let id = h.deriver.toggle_on(&mut h.session, LineName::Kb1).unwrap();
        h.settle();

        assert_eq!(h.deriver.sync_ranges(&mut h.session).unwrap(), 1);
        let entry = h.session.registry().get(id).unwrap();
        assert_relative_eq!(entry.energy.start, 6.86, epsilon = 1e-9);
        assert_eq!(h.deriver.sync_ranges(&mut h.session).unwrap(), 0);
    }

    #[test]
    fn test_session_edit_of_line_range_is_kept() {
        let mut h = Harness::new();
        h.service.set_zero_peak(Some(0.2));
        h.select_iron();
        let id = h.deriver.toggle_on(&mut h.session, LineName::Kb1).unwrap();
        h.session
            .update_range(id, RangeBounds::Indices(IndexSpan::new(100, 200).unwrap()))
            .unwrap();
        h.sync();
        h.settle();

        assert_eq!(h.deriver.sync_ranges(&mut h.session).unwrap(), 0);
        let entry = h.session.registry().get(id).unwrap();
        assert_eq!(entry.indices, IndexSpan::new(100, 200).unwrap());
        assert_eq!(h.deriver.toggled(LineName::Kb1), Some(id));

        // An explicit width edit places the range on the line window again.
        h.deriver
            .set_half_width(&mut h.session, LineName::Kb1, WidthSide::End, Some(0.1))
            .unwrap();
        let entry = h.session.registry().get(id).unwrap();
        assert_relative_eq!(entry.energy.start, 6.86, epsilon = 1e-9);
        assert_relative_eq!(entry.energy.end, 7.16, epsilon = 1e-9);
        assert_eq!(h.deriver.sync_ranges(&mut h.session).unwrap(), 0);
    }

    #[test]
    fn test_range_removed_elsewhere_is_forgotten() {
        let mut h = Harness::new();
        h.select_iron();
        let id = h.deriver.toggle_on(&mut h.session, LineName::Ka1).unwrap();
        h.sync();
        h.session.remove_range(id).unwrap();
        h.sync();
        assert_eq!(h.deriver.toggled(LineName::Ka1), None);
    }

    #[test]
    fn test_new_element_untoggles_previous_lines() {
        let mut h = Harness::new();
        h.select_iron();
        h.deriver.toggle_on(&mut h.session, LineName::Ka1).unwrap();
        h.deriver
            .set_half_width(&mut h.session, LineName::Ka1, WidthSide::Start, Some(0.2))
            .unwrap();

        let copper = ReferenceElement::new("Cu", 29).with_line(LineName::Ka1, 8.04);
        h.deriver
            .select_element(&mut h.session, Some(copper))
            .unwrap();
        assert!(h.session.registry().is_empty());
        assert!(h.deriver.overrides(LineName::Ka1).is_empty());
        assert_eq!(h.deriver.lines().len(), 1);
    }

    #[test]
    fn test_out_of_order_line_sums() {
        let mut h = Harness::new();
        h.deriver = EmissionLineDeriver::with_spawner(
            Arc::clone(&h.service),
            Arc::new(h.spawner.clone()),
            DeriverConfig::default().with_zero_peak_estimate(false),
        );
        h.spawner.run_all();
        h.deriver.observe(h.session.latest());
        h.deriver
            .select_element(
                &mut h.session,
                Some(ReferenceElement::new("Fe", 26).with_line(LineName::Ka1, 6.4)),
            )
            .unwrap();
        h.deriver
            .set_half_width(&mut h.session, LineName::Ka1, WidthSide::End, Some(0.6))
            .unwrap();
        assert_eq!(h.spawner.len(), 2);

        h.spawner.run_last();
        assert_eq!(h.deriver.poll(), 1);
        h.spawner.run_next();
        assert_eq!(h.deriver.poll(), 0);
        let sum = *h.deriver.line_sum(LineName::Ka1).value().unwrap();
        assert_relative_eq!(sum, 6.3 + 7.0, epsilon = 1e-9);
    }

    #[test]
    fn test_failed_line_sum() {
        let mut h = Harness::new();
        h.service.fail_sums(true);
        h.select_iron();
        h.settle();
        assert!(matches!(
            h.deriver.line_sum(LineName::Ka1),
            FetchStatus::Failed(_)
        ));
    }
}
