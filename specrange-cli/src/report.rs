//! Session summaries printed after a script run.

use serde::Serialize;
use specrange_core::{DataService, EnergySpan, IndexSpan, LineName, Matrix};
use specrange_fetch::{FetchKind, FetchStatus, FetchValue, HalfWidths, SelectionEngine};

use crate::script::StepFailure;

/// Status of one query, flattened for output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryReport {
    fn from_sum(status: &FetchStatus<f64>) -> Self {
        Self::build(status.label(), status.value().copied(), status)
    }

    fn from_fetch(status: &FetchStatus<FetchValue>) -> Self {
        Self::build(
            status.label(),
            status.value().and_then(FetchValue::as_sum),
            status,
        )
    }

    fn build<V>(state: &'static str, value: Option<f64>, status: &FetchStatus<V>) -> Self {
        let error = match status {
            FetchStatus::Failed(message) => Some(message.clone()),
            _ => None,
        };
        Self {
            state,
            value,
            error,
        }
    }

    fn describe(&self) -> String {
        match (&self.value, &self.error) {
            (Some(value), _) => format!("{value:.1}"),
            (None, Some(error)) => format!("failed: {error}"),
            (None, None) => self.state.to_string(),
        }
    }
}

/// Image statistics for the displayed range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub rows: usize,
    pub cols: usize,
    pub total: f64,
    pub min: f64,
    pub max: f64,
}

impl ImageReport {
    fn from_matrix(image: &Matrix) -> Self {
        let (rows, cols) = image.dim();
        Self {
            rows,
            cols,
            total: image.sum(),
            min: image.iter().copied().fold(f64::INFINITY, f64::min),
            max: image.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeReport {
    pub id: u8,
    pub label: String,
    pub indices: IndexSpan,
    pub energy: EnergySpan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<LineName>,
    pub displayed: bool,
    pub sum: QueryReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<QueryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_stats: Option<ImageReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineReport {
    pub line: LineName,
    pub energy: f64,
    pub window: EnergySpan,
    pub widths: HalfWidths,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<u8>,
    pub sum: QueryReport,
}

/// Everything printed after a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    pub default_half_width: f64,
    pub ranges: Vec<RangeReport>,
    pub lines: Vec<LineReport>,
    pub failures: Vec<StepFailure>,
}

impl SessionReport {
    /// Collects the engine's current state.
    pub fn collect<S: DataService + ?Sized + 'static>(
        engine: &SelectionEngine<S>,
        failures: Vec<StepFailure>,
    ) -> Self {
        let session = engine.session();
        let snapshot = session.snapshot();

        let ranges = snapshot
            .entries
            .values()
            .map(|entry| {
                let displayed = snapshot.displayed == Some(entry.id);
                let sum = engine.range_state(entry.id, FetchKind::Sum);
                let image = displayed.then(|| engine.range_state(entry.id, FetchKind::Image));
                RangeReport {
                    id: entry.id.get(),
                    label: entry.label.clone(),
                    indices: entry.indices,
                    energy: entry.energy,
                    line: entry.source_line,
                    displayed,
                    sum: QueryReport::from_fetch(&sum.status),
                    image_stats: image
                        .as_ref()
                        .and_then(|image| image.status.value())
                        .and_then(FetchValue::as_image)
                        .map(ImageReport::from_matrix),
                    image: image.map(|image| QueryReport::from_fetch(&image.status)),
                }
            })
            .collect();

        let deriver = engine.deriver();
        let lines = deriver
            .lines()
            .into_iter()
            .map(|line| LineReport {
                line: line.line,
                energy: line.energy,
                window: line.window,
                widths: line.widths,
                range: line.range.map(specrange_core::RangeId::get),
                sum: QueryReport::from_sum(&line.sum),
            })
            .collect();

        Self {
            dataset: session.context().map(|context| context.dataset.to_string()),
            units: session
                .context()
                .map(|context| context.converter.units().to_string()),
            element: deriver.element().map(|element| element.symbol.clone()),
            default_half_width: deriver.default_half_width(),
            ranges,
            lines,
            failures,
        }
    }

    /// Prints a plain-text summary.
    pub fn print_table(&self) {
        let units = self.units.as_deref().unwrap_or("");
        match &self.dataset {
            Some(dataset) => println!("Dataset: {dataset}"),
            None => println!("Dataset: (none)"),
        }

        println!("\nRanges ({}/10):", self.ranges.len());
        for range in &self.ranges {
            let marker = if range.displayed { "*" } else { " " };
            println!(
                "{marker} [{:>2}] {:<16} ch {:>5}..{:<5} {:>8.3}..{:<8.3} {units}  sum: {}",
                range.id,
                range.label,
                range.indices.start,
                range.indices.end,
                range.energy.start,
                range.energy.end,
                range.sum.describe()
            );
            if let Some(stats) = &range.image_stats {
                println!(
                    "       image {}x{}  total {:.1}  min {:.1}  max {:.1}",
                    stats.rows, stats.cols, stats.total, stats.min, stats.max
                );
            } else if let Some(image) = &range.image {
                println!("       image: {}", image.describe());
            }
        }

        if let Some(element) = &self.element {
            println!(
                "\nLines for {element} (default half-width {:.4} {units}):",
                self.default_half_width
            );
            for line in &self.lines {
                let range = line
                    .range
                    .map_or_else(|| "-".to_string(), |id| format!("[{id}]"));
                println!(
                    "  {:<4} {:>8.3}  {:>8.3}..{:<8.3} {range:>5}  sum: {}",
                    line.line.as_str(),
                    line.energy,
                    line.window.start,
                    line.window.end,
                    line.sum.describe()
                );
            }
        }

        if !self.failures.is_empty() {
            println!("\nFailed steps:");
            for failure in &self.failures {
                println!("  step {} ({}): {}", failure.step, failure.op, failure.message);
            }
        }
    }
}
