//! JSON session scripts.
//!
//! A script names the dataset to open and lists steps, each tagged by `op`:
//!
//! ```json
//! {
//!   "dataset": "synthetic",
//!   "steps": [
//!     { "op": "add_range", "request": { "bounds": { "indices": { "start": 100, "end": 200 } } } },
//!     { "op": "set_displayed", "id": 1 },
//!     { "op": "select_element", "symbol": "Fe" },
//!     { "op": "toggle_line", "line": "Ka1" }
//!   ]
//! }
//! ```

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use specrange_core::{
    DataService, DatasetRef, LineName, RangeBounds, RangeId, RangeRequest, SessionCommand,
};
use specrange_fetch::{describe_toggle_error, SelectionEngine, WidthSide};

/// A parsed script.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Dataset opened before the first step.
    #[serde(default)]
    pub dataset: Option<String>,
    /// Signal index within the dataset.
    #[serde(default)]
    pub signal: usize,
    pub steps: Vec<Step>,
}

/// One scripted action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    OpenDataset {
        dataset: String,
        #[serde(default)]
        signal: usize,
    },
    CloseDataset,
    AddRange {
        request: RangeRequest,
    },
    UpdateRange {
        id: RangeId,
        bounds: RangeBounds,
    },
    RenameRange {
        id: RangeId,
        label: String,
    },
    RemoveRange {
        id: RangeId,
    },
    SetDisplayed {
        #[serde(default)]
        id: Option<RangeId>,
    },
    Clear,
    SelectElement {
        #[serde(default)]
        symbol: Option<String>,
    },
    ToggleLine {
        line: LineName,
    },
    UntoggleLine {
        line: LineName,
    },
    SetLineWidth {
        line: LineName,
        side: WidthSide,
        #[serde(default)]
        value: Option<f64>,
    },
    /// Waits for pending queries before the next step.
    Settle,
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::OpenDataset { .. } => "open_dataset",
            Step::CloseDataset => "close_dataset",
            Step::AddRange { .. } => "add_range",
            Step::UpdateRange { .. } => "update_range",
            Step::RenameRange { .. } => "rename_range",
            Step::RemoveRange { .. } => "remove_range",
            Step::SetDisplayed { .. } => "set_displayed",
            Step::Clear => "clear",
            Step::SelectElement { .. } => "select_element",
            Step::ToggleLine { .. } => "toggle_line",
            Step::UntoggleLine { .. } => "untoggle_line",
            Step::SetLineWidth { .. } => "set_line_width",
            Step::Settle => "settle",
        }
    }
}

/// A step that was rejected. Later steps still run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: usize,
    pub op: &'static str,
    pub message: String,
}

/// Runs every step against `engine`, collecting rejected steps.
pub fn execute<S: DataService + ?Sized + 'static>(
    engine: &mut SelectionEngine<S>,
    script: &Script,
    settle_timeout: Duration,
) -> Vec<StepFailure> {
    let mut failures = Vec::new();

    if let Some(dataset) = &script.dataset {
        if let Err(err) = engine.open_dataset(DatasetRef::new(dataset), script.signal) {
            warn!("could not open dataset '{dataset}': {err}");
            failures.push(StepFailure {
                step: 0,
                op: "open_dataset",
                message: err.to_string(),
            });
        }
    }

    for (index, step) in script.steps.iter().enumerate() {
        let number = index + 1;
        if let Err(message) = run_step(engine, step, settle_timeout) {
            warn!("step {number} ({}) failed: {message}", step.name());
            failures.push(StepFailure {
                step: number,
                op: step.name(),
                message,
            });
        }
    }

    if !engine.settle(settle_timeout) {
        warn!("queries still pending after {settle_timeout:?}");
    }
    info!(
        "script finished: {} step(s), {} failure(s)",
        script.steps.len(),
        failures.len()
    );
    failures
}

fn run_step<S: DataService + ?Sized + 'static>(
    engine: &mut SelectionEngine<S>,
    step: &Step,
    settle_timeout: Duration,
) -> Result<(), String> {
    let command = match step {
        Step::OpenDataset { dataset, signal } => {
            return engine
                .open_dataset(DatasetRef::new(dataset), *signal)
                .map_err(|err| err.to_string());
        }
        Step::CloseDataset => {
            engine.session_mut().close_dataset();
            engine.sync();
            return Ok(());
        }
        Step::SelectElement { symbol } => {
            let element = match symbol {
                Some(symbol) => Some(
                    specrange_io::element_by_symbol(symbol)
                        .ok_or_else(|| format!("unknown element '{symbol}'"))?,
                ),
                None => None,
            };
            return engine.select_element(element).map_err(|err| err.to_string());
        }
        Step::ToggleLine { line } => {
            return engine
                .toggle_line(*line)
                .map(|_| ())
                .map_err(|err| describe_toggle_error(*line, &err));
        }
        Step::UntoggleLine { line } => {
            return engine
                .untoggle_line(*line)
                .map(|_| ())
                .map_err(|err| err.to_string());
        }
        Step::SetLineWidth { line, side, value } => {
            return engine
                .set_line_width(*line, *side, *value)
                .map_err(|err| err.to_string());
        }
        Step::Settle => {
            if !engine.settle(settle_timeout) {
                warn!("settle step timed out after {settle_timeout:?}");
            }
            return Ok(());
        }
        Step::AddRange { request } => SessionCommand::AddRange {
            request: request.clone(),
        },
        Step::UpdateRange { id, bounds } => SessionCommand::UpdateRange {
            id: *id,
            bounds: *bounds,
        },
        Step::RenameRange { id, label } => SessionCommand::RenameRange {
            id: *id,
            label: label.clone(),
        },
        Step::RemoveRange { id } => SessionCommand::RemoveRange { id: *id },
        Step::SetDisplayed { id } => SessionCommand::SetDisplayed { id: *id },
        Step::Clear => SessionCommand::Clear,
    };
    engine.apply(command).map_err(|err| err.to_string())
}
