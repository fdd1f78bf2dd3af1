//! Transform pipeline
//!
//! Runs an ordered list of [`TransformStep`]s against a row sequence. Every
//! step is resolved against the catalog before any of them executes, so a
//! corrupt pipeline definition fails without doing work.

use tracing::debug;

use quarry_core::{Row, TransformError, TransformStep};

use crate::catalog::TransformKind;

/// Prefix of trace entries appended to result warnings.
pub const TRACE_PREFIX: &str = "transform:";

/// Output of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub rows: Vec<Row>,
    /// Names of the executed steps, in order, when trace capture is on.
    pub trace: Option<Vec<String>>,
}

impl PipelineOutput {
    /// Trace entries formatted for the warnings list.
    pub fn trace_warnings(&self) -> Vec<String> {
        self.trace
            .iter()
            .flatten()
            .map(|name| format!("{TRACE_PREFIX}{name}"))
            .collect()
    }
}

/// Resolve every step name against the catalog.
///
/// Positions in errors are 1-based.
pub fn resolve_steps(steps: &[TransformStep]) -> Result<Vec<TransformKind>, TransformError> {
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            TransformKind::from_name(&step.name).ok_or_else(|| TransformError::UnknownStep {
                name: step.name.clone(),
                position: index + 1,
                valid: TransformKind::catalog_names(),
            })
        })
        .collect()
}

/// Run `steps` over `rows`.
///
/// `rows` is only borrowed; each step consumes the previous step's output
/// by value and produces a new sequence.
pub fn run_pipeline(
    rows: &[Row],
    steps: &[TransformStep],
    capture_trace: bool,
) -> Result<PipelineOutput, TransformError> {
    let kinds = resolve_steps(steps)?;
    let mut current = rows.to_vec();
    let mut trace = capture_trace.then(|| Vec::with_capacity(steps.len()));

    for (index, (step, kind)) in steps.iter().zip(kinds).enumerate() {
        let position = index + 1;
        let input_len = current.len();
        current = kind
            .apply(&current, &step.params)
            .map_err(|reason| TransformError::InvalidParams {
                step: step.name.clone(),
                position,
                reason,
            })?;
        debug!(
            step = kind.name(),
            position,
            rows_in = input_len,
            rows_out = current.len(),
            "transform step applied"
        );
        if let Some(names) = trace.as_mut() {
            names.push(kind.name().to_string());
        }
    }

    Ok(PipelineOutput {
        rows: current,
        trace,
    })
}

// =============================================================================
// TESTS
// =============================================================================
