//! QUARRY Transform - Closed Row Transform Catalog
//!
//! Only the operations enumerated by [`TransformKind`] can run against
//! query rows. Steps are resolved by exact name; anything else is a
//! [`quarry_core::TransformError`].

pub mod catalog;
pub mod pipeline;

pub use catalog::{
    filter_equals, rename_columns, rolling_avg, select, share_of_total, to_percent, top_n, yoy,
    FilterEqualsParams, RenameColumnsParams, RollingAvgParams, SelectParams, ShareOfTotalParams,
    ToPercentParams, TopNParams, TransformKind, YoyParams,
};
pub use pipeline::{resolve_steps, run_pipeline, PipelineOutput, TRACE_PREFIX};
