//! # tq-core — The "Grammar" of TELEQUERY
//!
//! Pure query composition for pipeline-style telemetry queries
//! (`requests | where ... | summarize ... | project ...`).
//!
//! A query is only understood at stage granularity: the [`PipelineQuery`]
//! is an ordered list of [`Stage`]s, classified once when parsed. On top of
//! it sit the rewriting operations, the [`CorrelationComposer`] that weaves
//! filters for other tables in through `let` bindings of correlation keys,
//! and the duration / time-window model shared by the hub.
//!
//! Nothing in this crate performs I/O.

pub mod composer;
pub mod duration;
pub mod error;
pub mod filter;
pub mod query;
pub mod search;
pub mod stage;
pub mod template;
pub mod window;

pub use composer::CorrelationComposer;
pub use duration::{Interval, ItemDuration, DEFAULT_SPLITS};
pub use error::QueryError;
pub use filter::{FilterPredicate, TelemetryTable};
pub use query::PipelineQuery;
pub use stage::{Stage, StageKind};
pub use window::TimeWindow;

/// Name of the column that correlates rows across telemetry tables.
pub const CORRELATION_KEY: &str = "operation_Id";
