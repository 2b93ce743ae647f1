//! Domain models for health metric sync

mod metric;
mod point;
mod run;
mod sync_state;
mod window;

pub use metric::{
    AggregationMode, CompositeField, MetricDescriptor, MetricKind, MetricRegistry, scopes,
};
pub use point::{DailyTotal, DataPoint, Number, PointValue};
pub use run::{MetricStatus, RunState, RunSummary, SyncMode, SyncResult, SyncRun};
pub use sync_state::SyncState;
pub use window::TimeWindow;
