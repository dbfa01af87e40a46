//! Query features: parameters, plans, the builder and in-process matching.

pub mod features;
pub mod matcher;
pub mod params;
pub mod plan;

pub use features::QueryFeatures;
pub use params::{ParamValue, QueryParams};
pub use plan::{Condition, Filter, FilterClause, Projection, QueryPlan, RangeOp, SortDirection, SortKey};
