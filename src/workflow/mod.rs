pub mod job_ctx;
pub mod unit_flow;

pub use job_ctx::JobCtx;
pub use unit_flow::{UnitFlow, UnitObserver, UnitOutcome};
