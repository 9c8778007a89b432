mod context;
mod pattern;
mod provenance;
mod result;
mod status;
mod trace;

pub use context::ExecutionContext;
pub use pattern::{
    is_reserved_key, Pattern, Step, CTX_ROOT, EXECUTE_PATTERN, NAMESPACE_KEY, RESERVED_KEYS,
    STATE_ROOT,
};
pub use provenance::Provenance;
pub use result::{ErrorDetail, ErrorKind, PatternResult};
pub use status::{PatternStatus, StepStatus};
pub use trace::{StepOutcome, Trace, TraceEntry};
