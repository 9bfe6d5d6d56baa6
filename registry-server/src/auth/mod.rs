pub mod extractor;
pub mod gate;

pub use extractor::Caller;
pub use gate::{AuthorizationGate, Capability};
