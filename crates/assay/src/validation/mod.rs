//! Findings and the engines that produce them.

mod cancel;
mod engine;
mod evaluator;
mod finding;
mod stream;

pub use cancel::CancelToken;
pub use engine::ValidationEngine;
pub use evaluator::{FAILURE_MESSAGE, TIMEOUT_MESSAGE, UNPARSEABLE_MESSAGE};
pub use finding::{Evidence, Finding, Phase, RemediationStatus, Severity};
pub use stream::StreamValidator;
