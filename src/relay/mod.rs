//! Request relay with failover
//!
//! One request is attempted against a selected channel through a
//! `Provider`; failures are classified and, when retryable, retried on the
//! remaining channels by the `RetryOrchestrator`.

pub mod classifier;
pub mod disable;
pub mod events;
pub mod openai;
pub mod orchestrator;
pub mod provider;
pub mod sanitize;
pub mod state;

pub use self::classifier::{classify, ClassifyContext, FatalKind, Verdict};
pub use self::disable::{AutoDisabler, ChannelDisabler, LocalOnlyDisabler};
pub use self::events::{RetryEvent, RetryTrace};
pub use self::openai::OpenAiCompatibleProvider;
pub use self::orchestrator::{FailureReason, RelayFailure, RelayOutcome, RetryOrchestrator};
pub use self::provider::{
    Completion, Provider, RelayEndpoint, RelayRequest, ResponseSink, UpstreamError,
};
