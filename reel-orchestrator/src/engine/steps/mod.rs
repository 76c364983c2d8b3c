//! Step implementations
//!
//! One module per step kind. Each keeps its domain logic thin and leans on
//! the collaborators, dispatcher, or delivery queue for the real work; the
//! engine treats them all uniformly through the `Step` trait.

pub mod deliver;
pub mod download;
pub mod search;
pub mod transcode;

pub use deliver::DeliverStep;
pub use download::DownloadStep;
pub use search::SearchStep;
pub use transcode::TranscodeStep;

use reel_core::domain::execution::PipelineContext;
use uuid::Uuid;

use super::step::StepError;

/// Pull a uuid field the executor seeded into the context.
pub(crate) fn context_uuid(context: &PipelineContext, path: &str) -> Result<Uuid, StepError> {
    context
        .lookup(path)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| StepError::permanent(format!("context is missing {}", path)))
}

/// Pull a required string out of the context.
pub(crate) fn context_str<'a>(
    context: &'a PipelineContext,
    path: &str,
) -> Result<&'a str, StepError> {
    context
        .lookup(path)
        .and_then(|v| v.as_str())
        .ok_or_else(|| StepError::permanent(format!("context is missing {}", path)))
}
