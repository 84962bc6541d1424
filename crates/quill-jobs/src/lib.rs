//! Planning and generation jobs for the proposal service.
//!
//! Each job type is a thin [`JobAdapter`](quill_session::JobAdapter) over the
//! shared session engine; [`JobRunner`] binds a session to a transport channel
//! and resolves a [`JobOutcome`] when the job reaches a terminal phase.
mod endpoints;
mod generation;
mod planning;
mod runner;
mod section;

pub use endpoints::{EndpointError, ServiceEndpoints, DEFAULT_API_BASE_URL};
pub use generation::{
    DraftedProposal, GenerationAdapter, GENERATION_ENDPOINT, GENERATION_OWNER_FIELD,
};
pub use planning::{PlanningAdapter, ProposalPlan, PLANNING_ENDPOINT_PREFIX};
pub use runner::{JobCanceller, JobHandle, JobRunner, RunnerOptions};
pub use section::Section;

pub use quill_session::{JobCallbacks, JobOutcome, Phase, SessionError};
pub use quill_wire::{JobOwnerId, JobRequest, PartialKind, RequestContext};
