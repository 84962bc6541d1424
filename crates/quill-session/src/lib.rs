//! Job session state machine shared by every streaming job type.
//!
//! A [`JobSession`] owns one in-flight job. It performs no I/O: whoever drives
//! the channel feeds it [`ChannelEvent`](quill_transport::ChannelEvent)s or
//! decoded [`InboundEvent`](quill_wire::InboundEvent)s, and the session applies
//! them in arrival order to the adapter's accumulator.
mod adapter;
mod phase;
mod session;

pub use adapter::{JobAdapter, MergeError};
pub use phase::Phase;
pub use session::{
    CancelOutcome, Dispatch, HeartbeatStatus, JobCallbacks, JobOutcome, JobSession, OpenRequest,
    SessionError, SessionUpdate, SubscriptionId, CONNECTION_CLOSED_EARLY,
    CONNECTION_CLOSED_UNEXPECTEDLY,
};
