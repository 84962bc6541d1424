//! Wire contract for the proposal service job sockets.
//!
//! Encodes the single client initiation frame and the stop frame, and decodes
//! every server frame into an [`InboundEvent`] without ever failing: frames the
//! client cannot classify come back as [`InboundEvent::Unknown`].
mod event;
mod request;

pub use event::{decode_event, decode_event_bytes, InboundEvent, PartialKind};
pub use request::{
    encode_request, encode_stop, JobOwnerId, JobRequest, OwnerIdPlacement, RequestContext,
    WireError, STOP_FRAME_TYPE,
};
