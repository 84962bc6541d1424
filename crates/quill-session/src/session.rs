use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use quill_transport::{ChannelEvent, InboundFrame};
use quill_wire::{
    decode_event, decode_event_bytes, encode_request, encode_stop, InboundEvent, JobRequest,
    PartialKind, WireError,
};
use serde_json::Value;
use thiserror::Error;

use crate::{JobAdapter, Phase};

pub const CONNECTION_CLOSED_UNEXPECTEDLY: &str = "connection closed unexpectedly";
pub const CONNECTION_CLOSED_EARLY: &str = "connection closed before the job finished";

/// Enumerates supported `SessionError` values.
///
/// These are contract violations reported at the call site; runtime job
/// failures go through [`JobCallbacks::on_failed`] instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("job session already started (phase: {phase})")]
    AlreadyStarted { phase: Phase },
    #[error("job session is not active (phase: {phase})")]
    NotActive { phase: Phase },
    #[error("job session expected phase {expected} but was {actual}")]
    UnexpectedPhase { expected: Phase, actual: Phase },
    #[error("failed to encode job request: {0}")]
    Encode(#[from] WireError),
}

/// Typed update delivered to subscribers.
#[derive(Debug)]
pub enum SessionUpdate<'a, T> {
    Partial { kind: PartialKind, snapshot: &'a T },
    Completed { result: &'a T },
    Failed { message: &'a str },
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    Completed(T),
    Failed(String),
    Cancelled,
}

impl<T> JobOutcome<T> {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Completed(_) => Phase::Completed,
            Self::Failed(_) => Phase::Failed,
            Self::Cancelled => Phase::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

type PartialCallback<T> = Box<dyn FnMut(PartialKind, &T) + Send>;
type CompleteCallback<T> = Box<dyn FnOnce(&T) + Send>;
type FailedCallback = Box<dyn FnOnce(&str) + Send>;
type UpdateHandler<T> = Box<dyn FnMut(&SessionUpdate<'_, T>) + Send>;

/// Caller callbacks registered by [`JobSession::start`]. The terminal
/// callbacks are `FnOnce`: each fires at most once per session.
pub struct JobCallbacks<T> {
    on_partial: Option<PartialCallback<T>>,
    on_complete: Option<CompleteCallback<T>>,
    on_failed: Option<FailedCallback>,
}

impl<T> Default for JobCallbacks<T> {
    fn default() -> Self {
        Self {
            on_partial: None,
            on_complete: None,
            on_failed: None,
        }
    }
}

impl<T> JobCallbacks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives the updated accumulator after every merged unit.
    pub fn on_partial<F>(mut self, handler: F) -> Self
    where
        F: FnMut(PartialKind, &T) + Send + 'static,
    {
        self.on_partial = Some(Box::new(handler));
        self
    }

    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_complete = Some(Box::new(handler));
        self
    }

    pub fn on_failed<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&str) + Send + 'static,
    {
        self.on_failed = Some(Box::new(handler));
        self
    }
}

/// Handle returned by [`JobSession::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What the driver must do to put the request on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub endpoint_path: String,
    pub initiation_frame: String,
}

/// Result of a successful [`JobSession::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    pub previous: Phase,
    /// Best-effort stop frame; present only when the channel was open.
    pub stop_frame: Option<String>,
}

/// Last keep-alive seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStatus {
    pub sequence: u64,
    pub received_at: Instant,
}

/// Effect of one event on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The session was not streaming; nothing changed.
    Ignored,
    /// Heartbeat, unknown frame or unusable unit; the session keeps streaming.
    Absorbed,
    Merged(PartialKind),
    Terminated(Phase),
}

/// One in-flight job, generic over the job type.
pub struct JobSession<A: JobAdapter> {
    adapter: A,
    phase: Phase,
    request: Option<JobRequest>,
    accumulator: A::Accumulator,
    partials_applied: usize,
    failure: Option<String>,
    last_heartbeat: Option<HeartbeatStatus>,
    callbacks: Option<JobCallbacks<A::Accumulator>>,
    subscribers: Vec<(SubscriptionId, UpdateHandler<A::Accumulator>)>,
    next_subscription: u64,
}

impl<A: JobAdapter> JobSession<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            phase: Phase::Idle,
            request: None,
            accumulator: A::Accumulator::default(),
            partials_applied: 0,
            failure: None,
            last_heartbeat: None,
            callbacks: None,
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn accumulator(&self) -> &A::Accumulator {
        &self.accumulator
    }

    pub fn request(&self) -> Option<&JobRequest> {
        self.request.as_ref()
    }

    pub fn partials_applied(&self) -> usize {
        self.partials_applied
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn last_heartbeat(&self) -> Option<HeartbeatStatus> {
        self.last_heartbeat
    }

    /// Adds an update subscriber. Subscribers are dropped once the session
    /// reaches a terminal phase.
    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionUpdate<'_, A::Accumulator>) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription = self.next_subscription.saturating_add(1);
        self.subscribers.push((id, Box::new(handler)));
        id
    }

    /// Removes a subscriber; returns false when it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    /// Idle -> Requested. Returns the endpoint path and the initiation frame
    /// the driver must send once the channel opens.
    pub fn start(
        &mut self,
        request: JobRequest,
        callbacks: JobCallbacks<A::Accumulator>,
    ) -> Result<OpenRequest, SessionError> {
        if self.phase != Phase::Idle {
            return Err(SessionError::AlreadyStarted { phase: self.phase });
        }
        let initiation_frame = encode_request(&request, self.adapter.owner_placement())?;
        let endpoint_path = self.adapter.endpoint_path(&request);

        tracing::debug!(
            adapter = self.adapter.name(),
            job_owner_id = request.job_owner_id().as_str(),
            endpoint = endpoint_path.as_str(),
            "job session requested"
        );
        self.request = Some(request);
        self.callbacks = Some(callbacks);
        self.phase = Phase::Requested;
        Ok(OpenRequest {
            endpoint_path,
            initiation_frame,
        })
    }

    /// Requested -> Streaming, once the channel is open and the initiation
    /// frame has been sent.
    pub fn request_sent(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Requested {
            return Err(SessionError::UnexpectedPhase {
                expected: Phase::Requested,
                actual: self.phase,
            });
        }
        self.phase = Phase::Streaming;
        tracing::debug!(adapter = self.adapter.name(), "job session streaming");
        Ok(())
    }

    /// Applies one channel event.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Dispatch {
        match event {
            ChannelEvent::Opened => {
                if self.phase.is_active() {
                    Dispatch::Absorbed
                } else {
                    Dispatch::Ignored
                }
            }
            ChannelEvent::Message(InboundFrame::Text(text)) => self.dispatch(decode_event(&text)),
            ChannelEvent::Message(InboundFrame::Binary(bytes)) => {
                self.dispatch(decode_event_bytes(&bytes))
            }
            ChannelEvent::Error(detail) => {
                if !self.phase.is_active() {
                    return Dispatch::Ignored;
                }
                self.fail(format!("connection error: {detail}"))
            }
            ChannelEvent::Closed {
                clean,
                code,
                reason,
            } => {
                if !self.phase.is_active() {
                    return Dispatch::Ignored;
                }
                tracing::debug!(
                    adapter = self.adapter.name(),
                    clean,
                    code,
                    reason = reason.as_str(),
                    "job channel closed before a terminal frame"
                );
                let message = if clean {
                    CONNECTION_CLOSED_EARLY
                } else {
                    CONNECTION_CLOSED_UNEXPECTEDLY
                };
                self.fail(message.to_string())
            }
        }
    }

    /// Applies one decoded server event. Only a streaming session reacts;
    /// everything else, including stray frames after a terminal phase, is
    /// ignored.
    pub fn dispatch(&mut self, event: InboundEvent) -> Dispatch {
        if self.phase != Phase::Streaming {
            tracing::debug!(
                adapter = self.adapter.name(),
                phase = self.phase.as_str(),
                event = event.label(),
                "ignoring job event outside streaming phase"
            );
            return Dispatch::Ignored;
        }

        match event {
            InboundEvent::Heartbeat { sequence } => {
                self.last_heartbeat = Some(HeartbeatStatus {
                    sequence,
                    received_at: Instant::now(),
                });
                tracing::trace!(adapter = self.adapter.name(), sequence, "job heartbeat");
                Dispatch::Absorbed
            }
            InboundEvent::Unknown { reason } => {
                tracing::warn!(
                    adapter = self.adapter.name(),
                    reason = reason.as_str(),
                    "ignoring unrecognized job frame"
                );
                Dispatch::Absorbed
            }
            InboundEvent::Partial { kind, unit } => self.apply_partial(kind, unit),
            InboundEvent::Complete { result } => self.complete(result),
            InboundEvent::Failed { message } => self.fail(message),
        }
    }

    /// Requested/Streaming -> Cancelled. The caller sends the returned stop
    /// frame if any and closes the channel; neither affects the local result.
    pub fn cancel(&mut self) -> Result<CancelOutcome, SessionError> {
        let previous = self.phase;
        if !previous.is_active() {
            return Err(SessionError::NotActive { phase: previous });
        }
        self.phase = Phase::Cancelled;
        self.callbacks = None;
        self.subscribers.clear();
        tracing::info!(
            adapter = self.adapter.name(),
            previous = previous.as_str(),
            "job cancelled"
        );
        Ok(CancelOutcome {
            previous,
            stop_frame: (previous == Phase::Streaming).then(encode_stop),
        })
    }

    /// Terminal result, or `None` while the job is still live.
    pub fn outcome(&self) -> Option<JobOutcome<A::Accumulator>> {
        match self.phase {
            Phase::Completed => Some(JobOutcome::Completed(self.accumulator.clone())),
            Phase::Failed => Some(JobOutcome::Failed(self.failure.clone().unwrap_or_default())),
            Phase::Cancelled => Some(JobOutcome::Cancelled),
            Phase::Idle | Phase::Requested | Phase::Streaming => None,
        }
    }

    fn apply_partial(&mut self, kind: PartialKind, unit: Value) -> Dispatch {
        if let Err(error) = self.adapter.merge(&mut self.accumulator, kind, unit) {
            tracing::warn!(
                adapter = self.adapter.name(),
                kind = kind.as_str(),
                %error,
                "ignoring unusable job unit"
            );
            return Dispatch::Absorbed;
        }
        self.partials_applied += 1;

        if let Some(on_partial) = self
            .callbacks
            .as_mut()
            .and_then(|callbacks| callbacks.on_partial.as_mut())
        {
            let snapshot = &self.accumulator;
            guarded("on_partial", || on_partial(kind, snapshot));
        }
        emit(
            &mut self.subscribers,
            &SessionUpdate::Partial {
                kind,
                snapshot: &self.accumulator,
            },
        );
        Dispatch::Merged(kind)
    }

    fn complete(&mut self, result: Value) -> Dispatch {
        // A bare completion keeps what the client accumulated.
        if !result.is_null() {
            match self.adapter.decode_result(result) {
                Ok(accumulator) => self.accumulator = accumulator,
                Err(error) => return self.fail(format!("malformed completion payload: {error}")),
            }
        }
        self.phase = Phase::Completed;
        tracing::info!(
            adapter = self.adapter.name(),
            partials = self.partials_applied,
            "job completed"
        );

        let on_complete = self
            .callbacks
            .take()
            .and_then(|callbacks| callbacks.on_complete);
        if let Some(on_complete) = on_complete {
            let result = &self.accumulator;
            guarded("on_complete", || on_complete(result));
        }
        emit(
            &mut self.subscribers,
            &SessionUpdate::Completed {
                result: &self.accumulator,
            },
        );
        self.subscribers.clear();
        Dispatch::Terminated(Phase::Completed)
    }

    fn fail(&mut self, message: String) -> Dispatch {
        self.phase = Phase::Failed;
        tracing::info!(
            adapter = self.adapter.name(),
            message = message.as_str(),
            "job failed"
        );

        let on_failed = self
            .callbacks
            .take()
            .and_then(|callbacks| callbacks.on_failed);
        if let Some(on_failed) = on_failed {
            guarded("on_failed", || on_failed(&message));
        }
        emit(
            &mut self.subscribers,
            &SessionUpdate::Failed { message: &message },
        );
        self.subscribers.clear();
        self.failure = Some(message);
        Dispatch::Terminated(Phase::Failed)
    }
}

fn emit<T>(subscribers: &mut [(SubscriptionId, UpdateHandler<T>)], update: &SessionUpdate<'_, T>) {
    for (_, handler) in subscribers.iter_mut() {
        guarded("subscriber", || handler(update));
    }
}

fn guarded(callback: &'static str, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        tracing::warn!(callback, "job callback panicked");
    }
}
