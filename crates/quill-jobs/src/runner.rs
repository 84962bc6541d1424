use std::sync::Arc;
use std::time::Duration;

use quill_session::{JobAdapter, JobCallbacks, JobOutcome, JobSession, Phase, SessionError};
use quill_transport::{ChannelEvent, JobChannel, Transport, WebSocketTransport};
use quill_wire::JobRequest;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::ServiceEndpoints;

const COMMAND_QUEUE_CAPACITY: usize = 8;
const DRIVER_STOPPED: &str = "job driver stopped before the job finished";

/// Runtime knobs for [`JobRunner`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Fails a streaming job when no channel event arrives for this long.
    /// `None` leaves silent jobs running until the server closes them.
    pub stall_timeout: Option<Duration>,
}

enum RunnerCommand {
    Cancel {
        ack: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Spawns job sessions onto tokio tasks, one channel per job.
#[derive(Clone)]
pub struct JobRunner {
    transport: Arc<dyn Transport>,
    endpoints: ServiceEndpoints,
    options: RunnerOptions,
}

impl JobRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: ServiceEndpoints,
        options: RunnerOptions,
    ) -> Self {
        Self {
            transport,
            endpoints,
            options,
        }
    }

    pub fn websocket(endpoints: ServiceEndpoints, options: RunnerOptions) -> Self {
        Self::new(Arc::new(WebSocketTransport::default()), endpoints, options)
    }

    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }

    /// Starts one job. Must be called from within a tokio runtime.
    pub fn spawn<A: JobAdapter>(
        &self,
        adapter: A,
        request: JobRequest,
        callbacks: JobCallbacks<A::Accumulator>,
    ) -> Result<JobHandle<A::Accumulator>, SessionError> {
        self.spawn_session(JobSession::new(adapter), request, callbacks)
    }

    /// Starts a session prepared by the caller, e.g. one that already has
    /// subscribers attached.
    pub fn spawn_session<A: JobAdapter>(
        &self,
        mut session: JobSession<A>,
        request: JobRequest,
        callbacks: JobCallbacks<A::Accumulator>,
    ) -> Result<JobHandle<A::Accumulator>, SessionError> {
        let open = session.start(request, callbacks)?;
        let url = self.endpoints.ws_url(&open.endpoint_path);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (phase_tx, phase_rx) = watch::channel(session.phase());
        let (outcome_tx, outcome_rx) = oneshot::channel();

        tracing::debug!(
            adapter = session.adapter().name(),
            url = url.as_str(),
            "spawning job driver"
        );
        let driver = JobDriver {
            transport: Arc::clone(&self.transport),
            url,
            session,
            initiation_frame: open.initiation_frame,
            commands: command_rx,
            commands_open: true,
            phase: phase_tx,
            stall_timeout: self.options.stall_timeout,
        };
        tokio::spawn(async move {
            let outcome = driver.run().await;
            let _ = outcome_tx.send(outcome);
        });

        Ok(JobHandle {
            canceller: JobCanceller {
                commands: command_tx,
                phase: phase_rx,
            },
            outcome: outcome_rx,
        })
    }
}

/// Cloneable cancel/phase handle for a running job.
#[derive(Clone)]
pub struct JobCanceller {
    commands: mpsc::Sender<RunnerCommand>,
    phase: watch::Receiver<Phase>,
}

impl JobCanceller {
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Resolves once the job is locally `Cancelled`; the stop frame and
    /// channel close happen afterwards, best-effort.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .commands
            .send(RunnerCommand::Cancel { ack: ack_tx })
            .await
            .is_err()
        {
            return Err(SessionError::NotActive {
                phase: self.phase(),
            });
        }
        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::NotActive {
                phase: self.phase(),
            }),
        }
    }

    /// Waits until the job leaves its current phase, returning the new one.
    /// Returns the last known phase once the driver has stopped.
    pub async fn phase_changed(&mut self) -> Phase {
        let _ = self.phase.changed().await;
        *self.phase.borrow_and_update()
    }
}

/// Caller side of one spawned job.
pub struct JobHandle<T> {
    canceller: JobCanceller,
    outcome: oneshot::Receiver<JobOutcome<T>>,
}

impl<T> JobHandle<T> {
    pub fn canceller(&self) -> JobCanceller {
        self.canceller.clone()
    }

    pub fn phase(&self) -> Phase {
        self.canceller.phase()
    }

    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.canceller.cancel().await
    }

    pub async fn outcome(self) -> JobOutcome<T> {
        self.outcome
            .await
            .unwrap_or_else(|_| JobOutcome::Failed(DRIVER_STOPPED.to_string()))
    }
}

struct JobDriver<A: JobAdapter> {
    transport: Arc<dyn Transport>,
    url: String,
    session: JobSession<A>,
    initiation_frame: String,
    commands: mpsc::Receiver<RunnerCommand>,
    commands_open: bool,
    phase: watch::Sender<Phase>,
    stall_timeout: Option<Duration>,
}

impl<A: JobAdapter> JobDriver<A> {
    async fn run(mut self) -> JobOutcome<A::Accumulator> {
        let Some(mut channel) = self.open_channel().await else {
            return self.finish();
        };
        let mut last_activity = Instant::now();

        while !self.session.phase().is_terminal() {
            let stall_deadline = self
                .stall_timeout
                .filter(|_| self.session.phase() == Phase::Streaming)
                .map(|timeout| last_activity + timeout);

            tokio::select! {
                biased;
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(RunnerCommand::Cancel { ack }) => {
                        self.handle_cancel(channel.as_mut(), ack).await;
                    }
                    None => self.commands_open = false,
                },
                event = channel.next_event() => {
                    last_activity = Instant::now();
                    self.apply(channel.as_mut(), event).await;
                }
                _ = stall_elapsed(stall_deadline) => {
                    let timeout_ms = u64::try_from(self.stall_timeout.unwrap_or_default().as_millis())
                        .unwrap_or(u64::MAX);
                    tracing::warn!(
                        adapter = self.session.adapter().name(),
                        timeout_ms,
                        "job stalled"
                    );
                    self.session.handle_channel_event(ChannelEvent::Error(format!(
                        "stalled: no frame received for {timeout_ms}ms"
                    )));
                }
            }
            self.publish_phase();
        }

        channel.close().await;
        self.finish()
    }

    /// Opens the channel while still honouring cancel requests. Returns
    /// `None` when the job was cancelled before the channel opened.
    async fn open_channel(&mut self) -> Option<Box<dyn JobChannel>> {
        let transport = Arc::clone(&self.transport);
        let url = self.url.clone();
        let open = transport.open(&url);
        tokio::pin!(open);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(RunnerCommand::Cancel { ack }) => {
                        let result = self.session.cancel().map(|_| ());
                        self.publish_phase();
                        let _ = ack.send(result);
                        if self.session.phase().is_terminal() {
                            return None;
                        }
                    }
                    None => self.commands_open = false,
                },
                channel = &mut open => return Some(channel),
            }
        }
    }

    async fn apply(&mut self, channel: &mut dyn JobChannel, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Opened) if self.session.phase() == Phase::Requested => {
                match channel.send(self.initiation_frame.clone()).await {
                    Ok(()) => {
                        if let Err(error) = self.session.request_sent() {
                            tracing::warn!(%error, "job request sent in unexpected phase");
                        }
                    }
                    Err(error) => {
                        self.session.handle_channel_event(ChannelEvent::Error(format!(
                            "failed to send job request: {error}"
                        )));
                    }
                }
            }
            Some(event) => {
                self.session.handle_channel_event(event);
            }
            None => {
                self.session
                    .handle_channel_event(ChannelEvent::unclean_close("channel ended"));
            }
        }
    }

    async fn handle_cancel(
        &mut self,
        channel: &mut dyn JobChannel,
        ack: oneshot::Sender<Result<(), SessionError>>,
    ) {
        match self.session.cancel() {
            Ok(outcome) => {
                self.publish_phase();
                let _ = ack.send(Ok(()));
                if let Some(stop_frame) = outcome.stop_frame {
                    if let Err(error) = channel.send(stop_frame).await {
                        tracing::debug!(%error, "stop frame was not delivered");
                    }
                }
                channel.close().await;
            }
            Err(error) => {
                let _ = ack.send(Err(error));
            }
        }
    }

    fn publish_phase(&self) {
        self.phase.send_replace(self.session.phase());
    }

    fn finish(self) -> JobOutcome<A::Accumulator> {
        self.publish_phase();
        self.session
            .outcome()
            .unwrap_or_else(|| JobOutcome::Failed(DRIVER_STOPPED.to_string()))
    }
}

async fn stall_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
