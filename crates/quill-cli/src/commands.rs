use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use quill_jobs::{
    GenerationAdapter, JobCallbacks, JobOutcome, JobOwnerId, JobRequest, JobRunner,
    PlanningAdapter, RequestContext, ServiceEndpoints,
};
use quill_session::JobAdapter;
use quill_transport::WebSocketTransport;
use serde::Serialize;

use crate::cli_args::{Cli, CliCommand, JobArgs};
use crate::render::{outcome_document, progress_line, JobView};

pub(crate) async fn run_cli(cli: Cli) -> Result<ExitCode> {
    let endpoints = ServiceEndpoints::resolve(&cli.api_base_url, cli.ws_base_url.as_deref())
        .context("invalid service endpoint configuration")?;
    let transport = WebSocketTransport::new(cli.connect_timeout());
    let runner = JobRunner::new(Arc::new(transport), endpoints, cli.runner_options());
    let context = cli
        .user_id
        .as_deref()
        .map(RequestContext::for_user)
        .unwrap_or_default();

    let completed = match &cli.command {
        CliCommand::Plan(args) => {
            run_job(&runner, PlanningAdapter, build_request(args, context)?, cli.json).await?
        }
        CliCommand::Generate(args) => {
            run_job(&runner, GenerationAdapter, build_request(args, context)?, cli.json).await?
        }
    };
    Ok(if completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_request(args: &JobArgs, context: RequestContext) -> Result<JobRequest> {
    let owner_id = JobOwnerId::new(args.owner_id.as_str()).context("invalid --owner-id")?;
    let mut request = JobRequest::new(owner_id).with_context(context);
    if let Some(pitch) = &args.pitch {
        request = request.with_pitch(pitch.as_str());
    }
    for (key, value) in &args.one_off {
        request = request.with_one_off(key.as_str(), value.as_str());
    }
    Ok(request)
}

async fn run_job<A>(runner: &JobRunner, adapter: A, request: JobRequest, json: bool) -> Result<bool>
where
    A: JobAdapter,
    A::Accumulator: Serialize + JobView,
{
    let job = adapter.name();
    let callbacks = JobCallbacks::new().on_partial(move |kind, snapshot: &A::Accumulator| {
        if !json {
            eprintln!("{}", progress_line(kind, snapshot));
        }
    });
    let handle = runner
        .spawn(adapter, request, callbacks)
        .with_context(|| format!("failed to start {job} job"))?;

    let canceller = handle.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(error) = canceller.cancel().await {
                tracing::debug!(%error, "interrupt arrived after the job settled");
            }
        }
    });
    let outcome = handle.outcome().await;
    interrupt.abort();

    if json {
        let document = outcome_document(job, &outcome)?;
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        match &outcome {
            JobOutcome::Completed(result) => println!("{}", result.render_text()),
            JobOutcome::Failed(message) => eprintln!("{job} job failed: {message}"),
            JobOutcome::Cancelled => eprintln!("{job} job cancelled"),
        }
    }
    Ok(outcome.is_completed())
}
