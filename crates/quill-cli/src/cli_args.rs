use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use quill_jobs::{RunnerOptions, DEFAULT_API_BASE_URL};
use quill_transport::DEFAULT_CONNECT_TIMEOUT;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_one_off_entry(value: &str) -> Result<(String, String), String> {
    let Some((key, entry)) = value.split_once('=') else {
        return Err(format!("expected KEY=VALUE, got '{value}'"));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err("one-off key cannot be empty".to_string());
    }
    Ok((key.to_string(), entry.to_string()))
}

#[derive(Debug, Parser)]
#[command(
    name = "quill",
    about = "Stream proposal planning and generation jobs from the proposal service",
    version
)]
pub struct Cli {
    #[arg(
        long = "api-base-url",
        env = "QUILL_API_BASE_URL",
        default_value = DEFAULT_API_BASE_URL,
        global = true,
        help = "HTTP(S) base URL of the proposal service"
    )]
    pub api_base_url: String,

    #[arg(
        long = "ws-base-url",
        env = "QUILL_WS_BASE_URL",
        global = true,
        help = "WS(S) base URL for job channels. Derived from --api-base-url when omitted"
    )]
    pub ws_base_url: Option<String>,

    #[arg(
        long = "user-id",
        env = "QUILL_USER_ID",
        global = true,
        help = "User id forwarded with every job request"
    )]
    pub user_id: Option<String>,

    #[arg(
        long = "stall-timeout-ms",
        env = "QUILL_STALL_TIMEOUT_MS",
        default_value_t = 0,
        global = true,
        help = "Fail a streaming job after this many milliseconds without any frame. 0 disables the watchdog"
    )]
    pub stall_timeout_ms: u64,

    #[arg(
        long = "connect-timeout-ms",
        env = "QUILL_CONNECT_TIMEOUT_MS",
        default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        value_parser = parse_positive_u64,
        global = true,
        help = "Timeout for opening the job channel"
    )]
    pub connect_timeout_ms: u64,

    #[arg(
        long,
        global = true,
        help = "Print only the final outcome as a JSON document on stdout"
    )]
    pub json: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

impl Cli {
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            stall_timeout: (self.stall_timeout_ms > 0)
                .then(|| Duration::from_millis(self.stall_timeout_ms)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Stream a two-stage plan (pre-plan, then plan) for a proposal.
    Plan(JobArgs),
    /// Stream a drafted proposal section by section.
    Generate(JobArgs),
}

#[derive(Debug, Args)]
pub struct JobArgs {
    #[arg(
        long = "owner-id",
        help = "Template or proposal id the job runs against"
    )]
    pub owner_id: String,

    #[arg(long, help = "Free-text pitch describing the proposal")]
    pub pitch: Option<String>,

    #[arg(
        long = "one-off",
        value_name = "KEY=VALUE",
        value_parser = parse_one_off_entry,
        help = "Extra request field; repeat for several. A repeated key keeps the last value"
    )]
    pub one_off: Vec<(String, String)>,
}
