#![forbid(unsafe_code)]

//! Operator CLI for the pipeline gate daemon.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pipeline_gate_core::{IncomingEvent, ReportedAction, StepStatus};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pipeline-gate-ctl", version, about = "Talk to a pipeline gate daemon")]
struct Args {
    /// Daemon base URL.
    #[arg(long, global = true, default_value = "http://127.0.0.1:3100")]
    daemon: String,

    /// Log level (env-filter syntax).
    #[arg(long, global = true, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Deliver a step-state event.
    Event {
        #[arg(long, default_value = "")]
        project: String,
        #[arg(long)]
        program: String,
        #[arg(long)]
        pipeline: String,
        #[arg(long)]
        execution: String,
        /// Step kind, e.g. build, codeQuality, approval.
        #[arg(long)]
        action: String,
        /// NOT_STARTED, RUNNING, WAITING, FINISHED or ERROR.
        #[arg(long)]
        status: String,
    },
    /// Submit a decision (proceed or cancel) on an open gate.
    Decide { waiter_id: String, action: String },
    /// Resolve a waiter successfully without an event.
    EndQuietly { waiter_id: String },
    /// Interrupt a waiter; the pipeline execution is left alone.
    Abort { waiter_id: String },
    /// Show a live waiter.
    Show { waiter_id: String },
    /// Print a step's status and visible log.
    Log { step_id: String },
    /// List live waiters.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ctl = Ctl::new(&args.daemon);

    match args.cmd {
        Cmd::Event {
            project,
            program,
            pipeline,
            execution,
            action,
            status,
        } => {
            let status: StepStatus = serde_json::from_value(Value::String(status.clone()))
                .with_context(|| format!("invalid status {status:?}"))?;
            let event = IncomingEvent {
                source_project_id: project,
                program_id: program,
                pipeline_id: pipeline,
                execution_id: execution,
                step_action: ReportedAction::from(action),
                status,
            };
            print(&ctl.post("/v1/events/step-state", &event).await?)?;
        }
        Cmd::Decide { waiter_id, action } => {
            let body = serde_json::json!({ "action": action });
            print(&ctl.post(&format!("/v1/waiters/{waiter_id}/decision"), &body).await?)?;
        }
        Cmd::EndQuietly { waiter_id } => {
            print(&ctl.post(&format!("/v1/waiters/{waiter_id}/end-quietly"), &Value::Null).await?)?;
        }
        Cmd::Abort { waiter_id } => {
            print(&ctl.post(&format!("/v1/waiters/{waiter_id}/abort"), &Value::Null).await?)?;
        }
        Cmd::Show { waiter_id } => {
            print(&ctl.get(&format!("/v1/waiters/{waiter_id}")).await?)?;
        }
        Cmd::Log { step_id } => {
            let step = ctl.get(&format!("/v1/steps/{step_id}")).await?;
            println!("status: {}", step["status"].as_str().unwrap_or("?"));
            if let Some(failure) = step["failure"].as_str() {
                println!("failure: {failure}");
            }
            for line in step["log"].as_array().into_iter().flatten() {
                println!(
                    "[{}] {}",
                    line["key"].as_str().unwrap_or(""),
                    line["text"].as_str().unwrap_or("")
                );
            }
        }
        Cmd::List => {
            print(&ctl.get("/v1/waiters").await?)?;
        }
    }
    Ok(())
}

struct Ctl {
    http: reqwest::Client,
    base: String,
}

impl Ctl {
    fn new(daemon: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: daemon.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        tracing::debug!(path, "GET");
        read(self.http.get(format!("{}{path}", self.base)).send().await?).await
    }

    async fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> anyhow::Result<Value> {
        tracing::debug!(path, "POST");
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await?;
        read(resp).await
    }
}

/// Decodes a daemon response, surfacing its `{"error": ...}` body on failure.
async fn read(resp: reqwest::Response) -> anyhow::Result<Value> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let msg = body["error"].as_str().unwrap_or("no error message");
        bail!("daemon returned {status}: {msg}");
    }
    Ok(body)
}

fn print(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
