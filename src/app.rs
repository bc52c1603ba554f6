use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cli::{usage_text, version_text};
use crate::command::AppCommand;
use crate::command_handlers::{
    cancel_run, crawl, list_runs, pause_run, resume_run, router_detail, run_status, topology,
};
use crate::config::CrawlSettings;
use crate::crawler::{RouterDetail, RunState, Topology};
use crate::snmp::RouterProbe;

pub type OutputHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type EventHook = Arc<dyn Fn(&AppEvent) + Send + Sync>;

/// Execution context shared by every command: where the store lives, how
/// routers are probed and where output goes.
#[derive(Clone)]
pub struct AppContext {
    db_path: PathBuf,
    crawl_settings: CrawlSettings,
    probe: Option<Arc<dyn RouterProbe>>,
    output_hook: OutputHook,
    event_hook: EventHook,
    interrupt_flag: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppEvent {
    Info { message: String },
    Warn { message: String },
    RunStarted { run_id: i64, root_ip: String },
    RunStopped { run_id: i64, status: String },
    Interrupted { run_id: i64 },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum AppCommandResult {
    HelpText(String),
    VersionText(String),
    Run(RunState),
    Runs(Vec<RunState>),
    Topology(Topology),
    Router(RouterDetail),
}

impl Default for AppContext {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AppContext {
    pub fn from_env() -> Self {
        Self {
            db_path: crate::database::Database::default_path(),
            crawl_settings: CrawlSettings::from_env(),
            probe: None,
            output_hook: Arc::new(|line| println!("{}", line)),
            event_hook: Arc::new(|_| {}),
            interrupt_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    pub fn with_crawl_settings(mut self, settings: CrawlSettings) -> Self {
        self.crawl_settings = settings;
        self
    }

    /// Replaces the SNMP adapter, e.g. with a scripted probe in tests.
    pub fn with_probe(mut self, probe: Arc<dyn RouterProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_output_hook(mut self, output_hook: OutputHook) -> Self {
        self.output_hook = output_hook;
        self
    }

    pub fn with_event_hook(mut self, event_hook: EventHook) -> Self {
        self.event_hook = event_hook;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn crawl_settings(&self) -> &CrawlSettings {
        &self.crawl_settings
    }

    pub fn probe(&self) -> Option<Arc<dyn RouterProbe>> {
        self.probe.clone()
    }

    pub fn emit_line(&self, line: &str) {
        (self.output_hook)(line);
    }

    pub fn emit_event(&self, event: AppEvent) {
        (self.event_hook)(&event);
    }

    /// Asks a crawl waiting in this context to pause its run.
    pub fn interrupt(&self) {
        self.interrupt_flag.store(true, Ordering::Relaxed);
    }

    pub fn reset_interrupt(&self) {
        self.interrupt_flag.store(false, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::Relaxed)
    }
}

/// Execute a pre-parsed command. This is reusable for non-CLI entrypoints.
pub async fn execute_command(command: AppCommand) -> Result<()> {
    let context = AppContext::from_env();
    execute_command_with_context(command, &context).await
}

/// Execute a pre-parsed command with an explicit execution context.
pub async fn execute_command_with_context(command: AppCommand, context: &AppContext) -> Result<()> {
    let result = execute_command_typed(command, context).await?;
    emit_command_result(&result, context)
}

/// Execute a pre-parsed command and return a strongly-typed result payload.
pub async fn execute_command_typed(
    command: AppCommand,
    context: &AppContext,
) -> Result<AppCommandResult> {
    match command {
        AppCommand::Help => Ok(AppCommandResult::HelpText(usage_text())),
        AppCommand::Version => Ok(AppCommandResult::VersionText(version_text())),
        AppCommand::Crawl {
            root_ip,
            community,
            snmp_version,
        } => Ok(AppCommandResult::Run(
            crawl(&root_ip, &community, snmp_version, context).await?,
        )),
        AppCommand::Resume { run_id } => {
            Ok(AppCommandResult::Run(resume_run(run_id, context).await?))
        }
        AppCommand::Pause { run_id } => Ok(AppCommandResult::Run(pause_run(run_id, context)?)),
        AppCommand::Cancel { run_id } => Ok(AppCommandResult::Run(cancel_run(run_id, context)?)),
        AppCommand::Runs { limit } => Ok(AppCommandResult::Runs(list_runs(limit, context)?)),
        AppCommand::Status { run_id } => Ok(AppCommandResult::Run(run_status(run_id, context)?)),
        AppCommand::Topology { run_id } => {
            Ok(AppCommandResult::Topology(topology(run_id, context)?))
        }
        AppCommand::Router { run_id, ip } => Ok(AppCommandResult::Router(router_detail(
            run_id, &ip, context,
        )?)),
    }
}

fn emit_json<T: Serialize>(value: &T, what: &str, context: &AppContext) -> Result<()> {
    let output = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", what))?;
    context.emit_line(&output);
    Ok(())
}

fn emit_command_result(result: &AppCommandResult, context: &AppContext) -> Result<()> {
    match result {
        AppCommandResult::HelpText(text) | AppCommandResult::VersionText(text) => {
            context.emit_line(text);
            Ok(())
        }
        AppCommandResult::Run(state) => emit_json(state, "run state", context),
        AppCommandResult::Runs(runs) => emit_json(runs, "run list", context),
        AppCommandResult::Topology(topology) => emit_json(topology, "topology", context),
        AppCommandResult::Router(detail) => emit_json(detail, "router detail", context),
    }
}
