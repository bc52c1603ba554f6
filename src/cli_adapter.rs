use anyhow::Result;

use crate::app::{AppContext, execute_command_with_context};
use crate::cli::parse_cli_args;

/// Run the app by parsing CLI-style args and dispatching the command.
pub async fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let context = AppContext::from_env();
    run_with_context(args, &context).await
}

/// Run the app with an explicit context. `--db` on the command line wins
/// over the context's database path.
pub async fn run_with_context<I, S>(args: I, context: &AppContext) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let invocation = parse_cli_args(args)?;
    match invocation.db_path {
        Some(db_path) => {
            let context = context.clone().with_db_path(db_path);
            execute_command_with_context(invocation.command, &context).await
        }
        None => execute_command_with_context(invocation.command, context).await,
    }
}

/// Run the app with Ctrl+C wired to the context's interrupt flag, which
/// pauses a crawl being followed in the foreground.
pub async fn run_with_ctrl_c<I, S>(args: I, context: &AppContext) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let interrupt_context = context.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_context.interrupt();
            log_stderr!("Interrupt requested (Ctrl+C). Pausing after the current host...");
        }
    });

    let run_result = run_with_context(args, context).await;
    signal_task.abort();
    run_result
}
