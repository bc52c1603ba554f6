use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::app::{AppContext, AppEvent};
use crate::crawler::{Crawler, RouterDetail, RunState, Topology};
use crate::database::{Database, SnmpCredentials, SnmpVersion};
use crate::snmp::{RouterProbe, SnmpAdapter};

const INTERRUPT_POLL: Duration = Duration::from_millis(100);

fn open_crawler(context: &AppContext) -> Result<Crawler> {
    let db = Database::new(context.db_path().to_path_buf()).with_context(|| {
        format!(
            "Failed to open discovery database at {}",
            context.db_path().display()
        )
    })?;
    let probe: Arc<dyn RouterProbe> = match context.probe() {
        Some(probe) => probe,
        None => Arc::new(SnmpAdapter::from_env()),
    };
    Ok(Crawler::new(db, probe, context.crawl_settings().clone()))
}

/// Follows the local loop of `run_id` until it stops. An interrupt on the
/// context pauses the run once; the loop then stops at its next checkpoint.
async fn wait_with_interrupt(
    crawler: &Crawler,
    run_id: i64,
    context: &AppContext,
) -> Result<RunState> {
    let wait = crawler.wait(run_id);
    tokio::pin!(wait);

    let mut ticker = tokio::time::interval(INTERRUPT_POLL);
    let mut pause_sent = false;

    loop {
        tokio::select! {
            state = &mut wait => {
                let state = state?;
                context.emit_event(AppEvent::RunStopped {
                    run_id,
                    status: state.status.to_string(),
                });
                return Ok(state);
            }
            _ = ticker.tick(), if !pause_sent => {
                if !context.is_interrupted() {
                    continue;
                }
                pause_sent = true;
                match crawler.pause(run_id) {
                    Ok(()) => {
                        log_stderr!(run_id, "Interrupted, pausing after the current host");
                        context.emit_event(AppEvent::Interrupted { run_id });
                    }
                    Err(e) => {
                        log_warn!(run_id, "Interrupt could not pause the run: {}", e);
                    }
                }
            }
        }
    }
}

pub(crate) async fn crawl(
    root_ip: &str,
    community: &str,
    version: SnmpVersion,
    context: &AppContext,
) -> Result<RunState> {
    let crawler = open_crawler(context)?;
    let credentials = SnmpCredentials {
        version,
        community: community.to_string(),
    };

    let run_id = crawler.start_run(root_ip, credentials, Vec::new())?;
    context.emit_event(AppEvent::RunStarted {
        run_id,
        root_ip: root_ip.trim().to_string(),
    });

    wait_with_interrupt(&crawler, run_id, context).await
}

pub(crate) async fn resume_run(run_id: i64, context: &AppContext) -> Result<RunState> {
    let crawler = open_crawler(context)?;
    crawler.resume(run_id)?;
    context.emit_event(AppEvent::Info {
        message: format!("Resumed discovery run {}", run_id),
    });
    wait_with_interrupt(&crawler, run_id, context).await
}

pub(crate) fn pause_run(run_id: i64, context: &AppContext) -> Result<RunState> {
    let crawler = open_crawler(context)?;
    crawler.pause(run_id)?;
    Ok(crawler.get_run_state(run_id)?)
}

pub(crate) fn cancel_run(run_id: i64, context: &AppContext) -> Result<RunState> {
    let crawler = open_crawler(context)?;
    crawler.cancel(run_id)?;
    Ok(crawler.get_run_state(run_id)?)
}

pub(crate) fn list_runs(limit: i64, context: &AppContext) -> Result<Vec<RunState>> {
    Ok(open_crawler(context)?.list_runs(limit)?)
}

pub(crate) fn run_status(run_id: i64, context: &AppContext) -> Result<RunState> {
    Ok(open_crawler(context)?.get_run_state(run_id)?)
}

pub(crate) fn topology(run_id: i64, context: &AppContext) -> Result<Topology> {
    Ok(open_crawler(context)?.get_topology(run_id)?)
}

pub(crate) fn router_detail(run_id: i64, ip: &str, context: &AppContext) -> Result<RouterDetail> {
    Ok(open_crawler(context)?.get_router_detail(run_id, ip.trim())?)
}
