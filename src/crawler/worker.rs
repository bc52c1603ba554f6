//! The crawl loop for one run
//!
//! Sequential: a host is persisted (and its edges written) before the next
//! one is dequeued. Pause and cancel are honoured only at the checkpoint at
//! the top of each iteration. Every write goes through the loop's claim on
//! the run; once another loop has taken the run over this one stops without
//! touching the store again.

use anyhow::{Result, bail};
use rusqlite::Connection;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::watch;

use super::host::{QueriedHost, query_host};
use super::state::{CrawlState, HostFacts, PlannedEdge};
use crate::config::CrawlSettings;
use crate::database::{
    self, Database, LeaseState, RouteSource, RunStatus, SnmpCredentials, TransitionOutcome,
};
use crate::snmp::RouterProbe;

/// Control request delivered to a running loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopSignal {
    Run,
    Pause,
    Cancel,
}

pub(crate) struct RunLoop {
    pub run_id: i64,
    pub generation: i64,
    pub db: Database,
    pub probe: Arc<dyn RouterProbe>,
    pub creds: SnmpCredentials,
    pub settings: CrawlSettings,
    pub state: CrawlState,
    pub signal: watch::Receiver<LoopSignal>,
}

impl RunLoop {
    /// Drives the run to a stop and returns the status it stopped in.
    /// Store failures end the run as FAILED.
    pub async fn drive(mut self) -> RunStatus {
        match self.crawl().await {
            Ok(status) => {
                log_stderr!(
                    run_id = self.run_id,
                    hosts = self.state.recorded_len(),
                    "Discovery run stopped in {}",
                    status
                );
                status
            }
            Err(e) => {
                let message = format!("{:#}", e);
                log_error!(run_id = self.run_id, "Discovery run failed: {}", message);
                if let Err(mark_err) = self.mark_failed(&message) {
                    log_error!(
                        run_id = self.run_id,
                        "Could not record run failure: {:#}",
                        mark_err
                    );
                }
                RunStatus::Failed
            }
        }
    }

    async fn crawl(&mut self) -> Result<RunStatus> {
        loop {
            if !self.state.has_pending() {
                return self.transition(RunStatus::Completed);
            }

            if self.state.recorded_len() >= self.settings.max_hosts {
                log_warn!(
                    run_id = self.run_id,
                    "Host budget of {} reached with {} addresses still queued",
                    self.settings.max_hosts,
                    self.state.frontier_len()
                );
                return self.transition(RunStatus::Completed);
            }

            if let Some(stopped) = self.checkpoint()? {
                return Ok(stopped);
            }

            let next = self.state.next_target();
            if !self.write_edges(&next.edges)? {
                return self.superseded();
            }
            let Some(ip) = next.ip else {
                continue;
            };

            let host = query_host(self.probe.as_ref(), ip, &self.creds).await;
            if !self.persist(&host)? {
                return self.superseded();
            }

            let edges = self.state.absorb(&host.facts());
            if !self.write_edges(&edges)? {
                return self.superseded();
            }

            log_stderr!(
                run_id = self.run_id,
                ip = %ip,
                is_router = host.classification.is_router,
                score = host.classification.score,
                queued = self.state.frontier_len(),
                "Host recorded"
            );
        }
    }

    /// Stops the loop when a pause/cancel was requested here, when the
    /// stored status was changed by another process, or when another loop
    /// has claimed the run.
    fn checkpoint(&mut self) -> Result<Option<RunStatus>> {
        let conn = self.db.lock()?;
        match database::renew_loop_lease(&conn, self.run_id, self.generation)? {
            LeaseState::Held(RunStatus::Running) => {}
            LeaseState::Held(other) => {
                database::release_loop(&conn, self.run_id, self.generation)?;
                log_stderr!(
                    run_id = self.run_id,
                    "Run moved to {} outside this loop, stopping",
                    other
                );
                return Ok(Some(other));
            }
            LeaseState::Superseded => return self.stop_superseded(&conn).map(Some),
            LeaseState::Missing => {
                bail!("Discovery run {} disappeared from the store", self.run_id)
            }
        }
        drop(conn);

        let signal = *self.signal.borrow();
        match signal {
            LoopSignal::Run => Ok(None),
            LoopSignal::Pause => self.transition(RunStatus::Paused).map(Some),
            LoopSignal::Cancel => self.transition(RunStatus::Cancelled).map(Some),
        }
    }

    /// RUNNING -> `next`. Returns whatever status the run ends up in.
    fn transition(&self, next: RunStatus) -> Result<RunStatus> {
        let conn = self.db.lock()?;
        let outcome =
            database::transition_owned_run(&conn, self.run_id, self.generation, next, None)?;
        let Some(outcome) = outcome else {
            return self.stop_superseded(&conn);
        };

        match outcome {
            TransitionOutcome::Applied => Ok(next),
            TransitionOutcome::Rejected { current } => {
                log_warn!(
                    run_id = self.run_id,
                    "Could not move run to {}: it is already {}",
                    next,
                    current
                );
                Ok(current)
            }
            TransitionOutcome::Missing => {
                bail!("Discovery run {} disappeared from the store", self.run_id)
            }
        }
    }

    fn mark_failed(&self, message: &str) -> Result<()> {
        let conn = self.db.lock()?;
        database::transition_owned_run(
            &conn,
            self.run_id,
            self.generation,
            RunStatus::Failed,
            Some(message),
        )?;
        Ok(())
    }

    fn stop_superseded(&self, conn: &Connection) -> Result<RunStatus> {
        log_warn!(
            run_id = self.run_id,
            generation = self.generation,
            "Run was claimed by another crawl loop, stopping"
        );
        match database::get_run_status(conn, self.run_id)? {
            Some(status) => Ok(status),
            None => bail!("Discovery run {} disappeared from the store", self.run_id),
        }
    }

    fn superseded(&self) -> Result<RunStatus> {
        let conn = self.db.lock()?;
        self.stop_superseded(&conn)
    }

    /// Runs `write` in one transaction with a lease renewal. `false` when
    /// the run belongs to another loop and nothing was written.
    fn owned_write(&self, write: impl FnOnce(&Connection) -> Result<()>) -> Result<bool> {
        let conn = self.db.lock()?;
        database::with_savepoint(&conn, "owned_write", |conn| {
            match database::renew_loop_lease(conn, self.run_id, self.generation)? {
                // A pause or cancel from outside still lets the current host land
                LeaseState::Held(_) => write(conn).map(|()| true),
                LeaseState::Superseded => Ok(false),
                LeaseState::Missing => {
                    bail!("Discovery run {} disappeared from the store", self.run_id)
                }
            }
        })
    }

    fn persist(&self, host: &QueriedHost) -> Result<bool> {
        self.owned_write(|conn| {
            if !database::insert_router(conn, self.run_id, &host.as_new_router())? {
                log_debug!(run_id = self.run_id, ip = %host.ip, "Host already recorded");
            }
            Ok(())
        })
    }

    fn write_edges(&self, edges: &[PlannedEdge]) -> Result<bool> {
        if edges.is_empty() {
            return Ok(true);
        }
        self.owned_write(|conn| {
            for edge in edges {
                database::insert_edge(
                    conn,
                    self.run_id,
                    &edge.from.to_string(),
                    &edge.to.to_string(),
                    edge.reason,
                )?;
            }
            Ok(())
        })
    }
}

/// Rebuilds frontier and visited set of a run from what the store holds by
/// replaying every recorded host in query order.
pub(crate) fn reconstruct_state(
    db: &Database,
    run_id: i64,
    root: Ipv4Addr,
) -> Result<CrawlState> {
    let conn = db.lock()?;
    let routers = database::get_routers(&conn, run_id)?;
    let mut state = CrawlState::seeded(root);

    for router in &routers {
        let ip: Ipv4Addr = match router.ip.parse() {
            Ok(ip) => ip,
            Err(_) => {
                log_warn!(run_id, "Skipping stored router with bad address {}", router.ip);
                continue;
            }
        };

        let next = state.next_target();
        if next.ip != Some(ip) {
            log_warn!(
                run_id,
                "Replay expected {:?} but the store recorded {} next",
                next.ip,
                ip
            );
        }

        let interfaces = database::get_router_interfaces(&conn, run_id, &router.ip)?;
        let routes = database::get_router_routes(&conn, run_id, &router.ip, Some(RouteSource::Snmp))?;
        state.absorb(&HostFacts::from_records(ip, &interfaces, &routes));
    }

    log_stderr!(
        run_id,
        recorded = state.recorded_len(),
        queued = state.frontier_len(),
        visited = state.visited_len(),
        "Frontier reconstructed"
    );

    Ok(state)
}
