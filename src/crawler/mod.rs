//! BFS crawler and run control
//!
//! `Crawler` owns at most one in-process crawl loop. The loop runs as a
//! spawned task and listens on a watch channel; pause and cancel requests
//! for runs without a local loop (another process, or a process that died)
//! are applied to the stored status directly.
//!
//! Whichever crawler starts or resumes a run claims it in the store under a
//! fresh loop generation. The loop renews that claim at every checkpoint and
//! write, and stops as soon as a newer generation appears.

mod cli_fallback;
mod host;
mod models;
mod state;
mod worker;

pub use cli_fallback::CliRouteFetcher;
pub use host::{QueriedHost, build_host, query_host};
pub use models::{RouterDetail, RunState, Topology, TopologyRouter, UndirectedLink, undirected_links};
pub use state::{CrawlState, HostFacts, NextTarget, PlannedEdge};

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::CrawlSettings;
use crate::database::{
    self, CliCredential, Database, LoopClaim, RunCreation, RunStatus, SnmpCredentials,
    TransitionOutcome,
};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::network::parse_root_address;
use crate::snmp::{RouterProbe, SnmpAdapter};
use worker::{LoopSignal, RunLoop, reconstruct_state};

/// Handle on the loop currently running in this process
struct LoopSlot {
    run_id: i64,
    generation: i64,
    signal: watch::Sender<LoopSignal>,
    task: Option<JoinHandle<RunStatus>>,
}

struct Shared {
    db: Database,
    probe: Arc<dyn RouterProbe>,
    settings: CrawlSettings,
    slot: Mutex<Option<LoopSlot>>,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Option<LoopSlot>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clears the slot if it still belongs to the loop that is finishing.
    fn release(&self, run_id: i64, generation: i64) {
        let mut slot = self.slot();
        if slot
            .as_ref()
            .is_some_and(|s| s.run_id == run_id && s.generation == generation)
        {
            *slot = None;
        }
    }
}

/// Control surface of the discovery engine. Cheap to clone.
#[derive(Clone)]
pub struct Crawler {
    shared: Arc<Shared>,
}

impl Crawler {
    pub fn new(db: Database, probe: Arc<dyn RouterProbe>, settings: CrawlSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                db,
                probe,
                settings,
                slot: Mutex::new(None),
            }),
        }
    }

    /// Crawler talking real SNMP, configured from `NEXUS_*` variables.
    pub fn with_snmp(db: Database) -> Self {
        Self::new(
            db,
            Arc::new(SnmpAdapter::from_env()),
            CrawlSettings::from_env(),
        )
    }

    pub fn database(&self) -> &Database {
        &self.shared.db
    }

    fn conn(&self) -> DiscoveryResult<MutexGuard<'_, rusqlite::Connection>> {
        self.shared.db.lock().map_err(DiscoveryError::store)
    }

    fn status_of(&self, run_id: i64) -> DiscoveryResult<RunStatus> {
        let conn = self.conn()?;
        database::get_run_status(&conn, run_id)
            .map_err(DiscoveryError::store)?
            .ok_or(DiscoveryError::RunNotFound(run_id))
    }

    /// Moves the run from `expected` to RUNNING under a new loop generation.
    fn claim(
        &self,
        conn: &rusqlite::Connection,
        run_id: i64,
        expected: RunStatus,
        action: &'static str,
    ) -> DiscoveryResult<i64> {
        match database::claim_loop(conn, run_id, &[expected], self.shared.settings.loop_lease)
            .map_err(DiscoveryError::store)?
        {
            LoopClaim::Claimed { generation } => Ok(generation),
            LoopClaim::Held => Err(DiscoveryError::AlreadyRunning {
                active_run_id: run_id,
            }),
            LoopClaim::Rejected { current } => Err(DiscoveryError::InvalidTransition {
                run_id,
                status: current,
                action,
            }),
            LoopClaim::Missing => Err(DiscoveryError::RunNotFound(run_id)),
        }
    }

    /// Creates a run, takes the active-run lock and starts crawling from
    /// `root_ip`. Must be called inside a tokio runtime.
    pub fn start_run(
        &self,
        root_ip: &str,
        credentials: SnmpCredentials,
        cli_credentials: Vec<CliCredential>,
    ) -> DiscoveryResult<i64> {
        let root = parse_root_address(root_ip)
            .ok_or_else(|| DiscoveryError::InvalidAddress(root_ip.to_string()))?;
        if credentials.community.trim().is_empty() {
            return Err(DiscoveryError::InvalidCredentials(
                "SNMP community must not be empty".to_string(),
            ));
        }

        let (run_id, generation) = {
            let conn = self.conn()?;
            let run_id = match database::create_run(
                &conn,
                &root.to_string(),
                &credentials,
                &cli_credentials,
            )
            .map_err(DiscoveryError::store)?
            {
                RunCreation::Created(run_id) => run_id,
                RunCreation::LockHeld { active_run_id } => {
                    return Err(DiscoveryError::AlreadyRunning { active_run_id });
                }
            };

            let generation = self.claim(&conn, run_id, RunStatus::Pending, "start")?;
            (run_id, generation)
        };

        log_stderr!(run_id, generation, root = %root, "Discovery run started");
        self.spawn_loop(run_id, generation, credentials, CrawlState::seeded(root));
        Ok(run_id)
    }

    fn spawn_loop(&self, run_id: i64, generation: i64, creds: SnmpCredentials, state: CrawlState) {
        let (signal, receiver) = watch::channel(LoopSignal::Run);

        // Hold the slot while spawning so a fast loop cannot release it first
        let mut slot = self.shared.slot();

        let run = RunLoop {
            run_id,
            generation,
            db: self.shared.db.clone(),
            probe: Arc::clone(&self.shared.probe),
            creds,
            settings: self.shared.settings.clone(),
            state,
            signal: receiver,
        };
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let status = run.drive().await;
            shared.release(run_id, generation);
            status
        });

        *slot = Some(LoopSlot {
            run_id,
            generation,
            signal,
            task: Some(task),
        });
    }

    /// Delivers `signal` to the local loop of `run_id`, if there is one.
    fn signal_local(&self, run_id: i64, signal: LoopSignal) -> bool {
        let slot = self.shared.slot();
        match slot.as_ref() {
            Some(s) if s.run_id == run_id => {
                s.signal.send_replace(signal);
                true
            }
            _ => false,
        }
    }

    /// Compare-and-set for runs with no loop in this process.
    fn transition_stored(
        &self,
        run_id: i64,
        expected: &[RunStatus],
        next: RunStatus,
        action: &'static str,
    ) -> DiscoveryResult<()> {
        let conn = self.conn()?;
        match database::transition_run(&conn, run_id, expected, next, None)
            .map_err(DiscoveryError::store)?
        {
            TransitionOutcome::Applied => Ok(()),
            TransitionOutcome::Rejected { current } => Err(DiscoveryError::InvalidTransition {
                run_id,
                status: current,
                action,
            }),
            TransitionOutcome::Missing => Err(DiscoveryError::RunNotFound(run_id)),
        }
    }

    /// Requests a pause. The loop stops after the host it is working on.
    pub fn pause(&self, run_id: i64) -> DiscoveryResult<()> {
        let status = self.status_of(run_id)?;
        if status != RunStatus::Running {
            return Err(DiscoveryError::InvalidTransition {
                run_id,
                status,
                action: "pause",
            });
        }

        if self.signal_local(run_id, LoopSignal::Pause) {
            log_stderr!(run_id, "Pause requested");
            return Ok(());
        }

        self.transition_stored(run_id, &[RunStatus::Running], RunStatus::Paused, "pause")?;
        log_stderr!(run_id, "Run paused (no local crawl loop)");
        Ok(())
    }

    /// Rebuilds the frontier from the store and continues crawling.
    ///
    /// Refused with `AlreadyRunning` while a loop elsewhere still holds a
    /// live claim on the run, e.g. right after a stored pause of a loop that
    /// has not reached its checkpoint yet.
    pub fn resume(&self, run_id: i64) -> DiscoveryResult<()> {
        let (run, generation) = {
            let conn = self.conn()?;
            let run = database::get_run(&conn, run_id)
                .map_err(DiscoveryError::store)?
                .ok_or(DiscoveryError::RunNotFound(run_id))?;
            if run.status != RunStatus::Paused {
                return Err(DiscoveryError::InvalidTransition {
                    run_id,
                    status: run.status,
                    action: "resume",
                });
            }
            let generation = self.claim(&conn, run_id, RunStatus::Paused, "resume")?;
            (run, generation)
        };

        // The run is ours now, so nothing else writes while it is replayed
        let state = run
            .root_ip
            .parse::<Ipv4Addr>()
            .map_err(|_| anyhow::anyhow!("stored root address '{}' is invalid", run.root_ip))
            .and_then(|root| reconstruct_state(&self.shared.db, run_id, root));
        let state = match state {
            Ok(state) => state,
            Err(e) => {
                let message = format!("Frontier reconstruction failed: {:#}", e);
                log_error!(run_id, "{}", message);
                if let Ok(conn) = self.shared.db.lock() {
                    let _ = database::transition_owned_run(
                        &conn,
                        run_id,
                        generation,
                        RunStatus::Failed,
                        Some(&message),
                    );
                }
                return Err(DiscoveryError::StoreUnavailable(message));
            }
        };

        log_stderr!(run_id, generation, "Discovery run resumed");
        self.spawn_loop(run_id, generation, run.snmp_credentials(), state);
        Ok(())
    }

    /// Cancels a RUNNING or PAUSED run. Results gathered so far are kept.
    pub fn cancel(&self, run_id: i64) -> DiscoveryResult<()> {
        let status = self.status_of(run_id)?;
        if !matches!(status, RunStatus::Running | RunStatus::Paused) {
            return Err(DiscoveryError::InvalidTransition {
                run_id,
                status,
                action: "cancel",
            });
        }

        if status == RunStatus::Running && self.signal_local(run_id, LoopSignal::Cancel) {
            log_stderr!(run_id, "Cancel requested");
            return Ok(());
        }

        self.transition_stored(
            run_id,
            &[RunStatus::Running, RunStatus::Paused],
            RunStatus::Cancelled,
            "cancel",
        )?;
        log_stderr!(run_id, "Run cancelled");
        Ok(())
    }

    /// Waits for the local loop of `run_id` to stop, then reports the run.
    pub async fn wait(&self, run_id: i64) -> DiscoveryResult<RunState> {
        let task = {
            let mut slot = self.shared.slot();
            match slot.as_mut() {
                Some(s) if s.run_id == run_id => s.task.take(),
                _ => None,
            }
        };

        if let Some(task) = task
            && let Err(e) = task.await
        {
            log_error!(run_id, "Crawl task ended abnormally: {}", e);
        }

        self.get_run_state(run_id)
    }

    pub fn get_run_state(&self, run_id: i64) -> DiscoveryResult<RunState> {
        let conn = self.conn()?;
        database::get_run(&conn, run_id)
            .map_err(DiscoveryError::store)?
            .map(RunState::from)
            .ok_or(DiscoveryError::RunNotFound(run_id))
    }

    pub fn list_runs(&self, limit: i64) -> DiscoveryResult<Vec<RunState>> {
        let conn = self.conn()?;
        Ok(database::list_runs(&conn, limit)
            .map_err(DiscoveryError::store)?
            .into_iter()
            .map(RunState::from)
            .collect())
    }

    /// Routers and edges recorded so far. Safe to call mid-crawl.
    pub fn get_topology(&self, run_id: i64) -> DiscoveryResult<Topology> {
        let conn = self.conn()?;
        let status = database::get_run_status(&conn, run_id)
            .map_err(DiscoveryError::store)?
            .ok_or(DiscoveryError::RunNotFound(run_id))?;

        let counts = database::get_router_counts(&conn, run_id).map_err(DiscoveryError::store)?;
        let routers = database::get_routers(&conn, run_id)
            .map_err(DiscoveryError::store)?
            .into_iter()
            .map(|record| {
                let (networks, routes) = counts.get(&record.ip).copied().unwrap_or((0, 0));
                TopologyRouter::from_record(record, networks, routes)
            })
            .collect();
        let edges = database::get_edges(&conn, run_id).map_err(DiscoveryError::store)?;
        let undirected_links = undirected_links(&edges);

        Ok(Topology {
            run_id,
            status,
            routers,
            edges,
            undirected_links,
        })
    }

    /// One router with its interfaces, networks and routes. `router_ip` is
    /// the address the router was recorded under.
    pub fn get_router_detail(&self, run_id: i64, router_ip: &str) -> DiscoveryResult<RouterDetail> {
        let conn = self.conn()?;
        if database::get_run_status(&conn, run_id)
            .map_err(DiscoveryError::store)?
            .is_none()
        {
            return Err(DiscoveryError::RunNotFound(run_id));
        }

        let router = database::get_router(&conn, run_id, router_ip)
            .map_err(DiscoveryError::store)?
            .ok_or_else(|| DiscoveryError::RouterNotFound {
                run_id,
                ip: router_ip.to_string(),
            })?;

        Ok(RouterDetail {
            interfaces: database::get_router_interfaces(&conn, run_id, router_ip)
                .map_err(DiscoveryError::store)?,
            networks: database::get_router_networks(&conn, run_id, router_ip)
                .map_err(DiscoveryError::store)?,
            routes: database::get_router_routes(&conn, run_id, router_ip, None)
                .map_err(DiscoveryError::store)?,
            router,
        })
    }
}
