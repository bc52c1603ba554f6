//! Database query functions
//!
//! Run lifecycle (including the active-run lock), per-host writes and the
//! read side used by the control surface and by frontier reconstruction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::time::Duration;

use super::models::*;

/// Outcome of trying to open a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCreation {
    Created(i64),
    LockHeld { active_run_id: i64 },
}

/// Outcome of a compare-and-set status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    Rejected { current: RunStatus },
    Missing,
}

/// Outcome of attaching a crawl loop to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopClaim {
    /// The run is RUNNING and belongs to the loop holding `generation`.
    Claimed { generation: i64 },
    /// Another loop renewed its heartbeat within the lease.
    Held,
    Rejected { current: RunStatus },
    Missing,
}

/// What a loop finds when it renews its lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Held(RunStatus),
    /// A newer loop claimed the run.
    Superseded,
    Missing,
}

/// Everything persisted for one queried host, written atomically.
pub struct NewRouter<'a> {
    pub ip: &'a str,
    pub hostname: Option<&'a str>,
    pub sys_descr: Option<&'a str>,
    pub sys_object_id: Option<&'a str>,
    pub vendor: Option<&'a str>,
    pub model: Option<&'a str>,
    pub is_router: bool,
    pub router_score: i32,
    pub classification_reason: &'a str,
    pub interfaces: &'a [RouterInterfaceRecord],
    pub networks: &'a [RouterNetwork],
    pub routes: &'a [RouterRoute],
}

/// Runs `body` inside a named savepoint, rolling back on error.
pub fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    body: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))
        .with_context(|| format!("Failed to start {name} transaction"))?;

    match body(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))
                .with_context(|| format!("Failed to commit {name} transaction"))?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
            ));
            Err(e)
        }
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339()
}

// ====== Runs ======

/// Insert a PENDING run and take the active-run lock in one step.
pub fn create_run(
    conn: &Connection,
    root_ip: &str,
    credentials: &SnmpCredentials,
    cli_credentials: &[CliCredential],
) -> Result<RunCreation> {
    let cli_json = if cli_credentials.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&StoredCliCredentials(cli_credentials.to_vec()))
                .context("Failed to encode CLI credentials")?,
        )
    };

    with_savepoint(conn, "create_run", |conn| {
        if let Some(active_run_id) = active_run_id(conn)? {
            return Ok(RunCreation::LockHeld { active_run_id });
        }

        conn.execute(
            r#"
            INSERT INTO discovery_runs (
                status, root_ip, snmp_community, snmp_version, cli_credentials, started_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                RunStatus::Pending.as_str(),
                root_ip,
                credentials.community,
                credentials.version.to_string(),
                cli_json,
                now_text(),
            ],
        )
        .context("Failed to insert discovery run")?;
        let run_id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO active_run_lock (slot, run_id, acquired_at) VALUES (1, ?1, ?2)",
            params![run_id, now_text()],
        )
        .context("Failed to acquire active run lock")?;

        Ok(RunCreation::Created(run_id))
    })
}

/// Run currently holding the lock, if any.
pub fn active_run_id(conn: &Connection) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT run_id FROM active_run_lock WHERE slot = 1",
        [],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to read active run lock")
}

/// Compare-and-set status change. Terminal targets stamp `finished_at` and
/// release the lock in the same transaction.
pub fn transition_run(
    conn: &Connection,
    run_id: i64,
    expected: &[RunStatus],
    next: RunStatus,
    error_message: Option<&str>,
) -> Result<TransitionOutcome> {
    with_savepoint(conn, "transition_run", |conn| {
        let Some(current) = get_run_status(conn, run_id)? else {
            return Ok(TransitionOutcome::Missing);
        };

        if !expected.contains(&current) || !current.can_transition_to(next) {
            return Ok(TransitionOutcome::Rejected { current });
        }

        let finished_at = next.is_terminal().then(now_text);
        conn.execute(
            r#"
            UPDATE discovery_runs SET
                status = ?2,
                finished_at = COALESCE(?3, finished_at),
                error_message = ?4
            WHERE id = ?1
            "#,
            params![run_id, next.as_str(), finished_at, error_message],
        )
        .context("Failed to update run status")?;

        if next.is_terminal() {
            conn.execute(
                "DELETE FROM active_run_lock WHERE run_id = ?1",
                params![run_id],
            )
            .context("Failed to release active run lock")?;
        }

        Ok(TransitionOutcome::Applied)
    })
}

// ====== Crawl loop ownership ======

/// Moves the run from one of `expected` to RUNNING and hands it to a new
/// loop generation, unless another loop's heartbeat is younger than `lease`.
pub fn claim_loop(
    conn: &Connection,
    run_id: i64,
    expected: &[RunStatus],
    lease: Duration,
) -> Result<LoopClaim> {
    with_savepoint(conn, "claim_loop", |conn| {
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT status, loop_heartbeat_at FROM discovery_runs WHERE id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read run ownership")?;
        let Some((status, heartbeat)) = row else {
            return Ok(LoopClaim::Missing);
        };

        let current: RunStatus = status.parse().map_err(anyhow::Error::msg)?;
        if !expected.contains(&current) || !current.can_transition_to(RunStatus::Running) {
            return Ok(LoopClaim::Rejected { current });
        }

        if let Some(beat) = heartbeat
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            // A heartbeat from the future counts as fresh
            let fresh = Utc::now()
                .signed_duration_since(beat.with_timezone(&Utc))
                .to_std()
                .map_or(true, |age| age < lease);
            if fresh {
                return Ok(LoopClaim::Held);
            }
        }

        conn.execute(
            r#"
            UPDATE discovery_runs SET
                status = ?2,
                loop_generation = loop_generation + 1,
                loop_heartbeat_at = ?3,
                error_message = NULL
            WHERE id = ?1
            "#,
            params![run_id, RunStatus::Running.as_str(), now_text()],
        )
        .context("Failed to claim discovery run")?;

        let generation = conn
            .query_row(
                "SELECT loop_generation FROM discovery_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .context("Failed to read loop generation")?;

        Ok(LoopClaim::Claimed { generation })
    })
}

/// Renews the heartbeat of loop `generation` while the run is RUNNING.
pub fn renew_loop_lease(conn: &Connection, run_id: i64, generation: i64) -> Result<LeaseState> {
    with_savepoint(conn, "renew_loop_lease", |conn| {
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT status, loop_generation FROM discovery_runs WHERE id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read run ownership")?;
        let Some((status, owner)) = row else {
            return Ok(LeaseState::Missing);
        };
        if owner != generation {
            return Ok(LeaseState::Superseded);
        }

        let status: RunStatus = status.parse().map_err(anyhow::Error::msg)?;
        if status == RunStatus::Running {
            conn.execute(
                "UPDATE discovery_runs SET loop_heartbeat_at = ?2 WHERE id = ?1",
                params![run_id, now_text()],
            )
            .context("Failed to renew loop heartbeat")?;
        }

        Ok(LeaseState::Held(status))
    })
}

/// Drops the heartbeat of loop `generation`. A no-op once superseded.
pub fn release_loop(conn: &Connection, run_id: i64, generation: i64) -> Result<()> {
    conn.execute(
        r#"
        UPDATE discovery_runs SET loop_heartbeat_at = NULL
        WHERE id = ?1 AND loop_generation = ?2
        "#,
        params![run_id, generation],
    )
    .context("Failed to release crawl loop")?;
    Ok(())
}

/// RUNNING -> `next` on behalf of loop `generation`, which lets go of the run
/// in the same transaction. `None` when a newer loop owns the run.
pub fn transition_owned_run(
    conn: &Connection,
    run_id: i64,
    generation: i64,
    next: RunStatus,
    error_message: Option<&str>,
) -> Result<Option<TransitionOutcome>> {
    with_savepoint(conn, "transition_owned_run", |conn| {
        match renew_loop_lease(conn, run_id, generation)? {
            LeaseState::Held(_) => {}
            LeaseState::Superseded => return Ok(None),
            LeaseState::Missing => return Ok(Some(TransitionOutcome::Missing)),
        }

        let outcome = transition_run(conn, run_id, &[RunStatus::Running], next, error_message)?;
        release_loop(conn, run_id, generation)?;
        Ok(Some(outcome))
    })
}

pub fn get_run_status(conn: &Connection, run_id: i64) -> Result<Option<RunStatus>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM discovery_runs WHERE id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read run status")?;

    raw.map(|s| s.parse::<RunStatus>().map_err(anyhow::Error::msg))
        .transpose()
}

const RUN_COLUMNS: &str = "id, status, root_ip, snmp_community, snmp_version, cli_credentials, \
     started_at, finished_at, error_message, hosts_queried";

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DiscoveryRun> {
    let cli_json: Option<String> = row.get(5)?;
    let cli_credentials = match cli_json {
        Some(json) => serde_json::from_str::<StoredCliCredentials>(&json)
            .map(|stored| stored.0)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        None => Vec::new(),
    };

    Ok(DiscoveryRun {
        id: row.get(0)?,
        status: parse_text_column(row.get::<_, String>(1)?, 1)?,
        root_ip: row.get(2)?,
        snmp_community: row.get(3)?,
        snmp_version: parse_text_column(row.get::<_, String>(4)?, 4)?,
        cli_credentials,
        started_at: parse_datetime_column(row.get::<_, String>(6)?, 6)?,
        finished_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_datetime_column(s, 7))
            .transpose()?,
        error_message: row.get(8)?,
        hosts_queried: row.get(9)?,
    })
}

pub fn get_run(conn: &Connection, run_id: i64) -> Result<Option<DiscoveryRun>> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM discovery_runs WHERE id = ?1"),
        params![run_id],
        run_from_row,
    )
    .optional()
    .context("Failed to load discovery run")
}

/// Most recent runs first
pub fn list_runs(conn: &Connection, limit: i64) -> Result<Vec<DiscoveryRun>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RUN_COLUMNS} FROM discovery_runs ORDER BY id DESC LIMIT ?1"
    ))?;

    let runs = stmt
        .query_map(params![limit], run_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(runs)
}

// ====== Routers ======

/// Persist one queried host with its interfaces, networks and routes.
///
/// Returns `false` (and writes nothing) when the address is already recorded
/// for this run, so replaying a host is harmless.
pub fn insert_router(conn: &Connection, run_id: i64, router: &NewRouter<'_>) -> Result<bool> {
    with_savepoint(conn, "insert_router", |conn| {
        let inserted = conn
            .execute(
                r#"
                INSERT OR IGNORE INTO routers (
                    run_id, ip, hostname, sys_descr, sys_object_id, vendor, model,
                    is_router, router_score, classification_reason, discovered_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    run_id,
                    router.ip,
                    router.hostname,
                    router.sys_descr,
                    router.sys_object_id,
                    router.vendor,
                    router.model,
                    router.is_router,
                    router.router_score,
                    router.classification_reason,
                    now_text(),
                ],
            )
            .context("Failed to insert router")?;

        if inserted == 0 {
            return Ok(false);
        }

        for iface in router.interfaces {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO router_interfaces (run_id, router_ip, if_index, ip, netmask)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![run_id, router.ip, iface.if_index, iface.ip, iface.netmask],
            )
            .context("Failed to insert router interface")?;
        }

        insert_networks(conn, run_id, router.ip, router.networks)?;
        insert_routes(conn, run_id, router.ip, router.routes)?;

        conn.execute(
            "UPDATE discovery_runs SET hosts_queried = hosts_queried + 1 WHERE id = ?1",
            params![run_id],
        )
        .context("Failed to bump hosts_queried")?;

        Ok(true)
    })
}

fn insert_networks(
    conn: &Connection,
    run_id: i64,
    router_ip: &str,
    networks: &[RouterNetwork],
) -> Result<()> {
    for network in networks {
        conn.execute(
            r#"
            INSERT OR IGNORE INTO router_networks (run_id, router_ip, cidr, is_local)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![run_id, router_ip, network.cidr, network.is_local],
        )
        .context("Failed to insert router network")?;
    }
    Ok(())
}

fn insert_routes(
    conn: &Connection,
    run_id: i64,
    router_ip: &str,
    routes: &[RouterRoute],
) -> Result<()> {
    for route in routes {
        conn.execute(
            r#"
            INSERT INTO router_routes (
                run_id, router_ip, destination, next_hop, protocol, admin_distance, metric, source
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                run_id,
                router_ip,
                route.destination,
                route.next_hop,
                route.protocol,
                route.admin_distance,
                route.metric,
                route.source.as_str(),
            ],
        )
        .context("Failed to insert router route")?;
    }
    Ok(())
}

/// Append routes gathered outside SNMP to an existing router, together with
/// the networks they teach us about.
pub fn append_routes(
    conn: &Connection,
    run_id: i64,
    router_ip: &str,
    routes: &[RouterRoute],
    networks: &[RouterNetwork],
) -> Result<usize> {
    with_savepoint(conn, "append_routes", |conn| {
        insert_networks(conn, run_id, router_ip, networks)?;
        insert_routes(conn, run_id, router_ip, routes)?;
        Ok(routes.len())
    })
}

pub fn router_exists(conn: &Connection, run_id: i64, ip: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM routers WHERE run_id = ?1 AND ip = ?2)",
        params![run_id, ip],
        |row| row.get::<_, bool>(0),
    )
    .context("Failed to check router existence")
}

const ROUTER_COLUMNS: &str = "id, run_id, ip, hostname, sys_descr, sys_object_id, vendor, model, \
     is_router, router_score, classification_reason, discovered_at";

fn router_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RouterRecord> {
    Ok(RouterRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        ip: row.get(2)?,
        hostname: row.get(3)?,
        sys_descr: row.get(4)?,
        sys_object_id: row.get(5)?,
        vendor: row.get(6)?,
        model: row.get(7)?,
        is_router: row.get(8)?,
        router_score: row.get(9)?,
        classification_reason: row.get(10)?,
        discovered_at: parse_datetime_column(row.get::<_, String>(11)?, 11)?,
    })
}

/// All routers of a run in the order they were queried
pub fn get_routers(conn: &Connection, run_id: i64) -> Result<Vec<RouterRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROUTER_COLUMNS} FROM routers WHERE run_id = ?1 ORDER BY id ASC"
    ))?;

    let routers = stmt
        .query_map(params![run_id], router_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(routers)
}

pub fn get_router(conn: &Connection, run_id: i64, ip: &str) -> Result<Option<RouterRecord>> {
    conn.query_row(
        &format!("SELECT {ROUTER_COLUMNS} FROM routers WHERE run_id = ?1 AND ip = ?2"),
        params![run_id, ip],
        router_from_row,
    )
    .optional()
    .context("Failed to load router")
}

pub fn get_router_interfaces(
    conn: &Connection,
    run_id: i64,
    router_ip: &str,
) -> Result<Vec<RouterInterfaceRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT if_index, ip, netmask FROM router_interfaces
        WHERE run_id = ?1 AND router_ip = ?2
        ORDER BY id ASC
        "#,
    )?;

    let rows = stmt
        .query_map(params![run_id, router_ip], |row| {
            Ok(RouterInterfaceRecord {
                if_index: row.get(0)?,
                ip: row.get(1)?,
                netmask: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

pub fn get_router_networks(
    conn: &Connection,
    run_id: i64,
    router_ip: &str,
) -> Result<Vec<RouterNetwork>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT cidr, is_local FROM router_networks
        WHERE run_id = ?1 AND router_ip = ?2
        ORDER BY is_local DESC, id ASC
        "#,
    )?;

    let rows = stmt
        .query_map(params![run_id, router_ip], |row| {
            Ok(RouterNetwork {
                cidr: row.get(0)?,
                is_local: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

/// Routes of one router; `source = None` returns every source.
pub fn get_router_routes(
    conn: &Connection,
    run_id: i64,
    router_ip: &str,
    source: Option<RouteSource>,
) -> Result<Vec<RouterRoute>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT destination, next_hop, protocol, admin_distance, metric, source
        FROM router_routes
        WHERE run_id = ?1 AND router_ip = ?2 AND (?3 IS NULL OR source = ?3)
        ORDER BY id ASC
        "#,
    )?;

    let rows = stmt
        .query_map(
            params![run_id, router_ip, source.map(|s| s.as_str())],
            |row| {
                Ok(RouterRoute {
                    destination: row.get(0)?,
                    next_hop: row.get(1)?,
                    protocol: row.get(2)?,
                    admin_distance: row.get(3)?,
                    metric: row.get(4)?,
                    source: parse_text_column(row.get::<_, String>(5)?, 5)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

/// Per-router network and route counts for a run, keyed by router address.
pub fn get_router_counts(
    conn: &Connection,
    run_id: i64,
) -> Result<std::collections::HashMap<String, (i64, i64)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT r.ip,
               (SELECT COUNT(*) FROM router_networks n WHERE n.run_id = r.run_id AND n.router_ip = r.ip),
               (SELECT COUNT(*) FROM router_routes t WHERE t.run_id = r.run_id AND t.router_ip = r.ip)
        FROM routers r
        WHERE r.run_id = ?1
        "#,
    )?;

    let counts = stmt
        .query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
        })?
        .collect::<rusqlite::Result<std::collections::HashMap<_, _>>>()?;

    Ok(counts)
}

// ====== Edges ======

/// Idempotent edge insert; `true` when a new row was written.
pub fn insert_edge(
    conn: &Connection,
    run_id: i64,
    from_router: &str,
    to_router: &str,
    reason: EdgeReason,
) -> Result<bool> {
    let inserted = conn
        .execute(
            r#"
            INSERT OR IGNORE INTO topology_edges (run_id, from_router, to_router, reason, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![run_id, from_router, to_router, reason.as_str(), now_text()],
        )
        .context("Failed to insert topology edge")?;

    Ok(inserted > 0)
}

pub fn get_edges(conn: &Connection, run_id: i64) -> Result<Vec<TopologyEdge>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT from_router, to_router, reason FROM topology_edges
        WHERE run_id = ?1
        ORDER BY id ASC
        "#,
    )?;

    let edges = stmt
        .query_map(params![run_id], |row| {
            Ok(TopologyEdge {
                from_router: row.get(0)?,
                to_router: row.get(1)?,
                reason: parse_text_column(row.get::<_, String>(2)?, 2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(edges)
}

// ====== Helpers ======

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredCliCredentials(Vec<CliCredential>);

fn parse_datetime_column(s: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_text_column<T>(s: String, column: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e),
        )
    })
}
