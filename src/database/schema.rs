//! Database schema definitions
//!
//! Every discovery table is scoped by `run_id`; natural keys are the router
//! address within a run and the `(from, to)` pair for edges.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all database tables
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- One crawl attempt
        CREATE TABLE IF NOT EXISTS discovery_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL,
            root_ip TEXT NOT NULL,
            snmp_community TEXT NOT NULL,
            snmp_version TEXT NOT NULL,
            cli_credentials TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            error_message TEXT,
            hosts_queried INTEGER NOT NULL DEFAULT 0,
            -- Crawl loop ownership: bumped on every claim, heartbeat NULL
            -- once the owning loop has let go
            loop_generation INTEGER NOT NULL DEFAULT 0,
            loop_heartbeat_at TEXT
        );

        -- Singleton lock: at most one PENDING/RUNNING/PAUSED run
        CREATE TABLE IF NOT EXISTS active_run_lock (
            slot INTEGER PRIMARY KEY CHECK (slot = 1),
            run_id INTEGER NOT NULL,
            acquired_at TEXT NOT NULL,
            FOREIGN KEY (run_id) REFERENCES discovery_runs(id)
        );

        -- Queried hosts, one row per address per run
        CREATE TABLE IF NOT EXISTS routers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            ip TEXT NOT NULL,
            hostname TEXT,
            sys_descr TEXT,
            sys_object_id TEXT,
            vendor TEXT,
            model TEXT,
            is_router INTEGER NOT NULL DEFAULT 0,
            router_score INTEGER NOT NULL DEFAULT 0,
            classification_reason TEXT NOT NULL,
            discovered_at TEXT NOT NULL,
            UNIQUE(run_id, ip),
            FOREIGN KEY (run_id) REFERENCES discovery_runs(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS router_interfaces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            router_ip TEXT NOT NULL,
            if_index INTEGER,
            ip TEXT NOT NULL,
            netmask TEXT NOT NULL,
            UNIQUE(run_id, router_ip, ip),
            FOREIGN KEY (run_id, router_ip) REFERENCES routers(run_id, ip) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS router_networks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            router_ip TEXT NOT NULL,
            cidr TEXT NOT NULL,
            is_local INTEGER NOT NULL,
            UNIQUE(run_id, router_ip, cidr, is_local),
            FOREIGN KEY (run_id, router_ip) REFERENCES routers(run_id, ip) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS router_routes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            router_ip TEXT NOT NULL,
            destination TEXT NOT NULL,
            next_hop TEXT,
            protocol TEXT NOT NULL DEFAULT 'unknown',
            admin_distance INTEGER,
            metric INTEGER,
            source TEXT NOT NULL DEFAULT 'snmp',
            FOREIGN KEY (run_id, router_ip) REFERENCES routers(run_id, ip) ON DELETE CASCADE
        );

        -- Directed as stored; reverse pairs are kept
        CREATE TABLE IF NOT EXISTS topology_edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            from_router TEXT NOT NULL,
            to_router TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(run_id, from_router, to_router),
            FOREIGN KEY (run_id, from_router) REFERENCES routers(run_id, ip) ON DELETE CASCADE,
            FOREIGN KEY (run_id, to_router) REFERENCES routers(run_id, ip) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_runs_status ON discovery_runs(status);
        CREATE INDEX IF NOT EXISTS idx_routers_run ON routers(run_id, id);
        CREATE INDEX IF NOT EXISTS idx_interfaces_run ON router_interfaces(run_id, router_ip);
        CREATE INDEX IF NOT EXISTS idx_networks_run ON router_networks(run_id, router_ip);
        CREATE INDEX IF NOT EXISTS idx_routes_run ON router_routes(run_id, router_ip);
        CREATE INDEX IF NOT EXISTS idx_routes_next_hop ON router_routes(run_id, next_hop);
        CREATE INDEX IF NOT EXISTS idx_edges_run ON topology_edges(run_id);
        "#,
    )
    .context("Failed to create database tables")?;

    Ok(())
}
