//! NEXUS Route Mapper: SNMP-driven discovery of routed IPv4 topology
//!
//! This crate provides:
//! - A breadth-first crawler that hops from router to router along next hops
//!   and shared subnets
//! - Pausable, cancellable and resumable discovery runs with a
//!   deployment-wide active-run lock
//! - An SNMP v1/v2c adapter with per-request timeout and retry
//! - A router classification heuristic with vendor/model derivation
//! - SQLite storage for runs, routers, interfaces, networks, routes and edges

#[macro_use]
pub mod logging;

pub mod app;
mod cli;
pub mod cli_adapter;
pub mod classifier;
pub mod command;
mod command_handlers;
pub mod config;
pub mod crawler;
pub mod database;
pub mod error;
pub mod network;
pub mod snmp;

pub use app::{
    AppCommandResult, AppContext, AppEvent, EventHook, OutputHook, execute_command,
    execute_command_typed, execute_command_with_context,
};
pub use classifier::{Classification, Observation, ROUTER_THRESHOLD, classify};
pub use cli_adapter::{run, run_with_context, run_with_ctrl_c};
pub use command::AppCommand;
pub use config::{CrawlSettings, SnmpSettings};
pub use crawler::{CliRouteFetcher, Crawler, RouterDetail, RunState, Topology, UndirectedLink};
pub use database::{
    CliCredential, Database, EdgeReason, RouteSource, RouterRecord, RunStatus, SnmpCredentials,
    SnmpVersion, TopologyEdge,
};
pub use error::{DiscoveryError, DiscoveryResult, ProbeError};
pub use snmp::{InterfaceAddress, RouteEntry, RouteProtocol, RouterProbe, SnmpAdapter, SystemInfo};
