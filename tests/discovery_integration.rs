mod common;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use common::{FakeProbe, ScriptedHost, chain_probe, creds, ip};
use nexus_routemap::database::{self, RunCreation, TransitionOutcome};
use nexus_routemap::{
    CrawlSettings, Crawler, Database, DiscoveryError, EdgeReason, ProbeError, RunStatus,
    SnmpCredentials, Topology,
};

fn crawler_with(probe: Arc<FakeProbe>) -> Crawler {
    let db = Database::in_memory().expect("in-memory database should open");
    Crawler::new(db, probe, CrawlSettings::default())
}

fn edge_set(topology: &Topology) -> BTreeSet<(String, String, &'static str)> {
    topology
        .edges
        .iter()
        .map(|e| (e.from_router.clone(), e.to_router.clone(), e.reason.as_str()))
        .collect()
}

fn router_ips(topology: &Topology) -> Vec<String> {
    topology.routers.iter().map(|r| r.ip.clone()).collect()
}

fn edge(from: &str, to: &str, reason: EdgeReason) -> (String, String, &'static str) {
    (from.to_string(), to.to_string(), reason.as_str())
}

/// Calls `action` on the crawler the first time `trigger` is queried.
fn one_shot_hook(
    trigger: &str,
    action: fn(&Crawler, i64),
) -> (
    impl Fn(Ipv4Addr) + Send + Sync + 'static,
    Arc<OnceLock<(Crawler, i64)>>,
) {
    let control: Arc<OnceLock<(Crawler, i64)>> = Arc::new(OnceLock::new());
    let fired = AtomicBool::new(false);
    let trigger = ip(trigger);
    let hook_control = Arc::clone(&control);
    let hook = move |queried: Ipv4Addr| {
        if queried != trigger || fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((crawler, run_id)) = hook_control.get() {
            action(crawler, *run_id);
        }
    };
    (hook, control)
}

#[tokio::test]
async fn two_routers_link_in_both_directions_by_next_hop() {
    let probe = Arc::new(
        FakeProbe::new()
            .host(
                "10.0.0.1",
                ScriptedHost::router("r1")
                    .iface("10.0.0.1", "255.255.255.252")
                    .route("0.0.0.0", "0.0.0.0", Some("10.0.0.2")),
            )
            .host(
                "10.0.0.2",
                ScriptedHost::router("r2")
                    .iface("10.0.0.2", "255.255.255.252")
                    .route("0.0.0.0", "0.0.0.0", Some("10.0.0.1")),
            ),
    );
    let crawler = crawler_with(Arc::clone(&probe));

    let run_id = crawler
        .start_run("10.0.0.1", creds(), Vec::new())
        .expect("run should start");
    let state = crawler.wait(run_id).await.expect("run should be readable");

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.hosts_queried, 2);
    assert!(state.finished_at.is_some());

    let topology = crawler.get_topology(run_id).expect("topology should load");
    assert_eq!(router_ips(&topology), vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(
        edge_set(&topology),
        BTreeSet::from([
            edge("10.0.0.1", "10.0.0.2", EdgeReason::NextHop),
            edge("10.0.0.2", "10.0.0.1", EdgeReason::NextHop),
        ])
    );
    assert_eq!(topology.undirected_links.len(), 1);
    assert_eq!(topology.undirected_links[0].reasons, vec![EdgeReason::NextHop]);
    assert!(topology.routers.iter().all(|r| r.is_router));
}

#[tokio::test]
async fn unreachable_root_completes_with_one_failed_record() {
    let probe = Arc::new(FakeProbe::new());
    let crawler = crawler_with(Arc::clone(&probe));

    let run_id = crawler
        .start_run("10.9.9.9", creds(), Vec::new())
        .expect("run should start");
    let state = crawler.wait(run_id).await.expect("run should be readable");

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.error_message, None);

    let topology = crawler.get_topology(run_id).expect("topology should load");
    assert_eq!(topology.routers.len(), 1);
    let root = &topology.routers[0];
    assert_eq!(root.ip, "10.9.9.9");
    assert!(!root.is_router);
    assert_eq!(root.classification_reason, "unreachable");
    assert!(topology.edges.is_empty());
    assert_eq!(probe.query_count("10.9.9.9"), 1);
}

#[tokio::test]
async fn auth_failure_is_recorded_as_non_router() {
    let probe = Arc::new(FakeProbe::new().host(
        "10.0.0.1",
        ScriptedHost::failing(ProbeError::AuthFailure { ip: ip("10.0.0.1") }),
    ));
    let crawler = crawler_with(probe);

    let run_id = crawler
        .start_run("10.0.0.1", creds(), Vec::new())
        .expect("run should start");
    crawler.wait(run_id).await.expect("run should be readable");

    let detail = crawler
        .get_router_detail(run_id, "10.0.0.1")
        .expect("root should be recorded");
    assert_eq!(detail.router.classification_reason, "auth_failure");
    assert!(!detail.router.is_router);
    assert!(detail.routes.is_empty());
}

#[tokio::test]
async fn shared_subnet_links_routers_on_one_segment() {
    let probe = Arc::new(
        FakeProbe::new()
            .host(
                "10.0.0.1",
                ScriptedHost::router("r1")
                    .iface("10.0.0.1", "255.255.255.0")
                    .route("172.16.0.0", "255.255.0.0", Some("10.0.0.2")),
            )
            .host(
                "10.0.0.2",
                ScriptedHost::router("r2").iface("10.0.0.2", "255.255.255.0"),
            ),
    );
    let crawler = crawler_with(probe);

    let run_id = crawler
        .start_run("10.0.0.1", creds(), Vec::new())
        .expect("run should start");
    crawler.wait(run_id).await.expect("run should be readable");

    let topology = crawler.get_topology(run_id).expect("topology should load");
    assert_eq!(
        edge_set(&topology),
        BTreeSet::from([
            edge("10.0.0.1", "10.0.0.2", EdgeReason::NextHop),
            edge("10.0.0.2", "10.0.0.1", EdgeReason::SharedSubnet),
        ])
    );
    assert_eq!(topology.undirected_links.len(), 1);
    assert_eq!(
        topology.undirected_links[0].reasons,
        vec![EdgeReason::NextHop, EdgeReason::SharedSubnet]
    );
}

#[tokio::test]
async fn routers_on_one_segment_link_without_naming_each_other() {
    // The root reaches R1 and R2 over separate /30s; R1 and R2 share a LAN
    // but neither routes through the other
    let probe = Arc::new(
        FakeProbe::new()
            .host(
                "10.0.1.1",
                ScriptedHost::router("root")
                    .iface("10.0.1.1", "255.255.255.252")
                    .iface("10.0.2.1", "255.255.255.252")
                    .route("10.10.0.0", "255.255.0.0", Some("10.0.1.2"))
                    .route("10.20.0.0", "255.255.0.0", Some("10.0.2.2")),
            )
            .host(
                "10.0.1.2",
                ScriptedHost::router("r1")
                    .iface("10.0.1.2", "255.255.255.252")
                    .iface("192.168.1.1", "255.255.255.0")
                    .route("192.168.1.0", "255.255.255.0", None)
                    .route("0.0.0.0", "0.0.0.0", Some("10.0.1.1")),
            )
            .host(
                "10.0.2.2",
                ScriptedHost::router("r2")
                    .iface("10.0.2.2", "255.255.255.252")
                    .iface("192.168.1.2", "255.255.255.0")
                    .route("192.168.1.0", "255.255.255.0", None)
                    .route("0.0.0.0", "0.0.0.0", Some("10.0.2.1")),
            ),
    );
    let crawler = crawler_with(probe);

    let run_id = crawler
        .start_run("10.0.1.1", creds(), Vec::new())
        .expect("run should start");
    let state = crawler.wait(run_id).await.expect("run should be readable");
    assert_eq!(state.status, RunStatus::Completed);

    let topology = crawler.get_topology(run_id).expect("topology should load");
    let edges = edge_set(&topology);
    assert_eq!(
        edges,
        BTreeSet::from([
            edge("10.0.1.1", "10.0.1.2", EdgeReason::NextHop),
            edge("10.0.1.1", "10.0.2.2", EdgeReason::NextHop),
            edge("10.0.1.2", "10.0.1.1", EdgeReason::NextHop),
            edge("10.0.2.2", "10.0.1.1", EdgeReason::NextHop),
            edge("10.0.2.2", "10.0.1.2", EdgeReason::SharedSubnet),
        ])
    );
    assert!(!edges.contains(&edge("10.0.1.2", "10.0.2.2", EdgeReason::NextHop)));
    assert!(!edges.contains(&edge("10.0.2.2", "10.0.1.2", EdgeReason::NextHop)));

    let lan_link = topology
        .undirected_links
        .iter()
        .find(|link| {
            let pair = [link.a.as_str(), link.b.as_str()];
            pair.contains(&"10.0.1.2") && pair.contains(&"10.0.2.2")
        })
        .expect("R1 and R2 should be linked");
    assert_eq!(lan_link.reasons, vec![EdgeReason::SharedSubnet]);
}

#[tokio::test]
async fn chain_is_crawled_breadth_first_without_duplicate_queries() {
    let probe = Arc::new(chain_probe());
    let crawler = crawler_with(Arc::clone(&probe));

    let run_id = crawler
        .start_run("10.0.12.1", creds(), Vec::new())
        .expect("run should start");
    let state = crawler.wait(run_id).await.expect("run should be readable");
    assert_eq!(state.status, RunStatus::Completed);

    for host in ["10.0.12.1", "10.0.12.2", "10.0.23.2", "10.0.34.2"] {
        assert_eq!(probe.query_count(host), 1, "{} queried once", host);
    }
    // Interface aliases of recorded routers are never queried
    assert_eq!(probe.query_count("10.0.23.1"), 0);
    assert_eq!(probe.query_count("10.0.34.1"), 0);
    assert_eq!(probe.total_queries(), 4);

    let topology = crawler.get_topology(run_id).expect("topology should load");
    assert_eq!(
        router_ips(&topology),
        vec!["10.0.12.1", "10.0.12.2", "10.0.23.2", "10.0.34.2"]
    );
    assert_eq!(
        edge_set(&topology),
        BTreeSet::from([
            edge("10.0.12.1", "10.0.12.2", EdgeReason::NextHop),
            edge("10.0.12.2", "10.0.12.1", EdgeReason::SharedSubnet),
            edge("10.0.12.2", "10.0.23.2", EdgeReason::NextHop),
            edge("10.0.23.2", "10.0.12.2", EdgeReason::NextHop),
            edge("10.0.23.2", "10.0.34.2", EdgeReason::NextHop),
            edge("10.0.34.2", "10.0.23.2", EdgeReason::NextHop),
        ])
    );
    assert_eq!(topology.undirected_links.len(), 3);

    let r2 = crawler
        .get_router_detail(run_id, "10.0.12.2")
        .expect("r2 should be recorded");
    assert_eq!(r2.interfaces.len(), 2);
    assert_eq!(r2.routes.len(), 3);
    assert!(r2.networks.iter().any(|n| n.cidr == "10.0.34.0/30" && !n.is_local));
    assert_eq!(r2.router.vendor.as_deref(), Some("Cisco"));
}

#[tokio::test]
async fn pause_then_resume_matches_uninterrupted_run() {
    let baseline = crawler_with(Arc::new(chain_probe()));
    let baseline_run = baseline
        .start_run("10.0.12.1", creds(), Vec::new())
        .expect("baseline run should start");
    baseline.wait(baseline_run).await.expect("baseline should finish");
    let expected = baseline
        .get_topology(baseline_run)
        .expect("baseline topology should load");

    let (hook, control) = one_shot_hook("10.0.23.2", |crawler, run_id| {
        crawler.pause(run_id).expect("pause should be accepted");
    });
    let probe = Arc::new(chain_probe().on_query(hook));
    let crawler = crawler_with(Arc::clone(&probe));
    let run_id = crawler
        .start_run("10.0.12.1", creds(), Vec::new())
        .expect("run should start");
    let _ = control.set((crawler.clone(), run_id));

    let paused = crawler.wait(run_id).await.expect("run should be readable");
    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(paused.hosts_queried, 3);
    assert_eq!(paused.finished_at, None);

    let partial = crawler.get_topology(run_id).expect("partial topology");
    assert_eq!(
        router_ips(&partial),
        vec!["10.0.12.1", "10.0.12.2", "10.0.23.2"]
    );

    // The active-run lock is still held while paused
    let blocked = crawler.start_run("10.0.12.1", creds(), Vec::new());
    assert_eq!(
        blocked,
        Err(DiscoveryError::AlreadyRunning {
            active_run_id: run_id
        })
    );

    crawler.resume(run_id).expect("resume should be accepted");
    let finished = crawler.wait(run_id).await.expect("run should be readable");
    assert_eq!(finished.status, RunStatus::Completed);

    let resumed = crawler.get_topology(run_id).expect("final topology");
    assert_eq!(router_ips(&resumed), router_ips(&expected));
    assert_eq!(edge_set(&resumed), edge_set(&expected));
    assert_eq!(probe.total_queries(), 4);
}

#[tokio::test]
async fn cancel_keeps_partial_results_and_releases_lock() {
    let (hook, control) = one_shot_hook("10.0.12.2", |crawler, run_id| {
        crawler.cancel(run_id).expect("cancel should be accepted");
    });
    let probe = Arc::new(chain_probe().on_query(hook));
    let crawler = crawler_with(probe);
    let run_id = crawler
        .start_run("10.0.12.1", creds(), Vec::new())
        .expect("run should start");
    let _ = control.set((crawler.clone(), run_id));

    let state = crawler.wait(run_id).await.expect("run should be readable");
    assert_eq!(state.status, RunStatus::Cancelled);
    assert_eq!(state.error_message, None);
    assert!(state.finished_at.is_some());

    let topology = crawler.get_topology(run_id).expect("topology should load");
    assert_eq!(router_ips(&topology), vec!["10.0.12.1", "10.0.12.2"]);

    assert_eq!(
        crawler.resume(run_id),
        Err(DiscoveryError::InvalidTransition {
            run_id,
            status: RunStatus::Cancelled,
            action: "resume",
        })
    );

    let next = crawler
        .start_run("10.0.12.1", creds(), Vec::new())
        .expect("lock should be free after cancel");
    assert_ne!(next, run_id);
    crawler.wait(next).await.expect("second run should finish");
}

#[tokio::test]
async fn second_start_is_rejected_while_a_run_is_active() {
    let crawler = crawler_with(Arc::new(chain_probe()));
    let first = crawler
        .start_run("10.0.12.1", creds(), Vec::new())
        .expect("first run should start");

    assert_eq!(
        crawler.start_run("10.0.34.2", creds(), Vec::new()),
        Err(DiscoveryError::AlreadyRunning {
            active_run_id: first
        })
    );

    crawler.wait(first).await.expect("first run should finish");
}

#[tokio::test]
async fn invalid_inputs_are_rejected_before_a_run_exists() {
    let crawler = crawler_with(Arc::new(FakeProbe::new()));

    for bad in ["not-an-ip", "0.0.0.0", "255.255.255.255", "224.0.0.5", "10.0.0.1/24"] {
        assert_eq!(
            crawler.start_run(bad, creds(), Vec::new()),
            Err(DiscoveryError::InvalidAddress(bad.to_string())),
            "{}",
            bad
        );
    }

    assert!(matches!(
        crawler.start_run("10.0.0.1", SnmpCredentials::v2c("  "), Vec::new()),
        Err(DiscoveryError::InvalidCredentials(_))
    ));

    assert!(crawler.list_runs(10).expect("runs should list").is_empty());
    assert_eq!(
        crawler.get_run_state(42),
        Err(DiscoveryError::RunNotFound(42))
    );
}

#[tokio::test]
async fn control_operations_on_finished_run_are_invalid_transitions() {
    let crawler = crawler_with(Arc::new(FakeProbe::new()));
    let run_id = crawler
        .start_run("10.0.0.1", creds(), Vec::new())
        .expect("run should start");
    crawler.wait(run_id).await.expect("run should finish");

    for (result, action) in [
        (crawler.pause(run_id), "pause"),
        (crawler.resume(run_id), "resume"),
        (crawler.cancel(run_id), "cancel"),
    ] {
        assert_eq!(
            result,
            Err(DiscoveryError::InvalidTransition {
                run_id,
                status: RunStatus::Completed,
                action,
            })
        );
    }

    assert_eq!(crawler.pause(999), Err(DiscoveryError::RunNotFound(999)));
}

#[tokio::test]
async fn orphaned_running_run_recovers_through_pause_and_resume() {
    let crawler = crawler_with(Arc::new(chain_probe()));
    let run_id = {
        let conn = crawler.database().lock().expect("store should lock");
        let run_id = match database::create_run(&conn, "10.0.12.1", &creds(), &[])
            .expect("run should be created")
        {
            RunCreation::Created(run_id) => run_id,
            other => panic!("unexpected {:?}", other),
        };
        let moved = database::transition_run(
            &conn,
            run_id,
            &[RunStatus::Pending],
            RunStatus::Running,
            None,
        )
        .expect("transition should apply");
        assert_eq!(moved, TransitionOutcome::Applied);
        run_id
    };

    // No loop in this process owns the run
    crawler.pause(run_id).expect("stored pause should apply");
    assert_eq!(
        crawler.get_run_state(run_id).expect("run").status,
        RunStatus::Paused
    );

    crawler.resume(run_id).expect("resume should start a loop");
    let state = crawler.wait(run_id).await.expect("run should finish");
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.hosts_queried, 4);
}

#[tokio::test]
async fn second_crawler_waits_for_the_loop_that_owns_the_run() {
    let other: Arc<OnceLock<(Crawler, i64)>> = Arc::new(OnceLock::new());
    let outcomes: Arc<Mutex<Vec<Result<(), DiscoveryError>>>> = Arc::default();
    let fired = AtomicBool::new(false);

    let hook_other = Arc::clone(&other);
    let hook_outcomes = Arc::clone(&outcomes);
    let probe = Arc::new(chain_probe().on_query(move |queried| {
        if queried != ip("10.0.12.2") || fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((crawler, run_id)) = hook_other.get() {
            let mut outcomes = hook_outcomes
                .lock()
                .expect("outcome lock should not be poisoned");
            outcomes.push(crawler.pause(*run_id));
            outcomes.push(crawler.resume(*run_id));
        }
    }));

    let db = Database::in_memory().expect("in-memory database should open");
    let first = Crawler::new(db.clone(), probe.clone(), CrawlSettings::default());
    let second = Crawler::new(db, probe.clone(), CrawlSettings::default());

    let run_id = first
        .start_run("10.0.12.1", creds(), Vec::new())
        .expect("run should start");
    assert!(other.set((second.clone(), run_id)).is_ok());

    // The first loop lands the host it was querying, then honours the pause
    let paused = first.wait(run_id).await.expect("run should be readable");
    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(paused.hosts_queried, 2);
    assert_eq!(
        *outcomes.lock().expect("outcome lock should not be poisoned"),
        vec![
            Ok(()),
            Err(DiscoveryError::AlreadyRunning {
                active_run_id: run_id
            }),
        ]
    );

    second.resume(run_id).expect("resume should succeed once the loop let go");
    let finished = second.wait(run_id).await.expect("run should finish");
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.hosts_queried, 4);

    for host in ["10.0.12.1", "10.0.12.2", "10.0.23.2", "10.0.34.2"] {
        assert_eq!(probe.query_count(host), 1, "{} queried once", host);
    }
    assert_eq!(probe.total_queries(), 4);
}

#[tokio::test]
async fn host_budget_stops_the_crawl() {
    let db = Database::in_memory().expect("in-memory database should open");
    let crawler = Crawler::new(db, Arc::new(chain_probe()), CrawlSettings {
            max_hosts: 2,
            ..CrawlSettings::default()
        });

    let run_id = crawler
        .start_run("10.0.12.1", creds(), Vec::new())
        .expect("run should start");
    let state = crawler.wait(run_id).await.expect("run should finish");

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.hosts_queried, 2);
}

#[tokio::test]
async fn failed_route_facet_degrades_instead_of_failing_the_host() {
    let probe = Arc::new(
        FakeProbe::new().host(
            "10.0.0.1",
            ScriptedHost::router("r1")
                .iface("10.0.0.1", "255.255.255.0")
                .iface("10.0.1.1", "255.255.255.0")
                .routes_fail(ProbeError::MalformedResponse {
                    ip: ip("10.0.0.1"),
                    detail: "bad row".to_string(),
                }),
        ),
    );
    let crawler = crawler_with(probe);

    let run_id = crawler
        .start_run("10.0.0.1", creds(), Vec::new())
        .expect("run should start");
    crawler.wait(run_id).await.expect("run should finish");

    let detail = crawler
        .get_router_detail(run_id, "10.0.0.1")
        .expect("root should be recorded");
    assert!(detail.router.is_router);
    assert!(detail.routes.is_empty());
    assert_eq!(detail.interfaces.len(), 2);
    assert!(
        detail
            .router
            .classification_reason
            .ends_with("routes_unavailable=malformed_response")
    );
}

#[tokio::test]
async fn runs_are_listed_newest_first() {
    let crawler = crawler_with(Arc::new(FakeProbe::new()));
    let mut ids = Vec::new();
    for root in ["10.0.0.1", "10.0.0.2"] {
        let run_id = crawler
            .start_run(root, creds(), Vec::new())
            .expect("run should start");
        crawler.wait(run_id).await.expect("run should finish");
        ids.push(run_id);
    }

    let runs = crawler.list_runs(10).expect("runs should list");
    let listed: Vec<i64> = runs.iter().map(|r| r.run_id).collect();
    assert_eq!(listed, vec![ids[1], ids[0]]);

    let limited = crawler.list_runs(1).expect("runs should list");
    assert_eq!(limited.len(), 1);
}
