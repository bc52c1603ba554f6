use crate::database::SnmpVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Crawl {
        root_ip: String,
        community: String,
        snmp_version: SnmpVersion,
    },
    Resume {
        run_id: i64,
    },
    Pause {
        run_id: i64,
    },
    Cancel {
        run_id: i64,
    },
    Runs {
        limit: i64,
    },
    Status {
        run_id: i64,
    },
    Topology {
        run_id: i64,
    },
    Router {
        run_id: i64,
        ip: String,
    },
    Help,
    Version,
}
