//! Network module - subnet arithmetic

mod subnet;

pub use subnet::{
    cidr_string, is_ignored_address, network_of, parse_root_address, shared_network,
};
