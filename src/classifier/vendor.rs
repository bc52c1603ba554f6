//! Vendor and model derivation from the SNMP system group

use regex::Regex;
use std::sync::OnceLock;

/// Private enterprise numbers (1.3.6.1.4.1.N) of common router vendors
const ENTERPRISES: &[(u64, &str)] = &[
    (9, "Cisco"),
    (11, "HPE"),
    (2011, "Huawei"),
    (2636, "Juniper"),
    (6527, "Nokia"),
    (8072, "Net-SNMP"),
    (12356, "Fortinet"),
    (14988, "MikroTik"),
    (25461, "Palo Alto"),
    (30065, "Arista"),
    (41112, "Ubiquiti"),
];

/// sysDescr fragments used when the sysObjectID is missing or unknown
const DESCR_HINTS: &[(&[&str], &str)] = &[
    (&["cisco"], "Cisco"),
    (&["juniper", "junos"], "Juniper"),
    (&["mikrotik", "routeros"], "MikroTik"),
    (&["huawei", "vrp"], "Huawei"),
    (&["arista"], "Arista"),
    (&["fortigate", "fortinet"], "Fortinet"),
    (&["palo alto", "pan-os"], "Palo Alto"),
    (&["nokia", "timos"], "Nokia"),
    (&["ubiquiti", "edgeos"], "Ubiquiti"),
    (&["procurve", "hewlett"], "HPE"),
];

const ENTERPRISE_PREFIX: &[u64] = &[1, 3, 6, 1, 4, 1];

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// Enterprise number of a dotted sysObjectID, if it sits under 1.3.6.1.4.1.
pub fn enterprise_number(sys_object_id: &str) -> Option<u64> {
    let arcs: Vec<u64> = sys_object_id
        .trim()
        .trim_start_matches('.')
        .split('.')
        .map(|a| a.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;

    if arcs.len() > ENTERPRISE_PREFIX.len() && arcs.starts_with(ENTERPRISE_PREFIX) {
        Some(arcs[ENTERPRISE_PREFIX.len()])
    } else {
        None
    }
}

pub fn vendor_from_object_id(sys_object_id: &str) -> Option<&'static str> {
    let number = enterprise_number(sys_object_id)?;
    ENTERPRISES
        .iter()
        .find(|(n, _)| *n == number)
        .map(|(_, name)| *name)
}

pub fn derive_vendor(sys_descr: Option<&str>, sys_object_id: Option<&str>) -> Option<String> {
    if let Some(vendor) = sys_object_id.and_then(vendor_from_object_id) {
        return Some(vendor.to_string());
    }

    let descr = sys_descr?.to_lowercase();
    DESCR_HINTS
        .iter()
        .find(|(needles, _)| contains_any(&descr, needles))
        .map(|(_, name)| name.to_string())
}

fn model_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Cisco IOS: "Cisco IOS Software, C2900 Software (C2900-UNIVERSALK9-M), ..."
            r"(?i)software(?: \[[^\]]*\])?,\s*([A-Za-z0-9_-]+) software",
            // Juniper: "Juniper Networks, Inc. mx480 internet router, ..."
            r"(?i)juniper networks, inc\.\s+([A-Za-z][A-Za-z0-9-]*)",
            // MikroTik: "RouterOS CCR1036-8G-2S+"
            r"(?i)routeros\s+([A-Za-z][A-Za-z0-9+-]*)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

pub fn derive_model(sys_descr: Option<&str>) -> Option<String> {
    let descr = sys_descr?;
    model_patterns()
        .iter()
        .find_map(|re| re.captures(descr))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
