//! SNMP protocol adapter
//!
//! Issues GET / GETNEXT requests against one router and returns typed
//! results. Stateless between calls: every attempt opens its own session,
//! and the timeout bounds the whole attempt (session, every request of a
//! walk), so one operation never runs past `SnmpSettings::worst_case`.

use async_trait::async_trait;
use snmp2::{AsyncSession, Oid, Value};
use std::future::Future;
use std::net::Ipv4Addr;
use tokio::time::timeout;

use super::decode::{self, SnmpValue, WalkRows};
use super::oids::*;
use super::types::{InterfaceAddress, RouteEntry, SystemInfo};
use crate::config::SnmpSettings;
use crate::database::{SnmpCredentials, SnmpVersion};
use crate::error::ProbeError;

/// The four queries the crawler runs against every host.
#[async_trait]
pub trait RouterProbe: Send + Sync {
    async fn get_system_info(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<SystemInfo, ProbeError>;

    async fn get_ip_forwarding(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<bool, ProbeError>;

    async fn get_interface_addresses(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<Vec<InterfaceAddress>, ProbeError>;

    async fn get_routing_entries(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<Vec<RouteEntry>, ProbeError>;
}

/// `RouterProbe` backed by real SNMP over UDP
#[derive(Debug, Clone, Default)]
pub struct SnmpAdapter {
    settings: SnmpSettings,
}

impl SnmpAdapter {
    pub fn new(settings: SnmpSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Self {
        Self::new(SnmpSettings::from_env())
    }

    async fn open(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<AsyncSession, ProbeError> {
        let addr = format!("{}:{}", ip, self.settings.port);
        let community = creds.community.as_bytes();

        let opened = match creds.version {
            SnmpVersion::V1 => AsyncSession::new_v1(&addr, community, 0).await,
            SnmpVersion::V2c => AsyncSession::new_v2c(&addr, community, 0).await,
        };

        opened.map_err(|e| {
            log_debug!("SNMP session to {} failed to open: {}", addr, e);
            ProbeError::Unreachable { ip, attempts: 1 }
        })
    }

    /// GET a single scalar. `None` when the agent reports the object missing.
    async fn get_scalar(
        &self,
        session: &mut AsyncSession,
        ip: Ipv4Addr,
        arcs: &[u64],
    ) -> Result<Option<SnmpValue>, ProbeError> {
        let oid = Oid::from(arcs).map_err(|e| ProbeError::MalformedResponse {
            ip,
            detail: format!("bad request OID {}: {:?}", dotted(arcs), e),
        })?;

        let mut response = session
            .get(&oid)
            .await
            .map_err(|e| classify_snmp_error(ip, &e))?;

        match response.error_status {
            0 => {}
            ERROR_STATUS_NO_SUCH_NAME => return Ok(None),
            ERROR_STATUS_AUTHORIZATION => return Err(ProbeError::AuthFailure { ip }),
            status => {
                return Err(ProbeError::MalformedResponse {
                    ip,
                    detail: format!("error-status {} for {}", status, dotted(arcs)),
                });
            }
        }

        Ok(response
            .varbinds
            .next()
            .map(|(_, value)| owned_value(&value))
            .filter(|value| !value.is_absent()))
    }

    /// GETNEXT walk of one subtree
    async fn walk(
        &self,
        session: &mut AsyncSession,
        ip: Ipv4Addr,
        prefix: &[u64],
    ) -> Result<WalkRows, ProbeError> {
        let mut rows = WalkRows::new();
        let mut cursor = prefix.to_vec();

        loop {
            if rows.len() >= self.settings.max_walk_rows {
                log_warn!(
                    "Walk of {} on {} stopped at the {} row cap",
                    dotted(prefix),
                    ip,
                    self.settings.max_walk_rows
                );
                break;
            }

            let oid = Oid::from(cursor.as_slice()).map_err(|e| ProbeError::MalformedResponse {
                ip,
                detail: format!("bad walk OID {}: {:?}", dotted(&cursor), e),
            })?;

            let mut response = session
                .getnext(&oid)
                .await
                .map_err(|e| classify_snmp_error(ip, &e))?;

            match response.error_status {
                0 => {}
                // v1 agents signal the end of the MIB this way
                ERROR_STATUS_NO_SUCH_NAME => break,
                ERROR_STATUS_AUTHORIZATION => return Err(ProbeError::AuthFailure { ip }),
                status => {
                    return Err(ProbeError::MalformedResponse {
                        ip,
                        detail: format!("error-status {} walking {}", status, dotted(prefix)),
                    });
                }
            }

            let Some((next_oid, value)) = response.varbinds.next() else {
                break;
            };
            let Some(arcs) = oid_arcs(&next_oid) else {
                log_warn!("Undecodable OID in walk of {} on {}", dotted(prefix), ip);
                break;
            };
            let value = owned_value(&value);

            if !arcs.starts_with(prefix) || value == SnmpValue::EndOfMibView {
                break;
            }
            if arcs <= cursor {
                log_warn!(
                    "Agent {} returned non-increasing OID {} after {}",
                    ip,
                    dotted(&arcs),
                    dotted(&cursor)
                );
                break;
            }

            cursor = arcs.clone();
            rows.push((arcs, value));
        }

        Ok(rows)
    }

    /// Runs `op` until it succeeds, fails deterministically, or the attempt
    /// budget is spent. Each attempt is cut off after `timeout`; waits
    /// `backoff * n` before attempt `n + 1`.
    async fn with_retries<T, F, Fut>(&self, ip: Ipv4Addr, mut op: F) -> Result<T, ProbeError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ProbeError>> + Send,
        T: Send,
    {
        let attempts = self.settings.attempts.max(1);
        let mut attempt: u8 = 1;

        loop {
            let outcome = match timeout(self.settings.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Unreachable { ip, attempts: attempt }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    log_debug!("SNMP attempt {}/{} to {} failed: {}", attempt, attempts, ip, e);
                    tokio::time::sleep(self.settings.backoff * u32::from(attempt)).await;
                    attempt += 1;
                }
                Err(ProbeError::Unreachable { .. }) => {
                    return Err(ProbeError::Unreachable { ip, attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl RouterProbe for SnmpAdapter {
    async fn get_system_info(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<SystemInfo, ProbeError> {
        self.with_retries(ip, || async move {
            let mut session = self.open(ip, creds).await?;
            let descr = self.get_scalar(&mut session, ip, SYS_DESCR).await?;
            let object_id = self.get_scalar(&mut session, ip, SYS_OBJECT_ID).await?;
            let name = self.get_scalar(&mut session, ip, SYS_NAME).await?;

            if let Some(value) = &descr
                && value.as_text().is_none()
                && !matches!(value, SnmpValue::OctetString(_))
            {
                return Err(ProbeError::MalformedResponse {
                    ip,
                    detail: format!("sysDescr has unexpected type {:?}", value),
                });
            }

            Ok(decode::decode_system_info(descr, object_id, name))
        })
        .await
    }

    async fn get_ip_forwarding(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<bool, ProbeError> {
        self.with_retries(ip, || async move {
            let mut session = self.open(ip, creds).await?;
            let value = self.get_scalar(&mut session, ip, IP_FORWARDING).await?;
            decode::decode_ip_forwarding(value)
                .map_err(|detail| ProbeError::MalformedResponse { ip, detail })
        })
        .await
    }

    async fn get_interface_addresses(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<Vec<InterfaceAddress>, ProbeError> {
        self.with_retries(ip, || async move {
            let mut session = self.open(ip, creds).await?;
            let rows = self.walk(&mut session, ip, IP_ADDR_ENTRY).await?;
            Ok(decode::decode_interface_table(rows))
        })
        .await
    }

    async fn get_routing_entries(
        &self,
        ip: Ipv4Addr,
        creds: &SnmpCredentials,
    ) -> Result<Vec<RouteEntry>, ProbeError> {
        self.with_retries(ip, || async move {
            let mut session = self.open(ip, creds).await?;
            let cidr_rows = self.walk(&mut session, ip, IP_CIDR_ROUTE_ENTRY).await?;
            if !cidr_rows.is_empty() {
                return Ok(decode::decode_cidr_route_table(cidr_rows));
            }

            log_debug!("{} has no ipCidrRouteTable, falling back to ipRouteTable", ip);
            let rows = self.walk(&mut session, ip, IP_ROUTE_ENTRY).await?;
            Ok(decode::decode_route_table(rows))
        })
        .await
    }
}

fn oid_arcs(oid: &Oid<'_>) -> Option<Vec<u64>> {
    oid.iter().map(|arcs| arcs.collect())
}

fn owned_value(value: &Value<'_>) -> SnmpValue {
    match value {
        Value::Integer(v) => SnmpValue::Integer(*v),
        Value::OctetString(bytes) => SnmpValue::OctetString(bytes.to_vec()),
        Value::ObjectIdentifier(oid) => match oid_arcs(oid) {
            Some(arcs) => SnmpValue::ObjectId(arcs),
            None => SnmpValue::Other,
        },
        Value::IpAddress(octets) => SnmpValue::IpAddress(Ipv4Addr::from(*octets)),
        Value::Counter32(v) | Value::Unsigned32(v) | Value::Timeticks(v) => {
            SnmpValue::Unsigned(u64::from(*v))
        }
        Value::Counter64(v) => SnmpValue::Unsigned(*v),
        Value::Null => SnmpValue::Null,
        Value::NoSuchObject | Value::NoSuchInstance => SnmpValue::Missing,
        Value::EndOfMibView => SnmpValue::EndOfMibView,
        _ => SnmpValue::Other,
    }
}

/// Maps an snmp2 error onto the adapter's failure classes.
fn classify_snmp_error(ip: Ipv4Addr, err: &snmp2::Error) -> ProbeError {
    use snmp2::Error;

    match err {
        Error::CommunityMismatch => ProbeError::AuthFailure { ip },
        Error::AsnParse
        | Error::AsnInvalidLen
        | Error::AsnWrongType
        | Error::AsnUnsupportedType
        | Error::AsnEof
        | Error::AsnIntOverflow
        | Error::UnsupportedVersion
        | Error::ValueOutOfRange
        | Error::BufferOverflow
        | Error::Mib(_) => ProbeError::MalformedResponse {
            ip,
            detail: err.to_string(),
        },
        // Send / Receive / RequestIdMismatch
        _ => ProbeError::Unreachable { ip, attempts: 1 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::time::{Duration, Instant};
    use tokio::net::UdpSocket;

    fn fast_settings(attempts: u8) -> SnmpSettings {
        SnmpSettings {
            attempts,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
            ..SnmpSettings::default()
        }
    }

    /// Header and content length of the BER TLV starting at `pos`.
    fn tlv(buf: &[u8], pos: usize) -> Option<(usize, usize)> {
        let first = *buf.get(pos + 1)?;
        if first < 0x80 {
            return Some((2, usize::from(first)));
        }
        let width = usize::from(first & 0x7f);
        let mut len = 0usize;
        for i in 0..width {
            len = (len << 8) | usize::from(*buf.get(pos + 2 + i)?);
        }
        Some((2 + width, len))
    }

    /// Rewrites a request datagram into a GetResponse carrying the same
    /// request id and (null) varbinds.
    fn echo_as_response(mut datagram: Vec<u8>) -> Option<Vec<u8>> {
        // SEQUENCE { version, community, PDU }
        let mut pos = tlv(&datagram, 0)?.0;
        for _ in 0..2 {
            let (header, content) = tlv(&datagram, pos)?;
            pos += header + content;
        }
        *datagram.get_mut(pos)? = 0xA2;
        Some(datagram)
    }

    /// Local agent that answers every request after `delay`.
    async fn slow_agent(delay: Duration) -> u16 {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let port = socket.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let request = buf[..len].to_vec();
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(response) = echo_as_response(request) {
                        let _ = socket.send_to(&response, peer).await;
                    }
                });
            }
        });

        port
    }

    fn agent_settings(port: u16) -> SnmpSettings {
        SnmpSettings {
            port,
            timeout: Duration::from_millis(300),
            attempts: 2,
            backoff: Duration::ZERO,
            ..SnmpSettings::default()
        }
    }

    #[test]
    fn test_error_classification_by_variant() {
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(
            classify_snmp_error(ip, &snmp2::Error::CommunityMismatch),
            ProbeError::AuthFailure { ip }
        );
        assert!(matches!(
            classify_snmp_error(ip, &snmp2::Error::AsnParse),
            ProbeError::MalformedResponse { .. }
        ));
        assert_eq!(
            classify_snmp_error(ip, &snmp2::Error::Receive),
            ProbeError::Unreachable { ip, attempts: 1 }
        );
        assert_eq!(
            classify_snmp_error(ip, &snmp2::Error::RequestIdMismatch),
            ProbeError::Unreachable { ip, attempts: 1 }
        );
    }

    #[test]
    fn test_error_text_does_not_decide_the_class() {
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let err = snmp2::Error::Mib("AuthFailure in SNMP-USER-BASED-SM-MIB".to_string());
        assert!(matches!(
            classify_snmp_error(ip, &err),
            ProbeError::MalformedResponse { .. }
        ));
    }

    #[tokio::test]
    async fn test_stalled_attempt_is_cut_off_at_timeout() {
        let settings = fast_settings(2);
        let bound = settings.worst_case();
        let adapter = SnmpAdapter::new(settings);
        let ip = Ipv4Addr::new(10, 0, 0, 1);

        let started = Instant::now();
        let result: Result<(), ProbeError> = adapter
            .with_retries(ip, || std::future::pending())
            .await;

        assert_eq!(result, Err(ProbeError::Unreachable { ip, attempts: 2 }));
        assert!(started.elapsed() <= bound + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_prompt_agent_answers_system_info() {
        let port = slow_agent(Duration::from_millis(20)).await;
        let adapter = SnmpAdapter::new(agent_settings(port));
        let ip = Ipv4Addr::LOCALHOST;

        let info = adapter
            .get_system_info(ip, &SnmpCredentials::v2c("public"))
            .await
            .expect("agent answers within the timeout");
        // The agent echoes null values back
        assert_eq!(info.sys_descr, None);
    }

    #[tokio::test]
    async fn test_slow_agent_cannot_stretch_an_attempt() {
        // Each GET answers inside the timeout, the three of them do not
        let port = slow_agent(Duration::from_millis(250)).await;
        let settings = agent_settings(port);
        let bound = settings.worst_case();
        let adapter = SnmpAdapter::new(settings);
        let ip = Ipv4Addr::LOCALHOST;

        let started = Instant::now();
        let result = adapter
            .get_system_info(ip, &SnmpCredentials::v2c("public"))
            .await;
        let elapsed = started.elapsed();

        assert_eq!(result, Err(ProbeError::Unreachable { ip, attempts: 2 }));
        assert!(
            elapsed <= bound + Duration::from_millis(100),
            "took {:?}, bound {:?}",
            elapsed,
            bound
        );
    }

    #[tokio::test]
    async fn test_retries_only_unreachable_and_counts_attempts() {
        let adapter = SnmpAdapter::new(fast_settings(3));
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let counter = AtomicU8::new(0);
        let calls = &counter;

        let result: Result<(), ProbeError> = adapter
            .with_retries(ip, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProbeError::Unreachable { ip, attempts: 1 })
            })
            .await;

        assert_eq!(result, Err(ProbeError::Unreachable { ip, attempts: 3 }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let adapter = SnmpAdapter::new(fast_settings(3));
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let counter = AtomicU8::new(0);
        let calls = &counter;

        let result: Result<(), ProbeError> = adapter
            .with_retries(ip, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProbeError::AuthFailure { ip })
            })
            .await;

        assert_eq!(result, Err(ProbeError::AuthFailure { ip }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let adapter = SnmpAdapter::new(fast_settings(2));
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let counter = AtomicU8::new(0);
        let calls = &counter;

        let result = adapter
            .with_retries(ip, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProbeError::Unreachable { ip, attempts: 1 })
                } else {
                    Ok(true)
                }
            })
            .await;

        assert_eq!(result, Ok(true));
    }
}
