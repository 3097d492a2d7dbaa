//! SRV answer parsing and target selection (RFC 2782).
//!
//! The backend hands back the raw DNS message for a `_service._proto.domain`
//! query. This module decodes it with hickory-proto, keeps the SRV answers and
//! picks one target: lowest priority first, then a weighted random draw among
//! the records sharing that priority.

use crate::base::neterror::NetError;
use hickory_resolver::proto::op::Message;
use hickory_resolver::proto::rr::RData;
use rand::Rng;

/// One usable SRV target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Target host without the trailing root dot.
    pub host: String,
}

/// Build the owner name of an SRV query: `_service._protocol.domain`.
pub fn srv_query_name(domain: &str, service: &str, protocol: &str) -> String {
    format!(
        "_{}._{}.{}",
        service.trim_start_matches('_'),
        protocol.trim_start_matches('_'),
        domain.trim_end_matches('.')
    )
}

/// Decode a DNS response and collect its SRV answers.
///
/// Targets equal to `.` ("service not available") are dropped. An empty,
/// truncated or otherwise undecodable message is
/// [`NetError::DnsMalformedResponse`]; a well-formed message with no usable SRV
/// answer is [`NetError::NameNotResolved`].
pub fn parse_srv_response(answer: &[u8]) -> Result<Vec<SrvTarget>, NetError> {
    if answer.is_empty() {
        return Err(NetError::DnsMalformedResponse);
    }

    let message = Message::from_vec(answer).map_err(|e| {
        tracing::debug!(error = %e, len = answer.len(), "undecodable SRV response");
        NetError::DnsMalformedResponse
    })?;

    let targets: Vec<SrvTarget> = message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            RData::SRV(srv) => Some(srv),
            _ => None,
        })
        .filter_map(|srv| {
            let host = srv.target().to_utf8();
            let host = host.trim_end_matches('.');
            if host.is_empty() {
                return None;
            }
            Some(SrvTarget {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                host: host.to_string(),
            })
        })
        .collect();

    if targets.is_empty() {
        return Err(NetError::NameNotResolved);
    }
    Ok(targets)
}

/// Pick a target: lowest priority wins, ties are broken by a weighted draw.
///
/// Zero-weight records are ordered first so they remain selectable when the
/// draw lands on zero.
pub fn select_target<'a, R: Rng + ?Sized>(
    targets: &'a [SrvTarget],
    rng: &mut R,
) -> Option<&'a SrvTarget> {
    let lowest = targets.iter().map(|t| t.priority).min()?;

    let mut group: Vec<&SrvTarget> = targets.iter().filter(|t| t.priority == lowest).collect();
    group.sort_by_key(|t| t.weight != 0);

    let total: u32 = group.iter().map(|t| u32::from(t.weight)).sum();
    if total == 0 {
        return group.first().copied();
    }

    let draw = rng.gen_range(0..=total);
    let mut running = 0u32;
    for target in &group {
        running += u32::from(target.weight);
        if running >= draw {
            return Some(target);
        }
    }
    group.last().copied()
}

/// Parse an SRV response and select the target to connect to.
pub fn resolve_srv_answer<R: Rng + ?Sized>(
    answer: &[u8],
    rng: &mut R,
) -> Result<(String, u16), NetError> {
    let targets = parse_srv_response(answer)?;
    let target = select_target(&targets, rng).ok_or(NetError::NameNotResolved)?;
    tracing::debug!(
        host = %target.host,
        port = target.port,
        candidates = targets.len(),
        "selected SRV target"
    );
    Ok((target.host.clone(), target.port))
}
