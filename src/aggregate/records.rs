//! Finalized telemetry records and the parsed request shapes feeding them.

use std::collections::BTreeMap;

use uuid::Uuid;

/// Parsed view of one network call's target and outcome.
#[derive(Clone, Debug, Default)]
pub struct RequestParams {
    pub method: String,
    /// `None` for non-network URI schemes; such calls are never collected.
    pub hostname: Option<String>,
    pub port: String,
    pub protocol: String,
    pub pathname: String,
    pub query: String,
    pub body: Option<String>,
    pub status: u16,
}

/// Sizes and callback-time totals accumulated over one invocation.
#[derive(Clone, Debug, Default)]
pub struct RequestMetrics {
    pub request_size: Option<u64>,
    pub response_size: Option<u64>,
    pub callback_ms: f64,
}

/// Which wrapping path produced the lifecycle, per the closed-variant rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Xhr,
    Fetch,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Xhr => "xhr",
            RequestKind::Fetch => "fetch",
        }
    }
}

/// Distributed-tracing payload attached to an outgoing call.
#[derive(Clone, Debug, PartialEq)]
pub struct TracePayload {
    pub span_id: String,
    pub trace_id: String,
    pub timestamp: f64,
}

impl TracePayload {
    pub fn generate(timestamp: f64) -> Self {
        let span = Uuid::new_v4().simple().to_string();
        let trace = Uuid::new_v4().simple().to_string();
        Self {
            span_id: span[..16].to_string(),
            trace_id: trace,
            timestamp,
        }
    }
}

/// GraphQL operation metadata recovered from a request body or query string.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphQlInfo {
    pub operation_name: String,
    pub operation_type: String,
}

/// One finalized, filtered network-call telemetry entry. Immutable once
/// appended to an output buffer.
#[derive(Clone, Debug)]
pub struct RequestRecord {
    pub method: String,
    pub status: u16,
    pub hostname: String,
    pub port: String,
    pub protocol: String,
    pub path: String,
    pub start_ms: f64,
    pub end_ms: f64,
    pub request_size: Option<u64>,
    pub response_size: Option<u64>,
    pub callback_ms: f64,
    pub kind: RequestKind,
    pub span_id: Option<String>,
    pub trace_id: Option<String>,
    pub trace_ms: Option<f64>,
    pub gql: Option<GraphQlInfo>,
    pub entity: Option<String>,
    pub attrs: BTreeMap<String, String>,
}

/// FNV-1a over (status, category-or-host, path); the correlation key shared
/// with the trace-recording consumer.
pub fn dedup_hash(status: u16, category_or_host: &str, path: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut eat = |bytes: &[u8]| {
        for b in bytes {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    };
    eat(status.to_string().as_bytes());
    eat(category_or_host.as_bytes());
    eat(path.as_bytes());
    hash
}

fn default_port(protocol: &str) -> &'static str {
    if protocol == "https" {
        "443"
    } else {
        "80"
    }
}

/// Splits a URL-like string into the pieces telemetry cares about. Relative
/// paths resolve against the page origin; scheme-only URIs (`data:`,
/// `blob:` and friends) yield no hostname and are filtered downstream.
pub fn parse_url(raw: &str, origin: &str) -> RequestParams {
    let mut params = RequestParams::default();

    let (protocol, rest) = match raw.find("://") {
        Some(idx) => (&raw[..idx], &raw[idx + 3..]),
        None if raw.starts_with('/') => {
            params.protocol = "https".to_string();
            params.hostname = Some(origin.to_string());
            params.port = default_port("https").to_string();
            let (path, query) = split_path(raw);
            params.pathname = path;
            params.query = query;
            return params;
        }
        None => {
            // Non-network scheme such as data: — no hostname to report.
            params.protocol = raw.split(':').next().unwrap_or_default().to_string();
            params.pathname = raw.to_string();
            return params;
        }
    };
    params.protocol = protocol.to_string();

    let (hostport, pathquery) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = match hostport.find(':') {
        Some(idx) => (&hostport[..idx], &hostport[idx + 1..]),
        None => (hostport, default_port(protocol)),
    };
    params.hostname = Some(host.to_string());
    params.port = port.to_string();

    let (path, query) = split_path(pathquery);
    params.pathname = path;
    params.query = query;
    params
}

fn split_path(pathquery: &str) -> (String, String) {
    match pathquery.find('?') {
        Some(idx) => (
            pathquery[..idx].to_string(),
            pathquery[idx + 1..].to_string(),
        ),
        None => (pathquery.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_url() {
        let p = parse_url("https://api.example.com:8443/v2/items?page=3", "example.com");
        assert_eq!(p.protocol, "https");
        assert_eq!(p.hostname.as_deref(), Some("api.example.com"));
        assert_eq!(p.port, "8443");
        assert_eq!(p.pathname, "/v2/items");
        assert_eq!(p.query, "page=3");
    }

    #[test]
    fn relative_url_resolves_against_origin() {
        let p = parse_url("/json", "example.com");
        assert_eq!(p.hostname.as_deref(), Some("example.com"));
        assert_eq!(p.pathname, "/json");
        assert_eq!(p.port, "443");
    }

    #[test]
    fn data_uri_has_no_hostname() {
        let p = parse_url("data:text/plain,hello", "example.com");
        assert!(p.hostname.is_none());
        assert_eq!(p.protocol, "data");
    }

    #[test]
    fn default_ports_follow_protocol() {
        assert_eq!(
            parse_url("http://example.com/x", "example.com").port,
            "80"
        );
        assert_eq!(
            parse_url("https://example.com/x", "example.com").port,
            "443"
        );
    }

    #[test]
    fn hash_is_stable_and_input_sensitive() {
        let a = dedup_hash(200, "example.com", "/json");
        assert_eq!(a, dedup_hash(200, "example.com", "/json"));
        assert_ne!(a, dedup_hash(404, "example.com", "/json"));
        assert_ne!(a, dedup_hash(200, "example.com", "/html"));
    }
}
