//! Hostname/path deny-list deciding which calls produce telemetry.

#[derive(Clone, Debug)]
struct DenyListEntry {
    hostname: String,
    pathname: String,
}

/// Derived once from configured URL-like strings. A literal `"*"` hostname
/// excludes everything; otherwise a call is excluded on a hostname suffix
/// match combined with an exact path match (empty pattern matches any path).
#[derive(Clone, Debug, Default)]
pub struct DenyListFilter {
    entries: Vec<DenyListEntry>,
}

impl DenyListFilter {
    pub fn new(patterns: &[String]) -> Self {
        let entries = patterns
            .iter()
            .filter_map(|raw| {
                let raw = raw.trim();
                if raw.is_empty() {
                    return None;
                }
                let rest = match raw.find("://") {
                    Some(idx) => &raw[idx + 3..],
                    None => raw,
                };
                let (hostport, path) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                    None => (rest, ""),
                };
                let hostname = hostport.split(':').next().unwrap_or(hostport);
                Some(DenyListEntry {
                    hostname: hostname.to_string(),
                    pathname: path.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether telemetry for a call to `hostname`/`pathname` is wanted.
    pub fn should_collect(&self, hostname: Option<&str>, pathname: &str) -> bool {
        // Non-network URI schemes carry no hostname and are never collected.
        let Some(host) = hostname else { return false };
        if self.entries.is_empty() {
            return true;
        }
        let path = pathname.strip_prefix('/').unwrap_or(pathname);
        for entry in &self.entries {
            if entry.hostname == "*" {
                return false;
            }
            if host.ends_with(&entry.hostname)
                && (entry.pathname.is_empty() || entry.pathname == path)
            {
                return false;
            }
        }
        true
    }
}
