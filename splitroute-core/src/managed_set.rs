use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::prefix::Prefix;

const EMBEDDED_ROUTES: &str = include_str!("../assets/default_routes.txt");
const EMBEDDED_DNS: &str = include_str!("../assets/default_dns.txt");
const EMBEDDED_SOURCE: &str = "<embedded>";

/// Immutable, hash-indexed set of destination prefixes plus DNS host
/// addresses, loaded once at startup and shared for the life of the
/// process. Thread-safe by virtue of never being mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct ManagedSet {
    members: HashSet<Prefix>,
}

impl ManagedSet {
    /// Loads the managed set from `route_file`/`dns_file` when given, falling
    /// back to the embedded defaults for whichever path is absent.
    pub fn load(route_file: Option<&Path>, dns_file: Option<&Path>) -> Result<Self, Error> {
        let (route_text, route_path) = match route_file {
            Some(p) => (std::fs::read_to_string(p)?, p.to_path_buf()),
            None => (EMBEDDED_ROUTES.to_string(), PathBuf::from(EMBEDDED_SOURCE)),
        };
        let (dns_text, dns_path) = match dns_file {
            Some(p) => (std::fs::read_to_string(p)?, p.to_path_buf()),
            None => (EMBEDDED_DNS.to_string(), PathBuf::from(EMBEDDED_SOURCE)),
        };
        Self::from_text(&route_text, &route_path, &dns_text, &dns_path)
    }

    /// Parses the two ordered line sequences directly; used by `load` and by
    /// tests that don't want to touch the filesystem.
    pub fn from_text(route_text: &str, route_path: &Path, dns_text: &str, dns_path: &Path) -> Result<Self, Error> {
        let mut members = HashSet::new();

        for (idx, raw_line) in route_text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let prefix: Prefix = line.parse().map_err(|_| Error::MalformedPrefix {
                path: route_path.to_path_buf(),
                line: idx + 1,
                input: line.to_string(),
            })?;
            members.insert(prefix);
        }

        for (idx, raw_line) in dns_text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let addr: Ipv4Addr = line.parse().map_err(|_| Error::MalformedDns {
                path: dns_path.to_path_buf(),
                line: idx + 1,
                input: line.to_string(),
            })?;
            members.insert(Prefix::host(addr));
        }

        Ok(ManagedSet { members })
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, prefix: &Prefix) -> bool {
        self.members.contains(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prefix> {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn loads_embedded_defaults() {
        let set = ManagedSet::load(None, None).unwrap();
        assert!(set.size() >= 2);
    }

    #[test]
    fn coalesces_duplicates_and_skips_comments_and_blanks() {
        let routes = "# comment\n\n10.0.0.0/8\n10.0.0.0/8\n";
        let dns = "";
        let set = ManagedSet::from_text(routes, &path("routes"), dns, &path("dns")).unwrap();
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn dns_entries_promoted_to_slash_32() {
        let set = ManagedSet::from_text("", &path("routes"), "8.8.8.8\n", &path("dns")).unwrap();
        let want: Prefix = "8.8.8.8/32".parse().unwrap();
        assert!(set.contains(&want));
    }

    #[test]
    fn contains_is_exact_not_subset() {
        let set = ManagedSet::from_text("10.0.0.0/8\n", &path("routes"), "", &path("dns")).unwrap();
        let narrower: Prefix = "10.5.0.0/16".parse().unwrap();
        assert!(!set.contains(&narrower));
    }

    #[test]
    fn fails_on_first_malformed_prefix_line() {
        let err = ManagedSet::from_text("10.0.0.0/8\nnope\n1.2.3.4/32\n", &path("routes"), "", &path("dns"))
            .unwrap_err();
        match err {
            Error::MalformedPrefix { line, input, .. } => {
                assert_eq!(line, 2);
                assert_eq!(input, "nope");
            }
            other => panic!("expected MalformedPrefix, got {other:?}"),
        }
    }

    #[test]
    fn fails_on_malformed_dns_line() {
        let err = ManagedSet::from_text("", &path("routes"), "not-an-ip\n", &path("dns")).unwrap_err();
        assert!(matches!(err, Error::MalformedDns { .. }));
    }
}
