//! Hosts file parsing.
//!
//! Format: one line per host, `id ip port`, `id` 1-based dense ascending.
//! The resulting [`HostSet`] is immutable after startup — every layer that
//! shards state by origin pid relies on the dense 1-based invariant.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// A single peer in the fixed, known group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Host {
    pub id: u64,
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// The immutable set of hosts for this run, indexed densely from id 1.
#[derive(Debug, Clone)]
pub struct HostSet {
    hosts: Vec<Host>,
}

impl HostSet {
    /// Parse and validate a hosts file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path_ref.display().to_string())
    }

    fn parse(text: &str, path: &str) -> Result<Self, ConfigError> {
        let mut hosts = Vec::new();
        let mut expected_next = 1u64;

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let mut fields = line.split_whitespace();

            let id: u64 = fields
                .next()
                .ok_or_else(|| malformed(path, line_no, "missing id field"))?
                .parse()
                .map_err(|_| malformed(path, line_no, "id is not a valid integer"))?;

            let ip: Ipv4Addr = fields
                .next()
                .ok_or_else(|| malformed(path, line_no, "missing ip field"))?
                .parse()
                .map_err(|_| malformed(path, line_no, "ip is not a valid IPv4 address"))?;

            let port: u16 = fields
                .next()
                .ok_or_else(|| malformed(path, line_no, "missing port field"))?
                .parse()
                .map_err(|_| malformed(path, line_no, "port is not a valid u16"))?;

            if fields.next().is_some() {
                return Err(malformed(path, line_no, "too many fields"));
            }

            if id != expected_next {
                return Err(ConfigError::NonDenseHostIds {
                    expected_prev: expected_next - 1,
                    found: id,
                });
            }
            expected_next += 1;

            hosts.push(Host { id, ip, port });
        }

        if hosts.is_empty() {
            return Err(malformed(path, 0, "hosts file is empty"));
        }

        Ok(HostSet { hosts })
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Majority threshold `f = floor(N/2) + 1` over the whole host set.
    pub fn majority(&self) -> usize {
        self.hosts.len() / 2 + 1
    }

    pub fn get(&self, id: u64) -> Option<Host> {
        self.hosts.iter().find(|h| h.id == id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    /// All peers except `self_id`, in ascending id order.
    pub fn peers_excluding(&self, self_id: u64) -> impl Iterator<Item = &Host> {
        self.hosts.iter().filter(move |h| h.id != self_id)
    }

    /// Dense 0-based shard index for an origin pid, used by every layer
    /// that shards hot structures by origin (perfect-link delivered set,
    /// URB pending set).
    pub fn shard_index(&self, origin_pid: u64) -> usize {
        (origin_pid - 1) as usize
    }
}

fn malformed(path: &str, line: usize, reason: &str) -> ConfigError {
    ConfigError::Malformed {
        path: path.to_string(),
        line,
        reason: reason.to_string(),
    }
}

impl FromStr for HostSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, "<inline>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dense_ascending_hosts() {
        let text = "1 127.0.0.1 11001\n2 127.0.0.1 11002\n3 127.0.0.1 11003\n";
        let hosts: HostSet = text.parse().unwrap();
        assert_eq!(hosts.len(), 3);
        assert_eq!(hosts.majority(), 2);
        assert_eq!(hosts.get(2).unwrap().port, 11002);
    }

    #[test]
    fn rejects_non_dense_ids() {
        let text = "1 127.0.0.1 11001\n3 127.0.0.1 11003\n";
        let err = text.parse::<HostSet>().unwrap_err();
        assert!(matches!(err, ConfigError::NonDenseHostIds { .. }));
    }

    #[test]
    fn rejects_malformed_line() {
        let text = "1 127.0.0.1\n";
        let err = text.parse::<HostSet>().unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn peers_excluding_skips_self() {
        let text = "1 127.0.0.1 11001\n2 127.0.0.1 11002\n3 127.0.0.1 11003\n";
        let hosts: HostSet = text.parse().unwrap();
        let ids: Vec<u64> = hosts.peers_excluding(2).map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn shard_index_is_zero_based() {
        let text = "1 127.0.0.1 11001\n2 127.0.0.1 11002\n";
        let hosts: HostSet = text.parse().unwrap();
        assert_eq!(hosts.shard_index(1), 0);
        assert_eq!(hosts.shard_index(2), 1);
    }
}
