use super::hosts::CandidateHost;
use tracing::{info, warn};

/// Serial failover over a ranked candidate list.
///
/// Failure flags are only ever cleared together, by [`HostRotation::reset`],
/// so a new connection cycle retries every host.
#[derive(Debug, Default)]
pub struct HostRotation {
    hosts: Vec<CandidateHost>,
    current: Option<usize>,
}

impl HostRotation {
    pub fn new(hosts: Vec<CandidateHost>) -> Self {
        Self { hosts, current: None }
    }

    /// Replace the candidate list, dropping any attempt in progress
    pub fn replace(&mut self, hosts: Vec<CandidateHost>) {
        self.hosts = hosts;
        self.current = None;
    }

    pub fn hosts(&self) -> &[CandidateHost] {
        &self.hosts
    }

    pub fn current(&self) -> Option<&CandidateHost> {
        self.current.and_then(|index| self.hosts.get(index))
    }

    /// Try candidates in order, skipping failed ones, until `connect`
    /// accepts one. Candidates `connect` rejects are marked failed.
    ///
    /// Returns the chosen host, or `None` once every candidate has failed.
    pub fn attempt<F>(&mut self, mut connect: F) -> Option<CandidateHost>
    where
        F: FnMut(&CandidateHost) -> bool,
    {
        self.current = None;
        for (index, host) in self.hosts.iter_mut().enumerate() {
            if host.connection_failed || host.priority < 0 {
                continue;
            }

            info!(host = %host, "Connecting");
            if connect(host) {
                self.current = Some(index);
                return Some(host.clone());
            }

            warn!(host = %host, "Failed to connect");
            host.connection_failed = true;
        }
        None
    }

    /// Flag the host of the current attempt as failed
    pub fn mark_current_failed(&mut self) -> Option<&CandidateHost> {
        let index = self.current.take()?;
        let host = self.hosts.get_mut(index)?;
        host.connection_failed = true;
        Some(host)
    }

    /// Clear every failure flag and the current attempt
    pub fn reset(&mut self) {
        for host in &mut self.hosts {
            host.connection_failed = false;
        }
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::hosts::HostKind;

    fn rotation() -> HostRotation {
        HostRotation::new(vec![
            CandidateHost::new("h2", 443, 1, HostKind::Raw),
            CandidateHost::new("h1", 80, 2, HostKind::Raw),
            CandidateHost::new("ws", 80, 3, HostKind::WebSocket),
        ])
    }

    #[test]
    fn test_attempts_follow_list_order() {
        let mut rotation = rotation();
        let mut tried = Vec::new();

        let chosen = rotation.attempt(|host| {
            tried.push(host.address.clone());
            host.address == "h1"
        });

        assert_eq!(tried, vec!["h2", "h1"]);
        assert_eq!(chosen.map(|h| h.address), Some("h1".to_string()));
        assert!(rotation.hosts()[0].connection_failed);
        assert_eq!(rotation.current().map(|h| h.address.as_str()), Some("h1"));
    }

    #[test]
    fn test_failover_skips_failed_hosts() {
        let mut rotation = rotation();
        rotation.attempt(|_| true);
        assert_eq!(rotation.mark_current_failed().map(|h| h.address.clone()), Some("h2".to_string()));

        let chosen = rotation.attempt(|_| true);
        assert_eq!(chosen.map(|h| h.address), Some("h1".to_string()));
    }

    #[test]
    fn test_exhaustion_then_reset_retries_everything() {
        let mut rotation = rotation();
        assert!(rotation.attempt(|_| false).is_none());
        assert!(rotation.hosts().iter().all(|h| h.connection_failed));
        assert!(rotation.current().is_none());

        rotation.reset();
        assert!(rotation.hosts().iter().all(|h| !h.connection_failed));

        let mut tried = 0;
        rotation.attempt(|_| {
            tried += 1;
            false
        });
        assert_eq!(tried, 3);
    }

    #[test]
    fn test_negative_priority_never_attempted() {
        let mut rotation = HostRotation::new(vec![
            CandidateHost::new("bad", 80, -1, HostKind::Raw),
            CandidateHost::new("good", 80, 0, HostKind::Raw),
        ]);
        let chosen = rotation.attempt(|host| {
            assert_ne!(host.address, "bad");
            true
        });
        assert_eq!(chosen.map(|h| h.address), Some("good".to_string()));
    }

    #[test]
    fn test_mark_without_attempt_is_noop() {
        let mut rotation = rotation();
        assert!(rotation.mark_current_failed().is_none());
        assert!(rotation.hosts().iter().all(|h| !h.connection_failed));
    }
}
