//! Host Registry
//!
//! A host is whatever owns a group of jobs on the caller's side, typically a
//! UI screen. When the host pauses, its pending jobs move to the back list;
//! when it resumes they move back; when it is destroyed they are cancelled.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use super::job::{JobStatus, JobTicket};

/// Caller-chosen identity of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub u64);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

impl From<u64> for HostId {
    fn from(id: u64) -> Self {
        HostId(id)
    }
}

/// Lifecycle change reported by a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Pause,
    Resume,
    Destroy,
}

/// Tickets of unfinished jobs, grouped by host
#[derive(Default)]
pub(crate) struct HostRegistry {
    hosts: Mutex<HashMap<HostId, Vec<JobTicket>>>,
}

impl HostRegistry {
    pub fn observe(&self, host: HostId, ticket: JobTicket) {
        let mut hosts = self.hosts.lock();
        let tickets = hosts.entry(host).or_default();
        tickets.retain(|t| t.status() != JobStatus::Finished);
        tickets.push(ticket);
    }

    /// Unfinished tickets of `host`, pruning finished ones
    pub fn tickets(&self, host: HostId) -> Vec<JobTicket> {
        let mut hosts = self.hosts.lock();
        match hosts.get_mut(&host) {
            Some(tickets) => {
                tickets.retain(|t| t.status() != JobStatus::Finished);
                tickets.clone()
            }
            None => Vec::new(),
        }
    }

    /// Forget `host`, returning its tickets
    pub fn remove(&self, host: HostId) -> Vec<JobTicket> {
        self.hosts.lock().remove(&host).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.hosts.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::scheduler::job::JobId;

    #[test]
    fn test_finished_tickets_are_pruned() {
        let registry = HostRegistry::default();
        let host = HostId(1);
        let a = JobTicket::new(JobId(1), Fingerprint::EMPTY);
        let b = JobTicket::new(JobId(2), Fingerprint::EMPTY);
        registry.observe(host, a.clone());
        registry.observe(host, b.clone());
        assert_eq!(registry.tickets(host).len(), 2);

        a.set_status(JobStatus::Finished);
        let left = registry.tickets(host);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id(), b.id());
    }

    #[test]
    fn test_remove_host() {
        let registry = HostRegistry::default();
        registry.observe(HostId(7), JobTicket::new(JobId(1), Fingerprint::EMPTY));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.remove(HostId(7)).len(), 1);
        assert_eq!(registry.len(), 0);
        assert!(registry.tickets(HostId(7)).is_empty());
    }

    #[test]
    fn test_host_id_display() {
        assert_eq!(HostId::from(3).to_string(), "host-3");
    }
}
