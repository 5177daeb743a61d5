//! Staleness detection: which registry records have gone quiet for longer
//! than their role's allotted timeout.

use chrono::{DateTime, Utc};
use mob_core::types::{AgentRole, RegistryRecord};
use std::time::Duration;

/// A registry record that has not pinged within its staleness threshold.
#[derive(Debug, Clone)]
pub struct StaleAgent {
    pub id: String,
    pub role: AgentRole,
    pub last_ping: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Checks `records` against per-role timeouts and returns the ones that
/// have gone stale. Terminal-status records are never reported as stale —
/// they're subject to cleanup, not a nudge.
pub fn find_stale(
    records: &[RegistryRecord],
    soldati_timeout: Duration,
    associate_timeout: Duration,
) -> Vec<StaleAgent> {
    let now = Utc::now();
    records
        .iter()
        .filter(|r| !r.status.is_terminal())
        .filter_map(|r| {
            let elapsed = now
                .signed_duration_since(r.last_ping)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let threshold = match r.role {
                AgentRole::Soldati | AgentRole::Underboss => soldati_timeout,
                AgentRole::Associate => associate_timeout,
            };
            if elapsed > threshold {
                Some(StaleAgent {
                    id: r.id.clone(),
                    role: r.role,
                    last_ping: r.last_ping,
                    elapsed,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mob_core::types::RegistryRecord;

    #[test]
    fn fresh_record_is_not_stale() {
        let record = RegistryRecord::new_soldati("a1", "alice");
        let stale = find_stale(&[record], Duration::from_secs(60), Duration::from_secs(60));
        assert!(stale.is_empty());
    }

    #[test]
    fn old_last_ping_is_stale() {
        let mut record = RegistryRecord::new_soldati("a1", "alice");
        record.last_ping = Utc::now() - chrono::Duration::seconds(120);
        let stale = find_stale(&[record], Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "a1");
    }

    #[test]
    fn terminal_status_is_never_stale() {
        let mut record = RegistryRecord::new_soldati("a1", "alice");
        record.last_ping = Utc::now() - chrono::Duration::seconds(120);
        record.status = mob_core::types::AgentStatus::Completed;
        let stale = find_stale(&[record], Duration::from_secs(60), Duration::from_secs(60));
        assert!(stale.is_empty());
    }
}
