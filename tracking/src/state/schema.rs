//! Logical table (column family) names and key layout
//!
//! Keys embed zero-padded counters so lexicographic order equals ledger
//! order within an order id. Order ids are hex-encoded so that no id can
//! extend another id's prefix (`PO-1` vs `PO-1:A`).

/// Append-only status history
pub const CF_TRANSITIONS: &str = "status_transitions";

/// One row per order x stage
pub const CF_MILESTONES: &str = "milestones";

/// Append-only integration attempt log
pub const CF_ATTEMPTS: &str = "integration_attempts";

/// One row per order
pub const CF_SYNC_STATE: &str = "order_sync_state";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_TRANSITIONS, CF_MILESTONES, CF_ATTEMPTS, CF_SYNC_STATE];

/// Key builders for compound keys
pub mod keys {
    /// Hex form of an order id; never contains the `:` separator
    pub fn order_segment(order_id: &str) -> String {
        order_id.bytes().map(|b| format!("{:02x}", b)).collect()
    }

    fn decode_segment(segment: &str) -> Option<String> {
        if segment.len() % 2 != 0 {
            return None;
        }
        let bytes = (0..segment.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(segment.get(i..i + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()?;
        String::from_utf8(bytes).ok()
    }

    /// Prefix shared by every transition of an order
    pub fn transition_prefix(order_id: &str) -> String {
        format!("tr:{}:", order_segment(order_id))
    }

    /// Transition key (order + sequence)
    pub fn transition(order_id: &str, sequence: u64) -> String {
        format!("{}{:012}", transition_prefix(order_id), sequence)
    }

    /// Prefix shared by every milestone of an order
    pub fn milestone_prefix(order_id: &str) -> String {
        format!("ms:{}:", order_segment(order_id))
    }

    /// Milestone key (order + stage)
    pub fn milestone(order_id: &str, stage: &str) -> String {
        format!("{}{}", milestone_prefix(order_id), stage)
    }

    /// Prefix shared by every attempt of an order
    pub fn attempt_prefix(order_id: &str) -> String {
        format!("att:{}:", order_segment(order_id))
    }

    /// Attempt key (order + attempt number)
    pub fn attempt(order_id: &str, attempt_number: u32) -> String {
        format!("{}{:06}", attempt_prefix(order_id), attempt_number)
    }

    /// Prefix shared by every sync state key
    pub const SYNC_STATE_PREFIX: &str = "sync:";

    /// Sync state key
    pub fn sync_state(order_id: &str) -> String {
        format!("{}{}", SYNC_STATE_PREFIX, order_segment(order_id))
    }

    /// Parse the order id out of a transition key
    pub fn parse_transition_order(key: &str) -> Option<String> {
        let rest = key.strip_prefix("tr:")?;
        let (segment, sequence) = rest.split_once(':')?;
        sequence.parse::<u64>().ok()?;
        decode_segment(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(keys::order_segment("PO-1"), "504f2d31");
        assert_eq!(keys::transition("PO-1", 3), "tr:504f2d31:000000000003");
        assert_eq!(keys::milestone("PO-1", "SHIPPED"), "ms:504f2d31:SHIPPED");
        assert_eq!(keys::attempt("PO-1", 2), "att:504f2d31:000002");
        assert_eq!(keys::sync_state("PO-1"), "sync:504f2d31");
    }

    #[test]
    fn test_transition_key_ordering() {
        let key9 = keys::transition("PO-1", 9);
        let key10 = keys::transition("PO-1", 10);
        assert!(key9 < key10);
        assert!(key10.starts_with(&keys::transition_prefix("PO-1")));
    }

    #[test]
    fn test_prefixes_do_not_reach_into_longer_ids() {
        for (prefix, key) in [
            (keys::transition_prefix("PO-1"), keys::transition("PO-1:A", 1)),
            (keys::milestone_prefix("PO-1"), keys::milestone("PO-1:A", "SHIPPED")),
            (keys::attempt_prefix("PO-1"), keys::attempt("PO-1:A", 1)),
        ] {
            assert!(!key.starts_with(&prefix), "{} matched {}", prefix, key);
        }
    }

    #[test]
    fn test_parse_transition_order() {
        let key = keys::transition("PO:7", 1);
        assert_eq!(keys::parse_transition_order(&key).as_deref(), Some("PO:7"));
        assert_eq!(keys::parse_transition_order(&keys::milestone("PO-1", "SHIPPED")), None);
        assert_eq!(keys::parse_transition_order("tr:zz:000000000001"), None);
    }
}
