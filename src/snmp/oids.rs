//! OID constants for the CISCO-SWITCH-QOS-MIB.
//!
//! Enterprise OID: 1.3.6.1.4.1.9 (ciscoMgmt.580).

use super::encodings::ObjectIdentifier;

/// ciscoSwitchQosMIB: .1.3.6.1.4.1.9.9.580
const BASE: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 580];

/// csqIfQosGroupStatsEntry below `BASE`: table .1.5.5, entry .1
const STATS_ENTRY: &[u32] = &[1, 5, 5, 1];

fn under_base(tail: &[u32]) -> ObjectIdentifier {
    ObjectIdentifier::from_slice(BASE).child(tail)
}

/// csqIfQosGroupStatsValue column, the registered subtree.
pub fn csq_if_qos_group_stats_value() -> ObjectIdentifier {
    under_base(STATS_ENTRY).child(&[4])
}

/// Number of index sub-identifiers below the value column:
/// `{ifIndex}.{direction}.{queueIndex}.{statsType}`.
pub const QOS_GROUP_STATS_INDEX_LEN: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_column() {
        let value = csq_if_qos_group_stats_value();
        assert!(ObjectIdentifier::from_slice(BASE).is_prefix_of(&value));
        assert_eq!(value.to_string(), ".1.3.6.1.4.1.9.9.580.1.5.5.1.4");
    }

    #[test]
    fn test_instance_suffix() {
        let instance = csq_if_qos_group_stats_value().child(&[1, 2, 1, 1]);
        assert_eq!(
            instance.suffix_after(&csq_if_qos_group_stats_value()).map(<[u32]>::len),
            Some(QOS_GROUP_STATS_INDEX_LEN)
        );
    }
}
