//! Property-based tests for device resolution and argument decoding.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::json;
use softlayer_cpi::commands::args::numeric_id;
use softlayer_cpi::domain::devices::{
    DeviceDiff, MAX_ISCSI_DEVICES, first_partition, parse_proc_partitions, resolve_new_device,
};
use softlayer_cpi::domain::storage::DiskOrder;

fn scsi_name() -> impl Strategy<Value = String> {
    "[a-z]{1,2}".prop_map(|suffix| format!("sd{suffix}"))
}

proptest! {
    /// Rendering a device set as `/proc/partitions` and parsing it back
    /// yields the same set, whatever partitions and local disks surround it.
    #[test]
    fn prop_proc_partitions_keeps_exactly_the_scsi_disks(
        disks in prop::collection::btree_set(scsi_name(), 0..4),
        xvd_count in 0usize..3,
    ) {
        let mut text = String::from("major minor  #blocks  name\n\n");
        for i in 0..xvd_count {
            text.push_str(&format!(" 202 {} 26214400 xvd{}\n", i * 16, char::from(b'a' + i as u8)));
        }
        for (i, disk) in disks.iter().enumerate() {
            text.push_str(&format!("   8 {} 20971520 {disk}\n", i * 16));
            text.push_str(&format!("   8 {} 20970496 {disk}1\n", i * 16 + 1));
        }
        prop_assert_eq!(parse_proc_partitions(&text), disks);
    }

    /// One added device within the limit is always the one resolved.
    #[test]
    fn prop_single_new_device_is_resolved(
        existing in scsi_name(),
        added in scsi_name(),
    ) {
        prop_assume!(existing != added);
        let before: BTreeSet<String> = [existing.clone()].into();
        let after: BTreeSet<String> = [existing, added.clone()].into();
        prop_assert_eq!(resolve_new_device(&before, &after), Ok(DeviceDiff::Resolved(added)));
    }

    /// Any snapshot above the limit is rejected.
    #[test]
    fn prop_device_limit_is_enforced(
        after in prop::collection::btree_set(scsi_name(), (MAX_ISCSI_DEVICES + 1)..6),
    ) {
        prop_assert!(resolve_new_device(&BTreeSet::new(), &after).is_err());
    }

    /// Sizes round up and never lose capacity.
    #[test]
    fn prop_disk_size_rounds_up(size_mb in 1u64..10_000_000) {
        let gb = u64::from(DiskOrder::size_gb_from_mb(size_mb));
        prop_assert!(gb * 1024 >= size_mb);
        prop_assert!((gb - 1) * 1024 < size_mb);
    }

    /// Ids arrive as numbers or numeric strings and mean the same thing.
    #[test]
    fn prop_numeric_ids_accept_both_encodings(id in any::<u64>()) {
        prop_assert_eq!(numeric_id(&json!(id)), Some(id));
        prop_assert_eq!(numeric_id(&json!(id.to_string())), Some(id));
    }
}

#[test]
fn partitions_follow_the_device_naming_scheme() {
    assert_eq!(first_partition("/dev/sdb"), "/dev/sdb1");
    assert_eq!(first_partition("/dev/mapper/3600a0980383034"), "/dev/mapper/3600a0980383034-part1");
}
