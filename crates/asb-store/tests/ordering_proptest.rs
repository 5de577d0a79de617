// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for candidate ordering.

use asb_store::RequestStore;
use proptest::prelude::*;

fn priority_name(idx: u8) -> &'static str {
    match idx % 4 {
        0 => "critical",
        1 => "high",
        2 => "medium",
        _ => "low",
    }
}

fn priority_rank(name: &str) -> u8 {
    match name {
        "critical" => 0,
        "high" => 1,
        "medium" => 2,
        _ => 3,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// The scan order is total: priority first, then created, then id.
    #[test]
    fn scan_order_is_total(specs in proptest::collection::vec((0u8..4, 0i64..120), 1..12)) {
        let dir = tempfile::tempdir().unwrap();
        let store = RequestStore::new(dir.path());
        let inbox = store.inbox_dir("svc");
        std::fs::create_dir_all(&inbox).unwrap();

        for (i, (pri, minutes)) in specs.iter().enumerate() {
            let id = format!("req-{i:03}");
            let created = chrono::DateTime::parse_from_rfc3339("2025-06-10T00:00:00Z").unwrap()
                + chrono::Duration::minutes(*minutes);
            let stamp = created.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            let text = format!(
                "id: {id}\nfrom: o\nto: svc\nscope: svc\ntype: task\npriority: {}\nstatus: pending\ncreated: {stamp}\nupdated: {stamp}\n",
                priority_name(*pri),
            );
            std::fs::write(inbox.join(format!("{id}.md")), text).unwrap();
        }

        let scanned = store.scan_candidates();
        prop_assert_eq!(scanned.len(), specs.len());

        for pair in scanned.windows(2) {
            let a = &pair[0];
            let b = &pair[1];
            let key_a = (priority_rank(&a.priority.to_string()), a.created, a.id.as_str().to_string());
            let key_b = (priority_rank(&b.priority.to_string()), b.created, b.id.as_str().to_string());
            prop_assert!(key_a <= key_b, "scan order violated: {:?} > {:?}", key_a, key_b);
        }
    }
}
