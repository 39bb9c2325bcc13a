//! Property tests for ingestion invariants.
//!
//! Uses proptest to verify:
//! 1. Validator order: output is strictly ascending for any unique input order
//! 2. Duplicate rejection: any repeated timestamp fails validation
//! 3. Partition split: every record lands in its own (year, month) key
//! 4. Idempotent write: writing the same frame twice changes nothing
//! 5. Last-write-wins merge: the store behaves like a map keyed by timestamp

mod common;

use chrono::{Days, NaiveDate};
use common::bar;
use marketlake_core::data::{validate, CanonicalFrame, PartitionedStore, ValidationError};
use marketlake_core::domain::{OhlcvRecord, PartitionKey};
use proptest::prelude::*;
use std::collections::BTreeMap;

// ── Strategies (proptest) ────────────────────────────────────────────

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 11, 1).unwrap_or_default()
}

fn day(offset: u32) -> NaiveDate {
    base() + Days::new(offset as u64)
}

fn arb_close() -> impl Strategy<Value = f64> {
    (10.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

/// Bars on distinct days, in shuffled order.
fn arb_unique_bars() -> impl Strategy<Value = Vec<OhlcvRecord>> {
    prop::collection::btree_map(0u32..400, arb_close(), 1..40)
        .prop_map(|days| days.into_iter().map(|(d, c)| bar(day(d), c)).collect::<Vec<_>>())
        .prop_shuffle()
}

fn frame(bars: &[OhlcvRecord]) -> CanonicalFrame {
    CanonicalFrame::from_records("PROP", bars)
}

// ── 1. Validator Order ───────────────────────────────────────────────

proptest! {
    #[test]
    fn validated_output_is_strictly_ascending(bars in arb_unique_bars()) {
        let validated = validate(frame(&bars)).unwrap();
        prop_assert_eq!(validated.len(), bars.len());
        for w in validated.records().windows(2) {
            prop_assert!(w[0].timestamp < w[1].timestamp);
        }
    }
}

// ── 2. Duplicate Rejection ───────────────────────────────────────────

proptest! {
    #[test]
    fn any_duplicate_is_rejected(bars in arb_unique_bars(), pick in any::<prop::sample::Index>(), close in arb_close()) {
        let mut bars = bars;
        let dup = bars[pick.index(bars.len())].timestamp;
        bars.push(OhlcvRecord { timestamp: dup, close, ..bars[0].clone() });

        match validate(frame(&bars)) {
            Err(ValidationError::DuplicateTimestamps { timestamps }) => {
                prop_assert_eq!(timestamps, vec![dup]);
            }
            other => prop_assert!(false, "expected duplicate rejection, got {:?}", other),
        }
    }
}

// ── 3. Partition Split ───────────────────────────────────────────────

proptest! {
    #[test]
    fn partitions_hold_only_their_own_month(bars in arb_unique_bars()) {
        let validated = validate(frame(&bars)).unwrap();
        let parts = validated.partitions();

        let total: usize = parts.iter().map(|(_, rows)| rows.len()).sum();
        prop_assert_eq!(total, bars.len());
        for (key, rows) in &parts {
            for r in rows.iter() {
                prop_assert_eq!(&PartitionKey::for_timestamp("PROP", r.timestamp), key);
            }
        }
        for w in parts.windows(2) {
            prop_assert!(w[0].0 < w[1].0);
        }
    }
}

// ── 4. Idempotent Write / 5. Last-Write-Wins ─────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn writing_twice_is_idempotent(bars in arb_unique_bars()) {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionedStore::new(dir.path());
        let validated = validate(frame(&bars)).unwrap();

        let first = store.write(&validated).unwrap();
        let second = store.write(&validated).unwrap();

        prop_assert_eq!(second.rewritten(), 0);
        prop_assert_eq!(first.rows_after(), bars.len());
        prop_assert_eq!(store.read_symbol("PROP").unwrap(), validated.records().to_vec());
    }

    #[test]
    fn merge_is_last_write_wins(old in arb_unique_bars(), new in arb_unique_bars()) {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionedStore::new(dir.path());

        store.write(&validate(frame(&old)).unwrap()).unwrap();
        store.write(&validate(frame(&new)).unwrap()).unwrap();

        let mut expected: BTreeMap<_, OhlcvRecord> = BTreeMap::new();
        for r in old.iter().chain(new.iter()) {
            expected.insert(r.timestamp, r.clone());
        }
        let expected: Vec<OhlcvRecord> = expected.into_values().collect();
        prop_assert_eq!(store.read_symbol("PROP").unwrap(), expected);
    }
}
