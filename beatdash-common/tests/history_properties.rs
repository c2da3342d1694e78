//! Admission and clean properties over generated candidate sequences
//!
//! Covers:
//! - One admission per burst of repeats inside the replay guard
//! - Distinct admissions for repeats spaced beyond the guard
//! - Strictly increasing timestamps for every admitted log
//! - Idempotent clean pass
//! - JSON export / import round trip

use beatdash_common::export::{export, import_json, ExportFormat};
use beatdash_common::history::{clean, Admission, DEFAULT_REPLAY_GUARD_MS};
use beatdash_common::time::ManualClock;
use beatdash_common::{AdmissionPolicy, Candidate, Reconciler, SessionStore, TrackEvent};
use std::sync::Arc;

/// Every generated timestamp lies in the past relative to this clock
const NOW: i64 = 1_700_000_000_000;

fn setup() -> (Reconciler, SessionStore) {
    let clock = Arc::new(ManualClock::new(NOW));
    (
        Reconciler::new(AdmissionPolicy::default(), clock.clone()),
        SessionStore::new(clock),
    )
}

/// Deterministic pseudo-random sequence (xorshift) so failures reproduce
fn sequence(seed: u64, len: usize) -> Vec<u64> {
    let mut x = seed.max(1);
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            x
        })
        .collect()
}

#[test]
fn burst_inside_guard_admits_exactly_one() {
    for seed in 1..20u64 {
        let (reconciler, mut store) = setup();
        let mut t = 0;
        let mut admitted = 0;
        for step in sequence(seed, 25) {
            t += (step % 200) as i64;
            if t >= DEFAULT_REPLAY_GUARD_MS {
                break;
            }
            let admission = reconciler.admit(&mut store, Candidate::new(1, "A").at(t)).unwrap();
            if admission.is_admitted() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1, "seed {}", seed);
        assert_eq!(store.current().len(), 1);
    }
}

#[test]
fn repeats_beyond_guard_are_all_admitted() {
    let (reconciler, mut store) = setup();
    for i in 0..10 {
        let t = i * (DEFAULT_REPLAY_GUARD_MS + 1_000);
        let admission = reconciler.admit(&mut store, Candidate::new(3, "loop").at(t)).unwrap();
        assert!(admission.is_admitted());
    }
    assert_eq!(store.current().len(), 10);
}

#[test]
fn admitted_timestamps_strictly_increase() {
    for seed in 1..20u64 {
        let (reconciler, mut store) = setup();
        let mut t = 1_000_000i64;
        for step in sequence(seed, 60) {
            // Clock may stall or jump backwards
            t += (step % 7) as i64 - 3;
            let deck = (step % 4) as u32 + 1;
            let track = format!("t{}", (step >> 8) % 5);
            reconciler.admit(&mut store, Candidate::new(deck, track).at(t)).unwrap();
        }
        let log = store.current().tracks();
        assert!(log.windows(2).all(|w| w[0].timestamp < w[1].timestamp), "seed {}", seed);
    }
}

#[test]
fn resubmitting_admitted_candidate_is_noop() {
    let (reconciler, mut store) = setup();
    let candidate = Candidate::new(2, "B").with_artist("X").at(100);
    assert!(reconciler.admit(&mut store, candidate.clone()).unwrap().is_admitted());
    let before: Vec<TrackEvent> = store.current().tracks().to_vec();

    assert_eq!(reconciler.admit(&mut store, candidate).unwrap(), Admission::RejectedDuplicate);
    assert_eq!(store.current().tracks(), before.as_slice());
}

#[test]
fn clean_is_idempotent_on_generated_logs() {
    for seed in 1..20u64 {
        let log: Vec<TrackEvent> = sequence(seed, 40)
            .into_iter()
            .enumerate()
            .map(|(i, step)| {
                Candidate::new((step % 3) as u32 + 1, format!("t{}", step % 6)).into_event(i as i64)
            })
            .collect();
        let once = clean(&log);
        assert_eq!(clean(&once), once, "seed {}", seed);
    }
}

#[test]
fn json_export_import_round_trip() {
    let (reconciler, mut store) = setup();
    reconciler
        .admit(&mut store, Candidate::new(1, "A").with_artist("Artist, The").with_bpm(Some(124.0)).at(0))
        .unwrap();
    reconciler.admit(&mut store, Candidate::new(2, "B").at(1)).unwrap();

    let file = export(store.current().tracks(), ExportFormat::Json, chrono::Local::now())
        .unwrap()
        .unwrap();
    assert_eq!(import_json(&file.content).unwrap(), store.current().tracks());
}

#[test]
fn session_unique_policy_blocks_later_replay() {
    let clock = Arc::new(ManualClock::new(NOW));
    let reconciler = Reconciler::new(AdmissionPolicy::SessionUnique, clock.clone());
    let mut store = SessionStore::new(clock);
    reconciler.admit(&mut store, Candidate::new(1, "A").at(0)).unwrap();
    let replay = reconciler.admit(&mut store, Candidate::new(1, "A").at(3_600_000)).unwrap();
    assert_eq!(replay, Admission::RejectedDuplicate);
}
