//! Snapshot atomicity under concurrent replacement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mount_guard::policy::{PolicyRecord, PolicySet, PolicyStore};

/// A set whose records all carry the same tag, so a torn read would show
/// mixed tags or a wrong length.
fn tagged_set(tag: &str, len: usize) -> PolicySet {
    PolicySet::new(
        (0..len)
            .map(|i| PolicyRecord::new(format!("user-{i}"), vec![format!("/{tag}")]))
            .collect(),
    )
}

#[test]
fn readers_never_observe_a_partial_set() {
    let store = Arc::new(PolicyStore::with_policies(tagged_set("old", 50)));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut observed = 0_u64;
                loop {
                    let snapshot = store.snapshot();
                    let records = snapshot.records();
                    let tag = records[0].allowed_prefixes[0].clone();
                    let expected_len = if tag == "/old" { 50 } else { 80 };
                    assert_eq!(records.len(), expected_len);
                    assert!(records.iter().all(|r| r.allowed_prefixes[0] == tag));
                    observed = observed.saturating_add(1);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                observed
            })
        })
        .collect();

    for round in 0..500 {
        let set = if round % 2 == 0 {
            tagged_set("new", 80)
        } else {
            tagged_set("old", 50)
        };
        store.replace(set);
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        let observed = reader.join().expect("reader thread panicked");
        assert!(observed > 0);
    }
    assert_eq!(store.snapshot().generation(), 501);
}

#[test]
fn in_flight_snapshot_is_stale_not_torn() {
    // Eventually consistent, not linearizable: a reader that loaded before a
    // replace keeps deciding under the old set.
    let store = PolicyStore::with_policies(tagged_set("old", 3));
    let in_flight = store.snapshot();

    store.replace(tagged_set("new", 5));

    assert_eq!(in_flight.len(), 3);
    assert_eq!(in_flight.generation(), 1);
    let current = store.snapshot();
    assert_eq!(current.len(), 5);
    assert_eq!(current.generation(), 2);
}
