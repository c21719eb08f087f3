// ABOUTME: Property tests for the rollback manifest.
// ABOUTME: Checks newest-first consumption and release bookkeeping over arbitrary histories.

use meshvm::deploy::{Resource, RollbackManifest};
use proptest::prelude::*;

fn manifest_of(count: usize) -> RollbackManifest {
    let mut manifest = RollbackManifest::new();
    for i in 0..count {
        manifest.record(Resource::instance(format!("vm-{i}")));
    }
    manifest
}

proptest! {
    /// Test: Pending entries come back strictly newest first.
    #[test]
    fn pending_is_reverse_creation_order(count in 0usize..20) {
        let manifest = manifest_of(count);
        let pending = manifest.pending_reverse();
        let expected: Vec<usize> = (0..count).rev().collect();
        prop_assert_eq!(pending, expected);
    }

    /// Test: Released entries drop out and the rest keep their relative order.
    #[test]
    fn released_entries_are_skipped(
        count in 1usize..20,
        released in proptest::collection::vec(any::<bool>(), 20),
    ) {
        let mut manifest = manifest_of(count);
        for (i, &done) in released.iter().take(count).enumerate() {
            if done {
                manifest.mark_released(i);
            }
        }

        let pending = manifest.pending_reverse();
        prop_assert!(pending.windows(2).all(|w| w[0] > w[1]));
        for i in 0..count {
            prop_assert_eq!(pending.contains(&i), !released[i]);
        }
        prop_assert_eq!(manifest.all_released(), pending.is_empty());
        prop_assert_eq!(manifest.len(), count);
    }

    /// Test: Marking an index past the end leaves the manifest unchanged.
    #[test]
    fn out_of_range_release_is_ignored(count in 0usize..10, extra in 0usize..5) {
        let mut manifest = manifest_of(count);
        let before = manifest.clone();
        manifest.mark_released(count + extra);
        prop_assert_eq!(manifest, before);
    }
}
