//! Integration tests for handle retention, idle registry cleanup and the
//! prefetch window as seen through the engine.

mod common;

use common::{advance, Call, Harness};
use feedplay_core::config::Config;
use feedplay_core::events::GlobalEvent;
use feedplay_core::{Connectivity, PrefetchStatus};

#[tokio::test(start_paused = true)]
async fn idle_cleanup_keeps_items_closest_to_active() {
    let h = Harness::new();
    h.register(10);

    h.engine.set_active_index(5);
    advance(150).await;
    assert_eq!(h.engine.len(), 10, "cleanup waits for the idle delay");

    advance(100).await;
    let remaining: Vec<usize> = h.engine.snapshots().into_iter().map(|s| s.index).collect();
    assert_eq!(remaining, vec![3, 4, 5, 6, 7]);

    let mut evicted: Vec<usize> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            GlobalEvent::ItemEvicted { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    evicted.sort_unstable();
    assert_eq!(evicted, vec![0, 1, 2, 8, 9]);
}

#[tokio::test(start_paused = true)]
async fn cleanup_is_restarted_by_each_active_change() {
    let h = Harness::new();
    h.register(8);

    for index in 0..4 {
        h.engine.set_active_index(index);
        advance(100).await;
    }
    assert_eq!(h.engine.len(), 8);

    advance(200).await;
    assert_eq!(h.engine.len(), 5);
    assert!(h.engine.snapshot(&Harness::id(3)).is_some());
}

#[tokio::test(start_paused = true)]
async fn cleanup_never_evicts_active_item() {
    let mut config = Config::default();
    config.engine.preload_ahead = 0;
    config.engine.preload_behind = 0;
    config.engine.max_cached_items = 1;
    let h = Harness::with_config(config);
    h.register(4);

    h.engine.set_active_index(3);
    let evicted = h.engine.cleanup_now();

    assert_eq!(evicted, 3);
    assert_eq!(h.engine.len(), 1);
    assert!(h.engine.snapshot(&Harness::id(3)).is_some());
}

#[tokio::test(start_paused = true)]
async fn cleanup_releases_evicted_handles() {
    let h = Harness::new();
    h.register(7);
    // Mounted but outside any window the engine will compute below.
    let far = h.attach(6);

    h.engine.set_active_index(0);
    advance(1).await;
    assert_eq!(far.count(Call::Release), 1, "released outside retention");

    advance(300).await;
    assert!(h.engine.snapshot(&Harness::id(6)).is_none());
}

#[tokio::test(start_paused = true)]
async fn handles_outside_retention_are_released() {
    let h = Harness::new();
    h.register(6);
    let handles: Vec<_> = (0..4).map(|i| h.attach(i)).collect();

    h.engine.set_active_index(0);
    advance(60).await;
    // Retention around 0 covers 0..=2.
    assert_eq!(handles[3].count(Call::Release), 1);
    assert_eq!(handles[2].count(Call::Release), 0);

    h.engine.set_active_index(3);
    advance(60).await;
    // Around 3 it covers 2..=5.
    assert_eq!(handles[0].count(Call::Release), 1);
    assert_eq!(handles[1].count(Call::Release), 1);
    assert_eq!(handles[2].count(Call::Release), 0);
    assert!(!h.engine.snapshot(&Harness::id(0)).unwrap().has_handle);
    assert!(h.engine.snapshot(&Harness::id(2)).unwrap().has_handle);
}

#[tokio::test(start_paused = true)]
async fn unmetered_network_adds_outer_tier() {
    let h = Harness::new();
    h.register(6);
    h.engine.handle_connectivity(Connectivity::Unmetered);

    h.engine.set_active_index(0);
    advance(1).await;

    let preloaded: Vec<usize> = h
        .engine
        .snapshots()
        .into_iter()
        .filter(|s| s.is_preloaded)
        .map(|s| s.index)
        .collect();
    assert_eq!(preloaded, vec![0, 1, 2, 3]);
    assert!(h
        .events()
        .contains(&GlobalEvent::ConnectivityChanged {
            connectivity: Connectivity::Unmetered
        }));
}

#[tokio::test(start_paused = true)]
async fn late_registration_near_active_is_warmed() {
    let h = Harness::new();
    h.register(2);
    h.engine.set_active_index(0);
    advance(1).await;
    assert!(h.engine.prefetch_status(&Harness::id(2)).is_none());

    h.engine
        .register_or_update(Harness::id(2), 2, Harness::url(2));
    advance(1).await;

    assert!(h.engine.is_warmed(&Harness::id(2)));
    assert!(h.engine.snapshot(&Harness::id(2)).unwrap().is_preloaded);
}

#[tokio::test(start_paused = true)]
async fn failed_warm_is_not_retried_on_reschedule() {
    let h = Harness::new();
    h.register(4);
    h.fetcher.fail(&Harness::url(1));

    h.engine.set_active_index(0);
    advance(1).await;
    assert_eq!(
        h.engine.prefetch_status(&Harness::id(1)).map(|e| e.status),
        Some(PrefetchStatus::Error)
    );

    h.engine.set_active_index(1);
    advance(1).await;
    let attempts = h
        .fetcher
        .manifest_requests()
        .iter()
        .filter(|u| **u == Harness::url(1))
        .count();
    assert_eq!(attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_feed_length_clamps_window() {
    let h = Harness::new();
    h.register(6);
    h.engine.set_feed_length(Some(3));

    h.engine.set_active_index(1);
    advance(1).await;
    let preloaded = |h: &Harness| -> Vec<usize> {
        h.engine
            .snapshots()
            .into_iter()
            .filter(|s| s.is_preloaded)
            .map(|s| s.index)
            .collect()
    };
    assert_eq!(preloaded(&h), vec![0, 1, 2]);
    assert!(!h.fetcher.manifest_requests().contains(&Harness::url(3)));

    // Back to the length derived from registrations.
    h.engine.set_feed_length(None);
    h.engine.set_active_index(2);
    advance(1).await;
    assert_eq!(preloaded(&h), vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn late_registrations_trigger_cleanup() {
    let h = Harness::new();
    h.register(5);
    h.engine.set_active_index(0);
    advance(300).await;
    assert_eq!(h.engine.len(), 5);

    for index in 5..8 {
        h.engine
            .register_or_update(Harness::id(index), index, Harness::url(index));
    }
    assert_eq!(h.engine.len(), 8);
    advance(300).await;

    let remaining: Vec<usize> = h.engine.snapshots().into_iter().map(|s| s.index).collect();
    assert_eq!(remaining, vec![0, 1, 2, 3, 4]);
}
