//! End-to-end full-store sync through the queue and worker pool, plus the
//! crash-recovery path.

use std::sync::atomic::Ordering;

use storebridge_core::{Provider, SyncStatus};
use storebridge_engine::db::StoreRepository;
use storebridge_engine::sync::SyncLifecycle;
use storebridge_integration_tests::TestHarness;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_sync_job_pushes_whole_catalog_in_pages() {
    let harness = TestHarness::new();
    let store = harness.add_store(Provider::Shopify);

    for i in 0..45 {
        harness.catalog.insert_category(
            store.tenant_id,
            &format!("Category {i}"),
            &format!("category-{i}"),
        );
    }

    harness
        .dispatcher
        .enqueue_full_store_sync(&store)
        .await
        .expect("enqueue");

    let (shutdown, handle) = harness.spawn_pool(2);
    harness
        .wait_until("store synced", async || {
            harness
                .stores
                .get(store.id)
                .await
                .ok()
                .flatten()
                .is_some_and(|s| s.sync_status == SyncStatus::Synced)
        })
        .await;
    shutdown.cancel();
    handle.await.expect("pool");

    // 45 categories in pages of 30: one full page, one page of 15, each
    // with exactly one bulk remote lookup.
    let lookups = harness
        .platform
        .bulk_category_lookups
        .lock()
        .expect("lock")
        .clone();
    assert_eq!(lookups, vec![30, 15]);

    let updated = harness
        .stores
        .get(store.id)
        .await
        .expect("read")
        .expect("store");
    assert_eq!(updated.sync_status, SyncStatus::Synced);
    assert!(updated.last_sync_attempt_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_full_sync_marks_store_failed_and_spares_others() {
    let harness = TestHarness::new();
    let failing = harness.add_store(Provider::EasyOrder);
    let healthy = harness.add_store(Provider::EasyOrder);
    harness
        .platform
        .failing_bulk_tenants
        .lock()
        .expect("lock")
        .insert(failing.tenant_id);

    harness
        .catalog
        .insert_category(failing.tenant_id, "Broken", "broken");
    harness
        .catalog
        .insert_category(healthy.tenant_id, "Fine", "fine");

    harness
        .dispatcher
        .enqueue_full_store_sync(&failing)
        .await
        .expect("enqueue");
    harness
        .dispatcher
        .enqueue_full_store_sync(&healthy)
        .await
        .expect("enqueue");

    let (shutdown, handle) = harness.spawn_pool(2);
    harness
        .wait_until("both syncs settled", async || {
            let failing_done = harness
                .stores
                .get(failing.id)
                .await
                .ok()
                .flatten()
                .is_some_and(|s| {
                    s.sync_status != SyncStatus::Syncing && s.sync_status != SyncStatus::Pending
                });
            let healthy_done = harness
                .stores
                .get(healthy.id)
                .await
                .ok()
                .flatten()
                .is_some_and(|s| s.sync_status == SyncStatus::Synced);
            failing_done && healthy_done
        })
        .await;
    shutdown.cancel();
    handle.await.expect("pool");

    // The outage forced the failing store to `failed`; the other tenant
    // finished untouched.
    let failing_store = harness
        .stores
        .get(failing.id)
        .await
        .expect("read")
        .expect("store");
    assert_eq!(failing_store.sync_status, SyncStatus::Failed);

    let healthy_store = harness
        .stores
        .get(healthy.id)
        .await
        .expect("read")
        .expect("store");
    assert_eq!(healthy_store.sync_status, SyncStatus::Synced);
    let category = harness
        .catalog
        .categories_page(healthy.tenant_id, None, 10)
        .await
        .expect("page")
        .into_iter()
        .next()
        .expect("category");
    assert!(category.external_ids.get(Provider::EasyOrder).is_some());
}

#[tokio::test]
async fn test_startup_recovery_runs_before_new_syncs() {
    let harness = TestHarness::new();
    let store = harness.add_store(Provider::WooCommerce);

    // Simulate a crash mid-sync: the store is stuck in `syncing`.
    let begun = harness
        .service
        .lifecycle()
        .begin(store.id)
        .await
        .expect("begin");
    assert!(begun.is_some());

    // While stuck, a fresh full sync is a guarded no-op.
    let skipped = harness
        .service
        .sync_full_store(store.id)
        .await
        .expect("sync");
    assert!(skipped.is_none());

    // "Boot": the recovery scan forces the store to failed.
    let lifecycle = SyncLifecycle::new(harness.stores.clone());
    let repaired = lifecycle.recover_on_boot().await.expect("recover");
    assert_eq!(repaired, 1);

    let recovered = harness
        .stores
        .get(store.id)
        .await
        .expect("read")
        .expect("store");
    assert_eq!(recovered.sync_status, SyncStatus::Failed);

    // And a new sync can now start.
    let outcome = harness
        .service
        .sync_full_store(store.id)
        .await
        .expect("sync");
    assert!(outcome.is_some());
}
