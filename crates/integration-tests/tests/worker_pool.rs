//! Worker pool behavior over the tenant-ordered queue: per-tenant
//! serialization, cross-tenant parallelism, failure isolation, and graceful
//! drain.

use std::sync::atomic::Ordering;

use storebridge_core::Provider;
use storebridge_integration_tests::TestHarness;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_tenant_jobs_never_run_concurrently() {
    let harness = TestHarness::new();
    harness.platform.delay_ms.store(25, Ordering::SeqCst);

    let store = harness.add_store(Provider::Shopify);
    for i in 0..6 {
        let category_id = harness.catalog.insert_category(
            store.tenant_id,
            &format!("C{i}"),
            &format!("c-{i}"),
        );
        harness
            .dispatcher
            .enqueue_category_sync(category_id, store.id)
            .await
            .expect("enqueue");
    }

    let (shutdown, handle) = harness.spawn_pool(4);
    harness
        .wait_until("all jobs processed", async || {
            harness.platform.completed.load(Ordering::SeqCst) >= 6
        })
        .await;
    shutdown.cancel();
    handle.await.expect("pool");

    let max = harness.platform.max_active_per_tenant.lock().expect("lock");
    assert_eq!(
        max.get(&store.tenant_id).copied(),
        Some(1),
        "two jobs of the same tenant overlapped"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cross_tenant_jobs_run_in_parallel() {
    let harness = TestHarness::new();
    harness.platform.delay_ms.store(50, Ordering::SeqCst);

    for _ in 0..4 {
        let store = harness.add_store(Provider::WooCommerce);
        let category_id = harness
            .catalog
            .insert_category(store.tenant_id, "Shoes", "shoes");
        harness
            .dispatcher
            .enqueue_category_sync(category_id, store.id)
            .await
            .expect("enqueue");
    }

    let (shutdown, handle) = harness.spawn_pool(4);
    harness
        .wait_until("all jobs processed", async || {
            harness.platform.completed.load(Ordering::SeqCst) >= 4
        })
        .await;
    shutdown.cancel();
    handle.await.expect("pool");

    assert!(
        harness.platform.max_active_global.load(Ordering::SeqCst) > 1,
        "tenants were serialized against each other"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_tenant_failure_never_stops_others() {
    let harness = TestHarness::new();

    let failing = harness.add_store(Provider::EasyOrder);
    let healthy = harness.add_store(Provider::EasyOrder);
    harness
        .platform
        .failing_tenants
        .lock()
        .expect("lock")
        .insert(failing.tenant_id);

    let failing_category =
        harness
            .catalog
            .insert_category(failing.tenant_id, "Broken", "broken");
    let healthy_category =
        harness
            .catalog
            .insert_category(healthy.tenant_id, "Fine", "fine");

    harness
        .dispatcher
        .enqueue_category_sync(failing_category, failing.id)
        .await
        .expect("enqueue");
    harness
        .dispatcher
        .enqueue_category_sync(healthy_category, healthy.id)
        .await
        .expect("enqueue");

    let (shutdown, handle) = harness.spawn_pool(2);
    harness
        .wait_until("queue drained", async || {
            harness.platform.completed.load(Ordering::SeqCst) >= 2
        })
        .await;
    shutdown.cancel();
    handle.await.expect("pool");

    // The healthy tenant's category was pushed and mapped.
    let category = harness
        .catalog
        .category(healthy_category)
        .await
        .expect("read")
        .expect("row");
    assert!(category.external_ids.get(Provider::EasyOrder).is_some());

    // Both jobs are gone from the queue: failed jobs are dropped, not
    // re-enqueued.
    assert_eq!(harness.queue.pending_count().await.expect("count"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graceful_shutdown_finishes_in_flight_jobs() {
    let harness = TestHarness::new();
    harness.platform.delay_ms.store(100, Ordering::SeqCst);

    let store = harness.add_store(Provider::Shopify);
    let category_id = harness
        .catalog
        .insert_category(store.tenant_id, "Slow", "slow");
    harness
        .dispatcher
        .enqueue_category_sync(category_id, store.id)
        .await
        .expect("enqueue");

    let (shutdown, handle) = harness.spawn_pool(1);

    // Let the worker claim the job, then ask for shutdown mid-flight.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    shutdown.cancel();
    handle.await.expect("pool");

    // The in-flight job ran to completion before the pool returned.
    assert_eq!(harness.platform.completed.load(Ordering::SeqCst), 1);
    assert_eq!(harness.queue.pending_count().await.expect("count"), 0);
    let category = harness
        .catalog
        .category(category_id)
        .await
        .expect("read")
        .expect("row");
    assert!(category.external_ids.get(Provider::Shopify).is_some());
}

#[tokio::test]
async fn test_missing_entity_job_is_dropped_quietly() {
    let harness = TestHarness::new();
    let store = harness.add_store(Provider::Shopify);

    // Category 999 does not exist; the job is logged and dropped.
    harness
        .dispatcher
        .enqueue_category_sync(storebridge_core::CategoryId::new(999), store.id)
        .await
        .expect("enqueue");

    let (shutdown, handle) = harness.spawn_pool(1);
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if harness.queue.pending_count().await.expect("count") == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never consumed");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    handle.await.expect("pool");
}
