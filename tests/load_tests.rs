#[cfg(test)]
mod tests {
    use fanout::{
        demo::{sample_urls, SimulatedFetch},
        model::{Capacity, Task},
        pool::{Config, Dispatcher},
    };
    use futures::StreamExt;
    use rand::Rng;
    use std::{
        collections::HashSet,
        future::Future,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    async fn measure<F, Fut, T>(name: &str, f: F) -> (T, Duration)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        (result, elapsed)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_1_ten_tasks_three_workers() {
        println!("\n=== LOAD TEST 1: 10 tasks, 3 workers, 100-500ms each ===");
        let (dispatcher, results) = Dispatcher::spawn(
            Config::io_bound().with_workers(3),
            |id, _: ()| async move {
                let delay = rand::thread_rng().gen_range(100..=500);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, String>(id * 2)
            },
        )
        .unwrap();

        let (outcomes, elapsed) = measure("10 tasks @ 100-500ms", || async move {
            dispatcher.submit_all((1..=10).map(|id| Task::new(id, ()))).await.unwrap();
            dispatcher.close_input().unwrap();
            results.collect_all().await
        })
        .await;

        assert_eq!(outcomes.len(), 10);
        let values: HashSet<u64> = outcomes.iter().filter_map(|o| o.value().copied()).collect();
        assert_eq!(values, (1..=10).map(|id| id * 2).collect::<HashSet<_>>());
        for o in &outcomes {
            assert_eq!(o.value(), Some(&(o.task_id * 2)));
        }

        // ceil(10/3) = 4 rounds of at most 500ms, far below 10 sequential sleeps
        assert!(elapsed < Duration::from_millis(2_600), "took {elapsed:?}");
        assert!(elapsed >= Duration::from_millis(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_2_many_small_tasks() {
        println!("\n=== LOAD TEST 2: 10k tasks, bounded queue ===");
        const N: u64 = 10_000;
        let config = Config::io_bound()
            .with_workers(32)
            .with_queue_capacity(Capacity::Bounded(64));
        let (dispatcher, results) = Dispatcher::spawn(config, |_, x: u64| async move {
            tokio::task::yield_now().await;
            if x % 100 == 0 {
                return Err(x);
            }
            Ok(x)
        })
        .unwrap();

        let producer = dispatcher.submitter();
        let submitting = tokio::spawn(async move {
            producer.submit_all((0..N).map(|id| Task::new(id, id))).await.unwrap();
            producer.close_input().unwrap();
        });

        let (outcomes, _) = measure("10k tasks", || results.collect_all()).await;
        submitting.await.unwrap();

        assert_eq!(outcomes.len(), N as usize);
        let ids: HashSet<u64> = outcomes.iter().map(|o| o.task_id).collect();
        assert_eq!(ids.len(), N as usize, "no duplicates");
        assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 100);

        let metrics = dispatcher.metrics();
        println!("  Success rate: {:.1}%", metrics.success_rate() * 100.0);
        assert_eq!(metrics.accounted(), N as usize);
        assert_eq!(metrics.failed, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_3_bounded_results_streamed() {
        println!("\n=== LOAD TEST 3: bounded result collector ===");
        let config = Config::io_bound()
            .with_workers(8)
            .with_result_capacity(Capacity::Bounded(2));
        let fetcher = Arc::new(
            SimulatedFetch::default()
                .with_delay(Duration::from_millis(1), Duration::from_millis(10))
                .with_failure_rate(0.25),
        );
        let (dispatcher, mut results) = Dispatcher::spawn(config, move |_, url: String| {
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(url).await }
        })
        .unwrap();

        let urls = sample_urls(200);
        let submitted = dispatcher
            .submit_all(urls.into_iter().enumerate().map(|(i, u)| Task::new(i as u64, u)))
            .await
            .unwrap();
        dispatcher.close_input().unwrap();

        let mut ok = 0;
        let mut failed = 0;
        while let Some(outcome) = results.next().await {
            match outcome.result {
                Ok(_) => ok += 1,
                Err(e) => {
                    assert!(e.failure().is_some());
                    failed += 1;
                }
            }
        }
        println!("  ok: {ok}, failed: {failed}");
        assert_eq!(ok + failed, submitted);
        assert_eq!(results.received(), submitted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_4_monitoring() {
        println!("\n=== LOAD TEST 4: monitoring ===");
        let (dispatcher, results) = Dispatcher::spawn(
            Config::io_bound().with_workers(4),
            |_, x: u64| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, String>(x)
            },
        )
        .unwrap();

        let snapshots = Arc::new(AtomicUsize::new(0));
        let seen = snapshots.clone();
        let monitor = dispatcher.start_monitoring(Duration::from_millis(20), move |metrics| {
            seen.fetch_add(1, Ordering::Relaxed);
            if metrics.executing > 0 {
                println!(
                    "  [Monitor] executing: {}, queued: {}, utilization: {:.1}%",
                    metrics.executing,
                    metrics.queued,
                    metrics.utilization() * 100.0
                );
            }
        });

        dispatcher.submit_all((0..100).map(|id| Task::new(id, id))).await.unwrap();
        dispatcher.close_input().unwrap();
        let outcomes = results.collect_all().await;
        monitor.cancel();

        assert_eq!(outcomes.len(), 100);
        assert!(snapshots.load(Ordering::Relaxed) > 0);
        println!("  ✓ monitoring stopped");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_5_rate_limited_fetch() {
        println!("\n=== LOAD TEST 5: rate-limited fetch ===");
        let interval = Duration::from_millis(25);
        let config = Config::io_bound().with_workers(4).with_rate(interval);
        let fetcher = Arc::new(
            SimulatedFetch::default().with_delay(Duration::from_millis(5), Duration::from_millis(20)),
        );
        let (dispatcher, results) = Dispatcher::spawn(config, move |_, url: String| {
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(url).await }
        })
        .unwrap();

        let (outcomes, elapsed) = measure("10 fetches @ 25ms spacing", || async move {
            dispatcher
                .submit_all(sample_urls(10).into_iter().enumerate().map(|(i, u)| Task::new(i as u64, u)))
                .await
                .unwrap();
            dispatcher.close_input().unwrap();
            results.collect_all().await
        })
        .await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert!(elapsed >= interval * 9);
    }
}
