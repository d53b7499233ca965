use criterion::{criterion_group, criterion_main, Criterion};
use futures::future::join_all;
use pageshot::scripted::ScriptedPageSource;
use pageshot::{QueueConfig, RenderOptions, RenderQueue};

// Queue overhead with an instant in-process page source. Run with:
//    cargo bench --bench queue_bench

fn bench_coalesced_burst(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("failed to build runtime");
    let queue = runtime
        .block_on(async { RenderQueue::start(ScriptedPageSource::new(), QueueConfig::default()) })
        .expect("failed to start queue");

    // 100 requests spread over 10 URLs: ten page loads per iteration
    c.bench_function("coalesced_burst_100x10", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let tickets: Vec<_> = (0..100)
                    .map(|i| queue.submit(format!("https://site{}.example", i % 10), RenderOptions::default()))
                    .collect();
                for result in join_all(tickets).await {
                    result.expect("render failed");
                }
            })
        })
    });

    runtime.block_on(queue.shutdown());
}

fn bench_distinct_urls(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("failed to build runtime");
    let queue = runtime
        .block_on(async {
            let config = QueueConfig {
                max_workers: 4,
                ..Default::default()
            };
            RenderQueue::start(ScriptedPageSource::new(), config)
        })
        .expect("failed to start queue");

    c.bench_function("distinct_urls_50_on_4_workers", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let tickets: Vec<_> = (0..50)
                    .map(|i| queue.submit(format!("https://page{}.example", i), RenderOptions::sized(800, 600)))
                    .collect();
                join_all(tickets).await
            })
        })
    });

    runtime.block_on(queue.shutdown());
}

criterion_group!(benches, bench_coalesced_burst, bench_distinct_urls);
criterion_main!(benches);
