//! Benchmarks for pipeline traversal and aggregation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use routeflow::aggregator::{correlate_by_header, Aggregator, BodyConcatStrategy};
use routeflow::core::Exchange;
use routeflow::pipeline::PipelineBuilder;
use routeflow::processor::{FnProcessor, Processor, SetHeaderProcessor};
use routeflow::testing::MockProcessor;
use std::sync::Arc;

fn sync_pipeline_benchmark(c: &mut Criterion) {
    let pipeline = PipelineBuilder::new("bench")
        .to(Arc::new(SetHeaderProcessor::new("header", "id", 1)))
        .to(Arc::new(FnProcessor::new("noop", |_ex: &mut Exchange| Ok(()))))
        .disabled()
        .to(Arc::new(FnProcessor::new("upper", |ex: &mut Exchange| {
            let body = ex.body_string().unwrap_or_default().to_uppercase();
            ex.set_body(body);
            Ok(())
        })))
        .build()
        .expect("bench pipeline");

    c.bench_function("sync_pipeline", |b| {
        b.iter(|| {
            let completion = pipeline.process(Exchange::with_body("hello"));
            black_box(completion.into_sync().is_ok())
        });
    });
}

fn aggregation_benchmark(c: &mut Criterion) {
    let aggregator = Aggregator::new(
        "bench",
        correlate_by_header("id"),
        Arc::new(BodyConcatStrategy::default()),
        Arc::new(MockProcessor::new("out")),
    )
    .with_completion_size(10);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    let mut n: u64 = 0;
    c.bench_function("aggregate", |b| {
        b.iter(|| {
            n += 1;
            let exchange = Exchange::with_body("x").with_header("id", n % 16);
            black_box(runtime.block_on(async { aggregator.process(exchange).await }))
        });
    });
}

criterion_group!(benches, sync_pipeline_benchmark, aggregation_benchmark);
criterion_main!(benches);
