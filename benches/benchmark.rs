use criterion::{criterion_group, criterion_main, Criterion};
use jobsys::Scheduler;

const NUM_ITEMS: usize = 1_000_000;

#[inline(never)]
fn work(i: usize) -> u64 {
    let mut x = i as u64;
    for _ in 0..32 {
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    }
    x
}

fn single_threaded(c: &mut Criterion) {
    c.bench_function("single threaded loop", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for i in 0..NUM_ITEMS {
                sum = sum.wrapping_add(work(i));
            }
            criterion::black_box(sum)
        })
    });
}

fn individual_jobs(c: &mut Criterion) {
    let scheduler = Scheduler::new(Scheduler::default_worker_count());

    c.bench_function("one job per item", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..NUM_ITEMS).map(|i| scheduler.submit(move || work(i), &[])).collect();
            let mut sum = 0u64;
            for handle in handles {
                sum = sum.wrapping_add(handle.join());
            }
            criterion::black_box(sum)
        })
    });

    scheduler.stop();
}

fn grouped_jobs(c: &mut Criterion) {
    let scheduler = Scheduler::new(Scheduler::default_worker_count());

    for chunk_size in [256, 4096, 65536] {
        c.bench_function(&format!("submit_group chunk {}", chunk_size), |b| {
            b.iter(|| {
                let outputs = scheduler.submit_group(work, NUM_ITEMS, chunk_size).join();
                criterion::black_box(outputs.iter().fold(0u64, |a, b| a.wrapping_add(*b)))
            })
        });
    }

    scheduler.stop();
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = single_threaded, individual_jobs, grouped_jobs
}
criterion_main!(benches);
