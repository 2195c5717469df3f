//! Data-parallel loops.
//!
//! A group splits a range of item indices into chunks, submits one independent job per
//! chunk, and one last job that depends on all of the chunks and gathers their outputs.
//! The handle of the gathering job is the handle of the group.

use std::ops::Range;

use crate::core::job::JobRef;
use crate::core::scheduler::Scheduler;
use crate::handle::JobHandle;
use crate::sync::Arc;

/// Split `0..item_count` into consecutive ranges of at most `chunk_size` items.
///
/// A chunk size of zero is treated as one.
pub fn chunks(item_count: usize, chunk_size: usize) -> impl Iterator<Item = Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..item_count)
        .step_by(chunk_size)
        .map(move |start| start..start.saturating_add(chunk_size).min(item_count))
}

pub(crate) fn submit_group<F, Output>(
    scheduler: &Scheduler,
    function: F,
    item_count: usize,
    chunk_size: usize,
) -> JobHandle<Vec<Output>>
where
    F: Fn(usize) -> Output + Send + Sync + 'static,
    Output: Send + 'static,
{
    profiling::scope!("submit_group");

    let function = Arc::new(function);

    let handles: Vec<JobHandle<Vec<Output>>> = chunks(item_count, chunk_size).map(|range| {
        let function = function.clone();
        scheduler.submit(move || range.map(|idx| (*function)(idx)).collect::<Vec<_>>(), &[])
    }).collect();

    let dependencies: Vec<JobRef> = handles.iter().map(|handle| handle.job().clone()).collect();

    scheduler.submit(move || {
        let mut output = Vec::with_capacity(item_count);
        for handle in handles {
            // All chunks are done by the time this runs, so joining doesn't block.
            // A panic in a chunk is resumed here and captured by this job.
            output.extend(handle.join());
        }

        output
    }, &dependencies)
}

#[test]
fn chunk_boundaries() {
    assert_eq!(chunks(10, 4).collect::<Vec<_>>(), vec![0..4, 4..8, 8..10]);
    assert_eq!(chunks(8, 4).collect::<Vec<_>>(), vec![0..4, 4..8]);
    assert_eq!(chunks(3, 100).collect::<Vec<_>>(), vec![0..3]);
    assert_eq!(chunks(0, 4).count(), 0);
}

#[test]
fn zero_chunk_size() {
    assert_eq!(chunks(3, 0).collect::<Vec<_>>(), vec![0..1, 1..2, 2..3]);
}

#[test]
fn huge_chunks_do_not_overflow() {
    assert_eq!(chunks(5, usize::MAX).collect::<Vec<_>>(), vec![0..5]);

    let last = chunks(usize::MAX, usize::MAX / 2 + 1).collect::<Vec<_>>();
    assert_eq!(last, vec![0..usize::MAX / 2 + 1, usize::MAX / 2 + 1..usize::MAX]);
}

#[test]
fn chunks_cover_every_item_once() {
    for item_count in 0..50 {
        for chunk_size in 1..12 {
            let items: Vec<usize> = chunks(item_count, chunk_size).flatten().collect();
            assert_eq!(items, (0..item_count).collect::<Vec<_>>());
        }
    }
}
