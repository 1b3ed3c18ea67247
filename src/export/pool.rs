// Bounded fan-out for per-item async lookups
//
// min(limit, len) workers share one cursor. Each worker claims the next
// index, awaits the operation and writes into that slot, so results stay
// index-aligned with the input whatever order operations finish in.
// Workers are polled on the caller's task; the limit bounds logical
// concurrency, not threads. The batch future is Send whenever the items,
// results and operation futures are.

use futures_util::future::try_join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Run `op` over `items` with at most `limit` operations in flight.
///
/// The first error aborts the batch and is returned. Operations that should
/// degrade instead of failing must map their own errors to a fallback value.
pub async fn map_bounded<T, R, E, F, Fut>(items: Vec<T>, limit: usize, op: F) -> Result<Vec<R>, E>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let len = items.len();
    if len == 0 {
        return Ok(Vec::new());
    }

    let workers = limit.max(1).min(len);
    let cursor = AtomicUsize::new(0);
    let pending: Mutex<Vec<Option<T>>> = Mutex::new(items.into_iter().map(Some).collect());
    let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..len).map(|_| None).collect());

    let (cursor_ref, pending_ref, slots_ref, op_ref) = (&cursor, &pending, &slots, &op);
    let worker = move || async move {
        loop {
            let index = cursor_ref.fetch_add(1, Ordering::Relaxed);
            if index >= len {
                break;
            }

            // guards never live across the await
            let item = pending_ref.lock()[index].take();
            let Some(item) = item else { continue };

            let value = op_ref(item).await?;
            slots_ref.lock()[index] = Some(value);
        }
        Ok::<(), E>(())
    };

    try_join_all((0..workers).map(|_| worker())).await?;

    let results: Vec<R> = slots.into_inner().into_iter().flatten().collect();
    debug_assert_eq!(results.len(), len);
    Ok(results)
}
