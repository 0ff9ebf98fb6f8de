use crate::trial::TrialError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Runs `run(i)` for every `i` in `0..trials` on `workers` scoped threads.
///
/// Results come back in index order no matter which worker finishes first.
/// Once a trial fails no further trials are started; trials already running
/// are allowed to finish and the failure with the lowest index is returned.
pub fn run_pool<T, F, C>(
    trials: usize,
    workers: usize,
    run: F,
    on_complete: C,
) -> Result<Vec<T>, TrialError>
where
    T: Send,
    F: Fn(usize) -> Result<T, TrialError> + Sync,
    C: Fn(usize, &T) + Sync,
{
    let worker_count = workers.clamp(1, trials.max(1));
    let next = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let slots: Mutex<Vec<Option<T>>> = Mutex::new({
        let mut slots = Vec::with_capacity(trials);
        slots.resize_with(trials, || None);
        slots
    });
    let errors: Mutex<Vec<TrialError>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| loop {
                if failed.load(Ordering::SeqCst) {
                    break;
                }
                let idx = next.fetch_add(1, Ordering::SeqCst);
                if idx >= trials {
                    break;
                }
                match run(idx) {
                    Ok(value) => {
                        on_complete(idx, &value);
                        let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
                        guard[idx] = Some(value);
                    }
                    Err(err) => {
                        warn!(trial = idx, error = %err, "trial failed; stopping batch");
                        failed.store(true, Ordering::SeqCst);
                        errors.lock().unwrap_or_else(|e| e.into_inner()).push(err);
                    }
                }
            });
        }
    });

    let mut errors = errors.into_inner().unwrap_or_else(|e| e.into_inner());
    if !errors.is_empty() {
        errors.sort_by_key(TrialError::index);
        return Err(errors.swap_remove(0));
    }
    Ok(slots
        .into_inner()
        .unwrap_or_else(|e| e.into_inner())
        .into_iter()
        .flatten()
        .collect())
}
