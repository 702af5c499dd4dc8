//! Domain-specific assertion macros for logtide harnesses.
//!
//! These wrap `pretty_assertions` and add context-rich failure messages that
//! make it clear *what* pipeline invariant was violated.

// ---------------------------------------------------------------------------
// Ordering assertions
// ---------------------------------------------------------------------------

/// Assert that columns (or a store snapshot) are sorted by `(timestamp, id)`.
///
/// ```rust,ignore
/// assert_sorted!(store.snapshot());
/// ```
#[macro_export]
macro_rules! assert_sorted {
    ($columns:expr) => {{
        let columns: &logtide_core::LogColumns = &$columns;
        for i in 1..columns.len() {
            let prev = columns.sort_key(i - 1);
            let next = columns.sort_key(i);
            if prev > next {
                panic!(
                    "assert_sorted! failed at index {}:\n  [{}] = {:?}\n  [{}] = {:?}",
                    i,
                    i - 1,
                    prev,
                    i,
                    next
                );
            }
        }
    }};
}

/// Assert that store ids are unique.
#[macro_export]
macro_rules! assert_unique_ids {
    ($columns:expr) => {{
        let columns: &logtide_core::LogColumns = &$columns;
        let mut ids: Vec<u64> = columns.ids().to_vec();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        if ids.len() != before {
            panic!(
                "assert_unique_ids! failed: {} duplicate id(s) among {} rows",
                before - ids.len(),
                before
            );
        }
    }};
}

// ---------------------------------------------------------------------------
// Polling helpers
// ---------------------------------------------------------------------------

/// Poll `$cond` every few milliseconds until it holds or `$timeout_ms`
/// elapses, then panic with `$what`.
///
/// ```rust,ignore
/// eventually!(store.len() == 3, 2_000, "store to hold three records");
/// ```
#[macro_export]
macro_rules! eventually {
    ($cond:expr, $timeout_ms:expr, $what:expr) => {{
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis($timeout_ms);
        loop {
            if $cond {
                break;
            }
            if std::time::Instant::now() >= deadline {
                panic!("eventually! timed out after {}ms waiting for {}", $timeout_ms, $what);
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }};
}
