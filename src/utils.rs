//! Generic DSP and realtime helpers, used by the harmonizer.

pub mod adsr;
pub mod buffer;
pub mod fifo;
pub mod pitch;
pub mod smoothed;

// -------------------------------------------------------------------------------------------------

/// Run the given closure on the audio thread. With the `assert-allocs` feature enabled,
/// any heap allocation within the closure is reported.
#[inline]
pub(crate) fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    #[cfg(feature = "assert-allocs")]
    return assert_no_alloc::assert_no_alloc::<T, F>(func);

    #[cfg(not(feature = "assert-allocs"))]
    return func();
}
