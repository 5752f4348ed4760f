//! Blocking delay abstraction.
//!
//! The supervisor and the heartbeat only ever sleep; routing that through a
//! trait lets tests record the sleeps instead of waiting for them.

use std::time::Duration;

/// Blocking sleep.
pub trait Delay {
    /// Block the calling task for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// [`Delay`] backed by `std::thread::sleep` (FreeRTOS delay on ESP-IDF).
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration);
    }
}
