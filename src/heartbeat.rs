//! Liveness LED.
//!
//! Toggles a status LED on a fixed period so a headless device visibly shows
//! it has not hung while it waits for provisioning or retries a join.

use crate::delay::Delay;
use std::time::Duration;

/// Single on/off indicator.
pub trait StatusLed {
    fn set(&mut self, on: bool);
}

/// Periodic LED toggle.
pub struct Heartbeat<L> {
    led: L,
    on: bool,
    ticks: u64,
}

impl<L: StatusLed> Heartbeat<L> {
    /// Create a heartbeat with the LED off.
    pub fn new(mut led: L) -> Self {
        led.set(false);
        Self {
            led,
            on: false,
            ticks: 0,
        }
    }

    /// Toggle the LED once; returns the new level.
    pub fn tick(&mut self) -> bool {
        self.on = !self.on;
        self.ticks += 1;
        self.led.set(self.on);
        self.on
    }

    /// Number of toggles so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Toggle forever, sleeping `period` between toggles.
    pub fn run(mut self, mut delay: impl Delay, period: Duration) -> ! {
        loop {
            self.beat(&mut delay, period);
        }
    }

    fn beat(&mut self, delay: &mut impl Delay, period: Duration) {
        self.tick();
        delay.sleep(period);
    }

    /// Release the LED.
    pub fn into_inner(self) -> L {
        self.led
    }
}

#[cfg(feature = "esp32")]
pub use gpio::GpioLed;

#[cfg(feature = "esp32")]
mod gpio {
    use super::StatusLed;
    use esp_idf_hal::gpio::{Output, Pin, PinDriver};
    use log::warn;

    /// LED on a GPIO output pin, active high.
    pub struct GpioLed<'d, T: Pin> {
        pin: PinDriver<'d, T, Output>,
    }

    impl<'d, T: Pin> GpioLed<'d, T> {
        pub fn new(pin: PinDriver<'d, T, Output>) -> Self {
            Self { pin }
        }
    }

    impl<T: Pin> StatusLed for GpioLed<'_, T> {
        fn set(&mut self, on: bool) {
            let result = if on {
                self.pin.set_high()
            } else {
                self.pin.set_low()
            };
            if let Err(e) = result {
                warn!("LED write failed: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingLed {
        levels: Vec<bool>,
    }

    impl StatusLed for RecordingLed {
        fn set(&mut self, on: bool) {
            self.levels.push(on);
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        sleeps: Vec<Duration>,
    }

    impl Delay for RecordingDelay {
        fn sleep(&mut self, duration: Duration) {
            self.sleeps.push(duration);
        }
    }

    #[test]
    fn test_tick_toggles() {
        let mut heartbeat = Heartbeat::new(RecordingLed::default());
        assert!(heartbeat.tick());
        assert!(!heartbeat.tick());
        assert!(heartbeat.tick());
        assert_eq!(heartbeat.ticks(), 3);
        assert_eq!(
            heartbeat.into_inner().levels,
            vec![false, true, false, true]
        );
    }

    #[test]
    fn test_beat_sleeps_one_period_per_toggle() {
        let mut heartbeat = Heartbeat::new(RecordingLed::default());
        let mut delay = RecordingDelay::default();
        let period = Duration::from_millis(1000);

        for _ in 0..4 {
            heartbeat.beat(&mut delay, period);
        }

        assert_eq!(delay.sleeps, vec![period; 4]);
        assert_eq!(
            heartbeat.into_inner().levels,
            vec![false, true, false, true, false]
        );
    }
}
