//! TAP (Test Anything Protocol) harness for on-device tests.
//!
//! Flash and radio drivers can only be exercised on hardware, where the
//! standard test harness is unavailable. Tests marked `#[tap_test]` are
//! collected with `inventory` and run by the `device-tests` binary, which
//! prints TAP over the serial console.
//!
//! Only compiled with the `tap-tests` feature, so no test code reaches the
//! production image.
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use ble_wifi_prov_macros::tap_test;
//!
//!     #[tap_test]
//!     fn erase_reads_ff() {
//!         // ...
//!     }
//!
//!     #[tap_test(ignore)]
//!     fn needs_access_point() {
//!         // ...
//!     }
//! }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe, UnwindSafe};
use std::time::Instant;

// Re-export inventory for use by the proc-macro
pub use inventory;

/// Result type for fallible tests.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Registration hook generated by `#[tap_test]`.
pub type TestRegisterFn = fn(&mut TestRunner);

/// A collected test.
pub struct TapTestEntry {
    pub name: &'static str,
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

fn entries(filter: Option<&str>) -> impl Iterator<Item = &'static TapTestEntry> + '_ {
    inventory::iter::<TapTestEntry>
        .into_iter()
        .filter(move |entry| filter.map_or(true, |f| entry.name.contains(f)))
}

/// Number of collected tests.
pub fn test_count() -> usize {
    entries(None).count()
}

/// Run every collected test. Returns true if none failed.
pub fn run_all_tests() -> bool {
    run_matching(None)
}

/// Run the tests whose name contains `filter` (all if `None`).
pub fn run_matching(filter: Option<&str>) -> bool {
    let mut runner = TestRunner::new();
    runner.print_header(entries(filter).count());
    if let Some(f) = filter {
        TestRunner::comment(&format!("filter: {}", f));
    }

    for entry in entries(filter) {
        (entry.register)(&mut runner);
    }

    runner.finish()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Outcome of one test.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Pass,
    Fail(String),
    Skip,
}

/// Runs tests and prints TAP lines.
#[derive(Debug, Default)]
pub struct TestRunner {
    passed: usize,
    failed: usize,
    skipped: usize,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, name: &str, outcome: Outcome, millis: u128) {
        let number = self.tests_run() + 1;
        match outcome {
            Outcome::Pass => {
                self.passed += 1;
                println!("ok {} - {}", number, name);
            }
            Outcome::Fail(reason) => {
                self.failed += 1;
                println!("not ok {} - {}", number, name);
                println!("# {}", reason);
            }
            Outcome::Skip => {
                self.skipped += 1;
                println!("ok {} - {} # SKIP ignored", number, name);
                return;
            }
        }
        println!("# {} ms", millis);
    }

    /// Run a test returning [`TestResult`]; panics count as failures.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + UnwindSafe,
    {
        let start = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => Outcome::Pass,
            Ok(Err(e)) => Outcome::Fail(format!("Error: {}", e)),
            Err(payload) => Outcome::Fail(format!("Panic: {}", panic_message(payload.as_ref()))),
        };
        self.record(name, outcome, start.elapsed().as_millis());
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, optionally with a message containing
    /// `expected`.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + UnwindSafe,
    {
        let start = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Outcome::Fail("Expected panic but test completed normally".into()),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                match expected {
                    Some(e) if !msg.contains(e) => Outcome::Fail(format!(
                        "Expected panic containing '{}', got '{}'",
                        e, msg
                    )),
                    _ => Outcome::Pass,
                }
            }
        };
        self.record(name, outcome, start.elapsed().as_millis());
    }

    /// Report a test as skipped without running it.
    pub fn skip(&mut self, name: &str) {
        self.record(name, Outcome::Skip, 0);
    }

    /// Print the TAP version and plan.
    pub fn print_header(&self, planned_tests: usize) {
        println!("TAP version 14");
        println!("1..{}", planned_tests);
    }

    /// Print a diagnostic line.
    pub fn comment(msg: &str) {
        println!("# {}", msg);
    }

    /// Print the summary. Returns true if no test failed.
    pub fn finish(&self) -> bool {
        println!("# -----------------------");
        println!("# Tests run: {}", self.tests_run());
        println!("# Passed: {}", self.passed);
        println!("# Failed: {}", self.failed);
        println!("# Skipped: {}", self.skipped);

        let ok = self.failed == 0;
        println!("# Result: {}", if ok { "PASS" } else { "FAIL" });
        ok
    }

    pub fn tests_run(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    pub fn tests_passed(&self) -> usize {
        self.passed
    }

    pub fn tests_failed(&self) -> usize {
        self.failed
    }

    pub fn tests_skipped(&self) -> usize {
        self.skipped
    }
}

// The harness checks itself with its own tests.
mod tap_tests {
    use super::*;
    use ble_wifi_prov_macros::tap_test;

    #[tap_test]
    fn runner_counts_pass_and_error() {
        let mut runner = TestRunner::new();
        runner.run("pass", || Ok(()));
        runner.run("error", || Err("boom".into()));
        assert_eq!(runner.tests_run(), 2);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 1);
    }

    #[tap_test]
    fn runner_catches_panic() {
        let mut runner = TestRunner::new();
        runner.run_assert("panics", || panic!("intentional panic"));
        assert_eq!(runner.tests_failed(), 1);
    }

    #[tap_test]
    fn runner_should_panic_checks_message() {
        let mut runner = TestRunner::new();
        runner.run_should_panic("matches", || panic!("flash busy"), Some("busy"));
        runner.run_should_panic("mismatch", || panic!("flash busy"), Some("idle"));
        runner.run_should_panic("no panic", || {}, None);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test]
    fn runner_skip_is_not_failure() {
        let mut runner = TestRunner::new();
        runner.skip("ignored");
        assert_eq!(runner.tests_skipped(), 1);
        assert!(runner.finish());
    }

    #[tap_test]
    fn filter_selects_by_name() {
        assert!(entries(Some("filter_selects_by_name")).count() >= 1);
        assert_eq!(entries(Some("no-test-has-this-name")).count(), 0);
        assert_eq!(entries(None).count(), test_count());
    }
}
