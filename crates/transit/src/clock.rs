use chrono::{Local, NaiveDateTime};

/// Source of the current wall time.
///
/// The engine takes this as a capability rather than reading the system
/// clock directly, so tests can pin "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The local system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}
