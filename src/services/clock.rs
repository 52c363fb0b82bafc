use chrono::{DateTime, Utc};

/// Time source for everything that stamps records. Injected so "now" can be pinned in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    pub struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub fn at(rfc3339: &str) -> Self {
            Self(Mutex::new(
                DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc),
            ))
        }

        pub fn set(&self, rfc3339: &str) {
            *self.0.lock().unwrap() = DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }
}
