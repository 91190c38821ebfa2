use std::time::Instant;

/// 时间来源。冷却判断只依赖它，测试里可以手动推进时间。
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
    use super::Clock;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// 手动推进的时钟。
    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        pub fn advance(&self, d: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += d;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }
}
