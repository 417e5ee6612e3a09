//! Periodic Timers
//!
//! Fires callbacks on a fixed or randomized period for the life of the
//! returned task. Invocations are not back-pressured against each other
//! beyond what the callback itself awaits.

use std::future::Future;
use std::time::Duration;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Invoke `callback` every `period`, starting one period from now
pub fn every<F, Fut>(period: Duration, mut callback: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            callback().await;
        }
    })
}

/// Invoke `callback` repeatedly, waiting a fresh random delay in `[min, max]` before each call
pub fn every_jittered<F, Fut>(min: Duration, max: Duration, mut callback: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            sleep(random_period(min, max)).await;
            callback().await;
        }
    })
}

/// Generate a random period in `[min, max]`
pub fn random_period(min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    if max_ms <= min_ms {
        return min;
    }

    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}
