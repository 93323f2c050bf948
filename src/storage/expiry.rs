//! Active Expire Timer
//!
//! Passive expiry only reclaims fields that somebody touches. A field that
//! expires and is never read again would stay in memory forever, so a
//! background task runs the active cycle on a fixed period.
//!
//! ## Design
//!
//! The timer runs as a Tokio task and:
//! 1. Sleeps for `active_expire_period`
//! 2. Locks the engine and runs one tick of the active cycle
//! 3. Stops when its handle is dropped or the engine reports a broken index
//!
//! At most one timer is pending per engine. Starting another while one is
//! armed returns `None`.
//!
//! A replica's tick does nothing, so the timer can keep running across role
//! changes.

use crate::error::HashError;
use crate::storage::HashEngine;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

/// A handle to the running expire timer.
///
/// When this handle is dropped, the timer task is stopped.
#[derive(Debug)]
pub struct ExpireTimer {
    shutdown_tx: watch::Sender<bool>,
    period: Duration,
}

impl ExpireTimer {
    /// Starts the timer as a background task.
    ///
    /// Returns `None` if active expiry is disabled in the engine's
    /// configuration or a timer is already pending on this engine. Must be
    /// called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use ttlhash::storage::{ExpireTimer, HashEngine};
    /// use std::sync::{Arc, Mutex};
    ///
    /// let engine = Arc::new(Mutex::new(HashEngine::default()));
    /// let timer = ExpireTimer::start(Arc::clone(&engine));
    ///
    /// // Fields are reclaimed in the background...
    ///
    /// drop(timer);
    /// ```
    pub fn start(engine: Arc<Mutex<HashEngine>>) -> Option<Self> {
        let (enabled, period) = {
            let guard = lock(&engine);
            let config = guard.config();
            (config.enable_active_expire, config.active_expire_period)
        };
        if !enabled {
            info!("Active expire disabled, timer not started");
            return None;
        }
        Self::with_period(engine, period)
    }

    /// Starts the timer with an explicit period, ignoring the configuration.
    ///
    /// Returns `None` if a timer is already pending on this engine.
    pub fn with_period(engine: Arc<Mutex<HashEngine>>, period: Duration) -> Option<Self> {
        if !lock(&engine).arm_timer() {
            debug!("Active expire timer already pending");
            return None;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(timer_loop(engine, period, shutdown_rx));

        info!(period_ms = period.as_millis() as u64, "Active expire timer started");

        Some(Self {
            shutdown_tx,
            period,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns true while the timer task is running.
    pub fn is_running(&self) -> bool {
        !self.shutdown_tx.is_closed()
    }

    /// Stops the timer.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Active expire timer stopped");
        }
    }
}

impl Drop for ExpireTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(engine: &Mutex<HashEngine>) -> MutexGuard<'_, HashEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one tick. Returns false if the timer must stop.
fn tick(engine: &Mutex<HashEngine>) -> bool {
    let mut guard = match engine.lock() {
        Ok(guard) => guard,
        Err(_) => {
            error!("Engine lock poisoned, stopping active expire timer");
            return false;
        }
    };

    match guard.active_expire_cycle() {
        Ok(0) => {
            trace!("Active expire tick found nothing");
            true
        }
        Ok(expired) => {
            debug!(
                expired,
                last_ms = guard.cycle_stats().last_ms,
                "Active expire tick"
            );
            true
        }
        Err(e @ HashError::Internal(_)) => {
            error!(error = %e, "Expire index is inconsistent, stopping active expire timer");
            false
        }
        Err(e) => {
            error!(error = %e, "Active expire tick failed");
            true
        }
    }
}

async fn timer_loop(
    engine: Arc<Mutex<HashEngine>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Active expire timer received shutdown signal");
                    break;
                }
            }
            _ = tokio::time::sleep(period) => {}
        }

        if *shutdown_rx.borrow() || !tick(&engine) {
            break;
        }
    }

    lock(&engine).disarm_timer();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ExpireConfig;
    use crate::storage::{ExpireTime, SetOptions, TtlUpdate};
    use bytes::Bytes;

    const START: u64 = 1_700_000_000_000;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn engine_with(config: ExpireConfig) -> (Arc<Mutex<HashEngine>>, Arc<ManualClock>) {
        init_tracing();
        let clock = Arc::new(ManualClock::new(START));
        let engine = HashEngine::new(config, clock.clone());
        (Arc::new(Mutex::new(engine)), clock)
    }

    fn fill(engine: &Mutex<HashEngine>, fields: usize, ttl_ms: u64) {
        let mut engine = engine.lock().unwrap();
        let key = Bytes::from("k");
        let options = SetOptions::new().with_ttl(TtlUpdate::Set(ExpireTime::After(ttl_ms)));
        for i in 0..fields {
            engine
                .set_field(0, &key, Bytes::from(format!("f{i}")), Bytes::from("v"), &options)
                .unwrap();
        }
        engine
            .set_field(0, &key, Bytes::from("persistent"), Bytes::from("v"), &SetOptions::new())
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_reclaims_expired_fields() {
        let config = ExpireConfig::new().with_active_expire_period(Duration::from_millis(10));
        let (engine, clock) = engine_with(config);
        fill(&engine, 10, 50);

        let timer = ExpireTimer::start(Arc::clone(&engine)).unwrap();
        assert_eq!(timer.period(), Duration::from_millis(10));

        clock.advance(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let engine = engine.lock().unwrap();
        assert_eq!(engine.len_total(0, b"k").unwrap(), 1);
        assert_eq!(engine.counters(0).unwrap().active, 10);
        assert!(engine.cycle_stats().ticks > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_respects_budget_per_tick() {
        let config = ExpireConfig::new()
            .with_active_expire_period(Duration::from_millis(10))
            .with_keys_per_active_loop(3);
        let (engine, clock) = engine_with(config);
        fill(&engine, 10, 50);
        clock.advance(Duration::from_millis(100));

        let _timer = ExpireTimer::start(Arc::clone(&engine)).unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(engine.lock().unwrap().counters(0).unwrap().active, 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.lock().unwrap().counters(0).unwrap().active, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_stops_on_drop() {
        let config = ExpireConfig::new().with_active_expire_period(Duration::from_millis(10));
        let (engine, clock) = engine_with(config);

        {
            let timer = ExpireTimer::start(Arc::clone(&engine)).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(timer.is_running());
        }

        fill(&engine, 5, 10);
        clock.advance(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut engine = engine.lock().unwrap();
        assert_eq!(engine.len_total(0, b"k").unwrap(), 6);
        assert_eq!(engine.counters(0).unwrap().active, 0);
        // Passive expiry still applies
        assert!(engine.get_field(0, &Bytes::from("k"), b"f0").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_single_pending_per_engine() {
        let config = ExpireConfig::new().with_active_expire_period(Duration::from_millis(10));
        let (engine, _clock) = engine_with(config);

        let first = ExpireTimer::start(Arc::clone(&engine)).unwrap();
        assert!(ExpireTimer::start(Arc::clone(&engine)).is_none());
        assert!(ExpireTimer::with_period(Arc::clone(&engine), Duration::from_millis(1)).is_none());
        assert!(engine.lock().unwrap().timer_armed());

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(engine.lock().unwrap().cycle_stats().ticks, 1);

        drop(first);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!engine.lock().unwrap().timer_armed());

        let _second = ExpireTimer::start(Arc::clone(&engine)).unwrap();
        assert!(engine.lock().unwrap().timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_stop_wins_over_due_tick() {
        let config = ExpireConfig::new().with_active_expire_period(Duration::from_millis(10));
        let (engine, clock) = engine_with(config);
        fill(&engine, 5, 10);
        clock.advance(Duration::from_millis(100));

        let timer = ExpireTimer::start(Arc::clone(&engine)).unwrap();
        timer.stop();
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!timer.is_running());
        let engine = engine.lock().unwrap();
        assert_eq!(engine.cycle_stats().ticks, 0);
        assert_eq!(engine.len_total(0, b"k").unwrap(), 6);
        assert!(!engine.timer_armed());
    }

    #[tokio::test]
    async fn test_timer_disabled() {
        let config = ExpireConfig::new().with_active_expire(false);
        let (engine, _clock) = engine_with(config);
        assert!(ExpireTimer::start(Arc::clone(&engine)).is_none());
        assert!(!engine.lock().unwrap().timer_armed());
    }
}
