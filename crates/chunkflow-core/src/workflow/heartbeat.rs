//! Keep-alive signalling for long-running auto-complete calls.
//!
//! Transports with idle timeouts (SSE, long-poll HTTP) need periodic proof of
//! life while a shard round is running. The engine emits a [`HeartbeatTick`]
//! at every shard boundary and, through [`with_keepalive`], on a fixed
//! interval while a round is in flight.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Lifecycle phase reported by a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Starting,
    Sharding,
    Synthesizing,
}

/// One keep-alive signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatTick {
    pub session_id: String,
    pub phase: RunPhase,
    /// 1-based shard round; 0 before the first round.
    pub round: u32,
    pub pending: usize,
    pub completed: usize,
    pub elapsed_ms: u64,
}

/// Receives keep-alive signals. Must never block.
pub trait Heartbeat: Send + Sync {
    fn beat(&self, tick: &HeartbeatTick);
}

/// Discards every tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHeartbeat;

impl Heartbeat for NoopHeartbeat {
    fn beat(&self, _tick: &HeartbeatTick) {}
}

impl<F> Heartbeat for F
where
    F: Fn(&HeartbeatTick) + Send + Sync,
{
    fn beat(&self, tick: &HeartbeatTick) {
        self(tick)
    }
}

/// Forwards ticks into a bounded channel, dropping them when it is full.
///
/// A slow consumer only loses keep-alives, never stalls the engine.
#[derive(Debug, Clone)]
pub struct ChannelHeartbeat {
    tx: mpsc::Sender<HeartbeatTick>,
}

impl ChannelHeartbeat {
    pub fn new(tx: mpsc::Sender<HeartbeatTick>) -> Self {
        Self { tx }
    }
}

impl Heartbeat for ChannelHeartbeat {
    fn beat(&self, tick: &HeartbeatTick) {
        if let Err(e) = self.tx.try_send(tick.clone()) {
            tracing::trace!(session_id = tick.session_id.as_str(), "heartbeat dropped: {e}");
        }
    }
}

/// Drive `fut` to completion, emitting `tick()` every `period` meanwhile.
///
/// The first interval tick fires one full period after the call, so short
/// futures emit nothing extra.
pub async fn with_keepalive<F, T>(
    fut: F,
    heartbeat: &dyn Heartbeat,
    period: Duration,
    tick: impl Fn() -> HeartbeatTick,
) -> T
where
    F: Future<Output = T>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(fut);

    loop {
        tokio::select! {
            out = &mut fut => return out,
            _ = ticker.tick() => heartbeat.beat(&tick()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn tick() -> HeartbeatTick {
        HeartbeatTick {
            session_id: "s-1".to_string(),
            phase: RunPhase::Sharding,
            round: 1,
            pending: 2,
            completed: 1,
            elapsed_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_fires_while_future_runs() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let heartbeat = move |_: &HeartbeatTick| {
            counter.fetch_add(1, Ordering::SeqCst);
        };

        let out = with_keepalive(
            async {
                tokio::time::sleep(Duration::from_millis(3500)).await;
                42
            },
            &heartbeat,
            Duration::from_secs(1),
            tick,
        )
        .await;

        assert_eq!(out, 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn short_future_emits_nothing() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let heartbeat = move |_: &HeartbeatTick| {
            counter.fetch_add(1, Ordering::SeqCst);
        };

        with_keepalive(async {}, &heartbeat, Duration::from_secs(1), tick).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn channel_heartbeat_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let heartbeat = ChannelHeartbeat::new(tx);
        heartbeat.beat(&tick());
        heartbeat.beat(&tick());

        assert_eq!(rx.recv().await.unwrap().round, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tick_serializes_phase_in_snake_case() {
        let json = serde_json::to_value(tick()).unwrap();
        assert_eq!(json["phase"], "sharding");
        assert_eq!(json["pending"], 2);
    }
}
