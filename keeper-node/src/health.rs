//! Readiness and liveness endpoints.
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tracing::info;
use warp::http::StatusCode;
use warp::Filter;

/// Seconds since the epoch, `0` if the clock is set before it.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Time of the last completed round, shared between the round loop and the
/// liveness probe.
#[derive(Clone, Debug)]
pub struct LastRound(Arc<AtomicU64>);

impl LastRound {
    pub fn starting_now() -> Self {
        Self(Arc::new(AtomicU64::new(now_secs())))
    }

    pub fn mark(&self) {
        self.0.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_live(
        &self,
        now: u64,
        interval: u64,
    ) -> bool {
        now.saturating_sub(self.0.load(Ordering::Relaxed)) <= interval
    }
}

/// Serves `/readiness` and `/liveness` until the process exits.
pub async fn serve(
    port: u16,
    liveness_check_interval: u64,
    last_round: LastRound,
) {
    let readiness_route =
        warp::path!("readiness").map(|| warp::reply::with_status("OK", StatusCode::OK));
    let liveness_route = warp::path!("liveness").map(move || {
        if last_round.is_live(now_secs(), liveness_check_interval) {
            warp::reply::with_status("OK", StatusCode::OK)
        } else {
            warp::reply::with_status("FAIL", StatusCode::INTERNAL_SERVER_ERROR)
        }
    });
    let routes = readiness_route.or(liveness_route);

    info!("Serving health checks. port: {}", port);
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness() {
        let last_round = LastRound(Arc::new(AtomicU64::new(1_000)));

        assert!(last_round.is_live(1_000, 120));
        assert!(last_round.is_live(1_120, 120));
        assert!(!last_round.is_live(1_121, 120));
        // A clock going backwards never reports dead.
        assert!(last_round.is_live(900, 120));
    }

    #[test]
    fn test_mark() {
        let last_round = LastRound(Arc::new(AtomicU64::new(0)));
        last_round.mark();

        assert!(last_round.is_live(now_secs(), 1));
    }
}
