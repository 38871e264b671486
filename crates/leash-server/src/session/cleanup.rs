//! Idle session cleanup task
//!
//! Lookups already refuse expired sessions; this task additionally sweeps
//! sessions that nobody looks up any more so they do not accumulate (and do
//! not get written back to the state document on shutdown).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use leash_core::token::token_prefix;

use super::SessionStore;

/// Interval between cleanup sweeps.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the idle cleanup task until `cancel` fires.
///
/// Returns immediately if the store has no idle timeout.
pub async fn run_idle_cleanup(
    sessions: Arc<SessionStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let Some(ttl) = sessions.idle_timeout() else {
        tracing::debug!("Idle timeout disabled, cleanup task not started");
        return;
    };

    let mut ticker = tokio::time::interval(interval);

    tracing::info!(
        "Starting idle session cleanup (timeout: {:?}, check interval: {:?})",
        ttl,
        interval
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = sessions.expire_idle(ttl);
                for session in &expired {
                    tracing::info!(
                        "Expired idle session {}… of {}",
                        token_prefix(&session.token),
                        session.username
                    );
                }
                if !expired.is_empty() {
                    tracing::info!("Cleaned up {} idle sessions", expired.len());
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Idle cleanup task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_interval_is_reasonable() {
        assert!(CLEANUP_INTERVAL >= Duration::from_secs(5));
        assert!(CLEANUP_INTERVAL <= Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_cleanup_removes_idle_sessions() {
        let sessions = Arc::new(SessionStore::new("/", Some(Duration::from_millis(20))));
        sessions.create("alice", "");
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_idle_cleanup(
            Arc::clone(&sessions),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sessions.is_empty());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_disabled_returns() {
        let sessions = Arc::new(SessionStore::new("/", None));
        run_idle_cleanup(sessions, Duration::from_millis(10), CancellationToken::new()).await;
    }
}
