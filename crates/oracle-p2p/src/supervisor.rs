use std::future::Future;

use oracle_core::{constants, OracleError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::network::{ControlMsg, PeerTracker};

/// A 60 s ticker that, on zero known peers, asks the network task to redial
/// every configured bootstrap address. Runs until `cancel` fires.
pub async fn run_peer_supervisor(
    peers: PeerTracker,
    control_tx: mpsc::Sender<ControlMsg>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(constants::PEER_SUPERVISOR_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if peers.peer_count() == 0 {
                    info!("peer supervisor: no known peers, redialing bootstrap peers");
                    if control_tx.send(ControlMsg::Reconnect).await.is_err() {
                        warn!("peer supervisor: network task gone, stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Evicts stale entries from `peers` on `PEER_EVICTION_INTERVAL`. Runs until
/// `cancel` fires.
pub async fn run_peer_eviction(peers: PeerTracker, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(constants::PEER_EVICTION_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                peers.evict_stale(constants::PEER_EVICTION_WINDOW);
                debug!(known_peers = peers.peer_count(), "peer eviction tick");
            }
        }
    }
}

/// Watches peer count and message recency. Every unhealthy tick forces
/// peer-store rediscovery (`ControlMsg::Reconnect`); after
/// `HEALTH_RESET_THRESHOLD` consecutive unhealthy ticks it also notifies
/// `resubscribe_tx` (driving `run_resubscribe_supervisor`) and resets the
/// counter. A healthy tick resets the counter immediately.
pub async fn run_health_monitor(
    peers: PeerTracker,
    control_tx: mpsc::Sender<ControlMsg>,
    resubscribe_tx: watch::Sender<u64>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(constants::HEALTH_MONITOR_INTERVAL);
    let mut unhealthy_ticks: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let gap_too_large = match peers.last_message_at() {
                    Some(last) => last.elapsed() >= constants::HEALTH_MESSAGE_GAP_THRESHOLD,
                    None => true,
                };
                let unhealthy = peers.peer_count() == 0 && gap_too_large;

                if unhealthy {
                    unhealthy_ticks += 1;
                    warn!(unhealthy_ticks, "health monitor: no peers and no recent messages");
                    if control_tx.send(ControlMsg::Reconnect).await.is_err() {
                        warn!("health monitor: network task gone, stopping");
                        return;
                    }
                } else {
                    unhealthy_ticks = 0;
                }

                if unhealthy_ticks >= constants::HEALTH_RESET_THRESHOLD {
                    unhealthy_ticks = 0;
                    info!("health monitor forcing subscription reset after sustained silence");
                    resubscribe_tx.send_modify(|n| *n = n.wrapping_add(1));
                }
            }
        }
    }
}

/// Retries `attempt` with bounded exponential backoff: `INITIAL *
/// (attempt_index + 1)`, capped at `RESUBSCRIBE_BACKOFF_CAP`, giving up
/// after `RESUBSCRIBE_MAX_ATTEMPTS`. Returns `Ok(())` on first success.
pub async fn retry_with_backoff<F, Fut>(mut attempt: F) -> Result<(), OracleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), OracleError>>,
{
    let mut last_err = None;
    for n in 0..constants::RESUBSCRIBE_MAX_ATTEMPTS {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt = n, error = %e, "resubscribe attempt failed");
                last_err = Some(e);
            }
        }

        let backoff = constants::RESUBSCRIBE_BACKOFF_INITIAL * (n + 1);
        let backoff = backoff.min(constants::RESUBSCRIBE_BACKOFF_CAP);
        tokio::time::sleep(backoff).await;
    }

    Err(last_err.unwrap_or_else(|| OracleError::Transport("resubscribe exhausted retries".into())))
}

/// Watches `resubscribe_rx` for a change, then drives `attempt` (typically a
/// closure sending `ControlMsg::Resubscribe` and awaiting confirmation)
/// through `retry_with_backoff`. Runs until `cancel` fires.
pub async fn run_resubscribe_supervisor<F, Fut>(
    mut resubscribe_rx: watch::Receiver<u64>,
    mut attempt: F,
    cancel: CancellationToken,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), OracleError>>,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = resubscribe_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                if retry_with_backoff(&mut attempt).await.is_err() {
                    warn!("giving up on resubscribe for this cycle, waiting for the next trigger");
                }
            }
        }
    }
}
