//! Async driver for one [`TailSession`].
//!
//! File I/O runs on the blocking pool; the session is moved in and out of
//! `spawn_blocking` for every step. Messages go to the connection through a
//! bounded channel, and nothing is forwarded once `cancel` has fired.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use wb_core::Identity;
use wb_tail::{TailMessage, TailSession, TailState};

/// Capacity of the per-connection channel between driver and socket writer.
pub const TAIL_CHANNEL_CAPACITY: usize = 64;

/// Open, replay, then poll every `poll_interval` until the session fails,
/// the receiver goes away or `cancel` fires. Returns the final state.
pub async fn run_tail(
    session: TailSession,
    identity: Option<Identity>,
    tx: mpsc::Sender<TailMessage>,
    cancel: CancellationToken,
    poll_interval: Duration,
) -> TailState {
    let Some((mut session, messages)) = step(session, move |s| s.open(identity.as_ref())).await
    else {
        return TailState::Failed;
    };
    if !forward(&tx, &cancel, messages).await || session.is_finished() {
        return finish(session);
    }

    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; replay already covered it.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some((next, messages)) = step(session, TailSession::tick).await else {
            return TailState::Failed;
        };
        session = next;
        if !forward(&tx, &cancel, messages).await || session.is_finished() {
            break;
        }
    }

    finish(session)
}

fn finish(mut session: TailSession) -> TailState {
    if !session.is_finished() {
        session.close();
    }
    session.state()
}

/// Run one session operation on the blocking pool.
async fn step<F>(mut session: TailSession, f: F) -> Option<(TailSession, Vec<TailMessage>)>
where
    F: FnOnce(&mut TailSession) -> Vec<TailMessage> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let messages = f(&mut session);
        (session, messages)
    })
    .await;
    match result {
        Ok(pair) => Some(pair),
        Err(e) => {
            tracing::error!(error = %e, "tail: blocking step failed");
            None
        }
    }
}

/// Send in order. Returns `false` once cancelled or the receiver is gone.
async fn forward(
    tx: &mpsc::Sender<TailMessage>,
    cancel: &CancellationToken,
    messages: Vec<TailMessage>,
) -> bool {
    for message in messages {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            sent = tx.send(message) => {
                if sent.is_err() {
                    tracing::debug!("tail: receiver dropped");
                    return false;
                }
            }
        }
    }
    !cancel.is_cancelled()
}
