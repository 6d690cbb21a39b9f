//! Waiting for every peer to answer a forwarded request
//!
//! Each peer publishes the `CSeq` of the last response it received on a
//! `watch` channel. The barrier is met when every peer's last `CSeq`
//! equals the forwarded one, or when a peer's connection is gone.

use futures::future::join_all;
use std::time::Duration;
use tokio::sync::watch;

/// Result of a barrier wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Every peer answered
    Reached,
    /// The wait expired with `pending` peers still silent
    TimedOut {
        /// Peers that had not answered
        pending: usize,
    },
}

impl BarrierOutcome {
    /// Whether every peer answered in time
    #[must_use]
    pub fn is_reached(self) -> bool {
        self == Self::Reached
    }
}

/// Wait until every receiver reports `cseq`, for at most `limit`
pub async fn wait_for_cseq(
    receivers: &mut [watch::Receiver<u32>],
    cseq: u32,
    limit: Duration,
) -> BarrierOutcome {
    let waits = receivers.iter_mut().map(|rx| async move {
        // A closed sender means the peer is gone; nothing left to wait for.
        let _ = rx.wait_for(|seen| *seen == cseq).await;
    });
    let result = tokio::time::timeout(limit, join_all(waits)).await;

    if result.is_ok() {
        return BarrierOutcome::Reached;
    }

    let pending = receivers
        .iter()
        .filter(|rx| rx.has_changed().is_ok() && *rx.borrow() != cseq)
        .count();
    if pending == 0 {
        BarrierOutcome::Reached
    } else {
        BarrierOutcome::TimedOut { pending }
    }
}
