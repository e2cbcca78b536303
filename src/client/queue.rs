//! A sequential delay queue, used to space out bursts of `JOIN`s.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

struct DelayedItem<C> {
    command: C,
    /// Pause before the next item runs; falls back to the queue's default.
    delay_after: Option<Duration>,
}

/// Forwards queued commands to a receiving loop one at a time, sleeping
/// between two items. Items run in push order; the first item runs
/// immediately.
///
/// The worker task ends once the receiving loop goes away (the `Weak`
/// sender no longer upgrades) or the queue handle is dropped.
pub(crate) struct DelayQueue<C> {
    queue_tx: mpsc::UnboundedSender<DelayedItem<C>>,
}

impl<C: Send + 'static> DelayQueue<C> {
    pub fn spawn(
        default_delay: Duration,
        forward_tx: Weak<mpsc::UnboundedSender<C>>,
    ) -> DelayQueue<C> {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<DelayedItem<C>>();

        tokio::spawn(async move {
            tracing::debug!("Spawned delay queue");
            while let Some(item) = queue_rx.recv().await {
                let delay = item.delay_after.unwrap_or(default_delay);

                match forward_tx.upgrade() {
                    Some(forward_tx) => {
                        if forward_tx.send(item.command).is_err() {
                            break;
                        }
                    }
                    None => break,
                }

                sleep(delay).await;
            }
            tracing::debug!("Delay queue ended");
        });

        DelayQueue { queue_tx }
    }

    /// Enqueue a command with the default inter-item delay after it.
    pub fn push(&self, command: C) {
        self.queue_tx
            .send(DelayedItem {
                command,
                delay_after: None,
            })
            .ok();
    }
}
