//! Missing-translation notifications, delivered off the caller's path.
//! Events go through an unbounded channel to a background task that hands
//! them to every registered sink. Sink failures are logged, never returned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::NotifierError;

/// A translation gap that was just recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTranslation {
    /// Locale type ("server", "client", …); empty for document locales.
    pub kind: String,
    pub text: String,
    pub lang: String,
    pub extra: String,
}

/// Destination of missing-translation events.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, missing: &MissingTranslation) -> Result<(), String>;
}

/// Logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, missing: &MissingTranslation) -> Result<(), String> {
        info!(
            kind = %missing.kind,
            lang = %missing.lang,
            extra = %missing.extra,
            "Inserted new translation for {:?}",
            missing.text
        );
        Ok(())
    }
}

/// Fire-and-forget notifier handle.
pub struct MissingNotifier {
    tx: mpsc::UnboundedSender<MissingTranslation>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl MissingNotifier {
    /// Start the delivery task on the current tokio runtime.
    pub fn spawn(sinks: Vec<Arc<dyn NotificationSink>>) -> Result<Self, NotifierError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| NotifierError::NoRuntime)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        handle.spawn(delivery_loop(
            rx,
            sinks,
            Arc::clone(&pending),
            shutdown.clone(),
        ));
        info!("missing-translation notifier started");

        Ok(Self {
            tx,
            pending,
            shutdown,
        })
    }

    /// Queue an event. Never blocks.
    pub fn notify(&self, missing: MissingTranslation) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.tx.send(missing) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(error = %e, "notifier channel send failed (task stopped?)");
        }
    }

    /// Events queued but not yet handed to the sinks.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until every queued event has been delivered or the task stopped.
    pub async fn wait_idle(&self) {
        while self.pending() > 0 && !self.shutdown.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Stop the delivery task after it drains what is already queued.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MissingNotifier {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn delivery_loop(
    mut rx: mpsc::UnboundedReceiver<MissingTranslation>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(missing) => {
                    deliver(&sinks, &missing);
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
                None => break,
            },
            _ = shutdown.cancelled() => {
                while let Ok(missing) = rx.try_recv() {
                    deliver(&sinks, &missing);
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
                break;
            }
        }
    }
    info!("missing-translation notifier exiting");
}

fn deliver(sinks: &[Arc<dyn NotificationSink>], missing: &MissingTranslation) {
    for sink in sinks {
        if let Err(e) = sink.notify(missing) {
            warn!(error = %e, text = %missing.text, lang = %missing.lang, "missing-translation sink failed");
        }
    }
    debug!(text = %missing.text, lang = %missing.lang, "missing translation delivered");
}
