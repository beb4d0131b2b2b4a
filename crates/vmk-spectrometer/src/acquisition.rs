//! Continuous non-blocking acquisition.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  Spectrum   ┌───────────────┐  Spectrum  ┌──────────┐
//! │ Producer │────────────►│ mpsc (bounded)│───────────►│Dispatcher│──► callback
//! │  task    │             └───────────────┘            │   task   │
//! └──────────┘                                          └──────────┘
//!       ▲                                                     ▲
//!       └──────────────── CancellationToken ──────────────────┘
//! ```
//!
//! The producer reads chunks through the same [`Readout`] as a blocking
//! read. The bounded channel stops it from running ahead of a slow
//! callback. Cancellation is observed between chunks, so an exchange in
//! flight always completes and the transport stays in a consistent state.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vmk_core::{Error, Result, Spectrum};

use crate::readout::Readout;

/// Chunks buffered between the producer and the callback.
const CHANNEL_CAPACITY: usize = 4;

/// Handle to a running acquisition.
#[derive(Debug)]
pub struct Acquisition {
    cancel: CancellationToken,
    producer: JoinHandle<Result<usize>>,
    dispatcher: JoinHandle<usize>,
}

impl Acquisition {
    /// Start reading chunks of `frames_interval` accumulations until
    /// `frames_to_read` accumulations were read (`None` reads until stopped).
    pub(crate) fn start<F>(
        readout: Readout,
        callback: F,
        frames_to_read: Option<usize>,
        frames_interval: usize,
    ) -> Self
    where
        F: FnMut(Spectrum) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let producer = tokio::spawn(produce(
            readout,
            tx,
            cancel.clone(),
            frames_to_read,
            frames_interval,
        ));
        let dispatcher = tokio::spawn(dispatch(rx, callback, cancel.clone()));

        info!(?frames_to_read, frames_interval, "Acquisition started");
        Self {
            cancel,
            producer,
            dispatcher,
        }
    }

    /// Request cancellation without waiting for the tasks.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once both tasks have terminated.
    pub fn is_finished(&self) -> bool {
        self.producer.is_finished() && self.dispatcher.is_finished()
    }

    /// Wait for the acquisition to end on its own and return the number of
    /// chunks delivered to the callback.
    ///
    /// # Errors
    ///
    /// Returns the read error that ended the acquisition early, or
    /// `Error::Task` if a task panicked. Chunks read before the error have
    /// still been delivered.
    pub async fn wait(self) -> Result<usize> {
        let produced = join(self.producer).await;
        let delivered = join(self.dispatcher).await?;
        let frames = produced??;
        debug!(frames, chunks = delivered, "Acquisition finished");
        Ok(delivered)
    }

    /// Cancel and wait for both tasks. No callback runs after this returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Task` if a task panicked. Read errors are logged by
    /// the producer and not reported again.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        let produced = join(self.producer).await?;
        let delivered = join(self.dispatcher).await?;
        if let Ok(frames) = produced {
            debug!(frames, chunks = delivered, "Acquisition stopped");
        }
        Ok(())
    }
}

async fn produce(
    readout: Readout,
    tx: mpsc::Sender<Spectrum>,
    cancel: CancellationToken,
    frames_to_read: Option<usize>,
    frames_interval: usize,
) -> Result<usize> {
    let mut frames = 0;
    while !cancel.is_cancelled() {
        let n_times = match frames_to_read {
            Some(total) if frames >= total => break,
            Some(total) => frames_interval.min(total - frames),
            None => frames_interval,
        };

        let spectrum = match readout.read(n_times).await {
            Ok(spectrum) => spectrum,
            Err(e) => {
                error!("Acquisition aborted after {} frames: {}", frames, e);
                return Err(e);
            }
        };
        frames += n_times;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(spectrum) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    Ok(frames)
}

async fn dispatch<F>(
    mut rx: mpsc::Receiver<Spectrum>,
    mut callback: F,
    cancel: CancellationToken,
) -> usize
where
    F: FnMut(Spectrum) + Send + 'static,
{
    let mut chunks = 0;
    loop {
        let spectrum = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(spectrum) => spectrum,
                None => break,
            },
        };
        callback(spectrum);
        chunks += 1;
    }
    chunks
}

async fn join<T>(handle: JoinHandle<T>) -> Result<T> {
    handle
        .await
        .map_err(|e| Error::Task(format!("acquisition task failed: {e}")))
}
