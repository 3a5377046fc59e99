//! Background presentation of the best network.
//!
//! Evolution hands each generation's winner to a dedicated thread and
//! continues immediately. At most one snapshot waits in the queue; while the
//! sink is still busy with an older one, newer snapshots replace nothing and
//! are simply dropped, so the controller never blocks on rendering.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::network::Network;

/// The winner of one generation.
#[derive(Clone, Debug)]
pub struct BestSnapshot {
    pub generation: u64,
    pub score: f64,
    pub best_ever: f64,
    pub network: Network,
}

pub struct RenderWorker {
    tx: Option<SyncSender<BestSnapshot>>,
    handle: Option<JoinHandle<()>>,
    dropped: u64,
}

impl RenderWorker {
    /// Start the render thread. `sink` runs on that thread for every
    /// snapshot it receives.
    pub fn spawn<F>(mut sink: F) -> std::io::Result<Self>
    where
        F: FnMut(BestSnapshot) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<BestSnapshot>(1);
        let handle = thread::Builder::new()
            .name("neuroevo-render".into())
            .spawn(move || {
                for snapshot in rx {
                    sink(snapshot);
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            dropped: 0,
        })
    }

    /// Queue a snapshot without blocking. Returns `false` when it was
    /// dropped because the worker is still busy.
    pub fn submit(&mut self, snapshot: BestSnapshot) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(stale)) => {
                self.dropped += 1;
                debug!(generation = stale.generation, "render busy, snapshot dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("render worker exited, disabling rendering");
                self.tx = None;
                false
            }
        }
    }

    /// Snapshots skipped so far because the worker was busy.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Stop accepting snapshots, let the worker drain its queue and join it.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("render worker panicked");
            }
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
