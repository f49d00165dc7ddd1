use crate::cache::CacheInner;
use crate::{ResourceError, ResourceResult};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

// Thread that parses queued items one at a time and ends when the finish channel is signalled.
// It only sleeps when nothing is queued, queueing an item sends on the wake channel.
pub(crate) struct BackgroundLoaderThread {
    finish_tx: Sender<()>,
    join_handle: JoinHandle<()>,
}

impl BackgroundLoaderThread {
    pub fn new(
        thread_name: &str,
        cache: Arc<CacheInner>,
        wake_rx: Receiver<()>,
    ) -> ResourceResult<Self> {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let join_handle = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                profiling::register_thread!("BackgroundLoaderThread");
                log::debug!("Background loader thread started");
                loop {
                    // Checked between items so teardown never waits on more than the current parse
                    match finish_rx.try_recv() {
                        Ok(()) | Err(TryRecvError::Disconnected) => break,
                        Err(TryRecvError::Empty) => {}
                    }

                    if cache.process_next_queued() {
                        continue;
                    }

                    crossbeam_channel::select! {
                        recv(wake_rx) -> msg => {
                            if msg.is_err() {
                                break;
                            }
                        },
                        recv(finish_rx) -> _msg => {
                            break;
                        }
                    }
                }
                log::debug!("Background loader thread finished");
            })
            .map_err(|e| ResourceError::WorkerSpawnFailed(Arc::new(e)))?;

        Ok(BackgroundLoaderThread {
            finish_tx,
            join_handle,
        })
    }

    pub fn finish(self) {
        // Only fails if the thread already exited
        let _ = self.finish_tx.send(());
        if self.join_handle.join().is_err() {
            log::error!("Background loader thread panicked");
        }
    }
}
