//! Bounded SHA-1 worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use sha1::{Digest, Sha1};

use reelgrid_torrent_core::PieceCheckpoint;

/// Hard cap on hasher threads.
pub(crate) const MAX_WORKERS: usize = 16;
/// Default hasher thread count.
pub(crate) const DEFAULT_WORKERS: usize = 4;

pub(crate) struct PieceJob {
    pub(crate) index: u32,
    pub(crate) data: Vec<u8>,
}

/// Worker pool writing results into a pre-allocated slot table.
///
/// The channel depth is `2W` pieces, which together with the producer's own
/// buffer bounds live memory to roughly `piece_length * 3W`.
pub(crate) struct HasherPool {
    sender: Option<SyncSender<PieceJob>>,
    workers: Vec<JoinHandle<()>>,
    results: Arc<Mutex<Vec<Option<[u8; 20]>>>>,
    pending: Arc<Mutex<Vec<PieceCheckpoint>>>,
    #[allow(dead_code)]
    processed: Arc<AtomicUsize>,
}

impl HasherPool {
    pub(crate) fn spawn(worker_count: usize, piece_count: usize) -> Self {
        let workers_wanted = worker_count.clamp(1, MAX_WORKERS);
        let (sender, receiver) = sync_channel::<PieceJob>(workers_wanted * 2);
        let receiver = Arc::new(Mutex::new(receiver));
        let results = Arc::new(Mutex::new(vec![None; piece_count]));
        let pending = Arc::new(Mutex::new(Vec::new()));
        let processed = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(workers_wanted);
        for _ in 0..workers_wanted {
            let receiver = Arc::clone(&receiver);
            let results = Arc::clone(&results);
            let pending = Arc::clone(&pending);
            let processed = Arc::clone(&processed);
            workers.push(std::thread::spawn(move || {
                worker_loop(&receiver, &results, &pending, &processed);
            }));
        }

        Self {
            sender: Some(sender),
            workers,
            results,
            pending,
            processed,
        }
    }

    /// Dispatch one piece; blocks when the channel is full.
    pub(crate) fn dispatch(&self, job: PieceJob) {
        if let Some(sender) = &self.sender {
            // The receiver only disappears after finish(); a send failure
            // here would mean a worker panicked, which surfaces on join.
            let _ = sender.send(job);
        }
    }

    /// Record a hash recovered from a checkpoint; never re-hashed.
    pub(crate) fn record_checkpointed(&self, index: u32, hash: [u8; 20]) {
        let mut results = self
            .results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(slot) =
            usize::try_from(index).ok().and_then(|i| results.get_mut(i))
        {
            *slot = Some(hash);
        }
    }

    /// Drain up to `limit` pending checkpoint tuples.
    pub(crate) fn drain_pending(&self, limit: usize) -> Vec<PieceCheckpoint> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if pending.len() < limit {
            return Vec::new();
        }
        std::mem::take(&mut *pending)
    }

    #[allow(dead_code)]
    pub(crate) fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Close the channel, join workers, and return the ordered hash table
    /// plus any remaining checkpoint tuples.
    pub(crate) fn finish(mut self) -> (Vec<Option<[u8; 20]>>, Vec<PieceCheckpoint>) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let results = std::mem::take(
            &mut *self
                .results
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        let pending = std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        (results, pending)
    }
}

fn worker_loop(
    receiver: &Arc<Mutex<Receiver<PieceJob>>>,
    results: &Arc<Mutex<Vec<Option<[u8; 20]>>>>,
    pending: &Arc<Mutex<Vec<PieceCheckpoint>>>,
    processed: &Arc<AtomicUsize>,
) {
    loop {
        let job = {
            let guard = receiver
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.recv()
        };
        let Ok(job) = job else {
            break;
        };
        let hash: [u8; 20] = Sha1::digest(&job.data).into();
        {
            let mut slots = results
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(slot) =
                usize::try_from(job.index).ok().and_then(|i| slots.get_mut(i))
            {
                *slot = Some(hash);
            }
        }
        {
            let mut batch = pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            batch.push(PieceCheckpoint {
                piece_index: job.index,
                hash,
            });
        }
        processed.fetch_add(1, Ordering::Relaxed);
    }
}
