//! The generation pipeline.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use reelgrid_bencode::{Metainfo, Writer, serialize_download_format};
use reelgrid_torrent_core::store::{CheckpointStore, CompletionStore, GenerationStatusStore};
use reelgrid_torrent_core::{
    GenerationProgress, InfoHash, PieceCheckpoint, piece_length_for_total,
};

use crate::error::{GenerationError, GenerationStage};
use crate::hasher::{DEFAULT_WORKERS, HasherPool, PieceJob};
use crate::walk::{SourceFile, walk_package};

/// Checkpoint tuples collected before a transactional flush.
const CHECKPOINT_BATCH: usize = 1000;
/// Read buffer for the streaming reader.
const READ_BUFFER: usize = 256 * 1024;
/// Progress report cadence.
const PROGRESS_INTERVAL_SECS: u64 = 10;

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Package directory to hash.
    pub package_path: PathBuf,
    /// Package identifier.
    pub package_id: Uuid,
    /// Node running the generation.
    pub server_id: Uuid,
    /// Announce URL baked into the metadata.
    pub announce_url: String,
}

/// Successful generation output.
#[derive(Debug, Clone)]
pub struct GeneratedTorrent {
    /// Parsed metadata with raw info bytes.
    pub metainfo: Metainfo,
    /// SHA-1 of the raw info bytes.
    pub info_hash: InfoHash,
    /// Piece length chosen by the size policy.
    pub piece_length: u64,
    /// Number of pieces.
    pub total_pieces: u32,
    /// Total payload bytes.
    pub total_bytes: u64,
    /// Download-format .torrent payload.
    pub torrent_bytes: Vec<u8>,
}

/// Streaming torrent generator.
pub struct Generator {
    checkpoints: Arc<dyn CheckpointStore>,
    status: Arc<dyn GenerationStatusStore>,
    completion: Arc<dyn CompletionStore>,
    worker_count: usize,
    created_by: String,
}

enum ProducerEvent {
    Batch(Vec<PieceCheckpoint>),
    Progress(GenerationProgress),
}

impl Generator {
    /// Assemble a generator; `worker_count` is clamped to the pool cap.
    #[must_use]
    pub fn new(
        checkpoints: Arc<dyn CheckpointStore>,
        status: Arc<dyn GenerationStatusStore>,
        completion: Arc<dyn CompletionStore>,
        worker_count: usize,
    ) -> Self {
        Self {
            checkpoints,
            status,
            completion,
            worker_count: if worker_count == 0 {
                DEFAULT_WORKERS
            } else {
                worker_count
            },
            created_by: format!("reelgrid/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Hash a package and produce canonical torrent metadata.
    ///
    /// Progress and checkpoints flow to the store while hashing runs; the
    /// queue row's cancellation flag is honoured at checkpoint boundaries.
    /// On success every piece is pre-marked verified and the checkpoint
    /// table is drained.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError`] with the failing stage; partial
    /// checkpoint state is preserved for resume.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GeneratedTorrent, GenerationError> {
        if !request.package_path.is_dir() {
            return Err(GenerationError::stage(
                GenerationStage::Walk,
                anyhow!(
                    "package path {} is not a directory",
                    request.package_path.display()
                ),
            ));
        }
        let files = walk_package(&request.package_path)?;
        let total_bytes: u64 = files.iter().map(|f| f.length).sum();
        let piece_length = piece_length_for_total(total_bytes);
        let piece_count = usize::try_from(total_bytes.div_ceil(piece_length))
            .map_err(|err| GenerationError::stage(GenerationStage::Marshal, err))?;

        let existing: HashMap<u32, [u8; 20]> = self
            .checkpoints
            .load_checkpoints(request.package_id, request.server_id)
            .await
            .map_err(|err| GenerationError::stage(GenerationStage::CheckpointSave, err))?
            .into_iter()
            .map(|cp| (cp.piece_index, cp.hash))
            .collect();
        if !existing.is_empty() {
            info!(
                package_id = %request.package_id,
                resumed_pieces = existing.len(),
                "resuming generation from checkpoints"
            );
        }

        let (event_tx, mut event_rx) = mpsc::channel::<ProducerEvent>(4);
        let cancel = Arc::new(AtomicBool::new(false));
        let producer_cancel = Arc::clone(&cancel);
        let producer_files = files.clone();
        let worker_count = self.worker_count;
        let producer = tokio::task::spawn_blocking(move || {
            produce(
                &producer_files,
                piece_length,
                piece_count,
                total_bytes,
                &existing,
                worker_count,
                &event_tx,
                &producer_cancel,
            )
        });

        let mut commit_error: Option<GenerationError> = None;
        while let Some(event) = event_rx.recv().await {
            match event {
                ProducerEvent::Batch(batch) => {
                    if let Err(err) = self
                        .checkpoints
                        .save_checkpoint_batch(request.package_id, request.server_id, &batch)
                        .await
                    {
                        commit_error = Some(GenerationError::stage(
                            GenerationStage::CheckpointSave,
                            err,
                        ));
                        cancel.store(true, Ordering::Relaxed);
                        continue;
                    }
                    match self
                        .status
                        .generation_cancelled(request.package_id, request.server_id)
                        .await
                    {
                        Ok(true) => {
                            commit_error.get_or_insert(GenerationError::Cancelled);
                            cancel.store(true, Ordering::Relaxed);
                        }
                        Ok(false) => {}
                        Err(err) => {
                            warn!(error = %err, "failed to poll cancellation flag");
                        }
                    }
                }
                ProducerEvent::Progress(progress) => {
                    if let Err(err) = self
                        .status
                        .update_generation_progress(
                            request.package_id,
                            request.server_id,
                            &progress,
                        )
                        .await
                    {
                        warn!(error = %err, "failed to report hashing progress");
                    }
                }
            }
        }

        let produced = producer
            .await
            .map_err(|err| GenerationError::stage(GenerationStage::Read, anyhow!(err)))?;
        if let Some(err) = commit_error {
            return Err(err);
        }
        let results = produced?;

        let mut pieces = Vec::with_capacity(piece_count * 20);
        for (index, slot) in results.iter().enumerate() {
            let hash = slot.ok_or_else(|| {
                GenerationError::stage(
                    GenerationStage::Marshal,
                    anyhow!("piece {index} has no hash"),
                )
            })?;
            pieces.extend_from_slice(&hash);
        }

        let info_bytes = marshal_info(
            &request.package_path,
            &files,
            piece_length,
            total_bytes,
            &pieces,
        )?;
        let metainfo = Metainfo {
            announce: request.announce_url.clone(),
            created_by: self.created_by.clone(),
            creation_date: Utc::now().timestamp(),
            info_bytes,
        };
        let info_hash = InfoHash::of_info_bytes(&metainfo.info_bytes);
        let torrent_bytes = serialize_download_format(&metainfo);
        let total_pieces = u32::try_from(piece_count)
            .map_err(|err| GenerationError::stage(GenerationStage::Marshal, err))?;

        // Pieces just hashed from disk are verified by construction; seed the
        // cache before anyone transitions the queue row.
        self.completion
            .mark_all_complete(&info_hash, total_pieces)
            .await
            .map_err(|err| GenerationError::stage(GenerationStage::CheckpointSave, err))?;
        self.checkpoints
            .clear_checkpoints(request.package_id, request.server_id)
            .await
            .map_err(|err| GenerationError::stage(GenerationStage::CheckpointSave, err))?;

        let final_progress = GenerationProgress {
            progress_percent: 100.0,
            current_file: String::new(),
            hashing_speed_bps: 0,
        };
        if let Err(err) = self
            .status
            .update_generation_progress(request.package_id, request.server_id, &final_progress)
            .await
        {
            warn!(error = %err, "failed to report final hashing progress");
        }

        info!(
            package_id = %request.package_id,
            info_hash = %info_hash,
            pieces = total_pieces,
            piece_length,
            "torrent generated"
        );
        Ok(GeneratedTorrent {
            metainfo,
            info_hash,
            piece_length,
            total_pieces,
            total_bytes,
            torrent_bytes,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn produce(
    files: &[SourceFile],
    piece_length: u64,
    piece_count: usize,
    total_bytes: u64,
    existing: &HashMap<u32, [u8; 20]>,
    worker_count: usize,
    events: &mpsc::Sender<ProducerEvent>,
    cancel: &AtomicBool,
) -> Result<Vec<Option<[u8; 20]>>, GenerationError> {
    let pool = HasherPool::spawn(worker_count, piece_count);
    let mut reader = StreamReader::new(files);
    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut hashed_bytes = 0u64;

    for index in 0..piece_count {
        if cancel.load(Ordering::Relaxed) {
            let _ = pool.finish();
            return Err(GenerationError::Cancelled);
        }
        let piece_index = u32::try_from(index)
            .map_err(|err| GenerationError::stage(GenerationStage::Marshal, err))?;
        let offset = index as u64 * piece_length;
        let len = usize::try_from(piece_length.min(total_bytes - offset))
            .map_err(|err| GenerationError::stage(GenerationStage::Read, err))?;

        if let Some(hash) = existing.get(&piece_index) {
            reader.skip(len as u64)?;
            pool.record_checkpointed(piece_index, *hash);
        } else {
            let mut data = vec![0u8; len];
            reader.read_exact_into(&mut data)?;
            pool.dispatch(PieceJob {
                index: piece_index,
                data,
            });
            hashed_bytes += len as u64;
        }

        let batch = pool.drain_pending(CHECKPOINT_BATCH);
        if !batch.is_empty() {
            let _ = events.blocking_send(ProducerEvent::Batch(batch));
        }

        if reader.take_file_changed()
            || last_report.elapsed().as_secs() >= PROGRESS_INTERVAL_SECS
        {
            last_report = Instant::now();
            let _ = events.blocking_send(ProducerEvent::Progress(progress_snapshot(
                offset + len as u64,
                total_bytes,
                hashed_bytes,
                started,
                reader.current_file(),
            )));
        }
    }

    let (results, pending) = pool.finish();
    if !pending.is_empty() {
        let _ = events.blocking_send(ProducerEvent::Batch(pending));
    }
    let _ = events.blocking_send(ProducerEvent::Progress(progress_snapshot(
        total_bytes,
        total_bytes,
        hashed_bytes,
        started,
        reader.current_file(),
    )));
    Ok(results)
}

fn progress_snapshot(
    consumed: u64,
    total: u64,
    hashed: u64,
    started: Instant,
    current_file: String,
) -> GenerationProgress {
    let percent = if total == 0 {
        100.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        {
            (consumed as f64 / total as f64) * 100.0
        }
    };
    let elapsed = started.elapsed().as_secs_f64();
    let speed = if elapsed > f64::EPSILON {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        {
            ((hashed as f64) / elapsed).round() as u64
        }
    } else {
        0
    };
    GenerationProgress {
        progress_percent: percent,
        current_file,
        hashing_speed_bps: speed,
    }
}

fn marshal_info(
    package_path: &std::path::Path,
    files: &[SourceFile],
    piece_length: u64,
    total_bytes: u64,
    pieces: &[u8],
) -> Result<Vec<u8>, GenerationError> {
    let name = package_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            GenerationError::stage(GenerationStage::Marshal, anyhow!("package has no basename"))
        })?;
    let piece_length = i64::try_from(piece_length)
        .map_err(|err| GenerationError::stage(GenerationStage::Marshal, err))?;

    let mut writer = Writer::new();
    if files.len() == 1 && files[0].components.len() == 1 && files[0].components[0] == name {
        // Degenerate single-file package: the payload is the root itself.
        let length = i64::try_from(total_bytes)
            .map_err(|err| GenerationError::stage(GenerationStage::Marshal, err))?;
        writer.dict(|dict| {
            dict.entry("length", |w| w.integer(length));
            dict.entry("name", |w| w.text(&name));
            dict.entry("piece length", |w| w.integer(piece_length));
            dict.entry("pieces", |w| w.bytes(pieces));
        });
        return Ok(writer.finish());
    }

    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let length = i64::try_from(file.length)
            .map_err(|err| GenerationError::stage(GenerationStage::Marshal, err))?;
        entries.push((file.components.clone(), length));
    }
    writer.dict(|dict| {
        dict.entry("files", |w| {
            w.list(|list| {
                for (components, length) in &entries {
                    list.dict(|file| {
                        file.entry("length", |v| v.integer(*length));
                        file.entry("path", |v| {
                            v.list(|p| {
                                for component in components {
                                    p.text(component);
                                }
                            });
                        });
                    });
                }
            });
        });
        dict.entry("name", |w| w.text(&name));
        dict.entry("piece length", |w| w.integer(piece_length));
        dict.entry("pieces", |w| w.bytes(pieces));
    });
    Ok(writer.finish())
}

/// Sequential reader over the declared file list with byte-wise skipping.
struct StreamReader<'a> {
    files: &'a [SourceFile],
    next_file: usize,
    current: Option<BufReader<File>>,
    remaining_in_current: u64,
    current_name: String,
    file_changed: bool,
}

impl<'a> StreamReader<'a> {
    fn new(files: &'a [SourceFile]) -> Self {
        Self {
            files,
            next_file: 0,
            current: None,
            remaining_in_current: 0,
            current_name: String::new(),
            file_changed: false,
        }
    }

    fn current_file(&self) -> String {
        self.current_name.clone()
    }

    fn take_file_changed(&mut self) -> bool {
        std::mem::take(&mut self.file_changed)
    }

    fn advance(&mut self) -> Result<bool, GenerationError> {
        while self.next_file < self.files.len() {
            let source = &self.files[self.next_file];
            self.next_file += 1;
            let file = File::open(&source.absolute)
                .map_err(|err| GenerationError::stage(GenerationStage::Read, err))?;
            self.current_name = source.relative();
            self.file_changed = true;
            if source.length == 0 {
                continue;
            }
            self.current = Some(BufReader::with_capacity(READ_BUFFER, file));
            self.remaining_in_current = source.length;
            return Ok(true);
        }
        Ok(false)
    }

    fn read_exact_into(&mut self, buffer: &mut [u8]) -> Result<(), GenerationError> {
        let mut filled = 0usize;
        while filled < buffer.len() {
            if self.remaining_in_current == 0 && !self.advance()? {
                return Err(GenerationError::stage(
                    GenerationStage::Read,
                    anyhow!("package stream ended early"),
                ));
            }
            let Some(reader) = self.current.as_mut() else {
                continue;
            };
            let want = (buffer.len() - filled)
                .min(usize::try_from(self.remaining_in_current).unwrap_or(usize::MAX));
            let read = reader
                .read(&mut buffer[filled..filled + want])
                .map_err(|err| GenerationError::stage(GenerationStage::Read, err))?;
            if read == 0 {
                return Err(GenerationError::stage(
                    GenerationStage::Read,
                    anyhow!("file {} shorter than declared", self.current_name),
                ));
            }
            filled += read;
            self.remaining_in_current -= read as u64;
            if self.remaining_in_current == 0 {
                self.current = None;
            }
        }
        Ok(())
    }

    /// Skip bytes without hashing, seeking mid-file when needed.
    fn skip(&mut self, mut count: u64) -> Result<(), GenerationError> {
        while count > 0 {
            if self.remaining_in_current == 0 && !self.advance()? {
                return Err(GenerationError::stage(
                    GenerationStage::Read,
                    anyhow!("package stream ended early during skip"),
                ));
            }
            let Some(reader) = self.current.as_mut() else {
                continue;
            };
            let step = count.min(self.remaining_in_current);
            reader
                .seek(SeekFrom::Current(
                    i64::try_from(step).unwrap_or(i64::MAX),
                ))
                .map_err(|err| GenerationError::stage(GenerationStage::Read, err))?;
            count -= step;
            self.remaining_in_current -= step;
            if self.remaining_in_current == 0 {
                self.current = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelgrid_test_support::MemStore;
    use reelgrid_test_support::fixtures::{build_torrent, package_dir};
    use reelgrid_torrent_core::QueueStatus;
    use reelgrid_torrent_core::store::{QueueStore, TorrentStore};

    fn generator(store: &Arc<MemStore>, workers: usize) -> Generator {
        Generator::new(store.clone(), store.clone(), store.clone(), workers)
    }

    fn request(path: &std::path::Path) -> GenerateRequest {
        GenerateRequest {
            package_path: path.to_path_buf(),
            package_id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            announce_url: "http://tracker.local/announce".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_package_fails_in_walk_stage() {
        let store = Arc::new(MemStore::new());
        let result = generator(&store, 2)
            .generate(&request(std::path::Path::new("/missing/pkg")))
            .await;
        assert!(matches!(
            result,
            Err(GenerationError::Stage {
                stage: GenerationStage::Walk,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn generated_metadata_matches_reference_builder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = package_dir(
            dir.path(),
            "PKG_GEN",
            &[
                ("reel_01.mxf", 100_000),
                ("meta/ASSETMAP.xml", 2_000),
                ("meta/VOLINDEX.xml", 0),
            ],
        );
        let store = Arc::new(MemStore::new());
        let request = request(&package);

        let generated = generator(&store, 4)
            .generate(&request)
            .await
            .expect("generate");

        // An independent walk of the same tree must produce the same hash.
        let reference = build_torrent(
            &package,
            generated.piece_length,
            "http://tracker.local/announce",
        );
        let reference = Metainfo::parse(&reference).expect("reference");
        assert_eq!(generated.metainfo.info_bytes, reference.info_bytes);
        assert_eq!(generated.info_hash.as_bytes(), &reference.info_hash());

        // Round trip through the persisted payload.
        let reparsed = Metainfo::parse(&generated.torrent_bytes).expect("reparse");
        assert_eq!(
            InfoHash::of_info_bytes(&reparsed.info_bytes),
            generated.info_hash
        );

        // All pieces pre-marked verified, checkpoints drained.
        let completion = store.completion_rows(&generated.info_hash);
        assert_eq!(
            u32::try_from(completion.len()).expect("fits"),
            generated.total_pieces
        );
        assert!(completion.iter().all(|(_, done)| *done));
        assert_eq!(
            store.checkpoint_count(request.package_id, request.server_id),
            0
        );
    }

    #[tokio::test]
    async fn repeated_runs_produce_identical_info_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = package_dir(dir.path(), "PKG_STABLE", &[("a.mxf", 50_000)]);
        let store = Arc::new(MemStore::new());
        let first = generator(&store, 2)
            .generate(&request(&package))
            .await
            .expect("first run");
        let second = generator(&store, 8)
            .generate(&request(&package))
            .await
            .expect("second run");
        assert_eq!(first.info_hash, second.info_hash);
    }

    #[tokio::test]
    async fn checkpointed_pieces_are_never_rehashed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = package_dir(dir.path(), "PKG_RESUME", &[("a.mxf", 60_000)]);
        let store = Arc::new(MemStore::new());
        let request = request(&package);

        // Seed a deliberately wrong checkpoint for piece 0. If the resumed
        // run trusted the checkpoint, the bogus hash must appear verbatim in
        // the final pieces blob.
        let bogus = [0xEEu8; 20];
        store
            .save_checkpoint_batch(
                request.package_id,
                request.server_id,
                &[PieceCheckpoint {
                    piece_index: 0,
                    hash: bogus,
                }],
            )
            .await
            .expect("seed checkpoint");

        let generated = generator(&store, 2)
            .generate(&request)
            .await
            .expect("generate");
        let info = generated.metainfo.info().expect("info");
        assert_eq!(info.pieces[0], bogus);
    }

    #[tokio::test]
    async fn cancellation_flag_aborts_without_committing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = package_dir(dir.path(), "PKG_CANCEL", &[("a.mxf", 40_000)]);
        let store = Arc::new(MemStore::new());
        let request = request(&package);

        // Create the queue row and pre-set its cancellation flag.
        store
            .upsert_inventory(
                request.package_id,
                request.server_id,
                package.to_str().expect("utf8"),
            )
            .await
            .expect("inventory");
        assert!(store
            .enqueue(request.package_id, request.server_id)
            .await
            .expect("enqueue"));
        let item = store
            .next_queued(request.server_id)
            .await
            .expect("next")
            .expect("row");
        store.request_cancel(item.id).await.expect("cancel");
        store
            .finish(item.id, QueueStatus::Generating, None)
            .await
            .expect("mark generating");

        let result = generator(&store, 2).generate(&request).await;
        assert!(matches!(result, Err(GenerationError::Cancelled)));
    }
}
