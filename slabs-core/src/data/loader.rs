//! Multi-worker batch loader
//!
//! Each worker owns one store connection and one collator. Batch `k` of an
//! epoch is dispatched to worker `k % W` and read back from the same worker,
//! so batches come out in sampler order no matter which worker finishes
//! first. Each worker's result channel is bounded by the prefetch depth.

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::batch::TensorBatch;
use super::collate::{CollateMode, Collator};
use super::coords::UniformCoordsGenerator;
use super::dataset::SlabDataset;
use super::sampler::IndexSampler;
use crate::config::LoaderConfig;
use crate::error::{Result, SlabError};
use crate::metrics::standard::{
    BATCHES_COLLATED, BATCH_FAILURES, COLLATE_DURATION, CONNECTED_WORKERS, FETCH_DURATION,
    RECORDS_FETCHED,
};
use crate::runtime::LoaderRuntime;
use crate::storage::{RecordStore, StoreConnector, StoreTarget};

/// One batch of dataset indices
struct Job {
    seq: usize,
    indices: Vec<usize>,
}

struct WorkerHandle {
    jobs: mpsc::UnboundedSender<Job>,
    results: mpsc::Receiver<Result<TensorBatch>>,
    task: JoinHandle<()>,
}

/// Async loader producing `TensorBatch`es epoch by epoch
///
/// ```ignore
/// let mut loader = DataLoader::start(&runtime, dataset, HttpConnector, &config)?;
/// runtime.block_on_io(async {
///     loader.start_epoch().await?;
///     loop {
///         match loader.next_batch().await {
///             Ok(batch) => train(batch),
///             Err(SlabError::EpochExhausted) => break,
///             Err(e) => return Err(e),
///         }
///     }
///     Ok(())
/// })?;
/// ```
pub struct DataLoader {
    sampler: IndexSampler,
    workers: Vec<WorkerHandle>,
    dataset: Arc<SlabDataset>,
    /// Next batch to hand out in the current epoch
    next: usize,
    /// Batches dispatched for the current epoch
    epoch_len: usize,
    batches_loaded: u64,
}

impl DataLoader {
    /// Spawn the worker pool with collators built from `config`
    pub fn start<C: StoreConnector>(
        runtime: &LoaderRuntime,
        dataset: SlabDataset,
        connector: C,
        config: &LoaderConfig,
    ) -> Result<Self> {
        Self::start_with(runtime, dataset, connector, config, |worker_id| {
            build_collator(config, worker_id)
        })
    }

    /// Spawn the worker pool with one collator per worker from `make_collator`
    pub fn start_with<C, F>(
        runtime: &LoaderRuntime,
        dataset: SlabDataset,
        connector: C,
        config: &LoaderConfig,
        mut make_collator: F,
    ) -> Result<Self>
    where
        C: StoreConnector,
        F: FnMut(usize) -> Result<Collator>,
    {
        config.validate()?;
        let sampler = IndexSampler::new(dataset.len(), config.batch_size, config.seed)?;
        let dataset = Arc::new(dataset);
        let connector = Arc::new(connector);

        let mut workers = Vec::with_capacity(config.num_workers);
        for worker_id in 0..config.num_workers {
            let collator = make_collator(worker_id)?;
            let (job_tx, job_rx) = mpsc::unbounded_channel();
            let (result_tx, result_rx) = mpsc::channel(config.prefetch_depth);

            let worker = Worker {
                id: worker_id,
                target: config.store.clone(),
                dataset: Arc::clone(&dataset),
                compute: runtime.compute_handle(),
                jobs: job_rx,
                results: result_tx,
            };
            let task = runtime.spawn_io(worker.run(Arc::clone(&connector), collator));

            workers.push(WorkerHandle {
                jobs: job_tx,
                results: result_rx,
                task,
            });
        }

        info!(
            "Data loader started: {} subjects, batch size {}, {} workers",
            dataset.len(),
            config.batch_size,
            workers.len()
        );

        Ok(Self {
            sampler,
            workers,
            dataset,
            next: 0,
            epoch_len: 0,
            batches_loaded: 0,
        })
    }

    /// Draw the next permutation and dispatch its batches to the workers
    ///
    /// Returns the number of batches in the epoch. Batches left unread from
    /// the previous epoch are drained and discarded first.
    pub async fn start_epoch(&mut self) -> Result<usize> {
        if self.next < self.epoch_len {
            warn!(
                "Discarding {} unread batches of epoch {}",
                self.epoch_len - self.next,
                self.sampler.epochs_drawn()
            );
            while self.next < self.epoch_len {
                let _ = self.recv_next().await;
            }
        }

        let batches = self.sampler.next_epoch();
        let num_workers = self.workers.len();
        self.next = 0;
        self.epoch_len = 0;
        for (seq, indices) in batches.into_iter().enumerate() {
            let worker_id = seq % num_workers;
            self.workers[worker_id]
                .jobs
                .send(Job { seq, indices })
                .map_err(|_| SlabError::Internal {
                    message: format!("worker {} is no longer accepting jobs", worker_id),
                })?;
            self.epoch_len += 1;
        }

        debug!(
            "Epoch {} dispatched: {} batches",
            self.sampler.epochs_drawn(),
            self.epoch_len
        );
        Ok(self.epoch_len)
    }

    /// Next batch of the current epoch, in sampler order
    pub async fn next_batch(&mut self) -> Result<TensorBatch> {
        if self.next >= self.epoch_len {
            return Err(SlabError::EpochExhausted);
        }
        let batch = self.recv_next().await?;
        self.batches_loaded += 1;
        Ok(batch)
    }

    async fn recv_next(&mut self) -> Result<TensorBatch> {
        let worker_id = self.next % self.workers.len();
        self.next += 1;
        match self.workers[worker_id].results.recv().await {
            Some(result) => result,
            None => Err(SlabError::Internal {
                message: format!("worker {} stopped", worker_id),
            }),
        }
    }

    /// Batches per epoch
    pub fn num_batches(&self) -> usize {
        self.sampler.num_batches()
    }

    /// Batches returned successfully over the loader's lifetime
    pub fn batches_loaded(&self) -> u64 {
        self.batches_loaded
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn dataset(&self) -> &SlabDataset {
        &self.dataset
    }

    /// Close the job channels and wait for every worker to exit
    pub async fn shutdown(self) {
        for (worker_id, handle) in self.workers.into_iter().enumerate() {
            let WorkerHandle {
                jobs,
                results,
                task,
            } = handle;
            drop(jobs);
            drop(results);
            if let Err(e) = task.await {
                error!("Worker {} did not exit cleanly: {}", worker_id, e);
            }
        }
        info!("Data loader shut down after {} batches", self.batches_loaded);
    }
}

fn build_collator(config: &LoaderConfig, worker_id: usize) -> Result<Collator> {
    match config.sampling.mode {
        CollateMode::WholeVolume => {
            Collator::whole_volume(config.fields.clone(), config.assembly.clone())
        }
        CollateMode::Subvolumes { samples } => {
            let seed = config.seed.wrapping_add(worker_id as u64 + 1);
            let generator =
                UniformCoordsGenerator::new(config.volume_shape(), config.sampling.crop_shape, seed)?;
            Collator::subvolumes(
                config.fields.clone(),
                config.assembly.clone(),
                samples,
                Box::new(generator),
            )
        }
    }
}

struct Worker {
    id: usize,
    target: StoreTarget,
    dataset: Arc<SlabDataset>,
    compute: Handle,
    jobs: mpsc::UnboundedReceiver<Job>,
    results: mpsc::Sender<Result<TensorBatch>>,
}

impl Worker {
    async fn run<C: StoreConnector>(mut self, connector: Arc<C>, collator: Collator) {
        let store = match connector.connect(&self.target, self.id).await {
            Ok(store) => {
                CONNECTED_WORKERS.inc();
                debug!("Worker {} connected to {}", self.id, self.target.endpoint());
                store
            }
            Err(e) => {
                error!("Worker {} failed to connect: {}", self.id, e);
                let reason = e.to_string();
                while let Some(job) = self.jobs.recv().await {
                    BATCH_FAILURES.inc();
                    let failure = Err(SlabError::ConnectionFailed {
                        endpoint: self.target.endpoint(),
                        reason: reason.clone(),
                    });
                    if self.results.send(failure).await.is_err() {
                        break;
                    }
                    debug!("Worker {} failed batch {} without a connection", self.id, job.seq);
                }
                return;
            }
        };

        let mut collator = Some(collator);
        while let Some(job) = self.jobs.recv().await {
            let Some(current) = collator.take() else {
                break;
            };
            let (returned, result) = self.process(&store, current, job).await;
            collator = returned;

            if result.is_ok() {
                BATCHES_COLLATED.inc();
            } else {
                BATCH_FAILURES.inc();
            }
            if self.results.send(result).await.is_err() {
                break;
            }
            if collator.is_none() {
                break;
            }
        }

        CONNECTED_WORKERS.dec();
        debug!("Worker {} exiting", self.id);
    }

    /// Fetch and collate one batch; the collator is lost only if collation panics
    async fn process<S: RecordStore>(
        &self,
        store: &S,
        mut collator: Collator,
        job: Job,
    ) -> (Option<Collator>, Result<TensorBatch>) {
        let fetch_start = Instant::now();
        let records = match self.dataset.fetch(store, &job.indices).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Worker {} fetch for batch {} failed: {}", self.id, job.seq, e);
                return (Some(collator), Err(e));
            }
        };
        FETCH_DURATION.observe_since(fetch_start);
        RECORDS_FETCHED.inc_by(records.len() as u64);

        let collate_start = Instant::now();
        let joined = self
            .compute
            .spawn_blocking(move || {
                let result = collator.collate(records);
                (collator, result)
            })
            .await;

        match joined {
            Ok((collator, result)) => {
                COLLATE_DURATION.observe_since(collate_start);
                if let Err(e) = &result {
                    warn!("Worker {} batch {} failed: {}", self.id, job.seq, e);
                }
                (Some(collator), result)
            }
            Err(e) => {
                error!("Worker {} lost its collator on batch {}: {}", self.id, job.seq, e);
                (
                    None,
                    Err(SlabError::Internal {
                        message: format!("collation task failed: {}", e),
                    }),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::codec::{encode_data, encode_labels};
    use crate::data::dataset::DatasetConfig;
    use crate::data::record::Record;
    use crate::runtime::RuntimeConfig;
    use crate::storage::MemoryStore;
    use ndarray::Array3;

    const SIDE: usize = 8;

    fn store(subjects: i64) -> MemoryStore {
        let store = MemoryStore::new();
        for subject in 0..subjects {
            for id in 0..2i64 {
                let data = Array3::from_elem((SIDE / 2, SIDE, SIDE), (subject * 2 + id) as f32);
                let labels = Array3::from_elem((SIDE / 2, SIDE, SIDE), subject);
                store.insert(
                    Record::new()
                        .with("subject", subject)
                        .with("id", id)
                        .with("subdata", encode_data(&data).unwrap())
                        .with("sublabel", encode_labels(&labels).unwrap()),
                );
            }
        }
        store
    }

    fn config(workers: usize) -> LoaderConfig {
        let mut config = LoaderConfig::default();
        config.assembly.cube_size = SIDE;
        config.sampling.mode = CollateMode::WholeVolume;
        config.batch_size = 2;
        config.num_workers = workers;
        config.runtime = RuntimeConfig {
            io_threads: 2,
            compute_threads: 2,
        };
        config
    }

    #[test]
    fn test_epoch_in_sampler_order() {
        let config = config(2);
        let runtime = LoaderRuntime::new(config.runtime.clone()).unwrap();
        let dataset = SlabDataset::from_range(0..5, DatasetConfig::default());
        let mut loader = DataLoader::start(&runtime, dataset, store(5), &config).unwrap();
        let mut expected = IndexSampler::new(5, 2, config.seed).unwrap().next_epoch();

        runtime.block_on_io(async {
            assert_eq!(loader.start_epoch().await.unwrap(), 3);
            for indices in expected.iter_mut() {
                let batch = loader.next_batch().await.unwrap();
                let mut got: Vec<i64> = batch
                    .subjects
                    .iter()
                    .map(|k| match k {
                        crate::data::record::Key::Int(v) => *v,
                        other => panic!("unexpected key {}", other),
                    })
                    .collect();
                got.sort();
                indices.sort();
                let want: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
                assert_eq!(got, want);
            }
            assert!(matches!(loader.next_batch().await, Err(SlabError::EpochExhausted)));
            assert_eq!(loader.batches_loaded(), 3);
            loader.shutdown().await;
        });
    }

    #[test]
    fn test_next_batch_before_epoch() {
        let config = config(1);
        let runtime = LoaderRuntime::new(config.runtime.clone()).unwrap();
        let dataset = SlabDataset::from_range(0..2, DatasetConfig::default());
        let mut loader = DataLoader::start(&runtime, dataset, store(2), &config).unwrap();

        runtime.block_on_io(async {
            assert!(matches!(loader.next_batch().await, Err(SlabError::EpochExhausted)));
            loader.shutdown().await;
        });
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config(1);
        config.prefetch_depth = 0;
        let runtime = LoaderRuntime::new(config.runtime.clone()).unwrap();
        let dataset = SlabDataset::from_range(0..2, DatasetConfig::default());
        assert!(DataLoader::start(&runtime, dataset, store(2), &config).is_err());
    }
}
