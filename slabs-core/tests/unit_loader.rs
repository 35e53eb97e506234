//! Unit tests for the multi-worker data loader

use ndarray::Array3;
use slabs_core::data::codec::{encode_data, encode_labels};
use slabs_core::data::{CollateMode, DataLoader, DatasetConfig, IndexSampler, Key, Record, SlabDataset};
use slabs_core::runtime::RuntimeConfig;
use slabs_core::storage::MemoryStore;
use slabs_core::{LoaderConfig, LoaderRuntime, SlabError};

const SIDE: usize = 8;
const SHARDS: i64 = 2;

/// Store holding `subjects` subjects of `SHARDS` slabs each
fn populated_store(subjects: i64) -> MemoryStore {
    let depth = SIDE / SHARDS as usize;
    let store = MemoryStore::new();
    for subject in 0..subjects {
        for shard in (0..SHARDS).rev() {
            let offset = shard as usize * depth;
            let data = Array3::from_shape_fn((depth, SIDE, SIDE), |(x, y, z)| (offset + x + y + z) as f32);
            let labels = Array3::from_elem((depth, SIDE, SIDE), subject);
            store.insert(
                Record::new()
                    .with("subject", subject)
                    .with("id", shard)
                    .with("subdata", encode_data(&data).unwrap())
                    .with("sublabel", encode_labels(&labels).unwrap()),
            );
        }
    }
    store
}

fn loader_config(mode: CollateMode, workers: usize, batch_size: usize) -> LoaderConfig {
    let mut config = LoaderConfig::default();
    config.assembly.cube_size = SIDE;
    config.assembly.shards_per_subject = Some(SHARDS as usize);
    config.sampling.mode = mode;
    config.sampling.crop_shape = [4, 4, 4];
    config.batch_size = batch_size;
    config.num_workers = workers;
    config.prefetch_depth = 2;
    config.seed = 1234;
    config.runtime = RuntimeConfig {
        io_threads: 2,
        compute_threads: 2,
    };
    config
}

fn subject_ids(keys: &[Key]) -> Vec<i64> {
    let mut ids: Vec<i64> = keys
        .iter()
        .map(|k| match k {
            Key::Int(v) => *v,
            Key::Text(t) => panic!("unexpected text key {}", t),
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[test]
fn test_batches_follow_sampler_order() {
    let config = loader_config(CollateMode::WholeVolume, 3, 2);
    let runtime = LoaderRuntime::new(config.runtime.clone()).unwrap();
    let store = populated_store(7);
    let dataset = SlabDataset::from_range(0..7, DatasetConfig::default());
    let mut loader = DataLoader::start(&runtime, dataset, store.clone(), &config).unwrap();

    let mut reference = IndexSampler::new(7, 2, config.seed).unwrap();

    runtime.block_on_io(async {
        for _ in 0..2 {
            let expected = reference.next_epoch();
            assert_eq!(loader.start_epoch().await.unwrap(), expected.len());

            for indices in &expected {
                let batch = loader.next_batch().await.unwrap();
                let mut want: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
                want.sort_unstable();
                assert_eq!(subject_ids(&batch.subjects), want);
                assert_eq!(batch.data.shape(), &[indices.len(), 1, SIDE, SIDE, SIDE]);
                assert_eq!(batch.labels.shape(), &[indices.len(), SIDE, SIDE, SIDE]);
            }
            assert!(matches!(loader.next_batch().await, Err(SlabError::EpochExhausted)));
        }
        assert_eq!(loader.batches_loaded(), 8);
        loader.shutdown().await;
    });

    assert_eq!(store.connections(), 3);
}

#[test]
fn test_labels_travel_with_their_subject() {
    let config = loader_config(CollateMode::Subvolumes { samples: 3 }, 2, 2);
    let runtime = LoaderRuntime::new(config.runtime.clone()).unwrap();
    let dataset = SlabDataset::from_range(0..4, DatasetConfig::default());
    let mut loader = DataLoader::start(&runtime, dataset, populated_store(4), &config).unwrap();

    runtime.block_on_io(async {
        loader.start_epoch().await.unwrap();
        while let Ok(batch) = loader.next_batch().await {
            assert_eq!(batch.data.shape(), &[6, 1, 4, 4, 4]);
            for (slot, key) in batch.subjects.iter().enumerate() {
                let Key::Int(subject) = key else {
                    panic!("unexpected key {}", key);
                };
                assert!(batch.labels.index_axis(ndarray::Axis(0), slot).iter().all(|l| l == subject));
            }
            assert_eq!(batch.subjects[0], batch.subjects[2]);
            assert_ne!(batch.subjects[2], batch.subjects[3]);
        }
        loader.shutdown().await;
    });
}

#[test]
fn test_store_errors_reach_consumer() {
    let config = loader_config(CollateMode::WholeVolume, 2, 3);
    let runtime = LoaderRuntime::new(config.runtime.clone()).unwrap();
    let store = populated_store(6);
    let dataset = SlabDataset::from_range(0..6, DatasetConfig::default());
    let mut loader = DataLoader::start(&runtime, dataset, store.clone(), &config).unwrap();

    runtime.block_on_io(async {
        store.set_failing(true);
        assert_eq!(loader.start_epoch().await.unwrap(), 2);
        for _ in 0..2 {
            let err = loader.next_batch().await.unwrap_err();
            assert!(err.is_storage());
        }
        assert!(matches!(loader.next_batch().await, Err(SlabError::EpochExhausted)));

        // Workers keep serving after a failed batch
        store.set_failing(false);
        loader.start_epoch().await.unwrap();
        for _ in 0..2 {
            assert_eq!(loader.next_batch().await.unwrap().len(), 3);
        }
        loader.shutdown().await;
    });
}

#[test]
fn test_absent_subject_has_no_slot() {
    let config = loader_config(CollateMode::WholeVolume, 1, 4);
    let runtime = LoaderRuntime::new(config.runtime.clone()).unwrap();
    // IDs 0..4 but the store only holds subjects 0..3
    let dataset = SlabDataset::from_range(0..4, DatasetConfig::default());
    let mut loader = DataLoader::start(&runtime, dataset, populated_store(3), &config).unwrap();

    runtime.block_on_io(async {
        loader.start_epoch().await.unwrap();
        let batch = loader.next_batch().await.unwrap();
        // An absent subject yields no records and therefore no slot
        assert_eq!(batch.len(), 3);
        loader.shutdown().await;
    });
}

#[test]
fn test_unread_batches_discarded_on_new_epoch() {
    let config = loader_config(CollateMode::WholeVolume, 2, 1);
    let runtime = LoaderRuntime::new(config.runtime.clone()).unwrap();
    let dataset = SlabDataset::from_range(0..5, DatasetConfig::default());
    let mut loader = DataLoader::start(&runtime, dataset, populated_store(5), &config).unwrap();

    runtime.block_on_io(async {
        assert_eq!(loader.start_epoch().await.unwrap(), 5);
        loader.next_batch().await.unwrap();

        assert_eq!(loader.start_epoch().await.unwrap(), 5);
        let mut count = 0;
        while loader.next_batch().await.is_ok() {
            count += 1;
        }
        assert_eq!(count, 5);
        assert_eq!(loader.batches_loaded(), 6);
        loader.shutdown().await;
    });
}
