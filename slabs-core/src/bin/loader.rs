//! Loader binary: runs one epoch against a document store and logs batch shapes

use slabs_core::data::{DataLoader, SlabDataset};
use slabs_core::storage::{HttpConnector, HttpDocumentStore};
use slabs_core::{metrics, LoaderConfig, LoaderRuntime, SlabError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting slab loader");

    let config = match std::env::var("SLABS_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            LoaderConfig::from_json_file(path)?
        }
        Err(_) => LoaderConfig::default(),
    }
    .apply_env()?;
    config.validate()?;

    let runtime = LoaderRuntime::new(config.runtime.clone())?;

    info!("Counting subjects at {}", config.store.endpoint());
    let counter = HttpDocumentStore::new(&config.store)?;
    let num_subjects = runtime.block_on_io(SlabDataset::discover_len(
        &counter,
        &config.dataset.id_field,
    ))?;
    info!("Found {} subjects", num_subjects);

    let dataset = SlabDataset::from_range(0..num_subjects as i64, config.dataset.clone());
    let (train, holdout) = config.split_dataset(dataset)?;
    info!(
        "Training on {} subjects, holding out {}",
        train.len(),
        holdout.len()
    );
    let mut loader = DataLoader::start(&runtime, train, HttpConnector, &config)?;

    let outcome = runtime.block_on_io(async {
        let batches = loader.start_epoch().await?;
        info!("Epoch of {} batches", batches);
        loop {
            match loader.next_batch().await {
                Ok(batch) => info!(
                    "Batch {}: data {:?}, labels {:?}, {} subjects",
                    loader.batches_loaded(),
                    batch.data.shape(),
                    batch.labels.shape(),
                    batch.distinct_subjects().len()
                ),
                Err(SlabError::EpochExhausted) => break,
                Err(e) => {
                    error!("Batch failed: {}", e);
                    return Err(e);
                }
            }
        }
        loader.shutdown().await;
        Ok::<_, SlabError>(())
    });

    info!("Metrics:\n{}", metrics::gather());
    runtime.shutdown();
    outcome?;
    Ok(())
}
