use lodestone::{ItemConfig, RecordStore, StoreConfig, Subspace, Value};
use lodestone_memkv::MemKv;

/// Fresh in-memory store with default configuration.
pub fn open_store() -> RecordStore<MemKv> {
    init_tracing();
    RecordStore::new(MemKv::new())
}

/// Store with a tiny inline threshold so small payloads exercise the
/// external blob path.
#[allow(dead_code)]
pub fn open_store_with_small_blobs(engine: MemKv) -> RecordStore<MemKv> {
    init_tracing();
    let config = StoreConfig {
        items: ItemConfig {
            inline_threshold: 256,
            chunk_size: 64,
            max_value_size: 1024 * 1024,
        },
        ..StoreConfig::default()
    };
    RecordStore::with_config(engine, config)
}

/// The blob region of the default store layout, for leak checks.
#[allow(dead_code)]
pub fn default_blob_region() -> Subspace {
    Subspace::from_tuple(&[Value::from("lodestone")])
        .subspace(&[Value::from("blobs")])
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
