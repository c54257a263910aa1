pub mod feature_store;
pub mod result_store;

pub use feature_store::CsvFeatureStore;
pub use result_store::{InMemoryResultStore, RedisResultStore};
