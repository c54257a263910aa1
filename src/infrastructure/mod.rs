pub mod artifacts;
pub mod http_client_factory;
pub mod market_data;
pub mod observability;
pub mod stores;

pub use artifacts::{ArtifactLayout, FsBundleLoader};
pub use http_client_factory::HttpClientFactory;
pub use market_data::HttpMarketDataSource;
pub use stores::{CsvFeatureStore, InMemoryResultStore, RedisResultStore};
