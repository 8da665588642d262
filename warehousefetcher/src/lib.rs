pub mod client;
pub mod error;
pub mod fetcher;
pub mod mapper;
pub mod models;
pub mod params;

pub use crate::fetcher::WarehouseFetcher;
pub use crate::params::{FetcherParams, RestCatalogParams, SnapshotParams, SourceKind};
