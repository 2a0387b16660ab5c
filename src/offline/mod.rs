pub mod cache;
pub mod connectivity;
pub mod strategy;
pub mod sync;

pub use cache::OfflineCache;
pub use connectivity::{Connectivity, ConnectivityDetector};
