//! Clients for the network subgraph and the price oracle.

mod graph_client;
mod types;

pub use graph_client::GraphClient;
pub use types::{DailySeries, DeploymentSnapshot};
