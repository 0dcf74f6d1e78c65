//! Response types for the network subgraph GraphQL API and the price API.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Generic GraphQL response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

/// Payload of the `subgraphDeployments` query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentsData {
    pub subgraph_deployments: Vec<DeploymentResponse>,
}

/// One deployment row; token amounts arrive as wei strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResponse {
    pub ipfs_hash: String,
    #[serde(default)]
    pub signalled_tokens: String,
    #[serde(default)]
    pub query_fees_amount: String,
    #[serde(default)]
    pub curator_count: u32,
}

/// Payload of the per-curator `signals` query.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalsData {
    pub signals: Vec<SignalResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResponse {
    #[serde(default)]
    pub signalled_tokens: String,
    pub subgraph_deployment: DeploymentRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRef {
    pub ipfs_hash: String,
}

/// Payload of the per-deployment daily data query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyDataData {
    pub subgraph_deployment_daily_datas: Vec<DailyDataPoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyDataPoint {
    pub day_number: i64,
    #[serde(default)]
    pub query_fees_amount: String,
    #[serde(default)]
    pub signalled_tokens: String,
}

/// CoinGecko simple-price response.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceResponse {
    #[serde(rename = "the-graph")]
    pub the_graph: PricePoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricePoint {
    pub usd: f64,
}

/// A deployment row converted to GRT units.
#[derive(Debug, Clone)]
pub struct DeploymentSnapshot {
    /// Deployment IPFS hash
    pub id: String,

    /// Total curator signal, in GRT
    pub pool_total: Decimal,

    /// Cumulative query fees earned, in GRT
    pub total_query_fees: Decimal,

    /// Number of curators signaling on the deployment
    pub curator_count: u32,
}

/// Daily fee and signal series for one deployment, oldest first, GRT units.
#[derive(Debug, Clone, Default)]
pub struct DailySeries {
    pub daily_fees: Vec<f64>,
    pub daily_signal: Vec<f64>,
}
