//! Network subgraph client: deployments, curator signals, daily fee series,
//! and the GRT/USD price oracle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use futures::future::join_all;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::types::*;

const NETWORK_SUBGRAPH_URL: &str =
    "https://api.thegraph.com/subgraphs/name/graphprotocol/graph-network-arbitrum";
const PRICE_API_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=the-graph&vs_currencies=usd";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// GRT uses 18 decimals.
const WEI_PER_GRT: Decimal = dec!(1_000_000_000_000_000_000);

/// Convert a wei string from the API into GRT.
fn wei_to_grt(raw: &str) -> Option<Decimal> {
    raw.parse::<Decimal>().ok().map(|wei| wei / WEI_PER_GRT)
}

/// Client for the network subgraph (read-only operations).
pub struct GraphClient {
    client: Client,
    subgraph_url: String,
    price_url: String,
    api_key: Option<String>,
}

impl GraphClient {
    /// Create a new client with default endpoints and an optional gateway
    /// API key.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_endpoints(
            NETWORK_SUBGRAPH_URL.to_string(),
            PRICE_API_URL.to_string(),
            api_key,
        )
    }

    /// Create a client with the gateway key from `GRAPH_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::new(std::env::var("GRAPH_API_KEY").ok())
    }

    /// Create with custom endpoints (for testing).
    pub fn with_endpoints(
        subgraph_url: String,
        price_url: String,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            subgraph_url,
            price_url,
            api_key,
        })
    }

    fn backoff_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..ExponentialBackoff::default()
        }
    }

    /// POST a GraphQL query, retrying transient failures with backoff.
    async fn execute<T: DeserializeOwned>(&self, query: serde_json::Value) -> Result<T> {
        let payload: GraphQlResponse<T> = backoff::future::retry(Self::backoff_policy(), || async {
            let mut request = self.client.post(&self.subgraph_url).json(&query);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request.send().await.map_err(|e| {
                warn!(error = %e, "GraphQL request failed, will retry");
                backoff::Error::transient(anyhow::Error::new(e))
            })?;

            let status = response.status();
            if status.is_server_error() {
                return Err(backoff::Error::transient(anyhow::anyhow!(
                    "GraphQL server error: {status}"
                )));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(backoff::Error::permanent(anyhow::anyhow!(
                    "GraphQL request failed: {status} - {body}"
                )));
            }

            response
                .json::<GraphQlResponse<T>>()
                .await
                .map_err(|e| backoff::Error::permanent(anyhow::Error::new(e)))
        })
        .await?;

        if let Some(error) = payload.errors.first() {
            anyhow::bail!("GraphQL error: {}", error.message);
        }

        payload.data.context("GraphQL response missing data")
    }

    /// Fetch the most-signaled deployments.
    pub async fn get_deployments(&self, first: usize) -> Result<Vec<DeploymentSnapshot>> {
        debug!(first, "Fetching subgraph deployments");

        let query = json!({
            "query": r#"
                query Deployments($first: Int!) {
                    subgraphDeployments(
                        first: $first,
                        orderBy: signalledTokens,
                        orderDirection: desc
                    ) {
                        ipfsHash
                        signalledTokens
                        queryFeesAmount
                        curatorCount
                    }
                }
            "#,
            "variables": { "first": first }
        });

        let data: DeploymentsData = self.execute(query).await?;

        let snapshots = data
            .subgraph_deployments
            .into_iter()
            .filter_map(|d| {
                let pool_total = match wei_to_grt(&d.signalled_tokens) {
                    Some(v) => v,
                    None => {
                        warn!(deployment = %d.ipfs_hash, "Unparseable signal amount, skipping");
                        return None;
                    }
                };
                let total_query_fees = wei_to_grt(&d.query_fees_amount).unwrap_or(Decimal::ZERO);

                Some(DeploymentSnapshot {
                    id: d.ipfs_hash,
                    pool_total,
                    total_query_fees,
                    curator_count: d.curator_count,
                })
            })
            .collect();

        Ok(snapshots)
    }

    /// Fetch a wallet's current signal per deployment, in GRT.
    pub async fn get_curator_signals(&self, curator: &str) -> Result<HashMap<String, Decimal>> {
        debug!(curator = %curator, "Fetching curator signals");

        let query = json!({
            "query": r#"
                query CuratorSignals($curator: String!) {
                    signals(where: { curator: $curator }) {
                        signalledTokens
                        subgraphDeployment { ipfsHash }
                    }
                }
            "#,
            "variables": { "curator": curator.to_lowercase() }
        });

        let data: SignalsData = self.execute(query).await?;

        let signals = data
            .signals
            .into_iter()
            .filter_map(|s| {
                let amount = wei_to_grt(&s.signalled_tokens)?;
                Some((s.subgraph_deployment.ipfs_hash, amount))
            })
            .collect();

        Ok(signals)
    }

    /// Fetch daily fee/signal series for several deployments concurrently.
    ///
    /// Deployments whose series cannot be fetched are omitted with a warning
    /// rather than failing the whole snapshot.
    pub async fn get_daily_series(
        &self,
        deployment_ids: &[String],
        days: usize,
    ) -> Result<HashMap<String, DailySeries>> {
        let fetches = deployment_ids.iter().map(|id| async move {
            let result = self.fetch_daily_series(id, days).await;
            (id.clone(), result)
        });

        let mut series = HashMap::new();
        for (id, result) in join_all(fetches).await {
            match result {
                Ok(s) => {
                    series.insert(id, s);
                }
                Err(e) => {
                    warn!(deployment = %id, error = %e, "Failed to fetch daily series");
                }
            }
        }

        Ok(series)
    }

    async fn fetch_daily_series(&self, deployment_id: &str, days: usize) -> Result<DailySeries> {
        let query = json!({
            "query": r#"
                query DailyData($deployment: String!, $days: Int!) {
                    subgraphDeploymentDailyDatas(
                        first: $days,
                        orderBy: dayNumber,
                        orderDirection: desc,
                        where: { subgraphDeployment: $deployment }
                    ) {
                        dayNumber
                        queryFeesAmount
                        signalledTokens
                    }
                }
            "#,
            "variables": { "deployment": deployment_id, "days": days }
        });

        let data: DailyDataData = self.execute(query).await?;

        // The API returns newest first; series are consumed oldest first.
        let mut points = data.subgraph_deployment_daily_datas;
        points.sort_by_key(|p| p.day_number);

        let mut series = DailySeries::default();
        for point in points {
            let fees = wei_to_grt(&point.query_fees_amount)
                .and_then(|v| v.to_f64())
                .unwrap_or(0.0);
            let signal = wei_to_grt(&point.signalled_tokens)
                .and_then(|v| v.to_f64())
                .unwrap_or(0.0);
            series.daily_fees.push(fees);
            series.daily_signal.push(signal);
        }

        Ok(series)
    }

    /// Fetch the GRT/USD spot price.
    pub async fn get_grt_price(&self) -> Result<Decimal> {
        debug!("Fetching GRT price");

        let price: PriceResponse = backoff::future::retry(Self::backoff_policy(), || async {
            let response = self
                .client
                .get(&self.price_url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow::Error::new(e)))?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(backoff::Error::transient(anyhow::anyhow!(
                    "Price request failed: {status}"
                )));
            }

            response
                .json::<PriceResponse>()
                .await
                .map_err(|e| backoff::Error::permanent(anyhow::Error::new(e)))
        })
        .await?;

        Decimal::try_from(price.the_graph.usd).context("Invalid GRT price")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wei_to_grt() {
        assert_eq!(
            wei_to_grt("1000000000000000000"),
            Some(Decimal::ONE)
        );
        assert_eq!(
            wei_to_grt("1500000000000000000000"),
            Some(dec!(1500))
        );
        assert_eq!(wei_to_grt("not-a-number"), None);
        assert_eq!(wei_to_grt(""), None);
    }
}
