use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;

use crate::{
    config::Config,
    constants::{KASPA_MAINNET_EXPLORER_URL, KASPA_TESTNET_EXPLORER_URL},
    error::{AppError, Result},
    models::Amount,
    scheduler::store::{LedgerTransaction, TransactionLeg},
};

// ==================== NETWORK ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KaspaNetwork {
    Mainnet,
    Testnet,
}

impl KaspaNetwork {
    pub fn explorer_tx_url(&self, transaction_id: &str) -> String {
        let base = match self {
            KaspaNetwork::Mainnet => KASPA_MAINNET_EXPLORER_URL,
            KaspaNetwork::Testnet => KASPA_TESTNET_EXPLORER_URL,
        };
        format!("{base}/{transaction_id}")
    }
}

/// Address a Kaspa scheduler instance watches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KaspaWalletParams {
    pub address: String,
    #[serde(default = "default_network")]
    pub network: KaspaNetwork,
}

fn default_network() -> KaspaNetwork {
    KaspaNetwork::Mainnet
}

// ==================== REST PAYLOADS ====================
#[derive(Debug, Clone, Deserialize)]
struct KaspaBalanceResponse {
    balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KaspaOutput {
    pub amount: u64,
    #[serde(default)]
    pub script_public_key_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KaspaRawTransaction {
    pub transaction_id: String,
    /// Milliseconds since epoch.
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub is_accepted: bool,
    #[serde(default)]
    pub outputs: Vec<KaspaOutput>,
}

impl LedgerTransaction for KaspaRawTransaction {
    fn id(&self) -> String {
        self.transaction_id.clone()
    }
}

#[derive(Debug, Clone)]
pub struct KaspaSnapshot {
    pub balance: Amount,
    pub transactions: Vec<KaspaRawTransaction>,
}

// ==================== PROVIDER ====================
#[async_trait]
pub trait KaspaProvider: Send + Sync {
    async fn get_balance_and_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<KaspaSnapshot>;
}

#[derive(Clone, Debug)]
pub struct KaspaRestClient {
    base_url: String,
    client: Client,
}

impl KaspaRestClient {
    /// Constructs a client for one Kaspa REST endpoint.
    ///
    /// # Arguments
    /// * `base_url` - API root without trailing slash, e.g. `https://api.kaspa.org`.
    /// * `client` - shared HTTP client (timeouts are configured on it).
    pub fn new(base_url: String, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Fetches the balance of `address` in sompi.
    ///
    /// # Returns
    /// * `Ok(Amount)` when the endpoint answers with a balance payload.
    /// * `Err(AppError)` on transport, status or decoding failures.
    pub async fn get_balance(&self, address: &str) -> Result<Amount> {
        let url = format!("{}/addresses/{}/balance", self.base_url, address);
        let response = check_status(self.client.get(url).send().await?)?;
        let balance: KaspaBalanceResponse = response.json().await?;
        Ok(Amount::from(balance.balance))
    }

    /// Fetches the latest `limit` transactions touching `address`.
    ///
    /// # Returns
    /// * `Ok(Vec<KaspaRawTransaction>)` newest first, as served by the API.
    /// * `Err(AppError)` on transport, status or decoding failures.
    ///
    /// # Notes
    /// * Previous outpoints are not resolved, so inputs carry no sender address.
    pub async fn get_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<KaspaRawTransaction>> {
        let url = format!(
            "{}/addresses/{}/full-transactions?limit={}&offset=0&resolve_previous_outpoints=no",
            self.base_url, address, limit
        );
        let response = check_status(self.client.get(url).send().await?)?;
        Ok(response.json().await?)
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::LedgerRPC(format!(
            "{} returned {}",
            response.url().path(),
            status
        )));
    }
    Ok(response)
}

#[async_trait]
impl KaspaProvider for KaspaRestClient {
    async fn get_balance_and_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<KaspaSnapshot> {
        let (balance, transactions) =
            tokio::try_join!(self.get_balance(address), self.get_transactions(address, limit))?;
        Ok(KaspaSnapshot {
            balance,
            transactions,
        })
    }
}

/// Kaspa providers keyed by network, owned by the composition root.
pub struct KaspaProviderRegistry {
    client: Client,
    endpoints: HashMap<KaspaNetwork, String>,
    providers: RwLock<HashMap<KaspaNetwork, Arc<dyn KaspaProvider>>>,
}

impl KaspaProviderRegistry {
    pub fn new(endpoints: HashMap<KaspaNetwork, String>, client: Client) -> Self {
        Self {
            client,
            endpoints,
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        let endpoints = HashMap::from([
            (KaspaNetwork::Mainnet, config.kaspa_mainnet_api_url.clone()),
            (KaspaNetwork::Testnet, config.kaspa_testnet_api_url.clone()),
        ]);
        Ok(Self::new(endpoints, client))
    }

    pub async fn register(&self, network: KaspaNetwork, provider: Arc<dyn KaspaProvider>) {
        self.providers.write().await.insert(network, provider);
    }

    /// Returns the provider for `network`, creating the REST client on first use.
    pub async fn get(&self, network: KaspaNetwork) -> Result<Arc<dyn KaspaProvider>> {
        if let Some(provider) = self.providers.read().await.get(&network) {
            return Ok(Arc::clone(provider));
        }

        let mut providers = self.providers.write().await;
        if let Some(provider) = providers.get(&network) {
            return Ok(Arc::clone(provider));
        }
        let base_url = self.endpoints.get(&network).ok_or_else(|| {
            AppError::NotConfigured(format!("No Kaspa endpoint for {network:?}"))
        })?;
        tracing::info!("Creating Kaspa provider for {:?} at {}", network, base_url);
        let provider: Arc<dyn KaspaProvider> =
            Arc::new(KaspaRestClient::new(base_url.clone(), self.client.clone()));
        providers.insert(network, Arc::clone(&provider));
        Ok(provider)
    }
}

// ==================== UI ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KaspaTransactionType {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KaspaTransactionStatus {
    Confirmed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KaspaTransactionUi {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: KaspaTransactionType,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub value: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub status: KaspaTransactionStatus,
    pub tx_explorer_url: String,
}

impl TransactionLeg for KaspaTransactionUi {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn source_id(&self) -> String {
        self.id.clone()
    }
}

fn is_watched(output: &KaspaOutput, address: &str) -> bool {
    output
        .script_public_key_address
        .as_deref()
        .is_some_and(|destination| destination.eq_ignore_ascii_case(address))
}

/// Projects a UTXO transaction onto the watched address.
///
/// Receive when any output pays the address (value = sum of those outputs),
/// send otherwise. The sender is always reported as the watched address since
/// previous outpoints are not resolved.
pub fn map_kaspa_transaction(
    transaction: &KaspaRawTransaction,
    address: &str,
    network: KaspaNetwork,
) -> KaspaTransactionUi {
    let (own, foreign): (Vec<&KaspaOutput>, Vec<&KaspaOutput>) = transaction
        .outputs
        .iter()
        .partition(|output| is_watched(output, address));

    let (kind, value, to) = if own.is_empty() {
        let value: u128 = foreign.iter().map(|output| u128::from(output.amount)).sum();
        let to = foreign
            .iter()
            .find_map(|output| output.script_public_key_address.clone());
        (KaspaTransactionType::Send, value, to)
    } else {
        let value: u128 = own.iter().map(|output| u128::from(output.amount)).sum();
        (KaspaTransactionType::Receive, value, Some(address.to_string()))
    };

    KaspaTransactionUi {
        id: transaction.transaction_id.clone(),
        kind,
        from: address.to_string(),
        to,
        value: Amount(value),
        timestamp: transaction
            .block_time
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        status: if transaction.is_accepted {
            KaspaTransactionStatus::Confirmed
        } else {
            KaspaTransactionStatus::Pending
        },
        tx_explorer_url: network.explorer_tx_url(&transaction.transaction_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATCHED: &str = "kaspa:qrwatched";

    fn output(amount: u64, address: &str) -> KaspaOutput {
        KaspaOutput {
            amount,
            script_public_key_address: Some(address.to_string()),
        }
    }

    #[test]
    fn receive_sums_outputs_to_watched_address() {
        let tx = KaspaRawTransaction {
            transaction_id: "abc".to_string(),
            block_time: Some(1_700_000_000_000),
            is_accepted: true,
            outputs: vec![
                output(300, WATCHED),
                output(900, "kaspa:qrother"),
                output(200, WATCHED),
            ],
        };
        let ui = map_kaspa_transaction(&tx, WATCHED, KaspaNetwork::Mainnet);
        assert_eq!(ui.kind, KaspaTransactionType::Receive);
        assert_eq!(ui.value, Amount(500));
        assert_eq!(ui.from, WATCHED);
        assert_eq!(ui.status, KaspaTransactionStatus::Confirmed);
        assert_eq!(ui.tx_explorer_url, "https://explorer.kaspa.org/txs/abc");
        assert!(ui.timestamp.is_some());
    }

    #[test]
    fn send_uses_foreign_outputs() {
        let tx = KaspaRawTransaction {
            transaction_id: "def".to_string(),
            block_time: None,
            is_accepted: false,
            outputs: vec![output(1_000, "kaspa:qrdest"), output(50, "kaspa:qrfee")],
        };
        let ui = map_kaspa_transaction(&tx, WATCHED, KaspaNetwork::Testnet);
        assert_eq!(ui.kind, KaspaTransactionType::Send);
        assert_eq!(ui.value, Amount(1_050));
        assert_eq!(ui.to.as_deref(), Some("kaspa:qrdest"));
        assert_eq!(ui.from, WATCHED);
        assert_eq!(ui.status, KaspaTransactionStatus::Pending);
        assert!(ui.tx_explorer_url.starts_with("https://explorer-tn10.kaspa.org/txs/"));
    }

    #[test]
    fn raw_transaction_decodes_api_payload() {
        let raw = serde_json::json!([{
            "subnetwork_id": "0000000000000000000000000000000000000000",
            "transaction_id": "f00d",
            "hash": "f00d",
            "block_time": 1700000000000_i64,
            "is_accepted": true,
            "inputs": [{"previous_outpoint_hash": "aa", "previous_outpoint_index": "0"}],
            "outputs": [{
                "transaction_id": "f00d",
                "index": 0,
                "amount": 12345,
                "script_public_key": "20ab",
                "script_public_key_address": WATCHED,
                "script_public_key_type": "pubkey"
            }]
        }]);
        let transactions: Vec<KaspaRawTransaction> = serde_json::from_value(raw).unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].outputs[0].amount, 12345);
        assert_eq!(transactions[0].id(), "f00d");
    }

    #[test]
    fn wallet_params_default_to_mainnet() {
        let params: KaspaWalletParams =
            serde_json::from_value(serde_json::json!({"address": WATCHED})).unwrap();
        assert_eq!(params.network, KaspaNetwork::Mainnet);
    }

    #[tokio::test]
    async fn registry_reuses_provider_per_network() {
        let registry = KaspaProviderRegistry::new(
            HashMap::from([(KaspaNetwork::Mainnet, "http://localhost:1".to_string())]),
            Client::new(),
        );
        let first = registry.get(KaspaNetwork::Mainnet).await.unwrap();
        let second = registry.get(KaspaNetwork::Mainnet).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.get(KaspaNetwork::Testnet).await.is_err());
    }
}
