use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::sync::Arc;

use crate::{
    error::Result,
    models::{Amount, Identity},
    scheduler::{
        balance_and_transactions::{LedgerSnapshot, WalletLedger},
        store::{LedgerTransaction, TransactionLeg},
        timer::JobParams,
    },
};

// ==================== PARAMS ====================
/// Account and canisters a given ICP/ICRC scheduler instance watches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcWalletParams {
    /// Textual ICRC-1 account (or ICP account identifier).
    pub account: String,
    pub ledger_canister_id: String,
    #[serde(default)]
    pub index_canister_id: Option<String>,
}

// ==================== RAW TRANSACTIONS ====================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcrcOperation {
    Transfer {
        from: String,
        to: String,
        amount: Amount,
        fee: Option<Amount>,
    },
    Mint {
        to: String,
        amount: Amount,
    },
    Burn {
        from: String,
        amount: Amount,
    },
    Approve {
        from: String,
        spender: String,
        amount: Amount,
        fee: Option<Amount>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcrcTransaction {
    pub id: u64,
    /// Nanoseconds since epoch.
    pub timestamp: u64,
    pub operation: IcrcOperation,
}

impl LedgerTransaction for IcrcTransaction {
    fn id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct IcrcIndexResponse {
    pub balance: Amount,
    pub transactions: Vec<IcrcTransaction>,
    pub oldest_tx_id: Option<u64>,
}

/// Index canister access, query or update call selected by `certified`.
#[async_trait]
pub trait IcrcIndexClient: Send + Sync {
    async fn get_transactions(
        &self,
        identity: &Identity,
        params: &IcWalletParams,
        certified: bool,
    ) -> Result<IcrcIndexResponse>;
}

// ==================== LEGS & UI ====================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcrcLeg {
    pub id: String,
    pub transaction: IcrcTransaction,
    /// Receiving side of a transfer to the own account.
    pub to_self: bool,
}

impl TransactionLeg for IcrcLeg {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn source_id(&self) -> String {
        self.transaction.id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IcTransactionType {
    Send,
    Receive,
    Mint,
    Burn,
    Approve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IcTransactionUi {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IcTransactionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub value: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<Amount>,
    pub timestamp: Amount,
    pub status: &'static str,
    pub incoming: bool,
}

// ==================== STRATEGY ====================
/// ICRC (and ICP index) strategy for the generic wallet scheduler.
#[derive(Clone)]
pub struct IcrcLedger {
    client: Arc<dyn IcrcIndexClient>,
}

impl IcrcLedger {
    pub fn new(client: Arc<dyn IcrcIndexClient>) -> Self {
        Self { client }
    }
}

fn is_own(account: &str, other: &str) -> bool {
    account.eq_ignore_ascii_case(other)
}

#[async_trait]
impl WalletLedger for IcrcLedger {
    type Params = IcWalletParams;
    type Transaction = IcrcTransaction;
    type Leg = IcrcLeg;
    type Ui = IcTransactionUi;

    async fn get_balance_and_transactions(
        &self,
        params: &JobParams<IcWalletParams>,
        certified: bool,
    ) -> Result<LedgerSnapshot<IcrcTransaction>> {
        let response = self
            .client
            .get_transactions(&params.identity, &params.data, certified)
            .await?;

        let mut aux = Map::new();
        if let Some(oldest_tx_id) = response.oldest_tx_id {
            aux.insert(
                "oldestTxId".to_string(),
                serde_json::to_value(Amount::from(oldest_tx_id))?,
            );
        }

        Ok(LedgerSnapshot {
            balance: response.balance,
            transactions: response.transactions,
            aux,
        })
    }

    fn map_to_self_transaction(&self, transaction: IcrcTransaction) -> Vec<IcrcLeg> {
        let self_transfer = matches!(
            &transaction.operation,
            IcrcOperation::Transfer { from, to, .. } if is_own(from, to)
        );
        let primary = IcrcLeg {
            id: transaction.id.to_string(),
            transaction,
            to_self: false,
        };
        if !self_transfer {
            return vec![primary];
        }
        let receiving = IcrcLeg {
            id: format!("{}-self", primary.id),
            transaction: primary.transaction.clone(),
            to_self: true,
        };
        vec![primary, receiving]
    }

    fn map_transaction(&self, leg: &IcrcLeg, params: &IcWalletParams) -> IcTransactionUi {
        let transaction = &leg.transaction;
        let (kind, from, to, value, fee, incoming) = match &transaction.operation {
            IcrcOperation::Transfer {
                from,
                to,
                amount,
                fee,
            } => {
                let incoming = if leg.to_self {
                    true
                } else if is_own(from, to) {
                    false
                } else {
                    is_own(&params.account, to)
                };
                let kind = if incoming {
                    IcTransactionType::Receive
                } else {
                    IcTransactionType::Send
                };
                let fee = if incoming { None } else { *fee };
                (kind, Some(from.clone()), Some(to.clone()), *amount, fee, incoming)
            }
            IcrcOperation::Mint { to, amount } => (
                IcTransactionType::Mint,
                None,
                Some(to.clone()),
                *amount,
                None,
                true,
            ),
            IcrcOperation::Burn { from, amount } => (
                IcTransactionType::Burn,
                Some(from.clone()),
                None,
                *amount,
                None,
                false,
            ),
            IcrcOperation::Approve {
                from,
                spender,
                amount,
                fee,
            } => (
                IcTransactionType::Approve,
                Some(from.clone()),
                Some(spender.clone()),
                *amount,
                *fee,
                false,
            ),
        };

        IcTransactionUi {
            id: leg.id.clone(),
            kind,
            from,
            to,
            value,
            fee,
            timestamp: Amount::from(transaction.timestamp),
            status: "executed",
            incoming,
        }
    }
}
