use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    query_update::query_and_update,
    store::{LedgerTransaction, TransactionLeg, WalletStore, WalletUpdate},
    timer::{
        JobContext, JobParams, Poster, SchedulerJob, SchedulerTimer, SyncInterval, TimerEpoch,
        TimerParams,
    },
};
use crate::{
    error::Result,
    models::{Amount, SyncChannel, WalletPayload, WorkerBody},
};

/// Balance and transactions returned by one ledger read.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot<T> {
    pub balance: Amount,
    pub transactions: Vec<T>,
    /// Extra fields forwarded verbatim in the wallet payload.
    pub aux: Map<String, Value>,
}

/// Chain-specific fetch and mapping callbacks plugged into the generic scheduler.
#[async_trait]
pub trait WalletLedger: Send + Sync + 'static {
    type Params: Clone + Send + Sync + 'static;
    type Transaction: LedgerTransaction + Send;
    type Leg: TransactionLeg + Send;
    type Ui: Serialize;

    async fn get_balance_and_transactions(
        &self,
        params: &JobParams<Self::Params>,
        certified: bool,
    ) -> Result<LedgerSnapshot<Self::Transaction>>;

    fn map_to_self_transaction(&self, transaction: Self::Transaction) -> Vec<Self::Leg>;

    fn map_transaction(&self, leg: &Self::Leg, params: &Self::Params) -> Self::Ui;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub channel: SyncChannel,
    pub reference: Option<String>,
}

pub(crate) fn wallet_payload<U: Serialize>(
    update: WalletUpdate<U>,
    aux: Map<String, Value>,
) -> Result<WalletPayload> {
    Ok(WalletPayload {
        balance: update.balance,
        new_transactions: serde_json::to_string(&update.new_transactions)?,
        aux,
    })
}

pub struct BalanceAndTransactionsScheduler<L: WalletLedger> {
    config: ChainConfig,
    ledger: L,
    timer: Arc<SchedulerTimer>,
    store: Mutex<WalletStore<L::Leg>>,
}

impl<L: WalletLedger> BalanceAndTransactionsScheduler<L> {
    pub fn new(ledger: L, config: ChainConfig, poster: Poster) -> Arc<Self> {
        Arc::new(Self {
            timer: SchedulerTimer::new(config.reference.clone(), poster),
            config,
            ledger,
            store: Mutex::new(WalletStore::default()),
        })
    }

    pub fn timer(&self) -> &SchedulerTimer {
        &self.timer
    }

    pub async fn start(
        self: &Arc<Self>,
        epoch: TimerEpoch,
        params: TimerParams<L::Params>,
        interval: SyncInterval,
    ) {
        self.timer.start(epoch, params, interval, Arc::clone(self)).await;
    }

    pub async fn trigger(&self, epoch: TimerEpoch, params: TimerParams<L::Params>) {
        self.timer.trigger(epoch, params, self).await;
    }

    pub fn stop(&self) {
        self.timer.stop();
    }

    fn store(&self) -> MutexGuard<'_, WalletStore<L::Leg>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sync_wallet(
        &self,
        snapshot: LedgerSnapshot<L::Transaction>,
        certified: bool,
        data: &L::Params,
        ctx: &JobContext<'_>,
    ) -> Result<()> {
        if !ctx.is_current() {
            return Ok(());
        }

        let LedgerSnapshot {
            balance,
            transactions,
            aux,
        } = snapshot;
        let mut store = self.store();

        if let Some(update) = store.reconcile(
            balance,
            transactions,
            certified,
            |transaction| self.ledger.map_to_self_transaction(transaction),
            |leg| self.ledger.map_transaction(leg, data),
        ) {
            ctx.post(WorkerBody::Wallet {
                channel: self.config.channel,
                wallet: wallet_payload(update, aux)?,
            });
        }

        if let Some(transaction_ids) = store.clean_uncertified(certified) {
            tracing::debug!(
                "Evicting {} unconfirmed {} transactions",
                transaction_ids.len(),
                self.config.channel
            );
            ctx.post(WorkerBody::CleanUp {
                channel: self.config.channel,
                transaction_ids,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl<L: WalletLedger> SchedulerJob<L::Params> for BalanceAndTransactionsScheduler<L> {
    async fn run(&self, params: &JobParams<L::Params>, ctx: &JobContext<'_>) -> Result<()> {
        query_and_update(
            |certified| self.ledger.get_balance_and_transactions(params, certified),
            |snapshot, certified| self.sync_wallet(snapshot, certified, &params.data, ctx),
            |error| {
                tracing::warn!("{} certified sync failed: {}", self.config.channel, error);
                ctx.post(WorkerBody::Error {
                    channel: self.config.channel,
                    error: error.to_string(),
                });
            },
        )
        .await
    }
}
