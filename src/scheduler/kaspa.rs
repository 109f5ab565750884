use async_trait::async_trait;
use serde_json::Map;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    balance_and_transactions::wallet_payload,
    retry::{retry_with_delay, RetryPolicy},
    store::WalletStore,
    timer::{
        JobContext, JobParams, Poster, SchedulerJob, SchedulerTimer, SyncInterval, TimerEpoch,
        TimerParams,
    },
};
use crate::{
    error::{AppError, Result},
    integrations::kaspa::{
        map_kaspa_transaction, KaspaProviderRegistry, KaspaSnapshot, KaspaTransactionUi,
        KaspaWalletParams,
    },
    models::{SyncChannel, WorkerBody},
};

/// Polls a Kaspa REST backend for one watched address.
///
/// The backend has no certified reads, so every round reconciles with
/// `certified = false` and the whole fetch is retried before giving up.
pub struct KaspaWalletScheduler {
    label: String,
    timer: Arc<SchedulerTimer>,
    store: Mutex<WalletStore<KaspaTransactionUi>>,
    providers: Arc<KaspaProviderRegistry>,
    retry: RetryPolicy,
    page_size: u32,
}

impl KaspaWalletScheduler {
    pub fn new(
        label: String,
        reference: Option<String>,
        providers: Arc<KaspaProviderRegistry>,
        retry: RetryPolicy,
        page_size: u32,
        poster: Poster,
    ) -> Arc<Self> {
        Arc::new(Self {
            label,
            timer: SchedulerTimer::new(reference, poster),
            store: Mutex::new(WalletStore::default()),
            providers,
            retry,
            page_size,
        })
    }

    pub fn timer(&self) -> &SchedulerTimer {
        &self.timer
    }

    pub async fn start(
        self: &Arc<Self>,
        epoch: TimerEpoch,
        params: TimerParams<KaspaWalletParams>,
        interval: SyncInterval,
    ) {
        self.timer.start(epoch, params, interval, Arc::clone(self)).await;
    }

    pub async fn trigger(&self, epoch: TimerEpoch, params: TimerParams<KaspaWalletParams>) {
        self.timer.trigger(epoch, params, self).await;
    }

    pub fn stop(&self) {
        self.timer.stop();
    }

    fn store(&self) -> MutexGuard<'_, WalletStore<KaspaTransactionUi>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // A certified balance must never be compared against an uncertified read.
    fn check_certification(&self, certified: bool) -> Result<()> {
        match &self.store().balance {
            Some(stored) if stored.certified && !certified => {
                Err(AppError::CertificationRegressed {
                    reference: self.label.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn fetch(&self, params: &KaspaWalletParams) -> Result<KaspaSnapshot> {
        self.check_certification(false)?;
        let provider = self.providers.get(params.network).await?;
        provider
            .get_balance_and_transactions(&params.address, self.page_size)
            .await
    }

    fn sync_wallet(
        &self,
        snapshot: KaspaSnapshot,
        params: &KaspaWalletParams,
        ctx: &JobContext<'_>,
    ) -> Result<()> {
        if !ctx.is_current() {
            return Ok(());
        }

        let update = self.store().reconcile(
            snapshot.balance,
            snapshot.transactions,
            false,
            |transaction| vec![map_kaspa_transaction(&transaction, &params.address, params.network)],
            KaspaTransactionUi::clone,
        );
        if let Some(update) = update {
            tracing::debug!(
                "Kaspa {} has {} new transactions",
                self.label,
                update.new_transactions.len()
            );
            ctx.post(WorkerBody::Wallet {
                channel: SyncChannel::Kaspa,
                wallet: wallet_payload(update, Map::new())?,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SchedulerJob<KaspaWalletParams> for KaspaWalletScheduler {
    async fn run(&self, params: &JobParams<KaspaWalletParams>, ctx: &JobContext<'_>) -> Result<()> {
        let result = retry_with_delay(&self.retry, || self.fetch(&params.data)).await;

        match result {
            Ok(snapshot) => self.sync_wallet(snapshot, &params.data, ctx),
            Err(err) => {
                ctx.post(WorkerBody::Error {
                    channel: SyncChannel::Kaspa,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        integrations::kaspa::{KaspaNetwork, KaspaOutput, KaspaProvider, KaspaRawTransaction},
        models::{Amount, CertifiedData, Identity, SyncState, WorkerMessage},
    };
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicU32, Ordering},
    };
    use tokio::{sync::mpsc, time::Duration};

    const ADDRESS: &str = "kaspa:qrwatched";

    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl KaspaProvider for FlakyProvider {
        async fn get_balance_and_transactions(
            &self,
            address: &str,
            _limit: u32,
        ) -> Result<KaspaSnapshot> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(AppError::LedgerRPC("503 Service Unavailable".to_string()));
            }
            Ok(KaspaSnapshot {
                balance: Amount::from(2_500u64),
                transactions: vec![KaspaRawTransaction {
                    transaction_id: "tx1".to_string(),
                    block_time: Some(1_700_000_000_000),
                    is_accepted: true,
                    outputs: vec![KaspaOutput {
                        amount: 2_500,
                        script_public_key_address: Some(address.to_string()),
                    }],
                }],
            })
        }
    }

    async fn scheduler(
        provider: Arc<FlakyProvider>,
        attempts: u32,
    ) -> (Arc<KaspaWalletScheduler>, mpsc::UnboundedReceiver<WorkerMessage>) {
        let registry = Arc::new(KaspaProviderRegistry::new(
            HashMap::new(),
            reqwest::Client::new(),
        ));
        registry.register(KaspaNetwork::Mainnet, provider).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = KaspaWalletScheduler::new(
            "kaspa".to_string(),
            None,
            registry,
            RetryPolicy::new(attempts, Duration::ZERO),
            50,
            tx,
        );
        (scheduler, rx)
    }

    fn params() -> TimerParams<KaspaWalletParams> {
        TimerParams {
            identity: Some(Identity("2vxsx-fae".to_string())),
            data: KaspaWalletParams {
                address: ADDRESS.to_string(),
                network: KaspaNetwork::Mainnet,
            },
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> Vec<WorkerBody> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|message| message.body)
            .collect()
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let provider = Arc::new(FlakyProvider {
            failures: 3,
            calls: AtomicU32::new(0),
        });
        let (scheduler, mut rx) = scheduler(Arc::clone(&provider), 10).await;

        scheduler.trigger(scheduler.timer().epoch(), params()).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        let bodies = drain(&mut rx);
        assert!(!bodies
            .iter()
            .any(|body| matches!(body, WorkerBody::Error { .. })));
        let wallet = bodies
            .iter()
            .find_map(|body| match body {
                WorkerBody::Wallet { channel, wallet } => {
                    assert_eq!(*channel, SyncChannel::Kaspa);
                    Some(wallet)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(wallet.balance, CertifiedData::new(Amount(2_500), false));
        let transactions: Vec<serde_json::Value> =
            serde_json::from_str(&wallet.new_transactions).unwrap();
        assert_eq!(transactions[0]["type"], "receive");
        assert_eq!(transactions[0]["from"], ADDRESS);
        assert_eq!(
            bodies.last(),
            Some(&WorkerBody::SyncStatus {
                state: SyncState::Idle
            })
        );
    }

    #[tokio::test]
    async fn exhausted_retries_report_error_and_stop() {
        let provider = Arc::new(FlakyProvider {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let (scheduler, mut rx) = scheduler(Arc::clone(&provider), 3).await;

        let epoch = scheduler.timer().epoch();
        scheduler
            .start(epoch, params(), SyncInterval::Every(Duration::from_secs(30)))
            .await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let bodies = drain(&mut rx);
        assert!(bodies.iter().any(|body| matches!(
            body,
            WorkerBody::Error { channel: SyncChannel::Kaspa, error } if error.contains("503")
        )));
        assert_eq!(
            bodies.last(),
            Some(&WorkerBody::SyncStatus {
                state: SyncState::Error
            })
        );
        assert_eq!(scheduler.timer().status(), SyncState::Idle);
    }

    #[tokio::test]
    async fn unchanged_wallet_is_not_reposted() {
        let provider = Arc::new(FlakyProvider {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let (scheduler, mut rx) = scheduler(provider, 1).await;

        scheduler.trigger(scheduler.timer().epoch(), params()).await;
        scheduler.trigger(scheduler.timer().epoch(), params()).await;

        let wallets = drain(&mut rx)
            .into_iter()
            .filter(|body| matches!(body, WorkerBody::Wallet { .. }))
            .count();
        assert_eq!(wallets, 1);
        assert_eq!(scheduler.store().transactions.len(), 1);
    }

    #[tokio::test]
    async fn certified_store_rejects_uncertified_round() {
        let provider = Arc::new(FlakyProvider {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let (scheduler, mut rx) = scheduler(Arc::clone(&provider), 2).await;
        scheduler.store().balance = Some(CertifiedData::new(Amount(1), true));

        scheduler.trigger(scheduler.timer().epoch(), params()).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(drain(&mut rx).iter().any(|body| matches!(
            body,
            WorkerBody::Error { error, .. } if error.contains("regressed")
        )));
    }
}
