use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{
    config::Config,
    error::{AppError, Result},
    integrations::{IcWalletParams, IcrcIndexClient, IcrcLedger, KaspaProviderRegistry, KaspaWalletParams},
    models::{HostRequest, SyncChannel, SyncState, TimerCommand},
    scheduler::{
        BalanceAndTransactionsScheduler, ChainConfig, KaspaWalletScheduler, Poster, RetryPolicy,
        SyncInterval, TimerParams,
    },
};

// ==================== SETTINGS ====================
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub wallet_interval: SyncInterval,
    pub kaspa_interval: SyncInterval,
    pub kaspa_retry: RetryPolicy,
    pub kaspa_page_size: u32,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            wallet_interval: SyncInterval::from_millis(config.wallet_timer_interval_millis),
            kaspa_interval: SyncInterval::from_millis(config.kaspa_wallet_timer_interval_millis),
            kaspa_retry: RetryPolicy::new(
                config.kaspa_retry_attempts,
                Duration::from_millis(config.kaspa_retry_base_delay_millis),
            ),
            kaspa_page_size: config.kaspa_transactions_page_size,
        }
    }
}

// ==================== INSTANCES ====================
enum WorkerInstance {
    Ic(Arc<BalanceAndTransactionsScheduler<IcrcLedger>>),
    Kaspa(Arc<KaspaWalletScheduler>),
}

impl WorkerInstance {
    fn status(&self) -> SyncState {
        match self {
            WorkerInstance::Ic(scheduler) => scheduler.timer().status(),
            WorkerInstance::Kaspa(scheduler) => scheduler.timer().status(),
        }
    }

    fn stop(&self) {
        match self {
            WorkerInstance::Ic(scheduler) => scheduler.stop(),
            WorkerInstance::Kaspa(scheduler) => scheduler.stop(),
        }
    }
}

/// Scheduler instances serving one host connection.
pub struct SyncWorker {
    poster: Poster,
    settings: WorkerSettings,
    kaspa_providers: Arc<KaspaProviderRegistry>,
    icrc_client: Option<Arc<dyn IcrcIndexClient>>,
    instances: Mutex<HashMap<String, WorkerInstance>>,
}

impl SyncWorker {
    pub fn new(
        poster: Poster,
        settings: WorkerSettings,
        kaspa_providers: Arc<KaspaProviderRegistry>,
        icrc_client: Option<Arc<dyn IcrcIndexClient>>,
    ) -> Self {
        Self {
            poster,
            settings,
            kaspa_providers,
            icrc_client,
            instances: Mutex::new(HashMap::new()),
        }
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, WorkerInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatches one host request. Jobs run on spawned tasks so the caller
    /// keeps reading the connection.
    pub fn handle(&self, request: HostRequest) -> Result<()> {
        let key = request.instance_key();

        if request.command == TimerCommand::Stop {
            match self.instances().remove(&key) {
                Some(instance) => {
                    tracing::info!("Stopping scheduler {} (status {:?})", key, instance.status());
                    instance.stop();
                }
                None => tracing::debug!("Stop for unknown scheduler {}", key),
            }
            return Ok(());
        }

        match request.channel {
            SyncChannel::Icp | SyncChannel::Icrc => {
                let params: TimerParams<IcWalletParams> = request.parse_data()?;
                let Some(scheduler) = self.ic_scheduler(&request, &key)? else {
                    return Ok(());
                };
                let interval = self.settings.wallet_interval;
                // Taken before spawning so a later stop voids this request.
                let epoch = scheduler.timer().epoch();
                match request.command {
                    TimerCommand::Start => {
                        tokio::spawn(async move { scheduler.start(epoch, params, interval).await });
                    }
                    _ => {
                        tokio::spawn(async move { scheduler.trigger(epoch, params).await });
                    }
                }
            }
            SyncChannel::Kaspa => {
                let params: TimerParams<KaspaWalletParams> = request.parse_data()?;
                let scheduler = self.kaspa_scheduler(&request, &key)?;
                let interval = self.settings.kaspa_interval;
                // Taken before spawning so a later stop voids this request.
                let epoch = scheduler.timer().epoch();
                match request.command {
                    TimerCommand::Start => {
                        tokio::spawn(async move { scheduler.start(epoch, params, interval).await });
                    }
                    _ => {
                        tokio::spawn(async move { scheduler.trigger(epoch, params).await });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        let instances: Vec<(String, WorkerInstance)> = self.instances().drain().collect();
        for (key, instance) in instances {
            tracing::debug!("Stopping scheduler {} on disconnect", key);
            instance.stop();
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances().len()
    }

    fn ic_scheduler(
        &self,
        request: &HostRequest,
        key: &str,
    ) -> Result<Option<Arc<BalanceAndTransactionsScheduler<IcrcLedger>>>> {
        let Some(client) = &self.icrc_client else {
            tracing::warn!("No ICRC index client configured, ignoring {}", key);
            return Ok(None);
        };

        match self.instances().entry(key.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                WorkerInstance::Ic(scheduler) => Ok(Some(Arc::clone(scheduler))),
                WorkerInstance::Kaspa(_) => Err(mismatch(key)),
            },
            Entry::Vacant(entry) => {
                tracing::info!("Creating {} scheduler {}", request.channel, key);
                let scheduler = BalanceAndTransactionsScheduler::new(
                    IcrcLedger::new(Arc::clone(client)),
                    ChainConfig {
                        channel: request.channel,
                        reference: request.reference.clone(),
                    },
                    self.poster.clone(),
                );
                entry.insert(WorkerInstance::Ic(Arc::clone(&scheduler)));
                Ok(Some(scheduler))
            }
        }
    }

    fn kaspa_scheduler(&self, request: &HostRequest, key: &str) -> Result<Arc<KaspaWalletScheduler>> {
        match self.instances().entry(key.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                WorkerInstance::Kaspa(scheduler) => Ok(Arc::clone(scheduler)),
                WorkerInstance::Ic(_) => Err(mismatch(key)),
            },
            Entry::Vacant(entry) => {
                tracing::info!("Creating kaspa scheduler {}", key);
                let scheduler = KaspaWalletScheduler::new(
                    key.to_string(),
                    request.reference.clone(),
                    Arc::clone(&self.kaspa_providers),
                    self.settings.kaspa_retry,
                    self.settings.kaspa_page_size,
                    self.poster.clone(),
                );
                entry.insert(WorkerInstance::Kaspa(Arc::clone(&scheduler)));
                Ok(scheduler)
            }
        }
    }
}

fn mismatch(key: &str) -> AppError {
    AppError::Internal(format!("Scheduler {key} registered for another channel"))
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        integrations::{
            icrc::tests::{NoopClient, ACCOUNT},
            kaspa::{KaspaNetwork, KaspaProvider, KaspaSnapshot},
        },
        models::{Amount, WorkerBody, WorkerMessage},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::{
        sync::mpsc,
        time::{timeout, Duration},
    };

    #[derive(Default)]
    struct StaticProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KaspaProvider for StaticProvider {
        async fn get_balance_and_transactions(
            &self,
            _address: &str,
            _limit: u32,
        ) -> Result<KaspaSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(KaspaSnapshot {
                balance: Amount(9),
                transactions: Vec::new(),
            })
        }
    }

    async fn worker_with(
        icrc_client: Option<Arc<dyn IcrcIndexClient>>,
        settings: WorkerSettings,
    ) -> (
        SyncWorker,
        mpsc::UnboundedReceiver<WorkerMessage>,
        Arc<StaticProvider>,
    ) {
        let provider = Arc::new(StaticProvider::default());
        let registry = Arc::new(KaspaProviderRegistry::new(HashMap::new(), reqwest::Client::new()));
        registry
            .register(KaspaNetwork::Mainnet, Arc::clone(&provider) as Arc<dyn KaspaProvider>)
            .await;
        let (tx, rx) = mpsc::unbounded_channel();
        (SyncWorker::new(tx, settings, registry, icrc_client), rx, provider)
    }

    async fn worker(
        icrc_client: Option<Arc<dyn IcrcIndexClient>>,
    ) -> (SyncWorker, mpsc::UnboundedReceiver<WorkerMessage>) {
        let settings = WorkerSettings::from_config(&test_config());
        let (worker, rx, _) = worker_with(icrc_client, settings).await;
        (worker, rx)
    }

    fn fast_kaspa_settings() -> WorkerSettings {
        let mut settings = WorkerSettings::from_config(&test_config());
        settings.kaspa_interval = SyncInterval::from_millis(20);
        settings
    }

    fn kaspa_start() -> HostRequest {
        request(serde_json::json!({
            "msg": "startKaspaWalletTimer",
            "data": {"identity": "2vxsx-fae", "address": "kaspa:qrwatched", "network": "mainnet"}
        }))
    }

    fn posted_wallets(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> usize {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|message| matches!(message.body, WorkerBody::Wallet { .. }))
            .count()
    }

    async fn next_wallet(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> WorkerMessage {
        loop {
            let message = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("no wallet message in time")
                .expect("worker channel closed");
            if matches!(message.body, WorkerBody::Wallet { .. }) {
                return message;
            }
        }
    }

    fn request(raw: serde_json::Value) -> HostRequest {
        HostRequest::from_json(&raw.to_string()).unwrap()
    }

    #[tokio::test]
    async fn kaspa_start_posts_wallet_and_stop_removes_instance() {
        let (worker, mut rx) = worker(None).await;

        worker.handle(kaspa_start()).unwrap();
        assert_eq!(worker.instance_count(), 1);

        let message = next_wallet(&mut rx).await;
        assert!(message.reference.is_none());
        assert_eq!(serde_json::to_value(&message).unwrap()["msg"], "syncKaspaWallet");

        worker
            .handle(request(serde_json::json!({"msg": "stopKaspaWalletTimer"})))
            .unwrap();
        assert_eq!(worker.instance_count(), 0);
    }

    #[tokio::test]
    async fn icrc_requests_are_keyed_by_ref() {
        let client: Arc<dyn IcrcIndexClient> = Arc::new(NoopClient);
        let (worker, mut rx) = worker(Some(client)).await;

        for reference in ["ledger-a", "ledger-b"] {
            worker
                .handle(request(serde_json::json!({
                    "msg": "triggerIcrcWalletTimer",
                    "ref": reference,
                    "data": {
                        "identity": "2vxsx-fae",
                        "account": ACCOUNT,
                        "ledgerCanisterId": reference
                    }
                })))
                .unwrap();
        }
        assert_eq!(worker.instance_count(), 2);

        let message = next_wallet(&mut rx).await;
        assert!(message.reference.is_some());

        worker.stop_all();
        assert_eq!(worker.instance_count(), 0);
    }

    #[tokio::test]
    async fn icrc_without_index_client_is_ignored() {
        let (worker, _rx) = worker(None).await;

        worker
            .handle(request(serde_json::json!({
                "msg": "startIcrcWalletTimer",
                "data": {"identity": "2vxsx-fae", "account": ACCOUNT, "ledgerCanisterId": "x"}
            })))
            .unwrap();

        assert_eq!(worker.instance_count(), 0);
    }

    #[tokio::test]
    async fn start_without_data_is_rejected() {
        let (worker, _rx) = worker(None).await;

        let result = worker.handle(request(serde_json::json!({"msg": "startKaspaWalletTimer"})));

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(worker.instance_count(), 0);
    }

    #[tokio::test]
    async fn stop_handled_before_start_runs_leaves_nothing_polling() {
        let (worker, mut rx, provider) = worker_with(None, fast_kaspa_settings()).await;

        worker.handle(kaspa_start()).unwrap();
        worker
            .handle(request(serde_json::json!({"msg": "stopKaspaWalletTimer"})))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(posted_wallets(&mut rx), 0);
        assert_eq!(worker.instance_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_before_start_runs_leaves_nothing_polling() {
        let (worker, mut rx, provider) = worker_with(None, fast_kaspa_settings()).await;

        worker.handle(kaspa_start()).unwrap();
        worker.stop_all();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(posted_wallets(&mut rx), 0);
    }

    #[tokio::test]
    async fn stop_after_start_halts_polling() {
        let (worker, mut rx, provider) = worker_with(None, fast_kaspa_settings()).await;

        worker.handle(kaspa_start()).unwrap();
        next_wallet(&mut rx).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(provider.calls.load(Ordering::SeqCst) >= 2);

        worker
            .handle(request(serde_json::json!({"msg": "stopKaspaWalletTimer"})))
            .unwrap();
        let after_stop = provider.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), after_stop);
    }
}
