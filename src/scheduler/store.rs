use std::collections::HashMap;

use crate::models::{Amount, CertifiedData};

/// Raw ledger transaction as returned by a backend.
pub trait LedgerTransaction {
    fn id(&self) -> String;
}

/// One leg derived from a raw transaction, tracked independently in the store.
pub trait TransactionLeg {
    fn id(&self) -> String;

    /// Id of the raw transaction this leg was derived from.
    fn source_id(&self) -> String;
}

/// Delta produced by one reconciliation round.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletUpdate<U> {
    pub balance: CertifiedData<Amount>,
    pub new_transactions: Vec<U>,
}

/// Per-scheduler cache of the last known wallet state.
#[derive(Debug, Clone)]
pub struct WalletStore<L> {
    pub balance: Option<CertifiedData<Amount>>,
    pub transactions: HashMap<String, CertifiedData<L>>,
    pub initialized: bool,
}

impl<L> Default for WalletStore<L> {
    fn default() -> Self {
        Self {
            balance: None,
            transactions: HashMap::new(),
            initialized: false,
        }
    }
}

impl<L: TransactionLeg> WalletStore<L> {
    /// Merges one fetch result into the store and returns what the host must be told.
    ///
    /// Returns `None` when nothing changed, except on the very first round where an
    /// empty update is returned once so the host can leave its loading state.
    pub fn reconcile<T, U>(
        &mut self,
        balance: Amount,
        transactions: Vec<T>,
        certified: bool,
        map_to_self_transaction: impl Fn(T) -> Vec<L>,
        map_transaction: impl Fn(&L) -> U,
    ) -> Option<WalletUpdate<U>>
    where
        T: LedgerTransaction,
    {
        let new_legs: Vec<L> = transactions
            .into_iter()
            .filter(|transaction| self.is_new_transaction(&transaction.id(), certified))
            .flat_map(map_to_self_transaction)
            .collect();

        let balance_changed = match &self.balance {
            None => true,
            Some(stored) => stored.data != balance || (!stored.certified && certified),
        };

        if !balance_changed && new_legs.is_empty() {
            if self.initialized {
                return None;
            }
            self.initialized = true;
            return Some(WalletUpdate {
                balance: self.current_balance(balance, certified),
                new_transactions: Vec::new(),
            });
        }

        if balance_changed {
            self.balance = Some(CertifiedData::new(balance, certified));
        }

        let new_transactions = new_legs.iter().map(&map_transaction).collect();
        for leg in new_legs {
            self.transactions
                .insert(leg.id(), CertifiedData::new(leg, certified));
        }
        self.initialized = true;

        Some(WalletUpdate {
            balance: self.current_balance(balance, certified),
            new_transactions,
        })
    }

    /// Drops entries a certified round did not reconfirm. Returns the evicted ids.
    pub fn clean_uncertified(&mut self, certified: bool) -> Option<Vec<String>> {
        if !certified {
            return None;
        }

        let mut evicted: Vec<String> = self
            .transactions
            .iter()
            .filter(|(_, entry)| !entry.certified)
            .map(|(id, _)| id.clone())
            .collect();
        if evicted.is_empty() {
            return None;
        }
        evicted.sort();

        self.transactions.retain(|_, entry| entry.certified);
        Some(evicted)
    }

    // No leg of it stored yet, or some leg known only from a query while this
    // copy is certified.
    fn is_new_transaction(&self, id: &str, certified: bool) -> bool {
        let mut legs = self
            .transactions
            .values()
            .filter(|entry| entry.data.source_id() == id)
            .peekable();
        if legs.peek().is_none() {
            return true;
        }
        certified && legs.any(|entry| !entry.certified)
    }

    fn current_balance(&self, fallback: Amount, certified: bool) -> CertifiedData<Amount> {
        self.balance
            .clone()
            .unwrap_or_else(|| CertifiedData::new(fallback, certified))
    }
}
