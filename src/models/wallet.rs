use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::fmt;

use crate::constants::JSON_BIGINT_TAG;

// ==================== AMOUNT ====================
/// Ledger amount in the smallest unit (e8s, sompi, ...).
///
/// Serialized as `{"__bigint__":"<decimal>"}` so the host can revive it as a
/// bigint without losing precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(pub u128);

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(JSON_BIGINT_TAG, &self.0.to_string())?;
        map.end()
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(u128::from(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ==================== CERTIFIED DATA ====================
/// A value together with whether it came from a certified (update) read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertifiedData<T> {
    pub data: T,
    pub certified: bool,
}

impl<T> CertifiedData<T> {
    pub fn new(data: T, certified: bool) -> Self {
        Self { data, certified }
    }
}

// ==================== IDENTITY ====================
/// Caller identity handed over by the host once authentication completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);
