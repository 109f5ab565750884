use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use super::wallet::{Amount, CertifiedData};
use crate::error::{AppError, Result};

// ==================== CHANNELS ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncChannel {
    Icp,
    Icrc,
    Kaspa,
}

impl SyncChannel {
    pub fn all() -> &'static [SyncChannel] {
        &[SyncChannel::Icp, SyncChannel::Icrc, SyncChannel::Kaspa]
    }

    pub fn wallet_msg(&self) -> &'static str {
        match self {
            SyncChannel::Icp => "syncIcpWallet",
            SyncChannel::Icrc => "syncIcrcWallet",
            SyncChannel::Kaspa => "syncKaspaWallet",
        }
    }

    pub fn clean_up_msg(&self) -> &'static str {
        match self {
            SyncChannel::Icp => "syncIcpWalletCleanUp",
            SyncChannel::Icrc => "syncIcrcWalletCleanUp",
            SyncChannel::Kaspa => "syncKaspaWalletCleanUp",
        }
    }

    pub fn error_msg(&self) -> &'static str {
        match self {
            SyncChannel::Icp => "syncIcpWalletError",
            SyncChannel::Icrc => "syncIcrcWalletError",
            SyncChannel::Kaspa => "syncKaspaWalletError",
        }
    }

    // Name used inside host request messages, e.g. `startIcrcWalletTimer`.
    fn timer_name(&self) -> &'static str {
        match self {
            SyncChannel::Icp => "Icp",
            SyncChannel::Icrc => "Icrc",
            SyncChannel::Kaspa => "Kaspa",
        }
    }
}

impl fmt::Display for SyncChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncChannel::Icp => "icp",
            SyncChannel::Icrc => "icrc",
            SyncChannel::Kaspa => "kaspa",
        };
        f.write_str(name)
    }
}

// ==================== WORKER -> HOST ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    InProgress,
    Error,
}

/// Wallet delta pushed to the host after a reconciliation round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPayload {
    pub balance: CertifiedData<Amount>,
    /// JSON-serialized array of UI transactions, bigints tagged.
    pub new_transactions: String,
    #[serde(flatten)]
    pub aux: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerBody {
    SyncStatus {
        state: SyncState,
    },
    Wallet {
        channel: SyncChannel,
        wallet: WalletPayload,
    },
    CleanUp {
        channel: SyncChannel,
        transaction_ids: Vec<String>,
    },
    Error {
        channel: SyncChannel,
        error: String,
    },
}

impl WorkerBody {
    pub fn msg(&self) -> &'static str {
        match self {
            WorkerBody::SyncStatus { .. } => "oisySyncStatus",
            WorkerBody::Wallet { channel, .. } => channel.wallet_msg(),
            WorkerBody::CleanUp { channel, .. } => channel.clean_up_msg(),
            WorkerBody::Error { channel, .. } => channel.error_msg(),
        }
    }
}

/// Envelope posted from a scheduler to its host.
///
/// Serialized as `{"msg": ..., "ref": ..., "data": ...}`; `ref` is omitted for
/// single-instance schedulers.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerMessage {
    pub reference: Option<String>,
    pub body: WorkerBody,
}

#[derive(Serialize)]
struct StatusData {
    state: SyncState,
}

#[derive(Serialize)]
struct WalletData<'a> {
    wallet: &'a WalletPayload,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanUpData<'a> {
    transaction_ids: &'a [String],
}

#[derive(Serialize)]
struct ErrorData<'a> {
    error: &'a str,
}

impl Serialize for WorkerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("WorkerMessage", 3)?;
        state.serialize_field("msg", self.body.msg())?;
        match &self.reference {
            Some(reference) => state.serialize_field("ref", reference)?,
            None => state.skip_field("ref")?,
        }
        match &self.body {
            WorkerBody::SyncStatus { state: sync_state } => {
                state.serialize_field("data", &StatusData { state: *sync_state })?
            }
            WorkerBody::Wallet { wallet, .. } => {
                state.serialize_field("data", &WalletData { wallet })?
            }
            WorkerBody::CleanUp {
                transaction_ids, ..
            } => state.serialize_field("data", &CleanUpData { transaction_ids })?,
            WorkerBody::Error { error, .. } => state.serialize_field("data", &ErrorData { error })?,
        }
        state.end()
    }
}

// ==================== HOST -> WORKER ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start,
    Stop,
    Trigger,
}

#[derive(Deserialize)]
struct RawHostRequest {
    msg: String,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Request posted by the host, e.g. `{"msg":"startKaspaWalletTimer","data":{...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct HostRequest {
    pub command: TimerCommand,
    pub channel: SyncChannel,
    pub reference: Option<String>,
    pub data: Option<Value>,
}

impl HostRequest {
    pub fn from_json(raw: &str) -> Result<Self> {
        let request: RawHostRequest = serde_json::from_str(raw)?;
        let (command, channel) = parse_timer_msg(&request.msg)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown message '{}'", request.msg)))?;
        Ok(Self {
            command,
            channel,
            reference: request.reference,
            data: request.data,
        })
    }

    /// Key of the scheduler instance this request addresses.
    pub fn instance_key(&self) -> String {
        match &self.reference {
            Some(reference) => format!("{}:{}", self.channel, reference),
            None => self.channel.to_string(),
        }
    }

    /// Decodes the request payload into the channel-specific timer data.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let data = self.data.clone().ok_or_else(|| {
            AppError::BadRequest(format!("{} request without data", self.channel))
        })?;
        Ok(serde_json::from_value(data)?)
    }
}

fn parse_timer_msg(msg: &str) -> Option<(TimerCommand, SyncChannel)> {
    let (command, rest) = if let Some(rest) = msg.strip_prefix("start") {
        (TimerCommand::Start, rest)
    } else if let Some(rest) = msg.strip_prefix("stop") {
        (TimerCommand::Stop, rest)
    } else if let Some(rest) = msg.strip_prefix("trigger") {
        (TimerCommand::Trigger, rest)
    } else {
        return None;
    };
    let name = rest.strip_suffix("WalletTimer")?;
    SyncChannel::all()
        .iter()
        .find(|channel| channel.timer_name() == name)
        .map(|channel| (command, *channel))
}
