//! Gateway Protocol
//!
//! Wire-level definitions shared with the gateway API: event and report
//! codes, advertisement report nodes, request payloads, and the typed
//! messages the gateway pushes onto the session channels.

use crate::domain::models::{AddressType, DeviceTarget, UserConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Device disconnected
pub const EVENT_DISCONNECT: u16 = 1;
/// Scan period elapsed or scan stopped
pub const EVENT_SCAN_COMPLETE: u16 = 39;

/// Batch of advertisement report nodes
pub const REPORT_ADVERTISEMENT: u16 = 1;
/// GATT notification
pub const REPORT_NOTIFICATION: u16 = 27;

/// AD type: shortened local name
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;
/// AD type: complete local name
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// One AD structure of an advertisement or scan response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdStructure {
    /// AD type code
    pub t: u8,
    /// Value: text for names, hex for everything else
    pub v: String,
}

impl AdStructure {
    pub fn new(t: u8, v: impl Into<String>) -> Self {
        Self { t, v: v.into() }
    }
}

/// Advertisement report node as delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAdvertisement {
    /// Whole seconds of the receive timestamp (Unix time)
    #[serde(default)]
    pub tss: i64,
    /// Microsecond fraction of the receive timestamp
    #[serde(default)]
    pub tsus: u32,
    pub did: String,
    pub dtype: AddressType,
    /// Advertisement event type
    pub ev: u8,
    pub rssi: i16,
    #[serde(default)]
    pub adv: Vec<AdStructure>,
    #[serde(default)]
    pub rsp: Vec<AdStructure>,
}

/// Local name from AD type 8 or 9, advertisement payload first, then scan response.
pub fn parse_adv_name(adv: &[AdStructure], rsp: &[AdStructure]) -> String {
    adv.iter()
        .chain(rsp.iter())
        .find(|ad| ad.t == AD_TYPE_SHORT_NAME || ad.t == AD_TYPE_COMPLETE_NAME)
        .map(|ad| ad.v.clone())
        .unwrap_or_default()
}

/// Subscription / disconnect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    All,
    Device(String),
}

impl DeviceFilter {
    pub fn matches(&self, did: &str) -> bool {
        match self {
            Self::All => true,
            Self::Device(own) => own == did,
        }
    }
}

/// Scan request; a zero period stops an active scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    pub active: bool,
    pub period: u32,
}

impl ScanRequest {
    pub fn start(config: &UserConfig) -> Self {
        Self {
            active: config.scan_mode.is_active(),
            period: config.scan_period,
        }
    }

    pub fn stop(config: &UserConfig) -> Self {
        Self {
            active: config.scan_mode.is_active(),
            period: 0,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.period == 0
    }
}

/// Connect request with the connection parameters of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectParams {
    pub did: String,
    pub dtype: AddressType,
    /// x1.25ms
    pub interval_min: u16,
    /// x1.25ms
    pub interval_max: u16,
    pub latency: u16,
    /// x10ms
    pub timeout: u16,
}

impl ConnectParams {
    pub fn new(target: &DeviceTarget, config: &UserConfig) -> Self {
        Self {
            did: target.address.clone(),
            dtype: target.address_type,
            interval_min: config.interval_min,
            interval_max: config.interval_max,
            latency: config.latency,
            timeout: config.timeout,
        }
    }
}

/// Lifecycle event pushed on the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Disconnect { did: String, reason: u8 },
    ScanComplete,
    Other { code: u16, payload: Value },
}

/// Streaming data pushed on the report channel.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReport {
    Advertisement(Vec<RawAdvertisement>),
    Notification { did: String, handle: u16, value: String },
    Other { code: u16, payload: Value },
}

#[derive(Deserialize)]
struct DisconnectBody {
    did: String,
    #[serde(default)]
    reason: u8,
}

#[derive(Deserialize)]
struct AdvertisementBody {
    #[serde(default)]
    nodes: Vec<RawAdvertisement>,
}

#[derive(Deserialize)]
struct NotificationBody {
    did: String,
    handle: u16,
    #[serde(default)]
    value: String,
}

fn wire_code(value: &Value, key: &str) -> Result<u16, serde_json::Error> {
    let code = value.get(key).cloned().ok_or_else(|| {
        <serde_json::Error as serde::de::Error>::custom(format!("missing field `{}`", key))
    })?;
    serde_json::from_value(code)
}

impl GatewayEvent {
    pub fn code(&self) -> u16 {
        match self {
            Self::Disconnect { .. } => EVENT_DISCONNECT,
            Self::ScanComplete => EVENT_SCAN_COMPLETE,
            Self::Other { code, .. } => *code,
        }
    }

    /// Decodes `{"event": <code>, ...}`.
    pub fn from_wire(value: Value) -> Result<Self, serde_json::Error> {
        match wire_code(&value, "event")? {
            EVENT_DISCONNECT => {
                let body: DisconnectBody = serde_json::from_value(value)?;
                Ok(Self::Disconnect {
                    did: body.did,
                    reason: body.reason,
                })
            }
            EVENT_SCAN_COMPLETE => Ok(Self::ScanComplete),
            code => Ok(Self::Other {
                code,
                payload: value,
            }),
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            Self::Disconnect { did, reason } => {
                json!({ "event": EVENT_DISCONNECT, "did": did, "reason": reason })
            }
            Self::ScanComplete => json!({ "event": EVENT_SCAN_COMPLETE }),
            Self::Other { payload, .. } => payload.clone(),
        }
    }
}

impl GatewayReport {
    pub fn code(&self) -> u16 {
        match self {
            Self::Advertisement(_) => REPORT_ADVERTISEMENT,
            Self::Notification { .. } => REPORT_NOTIFICATION,
            Self::Other { code, .. } => *code,
        }
    }

    /// Decodes `{"report": <code>, ...}`.
    pub fn from_wire(value: Value) -> Result<Self, serde_json::Error> {
        match wire_code(&value, "report")? {
            REPORT_ADVERTISEMENT => {
                let body: AdvertisementBody = serde_json::from_value(value)?;
                Ok(Self::Advertisement(body.nodes))
            }
            REPORT_NOTIFICATION => {
                let body: NotificationBody = serde_json::from_value(value)?;
                Ok(Self::Notification {
                    did: body.did,
                    handle: body.handle,
                    value: body.value,
                })
            }
            code => Ok(Self::Other {
                code,
                payload: value,
            }),
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            Self::Advertisement(nodes) => {
                json!({ "report": REPORT_ADVERTISEMENT, "nodes": nodes })
            }
            Self::Notification { did, handle, value } => json!({
                "report": REPORT_NOTIFICATION,
                "did": did,
                "handle": handle,
                "value": value,
            }),
            Self::Other { payload, .. } => payload.clone(),
        }
    }
}
