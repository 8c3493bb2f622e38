use serde::{Deserialize, Serialize};

/// BLE address type, `dtype` on the gateway wire (0 public, 1 random).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Random,
            _ => Self::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => 0,
            AddressType::Random => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Requests scan responses from advertisers
    #[default]
    Active,
    /// Listens to advertisements only
    Passive,
}

impl ScanMode {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Passive => "Passive",
        }
    }
}

/// Scan and connection parameters used for every gateway request of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Seconds of advertisement scanning
    #[serde(default = "default_scan_period")]
    pub scan_period: u32,
    #[serde(default)]
    pub scan_mode: ScanMode,
    /// Connection interval minimum, x1.25ms
    #[serde(default = "default_interval_min")]
    pub interval_min: u16,
    /// Connection interval maximum, x1.25ms
    #[serde(default = "default_interval_max")]
    pub interval_max: u16,
    /// Slave latency in connection events
    #[serde(default)]
    pub latency: u16,
    /// Supervision timeout, x10ms
    #[serde(default = "default_supervision_timeout")]
    pub timeout: u16,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            scan_period: default_scan_period(),
            scan_mode: ScanMode::default(),
            interval_min: default_interval_min(),
            interval_max: default_interval_max(),
            latency: 0,
            timeout: default_supervision_timeout(),
        }
    }
}

fn default_scan_period() -> u32 {
    1
}
fn default_interval_min() -> u16 {
    16
}
fn default_interval_max() -> u16 {
    100
}
fn default_supervision_timeout() -> u16 {
    200
}

/// One normalized advertisement, keyed by its raw gateway address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingRecord {
    /// Local time, `YYYY-MM-DDTHH:MM:SS.sss`
    pub timestamp: String,
    /// Raw address as the gateway API expects it back (not display form)
    pub address: String,
    pub address_type: AddressType,
    pub event_type: u8,
    pub rssi: i16,
    pub adv_len: usize,
    pub rsp_len: usize,
    /// Empty when neither payload carries a local name
    pub name: String,
}

impl AdvertisingRecord {
    pub fn target(&self) -> DeviceTarget {
        DeviceTarget {
            address: self.address.clone(),
            address_type: self.address_type,
            name: self.name.clone(),
        }
    }
}

/// The peripheral the user picked for a GATT read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub address: String,
    pub address_type: AddressType,
    pub name: String,
}

/// Outcome of the post-scan device menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    Connect(DeviceTarget),
    Rescan,
    Exit,
}

/// Primary service as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// First attribute handle of the service
    pub handle: u16,
    /// Last attribute handle of the service
    pub end: u16,
    #[serde(default)]
    pub uuid: String,
}

/// Characteristic declaration as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicDescriptor {
    pub handle: u16,
    #[serde(rename = "vh", default)]
    pub value_handle: u16,
    #[serde(default)]
    pub properties: u8,
    #[serde(default)]
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattService {
    #[serde(flatten)]
    pub descriptor: ServiceDescriptor,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

/// Services and characteristics of one device, printed once then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattTable {
    pub did: String,
    pub dt: AddressType,
    pub name: String,
    pub services: Vec<GattService>,
}

impl GattTable {
    pub fn new(target: &DeviceTarget) -> Self {
        Self {
            did: target.address.clone(),
            dt: target.address_type,
            name: target.name.clone(),
            services: Vec::new(),
        }
    }

    pub fn characteristic_count(&self) -> usize {
        self.services.iter().map(|s| s.characteristics.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Warning,
    Error,
}

/// Formats a raw little-endian hex address as `AA:BB:CC:DD:EE:FF`.
pub fn display_address(raw: &str) -> String {
    if raw.len() <= 2 {
        return raw.to_string();
    }
    let padded = if raw.len() % 2 == 1 {
        format!("0{}", raw)
    } else {
        raw.to_string()
    };
    let bytes = padded.as_bytes();
    let pairs: Vec<String> = bytes
        .chunks(2)
        .rev()
        .map(|pair| String::from_utf8_lossy(pair).to_uppercase())
        .collect();
    pairs.join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_address_reverses_bytes() {
        assert_eq!(display_address("ab8967452301"), "01:23:45:67:89:AB");
        assert_eq!(display_address("abc"), "BC:0A");
        assert_eq!(display_address("7f"), "7f");
    }

    #[test]
    fn test_address_type_wire_values() {
        assert_eq!(AddressType::from(1), AddressType::Random);
        assert_eq!(AddressType::from(0), AddressType::Public);
        assert_eq!(serde_json::to_string(&AddressType::Random).unwrap(), "1");
    }

    #[test]
    fn test_gatt_table_serializes_flat_services() {
        let target = DeviceTarget {
            address: "a1".to_string(),
            address_type: AddressType::Public,
            name: "Tag".to_string(),
        };
        let mut table = GattTable::new(&target);
        table.services.push(GattService {
            descriptor: ServiceDescriptor {
                handle: 1,
                end: 7,
                uuid: "1800".to_string(),
            },
            characteristics: vec![CharacteristicDescriptor {
                handle: 2,
                value_handle: 3,
                properties: 0x02,
                uuid: "2a00".to_string(),
            }],
        });

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["did"], "a1");
        assert_eq!(json["dt"], 0);
        assert_eq!(json["services"][0]["handle"], 1);
        assert_eq!(json["services"][0]["end"], 7);
        assert_eq!(json["services"][0]["characteristics"][0]["vh"], 3);
        assert_eq!(table.characteristic_count(), 1);
    }

    #[test]
    fn test_user_config_defaults() {
        let config: UserConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, UserConfig::default());
        assert_eq!(config.interval_min, 16);
        assert_eq!(config.timeout, 200);
        assert!(config.scan_mode.is_active());
    }
}
