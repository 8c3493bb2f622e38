//! Gateway Scanner Module
//!
//! Issues scan passes and folds the advertisement reports streaming back
//! from the gateway into the device table.

use crate::domain::devices::DeviceTable;
use crate::domain::models::{AdvertisingRecord, UserConfig};
use crate::infrastructure::gateway::protocol::{parse_adv_name, RawAdvertisement, ScanRequest};
use crate::infrastructure::gateway::{GatewayClient, GatewayError};
use chrono::{DateTime, Local, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Retain/drop predicate applied to every parsed advertisement.
pub type AdvFilter = Box<dyn Fn(&AdvertisingRecord) -> bool + Send + Sync>;

/// Retains every advertisement.
pub fn match_all(_record: &AdvertisingRecord) -> bool {
    true
}

/// Retains advertisements whose local name is exactly `name`,
/// e.g. `"CC2650 SensorTag"`.
pub fn name_equals(name: impl Into<String>) -> impl Fn(&AdvertisingRecord) -> bool + Send + Sync {
    let name = name.into();
    move |record| record.name == name
}

/// Local time with millisecond precision and no zone suffix.
pub fn render_timestamp(seconds: i64, micros: u32) -> String {
    let millis = seconds
        .saturating_mul(1000)
        .saturating_add(i64::from(micros / 1000));

    match Local.timestamp_millis_opt(millis).earliest() {
        Some(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        None => DateTime::<Utc>::from_timestamp_millis(millis)
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| format!("{}.{:03}", seconds, micros / 1000)),
    }
}

/// Normalizes one report node.
pub fn extract_record(raw: &RawAdvertisement) -> AdvertisingRecord {
    AdvertisingRecord {
        timestamp: render_timestamp(raw.tss, raw.tsus),
        address: raw.did.clone(),
        address_type: raw.dtype,
        event_type: raw.ev,
        rssi: raw.rssi,
        adv_len: raw.adv.len(),
        rsp_len: raw.rsp.len(),
        name: parse_adv_name(&raw.adv, &raw.rsp),
    }
}

/// Extracts every node, then keeps the ones `filter` retains.
pub fn parse_advertisements(
    raw: &[RawAdvertisement],
    filter: &dyn Fn(&AdvertisingRecord) -> bool,
) -> Vec<AdvertisingRecord> {
    raw.iter()
        .map(extract_record)
        .filter(|record| filter(record))
        .collect()
}

/// Device table of the current scan pass plus the retain predicate.
pub struct AdvertisementCollector {
    table: DeviceTable,
    filter: AdvFilter,
}

impl AdvertisementCollector {
    pub fn new() -> Self {
        Self::with_filter(Box::new(match_all))
    }

    pub fn with_filter(filter: AdvFilter) -> Self {
        Self {
            table: DeviceTable::new(),
            filter,
        }
    }

    /// Folds a report batch into the table and returns the device count.
    pub fn collect(&mut self, nodes: &[RawAdvertisement]) -> usize {
        let records = parse_advertisements(nodes, self.filter.as_ref());
        debug!(
            "Advertisement batch: {} nodes, {} retained",
            nodes.len(),
            records.len()
        );
        self.table.extend(records);
        self.table.len()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn table(&self) -> &DeviceTable {
        &self.table
    }
}

impl Default for AdvertisementCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts and stops scan passes on the gateway.
pub struct GatewayScanner {
    gateway: Arc<dyn GatewayClient>,
}

impl GatewayScanner {
    pub fn new(gateway: Arc<dyn GatewayClient>) -> Self {
        Self { gateway }
    }

    /// Clears the table, then issues the scan request. The pass ends with a
    /// scan-complete event on the event channel.
    pub async fn start_pass(
        &self,
        collector: &mut AdvertisementCollector,
        config: &UserConfig,
    ) -> Result<(), GatewayError> {
        collector.clear();
        let request = ScanRequest::start(config);
        info!(
            "Starting {} scan for {}s",
            config.scan_mode.label(),
            request.period
        );
        self.gateway.scan(request).await
    }

    /// Stops an active scan (scan request with a zero period).
    pub async fn stop(&self, config: &UserConfig) -> Result<(), GatewayError> {
        info!("Stopping scan...");
        self.gateway.scan(ScanRequest::stop(config)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AddressType;
    use crate::infrastructure::gateway::protocol::AdStructure;

    fn node(did: &str, rssi: i16, name: Option<&str>) -> RawAdvertisement {
        let mut adv = vec![AdStructure::new(0x01, "06")];
        if let Some(name) = name {
            adv.push(AdStructure::new(0x09, name));
        }
        RawAdvertisement {
            tss: 1_700_000_000,
            tsus: 123_456,
            did: did.to_string(),
            dtype: AddressType::Random,
            ev: 0,
            rssi,
            adv,
            rsp: vec![AdStructure::new(0x0a, "04")],
        }
    }

    #[test]
    fn test_timestamp_millisecond_precision() {
        let rendered = render_timestamp(1_700_000_000, 500_000);
        assert!(rendered.ends_with(".500"), "{}", rendered);
        assert!(!rendered.ends_with('Z'));

        let whole = Local
            .timestamp_opt(1_700_000_000, 0)
            .earliest()
            .unwrap()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        assert_eq!(rendered, format!("{}.500", whole));
    }

    #[test]
    fn test_timestamp_truncates_sub_millisecond() {
        assert!(render_timestamp(1_700_000_000, 999_999).ends_with(".999"));
        assert!(render_timestamp(1_700_000_000, 0).ends_with(".000"));
    }

    #[test]
    fn test_extract_record() {
        let record = extract_record(&node("ab8967452301", -48, Some("Thermo")));
        assert_eq!(record.address, "ab8967452301");
        assert_eq!(record.address_type, AddressType::Random);
        assert_eq!(record.rssi, -48);
        assert_eq!(record.adv_len, 2);
        assert_eq!(record.rsp_len, 1);
        assert_eq!(record.name, "Thermo");
        assert!(record.timestamp.ends_with(".123"));
    }

    #[test]
    fn test_parse_is_pure() {
        let nodes = vec![node("a1", -40, Some("A")), node("b2", -70, None)];
        let first = parse_advertisements(&nodes, &match_all);
        let second = parse_advertisements(&nodes, &match_all);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].name, "");
    }

    #[test]
    fn test_name_filter_drops_other_devices() {
        let nodes = vec![
            node("a1", -40, Some("CC2650 SensorTag")),
            node("b2", -70, Some("Thermo")),
            node("c3", -70, None),
        ];
        let filter = name_equals("CC2650 SensorTag");
        let retained = parse_advertisements(&nodes, &filter);
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].address, "a1");
    }

    #[test]
    fn test_collector_counts_unique_devices() {
        let mut collector = AdvertisementCollector::new();
        assert_eq!(collector.collect(&[node("a1", -40, None), node("b2", -50, None)]), 2);
        assert_eq!(collector.collect(&[node("a1", -30, Some("Late name"))]), 2);

        let latest = collector.table().get("a1").unwrap();
        assert_eq!(latest.rssi, -30);
        assert_eq!(latest.name, "Late name");

        collector.clear();
        assert!(collector.table().is_empty());
    }

    #[test]
    fn test_collector_with_filter() {
        let mut collector = AdvertisementCollector::with_filter(Box::new(name_equals("Thermo")));
        let count = collector.collect(&[node("a1", -40, Some("Thermo")), node("b2", -50, None)]);
        assert_eq!(count, 1);
    }
}
