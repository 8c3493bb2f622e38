//! Simulated Gateway
//!
//! Fixture-driven [`GatewayClient`] that behaves like a gateway with a set
//! of advertising peripherals: timed advertisement reports, scan-complete
//! events, connect, service/characteristic enumeration and disconnect
//! events. Faults can be injected through [`FaultPlan`].

use crate::domain::models::{AddressType, CharacteristicDescriptor, ServiceDescriptor};
use crate::infrastructure::gateway::protocol::{
    AdStructure, ConnectParams, DeviceFilter, GatewayEvent, GatewayReport, RawAdvertisement,
    ScanRequest,
};
use crate::infrastructure::gateway::{Credentials, GatewayClient, GatewayError, GatewayStatus};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// HCI reason "connection terminated by local host"
const REASON_LOCAL_HOST: u8 = 0x16;

/// Injected failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPlan {
    pub fail_login: bool,
    pub fail_open: bool,
    pub fail_version: bool,
    pub fail_connect: bool,
    pub fail_discovery: bool,
    pub fail_characteristics: bool,
    /// Number of scan-stop/disconnect requests rejected before they succeed
    pub shutdown_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedService {
    pub service: ServiceDescriptor,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicDescriptor>,
}

/// One peripheral; the advertisement timestamp is replaced on every report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub advertisement: RawAdvertisement,
    #[serde(default)]
    pub services: Vec<SimulatedService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayFixture {
    pub gateways: Vec<String>,
    pub version: String,
    /// When set, logins with any other password are refused
    pub accepted_password: Option<String>,
    pub report_interval_ms: u64,
    pub devices: Vec<SimulatedDevice>,
    /// Raw `{"event": ..}` / `{"report": ..}` messages pushed once per scan
    /// pass, right after the first advertisement batch
    pub pushes: Vec<Value>,
    pub faults: FaultPlan,
}

impl Default for GatewayFixture {
    fn default() -> Self {
        Self {
            gateways: vec!["GW-00A1".to_string()],
            version: "2.4.1-sim".to_string(),
            accepted_password: None,
            report_interval_ms: 250,
            devices: demo_devices(),
            pushes: Vec::new(),
            faults: FaultPlan::default(),
        }
    }
}

impl GatewayFixture {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading gateway fixture {}", path.display()))?;
        let fixture = serde_json::from_str(&contents)
            .with_context(|| format!("parsing gateway fixture {}", path.display()))?;
        Ok(fixture)
    }

    /// Fixture file when one is configured, built-in devices otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

fn service(handle: u16, end: u16, uuid: &str, chars: &[(u16, u8, &str)]) -> SimulatedService {
    SimulatedService {
        service: ServiceDescriptor {
            handle,
            end,
            uuid: uuid.to_string(),
        },
        characteristics: chars
            .iter()
            .map(|&(handle, properties, uuid)| CharacteristicDescriptor {
                handle,
                value_handle: handle + 1,
                properties,
                uuid: uuid.to_string(),
            })
            .collect(),
    }
}

fn demo_devices() -> Vec<SimulatedDevice> {
    vec![
        SimulatedDevice {
            advertisement: RawAdvertisement {
                tss: 0,
                tsus: 0,
                did: "81e8c948b4b0".to_string(),
                dtype: AddressType::Public,
                ev: 0,
                rssi: -52,
                adv: vec![
                    AdStructure::new(0x01, "05"),
                    AdStructure::new(0x09, "CC2650 SensorTag"),
                ],
                rsp: vec![AdStructure::new(0x0a, "00")],
            },
            services: vec![
                service(
                    0x0001,
                    0x0007,
                    "1800",
                    &[(0x0002, 0x02, "2a00"), (0x0004, 0x02, "2a01"), (0x0006, 0x02, "2a04")],
                ),
                service(0x0008, 0x000b, "1801", &[(0x0009, 0x20, "2a05")]),
                service(
                    0x000c,
                    0x001e,
                    "180a",
                    &[(0x000d, 0x02, "2a23"), (0x000f, 0x02, "2a24"), (0x0011, 0x02, "2a26")],
                ),
                service(
                    0x001f,
                    0x0029,
                    "f000aa00-0451-4000-b000-000000000000",
                    &[
                        (0x0020, 0x12, "f000aa01-0451-4000-b000-000000000000"),
                        (0x0023, 0x0a, "f000aa02-0451-4000-b000-000000000000"),
                        (0x0025, 0x0a, "f000aa03-0451-4000-b000-000000000000"),
                    ],
                ),
            ],
        },
        SimulatedDevice {
            advertisement: RawAdvertisement {
                tss: 0,
                tsus: 0,
                did: "c51a2b3c4dd7".to_string(),
                dtype: AddressType::Random,
                ev: 0,
                rssi: -71,
                adv: vec![AdStructure::new(0x01, "06")],
                rsp: vec![AdStructure::new(0x08, "Thermo")],
            },
            services: vec![
                service(0x0001, 0x0005, "1800", &[(0x0002, 0x02, "2a00")]),
                service(0x0006, 0x000a, "181a", &[(0x0007, 0x12, "2a6e")]),
            ],
        },
        SimulatedDevice {
            advertisement: RawAdvertisement {
                tss: 0,
                tsus: 0,
                did: "f9e8d7c6b5a4".to_string(),
                dtype: AddressType::Random,
                ev: 3,
                rssi: -88,
                adv: vec![
                    AdStructure::new(0x01, "06"),
                    AdStructure::new(0xff, "4c000215e2c56db5dffb48d2b060d0f5a71096e0"),
                ],
                rsp: Vec::new(),
            },
            services: Vec::new(),
        },
    ]
}

/// Request counters, logged on close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub scans_started: u32,
    pub scans_stopped: u32,
    pub connects: u32,
    pub service_requests: u32,
    pub disconnects: u32,
    pub closes: u32,
    pub logouts: u32,
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scans {}/{} stopped, connects {}, service requests {}, disconnects {}, closes {}, logouts {}",
            self.scans_started,
            self.scans_stopped,
            self.connects,
            self.service_requests,
            self.disconnects,
            self.closes,
            self.logouts
        )
    }
}

#[derive(Default)]
struct Sinks {
    events: Vec<(DeviceFilter, mpsc::UnboundedSender<GatewayEvent>)>,
    reports: Vec<(DeviceFilter, mpsc::UnboundedSender<GatewayReport>)>,
}

impl Sinks {
    fn publish_event(&mut self, event: GatewayEvent) {
        let did = match &event {
            GatewayEvent::Disconnect { did, .. } => Some(did.clone()),
            _ => None,
        };
        self.events.retain(|(filter, sink)| {
            if did.as_deref().map_or(true, |did| filter.matches(did)) {
                sink.send(event.clone()).is_ok()
            } else {
                !sink.is_closed()
            }
        });
    }

    fn publish_report(&mut self, report: GatewayReport) {
        self.reports.retain(|(filter, sink)| {
            let scoped = match (&report, filter) {
                (_, DeviceFilter::All) => Some(report.clone()),
                (GatewayReport::Advertisement(nodes), filter) => {
                    let nodes: Vec<_> = nodes
                        .iter()
                        .filter(|node| filter.matches(&node.did))
                        .cloned()
                        .collect();
                    (!nodes.is_empty()).then_some(GatewayReport::Advertisement(nodes))
                }
                (GatewayReport::Notification { did, .. }, filter) if filter.matches(did) => {
                    Some(report.clone())
                }
                _ => None,
            };
            match scoped {
                Some(report) => sink.send(report).is_ok(),
                None => !sink.is_closed(),
            }
        });
    }

    /// Decodes one wire message and publishes it on the matching channel.
    fn deliver(&mut self, message: Value) -> Result<(), serde_json::Error> {
        if message.get("event").is_some() {
            self.publish_event(GatewayEvent::from_wire(message)?);
        } else {
            self.publish_report(GatewayReport::from_wire(message)?);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.events.clear();
        self.reports.clear();
    }
}

#[derive(Default)]
struct SimState {
    status: GatewayStatus,
    selected: Option<String>,
    connected: Vec<String>,
    sinks: Sinks,
    scan: Option<JoinHandle<()>>,
    shutdown_failures: u32,
    stats: SimStats,
}

impl SimState {
    fn require_open(&self) -> Result<(), GatewayError> {
        if self.status.session_open {
            Ok(())
        } else {
            Err(GatewayError::NotOpen)
        }
    }

    fn take_shutdown_failure(&mut self, request: &str) -> Result<(), GatewayError> {
        if self.shutdown_failures == 0 {
            return Ok(());
        }
        self.shutdown_failures -= 1;
        warn!("Simulated {} failure ({} left)", request, self.shutdown_failures);
        Err(GatewayError::Rejected {
            code: -1,
            message: format!("{} rejected", request),
        })
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SimulatedGateway {
    fixture: GatewayFixture,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedGateway {
    pub fn new(fixture: GatewayFixture) -> Self {
        let state = SimState {
            shutdown_failures: fixture.faults.shutdown_failures,
            ..SimState::default()
        };
        Self {
            fixture,
            state: Arc::new(Mutex::new(state)),
        }
    }

    #[cfg(test)]
    pub fn fixture(&self) -> &GatewayFixture {
        &self.fixture
    }

    #[cfg(test)]
    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    /// Pushes a wire message to the subscribers as if the gateway had sent it.
    #[cfg(test)]
    pub fn inject_wire(&self, message: Value) -> Result<(), serde_json::Error> {
        self.lock().sinks.deliver(message)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    fn device(&self, did: &str) -> Option<&SimulatedDevice> {
        self.fixture
            .devices
            .iter()
            .find(|device| device.advertisement.did == did)
    }

    fn connected_device(&self, did: &str) -> Result<&SimulatedDevice, GatewayError> {
        let connected = self.lock().connected.iter().any(|d| d == did);
        match self.device(did) {
            Some(device) if connected => Ok(device),
            _ => Err(GatewayError::Device {
                did: did.to_string(),
                reason: "not connected".to_string(),
            }),
        }
    }
}

fn advertisement_batch(devices: &[SimulatedDevice], active: bool) -> Vec<RawAdvertisement> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    devices
        .iter()
        .map(|device| {
            let mut node = device.advertisement.clone();
            node.tss = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
            node.tsus = now.subsec_micros();
            // Scan responses only come back to an active scanner
            if !active {
                node.rsp.clear();
            }
            node
        })
        .collect()
}

async fn run_scan(
    state: Arc<Mutex<SimState>>,
    devices: Vec<SimulatedDevice>,
    pushes: Vec<Value>,
    request: ScanRequest,
    interval: Duration,
) {
    let deadline = Instant::now() + Duration::from_secs(u64::from(request.period));
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pushes = Some(pushes);

    loop {
        tokio::select! {
            biased;
            _ = time::sleep_until(deadline) => break,
            _ = ticker.tick() => {
                let nodes = advertisement_batch(&devices, request.active);
                let mut guard = lock(&state);
                if !nodes.is_empty() {
                    guard.sinks.publish_report(GatewayReport::Advertisement(nodes));
                }
                for message in pushes.take().unwrap_or_default() {
                    if let Err(e) = guard.sinks.deliver(message) {
                        warn!("Dropping malformed fixture push: {}", e);
                    }
                }
            }
        }
    }

    debug!("Simulated scan period elapsed");
    lock(&state).sinks.publish_event(GatewayEvent::ScanComplete);
}

#[async_trait]
impl GatewayClient for SimulatedGateway {
    async fn login(&self, credentials: &Credentials) -> Result<Vec<String>, GatewayError> {
        if self.fixture.faults.fail_login {
            return Err(GatewayError::Network("login endpoint unreachable".to_string()));
        }
        if let Some(accepted) = &self.fixture.accepted_password {
            if &credentials.password != accepted {
                return Err(GatewayError::Authentication(format!(
                    "invalid password for {}",
                    credentials.user
                )));
            }
        }

        self.lock().status.logged_in = true;
        info!("Simulated login as {}", credentials.user);
        Ok(self.fixture.gateways.clone())
    }

    fn select_gateway(&self, gateway_id: &str) {
        self.lock().selected = Some(gateway_id.to_string());
    }

    async fn open(&self) -> Result<(), GatewayError> {
        let mut state = self.lock();
        if !state.status.logged_in {
            return Err(GatewayError::Authentication("not logged in".to_string()));
        }
        let known = state
            .selected
            .as_ref()
            .map_or(false, |id| self.fixture.gateways.contains(id));
        if !known {
            return Err(GatewayError::Rejected {
                code: 404,
                message: format!("unknown gateway {:?}", state.selected),
            });
        }
        if self.fixture.faults.fail_open {
            return Err(GatewayError::Network("session socket refused".to_string()));
        }
        state.status.session_open = true;
        Ok(())
    }

    fn subscribe_events(&self, filter: DeviceFilter, sink: mpsc::UnboundedSender<GatewayEvent>) {
        self.lock().sinks.events.push((filter, sink));
    }

    fn subscribe_reports(&self, filter: DeviceFilter, sink: mpsc::UnboundedSender<GatewayReport>) {
        self.lock().sinks.reports.push((filter, sink));
    }

    async fn version(&self, timeout: Duration) -> Result<String, GatewayError> {
        self.lock().require_open()?;
        if self.fixture.faults.fail_version {
            time::sleep(timeout).await;
            return Err(GatewayError::Timeout(timeout));
        }
        self.lock().status.gateway_live = true;
        Ok(self.fixture.version.clone())
    }

    async fn scan(&self, request: ScanRequest) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.require_open()?;

        if request.is_stop() {
            state.stats.scans_stopped += 1;
            state.take_shutdown_failure("scan stop")?;
            if let Some(task) = state.scan.take() {
                if !task.is_finished() {
                    task.abort();
                    state.sinks.publish_event(GatewayEvent::ScanComplete);
                }
            }
            return Ok(());
        }

        state.stats.scans_started += 1;
        if let Some(task) = state.scan.take() {
            task.abort();
        }
        let interval = Duration::from_millis(self.fixture.report_interval_ms.max(1));
        state.scan = Some(tokio::spawn(run_scan(
            self.state.clone(),
            self.fixture.devices.clone(),
            self.fixture.pushes.clone(),
            request,
            interval,
        )));
        Ok(())
    }

    async fn connected_devices(&self) -> Result<Vec<String>, GatewayError> {
        let state = self.lock();
        state.require_open()?;
        Ok(state.connected.clone())
    }

    async fn connect(&self, params: &ConnectParams) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.require_open()?;
        state.stats.connects += 1;

        if self.fixture.faults.fail_connect {
            return Err(GatewayError::Device {
                did: params.did.clone(),
                reason: "connection establishment timed out".to_string(),
            });
        }
        if self.device(&params.did).is_none() {
            return Err(GatewayError::Device {
                did: params.did.clone(),
                reason: "not found".to_string(),
            });
        }
        if !state.connected.contains(&params.did) {
            state.connected.push(params.did.clone());
        }
        Ok(())
    }

    async fn primary_services(&self, did: &str) -> Result<Vec<ServiceDescriptor>, GatewayError> {
        {
            let mut state = self.lock();
            state.require_open()?;
            state.stats.service_requests += 1;
        }
        if self.fixture.faults.fail_discovery {
            return Err(GatewayError::Rejected {
                code: 0x0a,
                message: "attribute not found".to_string(),
            });
        }
        let device = self.connected_device(did)?;
        Ok(device.services.iter().map(|s| s.service.clone()).collect())
    }

    async fn characteristics(
        &self,
        did: &str,
        start_handle: u16,
        end_handle: u16,
    ) -> Result<Vec<CharacteristicDescriptor>, GatewayError> {
        self.lock().require_open()?;
        if self.fixture.faults.fail_characteristics {
            return Err(GatewayError::Rejected {
                code: 0x0e,
                message: format!(
                    "read by type 0x{:04x}-0x{:04x} failed",
                    start_handle, end_handle
                ),
            });
        }
        let device = self.connected_device(did)?;
        Ok(device
            .services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .filter(|c| (start_handle..=end_handle).contains(&c.handle))
            .cloned()
            .collect())
    }

    async fn disconnect(&self, target: DeviceFilter) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.require_open()?;
        state.stats.disconnects += 1;
        state.take_shutdown_failure("disconnect")?;

        let (dropped, kept): (Vec<String>, Vec<String>) = state
            .connected
            .drain(..)
            .partition(|did| target.matches(did));
        state.connected = kept;
        for did in dropped {
            state.sinks.publish_event(GatewayEvent::Disconnect {
                did,
                reason: REASON_LOCAL_HOST,
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.stats.closes += 1;
        if let Some(task) = state.scan.take() {
            task.abort();
        }
        state.sinks.clear();
        state.status.session_open = false;
        state.status.gateway_live = false;
        info!("Simulated session closed: {}", state.stats);
        Ok(())
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.stats.logouts += 1;
        state.status.logged_in = false;
        Ok(())
    }

    fn status(&self) -> GatewayStatus {
        self.lock().status
    }
}
