//! Session coordinator
//!
//! Drives one run: credentials, login, gateway selection, session setup,
//! then the event loop that turns gateway events and reports into the
//! scan → select → read → shutdown sequence.

use crate::domain::models::{DeviceSelection, DeviceTarget, MessageSeverity, StatusMessage};
use crate::domain::session::Session;
use crate::domain::settings::SettingsService;
use crate::infrastructure::gateway::protocol::{GatewayEvent, GatewayReport};
use crate::infrastructure::gateway::scanner::AdvertisementCollector;
use crate::infrastructure::gateway::service::SessionChannels;
use crate::infrastructure::gateway::shutdown::ShutdownSequencer;
use crate::infrastructure::gateway::GatewayService;
use crate::presentation::components::{Components, Spinner};
use crate::presentation::prompts::{PromptError, Prompter};
use anyhow::Context;
use std::fmt::Display;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const MSG_FATAL: &str = "Error! Exiting...";
pub const MSG_NO_GATEWAY: &str = "No Gateways Selected! Shutting down...";
pub const MSG_EXIT: &str = "Shutting down.. please wait";
pub const MSG_FINISHED: &str = "Finished Scan! Shutting down.. please wait";
pub const MSG_INTERRUPT: &str = "Received interrupt - shutting down";

pub struct ScannerApp {
    // Services
    service: GatewayService,
    session: Arc<Session>,
    shutdown: Arc<ShutdownSequencer>,
    prompter: Arc<dyn Prompter>,
    settings: SettingsService,

    // Scan state
    collector: AdvertisementCollector,
    spinner: Spinner,
    rescan_requested: bool,

    // Output
    out: Box<dyn Write + Send>,
}

impl ScannerApp {
    pub fn new(
        service: GatewayService,
        session: Arc<Session>,
        shutdown: Arc<ShutdownSequencer>,
        prompter: Arc<dyn Prompter>,
        settings: SettingsService,
    ) -> Self {
        Self {
            service,
            session,
            shutdown,
            prompter,
            settings,
            collector: AdvertisementCollector::new(),
            spinner: Spinner::new(),
            rescan_requested: false,
            out: Box::new(std::io::stdout()),
        }
    }

    #[cfg(test)]
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = out;
        self
    }

    #[cfg(test)]
    pub fn with_spinner(mut self, spinner: Spinner) -> Self {
        self.spinner = spinner;
        self
    }

    pub fn with_collector(mut self, collector: AdvertisementCollector) -> Self {
        self.collector = collector;
        self
    }

    fn retry_budget(&self) -> u32 {
        self.settings.get().shutdown_retry_budget
    }

    fn say(&mut self, line: impl Display) {
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            warn!("Console write failed: {}", e);
        }
    }

    fn say_status(&mut self, status: StatusMessage) {
        let line = Components::status_line(&status);
        self.say(line);
    }

    /// Runs setup, then consumes both session channels until shutdown.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let channels = match self.start().await {
            Ok(Some(channels)) => channels,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.abort(e).await;
                return Ok(());
            }
        };

        self.start_scan_pass().await;
        self.event_loop(channels).await;
        Ok(())
    }

    /// Login through session open. `None` when the user picked "Exit" and
    /// shutdown has already run.
    async fn start(&mut self) -> anyhow::Result<Option<SessionChannels>> {
        let settings = self.settings.get().clone();

        let credentials = self
            .prompter
            .credentials(settings.last_username.clone())
            .await
            .context("reading credentials")?;

        let gateways = self
            .service
            .login(&credentials)
            .await
            .context("login failed")?;

        if let Err(e) = self.settings.remember_username(&credentials.user) {
            warn!("Could not persist username: {:#}", e);
        }

        let gateway_id = match self.prompter.gateway(&gateways).await? {
            Some(id) => id,
            None => {
                info!("No gateway selected");
                self.shutdown
                    .shutdown(settings.shutdown_retry_budget, MSG_NO_GATEWAY)
                    .await;
                return Ok(None);
            }
        };

        let heartbeat = Duration::from_millis(settings.heartbeat_timeout_ms);
        let channels = self
            .service
            .open_session(&gateway_id, heartbeat)
            .await
            .with_context(|| format!("opening session on gateway {}", gateway_id))?;

        let (mode, period) = self
            .prompter
            .scan_params(settings.default_scan_period)
            .await?;
        self.session.update_config(|config| {
            config.scan_mode = mode;
            config.scan_period = period;
        });
        info!("Scan parameters: {} for {}s", mode.label(), period);

        Ok(Some(channels))
    }

    /// Fatal setup failure: message first, then shutdown.
    async fn abort(&mut self, error: anyhow::Error) {
        let budget = self.retry_budget();
        if let Some(PromptError::Interrupted) = error.downcast_ref::<PromptError>() {
            self.shutdown.shutdown(budget, MSG_INTERRUPT).await;
            return;
        }

        error!("Setup failed: {:#}", error);
        self.say_status(StatusMessage::new(
            format!("{} {:#}", MSG_FATAL, error),
            MessageSeverity::Error,
        ));
        self.shutdown.shutdown(budget, MSG_EXIT).await;
    }

    /// Reports go first so a batch queued ahead of scan-complete is folded
    /// before the device menu is built.
    async fn event_loop(&mut self, mut channels: SessionChannels) {
        loop {
            tokio::select! {
                biased;
                report = channels.reports.recv() => match report {
                    Some(report) => self.on_report(report),
                    None => break,
                },
                event = channels.events.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => break,
                },
            }
            if self.shutdown.is_terminated() {
                break;
            }
            if std::mem::take(&mut self.rescan_requested) {
                self.drain_reports(&mut channels.reports);
                self.start_scan_pass().await;
            }
        }
        self.spinner.stop();
        debug!("Event loop finished");
    }

    pub(crate) async fn on_event(&mut self, event: GatewayEvent) {
        if self.session.is_closed() {
            debug!("Ignoring event {} after close", event.code());
            return;
        }

        match event {
            GatewayEvent::Disconnect { .. } => {
                let line = format!("Device disconnect event {}", event.to_wire());
                self.say(line);
            }
            GatewayEvent::ScanComplete => self.on_scan_complete().await,
            GatewayEvent::Other { code, .. } => {
                self.say(format!("Other unhandled event [{}]", code))
            }
        }
    }

    pub(crate) fn on_report(&mut self, report: GatewayReport) {
        if self.session.is_closed() {
            return;
        }

        match &report {
            GatewayReport::Advertisement(nodes) => {
                let found = self.collector.collect(nodes);
                self.spinner
                    .set_message(format!("Scanning ...  Found {} Devices", found));
            }
            GatewayReport::Notification { .. } => {
                let line = format!("Notification received: {}", report.to_wire());
                self.say(line);
            }
            GatewayReport::Other { .. } => {
                let line = format!("(Other report) {}", report.to_wire());
                self.say(line);
            }
        }
    }

    /// Folds reports that queued up while the device menu was open, so they
    /// belong to the pass that just ended.
    fn drain_reports(&mut self, reports: &mut mpsc::UnboundedReceiver<GatewayReport>) {
        let mut late = 0usize;
        while let Ok(report) = reports.try_recv() {
            self.on_report(report);
            late += 1;
        }
        if late > 0 {
            debug!("Folded {} late report(s) into the previous pass", late);
        }
    }

    async fn start_scan_pass(&mut self) {
        if self.session.is_closed() {
            return;
        }
        let config = self.session.config();
        self.spinner.start("Scanning ...");
        let scanner = self.service.scanner();
        if let Err(e) = scanner.start_pass(&mut self.collector, &config).await {
            self.spinner.stop();
            error!("List failed {}", e);
            self.say_status(StatusMessage::new(
                format!("List failed {}", e),
                MessageSeverity::Error,
            ));
        }
    }

    async fn on_scan_complete(&mut self) {
        self.spinner.stop();
        let records = self.collector.table().records().to_vec();
        info!("Scan complete, {} device(s)", records.len());

        let page_size = self.settings.get().device_page_size;
        let selection = self.prompter.device(&records, page_size).await;
        // An interrupt may have closed the session while the menu was up
        if self.session.is_closed() {
            return;
        }

        let budget = self.retry_budget();
        match selection {
            Ok(DeviceSelection::Exit) => self.shutdown.shutdown(budget, MSG_EXIT).await,
            Ok(DeviceSelection::Rescan) => self.rescan_requested = true,
            Ok(DeviceSelection::Connect(target)) => self.read_device(target).await,
            Err(PromptError::Interrupted) => self.shutdown.shutdown(budget, MSG_INTERRUPT).await,
            Err(e) => self.abort(e.into()).await,
        }
    }

    /// Reads and prints one device's GATT table, then shuts down.
    async fn read_device(&mut self, target: DeviceTarget) {
        let config = self.session.config();
        self.spinner.start("Connecting ...");
        let progress = self.spinner.handle();
        let result = self
            .service
            .reader()
            .read_gatt_table(&target, &config, &|message: String| progress.set_message(message))
            .await;
        self.spinner.stop();

        match result {
            Ok(table) => match Components::gatt_json(&table) {
                Ok(json) => self.say(format!("GATTtable: {}", json)),
                Err(e) => error!("Could not render GATT table: {}", e),
            },
            Err(e) => {
                error!("BLE Error {}", e);
                self.say_status(StatusMessage::new(
                    format!("BLE Error {}", e),
                    MessageSeverity::Error,
                ));
            }
        }

        let budget = self.retry_budget();
        self.shutdown.shutdown(budget, MSG_FINISHED).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AddressType, AdvertisingRecord, CharacteristicDescriptor, ScanMode, ServiceDescriptor,
        UserConfig,
    };
    use crate::infrastructure::gateway::protocol::{AdStructure, RawAdvertisement};
    use crate::infrastructure::gateway::shutdown::CountingTerminator;
    use crate::infrastructure::gateway::simulated::{
        FaultPlan, GatewayFixture, SimulatedDevice, SimulatedGateway, SimulatedService,
    };
    use crate::infrastructure::gateway::{Credentials, GatewayClient};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers prompts from a script and records what it was shown.
    struct ScriptedPrompter {
        password: String,
        gateway: Option<usize>,
        scan: (ScanMode, u32),
        devices: Mutex<VecDeque<Result<DeviceChoice, PromptError>>>,
        shown: Mutex<Vec<Vec<AdvertisingRecord>>>,
        default_users: Mutex<Vec<Option<String>>>,
        /// Runs once, while the first device menu is open
        on_first_menu: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    enum DeviceChoice {
        Address(&'static str),
        Rescan,
        Exit,
    }

    impl ScriptedPrompter {
        fn new(devices: Vec<Result<DeviceChoice, PromptError>>) -> Self {
            Self {
                password: "secret".to_string(),
                gateway: Some(0),
                scan: (ScanMode::Active, 1),
                devices: Mutex::new(devices.into()),
                shown: Mutex::new(Vec::new()),
                default_users: Mutex::new(Vec::new()),
                on_first_menu: Mutex::new(None),
            }
        }

        fn while_first_menu_open(&self, hook: impl FnOnce() + Send + 'static) {
            *self.on_first_menu.lock().unwrap() = Some(Box::new(hook));
        }

        fn menus_shown(&self) -> Vec<Vec<AdvertisingRecord>> {
            self.shown.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prompter for ScriptedPrompter {
        async fn credentials(
            &self,
            default_user: Option<String>,
        ) -> Result<Credentials, PromptError> {
            self.default_users.lock().unwrap().push(default_user);
            Ok(Credentials {
                user: "user@example.com".to_string(),
                password: self.password.clone(),
            })
        }

        async fn gateway(&self, gateways: &[String]) -> Result<Option<String>, PromptError> {
            Ok(self.gateway.and_then(|i| gateways.get(i).cloned()))
        }

        async fn scan_params(&self, _default_period: u32) -> Result<(ScanMode, u32), PromptError> {
            Ok(self.scan)
        }

        async fn device(
            &self,
            records: &[AdvertisingRecord],
            _page_size: usize,
        ) -> Result<DeviceSelection, PromptError> {
            self.shown.lock().unwrap().push(records.to_vec());
            let hook = self.on_first_menu.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            let next = self.devices.lock().unwrap().pop_front();
            match next {
                Some(Ok(DeviceChoice::Address(address))) => records
                    .iter()
                    .find(|r| r.address == address)
                    .map(|r| DeviceSelection::Connect(r.target()))
                    .ok_or(PromptError::Closed),
                Some(Ok(DeviceChoice::Rescan)) => Ok(DeviceSelection::Rescan),
                Some(Ok(DeviceChoice::Exit)) | None => Ok(DeviceSelection::Exit),
                Some(Err(e)) => Err(e),
            }
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        gateway: Arc<SimulatedGateway>,
        session: Arc<Session>,
        terminator: Arc<CountingTerminator>,
        prompter: Arc<ScriptedPrompter>,
        output: SharedBuffer,
        settings_dir: tempfile::TempDir,
    }

    impl Harness {
        fn app(&self) -> ScannerApp {
            let settings =
                SettingsService::with_path(self.settings_dir.path().join("settings.json"));
            let shutdown = Arc::new(ShutdownSequencer::new(
                self.gateway.clone(),
                self.session.clone(),
                self.terminator.clone(),
                Duration::from_millis(100),
            ));
            ScannerApp::new(
                GatewayService::new(self.gateway.clone()),
                self.session.clone(),
                shutdown,
                self.prompter.clone(),
                settings,
            )
            .with_output(Box::new(self.output.clone()))
            .with_spinner(Spinner::hidden())
        }
    }

    fn harness(fixture: GatewayFixture, prompter: ScriptedPrompter) -> Harness {
        colored::control::set_override(false);
        Harness {
            gateway: Arc::new(SimulatedGateway::new(fixture)),
            session: Arc::new(Session::new(UserConfig::default())),
            terminator: Arc::new(CountingTerminator::default()),
            prompter: Arc::new(prompter),
            output: SharedBuffer::default(),
            settings_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn chars(handles: &[u16]) -> Vec<CharacteristicDescriptor> {
        handles
            .iter()
            .map(|&handle| CharacteristicDescriptor {
                handle,
                value_handle: handle + 1,
                properties: 0x02,
                uuid: format!("2a{:02x}", handle),
            })
            .collect()
    }

    fn device(did: &str, name: &str, services: Vec<SimulatedService>) -> SimulatedDevice {
        SimulatedDevice {
            advertisement: RawAdvertisement {
                tss: 0,
                tsus: 0,
                did: did.to_string(),
                dtype: AddressType::Public,
                ev: 0,
                rssi: -60,
                adv: vec![AdStructure::new(0x09, name)],
                rsp: Vec::new(),
            },
            services,
        }
    }

    fn two_device_fixture() -> GatewayFixture {
        let a = device(
            "aaaaaaaaaaaa",
            "A",
            vec![
                SimulatedService {
                    service: ServiceDescriptor {
                        handle: 1,
                        end: 7,
                        uuid: "1800".to_string(),
                    },
                    characteristics: chars(&[2, 4, 6]),
                },
                SimulatedService {
                    service: ServiceDescriptor {
                        handle: 8,
                        end: 11,
                        uuid: "180f".to_string(),
                    },
                    characteristics: chars(&[9]),
                },
            ],
        );
        let b = device("bbbbbbbbbbbb", "B", Vec::new());
        GatewayFixture {
            devices: vec![a, b],
            ..GatewayFixture::default()
        }
    }

    fn advertisement_wire(did: &str, name: &str) -> serde_json::Value {
        serde_json::json!({
            "report": 1,
            "nodes": [{
                "did": did, "dtype": 0, "ev": 0, "rssi": -45,
                "adv": [{ "t": 9, "v": name }]
            }]
        })
    }

    fn addresses(records: &[AdvertisingRecord]) -> Vec<&str> {
        records.iter().map(|r| r.address.as_str()).collect()
    }

    fn printed_table(output: &str) -> serde_json::Value {
        let start = output.find("GATTtable: ").expect("no table printed") + "GATTtable: ".len();
        serde_json::Deserializer::from_str(&output[start..])
            .into_iter::<serde_json::Value>()
            .next()
            .unwrap()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_select_read_shutdown() {
        let h = harness(
            two_device_fixture(),
            ScriptedPrompter::new(vec![Ok(DeviceChoice::Address("aaaaaaaaaaaa"))]),
        );

        h.app().run().await.unwrap();

        let menus = h.prompter.menus_shown();
        assert_eq!(menus.len(), 1);
        let shown: Vec<_> = menus[0].iter().map(|r| r.address.as_str()).collect();
        assert_eq!(shown, vec!["aaaaaaaaaaaa", "bbbbbbbbbbbb"]);

        let table = printed_table(&h.output.text());
        assert_eq!(table["did"], "aaaaaaaaaaaa");
        assert_eq!(table["name"], "A");
        let services = table["services"].as_array().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0]["characteristics"].as_array().unwrap().len(), 3);
        assert_eq!(services[1]["characteristics"].as_array().unwrap().len(), 1);

        let stats = h.gateway.stats();
        assert_eq!(stats.scans_started, 1);
        assert_eq!(stats.disconnects, 1);
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.logouts, 1);
        assert!(h.session.is_closed());
        assert_eq!(h.terminator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_username_persisted_password_not() {
        let h = harness(
            two_device_fixture(),
            ScriptedPrompter::new(vec![Ok(DeviceChoice::Exit)]),
        );
        h.app().run().await.unwrap();

        let path = h.settings_dir.path().join("settings.json");
        let reloaded = SettingsService::with_path(path.clone());
        assert_eq!(
            reloaded.get().last_username.as_deref(),
            Some("user@example.com")
        );
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_username_is_offered() {
        let mut prompter = ScriptedPrompter::new(Vec::new());
        prompter.gateway = None;
        let h = harness(two_device_fixture(), prompter);
        let mut stored =
            SettingsService::with_path(h.settings_dir.path().join("settings.json"));
        stored.remember_username("old@example.com").unwrap();

        h.app().run().await.unwrap();

        let defaults = h.prompter.default_users.lock().unwrap().clone();
        assert_eq!(defaults, vec![Some("old@example.com".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_starts_fresh_pass() {
        let h = harness(
            two_device_fixture(),
            ScriptedPrompter::new(vec![Ok(DeviceChoice::Rescan), Ok(DeviceChoice::Exit)]),
        );
        let run = tokio::spawn(h.app().run());

        // Seen during the first pass only
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.gateway
            .inject_wire(advertisement_wire("cccccccccccc", "C"))
            .unwrap();
        run.await.unwrap().unwrap();

        let menus = h.prompter.menus_shown();
        assert_eq!(menus.len(), 2);
        assert_eq!(
            addresses(&menus[0]),
            vec!["aaaaaaaaaaaa", "bbbbbbbbbbbb", "cccccccccccc"]
        );
        assert_eq!(addresses(&menus[1]), vec!["aaaaaaaaaaaa", "bbbbbbbbbbbb"]);
        assert_eq!(h.gateway.stats().scans_started, 2);
        assert!(!h.output.text().contains("GATTtable"));
        assert_eq!(h.terminator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_during_menu_stays_out_of_next_pass() {
        let fixture = GatewayFixture {
            devices: Vec::new(),
            ..GatewayFixture::default()
        };
        let h = harness(
            fixture,
            ScriptedPrompter::new(vec![Ok(DeviceChoice::Rescan), Ok(DeviceChoice::Exit)]),
        );
        let gateway = h.gateway.clone();
        h.prompter.while_first_menu_open(move || {
            gateway
                .inject_wire(advertisement_wire("5ta1e0000000", "Late"))
                .unwrap();
        });

        h.app().run().await.unwrap();

        let menus = h.prompter.menus_shown();
        assert_eq!(menus.len(), 2);
        assert!(menus[0].is_empty());
        assert!(menus[1].is_empty(), "{:?}", addresses(&menus[1]));
        assert_eq!(h.terminator.count(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_ignores_scan_complete() {
        let h = harness(two_device_fixture(), ScriptedPrompter::new(Vec::new()));
        let mut app = h.app();

        h.session.request_close();
        app.on_event(GatewayEvent::ScanComplete).await;
        app.on_report(GatewayReport::Other {
            code: 99,
            payload: serde_json::json!({ "report": 99 }),
        });

        assert!(h.prompter.menus_shown().is_empty());
        assert_eq!(h.gateway.stats().scans_started, 0);
        assert!(h.output.text().is_empty());
    }

    #[tokio::test]
    async fn test_reports_and_events_are_printed() {
        let h = harness(two_device_fixture(), ScriptedPrompter::new(Vec::new()));
        let mut app = h.app();

        app.on_report(GatewayReport::Notification {
            did: "aaaaaaaaaaaa".to_string(),
            handle: 14,
            value: "0102".to_string(),
        });
        app.on_event(GatewayEvent::Other {
            code: 12,
            payload: serde_json::json!({ "event": 12 }),
        })
        .await;
        app.on_event(GatewayEvent::Disconnect {
            did: "aaaaaaaaaaaa".to_string(),
            reason: 19,
        })
        .await;

        let text = h.output.text();
        assert!(text.contains("Notification received: "));
        assert!(text.contains("Other unhandled event [12]"));
        assert!(text.contains("Device disconnect event "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_gateway_selected() {
        let mut prompter = ScriptedPrompter::new(Vec::new());
        prompter.gateway = None;
        let h = harness(two_device_fixture(), prompter);

        h.app().run().await.unwrap();

        assert!(h.session.is_closed());
        assert!(!h.gateway.status().session_open);
        assert_eq!(h.gateway.stats().logouts, 1);
        assert_eq!(h.terminator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_credentials_abort() {
        let mut prompter = ScriptedPrompter::new(Vec::new());
        prompter.password = "wrong".to_string();
        let fixture = GatewayFixture {
            accepted_password: Some("secret".to_string()),
            ..two_device_fixture()
        };
        let h = harness(fixture, prompter);

        h.app().run().await.unwrap();

        let text = h.output.text();
        assert!(
            text.contains("Error! Exiting... login failed: authentication failed"),
            "{}",
            text
        );
        assert!(h.prompter.menus_shown().is_empty());
        assert_eq!(h.terminator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_still_shuts_down() {
        let fixture = GatewayFixture {
            faults: FaultPlan {
                fail_connect: true,
                ..FaultPlan::default()
            },
            ..two_device_fixture()
        };
        let h = harness(
            fixture,
            ScriptedPrompter::new(vec![Ok(DeviceChoice::Address("bbbbbbbbbbbb"))]),
        );

        h.app().run().await.unwrap();

        let text = h.output.text();
        assert!(text.contains("BLE Error"));
        assert!(!text.contains("GATTtable"));
        assert_eq!(h.gateway.stats().closes, 1);
        assert_eq!(h.terminator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_still_shuts_down() {
        let fixture = GatewayFixture {
            faults: FaultPlan {
                fail_discovery: true,
                ..FaultPlan::default()
            },
            ..two_device_fixture()
        };
        let h = harness(
            fixture,
            ScriptedPrompter::new(vec![Ok(DeviceChoice::Address("aaaaaaaaaaaa"))]),
        );

        h.app().run().await.unwrap();

        let text = h.output.text();
        assert!(
            text.contains("BLE Error primary service discovery failed"),
            "{}",
            text
        );
        assert!(!text.contains("GATTtable"));
        let stats = h.gateway.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.disconnects, 1);
        assert_eq!(stats.closes, 1);
        assert_eq!(h.terminator.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_at_device_menu() {
        let h = harness(
            two_device_fixture(),
            ScriptedPrompter::new(vec![Err(PromptError::Interrupted)]),
        );
        h.app().run().await.unwrap();

        assert!(h.session.is_closed());
        assert_eq!(h.gateway.stats().connects, 0);
        assert_eq!(h.terminator.count(), 1);
    }
}
