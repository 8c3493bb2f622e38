//! Gateway Service Module
//!
//! Login, gateway selection and session setup. Hands the coordinator the
//! two channels the gateway pushes events and reports onto.

use crate::infrastructure::gateway::connection::GattReader;
use crate::infrastructure::gateway::protocol::{DeviceFilter, GatewayEvent, GatewayReport};
use crate::infrastructure::gateway::scanner::GatewayScanner;
use crate::infrastructure::gateway::{Credentials, GatewayClient, GatewayError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Receiving ends of an open gateway session.
pub struct SessionChannels {
    pub events: mpsc::UnboundedReceiver<GatewayEvent>,
    pub reports: mpsc::UnboundedReceiver<GatewayReport>,
}

/// Main service coordinating the gateway session
pub struct GatewayService {
    gateway: Arc<dyn GatewayClient>,
}

impl GatewayService {
    pub fn new(gateway: Arc<dyn GatewayClient>) -> Self {
        Self { gateway }
    }

    pub fn scanner(&self) -> GatewayScanner {
        GatewayScanner::new(self.gateway.clone())
    }

    pub fn reader(&self) -> GattReader {
        GattReader::new(self.gateway.clone())
    }

    /// Authenticates and returns the gateway ids of the account.
    pub async fn login(&self, credentials: &Credentials) -> Result<Vec<String>, GatewayError> {
        info!("Logging in as {}", credentials.user);
        let gateways = self.gateway.login(credentials).await?;
        info!("Login ok, {} gateway(s) on the account", gateways.len());
        Ok(gateways)
    }

    /// Selects `gateway_id`, opens the session, subscribes to every device's
    /// events and reports, then checks liveness with a bounded version call.
    /// Subscriptions are in place before the version call so nothing pushed
    /// in between is lost.
    pub async fn open_session(
        &self,
        gateway_id: &str,
        heartbeat_timeout: Duration,
    ) -> Result<SessionChannels, GatewayError> {
        info!("Opening session on gateway {}", gateway_id);
        self.gateway.select_gateway(gateway_id);
        self.gateway.open().await?;

        let (event_tx, events) = mpsc::unbounded_channel();
        let (report_tx, reports) = mpsc::unbounded_channel();
        self.gateway.subscribe_events(DeviceFilter::All, event_tx);
        self.gateway.subscribe_reports(DeviceFilter::All, report_tx);

        let version = tokio::time::timeout(heartbeat_timeout, self.gateway.version(heartbeat_timeout))
            .await
            .map_err(|_| GatewayError::Timeout(heartbeat_timeout))??;
        info!("Gateway {} is live, version {}", gateway_id, version);

        Ok(SessionChannels { events, reports })
    }
}
