//! Gateway Module
//!
//! Client side of the remote BLE gateway: the gateway performs the radio
//! work, this crate drives it through [`GatewayClient`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     GatewayService                       │
//! │   (login, gateway selection, session open + channels)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!      ┌────────────────┼────────────────┬──────────────┐
//!      │                │                │              │
//!      ▼                ▼                ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │  Shutdown  │  │ Protocol │
//! │           │  │            │  │            │  │          │
//! │ - scan    │  │ - connect  │  │ - stop     │  │ - codes  │
//! │   passes  │  │ - services │  │ - close    │  │ - nodes  │
//! │ - adverts │  │ - chars    │  │ - logout   │  │ - events │
//! └───────────┘  └────────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Wire types, event/report codes and decoding
//! - [`scanner`] - Scan passes and advertisement collection
//! - [`connection`] - GATT table reads
//! - [`service`] - Login and session setup
//! - [`shutdown`] - Graceful teardown with bounded retry
//! - [`simulated`] - Fixture-driven gateway backend

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod shutdown;
pub mod simulated;

use crate::domain::models::{CharacteristicDescriptor, ServiceDescriptor};
use async_trait::async_trait;
use protocol::{ConnectParams, DeviceFilter, GatewayEvent, GatewayReport, ScanRequest};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub use service::GatewayService;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("gateway did not answer within {0:?}")]
    Timeout(Duration),

    #[error("no open gateway session")]
    NotOpen,

    #[error("device {did}: {reason}")]
    Device { did: String, reason: String },

    #[error("request rejected ({code}): {message}")]
    Rejected { code: i32, message: String },
}

/// Status flags of the gateway client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStatus {
    pub logged_in: bool,
    pub session_open: bool,
    pub gateway_live: bool,
}

/// Credentials for the gateway account.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Operations consumed from the gateway API client.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Authenticates and returns the ids of the gateways on the account.
    async fn login(&self, credentials: &Credentials) -> Result<Vec<String>, GatewayError>;

    /// Selects the gateway used by every later request.
    fn select_gateway(&self, gateway_id: &str);

    async fn open(&self) -> Result<(), GatewayError>;

    /// Routes lifecycle events matching `filter` to `sink` until the session closes.
    fn subscribe_events(&self, filter: DeviceFilter, sink: mpsc::UnboundedSender<GatewayEvent>);

    /// Routes advertisement and notification reports matching `filter` to `sink`.
    fn subscribe_reports(&self, filter: DeviceFilter, sink: mpsc::UnboundedSender<GatewayReport>);

    /// Version query used as a liveness check.
    async fn version(&self, timeout: Duration) -> Result<String, GatewayError>;

    /// Starts a scan pass; a zero period stops the current one.
    async fn scan(&self, request: ScanRequest) -> Result<(), GatewayError>;

    async fn connected_devices(&self) -> Result<Vec<String>, GatewayError>;

    async fn connect(&self, params: &ConnectParams) -> Result<(), GatewayError>;

    async fn primary_services(&self, did: &str) -> Result<Vec<ServiceDescriptor>, GatewayError>;

    async fn characteristics(
        &self,
        did: &str,
        start_handle: u16,
        end_handle: u16,
    ) -> Result<Vec<CharacteristicDescriptor>, GatewayError>;

    async fn disconnect(&self, target: DeviceFilter) -> Result<(), GatewayError>;

    async fn close(&self) -> Result<(), GatewayError>;

    async fn logout(&self) -> Result<(), GatewayError>;

    fn status(&self) -> GatewayStatus;
}
