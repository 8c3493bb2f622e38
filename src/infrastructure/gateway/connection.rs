//! Gateway Connection Module
//!
//! Connects to one peripheral through the gateway and walks its GATT table.

use crate::domain::models::{DeviceTarget, GattService, GattTable, UserConfig};
use crate::infrastructure::gateway::protocol::ConnectParams;
use crate::infrastructure::gateway::{GatewayClient, GatewayError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum GattReadError {
    #[error("connect to {did} failed: {source}")]
    Connect {
        did: String,
        #[source]
        source: GatewayError,
    },

    #[error("primary service discovery failed: {0}")]
    Services(#[source] GatewayError),

    #[error("characteristic discovery failed for handles {start:#06x}..{end:#06x}: {source}")]
    Characteristics {
        start: u16,
        end: u16,
        #[source]
        source: GatewayError,
    },
}

/// Reads the services and characteristics of a peripheral.
pub struct GattReader {
    gateway: Arc<dyn GatewayClient>,
}

impl GattReader {
    pub fn new(gateway: Arc<dyn GatewayClient>) -> Self {
        Self { gateway }
    }

    /// Connects with the run's connection parameters, then enumerates every
    /// primary service and the characteristics inside its handle range.
    /// A failed connect is not retried.
    pub async fn read_gatt_table(
        &self,
        target: &DeviceTarget,
        config: &UserConfig,
        progress: &(dyn Fn(String) + Send + Sync),
    ) -> Result<GattTable, GattReadError> {
        info!(
            "Connecting to {} ({:?}, interval {}..{}, latency {}, timeout {})",
            target.address,
            target.address_type,
            config.interval_min,
            config.interval_max,
            config.latency,
            config.timeout
        );
        progress("Connecting ...".to_string());

        // Step 1: connect
        let params = ConnectParams::new(target, config);
        self.gateway
            .connect(&params)
            .await
            .map_err(|source| GattReadError::Connect {
                did: target.address.clone(),
                source,
            })?;
        progress("Connected! Scanning for services ...".to_string());

        // Step 2: primary services
        let services = self
            .gateway
            .primary_services(&target.address)
            .await
            .map_err(GattReadError::Services)?;
        info!("Found {} primary services", services.len());

        // Step 3: characteristics per service, in gateway order
        let mut table = GattTable::new(target);
        let total = services.len();
        for (i, descriptor) in services.into_iter().enumerate() {
            progress(format!(
                "Connected! Found {} services. Scanning service[{}] ...",
                total,
                i + 1
            ));

            let characteristics = self
                .gateway
                .characteristics(&target.address, descriptor.handle, descriptor.end)
                .await
                .map_err(|source| {
                    warn!(
                        "Characteristic discovery failed for service {}: {}",
                        descriptor.uuid, source
                    );
                    GattReadError::Characteristics {
                        start: descriptor.handle,
                        end: descriptor.end,
                        source,
                    }
                })?;

            table.services.push(GattService {
                descriptor,
                characteristics,
            });
        }

        info!(
            "GATT table of {}: {} services, {} characteristics",
            table.did,
            table.services.len(),
            table.characteristic_count()
        );
        Ok(table)
    }
}
