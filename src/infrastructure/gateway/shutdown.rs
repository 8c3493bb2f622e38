//! Shutdown Module
//!
//! Graceful teardown of the gateway session: stop the scan, disconnect
//! every device, close, log out, terminate. The stop/disconnect step is
//! retried a bounded number of times; close and logout are always attempted.

use crate::domain::session::Session;
use crate::infrastructure::gateway::protocol::DeviceFilter;
use crate::infrastructure::gateway::scanner::GatewayScanner;
use crate::infrastructure::gateway::{GatewayClient, GatewayError};
use crate::infrastructure::logging::LoggingGuard;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Installs a process-wide panic hook that forwards the message of every
/// panic, whichever thread or task raised it, to the returned receiver.
/// The previously installed hook still runs.
pub fn forward_panics() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = panic_message(info.payload());
        error!("Unhandled fault: {}", message);
        let _ = tx.send(message);
        previous(info);
    }));
    rx
}

/// Ends the process once shutdown has run.
pub trait Terminator: Send + Sync {
    fn terminate(&self);
}

/// Prints the farewell, flushes the log writer and exits with status 0.
pub struct ProcessExit {
    logging: Mutex<Option<LoggingGuard>>,
}

impl ProcessExit {
    pub fn new(logging: Option<LoggingGuard>) -> Self {
        Self {
            logging: Mutex::new(logging),
        }
    }
}

impl Terminator for ProcessExit {
    fn terminate(&self) {
        info!("Terminating");
        println!("Goodbye!");
        // process::exit skips destructors; drop the guard so file logs are flushed
        let guard = match self.logging.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(guard);
        std::process::exit(0);
    }
}

pub struct ShutdownSequencer {
    gateway: Arc<dyn GatewayClient>,
    session: Arc<Session>,
    terminator: Arc<dyn Terminator>,
    retry_delay: Duration,
    serial: tokio::sync::Mutex<()>,
    terminated: AtomicBool,
}

impl ShutdownSequencer {
    pub fn new(
        gateway: Arc<dyn GatewayClient>,
        session: Arc<Session>,
        terminator: Arc<dyn Terminator>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            gateway,
            session,
            terminator,
            retry_delay,
            serial: tokio::sync::Mutex::new(()),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Sets the exit flag, prints `message` and tears the session down.
    /// Concurrent calls run one after the other; calls after termination
    /// do nothing.
    pub async fn shutdown(&self, retry_budget: u32, message: &str) {
        self.session.request_close();
        let _serial = self.serial.lock().await;
        if self.is_terminated() {
            debug!("Shutdown requested after termination: {}", message);
            return;
        }

        println!("{}", message);
        info!("Shutdown: {} (retry budget {})", message, retry_budget);

        let status = self.gateway.status();
        if status.session_open && status.gateway_live {
            let mut budget = retry_budget;
            loop {
                match self.release_devices().await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!("Shutdown step failed: {}", e);
                        if budget == 0 {
                            warn!("Shutdown retries exhausted, closing anyway");
                            break;
                        }
                        tokio::time::sleep(self.retry_delay).await;
                        budget -= 1;
                        println!("{} Shutdown...", budget);
                    }
                }
            }
        }

        if self.gateway.status().session_open {
            if let Err(e) = self.gateway.close().await {
                warn!("Close failed: {}", e);
            }
        }
        if self.gateway.status().logged_in {
            if let Err(e) = self.gateway.logout().await {
                warn!("Logout failed: {}", e);
            }
        }

        self.terminated.store(true, Ordering::SeqCst);
        self.terminator.terminate();
    }

    async fn release_devices(&self) -> Result<(), GatewayError> {
        let config = self.session.config();
        GatewayScanner::new(self.gateway.clone())
            .stop(&config)
            .await?;

        let connected = self.gateway.connected_devices().await?;
        if !connected.is_empty() {
            info!("Disconnecting {} device(s)", connected.len());
            self.gateway.disconnect(DeviceFilter::All).await?;
        }
        Ok(())
    }
}

/// Counts terminations instead of exiting.
#[cfg(test)]
#[derive(Default)]
pub struct CountingTerminator {
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl CountingTerminator {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Terminator for CountingTerminator {
    fn terminate(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
