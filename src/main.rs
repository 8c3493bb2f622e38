mod domain;
mod infrastructure;
mod presentation;

use crate::domain::session::Session;
use crate::domain::settings::SettingsService;
use crate::infrastructure::gateway::scanner::{name_equals, AdvertisementCollector};
use crate::infrastructure::gateway::shutdown::{
    forward_panics, panic_message, ProcessExit, ShutdownSequencer,
};
use crate::infrastructure::gateway::simulated::{GatewayFixture, SimulatedGateway};
use crate::infrastructure::gateway::{GatewayClient, GatewayService};
use crate::infrastructure::logging::init_logger;
use crate::presentation::app::{ScannerApp, MSG_EXIT, MSG_FATAL, MSG_INTERRUPT};
use crate::presentation::components::Components;
use crate::presentation::prompts::TerminalPrompter;
use crate::presentation::theme::configure_colors;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const MSG_FAULT: &str = "Unhandled fault - shutting down..";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new().unwrap_or_else(|e| {
        eprintln!("Failed to locate settings directory: {}", e);
        SettingsService::with_path(PathBuf::from("settings.json"))
    });

    let logging_guard = init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting GATT Table Scanner");
    info!("Settings file: {}", settings.path().display());

    configure_colors(std::io::stdout().is_terminal());
    println!("{}", Components::banner());

    let fixture = match GatewayFixture::load(settings.get().simulator_fixture.as_deref()) {
        Ok(fixture) => fixture,
        Err(e) => {
            warn!("Falling back to built-in gateway fixture: {:#}", e);
            eprintln!("Could not load gateway fixture ({:#}), using built-in devices", e);
            GatewayFixture::default()
        }
    };
    let gateway: Arc<dyn GatewayClient> = Arc::new(SimulatedGateway::new(fixture));

    let session = Arc::new(Session::new(settings.get().user_config));
    let budget = settings.get().shutdown_retry_budget;
    let shutdown = Arc::new(ShutdownSequencer::new(
        gateway.clone(),
        session.clone(),
        Arc::new(ProcessExit::new(logging_guard)),
        Duration::from_millis(settings.get().shutdown_retry_delay_ms),
    ));

    let collector = match settings.get().advertisement_name_filter.clone() {
        Some(name) => {
            info!("Keeping only advertisements named {:?}", name);
            AdvertisementCollector::with_filter(Box::new(name_equals(name)))
        }
        None => AdvertisementCollector::new(),
    };

    let app = ScannerApp::new(
        GatewayService::new(gateway),
        session,
        shutdown.clone(),
        Arc::new(TerminalPrompter::new()),
        settings,
    )
    .with_collector(collector);

    let mut faults = forward_panics();
    let mut app_task = tokio::spawn(app.run());

    tokio::select! {
        result = &mut app_task => match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Run failed: {:#}", e);
                println!("{} {:#}", MSG_FATAL, e);
            }
            Err(join_error) => {
                let payload = match join_error.try_into_panic() {
                    Ok(payload) => panic_message(&*payload),
                    Err(join_error) => join_error.to_string(),
                };
                error!("Coordinator task failed: {}", payload);
                let message = format!("{} {}", MSG_FAULT, payload);
                shutdown.shutdown(budget, &message).await;
            }
        },
        Some(fault) = faults.recv() => {
            let message = format!("{} {}", MSG_FAULT, fault);
            shutdown.shutdown(budget, &message).await;
        }
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
            shutdown.shutdown(budget, MSG_INTERRUPT).await;
        }
    }

    // Termination exits the process; getting here means the run ended without it
    shutdown.shutdown(budget, MSG_EXIT).await;
    Ok(())
}
