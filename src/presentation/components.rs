use crate::domain::models::{display_address, AdvertisingRecord, GattTable, StatusMessage};
use crate::presentation::theme::Palette;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const SPINNER_FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
const SPINNER_TICK: Duration = Duration::from_millis(100);

pub struct Components;

impl Components {
    pub fn banner() -> String {
        let rule = "=".repeat(44);
        format!(
            "{}\n  {}\n  {}\n{}",
            Palette::accent(&rule),
            Palette::title("GATT Table Scanner"),
            Palette::hint("scan, pick a peripheral, dump its services"),
            Palette::accent(&rule)
        )
    }

    pub fn status_line(status: &StatusMessage) -> String {
        Palette::severity(&status.message, status.severity).to_string()
    }

    /// `<n>) [AA:BB:CC:DD:EE:FF] -52dBm Name`
    pub fn device_label(index: usize, record: &AdvertisingRecord) -> String {
        format!(
            "{}) [{}] {}dBm {}",
            index,
            Palette::address(&display_address(&record.address)),
            record.rssi,
            record.name
        )
    }

    /// Pretty JSON with a three space indent.
    pub fn gatt_json(table: &GattTable) -> Result<String, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"   ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        table.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Shared message slot of a [`Spinner`], safe to update from progress callbacks.
#[derive(Clone, Default)]
pub struct SpinnerHandle {
    message: Arc<Mutex<String>>,
}

impl SpinnerHandle {
    pub fn set_message(&self, message: impl Into<String>) {
        let mut slot = match self.message.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = message.into();
    }

    pub fn message(&self) -> String {
        match self.message.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Busy indicator on the current terminal line. Draws nothing when stdout
/// is not a terminal; the message is still tracked.
pub struct Spinner {
    handle: SpinnerHandle,
    task: Option<JoinHandle<()>>,
    visible: bool,
}

impl Spinner {
    pub fn new() -> Self {
        Self {
            handle: SpinnerHandle::default(),
            task: None,
            visible: std::io::stdout().is_terminal(),
        }
    }

    #[cfg(test)]
    pub fn hidden() -> Self {
        Self {
            handle: SpinnerHandle::default(),
            task: None,
            visible: false,
        }
    }

    pub fn handle(&self) -> SpinnerHandle {
        self.handle.clone()
    }

    pub fn start(&mut self, message: impl Into<String>) {
        self.handle.set_message(message);
        if self.task.is_some() {
            return;
        }
        let handle = self.handle.clone();
        let visible = self.visible;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SPINNER_TICK);
            let mut frame = 0usize;
            loop {
                ticker.tick().await;
                if visible {
                    let mut out = std::io::stdout();
                    let _ = write!(
                        out,
                        "\r\x1b[2K{} {}",
                        SPINNER_FRAMES[frame % SPINNER_FRAMES.len()],
                        handle.message()
                    );
                    let _ = out.flush();
                }
                frame = frame.wrapping_add(1);
            }
        }));
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.handle.set_message(message);
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            if self.visible {
                let mut out = std::io::stdout();
                let _ = write!(out, "\r\x1b[2K");
                let _ = out.flush();
            }
        }
    }
}

impl Default for Spinner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop();
    }
}
