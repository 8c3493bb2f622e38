//! Interactive prompts
//!
//! Every prompt blocks on the terminal, so the terminal implementation runs
//! them on the blocking pool and the coordinator just awaits the answer.

use crate::domain::models::{AdvertisingRecord, DeviceSelection, MessageSeverity, ScanMode};
use crate::domain::validation::{is_valid_email, parse_scan_period};
use crate::infrastructure::gateway::Credentials;
use crate::presentation::components::Components;
use crate::presentation::theme::Palette;
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, BufRead, IsTerminal, Write};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("interrupted by user")]
    Interrupted,

    #[error("input closed")]
    Closed,

    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait Prompter: Send + Sync {
    /// Username (e-mail) and password. `default_user` is offered as the
    /// answer to an empty username.
    async fn credentials(&self, default_user: Option<String>) -> Result<Credentials, PromptError>;

    /// Picks a gateway id; `None` means exit.
    async fn gateway(&self, gateways: &[String]) -> Result<Option<String>, PromptError>;

    async fn scan_params(&self, default_period: u32) -> Result<(ScanMode, u32), PromptError>;

    async fn device(
        &self,
        records: &[AdvertisingRecord],
        page_size: usize,
    ) -> Result<DeviceSelection, PromptError>;
}

/// 1-based menu answer to a 0-based index.
pub fn parse_choice(input: &str, count: usize) -> Option<usize> {
    match input.trim().parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(n - 1),
        _ => None,
    }
}

/// Empty input takes the default.
pub fn resolve_period(input: &str, default_period: u32) -> Option<u32> {
    if input.trim().is_empty() {
        Some(default_period)
    } else {
        parse_scan_period(input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuEntry {
    Device(usize),
    PreviousPage,
    NextPage,
    Rescan,
    Exit,
}

/// Paginated device menu, followed by "Scan again" and "Exit". Devices keep
/// their position in the whole list as menu number on every page; the
/// remaining entries are numbered after the last device.
pub struct DeviceMenu<'a> {
    records: &'a [AdvertisingRecord],
    page_size: usize,
    page: usize,
}

impl<'a> DeviceMenu<'a> {
    pub fn new(records: &'a [AdvertisingRecord], page_size: usize) -> Self {
        Self {
            records,
            page_size: page_size.max(1),
            page: 0,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_count(&self) -> usize {
        ((self.records.len() + self.page_size - 1) / self.page_size).max(1)
    }

    pub fn entries(&self) -> Vec<MenuEntry> {
        let start = self.page * self.page_size;
        let end = (start + self.page_size).min(self.records.len());
        let mut entries: Vec<MenuEntry> = (start..end).map(MenuEntry::Device).collect();
        if self.page > 0 {
            entries.push(MenuEntry::PreviousPage);
        }
        if self.page + 1 < self.page_count() {
            entries.push(MenuEntry::NextPage);
        }
        entries.push(MenuEntry::Rescan);
        entries.push(MenuEntry::Exit);
        entries
    }

    /// Entries of the current page with the number that selects them.
    pub fn numbered(&self) -> Vec<(usize, MenuEntry)> {
        let mut next_control = self.records.len();
        self.entries()
            .into_iter()
            .map(|entry| match entry {
                MenuEntry::Device(index) => (index + 1, entry),
                _ => {
                    next_control += 1;
                    (next_control, entry)
                }
            })
            .collect()
    }

    pub fn entry_for(&self, number: usize) -> Option<MenuEntry> {
        self.numbered()
            .into_iter()
            .find(|(n, _)| *n == number)
            .map(|(_, entry)| entry)
    }

    pub fn labels(&self) -> Vec<String> {
        self.numbered()
            .into_iter()
            .map(|(n, entry)| match entry {
                MenuEntry::Device(index) => Components::device_label(n, &self.records[index]),
                MenuEntry::PreviousPage => format!("{}) Previous page", n),
                MenuEntry::NextPage => format!("{}) Next page", n),
                MenuEntry::Rescan => format!("{}) Scan again", n),
                MenuEntry::Exit => format!("{}) Exit", n),
            })
            .collect()
    }

    /// Applies a choice. Page moves return `None`.
    pub fn select(&mut self, entry: MenuEntry) -> Option<DeviceSelection> {
        match entry {
            MenuEntry::Device(index) => self
                .records
                .get(index)
                .map(|record| DeviceSelection::Connect(record.target())),
            MenuEntry::PreviousPage => {
                self.page = self.page.saturating_sub(1);
                None
            }
            MenuEntry::NextPage => {
                self.page = (self.page + 1).min(self.page_count() - 1);
                None
            }
            MenuEntry::Rescan => Some(DeviceSelection::Rescan),
            MenuEntry::Exit => Some(DeviceSelection::Exit),
        }
    }
}

/// Prompts on stdin/stdout.
#[derive(Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(prompt: F) -> Result<T, PromptError>
where
    F: FnOnce() -> Result<T, PromptError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(prompt)
        .await
        .map_err(|e| PromptError::Io(io::Error::other(e.to_string())))?
}

fn warn_line(text: &str) {
    println!("{}", Palette::severity(text, MessageSeverity::Warning));
}

fn read_line(prompt: &str) -> Result<String, PromptError> {
    let mut out = io::stdout();
    write!(out, "{}", prompt)?;
    out.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(PromptError::Closed);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn read_masked(prompt: &str) -> Result<String, PromptError> {
    if !io::stdin().is_terminal() {
        return read_line(prompt);
    }

    let mut out = io::stdout();
    write!(out, "{}", prompt)?;
    out.flush()?;

    enable_raw_mode()?;
    let result = read_masked_keys(&mut out);
    if let Err(e) = disable_raw_mode() {
        warn!("Could not restore terminal mode: {}", e);
    }
    writeln!(out)?;
    result
}

fn read_masked_keys(out: &mut impl Write) -> Result<String, PromptError> {
    let mut secret = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => return Err(PromptError::Interrupted),
            (KeyCode::Enter, _) => return Ok(secret),
            (KeyCode::Backspace, _) => {
                if secret.pop().is_some() {
                    write!(out, "\u{8} \u{8}")?;
                    out.flush()?;
                }
            }
            (KeyCode::Char(c), _) => {
                secret.push(c);
                write!(out, "*")?;
                out.flush()?;
            }
            _ => {}
        }
    }
}

/// Prints already-numbered labels and reads until `resolve` accepts the input.
fn pick<T>(
    title: &str,
    labels: &[String],
    prompt: &str,
    resolve: impl Fn(&str) -> Option<T>,
) -> Result<T, PromptError> {
    println!();
    println!("{}", Palette::title(title));
    for label in labels {
        println!("  {}", label);
    }
    loop {
        let input = read_line(prompt)?;
        match resolve(&input) {
            Some(choice) => return Ok(choice),
            None => warn_line("Invalid choice"),
        }
    }
}

fn choose(title: &str, labels: &[String]) -> Result<usize, PromptError> {
    let count = labels.len();
    pick(title, labels, &format!("Choose [1-{}]: ", count), |input| {
        parse_choice(input, count)
    })
}

fn numbered(options: &[String]) -> Vec<String> {
    options
        .iter()
        .enumerate()
        .map(|(i, option)| format!("{}) {}", i + 1, option))
        .collect()
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn credentials(&self, default_user: Option<String>) -> Result<Credentials, PromptError> {
        blocking(move || {
            let user = loop {
                let prompt = match &default_user {
                    Some(user) => format!("Username (e-mail) [{}]: ", user),
                    None => "Username (e-mail): ".to_string(),
                };
                let input = read_line(&prompt)?;
                let input = input.trim();
                let candidate = match (&default_user, input.is_empty()) {
                    (Some(user), true) => user.clone(),
                    _ => input.to_string(),
                };
                if is_valid_email(&candidate) {
                    break candidate;
                }
                warn_line("Please enter a valid e-mail address");
            };

            let password = loop {
                let secret = read_masked("Password: ")?;
                if !secret.is_empty() {
                    break secret;
                }
                warn_line("Password is required");
            };

            Ok(Credentials { user, password })
        })
        .await
    }

    async fn gateway(&self, gateways: &[String]) -> Result<Option<String>, PromptError> {
        let mut options = gateways.to_vec();
        options.push("Exit".to_string());
        let count = gateways.len();
        blocking(move || {
            let index = choose("Select Gateway", &numbered(&options))?;
            Ok((index < count).then(|| options.swap_remove(index)))
        })
        .await
    }

    async fn scan_params(&self, default_period: u32) -> Result<(ScanMode, u32), PromptError> {
        blocking(move || {
            let options = vec![
                ScanMode::Active.label().to_string(),
                ScanMode::Passive.label().to_string(),
            ];
            let mode = match choose("Select Scan Type", &numbered(&options))? {
                0 => ScanMode::Active,
                _ => ScanMode::Passive,
            };

            let period = loop {
                let input = read_line(&format!("Scan period in seconds [{}]: ", default_period))?;
                match resolve_period(&input, default_period) {
                    Some(period) => break period,
                    None => warn_line("Please enter a whole number of seconds"),
                }
            };
            Ok((mode, period))
        })
        .await
    }

    async fn device(
        &self,
        records: &[AdvertisingRecord],
        page_size: usize,
    ) -> Result<DeviceSelection, PromptError> {
        let records = records.to_vec();
        blocking(move || {
            let mut menu = DeviceMenu::new(&records, page_size);
            loop {
                let title = format!(
                    "Select Device ({} found, page {}/{})",
                    records.len(),
                    menu.page() + 1,
                    menu.page_count()
                );
                let entry = pick(&title, &menu.labels(), "Choose: ", |input| {
                    input
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| menu.entry_for(n))
                })?;
                if let Some(selection) = menu.select(entry) {
                    return Ok(selection);
                }
            }
        })
        .await
    }
}
