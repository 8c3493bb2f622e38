use crate::domain::models::MessageSeverity;
use colored::{ColoredString, Colorize};

/// Terminal styling of the interactive screens.
pub struct Palette;

impl Palette {
    pub fn severity(text: &str, severity: MessageSeverity) -> ColoredString {
        match severity {
            MessageSeverity::Warning => text.bright_yellow(),
            MessageSeverity::Error => text.bright_red().bold(),
        }
    }

    pub fn title(text: &str) -> ColoredString {
        text.bold()
    }

    pub fn address(text: &str) -> ColoredString {
        text.bright_cyan()
    }

    pub fn hint(text: &str) -> ColoredString {
        text.dimmed()
    }

    pub fn accent(text: &str) -> ColoredString {
        text.bright_blue().bold()
    }
}

/// Turns styling off when stdout is not a terminal or NO_COLOR is set.
pub fn configure_colors(is_terminal: bool) {
    if !is_terminal || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }
}
