//! Output helper functions for consistent styled messages.

use sepol_cil::{LogLevel, LogSink};

use super::colors::SemanticStyle;

/// Prints a success message with a checkmark.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".success(), msg);
}

/// Prints a labeled key-value pair with proper indentation.
pub fn print_labeled(key: &str, value: &str) {
    println!("  {}: {}", key.muted(), value);
}

/// Compiler diagnostics on stderr, marked by severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalSink;

impl LogSink for TerminalSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => eprintln!("{} {message}", "✗".error()),
            LogLevel::Warn => eprintln!("{} {message}", "⚠".warning()),
            LogLevel::Info => eprintln!("{}", message.muted()),
        }
    }
}
