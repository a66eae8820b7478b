//! Semantic color palette for terminal output.

use owo_colors::{OwoColorize, Style};

/// Green bold.
pub fn success_style() -> Style {
    Style::new().green().bold()
}

/// Red bold.
pub fn error_style() -> Style {
    Style::new().red().bold()
}

/// Yellow.
pub fn warning_style() -> Style {
    Style::new().yellow()
}

/// Dimmed.
pub fn muted_style() -> Style {
    Style::new().dimmed()
}

/// Trait extension to apply semantic styles.
pub trait SemanticStyle: Sized {
    fn success(&self) -> String;
    fn error(&self) -> String;
    fn warning(&self) -> String;
    fn muted(&self) -> String;
}

fn styled(value: &impl std::fmt::Display, style: Style) -> String {
    if super::no_color() {
        value.to_string()
    } else {
        value.style(style).to_string()
    }
}

impl<T: std::fmt::Display> SemanticStyle for T {
    fn success(&self) -> String {
        styled(self, success_style())
    }

    fn error(&self) -> String {
        styled(self, error_style())
    }

    fn warning(&self) -> String {
        styled(self, warning_style())
    }

    fn muted(&self) -> String {
        styled(self, muted_style())
    }
}
