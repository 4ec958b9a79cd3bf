//! Shared styling utilities for terminal output.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Cycle outcome as stored in history, coloured by severity.
pub fn outcome(outcome: &str) -> String {
    let style = match outcome {
        "done" => Style::new().green(),
        "busy" => Style::new().yellow(),
        _ => Style::new().red(),
    };
    style.apply_to(outcome).to_string()
}

/// Percentage with one decimal, as computed by the statistics module.
pub fn percent(value: f64) -> String {
    format!("{value:.1}%")
}
