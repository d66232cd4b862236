//! Terminal styling and age formatting
//!
//! Consistent colors for refinery status output, plus the coarse age labels
//! the queue display uses. Uses crossterm for cross-platform terminal colors.

use chrono::{DateTime, Utc};
use crossterm::style::{StyledContent, Stylize};

/// Format how long ago a timestamp was, in coarse buckets
///
/// Seconds under a minute, minutes under an hour, hours under a day, days
/// otherwise. Always floors; a future timestamp clamps to "0s ago".
pub fn format_age(t: DateTime<Utc>) -> String {
    let secs = (Utc::now() - t).num_seconds().max(0);

    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}

/// Refinery state colors
/// - running: Green
/// - paused: Yellow
/// - stopped: Dim grey
pub fn state_style(state: &str) -> StyledContent<String> {
    match state.to_lowercase().as_str() {
        "running" => state.to_string().green(),
        "paused" => state.to_string().yellow(),
        "stopped" => state.to_string().dark_grey(),
        _ => state.to_string().white(),
    }
}

/// Merge request status colors
/// - pending: Default/white
/// - processing: Yellow
/// - merged: Green
/// - failed: Red
/// - skipped: Dim grey
pub fn mr_status_style(status: &str) -> StyledContent<String> {
    match status.to_lowercase().as_str() {
        "pending" => status.to_string().white(),
        "processing" => status.to_string().yellow(),
        "merged" => status.to_string().green(),
        "failed" => status.to_string().red(),
        "skipped" => status.to_string().dark_grey(),
        _ => status.to_string().white(),
    }
}

/// Merge request status indicator (circle)
pub fn mr_status_indicator(status: &str) -> StyledContent<&'static str> {
    match status.to_lowercase().as_str() {
        "pending" => "○".white(),
        "processing" => "◐".yellow(),
        "merged" => "✓".green(),
        "failed" => "●".red(),
        "skipped" => "○".dark_grey(),
        _ => "○".white(),
    }
}

/// Merge count styling: zero is dim, anything merged is green
pub fn count_merged(n: u64) -> StyledContent<String> {
    if n == 0 {
        n.to_string().dark_grey()
    } else {
        n.to_string().green()
    }
}

/// Failure count styling: zero is dim, failures are red
pub fn count_failed(n: u64) -> StyledContent<String> {
    if n == 0 {
        n.to_string().dark_grey()
    } else {
        n.to_string().red()
    }
}

/// Section headers
pub fn header(text: &str) -> StyledContent<String> {
    text.to_string().bold()
}

/// Dim/muted text
pub fn dim(text: &str) -> StyledContent<String> {
    text.to_string().dark_grey()
}

/// Branch name styling
pub fn branch(name: &str) -> StyledContent<String> {
    name.to_string().cyan()
}

/// Error text
pub fn error(text: &str) -> StyledContent<String> {
    text.to_string().red()
}
