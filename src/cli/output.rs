// Output formatting and display for CLI

use crate::dashboard::render::status_table;
use crate::supervisor::{Health, ServiceStatus};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print the result of a one-shot status check
pub fn print_status_report(statuses: &[ServiceStatus], max_metrics: usize) {
    if statuses.is_empty() {
        println!("{}", "No services configured".yellow());
        return;
    }

    println!("\n{}\n", status_table(statuses, &HashMap::new(), max_metrics));

    for status in statuses.iter().filter(|s| !s.health.is_online()) {
        if let Some(ref detail) = status.detail {
            println!("  {} {}: {}", "•".dimmed(), status.name.bold(), detail.dimmed());
        }
    }

    let online = statuses.iter().filter(|s| s.health == Health::Online).count();
    println!(
        "{}",
        format!("Total: {} service(s), {} online", statuses.len(), online)
            .dimmed()
            .italic()
    );
}

/// Create a progress bar for long operations
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Finish a progress bar with success
pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a progress bar with error
pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}
