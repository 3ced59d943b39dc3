use crate::dashboard::host::HostSnapshot;
use crate::supervisor::{Health, ServiceStatus};
use chrono::{DateTime, Local};
use colored::*;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Utilization above this is highlighted
pub const HIGH_USAGE_PERCENT: f32 = 80.0;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Restarts")]
    restarts: String,
    #[tabled(rename = "Metrics")]
    metrics: String,
    #[tabled(rename = "Last Check")]
    last_checked: String,
}

/// Table of services; `memory` maps PIDs to resident bytes when known
pub fn status_table(
    statuses: &[ServiceStatus],
    memory: &HashMap<u32, u64>,
    max_metrics: usize,
) -> Table {
    let rows: Vec<StatusRow> = statuses
        .iter()
        .map(|s| StatusRow {
            service: truncate(&s.name, 24),
            health: format_health(s.health),
            port: s.port.to_string(),
            memory: s
                .pid
                .and_then(|pid| memory.get(&pid))
                .map(|bytes| format_memory(*bytes))
                .unwrap_or_else(|| "-".to_string()),
            restarts: s.restarts.to_string(),
            metrics: condense_metrics(&s.metrics, max_metrics),
            last_checked: format_last_checked(s.last_checked_at),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table
}

/// Summary panel under the table
pub fn summary(statuses: &[ServiceStatus], host: &HostSnapshot, uptime: Duration) -> String {
    let online = statuses.iter().filter(|s| s.health.is_online()).count();
    let failed = statuses.iter().filter(|s| s.health == Health::Failed).count();
    let restarts: u32 = statuses.iter().map(|s| s.restarts).sum();

    let online_text = format!("{}/{}", online, statuses.len());
    let online_text = if online == statuses.len() {
        online_text.green().bold()
    } else if online == 0 {
        online_text.red().bold()
    } else {
        online_text.yellow().bold()
    };

    let mut lines = vec![
        format!("  {:<12} {}", "Online:".bold(), online_text),
        format!("  {:<12} {}", "Restarts:".bold(), restarts),
        format!(
            "  {:<12} {}",
            "CPU:".bold(),
            format_usage(host.cpu_percent)
        ),
        format!(
            "  {:<12} {} ({} / {})",
            "RAM:".bold(),
            format_usage(host.memory_percent()),
            format_memory(host.memory_used),
            format_memory(host.memory_total)
        ),
        format!("  {:<12} {}", "Uptime:".bold(), format_hms(uptime)),
    ];

    if failed > 0 {
        lines.push(format!(
            "  {}",
            format!("{} service(s) gave up restarting", failed).red().bold()
        ));
    }

    lines.join("\n")
}

/// Whole dashboard frame
pub fn frame(
    statuses: &[ServiceStatus],
    memory: &HashMap<u32, u64>,
    host: &HostSnapshot,
    uptime: Duration,
    max_metrics: usize,
) -> String {
    let title = format!(
        "Pipeline Monitor - {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let body = if statuses.is_empty() {
        "No services configured".yellow().to_string()
    } else {
        status_table(statuses, memory, max_metrics).to_string()
    };

    format!(
        "{}\n\n{}\n\n{}\n{}\n",
        title.bold().underline(),
        body,
        summary(statuses, host, uptime),
        "Press Ctrl-C to stop".dimmed()
    )
}

pub fn format_health(health: Health) -> String {
    let label = format!("{} {}", health.symbol(), health);
    match health {
        Health::Online => label.green().to_string(),
        Health::Degraded => label.yellow().to_string(),
        Health::Offline => label.red().to_string(),
        Health::Failed => label.red().bold().to_string(),
        Health::Unknown => label.bright_black().to_string(),
    }
}

/// `k: v | k: v`, at most `max` entries; "no data" when empty
pub fn condense_metrics(metrics: &Map<String, Value>, max: usize) -> String {
    if metrics.is_empty() || max == 0 {
        return "no data".to_string();
    }

    let mut parts: Vec<String> = metrics
        .iter()
        .take(max)
        .map(|(key, value)| format!("{}: {}", key, format_value(value)))
        .collect();

    if metrics.len() > max {
        parts.push(format!("+{} more", metrics.len() - max));
    }

    parts.join(" | ")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => truncate(s, 26),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{:.2}", f),
            _ => n.to_string(),
        },
        other => truncate(&other.to_string(), 26),
    }
}

pub fn format_last_checked(at: Option<DateTime<Local>>) -> String {
    match at {
        Some(at) => at.format("%H:%M:%S").to_string(),
        None => "never".to_string(),
    }
}

fn format_usage(percent: f32) -> String {
    let text = format!("{:.1}%", percent);
    if percent > HIGH_USAGE_PERCENT {
        format!("{} {}", text.red().bold(), "(high)".red())
    } else {
        text
    }
}

/// `HH:MM:SS`; hours keep counting past a day
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Format memory usage in human-readable format
pub fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to a maximum number of characters
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
