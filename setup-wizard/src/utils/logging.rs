// Logging utilities
// Dual-format logging (JSON lines + human-readable text) with [PHASE]/[STEP] tags lifted into fields

use log::Level;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Mask sensitive data in logs
pub fn mask_sensitive(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }

    let visible = 4;
    let start: String = chars[..visible].iter().collect();
    let end: String = chars[chars.len() - visible..].iter().collect();

    format!("{}...{}", start, end)
}

/// Mask the local part of an email, keep the domain for troubleshooting.
pub fn mask_email(email: &str) -> String {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => mask_sensitive(email),
    }
}

/// Parse phase and step from log message
/// Extracts [PHASE: ...] and [STEP: ...] patterns
pub fn parse_log_metadata(message: &str) -> (Option<String>, Option<String>, String) {
    let (phase, rest) = take_tag(message, "[PHASE:");
    let (step, rest) = take_tag(&rest, "[STEP:");
    (phase, step, rest)
}

fn take_tag(message: &str, open: &str) -> (Option<String>, String) {
    let Some(start) = message.find(open) else {
        return (None, message.to_string());
    };
    let Some(len) = message[start..].find(']') else {
        return (None, message.to_string());
    };
    let value = message[start + open.len()..start + len].trim().to_string();
    let cleaned = format!("{} {}", &message[..start], &message[start + len + 1..])
        .trim()
        .to_string();
    (Some(value), cleaned)
}

/// Format log entry as JSON for structured logging
pub fn format_json_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_entry = json!({
        "timestamp": timestamp,
        "level": level.as_str(),
        "target": target,
        "message": message,
    });

    if let Some(phase) = phase {
        log_entry["phase"] = json!(phase);
    }

    if let Some(step) = step {
        log_entry["step"] = json!(step);
    }

    serde_json::to_string(&log_entry).unwrap_or_else(|_| "{}".to_string())
}

/// Format log entry as human-readable text
pub fn format_human_readable_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_line = format!("[{}] [{}]", timestamp, level.as_str());

    if let Some(phase) = phase {
        log_line.push_str(&format!(" [PHASE: {}]", phase));
    }

    if let Some(step) = step {
        log_line.push_str(&format!(" [STEP: {}]", step));
    }

    log_line.push_str(&format!(" [{}] {}", target, message));
    log_line
}

fn human_line(message: &std::fmt::Arguments, record: &log::Record) -> String {
    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let message_str = format!("{}", message);
    let (phase, step, cleaned_message) = parse_log_metadata(&message_str);
    format_human_readable_log(
        &timestamp_local.to_string(),
        record.level(),
        record.target(),
        &cleaned_message,
        phase.as_deref(),
        step.as_deref(),
    )
}

/// Initialize the global logger.
///
/// Writes `wizard-<ts>.log` (JSON lines) and `wizard-<ts>.txt` under `log_dir`. Stdout is
/// optional and must stay off while the TUI owns the terminal. Returns the JSON log path.
pub fn init_logging(log_dir: &Path, level: &str, with_stdout: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;

    let level: log::LevelFilter = level.trim().parse().unwrap_or(log::LevelFilter::Debug);
    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");
    let json_log_file = log_dir.join(format!("wizard-{}.log", timestamp));
    let txt_log_file = log_dir.join(format!("wizard-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new().level(level);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("{}", human_line(message, record)))
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) = parse_log_metadata(&message_str);
                    let json_line = format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(&json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("{}\n", human_line(message, record)))
                })
                .chain(fern::log_file(&txt_log_file)?),
        );

    dispatch.apply()?;

    log::info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(json_log_file)
}
