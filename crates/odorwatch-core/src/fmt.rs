//! Shared formatting helpers.
//!
//! Pure functions used by the logger (record rounding), the alert engine
//! (message rendering) and the daemon (status and summary lines).

/// Rounds `value` to `decimals` places. Non-finite values pass through.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Turns an enum-style name into title case: `"BODY_ODOR"` → `"Body Odor"`.
pub fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Format byte count as human-readable size: `"1.5G"`, `"100.3M"`, `"50.0K"`, `"512B"`.
pub fn format_bytes(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    let f = bytes as f64;
    if bytes >= GB {
        format!("{:.1}G", f / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", f / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", f / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format duration in seconds as human-readable: `"45s"`, `"3m 5s"`, `"2h 10m"`, `"1d 4h"`.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
