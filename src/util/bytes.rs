//! Human-readable byte sizes for client-facing messages.

const MEBIBYTE: f64 = 1024.0 * 1024.0;

/// Render a byte count in MiB with two decimals, e.g. `612.30 MB`.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / MEBIBYTE)
}

/// Render a limit in whole MiB when it divides evenly, e.g. `500 MB`.
pub fn format_limit(bytes: u64) -> String {
    const WHOLE: u64 = 1024 * 1024;
    if bytes % WHOLE == 0 {
        format!("{} MB", bytes / WHOLE)
    } else {
        format_megabytes(bytes)
    }
}
