//! CLI Output Formatting Module
//! Colorized terminal output for the text format

use colored::Colorize;

/// Width the record labels of `status` and `keys show` are padded to
const LABEL_WIDTH: usize = 12;

/// Terminal output for the text format. Errors go to stderr so JSON on
/// stdout stays parseable when a command fails.
pub struct CliFormatter;

impl CliFormatter {
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    pub fn warning(message: &str) {
        eprintln!("{} {}", "warning:".yellow().bold(), message);
    }

    /// Neutral notice, e.g. an item that is simply absent.
    pub fn info(message: &str) {
        println!("{} {}", "-".bright_black(), message);
    }

    pub fn header(title: &str) {
        println!("{}", title.bright_cyan().bold());
    }

    /// One record per line, labels aligned.
    pub fn kv(label: &str, value: &str) {
        println!("  {} {}", pad_label(label).as_str().bold(), value);
    }

    /// Continuation line under a `kv` whose value is a list.
    pub fn item(text: &str) {
        println!("  {:width$} {}", "", text, width = LABEL_WIDTH + 1);
    }
}

/// `label:` padded to the shared column.
pub fn pad_label(label: &str) -> String {
    format!("{:<width$}", format!("{}:", label), width = LABEL_WIDTH + 1)
}

/// Short hex fingerprint of a key, never the key itself.
pub fn fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}

/// Render a byte count as "N bytes" or "(none)".
pub fn format_len(len: Option<usize>) -> String {
    match len {
        Some(len) => format!("{} bytes", len),
        None => "(none)".to_string(),
    }
}
