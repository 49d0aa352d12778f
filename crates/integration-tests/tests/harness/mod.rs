#![allow(dead_code)]

pub mod config;
pub mod mock_upstream;
pub mod server;

/// Payloads of every `data:` line in a relayed body
pub fn data_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_owned)
        .collect()
}
