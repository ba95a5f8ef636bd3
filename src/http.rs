use reqwest::Client;
use std::time::Duration;

/// Shared client builder so every outbound call carries an explicit timeout.
/// Callers pick the bound appropriate to the remote (search 15s, image fetch
/// 10-20s, WMS and generation 60s).
pub fn build_client(timeout: Duration) -> Client {
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Byte-capped clip of upstream text that never splits a UTF-8 character;
/// upstream bodies and error strings are arbitrary text.
pub fn clip_text(mut text: String, max_bytes: usize) -> String {
    if text.len() > max_bytes {
        let mut end = max_bytes;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
