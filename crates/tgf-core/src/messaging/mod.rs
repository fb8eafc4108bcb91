//! Outbound messaging port, its throttling decorator and inbound/outbound types.

pub mod port;
pub mod throttled;
pub mod types;

/// Split `text` into chunks of at most `limit` chars, preferring line breaks.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();

    while rest.len() > limit {
        let window = &rest[..limit];
        // Break after the last newline in the window, unless that leaves a tiny chunk.
        let cut = window
            .iter()
            .rposition(|c| *c == '\n')
            .filter(|i| *i >= limit / 2)
            .map(|i| i + 1)
            .unwrap_or(limit);
        let chunk: String = rest[..cut].iter().collect();
        chunks.push(chunk.trim_end_matches('\n').to_string());
        rest.drain(..cut);
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.into_iter().collect());
    }
    chunks
}
