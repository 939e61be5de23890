//! Minimal SSE parser — yields the `data:` payload of each event frame.

use futures::Stream;
use tokio_stream::StreamExt;

/// Parse a reqwest response body as a stream of SSE `data:` payloads.
///
/// Multi-line `data:` fields are joined with newlines; comment lines and
/// other fields are skipped. Chat-completion streams carry everything in
/// `data:`, so that is all this parser surfaces.
pub fn parse_sse_data(response: reqwest::Response) -> impl Stream<Item = anyhow::Result<String>> {
    let byte_stream = response.bytes_stream();

    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            data_lines: Vec::new(),
        },
        |mut state| async move {
            loop {
                if let Some(newline_pos) = state.buffer.find('\n') {
                    let line = state.buffer[..newline_pos].trim_end_matches('\r').to_string();
                    state.buffer = state.buffer[newline_pos + 1..].to_string();

                    if line.is_empty() {
                        // Empty line dispatches the accumulated event
                        if !state.data_lines.is_empty() {
                            let data = state.data_lines.join("\n");
                            state.data_lines.clear();
                            return Some((Ok(data), state));
                        }
                        continue;
                    }

                    if line.starts_with(':') {
                        continue;
                    }

                    if let Some(value) = line.strip_prefix("data:") {
                        state.data_lines.push(value.trim_start().to_string());
                    }
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), state));
                    }
                    None => {
                        if !state.data_lines.is_empty() {
                            let data = state.data_lines.join("\n");
                            state.data_lines.clear();
                            return Some((Ok(data), state));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

struct SseState {
    byte_stream: std::pin::Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    data_lines: Vec<String>,
}
