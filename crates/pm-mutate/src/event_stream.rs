use std::sync::Arc;

use async_stream::try_stream;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::Error;
use crate::json::{mutate_json_full, mutate_json_select};
use crate::path::Selector;

/// A mutator usable across an `.await` point inside a spawned stream; owned
/// via `Arc` rather than borrowed, since the stream outlives any one poll.
pub type BoxMutator = Arc<dyn Fn(&str) -> Result<String, Error> + Send + Sync>;

/// Which JSON mutation §4.1 applies to each `data:` payload of the stream.
#[derive(Clone)]
pub enum JsonMode {
    Select(Selector),
    Full(Selector),
}

impl JsonMode {
    fn apply(&self, payload: &str, f: &BoxMutator) -> Result<String, Error> {
        match self {
            JsonMode::Select(selector) => mutate_json_select(payload, selector, f.as_ref()),
            JsonMode::Full(skip) => mutate_json_full(payload, skip, f.as_ref()),
        }
    }
}

const DONE_SENTINEL: &str = "[DONE]";

fn strip_data_prefix(line: &str) -> Option<(&'static str, &str)> {
    if let Some(rest) = line.strip_prefix("data: ") {
        Some(("data: ", rest))
    } else if let Some(rest) = line.strip_prefix("data:") {
        Some(("data:", rest))
    } else {
        None
    }
}

fn mutate_line(line: &str, mode: &JsonMode, legacy_mode: bool, f: &BoxMutator) -> Result<String, Error> {
    let Some((prefix, value)) = strip_data_prefix(line) else {
        return Ok(line.to_string());
    };
    if value.trim().eq_ignore_ascii_case(DONE_SENTINEL) {
        if legacy_mode {
            let mutated = f(value)?;
            return Ok(format!("{prefix}{mutated}"));
        }
        return Ok(line.to_string());
    }
    let mutated = mode.apply(value, f)?;
    Ok(format!("{prefix}{mutated}"))
}

/// Mutate a complete event block (the lines between two blank-line
/// separators, without the separator itself).
fn mutate_event_block(block: &str, mode: &JsonMode, legacy_mode: bool, f: &BoxMutator) -> Result<String, Error> {
    block
        .split('\n')
        .map(|line| mutate_line(line, mode, legacy_mode, f))
        .collect::<Result<Vec<_>, _>>()
        .map(|lines| lines.join("\n"))
}

/// One-shot form: mutate an entire buffered event-stream body.
pub fn mutate_event_stream(body: &str, mode: &JsonMode, legacy_mode: bool, f: &BoxMutator) -> Result<String, Error> {
    let normalized = body.replace("\r\n", "\n");
    let trailing_blank = normalized.ends_with("\n\n");
    let events: Vec<&str> = normalized.trim_end_matches('\n').split("\n\n").collect();
    let mutated = events
        .into_iter()
        .map(|block| mutate_event_block(block, mode, legacy_mode, f))
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = mutated.join("\n\n");
    if trailing_blank {
        out.push_str("\n\n");
    }
    Ok(out)
}

/// Reader form: consume `reader` line by line, yielding one mutated chunk
/// per complete event as soon as it arrives. Blank lines are forwarded
/// immediately; nothing is buffered across events, so a slow upstream
/// producer yields a correspondingly slow consumer.
pub fn mutate_event_stream_reader<R>(
    mut reader: R,
    mode: JsonMode,
    legacy_mode: bool,
    f: BoxMutator,
) -> impl Stream<Item = Result<Bytes, Error>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    try_stream! {
        let mut pending: Vec<String> = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Io { message: e.to_string() })?;
            if read == 0 {
                if !pending.is_empty() {
                    let block = pending.join("\n");
                    let mutated = mutate_event_block(&block, &mode, legacy_mode, &f)?;
                    yield Bytes::from(mutated);
                }
                break;
            }

            let had_newline = line.ends_with('\n');
            let trimmed = line.trim_end_matches(['\n', '\r']).to_string();

            if trimmed.is_empty() {
                if pending.is_empty() {
                    // A blank line with no pending event content: pass
                    // through verbatim (e.g. stream keep-alives).
                    yield Bytes::from(line.clone());
                    continue;
                }
                let block = pending.join("\n");
                let mutated = mutate_event_block(&block, &mode, legacy_mode, &f)?;
                pending.clear();
                let mut out = mutated;
                out.push_str("\n\n");
                yield Bytes::from(out);
                continue;
            }

            pending.push(trimmed);
            if !had_newline {
                // EOF without a trailing newline: flush what we have.
                let block = pending.join("\n");
                let mutated = mutate_event_block(&block, &mode, legacy_mode, &f)?;
                yield Bytes::from(mutated);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Cursor;

    fn upper_string_field() -> BoxMutator {
        Arc::new(crate::json::string_field(|s: &str| Ok(s.to_uppercase())))
    }

    #[test]
    fn streaming_event_mutation_preserves_framing_and_done() {
        let body = "data: {\"f\":\"a\"}\n\ndata: {\"f\":\"b\"}\n\ndata: [DONE]\n\n";
        let selector = Selector::new(vec![crate::path::Path::parse("f").unwrap()]);
        let out = mutate_event_stream(body, &JsonMode::Select(selector), false, &upper_string_field()).unwrap();
        assert_eq!(out, "data: {\"f\":\"A\"}\n\ndata: {\"f\":\"B\"}\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn reader_form_emits_events_as_they_complete() {
        let body = "data: {\"f\":\"a\"}\n\ndata: {\"f\":\"b\"}\n\ndata: [DONE]\n\n";
        let selector = Selector::new(vec![crate::path::Path::parse("f").unwrap()]);
        let reader = tokio::io::BufReader::new(Cursor::new(body.as_bytes().to_vec()));
        let stream = mutate_event_stream_reader(reader, JsonMode::Select(selector), false, upper_string_field());
        tokio::pin!(stream);

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.push(String::from_utf8(chunk.unwrap().to_vec()).unwrap());
        }
        let joined = collected.join("");
        assert_eq!(joined, "data: {\"f\":\"A\"}\n\ndata: {\"f\":\"B\"}\n\ndata: [DONE]\n\n");
    }

    #[test]
    fn non_legacy_mode_passes_done_through_untouched() {
        let body = "data: [done]\n\n";
        let selector = Selector::new(vec![]);
        let out = mutate_event_stream(body, &JsonMode::Select(selector), false, &upper_string_field()).unwrap();
        assert_eq!(out, "data: [done]\n\n");
    }
}
