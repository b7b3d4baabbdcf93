//! Minimal server-sent-events reader for streaming completions.

use std::io::BufRead;

use anyhow::{Context, Result};

use crate::llm::TextStream;

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// What a provider makes of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Skip,
    End,
}

/// Iterator over the events of an SSE body.
pub struct SseEvents<R> {
    reader: R,
    finished: bool,
}

impl<R: BufRead> SseEvents<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for SseEvents<R> {
    type Item = Result<SseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut event = None;
        let mut data: Vec<String> = Vec::new();
        loop {
            let mut line = String::new();
            let read = match self.reader.read_line(&mut line) {
                Ok(n) => n,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err).context("read event stream"));
                }
            };
            if read == 0 {
                self.finished = true;
                if data.is_empty() {
                    return None;
                }
                break;
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if data.is_empty() {
                    event = None;
                    continue;
                }
                break;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            } else if let Some(rest) = line.strip_prefix("event:") {
                event = Some(rest.trim().to_string());
            }
        }
        Some(Ok(SseEvent {
            event,
            data: data.join("\n"),
        }))
    }
}

/// Turn an SSE body into a lazy stream of text fragments.
///
/// The stream ends at end of body or at the first [`Fragment::End`]; the first
/// error is yielded once and then the stream stops.
pub fn text_stream<R, F>(reader: R, mut decode: F) -> TextStream
where
    R: BufRead + Send + 'static,
    F: FnMut(&SseEvent) -> Result<Fragment> + Send + 'static,
{
    let mut events = SseEvents::new(reader);
    let mut finished = false;
    Box::new(std::iter::from_fn(move || {
        while !finished {
            let event = match events.next()? {
                Ok(event) => event,
                Err(err) => {
                    finished = true;
                    return Some(Err(err));
                }
            };
            match decode(&event) {
                Ok(Fragment::Text(text)) if !text.is_empty() => return Some(Ok(text)),
                Ok(Fragment::Text(_) | Fragment::Skip) => {}
                Ok(Fragment::End) => finished = true,
                Err(err) => {
                    finished = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }))
}
