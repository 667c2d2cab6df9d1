//! Lazy event sequence over a byte stream.
//!
//! Wraps [`SseDecoder`] so the watcher can `.next().await` events in
//! arrival order. Malformed records come through as [`Decoded::Malformed`]
//! and never end the sequence; a read error is yielded once as the final
//! item, and EOF simply ends it.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use keepwarm_core::{DecodeError, Event, SseDecoder};

/// One item of the decoded sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(Event),
    /// A record that was skipped.
    Malformed(DecodeError),
}

struct DecodeState<S> {
    body: S,
    decoder: SseDecoder,
    ready: VecDeque<Decoded>,
    done: bool,
}

pub fn decode_events<S>(body: S) -> impl Stream<Item = std::io::Result<Decoded>> + Send
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin + Send,
{
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                return Some((Ok(item), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    for record in st.decoder.push(&chunk) {
                        let item = match record.and_then(|r| Event::from_record(&r)) {
                            Ok(event) => Decoded::Event(event),
                            Err(err) => Decoded::Malformed(err),
                        };
                        st.ready.push_back(item);
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    if st.decoder.has_partial() {
                        tracing::trace!("event stream ended inside a record; discarding it");
                    }
                    st.done = true;
                }
            }
        }
    })
}
