//! `keepwarm decode`: run a recorded event stream through the decoder and
//! classifier, printing one JSON line per event.

use std::pin::pin;

use anyhow::Context;
use futures_util::StreamExt;
use keepwarm_core::{Activity, EventClassifier};
use keepwarm_runtime::stream::{Decoded, decode_events};
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::cli::DecodeOpts;

#[derive(Serialize)]
struct DecodedLine<'a> {
    kind: &'a str,
    activity: Activity,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    payload: &'a serde_json::Value,
}

pub async fn run_decode(opts: DecodeOpts) -> anyhow::Result<()> {
    let reader: Box<dyn AsyncRead + Unpin + Send> = match &opts.file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let classifier = EventClassifier::default();
    let mut events = pin!(decode_events(ReaderStream::new(reader)));
    let (mut decoded, mut skipped) = (0u64, 0u64);

    while let Some(item) = events.next().await {
        match item.context("failed to read event stream")? {
            Decoded::Event(event) => {
                let line = DecodedLine {
                    kind: &event.kind,
                    activity: classifier.classify(&event),
                    id: event.id.as_deref(),
                    payload: &event.payload,
                };
                println!("{}", serde_json::to_string(&line)?);
                decoded += 1;
            }
            Decoded::Malformed(err) => {
                tracing::warn!("skipped malformed record: {err}");
                skipped += 1;
            }
        }
    }

    tracing::info!(decoded, skipped, "event stream finished");
    Ok(())
}
