//! Slide byte loader.
//!
//! Fetches the image bytes behind a slot URL so the engine can hold a slide
//! back until it is actually paintable. Bounded concurrency, duplicate
//! requests collapsed while a load is outstanding. Synthetic `data:` URLs are
//! self-contained and complete immediately.

use anyhow::Result;
use std::collections::HashSet;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{LoadSlide, SlideInvalid, SlideReady};

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<usize> {
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    Ok(bytes.len())
}

pub async fn run(
    client: reqwest::Client,
    mut load_rx: Receiver<LoadSlide>,
    ready_tx: Sender<SlideReady>,
    invalid_tx: Sender<SlideInvalid>,
    cancel: CancellationToken,
    max_in_flight: usize,
) -> Result<()> {
    let mut in_flight: HashSet<(usize, u64)> = HashSet::new();
    let mut tasks: JoinSet<(usize, u64, bool)> = JoinSet::new();

    loop {
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting slide loader");
                break;
            }

            Some(LoadSlide { index, url, generation }) = load_rx.recv(),
                if in_flight.len() < max_in_flight =>
            {
                if url.starts_with("data:") {
                    // Nothing to transfer; the bytes are the URL.
                    let _ = ready_tx.send(SlideReady { index, generation }).await;
                    continue;
                }
                if in_flight.insert((index, generation)) {
                    let client = client.clone();
                    tasks.spawn(async move {
                        let ok = fetch_bytes(&client, &url).await.is_ok();
                        (index, generation, ok)
                    });
                }
            }

            Some(join_res) = tasks.join_next() => {
                if let Ok((index, generation, ok)) = join_res {
                    in_flight.remove(&(index, generation));
                    if ok {
                        debug!(index, generation, "slide bytes loaded");
                        let _ = ready_tx.send(SlideReady { index, generation }).await;
                    } else {
                        debug!(index, generation, "slide load failed");
                        let _ = invalid_tx.send(SlideInvalid { index, generation }).await;
                    }
                }
            }

            else => {
                if in_flight.is_empty() {
                    break;
                }
            }
        }
    }
    Ok(())
}
