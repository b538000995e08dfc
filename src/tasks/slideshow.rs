//! Slideshow rotation engine.
//!
//! Owns the photo sequence, the active index and the preload policy, and is
//! the only task that mutates `SlideshowState`. Batches are replaced
//! wholesale, never patched: a refresh (startup, staleness, resize, keyword
//! change) produces a whole new state tagged with a generation number, and
//! any fetch result or slide event carrying an older generation is dropped.
//!
//! Phases: `Loading` until the first slide's bytes arrive, then `Rotating`
//! (or `Degraded` when the batch came from the synthetic fallback set). A
//! single repeating timer is armed per batch; arming replaces the previous
//! timer so duplicate rotation loops cannot exist.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FrameConfig;
use crate::events::{
    EngineCommand, FrameEvent, LoadSlide, RefreshReason, SlideInvalid, SlideReady,
};
use crate::photo::Photo;
use crate::tasks::cache::PhotoCache;
use crate::tasks::fetcher::{BatchSource, FetchRequest, FetchResult, Fetcher};

/// Geometry change that forces a refetch, in either dimension.
const RESIZE_THRESHOLD_PX: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loading,
    Rotating,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotBytes {
    Empty,
    Pending,
    Loaded,
}

/// Engine-owned state, replaced wholesale on every refresh.
struct SlideshowState {
    photos: Vec<Photo>,
    keywords_used: Vec<String>,
    slots: Vec<SlotBytes>,
    current_index: usize,
    selected_keyword: String,
    generation: u64,
    phase: Phase,
    source: BatchSource,
    /// Slot whose activation is deferred until its bytes arrive.
    pending_show: Option<usize>,
}

impl SlideshowState {
    fn new(selected_keyword: String) -> Self {
        Self {
            photos: Vec::new(),
            keywords_used: Vec::new(),
            slots: Vec::new(),
            current_index: 0,
            selected_keyword,
            generation: 0,
            phase: Phase::Loading,
            source: BatchSource::Network,
            pending_show: None,
        }
    }
}

/// Channel endpoints wiring the engine to its collaborators.
pub struct EngineChannels {
    pub commands: Receiver<EngineCommand>,
    pub to_loader: Sender<LoadSlide>,
    pub slide_ready: Receiver<SlideReady>,
    pub slide_invalid: Receiver<SlideInvalid>,
    pub frame_events: Sender<FrameEvent>,
}

/// Sender half the engine writes to; receivers stay local to the loop.
struct Outputs {
    to_loader: Sender<LoadSlide>,
    frame_events: Sender<FrameEvent>,
}

pub async fn run(
    cfg: FrameConfig,
    fetcher: Arc<Fetcher>,
    cache: Arc<PhotoCache>,
    channels: EngineChannels,
    cancel: CancellationToken,
) -> Result<()> {
    let EngineChannels {
        commands: mut commands_rx,
        to_loader,
        slide_ready: mut ready_rx,
        slide_invalid: mut invalid_rx,
        frame_events,
    } = channels;
    let out = Outputs {
        to_loader,
        frame_events,
    };

    let mut state = SlideshowState::new(cfg.initial_keyword());
    let mut viewport = (cfg.viewport.width, cfg.viewport.height);
    let (fetch_tx, mut fetch_rx) = channel::<FetchResult>(8);
    let mut ticker = interval_at(Instant::now() + cfg.rotate_interval, cfg.rotate_interval);

    // Startup: a fresh cached batch short-circuits the network entirely.
    let _ = out.frame_events.send(FrameEvent::LoadingStarted).await;
    if let Some(photos) = cache.read() {
        let cached = FetchResult {
            generation: state.generation,
            keyword: state.selected_keyword.clone(),
            photos,
            source: BatchSource::Cache,
            notice: None,
        };
        apply_batch(&mut state, cached, &out).await;
    } else {
        start_fetch(&cfg, &fetcher, &state, viewport, &fetch_tx);
    }

    loop {
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting slideshow engine");
                break;
            }

            maybe_cmd = commands_rx.recv() => {
                let Some(cmd) = maybe_cmd else { continue };
                handle_command(
                    cmd,
                    &cfg,
                    &fetcher,
                    &cache,
                    &mut state,
                    &mut viewport,
                    &fetch_tx,
                    &out,
                )
                .await;
            }

            maybe_result = fetch_rx.recv() => {
                let Some(result) = maybe_result else { continue };
                if result.generation != state.generation {
                    debug!(
                        got = result.generation,
                        want = state.generation,
                        "discarding stale fetch result"
                    );
                    continue;
                }
                apply_batch(&mut state, result, &out).await;
            }

            maybe_ready = ready_rx.recv() => {
                let Some(SlideReady { index, generation }) = maybe_ready else { continue };
                if generation != state.generation || index >= state.slots.len() {
                    continue;
                }
                state.slots[index] = SlotBytes::Loaded;
                if state.phase == Phase::Loading && index == 0 {
                    first_slide_up(&mut state, &cfg, &mut ticker, &out).await;
                } else if state.pending_show == Some(index) {
                    state.pending_show = None;
                    show(&state, index, &out).await;
                }
            }

            maybe_invalid = invalid_rx.recv() => {
                let Some(SlideInvalid { index, generation }) = maybe_invalid else { continue };
                if generation != state.generation || index >= state.slots.len() {
                    continue;
                }
                warn!(index, "slide failed to load; showing it anyway");
                // Rotation must never halt on a broken image.
                state.slots[index] = SlotBytes::Empty;
                if state.phase == Phase::Loading && index == 0 {
                    first_slide_up(&mut state, &cfg, &mut ticker, &out).await;
                } else if state.pending_show == Some(index) {
                    state.pending_show = None;
                    show(&state, index, &out).await;
                }
            }

            _ = ticker.tick() => {
                if state.phase == Phase::Loading || state.photos.is_empty() {
                    continue;
                }
                rotate_step(&mut state, &out).await;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_command(
    cmd: EngineCommand,
    cfg: &FrameConfig,
    fetcher: &Arc<Fetcher>,
    cache: &Arc<PhotoCache>,
    state: &mut SlideshowState,
    viewport: &mut (u32, u32),
    fetch_tx: &Sender<FetchResult>,
    out: &Outputs,
) {
    match cmd {
        EngineCommand::Refresh(reason) => {
            debug!(?reason, "refresh requested");
            let _ = out.frame_events.send(FrameEvent::LoadingStarted).await;
            if reason == RefreshReason::Startup {
                if let Some(photos) = cache.read() {
                    let cached = FetchResult {
                        generation: state.generation,
                        keyword: state.selected_keyword.clone(),
                        photos,
                        source: BatchSource::Cache,
                        notice: None,
                    };
                    apply_batch(state, cached, out).await;
                    return;
                }
            }
            start_fetch(cfg, fetcher, state, *viewport, fetch_tx);
        }
        EngineCommand::SelectKeyword(keyword) => {
            info!(%keyword, "keyword selected");
            state.selected_keyword = keyword;
            // Bumping the generation makes any in-flight result for the old
            // keyword undeliverable.
            state.generation += 1;
            cache.invalidate();
            if !fetcher.online_handle().load(Ordering::Acquire) {
                let _ = out
                    .frame_events
                    .send(FrameEvent::Notice(
                        "Offline; cannot fetch new photos.".to_string(),
                    ))
                    .await;
                return;
            }
            state.phase = Phase::Loading;
            let _ = out.frame_events.send(FrameEvent::LoadingStarted).await;
            start_fetch(cfg, fetcher, state, *viewport, fetch_tx);
        }
        EngineCommand::ViewportChanged { width, height } => {
            let dw = width.abs_diff(viewport.0);
            let dh = height.abs_diff(viewport.1);
            if dw <= RESIZE_THRESHOLD_PX && dh <= RESIZE_THRESHOLD_PX {
                return;
            }
            info!(width, height, "viewport changed beyond threshold");
            *viewport = (width, height);
            state.generation += 1;
            cache.invalidate();
            state.phase = Phase::Loading;
            let _ = out.frame_events.send(FrameEvent::LoadingStarted).await;
            start_fetch(cfg, fetcher, state, *viewport, fetch_tx);
        }
    }
}

fn start_fetch(
    cfg: &FrameConfig,
    fetcher: &Arc<Fetcher>,
    state: &SlideshowState,
    viewport: (u32, u32),
    fetch_tx: &Sender<FetchResult>,
) {
    let request = FetchRequest {
        keyword: state.selected_keyword.clone(),
        generation: state.generation,
        count: cfg.photo_count,
        width: viewport.0,
        height: viewport.1,
    };
    let fetcher = fetcher.clone();
    let fetch_tx = fetch_tx.clone();
    tokio::spawn(async move {
        let result = fetcher.fetch(request).await;
        let _ = fetch_tx.send(result).await;
    });
}

/// Install a new batch: wholesale state replacement, slot zero queued for
/// loading, everything else lazy.
async fn apply_batch(state: &mut SlideshowState, result: FetchResult, out: &Outputs) {
    if let Some(notice) = &result.notice {
        let _ = out
            .frame_events
            .send(FrameEvent::Notice(notice.clone()))
            .await;
    }

    // An empty batch cannot rotate; substitute the synthetic set.
    let (photos, keyword, source) = if result.photos.is_empty() {
        (
            crate::fallback::photo_set(),
            crate::fallback::FALLBACK_KEYWORD.to_string(),
            BatchSource::Fallback,
        )
    } else {
        (result.photos, result.keyword, result.source)
    };

    let count = photos.len();
    state.keywords_used = vec![keyword; count];
    state.slots = vec![SlotBytes::Empty; count];
    state.photos = photos;
    state.current_index = 0;
    state.pending_show = None;
    state.phase = Phase::Loading;
    state.source = source;

    if source == BatchSource::Fallback {
        let _ = out.frame_events.send(FrameEvent::Degraded).await;
    }

    state.slots[0] = SlotBytes::Pending;
    let _ = out
        .to_loader
        .send(LoadSlide {
            index: 0,
            url: state.photos[0].url.clone(),
            generation: state.generation,
        })
        .await;
}

/// The first slide of a batch finished loading: leave `Loading`, arm the
/// rotation timer (replacing any previous one) and preload the next slot.
async fn first_slide_up(
    state: &mut SlideshowState,
    cfg: &FrameConfig,
    ticker: &mut tokio::time::Interval,
    out: &Outputs,
) {
    let _ = out.frame_events.send(FrameEvent::LoadingFinished).await;
    state.phase = match state.source {
        BatchSource::Fallback => Phase::Degraded,
        _ => Phase::Rotating,
    };
    show(state, 0, out).await;
    *ticker = interval_at(Instant::now() + cfg.rotate_interval, cfg.rotate_interval);
    preload(state, 1, out).await;
}

/// One rotation tick: advance by exactly one, activate lazily, preload
/// exactly one slot ahead.
async fn rotate_step(state: &mut SlideshowState, out: &Outputs) {
    let count = state.photos.len();
    let next = (state.current_index + 1) % count;
    state.current_index = next;

    match state.slots[next] {
        SlotBytes::Loaded => {
            state.pending_show = None;
            show(state, next, out).await;
        }
        SlotBytes::Pending => {
            state.pending_show = Some(next);
        }
        SlotBytes::Empty => {
            // Neither cached bytes nor a pending load: direct inline load.
            state.slots[next] = SlotBytes::Pending;
            state.pending_show = Some(next);
            let _ = out
                .to_loader
                .send(LoadSlide {
                    index: next,
                    url: state.photos[next].url.clone(),
                    generation: state.generation,
                })
                .await;
        }
    }

    let ahead = (next + 1) % count;
    if ahead != next {
        preload(state, ahead, out).await;
    }
}

async fn preload(state: &mut SlideshowState, index: usize, out: &Outputs) {
    if index >= state.slots.len() || state.slots[index] != SlotBytes::Empty {
        return;
    }
    state.slots[index] = SlotBytes::Pending;
    let _ = out
        .to_loader
        .send(LoadSlide {
            index,
            url: state.photos[index].url.clone(),
            generation: state.generation,
        })
        .await;
}

async fn show(state: &SlideshowState, index: usize, out: &Outputs) {
    let keyword = state.keywords_used.get(index).cloned().unwrap_or_default();
    debug!(index, %keyword, "activating slide");
    let _ = out
        .frame_events
        .send(FrameEvent::PhotoShown {
            index,
            keyword,
            photo: state.photos[index].clone(),
        })
        .await;
}
