use crate::photo::Photo;

/// Why a batch refresh was requested. Keyword and viewport changes carry
/// their own commands; they do not go through `Refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Startup,
    Stale,
}

/// Commands accepted by the slideshow engine.
#[derive(Debug)]
pub enum EngineCommand {
    Refresh(RefreshReason),
    SelectKeyword(String),
    ViewportChanged { width: u32, height: u32 },
}

/// Request to fetch the image bytes backing one slot.
#[derive(Debug)]
pub struct LoadSlide {
    pub index: usize,
    pub url: String,
    pub generation: u64,
}

/// The slot's bytes finished loading.
#[derive(Debug)]
pub struct SlideReady {
    pub index: usize,
    pub generation: u64,
}

/// The slot's bytes could not be loaded.
#[derive(Debug)]
pub struct SlideInvalid {
    pub index: usize,
    pub generation: u64,
}

/// What the display glue consumes. The engine never touches markup itself.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    LoadingStarted,
    LoadingFinished,
    PhotoShown {
        index: usize,
        keyword: String,
        photo: Photo,
    },
    /// Transient banner text (rate limit reached, offline, ...).
    Notice(String),
    Degraded,
}
