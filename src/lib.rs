pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod photo;
pub mod server {
    pub mod proxy;
    pub mod rate_limit;
    pub mod upstream;
}
pub mod tasks {
    pub mod cache;
    pub mod fetcher;
    pub mod loader;
    pub mod slideshow;
}
