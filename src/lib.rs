pub mod canonical;
pub mod catalog;
pub mod compare;
pub mod config;
pub mod jobs;
pub mod library;
pub mod matcher;
pub mod models;
pub mod scanner;
pub mod store;

/// Audio file extensions we scan and download
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "aif", "aiff", "m4a", "aac", "ogg", "opus", "wv", "ape",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "tracksync";
