pub mod analyzer;
pub mod config;
pub mod db;
pub mod form;
pub mod input;
pub mod memory;
pub mod recommend;
pub mod theory;

/// Application name for XDG paths
pub const APP_NAME: &str = "chordform";
