pub mod config;
pub mod dashboard;
pub mod feed;
pub mod history;
pub mod models;
pub mod preferences;
pub mod snapshot;
pub mod source;
