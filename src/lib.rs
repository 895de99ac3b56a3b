pub mod app;
pub mod batch;
pub mod collections;
pub mod config;
pub mod domain;
pub mod error;
pub mod estimate;
pub mod output;
pub mod partition;
pub mod poll;
pub mod store;
pub mod tui;
