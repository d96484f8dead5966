pub mod app;
pub mod catalog;
pub mod config;
pub mod describe;
pub mod domain;
pub mod error;
pub mod harvest;
pub mod loader;
pub mod manifest;
pub mod naming;
pub mod output;
pub mod store;
