//! guardforce - security-guard workforce management.
//!
//! Guard registration, performance dashboards and a cached client over the
//! guard backend, served as a small JSON API.

pub mod api;
pub mod cache;
pub mod config;
pub mod defaults;
pub mod period;
pub mod service;
pub mod web;
pub mod wizard;
