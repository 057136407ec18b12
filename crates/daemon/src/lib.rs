#![forbid(unsafe_code)]

//! Gate daemon: hosts suspended pipeline-step waiters behind an HTTP API and
//! keeps them in an embedded database across restarts.

pub mod client;
pub mod config;
pub mod db;
pub mod host;
pub mod http;
pub mod jobs;
pub mod service;
