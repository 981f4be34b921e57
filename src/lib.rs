//! Vigil - Multi-threaded HTTP/1.1 Server Engine
//!
//! Core library: epoll readiness multiplexing, an explicit request-parsing
//! state machine, a worker pool running under a reactor or proactor dispatch
//! discipline, and sorted-expiry reclamation of idle connections.

pub mod auth;
pub mod config;
pub mod http;
pub mod server;
pub mod sync;
pub mod timer;
