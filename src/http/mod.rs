//! HTTP/1.1 parsing, resolution, and response assembly.

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod routes;

use crate::config::Config;
use std::path::PathBuf;

/// Site-level inputs to request resolution, shared read-only across the
/// event loop and all workers.
pub struct SiteContext {
    pub doc_root: PathBuf,
    pub landing_page: String,
    pub routes: routes::RouteTable,
}

impl SiteContext {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            doc_root: cfg.doc_root.clone(),
            landing_page: cfg.landing_page.clone(),
            routes: cfg.routes.clone(),
        }
    }
}
