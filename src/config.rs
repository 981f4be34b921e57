use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::routes::RouteTable;

/// Readiness-notification mode for a descriptor.
///
/// `Level` re-reports while data remains; `Edge` reports once per state
/// transition and requires draining in a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Level,
    Edge,
}

/// Which side of the engine performs socket I/O.
///
/// `Reactor`: worker threads read and write the socket themselves.
/// `Proactor`: the event-loop thread performs all I/O and workers only run
/// the parse/respond step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    Reactor,
    Proactor,
}

/// SO_LINGER behavior applied to the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linger {
    /// Kernel default: close returns immediately, data drains in background.
    Off,
    /// Reset on close, unsent data discarded.
    Abort,
    /// Close blocks up to the given number of seconds while draining.
    Wait(u32),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub port: u16,
    pub listener_trigger: TriggerMode,
    pub conn_trigger: TriggerMode,
    pub linger: Linger,
    pub workers: usize,
    pub queue_capacity: usize,
    pub discipline: Discipline,
    /// Length of one idle-timeout slot in seconds; connections expire after
    /// three slots without activity.
    pub timeslot_secs: u64,
    /// Per-connection read buffer capacity; requests larger than this are
    /// rejected by closing the connection.
    pub read_buffer: usize,
    pub max_connections: usize,
    pub doc_root: PathBuf,
    /// Target substituted for a bare `/` request.
    pub landing_page: String,
    /// YAML file holding the initial username/password table.
    pub credentials: Option<PathBuf>,
    pub routes: RouteTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9006,
            listener_trigger: TriggerMode::Level,
            conn_trigger: TriggerMode::Level,
            linger: Linger::Off,
            workers: 8,
            queue_capacity: 10_000,
            discipline: Discipline::Proactor,
            timeslot_secs: 5,
            read_buffer: 2048,
            max_connections: 1024,
            doc_root: PathBuf::from("./root"),
            landing_page: "/judge.html".to_string(),
            credentials: None,
            routes: RouteTable::default(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Address to bind; the `LISTEN` environment variable overrides the
    /// configured port.
    pub fn listen_addr(&self) -> String {
        std::env::var("LISTEN").unwrap_or_else(|_| format!("0.0.0.0:{}", self.port))
    }

    pub fn timeslot(&self) -> Duration {
        Duration::from_secs(self.timeslot_secs)
    }
}
