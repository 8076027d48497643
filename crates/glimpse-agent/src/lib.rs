//! Glimpse live debugging agent.
//!
//! This crate provides:
//! - A debuglet control loop that registers with a remote debug controller,
//!   long-polls it for the active breakpoint set, and reports captures back.
//! - Breakpoint validation and installation against the host runtime's
//!   low-level debugger (via the `glimpse-inspect` facade), including
//!   source-map translation and fuzzy path resolution over a scanned tree.
//! - A bounded capture engine for non-breaking snapshots, side-effect-free
//!   watch expression evaluation, and throttled logpoints.
//!
//! The agent is embedded: the host process supplies the
//! [`glimpse_inspect::InspectorClient`] implementation for its runtime and
//! drives [`Debuglet::run`] on its executor.

pub mod api;
pub mod capture;
pub mod config;
pub mod controller;
pub mod debuglet;
pub mod error;
pub mod expr;
pub mod format;
pub mod logging;
pub mod model;
pub mod scanner;
pub mod sourcemap;
pub mod throttle;

use std::path::PathBuf;
use std::sync::Arc;

use glimpse_inspect::InspectorClient;
use regex::Regex;

pub use crate::api::DebugApi;
pub use crate::config::AgentConfig;
pub use crate::debuglet::{Debuglet, DebugletEvent, ShutdownHandle};
pub use crate::error::{AgentError, AgentResult};

/// Scan the working tree, load emitted source maps, and wire a
/// ready-to-run debuglet around the host-supplied inspector backend.
pub fn bootstrap<C: InspectorClient>(
    config: AgentConfig,
    inspector: C,
) -> AgentResult<Debuglet<C>> {
    let config = Arc::new(config);
    let scan = Arc::new(scanner::scan(&config.working_directory, &scan_regex(&config))?);

    let map_re = Regex::new(r"\.map$").expect("static regex");
    let map_files: Vec<PathBuf> = scan
        .select_stats(&map_re)
        .keys()
        .map(|path| PathBuf::from(*path))
        .collect();
    let mapper = Arc::new(sourcemap::SourceMapper::from_map_files(&map_files)?);

    let api = DebugApi::new(inspector, Arc::clone(&config), Arc::clone(&scan), mapper);
    Ok(Debuglet::new(config, api, &scan))
}

/// Files the scanner records: configured source extensions plus their
/// emitted source maps.
fn scan_regex(config: &AgentConfig) -> Regex {
    let mut alternatives: Vec<String> = config
        .source_file_extensions
        .iter()
        .map(|ext| regex::escape(ext))
        .collect();
    alternatives.push(regex::escape(".map"));
    Regex::new(&format!("(?:{})$", alternatives.join("|"))).expect("escaped extension regex")
}
