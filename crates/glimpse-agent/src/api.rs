//! Breakpoint installation and pause dispatch.
//!
//! `DebugApi` owns the low-level debugger session. It validates incoming
//! breakpoints, resolves their source locations (source maps first, then
//! fuzzy scanner lookup), installs them, and routes pause events to the
//! per-breakpoint listener: a one-shot snapshot capture or a throttled
//! logpoint emitter.

use std::collections::HashMap;
use std::sync::Arc;

use glimpse_inspect::{
    BreakpointId as LowLevelId, BreakpointSpec, InspectorClient, PauseEvent, PausedFrame,
};
use tokio::time::Instant;

use crate::capture::{self, CaptureOutcome, CompileFn};
use crate::config::AgentConfig;
use crate::expr;
use crate::format;
use crate::model::{Breakpoint, Reference, StatusMessage};
use crate::scanner::ScanResults;
use crate::sourcemap::SourceMapper;
use crate::throttle::LogRateLimiter;

const BREAKPOINT_MALFORMED: &str = "Breakpoint is malformed: missing id, location or line";
const NOT_A_SOURCE_FILE: &str =
    "Only source files or files covered by a source map can have breakpoints: $0";
const SCRIPT_NOT_FOUND: &str = "No script matched the requested path: $0";
const SCRIPT_AMBIGUOUS: &str = "The requested path matched more than one loaded script: $0";
const LINE_OUT_OF_RANGE: &str = "Line $0 is beyond the end of $1";
const MAPPING_FAILED: &str = "The source map for $0 has no mapping for line $1";

/// Resolved by [`DebugApi::wait`] after the first hit populates a capture.
pub type SnapshotCallback = Box<dyn FnOnce(CaptureOutcome) + Send>;

struct BreakpointData {
    low_level_id: LowLevelId,
    /// Cleared after a snapshot captures; later pauses on the same
    /// low-level id are no-ops.
    active: bool,
    expressions: Vec<String>,
    log_message_format: Option<String>,
    compile: Option<CompileFn>,
}

/// Per-breakpoint listener state. A single dispatch function keyed by the
/// low-level id picks the right behavior.
enum Listener {
    Snapshot {
        callback: SnapshotCallback,
    },
    Log {
        emit: Box<dyn FnMut(String) + Send>,
        should_stop: Box<dyn Fn() -> bool + Send>,
        limiter: LogRateLimiter,
    },
}

pub struct DebugApi<C: InspectorClient> {
    inspector: C,
    config: Arc<AgentConfig>,
    scan: Arc<ScanResults>,
    mapper: Arc<SourceMapper>,
    breakpoints: HashMap<String, BreakpointData>,
    listeners: HashMap<String, Listener>,
    by_low_level: HashMap<LowLevelId, String>,
}

impl<C: InspectorClient> DebugApi<C> {
    pub fn new(
        inspector: C,
        config: Arc<AgentConfig>,
        scan: Arc<ScanResults>,
        mapper: Arc<SourceMapper>,
    ) -> Self {
        Self {
            inspector,
            config,
            scan,
            mapper,
            breakpoints: HashMap::new(),
            listeners: HashMap::new(),
            by_low_level: HashMap::new(),
        }
    }

    /// Validate and install a breakpoint. On failure the returned status
    /// describes the rejection for the controller.
    pub fn set(
        &mut self,
        bp: &Breakpoint,
        compile: Option<CompileFn>,
    ) -> Result<(), StatusMessage> {
        if bp.id.is_empty() {
            return Err(StatusMessage::error(
                Reference::Unspecified,
                BREAKPOINT_MALFORMED,
            ));
        }
        let Some(location) = bp.location.as_ref().filter(|l| l.line >= 1) else {
            return Err(StatusMessage::error(
                Reference::Unspecified,
                BREAKPOINT_MALFORMED,
            ));
        };
        if self.breakpoints.contains_key(&bp.id) {
            return Err(StatusMessage::error_with_params(
                Reference::Unspecified,
                "Breakpoint $0 is already installed",
                vec![bp.id.clone()],
            ));
        }

        if let Some(condition) = bp.effective_condition() {
            if let Err(err) = expr::analyze(condition) {
                return Err(StatusMessage::error(
                    Reference::BreakpointCondition,
                    err.to_string(),
                ));
            }
        }

        let (script, line, mut column) = self.resolve_location(location)?;
        if line == 0 {
            // The module wrapper shifts column coordinates on line 1 only.
            column += self.inspector.module_wrap_prefix_len();
        }

        let spec = BreakpointSpec {
            script,
            line,
            column,
            condition: bp.effective_condition().map(str::to_string),
        };
        let low_level_id = self.inspector.set_breakpoint(&spec).map_err(|err| {
            StatusMessage::error(Reference::BreakpointSourceLocation, err.to_string())
        })?;

        self.by_low_level.insert(low_level_id, bp.id.clone());
        self.breakpoints.insert(
            bp.id.clone(),
            BreakpointData {
                low_level_id,
                active: true,
                expressions: bp.expressions.clone(),
                log_message_format: bp.log_message_format.clone(),
                compile,
            },
        );
        tracing::debug!(id = %bp.id, line = line + 1, "breakpoint installed");
        Ok(())
    }

    /// Source map first; otherwise the scanner's exact-then-fuzzy rules plus
    /// a line-count check. Returns (script, 0-based line, 0-based column).
    fn resolve_location(
        &self,
        location: &crate::model::SourceLocation,
    ) -> Result<(String, u32, u32), StatusMessage> {
        let line0 = (location.line - 1) as u32;
        let column0 = location
            .column
            .map(|c| (c - 1).max(0) as u32)
            .unwrap_or(0);

        if self.mapper.has_mapping_info(&location.path) {
            let mapped = self
                .mapper
                .mapping_info(&location.path, line0, column0)
                .ok_or_else(|| {
                    StatusMessage::error_with_params(
                        Reference::BreakpointSourceLocation,
                        MAPPING_FAILED,
                        vec![location.path.clone(), location.line.to_string()],
                    )
                })?;
            return Ok((mapped.file, mapped.line, mapped.column));
        }

        if !self.config.has_source_extension(&location.path) {
            return Err(StatusMessage::error_with_params(
                Reference::BreakpointSourceLocation,
                NOT_A_SOURCE_FILE,
                vec![location.path.clone()],
            ));
        }

        let matches = self.scan.find_scripts(&location.path, &self.config);
        let script = match matches.as_slice() {
            [] => {
                return Err(StatusMessage::error_with_params(
                    Reference::BreakpointSourceLocation,
                    SCRIPT_NOT_FOUND,
                    vec![location.path.clone()],
                ))
            }
            [single] => single.clone(),
            _ => {
                return Err(StatusMessage::error_with_params(
                    Reference::BreakpointSourceLocation,
                    SCRIPT_AMBIGUOUS,
                    vec![location.path.clone()],
                ))
            }
        };

        if let Some(line_count) = self.scan.line_count(&script) {
            if location.line as usize > line_count {
                return Err(StatusMessage::error_with_params(
                    Reference::BreakpointSourceLocation,
                    LINE_OUT_OF_RANGE,
                    vec![location.line.to_string(), script],
                ));
            }
        }

        Ok((script, line0, column0))
    }

    /// Remove the low-level hook and every piece of local state for `id`.
    /// Clearing an unknown id is an error; clearing twice is therefore
    /// visible to the caller, but the listener is already gone.
    pub fn clear(&mut self, id: &str) -> Result<(), StatusMessage> {
        let Some(data) = self.breakpoints.remove(id) else {
            return Err(StatusMessage::error_with_params(
                Reference::Unspecified,
                "Unknown breakpoint $0",
                vec![id.to_string()],
            ));
        };
        self.by_low_level.remove(&data.low_level_id);
        self.listeners.remove(id);
        if let Err(err) = self.inspector.remove_breakpoint(data.low_level_id) {
            tracing::warn!(id, %err, "failed to remove low-level breakpoint");
        }
        Ok(())
    }

    /// Register a one-shot listener resolved with the first capture.
    pub fn wait(&mut self, id: &str, callback: SnapshotCallback) -> Result<(), StatusMessage> {
        if !self.breakpoints.contains_key(id) {
            return Err(StatusMessage::error_with_params(
                Reference::Unspecified,
                "Unknown breakpoint $0",
                vec![id.to_string()],
            ));
        }
        self.listeners
            .insert(id.to_string(), Listener::Snapshot { callback });
        Ok(())
    }

    /// Register a persistent listener that renders the breakpoint's log
    /// message on each hit, throttled by the configured per-breakpoint
    /// rate. Detaches once `should_stop` reports true.
    pub fn log(
        &mut self,
        id: &str,
        emit: Box<dyn FnMut(String) + Send>,
        should_stop: Box<dyn Fn() -> bool + Send>,
    ) -> Result<(), StatusMessage> {
        if !self.breakpoints.contains_key(id) {
            return Err(StatusMessage::error_with_params(
                Reference::Unspecified,
                "Unknown breakpoint $0",
                vec![id.to_string()],
            ));
        }
        let limiter = LogRateLimiter::new(&self.config.log, Instant::now());
        self.listeners.insert(
            id.to_string(),
            Listener::Log {
                emit,
                should_stop,
                limiter,
            },
        );
        Ok(())
    }

    /// Route a pause event to its listener.
    ///
    /// Snapshot callbacks run only after all listener and breakpoint state
    /// for the pause has been updated, so a callback that panics cannot
    /// leave the dispatch maps half-mutated.
    pub fn dispatch_pause(&mut self, event: &PauseEvent) {
        let Some(bp_id) = self.by_low_level.get(&event.breakpoint_id).cloned() else {
            tracing::debug!(low_level = event.breakpoint_id, "pause for unknown breakpoint");
            return;
        };

        match self.listeners.get(&bp_id) {
            Some(Listener::Snapshot { .. }) => self.snapshot_hit(&bp_id, event),
            Some(Listener::Log { .. }) => self.log_hit(&bp_id, event),
            None => {}
        }
    }

    fn snapshot_hit(&mut self, bp_id: &str, event: &PauseEvent) {
        let Some(data) = self.breakpoints.get_mut(bp_id) else {
            return;
        };
        if !data.active {
            return;
        }
        data.active = false;
        let expressions = data.expressions.clone();
        let compile = data.compile.take();

        let outcome = capture::capture(
            &mut self.inspector,
            &self.config.capture,
            &event.frames,
            &expressions,
            compile.as_ref(),
        );

        let Some(Listener::Snapshot { callback }) = self.listeners.remove(bp_id) else {
            return;
        };
        callback(outcome);
    }

    fn log_hit(&mut self, bp_id: &str, event: &PauseEvent) {
        let (format_template, expressions) = match self.breakpoints.get(bp_id) {
            Some(data) => (
                data.log_message_format.clone().unwrap_or_default(),
                data.expressions.clone(),
            ),
            None => return,
        };

        let stop = match self.listeners.get(bp_id) {
            Some(Listener::Log { should_stop, .. }) => should_stop(),
            _ => return,
        };
        if stop {
            self.listeners.remove(bp_id);
            return;
        }

        let allowed = match self.listeners.get_mut(bp_id) {
            Some(Listener::Log { limiter, .. }) => limiter.try_acquire(Instant::now()),
            _ => return,
        };
        if !allowed {
            return;
        }

        let top_frame = event.frames.first();
        let values: Vec<String> = expressions
            .iter()
            .map(|expression| self.evaluate_for_log(top_frame, expression))
            .collect();
        let message = format::format(&format_template, &values);

        if let Some(Listener::Log { emit, .. }) = self.listeners.get_mut(bp_id) {
            emit(message);
        }
    }

    fn evaluate_for_log(&mut self, frame: Option<&PausedFrame>, expression: &str) -> String {
        if let Err(err) = expr::analyze(expression) {
            return format!("<{err}>");
        }
        let Some(frame) = frame else {
            return "<no frame>".to_string();
        };
        match self.inspector.evaluate_on_frame(frame.id, expression, true) {
            Ok(value) => capture::render_brief(&value),
            Err(err) => format!("<{err}>"),
        }
    }

    /// Tear down the debugger session and forget all local state.
    pub fn disconnect(&mut self) {
        if let Err(err) = self.inspector.disconnect() {
            tracing::warn!(%err, "failed to disconnect debugger session");
        }
        self.breakpoints.clear();
        self.listeners.clear();
        self.by_low_level.clear();
    }

    pub fn num_breakpoints(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn num_listeners(&self) -> usize {
        self.listeners.len()
    }

    /// Drain pending pause events from the debugger and dispatch each.
    pub fn pump_events(&mut self) {
        loop {
            match self.inspector.poll_event() {
                Ok(Some(event)) => self.dispatch_pause(&event),
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!(%err, "failed to poll debugger events");
                    return;
                }
            }
        }
    }

    /// The embedding host owns the debugger backend through the api; this is
    /// how it reaches the backend (and how tests script the mock).
    pub fn inspector_mut(&mut self) -> &mut C {
        &mut self.inspector
    }
}
