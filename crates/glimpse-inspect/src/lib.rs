//! Low-level debugger facade for the Glimpse live debugging agent.
//!
//! `glimpse-agent` consumes this crate to talk to whatever in-process
//! debugger the host runtime exposes: breakpoint insertion by script
//! location, pause notifications carrying call frames, property reads on
//! paused-object graphs, and guarded expression evaluation on a frame.
//!
//! The trait is deliberately small. Runtimes tend to ship one of two
//! debugger back-ends (a legacy API and an inspector-protocol one); the host
//! picks whichever implementation fits its runtime once at startup and the
//! agent never sees the difference.

mod mock;

use thiserror::Error;

pub use mock::MockInspectorClient;

pub type ObjectId = u64;
pub type FrameId = u64;
pub type BreakpointId = u64;

/// A value observed on a paused frame.
///
/// Compound values are represented by reference; reading their contents is a
/// separate [`InspectorClient::object_properties`] call so the capture layer
/// can bound how much of the graph it materializes.
#[derive(Clone, Debug, PartialEq)]
pub enum InspectorValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
}

impl InspectorValue {
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Self::Object(obj) => Some(obj.id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRef {
    pub id: ObjectId,
    /// Runtime class name, e.g. `Object`, `Array`, `Buffer`.
    pub class_name: String,
    pub kind: ObjectKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ObjectKind {
    Plain,
    Array { length: usize },
    Function,
}

/// One own property of a paused object, as the debugger reports it.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertySlot {
    pub name: String,
    pub read: PropertyRead,
}

/// Outcome of reading a property without running user code.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyRead {
    Value(InspectorValue),
    /// The property is backed by an accessor or native getter; reading it
    /// could run arbitrary code, so the debugger refuses.
    Accessor,
    /// The read itself threw.
    Threw(String),
}

/// A named binding (formal argument or local) on a paused frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSlot {
    pub name: String,
    pub value: InspectorValue,
}

/// One call frame delivered with a pause event. Frames arrive innermost
/// first.
#[derive(Clone, Debug, PartialEq)]
pub struct PausedFrame {
    pub id: FrameId,
    pub function_name: String,
    /// Script path as the runtime loaded it.
    pub script: String,
    /// 0-based.
    pub line: u32,
    pub column: u32,
    pub arguments: Vec<FrameSlot>,
    pub locals: Vec<FrameSlot>,
}

/// Delivered when the debuggee reaches an installed breakpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct PauseEvent {
    pub breakpoint_id: BreakpointId,
    pub frames: Vec<PausedFrame>,
}

/// Where to install a breakpoint, in the debugger's own coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct BreakpointSpec {
    pub script: String,
    /// 0-based.
    pub line: u32,
    pub column: u32,
    /// Source-language condition; the debugger only reports pauses on frames
    /// where it evaluates truthy.
    pub condition: Option<String>,
}

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("debugger session is not attached")]
    NotAttached,
    #[error("unknown low-level breakpoint id {0}")]
    UnknownBreakpoint(BreakpointId),
    #[error("invalid object id {0}")]
    InvalidObjectId(ObjectId),
    #[error("unknown frame id {0}")]
    UnknownFrame(FrameId),
    #[error("evaluation would have side effects: {0}")]
    SideEffect(String),
    #[error("evaluation failed: {0}")]
    Evaluate(String),
    #[error("debugger protocol error: {0}")]
    Protocol(String),
}

/// Minimal, mock-friendly interface over the host runtime's debugger.
///
/// All calls are synchronous: the agent runs on a single cooperative
/// execution context and the debugger delivers pause events in that same
/// context. Events are pulled with [`InspectorClient::poll_event`] rather
/// than pushed, which keeps dispatch ordering under the agent's control.
pub trait InspectorClient {
    fn set_breakpoint(&mut self, spec: &BreakpointSpec) -> Result<BreakpointId, InspectorError>;

    fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<(), InspectorError>;

    /// Own properties of a paused compound value. Array `length` is reported
    /// as an ordinary own property.
    fn object_properties(&mut self, object_id: ObjectId)
        -> Result<Vec<PropertySlot>, InspectorError>;

    /// Evaluate `expression` on a paused frame. With `throw_on_side_effect`
    /// the debugger aborts the evaluation (returning
    /// [`InspectorError::SideEffect`]) instead of letting it mutate state.
    fn evaluate_on_frame(
        &mut self,
        frame_id: FrameId,
        expression: &str,
        throw_on_side_effect: bool,
    ) -> Result<InspectorValue, InspectorError>;

    /// Next pending pause event, if any.
    fn poll_event(&mut self) -> Result<Option<PauseEvent>, InspectorError>;

    /// Number of characters the runtime prepends to every loaded source
    /// before parsing. Shifts column coordinates on line 1 only.
    fn module_wrap_prefix_len(&self) -> u32;

    fn disconnect(&mut self) -> Result<(), InspectorError>;
}
