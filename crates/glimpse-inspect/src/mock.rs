use std::collections::{HashMap, VecDeque};

use crate::{
    BreakpointId, BreakpointSpec, FrameId, InspectorClient, InspectorError, InspectorValue,
    ObjectId, PauseEvent, PropertySlot,
};

/// Deterministic, in-memory debugger test double.
///
/// Tests script the world up front (objects, queued evaluation results,
/// pause events) and then assert on the calls the agent made.
#[derive(Default)]
pub struct MockInspectorClient {
    next_breakpoint_id: BreakpointId,
    installed: HashMap<BreakpointId, BreakpointSpec>,
    objects: HashMap<ObjectId, Vec<PropertySlot>>,
    evaluations: HashMap<(FrameId, String), VecDeque<Result<InspectorValue, InspectorError>>>,
    events: VecDeque<PauseEvent>,
    module_wrap_prefix_len: u32,
    disconnected: bool,
    /// Every `remove_breakpoint` call, in order.
    pub removed: Vec<BreakpointId>,
    /// Every `evaluate_on_frame` call: (frame, expression, throw_on_side_effect).
    pub eval_calls: Vec<(FrameId, String, bool)>,
}

impl MockInspectorClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_object(&mut self, object_id: ObjectId, properties: Vec<PropertySlot>) {
        self.objects.insert(object_id, properties);
    }

    pub fn set_evaluation(
        &mut self,
        frame_id: FrameId,
        expression: impl Into<String>,
        result: Result<InspectorValue, InspectorError>,
    ) {
        self.evaluations
            .entry((frame_id, expression.into()))
            .or_default()
            .push_back(result);
    }

    pub fn push_pause(&mut self, event: PauseEvent) {
        self.events.push_back(event);
    }

    pub fn set_module_wrap_prefix_len(&mut self, len: u32) {
        self.module_wrap_prefix_len = len;
    }

    pub fn installed(&self) -> &HashMap<BreakpointId, BreakpointSpec> {
        &self.installed
    }

    pub fn installed_spec(&self, id: BreakpointId) -> Option<&BreakpointSpec> {
        self.installed.get(&id)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn check_attached(&self) -> Result<(), InspectorError> {
        if self.disconnected {
            Err(InspectorError::NotAttached)
        } else {
            Ok(())
        }
    }
}

impl InspectorClient for MockInspectorClient {
    fn set_breakpoint(&mut self, spec: &BreakpointSpec) -> Result<BreakpointId, InspectorError> {
        self.check_attached()?;
        let id = self.next_breakpoint_id;
        self.next_breakpoint_id += 1;
        self.installed.insert(id, spec.clone());
        Ok(id)
    }

    fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<(), InspectorError> {
        self.check_attached()?;
        if self.installed.remove(&id).is_none() {
            return Err(InspectorError::UnknownBreakpoint(id));
        }
        self.removed.push(id);
        Ok(())
    }

    fn object_properties(
        &mut self,
        object_id: ObjectId,
    ) -> Result<Vec<PropertySlot>, InspectorError> {
        self.check_attached()?;
        self.objects
            .get(&object_id)
            .cloned()
            .ok_or(InspectorError::InvalidObjectId(object_id))
    }

    fn evaluate_on_frame(
        &mut self,
        frame_id: FrameId,
        expression: &str,
        throw_on_side_effect: bool,
    ) -> Result<InspectorValue, InspectorError> {
        self.check_attached()?;
        self.eval_calls
            .push((frame_id, expression.to_string(), throw_on_side_effect));
        let key = (frame_id, expression.to_string());
        match self.evaluations.get_mut(&key).and_then(|q| q.pop_front()) {
            Some(result) => result,
            None => Err(InspectorError::Evaluate(format!(
                "no mock evaluation result queued for `{expression}`"
            ))),
        }
    }

    fn poll_event(&mut self) -> Result<Option<PauseEvent>, InspectorError> {
        self.check_attached()?;
        Ok(self.events.pop_front())
    }

    fn module_wrap_prefix_len(&self) -> u32 {
        self.module_wrap_prefix_len
    }

    fn disconnect(&mut self) -> Result<(), InspectorError> {
        self.disconnected = true;
        self.installed.clear();
        self.events.clear();
        Ok(())
    }
}
