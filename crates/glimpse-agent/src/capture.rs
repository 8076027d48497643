//! Stack and variable capture.
//!
//! Builds the bounded breakpoint payload from a paused call stack: a frame
//! list, a flat variable table holding every distinct compound value
//! exactly once, and the evaluated watch expressions. Limits come from
//! `capture` configuration and a byte budget shared between locals and
//! watches, so cyclic or enormous object graphs serialize to a bounded
//! payload.

use std::collections::HashMap;

use glimpse_inspect::{
    InspectorClient, InspectorValue, ObjectId, ObjectKind, ObjectRef, PausedFrame, PropertyRead,
};

use crate::config::CaptureConfig;
use crate::expr;
use crate::model::{Reference, SourceLocation, StackFrame, StatusMessage, Variable};

pub const MAX_DATA_SIZE_REACHED: &str = "Max data size reached";
pub const ERROR_COMPILING_EXPRESSION: &str = "Error Compiling Expression";
const ACCESSOR_NOT_CAPTURED: &str =
    "Property read could have side effects and was not captured";
const ANONYMOUS_FUNCTION: &str = "(anonymous function)";

/// Host-attached transpile hook for watch expressions in source-mapped
/// files.
pub type CompileFn = Box<dyn Fn(&str) -> Result<String, String> + Send>;

#[derive(Debug, Default)]
pub struct CaptureOutcome {
    pub stack_frames: Vec<StackFrame>,
    pub variable_table: Vec<Variable>,
    pub evaluated_expressions: Vec<Variable>,
}

/// Capture the paused stack plus watch expressions.
pub fn capture<C: InspectorClient>(
    inspector: &mut C,
    config: &CaptureConfig,
    frames: &[PausedFrame],
    expressions: &[String],
    compile: Option<&CompileFn>,
) -> CaptureOutcome {
    let mut capturer = Capturer {
        inspector,
        config,
        table: Vec::new(),
        index_by_object: HashMap::new(),
        remaining_bytes: config.max_data_size as i64,
    };

    let stack_frames = capturer.resolve_frames(frames);
    let evaluated_expressions =
        capturer.resolve_expressions(frames.first(), expressions, compile);

    CaptureOutcome {
        stack_frames,
        variable_table: capturer.table,
        evaluated_expressions,
    }
}

struct Capturer<'a, C: InspectorClient> {
    inspector: &'a mut C,
    config: &'a CaptureConfig,
    table: Vec<Variable>,
    index_by_object: HashMap<ObjectId, usize>,
    remaining_bytes: i64,
}

impl<C: InspectorClient> Capturer<'_, C> {
    fn resolve_frames(&mut self, frames: &[PausedFrame]) -> Vec<StackFrame> {
        frames
            .iter()
            .take(self.config.max_frames)
            .enumerate()
            .map(|(index, frame)| {
                if index < self.config.max_expand_frames {
                    self.resolve_frame(frame)
                } else {
                    self.stub_frame(frame)
                }
            })
            .collect()
    }

    fn resolve_frame(&mut self, frame: &PausedFrame) -> StackFrame {
        let arguments = self.resolve_slots(&frame.arguments);
        let locals = self.resolve_slots(&frame.locals);
        StackFrame {
            function: function_name(frame),
            location: Some(SourceLocation::new(
                frame.script.clone(),
                i64::from(frame.line) + 1,
            )),
            arguments,
            locals,
        }
    }

    /// Frames past the expansion cutoff only report where they are.
    fn stub_frame(&self, frame: &PausedFrame) -> StackFrame {
        let message = format!(
            "Locals and arguments are only displayed for the top \
             `config.capture.maxExpandFrames={}` stack frames.",
            self.config.max_expand_frames
        );
        let stub = |name: &str| Variable {
            name: Some(name.to_string()),
            status: Some(StatusMessage::info(
                Reference::BreakpointSourceLocation,
                message.clone(),
            )),
            ..Variable::default()
        };
        StackFrame {
            function: function_name(frame),
            location: Some(SourceLocation::new(
                frame.script.clone(),
                i64::from(frame.line) + 1,
            )),
            arguments: vec![stub("arguments")],
            locals: vec![stub("locals")],
        }
    }

    fn resolve_expressions(
        &mut self,
        top_frame: Option<&PausedFrame>,
        expressions: &[String],
        compile: Option<&CompileFn>,
    ) -> Vec<Variable> {
        expressions
            .iter()
            .map(|expression| self.resolve_expression(top_frame, expression, compile))
            .collect()
    }

    fn resolve_expression(
        &mut self,
        top_frame: Option<&PausedFrame>,
        expression: &str,
        compile: Option<&CompileFn>,
    ) -> Variable {
        let mut result = Variable::named(expression);

        let compiled = match compile {
            Some(compile) => match compile(expression) {
                Ok(compiled) => compiled,
                Err(_) => {
                    result.status = Some(StatusMessage::error(
                        Reference::BreakpointExpression,
                        ERROR_COMPILING_EXPRESSION,
                    ));
                    return result;
                }
            },
            None => expression.to_string(),
        };

        if let Err(err) = expr::analyze(&compiled) {
            result.status = Some(StatusMessage::error(
                Reference::BreakpointExpression,
                err.to_string(),
            ));
            return result;
        }

        let Some(frame) = top_frame else {
            result.status = Some(StatusMessage::error(
                Reference::BreakpointExpression,
                "No frame to evaluate on",
            ));
            return result;
        };

        match self.inspector.evaluate_on_frame(frame.id, &compiled, true) {
            Ok(value) => self.resolve_watch_value(expression, &value),
            Err(err) => {
                result.status = Some(StatusMessage::error(
                    Reference::VariableValue,
                    err.to_string(),
                ));
                result
            }
        }
    }

    /// Watch results are deliberately less bounded than locals: the value is
    /// not string-truncated and the top-level compound is not capped by
    /// `max_properties`, so users can drill into exactly what they asked
    /// for. Descendants and the byte budget still apply.
    fn resolve_watch_value(&mut self, name: &str, value: &InspectorValue) -> Variable {
        match value {
            InspectorValue::Object(obj) => {
                let members = self.resolve_members(obj, true);
                let mut variable = Variable::named(name);
                variable.var_type = Some(obj.class_name.clone());
                variable.members = members;
                variable
            }
            primitive => {
                let mut variable = self.resolve_primitive(Some(name.to_string()), primitive, false);
                self.charge(&variable);
                variable
            }
        }
    }

    fn resolve_value(&mut self, name: Option<String>, value: &InspectorValue) -> Variable {
        match value {
            InspectorValue::Object(obj) => {
                let index = self.intern_object(obj);
                let mut variable = Variable {
                    name,
                    var_table_index: Some(index),
                    ..Variable::default()
                };
                if let Some(hint) = length_hint(obj) {
                    variable.value = Some(hint);
                }
                variable
            }
            primitive => self.resolve_primitive(name, primitive, true),
        }
    }

    fn resolve_primitive(
        &mut self,
        name: Option<String>,
        value: &InspectorValue,
        truncate: bool,
    ) -> Variable {
        let mut variable = Variable {
            name,
            ..Variable::default()
        };
        match value {
            InspectorValue::Undefined => {
                variable.value = Some("undefined".to_string());
                variable.var_type = Some("undefined".to_string());
            }
            InspectorValue::Null => {
                variable.value = Some("null".to_string());
                variable.var_type = Some("null".to_string());
            }
            InspectorValue::Boolean(b) => {
                variable.value = Some(b.to_string());
                variable.var_type = Some("boolean".to_string());
            }
            InspectorValue::Number(n) => {
                variable.value = Some(format_number(*n));
                variable.var_type = Some("number".to_string());
            }
            InspectorValue::String(s) => {
                let max = self.config.max_string_length;
                if truncate && s.chars().count() > max {
                    let truncated: String = s.chars().take(max).collect();
                    variable.value = Some(format!("{truncated}..."));
                    variable.status = Some(StatusMessage::info(
                        Reference::VariableValue,
                        format!(
                            "Only first `config.capture.maxStringLength={max}` chars were \
                             captured for string of length {}. Use in an expression to see the \
                             full string.",
                            s.chars().count()
                        ),
                    ));
                } else {
                    variable.value = Some(s.clone());
                }
                variable.var_type = Some("string".to_string());
            }
            InspectorValue::Object(_) => unreachable!("compounds handled by resolve_value"),
        }
        variable
    }

    /// Place a compound in the variable table exactly once; the index is the
    /// stable handle every reference shares. The placeholder is pushed
    /// before children resolve so cycles terminate.
    fn intern_object(&mut self, obj: &ObjectRef) -> usize {
        if let Some(&index) = self.index_by_object.get(&obj.id) {
            return index;
        }
        let index = self.table.len();
        self.table.push(Variable {
            var_type: Some(obj.class_name.clone()),
            ..Variable::default()
        });
        self.index_by_object.insert(obj.id, index);

        let members = self.resolve_members(obj, false);
        self.table[index].members = members;
        index
    }

    fn resolve_members(&mut self, obj: &ObjectRef, unlimited: bool) -> Vec<Variable> {
        let properties = match self.inspector.object_properties(obj.id) {
            Ok(properties) => properties,
            Err(err) => {
                return vec![Variable {
                    status: Some(StatusMessage::error(
                        Reference::VariableValue,
                        err.to_string(),
                    )),
                    ..Variable::default()
                }];
            }
        };

        let max = if unlimited {
            usize::MAX
        } else {
            self.config.max_properties
        };
        let total = properties.len();
        let mut members = Vec::new();

        for property in properties.iter().take(max) {
            if self.remaining_bytes < 0 {
                self.mark_budget_exhausted(obj);
                return members;
            }
            let member = match &property.read {
                PropertyRead::Value(value) => {
                    self.resolve_value(Some(property.name.clone()), value)
                }
                PropertyRead::Accessor => Variable {
                    name: Some(property.name.clone()),
                    status: Some(StatusMessage::error(
                        Reference::VariableValue,
                        ACCESSOR_NOT_CAPTURED,
                    )),
                    ..Variable::default()
                },
                PropertyRead::Threw(message) => Variable {
                    name: Some(property.name.clone()),
                    status: Some(StatusMessage::error(
                        Reference::VariableValue,
                        message.clone(),
                    )),
                    ..Variable::default()
                },
            };
            self.charge(&member);
            members.push(member);
        }

        if total > max {
            members.push(Variable::named(format!(
                "Only first {max} of {total} items (config.capture.maxProperties={max})"
            )));
        }
        members
    }

    fn mark_budget_exhausted(&mut self, obj: &ObjectRef) {
        if let Some(&index) = self.index_by_object.get(&obj.id) {
            self.table[index].status = Some(StatusMessage::error(
                Reference::VariableValue,
                MAX_DATA_SIZE_REACHED,
            ));
        }
    }

    fn resolve_slots(&mut self, slots: &[glimpse_inspect::FrameSlot]) -> Vec<Variable> {
        slots
            .iter()
            .map(|slot| {
                let variable = self.resolve_value(Some(slot.name.clone()), &slot.value);
                self.charge(&variable);
                variable
            })
            .collect()
    }

    fn charge(&mut self, variable: &Variable) {
        let mut cost = 0usize;
        if let Some(name) = &variable.name {
            cost += name.len();
        }
        if let Some(value) = &variable.value {
            cost += value.len();
        }
        self.remaining_bytes -= cost as i64;
    }
}

fn function_name(frame: &PausedFrame) -> String {
    if frame.function_name.is_empty() {
        ANONYMOUS_FUNCTION.to_string()
    } else {
        frame.function_name.clone()
    }
}

/// Arrays render their length inline so a collapsed entry is still useful.
fn length_hint(obj: &ObjectRef) -> Option<String> {
    match obj.kind {
        ObjectKind::Array { length } => Some(format!("Array({length})")),
        _ => None,
    }
}

/// One-line rendering used by logpoint messages, where there is no variable
/// table to reference into.
pub(crate) fn render_brief(value: &InspectorValue) -> String {
    match value {
        InspectorValue::Undefined => "undefined".to_string(),
        InspectorValue::Null => "null".to_string(),
        InspectorValue::Boolean(b) => b.to_string(),
        InspectorValue::Number(n) => format_number(*n),
        InspectorValue::String(s) => s.clone(),
        InspectorValue::Object(obj) => match obj.kind {
            ObjectKind::Array { length } => format!("Array({length})"),
            _ => obj.class_name.clone(),
        },
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return format!("{}", n as i64);
    }
    format!("{n}")
}
