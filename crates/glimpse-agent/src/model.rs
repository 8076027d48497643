//! Controller wire model.
//!
//! These types serialize to the JSON the controller speaks: camelCase keys,
//! empty collections and unset fields omitted. The same structs double as the
//! agent's in-memory breakpoint state while a capture is being populated.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

pub const ACTION_CAPTURE: &str = "CAPTURE";
pub const ACTION_LOG: &str = "LOG";

/// What a breakpoint status refers to, mirroring the controller's enum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reference {
    #[default]
    Unspecified,
    BreakpointSourceLocation,
    BreakpointCondition,
    BreakpointExpression,
    VariableName,
    VariableValue,
}

/// Printf-like message template with `$0..$n` placeholders and a parameter
/// array, rendered client-side by the controller UI.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatMessage {
    pub format: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusMessage {
    pub is_error: bool,
    pub refers_to: Reference,
    pub description: FormatMessage,
}

impl StatusMessage {
    pub fn error(refers_to: Reference, format: impl Into<String>) -> Self {
        Self {
            is_error: true,
            refers_to,
            description: FormatMessage {
                format: format.into(),
                parameters: Vec::new(),
            },
        }
    }

    pub fn error_with_params(
        refers_to: Reference,
        format: impl Into<String>,
        parameters: Vec<String>,
    ) -> Self {
        Self {
            is_error: true,
            refers_to,
            description: FormatMessage {
                format: format.into(),
                parameters,
            },
        }
    }

    pub fn info(refers_to: Reference, format: impl Into<String>) -> Self {
        Self {
            is_error: false,
            refers_to,
            description: FormatMessage {
                format: format.into(),
                parameters: Vec::new(),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceLocation {
    pub path: String,
    /// 1-based.
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

impl SourceLocation {
    pub fn new(path: impl Into<String>, line: i64) -> Self {
        Self {
            path: path.into(),
            line,
            column: None,
        }
    }
}

/// A captured value. Compound values are shared through `var_table_index`
/// into the breakpoint's variable table, so cyclic and widely shared graphs
/// stay bounded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Variable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Variable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub var_table_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
}

impl Variable {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackFrame {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Variable>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locals: Vec<Variable>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Breakpoint {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message_format: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_final_state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack_frames: Vec<StackFrame>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evaluated_expressions: Vec<Variable>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variable_table: Vec<Variable>,
}

impl Breakpoint {
    /// The controller defaults a missing action to CAPTURE.
    pub fn action(&self) -> &str {
        self.action.as_deref().unwrap_or(ACTION_CAPTURE)
    }

    pub fn is_logpoint(&self) -> bool {
        self.action() == ACTION_LOG
    }

    pub fn has_supported_action(&self) -> bool {
        let action = self.action();
        action == ACTION_CAPTURE || action == ACTION_LOG
    }

    /// A condition of `""` or `";"` is treated as unconditional.
    pub fn effective_condition(&self) -> Option<&str> {
        match self.condition.as_deref().map(str::trim) {
            None | Some("") | Some(";") => None,
            Some(cond) => Some(cond),
        }
    }

    pub fn set_error(&mut self, status: StatusMessage) {
        self.status = Some(status);
        self.is_final_state = true;
    }
}

/// Ids are opaque; the controller may send them as JSON strings or numbers.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(i64),
    }
    Ok(match Repr::deserialize(deserializer)? {
        Repr::Str(s) => s,
        Repr::Num(n) => n.to_string(),
    })
}

/// The agent's identity, exchanged for a server-assigned id at registration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Debuggee {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub project: String,
    pub uniquifier: String,
    pub description: String,
    pub agent_version: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_contexts: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_disabled: bool,
}
