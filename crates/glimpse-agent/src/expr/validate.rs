//! Side-effect validation walk.

use super::ast::{Expr, MemberProp, ObjectProp, PropKey};

/// Global functions that are safe to call from a watch expression.
const INTRINSIC_FUNCTIONS: &[&str] = &[
    "String",
    "Number",
    "Boolean",
    "BigInt",
    "isNaN",
    "isFinite",
    "parseInt",
    "parseFloat",
    "encodeURI",
    "encodeURIComponent",
    "decodeURI",
    "decodeURIComponent",
];

/// Namespaces whose every static method is read-only.
const INTRINSIC_NAMESPACES: &[&str] = &["Math"];

/// Individual read-only static methods.
const INTRINSIC_METHODS: &[(&str, &str)] = &[
    ("JSON", "stringify"),
    ("JSON", "parse"),
    ("Number", "isInteger"),
    ("Number", "isFinite"),
    ("Number", "isNaN"),
    ("Number", "isSafeInteger"),
    ("Number", "parseFloat"),
    ("Number", "parseInt"),
    ("Object", "keys"),
    ("Object", "values"),
    ("Object", "entries"),
    ("Object", "getOwnPropertyNames"),
    ("Array", "isArray"),
    ("Date", "now"),
];

/// Whether evaluating `expr` can observably mutate program state.
///
/// Property reads are allowed even though getters could run; the evaluation
/// layer re-checks at runtime with the debugger's own side-effect guard, so
/// this walk only has to catch constructs that are mutating by form.
pub fn is_side_effect_free(expr: &Expr) -> bool {
    match expr {
        Expr::Number | Expr::Str(_) | Expr::Regex | Expr::Ident(_) | Expr::This => true,
        Expr::Template { substitutions } => substitutions.iter().all(is_side_effect_free),
        Expr::Array(elements) => elements.iter().all(is_side_effect_free),
        Expr::Object(props) => props.iter().all(|prop| match prop {
            ObjectProp::KeyValue { key, value } => {
                let key_ok = match key {
                    PropKey::Static(_) => true,
                    PropKey::Computed(expr) => is_side_effect_free(expr),
                };
                key_ok && is_side_effect_free(value)
            }
            ObjectProp::Shorthand(_) => true,
            ObjectProp::Spread(expr) => is_side_effect_free(expr),
        }),
        Expr::Spread(inner) => is_side_effect_free(inner),
        Expr::Member { object, property } => {
            is_side_effect_free(object)
                && match property {
                    MemberProp::Static(_) => true,
                    MemberProp::Computed(index) => is_side_effect_free(index),
                }
        }
        Expr::Call { callee, arguments } => {
            is_read_only_callee(callee) && arguments.iter().all(is_side_effect_free)
        }
        Expr::Unary { op, operand } => op != "delete" && is_side_effect_free(operand),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            is_side_effect_free(left) && is_side_effect_free(right)
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            is_side_effect_free(test)
                && is_side_effect_free(consequent)
                && is_side_effect_free(alternate)
        }
        Expr::Sequence(exprs) => exprs.iter().all(is_side_effect_free),
        Expr::Update { .. } | Expr::Assign { .. } | Expr::New { .. } | Expr::Arrow => false,
    }
}

/// Whether a call's callee statically resolves to a read-only intrinsic.
fn is_read_only_callee(callee: &Expr) -> bool {
    match callee {
        Expr::Ident(name) => INTRINSIC_FUNCTIONS.contains(&name.as_str()),
        Expr::Member {
            object,
            property: MemberProp::Static(method),
        } => match object.as_ref() {
            Expr::Ident(namespace) => {
                INTRINSIC_NAMESPACES.contains(&namespace.as_str())
                    || INTRINSIC_METHODS
                        .contains(&(namespace.as_str(), method.as_str()))
            }
            _ => false,
        },
        _ => false,
    }
}
