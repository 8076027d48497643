//! Expression AST.
//!
//! Literal payloads are kept only where later passes need them (identifier
//! and member names feed the read-only-call allowlist); numeric and string
//! values are never evaluated by the agent itself.

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number,
    Str(String),
    Regex,
    Template {
        substitutions: Vec<Expr>,
    },
    Ident(String),
    This,
    Array(Vec<Expr>),
    Object(Vec<ObjectProp>),
    Spread(Box<Expr>),
    Member {
        object: Box<Expr>,
        property: MemberProp,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    /// `++`/`--`, prefix or postfix.
    Update {
        op: String,
        operand: Box<Expr>,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: String,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// Arrow functions are opaque: they are rejected wholesale, so the body
    /// is not retained.
    Arrow,
    Sequence(Vec<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum MemberProp {
    /// `obj.name` or `obj?.name`.
    Static(String),
    /// `obj[expr]`.
    Computed(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ObjectProp {
    KeyValue { key: PropKey, value: Expr },
    /// `{ name }`.
    Shorthand(String),
    /// `{ ...rest }`.
    Spread(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropKey {
    Static(String),
    Computed(Expr),
}
