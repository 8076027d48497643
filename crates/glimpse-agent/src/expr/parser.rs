//! Hand-rolled expression parser.
//!
//! Parses a single expression with modern syntax (optional chaining,
//! nullish coalescing, spread, template literals) into [`Expr`]. Statement
//! keywords never parse; everything mutating parses into a node the
//! validation walk rejects.

use super::ast::{Expr, MemberProp, ObjectProp, PropKey};
use super::lexer::{lex, Token, TokenKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    fn unexpected(token: &Token) -> Self {
        let message = if token.kind == TokenKind::Eof {
            "Unexpected end of input".to_string()
        } else {
            format!("Unexpected token {}", token.text)
        };
        Self { message }
    }
}

const ASSIGN_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "%=", "&=", "|=", "^=", "<<=", ">>=", ">>>=", "**=", "&&=", "||=",
    "??=",
];

const STATEMENT_KEYWORDS: &[&str] = &[
    "function", "class", "var", "let", "const", "return", "throw", "while", "for", "if", "do",
    "try", "catch", "finally", "switch", "case", "break", "continue", "debugger", "with",
    "yield", "await", "import", "export",
];

pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser {
        tokens: lex(source),
        pos: 0,
    };
    let expr = parser.parse_sequence()?;
    if parser.peek().kind != TokenKind::Eof {
        return Err(ParseError::unexpected(parser.peek()));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat_punct(&mut self, text: &str) -> bool {
        if self.peek().is_punct(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, text: &str) -> Result<(), ParseError> {
        if self.eat_punct(text) {
            Ok(())
        } else {
            Err(ParseError::unexpected(self.peek()))
        }
    }

    fn parse_sequence(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_assign()?;
        if !self.peek().is_punct(",") {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat_punct(",") {
            exprs.push(self.parse_assign()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn parse_assign(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_conditional()?;

        if self.eat_punct("=>") {
            // Arrow body; parsed for syntax, discarded for validation.
            let _body = self.parse_assign()?;
            return Ok(Expr::Arrow);
        }

        let op = self.peek().text.clone();
        if self.peek().kind == TokenKind::Punct && ASSIGN_OPS.contains(&op.as_str()) {
            self.advance();
            let value = self.parse_assign()?;
            return Ok(Expr::Assign {
                op,
                target: Box::new(left),
                value: Box::new(value),
            });
        }
        Ok(left)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assign()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assign()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let token = self.peek();
            let op = match token.kind {
                TokenKind::Punct => token.text.clone(),
                TokenKind::Ident if token.text == "in" || token.text == "instanceof" => {
                    token.text.clone()
                }
                _ => break,
            };
            let Some((left_bp, right_bp)) = binary_binding_power(&op) else {
                break;
            };
            if left_bp < min_bp {
                break;
            }
            self.advance();
            let right = self.parse_binary(right_bp)?;
            let node = if matches!(op.as_str(), "&&" | "||" | "??") {
                Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            } else {
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            };
            left = node;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Punct if matches!(token.text.as_str(), "!" | "~" | "+" | "-") => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: token.text,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Punct if matches!(token.text.as_str(), "++" | "--") => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Update {
                    op: token.text,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Ident if matches!(token.text.as_str(), "typeof" | "void" | "delete") => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: token.text,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_call_member()?;
        while self.peek().is_punct("++") || self.peek().is_punct("--") {
            let op = self.advance().text;
            expr = Expr::Update {
                op,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, ParseError> {
        if self.peek().is_ident("new") {
            self.advance();
            let target = self.parse_call_member()?;
            return Ok(match target {
                Expr::Call { callee, arguments } => Expr::New { callee, arguments },
                other => Expr::New {
                    callee: Box::new(other),
                    arguments: Vec::new(),
                },
            });
        }

        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let name = self.expect_property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Static(name),
                };
            } else if self.eat_punct("?.") {
                if self.eat_punct("(") {
                    let arguments = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        arguments,
                    };
                } else if self.eat_punct("[") {
                    let index = self.parse_sequence()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(index)),
                    };
                } else {
                    let name = self.expect_property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Static(name),
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.parse_sequence()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Computed(Box::new(index)),
                };
            } else if self.eat_punct("(") {
                let arguments = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    arguments,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn expect_property_name(&mut self) -> Result<String, ParseError> {
        let token = self.peek().clone();
        if token.kind == TokenKind::Ident {
            self.advance();
            Ok(token.text)
        } else {
            Err(ParseError::unexpected(&token))
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut arguments = Vec::new();
        if self.eat_punct(")") {
            return Ok(arguments);
        }
        loop {
            if self.eat_punct("...") {
                arguments.push(Expr::Spread(Box::new(self.parse_assign()?)));
            } else {
                arguments.push(self.parse_assign()?);
            }
            if self.eat_punct(",") {
                if self.eat_punct(")") {
                    return Ok(arguments);
                }
                continue;
            }
            self.expect_punct(")")?;
            return Ok(arguments);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                Ok(Expr::Number)
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr::Str(token.text))
            }
            TokenKind::Regex => {
                self.advance();
                Ok(Expr::Regex)
            }
            TokenKind::Template => {
                self.advance();
                let mut substitutions = Vec::new();
                for source in template_substitutions(&token.text) {
                    substitutions.push(parse(&source)?);
                }
                Ok(Expr::Template { substitutions })
            }
            TokenKind::Ident => {
                if token.text == "this" {
                    self.advance();
                    return Ok(Expr::This);
                }
                if STATEMENT_KEYWORDS.contains(&token.text.as_str()) {
                    return Err(ParseError::unexpected(&token));
                }
                self.advance();
                Ok(Expr::Ident(token.text))
            }
            TokenKind::Punct if token.text == "(" => {
                self.advance();
                if self.eat_punct(")") {
                    // `() => body` is the only valid continuation.
                    self.expect_punct("=>")?;
                    let _body = self.parse_assign()?;
                    return Ok(Expr::Arrow);
                }
                let inner = self.parse_sequence()?;
                self.expect_punct(")")?;
                if self.eat_punct("=>") {
                    let _body = self.parse_assign()?;
                    return Ok(Expr::Arrow);
                }
                Ok(inner)
            }
            TokenKind::Punct if token.text == "[" => {
                self.advance();
                self.parse_array_literal()
            }
            TokenKind::Punct if token.text == "{" => {
                self.advance();
                self.parse_object_literal()
            }
            _ => Err(ParseError::unexpected(&token)),
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        let mut elements = Vec::new();
        loop {
            if self.eat_punct("]") {
                return Ok(Expr::Array(elements));
            }
            if self.eat_punct(",") {
                // Elision.
                continue;
            }
            if self.eat_punct("...") {
                elements.push(Expr::Spread(Box::new(self.parse_assign()?)));
            } else {
                elements.push(self.parse_assign()?);
            }
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct("]")?;
            return Ok(Expr::Array(elements));
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        let mut props = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(Expr::Object(props));
            }
            if self.eat_punct("...") {
                props.push(ObjectProp::Spread(self.parse_assign()?));
            } else {
                let token = self.peek().clone();
                let key = match token.kind {
                    TokenKind::Ident | TokenKind::Str | TokenKind::Number => {
                        self.advance();
                        PropKey::Static(token.text)
                    }
                    TokenKind::Punct if token.text == "[" => {
                        self.advance();
                        let computed = self.parse_assign()?;
                        self.expect_punct("]")?;
                        PropKey::Computed(computed)
                    }
                    _ => return Err(ParseError::unexpected(&token)),
                };
                if self.eat_punct(":") {
                    let value = self.parse_assign()?;
                    props.push(ObjectProp::KeyValue { key, value });
                } else if let PropKey::Static(name) = key {
                    props.push(ObjectProp::Shorthand(name));
                } else {
                    return Err(ParseError::unexpected(self.peek()));
                }
            }
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct("}")?;
            return Ok(Expr::Object(props));
        }
    }
}

fn binary_binding_power(op: &str) -> Option<(u8, u8)> {
    Some(match op {
        "??" => (1, 2),
        "||" => (3, 4),
        "&&" => (5, 6),
        "|" => (7, 8),
        "^" => (9, 10),
        "&" => (11, 12),
        "==" | "!=" | "===" | "!==" => (13, 14),
        "<" | ">" | "<=" | ">=" | "in" | "instanceof" => (15, 16),
        "<<" | ">>" | ">>>" => (17, 18),
        "+" | "-" => (19, 20),
        "*" | "/" | "%" => (21, 22),
        "**" => (24, 23),
        _ => return None,
    })
}

/// Extract `${...}` substitution sources from a raw template token.
fn template_substitutions(raw: &str) -> Vec<String> {
    let bytes = raw.as_bytes();
    let mut subs = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            let start = i + 2;
            let mut depth = 1usize;
            let mut j = start;
            let mut quote: Option<u8> = None;
            while j < bytes.len() && depth > 0 {
                let b = bytes[j];
                match quote {
                    Some(q) => {
                        if b == b'\\' {
                            j += 1;
                        } else if b == q {
                            quote = None;
                        }
                    }
                    None => match b {
                        b'\\' => j += 1,
                        b'\'' | b'"' | b'`' => quote = Some(b),
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        _ => {}
                    },
                }
                j += 1;
            }
            if depth == 0 {
                subs.push(raw[start..j - 1].to_string());
                i = j;
                continue;
            }
            // Unterminated substitution; take the rest so the parse fails
            // with a real error.
            subs.push(raw[start..].to_string());
            return subs;
        }
        i += 1;
    }
    subs
}
