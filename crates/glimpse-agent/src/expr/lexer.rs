use unicode_ident::{is_xid_continue, is_xid_start};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    Str,
    Template,
    Regex,
    Ident,
    Punct,
    Eof,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == text
    }

    pub fn is_ident(&self, text: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == text
    }
}

/// Multi-character operators, longest first so maximal munch wins.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "...", "==", "!=",
    "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "%=", "&=", "|=", "^=",
    "=>", "<<", ">>", "**",
];

/// Keywords after which `/` starts a regular expression literal rather than
/// a division.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "typeof", "void", "delete", "in", "instanceof", "new", "return", "case", "do", "else",
];

pub fn lex(input: &str) -> Vec<Token> {
    Lexer::new(input).lex()
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    prev: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            prev: None,
        }
    }

    pub fn lex(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.is_eof() {
                tokens.push(Token::new(TokenKind::Eof, ""));
                return tokens;
            }
            let token = self.next_token();
            self.prev = Some(token.clone());
            tokens.push(token);
        }
    }

    fn next_token(&mut self) -> Token {
        let b = self.peek_byte(0).unwrap_or(b'\0');
        match b {
            b'"' | b'\'' => self.scan_string(b),
            b'`' => self.scan_template(),
            b'0'..=b'9' => self.scan_number(),
            b'.' if matches!(self.peek_byte(1), Some(b'0'..=b'9')) => self.scan_number(),
            b'/' if self.regex_allowed() => self.scan_regex(),
            _ => {
                if let Some(punct) = self.scan_punct() {
                    return punct;
                }
                let c = self.peek_char();
                if c == '$' || c == '_' || is_xid_start(c) {
                    return self.scan_identifier();
                }
                self.pos += c.len_utf8();
                Token::new(TokenKind::Unknown, c.to_string())
            }
        }
    }

    fn scan_punct(&mut self) -> Option<Token> {
        let rest = &self.input[self.pos..];
        for punct in PUNCTUATORS {
            if rest.starts_with(punct) {
                self.pos += punct.len();
                return Some(Token::new(TokenKind::Punct, *punct));
            }
        }
        let b = self.peek_byte(0)?;
        if b"+-*/%<>=!&|^~?:;,()[]{}".contains(&b) {
            self.pos += 1;
            return Some(Token::new(TokenKind::Punct, (b as char).to_string()));
        }
        None
    }

    fn scan_identifier(&mut self) -> Token {
        let start = self.pos;
        while !self.is_eof() {
            let c = self.peek_char();
            if c == '$' || c == '_' || is_xid_continue(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        Token::new(TokenKind::Ident, &self.input[start..self.pos])
    }

    /// Permissive: accepts decimal, hex/octal/binary, exponents, numeric
    /// separators, and a BigInt suffix without checking digit validity.
    fn scan_number(&mut self) -> Token {
        let start = self.pos;
        let mut prev_was_exponent = false;
        while let Some(b) = self.peek_byte(0) {
            match b {
                b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' | b'x' | b'X' | b'o' | b'O' | b'n'
                | b'_' | b'.' => {
                    prev_was_exponent = b == b'e' || b == b'E';
                    self.pos += 1;
                }
                b'+' | b'-' if prev_was_exponent => {
                    prev_was_exponent = false;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        Token::new(TokenKind::Number, &self.input[start..self.pos])
    }

    fn scan_string(&mut self, quote: u8) -> Token {
        let start = self.pos;
        self.pos += 1;
        while let Some(b) = self.peek_byte(0) {
            self.pos += 1;
            if b == b'\\' {
                self.pos += self.peek_char_len();
            } else if b == quote {
                break;
            }
        }
        Token::new(TokenKind::Str, &self.input[start..self.pos])
    }

    fn scan_template(&mut self) -> Token {
        let start = self.pos;
        self.pos += 1;
        while let Some(b) = self.peek_byte(0) {
            self.pos += 1;
            if b == b'\\' {
                self.pos += self.peek_char_len();
            } else if b == b'`' {
                break;
            }
        }
        Token::new(TokenKind::Template, &self.input[start..self.pos])
    }

    fn scan_regex(&mut self) -> Token {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        while let Some(b) = self.peek_byte(0) {
            self.pos += 1;
            match b {
                b'\\' => self.pos += self.peek_char_len(),
                b'[' => in_class = true,
                b']' => in_class = false,
                b'/' if !in_class => break,
                _ => {}
            }
        }
        // Flags.
        while let Some(b) = self.peek_byte(0) {
            if b.is_ascii_alphabetic() {
                self.pos += 1;
            } else {
                break;
            }
        }
        Token::new(TokenKind::Regex, &self.input[start..self.pos])
    }

    fn regex_allowed(&self) -> bool {
        match &self.prev {
            None => true,
            Some(token) => match token.kind {
                TokenKind::Punct => !matches!(token.text.as_str(), ")" | "]" | "}"),
                TokenKind::Ident => REGEX_PRECEDING_KEYWORDS.contains(&token.text.as_str()),
                _ => false,
            },
        }
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() {
            let c = self.peek_char();
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos + offset).copied()
    }

    fn peek_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap_or('\0')
    }

    fn peek_char_len(&self) -> usize {
        self.input[self.pos..]
            .chars()
            .next()
            .map(char::len_utf8)
            .unwrap_or(0)
    }
}
