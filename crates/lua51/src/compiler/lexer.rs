//! Hand-written lexer for the Lua 5.1 grammar (spec §4.1). Produces one
//! token at a time; the parser drives it with one token of lookahead.

use crate::lua_vm::error::{LuaError, LuaErrorKind, LuaResult};
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    // literals
    Number(f64),
    Str(Vec<u8>),
    Name(SmolStr),
    // keywords
    And, Break, Do, Else, Elseif, End, False, For, Function, If, In,
    Local, Nil, Not, Or, Repeat, Return, Then, True, Until, While,
    // symbols
    Plus, Minus, Star, Slash, Percent, Caret, Hash,
    Eq, Ne, Le, Ge, Lt, Gt, Assign,
    LParen, RParen, LBrace, RBrace, LBracket, RBracket,
    Semi, Colon, Comma, Dot, DotDot, Ellipsis,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

#[derive(Clone)]
pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    chunk_name: String,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, chunk_name: &str) -> Self {
        let mut bytes = src.as_bytes();
        // Shebang on the first line is skipped, same as the reference `lua`
        // binary so `#!/usr/bin/env lua` scripts load unmodified.
        if bytes.starts_with(b"#") {
            if let Some(nl) = bytes.iter().position(|&b| b == b'\n') {
                bytes = &bytes[nl..];
            } else {
                bytes = &[];
            }
        }
        Self {
            src: bytes,
            pos: 0,
            line: 1,
            chunk_name: chunk_name.to_string(),
        }
    }

    fn err(&self, msg: impl std::fmt::Display) -> LuaError {
        LuaError::new(
            LuaErrorKind::LexError,
            format!("{}:{}: {}", self.chunk_name, self.line, msg),
        )
    }

    fn peek(&self) -> u8 {
        *self.src.get(self.pos).unwrap_or(&0)
    }

    fn peek_at(&self, off: usize) -> u8 {
        *self.src.get(self.pos + off).unwrap_or(&0)
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        c
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_trivia(&mut self) -> LuaResult<()> {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'-' if self.peek_at(1) == b'-' => {
                    self.pos += 2;
                    if self.peek() == b'[' {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_string(level)?;
                            continue;
                        }
                    }
                    while !self.at_end() && self.peek() != b'\n' {
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// If positioned at `[`, checks for `[=*[` and returns the equals count
    /// without consuming anything if it isn't actually a long bracket.
    fn long_bracket_level(&mut self) -> Option<usize> {
        let start = self.pos;
        if self.peek() != b'[' {
            return None;
        }
        let mut p = start + 1;
        let mut level = 0;
        while self.src.get(p) == Some(&b'=') {
            level += 1;
            p += 1;
        }
        if self.src.get(p) == Some(&b'[') {
            self.pos = p + 1;
            Some(level)
        } else {
            None
        }
    }

    fn read_long_string(&mut self, level: usize) -> LuaResult<Vec<u8>> {
        // A newline immediately after the opening bracket is not part of
        // the string.
        if self.peek() == b'\r' {
            self.advance();
            if self.peek() == b'\n' {
                self.advance();
            }
        } else if self.peek() == b'\n' {
            self.advance();
        }
        let mut out = Vec::new();
        loop {
            if self.at_end() {
                return Err(self.err("unfinished long string/comment"));
            }
            if self.peek() == b']' {
                let save = self.pos;
                self.pos += 1;
                let mut eq = 0;
                while self.peek() == b'=' {
                    eq += 1;
                    self.pos += 1;
                }
                if eq == level && self.peek() == b']' {
                    self.pos += 1;
                    return Ok(out);
                }
                self.pos = save;
                out.push(self.advance());
            } else {
                out.push(self.advance());
            }
        }
    }

    fn read_string(&mut self, quote: u8) -> LuaResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            if self.at_end() {
                return Err(self.err("unfinished string"));
            }
            let c = self.advance();
            if c == quote {
                return Ok(out);
            }
            if c == b'\n' {
                return Err(self.err("unfinished string"));
            }
            if c == b'\\' {
                let e = self.advance();
                match e {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b'v' => out.push(0x0B),
                    b'\\' => out.push(b'\\'),
                    b'"' => out.push(b'"'),
                    b'\'' => out.push(b'\''),
                    b'\n' => out.push(b'\n'),
                    b'\r' => {
                        out.push(b'\n');
                        if self.peek() == b'\n' {
                            self.advance();
                        }
                    }
                    b'x' => {
                        let mut v: u32 = 0;
                        for _ in 0..2 {
                            let d = self.peek();
                            let digit = (d as char).to_digit(16).ok_or_else(|| self.err("hexadecimal digit expected"))?;
                            v = v * 16 + digit;
                            self.advance();
                        }
                        out.push(v as u8);
                    }
                    d if d.is_ascii_digit() => {
                        let mut v: u32 = (d - b'0') as u32;
                        for _ in 0..2 {
                            if self.peek().is_ascii_digit() {
                                v = v * 10 + (self.peek() - b'0') as u32;
                                self.advance();
                            } else {
                                break;
                            }
                        }
                        if v > 255 {
                            return Err(self.err("decimal escape too large"));
                        }
                        out.push(v as u8);
                    }
                    other => return Err(self.err(format!("invalid escape sequence '\\{}'", other as char))),
                }
            } else {
                out.push(c);
            }
        }
    }

    fn read_number(&mut self) -> LuaResult<f64> {
        let start = self.pos;
        if self.peek() == b'0' && (self.peek_at(1) == b'x' || self.peek_at(1) == b'X') {
            self.pos += 2;
            while self.peek().is_ascii_hexdigit() {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.src[start + 2..self.pos]).unwrap();
            return i64::from_str_radix(text, 16)
                .map(|v| v as f64)
                .map_err(|_| self.err("malformed number"));
        }
        while self.peek().is_ascii_digit() {
            self.pos += 1;
        }
        if self.peek() == b'.' {
            self.pos += 1;
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        }
        if self.peek() == b'e' || self.peek() == b'E' {
            self.pos += 1;
            if self.peek() == b'+' || self.peek() == b'-' {
                self.pos += 1;
            }
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        text.parse::<f64>().map_err(|_| self.err("malformed number"))
    }

    pub fn next_token(&mut self) -> LuaResult<Token> {
        self.skip_trivia()?;
        let line = self.line;
        if self.at_end() {
            return Ok(Token { tok: Tok::Eof, line });
        }
        let c = self.peek();
        let tok = match c {
            b'0'..=b'9' => Tok::Number(self.read_number()?),
            b'.' if self.peek_at(1).is_ascii_digit() => Tok::Number(self.read_number()?),
            b'"' | b'\'' => {
                self.advance();
                Tok::Str(self.read_string(c)?)
            }
            b'[' if self.peek_at(1) == b'[' || self.peek_at(1) == b'=' => {
                if let Some(level) = self.long_bracket_level() {
                    Tok::Str(self.read_long_string(level)?)
                } else {
                    self.advance();
                    Tok::LBracket
                }
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let start = self.pos;
                while self.peek() == b'_' || self.peek().is_ascii_alphanumeric() {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
                keyword_or_name(text)
            }
            _ => {
                self.advance();
                match c {
                    b'+' => Tok::Plus,
                    b'-' => Tok::Minus,
                    b'*' => Tok::Star,
                    b'/' => Tok::Slash,
                    b'%' => Tok::Percent,
                    b'^' => Tok::Caret,
                    b'#' => Tok::Hash,
                    b'(' => Tok::LParen,
                    b')' => Tok::RParen,
                    b'{' => Tok::LBrace,
                    b'}' => Tok::RBrace,
                    b'[' => Tok::LBracket,
                    b']' => Tok::RBracket,
                    b';' => Tok::Semi,
                    b':' => Tok::Colon,
                    b',' => Tok::Comma,
                    b'=' => {
                        if self.peek() == b'=' {
                            self.advance();
                            Tok::Eq
                        } else {
                            Tok::Assign
                        }
                    }
                    b'~' => {
                        if self.peek() == b'=' {
                            self.advance();
                            Tok::Ne
                        } else {
                            return Err(self.err("unexpected symbol"));
                        }
                    }
                    b'<' => {
                        if self.peek() == b'=' {
                            self.advance();
                            Tok::Le
                        } else {
                            Tok::Lt
                        }
                    }
                    b'>' => {
                        if self.peek() == b'=' {
                            self.advance();
                            Tok::Ge
                        } else {
                            Tok::Gt
                        }
                    }
                    b'.' => {
                        if self.peek() == b'.' {
                            self.advance();
                            if self.peek() == b'.' {
                                self.advance();
                                Tok::Ellipsis
                            } else {
                                Tok::DotDot
                            }
                        } else {
                            Tok::Dot
                        }
                    }
                    other => return Err(self.err(format!("unexpected symbol near '{}'", other as char))),
                }
            }
        };
        Ok(Token { tok, line })
    }
}

fn keyword_or_name(text: &str) -> Tok {
    match text {
        "and" => Tok::And,
        "break" => Tok::Break,
        "do" => Tok::Do,
        "else" => Tok::Else,
        "elseif" => Tok::Elseif,
        "end" => Tok::End,
        "false" => Tok::False,
        "for" => Tok::For,
        "function" => Tok::Function,
        "if" => Tok::If,
        "in" => Tok::In,
        "local" => Tok::Local,
        "nil" => Tok::Nil,
        "not" => Tok::Not,
        "or" => Tok::Or,
        "repeat" => Tok::Repeat,
        "return" => Tok::Return,
        "then" => Tok::Then,
        "true" => Tok::True,
        "until" => Tok::Until,
        "while" => Tok::While,
        _ => Tok::Name(SmolStr::new(text)),
    }
}

/// The lexer's numeric grammar, exposed standalone for string-to-number
/// coercion (`tonumber`, arithmetic on numeric strings).
pub fn parse_lua_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (neg, rest) = match text.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok().map(|v| v as f64)
    } else {
        rest.parse::<f64>().ok()
    }?;
    Some(if neg { -value } else { value })
}
