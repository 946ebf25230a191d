//! Recursive-descent parser with precedence climbing for expressions (spec
//! §4.2). `goto`/labels are intentionally unsupported — Lua 5.1 doesn't
//! have them.

use super::ast::*;
use super::lexer::{Lexer, Tok, Token};
use crate::lua_vm::error::{LuaError, LuaErrorKind, LuaResult};
use smol_str::SmolStr;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    cur: Token,
    chunk_name: String,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, chunk_name: &str) -> LuaResult<Self> {
        let mut lexer = Lexer::new(src, chunk_name);
        let cur = lexer.next_token()?;
        Ok(Self {
            lexer,
            cur,
            chunk_name: chunk_name.to_string(),
        })
    }

    fn err(&self, msg: impl std::fmt::Display) -> LuaError {
        LuaError::new(
            LuaErrorKind::SyntaxError,
            format!("{}:{}: {}", self.chunk_name, self.cur.line, msg),
        )
    }

    fn advance(&mut self) -> LuaResult<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.cur, next))
    }

    fn check(&self, tok: &Tok) -> bool {
        &self.cur.tok == tok
    }

    fn accept(&mut self, tok: &Tok) -> LuaResult<bool> {
        if self.check(tok) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, tok: Tok) -> LuaResult<Token> {
        if self.cur.tok == tok {
            self.advance()
        } else {
            Err(self.err(format!("'{:?}' expected near '{:?}'", tok, self.cur.tok)))
        }
    }

    fn expect_name(&mut self) -> LuaResult<SmolStr> {
        match self.cur.tok.clone() {
            Tok::Name(n) => {
                self.advance()?;
                Ok(n)
            }
            _ => Err(self.err("<name> expected")),
        }
    }

    pub fn parse_chunk(&mut self) -> LuaResult<Block> {
        let block = self.parse_block()?;
        if self.cur.tok != Tok::Eof {
            return Err(self.err(format!("'<eof>' expected near '{:?}'", self.cur.tok)));
        }
        Ok(block)
    }

    fn block_follows(&self) -> bool {
        matches!(
            self.cur.tok,
            Tok::Eof | Tok::End | Tok::Else | Tok::Elseif | Tok::Until
        )
    }

    fn parse_block(&mut self) -> LuaResult<Block> {
        let mut stats = Vec::new();
        while !self.block_follows() {
            if self.check(&Tok::Return) {
                stats.push(self.parse_return()?);
                break;
            }
            if let Some(s) = self.parse_statement()? {
                stats.push(s);
            }
        }
        Ok(Block { stats })
    }

    fn parse_return(&mut self) -> LuaResult<Stat> {
        let line = self.cur.line;
        self.advance()?;
        let exprs = if self.block_follows() || self.check(&Tok::Semi) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        let _ = self.accept(&Tok::Semi)?;
        Ok(Stat { kind: StatKind::Return(exprs), line })
    }

    /// `None` for a bare `;`.
    fn parse_statement(&mut self) -> LuaResult<Option<Stat>> {
        let line = self.cur.line;
        let kind = match self.cur.tok.clone() {
            Tok::Semi => {
                self.advance()?;
                return Ok(None);
            }
            Tok::If => self.parse_if()?,
            Tok::While => self.parse_while()?,
            Tok::Do => {
                self.advance()?;
                let b = self.parse_block()?;
                self.expect(Tok::End)?;
                StatKind::Do(b)
            }
            Tok::For => self.parse_for()?,
            Tok::Repeat => self.parse_repeat()?,
            Tok::Function => self.parse_function_stat()?,
            Tok::Local => self.parse_local()?,
            Tok::Break => {
                self.advance()?;
                StatKind::Break
            }
            _ => self.parse_expr_stat()?,
        };
        Ok(Some(Stat { kind, line }))
    }

    fn parse_if(&mut self) -> LuaResult<StatKind> {
        self.advance()?;
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(Tok::Then)?;
        let body = self.parse_block()?;
        arms.push((cond, body));
        while self.check(&Tok::Elseif) {
            self.advance()?;
            let cond = self.parse_expr()?;
            self.expect(Tok::Then)?;
            let body = self.parse_block()?;
            arms.push((cond, body));
        }
        let else_block = if self.accept(&Tok::Else)? {
            Some(self.parse_block()?)
        } else {
            None
        };
        self.expect(Tok::End)?;
        Ok(StatKind::If { arms, else_block })
    }

    fn parse_while(&mut self) -> LuaResult<StatKind> {
        self.advance()?;
        let cond = self.parse_expr()?;
        self.expect(Tok::Do)?;
        let body = self.parse_block()?;
        self.expect(Tok::End)?;
        Ok(StatKind::While { cond, body })
    }

    fn parse_repeat(&mut self) -> LuaResult<StatKind> {
        self.advance()?;
        let body = self.parse_block()?;
        self.expect(Tok::Until)?;
        let cond = self.parse_expr()?;
        Ok(StatKind::Repeat { body, cond })
    }

    fn parse_for(&mut self) -> LuaResult<StatKind> {
        self.advance()?;
        let first = self.expect_name()?;
        if self.check(&Tok::Assign) {
            self.advance()?;
            let start = self.parse_expr()?;
            self.expect(Tok::Comma)?;
            let stop = self.parse_expr()?;
            let step = if self.accept(&Tok::Comma)? {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(Tok::Do)?;
            let body = self.parse_block()?;
            self.expect(Tok::End)?;
            Ok(StatKind::NumericFor { var: first, start, stop, step, body })
        } else {
            let mut names = vec![first];
            while self.accept(&Tok::Comma)? {
                names.push(self.expect_name()?);
            }
            self.expect(Tok::In)?;
            let exprs = self.parse_expr_list()?;
            self.expect(Tok::Do)?;
            let body = self.parse_block()?;
            self.expect(Tok::End)?;
            Ok(StatKind::GenericFor { names, exprs, body })
        }
    }

    fn parse_function_stat(&mut self) -> LuaResult<StatKind> {
        self.advance()?;
        let mut path = vec![self.expect_name()?];
        let mut is_method = false;
        loop {
            if self.accept(&Tok::Dot)? {
                path.push(self.expect_name()?);
            } else if self.accept(&Tok::Colon)? {
                path.push(self.expect_name()?);
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let name = path.last().cloned();
        let mut body = self.parse_func_body()?;
        body.name = name;
        if is_method {
            body.params.insert(0, SmolStr::new("self"));
        }
        Ok(StatKind::FunctionDecl { path, is_method, body })
    }

    fn parse_local(&mut self) -> LuaResult<StatKind> {
        self.advance()?;
        if self.accept(&Tok::Function)? {
            let name = self.expect_name()?;
            let mut body = self.parse_func_body()?;
            body.name = Some(name.clone());
            return Ok(StatKind::LocalFunction { name, body });
        }
        let mut names = vec![self.expect_name()?];
        while self.accept(&Tok::Comma)? {
            names.push(self.expect_name()?);
        }
        let exprs = if self.accept(&Tok::Assign)? {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        Ok(StatKind::Local { names, exprs })
    }

    fn parse_func_body(&mut self) -> LuaResult<FuncBody> {
        let line = self.cur.line;
        self.expect(Tok::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(&Tok::RParen) {
            loop {
                if self.accept(&Tok::Ellipsis)? {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.accept(&Tok::Comma)? {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;
        let block = self.parse_block()?;
        self.expect(Tok::End)?;
        Ok(FuncBody { params, is_vararg, block, line, name: None })
    }

    /// An expression-statement is either a call or the start of an
    /// assignment list; we parse one prefix expression then look at what
    /// follows to decide which.
    fn parse_expr_stat(&mut self) -> LuaResult<StatKind> {
        let first = self.parse_suffixed_expr()?;
        if self.check(&Tok::Assign) || self.check(&Tok::Comma) {
            let mut targets = vec![first];
            while self.accept(&Tok::Comma)? {
                targets.push(self.parse_suffixed_expr()?);
            }
            self.expect(Tok::Assign)?;
            let exprs = self.parse_expr_list()?;
            for t in &targets {
                if !matches!(t, Expr::Name(_) | Expr::Index(..)) {
                    return Err(self.err("syntax error: cannot assign to this expression"));
                }
            }
            Ok(StatKind::Assign { targets, exprs })
        } else {
            if !matches!(first, Expr::Call { .. }) {
                return Err(self.err("syntax error (expression used as statement)"));
            }
            Ok(StatKind::Expr(first))
        }
    }

    fn parse_expr_list(&mut self) -> LuaResult<Vec<Expr>> {
        let mut out = vec![self.parse_expr()?];
        while self.accept(&Tok::Comma)? {
            out.push(self.parse_expr()?);
        }
        Ok(out)
    }

    // ---- expressions, precedence climbing --------------------------------

    fn parse_expr(&mut self) -> LuaResult<Expr> {
        self.parse_binop_expr(0)
    }

    fn parse_binop_expr(&mut self, min_prec: u8) -> LuaResult<Expr> {
        let mut left = if let Some(op) = unop_of(&self.cur.tok) {
            let line = self.cur.line;
            self.advance()?;
            let operand = self.parse_binop_expr(UNARY_PRECEDENCE)?;
            Expr::Unop(op, Box::new(operand), line)
        } else {
            self.parse_simple_expr()?
        };

        loop {
            let Some((op, lprec, rprec)) = binop_of(&self.cur.tok) else { break };
            if lprec < min_prec {
                break;
            }
            let line = self.cur.line;
            self.advance()?;
            let right = self.parse_binop_expr(rprec)?;
            left = Expr::Binop(op, Box::new(left), Box::new(right), line);
        }
        Ok(left)
    }

    fn parse_simple_expr(&mut self) -> LuaResult<Expr> {
        let e = match self.cur.tok.clone() {
            Tok::Nil => { self.advance()?; Expr::Nil }
            Tok::True => { self.advance()?; Expr::True }
            Tok::False => { self.advance()?; Expr::False }
            Tok::Number(n) => { self.advance()?; Expr::Number(n) }
            Tok::Str(s) => { self.advance()?; Expr::Str(s) }
            Tok::Ellipsis => { self.advance()?; Expr::Vararg }
            Tok::Function => {
                self.advance()?;
                Expr::Function(Box::new(self.parse_func_body()?))
            }
            Tok::LBrace => self.parse_table()?,
            _ => self.parse_suffixed_expr()?,
        };
        Ok(e)
    }

    fn parse_primary_expr(&mut self) -> LuaResult<Expr> {
        match self.cur.tok.clone() {
            Tok::Name(n) => {
                self.advance()?;
                Ok(Expr::Name(n))
            }
            Tok::LParen => {
                self.advance()?;
                let e = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(Expr::Paren(Box::new(e)))
            }
            _ => Err(self.err(format!("unexpected symbol near '{:?}'", self.cur.tok))),
        }
    }

    fn parse_suffixed_expr(&mut self) -> LuaResult<Expr> {
        let mut e = self.parse_primary_expr()?;
        loop {
            match self.cur.tok.clone() {
                Tok::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    e = Expr::Index(Box::new(e), Box::new(Expr::Str(name.as_bytes().to_vec())));
                }
                Tok::LBracket => {
                    self.advance()?;
                    let key = self.parse_expr()?;
                    self.expect(Tok::RBracket)?;
                    e = Expr::Index(Box::new(e), Box::new(key));
                }
                Tok::Colon => {
                    let line = self.cur.line;
                    self.advance()?;
                    let method = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    e = Expr::Call { func: Box::new(e), args, method: Some(method), line };
                }
                Tok::LParen | Tok::Str(_) | Tok::LBrace => {
                    let line = self.cur.line;
                    let args = self.parse_call_args()?;
                    e = Expr::Call { func: Box::new(e), args, method: None, line };
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn parse_call_args(&mut self) -> LuaResult<Vec<Expr>> {
        match self.cur.tok.clone() {
            Tok::LParen => {
                self.advance()?;
                let args = if self.check(&Tok::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect(Tok::RParen)?;
                Ok(args)
            }
            Tok::Str(s) => {
                self.advance()?;
                Ok(vec![Expr::Str(s)])
            }
            Tok::LBrace => Ok(vec![self.parse_table()?]),
            _ => Err(self.err("function arguments expected")),
        }
    }

    fn parse_table(&mut self) -> LuaResult<Expr> {
        self.expect(Tok::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&Tok::RBrace) {
            match self.cur.tok.clone() {
                Tok::LBracket => {
                    self.advance()?;
                    let key = self.parse_expr()?;
                    self.expect(Tok::RBracket)?;
                    self.expect(Tok::Assign)?;
                    let value = self.parse_expr()?;
                    fields.push(TableField::Indexed(key, value));
                }
                Tok::Name(n) if self.peek_is_assign() => {
                    self.advance()?;
                    self.advance()?;
                    let value = self.parse_expr()?;
                    fields.push(TableField::Named(n, value));
                }
                _ => {
                    fields.push(TableField::Positional(self.parse_expr()?));
                }
            }
            if !self.accept(&Tok::Comma)? && !self.accept(&Tok::Semi)? {
                break;
            }
        }
        self.expect(Tok::RBrace)?;
        Ok(Expr::Table(fields))
    }

    /// Lookahead-by-one-more-token check for `name =` inside a table
    /// constructor, without a generic token-pushback mechanism.
    fn peek_is_assign(&mut self) -> bool {
        // The lexer only buffers `self.cur`; to look one past it we'd need
        // real lookahead-2. Table constructors are the only place that
        // needs it, so we special-case it by cloning the lexer (cheap: it's
        // just a cursor over the source slice) to peek without consuming.
        let mut probe = self.lexer.clone();
        matches!(probe.next_token(), Ok(Token { tok: Tok::Assign, .. }))
    }
}

const UNARY_PRECEDENCE: u8 = 8;

fn unop_of(tok: &Tok) -> Option<UnOp> {
    match tok {
        Tok::Minus => Some(UnOp::Neg),
        Tok::Not => Some(UnOp::Not),
        Tok::Hash => Some(UnOp::Len),
        _ => None,
    }
}

/// `(op, left-binding-power, right-binding-power)`. Right-associative
/// operators (`^`, `..`) give their right side a lower power than their
/// left so the recursive call doesn't immediately stop at the same level.
fn binop_of(tok: &Tok) -> Option<(BinOp, u8, u8)> {
    Some(match tok {
        Tok::Or => (BinOp::Or, 1, 2),
        Tok::And => (BinOp::And, 2, 3),
        Tok::Lt => (BinOp::Lt, 3, 4),
        Tok::Gt => (BinOp::Gt, 3, 4),
        Tok::Le => (BinOp::Le, 3, 4),
        Tok::Ge => (BinOp::Ge, 3, 4),
        Tok::Ne => (BinOp::Ne, 3, 4),
        Tok::Eq => (BinOp::Eq, 3, 4),
        Tok::DotDot => (BinOp::Concat, 5, 4), // right-assoc
        Tok::Plus => (BinOp::Add, 6, 7),
        Tok::Minus => (BinOp::Sub, 6, 7),
        Tok::Star => (BinOp::Mul, 7, 8),
        Tok::Slash => (BinOp::Div, 7, 8),
        Tok::Percent => (BinOp::Mod, 7, 8),
        Tok::Caret => (BinOp::Pow, 10, 9), // right-assoc, binds tighter than unary
        _ => return None,
    })
}
