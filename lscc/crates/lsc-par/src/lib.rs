//! lsc-par - Parser (syntactic analyzer).
//!
//! Recursive descent over the token stream with a Pratt expression parser
//! (see `expr.rs`). Each source file parses to a [`Module`](ast::Module);
//! the driver merges them into one translation unit in command-line order.
//!
//! Newlines terminate statements. Blocks are `do … end`; `if` arms may end
//! at `elif`/`else`. On a syntax error the parser reports and skips to the
//! next statement terminator (or `end`), so several errors surface per run.

pub mod ast;
mod expr;
mod items;

use lsc_lex::{Token, TokenKind};
use lsc_util::{ErrorKind, Handler, Interner, Span, Symbol};

use ast::{AssignOp, Block, Expr, ExprKind, ForLoop, IfArm, Marker, Module, Stmt, StmtKind};

/// Contextual words that are not keywords but carry meaning in position.
pub(crate) struct Contextual {
    pub owned: Symbol,
    pub step: Symbol,
    pub constructor: Symbol,
    pub flag: Symbol,
    pub format: Symbol,
    pub free_console: Symbol,
    pub state_speed: Symbol,
}

/// The LineScript parser.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    handler: &'a Handler,
    pub(crate) interner: &'a mut Interner,
    pub(crate) ctx: Contextual,
}

impl<'a> Parser<'a> {
    /// Create a parser over a token stream (must end in `Eof`).
    pub fn new(tokens: Vec<Token>, handler: &'a Handler, interner: &'a mut Interner) -> Self {
        let ctx = Contextual {
            owned: interner.intern("owned"),
            step: interner.intern("step"),
            constructor: interner.intern("constructor"),
            flag: interner.intern("flag"),
            format: interner.intern("format"),
            free_console: interner.intern("freeConsole"),
            state_speed: interner.intern("stateSpeed"),
        };
        Self {
            tokens,
            pos: 0,
            handler,
            interner,
            ctx,
        }
    }

    /// Parse the whole file.
    pub fn parse(mut self) -> Module {
        let mut items = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            let before = self.pos;
            if let Some(item) = self.parse_item() {
                items.push(item);
            }
            // Recovery must always make progress.
            if self.pos == before {
                self.advance();
            }
            self.skip_newlines();
        }
        Module { items }
    }

    // ------------------------------------------------------------------
    // Token access
    // ------------------------------------------------------------------

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    pub(crate) fn nth_kind(&self, n: usize) -> &TokenKind {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    pub(crate) fn span(&self) -> Span {
        self.peek().span
    }

    pub(crate) fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume a token of the given kind or report a syntax error.
    pub(crate) fn expect(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            self.syntax_error(format!(
                "expected {}, found {}",
                kind.describe(),
                self.peek_kind().describe()
            ));
            None
        }
    }

    /// Consume an identifier, returning its symbol.
    pub(crate) fn expect_ident(&mut self, what: &str) -> Option<(Symbol, Span)> {
        match self.peek_kind() {
            TokenKind::Ident(sym) => {
                let sym = *sym;
                let span = self.span();
                self.advance();
                Some((sym, span))
            }
            other => {
                let msg = format!("expected {}, found {}", what, other.describe());
                self.syntax_error(msg);
                None
            }
        }
    }

    pub(crate) fn syntax_error(&self, message: String) {
        self.handler.error(ErrorKind::Syntax, self.span(), message);
    }

    pub(crate) fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    /// Local recovery: skip to the next statement terminator or block edge.
    pub(crate) fn recover(&mut self) {
        loop {
            match self.peek_kind() {
                TokenKind::Newline => {
                    self.advance();
                    return;
                }
                TokenKind::End | TokenKind::Elif | TokenKind::Else | TokenKind::Eof => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// After a statement: newline (consumed) or a block edge (left alone).
    fn expect_terminator(&mut self) {
        match self.peek_kind() {
            TokenKind::Newline => {
                self.skip_newlines();
            }
            TokenKind::End | TokenKind::Elif | TokenKind::Else | TokenKind::Eof => {}
            other => {
                self.syntax_error(format!(
                    "expected end of line after statement, found {}",
                    other.describe()
                ));
                self.recover();
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parse statements until one of the stop tokens; consumes nothing
    /// past the stop token itself.
    pub(crate) fn parse_block_until(&mut self, stops: &[TokenKind]) -> Block {
        let start = self.span();
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if stops.iter().any(|s| self.check(s)) {
                break;
            }
            if self.at_eof() {
                self.syntax_error("missing `end`".to_string());
                break;
            }
            let before = self.pos;
            if let Some(stmt) = self.parse_stmt() {
                stmts.push(stmt);
                self.expect_terminator();
            } else if self.pos == before {
                self.advance();
            }
        }
        let span = start.to(self.span());
        Block { stmts, span }
    }

    /// Parse a `do … end` block, consuming both delimiters.
    pub(crate) fn parse_do_block(&mut self) -> Block {
        self.expect(&TokenKind::Do);
        let block = self.parse_block_until(&[TokenKind::End]);
        self.expect(&TokenKind::End);
        block
    }

    pub(crate) fn parse_stmt(&mut self) -> Option<Stmt> {
        let start = self.span();
        match self.peek_kind().clone() {
            TokenKind::Declare => self.parse_declare(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(false),
            TokenKind::Parallel => {
                self.advance();
                if !self.check(&TokenKind::For) {
                    self.syntax_error("expected `for` after `parallel`".to_string());
                    self.recover();
                    return None;
                }
                self.parse_for(true)
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.stmt_boundary() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Some(Stmt::new(
                    StmtKind::Return {
                        value,
                        releases: Vec::new(),
                    },
                    start.to(self.span()),
                ))
            }
            TokenKind::Break => {
                self.advance();
                Some(Stmt::new(
                    StmtKind::Break {
                        releases: Vec::new(),
                    },
                    start,
                ))
            }
            TokenKind::Continue => {
                self.advance();
                Some(Stmt::new(
                    StmtKind::Continue {
                        releases: Vec::new(),
                    },
                    start,
                ))
            }
            TokenKind::DotName(sym) => self.parse_marker(sym),
            _ => self.parse_expr_or_assign(),
        }
    }

    fn stmt_boundary(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::End | TokenKind::Elif | TokenKind::Else | TokenKind::Eof
        )
    }

    /// `declare [const] [owned] name[: type] [= expr]`
    fn parse_declare(&mut self) -> Option<Stmt> {
        let start = self.span();
        self.advance(); // declare
        let is_const = self.eat(&TokenKind::Const);

        // `owned` is contextual: it is the modifier only when another
        // identifier follows.
        let mut is_owned = false;
        if let TokenKind::Ident(sym) = self.peek_kind() {
            if *sym == self.ctx.owned && matches!(self.nth_kind(1), TokenKind::Ident(_)) {
                is_owned = true;
                self.advance();
            }
        }

        let (name, name_span) = self.expect_ident("variable name")?;

        let ty = if self.eat(&TokenKind::Colon) {
            self.parse_type()?
        } else {
            ast::Ty::Unresolved
        };

        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        if ty == ast::Ty::Unresolved && init.is_none() {
            self.handler.error(
                ErrorKind::Syntax,
                name_span,
                "declaration needs a type annotation or an initializer".to_string(),
            );
            return None;
        }

        Some(Stmt::new(
            StmtKind::Declare {
                name,
                ty,
                init,
                is_const,
                is_owned,
            },
            start.to(self.span()),
        ))
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let start = self.span();
        self.advance(); // if
        let mut arms = Vec::new();

        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Do);
        let body = self.parse_block_until(&[TokenKind::Elif, TokenKind::Else, TokenKind::End]);
        arms.push(IfArm { cond, body });

        while self.eat(&TokenKind::Elif) {
            let cond = self.parse_expr()?;
            self.expect(&TokenKind::Do);
            let body = self.parse_block_until(&[TokenKind::Elif, TokenKind::Else, TokenKind::End]);
            arms.push(IfArm { cond, body });
        }

        let else_block = if self.eat(&TokenKind::Else) {
            self.eat(&TokenKind::Do);
            Some(self.parse_block_until(&[TokenKind::End]))
        } else {
            None
        };

        self.expect(&TokenKind::End);
        Some(Stmt::new(
            StmtKind::If { arms, else_block },
            start.to(self.span()),
        ))
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let start = self.span();
        self.advance(); // while
        let cond = self.parse_expr()?;
        let body = self.parse_do_block();
        Some(Stmt::new(
            StmtKind::While { cond, body },
            start.to(self.span()),
        ))
    }

    /// `for var in start..end [step expr] do … end`
    fn parse_for(&mut self, parallel: bool) -> Option<Stmt> {
        let start = self.span();
        self.advance(); // for
        let (var, _) = self.expect_ident("loop variable")?;
        self.expect(&TokenKind::In)?;
        let range_start = self.parse_expr()?;
        if !self.eat(&TokenKind::DotDot) {
            self.syntax_error(format!(
                "malformed range: expected `..`, found {}",
                self.peek_kind().describe()
            ));
            self.recover();
            return None;
        }
        let range_end = self.parse_expr()?;

        let mut step = None;
        if let TokenKind::Ident(sym) = self.peek_kind() {
            if *sym == self.ctx.step {
                self.advance();
                step = Some(self.parse_expr()?);
            }
        }

        let body = self.parse_do_block();
        Some(Stmt::new(
            StmtKind::For(ForLoop {
                var,
                start: range_start,
                end: range_end,
                step,
                parallel,
                body,
            }),
            start.to(self.span()),
        ))
    }

    /// Scoped marker statement: `.format()`, `.freeConsole()`, `.stateSpeed()`.
    fn parse_marker(&mut self, sym: Symbol) -> Option<Stmt> {
        let start = self.span();
        let marker = if sym == self.ctx.format {
            Marker::Format
        } else if sym == self.ctx.free_console {
            Marker::FreeConsole
        } else if sym == self.ctx.state_speed {
            Marker::StateSpeed
        } else {
            self.syntax_error(format!(
                "unknown scoped marker `.{}`",
                self.interner.resolve(sym)
            ));
            self.recover();
            return None;
        };
        self.advance(); // the dotted name
        self.expect(&TokenKind::LParen)?;
        self.expect(&TokenKind::RParen)?;
        Some(Stmt::new(StmtKind::Marker(marker), start.to(self.span())))
    }

    /// Expression statement, assignment, or compound assignment.
    fn parse_expr_or_assign(&mut self) -> Option<Stmt> {
        let start = self.span();
        let expr = match self.parse_expr() {
            Some(expr) => expr,
            None => {
                self.recover();
                return None;
            }
        };

        let op = match self.peek_kind() {
            TokenKind::Assign => Some(AssignOp::Set),
            TokenKind::PlusEq => Some(AssignOp::Add),
            TokenKind::MinusEq => Some(AssignOp::Sub),
            TokenKind::StarEq => Some(AssignOp::Mul),
            TokenKind::SlashEq => Some(AssignOp::Div),
            TokenKind::PercentEq => Some(AssignOp::Rem),
            TokenKind::CaretEq | TokenKind::StarStarEq => Some(AssignOp::Pow),
            _ => None,
        };

        if let Some(op) = op {
            if !is_assignable(&expr) {
                self.syntax_error("invalid assignment target".to_string());
            }
            self.advance();
            let value = self.parse_expr()?;
            return Some(Stmt::new(
                StmtKind::Assign {
                    target: expr,
                    op,
                    value,
                },
                start.to(self.span()),
            ));
        }

        Some(Stmt::new(StmtKind::Expr(expr), start.to(self.span())))
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Var(_) | ExprKind::Field { .. } | ExprKind::Index { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Item, Ty};
    use lsc_util::FileId;

    pub(crate) fn parse_source(source: &str) -> (Module, Handler, Interner) {
        let handler = Handler::new();
        let mut interner = Interner::new();
        let tokens = lsc_lex::tokenize(source, FileId(0), &handler, &mut interner);
        let module = Parser::new(tokens, &handler, &mut interner).parse();
        (module, handler, interner)
    }

    fn parse_ok(source: &str) -> Module {
        let (module, handler, _) = parse_source(source);
        assert!(
            !handler.has_errors(),
            "unexpected errors: {:?}",
            handler.diagnostics()
        );
        module
    }

    #[test]
    fn test_declare_with_init() {
        let module = parse_ok("declare x = 1\n");
        assert_eq!(module.items.len(), 1);
        match &module.items[0] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::Declare { ty, init, .. } => {
                    assert_eq!(*ty, Ty::Unresolved);
                    assert!(init.is_some());
                }
                other => panic!("expected declare, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_declare_const_owned() {
        let module = parse_ok("declare const owned h: handle = array_new()\n");
        match &module.items[0] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::Declare {
                    is_const, is_owned, ..
                } => {
                    assert!(*is_const);
                    assert!(*is_owned);
                }
                other => panic!("expected declare, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_declare_without_type_or_init_is_error() {
        let (_, handler, _) = parse_source("declare x\n");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_owned_as_plain_variable_name() {
        // `owned` is contextual: here it is the variable itself.
        let module = parse_ok("declare owned = 2\n");
        match &module.items[0] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::Declare { is_owned, .. } => assert!(!*is_owned),
                other => panic!("expected declare, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_single_line_for() {
        let module = parse_ok("declare s=0\nfor i in 0..5 do s+=i end\n");
        assert_eq!(module.items.len(), 2);
        match &module.items[1] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::For(fl) => {
                    assert!(!fl.parallel);
                    assert!(fl.step.is_none());
                    assert_eq!(fl.body.stmts.len(), 1);
                }
                other => panic!("expected for, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_for_with_step_and_parallel() {
        let module = parse_ok("parallel for i in 0..10 step 2 do\nprint(i)\nend\n");
        match &module.items[0] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::For(fl) => {
                    assert!(fl.parallel);
                    assert!(fl.step.is_some());
                }
                other => panic!("expected for, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_range() {
        let (_, handler, _) = parse_source("for i in 0 do end\n");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_if_elif_else() {
        let module = parse_ok("if a do\nb()\nelif c do\nd()\nelse\ne()\nend\n");
        match &module.items[0] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::If { arms, else_block } => {
                    assert_eq!(arms.len(), 2);
                    assert!(else_block.is_some());
                }
                other => panic!("expected if, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_markers() {
        let module = parse_ok(".format()\n.stateSpeed()\n.freeConsole()\n");
        let kinds: Vec<_> = module
            .items
            .iter()
            .map(|item| match item {
                Item::Stmt(stmt) => match &stmt.kind {
                    StmtKind::Marker(m) => *m,
                    other => panic!("expected marker, got {:?}", other),
                },
                other => panic!("expected statement, got {:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![Marker::Format, Marker::StateSpeed, Marker::FreeConsole]
        );
    }

    #[test]
    fn test_unknown_marker_is_error() {
        let (_, handler, _) = parse_source(".bogus()\n");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_compound_assignment() {
        let module = parse_ok("x **= 10\n");
        match &module.items[0] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::Assign { op, .. } => assert_eq!(*op, AssignOp::Pow),
                other => panic!("expected assignment, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_to_literal_is_error() {
        let (_, handler, _) = parse_source("3 = 4\n");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_recovery_reports_multiple_errors() {
        let (_, handler, _) = parse_source("declare = 1\ndeclare = 2\n");
        assert!(handler.error_count() >= 2);
    }

    #[test]
    fn test_missing_end() {
        let (_, handler, _) = parse_source("while true do\nx = 1\n");
        assert!(handler.has_errors());
    }
}
