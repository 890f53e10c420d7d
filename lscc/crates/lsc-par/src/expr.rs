//! Expression parsing.
//!
//! Pratt-style with binding powers per tier, low to high:
//! `or` < `and` < comparison < additive < multiplicative < power < unary
//! < postfix. Power (`**`, `^`) is right-associative; everything else
//! binary is left-associative. Unary binds tighter than power, so
//! `-x ** 2` parses as `(-x) ** 2`.

use lsc_lex::TokenKind;

use crate::ast::{BinOp, CallExpr, CallTarget, Expr, ExprKind, UnOp};
use crate::Parser;

/// Binding power of unary prefix operators.
const UNARY_BP: u8 = 15;
/// Binding power of postfix forms (call, index, member, `++`/`--`).
const POSTFIX_BP: u8 = 17;

/// Left/right binding powers for an infix operator.
fn infix_bp(kind: &TokenKind) -> Option<(u8, u8, BinOp)> {
    let entry = match kind {
        TokenKind::Or | TokenKind::OrOr => (1, 2, BinOp::Or),
        TokenKind::And | TokenKind::AndAnd => (3, 4, BinOp::And),
        TokenKind::EqEq => (5, 6, BinOp::Eq),
        TokenKind::NotEq => (5, 6, BinOp::Ne),
        TokenKind::Lt => (5, 6, BinOp::Lt),
        TokenKind::LtEq => (5, 6, BinOp::Le),
        TokenKind::Gt => (5, 6, BinOp::Gt),
        TokenKind::GtEq => (5, 6, BinOp::Ge),
        TokenKind::Plus => (7, 8, BinOp::Add),
        TokenKind::Minus => (7, 8, BinOp::Sub),
        TokenKind::Star => (9, 10, BinOp::Mul),
        TokenKind::Slash => (9, 10, BinOp::Div),
        TokenKind::Percent => (9, 10, BinOp::Rem),
        // right-associative: right power below left
        TokenKind::StarStar | TokenKind::Caret => (13, 12, BinOp::Pow),
        _ => return None,
    };
    Some(entry)
}

impl Parser<'_> {
    /// Parse a full expression.
    pub(crate) fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Option<Expr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            match self.peek_kind().clone() {
                TokenKind::LBracket if POSTFIX_BP >= min_bp => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    let span = lhs.span.to(self.span());
                    lhs = Expr::new(
                        ExprKind::Index {
                            recv: Box::new(lhs),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::DotName(name) if POSTFIX_BP >= min_bp => {
                    self.advance();
                    if self.eat(&TokenKind::LParen) {
                        let args = self.parse_call_args()?;
                        let span = lhs.span.to(self.span());
                        lhs = Expr::new(
                            ExprKind::Method {
                                recv: Box::new(lhs),
                                name,
                                args,
                                target: CallTarget::Unresolved,
                            },
                            span,
                        );
                    } else {
                        let span = lhs.span.to(self.span());
                        lhs = Expr::new(
                            ExprKind::Field {
                                recv: Box::new(lhs),
                                name,
                                owner: None,
                            },
                            span,
                        );
                    }
                }
                TokenKind::PlusPlus if POSTFIX_BP >= min_bp => {
                    self.advance();
                    let span = lhs.span.to(self.span());
                    lhs = Expr::new(
                        ExprKind::IncDec {
                            target: Box::new(lhs),
                            inc: true,
                        },
                        span,
                    );
                }
                TokenKind::MinusMinus if POSTFIX_BP >= min_bp => {
                    self.advance();
                    let span = lhs.span.to(self.span());
                    lhs = Expr::new(
                        ExprKind::IncDec {
                            target: Box::new(lhs),
                            inc: false,
                        },
                        span,
                    );
                }
                other => {
                    let Some((lbp, rbp, op)) = infix_bp(&other) else {
                        break;
                    };
                    if lbp < min_bp {
                        break;
                    }
                    self.advance();
                    let rhs = self.parse_expr_bp(rbp)?;
                    let span = lhs.span.to(rhs.span);
                    lhs = Expr::new(
                        ExprKind::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        span,
                    );
                }
            }
        }

        Some(lhs)
    }

    fn parse_prefix(&mut self) -> Option<Expr> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_expr_bp(UNARY_BP)?;
                let span = span.to(operand.span);
                Some(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_expr_bp(UNARY_BP)?;
                let span = span.to(operand.span);
                Some(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Neg,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Plus => {
                self.advance();
                let operand = self.parse_expr_bp(UNARY_BP)?;
                let span = span.to(operand.span);
                Some(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Pos,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Spawn => {
                self.advance();
                let call = self.parse_direct_call("`spawn`")?;
                Some(Expr::new(ExprKind::Spawn(call), span.to(self.span())))
            }
            TokenKind::Await => {
                self.advance();
                let task = self.parse_expr_bp(UNARY_BP)?;
                let span = span.to(task.span);
                Some(Expr::new(
                    ExprKind::Await {
                        task: Box::new(task),
                    },
                    span,
                ))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Int(value) => {
                self.advance();
                Some(Expr::int(value, span))
            }
            TokenKind::Float(value) => {
                self.advance();
                Some(Expr::float(value, span))
            }
            TokenKind::Str(value) => {
                self.advance();
                Some(Expr::str(value, span))
            }
            TokenKind::True => {
                self.advance();
                Some(Expr::bool(true, span))
            }
            TokenKind::False => {
                self.advance();
                Some(Expr::bool(false, span))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let args = self.parse_call_args()?;
                    Some(Expr::new(
                        ExprKind::Call(CallExpr {
                            name,
                            args,
                            target: CallTarget::Unresolved,
                        }),
                        span.to(self.span()),
                    ))
                } else {
                    Some(Expr::new(ExprKind::Var(name), span))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Some(inner)
            }
            other => {
                self.syntax_error(format!(
                    "expected expression, found {}",
                    other.describe()
                ));
                None
            }
        }
    }

    /// `name(args)` required, e.g. after `spawn`.
    fn parse_direct_call(&mut self, after: &str) -> Option<CallExpr> {
        let (name, _) = self.expect_ident(&format!("function call after {}", after))?;
        self.expect(&TokenKind::LParen)?;
        let args = self.parse_call_args()?;
        Some(CallExpr {
            name,
            args,
            target: CallTarget::Unresolved,
        })
    }

    /// Arguments after a consumed `(`, consuming the closing `)`.
    pub(crate) fn parse_call_args(&mut self) -> Option<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Some(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RParen)?;
            return Some(args);
        }
    }
}
