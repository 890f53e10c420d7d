//! Item parsing: functions, script flags, and classes.

use lsc_lex::TokenKind;
use lsc_util::{ErrorKind, FxHashMap, Span, Symbol};

use crate::ast::{
    Access, ClassDecl, CtorDecl, Dispatch, FieldDecl, FnDecl, Item, MethodDecl, Param, Ty,
};
use crate::Parser;

impl Parser<'_> {
    /// Parse one top-level item.
    ///
    /// Top-level statements are permitted and form the implicit entry.
    /// A leading `ident (` is a function declaration only when the token
    /// after the parameter list is `->`, `throws`, or `do`; otherwise it
    /// is a call statement.
    pub(crate) fn parse_item(&mut self) -> Option<Item> {
        match self.peek_kind().clone() {
            TokenKind::Fn | TokenKind::Func => {
                self.advance();
                self.parse_function(false).map(Item::Function)
            }
            TokenKind::Class => self.parse_class().map(Item::Class),
            TokenKind::Ident(sym)
                if sym == self.ctx.flag
                    && matches!(self.nth_kind(1), TokenKind::Ident(_))
                    && matches!(self.nth_kind(2), TokenKind::LParen) =>
            {
                self.advance(); // `flag`
                self.parse_function(true).map(Item::Function)
            }
            TokenKind::Ident(_)
                if matches!(self.nth_kind(1), TokenKind::LParen) && self.looks_like_fn_decl() =>
            {
                self.parse_function(false).map(Item::Function)
            }
            _ => {
                let stmt = self.parse_stmt()?;
                self.finish_top_level_stmt();
                Some(Item::Stmt(stmt))
            }
        }
    }

    fn finish_top_level_stmt(&mut self) {
        match self.peek_kind() {
            TokenKind::Newline | TokenKind::Eof => {
                self.skip_newlines();
            }
            other => {
                self.syntax_error(format!(
                    "expected end of line after statement, found {}",
                    other.describe()
                ));
                self.recover();
            }
        }
    }

    /// Scan past `ident ( … )` and check for `->`, `throws`, or `do`.
    fn looks_like_fn_decl(&self) -> bool {
        let mut i = 2; // past `ident` `(`
        let mut depth = 1usize;
        loop {
            match self.nth_kind(i) {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.nth_kind(i + 1),
                            TokenKind::Arrow | TokenKind::Throws | TokenKind::Do
                        );
                    }
                }
                TokenKind::Newline | TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
    }

    /// `name(params) [-> ret] [throws E1, E2] do … end`
    ///
    /// The `fn`/`func` (or contextual `flag`) keyword has already been
    /// consumed when present.
    pub(crate) fn parse_function(&mut self, is_flag: bool) -> Option<FnDecl> {
        let start = self.span();
        let (name, _) = self.expect_ident("function name")?;
        self.expect(&TokenKind::LParen)?;
        let params = self.parse_params()?;

        let ret = if self.eat(&TokenKind::Arrow) {
            self.parse_type()?
        } else {
            Ty::Void
        };

        let mut throws = Vec::new();
        if self.eat(&TokenKind::Throws) {
            loop {
                let (tag, _) = self.expect_ident("error tag")?;
                throws.push(tag);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let body = self.parse_do_block();
        Some(FnDecl {
            name,
            params,
            ret,
            throws,
            body,
            is_flag,
            span: start.to(self.span()),
        })
    }

    /// Parameters after a consumed `(`, consuming the closing `)`.
    fn parse_params(&mut self) -> Option<Vec<Param>> {
        let mut params = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Some(params);
        }
        loop {
            let (name, span) = self.expect_ident("parameter name")?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type()?;
            params.push(Param { name, ty, span });
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RParen)?;
            return Some(params);
        }
    }

    /// A type annotation: a primitive name or a class name.
    pub(crate) fn parse_type(&mut self) -> Option<Ty> {
        let (name, _) = self.expect_ident("type name")?;
        let text = self.interner.resolve(name);
        Some(Ty::from_name(text).unwrap_or(Ty::Named(name)))
    }

    /// `class Name [extends Base] do members end`
    fn parse_class(&mut self) -> Option<ClassDecl> {
        let start = self.span();
        self.advance(); // `class`
        let (name, _) = self.expect_ident("class name")?;
        let base = if self.eat(&TokenKind::Extends) {
            Some(self.expect_ident("base class name")?.0)
        } else {
            None
        };
        self.expect(&TokenKind::Do)?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut ctor: Option<CtorDecl> = None;
        let mut seen: FxHashMap<Symbol, Span> = FxHashMap::default();

        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::End) {
                break;
            }
            if self.at_eof() {
                self.syntax_error("missing `end` after class body".to_string());
                break;
            }

            let access = match self.peek_kind() {
                TokenKind::Public => {
                    self.advance();
                    Access::Public
                }
                TokenKind::Protected => {
                    self.advance();
                    Access::Protected
                }
                TokenKind::Private => {
                    self.advance();
                    Access::Private
                }
                _ => Access::Public,
            };

            let dispatch = match self.peek_kind() {
                TokenKind::Virtual => {
                    self.advance();
                    Dispatch::Virtual
                }
                TokenKind::Override => {
                    self.advance();
                    Dispatch::Override
                }
                TokenKind::Final => {
                    self.advance();
                    Dispatch::Final
                }
                _ => Dispatch::Plain,
            };

            match self.peek_kind().clone() {
                TokenKind::Ident(sym)
                    if sym == self.ctx.constructor
                        && matches!(self.nth_kind(1), TokenKind::LParen) =>
                {
                    let parsed = self.parse_ctor()?;
                    if ctor.is_some() {
                        self.handler.error(
                            ErrorKind::Syntax,
                            parsed.span,
                            "duplicate constructor".to_string(),
                        );
                    } else {
                        ctor = Some(parsed);
                    }
                }
                TokenKind::Ident(member_name) => {
                    let member_span = self.span();
                    if let Some(prev) = seen.get(&member_name) {
                        self.handler.emit(
                            lsc_util::Diagnostic::error(
                                ErrorKind::Syntax,
                                member_span,
                                format!(
                                    "duplicate member `{}` in class",
                                    self.interner.resolve(member_name)
                                ),
                            )
                            .with_secondary(*prev, "previous declaration here".to_string()),
                        );
                    } else {
                        seen.insert(member_name, member_span);
                    }

                    if matches!(self.nth_kind(1), TokenKind::LParen) {
                        let func = self.parse_function(false)?;
                        methods.push(MethodDecl {
                            access,
                            dispatch,
                            func,
                        });
                    } else {
                        // field: `name: ty`
                        if dispatch != Dispatch::Plain {
                            self.syntax_error(
                                "dispatch markers apply to methods only".to_string(),
                            );
                        }
                        self.advance(); // name
                        self.expect(&TokenKind::Colon)?;
                        let ty = self.parse_type()?;
                        fields.push(FieldDecl {
                            name: member_name,
                            ty,
                            access,
                            span: member_span,
                        });
                        if matches!(self.peek_kind(), TokenKind::Newline) {
                            self.skip_newlines();
                        }
                    }
                }
                other => {
                    self.syntax_error(format!(
                        "expected class member, found {}",
                        other.describe()
                    ));
                    self.recover();
                }
            }
        }

        Some(ClassDecl {
            name,
            base,
            fields,
            ctor,
            methods,
            span: start.to(self.span()),
        })
    }

    /// `constructor(params) [: Base(args)] do … end`
    fn parse_ctor(&mut self) -> Option<CtorDecl> {
        let start = self.span();
        self.advance(); // `constructor`
        self.expect(&TokenKind::LParen)?;
        let params = self.parse_params()?;

        let mut base_name = None;
        let mut base_args = None;
        if self.eat(&TokenKind::Colon) {
            let (name, _) = self.expect_ident("base class name")?;
            base_name = Some(name);
            self.expect(&TokenKind::LParen)?;
            base_args = Some(self.parse_call_args()?);
        }

        let body = self.parse_do_block();
        Some(CtorDecl {
            params,
            base_name,
            base_args,
            body,
            span: start.to(self.span()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::parse_source;

    #[test]
    fn test_function_with_ret_and_throws() {
        let (module, handler, interner) =
            parse_source("fetch(url: str) -> str throws NetError, IoError do\nreturn url\nend\n");
        assert!(!handler.has_errors(), "{:?}", handler.diagnostics());
        match &module.items[0] {
            Item::Function(func) => {
                assert_eq!(interner_name(&interner, func.name), "fetch");
                assert_eq!(func.params.len(), 1);
                assert_eq!(func.ret, Ty::Str);
                assert_eq!(func.throws.len(), 2);
                assert!(!func.is_flag);
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    fn interner_name(interner: &lsc_util::Interner, sym: Symbol) -> &str {
        interner.resolve(sym)
    }

    #[test]
    fn test_fn_keyword_is_optional() {
        let (module, handler, _) = parse_source("main() -> i64 do\nreturn 0\nend\n");
        assert!(!handler.has_errors(), "{:?}", handler.diagnostics());
        assert!(matches!(module.items[0], Item::Function(_)));
    }

    #[test]
    fn test_void_function_defaults() {
        let (module, handler, _) = parse_source("func tick() do\nend\n");
        assert!(!handler.has_errors());
        match &module.items[0] {
            Item::Function(func) => {
                assert_eq!(func.ret, Ty::Void);
                assert!(func.throws.is_empty());
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_call_statement_is_not_a_decl() {
        let (module, handler, _) = parse_source("print(\"hello\")\n");
        assert!(!handler.has_errors());
        assert!(matches!(module.items[0], Item::Stmt(_)));
    }

    #[test]
    fn test_flag_declaration() {
        let (module, handler, _) = parse_source("flag verbose() do\nend\n");
        assert!(!handler.has_errors());
        match &module.items[0] {
            Item::Function(func) => assert!(func.is_flag),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_class_with_members() {
        let source = "class Shape do\n\
                      protected w: i64\n\
                      protected h: i64\n\
                      constructor(w0: i64, h0: i64) do\nw = w0\nh = h0\nend\n\
                      virtual area() -> i64 do\nreturn w * h\nend\n\
                      end\n";
        let (module, handler, _) = parse_source(source);
        assert!(!handler.has_errors(), "{:?}", handler.diagnostics());
        match &module.items[0] {
            Item::Class(class) => {
                assert_eq!(class.fields.len(), 2);
                assert_eq!(class.methods.len(), 1);
                assert!(class.ctor.is_some());
                assert_eq!(class.methods[0].dispatch, Dispatch::Virtual);
                assert_eq!(class.fields[0].access, Access::Protected);
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn test_class_inheritance_and_base_init() {
        let source = "class Square extends Shape do\n\
                      constructor(s: i64) : Shape(s, s) do\nend\n\
                      override area() -> i64 do\nreturn w * w\nend\n\
                      end\n";
        let (module, handler, _) = parse_source(source);
        assert!(!handler.has_errors(), "{:?}", handler.diagnostics());
        match &module.items[0] {
            Item::Class(class) => {
                assert!(class.base.is_some());
                let ctor = class.ctor.as_ref().unwrap();
                assert!(ctor.base_name.is_some());
                assert_eq!(ctor.base_args.as_ref().unwrap().len(), 2);
                assert_eq!(class.methods[0].dispatch, Dispatch::Override);
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_member_is_error() {
        let source = "class C do\nx: i64\nx: f64\nend\n";
        let (_, handler, _) = parse_source(source);
        assert!(handler.has_errors());
    }
}
