//! lsc-sem - Semantic analyzer.
//!
//! One walk over the merged module performs, in order: module-wide symbol
//! collection (functions, classes, methods become visible before any body
//! is analyzed, enabling mutual recursion), type resolution and exact
//! unification, call resolution with ad-hoc generic specialization,
//! throws-contract checking, owned-handle tracking with synthesized
//! releases on every exit path, parallel-for constraint validation, and
//! constant-eligibility marking with the constant-zero-divisor check.
//!
//! The analyzer rewrites the AST in place: every expression leaves with a
//! concrete type, every call with a resolved target, and blocks gain
//! `Release` statements at their exits in reverse declaration order.

pub mod builtins;
pub mod types;

use indexmap::IndexMap;
use lsc_par::ast::{
    Access, AssignOp, BinOp, Block, CallExpr, CallTarget, ClassDecl, ClassId, CtorDecl, Dispatch,
    Expr, ExprKind, FnDecl, FnId, ForLoop, Item, Module, Release, Stmt, StmtKind, Ty, UnOp,
};
use lsc_util::{Diagnostic, ErrorKind, FxHashMap, Handler, Interner, Span, Symbol};

pub use builtins::{host_prototype, resolve_builtin, BuiltinSig};
pub use types::{unify, Analysis, ClassMeta, FieldInfo, FnSig, MethodInfo, VtSlot};

/// Run semantic analysis over a merged module.
pub fn analyze(module: &mut Module, handler: &Handler, interner: &mut Interner) -> Analysis {
    let mut analyzer = SemanticAnalyzer::new(handler, interner);
    analyzer.collect(module);
    analyzer.check_bodies(module);
    analyzer.finish()
}

#[derive(Clone, Debug)]
struct VarInfo {
    ty: Ty,
    is_const: bool,
    is_owned: bool,
    moved: bool,
    free_fn: Option<String>,
    depth: usize,
    span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScopeKind {
    Function,
    Loop,
    Plain,
}

struct Scope {
    kind: ScopeKind,
    vars: IndexMap<Symbol, VarInfo>,
    /// Owned handles in declaration order, for deterministic teardown
    owned_order: Vec<Symbol>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            vars: IndexMap::new(),
            owned_order: Vec::new(),
        }
    }
}

/// The semantic analyzer; see the module docs for the pass structure.
pub struct SemanticAnalyzer<'a> {
    handler: &'a Handler,
    interner: &'a mut Interner,
    analysis: Analysis,
    fn_index: FxHashMap<Symbol, FnId>,
    class_index: FxHashMap<Symbol, ClassId>,
    decl_spans: FxHashMap<Symbol, Span>,
    scopes: Vec<Scope>,
    current_ret: Ty,
    current_throws: Vec<Symbol>,
    current_class: Option<ClassId>,
    loop_depth: usize,
    in_parallel: bool,
    parallel_body_depth: usize,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(handler: &'a Handler, interner: &'a mut Interner) -> Self {
        Self {
            handler,
            interner,
            analysis: Analysis::default(),
            fn_index: FxHashMap::default(),
            class_index: FxHashMap::default(),
            decl_spans: FxHashMap::default(),
            scopes: Vec::new(),
            current_ret: Ty::Void,
            current_throws: Vec::new(),
            current_class: None,
            loop_depth: 0,
            in_parallel: false,
            parallel_body_depth: 0,
        }
    }

    fn finish(self) -> Analysis {
        self.analysis
    }

    // ==================================================================
    // Pass 1: module-wide symbol collection
    // ==================================================================

    fn collect(&mut self, module: &Module) {
        // Class names first so signatures can reference them.
        for item in &module.items {
            if let Item::Class(class) = item {
                if let Some(prev) = self.decl_spans.get(&class.name) {
                    self.duplicate(class.name, class.span, *prev);
                    continue;
                }
                let id = ClassId(self.analysis.classes.len() as u32);
                self.class_index.insert(class.name, id);
                self.decl_spans.insert(class.name, class.span);
                self.analysis.classes.push(ClassMeta {
                    name: class.name,
                    base: None,
                    fields: Vec::new(),
                    methods: Vec::new(),
                    ctor_params: Vec::new(),
                    has_ctor: false,
                });
            }
        }

        // Now signatures: bases, fields, methods, functions.
        for item in &module.items {
            match item {
                Item::Class(class) => self.collect_class(class),
                Item::Function(func) => self.collect_function(func),
                Item::Stmt(_) => {}
            }
        }

        self.check_inheritance_cycles();
        self.check_override_rules();
    }

    fn duplicate(&self, name: Symbol, span: Span, prev: Span) {
        self.handler.emit(
            Diagnostic::error(
                ErrorKind::Name,
                span,
                format!("duplicate definition of `{}`", self.interner.resolve(name)),
            )
            .with_secondary(prev, "previous declaration here".to_string()),
        );
    }

    fn collect_function(&mut self, func: &FnDecl) {
        if let Some(prev) = self.decl_spans.get(&func.name) {
            self.duplicate(func.name, func.span, *prev);
            return;
        }
        if func.is_flag && !func.params.is_empty() {
            self.handler.error(
                ErrorKind::Type,
                func.span,
                "flag functions take no parameters".to_string(),
            );
        }
        let id = FnId(self.analysis.fns.len() as u32);
        self.fn_index.insert(func.name, id);
        self.decl_spans.insert(func.name, func.span);
        let params = func
            .params
            .iter()
            .map(|p| self.resolve_annotation(&p.ty, p.span))
            .collect();
        let ret = self.resolve_annotation(&func.ret, func.span);
        self.analysis.fns.push(FnSig {
            name: func.name,
            params,
            ret,
            throws: func.throws.clone(),
            is_flag: func.is_flag,
        });
    }

    fn collect_class(&mut self, class: &ClassDecl) {
        let Some(&id) = self.class_index.get(&class.name) else {
            return; // duplicate already reported
        };

        let base = class.base.and_then(|base_name| {
            let resolved = self.class_index.get(&base_name).copied();
            if resolved.is_none() {
                self.handler.error(
                    ErrorKind::Name,
                    class.span,
                    format!("unknown base class `{}`", self.interner.resolve(base_name)),
                );
            }
            resolved
        });

        let fields = class
            .fields
            .iter()
            .map(|f| FieldInfo {
                name: f.name,
                ty: self.resolve_annotation(&f.ty, f.span),
                access: f.access,
            })
            .collect();

        let methods = class
            .methods
            .iter()
            .map(|m| MethodInfo {
                name: m.func.name,
                access: m.access,
                dispatch: m.dispatch,
                params: m
                    .func
                    .params
                    .iter()
                    .map(|p| self.resolve_annotation(&p.ty, p.span))
                    .collect(),
                ret: self.resolve_annotation(&m.func.ret, m.func.span),
                throws: m.func.throws.clone(),
            })
            .collect();

        let (ctor_params, has_ctor) = match &class.ctor {
            Some(ctor) => (
                ctor.params
                    .iter()
                    .map(|p| self.resolve_annotation(&p.ty, p.span))
                    .collect(),
                true,
            ),
            None => (Vec::new(), false),
        };

        let meta = &mut self.analysis.classes[id.0 as usize];
        meta.base = base;
        meta.fields = fields;
        meta.methods = methods;
        meta.ctor_params = ctor_params;
        meta.has_ctor = has_ctor;
    }

    fn check_inheritance_cycles(&mut self) {
        for start in 0..self.analysis.classes.len() {
            let mut seen = vec![false; self.analysis.classes.len()];
            let mut current = ClassId(start as u32);
            seen[start] = true;
            while let Some(base) = self.analysis.classes[current.0 as usize].base {
                if seen[base.0 as usize] {
                    let name = self.analysis.classes[start].name;
                    self.handler.error(
                        ErrorKind::Name,
                        Span::DUMMY,
                        format!(
                            "inheritance cycle involving class `{}`",
                            self.interner.resolve(name)
                        ),
                    );
                    // Break the cycle so later walks terminate.
                    self.analysis.classes[current.0 as usize].base = None;
                    break;
                }
                seen[base.0 as usize] = true;
                current = base;
            }
        }
    }

    fn check_override_rules(&mut self) {
        for idx in 0..self.analysis.classes.len() {
            let id = ClassId(idx as u32);
            let Some(base) = self.analysis.classes[idx].base else {
                // `override` without a base is meaningless.
                for method in self.analysis.classes[idx].methods.clone() {
                    if method.dispatch == Dispatch::Override {
                        self.handler.error(
                            ErrorKind::Type,
                            Span::DUMMY,
                            format!(
                                "`{}.{}` is marked override but the class has no base",
                                self.interner.resolve(self.analysis.classes[idx].name),
                                self.interner.resolve(method.name)
                            ),
                        );
                    }
                }
                continue;
            };

            for method in self.analysis.classes[idx].methods.clone() {
                let inherited = self.analysis.find_method(base, method.name).map(|(owner, m)| {
                    (owner, m.clone())
                });
                let class_name = self.interner.resolve(self.analysis.class(id).name).to_string();
                let method_name = self.interner.resolve(method.name).to_string();
                match (method.dispatch, inherited) {
                    (Dispatch::Override, None) => {
                        self.handler.error(
                            ErrorKind::Type,
                            Span::DUMMY,
                            format!(
                                "`{}.{}` overrides nothing in the base chain",
                                class_name, method_name
                            ),
                        );
                    }
                    (Dispatch::Override, Some((_, inherited))) => {
                        if !inherited.dispatch.is_virtual() {
                            self.handler.error(
                                ErrorKind::Type,
                                Span::DUMMY,
                                format!(
                                    "`{}.{}` overrides a non-virtual method",
                                    class_name, method_name
                                ),
                            );
                        } else if inherited.params != method.params
                            || inherited.ret != method.ret
                        {
                            self.handler.error(
                                ErrorKind::Type,
                                Span::DUMMY,
                                format!(
                                    "`{}.{}` changes the signature of the overridden method",
                                    class_name, method_name
                                ),
                            );
                        }
                    }
                    // `final` may seal an inherited virtual slot.
                    (Dispatch::Final, Some((_, inherited)))
                        if inherited.dispatch.is_virtual()
                            && inherited.params == method.params
                            && inherited.ret == method.ret => {}
                    (_, Some((_, inherited))) => {
                        let msg = if inherited.dispatch == Dispatch::Final {
                            format!("`{}.{}` redefines a final method", class_name, method_name)
                        } else if inherited.dispatch.is_virtual() {
                            format!(
                                "`{}.{}` hides a virtual method; mark it `override`",
                                class_name, method_name
                            )
                        } else {
                            format!(
                                "`{}.{}` redefines an inherited method",
                                class_name, method_name
                            )
                        };
                        self.handler.error(ErrorKind::Type, Span::DUMMY, msg);
                    }
                    (_, None) => {}
                }
            }
        }
    }

    fn resolve_annotation(&self, ty: &Ty, span: Span) -> Ty {
        match ty {
            Ty::Named(sym) => match self.class_index.get(sym) {
                Some(&id) => Ty::Class(id),
                None => {
                    self.handler.error(
                        ErrorKind::Name,
                        span,
                        format!("unknown type `{}`", self.interner.resolve(*sym)),
                    );
                    Ty::Unresolved
                }
            },
            other => other.clone(),
        }
    }

    // ==================================================================
    // Pass 2: bodies
    // ==================================================================

    fn check_bodies(&mut self, module: &mut Module) {
        for item in module.items.iter_mut() {
            match item {
                Item::Function(func) => self.check_fn(func, None),
                Item::Class(class) => self.check_class(class),
                Item::Stmt(_) => {}
            }
        }

        // Top-level statements share one implicit entry scope.
        if module
            .items
            .iter()
            .any(|item| matches!(item, Item::Stmt(_)))
        {
            self.current_ret = Ty::Void;
            self.current_throws = Vec::new();
            self.current_class = None;
            self.push_scope(ScopeKind::Function);
            for item in module.items.iter_mut() {
                if let Item::Stmt(stmt) = item {
                    self.check_stmt(stmt);
                }
            }
            for release in self.pop_scope() {
                module
                    .items
                    .push(Item::Stmt(Stmt::new(StmtKind::Release(release), Span::DUMMY)));
            }
        }
    }

    fn check_fn(&mut self, func: &mut FnDecl, class: Option<ClassId>) {
        self.current_ret = self.resolve_annotation(&func.ret, func.span);
        self.current_throws = func.throws.clone();
        self.current_class = class;
        self.loop_depth = 0;
        self.in_parallel = false;
        self.scopes.clear();

        self.push_scope(ScopeKind::Function);
        for param in func.params.iter_mut() {
            let ty = self.resolve_annotation(&param.ty, param.span);
            param.ty = ty.clone();
            self.declare(param.name, ty, false, false, None, param.span);
        }
        func.ret = self.current_ret.clone();
        for stmt in func.body.stmts.iter_mut() {
            self.check_stmt(stmt);
        }
        let releases = self.pop_scope();
        push_releases(&mut func.body, releases);

        if self.current_ret != Ty::Void
            && self.current_ret != Ty::Unresolved
            && !block_always_returns(&func.body)
        {
            self.handler.error(
                ErrorKind::Type,
                func.span,
                format!(
                    "function `{}` may finish without returning a value",
                    self.interner.resolve(func.name)
                ),
            );
        }
    }

    fn check_class(&mut self, class: &mut ClassDecl) {
        let Some(&id) = self.class_index.get(&class.name) else {
            return;
        };

        if let Some(ctor) = class.ctor.as_mut() {
            self.check_ctor(id, class.base, ctor);
        } else if let Some(base) = self.analysis.class(id).base {
            if !self.analysis.class(base).ctor_params.is_empty() {
                self.handler.error(
                    ErrorKind::Type,
                    class.span,
                    "base class constructor requires arguments but there is no constructor to forward them".to_string(),
                );
            }
        }

        for method in class.methods.iter_mut() {
            self.check_fn(&mut method.func, Some(id));
        }
    }

    fn check_ctor(&mut self, id: ClassId, base_name: Option<Symbol>, ctor: &mut CtorDecl) {
        self.current_ret = Ty::Void;
        self.current_throws = Vec::new();
        self.current_class = Some(id);
        self.loop_depth = 0;
        self.in_parallel = false;
        self.scopes.clear();

        self.push_scope(ScopeKind::Function);
        for param in ctor.params.iter_mut() {
            let ty = self.resolve_annotation(&param.ty, param.span);
            param.ty = ty.clone();
            self.declare(param.name, ty, false, false, None, param.span);
        }

        let base = self.analysis.class(id).base;
        match (&mut ctor.base_args, base) {
            (Some(args), Some(base_id)) => {
                if ctor.base_name != base_name {
                    self.handler.error(
                        ErrorKind::Type,
                        ctor.span,
                        "base initializer must name the declared base class".to_string(),
                    );
                }
                let expected = self.analysis.class(base_id).ctor_params.clone();
                self.check_args(args, &expected, "base constructor", ctor.span);
            }
            (Some(_), None) => {
                self.handler.error(
                    ErrorKind::Type,
                    ctor.span,
                    "base initializer on a class without a base".to_string(),
                );
            }
            (None, Some(base_id)) => {
                if !self.analysis.class(base_id).ctor_params.is_empty() {
                    self.handler.error(
                        ErrorKind::Type,
                        ctor.span,
                        "base class constructor requires arguments".to_string(),
                    );
                }
            }
            (None, None) => {}
        }

        for stmt in ctor.body.stmts.iter_mut() {
            self.check_stmt(stmt);
        }
        let releases = self.pop_scope();
        push_releases(&mut ctor.body, releases);
    }

    // ==================================================================
    // Scopes and owned handles
    // ==================================================================

    fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    /// Pop the innermost scope; still-owned handles are returned in
    /// reverse declaration order for release.
    fn pop_scope(&mut self) -> Vec<Release> {
        let scope = self.scopes.pop().expect("scope underflow");
        let mut releases = Vec::new();
        for name in scope.owned_order.iter().rev() {
            let var = &scope.vars[name];
            if !var.moved {
                if let Some(free_fn) = &var.free_fn {
                    releases.push(Release {
                        var: *name,
                        free_fn: free_fn.clone(),
                    });
                }
            }
        }
        releases
    }

    /// Releases owed on an early exit: scopes from the innermost outward,
    /// stopping after `boundary`.
    fn releases_until(&self, boundary: ScopeKind) -> Vec<Release> {
        let mut releases = Vec::new();
        for scope in self.scopes.iter().rev() {
            for name in scope.owned_order.iter().rev() {
                let var = &scope.vars[name];
                if !var.moved {
                    if let Some(free_fn) = &var.free_fn {
                        releases.push(Release {
                            var: *name,
                            free_fn: free_fn.clone(),
                        });
                    }
                }
            }
            if scope.kind == boundary {
                break;
            }
        }
        releases
    }

    fn declare(
        &mut self,
        name: Symbol,
        ty: Ty,
        is_const: bool,
        is_owned: bool,
        free_fn: Option<String>,
        span: Span,
    ) {
        let depth = self.scopes.len() - 1;
        let scope = self.scopes.last_mut().expect("no scope");
        if let Some(prev) = scope.vars.get(&name) {
            let prev_span = prev.span;
            self.handler.emit(
                Diagnostic::error(
                    ErrorKind::Name,
                    span,
                    format!(
                        "`{}` is already declared in this scope",
                        self.interner.resolve(name)
                    ),
                )
                .with_secondary(prev_span, "previous declaration here".to_string()),
            );
            return;
        }
        if is_owned {
            scope.owned_order.push(name);
        }
        scope.vars.insert(
            name,
            VarInfo {
                ty,
                is_const,
                is_owned,
                moved: false,
                free_fn,
                depth,
                span,
            },
        );
    }

    fn lookup(&self, name: Symbol) -> Option<&VarInfo> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.vars.get(&name))
    }

    fn lookup_mut(&mut self, name: Symbol) -> Option<&mut VarInfo> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.vars.get_mut(&name))
    }

    /// Mark an owned variable as transferred away.
    fn mark_moved(&mut self, expr: &Expr) {
        if let ExprKind::Var(name) = expr.kind {
            if let Some(var) = self.lookup_mut(name) {
                if var.is_owned && !var.moved {
                    var.moved = true;
                }
            }
        }
    }

    // ==================================================================
    // Statements
    // ==================================================================

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Declare {
                name,
                ty,
                init,
                is_const,
                is_owned,
            } => {
                let name = *name;
                let is_const = *is_const;
                let is_owned = *is_owned;
                let annotated = match ty {
                    Ty::Unresolved => None,
                    ref other => Some(self.resolve_annotation(other, span)),
                };
                let mut free_fn = None;
                let final_ty = match (annotated, init.as_mut()) {
                    (Some(ann), Some(expr)) => {
                        self.check_expr(expr);
                        if !self.compatible(&ann, &expr.ty) {
                            let expected = self.analysis.ty_name(&ann, self.interner);
                            let found = self.analysis.ty_name(&expr.ty, self.interner);
                            self.handler.error(
                                ErrorKind::Type,
                                expr.span,
                                format!(
                                    "declared type `{}` but initializer has type `{}`",
                                    expected, found
                                ),
                            );
                        }
                        ann
                    }
                    (Some(ann), None) => {
                        if is_owned {
                            self.handler.error(
                                ErrorKind::OwnedHandleEscape,
                                span,
                                "owned declaration requires an owning initializer".to_string(),
                            );
                        }
                        ann
                    }
                    (None, Some(expr)) => {
                        self.check_expr(expr);
                        if expr.ty == Ty::Void {
                            self.handler.error(
                                ErrorKind::Type,
                                expr.span,
                                "initializer has no value".to_string(),
                            );
                        }
                        expr.ty.clone()
                    }
                    (None, None) => Ty::Unresolved, // parser already reported
                };

                if is_owned {
                    if !final_ty.is_handle_like() {
                        let found = self.analysis.ty_name(&final_ty, self.interner);
                        self.handler.error(
                            ErrorKind::Type,
                            span,
                            format!("`owned` applies to handles, not `{}`", found),
                        );
                    } else if let Some(expr) = init.as_ref() {
                        free_fn = self.owning_release(expr);
                        if free_fn.is_none() {
                            self.handler.error(
                                ErrorKind::OwnedHandleEscape,
                                expr.span,
                                "initializer does not produce an owned handle".to_string(),
                            );
                        } else if let ExprKind::Var(_) = expr.kind {
                            self.mark_moved(expr);
                        }
                    }
                }

                *ty = final_ty.clone();
                self.declare(name, final_ty, is_const, is_owned, free_fn, span);
            }

            StmtKind::Assign { target, op, value } => {
                let op = *op;
                self.check_lvalue(target);
                self.check_expr(value);
                self.check_assign_types(target, op, value, span);
                self.check_parallel_write(target, span);
                if op == AssignOp::Set {
                    // Assigning an owned handle away transfers ownership.
                    if let ExprKind::Var(name) = value.kind {
                        let owned = self
                            .lookup(name)
                            .map(|v| v.is_owned && !v.moved)
                            .unwrap_or(false);
                        if owned {
                            self.mark_moved(value);
                        }
                    }
                }
            }

            StmtKind::If { arms, else_block } => {
                for arm in arms.iter_mut() {
                    self.check_expr(&mut arm.cond);
                    self.expect_bool(&arm.cond, "if condition");
                    self.check_block(&mut arm.body, ScopeKind::Plain);
                }
                if let Some(block) = else_block {
                    self.check_block(block, ScopeKind::Plain);
                }
            }

            StmtKind::While { cond, body } => {
                self.check_expr(cond);
                self.expect_bool(cond, "while condition");
                self.loop_depth += 1;
                self.check_block(body, ScopeKind::Loop);
                self.loop_depth -= 1;
            }

            StmtKind::For(for_loop) => self.check_for(for_loop, span),

            StmtKind::Return { value, releases } => {
                if self.in_parallel {
                    self.handler.error(
                        ErrorKind::ParallelLoopConstraint,
                        span,
                        "`return` is not allowed inside `parallel for`".to_string(),
                    );
                }
                match (value.as_mut(), self.current_ret.clone()) {
                    (Some(expr), ret) => {
                        self.check_expr(expr);
                        if ret == Ty::Void {
                            self.handler.error(
                                ErrorKind::Type,
                                expr.span,
                                "cannot return a value from a void function".to_string(),
                            );
                        } else if !self.compatible(&ret, &expr.ty) {
                            let expected = self.analysis.ty_name(&ret, self.interner);
                            let found = self.analysis.ty_name(&expr.ty, self.interner);
                            self.handler.error(
                                ErrorKind::Type,
                                expr.span,
                                format!("expected return type `{}`, found `{}`", expected, found),
                            );
                        }
                        // Returning an owned handle transfers it to the caller.
                        self.mark_moved(expr);
                    }
                    (None, ret) => {
                        if ret != Ty::Void && ret != Ty::Unresolved {
                            self.handler.error(
                                ErrorKind::Type,
                                span,
                                "missing return value".to_string(),
                            );
                        }
                    }
                }
                *releases = self.releases_until(ScopeKind::Function);
            }

            StmtKind::Break { releases } => {
                if self.in_parallel {
                    self.handler.error(
                        ErrorKind::ParallelLoopConstraint,
                        span,
                        "`break` is not allowed inside `parallel for`".to_string(),
                    );
                } else if self.loop_depth == 0 {
                    self.handler.error(
                        ErrorKind::Syntax,
                        span,
                        "`break` outside of a loop".to_string(),
                    );
                }
                *releases = self.releases_until(ScopeKind::Loop);
            }

            StmtKind::Continue { releases } => {
                if self.in_parallel {
                    self.handler.error(
                        ErrorKind::ParallelLoopConstraint,
                        span,
                        "`continue` is not allowed inside `parallel for`".to_string(),
                    );
                } else if self.loop_depth == 0 {
                    self.handler.error(
                        ErrorKind::Syntax,
                        span,
                        "`continue` outside of a loop".to_string(),
                    );
                }
                *releases = self.releases_until(ScopeKind::Loop);
            }

            StmtKind::Expr(expr) => {
                if let ExprKind::IncDec { .. } = expr.kind {
                    self.check_incdec(expr, span);
                } else {
                    self.check_expr(expr);
                }
            }

            StmtKind::Marker(_) => {}
            StmtKind::Release(_) | StmtKind::Block(_) | StmtKind::Empty => {}
        }
    }

    fn check_block(&mut self, block: &mut Block, kind: ScopeKind) {
        self.push_scope(kind);
        for stmt in block.stmts.iter_mut() {
            self.check_stmt(stmt);
        }
        let releases = self.pop_scope();
        push_releases(block, releases);
    }

    fn check_for(&mut self, for_loop: &mut ForLoop, span: Span) {
        self.check_expr(&mut for_loop.start);
        self.check_expr(&mut for_loop.end);
        self.expect_i64(&for_loop.start, "range start");
        self.expect_i64(&for_loop.end, "range end");
        if let Some(step) = for_loop.step.as_mut() {
            self.check_expr(step);
        }
        if let Some(step) = for_loop.step.as_ref() {
            self.expect_i64(step, "range step");
        }

        let was_parallel = self.in_parallel;
        let was_depth = self.parallel_body_depth;
        if for_loop.parallel {
            self.analysis.uses_parallel = true;
            self.in_parallel = true;
            self.parallel_body_depth = self.scopes.len() + 1;
        }

        self.loop_depth += 1;
        self.push_scope(ScopeKind::Loop);
        // The induction variable is per-iteration and read-only.
        self.declare(for_loop.var, Ty::I64, true, false, None, span);
        for stmt in for_loop.body.stmts.iter_mut() {
            self.check_stmt(stmt);
        }
        let releases = self.pop_scope();
        push_releases(&mut for_loop.body, releases);
        self.loop_depth -= 1;

        self.in_parallel = was_parallel;
        self.parallel_body_depth = was_depth;
    }

    fn check_incdec(&mut self, expr: &mut Expr, span: Span) {
        let ExprKind::IncDec { target, .. } = &mut expr.kind else {
            return;
        };
        self.check_lvalue(target);
        if !target.ty.is_int() && target.ty != Ty::Unresolved {
            let found = self.analysis.ty_name(&target.ty, self.interner);
            self.handler.error(
                ErrorKind::Type,
                span,
                format!("`++`/`--` needs an integer variable, found `{}`", found),
            );
        }
        self.check_parallel_write(target, span);
        expr.ty = target.ty.clone();
    }

    /// Reject writes to variables declared outside a `parallel for` body.
    fn check_parallel_write(&self, target: &Expr, span: Span) {
        if !self.in_parallel {
            return;
        }
        if let ExprKind::Var(name) = target.kind {
            if let Some(var) = self.lookup(name) {
                if var.depth + 1 < self.parallel_body_depth {
                    self.handler.error(
                        ErrorKind::ParallelLoopConstraint,
                        span,
                        format!(
                            "`parallel for` body may not assign to `{}` declared outside the loop",
                            self.interner.resolve(name)
                        ),
                    );
                }
            }
        }
    }

    fn check_assign_types(&mut self, target: &Expr, op: AssignOp, value: &Expr, span: Span) {
        if let ExprKind::Var(name) = target.kind {
            if let Some(var) = self.lookup(name) {
                if var.is_const {
                    self.handler.error(
                        ErrorKind::Type,
                        span,
                        format!(
                            "cannot assign to constant `{}`",
                            self.interner.resolve(name)
                        ),
                    );
                }
                if var.is_owned {
                    self.handler.error(
                        ErrorKind::OwnedHandleEscape,
                        span,
                        format!(
                            "owned handle `{}` cannot be reassigned",
                            self.interner.resolve(name)
                        ),
                    );
                }
            }
        }

        let target_ty = target.ty.clone();
        let value_ty = value.ty.clone();
        match op {
            AssignOp::Set => {
                if !self.compatible(&target_ty, &value_ty) {
                    let expected = self.analysis.ty_name(&target_ty, self.interner);
                    let found = self.analysis.ty_name(&value_ty, self.interner);
                    self.handler.error(
                        ErrorKind::Type,
                        span,
                        format!("cannot assign `{}` to `{}`", found, expected),
                    );
                }
            }
            AssignOp::Add if target_ty == Ty::Str => {
                if unify(&value_ty, &Ty::Str).is_none() {
                    self.handler.error(
                        ErrorKind::Type,
                        span,
                        "string append needs a `str` operand".to_string(),
                    );
                }
            }
            _ => {
                if !target_ty.is_numeric() && target_ty != Ty::Unresolved {
                    let found = self.analysis.ty_name(&target_ty, self.interner);
                    self.handler.error(
                        ErrorKind::Type,
                        span,
                        format!("compound assignment needs a numeric target, found `{}`", found),
                    );
                } else if unify(&target_ty, &value_ty).is_none() {
                    let expected = self.analysis.ty_name(&target_ty, self.interner);
                    let found = self.analysis.ty_name(&value_ty, self.interner);
                    self.handler.error(
                        ErrorKind::Type,
                        span,
                        format!("operand type `{}` does not match `{}`", found, expected),
                    );
                }
            }
        }
    }

    // ==================================================================
    // Expressions
    // ==================================================================

    fn expect_bool(&self, expr: &Expr, what: &str) {
        if expr.ty != Ty::Bool && expr.ty != Ty::Unresolved {
            let found = self.analysis.ty_name(&expr.ty, self.interner);
            self.handler.error(
                ErrorKind::Type,
                expr.span,
                format!("{} must be `bool`, found `{}`", what, found),
            );
        }
    }

    fn expect_i64(&self, expr: &Expr, what: &str) {
        if expr.ty != Ty::I64 && expr.ty != Ty::Unresolved {
            let found = self.analysis.ty_name(&expr.ty, self.interner);
            self.handler.error(
                ErrorKind::Type,
                expr.span,
                format!("{} must be `i64`, found `{}`", what, found),
            );
        }
    }

    /// Assignable-target analysis; rewrites bare field names to
    /// `SelfField` inside methods.
    fn check_lvalue(&mut self, expr: &mut Expr) {
        let span = expr.span;
        if let ExprKind::Var(name) = expr.kind {
            if let Some(var) = self.lookup(name) {
                expr.ty = var.ty.clone();
                return;
            }
            if let Some(class_id) = self.current_class {
                if let Some((owner, field)) = self.analysis.find_field(class_id, name) {
                    let field_ty = field.ty.clone();
                    let access = field.access;
                    self.check_member_access(access, owner, span, name);
                    expr.kind = ExprKind::SelfField { name, owner };
                    expr.ty = field_ty;
                    return;
                }
            }
            self.handler.error(
                ErrorKind::Name,
                span,
                format!("undefined variable `{}`", self.interner.resolve(name)),
            );
            expr.ty = Ty::Unresolved;
            return;
        }
        if !matches!(expr.kind, ExprKind::Field { .. } | ExprKind::Index { .. }) {
            self.handler.error(
                ErrorKind::Type,
                span,
                "invalid assignment target".to_string(),
            );
        }
        self.check_expr(expr);
    }

    fn check_expr(&mut self, expr: &mut Expr) {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Int(_) => {
                expr.ty = Ty::I64;
                expr.is_const = true;
            }
            ExprKind::Float(_) => {
                expr.ty = Ty::F64;
                expr.is_const = true;
            }
            ExprKind::Str(_) => {
                expr.ty = Ty::Str;
                expr.is_const = true;
            }
            ExprKind::Bool(_) => {
                expr.ty = Ty::Bool;
                expr.is_const = true;
            }

            ExprKind::Var(name) => {
                let name = *name;
                if let Some(var) = self.lookup(name) {
                    if var.moved {
                        self.handler.error(
                            ErrorKind::OwnedHandleEscape,
                            span,
                            format!(
                                "use of moved handle `{}`",
                                self.interner.resolve(name)
                            ),
                        );
                    }
                    expr.ty = var.ty.clone();
                    return;
                }
                if let Some(class_id) = self.current_class {
                    if let Some((owner, field)) = self.analysis.find_field(class_id, name) {
                        let ty = field.ty.clone();
                        let access = field.access;
                        self.check_member_access(access, owner, span, name);
                        expr.kind = ExprKind::SelfField { name, owner };
                        expr.ty = ty;
                        return;
                    }
                }
                self.handler.error(
                    ErrorKind::Name,
                    span,
                    format!("undefined variable `{}`", self.interner.resolve(name)),
                );
                expr.ty = Ty::Unresolved;
            }

            ExprKind::SelfField { .. } => {} // already resolved

            ExprKind::Unary { op, operand } => {
                let op = *op;
                self.check_expr(operand);
                match op {
                    UnOp::Not => {
                        self.expect_bool(operand, "operand of `not`");
                        expr.ty = Ty::Bool;
                    }
                    UnOp::Neg | UnOp::Pos => {
                        if !operand.ty.is_numeric() && operand.ty != Ty::Unresolved {
                            let found = self.analysis.ty_name(&operand.ty, self.interner);
                            self.handler.error(
                                ErrorKind::Type,
                                span,
                                format!("unary `-` needs a numeric operand, found `{}`", found),
                            );
                        }
                        expr.ty = operand.ty.clone();
                    }
                }
                expr.is_const = operand.is_const;
            }

            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                self.check_expr(lhs);
                self.check_expr(rhs);
                expr.ty = self.binary_result(op, lhs, rhs, span);
                expr.is_const = lhs.is_const && rhs.is_const;
                // `x / 0` and `x % 0` with a constant zero divisor are
                // rejected, integer and float alike, even when `x` itself
                // is not constant.
                if matches!(op, BinOp::Div | BinOp::Rem)
                    && rhs.is_const
                    && divisor_is_const_zero(rhs)
                {
                    self.handler.error(
                        ErrorKind::ConstDivByZero,
                        span,
                        "division by constant zero".to_string(),
                    );
                    expr.is_const = false;
                }
            }

            ExprKind::Call(call) => {
                let ty = self.check_call(call, span);
                expr.ty = ty;
                // `len` of a literal folds at compile time.
                if let CallTarget::Builtin(symbol) = &call.target {
                    if symbol == "ls_str_len" && call.args[0].is_const {
                        expr.is_const = true;
                    }
                }
            }

            ExprKind::Method {
                recv,
                name,
                args,
                target,
            } => {
                let name = *name;
                self.check_expr(recv);
                for arg in args.iter_mut() {
                    self.check_expr(arg);
                }
                expr.ty = match recv.ty.clone() {
                    Ty::Class(class_id) => {
                        match self.analysis.find_method(class_id, name) {
                            Some((owner, method)) => {
                                let method = method.clone();
                                let access = method.access;
                                self.check_member_access(access, owner, span, name);
                                self.check_arg_types(
                                    args,
                                    &method.params,
                                    &format!("method `{}`", self.interner.resolve(name)),
                                    span,
                                );
                                self.check_throws(&method.throws, span, name);
                                *target = CallTarget::Method(class_id, name);
                                method.ret
                            }
                            None => {
                                self.handler.error(
                                    ErrorKind::Name,
                                    span,
                                    format!(
                                        "no method `{}` on class `{}`",
                                        self.interner.resolve(name),
                                        self.analysis.ty_name(&recv.ty, self.interner)
                                    ),
                                );
                                Ty::Unresolved
                            }
                        }
                    }
                    Ty::Unresolved => Ty::Unresolved,
                    other => {
                        let found = self.analysis.ty_name(&other, self.interner);
                        self.handler.error(
                            ErrorKind::Type,
                            span,
                            format!("method call on non-class value of type `{}`", found),
                        );
                        Ty::Unresolved
                    }
                };
            }

            ExprKind::Field { recv, name, owner } => {
                let name = *name;
                self.check_expr(recv);
                expr.ty = match recv.ty.clone() {
                    Ty::Class(class_id) => match self.analysis.find_field(class_id, name) {
                        Some((field_owner, field)) => {
                            let ty = field.ty.clone();
                            let access = field.access;
                            self.check_member_access(access, field_owner, span, name);
                            *owner = Some(field_owner);
                            ty
                        }
                        None => {
                            self.handler.error(
                                ErrorKind::Name,
                                span,
                                format!(
                                    "no field `{}` on class `{}`",
                                    self.interner.resolve(name),
                                    self.analysis.ty_name(&recv.ty, self.interner)
                                ),
                            );
                            Ty::Unresolved
                        }
                    },
                    Ty::Unresolved => Ty::Unresolved,
                    other => {
                        let found = self.analysis.ty_name(&other, self.interner);
                        self.handler.error(
                            ErrorKind::Type,
                            span,
                            format!("field access on non-class value of type `{}`", found),
                        );
                        Ty::Unresolved
                    }
                };
            }

            ExprKind::Index { recv, index } => {
                self.check_expr(recv);
                self.check_expr(index);
                if !recv.ty.is_handle_like() && recv.ty != Ty::Unresolved {
                    let found = self.analysis.ty_name(&recv.ty, self.interner);
                    self.handler.error(
                        ErrorKind::Type,
                        span,
                        format!("indexing needs a handle, found `{}`", found),
                    );
                }
                self.expect_i64(index, "index");
                expr.ty = Ty::I64;
            }

            ExprKind::IncDec { .. } => {
                self.handler.error(
                    ErrorKind::Type,
                    span,
                    "`++`/`--` may only be used as a statement".to_string(),
                );
                expr.ty = Ty::Unresolved;
            }

            ExprKind::Spawn(call) => {
                for arg in call.args.iter_mut() {
                    self.check_expr(arg);
                }
                match self.fn_index.get(&call.name).copied() {
                    Some(id) => {
                        let sig = self.analysis.fn_sig(id).clone();
                        self.check_arg_types(
                            &mut call.args,
                            &sig.params,
                            &format!("function `{}`", self.interner.resolve(call.name)),
                            span,
                        );
                        if !sig.throws.is_empty() {
                            self.handler.error(
                                ErrorKind::ThrowsContract,
                                span,
                                format!(
                                    "cannot spawn `{}`: throwing functions cannot cross threads",
                                    self.interner.resolve(call.name)
                                ),
                            );
                        }
                        if sig.ret != Ty::Void && sig.ret != Ty::I64 {
                            self.handler.error(
                                ErrorKind::Type,
                                span,
                                "spawned functions must return `i64` or nothing".to_string(),
                            );
                        }
                        call.target = CallTarget::Fn(id);
                    }
                    None => {
                        self.handler.error(
                            ErrorKind::Name,
                            span,
                            format!(
                                "undefined function `{}`",
                                self.interner.resolve(call.name)
                            ),
                        );
                    }
                }
                expr.ty = Ty::Handle;
            }

            ExprKind::Await { task } => {
                self.check_expr(task);
                if task.ty != Ty::Handle && task.ty != Ty::Unresolved {
                    let found = self.analysis.ty_name(&task.ty, self.interner);
                    self.handler.error(
                        ErrorKind::Type,
                        span,
                        format!("`await` needs a task handle, found `{}`", found),
                    );
                }
                expr.ty = Ty::I64;
            }
        }
    }

    fn binary_result(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> Ty {
        let joined = unify(&lhs.ty, &rhs.ty);
        if op.is_logical() {
            self.expect_bool(lhs, "logical operand");
            self.expect_bool(rhs, "logical operand");
            return Ty::Bool;
        }
        if op.is_comparison() {
            match joined {
                Some(ty) => {
                    let ordered = matches!(op, BinOp::Eq | BinOp::Ne)
                        || ty.is_numeric()
                        || ty == Ty::Unresolved;
                    if !ordered {
                        let found = self.analysis.ty_name(&ty, self.interner);
                        self.handler.error(
                            ErrorKind::Type,
                            span,
                            format!("ordering comparison is not defined for `{}`", found),
                        );
                    }
                }
                None => self.type_mismatch(lhs, rhs, span),
            }
            return Ty::Bool;
        }
        // Arithmetic
        match joined {
            Some(ty) if ty.is_numeric() => ty,
            Some(Ty::Str) if op == BinOp::Add => Ty::Str,
            Some(Ty::Unresolved) => Ty::Unresolved,
            Some(ty) => {
                let found = self.analysis.ty_name(&ty, self.interner);
                self.handler.error(
                    ErrorKind::Type,
                    span,
                    format!("arithmetic is not defined for `{}`", found),
                );
                Ty::Unresolved
            }
            None => {
                self.type_mismatch(lhs, rhs, span);
                Ty::Unresolved
            }
        }
    }

    fn type_mismatch(&self, lhs: &Expr, rhs: &Expr, span: Span) {
        let left = self.analysis.ty_name(&lhs.ty, self.interner);
        let right = self.analysis.ty_name(&rhs.ty, self.interner);
        self.handler.error(
            ErrorKind::Type,
            span,
            format!(
                "mismatched operand types `{}` and `{}` (widen explicitly with `to_i64`/`to_f64`)",
                left, right
            ),
        );
    }

    /// Resolution order: user function, class constructor, method of the
    /// enclosing class, builtin catalog.
    fn check_call(&mut self, call: &mut CallExpr, span: Span) -> Ty {
        for arg in call.args.iter_mut() {
            self.check_expr(arg);
        }

        if let Some(id) = self.fn_index.get(&call.name).copied() {
            let sig = self.analysis.fn_sig(id).clone();
            if sig.is_flag {
                self.handler.error(
                    ErrorKind::Type,
                    span,
                    format!(
                        "flag `{}` is invoked by the command line, not by calls",
                        self.interner.resolve(call.name)
                    ),
                );
            }
            self.check_arg_types(
                &mut call.args,
                &sig.params,
                &format!("function `{}`", self.interner.resolve(call.name)),
                span,
            );
            self.check_throws(&sig.throws, span, call.name);
            call.target = CallTarget::Fn(id);
            return sig.ret;
        }

        if let Some(id) = self.class_index.get(&call.name).copied() {
            let params = self.analysis.class(id).ctor_params.clone();
            self.check_arg_types(
                &mut call.args,
                &params,
                &format!("constructor of `{}`", self.interner.resolve(call.name)),
                span,
            );
            call.target = CallTarget::Ctor(id);
            return Ty::Class(id);
        }

        if let Some(class_id) = self.current_class {
            if let Some((owner, method)) = self.analysis.find_method(class_id, call.name) {
                let method = method.clone();
                let _ = owner;
                self.check_arg_types(
                    &mut call.args,
                    &method.params,
                    &format!("method `{}`", self.interner.resolve(call.name)),
                    span,
                );
                self.check_throws(&method.throws, span, call.name);
                call.target = CallTarget::Method(class_id, call.name);
                return method.ret;
            }
        }

        let arg_tys: Vec<Ty> = call.args.iter().map(|a| a.ty.clone()).collect();
        let name = self.interner.resolve(call.name).to_string();
        if let Some(sig) = resolve_builtin(&name, &arg_tys) {
            self.check_builtin_throws(sig.throws, span, &name);
            call.target = CallTarget::Builtin(sig.symbol);
            return sig.ret;
        }

        self.handler.error(
            ErrorKind::Name,
            span,
            format!("undefined function `{}`", name),
        );
        Ty::Unresolved
    }

    fn check_args(&mut self, args: &mut Vec<Expr>, expected: &[Ty], what: &str, span: Span) {
        for arg in args.iter_mut() {
            self.check_expr(arg);
        }
        self.check_arg_types(args, expected, what, span);
    }

    fn check_arg_types(&mut self, args: &mut [Expr], expected: &[Ty], what: &str, span: Span) {
        if args.len() != expected.len() {
            self.handler.error(
                ErrorKind::Type,
                span,
                format!(
                    "{} expects {} argument(s), found {}",
                    what,
                    expected.len(),
                    args.len()
                ),
            );
            return;
        }
        for (arg, want) in args.iter().zip(expected) {
            if !self.compatible(want, &arg.ty) {
                let expected_name = self.analysis.ty_name(want, self.interner);
                let found = self.analysis.ty_name(&arg.ty, self.interner);
                self.handler.error(
                    ErrorKind::Type,
                    arg.span,
                    format!(
                        "argument type mismatch: expected `{}`, found `{}`",
                        expected_name, found
                    ),
                );
            }
        }
    }

    /// Exact match, plus upcasts: a subclass where an ancestor is wanted,
    /// and any class instance where a bare handle is wanted.
    fn compatible(&self, expected: &Ty, actual: &Ty) -> bool {
        if unify(expected, actual).is_some() {
            return true;
        }
        match (expected, actual) {
            (Ty::Class(want), Ty::Class(have)) => self.analysis.is_subclass(*have, *want),
            (Ty::Handle, Ty::Class(_)) => true,
            _ => false,
        }
    }

    fn check_throws(&mut self, callee_throws: &[Symbol], span: Span, callee: Symbol) {
        for tag in callee_throws {
            if !self.current_throws.contains(tag) {
                self.handler.error(
                    ErrorKind::ThrowsContract,
                    span,
                    format!(
                        "call to `{}` which throws `{}`, but the caller does not declare it",
                        self.interner.resolve(callee),
                        self.interner.resolve(*tag)
                    ),
                );
            }
        }
    }

    fn check_builtin_throws(&mut self, tags: &[&'static str], span: Span, callee: &str) {
        for tag in tags {
            let tag_sym = self.interner.intern(tag);
            if !self.current_throws.contains(&tag_sym) {
                self.handler.error(
                    ErrorKind::ThrowsContract,
                    span,
                    format!(
                        "call to `{}` which throws `{}`, but the caller does not declare it",
                        callee, tag
                    ),
                );
            }
        }
    }

    fn check_member_access(&self, access: Access, owner: ClassId, span: Span, name: Symbol) {
        let allowed = match access {
            Access::Public => true,
            Access::Private => self.current_class == Some(owner),
            Access::Protected => self
                .current_class
                .map(|current| self.analysis.is_subclass(current, owner))
                .unwrap_or(false),
        };
        if !allowed {
            let kind = match access {
                Access::Private => "private",
                Access::Protected => "protected",
                Access::Public => unreachable!(),
            };
            self.handler.error(
                ErrorKind::Type,
                span,
                format!(
                    "member `{}` of class `{}` is {}",
                    self.interner.resolve(name),
                    self.interner.resolve(self.analysis.class(owner).name),
                    kind
                ),
            );
        }
    }

    /// Release function implied by an owning initializer, if any.
    fn owning_release(&mut self, expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Call(call) => match &call.target {
                CallTarget::Builtin(symbol) => {
                    let arg_tys: Vec<Ty> = call.args.iter().map(|a| a.ty.clone()).collect();
                    let name = self.interner.resolve(call.name).to_string();
                    resolve_builtin(&name, &arg_tys)
                        .and_then(|sig| {
                            debug_assert_eq!(&sig.symbol, symbol);
                            sig.owned_free
                        })
                        .map(|s| s.to_string())
                }
                CallTarget::Ctor(id) => {
                    let class_name = self.interner.resolve(self.analysis.class(*id).name);
                    Some(format!("{}_free", class_name))
                }
                _ => None,
            },
            // Moving an owned handle into a new owned binding.
            ExprKind::Var(name) => self
                .lookup(*name)
                .filter(|v| v.is_owned && !v.moved)
                .and_then(|v| v.free_fn.clone()),
            _ => None,
        }
    }
}

/// Append scope-exit releases to a block, unless the block already ends in
/// an unconditional jump (whose own release list covers them).
fn push_releases(block: &mut Block, releases: Vec<Release>) {
    if let Some(last) = block.stmts.last() {
        if matches!(
            last.kind,
            StmtKind::Return { .. } | StmtKind::Break { .. } | StmtKind::Continue { .. }
        ) {
            return;
        }
    }
    for release in releases {
        block
            .stmts
            .push(Stmt::new(StmtKind::Release(release), Span::DUMMY));
    }
}

/// True when a constant divisor evaluates to zero, whatever its
/// numeric type.
fn divisor_is_const_zero(expr: &Expr) -> bool {
    const_int_value(expr) == Some(0) || const_float_value(expr) == Some(0.0)
}

/// Compile-time value of a constant integer expression, when evaluable.
fn const_int_value(expr: &Expr) -> Option<i64> {
    match &expr.kind {
        ExprKind::Int(value) => Some(*value),
        ExprKind::Unary { op, operand } => {
            let value = const_int_value(operand)?;
            match op {
                UnOp::Neg => Some(value.wrapping_neg()),
                UnOp::Pos => Some(value),
                UnOp::Not => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let a = const_int_value(lhs)?;
            let b = const_int_value(rhs)?;
            match op {
                BinOp::Add => Some(a.wrapping_add(b)),
                BinOp::Sub => Some(a.wrapping_sub(b)),
                BinOp::Mul => Some(a.wrapping_mul(b)),
                BinOp::Div if b != 0 => Some(a.wrapping_div(b)),
                BinOp::Rem if b != 0 => Some(a.wrapping_rem(b)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Compile-time value of a constant float expression, when evaluable.
fn const_float_value(expr: &Expr) -> Option<f64> {
    match &expr.kind {
        ExprKind::Float(value) => Some(*value),
        ExprKind::Unary { op, operand } => {
            let value = const_float_value(operand)?;
            match op {
                UnOp::Neg => Some(-value),
                UnOp::Pos => Some(value),
                UnOp::Not => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let a = const_float_value(lhs)?;
            let b = const_float_value(rhs)?;
            match op {
                BinOp::Add => Some(a + b),
                BinOp::Sub => Some(a - b),
                BinOp::Mul => Some(a * b),
                BinOp::Div if b != 0.0 => Some(a / b),
                BinOp::Rem if b != 0.0 => Some(a % b),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Conservative "all paths return" check.
fn block_always_returns(block: &Block) -> bool {
    block.stmts.iter().any(stmt_always_returns)
}

fn stmt_always_returns(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return { .. } => true,
        StmtKind::If { arms, else_block } => {
            else_block
                .as_ref()
                .map(block_always_returns)
                .unwrap_or(false)
                && arms.iter().all(|arm| block_always_returns(&arm.body))
        }
        StmtKind::Block(block) => block_always_returns(block),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsc_par::Parser;
    use lsc_util::FileId;

    fn run(source: &str) -> (Module, Analysis, Handler, Interner) {
        let handler = Handler::new();
        let mut interner = Interner::new();
        let tokens = lsc_lex::tokenize(source, FileId(0), &handler, &mut interner);
        let mut module = Parser::new(tokens, &handler, &mut interner).parse();
        assert!(
            !handler.has_errors(),
            "parse errors: {:?}",
            handler.diagnostics()
        );
        let analysis = analyze(&mut module, &handler, &mut interner);
        (module, analysis, handler, interner)
    }

    fn run_ok(source: &str) -> (Module, Analysis, Interner) {
        let (module, analysis, handler, interner) = run(source);
        assert!(
            !handler.has_errors(),
            "unexpected errors: {:?}",
            handler.diagnostics()
        );
        (module, analysis, interner)
    }

    fn first_error_kind(handler: &Handler) -> Option<ErrorKind> {
        handler.diagnostics().iter().find_map(|d| d.kind)
    }

    #[test]
    fn test_inferred_declare() {
        let (module, _, _) = run_ok("declare x = 1\ndeclare y = x + 2\n");
        match &module.items[0] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::Declare { ty, .. } => assert_eq!(*ty, Ty::I64),
                other => panic!("expected declare, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_annotation_mismatch() {
        let (_, _, handler, _) = run("declare x: i64 = 1.5\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::Type));
    }

    #[test]
    fn test_no_implicit_widening() {
        let (_, _, handler, _) = run("f(a: i32) do\ndeclare b: i64 = 0\ndeclare c = a + b\nend\nf(1)\n");
        // i32 + i64 must be spelled with to_i64
        assert!(handler.has_errors());
    }

    #[test]
    fn test_undefined_variable() {
        let (_, _, handler, _) = run("println(nope)\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::Name));
    }

    #[test]
    fn test_call_resolution_and_arity() {
        let (_, _, handler, _) = run("add(a: i64, b: i64) -> i64 do\nreturn a + b\nend\nprintln(add(1))\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::Type));
    }

    #[test]
    fn test_mutual_recursion_resolves() {
        let source = "is_even(n: i64) -> bool do\nif n == 0 do\nreturn true\nend\nreturn is_odd(n - 1)\nend\n\
                      is_odd(n: i64) -> bool do\nif n == 0 do\nreturn false\nend\nreturn is_even(n - 1)\nend\n\
                      println(is_even(10))\n";
        run_ok(source);
    }

    #[test]
    fn test_generic_helper_specialization() {
        let (module, _, _) = run_ok("declare m = max(2, 3)\n");
        match &module.items[0] {
            Item::Stmt(stmt) => match &stmt.kind {
                StmtKind::Declare { init: Some(expr), .. } => match &expr.kind {
                    ExprKind::Call(call) => {
                        assert_eq!(call.target, CallTarget::Builtin("max_i64".to_string()));
                    }
                    other => panic!("expected call, got {:?}", other),
                },
                other => panic!("expected declare with init, got {:?}", other),
            },
            other => panic!("expected statement, got {:?}", other),
        }
    }

    #[test]
    fn test_throws_contract_violation() {
        let (_, _, handler, _) = run("fetch() -> str do\nreturn http_get(\"x\")\nend\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::ThrowsContract));
    }

    #[test]
    fn test_throws_contract_satisfied() {
        run_ok("fetch() -> str throws NetError do\nreturn http_get(\"x\")\nend\n");
    }

    #[test]
    fn test_throws_propagation_required() {
        let source = "fetch() -> str throws NetError do\nreturn http_get(\"x\")\nend\n\
                      outer() -> str do\nreturn fetch()\nend\n";
        let (_, _, handler, _) = run(source);
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::ThrowsContract));
    }

    #[test]
    fn test_const_div_by_zero() {
        let (_, _, handler, _) = run("declare x = 10 / 0\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::ConstDivByZero));
    }

    #[test]
    fn test_const_mod_by_computed_zero() {
        let (_, _, handler, _) = run("declare x = 7 % (3 - 3)\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::ConstDivByZero));
    }

    #[test]
    fn test_const_float_div_by_zero() {
        let (_, _, handler, _) = run("declare x = 1.0 / 0.0\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::ConstDivByZero));
    }

    #[test]
    fn test_const_float_mod_by_computed_zero() {
        let (_, _, handler, _) = run("declare x = 1.5 % (2.0 - 2.0)\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::ConstDivByZero));
    }

    #[test]
    fn test_negative_zero_divisor_rejected() {
        let (_, _, handler, _) = run("declare x = 1.0 / -0.0\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::ConstDivByZero));
    }

    #[test]
    fn test_runtime_divisor_is_fine() {
        run_ok("declare d = 2\ndeclare x = 10 / d\n");
        run_ok("declare f = 2.0\ndeclare y = 1.0 / f\n");
    }

    #[test]
    fn test_parallel_for_break_rejected() {
        let (_, _, handler, _) = run("parallel for i in 0..10 do\nbreak\nend\n");
        assert_eq!(
            first_error_kind(&handler),
            Some(ErrorKind::ParallelLoopConstraint)
        );
    }

    #[test]
    fn test_parallel_for_outer_assignment_rejected() {
        let (_, _, handler, _) = run("declare s = 0\nparallel for i in 0..10 do\ns = s + i\nend\n");
        assert_eq!(
            first_error_kind(&handler),
            Some(ErrorKind::ParallelLoopConstraint)
        );
    }

    #[test]
    fn test_parallel_for_local_state_allowed() {
        let (_, analysis, _) = run_ok("parallel for i in 0..10 do\ndeclare t = i * 2\nprintln(t)\nend\n");
        assert!(analysis.uses_parallel);
    }

    #[test]
    fn test_owned_handle_release_synthesized_in_reverse_order() {
        let source = "declare owned a = array_new()\ndeclare owned b = dict_new()\n";
        let (module, _, interner) = run_ok(source);
        let releases: Vec<_> = module
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Stmt(stmt) => match &stmt.kind {
                    StmtKind::Release(release) => Some(release.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(releases.len(), 2);
        assert_eq!(interner.resolve(releases[0].var), "b");
        assert_eq!(releases[0].free_fn, "dict_free");
        assert_eq!(interner.resolve(releases[1].var), "a");
        assert_eq!(releases[1].free_fn, "array_free");
    }

    #[test]
    fn test_owned_return_is_a_transfer() {
        let source = "make() -> handle do\ndeclare owned a = array_new()\nreturn a\nend\n";
        let (module, _, _) = run_ok(source);
        match &module.items[0] {
            Item::Function(func) => match &func.body.stmts.last().unwrap().kind {
                StmtKind::Return { releases, .. } => assert!(releases.is_empty()),
                other => panic!("expected return, got {:?}", other),
            },
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_early_return_releases_unmoved_handles() {
        let source = "f(flagged: bool) do\ndeclare owned a = array_new()\nif flagged do\nreturn\nend\narray_push(a, 1)\nend\n";
        let (module, _, _) = run_ok(source);
        match &module.items[0] {
            Item::Function(func) => {
                let StmtKind::If { arms, .. } = &func.body.stmts[1].kind else {
                    panic!("expected if");
                };
                let StmtKind::Return { releases, .. } = &arms[0].body.stmts[0].kind else {
                    panic!("expected return");
                };
                assert_eq!(releases.len(), 1);
                assert_eq!(releases[0].free_fn, "array_free");
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_use_after_move_rejected() {
        let source = "declare owned a = array_new()\ndeclare owned b = a\narray_push(a, 1)\n";
        let (_, _, handler, _) = run(source);
        assert_eq!(
            first_error_kind(&handler),
            Some(ErrorKind::OwnedHandleEscape)
        );
    }

    #[test]
    fn test_owned_requires_owning_initializer() {
        let (_, _, handler, _) = run("f(h: handle) do\ndeclare owned a = array_get(h, 0)\nend\nf(array_new())\n");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_owned_reassignment_rejected() {
        let source = "declare owned a = array_new()\na = array_new()\n";
        let (_, _, handler, _) = run(source);
        assert_eq!(
            first_error_kind(&handler),
            Some(ErrorKind::OwnedHandleEscape)
        );
    }

    #[test]
    fn test_const_reassignment_rejected() {
        let (_, _, handler, _) = run("declare const x = 1\nx = 2\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::Type));
    }

    #[test]
    fn test_class_instances_and_virtual_dispatch() {
        let source = "class Shape do\n\
                      protected w: i64\n\
                      constructor(w0: i64) do\nw = w0\nend\n\
                      virtual area() -> i64 do\nreturn w\nend\n\
                      end\n\
                      class Square extends Shape do\n\
                      constructor(s: i64) : Shape(s) do\nend\n\
                      override area() -> i64 do\nreturn w * w\nend\n\
                      end\n\
                      declare s = Square(4)\nprintln(s.area())\n";
        let (_, analysis, _) = run_ok(source);
        assert_eq!(analysis.classes.len(), 2);
        assert!(analysis.has_vtable(ClassId(1)));
    }

    #[test]
    fn test_private_member_access_rejected() {
        let source = "class C do\n\
                      private secret: i64\n\
                      constructor(s: i64) do\nsecret = s\nend\n\
                      end\n\
                      declare c = C(1)\nprintln(c.secret)\n";
        let (_, _, handler, _) = run(source);
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::Type));
    }

    #[test]
    fn test_override_of_final_rejected() {
        let source = "class A do\nfinal f() -> i64 do\nreturn 1\nend\nend\n\
                      class B extends A do\noverride f() -> i64 do\nreturn 2\nend\nend\n";
        let (_, _, handler, _) = run(source);
        assert!(handler.has_errors());
    }

    #[test]
    fn test_missing_return_detected() {
        let (_, _, handler, _) = run("f(c: bool) -> i64 do\nif c do\nreturn 1\nend\nend\nprintln(f(true))\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::Type));
    }

    #[test]
    fn test_spawn_await() {
        let source = "work(n: i64) -> i64 do\nreturn n * 2\nend\n\
                      declare t = spawn work(21)\ndeclare r = await t\nprintln(r)\n";
        run_ok(source);
    }

    #[test]
    fn test_spawn_of_throwing_fn_rejected() {
        let source = "risky() -> i64 throws IoError do\nreturn 0\nend\ndeclare t = spawn risky()\n";
        let (_, _, handler, _) = run(source);
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::ThrowsContract));
    }

    #[test]
    fn test_incdec_statement_only() {
        let (_, _, handler, _) = run("declare i = 0\ndeclare j = i++\n");
        assert_eq!(first_error_kind(&handler), Some(ErrorKind::Type));
    }

    #[test]
    fn test_incdec_as_statement() {
        run_ok("declare i = 0\ni++\nprintln(i)\n");
    }
}
