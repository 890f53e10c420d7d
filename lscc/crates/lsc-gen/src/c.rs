//! C backend: lowers the optimized AST to a single translation unit.
//!
//! Layout of the emitted file: runtime prelude, prototypes for referenced
//! host symbols, class structs and vtables in base-first order, function
//! prototypes, spawn trampolines, definitions, and a `main` that seeds CLI
//! introspection, runs matching script flags, and calls the entry.

use std::collections::BTreeSet;

use lsc_par::ast::{
    AssignOp, BinOp, Block, CallExpr, CallTarget, ClassDecl, ClassId, Expr, ExprKind, FnDecl,
    ForLoop, Item, Marker, Module, Stmt, StmtKind, Ty, UnOp,
};
use lsc_sem::{host_prototype, Analysis};
use lsc_util::{Interner, Symbol};

/// Emit the C translation unit.
///
/// `entry` names the function `main` calls; `cli_tokens` are the grouped
/// and unclaimed driver tokens baked into the introspection table (the
/// program's own argv is appended at runtime).
pub fn emit_c(
    module: &Module,
    analysis: &Analysis,
    interner: &Interner,
    entry: Symbol,
    cli_tokens: &[String],
) -> String {
    let mut backend = CBackend {
        module,
        analysis,
        interner,
        entry,
        cli_tokens,
        out: String::new(),
        indent: 0,
        tmp_counter: 0,
        spawn_counter: 0,
        current_class: None,
        uses_state_speed: false,
    };
    backend.emit();
    backend.out
}

struct CBackend<'a> {
    module: &'a Module,
    analysis: &'a Analysis,
    interner: &'a Interner,
    entry: Symbol,
    cli_tokens: &'a [String],
    out: String,
    indent: usize,
    tmp_counter: usize,
    spawn_counter: usize,
    current_class: Option<ClassId>,
    uses_state_speed: bool,
}

impl<'a> CBackend<'a> {
    fn emit(&mut self) {
        self.emit_prelude();
        self.emit_host_prototypes();
        self.emit_class_types();
        self.emit_prototypes();
        self.emit_vtables();
        self.emit_spawn_helpers();
        self.emit_definitions();
        self.emit_main();
    }

    // ------------------------------------------------------------------
    // Low-level output
    // ------------------------------------------------------------------

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn name(&self, sym: Symbol) -> &str {
        self.interner.resolve(sym)
    }

    fn var(&self, sym: Symbol) -> String {
        format!("ls_{}", self.name(sym))
    }

    fn fn_name(&self, sym: Symbol) -> String {
        format!("ls_fn_{}", self.name(sym))
    }

    fn class_name(&self, id: ClassId) -> &str {
        self.name(self.analysis.class(id).name)
    }

    fn c_type(&self, ty: &Ty) -> &'static str {
        match ty {
            Ty::Void => "void",
            Ty::Bool => "int32_t",
            Ty::I32 => "int32_t",
            Ty::I64 => "int64_t",
            Ty::F32 => "float",
            Ty::F64 => "double",
            Ty::Str => "ls_str",
            Ty::Handle | Ty::Class(_) => "ls_handle",
            Ty::Named(_) | Ty::Unresolved => "int64_t",
        }
    }

    fn default_value(&self, ty: &Ty) -> &'static str {
        match ty {
            Ty::F32 => "0.0f",
            Ty::F64 => "0.0",
            Ty::Str => "\"\"",
            _ => "0",
        }
    }

    fn fresh_tmp(&mut self) -> usize {
        let id = self.tmp_counter;
        self.tmp_counter += 1;
        id
    }

    // ------------------------------------------------------------------
    // Prelude
    // ------------------------------------------------------------------

    fn emit_prelude(&mut self) {
        self.raw(PRELUDE);
        self.blank();
        let baked: String = self
            .cli_tokens
            .iter()
            .map(|token| format!("\"{}\", ", escape_c(token)))
            .collect();
        self.raw(&format!("static const char *ls_cli_baked[] = {{{}0}};\n", baked));
        self.raw(CLI_RUNTIME);
        self.blank();
    }

    fn emit_host_prototypes(&mut self) {
        let mut used: BTreeSet<String> = BTreeSet::new();
        collect_host_symbols(self.module, &mut used);
        if used.is_empty() {
            return;
        }
        self.line("/* host runtime */");
        for symbol in used {
            if let Some(proto) = host_prototype(&symbol) {
                self.line(proto);
            }
        }
        self.blank();
    }

    // ------------------------------------------------------------------
    // Classes
    // ------------------------------------------------------------------

    fn classes(&self) -> Vec<(ClassId, &'a ClassDecl)> {
        let mut out = Vec::new();
        let mut next = 0u32;
        for item in &self.module.items {
            if let Item::Class(class) = item {
                out.push((ClassId(next), class));
                next += 1;
            }
        }
        out
    }

    fn hierarchy_has_virtuals(&self, root: ClassId) -> bool {
        (0..self.analysis.classes.len()).any(|idx| {
            let id = ClassId(idx as u32);
            self.analysis.root_of(id) == root && self.analysis.has_vtable(id)
        })
    }

    fn emit_class_types(&mut self) {
        // Base-first so embedding compiles.
        let mut classes = self.classes();
        classes.sort_by_key(|(id, _)| self.analysis.chain(*id).len());

        for (id, _) in &classes {
            let id = *id;
            let meta = self.analysis.class(id).clone();
            let class_name = self.class_name(id).to_string();

            // Vtable struct for classes that own or inherit slots.
            let slots = self.analysis.vtable(id);
            if !slots.is_empty() {
                self.line(&format!("struct {}_vt {{", class_name));
                self.indent += 1;
                for slot in &slots {
                    let mut params = vec!["ls_handle".to_string()];
                    params.extend(slot.params.iter().map(|t| self.c_type(t).to_string()));
                    let slot_name = self.name(slot.name).to_string();
                    let ret = self.c_type(&slot.ret);
                    self.line(&format!(
                        "{} (*{})({});",
                        ret,
                        slot_name,
                        params.join(", ")
                    ));
                }
                self.indent -= 1;
                self.line("};");
            }

            self.line(&format!("struct {} {{", class_name));
            self.indent += 1;
            let mut members = 0;
            match meta.base {
                Some(base) => {
                    let base_name = self.class_name(base).to_string();
                    self.line(&format!("struct {} base;", base_name));
                    members += 1;
                }
                None => {
                    if self.hierarchy_has_virtuals(id) {
                        self.line("const void *vt;");
                        members += 1;
                    }
                }
            }
            for field in &meta.fields {
                let ty = self.c_type(&field.ty);
                let field_name = self.name(field.name).to_string();
                self.line(&format!("{} {};", ty, field_name));
                members += 1;
            }
            if members == 0 {
                // ISO C forbids empty structs.
                self.line("char _unused;");
            }
            self.indent -= 1;
            self.line("};");
            self.blank();
        }
    }

    fn method_name(&self, class: ClassId, method: Symbol) -> String {
        format!("{}_{}", self.class_name(class), self.name(method))
    }

    fn emit_vtables(&mut self) {
        for (id, _) in self.classes() {
            let slots = self.analysis.vtable(id);
            if slots.is_empty() {
                continue;
            }
            let class_name = self.class_name(id).to_string();
            let mut fields = Vec::new();
            for slot in &slots {
                let home = self
                    .analysis
                    .resolve_impl(id, slot.name)
                    .unwrap_or(id);
                fields.push(format!(
                    ".{} = {}",
                    self.name(slot.name),
                    self.method_name(home, slot.name)
                ));
            }
            self.line(&format!(
                "static const struct {}_vt {}_vtable = {{{}}};",
                class_name,
                class_name,
                fields.join(", ")
            ));
        }
        self.blank();
    }

    // ------------------------------------------------------------------
    // Prototypes and spawn trampolines
    // ------------------------------------------------------------------

    fn fn_signature(&self, func: &FnDecl) -> String {
        let params = if func.params.is_empty() {
            "void".to_string()
        } else {
            func.params
                .iter()
                .map(|p| format!("{} {}", self.c_type(&p.ty), self.var(p.name)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "static {} {}({})",
            self.c_type(&func.ret),
            self.fn_name(func.name),
            params
        )
    }

    fn method_signature(&self, class: ClassId, func: &FnDecl) -> String {
        let mut params = vec!["ls_handle ls_self".to_string()];
        params.extend(
            func.params
                .iter()
                .map(|p| format!("{} {}", self.c_type(&p.ty), self.var(p.name))),
        );
        format!(
            "static {} {}({})",
            self.c_type(&func.ret),
            self.method_name(class, func.name),
            params.join(", ")
        )
    }

    fn ctor_signatures(&self, id: ClassId, class: &ClassDecl) -> (String, String) {
        let class_name = self.class_name(id).to_string();
        let ctor_params: Vec<String> = class
            .ctor
            .as_ref()
            .map(|c| {
                c.params
                    .iter()
                    .map(|p| format!("{} {}", self.c_type(&p.ty), self.var(p.name)))
                    .collect()
            })
            .unwrap_or_default();

        let mut init_params = vec!["ls_handle ls_self".to_string()];
        init_params.extend(ctor_params.iter().cloned());
        let init = format!(
            "static void {}_init({})",
            class_name,
            init_params.join(", ")
        );
        let new = format!(
            "static ls_handle {}_new({})",
            class_name,
            if ctor_params.is_empty() {
                "void".to_string()
            } else {
                ctor_params.join(", ")
            }
        );
        (init, new)
    }

    fn emit_prototypes(&mut self) {
        let module = self.module;
        for item in &module.items {
            match item {
                Item::Function(func) => {
                    let sig = self.fn_signature(func);
                    self.line(&format!("{};", sig));
                }
                Item::Class(_) => {}
                Item::Stmt(_) => {}
            }
        }
        for (id, class) in self.classes() {
            for method in &class.methods {
                let sig = self.method_signature(id, &method.func);
                self.line(&format!("{};", sig));
            }
            let (init, new) = self.ctor_signatures(id, class);
            self.line(&format!("{};", init));
            self.line(&format!("{};", new));
            let class_name = self.class_name(id).to_string();
            self.line(&format!("static void {}_free(ls_handle ls_self);", class_name));
        }
        self.blank();
    }

    fn emit_spawn_helpers(&mut self) {
        let module = self.module;
        let mut sites = Vec::new();
        collect_spawns(module, &mut sites);
        for (index, call) in sites.iter().enumerate() {
            let target = self.fn_name(call.name);
            let arg_tys: Vec<&Ty> = call.args.iter().map(|a| &a.ty).collect();
            let ret_void = spawn_ret_is_void(module, call);

            self.line(&format!("struct ls_spawn_ctx_{} {{", index));
            self.indent += 1;
            if arg_tys.is_empty() {
                self.line("int32_t unused;");
            }
            for (i, ty) in arg_tys.iter().enumerate() {
                let c_ty = self.c_type(ty);
                self.line(&format!("{} a{};", c_ty, i));
            }
            self.indent -= 1;
            self.line("};");

            self.line(&format!("static void *ls_spawn_tramp_{}(void *p) {{", index));
            self.indent += 1;
            self.line(&format!(
                "struct ls_spawn_ctx_{} ctx = *(struct ls_spawn_ctx_{} *)p;",
                index, index
            ));
            self.line("free(p);");
            let args = (0..arg_tys.len())
                .map(|i| format!("ctx.a{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            if ret_void {
                self.line(&format!("{}({});", target, args));
                self.line("return 0;");
            } else {
                self.line(&format!(
                    "return (void *)(intptr_t){}({});",
                    target, args
                ));
            }
            self.indent -= 1;
            self.line("}");

            let params = if arg_tys.is_empty() {
                "void".to_string()
            } else {
                arg_tys
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| format!("{} a{}", self.c_type(ty), i))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            self.line(&format!(
                "static ls_handle ls_spawn_call_{}({}) {{",
                index, params
            ));
            self.indent += 1;
            self.line(&format!(
                "struct ls_spawn_ctx_{} *ctx = (struct ls_spawn_ctx_{} *)malloc(sizeof *ctx);",
                index, index
            ));
            for i in 0..arg_tys.len() {
                self.line(&format!("ctx->a{} = a{};", i, i));
            }
            self.line(&format!(
                "return ls_thread_spawn(ls_spawn_tramp_{}, ctx);",
                index
            ));
            self.indent -= 1;
            self.line("}");
            self.blank();
        }
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    fn emit_definitions(&mut self) {
        let module = self.module;
        for item in &module.items {
            if let Item::Function(func) = item {
                self.current_class = None;
                let sig = self.fn_signature(func);
                self.emit_fn_body(&sig, func);
            }
        }
        for (id, class) in self.classes() {
            self.emit_class_definitions(id, class);
        }
    }

    fn emit_fn_body(&mut self, signature: &str, func: &FnDecl) {
        self.uses_state_speed = block_uses_state_speed(&func.body);
        self.line(&format!("{} {{", signature));
        self.indent += 1;
        if self.uses_state_speed {
            self.line("int64_t ls__fn_entry_us = ls_now_us();");
        }
        for stmt in &func.body.stmts {
            self.emit_stmt(stmt);
        }
        self.indent -= 1;
        self.line("}");
        self.blank();
    }

    fn emit_class_definitions(&mut self, id: ClassId, class: &'a ClassDecl) {
        let class_name = self.class_name(id).to_string();

        for method in &class.methods {
            self.current_class = Some(id);
            let sig = self.method_signature(id, &method.func);
            self.emit_fn_body(&sig, &method.func);
        }
        self.current_class = Some(id);

        // _init: base initialization then constructor body.
        let (init_sig, new_sig) = self.ctor_signatures(id, class);
        self.line(&format!("{} {{", init_sig));
        self.indent += 1;
        let meta = self.analysis.class(id).clone();
        if let Some(base) = meta.base {
            let base_name = self.class_name(base).to_string();
            let base_args = class
                .ctor
                .as_ref()
                .and_then(|c| c.base_args.as_ref())
                .map(|args| {
                    args.iter()
                        .map(|a| self.emit_expr(a))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            if base_args.is_empty() {
                self.line(&format!("{}_init(ls_self);", base_name));
            } else {
                self.line(&format!("{}_init(ls_self, {});", base_name, base_args));
            }
        }
        if let Some(ctor) = &class.ctor {
            if block_uses_state_speed(&ctor.body) {
                self.line("int64_t ls__fn_entry_us = ls_now_us();");
            }
            for stmt in &ctor.body.stmts {
                self.emit_stmt(stmt);
            }
        }
        if meta.base.is_none() && class.ctor.is_none() && meta.fields.is_empty() {
            self.line("(void)ls_self;");
        }
        self.indent -= 1;
        self.line("}");

        // _new: allocate, install vtable, initialize.
        self.line(&format!("{} {{", new_sig));
        self.indent += 1;
        self.line(&format!(
            "struct {} *obj = (struct {} *)calloc(1, sizeof(struct {}));",
            class_name, class_name, class_name
        ));
        let root = self.analysis.root_of(id);
        if self.hierarchy_has_virtuals(root) && !self.analysis.vtable(id).is_empty() {
            let root_name = self.class_name(root).to_string();
            self.line(&format!(
                "((struct {} *)obj)->vt = (const void *)&{}_vtable;",
                root_name, class_name
            ));
        }
        let ctor_args = class
            .ctor
            .as_ref()
            .map(|c| {
                c.params
                    .iter()
                    .map(|p| self.var(p.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        if ctor_args.is_empty() {
            self.line(&format!(
                "{}_init((ls_handle)(intptr_t)obj);",
                class_name
            ));
        } else {
            self.line(&format!(
                "{}_init((ls_handle)(intptr_t)obj, {});",
                class_name, ctor_args
            ));
        }
        self.line("return (ls_handle)(intptr_t)obj;");
        self.indent -= 1;
        self.line("}");

        self.line(&format!("static void {}_free(ls_handle ls_self) {{", class_name));
        self.indent += 1;
        self.line("free((void *)(intptr_t)ls_self);");
        self.indent -= 1;
        self.line("}");
        self.blank();
        self.current_class = None;
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Declare { name, ty, init, .. } => {
                let value = match init {
                    Some(expr) => self.emit_expr(expr),
                    None => self.default_value(ty).to_string(),
                };
                let c_ty = self.c_type(ty);
                let var = self.var(*name);
                self.line(&format!("{} {} = {};", c_ty, var, value));
            }

            StmtKind::Assign { target, op, value } => self.emit_assign(target, *op, value),

            StmtKind::If { arms, else_block } => {
                for (i, arm) in arms.iter().enumerate() {
                    let cond = self.emit_expr(&arm.cond);
                    let keyword = if i == 0 { "if" } else { "} else if" };
                    self.line(&format!("{} ({}) {{", keyword, cond));
                    self.indent += 1;
                    for stmt in &arm.body.stmts {
                        self.emit_stmt(stmt);
                    }
                    self.indent -= 1;
                }
                if let Some(block) = else_block {
                    self.line("} else {");
                    self.indent += 1;
                    for stmt in &block.stmts {
                        self.emit_stmt(stmt);
                    }
                    self.indent -= 1;
                }
                self.line("}");
            }

            StmtKind::While { cond, body } => {
                let cond = self.emit_expr(cond);
                self.line(&format!("while ({}) {{", cond));
                self.indent += 1;
                for stmt in &body.stmts {
                    self.emit_stmt(stmt);
                }
                self.indent -= 1;
                self.line("}");
            }

            StmtKind::For(for_loop) => self.emit_for(for_loop),

            StmtKind::Return { value, releases } => {
                for release in releases {
                    let var = self.var(release.var);
                    self.line(&format!("{}({});", release.free_fn, var));
                }
                match value {
                    Some(expr) => {
                        let value = self.emit_expr(expr);
                        self.line(&format!("return {};", value));
                    }
                    None => self.line("return;"),
                }
            }

            StmtKind::Break { releases } => {
                for release in releases {
                    let var = self.var(release.var);
                    self.line(&format!("{}({});", release.free_fn, var));
                }
                self.line("break;");
            }

            StmtKind::Continue { releases } => {
                for release in releases {
                    let var = self.var(release.var);
                    self.line(&format!("{}({});", release.free_fn, var));
                }
                self.line("continue;");
            }

            StmtKind::Expr(expr) => {
                if let ExprKind::IncDec { target, inc } = &expr.kind {
                    let target = self.emit_expr(target);
                    let op = if *inc { "++" } else { "--" };
                    self.line(&format!("{}{};", target, op));
                } else {
                    let code = self.emit_expr(expr);
                    // Discarded non-void results are cast away explicitly.
                    if expr.ty != Ty::Void {
                        self.line(&format!("(void){};", code));
                    } else {
                        self.line(&format!("{};", code));
                    }
                }
            }

            StmtKind::Marker(marker) => match marker {
                Marker::Format => self.line("ls_console_format();"),
                Marker::FreeConsole => self.line("ls_console_release();"),
                Marker::StateSpeed => self.line(
                    "printf(\"speed_us=%lld\\n\", (long long)(ls_now_us() - ls__fn_entry_us));",
                ),
            },

            StmtKind::Release(release) => {
                let var = self.var(release.var);
                self.line(&format!("{}({});", release.free_fn, var));
            }

            StmtKind::Block(block) => {
                self.line("{");
                self.indent += 1;
                for stmt in &block.stmts {
                    self.emit_stmt(stmt);
                }
                self.indent -= 1;
                self.line("}");
            }

            StmtKind::Empty => {}
        }
    }

    fn emit_assign(&mut self, target: &Expr, op: AssignOp, value: &Expr) {
        // Index targets lower through the array host calls.
        if let ExprKind::Index { recv, index } = &target.kind {
            let recv = self.emit_expr(recv);
            let index = self.emit_expr(index);
            let value_code = self.emit_expr(value);
            let rhs = match op {
                AssignOp::Set => value_code,
                _ => {
                    let current = format!("array_get({}, {})", recv, index);
                    self.compound_rhs(&Ty::I64, &current, op, &value_code)
                }
            };
            self.line(&format!("array_set({}, {}, {});", recv, index, rhs));
            return;
        }

        let target_code = self.emit_expr(target);
        let value_code = self.emit_expr(value);
        match op {
            AssignOp::Set => self.line(&format!("{} = {};", target_code, value_code)),
            AssignOp::Add if target.ty == Ty::Str => self.line(&format!(
                "{} = ls_str_concat({}, {});",
                target_code, target_code, value_code
            )),
            AssignOp::Add => self.line(&format!("{} += {};", target_code, value_code)),
            AssignOp::Sub => self.line(&format!("{} -= {};", target_code, value_code)),
            AssignOp::Mul => self.line(&format!("{} *= {};", target_code, value_code)),
            AssignOp::Div => self.line(&format!("{} /= {};", target_code, value_code)),
            AssignOp::Rem => self.line(&format!("{} %= {};", target_code, value_code)),
            AssignOp::Pow => {
                let rhs = self.compound_rhs(&target.ty, &target_code, op, &value_code);
                self.line(&format!("{} = {};", target_code, rhs));
            }
        }
    }

    fn compound_rhs(&self, ty: &Ty, current: &str, op: AssignOp, value: &str) -> String {
        match op {
            AssignOp::Set => value.to_string(),
            AssignOp::Add => format!("({}) + ({})", current, value),
            AssignOp::Sub => format!("({}) - ({})", current, value),
            AssignOp::Mul => format!("({}) * ({})", current, value),
            AssignOp::Div => format!("({}) / ({})", current, value),
            AssignOp::Rem => format!("({}) % ({})", current, value),
            AssignOp::Pow => format!("{}({}, {})", self.pow_helper(ty), current, value),
        }
    }

    fn pow_helper(&self, ty: &Ty) -> &'static str {
        match ty {
            Ty::I32 => "ls_pow_i32",
            Ty::F32 => "ls_pow_f32",
            Ty::F64 => "ls_pow_f64",
            _ => "ls_pow_i64",
        }
    }

    fn emit_for(&mut self, for_loop: &ForLoop) {
        let tmp = self.fresh_tmp();
        let start = self.emit_expr(&for_loop.start);
        let end = self.emit_expr(&for_loop.end);
        let step = for_loop
            .step
            .as_ref()
            .map(|s| self.emit_expr(s))
            .unwrap_or_else(|| "1".to_string());
        let var = self.var(for_loop.var);

        let const_step = for_loop
            .step
            .as_ref()
            .map(|s| matches!(s.kind, ExprKind::Int(_)))
            .unwrap_or(true);
        let step_value = match for_loop.step.as_ref() {
            None => Some(1),
            Some(Expr {
                kind: ExprKind::Int(v),
                ..
            }) => Some(*v),
            _ => None,
        };

        self.line("{");
        self.indent += 1;
        self.line(&format!("int64_t ls__end{} = {};", tmp, end));
        if !const_step {
            self.line(&format!("int64_t ls__step{} = {};", tmp, step));
        }

        if let Some(step_value) = step_value.filter(|v| *v != 0) {
            // Canonical form: OpenMP and the vectorizer both accept it.
            let cmp = if step_value > 0 { "<" } else { ">" };
            if for_loop.parallel {
                self.line("#ifdef _OPENMP");
                self.line("#pragma omp parallel for simd");
                self.line("#endif");
            } else if loop_is_vectorizable(&for_loop.body) {
                self.line("#if defined(__clang__)");
                self.line("#pragma clang loop vectorize(enable) interleave(enable)");
                self.line("#endif");
            }
            self.line(&format!(
                "for (int64_t {} = {}; {} {} ls__end{}; {} += {}) {{",
                var, start, var, cmp, tmp, var, step_value
            ));
        } else if step_value == Some(0) {
            // A constant zero step runs zero iterations.
            self.line(&format!("for (int64_t {} = {}; 0; ) {{", var, start));
        } else {
            // Runtime step: direction checked per iteration, zero steps
            // terminate immediately.
            self.line(&format!(
                "for (int64_t {} = {}; ls__step{} != 0 && (ls__step{} > 0 ? {} < ls__end{} : {} > ls__end{}); {} += ls__step{}) {{",
                var, start, tmp, tmp, var, tmp, var, tmp, var, tmp
            ));
        }

        self.indent += 1;
        for stmt in &for_loop.body.stmts {
            self.emit_stmt(stmt);
        }
        self.indent -= 1;
        self.line("}");
        self.indent -= 1;
        self.line("}");
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn emit_expr(&mut self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Int(value) => int_literal(*value),
            ExprKind::Float(value) => float_literal(*value),
            ExprKind::Str(value) => format!("\"{}\"", escape_c(value)),
            ExprKind::Bool(value) => if *value { "1" } else { "0" }.to_string(),
            ExprKind::Var(sym) => self.var(*sym),

            ExprKind::SelfField { name, owner } => {
                let owner_name = self.class_name(*owner).to_string();
                format!(
                    "((struct {} *)(intptr_t)ls_self)->{}",
                    owner_name,
                    self.name(*name)
                )
            }

            ExprKind::Unary { op, operand } => {
                let inner = self.emit_expr(operand);
                match op {
                    UnOp::Neg => format!("(-{})", inner),
                    UnOp::Pos => format!("(+{})", inner),
                    UnOp::Not => format!("(!{})", inner),
                }
            }

            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),

            ExprKind::Call(call) => self.emit_call(call),

            ExprKind::Method {
                recv,
                name,
                args,
                target,
            } => {
                let recv_code = self.emit_expr(recv);
                let CallTarget::Method(static_class, _) = target else {
                    return recv_code; // unreachable after analysis
                };
                self.emit_method_call(*static_class, *name, &recv_code, args)
            }

            ExprKind::Field { recv, name, owner } => {
                let recv_code = self.emit_expr(recv);
                let owner = owner.unwrap_or(ClassId(0));
                let owner_name = self.class_name(owner).to_string();
                format!(
                    "((struct {} *)(intptr_t)({}))->{}",
                    owner_name,
                    recv_code,
                    self.name(*name)
                )
            }

            ExprKind::Index { recv, index } => {
                let recv = self.emit_expr(recv);
                let index = self.emit_expr(index);
                format!("array_get({}, {})", recv, index)
            }

            ExprKind::IncDec { target, inc } => {
                let target = self.emit_expr(target);
                format!("{}{}", target, if *inc { "++" } else { "--" })
            }

            ExprKind::Spawn(call) => {
                let index = self.spawn_counter;
                self.spawn_counter += 1;
                let args = call
                    .args
                    .iter()
                    .map(|a| self.emit_expr(a))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("ls_spawn_call_{}({})", index, args)
            }

            ExprKind::Await { task } => {
                let task = self.emit_expr(task);
                format!("ls_thread_join({})", task)
            }
        }
    }

    fn emit_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> String {
        let left = self.emit_expr(lhs);
        let right = self.emit_expr(rhs);

        if lhs.ty == Ty::Str {
            return match op {
                BinOp::Add => format!("ls_str_concat({}, {})", left, right),
                BinOp::Eq => format!("(strcmp({}, {}) == 0)", left, right),
                BinOp::Ne => format!("(strcmp({}, {}) != 0)", left, right),
                _ => format!("({} /* unsupported str op */ {})", left, right),
            };
        }

        let symbol = match op {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => {
                return format!("{}({}, {})", self.pow_helper(&lhs.ty), left, right);
            }
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        format!("({} {} {})", left, symbol, right)
    }

    fn emit_call(&mut self, call: &CallExpr) -> String {
        let args: Vec<String> = call.args.iter().map(|a| self.emit_expr(a)).collect();
        match &call.target {
            CallTarget::Fn(_) => format!("{}({})", self.fn_name(call.name), args.join(", ")),
            CallTarget::Builtin(symbol) => format!("{}({})", symbol, args.join(", ")),
            CallTarget::Ctor(id) => {
                format!("{}_new({})", self.class_name(*id), args.join(", "))
            }
            CallTarget::Method(class_id, name) => {
                // Bare method call inside a method body: implicit self.
                self.emit_method_call(*class_id, *name, "ls_self", &call.args)
            }
            CallTarget::Unresolved => format!("{}({})", self.name(call.name), args.join(", ")),
        }
    }

    fn emit_method_call(
        &mut self,
        static_class: ClassId,
        name: Symbol,
        recv_code: &str,
        args: &[Expr],
    ) -> String {
        let mut all_args = vec![recv_code.to_string()];
        all_args.extend(args.iter().map(|a| self.emit_expr(a)));
        let joined = all_args.join(", ");

        let is_virtual = self
            .analysis
            .vtable(static_class)
            .iter()
            .any(|slot| slot.name == name);
        if is_virtual {
            let root = self.analysis.root_of(static_class);
            let class_name = self.class_name(static_class).to_string();
            let root_name = self.class_name(root).to_string();
            format!(
                "((const struct {}_vt *)((struct {} *)(intptr_t)({}))->vt)->{}({})",
                class_name,
                root_name,
                recv_code,
                self.name(name),
                joined
            )
        } else {
            let home = self
                .analysis
                .resolve_impl(static_class, name)
                .unwrap_or(static_class);
            format!("{}({})", self.method_name(home, name), joined)
        }
    }

    // ------------------------------------------------------------------
    // main
    // ------------------------------------------------------------------

    fn emit_main(&mut self) {
        let module = self.module;
        self.line("int main(int argc, char **argv) {");
        self.indent += 1;
        self.line("ls_cli_init(argc, argv);");
        for item in &module.items {
            if let Item::Function(func) = item {
                if func.is_flag {
                    let flag_name = self.name(func.name).to_string();
                    let fn_name = self.fn_name(func.name);
                    self.line(&format!(
                        "if (ls_cli_has(\"{}\")) {}();",
                        escape_c(&flag_name),
                        fn_name
                    ));
                }
            }
        }

        let entry_ret = module
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(func) if func.name == self.entry => Some(func.ret.clone()),
                _ => None,
            })
            .unwrap_or(Ty::Void);
        let entry = self.fn_name(self.entry);
        if entry_ret == Ty::Void {
            self.line(&format!("{}();", entry));
            self.line("return 0;");
        } else {
            self.line(&format!("return (int){}();", entry));
        }
        self.indent -= 1;
        self.line("}");
    }
}

// ----------------------------------------------------------------------
// Literals and escapes
// ----------------------------------------------------------------------

fn int_literal(value: i64) -> String {
    if value == i64::MIN {
        "(-9223372036854775807LL - 1LL)".to_string()
    } else {
        format!("{}LL", value)
    }
}

fn float_literal(value: f64) -> String {
    if value.is_nan() {
        "(0.0 / 0.0)".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "(1.0 / 0.0)".to_string()
        } else {
            "(-1.0 / 0.0)".to_string()
        }
    } else {
        format!("{:?}", value)
    }
}

fn escape_c(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\000"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

// ----------------------------------------------------------------------
// Tree scans
// ----------------------------------------------------------------------

fn block_uses_state_speed(block: &Block) -> bool {
    block.stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Marker(Marker::StateSpeed) => true,
        StmtKind::If { arms, else_block } => {
            arms.iter().any(|arm| block_uses_state_speed(&arm.body))
                || else_block
                    .as_ref()
                    .map(block_uses_state_speed)
                    .unwrap_or(false)
        }
        StmtKind::While { body, .. } => block_uses_state_speed(body),
        StmtKind::For(for_loop) => block_uses_state_speed(&for_loop.body),
        StmtKind::Block(block) => block_uses_state_speed(block),
        _ => false,
    })
}

/// Counted loops qualify for vectorization hints when their body is pure
/// straight-line arithmetic (no calls, no nested control flow).
fn loop_is_vectorizable(block: &Block) -> bool {
    block.stmts.iter().all(|stmt| match &stmt.kind {
        StmtKind::Assign { target, value, .. } => {
            expr_is_simple(target) && expr_is_simple(value)
        }
        StmtKind::Declare {
            init: Some(init), ..
        } => expr_is_simple(init),
        StmtKind::Declare { init: None, .. } | StmtKind::Empty => true,
        StmtKind::Expr(expr) => expr_is_simple(expr),
        _ => false,
    })
}

fn expr_is_simple(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Bool(_)
        | ExprKind::Var(_)
        | ExprKind::SelfField { .. } => true,
        ExprKind::Unary { operand, .. } => expr_is_simple(operand),
        ExprKind::Binary { op, lhs, rhs } => {
            *op != BinOp::Pow && expr_is_simple(lhs) && expr_is_simple(rhs)
        }
        ExprKind::IncDec { target, .. } => expr_is_simple(target),
        _ => false,
    }
}

fn collect_host_symbols(module: &Module, out: &mut BTreeSet<String>) {
    let mut has_spawn = false;
    let mut has_await = false;
    visit_exprs(module, &mut |expr| match &expr.kind {
        ExprKind::Call(call) => {
            if let CallTarget::Builtin(symbol) = &call.target {
                if host_prototype(symbol).is_some() {
                    out.insert(symbol.clone());
                }
            }
        }
        ExprKind::Spawn(_) => has_spawn = true,
        ExprKind::Await { .. } => has_await = true,
        _ => {}
    });
    visit_releases(module, &mut |free_fn| {
        if host_prototype(free_fn).is_some() {
            out.insert(free_fn.to_string());
        }
    });
    if has_spawn {
        out.insert("ls_thread_spawn".to_string());
    }
    if has_spawn || has_await {
        out.insert("ls_thread_join".to_string());
    }
}

/// Spawn sites in the exact order the emitter meets them: free functions
/// in item order, then per class the methods, the constructor's base
/// arguments, and the constructor body.
fn collect_spawns<'m>(module: &'m Module, out: &mut Vec<&'m CallExpr>) {
    let mut push = |expr: &'m Expr| {
        if let ExprKind::Spawn(call) = &expr.kind {
            out.push(call);
        }
    };
    for item in &module.items {
        if let Item::Function(func) = item {
            visit_block(&func.body, &mut push);
        }
    }
    for item in &module.items {
        if let Item::Class(class) = item {
            for method in &class.methods {
                visit_block(&method.func.body, &mut push);
            }
            if let Some(ctor) = &class.ctor {
                if let Some(args) = &ctor.base_args {
                    for arg in args {
                        visit_expr(arg, &mut push);
                    }
                }
                visit_block(&ctor.body, &mut push);
            }
        }
    }
    for item in &module.items {
        if let Item::Stmt(stmt) = item {
            visit_stmt(stmt, &mut push);
        }
    }
}

fn spawn_ret_is_void(module: &Module, call: &CallExpr) -> bool {
    module
        .items
        .iter()
        .find_map(|item| match item {
            Item::Function(func) if func.name == call.name => Some(func.ret == Ty::Void),
            _ => None,
        })
        .unwrap_or(false)
}

fn visit_exprs<'m, F: FnMut(&'m Expr)>(module: &'m Module, f: &mut F) {
    for item in &module.items {
        match item {
            Item::Function(func) => visit_block(&func.body, f),
            Item::Class(class) => {
                if let Some(ctor) = &class.ctor {
                    if let Some(args) = &ctor.base_args {
                        for arg in args {
                            visit_expr(arg, f);
                        }
                    }
                    visit_block(&ctor.body, f);
                }
                for method in &class.methods {
                    visit_block(&method.func.body, f);
                }
            }
            Item::Stmt(stmt) => visit_stmt(stmt, f),
        }
    }
}

fn visit_block<'m, F: FnMut(&'m Expr)>(block: &'m Block, f: &mut F) {
    for stmt in &block.stmts {
        visit_stmt(stmt, f);
    }
}

fn visit_stmt<'m, F: FnMut(&'m Expr)>(stmt: &'m Stmt, f: &mut F) {
    match &stmt.kind {
        StmtKind::Declare { init, .. } => {
            if let Some(expr) = init {
                visit_expr(expr, f);
            }
        }
        StmtKind::Assign { target, value, .. } => {
            visit_expr(target, f);
            visit_expr(value, f);
        }
        StmtKind::If { arms, else_block } => {
            for arm in arms {
                visit_expr(&arm.cond, f);
                visit_block(&arm.body, f);
            }
            if let Some(block) = else_block {
                visit_block(block, f);
            }
        }
        StmtKind::While { cond, body } => {
            visit_expr(cond, f);
            visit_block(body, f);
        }
        StmtKind::For(for_loop) => {
            visit_expr(&for_loop.start, f);
            visit_expr(&for_loop.end, f);
            if let Some(step) = &for_loop.step {
                visit_expr(step, f);
            }
            visit_block(&for_loop.body, f);
        }
        StmtKind::Return { value, .. } => {
            if let Some(expr) = value {
                visit_expr(expr, f);
            }
        }
        StmtKind::Expr(expr) => visit_expr(expr, f),
        StmtKind::Block(block) => visit_block(block, f),
        _ => {}
    }
}

fn visit_expr<'m, F: FnMut(&'m Expr)>(expr: &'m Expr, f: &mut F) {
    f(expr);
    match &expr.kind {
        ExprKind::Unary { operand, .. } => visit_expr(operand, f),
        ExprKind::Binary { lhs, rhs, .. } => {
            visit_expr(lhs, f);
            visit_expr(rhs, f);
        }
        ExprKind::Call(call) | ExprKind::Spawn(call) => {
            for arg in &call.args {
                visit_expr(arg, f);
            }
        }
        ExprKind::Method { recv, args, .. } => {
            visit_expr(recv, f);
            for arg in args {
                visit_expr(arg, f);
            }
        }
        ExprKind::Field { recv, .. } => visit_expr(recv, f),
        ExprKind::Index { recv, index } => {
            visit_expr(recv, f);
            visit_expr(index, f);
        }
        ExprKind::IncDec { target, .. } => visit_expr(target, f),
        ExprKind::Await { task } => visit_expr(task, f),
        _ => {}
    }
}

fn visit_releases<F: FnMut(&str)>(module: &Module, f: &mut F) {
    fn in_block<F: FnMut(&str)>(block: &Block, f: &mut F) {
        for stmt in &block.stmts {
            in_stmt(stmt, f);
        }
    }
    fn in_stmt<F: FnMut(&str)>(stmt: &Stmt, f: &mut F) {
        match &stmt.kind {
            StmtKind::Release(release) => f(&release.free_fn),
            StmtKind::Return { releases, .. }
            | StmtKind::Break { releases }
            | StmtKind::Continue { releases } => {
                for release in releases {
                    f(&release.free_fn);
                }
            }
            StmtKind::If { arms, else_block } => {
                for arm in arms {
                    in_block(&arm.body, f);
                }
                if let Some(block) = else_block {
                    in_block(block, f);
                }
            }
            StmtKind::While { body, .. } => in_block(body, f),
            StmtKind::For(for_loop) => in_block(&for_loop.body, f),
            StmtKind::Block(block) => in_block(block, f),
            _ => {}
        }
    }
    for item in &module.items {
        match item {
            Item::Function(func) => in_block(&func.body, f),
            Item::Class(class) => {
                if let Some(ctor) = &class.ctor {
                    in_block(&ctor.body, f);
                }
                for method in &class.methods {
                    in_block(&method.func.body, f);
                }
            }
            Item::Stmt(stmt) => in_stmt(stmt, f),
        }
    }
}

// ----------------------------------------------------------------------
// Runtime prelude
// ----------------------------------------------------------------------

const PRELUDE: &str = r#"/* Generated by lsc. Do not edit. */
#include <stdint.h>
#include <stdio.h>
#include <stdlib.h>
#include <string.h>
#include <math.h>
#if defined(_WIN32)
#include <windows.h>
#else
#include <sys/time.h>
#endif

typedef int64_t ls_handle;
typedef const char *ls_str;

static int64_t ls_now_us(void) {
#if defined(_WIN32)
    LARGE_INTEGER f, c;
    QueryPerformanceFrequency(&f);
    QueryPerformanceCounter(&c);
    return (int64_t)(c.QuadPart * 1000000 / f.QuadPart);
#else
    struct timeval tv;
    gettimeofday(&tv, 0);
    return (int64_t)tv.tv_sec * 1000000 + (int64_t)tv.tv_usec;
#endif
}

static void ls_console_format(void) {
#if defined(_WIN32)
    SetConsoleOutputCP(65001);
#endif
}

static void ls_console_release(void) {
#if defined(_WIN32)
    FreeConsole();
#endif
}

#define ls_print_i64(v) printf("%lld", (long long)(v))
#define ls_print_i32(v) printf("%d", (int32_t)(v))
#define ls_print_f64(v) printf("%g", (double)(v))
#define ls_print_f32(v) printf("%g", (double)(v))
#define ls_print_str(v) fputs((v), stdout)
#define ls_print_bool(v) fputs((v) ? "true" : "false", stdout)
#define ls_println_i64(v) printf("%lld\n", (long long)(v))
#define ls_println_i32(v) printf("%d\n", (int32_t)(v))
#define ls_println_f64(v) printf("%g\n", (double)(v))
#define ls_println_f32(v) printf("%g\n", (double)(v))
#define ls_println_str(v) puts(v)
#define ls_println_bool(v) puts((v) ? "true" : "false")

#define ls_to_i32(v) ((int32_t)(v))
#define ls_to_i64(v) ((int64_t)(v))
#define ls_to_f32(v) ((float)(v))
#define ls_to_f64(v) ((double)(v))

static int64_t ls_pow_i64(int64_t base, int64_t e) {
    if (e < 0) {
        if (base == 1) return 1;
        if (base == -1) return (e % 2 == 0) ? 1 : -1;
        return 0;
    }
    int64_t r = 1;
    uint64_t n = (uint64_t)e;
    while (n > 0) {
        if (n & 1) r = (int64_t)((uint64_t)r * (uint64_t)base);
        base = (int64_t)((uint64_t)base * (uint64_t)base);
        n >>= 1;
    }
    return r;
}
static int32_t ls_pow_i32(int32_t b, int32_t e) { return (int32_t)ls_pow_i64(b, e); }
static double ls_pow_f64(double b, double e) { return pow(b, e); }
static float ls_pow_f32(float b, float e) { return (float)pow(b, e); }

static int64_t max_i64(int64_t a, int64_t b) { return a > b ? a : b; }
static int64_t min_i64(int64_t a, int64_t b) { return a < b ? a : b; }
static int64_t abs_i64(int64_t a) { return a < 0 ? -a : a; }
static int64_t clamp_i64(int64_t v, int64_t lo, int64_t hi) { return v < lo ? lo : (v > hi ? hi : v); }
static int32_t max_i32(int32_t a, int32_t b) { return a > b ? a : b; }
static int32_t min_i32(int32_t a, int32_t b) { return a < b ? a : b; }
static int32_t abs_i32(int32_t a) { return a < 0 ? -a : a; }
static int32_t clamp_i32(int32_t v, int32_t lo, int32_t hi) { return v < lo ? lo : (v > hi ? hi : v); }
static double max_f64(double a, double b) { return a > b ? a : b; }
static double min_f64(double a, double b) { return a < b ? a : b; }
static double abs_f64(double a) { return a < 0 ? -a : a; }
static double clamp_f64(double v, double lo, double hi) { return v < lo ? lo : (v > hi ? hi : v); }
static float max_f32(float a, float b) { return a > b ? a : b; }
static float min_f32(float a, float b) { return a < b ? a : b; }
static float abs_f32(float a) { return a < 0 ? -a : a; }
static float clamp_f32(float v, float lo, float hi) { return v < lo ? lo : (v > hi ? hi : v); }

static ls_str ls_str_concat(ls_str a, ls_str b) {
    size_t la = strlen(a), lb = strlen(b);
    char *s = (char *)malloc(la + lb + 1);
    memcpy(s, a, la);
    memcpy(s + la, b, lb + 1);
    return s;
}
static int64_t ls_str_len(ls_str s) { return (int64_t)strlen(s); }
static ls_str ls_str_from_i64(int64_t v) {
    char *s = (char *)malloc(32);
    snprintf(s, 32, "%lld", (long long)v);
    return s;
}
static ls_str ls_str_from_f64(double v) {
    char *s = (char *)malloc(64);
    snprintf(s, 64, "%g", v);
    return s;
}
static ls_str ls_str_from_bool(int32_t v) { return v ? "true" : "false"; }
static ls_str ls_input(void) {
    char buf[4096];
    if (!fgets(buf, sizeof buf, stdin)) return "";
    size_t n = strlen(buf);
    if (n && buf[n - 1] == '\n') buf[--n] = 0;
    char *s = (char *)malloc(n + 1);
    memcpy(s, buf, n + 1);
    return s;
}
"#;

const CLI_RUNTIME: &str = r#"
static int ls_cli_argc = 0;
static char **ls_cli_argv = 0;
static void ls_cli_init(int argc, char **argv) { ls_cli_argc = argc; ls_cli_argv = argv; }
static int64_t ls_cli_baked_count(void) {
    int64_t n = 0;
    while (ls_cli_baked[n]) n++;
    return n;
}
static int64_t ls_cli_token_count(void) {
    int64_t runtime = ls_cli_argc > 1 ? ls_cli_argc - 1 : 0;
    return ls_cli_baked_count() + runtime;
}
static ls_str ls_cli_token(int64_t i) {
    if (i < 0) return "";
    int64_t baked = ls_cli_baked_count();
    if (i < baked) return ls_cli_baked[i];
    i -= baked;
    if (i + 1 < ls_cli_argc) return ls_cli_argv[i + 1];
    return "";
}
static int32_t ls_cli_has(ls_str name) {
    int64_t count = ls_cli_token_count();
    for (int64_t i = 0; i < count; i++) {
        ls_str t = ls_cli_token(i);
        while (*t == '-') t++;
        if (strcmp(t, name) == 0) return 1;
    }
    return 0;
}
static ls_str ls_cli_value(ls_str name) {
    int64_t count = ls_cli_token_count();
    for (int64_t i = 0; i + 1 < count; i++) {
        ls_str t = ls_cli_token(i);
        while (*t == '-') t++;
        if (strcmp(t, name) == 0) return ls_cli_token(i + 1);
    }
    return "";
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use lsc_par::Parser;
    use lsc_util::{FileId, Handler, Interner};

    fn lower(source: &str) -> String {
        let handler = Handler::new();
        let mut interner = Interner::new();
        let tokens = lsc_lex::tokenize(source, FileId(0), &handler, &mut interner);
        let mut module = Parser::new(tokens, &handler, &mut interner).parse();
        let analysis = lsc_sem::analyze(&mut module, &handler, &mut interner);
        assert!(
            !handler.has_errors(),
            "front-end errors: {:?}",
            handler.diagnostics()
        );
        // Hoist top-level statements into an entry, the way the driver does.
        let entry = interner.intern("main");
        let module = hoist(module, entry, &mut interner);
        emit_c(&module, &analysis, &interner, entry, &[])
    }

    /// Test-local version of the driver's entry hoisting.
    fn hoist(mut module: Module, entry: Symbol, _interner: &mut Interner) -> Module {
        let mut top = Vec::new();
        let mut items = Vec::new();
        for item in module.items.drain(..) {
            match item {
                Item::Stmt(stmt) => top.push(stmt),
                other => items.push(other),
            }
        }
        if !top.is_empty() {
            items.push(Item::Function(FnDecl {
                name: entry,
                params: Vec::new(),
                ret: Ty::Void,
                throws: Vec::new(),
                body: Block {
                    stmts: top,
                    span: lsc_util::Span::DUMMY,
                },
                is_flag: false,
                span: lsc_util::Span::DUMMY,
            }));
        }
        Module { items }
    }

    #[test]
    fn test_hello_world_shape() {
        let c = lower("print(\"hello\")\n");
        assert!(c.contains("typedef int64_t ls_handle;"));
        assert!(c.contains("ls_print_str(\"hello\")"));
        assert!(c.contains("int main(int argc, char **argv)"));
        assert!(c.contains("ls_fn_main();"));
    }

    #[test]
    fn test_for_loop_lowering() {
        let c = lower("declare s = 0\nfor i in 0..1000 do\ns = s + i\nend\nprintln(s)\n");
        assert!(c.contains("for (int64_t ls_i = 0LL;"));
        assert!(c.contains("ls_println_i64"));
    }

    #[test]
    fn test_parallel_loop_has_omp_guard() {
        let c = lower("declare owned a = array_new()\nparallel for i in 0..1000 do\narray_set(a, i, i)\nend\n");
        assert!(c.contains("#ifdef _OPENMP"));
        assert!(c.contains("#pragma omp parallel for simd"));
        assert!(c.contains("array_free(ls_a);"));
    }

    #[test]
    fn test_vectorize_hint_on_simple_counted_loop() {
        let c = lower("declare s = 0\nfor i in 0..100000 do\ns += i\nend\nprintln(s)\n");
        assert!(c.contains("#pragma clang loop vectorize(enable) interleave(enable)"));
    }

    #[test]
    fn test_no_vectorize_hint_when_body_calls() {
        let c = lower("for i in 0..100000 do\nprintln(i)\nend\n");
        assert!(!c.contains("#pragma clang loop vectorize"));
    }

    #[test]
    fn test_zero_step_terminates() {
        let c = lower("declare n = 10\nfor i in 0..n step 0 do\nprintln(i)\nend\n");
        // Constant zero step never iterates.
        assert!(c.contains("for (int64_t ls_i = 0LL; 0; )"));
    }

    #[test]
    fn test_host_prototypes_only_for_referenced_symbols() {
        let c = lower("declare owned d = dict_new()\ndict_set(d, \"k\", 1)\n");
        assert!(c.contains("ls_handle dict_new(void);"));
        assert!(c.contains("void dict_set(ls_handle d, ls_str k, int64_t v);"));
        assert!(!c.contains("ls_handle canvas_new"));
    }

    #[test]
    fn test_class_lowering_with_vtable() {
        let source = "class Shape do\n\
                      protected w: i64\n\
                      constructor(w0: i64) do\nw = w0\nend\n\
                      virtual area() -> i64 do\nreturn w\nend\n\
                      end\n\
                      class Square extends Shape do\n\
                      constructor(s: i64) : Shape(s) do\nend\n\
                      override area() -> i64 do\nreturn w * w\nend\n\
                      end\n\
                      declare sq = Square(4)\nprintln(sq.area())\n";
        let c = lower(source);
        assert!(c.contains("struct Shape_vt {"));
        assert!(c.contains("const void *vt;"));
        assert!(c.contains("struct Shape base;"));
        assert!(c.contains("Square_vtable"));
        assert!(c.contains("Shape_init(ls_self, "));
        assert!(c.contains("->vt)->area("));
        assert!(c.contains("static void Square_free(ls_handle ls_self)"));
    }

    #[test]
    fn test_state_speed_marker() {
        let c = lower("bench() do\n.stateSpeed()\nend\nbench()\n");
        assert!(c.contains("int64_t ls__fn_entry_us = ls_now_us();"));
        assert!(c.contains("speed_us=%lld"));
    }

    #[test]
    fn test_power_lowering() {
        let c = lower("declare b = 3\ndeclare x = b ** 4\nb **= 2\nprintln(x)\n");
        assert!(c.contains("ls_pow_i64(ls_b, 4LL)"));
        assert!(c.contains("ls_b = ls_pow_i64(ls_b, 2LL);"));
    }

    #[test]
    fn test_spawn_and_await_lowering() {
        let source = "work(n: i64) -> i64 do\nreturn n\nend\n\
                      declare t = spawn work(7)\nprintln(await t)\n";
        let c = lower(source);
        assert!(c.contains("struct ls_spawn_ctx_0 {"));
        assert!(c.contains("ls_thread_spawn(ls_spawn_tramp_0, ctx)"));
        assert!(c.contains("ls_spawn_call_0(7LL)"));
        assert!(c.contains("ls_thread_join(ls_t)"));
        assert!(c.contains("ls_handle ls_thread_spawn"));
    }

    #[test]
    fn test_flag_functions_wired_into_main() {
        let c = lower("flag verbose() do\nprintln(\"verbose on\")\nend\nprintln(1)\n");
        assert!(c.contains("if (ls_cli_has(\"verbose\")) ls_fn_verbose();"));
    }

    #[test]
    fn test_string_comparison_uses_strcmp() {
        let c = lower("declare a = \"x\"\ndeclare b = input()\nif a == b do\nprintln(1)\nend\n");
        assert!(c.contains("strcmp(ls_a, ls_b) == 0"));
    }

    #[test]
    fn test_escapes_in_string_literals() {
        let c = lower("print(\"a\\tb\\n\")\n");
        assert!(c.contains("\"a\\tb\\n\""));
    }
}
