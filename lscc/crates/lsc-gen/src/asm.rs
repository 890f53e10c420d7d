//! x86-64 backend for a restricted AST subset.
//!
//! Supported: functions over `i64`/`bool` with up to six arguments, integer
//! arithmetic and comparison, short-circuit logic, `if`/`while`/`for`,
//! `break`/`continue`, calls, `return`, and print/println of integers and
//! string literals. Everything else produces an `asm-unsupported: <reason>`
//! error; the driver logs it and falls back to the C backend, which is how
//! the supported set grows over time.
//!
//! Code generation is a simple stack machine: expressions evaluate into
//! `%rax`, binary operators spill the left side into frame slots below
//! the locals (never the machine stack, so `%rsp` stays 16-aligned at
//! every call). Locals live in fixed `%rbp` slots assigned by a pre-pass.

use lsc_par::ast::{
    AssignOp, BinOp, Block, CallExpr, CallTarget, Expr, ExprKind, FnDecl, ForLoop, Item, Module,
    Stmt, StmtKind, Ty, UnOp,
};
use lsc_sem::Analysis;
use lsc_util::{FxHashMap, Interner, Symbol};

use crate::BackendError;

/// Target calling convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsmTarget {
    /// System V AMD64 (Linux, macOS, BSD)
    SystemV,
    /// Microsoft x64
    Win64,
}

impl AsmTarget {
    /// The convention of the machine the compiler runs on.
    pub fn host() -> Self {
        if cfg!(windows) {
            AsmTarget::Win64
        } else {
            AsmTarget::SystemV
        }
    }

    fn arg_regs(&self) -> &'static [&'static str] {
        match self {
            AsmTarget::SystemV => &["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"],
            AsmTarget::Win64 => &["%rcx", "%rdx", "%r8", "%r9"],
        }
    }

    fn shadow_space(&self) -> usize {
        match self {
            AsmTarget::SystemV => 0,
            AsmTarget::Win64 => 32,
        }
    }

    fn printf_symbol(&self) -> &'static str {
        match self {
            AsmTarget::SystemV => "printf@PLT",
            AsmTarget::Win64 => "printf",
        }
    }
}

/// Emit assembly for the module, or the reason it cannot be done.
pub fn emit_asm(
    module: &Module,
    analysis: &Analysis,
    interner: &Interner,
    entry: Symbol,
) -> Result<String, BackendError> {
    let _ = analysis;
    let mut backend = AsmBackend {
        module,
        interner,
        target: AsmTarget::host(),
        out: String::new(),
        strings: Vec::new(),
        label_counter: 0,
        slots: FxHashMap::default(),
        loop_slots: Vec::new(),
        loop_counter: 0,
        locals_size: 0,
        spill_depth: 0,
        max_spill: 0,
        loop_labels: Vec::new(),
    };
    backend.emit(entry)?;
    Ok(backend.out)
}

/// Emit assembly for an explicit target (used by tests).
pub fn emit_asm_for_target(
    module: &Module,
    interner: &Interner,
    entry: Symbol,
    target: AsmTarget,
) -> Result<String, BackendError> {
    let mut backend = AsmBackend {
        module,
        interner,
        target,
        out: String::new(),
        strings: Vec::new(),
        label_counter: 0,
        slots: FxHashMap::default(),
        loop_slots: Vec::new(),
        loop_counter: 0,
        locals_size: 0,
        spill_depth: 0,
        max_spill: 0,
        loop_labels: Vec::new(),
    };
    backend.emit(entry)?;
    Ok(backend.out)
}

fn unsupported(reason: impl Into<String>) -> BackendError {
    BackendError::Unsupported(reason.into())
}

struct AsmBackend<'a> {
    module: &'a Module,
    interner: &'a Interner,
    target: AsmTarget,
    out: String,
    /// Interned string literals for the rodata section
    strings: Vec<String>,
    label_counter: usize,
    /// Local variable slots, as negative offsets from %rbp
    slots: FxHashMap<Symbol, i64>,
    /// Hidden (end, step) slots per `for` loop, in encounter order
    loop_slots: Vec<(i64, i64)>,
    loop_counter: usize,
    /// Bytes used by named locals and hidden loop slots
    locals_size: i64,
    /// Current / maximum expression spill depth (8-byte slots)
    spill_depth: i64,
    max_spill: i64,
    /// (break label, continue label) stack
    loop_labels: Vec<(String, String)>,
}

impl<'a> AsmBackend<'a> {
    fn emit(&mut self, entry: Symbol) -> Result<(), BackendError> {
        for item in &self.module.items {
            match item {
                Item::Class(_) => return Err(unsupported("classes")),
                Item::Stmt(_) => return Err(unsupported("top-level statement")),
                Item::Function(func) => {
                    if func.is_flag {
                        return Err(unsupported("script flags"));
                    }
                }
            }
        }

        self.line("    .text");
        let module = self.module;
        for item in &module.items {
            if let Item::Function(func) = item {
                self.emit_function(func)?;
            }
        }
        self.emit_entry(entry)?;
        self.emit_rodata();
        Ok(())
    }

    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn name(&self, sym: Symbol) -> &str {
        self.interner.resolve(sym)
    }

    fn fn_label(&self, sym: Symbol) -> String {
        format!("ls_fn_{}", self.name(sym))
    }

    fn fresh_label(&mut self, tag: &str) -> String {
        let id = self.label_counter;
        self.label_counter += 1;
        format!(".L{}_{}", tag, id)
    }

    fn string_label(&mut self, value: &str) -> String {
        if let Some(idx) = self.strings.iter().position(|s| s == value) {
            return format!(".Lstr{}", idx);
        }
        self.strings.push(value.to_string());
        format!(".Lstr{}", self.strings.len() - 1)
    }

    // ------------------------------------------------------------------
    // Frame layout
    // ------------------------------------------------------------------

    fn scalar_slot_ty(ty: &Ty) -> Result<(), BackendError> {
        match ty {
            Ty::I64 | Ty::Bool => Ok(()),
            other => Err(unsupported(format!("local of type {}", other.base_name()))),
        }
    }

    fn assign_slots(&mut self, func: &FnDecl) -> Result<(), BackendError> {
        self.slots.clear();
        self.loop_slots.clear();
        self.loop_counter = 0;
        let mut next: i64 = 0;

        if func.params.len() > self.target.arg_regs().len() {
            return Err(unsupported("more than register-passed arguments"));
        }
        for param in &func.params {
            Self::scalar_slot_ty(&param.ty)?;
            next += 8;
            self.slots.insert(param.name, -next);
        }
        match &func.ret {
            Ty::Void | Ty::I64 | Ty::Bool => {}
            other => {
                return Err(unsupported(format!(
                    "return type {}",
                    other.base_name()
                )))
            }
        }

        self.scan_block(&func.body, &mut next)?;
        self.locals_size = next;
        Ok(())
    }

    fn scan_block(&mut self, block: &Block, next: &mut i64) -> Result<(), BackendError> {
        for stmt in &block.stmts {
            self.scan_stmt(stmt, next)?;
        }
        Ok(())
    }

    fn scan_stmt(&mut self, stmt: &Stmt, next: &mut i64) -> Result<(), BackendError> {
        match &stmt.kind {
            StmtKind::Declare {
                name, ty, is_owned, ..
            } => {
                if *is_owned {
                    return Err(unsupported("owned handles"));
                }
                Self::scalar_slot_ty(ty)?;
                if !self.slots.contains_key(name) {
                    *next += 8;
                    self.slots.insert(*name, -*next);
                }
                Ok(())
            }
            StmtKind::If { arms, else_block } => {
                for arm in arms {
                    self.scan_block(&arm.body, next)?;
                }
                if let Some(block) = else_block {
                    self.scan_block(block, next)?;
                }
                Ok(())
            }
            StmtKind::While { body, .. } => self.scan_block(body, next),
            StmtKind::For(for_loop) => {
                if for_loop.parallel {
                    return Err(unsupported("parallel for"));
                }
                if !self.slots.contains_key(&for_loop.var) {
                    *next += 8;
                    self.slots.insert(for_loop.var, -*next);
                }
                *next += 16;
                self.loop_slots.push((-(*next - 8), -*next));
                self.scan_block(&for_loop.body, next)
            }
            StmtKind::Block(block) => self.scan_block(block, next),
            StmtKind::Marker(_) => Err(unsupported("scoped markers")),
            StmtKind::Release(_) => Err(unsupported("owned handles")),
            _ => Ok(()),
        }
    }

    fn slot(&self, sym: Symbol) -> Result<i64, BackendError> {
        self.slots
            .get(&sym)
            .copied()
            .ok_or_else(|| unsupported(format!("unplaced variable `{}`", self.name(sym))))
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn emit_function(&mut self, func: &'a FnDecl) -> Result<(), BackendError> {
        self.assign_slots(func)?;
        self.spill_depth = 0;
        self.max_spill = 0;

        // The body is emitted first so the prologue can reserve the
        // final frame (locals plus expression spill slots) in one shot.
        let saved = std::mem::take(&mut self.out);
        let regs = self.target.arg_regs();
        for (i, param) in func.params.iter().enumerate() {
            let off = self.slot(param.name)?;
            self.line(&format!("    movq {}, {}(%rbp)", regs[i], off));
        }
        let body_result = self.emit_block(&func.body);
        // Fall-through return for void functions.
        self.line("    xorl %eax, %eax");
        self.line("    leave");
        self.line("    ret");
        self.line("");
        let body = std::mem::replace(&mut self.out, saved);
        body_result?;

        let frame = (self.locals_size + 8 * self.max_spill + 15) & !15;
        let label = self.fn_label(func.name);
        self.line(&format!("{}:", label));
        self.line("    pushq %rbp");
        self.line("    movq %rsp, %rbp");
        if frame > 0 {
            self.line(&format!("    subq ${}, %rsp", frame));
        }
        self.raw_body(&body);
        Ok(())
    }

    fn raw_body(&mut self, body: &str) {
        self.out.push_str(body);
    }

    /// Reserve an expression spill slot below the named locals.
    fn push_spill(&mut self) -> i64 {
        self.spill_depth += 1;
        self.max_spill = self.max_spill.max(self.spill_depth);
        -(self.locals_size + 8 * self.spill_depth)
    }

    fn pop_spill(&mut self) {
        self.spill_depth -= 1;
    }

    fn emit_entry(&mut self, entry: Symbol) -> Result<(), BackendError> {
        let exists = self.module.items.iter().any(
            |item| matches!(item, Item::Function(func) if func.name == entry),
        );
        if !exists {
            return Err(BackendError::MissingEntry(self.name(entry).to_string()));
        }
        let label = self.fn_label(entry);
        self.line("    .globl main");
        self.line("main:");
        self.line("    pushq %rbp");
        self.line("    movq %rsp, %rbp");
        if self.target.shadow_space() > 0 {
            self.line(&format!("    subq ${}, %rsp", self.target.shadow_space()));
        }
        self.line(&format!("    callq {}", label));
        self.line("    leave");
        self.line("    ret");
        self.line("");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn emit_block(&mut self, block: &Block) -> Result<(), BackendError> {
        for stmt in &block.stmts {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), BackendError> {
        match &stmt.kind {
            StmtKind::Declare { name, init, .. } => {
                match init {
                    Some(expr) => self.emit_expr(expr)?,
                    None => self.line("    xorl %eax, %eax"),
                }
                let off = self.slot(*name)?;
                self.line(&format!("    movq %rax, {}(%rbp)", off));
                Ok(())
            }

            StmtKind::Assign { target, op, value } => {
                let ExprKind::Var(name) = target.kind else {
                    return Err(unsupported("assignment through a non-variable target"));
                };
                let off = self.slot(name)?;
                match op {
                    AssignOp::Set => {
                        self.emit_expr(value)?;
                        self.line(&format!("    movq %rax, {}(%rbp)", off));
                    }
                    AssignOp::Add => {
                        self.emit_expr(value)?;
                        self.line(&format!("    addq %rax, {}(%rbp)", off));
                    }
                    AssignOp::Sub => {
                        self.emit_expr(value)?;
                        self.line(&format!("    subq %rax, {}(%rbp)", off));
                    }
                    AssignOp::Mul => {
                        self.emit_expr(value)?;
                        self.line(&format!("    imulq {}(%rbp), %rax", off));
                        self.line(&format!("    movq %rax, {}(%rbp)", off));
                    }
                    AssignOp::Div | AssignOp::Rem => {
                        self.emit_expr(value)?;
                        self.line("    movq %rax, %rcx");
                        self.line(&format!("    movq {}(%rbp), %rax", off));
                        self.line("    cqto");
                        self.line("    idivq %rcx");
                        if *op == AssignOp::Rem {
                            self.line("    movq %rdx, %rax");
                        }
                        self.line(&format!("    movq %rax, {}(%rbp)", off));
                    }
                    AssignOp::Pow => return Err(unsupported("power operator")),
                }
                Ok(())
            }

            StmtKind::If { arms, else_block } => {
                let end = self.fresh_label("if_end");
                for arm in arms {
                    let next = self.fresh_label("if_next");
                    self.emit_expr(&arm.cond)?;
                    self.line("    testq %rax, %rax");
                    self.line(&format!("    je {}", next));
                    self.emit_block(&arm.body)?;
                    self.line(&format!("    jmp {}", end));
                    self.line(&format!("{}:", next));
                }
                if let Some(block) = else_block {
                    self.emit_block(block)?;
                }
                self.line(&format!("{}:", end));
                Ok(())
            }

            StmtKind::While { cond, body } => {
                let start = self.fresh_label("while_cond");
                let end = self.fresh_label("while_end");
                self.line(&format!("{}:", start));
                self.emit_expr(cond)?;
                self.line("    testq %rax, %rax");
                self.line(&format!("    je {}", end));
                self.loop_labels.push((end.clone(), start.clone()));
                self.emit_block(body)?;
                self.loop_labels.pop();
                self.line(&format!("    jmp {}", start));
                self.line(&format!("{}:", end));
                Ok(())
            }

            StmtKind::For(for_loop) => self.emit_for(for_loop),

            StmtKind::Return { value, releases } => {
                if !releases.is_empty() {
                    return Err(unsupported("owned handles"));
                }
                match value {
                    Some(expr) => self.emit_expr(expr)?,
                    None => self.line("    xorl %eax, %eax"),
                }
                self.line("    leave");
                self.line("    ret");
                Ok(())
            }

            StmtKind::Break { releases } => {
                if !releases.is_empty() {
                    return Err(unsupported("owned handles"));
                }
                let (end, _) = self
                    .loop_labels
                    .last()
                    .cloned()
                    .ok_or_else(|| unsupported("break outside loop"))?;
                self.line(&format!("    jmp {}", end));
                Ok(())
            }

            StmtKind::Continue { releases } => {
                if !releases.is_empty() {
                    return Err(unsupported("owned handles"));
                }
                let (_, cont) = self
                    .loop_labels
                    .last()
                    .cloned()
                    .ok_or_else(|| unsupported("continue outside loop"))?;
                self.line(&format!("    jmp {}", cont));
                Ok(())
            }

            StmtKind::Expr(expr) => {
                if let ExprKind::IncDec { target, inc } = &expr.kind {
                    let ExprKind::Var(name) = target.kind else {
                        return Err(unsupported("increment of a non-variable"));
                    };
                    let off = self.slot(name)?;
                    let op = if *inc { "addq" } else { "subq" };
                    self.line(&format!("    {} $1, {}(%rbp)", op, off));
                    return Ok(());
                }
                self.emit_expr(expr)
            }

            StmtKind::Block(block) => self.emit_block(block),
            StmtKind::Empty => Ok(()),
            StmtKind::Marker(_) => Err(unsupported("scoped markers")),
            StmtKind::Release(_) => Err(unsupported("owned handles")),
        }
    }

    fn emit_for(&mut self, for_loop: &ForLoop) -> Result<(), BackendError> {
        let (end_off, step_off) = self.loop_slots[self.loop_counter];
        self.loop_counter += 1;
        let var_off = self.slot(for_loop.var)?;

        self.emit_expr(&for_loop.start)?;
        self.line(&format!("    movq %rax, {}(%rbp)", var_off));
        self.emit_expr(&for_loop.end)?;
        self.line(&format!("    movq %rax, {}(%rbp)", end_off));
        match &for_loop.step {
            Some(step) => self.emit_expr(step)?,
            None => self.line("    movq $1, %rax"),
        }
        self.line(&format!("    movq %rax, {}(%rbp)", step_off));

        let cond = self.fresh_label("for_cond");
        let down = self.fresh_label("for_down");
        let body = self.fresh_label("for_body");
        let cont = self.fresh_label("for_step");
        let end = self.fresh_label("for_end");

        self.line(&format!("{}:", cond));
        self.line(&format!("    movq {}(%rbp), %rax", step_off));
        self.line("    testq %rax, %rax");
        self.line(&format!("    je {}", end));
        self.line(&format!("    js {}", down));
        self.line(&format!("    movq {}(%rbp), %rax", var_off));
        self.line(&format!("    cmpq {}(%rbp), %rax", end_off));
        self.line(&format!("    jge {}", end));
        self.line(&format!("    jmp {}", body));
        self.line(&format!("{}:", down));
        self.line(&format!("    movq {}(%rbp), %rax", var_off));
        self.line(&format!("    cmpq {}(%rbp), %rax", end_off));
        self.line(&format!("    jle {}", end));
        self.line(&format!("{}:", body));

        self.loop_labels.push((end.clone(), cont.clone()));
        self.emit_block(&for_loop.body)?;
        self.loop_labels.pop();

        self.line(&format!("{}:", cont));
        self.line(&format!("    movq {}(%rbp), %rax", step_off));
        self.line(&format!("    addq %rax, {}(%rbp)", var_off));
        self.line(&format!("    jmp {}", cond));
        self.line(&format!("{}:", end));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn emit_expr(&mut self, expr: &Expr) -> Result<(), BackendError> {
        match &expr.kind {
            ExprKind::Int(value) => {
                if *value >= i32::MIN as i64 && *value <= i32::MAX as i64 {
                    self.line(&format!("    movq ${}, %rax", value));
                } else {
                    self.line(&format!("    movabsq ${}, %rax", value));
                }
                Ok(())
            }
            ExprKind::Bool(value) => {
                self.line(&format!("    movq ${}, %rax", i64::from(*value)));
                Ok(())
            }
            ExprKind::Str(value) => {
                let value = value.clone();
                let label = self.string_label(&value);
                self.line(&format!("    leaq {}(%rip), %rax", label));
                Ok(())
            }
            ExprKind::Float(_) => Err(unsupported("float values")),
            ExprKind::Var(sym) => {
                let off = self.slot(*sym)?;
                self.line(&format!("    movq {}(%rbp), %rax", off));
                Ok(())
            }
            ExprKind::Unary { op, operand } => {
                self.emit_expr(operand)?;
                match op {
                    UnOp::Neg => self.line("    negq %rax"),
                    UnOp::Pos => {}
                    UnOp::Not => self.line("    xorq $1, %rax"),
                }
                Ok(())
            }
            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),
            ExprKind::Call(call) => self.emit_call(call),
            ExprKind::Method { .. } | ExprKind::Field { .. } | ExprKind::SelfField { .. } => {
                Err(unsupported("class member access"))
            }
            ExprKind::Index { .. } => Err(unsupported("indexing")),
            ExprKind::IncDec { .. } => Err(unsupported("increment in expression position")),
            ExprKind::Spawn(_) => Err(unsupported("spawn")),
            ExprKind::Await { .. } => Err(unsupported("await")),
        }
    }

    fn emit_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<(), BackendError> {
        // Short-circuit logic.
        if op == BinOp::And || op == BinOp::Or {
            let short = self.fresh_label("logic_short");
            let end = self.fresh_label("logic_end");
            self.emit_expr(lhs)?;
            self.line("    testq %rax, %rax");
            match op {
                BinOp::And => self.line(&format!("    je {}", short)),
                _ => self.line(&format!("    jne {}", short)),
            }
            self.emit_expr(rhs)?;
            self.line("    testq %rax, %rax");
            self.line("    setne %al");
            self.line("    movzbq %al, %rax");
            self.line(&format!("    jmp {}", end));
            self.line(&format!("{}:", short));
            match op {
                BinOp::And => self.line("    xorl %eax, %eax"),
                _ => self.line("    movq $1, %rax"),
            }
            self.line(&format!("{}:", end));
            return Ok(());
        }

        self.emit_expr(lhs)?;
        let spill = self.push_spill();
        self.line(&format!("    movq %rax, {}(%rbp)", spill));
        self.emit_expr(rhs)?;
        self.line("    movq %rax, %rcx");
        self.line(&format!("    movq {}(%rbp), %rax", spill));
        self.pop_spill();
        match op {
            BinOp::Add => self.line("    addq %rcx, %rax"),
            BinOp::Sub => self.line("    subq %rcx, %rax"),
            BinOp::Mul => self.line("    imulq %rcx, %rax"),
            BinOp::Div => {
                self.line("    cqto");
                self.line("    idivq %rcx");
            }
            BinOp::Rem => {
                self.line("    cqto");
                self.line("    idivq %rcx");
                self.line("    movq %rdx, %rax");
            }
            BinOp::Pow => return Err(unsupported("power operator")),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.line("    cmpq %rcx, %rax");
                let set = match op {
                    BinOp::Eq => "sete",
                    BinOp::Ne => "setne",
                    BinOp::Lt => "setl",
                    BinOp::Le => "setle",
                    BinOp::Gt => "setg",
                    _ => "setge",
                };
                self.line(&format!("    {} %al", set));
                self.line("    movzbq %al, %rax");
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
        Ok(())
    }

    fn emit_call(&mut self, call: &CallExpr) -> Result<(), BackendError> {
        match &call.target {
            CallTarget::Fn(_) => {
                let regs = self.target.arg_regs();
                if call.args.len() > regs.len() {
                    return Err(unsupported("more than register-passed arguments"));
                }
                let mut spills = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    match &arg.ty {
                        Ty::I64 | Ty::Bool => {}
                        other => {
                            return Err(unsupported(format!(
                                "argument of type {}",
                                other.base_name()
                            )))
                        }
                    }
                    self.emit_expr(arg)?;
                    let spill = self.push_spill();
                    self.line(&format!("    movq %rax, {}(%rbp)", spill));
                    spills.push(spill);
                }
                for (i, spill) in spills.iter().enumerate().rev() {
                    self.line(&format!("    movq {}(%rbp), {}", spill, regs[i]));
                    self.pop_spill();
                }
                let shadow = self.target.shadow_space();
                if shadow > 0 {
                    self.line(&format!("    subq ${}, %rsp", shadow));
                }
                self.line(&format!("    callq {}", self.fn_label(call.name)));
                if shadow > 0 {
                    self.line(&format!("    addq ${}, %rsp", shadow));
                }
                Ok(())
            }
            CallTarget::Builtin(symbol) => self.emit_print(symbol, call),
            CallTarget::Ctor(_) => Err(unsupported("constructors")),
            CallTarget::Method(..) => Err(unsupported("method calls")),
            CallTarget::Unresolved => Err(unsupported("unresolved call")),
        }
    }

    fn emit_print(&mut self, symbol: &str, call: &CallExpr) -> Result<(), BackendError> {
        let fmt = match symbol {
            "ls_print_i64" => "%lld",
            "ls_println_i64" => "%lld\n",
            "ls_print_str" => "%s",
            "ls_println_str" => "%s\n",
            other => return Err(unsupported(format!("builtin {}", other))),
        };
        if symbol.ends_with("_str") && !matches!(call.args[0].kind, ExprKind::Str(_)) {
            return Err(unsupported("non-literal string argument"));
        }

        self.emit_expr(&call.args[0])?;
        let fmt_label = self.string_label(fmt);
        let regs = self.target.arg_regs();
        self.line(&format!("    movq %rax, {}", regs[1]));
        self.line(&format!("    leaq {}(%rip), {}", fmt_label, regs[0]));
        self.line("    xorl %eax, %eax");
        let shadow = self.target.shadow_space();
        if shadow > 0 {
            self.line(&format!("    subq ${}, %rsp", shadow));
        }
        self.line(&format!("    callq {}", self.target.printf_symbol()));
        if shadow > 0 {
            self.line(&format!("    addq ${}, %rsp", shadow));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    fn emit_rodata(&mut self) {
        if !self.strings.is_empty() {
            let section = match self.target {
                AsmTarget::SystemV => "    .section .rodata",
                AsmTarget::Win64 => "    .section .rdata",
            };
            self.line(section);
            for (idx, value) in self.strings.clone().iter().enumerate() {
                self.line(&format!(".Lstr{}:", idx));
                self.line(&format!("    .string \"{}\"", escape_asm(value)));
            }
        }
        if self.target == AsmTarget::SystemV {
            self.line("    .section .note.GNU-stack,\"\",@progbits");
        }
    }
}

fn escape_asm(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsc_par::Parser;
    use lsc_util::{FileId, Handler, Interner};

    fn build(source: &str) -> (Module, Interner, Symbol) {
        let handler = Handler::new();
        let mut interner = Interner::new();
        let tokens = lsc_lex::tokenize(source, FileId(0), &handler, &mut interner);
        let mut module = Parser::new(tokens, &handler, &mut interner).parse();
        lsc_sem::analyze(&mut module, &handler, &mut interner);
        assert!(
            !handler.has_errors(),
            "front-end errors: {:?}",
            handler.diagnostics()
        );
        let entry = interner.intern("main");
        (module, interner, entry)
    }

    fn lower(source: &str) -> Result<String, BackendError> {
        let (module, interner, entry) = build(source);
        emit_asm_for_target(&module, &interner, entry, AsmTarget::SystemV)
    }

    #[test]
    fn test_simple_function_emits() {
        let asm = lower("main() -> i64 do\ndeclare x = 40\nreturn x + 2\nend\n").unwrap();
        assert!(asm.contains("ls_fn_main:"));
        assert!(asm.contains("pushq %rbp"));
        assert!(asm.contains(".globl main"));
        assert!(asm.contains("callq ls_fn_main"));
    }

    #[test]
    fn test_print_uses_sysv_registers() {
        let asm = lower("main() -> i64 do\nprintln(7)\nreturn 0\nend\n").unwrap();
        assert!(asm.contains("movq %rax, %rsi"));
        assert!(asm.contains("%rdi"));
        assert!(asm.contains("callq printf@PLT"));
        assert!(asm.contains(".string \"%lld\\n\""));
    }

    #[test]
    fn test_win64_uses_shadow_space() {
        let (module, interner, entry) =
            build("main() -> i64 do\nprintln(7)\nreturn 0\nend\n");
        let asm = emit_asm_for_target(&module, &interner, entry, AsmTarget::Win64).unwrap();
        assert!(asm.contains("movq %rax, %rdx"));
        assert!(asm.contains("subq $32, %rsp"));
    }

    #[test]
    fn test_call_with_args() {
        let asm = lower(
            "add(a: i64, b: i64) -> i64 do\nreturn a + b\nend\n\
             main() -> i64 do\nreturn add(1, 2)\nend\n",
        )
        .unwrap();
        assert!(asm.contains("callq ls_fn_add"));
        assert!(asm.contains("(%rbp), %rdi"));
        assert!(asm.contains("(%rbp), %rsi"));
    }

    #[test]
    fn test_loop_structure() {
        let asm = lower(
            "main() -> i64 do\ndeclare s = 0\nfor i in 0..100 do\ns += i\nend\nreturn s\nend\n",
        )
        .unwrap();
        assert!(asm.contains(".Lfor_cond_"));
        assert!(asm.contains(".Lfor_end_"));
        // Zero-step guard: step tested before the body runs.
        assert!(asm.contains("testq %rax, %rax"));
    }

    #[test]
    fn test_float_is_unsupported() {
        let err = lower("main() -> i64 do\ndeclare x = 1.5\nprintln(1)\nreturn 0\nend\n")
            .unwrap_err();
        assert!(err.to_string().starts_with("asm-unsupported:"));
        assert!(err.to_string().contains("f64"));
    }

    #[test]
    fn test_classes_are_unsupported() {
        let err = lower(
            "class C do\nx: i64\nconstructor(v: i64) do\nx = v\nend\nend\n\
             main() -> i64 do\nreturn 0\nend\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("classes"));
    }

    #[test]
    fn test_owned_handles_are_unsupported() {
        let err = lower(
            "main() -> i64 do\ndeclare owned a = array_new()\narray_push(a, 1)\nreturn 0\nend\n",
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("asm-unsupported:"));
    }

    #[test]
    fn test_power_is_unsupported() {
        let err =
            lower("main() -> i64 do\ndeclare b = 3\nreturn b ** 2\nend\n").unwrap_err();
        assert!(err.to_string().contains("power"));
    }

    #[test]
    fn test_string_literal_print() {
        let asm = lower("main() -> i64 do\nprintln(\"hi\")\nreturn 0\nend\n").unwrap();
        assert!(asm.contains(".Lstr"));
        assert!(asm.contains(".string \"hi\""));
    }
}
