//! lsc-opt - Greedy multi-pass AST optimizer.
//!
//! Runs up to `max_passes` passes; each pass applies constant folding,
//! dead-code elimination, branch simplification, loop simplification
//! (small-trip unrolling, zero-step elision), and bounded inlining over
//! the whole module. The loop stops as soon as a full pass performs zero
//! rewrites, so running the optimizer twice over the same input yields
//! the same tree.

use lsc_par::ast::{
    BinOp, Block, CallTarget, Expr, ExprKind, FnDecl, FnId, Item, Module, Stmt, StmtKind, Ty,
    UnOp,
};
use lsc_util::{FxHashMap, Span, Symbol};

/// Optimizer tuning knobs.
#[derive(Clone, Debug)]
pub struct OptOptions {
    /// Pass cap (`--passes`)
    pub max_passes: usize,
    /// Maximum static trip count eligible for unrolling
    pub unroll_cap: i64,
    /// Maximum callee size (AST nodes) eligible for inlining
    pub inline_node_budget: usize,
    /// Maximum number of call sites of an inlining candidate
    pub inline_max_sites: usize,
}

impl Default for OptOptions {
    fn default() -> Self {
        Self {
            max_passes: 3,
            unroll_cap: 8,
            inline_node_budget: 24,
            inline_max_sites: 2,
        }
    }
}

impl OptOptions {
    /// Aggressive settings used by `-O4`.
    pub fn max_speed() -> Self {
        Self {
            max_passes: 10,
            ..Self::default()
        }
    }
}

/// Optimize the module in place; returns the number of passes that ran.
pub fn optimize(module: &mut Module, opts: &OptOptions) -> usize {
    let mut passes = 0;
    while passes < opts.max_passes {
        passes += 1;
        let mut opt = Optimizer {
            opts,
            changes: 0,
        };
        opt.run_pass(module);
        if opt.changes == 0 {
            break;
        }
    }
    passes
}

struct Optimizer<'a> {
    opts: &'a OptOptions,
    changes: usize,
}

impl Optimizer<'_> {
    fn run_pass(&mut self, module: &mut Module) {
        self.rewrite_module(module);
        self.inline_pass(module);
    }

    fn rewrite_module(&mut self, module: &mut Module) {
        for item in module.items.iter_mut() {
            match item {
                Item::Function(func) => {
                    self.rewrite_block(&mut func.body);
                    self.prune_unused_locals(&mut func.body);
                }
                Item::Class(class) => {
                    if let Some(ctor) = class.ctor.as_mut() {
                        self.rewrite_block(&mut ctor.body);
                        self.prune_unused_locals(&mut ctor.body);
                    }
                    for method in class.methods.iter_mut() {
                        self.rewrite_block(&mut method.func.body);
                        self.prune_unused_locals(&mut method.func.body);
                    }
                }
                Item::Stmt(stmt) => self.rewrite_stmt(stmt),
            }
        }
        // Top-level dead-code elimination over the statement items.
        self.sweep_top_level(module);
    }

    /// Remove never-referenced locals whose initializer has no effects.
    /// Counting is per function and name-based, which over-approximates
    /// uses under shadowing; that only ever keeps a removable declare.
    fn prune_unused_locals(&mut self, body: &mut Block) {
        let mut uses: FxHashMap<Symbol, usize> = FxHashMap::default();
        count_uses_block(body, &mut uses);
        self.prune_unused_in_block(body, &uses);
    }

    fn prune_unused_in_block(&mut self, block: &mut Block, uses: &FxHashMap<Symbol, usize>) {
        for stmt in block.stmts.iter_mut() {
            match &mut stmt.kind {
                StmtKind::Declare {
                    name,
                    init,
                    is_owned: false,
                    ..
                } => {
                    let pure = init.as_ref().map(expr_is_pure).unwrap_or(true);
                    if pure && uses.get(name).copied().unwrap_or(0) == 0 {
                        stmt.kind = StmtKind::Empty;
                        self.changes += 1;
                    }
                }
                StmtKind::If { arms, else_block } => {
                    for arm in arms.iter_mut() {
                        self.prune_unused_in_block(&mut arm.body, uses);
                    }
                    if let Some(b) = else_block {
                        self.prune_unused_in_block(b, uses);
                    }
                }
                StmtKind::While { body, .. } => self.prune_unused_in_block(body, uses),
                StmtKind::For(for_loop) => self.prune_unused_in_block(&mut for_loop.body, uses),
                StmtKind::Block(b) => self.prune_unused_in_block(b, uses),
                _ => {}
            }
        }
    }

    fn sweep_top_level(&mut self, module: &mut Module) {
        let before = module.items.len();
        module.items.retain(|item| {
            !matches!(
                item,
                Item::Stmt(Stmt {
                    kind: StmtKind::Empty,
                    ..
                })
            )
        });
        self.changes += before - module.items.len();
    }

    // ------------------------------------------------------------------
    // Statement rewriting
    // ------------------------------------------------------------------

    fn rewrite_block(&mut self, block: &mut Block) {
        for stmt in block.stmts.iter_mut() {
            self.rewrite_stmt(stmt);
        }
        self.eliminate_dead(block);
    }

    /// Drop unreachable statements after an unconditional jump and sweep
    /// statements already rewritten to `Empty`.
    fn eliminate_dead(&mut self, block: &mut Block) {
        if let Some(cut) = block.stmts.iter().position(stmt_terminates) {
            if cut + 1 < block.stmts.len() {
                self.changes += block.stmts.len() - cut - 1;
                block.stmts.truncate(cut + 1);
            }
        }
        let before = block.stmts.len();
        block
            .stmts
            .retain(|stmt| !matches!(stmt.kind, StmtKind::Empty));
        self.changes += before - block.stmts.len();
    }

    fn rewrite_stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::Declare { init, .. } => {
                if let Some(expr) = init {
                    self.fold_expr(expr);
                }
            }
            StmtKind::Assign { target, value, .. } => {
                self.fold_expr(target);
                self.fold_expr(value);
            }
            StmtKind::If { arms, else_block } => {
                for arm in arms.iter_mut() {
                    self.fold_expr(&mut arm.cond);
                    self.rewrite_block(&mut arm.body);
                }
                if let Some(block) = else_block {
                    self.rewrite_block(block);
                }
                self.simplify_if(stmt);
            }
            StmtKind::While { cond, body } => {
                self.fold_expr(cond);
                self.rewrite_block(body);
                if matches!(cond.kind, ExprKind::Bool(false)) {
                    stmt.kind = StmtKind::Empty;
                    self.changes += 1;
                }
            }
            StmtKind::For(for_loop) => {
                self.fold_expr(&mut for_loop.start);
                self.fold_expr(&mut for_loop.end);
                if let Some(step) = for_loop.step.as_mut() {
                    self.fold_expr(step);
                }
                self.rewrite_block(&mut for_loop.body);
                self.simplify_for(stmt);
            }
            StmtKind::Return { value, .. } => {
                if let Some(expr) = value {
                    self.fold_expr(expr);
                }
            }
            StmtKind::Expr(expr) => {
                self.fold_expr(expr);
                // A bare literal or variable has no effect.
                if matches!(
                    expr.kind,
                    ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_)
                ) {
                    stmt.kind = StmtKind::Empty;
                    self.changes += 1;
                }
            }
            StmtKind::Block(block) => self.rewrite_block(block),
            StmtKind::Break { .. }
            | StmtKind::Continue { .. }
            | StmtKind::Marker(_)
            | StmtKind::Release(_)
            | StmtKind::Empty => {}
        }
    }

    /// `if true` collapses to its arm, `if false` arms are pruned.
    fn simplify_if(&mut self, stmt: &mut Stmt) {
        let StmtKind::If { arms, else_block } = &mut stmt.kind else {
            return;
        };

        // Prune arms whose condition is statically false.
        let before = arms.len();
        arms.retain(|arm| !matches!(arm.cond.kind, ExprKind::Bool(false)));
        self.changes += before - arms.len();

        // An arm that is statically true swallows everything after it.
        if let Some(idx) = arms
            .iter()
            .position(|arm| matches!(arm.cond.kind, ExprKind::Bool(true)))
        {
            if idx == 0 {
                let body = arms[0].body.clone();
                stmt.kind = StmtKind::Block(body);
                self.changes += 1;
                return;
            }
            arms.truncate(idx + 1);
            *else_block = None;
        }

        if arms.is_empty() {
            stmt.kind = match else_block.take() {
                Some(block) => StmtKind::Block(block),
                None => StmtKind::Empty,
            };
            self.changes += 1;
        }
    }

    /// Constant-bound loops: zero-step loops vanish, small static trip
    /// counts unroll into straight-line blocks.
    fn simplify_for(&mut self, stmt: &mut Stmt) {
        let StmtKind::For(for_loop) = &mut stmt.kind else {
            return;
        };

        let start = literal_i64(&for_loop.start);
        let end = literal_i64(&for_loop.end);
        let step = match for_loop.step.as_ref() {
            None => Some(1),
            Some(expr) => literal_i64(expr),
        };
        let (Some(start), Some(end), Some(step)) = (start, end, step) else {
            return;
        };

        // A constant zero step is an empty loop, not an error.
        if step == 0 {
            stmt.kind = StmtKind::Empty;
            self.changes += 1;
            return;
        }

        if for_loop.parallel || block_has_jumps(&for_loop.body) {
            return;
        }

        let trip = trip_count(start, end, step);
        if trip == 0 {
            stmt.kind = StmtKind::Empty;
            self.changes += 1;
            return;
        }
        if trip > self.opts.unroll_cap {
            return;
        }

        let mut stmts = Vec::new();
        let mut value = start;
        for _ in 0..trip {
            let mut iteration = Vec::with_capacity(for_loop.body.stmts.len() + 1);
            iteration.push(Stmt::new(
                StmtKind::Declare {
                    name: for_loop.var,
                    ty: Ty::I64,
                    init: Some(Expr::int(value, Span::DUMMY)),
                    is_const: true,
                    is_owned: false,
                },
                Span::DUMMY,
            ));
            iteration.extend(for_loop.body.stmts.iter().cloned());
            stmts.push(Stmt::new(
                StmtKind::Block(Block {
                    stmts: iteration,
                    span: for_loop.body.span,
                }),
                Span::DUMMY,
            ));
            value = value.wrapping_add(step);
        }
        let span = for_loop.body.span;
        stmt.kind = StmtKind::Block(Block { stmts, span });
        self.changes += 1;
    }

    // ------------------------------------------------------------------
    // Constant folding
    // ------------------------------------------------------------------

    fn fold_expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Unary { op, operand } => {
                self.fold_expr(operand);
                let folded = fold_unary(*op, operand);
                if let Some(kind) = folded {
                    expr.kind = kind;
                    expr.is_const = true;
                    self.changes += 1;
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.fold_expr(lhs);
                self.fold_expr(rhs);
                if let Some(kind) = fold_binary(*op, lhs, rhs) {
                    expr.kind = kind;
                    expr.is_const = true;
                    self.changes += 1;
                }
            }
            ExprKind::Call(call) => {
                for arg in call.args.iter_mut() {
                    self.fold_expr(arg);
                }
                // Length of a literal folds away.
                let mut folded_len = None;
                if let CallTarget::Builtin(symbol) = &call.target {
                    if symbol == "ls_str_len" {
                        if let Some(ExprKind::Str(s)) = call.args.first().map(|a| &a.kind) {
                            folded_len = Some(s.len() as i64);
                        }
                    }
                }
                if let Some(n) = folded_len {
                    expr.kind = ExprKind::Int(n);
                    expr.ty = Ty::I64;
                    expr.is_const = true;
                    self.changes += 1;
                }
            }
            ExprKind::Method { recv, args, .. } => {
                self.fold_expr(recv);
                for arg in args.iter_mut() {
                    self.fold_expr(arg);
                }
            }
            ExprKind::Field { recv, .. } => self.fold_expr(recv),
            ExprKind::Index { recv, index } => {
                self.fold_expr(recv);
                self.fold_expr(index);
            }
            ExprKind::IncDec { target, .. } => self.fold_expr(target),
            ExprKind::Spawn(call) => {
                for arg in call.args.iter_mut() {
                    self.fold_expr(arg);
                }
            }
            ExprKind::Await { task } => self.fold_expr(task),
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::Var(_)
            | ExprKind::SelfField { .. } => {}
        }
    }

    // ------------------------------------------------------------------
    // Inlining
    // ------------------------------------------------------------------

    /// Substitute small, non-recursive, non-throwing callees at their few
    /// call sites.
    fn inline_pass(&mut self, module: &mut Module) {
        let functions: Vec<FnDecl> = module
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Function(func) => Some(func.clone()),
                _ => None,
            })
            .collect();

        let mut site_counts: FxHashMap<u32, usize> = FxHashMap::default();
        for item in &module.items {
            count_sites_item(item, &mut site_counts);
        }

        let mut candidates: FxHashMap<u32, FnDecl> = FxHashMap::default();
        for (idx, func) in functions.iter().enumerate() {
            let id = idx as u32;
            let sites = site_counts.get(&id).copied().unwrap_or(0);
            if sites == 0 || sites > self.opts.inline_max_sites {
                continue;
            }
            if func.is_flag || !func.throws.is_empty() {
                continue;
            }
            if block_node_count(&func.body) > self.opts.inline_node_budget {
                continue;
            }
            if block_calls_fn(&func.body, FnId(id)) {
                continue;
            }
            candidates.insert(id, func.clone());
        }
        if candidates.is_empty() {
            return;
        }

        for item in module.items.iter_mut() {
            match item {
                Item::Function(func) => self.inline_in_block(&mut func.body, &candidates),
                Item::Class(class) => {
                    if let Some(ctor) = class.ctor.as_mut() {
                        self.inline_in_block(&mut ctor.body, &candidates);
                    }
                    for method in class.methods.iter_mut() {
                        self.inline_in_block(&mut method.func.body, &candidates);
                    }
                }
                Item::Stmt(stmt) => self.inline_in_stmt(stmt, &candidates),
            }
        }
    }

    fn inline_in_block(&mut self, block: &mut Block, candidates: &FxHashMap<u32, FnDecl>) {
        for stmt in block.stmts.iter_mut() {
            self.inline_in_stmt(stmt, candidates);
        }
    }

    fn inline_in_stmt(&mut self, stmt: &mut Stmt, candidates: &FxHashMap<u32, FnDecl>) {
        // A void callee invoked as a bare statement splices as statements.
        if let StmtKind::Expr(expr) = &stmt.kind {
            if let ExprKind::Call(call) = &expr.kind {
                if let CallTarget::Fn(FnId(id)) = call.target {
                    if let Some(callee) = candidates.get(&id) {
                        if callee.ret == Ty::Void && !block_returns(&callee.body) {
                            let mut stmts: Vec<Stmt> = Vec::new();
                            for (param, arg) in callee.params.iter().zip(&call.args) {
                                stmts.push(Stmt::new(
                                    StmtKind::Declare {
                                        name: param.name,
                                        ty: param.ty.clone(),
                                        init: Some(arg.clone()),
                                        is_const: false,
                                        is_owned: false,
                                    },
                                    Span::DUMMY,
                                ));
                            }
                            stmts.extend(callee.body.stmts.iter().cloned());
                            stmt.kind = StmtKind::Block(Block {
                                stmts,
                                span: stmt.span,
                            });
                            self.changes += 1;
                            return;
                        }
                    }
                }
            }
        }

        match &mut stmt.kind {
            StmtKind::Declare { init, .. } => {
                if let Some(expr) = init {
                    self.inline_in_expr(expr, candidates);
                }
            }
            StmtKind::Assign { target, value, .. } => {
                self.inline_in_expr(target, candidates);
                self.inline_in_expr(value, candidates);
            }
            StmtKind::If { arms, else_block } => {
                for arm in arms.iter_mut() {
                    self.inline_in_expr(&mut arm.cond, candidates);
                    self.inline_in_block(&mut arm.body, candidates);
                }
                if let Some(block) = else_block {
                    self.inline_in_block(block, candidates);
                }
            }
            StmtKind::While { cond, body } => {
                self.inline_in_expr(cond, candidates);
                self.inline_in_block(body, candidates);
            }
            StmtKind::For(for_loop) => {
                self.inline_in_expr(&mut for_loop.start, candidates);
                self.inline_in_expr(&mut for_loop.end, candidates);
                if let Some(step) = for_loop.step.as_mut() {
                    self.inline_in_expr(step, candidates);
                }
                self.inline_in_block(&mut for_loop.body, candidates);
            }
            StmtKind::Return { value, .. } => {
                if let Some(expr) = value {
                    self.inline_in_expr(expr, candidates);
                }
            }
            StmtKind::Expr(expr) => self.inline_in_expr(expr, candidates),
            StmtKind::Block(block) => self.inline_in_block(block, candidates),
            _ => {}
        }
    }

    fn inline_in_expr(&mut self, expr: &mut Expr, candidates: &FxHashMap<u32, FnDecl>) {
        // Children first, so nested calls inline bottom-up.
        match &mut expr.kind {
            ExprKind::Unary { operand, .. } => self.inline_in_expr(operand, candidates),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.inline_in_expr(lhs, candidates);
                self.inline_in_expr(rhs, candidates);
            }
            ExprKind::Call(call) => {
                for arg in call.args.iter_mut() {
                    self.inline_in_expr(arg, candidates);
                }
            }
            ExprKind::Method { recv, args, .. } => {
                self.inline_in_expr(recv, candidates);
                for arg in args.iter_mut() {
                    self.inline_in_expr(arg, candidates);
                }
            }
            ExprKind::Field { recv, .. } => self.inline_in_expr(recv, candidates),
            ExprKind::Index { recv, index } => {
                self.inline_in_expr(recv, candidates);
                self.inline_in_expr(index, candidates);
            }
            ExprKind::Await { task } => self.inline_in_expr(task, candidates),
            _ => {}
        }

        let ExprKind::Call(call) = &expr.kind else {
            return;
        };
        let CallTarget::Fn(FnId(id)) = call.target else {
            return;
        };
        let Some(callee) = candidates.get(&id) else {
            return;
        };

        // Expression inlining handles single-`return` bodies whose shape
        // the substitution walker fully covers.
        let [Stmt {
            kind: StmtKind::Return {
                value: Some(body_expr),
                ..
            },
            ..
        }] = callee.body.stmts.as_slice()
        else {
            return;
        };
        if !substitutable(body_expr) {
            return;
        }

        // Substitution duplicates the argument wherever the parameter
        // occurs, so repeated parameters require trivially-copyable
        // arguments.
        for (param, arg) in callee.params.iter().zip(&call.args) {
            let uses = count_var_uses(body_expr, param.name);
            let trivial = matches!(
                arg.kind,
                ExprKind::Int(_)
                    | ExprKind::Float(_)
                    | ExprKind::Str(_)
                    | ExprKind::Bool(_)
                    | ExprKind::Var(_)
            );
            if uses > 1 && !trivial {
                return;
            }
        }

        let mut map: FxHashMap<Symbol, Expr> = FxHashMap::default();
        for (param, arg) in callee.params.iter().zip(&call.args) {
            map.insert(param.name, arg.clone());
        }
        let mut replacement = substitute(body_expr, &map);
        replacement.span = expr.span;
        *expr = replacement;
        self.changes += 1;
    }
}

// ----------------------------------------------------------------------
// Folding helpers
// ----------------------------------------------------------------------

fn literal_i64(expr: &Expr) -> Option<i64> {
    match expr.kind {
        ExprKind::Int(value) => Some(value),
        _ => None,
    }
}

/// Iterations of `start..end` by `step` (non-zero).
fn trip_count(start: i64, end: i64, step: i64) -> i64 {
    if step > 0 {
        if start >= end {
            0
        } else {
            (end - start + step - 1) / step
        }
    } else if start <= end {
        0
    } else {
        let step = -step;
        (start - end + step - 1) / step
    }
}

fn fold_unary(op: UnOp, operand: &Expr) -> Option<ExprKind> {
    match (op, &operand.kind) {
        (UnOp::Neg, ExprKind::Int(value)) => Some(ExprKind::Int(value.wrapping_neg())),
        (UnOp::Neg, ExprKind::Float(value)) => Some(ExprKind::Float(-value)),
        (UnOp::Pos, ExprKind::Int(value)) => Some(ExprKind::Int(*value)),
        (UnOp::Pos, ExprKind::Float(value)) => Some(ExprKind::Float(*value)),
        (UnOp::Not, ExprKind::Bool(value)) => Some(ExprKind::Bool(!value)),
        _ => None,
    }
}

/// 64-bit two's-complement power with wrap-around, matching the emitted
/// runtime helper. Negative exponents truncate to zero (except |base| 1).
fn pow_i64(base: i64, exp: i64) -> i64 {
    if exp < 0 {
        return match base {
            1 => 1,
            -1 => {
                if exp % 2 == 0 {
                    1
                } else {
                    -1
                }
            }
            _ => 0,
        };
    }
    let mut result: i64 = 1;
    let mut base = base;
    let mut exp = exp as u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    result
}

fn fold_binary(op: BinOp, lhs: &Expr, rhs: &Expr) -> Option<ExprKind> {
    // Boolean short-circuit with one known side.
    match (op, &lhs.kind, &rhs.kind) {
        (BinOp::And, ExprKind::Bool(false), _) => return Some(ExprKind::Bool(false)),
        (BinOp::And, ExprKind::Bool(true), other) => return clone_bool(other),
        (BinOp::Or, ExprKind::Bool(true), _) => return Some(ExprKind::Bool(true)),
        (BinOp::Or, ExprKind::Bool(false), other) => return clone_bool(other),
        _ => {}
    }

    match (&lhs.kind, &rhs.kind) {
        (ExprKind::Int(a), ExprKind::Int(b)) => {
            let (a, b) = (*a, *b);
            let kind = match op {
                BinOp::Add => ExprKind::Int(a.wrapping_add(b)),
                BinOp::Sub => ExprKind::Int(a.wrapping_sub(b)),
                BinOp::Mul => ExprKind::Int(a.wrapping_mul(b)),
                BinOp::Div => {
                    if b == 0 {
                        return None; // already rejected by analysis
                    }
                    ExprKind::Int(a.wrapping_div(b))
                }
                BinOp::Rem => {
                    if b == 0 {
                        return None;
                    }
                    ExprKind::Int(a.wrapping_rem(b))
                }
                BinOp::Pow => ExprKind::Int(pow_i64(a, b)),
                BinOp::Eq => ExprKind::Bool(a == b),
                BinOp::Ne => ExprKind::Bool(a != b),
                BinOp::Lt => ExprKind::Bool(a < b),
                BinOp::Le => ExprKind::Bool(a <= b),
                BinOp::Gt => ExprKind::Bool(a > b),
                BinOp::Ge => ExprKind::Bool(a >= b),
                BinOp::And | BinOp::Or => return None,
            };
            Some(kind)
        }
        (ExprKind::Float(a), ExprKind::Float(b)) => {
            let (a, b) = (*a, *b);
            let kind = match op {
                BinOp::Add => ExprKind::Float(a + b),
                BinOp::Sub => ExprKind::Float(a - b),
                BinOp::Mul => ExprKind::Float(a * b),
                BinOp::Div => {
                    if b == 0.0 {
                        return None; // already rejected by analysis
                    }
                    ExprKind::Float(a / b)
                }
                BinOp::Rem => {
                    if b == 0.0 {
                        return None;
                    }
                    ExprKind::Float(a % b)
                }
                BinOp::Pow => ExprKind::Float(a.powf(b)),
                BinOp::Eq => ExprKind::Bool(a == b),
                BinOp::Ne => ExprKind::Bool(a != b),
                BinOp::Lt => ExprKind::Bool(a < b),
                BinOp::Le => ExprKind::Bool(a <= b),
                BinOp::Gt => ExprKind::Bool(a > b),
                BinOp::Ge => ExprKind::Bool(a >= b),
                BinOp::And | BinOp::Or => return None,
            };
            Some(kind)
        }
        (ExprKind::Bool(a), ExprKind::Bool(b)) => {
            let kind = match op {
                BinOp::Eq => ExprKind::Bool(a == b),
                BinOp::Ne => ExprKind::Bool(a != b),
                BinOp::And => ExprKind::Bool(*a && *b),
                BinOp::Or => ExprKind::Bool(*a || *b),
                _ => return None,
            };
            Some(kind)
        }
        (ExprKind::Str(a), ExprKind::Str(b)) => {
            let kind = match op {
                BinOp::Add => ExprKind::Str(format!("{}{}", a, b)),
                BinOp::Eq => ExprKind::Bool(a == b),
                BinOp::Ne => ExprKind::Bool(a != b),
                _ => return None,
            };
            Some(kind)
        }
        _ => None,
    }
}

fn clone_bool(kind: &ExprKind) -> Option<ExprKind> {
    match kind {
        ExprKind::Bool(value) => Some(ExprKind::Bool(*value)),
        ExprKind::Var(sym) => Some(ExprKind::Var(*sym)),
        _ => None,
    }
}

// ----------------------------------------------------------------------
// Tree queries
// ----------------------------------------------------------------------

/// Control cannot flow past this statement.
fn stmt_terminates(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return { .. } | StmtKind::Break { .. } | StmtKind::Continue { .. } => true,
        StmtKind::Block(block) => block.stmts.iter().any(stmt_terminates),
        StmtKind::If { arms, else_block } => {
            else_block
                .as_ref()
                .map(|b| b.stmts.iter().any(stmt_terminates))
                .unwrap_or(false)
                && arms
                    .iter()
                    .all(|arm| arm.body.stmts.iter().any(stmt_terminates))
        }
        _ => false,
    }
}

fn block_has_jumps(block: &Block) -> bool {
    block.stmts.iter().any(stmt_has_jumps)
}

fn stmt_has_jumps(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Break { .. } | StmtKind::Continue { .. } | StmtKind::Return { .. } => true,
        StmtKind::If { arms, else_block } => {
            arms.iter().any(|arm| block_has_jumps(&arm.body))
                || else_block.as_ref().map(block_has_jumps).unwrap_or(false)
        }
        StmtKind::Block(block) => block_has_jumps(block),
        // Jumps inside nested loops target those loops.
        StmtKind::While { .. } | StmtKind::For(_) => false,
        _ => false,
    }
}

fn block_returns(block: &Block) -> bool {
    block.stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Return { .. } => true,
        StmtKind::If { arms, else_block } => {
            arms.iter().any(|arm| block_returns(&arm.body))
                || else_block.as_ref().map(block_returns).unwrap_or(false)
        }
        StmtKind::While { body, .. } => block_returns(body),
        StmtKind::For(for_loop) => block_returns(&for_loop.body),
        StmtKind::Block(block) => block_returns(block),
        _ => false,
    })
}

fn block_node_count(block: &Block) -> usize {
    block.stmts.iter().map(stmt_node_count).sum()
}

fn stmt_node_count(stmt: &Stmt) -> usize {
    1 + match &stmt.kind {
        StmtKind::Declare { init, .. } => init.as_ref().map(expr_node_count).unwrap_or(0),
        StmtKind::Assign { target, value, .. } => {
            expr_node_count(target) + expr_node_count(value)
        }
        StmtKind::If { arms, else_block } => {
            arms.iter()
                .map(|arm| expr_node_count(&arm.cond) + block_node_count(&arm.body))
                .sum::<usize>()
                + else_block.as_ref().map(block_node_count).unwrap_or(0)
        }
        StmtKind::While { cond, body } => expr_node_count(cond) + block_node_count(body),
        StmtKind::For(for_loop) => {
            expr_node_count(&for_loop.start)
                + expr_node_count(&for_loop.end)
                + for_loop.step.as_ref().map(expr_node_count).unwrap_or(0)
                + block_node_count(&for_loop.body)
        }
        StmtKind::Return { value, .. } => value.as_ref().map(expr_node_count).unwrap_or(0),
        StmtKind::Expr(expr) => expr_node_count(expr),
        StmtKind::Block(block) => block_node_count(block),
        _ => 0,
    }
}

fn expr_node_count(expr: &Expr) -> usize {
    1 + match &expr.kind {
        ExprKind::Unary { operand, .. } => expr_node_count(operand),
        ExprKind::Binary { lhs, rhs, .. } => expr_node_count(lhs) + expr_node_count(rhs),
        ExprKind::Call(call) | ExprKind::Spawn(call) => {
            call.args.iter().map(expr_node_count).sum()
        }
        ExprKind::Method { recv, args, .. } => {
            expr_node_count(recv) + args.iter().map(expr_node_count).sum::<usize>()
        }
        ExprKind::Field { recv, .. } => expr_node_count(recv),
        ExprKind::Index { recv, index } => expr_node_count(recv) + expr_node_count(index),
        ExprKind::IncDec { target, .. } => expr_node_count(target),
        ExprKind::Await { task } => expr_node_count(task),
        _ => 0,
    }
}

fn block_calls_fn(block: &Block, id: FnId) -> bool {
    block.stmts.iter().any(|stmt| stmt_calls_fn(stmt, id))
}

fn stmt_calls_fn(stmt: &Stmt, id: FnId) -> bool {
    match &stmt.kind {
        StmtKind::Declare { init, .. } => {
            init.as_ref().map(|e| expr_calls_fn(e, id)).unwrap_or(false)
        }
        StmtKind::Assign { target, value, .. } => {
            expr_calls_fn(target, id) || expr_calls_fn(value, id)
        }
        StmtKind::If { arms, else_block } => {
            arms.iter()
                .any(|arm| expr_calls_fn(&arm.cond, id) || block_calls_fn(&arm.body, id))
                || else_block
                    .as_ref()
                    .map(|b| block_calls_fn(b, id))
                    .unwrap_or(false)
        }
        StmtKind::While { cond, body } => expr_calls_fn(cond, id) || block_calls_fn(body, id),
        StmtKind::For(for_loop) => {
            expr_calls_fn(&for_loop.start, id)
                || expr_calls_fn(&for_loop.end, id)
                || for_loop
                    .step
                    .as_ref()
                    .map(|e| expr_calls_fn(e, id))
                    .unwrap_or(false)
                || block_calls_fn(&for_loop.body, id)
        }
        StmtKind::Return { value, .. } => value
            .as_ref()
            .map(|e| expr_calls_fn(e, id))
            .unwrap_or(false),
        StmtKind::Expr(expr) => expr_calls_fn(expr, id),
        StmtKind::Block(block) => block_calls_fn(block, id),
        _ => false,
    }
}

fn expr_calls_fn(expr: &Expr, id: FnId) -> bool {
    match &expr.kind {
        ExprKind::Call(call) | ExprKind::Spawn(call) => {
            call.target == CallTarget::Fn(id)
                || call.args.iter().any(|a| expr_calls_fn(a, id))
        }
        ExprKind::Unary { operand, .. } => expr_calls_fn(operand, id),
        ExprKind::Binary { lhs, rhs, .. } => expr_calls_fn(lhs, id) || expr_calls_fn(rhs, id),
        ExprKind::Method { recv, args, .. } => {
            expr_calls_fn(recv, id) || args.iter().any(|a| expr_calls_fn(a, id))
        }
        ExprKind::Field { recv, .. } => expr_calls_fn(recv, id),
        ExprKind::Index { recv, index } => expr_calls_fn(recv, id) || expr_calls_fn(index, id),
        ExprKind::IncDec { target, .. } => expr_calls_fn(target, id),
        ExprKind::Await { task } => expr_calls_fn(task, id),
        _ => false,
    }
}

fn count_sites_item(item: &Item, counts: &mut FxHashMap<u32, usize>) {
    match item {
        Item::Function(func) => count_sites_block(&func.body, counts),
        Item::Class(class) => {
            if let Some(ctor) = &class.ctor {
                count_sites_block(&ctor.body, counts);
            }
            for method in &class.methods {
                count_sites_block(&method.func.body, counts);
            }
        }
        Item::Stmt(stmt) => count_sites_stmt(stmt, counts),
    }
}

fn count_sites_block(block: &Block, counts: &mut FxHashMap<u32, usize>) {
    for stmt in &block.stmts {
        count_sites_stmt(stmt, counts);
    }
}

fn count_sites_stmt(stmt: &Stmt, counts: &mut FxHashMap<u32, usize>) {
    match &stmt.kind {
        StmtKind::Declare { init, .. } => {
            if let Some(expr) = init {
                count_sites_expr(expr, counts);
            }
        }
        StmtKind::Assign { target, value, .. } => {
            count_sites_expr(target, counts);
            count_sites_expr(value, counts);
        }
        StmtKind::If { arms, else_block } => {
            for arm in arms {
                count_sites_expr(&arm.cond, counts);
                count_sites_block(&arm.body, counts);
            }
            if let Some(block) = else_block {
                count_sites_block(block, counts);
            }
        }
        StmtKind::While { cond, body } => {
            count_sites_expr(cond, counts);
            count_sites_block(body, counts);
        }
        StmtKind::For(for_loop) => {
            count_sites_expr(&for_loop.start, counts);
            count_sites_expr(&for_loop.end, counts);
            if let Some(step) = &for_loop.step {
                count_sites_expr(step, counts);
            }
            count_sites_block(&for_loop.body, counts);
        }
        StmtKind::Return { value, .. } => {
            if let Some(expr) = value {
                count_sites_expr(expr, counts);
            }
        }
        StmtKind::Expr(expr) => count_sites_expr(expr, counts),
        StmtKind::Block(block) => count_sites_block(block, counts),
        _ => {}
    }
}

fn count_sites_expr(expr: &Expr, counts: &mut FxHashMap<u32, usize>) {
    match &expr.kind {
        ExprKind::Call(call) => {
            if let CallTarget::Fn(FnId(id)) = call.target {
                *counts.entry(id).or_insert(0) += 1;
            }
            for arg in &call.args {
                count_sites_expr(arg, counts);
            }
        }
        ExprKind::Spawn(call) => {
            // Spawn sites pin the function but are never inlined; count
            // them so partially-inlined functions stay consistent.
            if let CallTarget::Fn(FnId(id)) = call.target {
                *counts.entry(id).or_insert(0) += 1;
            }
            for arg in &call.args {
                count_sites_expr(arg, counts);
            }
        }
        ExprKind::Unary { operand, .. } => count_sites_expr(operand, counts),
        ExprKind::Binary { lhs, rhs, .. } => {
            count_sites_expr(lhs, counts);
            count_sites_expr(rhs, counts);
        }
        ExprKind::Method { recv, args, .. } => {
            count_sites_expr(recv, counts);
            for arg in args {
                count_sites_expr(arg, counts);
            }
        }
        ExprKind::Field { recv, .. } => count_sites_expr(recv, counts),
        ExprKind::Index { recv, index } => {
            count_sites_expr(recv, counts);
            count_sites_expr(index, counts);
        }
        ExprKind::IncDec { target, .. } => count_sites_expr(target, counts),
        ExprKind::Await { task } => count_sites_expr(task, counts),
        _ => {}
    }
}

/// An expression with no observable effect when discarded.
fn expr_is_pure(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::Var(_)
        | ExprKind::SelfField { .. } => true,
        ExprKind::Unary { operand, .. } => expr_is_pure(operand),
        ExprKind::Binary { lhs, rhs, .. } => expr_is_pure(lhs) && expr_is_pure(rhs),
        ExprKind::Field { recv, .. } => expr_is_pure(recv),
        _ => false,
    }
}

/// Count every appearance of each variable name except its declaration.
fn count_uses_block(block: &Block, uses: &mut FxHashMap<Symbol, usize>) {
    for stmt in &block.stmts {
        count_uses_stmt(stmt, uses);
    }
}

fn count_uses_stmt(stmt: &Stmt, uses: &mut FxHashMap<Symbol, usize>) {
    let mut count_expr = |expr: &Expr| {
        count_uses_expr(expr, uses);
    };
    match &stmt.kind {
        StmtKind::Declare { init, .. } => {
            if let Some(expr) = init {
                count_expr(expr);
            }
        }
        StmtKind::Assign { target, value, .. } => {
            count_expr(target);
            count_expr(value);
        }
        StmtKind::If { arms, else_block } => {
            for arm in arms {
                count_uses_expr(&arm.cond, uses);
                count_uses_block(&arm.body, uses);
            }
            if let Some(block) = else_block {
                count_uses_block(block, uses);
            }
        }
        StmtKind::While { cond, body } => {
            count_uses_expr(cond, uses);
            count_uses_block(body, uses);
        }
        StmtKind::For(for_loop) => {
            count_uses_expr(&for_loop.start, uses);
            count_uses_expr(&for_loop.end, uses);
            if let Some(step) = &for_loop.step {
                count_uses_expr(step, uses);
            }
            count_uses_block(&for_loop.body, uses);
        }
        StmtKind::Return { value, releases } => {
            if let Some(expr) = value {
                count_expr(expr);
            }
            for release in releases {
                *uses.entry(release.var).or_insert(0) += 1;
            }
        }
        StmtKind::Break { releases } | StmtKind::Continue { releases } => {
            for release in releases {
                *uses.entry(release.var).or_insert(0) += 1;
            }
        }
        StmtKind::Expr(expr) => count_expr(expr),
        StmtKind::Release(release) => {
            *uses.entry(release.var).or_insert(0) += 1;
        }
        StmtKind::Block(block) => count_uses_block(block, uses),
        StmtKind::Marker(_) | StmtKind::Empty => {}
    }
}

fn count_uses_expr(expr: &Expr, uses: &mut FxHashMap<Symbol, usize>) {
    match &expr.kind {
        ExprKind::Var(sym) => {
            *uses.entry(*sym).or_insert(0) += 1;
        }
        ExprKind::Unary { operand, .. } => count_uses_expr(operand, uses),
        ExprKind::Binary { lhs, rhs, .. } => {
            count_uses_expr(lhs, uses);
            count_uses_expr(rhs, uses);
        }
        ExprKind::Call(call) | ExprKind::Spawn(call) => {
            for arg in &call.args {
                count_uses_expr(arg, uses);
            }
        }
        ExprKind::Method { recv, args, .. } => {
            count_uses_expr(recv, uses);
            for arg in args {
                count_uses_expr(arg, uses);
            }
        }
        ExprKind::Field { recv, .. } => count_uses_expr(recv, uses),
        ExprKind::Index { recv, index } => {
            count_uses_expr(recv, uses);
            count_uses_expr(index, uses);
        }
        ExprKind::IncDec { target, .. } => count_uses_expr(target, uses),
        ExprKind::Await { task } => count_uses_expr(task, uses),
        _ => {}
    }
}

fn count_var_uses(expr: &Expr, name: Symbol) -> usize {
    match &expr.kind {
        ExprKind::Var(sym) => usize::from(*sym == name),
        ExprKind::Unary { operand, .. } => count_var_uses(operand, name),
        ExprKind::Binary { lhs, rhs, .. } => {
            count_var_uses(lhs, name) + count_var_uses(rhs, name)
        }
        ExprKind::Call(call) | ExprKind::Spawn(call) => {
            call.args.iter().map(|a| count_var_uses(a, name)).sum()
        }
        ExprKind::Method { recv, args, .. } => {
            count_var_uses(recv, name)
                + args.iter().map(|a| count_var_uses(a, name)).sum::<usize>()
        }
        ExprKind::Field { recv, .. } => count_var_uses(recv, name),
        ExprKind::Index { recv, index } => {
            count_var_uses(recv, name) + count_var_uses(index, name)
        }
        ExprKind::IncDec { target, .. } => count_var_uses(target, name),
        ExprKind::Await { task } => count_var_uses(task, name),
        _ => 0,
    }
}

/// Shapes `substitute` rewrites completely; anything else must not be
/// expression-inlined or parameter references would survive the splice.
fn substitutable(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::Var(_) => true,
        ExprKind::Unary { operand, .. } => substitutable(operand),
        ExprKind::Binary { lhs, rhs, .. } => substitutable(lhs) && substitutable(rhs),
        ExprKind::Call(call) => call.args.iter().all(substitutable),
        ExprKind::Index { recv, index } => substitutable(recv) && substitutable(index),
        _ => false,
    }
}

/// Clone with parameters replaced by their arguments.
fn substitute(expr: &Expr, map: &FxHashMap<Symbol, Expr>) -> Expr {
    let kind = match &expr.kind {
        ExprKind::Var(sym) => {
            if let Some(replacement) = map.get(sym) {
                return replacement.clone();
            }
            ExprKind::Var(*sym)
        }
        ExprKind::Unary { op, operand } => ExprKind::Unary {
            op: *op,
            operand: Box::new(substitute(operand, map)),
        },
        ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
            op: *op,
            lhs: Box::new(substitute(lhs, map)),
            rhs: Box::new(substitute(rhs, map)),
        },
        ExprKind::Call(call) => ExprKind::Call(lsc_par::ast::CallExpr {
            name: call.name,
            args: call.args.iter().map(|a| substitute(a, map)).collect(),
            target: call.target.clone(),
        }),
        ExprKind::Index { recv, index } => ExprKind::Index {
            recv: Box::new(substitute(recv, map)),
            index: Box::new(substitute(index, map)),
        },
        other => other.clone(),
    };
    Expr {
        kind,
        ty: expr.ty.clone(),
        span: expr.span,
        is_const: expr.is_const,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsc_par::Parser;
    use lsc_util::{FileId, Handler, Interner};

    fn optimized(source: &str) -> Module {
        optimized_with(source, &OptOptions::default())
    }

    fn optimized_with(source: &str, opts: &OptOptions) -> Module {
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
        optimize(&mut module, opts);
        module
    }

    fn first_declare_init(module: &Module) -> &Expr {
        for item in &module.items {
            if let Item::Stmt(stmt) = item {
                if let StmtKind::Declare {
                    init: Some(expr), ..
                } = &stmt.kind
                {
                    return expr;
                }
            }
        }
        panic!("no declare with initializer found");
    }

    #[test]
    fn test_fold_arithmetic() {
        let module = optimized("declare x = 2 + 3 * 4\nprintln(x)\n");
        assert!(matches!(first_declare_init(&module).kind, ExprKind::Int(14)));
    }

    #[test]
    fn test_fold_wraps_two_complement() {
        let module = optimized("declare x = 9223372036854775807 + 1\nprintln(x)\n");
        assert!(matches!(
            first_declare_init(&module).kind,
            ExprKind::Int(i64::MIN)
        ));
    }

    #[test]
    fn test_fold_power() {
        let module = optimized("declare x = 2 ** 10\nprintln(x)\n");
        assert!(matches!(first_declare_init(&module).kind, ExprKind::Int(1024)));
        assert_eq!(pow_i64(1, 10), 1);
        assert_eq!(pow_i64(3, 4), 81);
        assert_eq!(pow_i64(-2, 3), -8);
        assert_eq!(pow_i64(7, 0), 1);
    }

    #[test]
    fn test_fold_string_concat_and_len() {
        let module = optimized("declare s = \"ab\" + \"cd\"\nprintln(s)\n");
        match &first_declare_init(&module).kind {
            ExprKind::Str(s) => assert_eq!(s, "abcd"),
            other => panic!("expected folded string, got {:?}", other),
        }
        let module = optimized("declare n = len(\"hello\")\nprintln(n)\n");
        assert!(matches!(first_declare_init(&module).kind, ExprKind::Int(5)));
    }

    #[test]
    fn test_fold_comparison_and_logic() {
        let module = optimized("declare b = 3 < 4 and not false\nprintln(b)\n");
        assert!(matches!(
            first_declare_init(&module).kind,
            ExprKind::Bool(true)
        ));
    }

    #[test]
    fn test_if_true_collapses() {
        let module = optimized("f() -> i64 do\nif true do\nreturn 1\nend\nreturn 2\nend\nprintln(f())\n");
        let func = module
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(func) => Some(func),
                _ => None,
            })
            .unwrap();
        // The collapsed arm ends in `return`, so the trailing return is dead.
        assert_eq!(func.body.stmts.len(), 1);
        assert!(matches!(func.body.stmts[0].kind, StmtKind::Block(_)));
    }

    #[test]
    fn test_while_false_removed() {
        let module = optimized("declare x = 1\nwhile false do\nprintln(x)\nend\nprintln(x)\n");
        let has_while = module.items.iter().any(|item| {
            matches!(
                item,
                Item::Stmt(Stmt {
                    kind: StmtKind::While { .. },
                    ..
                })
            )
        });
        assert!(!has_while);
    }

    #[test]
    fn test_dead_code_after_return() {
        let module = optimized("f() -> i64 do\nreturn 1\nprintln(2)\nend\nprintln(f())\n");
        let func = module
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(func) => Some(func),
                _ => None,
            })
            .unwrap();
        assert_eq!(func.body.stmts.len(), 1);
    }

    #[test]
    fn test_small_loop_unrolls() {
        let module = optimized("declare s = 0\nfor i in 0..4 do\ns += i\nend\nprintln(s)\n");
        let unrolled = module.items.iter().any(|item| {
            matches!(
                item,
                Item::Stmt(Stmt {
                    kind: StmtKind::Block(_),
                    ..
                })
            )
        });
        assert!(unrolled, "expected the loop to unroll into a block");
    }

    #[test]
    fn test_large_loop_stays() {
        let module = optimized("declare s = 0\nfor i in 0..1000 do\ns += i\nend\nprintln(s)\n");
        let has_for = module.items.iter().any(|item| {
            matches!(
                item,
                Item::Stmt(Stmt {
                    kind: StmtKind::For(_),
                    ..
                })
            )
        });
        assert!(has_for);
    }

    #[test]
    fn test_zero_step_loop_becomes_empty() {
        let module = optimized("declare s = 0\nfor i in 0..10 step 0 do\ns += i\nend\nprintln(s)\n");
        let has_for = module.items.iter().any(|item| {
            matches!(
                item,
                Item::Stmt(Stmt {
                    kind: StmtKind::For(_),
                    ..
                })
            )
        });
        assert!(!has_for, "zero-step loop must vanish, not loop forever");
    }

    #[test]
    fn test_trip_count() {
        assert_eq!(trip_count(0, 10, 1), 10);
        assert_eq!(trip_count(0, 10, 3), 4);
        assert_eq!(trip_count(10, 0, -2), 5);
        assert_eq!(trip_count(5, 5, 1), 0);
        assert_eq!(trip_count(10, 0, 1), 0);
    }

    #[test]
    fn test_single_return_callee_inlines() {
        let source = "double(n: i64) -> i64 do\nreturn n * 2\nend\n\
                      declare x = double(21)\nprintln(x)\n";
        let module = optimized(source);
        // After inlining and folding the initializer is the literal 42.
        assert!(matches!(first_declare_init(&module).kind, ExprKind::Int(42)));
    }

    #[test]
    fn test_recursive_callee_not_inlined() {
        let source = "fact(n: i64) -> i64 do\nif n <= 1 do\nreturn 1\nend\nreturn n * fact(n - 1)\nend\n\
                      declare x = fact(5)\nprintln(x)\n";
        let module = optimized(source);
        match &first_declare_init(&module).kind {
            ExprKind::Call(call) => assert!(matches!(call.target, CallTarget::Fn(_))),
            other => panic!("expected surviving call, got {:?}", other),
        }
    }

    #[test]
    fn test_throwing_callee_not_inlined() {
        let source = "risky() -> str throws IoError do\nreturn file_read(\"x\")\nend\n\
                      run() -> str throws IoError do\nreturn risky()\nend\n\
                      println(\"ok\")\n";
        let module = optimized(source);
        // The call to `risky` inside `run` must survive.
        let surviving_user_call = module.items.iter().any(|item| match item {
            Item::Function(func) => func.body.stmts.iter().any(|stmt| match &stmt.kind {
                StmtKind::Return {
                    value: Some(expr), ..
                } => matches!(
                    &expr.kind,
                    ExprKind::Call(call) if matches!(call.target, CallTarget::Fn(_))
                ),
                _ => false,
            }),
            _ => false,
        });
        assert!(surviving_user_call);
    }

    #[test]
    fn test_unused_pure_local_removed() {
        let module =
            optimized("f() -> i64 do\ndeclare unused = 5\nreturn 1\nend\nprintln(f())\n");
        let func = module
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(func) => Some(func),
                _ => None,
            })
            .unwrap();
        assert!(func
            .body
            .stmts
            .iter()
            .all(|stmt| !matches!(stmt.kind, StmtKind::Declare { .. })));
    }

    #[test]
    fn test_unused_local_with_call_init_kept() {
        let module =
            optimized("f() -> i64 do\ndeclare side = clock_us()\nreturn 1\nend\nprintln(f())\n");
        let func = module
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(func) => Some(func),
                _ => None,
            })
            .unwrap();
        assert!(func
            .body
            .stmts
            .iter()
            .any(|stmt| matches!(stmt.kind, StmtKind::Declare { .. })));
    }

    #[test]
    fn test_optimizer_is_idempotent() {
        let source = "declare a = 1 + 2\ndeclare s = 0\nfor i in 0..3 do\ns += a\nend\n\
                      if true do\nprintln(s)\nend\n";
        let handler = Handler::new();
        let mut interner = Interner::new();
        let tokens = lsc_lex::tokenize(source, FileId(0), &handler, &mut interner);
        let mut module = Parser::new(tokens, &handler, &mut interner).parse();
        lsc_sem::analyze(&mut module, &handler, &mut interner);
        assert!(!handler.has_errors());

        optimize(&mut module, &OptOptions::default());
        let first = format!("{:?}", module);
        let passes = optimize(&mut module, &OptOptions::default());
        let second = format!("{:?}", module);
        assert_eq!(first, second);
        assert_eq!(passes, 1, "second run must fix-point immediately");
    }

    #[test]
    fn test_pass_cap_respected() {
        let opts = OptOptions {
            max_passes: 1,
            ..OptOptions::default()
        };
        // One pass still folds, it just cannot iterate.
        let module = optimized_with("declare x = 1 + 1\nprintln(x)\n", &opts);
        assert!(matches!(first_declare_init(&module).kind, ExprKind::Int(2)));
    }
}
