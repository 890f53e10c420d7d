//! Semantic model: function signatures, class metadata, and the analysis
//! summary consumed by the backends.

use lsc_par::ast::{Access, ClassId, Dispatch, FnId, Ty};
use lsc_util::{Interner, Symbol};

/// Signature of a user function (or script flag).
#[derive(Clone, Debug)]
pub struct FnSig {
    pub name: Symbol,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub throws: Vec<Symbol>,
    pub is_flag: bool,
}

/// A field as seen through the class table.
#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: Symbol,
    pub ty: Ty,
    pub access: Access,
}

/// A method signature as seen through the class table.
#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub name: Symbol,
    pub access: Access,
    pub dispatch: Dispatch,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub throws: Vec<Symbol>,
}

/// Class metadata, referencing the hierarchy through ids so cyclic field
/// references never form ownership cycles.
#[derive(Clone, Debug)]
pub struct ClassMeta {
    pub name: Symbol,
    pub base: Option<ClassId>,
    /// Own fields only; inherited fields live in the base entry
    pub fields: Vec<FieldInfo>,
    /// Own methods only
    pub methods: Vec<MethodInfo>,
    /// Constructor parameter types (empty when no constructor declared)
    pub ctor_params: Vec<Ty>,
    pub has_ctor: bool,
}

/// A virtual-dispatch slot in a class vtable.
#[derive(Clone, Debug)]
pub struct VtSlot {
    pub name: Symbol,
    pub params: Vec<Ty>,
    pub ret: Ty,
}

/// Output of semantic analysis.
#[derive(Clone, Debug, Default)]
pub struct Analysis {
    pub fns: Vec<FnSig>,
    pub classes: Vec<ClassMeta>,
    /// Whether any `parallel for` survives to codegen
    pub uses_parallel: bool,
}

impl Analysis {
    pub fn fn_sig(&self, id: FnId) -> &FnSig {
        &self.fns[id.0 as usize]
    }

    pub fn class(&self, id: ClassId) -> &ClassMeta {
        &self.classes[id.0 as usize]
    }

    /// Walk the base chain from `id` outward, including `id` itself.
    pub fn chain(&self, id: ClassId) -> Vec<ClassId> {
        let mut out = vec![id];
        let mut current = self.class(id).base;
        while let Some(base) = current {
            out.push(base);
            current = self.class(base).base;
        }
        out
    }

    /// True when `sub` is `ancestor` or derives from it.
    pub fn is_subclass(&self, sub: ClassId, ancestor: ClassId) -> bool {
        self.chain(sub).contains(&ancestor)
    }

    /// Find a field by name along the base chain.
    pub fn find_field(&self, id: ClassId, name: Symbol) -> Option<(ClassId, &FieldInfo)> {
        for class_id in self.chain(id) {
            if let Some(field) = self
                .class(class_id)
                .fields
                .iter()
                .find(|f| f.name == name)
            {
                return Some((class_id, field));
            }
        }
        None
    }

    /// Find a method by name along the base chain (nearest first).
    pub fn find_method(&self, id: ClassId, name: Symbol) -> Option<(ClassId, &MethodInfo)> {
        for class_id in self.chain(id) {
            if let Some(method) = self
                .class(class_id)
                .methods
                .iter()
                .find(|m| m.name == name)
            {
                return Some((class_id, method));
            }
        }
        None
    }

    /// Vtable layout for a class: inherited slots first (base order), then
    /// slots introduced by the class's own `virtual` methods.
    pub fn vtable(&self, id: ClassId) -> Vec<VtSlot> {
        let mut slots = match self.class(id).base {
            Some(base) => self.vtable(base),
            None => Vec::new(),
        };
        for method in &self.class(id).methods {
            if method.dispatch == Dispatch::Virtual {
                slots.push(VtSlot {
                    name: method.name,
                    params: method.params.clone(),
                    ret: method.ret.clone(),
                });
            }
        }
        slots
    }

    /// The class providing the implementation of `name` for instances whose
    /// dynamic type is `id` (nearest definition up the chain).
    pub fn resolve_impl(&self, id: ClassId, name: Symbol) -> Option<ClassId> {
        self.find_method(id, name).map(|(owner, _)| owner)
    }

    /// Whether instances of this class carry a vtable pointer.
    pub fn has_vtable(&self, id: ClassId) -> bool {
        !self.vtable(id).is_empty()
    }

    /// The root of the inheritance chain (holds the vtable pointer).
    pub fn root_of(&self, id: ClassId) -> ClassId {
        *self.chain(id).last().unwrap()
    }

    /// Human-readable type name, resolving class ids through the table.
    pub fn ty_name(&self, ty: &Ty, interner: &Interner) -> String {
        match ty {
            Ty::Class(id) => interner.resolve(self.class(*id).name).to_string(),
            Ty::Named(sym) => interner.resolve(*sym).to_string(),
            other => other.base_name().to_string(),
        }
    }
}

/// Exact unification with `Unresolved` as the error-recovery wildcard.
pub fn unify(a: &Ty, b: &Ty) -> Option<Ty> {
    match (a, b) {
        (Ty::Unresolved, other) | (other, Ty::Unresolved) => Some(other.clone()),
        (x, y) if x == y => Some(x.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_hierarchy(interner: &mut Interner) -> Analysis {
        let shape = interner.intern("Shape");
        let square = interner.intern("Square");
        let area = interner.intern("area");
        let w = interner.intern("w");
        Analysis {
            fns: Vec::new(),
            classes: vec![
                ClassMeta {
                    name: shape,
                    base: None,
                    fields: vec![FieldInfo {
                        name: w,
                        ty: Ty::I64,
                        access: Access::Protected,
                    }],
                    methods: vec![MethodInfo {
                        name: area,
                        access: Access::Public,
                        dispatch: Dispatch::Virtual,
                        params: vec![],
                        ret: Ty::I64,
                        throws: vec![],
                    }],
                    ctor_params: vec![Ty::I64],
                    has_ctor: true,
                },
                ClassMeta {
                    name: square,
                    base: Some(ClassId(0)),
                    fields: vec![],
                    methods: vec![MethodInfo {
                        name: area,
                        access: Access::Public,
                        dispatch: Dispatch::Override,
                        params: vec![],
                        ret: Ty::I64,
                        throws: vec![],
                    }],
                    ctor_params: vec![Ty::I64],
                    has_ctor: true,
                },
            ],
            uses_parallel: false,
        }
    }

    #[test]
    fn test_unify_exact_and_wildcard() {
        assert_eq!(unify(&Ty::I64, &Ty::I64), Some(Ty::I64));
        assert_eq!(unify(&Ty::Unresolved, &Ty::Str), Some(Ty::Str));
        assert_eq!(unify(&Ty::I32, &Ty::I64), None);
        assert_eq!(unify(&Ty::F32, &Ty::F64), None);
    }

    #[test]
    fn test_chain_and_subclass() {
        let mut interner = Interner::new();
        let analysis = two_level_hierarchy(&mut interner);
        assert_eq!(analysis.chain(ClassId(1)), vec![ClassId(1), ClassId(0)]);
        assert!(analysis.is_subclass(ClassId(1), ClassId(0)));
        assert!(!analysis.is_subclass(ClassId(0), ClassId(1)));
        assert_eq!(analysis.root_of(ClassId(1)), ClassId(0));
    }

    #[test]
    fn test_field_lookup_walks_bases() {
        let mut interner = Interner::new();
        let analysis = two_level_hierarchy(&mut interner);
        let w = interner.intern("w");
        let (owner, field) = analysis.find_field(ClassId(1), w).unwrap();
        assert_eq!(owner, ClassId(0));
        assert_eq!(field.ty, Ty::I64);
    }

    #[test]
    fn test_vtable_and_impl_resolution() {
        let mut interner = Interner::new();
        let analysis = two_level_hierarchy(&mut interner);
        let area = interner.intern("area");
        // Override does not add a slot.
        assert_eq!(analysis.vtable(ClassId(1)).len(), 1);
        assert!(analysis.has_vtable(ClassId(1)));
        // Nearest implementation wins.
        assert_eq!(analysis.resolve_impl(ClassId(1), area), Some(ClassId(1)));
        assert_eq!(analysis.resolve_impl(ClassId(0), area), Some(ClassId(0)));
    }
}
