//! Built-in and host-library call resolution.
//!
//! Two families live here. Prelude helpers (print/println, `input`, casts,
//! the specialized `max`/`min`/`abs`/`clamp` variants, string helpers, CLI
//! introspection) are emitted as self-contained C by the backend. Host
//! symbols (arrays, dicts, canvas, game loop, physics, HTTP, files,
//! threads) are opaque: the compiler owns only their signatures and
//! lifetime contracts, and the backend emits bare prototypes for the ones
//! a program references.

use lsc_par::ast::Ty;

/// A resolved builtin call.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltinSig {
    /// Concrete emitted symbol, already type-specialized (`max_i64`,
    /// `ls_print_str`, `array_new`)
    pub symbol: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
    /// Error tags the callee may surface
    pub throws: &'static [&'static str],
    /// Release function when the call produces an owned handle
    pub owned_free: Option<&'static str>,
    /// True for opaque host symbols that need an emitted prototype
    pub host: bool,
}

fn sig(symbol: &str, params: Vec<Ty>, ret: Ty, host: bool) -> BuiltinSig {
    BuiltinSig {
        symbol: symbol.to_string(),
        params,
        ret,
        throws: &[],
        owned_free: None,
        host,
    }
}

fn owning(symbol: &str, params: Vec<Ty>, free: &'static str) -> BuiltinSig {
    BuiltinSig {
        symbol: symbol.to_string(),
        params,
        ret: Ty::Handle,
        throws: &[],
        owned_free: Some(free),
        host: true,
    }
}

fn throwing(
    symbol: &str,
    params: Vec<Ty>,
    ret: Ty,
    throws: &'static [&'static str],
) -> BuiltinSig {
    BuiltinSig {
        symbol: symbol.to_string(),
        params,
        ret,
        throws,
        owned_free: None,
        host: true,
    }
}

/// Numeric suffix for type-specialized helpers.
fn suffix(ty: &Ty) -> Option<&'static str> {
    match ty {
        Ty::I32 => Some("i32"),
        Ty::I64 => Some("i64"),
        Ty::F32 => Some("f32"),
        Ty::F64 => Some("f64"),
        _ => None,
    }
}

/// Print family: one argument of any primitive printable type.
fn resolve_print(base: &str, args: &[Ty]) -> Option<BuiltinSig> {
    if args.len() != 1 {
        return None;
    }
    let variant = match &args[0] {
        Ty::I32 => "i32",
        Ty::I64 => "i64",
        Ty::F32 => "f32",
        Ty::F64 => "f64",
        Ty::Bool => "bool",
        Ty::Str => "str",
        Ty::Unresolved => "i64", // error recovery
        _ => return None,
    };
    Some(sig(
        &format!("ls_{}_{}", base, variant),
        vec![args[0].clone()],
        Ty::Void,
        false,
    ))
}

/// Ad-hoc generic helpers expand to the type-specialized variant.
fn resolve_generic(name: &str, args: &[Ty]) -> Option<BuiltinSig> {
    let arity = match name {
        "abs" => 1,
        "max" | "min" => 2,
        "clamp" => 3,
        _ => return None,
    };
    if args.len() != arity {
        return None;
    }
    let sfx = suffix(&args[0])?;
    if args.iter().any(|a| suffix(a) != Some(sfx)) {
        return None;
    }
    Some(sig(
        &format!("{}_{}", name, sfx),
        args.to_vec(),
        args[0].clone(),
        false,
    ))
}

/// Explicit casts; widening and narrowing are both spelled out.
fn resolve_cast(name: &str, args: &[Ty]) -> Option<BuiltinSig> {
    if args.len() != 1 || suffix(&args[0]).is_none() {
        return None;
    }
    let ret = match name {
        "to_i32" => Ty::I32,
        "to_i64" => Ty::I64,
        "to_f32" => Ty::F32,
        "to_f64" => Ty::F64,
        _ => return None,
    };
    Some(sig(
        &format!("ls_{}", name),
        vec![args[0].clone()],
        ret,
        false,
    ))
}

/// Resolve a builtin by name and argument types.
///
/// Returns `None` when the name is unknown or the arguments do not fit any
/// variant; the caller reports the diagnostic.
pub fn resolve_builtin(name: &str, args: &[Ty]) -> Option<BuiltinSig> {
    match name {
        "print" => return resolve_print("print", args),
        "println" => return resolve_print("println", args),
        "max" | "min" | "abs" | "clamp" => return resolve_generic(name, args),
        "to_i32" | "to_i64" | "to_f32" | "to_f64" => return resolve_cast(name, args),
        "to_str" => {
            if args.len() == 1 {
                let variant = match &args[0] {
                    Ty::I64 => "i64",
                    Ty::F64 => "f64",
                    Ty::Bool => "bool",
                    _ => return None,
                };
                return Some(sig(
                    &format!("ls_str_from_{}", variant),
                    args.to_vec(),
                    Ty::Str,
                    false,
                ));
            }
            return None;
        }
        _ => {}
    }

    let fixed = match name {
        // Prelude helpers
        "input" => sig("ls_input", vec![], Ty::Str, false),
        "len" => sig("ls_str_len", vec![Ty::Str], Ty::I64, false),
        "clock_us" => sig("ls_now_us", vec![], Ty::I64, false),
        "cli_has" => sig("ls_cli_has", vec![Ty::Str], Ty::Bool, false),
        "cli_value" => sig("ls_cli_value", vec![Ty::Str], Ty::Str, false),
        "cli_token" => sig("ls_cli_token", vec![Ty::I64], Ty::Str, false),
        "cli_token_count" => sig("ls_cli_token_count", vec![], Ty::I64, false),

        // Host: arrays of i64
        "array_new" => owning("array_new", vec![], "array_free"),
        "array_free" => sig("array_free", vec![Ty::Handle], Ty::Void, true),
        "array_push" => sig("array_push", vec![Ty::Handle, Ty::I64], Ty::Void, true),
        "array_get" => sig("array_get", vec![Ty::Handle, Ty::I64], Ty::I64, true),
        "array_set" => sig(
            "array_set",
            vec![Ty::Handle, Ty::I64, Ty::I64],
            Ty::Void,
            true,
        ),
        "array_len" => sig("array_len", vec![Ty::Handle], Ty::I64, true),

        // Host: string-keyed dictionaries
        "dict_new" => owning("dict_new", vec![], "dict_free"),
        "dict_free" => sig("dict_free", vec![Ty::Handle], Ty::Void, true),
        "dict_set" => sig(
            "dict_set",
            vec![Ty::Handle, Ty::Str, Ty::I64],
            Ty::Void,
            true,
        ),
        "dict_get" => sig("dict_get", vec![Ty::Handle, Ty::Str], Ty::I64, true),
        "dict_has" => sig("dict_has", vec![Ty::Handle, Ty::Str], Ty::Bool, true),

        // Host: graphics canvas
        "canvas_new" => owning("canvas_new", vec![Ty::I64, Ty::I64], "canvas_free"),
        "canvas_free" => sig("canvas_free", vec![Ty::Handle], Ty::Void, true),
        "canvas_fill_rect" => sig(
            "canvas_fill_rect",
            vec![Ty::Handle, Ty::I64, Ty::I64, Ty::I64, Ty::I64],
            Ty::Void,
            true,
        ),
        "canvas_present" => sig("canvas_present", vec![Ty::Handle], Ty::Void, true),

        // Host: game loop
        "game_new" => owning("game_new", vec![], "game_free"),
        "game_free" => sig("game_free", vec![Ty::Handle], Ty::Void, true),
        "game_running" => sig("game_running", vec![Ty::Handle], Ty::Bool, true),
        "game_poll" => sig("game_poll", vec![Ty::Handle], Ty::I64, true),

        // Host: physics
        "physics_world_new" => owning("physics_world_new", vec![], "physics_world_free"),
        "physics_world_free" => sig("physics_world_free", vec![Ty::Handle], Ty::Void, true),
        "physics_step" => sig("physics_step", vec![Ty::Handle, Ty::F64], Ty::Void, true),
        "physics_body_new" => sig(
            "physics_body_new",
            vec![Ty::Handle, Ty::F64, Ty::F64],
            Ty::Handle,
            true,
        ),

        // Host: HTTP
        "http_get" => throwing("http_get", vec![Ty::Str], Ty::Str, &["NetError"]),
        "http_open" => BuiltinSig {
            symbol: "http_open".to_string(),
            params: vec![Ty::Str],
            ret: Ty::Handle,
            throws: &["NetError"],
            owned_free: Some("http_close"),
            host: true,
        },
        "http_close" => sig("http_close", vec![Ty::Handle], Ty::Void, true),

        // Host: files
        "file_read" => throwing("file_read", vec![Ty::Str], Ty::Str, &["IoError"]),
        "file_write" => throwing("file_write", vec![Ty::Str, Ty::Str], Ty::Void, &["IoError"]),

        // Host: misc runtime
        "sleep_ms" => sig("ls_sleep_ms", vec![Ty::I64], Ty::Void, true),
        "await_all" => sig("ls_thread_join_all", vec![], Ty::Void, true),

        _ => return None,
    };

    if fixed.params.len() != args.len() {
        return None;
    }
    for (expected, actual) in fixed.params.iter().zip(args) {
        if *actual == Ty::Unresolved {
            continue;
        }
        let compatible = expected == actual
            || (*expected == Ty::Handle && matches!(actual, Ty::Class(_)));
        if !compatible {
            return None;
        }
    }
    Some(fixed)
}

/// C prototype for an opaque host symbol, for the emitted prelude.
pub fn host_prototype(symbol: &str) -> Option<&'static str> {
    let proto = match symbol {
        "array_new" => "ls_handle array_new(void);",
        "array_free" => "void array_free(ls_handle a);",
        "array_push" => "void array_push(ls_handle a, int64_t v);",
        "array_get" => "int64_t array_get(ls_handle a, int64_t i);",
        "array_set" => "void array_set(ls_handle a, int64_t i, int64_t v);",
        "array_len" => "int64_t array_len(ls_handle a);",
        "dict_new" => "ls_handle dict_new(void);",
        "dict_free" => "void dict_free(ls_handle d);",
        "dict_set" => "void dict_set(ls_handle d, ls_str k, int64_t v);",
        "dict_get" => "int64_t dict_get(ls_handle d, ls_str k);",
        "dict_has" => "int32_t dict_has(ls_handle d, ls_str k);",
        "canvas_new" => "ls_handle canvas_new(int64_t w, int64_t h);",
        "canvas_free" => "void canvas_free(ls_handle c);",
        "canvas_fill_rect" => {
            "void canvas_fill_rect(ls_handle c, int64_t x, int64_t y, int64_t w, int64_t h);"
        }
        "canvas_present" => "void canvas_present(ls_handle c);",
        "game_new" => "ls_handle game_new(void);",
        "game_free" => "void game_free(ls_handle g);",
        "game_running" => "int32_t game_running(ls_handle g);",
        "game_poll" => "int64_t game_poll(ls_handle g);",
        "physics_world_new" => "ls_handle physics_world_new(void);",
        "physics_world_free" => "void physics_world_free(ls_handle w);",
        "physics_step" => "void physics_step(ls_handle w, double dt);",
        "physics_body_new" => "ls_handle physics_body_new(ls_handle w, double x, double y);",
        "http_get" => "ls_str http_get(ls_str url);",
        "http_open" => "ls_handle http_open(ls_str url);",
        "http_close" => "void http_close(ls_handle h);",
        "file_read" => "ls_str file_read(ls_str path);",
        "file_write" => "void file_write(ls_str path, ls_str data);",
        "ls_sleep_ms" => "void ls_sleep_ms(int64_t ms);",
        "ls_thread_join_all" => "void ls_thread_join_all(void);",
        "ls_thread_spawn" => "ls_handle ls_thread_spawn(void *(*fn)(void *), void *arg);",
        "ls_thread_join" => "int64_t ls_thread_join(ls_handle t);",
        _ => return None,
    };
    Some(proto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_specializes_by_type() {
        let sig = resolve_builtin("println", &[Ty::I64]).unwrap();
        assert_eq!(sig.symbol, "ls_println_i64");
        let sig = resolve_builtin("print", &[Ty::Str]).unwrap();
        assert_eq!(sig.symbol, "ls_print_str");
        assert!(resolve_builtin("print", &[Ty::Handle]).is_none());
    }

    #[test]
    fn test_generic_helpers_specialize() {
        let sig = resolve_builtin("max", &[Ty::I64, Ty::I64]).unwrap();
        assert_eq!(sig.symbol, "max_i64");
        assert_eq!(sig.ret, Ty::I64);
        let sig = resolve_builtin("clamp", &[Ty::F64, Ty::F64, Ty::F64]).unwrap();
        assert_eq!(sig.symbol, "clamp_f64");
        // Mixed argument types do not specialize.
        assert!(resolve_builtin("max", &[Ty::I64, Ty::F64]).is_none());
    }

    #[test]
    fn test_casts_are_explicit() {
        let sig = resolve_builtin("to_i64", &[Ty::I32]).unwrap();
        assert_eq!(sig.ret, Ty::I64);
        let sig = resolve_builtin("to_f64", &[Ty::F32]).unwrap();
        assert_eq!(sig.ret, Ty::F64);
        assert!(resolve_builtin("to_i64", &[Ty::Str]).is_none());
    }

    #[test]
    fn test_owned_producers_carry_release() {
        let sig = resolve_builtin("array_new", &[]).unwrap();
        assert_eq!(sig.owned_free, Some("array_free"));
        let sig = resolve_builtin("http_open", &[Ty::Str]).unwrap();
        assert_eq!(sig.owned_free, Some("http_close"));
        assert_eq!(sig.throws, &["NetError"]);
    }

    #[test]
    fn test_throws_sets() {
        let sig = resolve_builtin("file_read", &[Ty::Str]).unwrap();
        assert_eq!(sig.throws, &["IoError"]);
        let sig = resolve_builtin("http_get", &[Ty::Str]).unwrap();
        assert_eq!(sig.throws, &["NetError"]);
    }

    #[test]
    fn test_arity_mismatch_fails() {
        assert!(resolve_builtin("array_push", &[Ty::Handle]).is_none());
        assert!(resolve_builtin("input", &[Ty::Str]).is_none());
    }

    #[test]
    fn test_host_prototypes_exist_for_host_symbols() {
        for name in ["array_new", "dict_set", "http_get", "ls_thread_spawn"] {
            assert!(host_prototype(name).is_some(), "missing prototype: {name}");
        }
        assert!(host_prototype("ls_print_i64").is_none());
    }
}
