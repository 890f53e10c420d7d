//! lsc-drv - Compiler driver.
//!
//! The driver binds the CLI to the pipeline: it reads the inputs, runs
//! lexer, parser, semantic analyzer, and optimizer, resolves the entry,
//! selects a backend (trying ASM first in `auto` mode and logging every
//! rejection), hands the emitted text to the external toolchain, and
//! forwards exit codes. Intermediate files are removed on every path
//! unless `--keep-c` is given.

pub mod config;
pub mod toolchain;

use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;
use tracing::{debug, warn};

use lsc_opt::OptOptions;
use lsc_par::ast::{Block, FnDecl, Item, Module, Ty};
use lsc_par::Parser;
use lsc_util::{ErrorKind, FxHashSet, Handler, Interner, SourceMap, Span, Symbol};

pub use config::{parse_args, BackendChoice, Config, Mode};
use toolchain::{TempArtifact, Toolchain, ToolchainFailure};

/// One compiler invocation: sources, interner, and diagnostics are owned
/// here and threaded by reference through the phases, so concurrent
/// sessions in one process never share state.
pub struct Session {
    pub config: Config,
    sources: SourceMap,
    handler: Handler,
    interner: Interner,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sources: SourceMap::new(),
            handler: Handler::new(),
            interner: Interner::new(),
        }
    }

    /// Run the configured pipeline; returns the process exit code and
    /// prints all diagnostics of the first failing phase to stderr.
    pub fn run(&mut self) -> i32 {
        let code = self.execute();
        self.flush_diagnostics();
        code
    }

    fn flush_diagnostics(&self) {
        for diagnostic in self.handler.diagnostics() {
            eprintln!("{}", diagnostic.render(&self.sources));
        }
    }

    fn execute(&mut self) -> i32 {
        // Phase 1: read inputs.
        let inputs = self.config.inputs.clone();
        for path in &inputs {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    self.sources.add_file(path, content);
                }
                Err(err) => {
                    self.handler.error(
                        ErrorKind::Io,
                        Span::DUMMY,
                        format!("cannot read `{}`: {}", path.display(), err),
                    );
                }
            }
        }
        if self.handler.has_errors() {
            return self.handler.exit_code();
        }

        // Phase 2+3: lex and parse each file, merge in command-line order.
        let sources = &self.sources;
        let handler = &self.handler;
        let interner = &mut self.interner;
        let mut parts = Vec::new();
        for file in sources.iter() {
            debug!(file = %file.name(), "lexing and parsing");
            let tokens = lsc_lex::tokenize(&file.content, file.id, handler, interner);
            let parser = Parser::new(tokens, handler, interner);
            parts.push(parser.parse());
        }
        let mut module = Module::merge(parts);
        if self.handler.has_errors() {
            return self.handler.exit_code();
        }

        // Entry synthesis happens before analysis so top-level statements
        // are checked as a normal function body.
        let entry = self.prepare_entry(&mut module);

        // Phase 4: semantic analysis.
        let analysis = lsc_sem::analyze(&mut module, &self.handler, &mut self.interner);
        if self.handler.has_errors() {
            return self.handler.exit_code();
        }
        self.warn_unknown_flags(&module);

        // Phase 5: optimizer.
        let opt_options = self.opt_options();
        let passes = lsc_opt::optimize(&mut module, &opt_options);
        debug!(passes, "optimizer reached a fixed point or the cap");

        if self.config.mode == Mode::Check {
            return 0;
        }

        let Some(entry) = entry else {
            self.handler.error(
                ErrorKind::Name,
                Span::DUMMY,
                "cannot determine the entry: provide top-level statements, a zero-argument \
                 `main`, or exactly one zero-argument function"
                    .to_string(),
            );
            return self.handler.exit_code();
        };

        // Phase 6: backend selection and emission.
        let emitted = match self.config.backend {
            BackendChoice::C => {
                let text = lsc_gen::emit_c(
                    &module,
                    &analysis,
                    &self.interner,
                    entry,
                    &self.config.user_tokens,
                );
                (text, "c")
            }
            BackendChoice::Asm => {
                match lsc_gen::emit_asm(&module, &analysis, &self.interner, entry) {
                    Ok(text) => (text, "s"),
                    Err(err) => {
                        self.handler
                            .error(ErrorKind::Backend, Span::DUMMY, err.to_string());
                        return self.handler.exit_code();
                    }
                }
            }
            BackendChoice::Auto => {
                match lsc_gen::emit_asm(&module, &analysis, &self.interner, entry) {
                    Ok(text) => (text, "s"),
                    Err(err) => {
                        warn!(reason = %err, "asm backend rejected the module, using C");
                        self.handler.warning(Span::DUMMY, err.to_string());
                        let text = lsc_gen::emit_c(
                            &module,
                            &analysis,
                            &self.interner,
                            entry,
                            &self.config.user_tokens,
                        );
                        (text, "c")
                    }
                }
            }
        };

        // Phase 7: toolchain.
        let output = self.output_path();
        let intermediate = output.with_extension(emitted.1);
        if let Err(err) = std::fs::write(&intermediate, &emitted.0) {
            self.handler.error(
                ErrorKind::Io,
                Span::DUMMY,
                format!("cannot write `{}`: {}", intermediate.display(), err),
            );
            return self.handler.exit_code();
        }
        let _artifact = TempArtifact::new(intermediate.clone(), self.config.keep_c);

        let toolchain = Toolchain::resolve(self.config.cc.as_deref());
        match toolchain.compile(&intermediate, &output, &self.config, analysis.uses_parallel) {
            Ok(()) => {}
            Err(ToolchainFailure::Invocation(message)) => {
                self.handler
                    .error(ErrorKind::Toolchain, Span::DUMMY, message);
                return self.handler.exit_code();
            }
            Err(ToolchainFailure::Compilation(message)) => {
                self.handler.error(
                    ErrorKind::Backend,
                    Span::DUMMY,
                    format!("toolchain compilation failed: {}", message),
                );
                return self.handler.exit_code();
            }
        }

        if let Some(fdata) = self.config.bolt_use.clone() {
            if let Err(failure) = toolchain.bolt(&output, &fdata) {
                let message = match failure {
                    ToolchainFailure::Invocation(m) | ToolchainFailure::Compilation(m) => m,
                };
                self.handler
                    .error(ErrorKind::Backend, Span::DUMMY, message);
                return self.handler.exit_code();
            }
        }

        if self.config.mode == Mode::Run {
            return match launch(&output) {
                Ok(code) => code,
                Err(err) => {
                    eprintln!("IoError: {:#}", err);
                    5
                }
            };
        }
        0
    }

    fn opt_options(&self) -> OptOptions {
        let mut options = if self.config.max_speed {
            OptOptions::max_speed()
        } else {
            OptOptions::default()
        };
        if let Some(passes) = self.config.passes {
            options.max_passes = passes;
        }
        options
    }

    fn output_path(&self) -> PathBuf {
        if let Some(output) = &self.config.output {
            return output.clone();
        }
        let stem = self.config.inputs[0]
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "a.out".into());
        PathBuf::from(stem)
    }

    /// Entry resolution: top-level statements (hoisted into a synthesized
    /// function), else a zero-argument `main`, else exactly one
    /// zero-argument function.
    fn prepare_entry(&mut self, module: &mut Module) -> Option<Symbol> {
        let has_top_level = module
            .items
            .iter()
            .any(|item| matches!(item, Item::Stmt(_)));
        if has_top_level {
            let name = self.interner.intern("__ls_entry");
            let mut top = Vec::new();
            let mut items = Vec::new();
            for item in module.items.drain(..) {
                match item {
                    Item::Stmt(stmt) => top.push(stmt),
                    other => items.push(other),
                }
            }
            let span = top.first().map(|s| s.span).unwrap_or(Span::DUMMY);
            items.push(Item::Function(FnDecl {
                name,
                params: Vec::new(),
                ret: Ty::Void,
                throws: Vec::new(),
                body: Block { stmts: top, span },
                is_flag: false,
                span,
            }));
            module.items = items;
            return Some(name);
        }

        let main_sym = self.interner.intern("main");
        let mut zero_arg = Vec::new();
        for item in &module.items {
            if let Item::Function(func) = item {
                if func.is_flag || !func.params.is_empty() {
                    continue;
                }
                if func.name == main_sym {
                    return Some(main_sym);
                }
                zero_arg.push(func.name);
            }
        }
        if zero_arg.len() == 1 {
            return Some(zero_arg[0]);
        }
        None
    }

    /// Unknown flags outside grouped mode warn unless a script `flag`
    /// declaration claims them.
    fn warn_unknown_flags(&self, module: &Module) {
        let declared: FxHashSet<&str> = module
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Function(func) if func.is_flag => {
                    Some(self.interner.resolve(func.name))
                }
                _ => None,
            })
            .collect();
        for token in &self.config.user_tokens {
            if self.config.grouped_tokens.contains(token) {
                continue;
            }
            let name = token.trim_start_matches('-');
            if !declared.contains(name) {
                self.handler
                    .warning(Span::DUMMY, format!("unknown flag `{}` ignored", token));
            }
        }
    }
}

fn launch(output: &std::path::Path) -> anyhow::Result<i32> {
    let absolute = std::fs::canonicalize(output)
        .with_context(|| format!("cannot locate built binary `{}`", output.display()))?;
    let status = Command::new(&absolute)
        .status()
        .with_context(|| format!("failed to launch `{}`", absolute.display()))?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_for(source: &str) -> (Session, Module, Option<Symbol>) {
        let mut session = Session::new(Config {
            inputs: vec![PathBuf::from("test.lsc")],
            ..Config::default()
        });
        let id = session.sources.add_file("test.lsc", source.to_string());
        let tokens = lsc_lex::tokenize(source, id, &session.handler, &mut session.interner);
        let mut module = Parser::new(tokens, &session.handler, &mut session.interner).parse();
        let entry = session.prepare_entry(&mut module);
        (session, module, entry)
    }

    #[test]
    fn test_entry_from_top_level_statements() {
        let (session, module, entry) = session_for("println(1)\n");
        let entry = entry.unwrap();
        assert_eq!(session.interner.resolve(entry), "__ls_entry");
        // The statement moved into the synthesized function.
        assert!(module
            .items
            .iter()
            .all(|item| !matches!(item, Item::Stmt(_))));
    }

    #[test]
    fn test_entry_prefers_main() {
        let source = "main() -> i64 do\nreturn 0\nend\nother() do\nend\n";
        let (session, _, entry) = session_for(source);
        assert_eq!(session.interner.resolve(entry.unwrap()), "main");
    }

    #[test]
    fn test_entry_single_zero_arg_function() {
        let source = "start() do\nend\nhelper(n: i64) -> i64 do\nreturn n\nend\n";
        let (session, _, entry) = session_for(source);
        assert_eq!(session.interner.resolve(entry.unwrap()), "start");
    }

    #[test]
    fn test_entry_ambiguous_is_none() {
        let source = "a() do\nend\nb() do\nend\n";
        let (_, _, entry) = session_for(source);
        assert!(entry.is_none());
    }

    #[test]
    fn test_output_path_defaults_to_stem() {
        let session = Session::new(Config {
            inputs: vec![PathBuf::from("dir/game.lsc")],
            ..Config::default()
        });
        assert_eq!(session.output_path(), PathBuf::from("game"));
    }

    #[test]
    fn test_opt_options_follow_flags() {
        let session = Session::new(Config {
            inputs: vec![PathBuf::from("m.lsc")],
            max_speed: true,
            ..Config::default()
        });
        assert_eq!(session.opt_options().max_passes, 10);

        let session = Session::new(Config {
            inputs: vec![PathBuf::from("m.lsc")],
            passes: Some(2),
            max_speed: true,
            ..Config::default()
        });
        assert_eq!(session.opt_options().max_passes, 2);
    }
}
