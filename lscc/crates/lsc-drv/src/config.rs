//! Command-line configuration.
//!
//! The compiler parses its own arguments (no derive layer) because the
//! surface includes grouped flag syntax (`-O [ -p max -X [ --beta ] ]`)
//! and script-declared flags that are only known after parsing source.
//! Unknown flags are collected as user tokens; whether they warrant a
//! warning is decided once the source's `flag` declarations are known.

use std::path::PathBuf;

/// What the driver should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Front end and optimizer only, no backend emission
    Check,
    /// Full pipeline to a native binary
    Build,
    /// Build, then execute the binary and forward its exit code
    Run,
}

/// Backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendChoice {
    /// Try the ASM backend, fall back to C on unsupported constructs
    Auto,
    C,
    Asm,
}

/// Parsed driver configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub mode: Mode,
    /// Toolchain driver; `None` probes `clang` then `gcc`
    pub cc: Option<String>,
    pub backend: BackendChoice,
    /// Optimizer pass cap; `None` uses the default (raised by `-O4`)
    pub passes: Option<usize>,
    pub max_speed: bool,
    pub pgo_generate: bool,
    pub pgo_use: Option<PathBuf>,
    pub bolt_use: Option<PathBuf>,
    pub keep_c: bool,
    /// Tokens passed through to the script (grouped plus unclaimed flags)
    pub user_tokens: Vec<String>,
    /// The subset of `user_tokens` that came from `[ … ]` groups; these
    /// are never warned about
    pub grouped_tokens: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: None,
            mode: Mode::Build,
            cc: None,
            backend: BackendChoice::Auto,
            passes: None,
            max_speed: false,
            pgo_generate: false,
            pgo_use: None,
            bolt_use: None,
            keep_c: false,
            user_tokens: Vec::new(),
            grouped_tokens: Vec::new(),
        }
    }
}

/// Characters allowed in a `--cc` value. Anything else (shell
/// metacharacters in particular) is rejected before any subprocess is
/// created.
pub fn valid_cc(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '+' | '-'))
}

fn is_source_path(token: &str) -> bool {
    token.ends_with(".lsc") || token.ends_with(".ls")
}

/// Parse command-line arguments (without the program name).
pub fn parse_args(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--check" => config.mode = Mode::Check,
            "--build" => config.mode = Mode::Build,
            "--run" => config.mode = Mode::Run,
            "--keep-c" => config.keep_c = true,
            "--pgo-generate" => config.pgo_generate = true,
            "-O4" | "--max-speed" => config.max_speed = true,
            "--cc" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--cc needs a value".to_string())?;
                if !valid_cc(value) {
                    return Err(format!(
                        "invalid --cc value `{}`: only [A-Za-z0-9_./+-] is allowed",
                        value
                    ));
                }
                config.cc = Some(value.clone());
            }
            "--backend" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--backend needs a value".to_string())?;
                config.backend = match value.as_str() {
                    "auto" => BackendChoice::Auto,
                    "c" => BackendChoice::C,
                    "asm" => BackendChoice::Asm,
                    other => {
                        return Err(format!(
                            "invalid --backend `{}`: expected auto, c, or asm",
                            other
                        ))
                    }
                };
            }
            "--passes" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--passes needs a value".to_string())?;
                let n: usize = value
                    .parse()
                    .map_err(|_| format!("invalid --passes value `{}`", value))?;
                config.passes = Some(n);
            }
            "--pgo-use" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--pgo-use needs a directory".to_string())?;
                config.pgo_use = Some(PathBuf::from(value));
            }
            "--bolt-use" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--bolt-use needs a profile file".to_string())?;
                config.bolt_use = Some(PathBuf::from(value));
            }
            "-o" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "-o needs a path".to_string())?;
                config.output = Some(PathBuf::from(value));
            }
            "[" => {
                // Grouped tokens: everything until the matching bracket
                // goes to the script, nested groups included.
                let mut depth = 1usize;
                for token in iter.by_ref() {
                    match token.as_str() {
                        "[" => depth += 1,
                        "]" => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {
                            config.user_tokens.push(token.clone());
                            config.grouped_tokens.push(token.clone());
                        }
                    }
                }
                if depth != 0 {
                    return Err("unbalanced `[` in grouped flags".to_string());
                }
            }
            "]" => return Err("unbalanced `]` in grouped flags".to_string()),
            token if token.starts_with('-') => {
                // Unknown flag: forwarded to the script; warned about
                // later unless a `flag` declaration claims it.
                config.user_tokens.push(token.to_string());
            }
            token if is_source_path(token) => {
                config.inputs.push(PathBuf::from(token));
            }
            token => {
                return Err(format!(
                    "input `{}` must end in .lsc or .ls",
                    token
                ));
            }
        }
    }

    if config.inputs.is_empty() {
        return Err("no input files".to_string());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tokens: &[&str]) -> Result<Config, String> {
        let owned: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
        parse_args(&owned)
    }

    #[test]
    fn test_basic_build() {
        let config = parse(&["main.lsc", "--build", "-o", "out"]).unwrap();
        assert_eq!(config.mode, Mode::Build);
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.output, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_multiple_inputs_keep_order() {
        let config = parse(&["a.lsc", "b.ls", "c.lsc"]).unwrap();
        let names: Vec<_> = config
            .inputs
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        assert_eq!(names, vec!["a.lsc", "b.ls", "c.lsc"]);
    }

    #[test]
    fn test_bad_extension_rejected() {
        assert!(parse(&["main.txt"]).is_err());
        assert!(parse(&["main.lsc.bak"]).is_err());
    }

    #[test]
    fn test_no_inputs_rejected() {
        assert!(parse(&["--check"]).is_err());
    }

    #[test]
    fn test_cc_validation() {
        assert!(parse(&["m.lsc", "--cc", "clang"]).is_ok());
        assert!(parse(&["m.lsc", "--cc", "/usr/bin/gcc-13"]).is_ok());
        for evil in [
            "cc;rm", "cc&", "cc|cat", "cc`id`", "cc$PATH", "cc(", "cc)", "cc<x", "cc>x",
            "cc\nx", "cc x",
        ] {
            assert!(parse(&["m.lsc", "--cc", evil]).is_err(), "accepted {evil:?}");
        }
    }

    #[test]
    fn test_backend_choices() {
        assert_eq!(
            parse(&["m.lsc", "--backend", "asm"]).unwrap().backend,
            BackendChoice::Asm
        );
        assert!(parse(&["m.lsc", "--backend", "llvm"]).is_err());
    }

    #[test]
    fn test_passes_and_max_speed() {
        let config = parse(&["m.lsc", "--passes", "7", "-O4"]).unwrap();
        assert_eq!(config.passes, Some(7));
        assert!(config.max_speed);
    }

    #[test]
    fn test_grouped_flags() {
        let config = parse(&["m.lsc", "-O", "[", "-p", "max", "-X", "[", "--beta", "]", "]"])
            .unwrap();
        assert_eq!(
            config.grouped_tokens,
            vec!["-p", "max", "-X", "--beta"]
        );
        // `-O` itself is an unclaimed user flag.
        assert!(config.user_tokens.contains(&"-O".to_string()));
    }

    #[test]
    fn test_unbalanced_brackets_fatal() {
        assert!(parse(&["m.lsc", "-O", "[", "-p"]).is_err());
        assert!(parse(&["m.lsc", "]", "-p"]).is_err());
    }

    #[test]
    fn test_unknown_flags_are_collected_not_fatal() {
        let config = parse(&["m.lsc", "--verbose-script"]).unwrap();
        assert_eq!(config.user_tokens, vec!["--verbose-script"]);
        assert!(config.grouped_tokens.is_empty());
    }

    #[test]
    fn test_pgo_and_bolt() {
        let config = parse(&[
            "m.lsc",
            "--pgo-generate",
            "--pgo-use",
            "profdir",
            "--bolt-use",
            "perf.fdata",
        ])
        .unwrap();
        assert!(config.pgo_generate);
        assert_eq!(config.pgo_use, Some(PathBuf::from("profdir")));
        assert_eq!(config.bolt_use, Some(PathBuf::from("perf.fdata")));
    }
}
