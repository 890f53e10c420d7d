//! Diagnostic infrastructure - error and warning reporting.
//!
//! Every phase reports problems into a shared [`Handler`]. A diagnostic
//! carries a kind with a stable tag, a primary span, and optionally a
//! secondary span with its own label ("previous declaration here").
//! Rendered form is always `<KindTag>: <file>:<line>:<col>: <message>`;
//! the warning channel uses the `warning:` tag and never affects exit
//! status.

use std::cell::RefCell;
use std::fmt;

use crate::span::{SourceMap, Span};

/// Error taxonomy.
///
/// Each kind renders as a stable tag and maps to the process exit code of
/// the phase it belongs to: CLI misuse is 2, I/O and toolchain-invocation
/// failures are 1, front-end (lex/parse/semantic) failures are 3, backend
/// failures are 4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Cli,
    Io,
    Lexical,
    Syntax,
    Name,
    Type,
    ThrowsContract,
    ParallelLoopConstraint,
    ConstDivByZero,
    OwnedHandleEscape,
    Backend,
    Toolchain,
}

impl ErrorKind {
    /// The stable tag used as the first token of every rendered error.
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorKind::Cli => "CliError",
            ErrorKind::Io => "IoError",
            ErrorKind::Lexical => "LexicalError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::ThrowsContract => "ThrowsContractError",
            ErrorKind::ParallelLoopConstraint => "ParallelLoopConstraintError",
            ErrorKind::ConstDivByZero => "ConstDivByZeroError",
            ErrorKind::OwnedHandleEscape => "OwnedHandleEscapeError",
            ErrorKind::Backend => "BackendError",
            ErrorKind::Toolchain => "ToolchainError",
        }
    }

    /// Process exit code for a compilation that failed with this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Cli => 2,
            ErrorKind::Io | ErrorKind::Toolchain => 1,
            ErrorKind::Lexical
            | ErrorKind::Syntax
            | ErrorKind::Name
            | ErrorKind::Type
            | ErrorKind::ThrowsContract
            | ErrorKind::ParallelLoopConstraint
            | ErrorKind::ConstDivByZero
            | ErrorKind::OwnedHandleEscape => 3,
            ErrorKind::Backend => 4,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Diagnostic severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// An error that fails the compilation
    Error,
    /// A warning; never changes exit status
    Warning,
    /// Additional context attached to another diagnostic
    Note,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
        }
    }
}

/// A single diagnostic message.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity level
    pub level: Level,
    /// Error kind; `None` for warnings and notes
    pub kind: Option<ErrorKind>,
    /// One-line message
    pub message: String,
    /// Primary source location
    pub span: Span,
    /// Optional secondary location with its own label
    pub secondary: Option<(Span, String)>,
}

impl Diagnostic {
    /// Create an error diagnostic of the given kind.
    pub fn error(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            kind: Some(kind),
            message: message.into(),
            span,
            secondary: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            kind: None,
            message: message.into(),
            span,
            secondary: None,
        }
    }

    /// Attach a secondary span with a label.
    pub fn with_secondary(mut self, span: Span, label: impl Into<String>) -> Self {
        self.secondary = Some((span, label.into()));
        self
    }

    /// Render to the stable user-visible form.
    pub fn render(&self, sources: &SourceMap) -> String {
        let mut out = String::new();
        let tag = match (self.level, self.kind) {
            (Level::Error, Some(kind)) => kind.tag().to_string(),
            (level, _) => level.to_string(),
        };
        out.push_str(&tag);
        out.push_str(": ");
        out.push_str(&render_location(self.span, sources));
        out.push_str(&self.message);
        if let Some((span, label)) = &self.secondary {
            out.push_str("\n  note: ");
            out.push_str(&render_location(*span, sources));
            out.push_str(label);
        }
        out
    }
}

fn render_location(span: Span, sources: &SourceMap) -> String {
    if span == Span::DUMMY {
        return String::new();
    }
    format!(
        "{}:{}:{}: ",
        sources.name_of(span.file_id),
        span.line,
        span.column
    )
}

/// Collector for diagnostics.
///
/// Uses interior mutability so that phases holding `&Handler` can report
/// without threading `&mut` everywhere.
///
/// # Examples
///
/// ```
/// use lsc_util::diagnostic::{ErrorKind, Handler};
/// use lsc_util::span::Span;
///
/// let handler = Handler::new();
/// handler.error(ErrorKind::Type, Span::DUMMY, "type mismatch");
/// assert!(handler.has_errors());
/// assert_eq!(handler.error_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Handler {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl Handler {
    /// Create a new handler.
    pub fn new() -> Self {
        Self {
            diagnostics: RefCell::new(Vec::new()),
        }
    }

    /// Report an error of the given kind.
    pub fn error(&self, kind: ErrorKind, span: Span, message: impl Into<String>) {
        self.emit(Diagnostic::error(kind, span, message));
    }

    /// Report a warning.
    pub fn warning(&self, span: Span, message: impl Into<String>) {
        self.emit(Diagnostic::warning(span, message));
    }

    /// Emit a pre-built diagnostic.
    pub fn emit(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    /// True when at least one error has been reported.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .borrow()
            .iter()
            .any(|d| d.level == Level::Error)
    }

    /// Number of reported errors.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level == Level::Error)
            .count()
    }

    /// Number of reported warnings.
    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level == Level::Warning)
            .count()
    }

    /// Exit code implied by the first reported error, 0 when clean.
    pub fn exit_code(&self) -> i32 {
        self.diagnostics
            .borrow()
            .iter()
            .find(|d| d.level == Level::Error)
            .and_then(|d| d.kind)
            .map(|k| k.exit_code())
            .unwrap_or(0)
    }

    /// Snapshot of all diagnostics in report order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    /// Drop all collected diagnostics.
    pub fn clear(&self) {
        self.diagnostics.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceMap;

    #[test]
    fn test_level_display() {
        assert_eq!(format!("{}", Level::Error), "error");
        assert_eq!(format!("{}", Level::Warning), "warning");
        assert_eq!(format!("{}", Level::Note), "note");
    }

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(ErrorKind::ConstDivByZero.tag(), "ConstDivByZeroError");
        assert_eq!(
            ErrorKind::ParallelLoopConstraint.tag(),
            "ParallelLoopConstraintError"
        );
        assert_eq!(ErrorKind::OwnedHandleEscape.tag(), "OwnedHandleEscapeError");
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(ErrorKind::Cli.exit_code(), 2);
        assert_eq!(ErrorKind::Io.exit_code(), 1);
        assert_eq!(ErrorKind::Toolchain.exit_code(), 1);
        assert_eq!(ErrorKind::Syntax.exit_code(), 3);
        assert_eq!(ErrorKind::Type.exit_code(), 3);
        assert_eq!(ErrorKind::Backend.exit_code(), 4);
    }

    #[test]
    fn test_handler_counts() {
        let handler = Handler::new();
        assert!(!handler.has_errors());
        handler.error(ErrorKind::Type, Span::DUMMY, "bad");
        handler.warning(Span::DUMMY, "meh");
        assert!(handler.has_errors());
        assert_eq!(handler.error_count(), 1);
        assert_eq!(handler.warning_count(), 1);
    }

    #[test]
    fn test_handler_exit_code_uses_first_error() {
        let handler = Handler::new();
        handler.error(ErrorKind::Syntax, Span::DUMMY, "first");
        handler.error(ErrorKind::Backend, Span::DUMMY, "second");
        assert_eq!(handler.exit_code(), 3);
    }

    #[test]
    fn test_render_includes_tag_and_location() {
        let mut sources = SourceMap::new();
        let id = sources.add_file("main.lsc", "declare x = 1\n".to_string());
        let span = Span::with_file(0, 7, id, 1, 1);
        let diag = Diagnostic::error(ErrorKind::Name, span, "undefined variable `x`");
        let rendered = diag.render(&sources);
        assert_eq!(rendered, "NameError: main.lsc:1:1: undefined variable `x`");
    }

    #[test]
    fn test_render_secondary() {
        let mut sources = SourceMap::new();
        let id = sources.add_file("main.lsc", "x\nx\n".to_string());
        let first = Span::with_file(0, 1, id, 1, 1);
        let second = Span::with_file(2, 3, id, 2, 1);
        let diag = Diagnostic::error(ErrorKind::Name, second, "duplicate definition of `x`")
            .with_secondary(first, "previous declaration here");
        let rendered = diag.render(&sources);
        assert!(rendered.contains("NameError: main.lsc:2:1: duplicate definition of `x`"));
        assert!(rendered.contains("note: main.lsc:1:1: previous declaration here"));
    }

    #[test]
    fn test_warning_does_not_set_exit_code() {
        let handler = Handler::new();
        handler.warning(Span::DUMMY, "unused");
        assert_eq!(handler.exit_code(), 0);
        assert!(!handler.has_errors());
    }

    #[test]
    fn test_clear() {
        let handler = Handler::new();
        handler.error(ErrorKind::Io, Span::DUMMY, "gone");
        handler.clear();
        assert!(!handler.has_errors());
    }
}
