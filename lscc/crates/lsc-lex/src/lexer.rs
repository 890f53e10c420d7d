//! Main lexer implementation for LineScript source.
//!
//! The lexer walks the source with a [`Cursor`], dispatching on the first
//! character of every token. Multi-character operators lex greedily so that
//! `**=`, `++`, `<=`, `..` and friends win over their prefixes.

use lsc_util::{ErrorKind, FileId, Handler, Interner, Span};

use crate::cursor::Cursor;
use crate::token::{keyword_from_ident, Token, TokenKind};

/// Tokenize a whole source file.
///
/// Always returns a stream ending in `Eof`; lexical errors are reported to
/// the handler and the offending characters skipped so later phases can
/// still run over what was recognized.
pub fn tokenize(
    source: &str,
    file_id: FileId,
    handler: &Handler,
    interner: &mut Interner,
) -> Vec<Token> {
    let mut lexer = Lexer::new(source, file_id, handler, interner);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return tokens;
        }
    }
}

/// The LineScript lexer.
pub struct Lexer<'a> {
    /// Character cursor for traversing source
    cursor: Cursor<'a>,
    /// Diagnostic sink
    handler: &'a Handler,
    /// Session string interner
    interner: &'a mut Interner,
    /// File the source came from
    file_id: FileId,
    /// Start position of the current token
    token_start: usize,
    /// Start line of the current token
    token_start_line: u32,
    /// Start column of the current token
    token_start_column: u32,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer over `source`.
    pub fn new(
        source: &'a str,
        file_id: FileId,
        handler: &'a Handler,
        interner: &'a mut Interner,
    ) -> Self {
        Self {
            cursor: Cursor::new(source),
            handler,
            interner,
            file_id,
            token_start: 0,
            token_start_line: 1,
            token_start_column: 1,
        }
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        self.token_start = self.cursor.position();
        self.token_start_line = self.cursor.line();
        self.token_start_column = self.cursor.column();

        if self.cursor.is_at_end() {
            return self.make(TokenKind::Eof);
        }

        match self.cursor.current_char() {
            '\n' => {
                self.cursor.advance();
                self.make(TokenKind::Newline)
            }
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            ',' => self.single(TokenKind::Comma),
            ':' => self.single(TokenKind::Colon),

            '+' => self.lex_plus(),
            '-' => self.lex_minus(),
            '*' => self.lex_star(),
            '/' => self.lex_slash(),
            '%' => self.lex_one_or_eq(TokenKind::Percent, TokenKind::PercentEq),
            '^' => self.lex_one_or_eq(TokenKind::Caret, TokenKind::CaretEq),
            '=' => self.lex_one_or_eq(TokenKind::Assign, TokenKind::EqEq),
            '<' => self.lex_one_or_eq(TokenKind::Lt, TokenKind::LtEq),
            '>' => self.lex_one_or_eq(TokenKind::Gt, TokenKind::GtEq),
            '!' => self.lex_bang(),
            '&' => self.lex_pair('&', TokenKind::AndAnd),
            '|' => self.lex_pair('|', TokenKind::OrOr),
            '.' => self.lex_dot(),

            '"' => self.lex_string(),

            c if c == '_' || c.is_ascii_alphabetic() => self.lex_identifier(),
            c if c.is_ascii_digit() => self.lex_number(),

            c if !c.is_ascii() => {
                self.error(format!(
                    "non-ASCII character '{}' outside string literal",
                    c
                ));
                self.cursor.advance();
                self.next_token()
            }
            c => {
                self.error(format!("unrecognized punctuation '{}'", c));
                self.cursor.advance();
                self.next_token()
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            let c = self.cursor.current_char();
            if c == ' ' || c == '\t' || c == '\r' {
                self.cursor.advance();
            } else if c == '/' && self.cursor.peek_char(1) == '/' {
                while !self.cursor.is_at_end() && self.cursor.current_char() != '\n' {
                    self.cursor.advance();
                }
            } else {
                return;
            }
        }
    }

    fn span(&self) -> Span {
        Span::with_file(
            self.token_start,
            self.cursor.position(),
            self.file_id,
            self.token_start_line,
            self.token_start_column,
        )
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.span())
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        self.cursor.advance();
        self.make(kind)
    }

    fn error(&self, message: String) {
        let span = Span::with_file(
            self.token_start,
            self.cursor.position().max(self.token_start + 1),
            self.file_id,
            self.token_start_line,
            self.token_start_column,
        );
        self.handler.error(ErrorKind::Lexical, span, message);
    }

    /// `+` `+=` `++`
    fn lex_plus(&mut self) -> Token {
        self.cursor.advance();
        match self.cursor.current_char() {
            '=' => self.single(TokenKind::PlusEq),
            '+' => self.single(TokenKind::PlusPlus),
            _ => self.make(TokenKind::Plus),
        }
    }

    /// `-` `-=` `--` `->`
    fn lex_minus(&mut self) -> Token {
        self.cursor.advance();
        match self.cursor.current_char() {
            '=' => self.single(TokenKind::MinusEq),
            '-' => self.single(TokenKind::MinusMinus),
            '>' => self.single(TokenKind::Arrow),
            _ => self.make(TokenKind::Minus),
        }
    }

    /// `*` `*=` `**` `**=`
    fn lex_star(&mut self) -> Token {
        self.cursor.advance();
        match self.cursor.current_char() {
            '=' => self.single(TokenKind::StarEq),
            '*' => {
                self.cursor.advance();
                if self.cursor.current_char() == '=' {
                    self.single(TokenKind::StarStarEq)
                } else {
                    self.make(TokenKind::StarStar)
                }
            }
            _ => self.make(TokenKind::Star),
        }
    }

    /// `/` `/=` (comments were consumed by the whitespace skipper)
    fn lex_slash(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.current_char() == '=' {
            self.single(TokenKind::SlashEq)
        } else {
            self.make(TokenKind::Slash)
        }
    }

    fn lex_one_or_eq(&mut self, plain: TokenKind, with_eq: TokenKind) -> Token {
        self.cursor.advance();
        if self.cursor.current_char() == '=' {
            self.single(with_eq)
        } else {
            self.make(plain)
        }
    }

    /// `!=`; a lone `!` is not an operator (`not` is the keyword form).
    fn lex_bang(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.current_char() == '=' {
            self.single(TokenKind::NotEq)
        } else {
            self.error("unrecognized punctuation '!'".to_string());
            self.next_token()
        }
    }

    fn lex_pair(&mut self, second: char, kind: TokenKind) -> Token {
        self.cursor.advance();
        if self.cursor.current_char() == second {
            self.single(kind)
        } else {
            self.error(format!("unrecognized punctuation '{}'", second));
            self.next_token()
        }
    }

    /// `..` or a dotted name (`.format`, `.field`).
    fn lex_dot(&mut self) -> Token {
        self.cursor.advance();
        let c = self.cursor.current_char();
        if c == '.' {
            return self.single(TokenKind::DotDot);
        }
        if c == '_' || c.is_ascii_alphabetic() {
            let name_start = self.cursor.position();
            while is_ident_continue(self.cursor.current_char()) {
                self.cursor.advance();
            }
            let text = self.cursor.slice_from(name_start);
            let sym = self.interner.intern(text);
            return self.make(TokenKind::DotName(sym));
        }
        self.error("unrecognized punctuation '.'".to_string());
        self.next_token()
    }

    fn lex_identifier(&mut self) -> Token {
        while is_ident_continue(self.cursor.current_char()) {
            self.cursor.advance();
        }
        let text = self.cursor.slice_from(self.token_start);
        match keyword_from_ident(text) {
            Some(kind) => self.make(kind),
            None => {
                let sym = self.interner.intern(text);
                self.make(TokenKind::Ident(sym))
            }
        }
    }

    /// Decimal integers; floats require a decimal point or exponent.
    fn lex_number(&mut self) -> Token {
        while self.cursor.current_char().is_ascii_digit() {
            self.cursor.advance();
        }

        let mut is_float = false;
        if self.cursor.current_char() == '.' && self.cursor.peek_char(1).is_ascii_digit() {
            is_float = true;
            self.cursor.advance();
            while self.cursor.current_char().is_ascii_digit() {
                self.cursor.advance();
            }
        }
        if matches!(self.cursor.current_char(), 'e' | 'E') {
            let after_sign = match self.cursor.peek_char(1) {
                '+' | '-' => 2,
                _ => 1,
            };
            if self.cursor.peek_char(after_sign).is_ascii_digit() {
                is_float = true;
                for _ in 0..after_sign {
                    self.cursor.advance();
                }
                while self.cursor.current_char().is_ascii_digit() {
                    self.cursor.advance();
                }
            }
        }

        let text = self.cursor.slice_from(self.token_start);
        if is_float {
            match text.parse::<f64>() {
                Ok(value) => self.make(TokenKind::Float(value)),
                Err(_) => {
                    self.error(format!("malformed float literal `{}`", text));
                    self.make(TokenKind::Float(0.0))
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.make(TokenKind::Int(value)),
                Err(_) => {
                    self.error(format!("integer literal `{}` is out of range", text));
                    self.make(TokenKind::Int(0))
                }
            }
        }
    }

    /// Double-quoted string with C-style escapes.
    fn lex_string(&mut self) -> Token {
        self.cursor.advance(); // opening quote
        let mut value = String::new();
        loop {
            let c = self.cursor.current_char();
            match c {
                '"' => {
                    self.cursor.advance();
                    return self.make(TokenKind::Str(value));
                }
                '\n' | '\0' => {
                    self.error("unterminated string literal".to_string());
                    return self.make(TokenKind::Str(value));
                }
                '\\' => {
                    self.cursor.advance();
                    let esc = self.cursor.current_char();
                    self.cursor.advance();
                    match esc {
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        't' => value.push('\t'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        '0' => value.push('\0'),
                        other => {
                            self.error(format!("invalid escape sequence '\\{}'", other));
                        }
                    }
                }
                _ => {
                    value.push(c);
                    self.cursor.advance();
                }
            }
        }
    }
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> (Vec<TokenKind>, Handler, Interner) {
        let handler = Handler::new();
        let mut interner = Interner::new();
        let tokens = tokenize(source, FileId(0), &handler, &mut interner);
        let kinds = tokens.into_iter().map(|t| t.kind).collect();
        (kinds, handler, interner)
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (kinds, handler, _) = lex(source);
        assert!(!handler.has_errors(), "unexpected lex errors");
        kinds
    }

    #[test]
    fn test_keywords_and_idents() {
        let (tokens, _, interner) = lex("declare total");
        assert_eq!(tokens[0], TokenKind::Declare);
        match &tokens[1] {
            TokenKind::Ident(sym) => assert_eq!(interner.resolve(*sym), "total"),
            other => panic!("expected identifier, got {:?}", other),
        }
        assert_eq!(tokens[2], TokenKind::Eof);
    }

    #[test]
    fn test_greedy_operators() {
        assert_eq!(
            kinds("** **= ++ -- += -= *= /= %= ^= == != <= >= && || .."),
            vec![
                TokenKind::StarStar,
                TokenKind::StarStarEq,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::SlashEq,
                TokenKind::PercentEq,
                TokenKind::CaretEq,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::DotDot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_int_and_float_literals() {
        assert_eq!(
            kinds("42 3.25 1e3 2.5e-1"),
            vec![
                TokenKind::Int(42),
                TokenKind::Float(3.25),
                TokenKind::Float(1000.0),
                TokenKind::Float(0.25),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_range_is_not_a_float() {
        assert_eq!(
            kinds("0..10"),
            vec![
                TokenKind::Int(0),
                TokenKind::DotDot,
                TokenKind::Int(10),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_overflow_reports() {
        let (tokens, handler, _) = lex("99999999999999999999");
        assert!(handler.has_errors());
        assert_eq!(tokens[0], TokenKind::Int(0));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\n\"q\"""#),
            vec![TokenKind::Str("a\tb\n\"q\"".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let (_, handler, _) = lex("\"oops\n");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_invalid_escape() {
        let (_, handler, _) = lex(r#""\q""#);
        assert!(handler.has_errors());
    }

    #[test]
    fn test_dotted_names() {
        let (tokens, handler, interner) = lex(".stateSpeed()");
        assert!(!handler.has_errors());
        match &tokens[0] {
            TokenKind::DotName(sym) => assert_eq!(interner.resolve(*sym), "stateSpeed"),
            other => panic!("expected dotted name, got {:?}", other),
        }
        assert_eq!(tokens[1], TokenKind::LParen);
        assert_eq!(tokens[2], TokenKind::RParen);
    }

    #[test]
    fn test_newlines_are_tokens() {
        assert_eq!(
            kinds("1\n2"),
            vec![
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("1 // the rest is ignored ++ --\n2"),
            vec![
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_non_ascii_outside_string_rejected() {
        let (_, handler, _) = lex("declare π = 3");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_non_ascii_inside_string_allowed() {
        let (tokens, handler, _) = lex("\"π\"");
        assert!(!handler.has_errors());
        assert_eq!(tokens[0], TokenKind::Str("π".to_string()));
    }

    #[test]
    fn test_spans_track_lines() {
        let handler = Handler::new();
        let mut interner = Interner::new();
        let tokens = tokenize("a\nbb", FileId(0), &handler, &mut interner);
        assert_eq!(tokens[2].span.line, 2);
        assert_eq!(tokens[2].span.column, 1);
        assert_eq!(tokens[2].span.len(), 2);
    }
}
