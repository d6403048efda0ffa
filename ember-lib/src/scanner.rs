//! Turns source text into tokens, one token at a time, on demand of the compiler.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TokenKind {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    // One or two character tokens.
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    // Literals.
    Identifier,
    String,
    Number,
    // Keywords.
    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,

    /// the lexeme of an error token is the error message
    Error,
    Eof,
}

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    use TokenKind::*;
    HashMap::from([
        ("and", And),
        ("class", Class),
        ("else", Else),
        ("false", False),
        ("for", For),
        ("fun", Fun),
        ("if", If),
        ("nil", Nil),
        ("or", Or),
        ("print", Print),
        ("return", Return),
        ("super", Super),
        ("this", This),
        ("true", True),
        ("var", Var),
        ("while", While),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    /// the text of the token. For error tokens this is the message instead
    pub lexeme: &'src str,
    /// byte offset into the source
    pub start: usize,
    pub line: usize,
}

impl<'src> Token<'src> {
    /// a token that does not come from the source, used to name implicit slots
    pub fn synthetic(lexeme: &'src str) -> Self {
        Token {
            kind: TokenKind::Identifier,
            lexeme,
            start: 0,
            line: 0,
        }
    }
}

pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: usize,
    /// set once Eof was returned by the iterator
    finished: bool,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Scanner {
            source,
            start: 0,
            current: 0,
            line: 1,
            finished: false,
        }
    }

    /// Scans the next token. Once the source is exhausted, this keeps returning Eof.
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        let Some(c) = self.advance() else {
            return self.make_token(TokenKind::Eof);
        };

        if is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        use TokenKind::*;
        match c {
            b'(' => self.make_token(LeftParen),
            b')' => self.make_token(RightParen),
            b'{' => self.make_token(LeftBrace),
            b'}' => self.make_token(RightBrace),
            b'[' => self.make_token(LeftBracket),
            b']' => self.make_token(RightBracket),
            b';' => self.make_token(Semicolon),
            b',' => self.make_token(Comma),
            b'.' => self.make_token(Dot),
            b'-' => self.make_token(Minus),
            b'+' => self.make_token(Plus),
            b'/' => self.make_token(Slash),
            b'*' => self.make_token(Star),
            b'!' => self.make_two_char_token(BangEqual, Bang),
            b'=' => self.make_two_char_token(EqualEqual, Equal),
            b'<' => self.make_two_char_token(LessEqual, Less),
            b'>' => self.make_two_char_token(GreaterEqual, Greater),
            b'"' => self.string(),
            _ => {
                // don't split a multi byte character
                while !self.source.is_char_boundary(self.current) {
                    self.current += 1;
                }
                self.error_token("Unexpected character.")
            }
        }
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.current += 1;
        Some(c)
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.current).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.as_bytes().get(self.current + 1).copied()
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token {
            kind,
            lexeme: &self.source[self.start..self.current],
            start: self.start,
            line: self.line,
        }
    }

    fn make_two_char_token(&mut self, two: TokenKind, one: TokenKind) -> Token<'src> {
        let kind = if self.match_byte(b'=') { two } else { one };
        self.make_token(kind)
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token {
            kind: TokenKind::Error,
            lexeme: message,
            start: self.start,
            line: self.line,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\r' | b'\t' => {
                    self.current += 1;
                }
                b'\n' => {
                    self.line += 1;
                    self.current += 1;
                }
                b'/' if self.peek_next() == Some(b'/') => {
                    while self.peek().map_or(false, |c| c != b'\n') {
                        self.current += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self) -> Token<'src> {
        loop {
            match self.peek() {
                None | Some(b'\n') => return self.error_token("Unterminated string."),
                Some(b'"') => break,
                Some(_) => self.current += 1,
            }
        }
        // the closing quote
        self.current += 1;
        self.make_token(TokenKind::String)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.current += 1;
        }
        if self.peek() == Some(b'.') && self.peek_next().map_or(false, |c| c.is_ascii_digit()) {
            self.current += 1;
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.current += 1;
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while self.peek().map_or(false, |c| is_alpha(c) || c.is_ascii_digit()) {
            self.current += 1;
        }
        let text = &self.source[self.start..self.current];
        let kind = KEYWORDS
            .get(text)
            .copied()
            .unwrap_or(TokenKind::Identifier);
        self.make_token(kind)
    }
}

/// Yields every token up to and including Eof
impl<'src> Iterator for Scanner<'src> {
    type Item = Token<'src>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let token = self.scan_token();
        if token.kind == TokenKind::Eof {
            self.finished = true;
        }
        Some(token)
    }
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source).map(|t| t.kind).collect()
    }

    #[test]
    fn operators_use_maximal_munch() {
        assert_eq!(
            kinds("!= ! == = <= < >= > [ ]"),
            vec![
                BangEqual,
                Bang,
                EqualEqual,
                Equal,
                LessEqual,
                Less,
                GreaterEqual,
                Greater,
                LeftBracket,
                RightBracket,
                Eof
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("var variable fun _f2 or orchid"),
            vec![Var, Identifier, Fun, Identifier, Or, Identifier, Eof]
        );
    }

    #[test]
    fn numbers_with_optional_fraction() {
        let tokens: Vec<_> = Scanner::new("12 3.5 7.").collect();
        assert_eq!(tokens[0].lexeme, "12");
        assert_eq!(tokens[1].lexeme, "3.5");
        assert_eq!(tokens[2].lexeme, "7");
        assert_eq!(tokens[3].kind, Dot);
    }

    #[test]
    fn comments_and_lines() {
        let tokens: Vec<_> = Scanner::new("a // comment\n\nb").collect();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 3);
        assert_eq!(tokens[1].start, 14);
        assert_eq!(tokens[1].lexeme.len(), 1);
    }

    #[test]
    fn strings_include_their_quotes() {
        let tokens: Vec<_> = Scanner::new("\"héllo\"").collect();
        assert_eq!(tokens[0].kind, String);
        assert_eq!(tokens[0].lexeme, "\"héllo\"");
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let tokens: Vec<_> = Scanner::new("\"abc").collect();
        assert_eq!(tokens[0].kind, Error);
        assert_eq!(tokens[0].lexeme, "Unterminated string.");
        assert_eq!(tokens[1].kind, Eof);

        let tokens: Vec<_> = Scanner::new("\"abc\nx\"").collect();
        assert_eq!(tokens[0].kind, Error);
    }

    #[test]
    fn unexpected_characters_do_not_stop_the_scan() {
        let tokens: Vec<_> = Scanner::new("a @ é b").collect();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![Identifier, Error, Error, Identifier, Eof]);
        assert_eq!(tokens[1].lexeme, "Unexpected character.");
    }

    #[test]
    fn eof_repeats() {
        let mut scanner = Scanner::new("x");
        scanner.scan_token();
        assert_eq!(scanner.scan_token().kind, Eof);
        assert_eq!(scanner.scan_token().kind, Eof);
    }
}
