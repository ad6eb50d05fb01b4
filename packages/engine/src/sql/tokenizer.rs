//! Best-effort SQL lexer.
//!
//! The lexer is total: every input produces a token stream. Characters that
//! start no token are skipped by [`tokenize`]; the parser lexes them as
//! [`TokenKind::Unknown`] so a statement containing one is rejected instead of
//! being re-printed without it. Unterminated literals run to the end of input.
//! Spans are byte offsets into the source, strictly increasing and
//! non-overlapping.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Identifier(String),
    QuotedIdentifier(String),
    String(String),
    /// Raw numeric text, including a leading `-` for signed literals.
    Number(String),
    /// Hex digits of an `X'..'` literal.
    Blob(String),
    Placeholder(Placeholder),
    Punct(Punct),
    /// A character that starts no token. Never produced by [`tokenize`].
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// `?` or `?NNN`.
    Positional(Option<u32>),
    /// `:name`
    Colon(String),
    /// `@name`
    At(String),
    /// `$name` or `$N`
    Dollar(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Star,
    Plus,
    Minus,
    Slash,
    Percent,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Arrow,
    LongArrow,
    Ampersand,
    Pipe,
    ShiftLeft,
    ShiftRight,
    Tilde,
}

macro_rules! keywords {
    ($($variant:ident => $text:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($variant),*
        }

        impl Keyword {
            pub fn lookup(word: &str) -> Option<Self> {
                let upper = word.to_ascii_uppercase();
                match upper.as_str() {
                    $($text => Some(Self::$variant),)*
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),*
                }
            }
        }
    };
}

keywords! {
    Abort => "ABORT",
    All => "ALL",
    And => "AND",
    As => "AS",
    Asc => "ASC",
    Between => "BETWEEN",
    By => "BY",
    Case => "CASE",
    Cast => "CAST",
    Collate => "COLLATE",
    Conflict => "CONFLICT",
    Cross => "CROSS",
    Default => "DEFAULT",
    Delete => "DELETE",
    Desc => "DESC",
    Distinct => "DISTINCT",
    Do => "DO",
    Else => "ELSE",
    End => "END",
    Escape => "ESCAPE",
    Except => "EXCEPT",
    Exists => "EXISTS",
    Fail => "FAIL",
    False => "FALSE",
    Fetch => "FETCH",
    First => "FIRST",
    From => "FROM",
    Full => "FULL",
    Glob => "GLOB",
    Group => "GROUP",
    Having => "HAVING",
    Ignore => "IGNORE",
    In => "IN",
    Inner => "INNER",
    Insert => "INSERT",
    Intersect => "INTERSECT",
    Into => "INTO",
    Is => "IS",
    Isnull => "ISNULL",
    Join => "JOIN",
    Last => "LAST",
    Left => "LEFT",
    Like => "LIKE",
    Limit => "LIMIT",
    Natural => "NATURAL",
    Not => "NOT",
    Nothing => "NOTHING",
    Notnull => "NOTNULL",
    Null => "NULL",
    Nulls => "NULLS",
    Offset => "OFFSET",
    On => "ON",
    Or => "OR",
    Order => "ORDER",
    Outer => "OUTER",
    Over => "OVER",
    Partition => "PARTITION",
    Recursive => "RECURSIVE",
    Replace => "REPLACE",
    Returning => "RETURNING",
    Right => "RIGHT",
    Rollback => "ROLLBACK",
    Select => "SELECT",
    Set => "SET",
    Then => "THEN",
    True => "TRUE",
    Union => "UNION",
    Update => "UPDATE",
    Using => "USING",
    Values => "VALUES",
    When => "WHEN",
    Where => "WHERE",
    Window => "WINDOW",
    With => "WITH",
}

impl Keyword {
    /// Keywords that may also name tables, columns, aliases or functions.
    pub fn is_non_reserved(self) -> bool {
        matches!(
            self,
            Keyword::Abort
                | Keyword::Asc
                | Keyword::Conflict
                | Keyword::Desc
                | Keyword::Do
                | Keyword::Fail
                | Keyword::First
                | Keyword::Glob
                | Keyword::Ignore
                | Keyword::Last
                | Keyword::Like
                | Keyword::Nothing
                | Keyword::Nulls
                | Keyword::Over
                | Keyword::Partition
                | Keyword::Recursive
                | Keyword::Replace
                | Keyword::Rollback
        )
    }
}

pub fn tokenize(source: &str) -> Vec<Token> {
    tokenize_lossless(source)
        .into_iter()
        .filter(|token| !matches!(token.kind, TokenKind::Unknown(_)))
        .collect()
}

/// Like [`tokenize`], but keeps unrecognized characters as
/// [`TokenKind::Unknown`].
pub(crate) fn tokenize_lossless(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut tokens: Vec<Token> = Vec::new();
    while let Some(token) = lexer.next_token(tokens.last()) {
        tokens.push(token);
    }
    tokens
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn next_token(&mut self, previous: Option<&Token>) -> Option<Token> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.bytes.len() {
            return None;
        }
        let start = self.pos;
        let kind = self.lex_at(start, previous);
        Some(Token {
            kind,
            span: Span::new(start, self.pos),
        })
    }

    fn unknown(&mut self, start: usize) -> TokenKind {
        self.advance_char();
        TokenKind::Unknown(self.source[start..self.pos].to_string())
    }

    fn lex_at(&mut self, start: usize, previous: Option<&Token>) -> TokenKind {
        let ch = self.bytes[start];
        match ch {
            b'\'' => TokenKind::String(self.lex_quoted(b'\'')),
            b'"' => TokenKind::QuotedIdentifier(self.lex_quoted(b'"')),
            b'`' => TokenKind::QuotedIdentifier(self.lex_quoted(b'`')),
            b'[' => TokenKind::QuotedIdentifier(self.lex_bracketed()),
            b'x' | b'X' if self.peek_at(1) == Some(b'\'') => {
                self.pos += 1;
                TokenKind::Blob(self.lex_quoted(b'\''))
            }
            b'0'..=b'9' => TokenKind::Number(self.lex_number()),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                TokenKind::Number(self.lex_number())
            }
            b'-' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit() || c == b'.')
                && !ends_operand(previous) =>
            {
                self.pos += 1;
                let digits = self.lex_number();
                TokenKind::Number(format!("-{digits}"))
            }
            c if is_identifier_start(c) => {
                let word = self.lex_word();
                match Keyword::lookup(&word) {
                    Some(keyword) => TokenKind::Keyword(keyword),
                    None => TokenKind::Identifier(word),
                }
            }
            b'?' => {
                self.pos += 1;
                let digits = self.take_while(|c| c.is_ascii_digit());
                TokenKind::Placeholder(Placeholder::Positional(digits.parse::<u32>().ok()))
            }
            b':' | b'@' | b'$' => {
                let name_start = self.pos + 1;
                let valid = self
                    .bytes
                    .get(name_start)
                    .is_some_and(|c| is_identifier_part(*c));
                if !valid {
                    return self.unknown(start);
                }
                self.pos = name_start;
                let name = self.take_while(is_identifier_part);
                TokenKind::Placeholder(match ch {
                    b':' => Placeholder::Colon(name),
                    b'@' => Placeholder::At(name),
                    _ => Placeholder::Dollar(name),
                })
            }
            _ => match self.lex_punct() {
                Some(punct) => TokenKind::Punct(punct),
                None => self.unknown(start),
            },
        }
    }

    fn lex_punct(&mut self) -> Option<Punct> {
        let ch = self.bytes[self.pos];
        let next = self.peek_at(1);
        let (punct, width) = match (ch, next) {
            (b'(', _) => (Punct::LParen, 1),
            (b')', _) => (Punct::RParen, 1),
            (b',', _) => (Punct::Comma, 1),
            (b'.', _) => (Punct::Dot, 1),
            (b';', _) => (Punct::Semicolon, 1),
            (b'*', _) => (Punct::Star, 1),
            (b'+', _) => (Punct::Plus, 1),
            (b'-', Some(b'>')) => {
                if self.peek_at(2) == Some(b'>') {
                    (Punct::LongArrow, 3)
                } else {
                    (Punct::Arrow, 2)
                }
            }
            (b'-', _) => (Punct::Minus, 1),
            (b'/', _) => (Punct::Slash, 1),
            (b'%', _) => (Punct::Percent, 1),
            (b'|', Some(b'|')) => (Punct::Concat, 2),
            (b'|', _) => (Punct::Pipe, 1),
            (b'=', Some(b'=')) => (Punct::Eq, 2),
            (b'=', _) => (Punct::Eq, 1),
            (b'!', Some(b'=')) => (Punct::NotEq, 2),
            (b'<', Some(b'>')) => (Punct::NotEq, 2),
            (b'<', Some(b'=')) => (Punct::LtEq, 2),
            (b'<', Some(b'<')) => (Punct::ShiftLeft, 2),
            (b'<', _) => (Punct::Lt, 1),
            (b'>', Some(b'=')) => (Punct::GtEq, 2),
            (b'>', Some(b'>')) => (Punct::ShiftRight, 2),
            (b'>', _) => (Punct::Gt, 1),
            (b'&', _) => (Punct::Ampersand, 1),
            (b'~', _) => (Punct::Tilde, 1),
            _ => return None,
        };
        self.pos += width;
        Some(punct)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.starts_with(b"--") {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            if self.starts_with(b"/*") {
                self.pos += 2;
                while self.pos < self.bytes.len() && !self.starts_with(b"*/") {
                    self.pos += 1;
                }
                self.pos = (self.pos + 2).min(self.bytes.len());
                continue;
            }
            break;
        }
    }

    /// Quoted text with doubled-quote escapes. The opening quote is at `pos`.
    fn lex_quoted(&mut self, quote: u8) -> String {
        self.pos += 1;
        let mut value = String::new();
        let mut segment_start = self.pos;
        while self.pos < self.bytes.len() {
            if self.bytes[self.pos] == quote {
                value.push_str(&self.source[segment_start..self.pos]);
                if self.peek_at(1) == Some(quote) {
                    value.push(quote as char);
                    self.pos += 2;
                    segment_start = self.pos;
                    continue;
                }
                self.pos += 1;
                return value;
            }
            self.pos += 1;
        }
        value.push_str(&self.source[segment_start..]);
        value
    }

    fn lex_bracketed(&mut self) -> String {
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b']' {
            self.pos += 1;
        }
        let value = self.source[start..self.pos].to_string();
        self.pos = (self.pos + 1).min(self.bytes.len());
        value
    }

    fn lex_number(&mut self) -> String {
        let start = self.pos;
        if self.starts_with(b"0x") || self.starts_with(b"0X") {
            self.pos += 2;
            self.take_while(|c| c.is_ascii_hexdigit());
            return self.source[start..self.pos].to_string();
        }
        self.take_while(|c| c.is_ascii_digit());
        if self.peek_at(0) == Some(b'.') {
            self.pos += 1;
            self.take_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek_at(0), Some(b'e' | b'E')) {
            let exponent_digits_at = match self.peek_at(1) {
                Some(b'+' | b'-') => 2,
                _ => 1,
            };
            if self
                .peek_at(exponent_digits_at)
                .is_some_and(|c| c.is_ascii_digit())
            {
                self.pos += exponent_digits_at;
                self.take_while(|c| c.is_ascii_digit());
            }
        }
        self.source[start..self.pos].to_string()
    }

    fn lex_word(&mut self) -> String {
        self.take_while(is_identifier_part)
    }

    fn take_while(&mut self, predicate: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.pos < self.bytes.len() && predicate(self.bytes[self.pos]) {
            self.pos += 1;
        }
        self.source[start..self.pos].to_string()
    }

    fn advance_char(&mut self) {
        let width = self.source[self.pos..]
            .chars()
            .next()
            .map(char::len_utf8)
            .unwrap_or(1);
        self.pos += width;
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn starts_with(&self, needle: &[u8]) -> bool {
        self.bytes[self.pos.min(self.bytes.len())..].starts_with(needle)
    }
}

fn is_identifier_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_identifier_part(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

/// Whether a `-` after `previous` is a binary minus rather than a sign.
fn ends_operand(previous: Option<&Token>) -> bool {
    match previous.map(|token| &token.kind) {
        None => false,
        Some(TokenKind::Identifier(_))
        | Some(TokenKind::QuotedIdentifier(_))
        | Some(TokenKind::String(_))
        | Some(TokenKind::Number(_))
        | Some(TokenKind::Blob(_))
        | Some(TokenKind::Placeholder(_))
        | Some(TokenKind::Punct(Punct::RParen)) => true,
        Some(TokenKind::Keyword(keyword)) => matches!(
            keyword,
            Keyword::Null | Keyword::True | Keyword::False | Keyword::End
        ),
        Some(TokenKind::Punct(_)) | Some(TokenKind::Unknown(_)) => false,
    }
}
