use crate::error::LexerError;
use crate::stream::{CharSource, CharStream, ReaderSource, StrSource, DEFAULT_LOOK_BEHIND};
use miette::{NamedSource, SourceSpan};
use std::io::BufRead;
use std::sync::Arc;

/// The different kinds of tokens that the lexer can produce.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenType {
    /// A number lexeme, kept verbatim: `12`, `-0.5`, `1e10`.
    Number,
    /// A letter or `_` followed by letters, digits and `_`.
    Identifier,
    /// A `'...'` string. The token text is the decoded content.
    SingleQuotedString,
    /// A `"..."` string. The token text is the decoded content.
    DoubleQuotedString,
    /// One of `[ ] < > ( ) : , { } . $`.
    Symbol(char),
}

/// A token with its type, text and position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub ttype: TokenType,
    pub text: String,
    pub line: usize,
    pub column: usize,
    pub pos_start: usize,
    pub pos_end: usize,
}

impl Token {
    pub fn is_symbol(&self, symbol: char) -> bool {
        self.ttype == TokenType::Symbol(symbol)
    }

    pub fn is_identifier(&self, word: &str) -> bool {
        self.ttype == TokenType::Identifier && self.text == word
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self.ttype,
            TokenType::SingleQuotedString | TokenType::DoubleQuotedString
        )
    }

    pub fn span(&self) -> SourceSpan {
        (self.pos_start, self.pos_end - self.pos_start).into()
    }
}

const SYMBOLS: &[char] = &['[', ']', '<', '>', '(', ')', ':', ',', '{', '}', '.', '$'];

/// Line, column and byte offset of a character in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

pub struct Lexer<S> {
    stream: CharStream<S>,
    source: Arc<NamedSource<String>>,
    /// Whether `source` holds the full text, so spans can be rendered.
    has_text: bool,
    line: usize,
    column: usize,
    offset: usize,
}

impl<'a> Lexer<StrSource<'a>> {
    pub fn new(input: &'a str) -> Self {
        Self::new_with_name(input, "source.gon".to_string())
    }

    pub fn new_with_name(input: &'a str, name: String) -> Self {
        Self::with_look_behind(input, name, DEFAULT_LOOK_BEHIND)
    }

    pub fn with_look_behind(input: &'a str, name: String, look_behind: usize) -> Self {
        let source = Arc::new(NamedSource::new(name, input.to_string()));
        Self::from_stream(CharStream::from_text(input, look_behind), source, true)
    }
}

impl<R: BufRead> Lexer<ReaderSource<R>> {
    pub fn from_reader(reader: R, name: String, look_behind: usize) -> Self {
        let source = Arc::new(NamedSource::new(name, String::new()));
        Self::from_stream(CharStream::from_reader(reader, look_behind), source, false)
    }
}

impl<S: CharSource> Lexer<S> {
    pub fn from_stream(
        stream: CharStream<S>,
        source: Arc<NamedSource<String>>,
        has_text: bool,
    ) -> Self {
        Self {
            stream,
            source,
            has_text,
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    pub fn source(&self) -> &Arc<NamedSource<String>> {
        &self.source
    }

    pub fn has_text(&self) -> bool {
        self.has_text
    }

    /// Position of the next unconsumed character.
    pub fn current_position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
            offset: self.offset,
        }
    }

    /// Tokenizes the whole input.
    pub fn lex(&mut self) -> Result<Vec<Token>, LexerError> {
        self.by_ref().collect()
    }

    /// Produces the next token, or `None` at the end of the input.
    pub fn next_token(&mut self) -> Result<Option<Token>, LexerError> {
        self.skip_trivia()?;
        let start = self.current_position();

        let Some(c) = self.peek() else {
            return match self.stream.take_error() {
                Some(err) => Err(LexerError::ReadFailure {
                    message: err.to_string(),
                    line: start.line,
                    column: start.column,
                }),
                None => Ok(None),
            };
        };

        let (ttype, text) = match c {
            '"' => (TokenType::DoubleQuotedString, self.read_string(start)?),
            '\'' => (TokenType::SingleQuotedString, self.read_string(start)?),
            c if c.is_ascii_digit() || c == '+' || c == '-' => {
                (TokenType::Number, self.read_number(start)?)
            }
            '.' if self.peek_at(2).is_some_and(|n| n.is_ascii_digit()) => {
                (TokenType::Number, self.read_number(start)?)
            }
            c if c.is_alphabetic() || c == '_' => (TokenType::Identifier, self.read_identifier()),
            c if SYMBOLS.contains(&c) => {
                self.advance();
                (TokenType::Symbol(c), c.to_string())
            }
            c => {
                self.advance();
                return Err(LexerError::InvalidCharacter {
                    ch: c,
                    line: start.line,
                    column: start.column,
                    src: self.source.clone(),
                    span: self.span_from(start),
                });
            }
        };

        Ok(Some(Token {
            ttype,
            text,
            line: start.line,
            column: start.column,
            pos_start: start.offset,
            pos_end: self.offset,
        }))
    }

    fn peek(&mut self) -> Option<char> {
        self.stream.look_ahead(1)
    }

    fn peek_at(&mut self, offset: isize) -> Option<char> {
        self.stream.look_ahead(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.stream.look_ahead(1)?;
        self.stream.consume(1);
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span_from(&self, start: Position) -> Option<SourceSpan> {
        self.has_text
            .then(|| (start.offset, self.offset - start.offset).into())
    }

    fn skip_trivia(&mut self) -> Result<(), LexerError> {
        loop {
            match (self.peek(), self.peek_at(2)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    // Runs to `\n`; a `\r\n` ending is consumed with it.
                    while let Some(c) = self.advance() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.current_position();
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(LexerError::UnterminatedComment {
                                    line: start.line,
                                    column: start.column,
                                    src: self.source.clone(),
                                    span: self.has_text.then(|| (start.offset, 2).into()),
                                });
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_string(&mut self, start: Position) -> Result<String, LexerError> {
        let quote = self.advance();
        let mark = self.stream.mark();
        // Stays `None` until the first escape; plain strings are cut out of
        // the stream buffer in one piece.
        let mut decoded: Option<String> = None;

        loop {
            match self.peek() {
                None => {
                    self.stream.release();
                    return Err(LexerError::UnterminatedString {
                        line: start.line,
                        column: start.column,
                        src: self.source.clone(),
                        span: self.has_text.then(|| (start.offset, 1).into()),
                    });
                }
                Some(c) if Some(c) == quote => {
                    let text = match decoded {
                        Some(text) => text,
                        None => self.stream.substring(mark, self.stream.position()),
                    };
                    self.stream.release();
                    self.advance();
                    return Ok(text);
                }
                Some('\\') => {
                    let text = decoded.get_or_insert_with(|| {
                        self.stream.substring(mark, self.stream.position())
                    });
                    self.stream.release();
                    let escape_start = self.current_position();
                    self.advance();
                    let escaped = self.read_escape(escape_start)?;
                    text.push(escaped);
                }
                Some(c) => {
                    if let Some(text) = decoded.as_mut() {
                        text.push(c);
                    }
                    self.advance();
                }
            }
        }
    }

    /// Reads the character after a backslash.
    fn read_escape(&mut self, start: Position) -> Result<char, LexerError> {
        let Some(c) = self.advance() else {
            return Err(self.invalid_escape(start, String::new()));
        };
        let decoded = match c {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            '\\' => '\\',
            '/' => '/',
            '\'' => '\'',
            '"' => '"',
            'u' => {
                let unit = self.read_hex4(start)?;
                if (0xD800..0xDC00).contains(&unit) {
                    // A high surrogate only makes sense followed by `\uDCxx`.
                    if self.peek() != Some('\\') || self.peek_at(2) != Some('u') {
                        return Err(self.invalid_escape(start, format!("u{unit:04X}")));
                    }
                    self.advance();
                    self.advance();
                    let low = self.read_hex4(start)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(self.invalid_escape(start, format!("u{low:04X}")));
                    }
                    let combined = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                    char::from_u32(combined)
                        .ok_or_else(|| self.invalid_escape(start, format!("u{unit:04X}")))?
                } else {
                    char::from_u32(unit)
                        .ok_or_else(|| self.invalid_escape(start, format!("u{unit:04X}")))?
                }
            }
            other => return Err(self.invalid_escape(start, other.to_string())),
        };
        Ok(decoded)
    }

    fn read_hex4(&mut self, start: Position) -> Result<u32, LexerError> {
        let mut value = 0;
        let mut seen = String::from("u");
        for _ in 0..4 {
            let digit = self.peek().and_then(|c| c.to_digit(16));
            match digit {
                Some(d) => {
                    seen.push(self.advance().unwrap_or_default());
                    value = value * 16 + d;
                }
                None => {
                    if let Some(c) = self.advance() {
                        seen.push(c);
                    }
                    return Err(self.invalid_escape(start, seen));
                }
            }
        }
        Ok(value)
    }

    fn invalid_escape(&self, start: Position, ch: String) -> LexerError {
        LexerError::InvalidEscape {
            ch,
            line: start.line,
            column: start.column,
            src: self.source.clone(),
            span: self.span_from(start),
        }
    }

    fn read_number(&mut self, start: Position) -> Result<String, LexerError> {
        let mark = self.stream.mark();
        let result = self.scan_number(start, mark);
        self.stream.release();
        result
    }

    fn scan_number(&mut self, start: Position, mark: usize) -> Result<String, LexerError> {
        if matches!(self.peek(), Some('+') | Some('-')) {
            self.advance();
        }
        let integer_digits = self.read_digits();

        let mut has_fraction = false;
        if self.peek() == Some('.') {
            self.advance();
            if self.read_digits() == 0 {
                return Err(self.malformed_number(start, mark, "expected digits after the decimal point"));
            }
            has_fraction = true;
        }
        if integer_digits == 0 && !has_fraction {
            return Err(self.malformed_number(start, mark, "expected digits"));
        }
        if self.peek() == Some('.') {
            self.advance();
            return Err(self.malformed_number(start, mark, "a number has at most one decimal point"));
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            if self.read_digits() == 0 {
                return Err(self.malformed_number(start, mark, "expected digits in the exponent"));
            }
            if self.peek() == Some('.') {
                self.advance();
                return Err(self.malformed_number(start, mark, "the exponent must be an integer"));
            }
        }

        Ok(self.stream.substring(mark, self.stream.position()))
    }

    fn read_digits(&mut self) -> usize {
        let mut count = 0;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            count += 1;
        }
        count
    }

    fn malformed_number(&self, start: Position, mark: usize, reason: &str) -> LexerError {
        LexerError::MalformedNumber {
            lexeme: self.stream.substring(mark, self.stream.position()),
            reason: reason.to_string(),
            line: start.line,
            column: start.column,
            src: self.source.clone(),
            span: self.span_from(start),
        }
    }

    fn read_identifier(&mut self) -> String {
        let mark = self.stream.mark();
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.advance();
        }
        let ident = self.stream.substring(mark, self.stream.position());
        self.stream.release();
        ident
    }
}

impl<S: CharSource> Iterator for Lexer<S> {
    type Item = Result<Token, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

/// A token source with one token of lookahead.
pub struct TokenStream<S> {
    lexer: Lexer<S>,
    peeked: Option<Token>,
}

impl<S: CharSource> TokenStream<S> {
    pub fn new(lexer: Lexer<S>) -> Self {
        Self {
            lexer,
            peeked: None,
        }
    }

    pub fn lexer(&self) -> &Lexer<S> {
        &self.lexer
    }

    pub fn peek(&mut self) -> Result<Option<&Token>, LexerError> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref())
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, LexerError> {
        match self.peeked.take() {
            Some(token) => Ok(Some(token)),
            None => self.lexer.next_token(),
        }
    }
}
