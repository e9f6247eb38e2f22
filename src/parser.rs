use crate::ast::*;
use crate::config::SerializerConfig;
use crate::error::{GonError, ParserError};
use crate::lexer::{Lexer, Token, TokenStream, TokenType};
use crate::stream::{CharSource, ReaderSource, StrSource};
use crate::types::TypeName;
use log::debug;
use miette::{NamedSource, SourceSpan};
use std::io::BufRead;
use std::sync::Arc;

/// A recursive descent parser producing an expression tree.
///
/// Tokens are pulled from the lexer one at a time, so a document read from a
/// stream is never tokenized up front.
pub struct Parser<S> {
    tokens: TokenStream<S>,
    source: Arc<NamedSource<String>>,
    has_text: bool,
    arena: ExprArena,
    depth: usize,
    max_depth: usize,
    /// Byte offset just past the last consumed token.
    last_end: usize,
}

impl<'a> Parser<StrSource<'a>> {
    pub fn new(source_text: &'a str) -> Self {
        Self::new_with_name(source_text, "source.gon".to_string())
    }

    pub fn new_with_name(source_text: &'a str, name: String) -> Self {
        Self::with_config(source_text, name, &SerializerConfig::default())
    }

    pub fn with_config(source_text: &'a str, name: String, config: &SerializerConfig) -> Self {
        let lexer = Lexer::with_look_behind(source_text, name, config.look_behind);
        Self::from_lexer(lexer, config.max_depth)
    }
}

impl<R: BufRead> Parser<ReaderSource<R>> {
    pub fn from_reader(reader: R, name: String, config: &SerializerConfig) -> Self {
        let lexer = Lexer::from_reader(reader, name, config.look_behind);
        Self::from_lexer(lexer, config.max_depth)
    }
}

impl<S: CharSource> Parser<S> {
    pub fn from_lexer(lexer: Lexer<S>, max_depth: usize) -> Self {
        let source = lexer.source().clone();
        let has_text = lexer.has_text();
        Self {
            tokens: TokenStream::new(lexer),
            source,
            has_text,
            arena: ExprArena::new(),
            depth: 0,
            max_depth,
            last_end: 0,
        }
    }

    // === Main Parsing Methods ===

    /// Document ::= Value EOF
    pub fn parse_document(mut self) -> Result<Document, GonError> {
        let root = self.parse_value()?;
        if let Some(token) = self.tokens.peek()?.cloned() {
            return self.err_unexpected(&token, "end of input");
        }
        debug!(
            "parsed {} expression nodes from {}",
            self.arena.len(),
            self.source.name()
        );
        Ok(Document {
            arena: self.arena,
            root,
            source: Some(self.source),
        })
    }

    /// Value ::= Object | Array | ConstructedObject | Reference | Cast | Primitive
    fn parse_value(&mut self) -> Result<ExprId, GonError> {
        let start = self.current_token("a value")?;
        if self.depth >= self.max_depth {
            return Err(ParserError::NestingTooDeep {
                limit: self.max_depth,
                line: start.line,
                column: start.column,
                src: self.source.clone(),
                span: self.has_text.then(|| start.span()),
            }
            .into());
        }
        self.depth += 1;

        let id = match start.ttype {
            TokenType::Symbol('{') => self.parse_object(&start, None, Vec::new())?,
            TokenType::Symbol('[') => self.parse_array()?,
            TokenType::Symbol('(') => self.parse_cast()?,
            TokenType::Symbol('$') => self.parse_reference()?,
            TokenType::Number => {
                self.advance()?;
                self.alloc(ExprKind::Numeric(start.text.clone()), &start)
            }
            TokenType::SingleQuotedString | TokenType::DoubleQuotedString => {
                self.advance()?;
                self.alloc(ExprKind::Value(start.text.clone()), &start)
            }
            TokenType::Identifier => {
                self.advance()?;
                match start.text.as_str() {
                    "true" => self.alloc(ExprKind::Bool(true), &start),
                    "false" => self.alloc(ExprKind::Bool(false), &start),
                    "null" => self.alloc(ExprKind::Null, &start),
                    "new" if self.check_identifier()? => self.parse_constructed(&start)?,
                    _ => self.alloc(ExprKind::Value(start.text.clone()), &start),
                }
            }
            TokenType::Symbol(_) => return self.err_unexpected(&start, "a value"),
        };

        self.depth -= 1;
        Ok(id)
    }

    /// Object ::= "{" [ Member { "," Member } [ "," ] ] "}"
    fn parse_object(
        &mut self,
        start: &Token,
        type_name: Option<TypeName>,
        constructor_args: Vec<ExprId>,
    ) -> Result<ExprId, GonError> {
        self.expect('{')?;
        let mut properties = Vec::new();
        if !self.check('}')? {
            loop {
                properties.push(self.parse_member()?);
                if !self.match_symbol(',')? {
                    break;
                }
                if self.check('}')? {
                    break; // trailing comma
                }
            }
        }
        self.expect('}')?;
        let object = ObjectExpr {
            type_name,
            constructor_args,
            properties,
        };
        Ok(self.alloc(ExprKind::Object(object), start))
    }

    /// Member ::= (Identifier | String) ":" Value
    fn parse_member(&mut self) -> Result<(String, ExprId), GonError> {
        let key = self.current_token("a property key")?;
        if key.ttype != TokenType::Identifier && !key.is_string() {
            return self.err_unexpected(&key, "a property key");
        }
        self.advance()?;
        self.expect(':')?;
        let value = self.parse_value()?;
        Ok((key.text, value))
    }

    /// Array ::= "[" [ Value { "," Value } [ "," ] ] "]"
    fn parse_array(&mut self) -> Result<ExprId, GonError> {
        let start = self.expect('[')?;
        let mut items = Vec::new();
        if !self.check(']')? {
            loop {
                items.push(self.parse_value()?);
                if !self.match_symbol(',')? {
                    break;
                }
                if self.check(']')? {
                    break; // trailing comma
                }
            }
        }
        self.expect(']')?;
        Ok(self.alloc(ExprKind::Array(items), &start))
    }

    /// Cast ::= "(" TypeName ")" Value
    fn parse_cast(&mut self) -> Result<ExprId, GonError> {
        let start = self.expect('(')?;
        let target = self.parse_type_name()?;
        self.expect(')')?;
        let inner = self.parse_value()?;
        Ok(self.alloc(ExprKind::Cast { target, inner }, &start))
    }

    /// ConstructedObject ::= "new" TypeName "(" [ Value { "," Value } ] ")" [ Object ]
    ///
    /// `new` itself has already been consumed.
    fn parse_constructed(&mut self, start: &Token) -> Result<ExprId, GonError> {
        let type_name = self.parse_type_name()?;
        self.expect('(')?;
        let mut args = Vec::new();
        if !self.check(')')? {
            loop {
                args.push(self.parse_value()?);
                if !self.match_symbol(',')? {
                    break;
                }
            }
        }
        self.expect(')')?;

        if self.check('{')? {
            return self.parse_object(start, Some(type_name), args);
        }
        let object = ObjectExpr {
            type_name: Some(type_name),
            constructor_args: args,
            properties: Vec::new(),
        };
        Ok(self.alloc(ExprKind::Object(object), start))
    }

    /// TypeName ::= Identifier { "." Identifier } [ "<" TypeName { "," TypeName } ">" ]
    fn parse_type_name(&mut self) -> Result<TypeName, GonError> {
        let mut name = self.expect_identifier("a type name")?.text;
        while self.match_symbol('.')? {
            name.push('.');
            name.push_str(&self.expect_identifier("a type name segment")?.text);
        }
        let mut args = Vec::new();
        if self.match_symbol('<')? {
            loop {
                args.push(self.parse_type_name()?);
                if !self.match_symbol(',')? {
                    break;
                }
            }
            self.expect('>')?;
        }
        Ok(TypeName { name, args })
    }

    /// Reference ::= "$" { "[" (Integer | String) "]" | "." Identifier }
    fn parse_reference(&mut self) -> Result<ExprId, GonError> {
        let start = self.expect('$')?;
        let mut segments = Vec::new();
        loop {
            if self.match_symbol('[')? {
                let token = self.current_token("an index or a quoted key")?;
                let segment = match token.ttype {
                    TokenType::Number => match token.text.parse::<usize>() {
                        Ok(index) if token.text.chars().all(|c| c.is_ascii_digit()) => {
                            PathSegment::Index(index)
                        }
                        _ => {
                            return self.err_malformed_reference(
                                &token,
                                "an index must be a non-negative integer",
                            )
                        }
                    },
                    _ if token.is_string() => PathSegment::Key(token.text.clone()),
                    _ => {
                        return self
                            .err_malformed_reference(&token, "expected an index or a quoted key")
                    }
                };
                self.advance()?;
                self.expect(']')?;
                segments.push(segment);
            } else if self.match_symbol('.')? {
                let token = self.current_token("an identifier")?;
                if token.ttype != TokenType::Identifier {
                    return self.err_malformed_reference(&token, "expected an identifier after `.`");
                }
                self.advance()?;
                segments.push(PathSegment::Key(token.text));
            } else {
                break;
            }
        }
        let reference = ReferenceExpr {
            path: Path(segments),
            target: None,
        };
        Ok(self.alloc(ExprKind::Reference(reference), &start))
    }

    // === Tokenizer Helper Methods ===

    fn alloc(&mut self, kind: ExprKind, start: &Token) -> ExprId {
        let span = self.span_from(start.pos_start);
        self.arena.alloc(kind, start.line, start.column, span)
    }

    fn span_from(&self, start: usize) -> Option<SourceSpan> {
        self.has_text
            .then(|| (start, self.last_end.saturating_sub(start)).into())
    }

    /// The next token, without consuming it.
    fn current_token(&mut self, expected: &str) -> Result<Token, GonError> {
        match self.tokens.peek()? {
            Some(token) => Ok(token.clone()),
            None => Err(self.eof_error(expected)),
        }
    }

    fn advance(&mut self) -> Result<Token, GonError> {
        match self.tokens.next_token()? {
            Some(token) => {
                self.last_end = token.pos_end;
                Ok(token)
            }
            None => Err(self.eof_error("a token")),
        }
    }

    fn expect(&mut self, symbol: char) -> Result<Token, GonError> {
        let expected = format!("`{symbol}`");
        let token = self.current_token(&expected)?;
        if token.is_symbol(symbol) {
            self.advance()
        } else {
            self.err_unexpected(&token, &expected)
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<Token, GonError> {
        let token = self.current_token(expected)?;
        if token.ttype == TokenType::Identifier {
            self.advance()
        } else {
            self.err_unexpected(&token, expected)
        }
    }

    fn match_symbol(&mut self, symbol: char) -> Result<bool, GonError> {
        if self.check(symbol)? {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn check(&mut self, symbol: char) -> Result<bool, GonError> {
        Ok(self.tokens.peek()?.is_some_and(|t| t.is_symbol(symbol)))
    }

    fn check_identifier(&mut self) -> Result<bool, GonError> {
        Ok(self
            .tokens
            .peek()?
            .is_some_and(|t| t.ttype == TokenType::Identifier))
    }

    fn eof_error(&self, expected: &str) -> GonError {
        let end = self.tokens.lexer().current_position();
        ParserError::UnexpectedEof {
            expected: expected.to_string(),
            line: end.line,
            column: end.column,
            src: self.source.clone(),
            span: self.has_text.then(|| (end.offset, 0).into()),
        }
        .into()
    }

    fn err_unexpected<T>(&self, token: &Token, expected: &str) -> Result<T, GonError> {
        Err(ParserError::UnexpectedToken {
            found: token.text.clone(),
            expected: expected.to_string(),
            line: token.line,
            column: token.column,
            src: self.source.clone(),
            span: self.has_text.then(|| token.span()),
        }
        .into())
    }

    fn err_malformed_reference<T>(&self, token: &Token, reason: &str) -> Result<T, GonError> {
        Err(ParserError::MalformedReference {
            reason: reason.to_string(),
            line: token.line,
            column: token.column,
            src: self.source.clone(),
            span: self.has_text.then(|| token.span()),
        }
        .into())
    }
}
