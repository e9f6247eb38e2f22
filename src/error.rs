use miette::{Diagnostic, NamedSource, SourceSpan};
use std::sync::Arc;
use thiserror::Error;

use crate::schema::{ConvertError, SchemaError};

#[derive(Error, Debug, Diagnostic)]
pub enum GonError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lexer(#[from] LexerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(config::invalid),
        help("Check the configuration document against `SerializerConfig`.")
    )]
    Config(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(io::error))]
    Io(#[from] std::io::Error),

    #[error("Failed to format output")]
    #[diagnostic(code(writer::format))]
    Format(#[from] std::fmt::Error),
}

/// Errors raised while turning characters into tokens.
///
/// `span` is `None` when the document was read from a stream, since the text
/// is not retained for rendering.
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum LexerError {
    #[error("Invalid character {ch:?} at line {line}, column {column}")]
    #[diagnostic(
        code(lexer::invalid_character),
        help("This character cannot start any token.")
    )]
    InvalidCharacter {
        ch: char,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("not allowed here")]
        span: Option<SourceSpan>,
    },

    #[error("Unterminated string starting at line {line}, column {column}")]
    #[diagnostic(
        code(lexer::unterminated_string),
        help("Add the matching closing quote.")
    )]
    UnterminatedString {
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("string starts here")]
        span: Option<SourceSpan>,
    },

    #[error("Unterminated block comment starting at line {line}, column {column}")]
    #[diagnostic(code(lexer::unterminated_comment), help("Close the comment with `*/`."))]
    UnterminatedComment {
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("comment starts here")]
        span: Option<SourceSpan>,
    },

    #[error("Invalid escape sequence `\\{ch}` at line {line}, column {column}")]
    #[diagnostic(
        code(lexer::invalid_escape),
        help("Valid escapes are \\t \\n \\r \\b \\f \\\\ \\/ \\' \\\" and \\uXXXX.")
    )]
    InvalidEscape {
        ch: String,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("unknown escape")]
        span: Option<SourceSpan>,
    },

    #[error("Malformed number `{lexeme}` at line {line}, column {column}: {reason}")]
    #[diagnostic(code(lexer::malformed_number))]
    MalformedNumber {
        lexeme: String,
        reason: String,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("{reason}")]
        span: Option<SourceSpan>,
    },

    #[error("Could not read input at line {line}, column {column}: {message}")]
    #[diagnostic(code(lexer::read_failure))]
    ReadFailure {
        message: String,
        line: usize,
        column: usize,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ParserError {
    #[error("Unexpected token `{found}` at line {line}, column {column}")]
    #[diagnostic(
        code(parser::unexpected_token),
        help("The parser found a token it did not expect in this position.")
    )]
    UnexpectedToken {
        found: String,
        expected: String,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("Expected {expected}, but found this")]
        span: Option<SourceSpan>,
    },

    #[error("Unexpected end of input at line {line}, column {column}")]
    #[diagnostic(
        code(parser::unexpected_eof),
        help("The document ended unexpectedly. The parser expected {expected}.")
    )]
    UnexpectedEof {
        expected: String,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("Input ended here")]
        span: Option<SourceSpan>,
    },

    #[error("Malformed reference path at line {line}, column {column}: {reason}")]
    #[diagnostic(
        code(parser::malformed_reference),
        help("References look like `$`, `$.key`, `$['key']` or `$[0]`.")
    )]
    MalformedReference {
        reason: String,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("{reason}")]
        span: Option<SourceSpan>,
    },

    #[error("Nesting exceeds the limit of {limit} at line {line}, column {column}")]
    #[diagnostic(code(parser::nesting_too_deep), help("Raise `max_depth` in the configuration."))]
    NestingTooDeep {
        limit: usize,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("too deep")]
        span: Option<SourceSpan>,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ReferenceError {
    #[error("Reference `{path}` names unknown key '{key}' (line {line}, column {column})")]
    #[diagnostic(
        code(reference::unknown_key),
        help("The object at this point of the path has no property with that key.")
    )]
    UnknownKey {
        path: String,
        key: String,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("dangling reference")]
        span: Option<SourceSpan>,
    },

    #[error(
        "Reference `{path}` uses index {index} but the array has {len} items (line {line}, column {column})"
    )]
    #[diagnostic(code(reference::index_out_of_range))]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("dangling reference")]
        span: Option<SourceSpan>,
    },

    #[error(
        "Reference `{path}` applies segment {segment} to a value that is not {expected} (line {line}, column {column})"
    )]
    #[diagnostic(
        code(reference::not_a_container),
        help("Key segments select object properties and index segments select array items.")
    )]
    NotAContainer {
        path: String,
        segment: String,
        expected: String,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("cannot descend here")]
        span: Option<SourceSpan>,
    },

    #[error("Reference `{path}` resolves back to itself (line {line}, column {column})")]
    #[diagnostic(
        code(reference::reference_loop),
        help("A reference must ultimately designate an object, array or literal.")
    )]
    ReferenceLoop {
        path: String,
        line: usize,
        column: usize,
        #[source_code]
        src: Arc<NamedSource<String>>,
        #[label("this reference never reaches a value")]
        span: Option<SourceSpan>,
    },
}

/// Failures while constructing objects from an expression tree.
#[derive(Error, Debug, Diagnostic)]
pub enum EvalError {
    #[error("Cannot convert {found} to `{expected}` at line {line}, column {column}")]
    #[diagnostic(code(eval::type_conversion))]
    TypeConversion {
        expected: String,
        found: String,
        line: usize,
        column: usize,
    },

    #[error("Unknown type `{name}` at line {line}, column {column}")]
    #[diagnostic(
        code(eval::unknown_type),
        help("Register the type with the schema before deserializing.")
    )]
    UnknownType {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("Schema rejected the value at line {line}, column {column}")]
    #[diagnostic(code(eval::schema))]
    Schema {
        #[source]
        source: SchemaError,
        line: usize,
        column: usize,
    },

    #[error("Converter for `{type_name}` failed at line {line}, column {column}")]
    #[diagnostic(code(eval::converter))]
    Converter {
        type_name: String,
        #[source]
        source: ConvertError,
        line: usize,
        column: usize,
    },

    #[error("Value is not referenceable yet at line {line}, column {column}: {reason}")]
    #[diagnostic(
        code(eval::not_yet_referenceable),
        help("The referenced value is still being constructed and has no stable identity.")
    )]
    NotYetReferenceable {
        reason: String,
        line: usize,
        column: usize,
    },

    #[error("Type `{type_name}` has no property `{property}` (line {line}, column {column})")]
    #[diagnostic(code(eval::missing_property))]
    MissingProperty {
        type_name: String,
        property: String,
        line: usize,
        column: usize,
    },

    #[error("Property `{property}` of `{type_name}` is ignored (line {line}, column {column})")]
    #[diagnostic(code(eval::ignored_property))]
    IgnoredProperty {
        type_name: String,
        property: String,
        line: usize,
        column: usize,
    },

    #[error("Document nesting exceeds the limit of {limit}")]
    #[diagnostic(code(eval::depth_limit), help("Raise `max_depth` in the configuration."))]
    DepthLimitExceeded { limit: usize },
}

/// Failures while turning a live object graph into an expression tree.
#[derive(Error, Debug, Diagnostic)]
pub enum BuildError {
    #[error("Circular reference at `{path}` back to `{first_path}`")]
    #[diagnostic(
        code(build::circular_reference),
        help("Use the `write_identifier` reference policy to serialize cyclic graphs.")
    )]
    CircularReference { path: String, first_path: String },

    #[error("Value at `{path}` repeats `{first_path}`, which has no stable identity to reference")]
    #[diagnostic(code(build::not_yet_referenceable))]
    NotYetReferenceable { path: String, first_path: String },

    #[error("Dangling object handle at `{path}`")]
    #[diagnostic(code(build::dangling_handle))]
    DanglingHandle { path: String },

    #[error("Converter for `{type_name}` failed at `{path}`")]
    #[diagnostic(code(build::converter))]
    Converter {
        type_name: String,
        path: String,
        #[source]
        source: ConvertError,
    },

    #[error("Schema rejected the value at `{path}`")]
    #[diagnostic(code(build::schema))]
    Schema {
        path: String,
        #[source]
        source: SchemaError,
    },

    #[error("Object graph nesting exceeds the limit of {limit} at `{path}`")]
    #[diagnostic(code(build::depth_limit), help("Raise `max_depth` in the configuration."))]
    DepthLimitExceeded { limit: usize, path: String },
}
