use crate::ast::Document;
use crate::builder::ExpressionBuilder;
use crate::config::SerializerConfig;
use crate::error::GonError;
use crate::evaluator::Evaluator;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::schema::Schema;
use crate::serialization::{to_plain, PlainValue};
use crate::types::Type;
use crate::value::{Heap, Value};
use crate::writer;
use log::info;
use serde::Serialize;
use std::fmt;
use std::io::{BufRead, Write};

/// Reads and writes object graphs as GON text.
///
/// The serializer itself is stateless; every call starts from a fresh
/// expression tree, so one instance can be shared between threads.
pub struct Serializer<'a> {
    schema: &'a dyn Schema,
    config: SerializerConfig,
}

impl<'a> Serializer<'a> {
    pub fn new(schema: &'a dyn Schema, config: SerializerConfig) -> Self {
        Self { schema, config }
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Writes the graph reachable from `value` so that reading it back as
    /// `declared` restores it.
    ///
    /// # Errors
    /// Returns a `GonError::Build` for cycles rejected by the reference
    /// policy, identities that cannot be referenced, converter failures and
    /// graphs nested deeper than `max_depth`.
    pub fn serialize(&self, heap: &Heap, value: &Value, declared: &Type) -> Result<String, GonError> {
        let document = self.build_document(heap, value, declared)?;
        Ok(writer::render(&document, &self.config))
    }

    /// Like [`Serializer::serialize`], writing into `out`.
    ///
    /// # Errors
    /// Returns a `GonError::Io` if `out` fails, on top of the errors of
    /// [`Serializer::serialize`].
    pub fn serialize_to_writer<W: Write>(
        &self,
        out: &mut W,
        heap: &Heap,
        value: &Value,
        declared: &Type,
    ) -> Result<(), GonError> {
        let text = self.serialize(heap, value, declared)?;
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Like [`Serializer::serialize`], formatting into `out` without an
    /// intermediate string.
    ///
    /// # Errors
    /// Returns a `GonError::Format` if `out` rejects the text.
    pub fn serialize_to_fmt<W: fmt::Write>(
        &self,
        out: &mut W,
        heap: &Heap,
        value: &Value,
        declared: &Type,
    ) -> Result<(), GonError> {
        let document = self.build_document(heap, value, declared)?;
        writer::write_document(out, &document, &self.config)?;
        Ok(())
    }

    pub fn build_document(
        &self,
        heap: &Heap,
        value: &Value,
        declared: &Type,
    ) -> Result<Document, GonError> {
        let document =
            ExpressionBuilder::new(self.schema, &self.config).build_document(heap, value, declared)?;
        Ok(document)
    }

    /// Parses `source` and binds its references.
    ///
    /// # Errors
    /// Returns a lexer, parser or reference error pointing into `source`.
    pub fn parse_document(&self, source: &str, file_name: &str) -> Result<Document, GonError> {
        let mut document =
            Parser::with_config(source, file_name.to_string(), &self.config).parse_document()?;
        Resolver::new().resolve(&mut document)?;
        Ok(document)
    }

    /// Parses a document from a reader without reading it into memory first.
    pub fn parse_reader<R: BufRead>(&self, reader: R, file_name: &str) -> Result<Document, GonError> {
        let mut document =
            Parser::from_reader(reader, file_name.to_string(), &self.config).parse_document()?;
        Resolver::new().resolve(&mut document)?;
        Ok(document)
    }

    /// Evaluates a parsed document as a value of type `ty`, allocating the
    /// objects it describes in `heap`.
    pub fn evaluate(
        &self,
        heap: &mut Heap,
        document: &mut Document,
        ty: &Type,
    ) -> Result<Value, GonError> {
        let value = Evaluator::new(self.schema, &self.config).evaluate_document(heap, document, ty)?;
        Ok(value)
    }

    /// Reads `source` as a value of type `ty`.
    ///
    /// # Errors
    /// Returns any error of parsing, reference resolution or evaluation.
    pub fn deserialize(&self, heap: &mut Heap, source: &str, ty: &Type) -> Result<Value, GonError> {
        let mut document = self.parse_document(source, "input.gon")?;
        let value = self.evaluate(heap, &mut document, ty)?;
        info!("read `{}` from {} bytes", ty, source.len());
        Ok(value)
    }

    pub fn deserialize_reader<R: BufRead>(
        &self,
        heap: &mut Heap,
        reader: R,
        ty: &Type,
    ) -> Result<Value, GonError> {
        let mut document = self.parse_reader(reader, "input.gon")?;
        self.evaluate(heap, &mut document, ty)
    }
}

/// Parses and resolves a document with the default configuration.
///
/// This is the entry point for tools that inspect GON text without a schema,
/// e.g. to convert it to JSON or YAML.
///
/// # Errors
/// Returns a `GonError` if lexing, parsing or reference resolution fails.
pub fn parse(source: &str, file_name: &str) -> Result<Document, GonError> {
    let mut document = Parser::new_with_name(source, file_name.to_string()).parse_document()?;
    Resolver::new().resolve(&mut document)?;
    Ok(document)
}

impl Serialize for Document {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_plain().serialize(serializer)
    }
}

impl Document {
    /// The document as plain data: casts dropped, references as path text.
    #[must_use]
    pub fn to_plain(&self) -> PlainValue {
        to_plain(self, self.root)
    }

    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }

    /// The document as GON text.
    #[must_use]
    pub fn render(&self, config: &SerializerConfig) -> String {
        writer::render(self, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_parse_to_json() {
        let source = r#"
        {
            name: "My App",
            version: 1.0,
            is_enabled: true,
            features: ["a", "b", "c"],
            config: {
                host: "localhost",
                port: (u16) 8080,
            },
            primary: $.config,
        }
    "#;

        let expected_json = serde_json::json!({
            "name": "My App",
            "version": 1.0,
            "is_enabled": true,
            "features": ["a", "b", "c"],
            "config": {
                "host": "localhost",
                "port": 8080,
            },
            "primary": "$.config",
        });

        let document = parse(source, "test.gon").unwrap();
        let result = document.to_json().unwrap();
        let result_json: serde_json::Value = serde_json::from_str(&result).unwrap();

        assert_eq!(result_json, expected_json);
    }

    #[test]
    fn test_simple_parse_to_yaml() {
        let source = r#"
        {
            name: "My App",
            version: 1.0,
            is_enabled: true,
        }
    "#;

        let expected_yaml = "is_enabled: true\nname: My App\nversion: 1.0\n";

        let document = parse(source, "test.gon").unwrap();
        let result = document.to_yaml().unwrap();

        assert_eq!(result, expected_yaml);
    }
}
