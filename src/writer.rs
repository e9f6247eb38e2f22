use crate::ast::{Document, ExprId, ExprKind, ObjectExpr};
use crate::config::SerializerConfig;
use std::fmt::{self, Write};

/// Renders `document` with the layout options of `config`.
pub fn render(document: &Document, config: &SerializerConfig) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_document(&mut out, document, config);
    out
}

pub fn write_document<W: Write>(
    out: &mut W,
    document: &Document,
    config: &SerializerConfig,
) -> fmt::Result {
    let mut writer = TextWriter {
        document,
        out,
        pretty: config.pretty,
        indent: config.indent,
        level: 0,
    };
    writer.write_expr(document.root)
}

/// Writes `c` as it must appear inside a double-quoted string.
pub fn write_escaped_char(out: &mut impl Write, c: char) -> fmt::Result {
    match c {
        '"' => out.write_str("\\\""),
        '\\' => out.write_str("\\\\"),
        '\n' => out.write_str("\\n"),
        '\r' => out.write_str("\\r"),
        '\t' => out.write_str("\\t"),
        '\u{8}' => out.write_str("\\b"),
        '\u{c}' => out.write_str("\\f"),
        c if c.is_control() => write!(out, "\\u{:04X}", c as u32),
        c => out.write_char(c),
    }
}

pub fn write_string(out: &mut impl Write, text: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in text.chars() {
        write_escaped_char(out, c)?;
    }
    out.write_char('"')
}

struct TextWriter<'a, W: Write> {
    document: &'a Document,
    out: &'a mut W,
    pretty: bool,
    indent: usize,
    level: usize,
}

impl<W: Write> TextWriter<'_, W> {
    fn write_expr(&mut self, id: ExprId) -> fmt::Result {
        let document = self.document;
        match document.arena.kind(id) {
            ExprKind::Null => self.out.write_str("null"),
            ExprKind::Bool(b) => self.out.write_str(if *b { "true" } else { "false" }),
            ExprKind::Numeric(raw) => self.out.write_str(raw),
            ExprKind::Value(text) => write_string(self.out, text),
            ExprKind::Reference(r) => write!(self.out, "{}", r.path),
            ExprKind::Cast { target, inner } => {
                write!(self.out, "({target})")?;
                if self.pretty {
                    self.out.write_char(' ')?;
                }
                self.write_expr(*inner)
            }
            ExprKind::Array(items) => self.write_array(items),
            ExprKind::Object(object) => self.write_object(object),
        }
    }

    fn write_array(&mut self, items: &[ExprId]) -> fmt::Result {
        if items.is_empty() {
            return self.out.write_str("[]");
        }
        self.out.write_char('[')?;
        self.level += 1;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.write_char(',')?;
            }
            self.newline()?;
            self.write_expr(*item)?;
        }
        self.level -= 1;
        self.newline()?;
        self.out.write_char(']')
    }

    fn write_object(&mut self, object: &ObjectExpr) -> fmt::Result {
        if let Some(name) = &object.type_name {
            write!(self.out, "new {name}(")?;
            for (i, arg) in object.constructor_args.iter().enumerate() {
                if i > 0 {
                    self.out.write_str(if self.pretty { ", " } else { "," })?;
                }
                self.write_expr(*arg)?;
            }
            self.out.write_char(')')?;
            if object.properties.is_empty() {
                return Ok(());
            }
            if self.pretty {
                self.out.write_char(' ')?;
            }
        }
        self.write_members(&object.properties)
    }

    fn write_members(&mut self, properties: &[(String, ExprId)]) -> fmt::Result {
        if properties.is_empty() {
            return self.out.write_str("{}");
        }
        self.out.write_char('{')?;
        self.level += 1;
        for (i, (key, value)) in properties.iter().enumerate() {
            if i > 0 {
                self.out.write_char(',')?;
            }
            self.newline()?;
            write_string(self.out, key)?;
            self.out.write_str(if self.pretty { ": " } else { ":" })?;
            self.write_expr(*value)?;
        }
        self.level -= 1;
        self.newline()?;
        self.out.write_char('}')
    }

    fn newline(&mut self) -> fmt::Result {
        if !self.pretty {
            return Ok(());
        }
        self.out.write_char('\n')?;
        for _ in 0..self.level * self.indent {
            self.out.write_char(' ')?;
        }
        Ok(())
    }
}
