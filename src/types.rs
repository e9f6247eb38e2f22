use std::fmt::{self, Display};

/// A destination or runtime type.
///
/// Built-in types are understood by the core directly; `Named` types are
/// looked up through the [`Schema`](crate::schema::Schema).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No static type information: values are read in their natural form.
    Any,
    Bool,
    Char,
    String,
    Int(IntKind),
    Float(FloatKind),
    /// A growable list of the given item type.
    List(Box<Type>),
    /// A generic map from string keys to `Any` values.
    Map,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F32,
    F64,
}

impl IntKind {
    pub fn name(self) -> &'static str {
        match self {
            IntKind::I8 => "i8",
            IntKind::I16 => "i16",
            IntKind::I32 => "i32",
            IntKind::I64 => "i64",
            IntKind::U8 => "u8",
            IntKind::U16 => "u16",
            IntKind::U32 => "u32",
            IntKind::U64 => "u64",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntKind::I8 | IntKind::I16 | IntKind::I32 | IntKind::I64)
    }

    /// Inclusive range of the kind, widened so every kind fits.
    pub fn range(self) -> (i128, i128) {
        match self {
            IntKind::I8 => (i8::MIN.into(), i8::MAX.into()),
            IntKind::I16 => (i16::MIN.into(), i16::MAX.into()),
            IntKind::I32 => (i32::MIN.into(), i32::MAX.into()),
            IntKind::I64 => (i64::MIN.into(), i64::MAX.into()),
            IntKind::U8 => (0, u8::MAX.into()),
            IntKind::U16 => (0, u16::MAX.into()),
            IntKind::U32 => (0, u32::MAX.into()),
            IntKind::U64 => (0, u64::MAX.into()),
        }
    }

    pub fn contains(self, value: i128) -> bool {
        let (min, max) = self.range();
        (min..=max).contains(&value)
    }
}

impl FloatKind {
    pub fn name(self) -> &'static str {
        match self {
            FloatKind::F32 => "f32",
            FloatKind::F64 => "f64",
        }
    }
}

impl Type {
    pub fn named(name: impl Into<String>) -> Self {
        Type::Named(name.into())
    }

    pub fn list(item: Type) -> Self {
        Type::List(Box::new(item))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any)
    }

    /// Looks up a built-in type by its spelling. `list<T>` resolves its item
    /// type with `resolve_item`, so named item types go through the schema.
    pub fn builtin(
        name: &TypeName,
        resolve_item: impl Fn(&TypeName) -> Option<Type>,
    ) -> Option<Type> {
        let ty = match (name.name.as_str(), name.args.as_slice()) {
            ("any" | "object", []) => Type::Any,
            ("bool", []) => Type::Bool,
            ("char", []) => Type::Char,
            ("string", []) => Type::String,
            ("i8", []) => Type::Int(IntKind::I8),
            ("i16", []) => Type::Int(IntKind::I16),
            ("i32", []) => Type::Int(IntKind::I32),
            ("i64", []) => Type::Int(IntKind::I64),
            ("u8", []) => Type::Int(IntKind::U8),
            ("u16", []) => Type::Int(IntKind::U16),
            ("u32", []) => Type::Int(IntKind::U32),
            ("u64", []) => Type::Int(IntKind::U64),
            ("f32", []) => Type::Float(FloatKind::F32),
            ("f64", []) => Type::Float(FloatKind::F64),
            ("map", []) => Type::Map,
            ("list", []) => Type::list(Type::Any),
            ("list", [item]) => Type::list(resolve_item(item)?),
            _ => return None,
        };
        Some(ty)
    }

    /// The spelling of this type in casts and `new` expressions.
    pub fn type_name(&self) -> TypeName {
        match self {
            Type::Any => TypeName::simple("any"),
            Type::Bool => TypeName::simple("bool"),
            Type::Char => TypeName::simple("char"),
            Type::String => TypeName::simple("string"),
            Type::Int(kind) => TypeName::simple(kind.name()),
            Type::Float(kind) => TypeName::simple(kind.name()),
            Type::Map => TypeName::simple("map"),
            Type::List(item) => TypeName {
                name: "list".to_string(),
                args: vec![item.type_name()],
            },
            Type::Named(name) => TypeName::simple(name),
        }
    }

    /// The type a numeric lexeme takes when nothing else is known: `i64`,
    /// then `u64` for larger integers, `f64` for fractions, exponents and
    /// anything out of range.
    pub fn natural_numeric(raw: &str) -> Type {
        if raw.contains(['.', 'e', 'E']) {
            return Type::Float(FloatKind::F64);
        }
        let digits = raw.strip_prefix('+').unwrap_or(raw);
        if digits.parse::<i64>().is_ok() {
            Type::Int(IntKind::I64)
        } else if digits.parse::<u64>().is_ok() {
            Type::Int(IntKind::U64)
        } else {
            Type::Float(FloatKind::F64)
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// A type as spelled in a document: `Name`, `ns.Name`, `list<Name>`.
///
/// Parsing never consults the schema, so names stay unresolved until
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeName {
    pub name: String,
    pub args: Vec<TypeName>,
}

impl TypeName {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }
}

impl Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}
