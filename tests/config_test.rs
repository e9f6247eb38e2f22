use gon_core::error::GonError;
use gon_core::{
    Heap, PropertyAction, ReferencePolicy, SchemaRegistry, Serializer, SerializerConfig, Type,
    Value,
};
use std::fs::File;
use std::io::{BufReader, Write};

#[test]
fn test_config_from_json() {
    let config = SerializerConfig::from_json_str(
        r#"{ "reference_policy": "ignore_circular_references", "pretty": false, "max_depth": 16 }"#,
    )
    .unwrap();
    assert_eq!(config.reference_policy, ReferencePolicy::IgnoreCircularReferences);
    assert!(!config.pretty);
    assert_eq!(config.max_depth, 16);
    assert_eq!(config.missing_property, PropertyAction::Throw);
}

#[test]
fn test_config_from_yaml() {
    let yaml = "missing_property: set_if_possible\nignored_property: throw\nindent: 4\n";
    let config = SerializerConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.missing_property, PropertyAction::SetIfPossible);
    assert_eq!(config.ignored_property, PropertyAction::Throw);
    assert_eq!(config.indent, 4);
    assert_eq!(config.reference_policy, ReferencePolicy::WriteIdentifier);
}

#[test]
fn test_config_rejects_unknown_keys() {
    let result = SerializerConfig::from_json_str(r#"{ "prety": false }"#);
    assert!(matches!(result, Err(GonError::Config(_))));
}

#[test]
fn test_config_written_to_a_file_reads_back() {
    let config = SerializerConfig::default()
        .compact()
        .with_policy(ReferencePolicy::ErrorCircularReferences);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

    let text = std::fs::read_to_string(file.path()).unwrap();
    assert_eq!(SerializerConfig::from_json_str(&text).unwrap(), config);
}

#[test]
fn test_deserialize_from_a_file_reader() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "// settings").unwrap();
    writeln!(file, "{{ name: 'app', ports: (list<u16>) [80, 443], main: $.ports[1] }}").unwrap();
    file.flush().unwrap();

    let schema = SchemaRegistry::new();
    let config = SerializerConfig {
        look_behind: 2,
        ..SerializerConfig::default()
    };
    let serializer = Serializer::new(&schema, config);
    let reader = BufReader::new(File::open(file.path()).unwrap());
    let mut heap = Heap::new();
    let value = serializer
        .deserialize_reader(&mut heap, reader, &Type::Any)
        .unwrap();

    let root = value.as_object().unwrap();
    assert_eq!(heap.field(root, "name"), Some(&Value::from("app")));
    assert_eq!(heap.field(root, "main"), Some(&Value::UInt(443)));
    let ports = heap.field(root, "ports").and_then(Value::as_object).unwrap();
    assert_eq!(heap.items(ports), Some(&[Value::UInt(80), Value::UInt(443)][..]));
}

#[test]
fn test_reader_errors_carry_positions() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{\n  a: 1,\n  b: @\n}}").unwrap();
    file.flush().unwrap();

    let schema = SchemaRegistry::new();
    let serializer = Serializer::new(&schema, SerializerConfig::default());
    let reader = BufReader::new(File::open(file.path()).unwrap());
    let err = serializer
        .deserialize_reader(&mut Heap::new(), reader, &Type::Any)
        .unwrap_err();
    assert!(err.to_string().contains("line 3"), "{err}");
}
