use gon_core::types::IntKind;
use gon_core::{ClassDef, Heap, SchemaRegistry, Serializer, SerializerConfig, Type, Value};

fn main() {
    let mut schema = SchemaRegistry::new();
    schema.register_class(
        ClassDef::new("Employee")
            .property("name", Type::String)
            .property("age", Type::Int(IntKind::U8))
            .property("manager", Type::named("Employee")),
    );
    let serializer = Serializer::new(&schema, SerializerConfig::default());

    let gon_data = r#"
        // The first employee is their own manager.
        [
            { name: "Jane Doe", age: 52, manager: $[0] },
            { name: "John Doe", age: 31, manager: $[0] },
        ]
    "#;

    let mut heap = Heap::new();
    let staff = Type::list(Type::named("Employee"));
    let value = match serializer.deserialize(&mut heap, gon_data, &staff) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Failed to read GON: {:?}", miette::Report::new(e));
            return;
        }
    };

    if let Some(items) = value.as_object().and_then(|list| heap.items(list)) {
        for employee in items.iter().filter_map(Value::as_object) {
            let name = heap.field(employee, "name").and_then(Value::as_str).unwrap_or("?");
            let manager = heap
                .field(employee, "manager")
                .and_then(Value::as_object)
                .and_then(|m| heap.field(m, "name"))
                .and_then(Value::as_str)
                .unwrap_or("nobody");
            println!("{name} reports to {manager}");
        }
    }

    match serializer.serialize(&heap, &value, &staff) {
        Ok(text) => println!("Written back as GON:\n{text}"),
        Err(e) => eprintln!("Failed to write GON: {:?}", miette::Report::new(e)),
    }

    match gon_core::parse(gon_data, "example.gon") {
        Ok(document) => match document.to_json() {
            Ok(json) => println!("As plain JSON:\n{json}"),
            Err(e) => eprintln!("Failed to export JSON: {e}"),
        },
        Err(e) => eprintln!("Failed to parse GON: {:?}", miette::Report::new(e)),
    }
}
