use proptest::prelude::*;
use serde_json::Value;

use weft::metadb::cursor::Cursor;
use weft::metadb::row::{
    MAX_LOCATION, MAX_OPERATION_REFERENCE_ID, MAX_PARENT_ROW, MAX_SOURCE_DOCUMENT_ID,
};
use weft::metadb::{row_flags, ElementToken, MetaDb};
use weft::source::SourceResultDocument;

#[derive(Debug, Clone)]
struct RowSpec {
    token: ElementToken,
    location: u32,
    size_or_length: i32,
    source_document_id: u16,
    parent_seed: u32,
    operation_reference_id: u16,
    flags: u8,
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Location(u32),
    SizeOrLength(u32),
    HasComplexChildren,
    Token(ElementToken),
    SourceDocumentId(u16),
    OperationReferenceId(u16),
    ParentRow(u32),
    Flags(u8),
    AddFlags(u8),
}

fn arb_token() -> impl Strategy<Value = ElementToken> {
    prop_oneof![
        Just(ElementToken::Undefined),
        Just(ElementToken::StartObject),
        Just(ElementToken::EndObject),
        Just(ElementToken::StartArray),
        Just(ElementToken::EndArray),
        Just(ElementToken::PropertyName),
        Just(ElementToken::String),
        Just(ElementToken::Number),
        Just(ElementToken::True),
        Just(ElementToken::False),
        Just(ElementToken::Null),
        Just(ElementToken::Reference),
    ]
}

fn arb_row() -> impl Strategy<Value = RowSpec> {
    (
        arb_token(),
        0..=MAX_LOCATION,
        proptest::num::i32::ANY.prop_filter("i32::MIN has no magnitude", |v| *v != i32::MIN),
        0..=MAX_SOURCE_DOCUMENT_ID,
        any::<u32>(),
        0..=MAX_OPERATION_REFERENCE_ID,
        any::<u8>(),
    )
        .prop_map(
            |(token, location, size_or_length, source_document_id, parent_seed, operation_reference_id, flags)| RowSpec {
                token,
                location,
                size_or_length,
                source_document_id,
                parent_seed,
                operation_reference_id,
                flags,
            },
        )
}

fn arb_mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (0..=MAX_LOCATION).prop_map(Mutation::Location),
        (0..=i32::MAX as u32).prop_map(Mutation::SizeOrLength),
        Just(Mutation::HasComplexChildren),
        arb_token().prop_map(Mutation::Token),
        (0..=MAX_SOURCE_DOCUMENT_ID).prop_map(Mutation::SourceDocumentId),
        (0..=MAX_OPERATION_REFERENCE_ID).prop_map(Mutation::OperationReferenceId),
        (0..=MAX_PARENT_ROW).prop_map(Mutation::ParentRow),
        any::<u8>().prop_map(Mutation::Flags),
        any::<u8>().prop_map(Mutation::AddFlags),
    ]
}

fn fill_store(rows: &[RowSpec]) -> MetaDb {
    let mut db = MetaDb::create_for_estimated_rows(rows.len() as u32);
    for (index, spec) in rows.iter().enumerate() {
        // Structural parents must precede their children.
        let parent = if index == 0 {
            0
        } else {
            spec.parent_seed % index as u32
        };
        db.append(
            spec.token,
            spec.location,
            spec.size_or_length,
            spec.source_document_id,
            parent,
            spec.operation_reference_id,
            spec.flags,
        )
        .expect("append");
    }
    db
}

proptest! {
    #[test]
    fn prop_single_field_mutation_leaves_other_rows_untouched(
        rows in prop::collection::vec(arb_row(), 1..60),
        target_seed in any::<usize>(),
        mutation in arb_mutation(),
    ) {
        let mut db = fill_store(&rows);
        let target = (target_seed % rows.len()) as u32;
        let before: Vec<_> = (0..rows.len() as u32)
            .map(|i| db.get(Cursor::from_index(i)).expect("get"))
            .collect();

        let cursor = Cursor::from_index(target);
        match mutation {
            Mutation::Location(v) => db.set_location(cursor, v).expect("set"),
            Mutation::SizeOrLength(v) => db.set_size_or_length(cursor, v).expect("set"),
            Mutation::HasComplexChildren => db.set_has_complex_children(cursor).expect("set"),
            Mutation::Token(v) => db.set_token(cursor, v).expect("set"),
            Mutation::SourceDocumentId(v) => db.set_source_document_id(cursor, v).expect("set"),
            Mutation::OperationReferenceId(v) => {
                db.set_operation_reference_id(cursor, v).expect("set")
            }
            Mutation::ParentRow(v) => db.set_parent_row(cursor, v).expect("set"),
            Mutation::Flags(v) => db.set_flags(cursor, v).expect("set"),
            Mutation::AddFlags(v) => db.add_flags(cursor, v).expect("set"),
        }

        for i in 0..rows.len() as u32 {
            if i == target {
                continue;
            }
            let after = db.get(Cursor::from_index(i)).expect("get");
            prop_assert_eq!(after, before[i as usize], "row {} perturbed", i);
        }
    }

    #[test]
    fn prop_sibling_fields_survive_a_single_field_mutation(
        row in arb_row(),
        mutation in arb_mutation(),
    ) {
        let mut db = fill_store(std::slice::from_ref(&row));
        let cursor = Cursor::from_index(0);
        let before = db.get(cursor).expect("get");

        match mutation {
            Mutation::Location(v) => db.set_location(cursor, v).expect("set"),
            Mutation::SizeOrLength(v) => db.set_size_or_length(cursor, v).expect("set"),
            Mutation::HasComplexChildren => db.set_has_complex_children(cursor).expect("set"),
            Mutation::Token(v) => db.set_token(cursor, v).expect("set"),
            Mutation::SourceDocumentId(v) => db.set_source_document_id(cursor, v).expect("set"),
            Mutation::OperationReferenceId(v) => {
                db.set_operation_reference_id(cursor, v).expect("set")
            }
            Mutation::ParentRow(v) => db.set_parent_row(cursor, v).expect("set"),
            Mutation::Flags(v) => db.set_flags(cursor, v).expect("set"),
            Mutation::AddFlags(v) => db.add_flags(cursor, v).expect("set"),
        }

        let after = db.get(cursor).expect("get");
        match mutation {
            Mutation::Location(v) => {
                prop_assert_eq!(after.location, v);
                prop_assert_eq!(after.size_or_length(), before.size_or_length());
                prop_assert_eq!(after.has_complex_children(), before.has_complex_children());
                prop_assert_eq!(after.flags, before.flags);
            }
            Mutation::SizeOrLength(v) => {
                prop_assert_eq!(after.size_or_length(), v);
                prop_assert_eq!(
                    after.has_complex_children(),
                    before.has_complex_children(),
                    "size backpatch must preserve the complex-children bit"
                );
                prop_assert_eq!(after.location, before.location);
            }
            Mutation::HasComplexChildren => {
                prop_assert!(after.has_complex_children());
                prop_assert_eq!(after.size_or_length(), before.size_or_length());
            }
            Mutation::Token(v) => {
                prop_assert_eq!(after.token, v);
                prop_assert_eq!(after.flags, before.flags);
                prop_assert_eq!(after.source_document_id, before.source_document_id);
            }
            Mutation::SourceDocumentId(v) => {
                prop_assert_eq!(after.source_document_id, v);
                prop_assert_eq!(after.token, before.token);
                prop_assert_eq!(after.flags, before.flags);
            }
            Mutation::OperationReferenceId(v) => {
                prop_assert_eq!(after.operation_reference_id, v);
                prop_assert_eq!(after.parent_row, before.parent_row);
            }
            Mutation::ParentRow(v) => {
                prop_assert_eq!(after.parent_row, v);
                prop_assert_eq!(after.operation_reference_id, before.operation_reference_id);
            }
            Mutation::Flags(v) => {
                prop_assert_eq!(after.flags, v);
                prop_assert_eq!(after.token, before.token);
            }
            Mutation::AddFlags(v) => {
                prop_assert_eq!(after.flags, before.flags | v);
                prop_assert_eq!(after.token, before.token);
            }
        }
    }

    #[test]
    fn prop_negative_size_round_trips_magnitude_and_bit(k in 0..=i32::MAX) {
        let mut db = MetaDb::create_for_estimated_rows(1);
        let cursor = db
            .append(
                ElementToken::StartObject,
                0,
                -k,
                0,
                0,
                0,
                row_flags::NONE,
            )
            .expect("append");
        let row = db.get(cursor).expect("get");
        prop_assert_eq!(row.size_or_length(), k as u32);
        // Zero has no sign, so only a strictly negative input can carry
        // the complex-children bit.
        prop_assert_eq!(row.has_complex_children(), k != 0);
    }

    #[test]
    fn prop_cursor_index_bijection(index in 0..=MAX_PARENT_ROW) {
        let cursor = Cursor::from_index(index);
        prop_assert_eq!(cursor.to_index(), index);
    }

    #[test]
    fn prop_parser_agrees_with_reference_implementation(value in arb_json(3)) {
        let text = serde_json::to_string(&value).expect("encode");
        let doc = SourceResultDocument::parse_text(&text).expect("parse");
        let root = doc.root().expect("root");
        assert_value_matches(&value, root)?;
    }
}

fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        any::<f64>()
            .prop_filter("finite numbers only", |f| f.is_finite())
            .prop_map(|f| serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
        ".*".prop_map(Value::String),
    ];
    leaf.prop_recursive(depth, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-zA-Z0-9_]{0,8}", inner, 0..6).prop_map(|entries| {
                Value::Object(entries.into_iter().collect())
            }),
        ]
    })
}

fn assert_value_matches(
    expected: &Value,
    actual: weft::source::SourceElement<'_>,
) -> Result<(), TestCaseError> {
    match expected {
        Value::Null => prop_assert!(actual.is_null().expect("kind")),
        Value::Bool(b) => prop_assert_eq!(actual.as_bool().expect("bool"), *b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                prop_assert_eq!(actual.as_i64().expect("i64"), i);
            } else {
                let f = n.as_f64().expect("f64");
                prop_assert_eq!(actual.as_f64().expect("f64"), f);
            }
        }
        Value::String(s) => prop_assert_eq!(actual.as_str().expect("str"), s.as_str()),
        Value::Array(items) => {
            let elements: Vec<_> = actual
                .enumerate_array()
                .expect("enumerate")
                .collect::<Result<_, _>>()
                .expect("elements");
            prop_assert_eq!(elements.len(), items.len());
            for (item, element) in items.iter().zip(elements) {
                assert_value_matches(item, element)?;
            }
        }
        Value::Object(entries) => {
            let mut seen = 0;
            for entry in actual.enumerate_object().expect("enumerate") {
                let (name, element) = entry.expect("entry");
                let expected_value = entries
                    .get(name.as_ref())
                    .expect("enumerated name must exist in reference object");
                assert_value_matches(expected_value, element)?;
                seen += 1;
            }
            prop_assert_eq!(seen, entries.len());
        }
    }
    Ok(())
}
