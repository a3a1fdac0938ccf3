//! End-to-end composition flows: plan in, subgraph bytes in, merged tree out.

use std::sync::Arc;

use weft::composite::CompositeResultDocument;
use weft::metadb::ValueKind;
use weft::plan::{OperationPlan, Selection, SelectionSet};
use weft::source::builder::SourceResultDocumentBuilder;
use weft::source::SourceResultDocument;
use weft::types::{SelectionId, SelectionSetId};
use weft::WeftError;

fn product_plan() -> Arc<OperationPlan> {
    Arc::new(OperationPlan {
        name: Some("productBySlugQuery".into()),
        root: SelectionSetId(0),
        selection_sets: vec![
            SelectionSet {
                id: SelectionSetId(0),
                selections: vec![Selection {
                    id: SelectionId(1),
                    response_name: "productBySlug".into(),
                    selection_set: Some(SelectionSetId(1)),
                    nullable: true,
                }],
            },
            SelectionSet {
                id: SelectionSetId(1),
                selections: vec![
                    Selection {
                        id: SelectionId(2),
                        response_name: "__typename".into(),
                        selection_set: None,
                        nullable: false,
                    },
                    Selection {
                        id: SelectionId(3),
                        response_name: "id".into(),
                        selection_set: None,
                        nullable: false,
                    },
                    Selection {
                        id: SelectionId(4),
                        response_name: "name".into(),
                        selection_set: None,
                        nullable: true,
                    },
                ],
            },
        ],
    })
}

#[test]
fn subgraph_response_fills_disjoint_slots() {
    let plan = product_plan();
    let mut composite = CompositeResultDocument::new(Arc::clone(&plan)).expect("composite");

    let source = Arc::new(
        SourceResultDocument::parse_text(
            r#"{"__typename":"Product","id":41,"name":"Espresso Machine"}"#,
        )
        .expect("parse"),
    );
    let source_id = composite.attach_source(Arc::clone(&source)).expect("attach");

    let product = composite
        .get_property(composite.root(), "productBySlug")
        .expect("slot");
    composite
        .set_object_value(product, SelectionSetId(1))
        .expect("object");

    let source_root = source.root().expect("root");
    for field in ["__typename", "id", "name"] {
        let slot = composite.get_property(product, field).expect("slot");
        let value = source_root.get_property(field).expect("value");
        composite.set_leaf_value(slot, source_id, value).expect("copy");
    }

    let typename = composite.get_property(product, "__typename").expect("slot");
    let id = composite.get_property(product, "id").expect("slot");
    let name = composite.get_property(product, "name").expect("slot");

    assert_eq!(composite.value_kind(typename).expect("kind"), ValueKind::String);
    assert_eq!(composite.value_kind(id).expect("kind"), ValueKind::Number);
    assert_eq!(composite.value_kind(name).expect("kind"), ValueKind::String);
    assert_eq!(composite.leaf_str(typename).expect("str"), "Product");
    assert_eq!(&*composite.leaf_bytes(id).expect("bytes"), b"41");
    assert_eq!(composite.leaf_str(name).expect("str"), "Espresso Machine");
}

#[test]
fn invalidating_the_object_spares_siblings_and_rejects_scalars() {
    let plan = product_plan();
    let mut composite = CompositeResultDocument::new(Arc::clone(&plan)).expect("composite");
    let source =
        Arc::new(SourceResultDocument::parse_text(r#"{"__typename":"Product"}"#).expect("parse"));
    let source_id = composite.attach_source(Arc::clone(&source)).expect("attach");

    let product = composite
        .get_property(composite.root(), "productBySlug")
        .expect("slot");
    composite
        .set_object_value(product, SelectionSetId(1))
        .expect("object");

    let typename = composite.get_property(product, "__typename").expect("slot");
    let value = source.root().expect("root").get_property("__typename").expect("v");
    composite.set_leaf_value(typename, source_id, value).expect("copy");

    composite.invalidate(product).expect("invalidate");
    assert!(composite.is_invalidated(product).expect("flag"));
    assert!(!composite.is_invalidated(composite.root()).expect("flag"));

    // Scalar leaves are not invalidatable.
    assert!(matches!(
        composite.invalidate(typename),
        Err(WeftError::InvalidState(_))
    ));
}

#[test]
fn unset_fields_enumerate_as_undefined() {
    let plan = product_plan();
    let mut composite = CompositeResultDocument::new(plan).expect("composite");
    let product = composite
        .get_property(composite.root(), "productBySlug")
        .expect("slot");
    composite
        .set_object_value(product, SelectionSetId(1))
        .expect("object");

    let entries: Vec<(String, ValueKind)> = composite
        .enumerate_object(product)
        .expect("enumerate")
        .map(|entry| {
            let (name, slot) = entry.expect("entry");
            (name.to_owned(), composite.value_kind(slot).expect("kind"))
        })
        .collect();
    assert_eq!(
        entries,
        vec![
            ("__typename".to_owned(), ValueKind::Undefined),
            ("id".to_owned(), ValueKind::Undefined),
            ("name".to_owned(), ValueKind::Undefined),
        ]
    );
}

#[test]
fn built_and_parsed_documents_are_interchangeable() {
    let plan = product_plan();
    let fields = &plan.selection_sets[1].selections;

    let mut builder = SourceResultDocumentBuilder::new(16);
    {
        let mut root = builder.root().expect("root");
        root.create_property(&fields[0], 0)
            .expect("prop")
            .set_string_value("Product")
            .expect("v");
        root.create_property(&fields[1], 1)
            .expect("prop")
            .set_int_value(41)
            .expect("v");
        root.create_property(&fields[2], 2)
            .expect("prop")
            .set_null_value()
            .expect("v");
        root.finish().expect("finish");
    }
    let built = builder.build().expect("build");
    let parsed = SourceResultDocument::parse_text(
        r#"{"__typename":"Product","id":41,"name":null}"#,
    )
    .expect("parse");

    for doc in [&built, &parsed] {
        let root = doc.root().expect("root");
        assert_eq!(
            root.get_property("__typename").expect("p").as_str().expect("v"),
            "Product"
        );
        assert_eq!(root.get_property("id").expect("p").as_i64().expect("v"), 41);
        assert!(root.get_property("name").expect("p").is_null().expect("v"));
        let names: Vec<String> = root
            .enumerate_object()
            .expect("enumerate")
            .map(|entry| entry.expect("entry").0.into_owned())
            .collect();
        assert_eq!(names, vec!["__typename", "id", "name"]);
    }

    // A built document feeds composite slots exactly like a parsed one.
    let mut composite = CompositeResultDocument::new(Arc::clone(&plan)).expect("composite");
    let built = Arc::new(built);
    let source_id = composite.attach_source(Arc::clone(&built)).expect("attach");
    let product = composite
        .get_property(composite.root(), "productBySlug")
        .expect("slot");
    composite
        .set_object_value(product, SelectionSetId(1))
        .expect("object");
    let id_slot = composite.get_property(product, "id").expect("slot");
    let value = built.root().expect("root").get_property("id").expect("v");
    composite.set_leaf_value(id_slot, source_id, value).expect("copy");
    assert_eq!(&*composite.leaf_bytes(id_slot).expect("bytes"), b"41");
}

#[test]
fn two_sources_feed_disjoint_branches() {
    let plan = Arc::new(OperationPlan {
        name: None,
        root: SelectionSetId(0),
        selection_sets: vec![SelectionSet {
            id: SelectionSetId(0),
            selections: vec![
                Selection {
                    id: SelectionId(1),
                    response_name: "price".into(),
                    selection_set: None,
                    nullable: false,
                },
                Selection {
                    id: SelectionId(2),
                    response_name: "stock".into(),
                    selection_set: None,
                    nullable: false,
                },
            ],
        }],
    });
    let mut composite = CompositeResultDocument::new(plan).expect("composite");

    let pricing = Arc::new(SourceResultDocument::parse_text(r#"{"price":19.99}"#).expect("parse"));
    let inventory = Arc::new(SourceResultDocument::parse_text(r#"{"stock":7}"#).expect("parse"));
    let pricing_id = composite.attach_source(Arc::clone(&pricing)).expect("attach");
    let inventory_id = composite.attach_source(Arc::clone(&inventory)).expect("attach");
    assert_ne!(pricing_id, inventory_id);

    let price_slot = composite.get_property(composite.root(), "price").expect("slot");
    let stock_slot = composite.get_property(composite.root(), "stock").expect("slot");
    composite
        .set_leaf_value(
            price_slot,
            pricing_id,
            pricing.root().expect("root").get_property("price").expect("v"),
        )
        .expect("copy");
    composite
        .set_leaf_value(
            stock_slot,
            inventory_id,
            inventory.root().expect("root").get_property("stock").expect("v"),
        )
        .expect("copy");

    assert_eq!(&*composite.leaf_bytes(price_slot).expect("bytes"), b"19.99");
    assert_eq!(&*composite.leaf_bytes(stock_slot).expect("bytes"), b"7");
}

#[test]
fn plans_round_trip_through_their_wire_form() {
    let plan = product_plan();
    let encoded = serde_json::to_string(&*plan).expect("encode");
    let decoded: OperationPlan = serde_json::from_str(&encoded).expect("decode");
    assert_eq!(decoded, *plan);
}

#[test]
fn timed_out_subgraph_leaves_slots_undefined() {
    let plan = product_plan();
    let composite = CompositeResultDocument::new(plan).expect("composite");
    // No source ever arrives; the slot simply stays undefined for the
    // serializer to deal with.
    let product = composite
        .get_property(composite.root(), "productBySlug")
        .expect("slot");
    assert_eq!(
        composite.value_kind(product).expect("kind"),
        ValueKind::Undefined
    );
}

#[test]
fn document_disposal_is_idempotent_across_types() {
    let plan = product_plan();
    let mut composite = CompositeResultDocument::new(plan).expect("composite");
    let mut source = SourceResultDocument::parse_text("{}").expect("parse");

    source.dispose();
    source.dispose();
    composite.dispose();
    composite.dispose();

    assert!(source.is_disposed());
    assert!(composite.is_disposed());
}
