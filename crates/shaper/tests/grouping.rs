//! Grouped queries translated into a single grouped plan

mod common;

use elif_shaper::expr::{param, BinaryOp};
use elif_shaper::query::{Aggregate, GroupBy, GroupExpr};
use elif_shaper::{
    ErrorCategory, Filter, Lambda, MemoryStore, Query, QueryCompiler, RelationshipModel,
    ResultValue,
};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

fn orders_store(model: &Arc<RelationshipModel>) -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new(Arc::clone(model)).with_rows(
            "Order",
            vec![
                json!({"Id": 10, "CustomerId": 1, "Total": 10}),
                json!({"Id": 11, "CustomerId": 1, "Total": 30}),
                json!({"Id": 12, "CustomerId": 1, "Total": 20}),
                json!({"Id": 13, "CustomerId": 2, "Total": 15}),
                json!({"Id": 14, "CustomerId": 2, "Total": 25}),
                json!({"Id": 15, "CustomerId": 3, "Total": 50}),
            ],
        ),
    )
}

fn by_customer() -> GroupBy {
    GroupBy::by(Lambda::field("o", "CustomerId"))
}

fn scalar<'a>(row: &'a ResultValue, field: &str) -> Option<&'a JsonValue> {
    row.field(field).and_then(ResultValue::as_scalar)
}

/// `Select(g => new { Count = g.Count(), Items = g })`
fn count_with_raw_group() -> GroupBy {
    by_customer().select(GroupExpr::record(vec![
        ("Count", GroupExpr::count()),
        ("Items", GroupExpr::Group),
    ]))
}

/// Position named by the escape error of a leaking grouping
fn escape_position(group_by: GroupBy) -> Vec<String> {
    let compiler = QueryCompiler::new(common::shop_model());
    let error = compiler
        .compile(&Query::from("Order").group_by(group_by))
        .unwrap_err();

    assert_eq!(error.category(), ErrorCategory::GroupingEscaped);
    assert!(error.to_string().contains("the raw group 'g'"));
    error.paths()
}

#[test]
fn test_raw_group_in_result_is_rejected() {
    assert_eq!(escape_position(count_with_raw_group()), vec!["final projection"]);
}

#[test]
fn test_raw_group_escape_names_consuming_operator() {
    let where_items = Filter::new().where_(Lambda::new("x", param("x").prop("Items").is_null()));
    let order_by_items = Filter::new().order_by(Lambda::field("x", "Items"));
    let then_by_items = Filter::new()
        .order_by(Lambda::field("x", "Count"))
        .then_by(Lambda::field("x", "Items"));

    assert_eq!(escape_position(count_with_raw_group().output(where_items)), vec!["Where"]);
    assert_eq!(escape_position(count_with_raw_group().output(order_by_items)), vec!["OrderBy"]);
    assert_eq!(escape_position(count_with_raw_group().output(then_by_items)), vec!["ThenBy"]);
    assert_eq!(
        escape_position(count_with_raw_group().regroup(GroupBy::by(Lambda::field("x", "Items")))),
        vec!["GroupBy"]
    );
}

#[test]
fn test_ordering_on_aggregate_leaves_escape_in_final_projection() {
    let order_by_count = Filter::new().order_by_desc(Lambda::field("x", "Count"));

    assert_eq!(
        escape_position(count_with_raw_group().output(order_by_count)),
        vec!["final projection"]
    );
}

#[tokio::test]
async fn test_count_without_raw_group_is_accepted() {
    let model = common::shop_model();
    let compiler = QueryCompiler::new(Arc::clone(&model));
    let query = Query::from("Order").group_by(
        by_customer()
            .select(GroupExpr::record(vec![
                ("Customer", GroupExpr::Key),
                ("Count", GroupExpr::count()),
            ]))
            .output(Filter::new().order_by_desc(Lambda::field("x", "Count"))),
    );

    let outcome = compiler.execute(&query, orders_store(&model)).await.unwrap();
    let counts: Vec<&JsonValue> = outcome
        .result
        .rows()
        .iter()
        .filter_map(|row| scalar(row, "Count"))
        .collect();

    assert_eq!(counts, vec![&json!(3), &json!(2), &json!(1)]);
}

#[tokio::test]
async fn test_aggregates_over_groups() {
    common::init_tracing();
    let model = common::shop_model();
    let compiler = QueryCompiler::new(Arc::clone(&model));
    let query = Query::from("Order").group_by(by_customer().select(GroupExpr::record(vec![
        ("Customer", GroupExpr::Key),
        ("Orders", GroupExpr::count()),
        ("Total", GroupExpr::aggregate(Aggregate::sum(Lambda::field("o", "Total")))),
        ("Smallest", GroupExpr::aggregate(Aggregate::min(Lambda::field("o", "Total")))),
    ])));

    let outcome = compiler.execute(&query, orders_store(&model)).await.unwrap();
    let rows = outcome.result.rows();

    assert_eq!(outcome.stats.query_count, 1);
    assert_eq!(rows.len(), 3);
    assert_eq!(scalar(&rows[0], "Customer"), Some(&json!(1)));
    assert_eq!(scalar(&rows[0], "Orders"), Some(&json!(3)));
    assert_eq!(scalar(&rows[0], "Total"), Some(&json!(60)));
    assert_eq!(scalar(&rows[0], "Smallest"), Some(&json!(10)));
    assert_eq!(scalar(&rows[2], "Total"), Some(&json!(50)));
}

#[tokio::test]
async fn test_having_and_ordering_over_groups() {
    let model = common::shop_model();
    let compiler = QueryCompiler::new(Arc::clone(&model));
    let total = || GroupExpr::aggregate(Aggregate::sum(Lambda::field("o", "Total")));
    let query = Query::from("Order").group_by(
        by_customer()
            .having(GroupExpr::binary(BinaryOp::Gt, GroupExpr::count(), GroupExpr::constant(1)))
            .order_groups_by(total(), false)
            .select(GroupExpr::record(vec![("Customer", GroupExpr::Key), ("Total", total())])),
    );

    let outcome = compiler.execute(&query, orders_store(&model)).await.unwrap();
    let customers: Vec<&JsonValue> = outcome
        .result
        .rows()
        .iter()
        .filter_map(|row| scalar(row, "Customer"))
        .collect();

    assert_eq!(customers, vec![&json!(2), &json!(1)]);
}

#[tokio::test]
async fn test_terminal_grouping_yields_entities() {
    let model = common::shop_model();
    let compiler = QueryCompiler::new(Arc::clone(&model));
    let query = Query::from("Order").group_by(by_customer());

    let outcome = compiler.execute(&query, orders_store(&model)).await.unwrap();
    let result = &outcome.result;
    assert_eq!(result.len(), 3);

    match &result.rows()[0] {
        ResultValue::Grouping { key, elements } => {
            assert_eq!(key.as_scalar(), Some(&json!(1)));
            assert_eq!(elements.len(), 3);
            let first = elements[0].as_entity().unwrap();
            assert_eq!(result.entity(first).unwrap().field("Total"), &json!(10));
        }
        other => panic!("unexpected row {:?}", other),
    }
    assert_eq!(result.graph().len(), 6);
}

#[test]
fn test_select_many_over_groups_is_rejected() {
    let compiler = QueryCompiler::new(common::shop_model());
    let query = Query::from("Order").group_by(by_customer().select_many(GroupExpr::Group));

    let error = compiler.compile(&query).unwrap_err();
    assert_eq!(error.paths(), vec!["SelectMany"]);
}
