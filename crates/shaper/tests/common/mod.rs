//! Shared models and row fixtures for the integration tests

#![allow(dead_code)]

use elif_shaper::relationships::{DeclaredCollectionType, ForeignKeyConfig, PivotConfig};
use elif_shaper::{EntityType, MemoryStore, Navigation, RelationshipModel};
use serde_json::json;
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn register(model: &RelationshipModel, navigations: Vec<Navigation>) {
    for navigation in navigations {
        model.register_navigation(navigation).unwrap();
    }
}

/// Blog {Posts, Header}, Post {Blog}, BlogHeader {Blog}
pub fn blog_model() -> Arc<RelationshipModel> {
    let model = RelationshipModel::new();
    model.register_entity(EntityType::new("Blog").with_fields(&["Name"])).unwrap();
    model
        .register_entity(EntityType::new("Post").with_fields(&["BlogId", "Title", "Rating"]))
        .unwrap();
    model
        .register_entity(EntityType::new("BlogHeader").with_fields(&["BlogId", "Text"]))
        .unwrap();

    register(
        &model,
        vec![
            Navigation::has_many("Blog", "Posts", "Post", "BlogId").with_inverse("Blog"),
            Navigation::has_one("Blog", "Header", "BlogHeader", "BlogId").with_inverse("Blog"),
            Navigation::belongs_to("Post", "Blog", "Blog", "BlogId").with_inverse("Posts"),
            Navigation::belongs_to("BlogHeader", "Blog", "Blog", "BlogId").with_inverse("Header"),
        ],
    );
    model.validate().unwrap();
    Arc::new(model)
}

pub fn blog_store(model: &Arc<RelationshipModel>) -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new(Arc::clone(model))
            .with_rows(
                "Blog",
                vec![json!({"Id": 1, "Name": "Rust"}), json!({"Id": 2, "Name": "Databases"})],
            )
            .with_rows(
                "Post",
                vec![
                    json!({"Id": 10, "BlogId": 1, "Title": "Lifetimes", "Rating": 5}),
                    json!({"Id": 11, "BlogId": 2, "Title": "Indexes", "Rating": 4}),
                    json!({"Id": 12, "BlogId": 1, "Title": "Traits", "Rating": 2}),
                ],
            )
            .with_rows(
                "BlogHeader",
                vec![json!({"Id": 100, "BlogId": 1, "Text": "All about Rust"})],
            ),
    )
}

/// CycleA.Bs -> CycleB.C -> CycleC.As, every edge auto-included
pub fn cycle_model() -> Arc<RelationshipModel> {
    let model = RelationshipModel::new();
    model.register_entity(EntityType::new("CycleA").with_fields(&["CycleCId"])).unwrap();
    model.register_entity(EntityType::new("CycleB").with_fields(&["CycleAId", "CId"])).unwrap();
    model.register_entity(EntityType::new("CycleC")).unwrap();

    register(
        &model,
        vec![
            Navigation::has_many("CycleA", "Bs", "CycleB", "CycleAId").with_auto_include(true),
            Navigation::belongs_to("CycleB", "C", "CycleC", "CId").with_auto_include(true),
            Navigation::has_many("CycleC", "As", "CycleA", "CycleCId").with_auto_include(true),
        ],
    );
    Arc::new(model)
}

/// Customer {Orders, Wishlist, Coupons, Addresses}, Order {Customer, Lines},
/// OrderLine {Order, Shipments} keyed on (OrderId, LineNo), Shipment {Line}
/// with a composite foreign key
pub fn shop_model() -> Arc<RelationshipModel> {
    let model = RelationshipModel::new();
    model.register_entity(EntityType::new("Customer").with_fields(&["Name"])).unwrap();
    model
        .register_entity(EntityType::new("Order").with_fields(&["CustomerId", "Total"]))
        .unwrap();
    model.register_entity(EntityType::new("Product").with_fields(&["Sku"])).unwrap();
    model
        .register_entity(EntityType::new("Coupon").with_fields(&["CustomerId", "Code"]))
        .unwrap();
    model
        .register_entity(EntityType::new("Address").with_fields(&["CustomerId", "Street"]))
        .unwrap();
    model
        .register_entity(
            EntityType::new("OrderLine")
                .with_key(&["OrderId", "LineNo"])
                .with_fields(&["Quantity"]),
        )
        .unwrap();
    model
        .register_entity(EntityType::new("Shipment").with_fields(&["OrderId", "LineNo", "Carrier"]))
        .unwrap();

    let line_key = || {
        ForeignKeyConfig::composite(
            vec!["OrderId".to_string(), "LineNo".to_string()],
            "Shipment".to_string(),
        )
    };

    register(
        &model,
        vec![
            Navigation::has_many("Customer", "Orders", "Order", "CustomerId")
                .with_inverse("Customer"),
            Navigation::belongs_to("Order", "Customer", "Customer", "CustomerId")
                .with_inverse("Orders"),
            Navigation::many_to_many(
                "Customer",
                "Wishlist",
                "Product",
                PivotConfig::new("Wish".into(), "CustomerId".into(), "ProductId".into()),
            )
            .with_collection_type(DeclaredCollectionType::Interface),
            Navigation::has_many("Customer", "Coupons", "Coupon", "CustomerId")
                .with_collection_type(DeclaredCollectionType::custom("CouponBag", false)),
            Navigation::has_many("Customer", "Addresses", "Address", "CustomerId")
                .with_collection_type(DeclaredCollectionType::custom_requiring(
                    "AddressBook",
                    &["capacity", "comparer"],
                )),
            Navigation::has_many("Order", "Lines", "OrderLine", "OrderId").with_inverse("Order"),
            Navigation::belongs_to("OrderLine", "Order", "Order", "OrderId").with_inverse("Lines"),
            Navigation::has_many("OrderLine", "Shipments", "Shipment", "OrderId")
                .with_foreign_key(line_key())
                .with_inverse("Line"),
            Navigation::belongs_to("Shipment", "Line", "OrderLine", "OrderId")
                .with_foreign_key(line_key())
                .with_inverse("Shipments"),
        ],
    );
    model.validate().unwrap();
    Arc::new(model)
}

pub fn shop_store(model: &Arc<RelationshipModel>) -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new(Arc::clone(model))
            .with_rows(
                "Customer",
                vec![
                    json!({"Id": 1, "Name": "Ana"}),
                    json!({"Id": 2, "Name": "Ben"}),
                    json!({"Id": 3, "Name": "Cy"}),
                ],
            )
            .with_rows(
                "Order",
                vec![
                    json!({"Id": 10, "CustomerId": 1, "Total": 10}),
                    json!({"Id": 11, "CustomerId": 1, "Total": 30}),
                    json!({"Id": 12, "CustomerId": 1, "Total": 20}),
                    json!({"Id": 13, "CustomerId": 2, "Total": 15}),
                    json!({"Id": 14, "CustomerId": 2, "Total": 25}),
                    json!({"Id": 15, "CustomerId": null, "Total": 50}),
                ],
            )
            .with_rows(
                "Product",
                vec![json!({"Id": 100, "Sku": "kbd"}), json!({"Id": 101, "Sku": "mouse"})],
            )
            .with_rows(
                "Wish",
                vec![
                    json!({"CustomerId": 1, "ProductId": 100}),
                    json!({"CustomerId": 1, "ProductId": 101}),
                ],
            )
            .with_rows("Coupon", vec![json!({"Id": 7, "CustomerId": 2, "Code": "WELCOME"})])
            .with_rows(
                "OrderLine",
                vec![
                    json!({"OrderId": 11, "LineNo": 1, "Quantity": 5}),
                    json!({"OrderId": 10, "LineNo": 1, "Quantity": 3}),
                    json!({"OrderId": 11, "LineNo": 2, "Quantity": 1}),
                    json!({"OrderId": 13, "LineNo": 1, "Quantity": 4}),
                    json!({"OrderId": 10, "LineNo": 2, "Quantity": 7}),
                    json!({"OrderId": 14, "LineNo": 1, "Quantity": 2}),
                    json!({"OrderId": 11, "LineNo": 3, "Quantity": 9}),
                ],
            )
            .with_rows(
                "Shipment",
                vec![
                    json!({"Id": 1, "OrderId": 10, "LineNo": 1, "Carrier": "UPS"}),
                    json!({"Id": 2, "OrderId": 11, "LineNo": 1, "Carrier": "DHL"}),
                    json!({"Id": 3, "OrderId": 10, "LineNo": 1, "Carrier": "DHL"}),
                    json!({"Id": 4, "OrderId": 10, "LineNo": 2, "Carrier": "UPS"}),
                ],
            ),
    )
}
