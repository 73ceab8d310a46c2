// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Module model derivation and verification through the public API.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use lattice::{
    Annotation, ApplicationModules, ExportVerbosity, StaticTypeProvider, TypeDescriptor,
    TypeReference,
};

fn ecommerce_provider() -> StaticTypeProvider {
    StaticTypeProvider::new()
        .with_package_annotation(
            "shop.orders",
            Annotation::new("Module").with_param("allowedDependencies", "billing::API"),
        )
        .with_type(
            TypeDescriptor::new("shop.orders.OrderService")
                .with_reference(TypeReference::type_use("shop.billing.PaymentGateway")),
        )
        .with_type(
            TypeDescriptor::new("shop.billing.BillingService")
                .with_annotation(Annotation::new("NamedInterface").with_param("value", "API")),
        )
        .with_type(
            TypeDescriptor::new("shop.billing.PaymentGateway")
                .with_annotation(Annotation::new("NamedInterface").with_param("value", "SPI")),
        )
}

#[test]
fn named_interface_mismatch_reports_one_violation_with_context() {
    let modules = ApplicationModules::of(&ecommerce_provider(), "shop").unwrap();
    let violations = modules.detect_violations();

    assert_eq!(violations.len(), 1);
    let message = &violations.get_messages()[0];
    // Source module, its whitelist entry, the offending reference, and
    // the interface that would have been legal.
    assert!(message.contains("'orders'"));
    assert!(message.contains("billing::API"));
    assert!(message.contains("shop.orders.OrderService"));
    assert!(message.contains("shop.billing.PaymentGateway"));
    assert!(message.contains("billing::SPI"));

    assert!(modules.verify().is_err());
}

#[test]
fn model_derivation_is_deterministic() {
    let first = ApplicationModules::of(&ecommerce_provider(), "shop").unwrap();
    let second = ApplicationModules::of(&ecommerce_provider(), "shop").unwrap();

    assert_eq!(first.modules(), second.modules());
    assert_eq!(first.dependencies(), second.dependencies());
    assert_eq!(
        first.to_json(ExportVerbosity::Full),
        second.to_json(ExportVerbosity::Full)
    );
}

#[test]
fn verification_is_total_and_stable() {
    let first = ApplicationModules::of(&ecommerce_provider(), "shop")
        .unwrap()
        .detect_violations();
    let second = ApplicationModules::of(&ecommerce_provider(), "shop")
        .unwrap()
        .detect_violations();
    assert_eq!(first.get_messages(), second.get_messages());
}

#[test]
fn module_lookups_by_name_type_and_package() {
    let modules = ApplicationModules::of(&ecommerce_provider(), "shop").unwrap();

    let billing = modules.get_module_by_name("billing").unwrap();
    assert_eq!(billing.base_package(), "shop.billing");

    assert_eq!(
        modules
            .get_module_by_type("shop.orders.OrderService")
            .unwrap()
            .identifier()
            .as_str(),
        "orders"
    );
    assert_eq!(
        modules
            .get_module_for_package("shop.billing")
            .unwrap()
            .identifier()
            .as_str(),
        "billing"
    );
}

#[test]
fn json_export_shapes() {
    let modules = ApplicationModules::of(&ecommerce_provider(), "shop").unwrap();

    let simple = modules.to_json(ExportVerbosity::Simple);
    let billing = &simple["billing"];
    assert_eq!(billing["basePackage"], "shop.billing");
    assert!(billing.get("namedInterfaces").is_none());

    let full = modules.to_json(ExportVerbosity::Full);
    let interfaces = full["billing"]["namedInterfaces"].as_object().unwrap();
    assert!(interfaces.contains_key("unnamed"));
    assert!(interfaces.contains_key("API"));
    assert!(interfaces.contains_key("SPI"));

    let orders_deps = full["orders"]["dependencies"].as_array().unwrap();
    assert_eq!(orders_deps[0]["target"], "billing");
}
