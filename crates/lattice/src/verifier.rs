// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Architectural rule verification
//!
//! Evaluates the derived module model against the access rules and returns
//! an immutable [`Violations`] aggregate. Rule failures are collected,
//! never thrown mid-analysis, so one run reports everything at once.

use crate::catalog::ReferenceKind;
use crate::modules::{ApplicationModules, DeclaredDependency, ModuleDependency};
use std::fmt;

/// Immutable, ordered, deduplicated collection of rule violations.
///
/// Doubles as an error type so `verify()` results compose with `?`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations {
    messages: Vec<String>,
}

impl Violations {
    /// The violation messages, in evaluation order.
    pub fn get_messages(&self) -> &[String] {
        &self.messages
    }

    /// Whether no rule was broken.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of distinct violations.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    fn push(&mut self, message: String) {
        if !self.messages.contains(&message) {
            self.messages.push(message);
        }
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.messages.is_empty() {
            return f.write_str("no violations");
        }
        writeln!(f, "{} architectural violation(s):", self.messages.len())?;
        for message in &self.messages {
            writeln!(f, "- {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Violations {}

/// Runs all architectural rules over the model.
pub fn verify(modules: &ApplicationModules) -> Violations {
    let mut violations = Violations::default();

    for module in modules.iter() {
        check_field_injection(modules, module.identifier().as_str(), &mut violations);
        check_declared_interfaces_exist(modules, module.identifier().as_str(), &mut violations);
    }

    for dependency in modules.dependencies() {
        check_access(modules, dependency, &mut violations);
    }

    for cycle in modules.structural_cycles() {
        let members: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        violations.push(format!(
            "Cycle detected between modules: {}",
            members.join(", ")
        ));
    }

    violations
}

/// Rule: no field injection into managed components; constructor and
/// setter injection are accepted.
fn check_field_injection(
    modules: &ApplicationModules,
    module_name: &str,
    violations: &mut Violations,
) {
    let Some(module) = modules.get_module_by_name(module_name) else {
        return;
    };
    for class in module.classes() {
        let Some(descriptor) = modules.catalog().type_named(class) else {
            continue;
        };
        for reference in &descriptor.references {
            if reference.kind == ReferenceKind::FieldInjection {
                let member = reference.member.as_deref().unwrap_or("<unknown field>");
                violations.push(format!(
                    "Module '{}': field injection of '{}' into '{}.{}'; use constructor or setter injection",
                    module_name, reference.target, class, member
                ));
            }
        }
    }
}

/// Rule: a declared allowed dependency `module::X` must refer to a module
/// and named interface that exist.
fn check_declared_interfaces_exist(
    modules: &ApplicationModules,
    module_name: &str,
    violations: &mut Violations,
) {
    let Some(module) = modules.get_module_by_name(module_name) else {
        return;
    };
    let Some(declared) = module.allowed_dependencies() else {
        return;
    };
    for dependency in declared {
        let Some(target) = modules.get_module_by_name(dependency.module.as_str()) else {
            violations.push(format!(
                "Module '{}': allowed dependency '{}' refers to unknown module '{}'",
                module_name, dependency, dependency.module
            ));
            continue;
        };
        if let Some(interface) = &dependency.named_interface {
            if target.named_interface(interface).is_none() {
                let declared_interfaces: Vec<&str> = target
                    .named_interfaces()
                    .iter()
                    .map(|n| n.name.as_str())
                    .collect();
                violations.push(format!(
                    "Module '{}': allowed dependency '{}' refers to a named interface '{}' that module '{}' does not declare; declared interfaces: {}",
                    module_name,
                    dependency,
                    interface,
                    dependency.module,
                    declared_interfaces.join(", ")
                ));
            }
        }
    }
}

/// Rules: no access to non-exposed types, and no bypassing an explicit
/// allow-list.
fn check_access(
    modules: &ApplicationModules,
    dependency: &ModuleDependency,
    violations: &mut Violations,
) {
    let Some(source) = modules.get_module_by_name(dependency.source.as_str()) else {
        return;
    };
    let Some(target) = modules.get_module_by_name(dependency.target.as_str()) else {
        return;
    };

    let shared = modules
        .metadata()
        .shared_modules
        .iter()
        .any(|m| m == dependency.target.as_str());

    for reference in &dependency.references {
        if !target.exposes(&reference.to_type) {
            violations.push(format!(
                "Module '{}' accesses non-exposed type '{}' of module '{}' (referenced from '{}')",
                dependency.source, reference.to_type, dependency.target, reference.from_type
            ));
            continue;
        }

        let Some(declared) = source.allowed_dependencies() else {
            continue;
        };
        if shared {
            continue;
        }

        let whole_module_allowed = declared
            .iter()
            .any(|d| d.module == dependency.target && d.named_interface.is_none());
        if whole_module_allowed {
            continue;
        }

        let exposing: Vec<String> = target
            .interfaces_exposing(&reference.to_type)
            .iter()
            .map(|n| format!("{}::{}", dependency.target, n.name))
            .collect();
        let covered = declared.iter().any(|d| {
            d.module == dependency.target
                && matches!(&d.named_interface, Some(interface)
                    if target.named_interface(interface).is_some_and(|n| n.contains(&reference.to_type)))
        });
        if covered {
            continue;
        }

        let declared_for_target: Vec<String> = declared
            .iter()
            .filter(|d| d.module == dependency.target)
            .map(DeclaredDependency::to_string)
            .collect();
        if declared_for_target.is_empty() {
            let all_declared: Vec<String> =
                declared.iter().map(DeclaredDependency::to_string).collect();
            violations.push(format!(
                "Module '{}' depends on module '{}' (via '{}' -> '{}') which is not listed in its allowed dependencies [{}]",
                dependency.source,
                dependency.target,
                reference.from_type,
                reference.to_type,
                all_declared.join(", ")
            ));
        } else {
            violations.push(format!(
                "Module '{}' references type '{}' of module '{}' (from '{}'): not covered by allowed dependencies [{}]; the type is exposed through [{}]",
                dependency.source,
                reference.to_type,
                dependency.target,
                reference.from_type,
                declared_for_target.join(", "),
                exposing.join(", ")
            ));
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Annotation, StaticTypeProvider, TypeDescriptor, TypeReference};
    use crate::modules::{ApplicationModules, MODULE_ANNOTATION, NAMED_INTERFACE_ANNOTATION};

    #[test]
    fn test_clean_model_verifies() {
        let provider = StaticTypeProvider::new()
            .with_type(
                TypeDescriptor::new("shop.orders.OrderService")
                    .with_reference(TypeReference::type_use("shop.inventory.InventoryService")),
            )
            .with_type(TypeDescriptor::new("shop.inventory.InventoryService"));
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        assert!(modules.verify().is_ok());
        assert!(modules.detect_violations().is_empty());
    }

    #[test]
    fn test_access_to_non_exposed_type_is_reported() {
        let provider = StaticTypeProvider::new()
            .with_type(TypeDescriptor::new("shop.orders.OrderService").with_reference(
                TypeReference::type_use("shop.inventory.internal.StockLedger"),
            ))
            .with_type(TypeDescriptor::new("shop.inventory.InventoryService"))
            .with_type(TypeDescriptor::new("shop.inventory.internal.StockLedger"));
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        let violations = modules.detect_violations();
        assert_eq!(violations.len(), 1);
        let message = &violations.get_messages()[0];
        assert!(message.contains("non-exposed type 'shop.inventory.internal.StockLedger'"));
        assert!(message.contains("'orders'"));
        assert!(message.contains("shop.orders.OrderService"));
    }

    #[test]
    fn test_open_module_permits_internal_access() {
        let provider = StaticTypeProvider::new()
            .with_package_annotation(
                "shop.inventory",
                Annotation::new(MODULE_ANNOTATION).with_param("open", "true"),
            )
            .with_type(TypeDescriptor::new("shop.orders.OrderService").with_reference(
                TypeReference::type_use("shop.inventory.internal.StockLedger"),
            ))
            .with_type(TypeDescriptor::new("shop.inventory.internal.StockLedger"));
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        assert!(modules.verify().is_ok());
    }

    #[test]
    fn test_allow_list_bypass_is_reported() {
        let provider = StaticTypeProvider::new()
            .with_package_annotation(
                "shop.orders",
                Annotation::new(MODULE_ANNOTATION).with_param("allowedDependencies", "billing"),
            )
            .with_type(
                TypeDescriptor::new("shop.orders.OrderService")
                    .with_reference(TypeReference::type_use("shop.inventory.InventoryService")),
            )
            .with_type(TypeDescriptor::new("shop.inventory.InventoryService"))
            .with_type(TypeDescriptor::new("shop.billing.BillingService"));
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        let violations = modules.detect_violations();
        assert_eq!(violations.len(), 1);
        let message = &violations.get_messages()[0];
        assert!(message.contains("not listed in its allowed dependencies"));
        assert!(message.contains("[billing]"));
    }

    #[test]
    fn test_empty_allow_list_forbids_everything() {
        let provider = StaticTypeProvider::new()
            .with_package_annotation(
                "shop.orders",
                Annotation::new(MODULE_ANNOTATION).with_param("allowedDependencies", ""),
            )
            .with_type(
                TypeDescriptor::new("shop.orders.OrderService")
                    .with_reference(TypeReference::type_use("shop.inventory.InventoryService")),
            )
            .with_type(TypeDescriptor::new("shop.inventory.InventoryService"));
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        assert_eq!(modules.detect_violations().len(), 1);
    }

    #[test]
    fn test_named_interface_mismatch_lists_exposing_interfaces() {
        // Module orders whitelists billing::API but touches a type that
        // only billing::SPI exposes.
        let provider = StaticTypeProvider::new()
            .with_package_annotation(
                "shop.orders",
                Annotation::new(MODULE_ANNOTATION)
                    .with_param("allowedDependencies", "billing::API"),
            )
            .with_type(
                TypeDescriptor::new("shop.orders.OrderService")
                    .with_reference(TypeReference::type_use("shop.billing.PaymentGateway")),
            )
            .with_type(
                TypeDescriptor::new("shop.billing.BillingService").with_annotation(
                    Annotation::new(NAMED_INTERFACE_ANNOTATION).with_param("value", "API"),
                ),
            )
            .with_type(
                TypeDescriptor::new("shop.billing.PaymentGateway").with_annotation(
                    Annotation::new(NAMED_INTERFACE_ANNOTATION).with_param("value", "SPI"),
                ),
            );
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        let violations = modules.detect_violations();
        assert_eq!(violations.len(), 1);
        let message = &violations.get_messages()[0];
        assert!(message.contains("'orders'"));
        assert!(message.contains("billing::API"));
        assert!(message.contains("shop.orders.OrderService"));
        assert!(message.contains("billing::SPI"));
    }

    #[test]
    fn test_whitelisted_interface_access_passes() {
        let provider = StaticTypeProvider::new()
            .with_package_annotation(
                "shop.orders",
                Annotation::new(MODULE_ANNOTATION)
                    .with_param("allowedDependencies", "billing::API"),
            )
            .with_type(
                TypeDescriptor::new("shop.orders.OrderService")
                    .with_reference(TypeReference::type_use("shop.billing.BillingService")),
            )
            .with_type(
                TypeDescriptor::new("shop.billing.BillingService").with_annotation(
                    Annotation::new(NAMED_INTERFACE_ANNOTATION).with_param("value", "API"),
                ),
            );
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        assert!(modules.verify().is_ok());
    }

    #[test]
    fn test_declared_unknown_interface_enumerates_targets() {
        let provider = StaticTypeProvider::new()
            .with_package_annotation(
                "shop.orders",
                Annotation::new(MODULE_ANNOTATION)
                    .with_param("allowedDependencies", "billing::Nope"),
            )
            .with_type(TypeDescriptor::new("shop.orders.OrderService"))
            .with_type(
                TypeDescriptor::new("shop.billing.BillingService").with_annotation(
                    Annotation::new(NAMED_INTERFACE_ANNOTATION).with_param("value", "API"),
                ),
            );
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        let violations = modules.detect_violations();
        assert_eq!(violations.len(), 1);
        let message = &violations.get_messages()[0];
        assert!(message.contains("billing::Nope"));
        assert!(message.contains("does not declare"));
        assert!(message.contains("unnamed"));
        assert!(message.contains("API"));
    }

    #[test]
    fn test_field_injection_names_the_field() {
        let provider = StaticTypeProvider::new()
            .with_type(
                TypeDescriptor::new("shop.orders.OrderService").with_reference(
                    TypeReference::type_use("shop.inventory.InventoryService")
                        .with_kind(crate::catalog::ReferenceKind::FieldInjection)
                        .non_public()
                        .on_member("inventory"),
                ),
            )
            .with_type(TypeDescriptor::new("shop.inventory.InventoryService"));
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        let violations = modules.detect_violations();
        assert!(violations
            .get_messages()
            .iter()
            .any(|m| m.contains("field injection")
                && m.contains("shop.orders.OrderService.inventory")));
    }

    #[test]
    fn test_cycle_reported_once() {
        let provider = StaticTypeProvider::new()
            .with_type(
                TypeDescriptor::new("shop.a.ServiceA")
                    .with_reference(TypeReference::type_use("shop.b.ServiceB")),
            )
            .with_type(
                TypeDescriptor::new("shop.b.ServiceB")
                    .with_reference(TypeReference::type_use("shop.a.ServiceA")),
            );
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        let violations = modules.detect_violations();
        let cycle_messages: Vec<&String> = violations
            .get_messages()
            .iter()
            .filter(|m| m.contains("Cycle detected"))
            .collect();
        assert_eq!(cycle_messages.len(), 1);
        assert!(cycle_messages[0].contains("a, b"));
    }

    #[test]
    fn test_listener_only_cycle_not_reported() {
        let provider = StaticTypeProvider::new()
            .with_type(
                TypeDescriptor::new("shop.a.ListenerA").with_reference(
                    TypeReference::type_use("shop.b.EventB")
                        .with_kind(crate::catalog::ReferenceKind::EventListener),
                ),
            )
            .with_type(
                TypeDescriptor::new("shop.b.ListenerB").with_reference(
                    TypeReference::type_use("shop.a.EventA")
                        .with_kind(crate::catalog::ReferenceKind::EventListener),
                ),
            )
            .with_type(TypeDescriptor::new("shop.a.EventA"))
            .with_type(TypeDescriptor::new("shop.b.EventB"));
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        assert!(modules
            .detect_violations()
            .get_messages()
            .iter()
            .all(|m| !m.contains("Cycle detected")));
    }

    #[test]
    fn test_shared_modules_bypass_allow_list() {
        let provider = StaticTypeProvider::new()
            .with_package_annotation(
                "shop",
                Annotation::new(crate::modules::APPLICATION_ANNOTATION)
                    .with_param("sharedModules", "util"),
            )
            .with_package_annotation(
                "shop.orders",
                Annotation::new(MODULE_ANNOTATION).with_param("allowedDependencies", "billing"),
            )
            .with_type(
                TypeDescriptor::new("shop.orders.OrderService")
                    .with_reference(TypeReference::type_use("shop.util.Strings")),
            )
            .with_type(TypeDescriptor::new("shop.util.Strings"))
            .with_type(TypeDescriptor::new("shop.billing.BillingService"));
        let modules = ApplicationModules::of(&provider, "shop").unwrap();
        assert!(modules.verify().is_ok());
    }

    #[test]
    fn test_verification_is_stable_across_runs() {
        let provider = StaticTypeProvider::new()
            .with_type(TypeDescriptor::new("shop.orders.OrderService").with_reference(
                TypeReference::type_use("shop.inventory.internal.StockLedger"),
            ))
            .with_type(TypeDescriptor::new("shop.inventory.internal.StockLedger"));
        let first = ApplicationModules::of(&provider, "shop")
            .unwrap()
            .detect_violations();
        let second = ApplicationModules::of(&provider, "shop")
            .unwrap()
            .detect_violations();
        assert_eq!(first, second);
    }

    #[test]
    fn test_violations_display_lists_messages() {
        let mut violations = Violations::default();
        violations.push("first".to_string());
        violations.push("second".to_string());
        violations.push("first".to_string());
        assert_eq!(violations.len(), 2);
        let rendered = violations.to_string();
        assert!(rendered.contains("2 architectural violation(s)"));
        assert!(rendered.contains("- first"));
        assert!(rendered.contains("- second"));
    }
}
