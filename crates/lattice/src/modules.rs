// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Application module model
//!
//! Derives modules from the type catalog: base packages per the configured
//! detection strategy, named interfaces, allowed dependencies, typed
//! dependency edges, and a type-to-module index for O(1) ownership lookup.
//!
//! The model is computed once and immutable thereafter; the verifier and
//! the event multicaster consume it by reference.

use crate::catalog::{
    Annotation, ReferenceKind, TypeCatalog, TypeProvider, PACKAGE_SEPARATOR,
};
use crate::error::{Error, Result};
use crate::ids::{ApplicationModuleIdentifier, TARGET_SEPARATOR};
use crate::verifier::{self, Violations};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Annotation carrying system-level metadata, looked up on the root
/// package.
pub const APPLICATION_ANNOTATION: &str = "Application";
/// Annotation declaring a package as a module and carrying its metadata.
pub const MODULE_ANNOTATION: &str = "Module";
/// Annotation declaring a named interface on a package or a type.
pub const NAMED_INTERFACE_ANNOTATION: &str = "NamedInterface";

/// Name of the implicit named interface collecting a module's top-level
/// types.
pub const UNNAMED_INTERFACE: &str = "unnamed";

/// System-level metadata parsed from the root package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemMetadata {
    /// Human-readable system name.
    pub system_name: Option<String>,
    /// Extra root packages scanned in addition to the primary root.
    pub additional_packages: Vec<String>,
    /// Modules every other module may depend on without declaring them.
    pub shared_modules: Vec<String>,
    /// Whether module identifiers use the full package name instead of
    /// the local package name.
    pub use_fully_qualified_names: bool,
}

impl SystemMetadata {
    fn from_annotation(annotation: Option<&Annotation>) -> Self {
        let Some(annotation) = annotation else {
            return Self::default();
        };
        Self {
            system_name: annotation.param("systemName").map(str::to_string),
            additional_packages: parse_list(annotation.param("additionalPackages")),
            shared_modules: parse_list(annotation.param("sharedModules")),
            use_fully_qualified_names: annotation.param("useFullyQualifiedNames")
                == Some("true"),
        }
    }
}

fn parse_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Strategy deciding which packages under a root form modules.
pub trait ModuleDetectionStrategy: Send + Sync {
    /// Base packages of detected modules, in any order; the model sorts
    /// them lexicographically for determinism.
    fn module_base_packages(&self, catalog: &TypeCatalog, root: &str) -> Vec<String>;
}

/// Every direct sub-package of a root becomes a module.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectSubPackagesStrategy;

impl ModuleDetectionStrategy for DirectSubPackagesStrategy {
    fn module_base_packages(&self, catalog: &TypeCatalog, root: &str) -> Vec<String> {
        catalog
            .sub_packages(root)
            .into_iter()
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Only packages carrying the module annotation become modules, at any
/// nesting depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitlyAnnotatedStrategy;

impl ModuleDetectionStrategy for ExplicitlyAnnotatedStrategy {
    fn module_base_packages(&self, catalog: &TypeCatalog, root: &str) -> Vec<String> {
        catalog
            .packages(root)
            .into_iter()
            .filter(|p| p.name != root)
            .filter(|p| {
                catalog
                    .package_level_annotations(&p.name)
                    .iter()
                    .any(|a| a.name == MODULE_ANNOTATION)
            })
            .map(|p| p.name.clone())
            .collect()
    }
}

/// One declared allowed dependency: a module, optionally narrowed to a
/// named interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeclaredDependency {
    /// The module that may be depended upon.
    pub module: ApplicationModuleIdentifier,
    /// The whitelisted named interface; `None` whitelists the whole
    /// module.
    pub named_interface: Option<String>,
}

impl DeclaredDependency {
    /// Parses `module` or `module::namedInterface`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once(TARGET_SEPARATOR) {
            Some((module, interface)) => Ok(Self {
                module: ApplicationModuleIdentifier::of(module)?,
                named_interface: Some(interface.trim().to_string()),
            }),
            None => Ok(Self {
                module: ApplicationModuleIdentifier::of(value)?,
                named_interface: None,
            }),
        }
    }
}

impl fmt::Display for DeclaredDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.named_interface {
            Some(interface) => write!(f, "{}{}{}", self.module, TARGET_SEPARATOR, interface),
            None => write!(f, "{}", self.module),
        }
    }
}

/// A named subset of a module's types designated as API surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedInterface {
    /// Interface name; `unnamed` for the implicit default.
    pub name: String,
    /// Fully qualified names of member types, in catalog order.
    pub types: Vec<String>,
}

impl NamedInterface {
    /// Whether the interface contains the given type.
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.iter().any(|t| t == type_name)
    }

    /// Whether this is the implicit default interface.
    pub fn is_unnamed(&self) -> bool {
        self.name == UNNAMED_INTERFACE
    }
}

/// How one module depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependencyType {
    /// Plain type reference.
    Default,
    /// Component injection.
    UsesComponent,
    /// Listens to the other module's events.
    EventListener,
    /// References a typed configuration record.
    ConfigurationProperties,
}

impl DependencyType {
    fn from_reference(kind: ReferenceKind) -> Self {
        match kind {
            ReferenceKind::ComponentInjection => Self::UsesComponent,
            ReferenceKind::EventListener => Self::EventListener,
            ReferenceKind::ConfigurationProperties => Self::ConfigurationProperties,
            ReferenceKind::TypeUse | ReferenceKind::FieldInjection => Self::Default,
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = match self {
            Self::Default => "DEFAULT",
            Self::UsesComponent => "USES_COMPONENT",
            Self::EventListener => "EVENT_LISTENER",
            Self::ConfigurationProperties => "CONFIGURATION_PROPERTIES",
        };
        f.write_str(rendered)
    }
}

/// One observed cross-module type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedReference {
    /// Referencing type.
    pub from_type: String,
    /// Referenced type in the target module.
    pub to_type: String,
    /// How the reference was made.
    pub kind: ReferenceKind,
    /// Member carrying the reference, when known.
    pub member: Option<String>,
}

/// Aggregated dependency edge between two modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDependency {
    /// Depending module.
    pub source: ApplicationModuleIdentifier,
    /// Depended-upon module.
    pub target: ApplicationModuleIdentifier,
    /// Dependency types observed on this edge. `Default` is dropped when
    /// any other type is present.
    pub types: Vec<DependencyType>,
    /// The individual references backing the edge.
    pub references: Vec<ObservedReference>,
}

impl ModuleDependency {
    /// Whether the edge carries anything besides listener coupling.
    pub fn is_structural(&self) -> bool {
        self.types.iter().any(|t| *t != DependencyType::EventListener)
    }
}

/// One derived application module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationModule {
    identifier: ApplicationModuleIdentifier,
    display_name: String,
    base_package: String,
    additional_packages: Vec<String>,
    open: bool,
    allowed_dependencies: Option<Vec<DeclaredDependency>>,
    named_interfaces: Vec<NamedInterface>,
    classes: Vec<String>,
}

impl ApplicationModule {
    /// The module identifier.
    pub fn identifier(&self) -> &ApplicationModuleIdentifier {
        &self.identifier
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The module's base package.
    pub fn base_package(&self) -> &str {
        &self.base_package
    }

    /// Explicitly declared additional packages.
    pub fn additional_packages(&self) -> &[String] {
        &self.additional_packages
    }

    /// Whether the module exposes all of its types.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Declared allowed dependencies. `None` means any module may be
    /// depended upon; an empty list forbids outbound dependencies.
    pub fn allowed_dependencies(&self) -> Option<&[DeclaredDependency]> {
        self.allowed_dependencies.as_deref()
    }

    /// All named interfaces, the implicit `unnamed` one first.
    pub fn named_interfaces(&self) -> &[NamedInterface] {
        &self.named_interfaces
    }

    /// Looks up a named interface.
    pub fn named_interface(&self, name: &str) -> Option<&NamedInterface> {
        self.named_interfaces.iter().find(|n| n.name == name)
    }

    /// All types owned by the module, in catalog order.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Whether the module owns the given type.
    pub fn contains_type(&self, type_name: &str) -> bool {
        self.classes.iter().any(|c| c == type_name)
    }

    /// Whether the module owns the given package.
    pub fn contains_package(&self, package: &str) -> bool {
        package_within(package, &self.base_package)
            || self
                .additional_packages
                .iter()
                .any(|p| package_within(package, p))
    }

    /// Whether the given type is visible to other modules: open modules
    /// expose everything, otherwise the type must belong to a named
    /// interface.
    pub fn exposes(&self, type_name: &str) -> bool {
        self.open || self.named_interfaces.iter().any(|n| n.contains(type_name))
    }

    /// The named interfaces exposing the given type.
    pub fn interfaces_exposing(&self, type_name: &str) -> Vec<&NamedInterface> {
        self.named_interfaces
            .iter()
            .filter(|n| n.contains(type_name))
            .collect()
    }
}

impl fmt::Display for ApplicationModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Module '{}' ({})", self.identifier, self.display_name)?;
        writeln!(f, "  base package: {}", self.base_package)?;
        match &self.allowed_dependencies {
            Some(deps) if deps.is_empty() => writeln!(f, "  allowed dependencies: none")?,
            Some(deps) => {
                let rendered: Vec<String> = deps.iter().map(ToString::to_string).collect();
                writeln!(f, "  allowed dependencies: {}", rendered.join(", "))?;
            }
            None => writeln!(f, "  allowed dependencies: unrestricted")?,
        }
        for interface in &self.named_interfaces {
            writeln!(
                f,
                "  interface '{}': {}",
                interface.name,
                interface.types.join(", ")
            )?;
        }
        Ok(())
    }
}

fn package_within(package: &str, base: &str) -> bool {
    package == base
        || (package.starts_with(base)
            && package[base.len()..].starts_with(PACKAGE_SEPARATOR))
}

/// JSON export verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportVerbosity {
    /// Omits named interfaces.
    Simple,
    /// Includes named interfaces.
    Full,
}

/// Builder for [`ApplicationModules`].
pub struct ApplicationModulesBuilder<'p> {
    provider: &'p dyn TypeProvider,
    root: String,
    strategy: Arc<dyn ModuleDetectionStrategy>,
    exclusions: Vec<String>,
}

impl<'p> ApplicationModulesBuilder<'p> {
    /// Selects the module detection strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn ModuleDetectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Excludes types whose fully qualified name starts with any of the
    /// given prefixes.
    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }

    /// Derives the module model.
    pub fn build(self) -> Result<ApplicationModules> {
        ApplicationModules::derive(
            self.provider,
            &self.root,
            self.strategy.as_ref(),
            &self.exclusions,
        )
    }
}

/// Ordered, immutable collection of derived application modules.
#[derive(Debug)]
pub struct ApplicationModules {
    catalog: TypeCatalog,
    metadata: SystemMetadata,
    modules: Vec<ApplicationModule>,
    by_identifier: HashMap<ApplicationModuleIdentifier, usize>,
    type_to_module: HashMap<String, usize>,
    dependencies: Vec<ModuleDependency>,
}

impl ApplicationModules {
    /// Derives the model for a root package with the default detection
    /// strategy (direct sub-packages).
    pub fn of(provider: &dyn TypeProvider, root: &str) -> Result<Self> {
        Self::builder(provider, root).build()
    }

    /// Starts a builder for custom detection or exclusions.
    pub fn builder<'p>(provider: &'p dyn TypeProvider, root: &str) -> ApplicationModulesBuilder<'p> {
        ApplicationModulesBuilder {
            provider,
            root: root.to_string(),
            strategy: Arc::new(DirectSubPackagesStrategy),
            exclusions: Vec::new(),
        }
    }

    fn derive(
        provider: &dyn TypeProvider,
        root: &str,
        strategy: &dyn ModuleDetectionStrategy,
        exclusions: &[String],
    ) -> Result<Self> {
        let bootstrap = TypeCatalog::build(provider, &[root])?;
        let metadata = SystemMetadata::from_annotation(
            bootstrap
                .find_annotation(root, APPLICATION_ANNOTATION)?
                .as_ref(),
        );

        let mut roots: Vec<&str> = vec![root];
        for additional in &metadata.additional_packages {
            roots.push(additional.as_str());
        }
        let catalog = TypeCatalog::build(provider, &roots)?;

        let mut base_packages: Vec<String> = Vec::new();
        for scan_root in &roots {
            base_packages.extend(strategy.module_base_packages(&catalog, scan_root));
        }
        base_packages.sort_unstable();
        base_packages.dedup();

        let mut modules = Vec::new();
        let mut by_identifier: HashMap<ApplicationModuleIdentifier, usize> = HashMap::new();
        for base_package in &base_packages {
            let module = Self::derive_module(
                &catalog,
                &metadata,
                base_package,
                &base_packages,
                exclusions,
            )?;
            let index = modules.len();
            if by_identifier
                .insert(module.identifier.clone(), index)
                .is_some()
            {
                return Err(Error::Configuration(format!(
                    "duplicate module identifier '{}'; use fully qualified names to disambiguate",
                    module.identifier
                )));
            }
            modules.push(module);
        }

        let mut type_to_module = HashMap::new();
        for (index, module) in modules.iter().enumerate() {
            for class in &module.classes {
                type_to_module.insert(class.clone(), index);
            }
        }

        Self::check_declared_dependencies(&modules, &by_identifier)?;

        let dependencies = Self::derive_dependencies(&catalog, &modules, &type_to_module);

        Ok(Self {
            catalog,
            metadata,
            modules,
            by_identifier,
            type_to_module,
            dependencies,
        })
    }

    fn derive_module(
        catalog: &TypeCatalog,
        metadata: &SystemMetadata,
        base_package: &str,
        all_base_packages: &[String],
        exclusions: &[String],
    ) -> Result<ApplicationModule> {
        let local_name = base_package
            .rsplit(PACKAGE_SEPARATOR)
            .next()
            .unwrap_or(base_package);
        let identifier = if metadata.use_fully_qualified_names {
            ApplicationModuleIdentifier::of(base_package.replace(PACKAGE_SEPARATOR, "-"))?
        } else {
            ApplicationModuleIdentifier::of(local_name)?
        };

        let annotation = catalog.find_annotation(base_package, MODULE_ANNOTATION)?;
        let display_name = annotation
            .as_ref()
            .and_then(|a| a.param("displayName"))
            .map(str::to_string)
            .unwrap_or_else(|| capitalize(local_name));
        let open = annotation.as_ref().and_then(|a| a.param("open")) == Some("true");
        let additional_packages = annotation
            .as_ref()
            .map(|a| parse_list(a.param("additionalPackages")))
            .unwrap_or_default();
        let allowed_dependencies = match annotation
            .as_ref()
            .and_then(|a| a.param("allowedDependencies"))
        {
            Some(raw) => Some(
                parse_list(Some(raw))
                    .iter()
                    .map(|item| DeclaredDependency::parse(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        // Module packages: the base package plus nested packages that do
        // not themselves qualify as a distinct module, plus declared
        // additional packages.
        let mut packages: Vec<String> = vec![base_package.to_string()];
        for package in catalog.packages(base_package) {
            if package.name == base_package {
                continue;
            }
            let nested_module = all_base_packages
                .iter()
                .any(|other| other != base_package && package_within(&package.name, other));
            if !nested_module {
                packages.push(package.name.clone());
            }
        }
        packages.extend(additional_packages.iter().cloned());

        let excluded = |name: &str| exclusions.iter().any(|prefix| name.starts_with(prefix));
        let mut classes = Vec::new();
        for package in &packages {
            for descriptor in catalog.types_in(package) {
                if !excluded(&descriptor.name) {
                    classes.push(descriptor.name.clone());
                }
            }
        }

        let named_interfaces =
            Self::derive_named_interfaces(catalog, base_package, &packages, &classes)?;

        Ok(ApplicationModule {
            identifier,
            display_name,
            base_package: base_package.to_string(),
            additional_packages,
            open,
            allowed_dependencies,
            named_interfaces,
            classes,
        })
    }

    fn derive_named_interfaces(
        catalog: &TypeCatalog,
        base_package: &str,
        packages: &[String],
        classes: &[String],
    ) -> Result<Vec<NamedInterface>> {
        let mut interfaces: Vec<NamedInterface> = Vec::new();

        // The implicit default interface collects the base package's
        // top-level types.
        let unnamed: Vec<String> = catalog
            .types_in(base_package)
            .iter()
            .filter(|t| classes.contains(&t.name))
            .map(|t| t.name.clone())
            .collect();
        interfaces.push(NamedInterface {
            name: UNNAMED_INTERFACE.to_string(),
            types: unnamed,
        });

        let add_member = |interfaces: &mut Vec<NamedInterface>, name: &str, type_name: &str| {
            match interfaces.iter_mut().find(|i| i.name == name) {
                Some(interface) => {
                    if !interface.contains(type_name) {
                        interface.types.push(type_name.to_string());
                    }
                }
                None => interfaces.push(NamedInterface {
                    name: name.to_string(),
                    types: vec![type_name.to_string()],
                }),
            }
        };

        // Package-level declarations pull in every type of the package.
        for package in packages {
            let declared = catalog
                .package_level_annotations(package)
                .iter()
                .find(|a| a.name == NAMED_INTERFACE_ANNOTATION)
                .cloned();
            if let Some(annotation) = declared {
                let fallback = package
                    .rsplit(PACKAGE_SEPARATOR)
                    .next()
                    .unwrap_or(package)
                    .to_string();
                let names = match annotation.value() {
                    Some(value) => parse_list(Some(value)),
                    None => vec![fallback],
                };
                for name in names {
                    for descriptor in catalog.types_in(package) {
                        if classes.contains(&descriptor.name) {
                            add_member(&mut interfaces, &name, &descriptor.name);
                        }
                    }
                }
            }
        }

        // Type-level declarations; multiple names per type are allowed.
        for class in classes {
            let Some(descriptor) = catalog.type_named(class) else {
                continue;
            };
            if let Some(annotation) = descriptor.annotation(NAMED_INTERFACE_ANNOTATION) {
                let names = match annotation.value() {
                    Some(value) => parse_list(Some(value)),
                    None => {
                        return Err(Error::Configuration(format!(
                            "named interface on type '{}' must declare a name",
                            class
                        )))
                    }
                };
                for name in names {
                    add_member(&mut interfaces, &name, class);
                }
            }
        }

        Ok(interfaces)
    }

    fn check_declared_dependencies(
        modules: &[ApplicationModule],
        by_identifier: &HashMap<ApplicationModuleIdentifier, usize>,
    ) -> Result<()> {
        // Cycles among declared allowed dependencies are configuration
        // errors: the declarations describe a layering that must be a DAG.
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..modules.len()).map(|i| graph.add_node(i)).collect();
        for (index, module) in modules.iter().enumerate() {
            if let Some(declared) = &module.allowed_dependencies {
                for dependency in declared {
                    if let Some(&target) = by_identifier.get(&dependency.module) {
                        graph.add_edge(nodes[index], nodes[target], ());
                    }
                }
            }
        }
        for component in tarjan_scc(&graph) {
            if component.len() > 1 {
                let members: Vec<String> = component
                    .iter()
                    .map(|n| modules[graph[*n]].identifier.to_string())
                    .collect();
                return Err(Error::Configuration(format!(
                    "cyclic allowed-dependencies declaration between modules: {}",
                    members.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn derive_dependencies(
        catalog: &TypeCatalog,
        modules: &[ApplicationModule],
        type_to_module: &HashMap<String, usize>,
    ) -> Vec<ModuleDependency> {
        let mut edges: Vec<ModuleDependency> = Vec::new();
        for (source_index, module) in modules.iter().enumerate() {
            for class in &module.classes {
                let Some(descriptor) = catalog.type_named(class) else {
                    continue;
                };
                for reference in &descriptor.references {
                    let Some(&target_index) = type_to_module.get(&reference.target) else {
                        continue;
                    };
                    if target_index == source_index {
                        continue;
                    }
                    let source = module.identifier.clone();
                    let target = modules[target_index].identifier.clone();
                    let dependency_type = DependencyType::from_reference(reference.kind);
                    let observed = ObservedReference {
                        from_type: class.clone(),
                        to_type: reference.target.clone(),
                        kind: reference.kind,
                        member: reference.member.clone(),
                    };
                    match edges
                        .iter_mut()
                        .find(|e| e.source == source && e.target == target)
                    {
                        Some(edge) => {
                            if !edge.types.contains(&dependency_type) {
                                edge.types.push(dependency_type);
                            }
                            edge.references.push(observed);
                        }
                        None => edges.push(ModuleDependency {
                            source,
                            target,
                            types: vec![dependency_type],
                            references: vec![observed],
                        }),
                    }
                }
            }
        }

        // DEFAULT is subsumed by any more specific dependency type.
        for edge in &mut edges {
            if edge.types.len() > 1 {
                edge.types.retain(|t| *t != DependencyType::Default);
            }
            edge.types.sort_unstable();
        }
        edges
    }

    /// The underlying type catalog.
    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// System-level metadata.
    pub fn metadata(&self) -> &SystemMetadata {
        &self.metadata
    }

    /// All modules, in detection order.
    pub fn modules(&self) -> &[ApplicationModule] {
        &self.modules
    }

    /// Iterates the modules in detection order.
    pub fn iter(&self) -> impl Iterator<Item = &ApplicationModule> {
        self.modules.iter()
    }

    /// Aggregated dependency edges.
    pub fn dependencies(&self) -> &[ModuleDependency] {
        &self.dependencies
    }

    /// Looks up a module by identifier.
    pub fn get_module_by_name(&self, name: &str) -> Option<&ApplicationModule> {
        let identifier = ApplicationModuleIdentifier::of(name).ok()?;
        self.by_identifier
            .get(&identifier)
            .map(|&index| &self.modules[index])
    }

    /// Looks up the module owning a type.
    pub fn get_module_by_type(&self, type_name: &str) -> Option<&ApplicationModule> {
        self.type_to_module
            .get(type_name)
            .map(|&index| &self.modules[index])
    }

    /// Looks up the module owning a package.
    pub fn get_module_for_package(&self, package: &str) -> Option<&ApplicationModule> {
        self.modules
            .iter()
            .filter(|m| m.contains_package(package))
            .max_by_key(|m| m.base_package.len())
    }

    /// Strongly connected components of the structural dependency graph.
    ///
    /// Listener edges are ignored: events decouple modules. Components
    /// with more than one member are cycles.
    pub fn structural_cycles(&self) -> Vec<Vec<ApplicationModuleIdentifier>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> =
            (0..self.modules.len()).map(|i| graph.add_node(i)).collect();
        for edge in &self.dependencies {
            if !edge.is_structural() {
                continue;
            }
            let (Some(&source), Some(&target)) = (
                self.by_identifier.get(&edge.source),
                self.by_identifier.get(&edge.target),
            ) else {
                continue;
            };
            graph.add_edge(nodes[source], nodes[target], ());
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut members: Vec<ApplicationModuleIdentifier> = component
                    .iter()
                    .map(|n| self.modules[graph[*n]].identifier.clone())
                    .collect();
                members.sort();
                members
            })
            .collect()
    }

    /// Evaluates the architectural rules.
    pub fn detect_violations(&self) -> Violations {
        verifier::verify(self)
    }

    /// Evaluates the architectural rules, failing on the first report.
    ///
    /// # Errors
    /// Returns the collected [`Violations`] when any rule is broken.
    pub fn verify(&self) -> std::result::Result<(), Violations> {
        let violations = self.detect_violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Renders the module graph as JSON. Top-level keys preserve module
    /// insertion order; the full form includes named interfaces.
    pub fn to_json(&self, verbosity: ExportVerbosity) -> Value {
        let mut root = Map::new();
        for module in &self.modules {
            let mut entry = Map::new();
            entry.insert(
                "displayName".to_string(),
                Value::String(module.display_name.clone()),
            );
            entry.insert(
                "basePackage".to_string(),
                Value::String(module.base_package.clone()),
            );

            if verbosity == ExportVerbosity::Full {
                let mut interfaces = Map::new();
                for interface in &module.named_interfaces {
                    interfaces.insert(
                        interface.name.clone(),
                        json!(interface.types),
                    );
                }
                entry.insert("namedInterfaces".to_string(), Value::Object(interfaces));
            }

            let dependencies: Vec<Value> = self
                .dependencies
                .iter()
                .filter(|d| d.source == module.identifier)
                .map(|d| {
                    json!({
                        "target": d.target.to_string(),
                        "types": d.types.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    })
                })
                .collect();
            entry.insert("dependencies".to_string(), Value::Array(dependencies));

            root.insert(module.identifier.to_string(), Value::Object(entry));
        }
        Value::Object(root)
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
