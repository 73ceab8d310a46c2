// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Type and package index
//!
//! One-shot ingestion of compiled-artifact metadata into an immutable
//! in-memory catalog. A [`TypeProvider`] supplies [`TypeDescriptor`]s;
//! the [`TypeCatalog`] computes the package tree, reverse indexes, and
//! annotation lookups that the module model consumes by reference.
//!
//! Generated artifacts (proxy classes matching `*$$*Proxy*`, names
//! containing `__`) are filtered out so ahead-of-time stubs never show up
//! as module members.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Package separator in fully qualified type names.
pub const PACKAGE_SEPARATOR: char = '.';

/// Where a type reference was observed in the referencing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// Plain type use (signature, local, extends).
    TypeUse,
    /// Constructor or setter injection of a managed component.
    ComponentInjection,
    /// Field injection into a managed component. Flagged by the verifier.
    FieldInjection,
    /// Parameter of an event listener method.
    EventListener,
    /// Reference to a typed configuration record.
    ConfigurationProperties,
}

/// A reference from one type to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeReference {
    /// Fully qualified name of the referenced type.
    pub target: String,
    /// How the reference was made.
    pub kind: ReferenceKind,
    /// Whether the reference sits on the public surface (public
    /// constructors, public method parameters and return types).
    pub public_surface: bool,
    /// Member carrying the reference, for diagnostics (field or method
    /// name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
}

impl TypeReference {
    /// A plain public-surface type use.
    pub fn type_use(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: ReferenceKind::TypeUse,
            public_surface: true,
            member: None,
        }
    }

    /// Sets the reference kind.
    pub fn with_kind(mut self, kind: ReferenceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the reference as not part of the public surface.
    pub fn non_public(mut self) -> Self {
        self.public_surface = false;
        self
    }

    /// Names the member carrying the reference.
    pub fn on_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }
}

/// A marker annotation with optional parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Simple annotation name, e.g. `Module` or `NamedInterface`.
    pub name: String,
    /// Parameter map; the conventional single value uses the key `value`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Annotation {
    /// Creates a parameterless annotation.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The conventional `value` parameter.
    pub fn value(&self) -> Option<&str> {
        self.param("value")
    }

    /// Looks up a parameter by name.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Metadata for one type in the compiled artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Fully qualified type name.
    pub name: String,
    /// Annotations present on the type.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// References this type makes to other types.
    #[serde(default)]
    pub references: Vec<TypeReference>,
    /// Declared source order within its compilation unit, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_order: Option<u32>,
}

impl TypeDescriptor {
    /// Creates a descriptor for the given fully qualified name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: Vec::new(),
            references: Vec::new(),
            source_order: None,
        }
    }

    /// Adds an annotation.
    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Adds a reference.
    pub fn with_reference(mut self, reference: TypeReference) -> Self {
        self.references.push(reference);
        self
    }

    /// Sets the declared source order.
    pub fn with_source_order(mut self, order: u32) -> Self {
        self.source_order = Some(order);
        self
    }

    /// The package this type resides in.
    pub fn package(&self) -> &str {
        match self.name.rfind(PACKAGE_SEPARATOR) {
            Some(index) => &self.name[..index],
            None => "",
        }
    }

    /// The simple (unqualified) type name.
    pub fn simple_name(&self) -> &str {
        match self.name.rfind(PACKAGE_SEPARATOR) {
            Some(index) => &self.name[index + 1..],
            None => &self.name,
        }
    }

    /// Finds an annotation by name.
    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }

    /// Whether the type carries the named annotation.
    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotation(name).is_some()
    }
}

/// Supplies type metadata for catalog construction.
///
/// Implementations adapt whatever artifact format is at hand (compiled
/// class metadata, a source-derived index, a test fixture).
pub trait TypeProvider: Send + Sync {
    /// All types residing under the given root package, package
    /// descriptors included.
    fn types_under(&self, root: &str) -> Vec<TypeDescriptor>;

    /// Annotations declared on the package itself (the `package-info`
    /// style descriptor), if any.
    fn package_annotations(&self, package: &str) -> Vec<Annotation>;
}

/// In-memory [`TypeProvider`], assembled programmatically.
#[derive(Debug, Clone, Default)]
pub struct StaticTypeProvider {
    types: Vec<TypeDescriptor>,
    package_annotations: HashMap<String, Vec<Annotation>>,
}

impl StaticTypeProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type descriptor.
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    /// Declares annotations on a package descriptor.
    pub fn with_package_annotation(
        mut self,
        package: impl Into<String>,
        annotation: Annotation,
    ) -> Self {
        self.package_annotations
            .entry(package.into())
            .or_default()
            .push(annotation);
        self
    }
}

impl TypeProvider for StaticTypeProvider {
    fn types_under(&self, root: &str) -> Vec<TypeDescriptor> {
        self.types
            .iter()
            .filter(|t| package_is_or_is_under(t.package(), root))
            .cloned()
            .collect()
    }

    fn package_annotations(&self, package: &str) -> Vec<Annotation> {
        self.package_annotations
            .get(package)
            .cloned()
            .unwrap_or_default()
    }
}

fn package_is_or_is_under(package: &str, root: &str) -> bool {
    package == root
        || (package.starts_with(root)
            && package[root.len()..].starts_with(PACKAGE_SEPARATOR))
}

/// Whether a type name denotes a generated artifact to be skipped.
///
/// Matches proxy classes (`*$$*Proxy*`) and ahead-of-time stubs whose
/// simple name contains `__`.
pub fn is_generated_artifact(name: &str) -> bool {
    if let Some(index) = name.find("$$") {
        if name[index..].contains("Proxy") {
            return true;
        }
    }
    let simple = match name.rfind(PACKAGE_SEPARATOR) {
        Some(index) => &name[index + 1..],
        None => name,
    };
    simple.contains("__")
}

/// A package known to the catalog, with its tree relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Fully qualified package name.
    pub name: String,
    /// Direct parent package, when inside the scanned roots.
    pub parent: Option<String>,
    /// Direct sub-packages, lexicographically ordered.
    pub children: Vec<String>,
}

impl PackageInfo {
    /// The last segment of the package name.
    pub fn local_name(&self) -> &str {
        match self.name.rfind(PACKAGE_SEPARATOR) {
            Some(index) => &self.name[index + 1..],
            None => &self.name,
        }
    }
}

/// Immutable index over types and packages.
///
/// Built once from a [`TypeProvider`]; downstream components consume it
/// by reference, so readers need no locks.
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    roots: Vec<String>,
    types: Vec<TypeDescriptor>,
    by_name: HashMap<String, usize>,
    by_package: HashMap<String, Vec<usize>>,
    packages: BTreeMap<String, PackageInfo>,
    package_annotations: HashMap<String, Vec<Annotation>>,
}

impl TypeCatalog {
    /// Ingests every type under the given roots.
    ///
    /// Iteration order follows declared source order where available,
    /// otherwise lexicographic order of fully qualified names.
    pub fn build(provider: &dyn TypeProvider, roots: &[&str]) -> Result<Self> {
        let mut types: Vec<TypeDescriptor> = Vec::new();
        for root in roots {
            for descriptor in provider.types_under(root) {
                if is_generated_artifact(&descriptor.name) {
                    continue;
                }
                types.push(descriptor);
            }
        }

        types.sort_by(|a, b| match (a.source_order, b.source_order) {
            (Some(left), Some(right)) => left.cmp(&right).then_with(|| a.name.cmp(&b.name)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name.cmp(&b.name),
        });

        let mut by_name = HashMap::new();
        for (index, descriptor) in types.iter().enumerate() {
            if by_name.insert(descriptor.name.clone(), index).is_some() {
                return Err(Error::Configuration(format!(
                    "type '{}' appears more than once in the artifact set",
                    descriptor.name
                )));
            }
        }

        let mut by_package: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, descriptor) in types.iter().enumerate() {
            by_package
                .entry(descriptor.package().to_string())
                .or_default()
                .push(index);
        }

        let mut packages: BTreeMap<String, PackageInfo> = BTreeMap::new();
        let mut register_package = |name: &str| {
            if !packages.contains_key(name) {
                packages.insert(
                    name.to_string(),
                    PackageInfo {
                        name: name.to_string(),
                        parent: None,
                        children: Vec::new(),
                    },
                );
            }
        };
        for root in roots {
            register_package(root);
        }
        for descriptor in &types {
            // Register the package and every ancestor up to a root.
            let mut package = descriptor.package().to_string();
            loop {
                register_package(&package);
                if roots.contains(&package.as_str()) {
                    break;
                }
                match package.rfind(PACKAGE_SEPARATOR) {
                    Some(index) => package.truncate(index),
                    None => break,
                }
            }
        }

        let names: Vec<String> = packages.keys().cloned().collect();
        for name in &names {
            if let Some(parent) = name.rfind(PACKAGE_SEPARATOR).map(|i| name[..i].to_string()) {
                if packages.contains_key(&parent) {
                    if let Some(info) = packages.get_mut(&parent) {
                        info.children.push(name.clone());
                    }
                    if let Some(info) = packages.get_mut(name) {
                        info.parent = Some(parent);
                    }
                }
            }
        }

        let mut package_annotations = HashMap::new();
        for name in packages.keys() {
            let annotations = provider.package_annotations(name);
            if !annotations.is_empty() {
                package_annotations.insert(name.clone(), annotations);
            }
        }

        Ok(Self {
            roots: roots.iter().map(|r| r.to_string()).collect(),
            types,
            by_name,
            by_package,
            packages,
            package_annotations,
        })
    }

    /// The scanned root packages.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Every known package under the given root, the root included,
    /// lexicographically ordered.
    pub fn packages(&self, root: &str) -> Vec<&PackageInfo> {
        self.packages
            .values()
            .filter(|p| package_is_or_is_under(&p.name, root))
            .collect()
    }

    /// Looks up one package.
    pub fn package(&self, name: &str) -> Option<&PackageInfo> {
        self.packages.get(name)
    }

    /// Direct sub-packages of the given package.
    pub fn sub_packages(&self, name: &str) -> Vec<&PackageInfo> {
        self.packages
            .get(name)
            .map(|info| {
                info.children
                    .iter()
                    .filter_map(|child| self.packages.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All types, in catalog order.
    pub fn types(&self) -> &[TypeDescriptor] {
        &self.types
    }

    /// Looks up a type by fully qualified name.
    pub fn type_named(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name).map(|&index| &self.types[index])
    }

    /// Types residing directly in the given package.
    pub fn types_in(&self, package: &str) -> Vec<&TypeDescriptor> {
        let mut indexes = self
            .by_package
            .get(package)
            .cloned()
            .unwrap_or_default();
        indexes.sort_unstable();
        indexes.into_iter().map(|index| &self.types[index]).collect()
    }

    /// Types in the package or any package nested below it.
    pub fn types_under(&self, package: &str) -> Vec<&TypeDescriptor> {
        self.types
            .iter()
            .filter(|t| package_is_or_is_under(t.package(), package))
            .collect()
    }

    /// Public-surface references of the given type: public constructors,
    /// public method parameters and return types. Non-public members are
    /// excluded.
    pub fn referenced_types(&self, type_name: &str) -> Vec<&TypeReference> {
        self.type_named(type_name)
            .map(|descriptor| {
                descriptor
                    .references
                    .iter()
                    .filter(|r| r.public_surface)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Finds the named annotation for a package: the package descriptor
    /// first, then a single type inside the package.
    ///
    /// # Errors
    /// Returns `Configuration` when more than one type in the package
    /// carries the annotation.
    pub fn find_annotation(&self, package: &str, annotation: &str) -> Result<Option<Annotation>> {
        if let Some(annotations) = self.package_annotations.get(package) {
            if let Some(found) = annotations.iter().find(|a| a.name == annotation) {
                return Ok(Some(found.clone()));
            }
        }

        let carriers: Vec<&TypeDescriptor> = self
            .types_in(package)
            .into_iter()
            .filter(|t| t.has_annotation(annotation))
            .collect();

        match carriers.len() {
            0 => Ok(None),
            1 => Ok(carriers[0].annotation(annotation).cloned()),
            _ => Err(Error::Configuration(format!(
                "annotation '{}' is ambiguous in package '{}': carried by {}",
                annotation,
                package,
                carriers
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Annotations declared on the package descriptor.
    pub fn package_level_annotations(&self, package: &str) -> &[Annotation] {
        self.package_annotations
            .get(package)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
