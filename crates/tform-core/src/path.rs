#![forbid(unsafe_code)]

//! Hop sequences and the two path renderings derived from them.
//!
//! A node's position is the ordered list of [`Hop`]s from a root to its parent.
//! Two independent addresses are derived from the same hops:
//!
//! - [`ValuePath`]: addresses the form data store. Only hops with a field name
//!   contribute; array hops append their element index.
//! - [`InstancePath`]: addresses the instance tree. Every hop contributes its
//!   component name followed by the children marker, then the element index
//!   for array hops.
//!
//! ```text
//! hops:      form(form-root) → rows(array, field "rows", index 2)
//! node:      name(primitive, field "name")
//! value:     rows[2].name
//! instance:  form.__children.rows.__children[2].name
//! ```
//!
//! # Invariants
//!
//! 1. Both renderings are pure functions of the hops: identical input yields
//!    identical output.
//! 2. A hop without a field name never affects the value path and always
//!    appears in the instance path.
//! 3. `Display` followed by `FromStr` reproduces the structured key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PathError;
use crate::kind::ComponentKind;

/// Literal segment inserted after every ancestor in an instance path.
pub const CHILDREN_MARKER: &str = "__children";

/// Whether `name` can be used as a path segment without ambiguity.
#[must_use]
pub fn is_addressable_name(name: &str) -> bool {
    !name.is_empty()
        && name != CHILDREN_MARKER
        && !name.contains(['.', '[', ']', '/'])
}

// ─── Hop ─────────────────────────────────────────────────────────────────────

/// One step from a root towards a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    pub component_name: String,
    pub field_name: Option<String>,
    pub index: Option<usize>,
    pub kind: ComponentKind,
}

impl Hop {
    #[must_use]
    pub fn new(component_name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            component_name: component_name.into(),
            field_name: None,
            index: None,
            kind,
        }
    }

    #[must_use]
    pub fn with_field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    #[must_use]
    pub fn with_field_opt(mut self, field_name: Option<String>) -> Self {
        self.field_name = field_name;
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

// ─── HopPath ─────────────────────────────────────────────────────────────────

/// Ancestor chain of a node, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HopPath {
    hops: Vec<Hop>,
}

impl HopPath {
    /// The empty chain of a root node.
    #[must_use]
    pub const fn root() -> Self {
        Self { hops: Vec::new() }
    }

    #[must_use]
    pub fn new(hops: Vec<Hop>) -> Self {
        Self { hops }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Hop] {
        &self.hops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Hop> {
        self.hops.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hop> {
        self.hops.iter()
    }

    /// A new chain extended by `hop`.
    #[must_use]
    pub fn child(&self, hop: Hop) -> Self {
        let mut hops = Vec::with_capacity(self.hops.len() + 1);
        hops.extend(self.hops.iter().cloned());
        hops.push(hop);
        Self { hops }
    }

    /// Position of the nearest form-root hop.
    #[must_use]
    pub fn form_boundary(&self) -> Option<usize> {
        self.hops
            .iter()
            .rposition(|hop| hop.kind == ComponentKind::FormRoot)
    }

    /// Hops below the nearest form root. Value paths are relative to that
    /// form's store.
    #[must_use]
    pub fn data_scope(&self) -> &[Hop] {
        match self.form_boundary() {
            Some(pos) => &self.hops[pos + 1..],
            None => &self.hops,
        }
    }

    /// Store address of a node with this ancestor chain.
    #[must_use]
    pub fn value_path(&self, field_name: Option<&str>) -> ValuePath {
        ValuePath::from_hops(field_name, self.data_scope())
    }

    /// Tree address of a node with this ancestor chain.
    #[must_use]
    pub fn instance_path(&self, component_name: &str) -> InstancePath {
        InstancePath::from_hops(component_name, &self.hops)
    }

    /// Instance paths of every ancestor, root first.
    #[must_use]
    pub fn ancestor_paths(&self) -> Vec<InstancePath> {
        (0..self.hops.len())
            .map(|i| InstancePath::from_hops(&self.hops[i].component_name, &self.hops[..i]))
            .collect()
    }

    /// Rewrite the element index carried by the hop at `depth`.
    ///
    /// Returns `false` when `depth` is past the end of the chain.
    pub fn set_index(&mut self, depth: usize, index: usize) -> bool {
        match self.hops.get_mut(depth) {
            Some(hop) => {
                hop.index = Some(index);
                true
            }
            None => false,
        }
    }
}

impl From<Vec<Hop>> for HopPath {
    fn from(hops: Vec<Hop>) -> Self {
        Self { hops }
    }
}

/// Render the value path of a node named by `field_name` under `hops`.
#[must_use]
pub fn resolve_value_path(field_name: Option<&str>, hops: &[Hop]) -> String {
    ValuePath::from_hops(field_name, hops).to_string()
}

/// Render the instance path of a node named `component_name` under `hops`.
#[must_use]
pub fn resolve_instance_path(component_name: &str, hops: &[Hop]) -> String {
    InstancePath::from_hops(component_name, hops).to_string()
}

// ─── Segment tokenizer ──────────────────────────────────────────────────────

/// Split `name[1][2]` into its name and indices.
fn split_token<'a>(token: &'a str, full: &str) -> Result<(&'a str, Vec<usize>), PathError> {
    let (name, mut rest) = match token.find('[') {
        Some(pos) => (&token[..pos], &token[pos..]),
        None => (token, ""),
    };
    let mut indices = Vec::new();
    while !rest.is_empty() {
        let Some(body) = rest.strip_prefix('[') else {
            return Err(PathError::InvalidIndex {
                path: full.to_owned(),
                index: rest.to_owned(),
            });
        };
        let Some(close) = body.find(']') else {
            return Err(PathError::UnterminatedIndex {
                path: full.to_owned(),
            });
        };
        let digits = &body[..close];
        let index = digits.parse::<usize>().map_err(|_| PathError::InvalidIndex {
            path: full.to_owned(),
            index: digits.to_owned(),
        })?;
        indices.push(index);
        rest = &body[close + 1..];
    }
    if name.is_empty() && indices.is_empty() {
        return Err(PathError::EmptySegment {
            path: full.to_owned(),
        });
    }
    Ok((name, indices))
}

// ─── ValuePath ───────────────────────────────────────────────────────────────

/// One step into a store document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueSegment {
    Field(String),
    Index(usize),
}

/// Structured address into a form data store. The root path addresses the
/// whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ValuePath {
    segments: Vec<ValueSegment>,
}

impl ValuePath {
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_segments(segments: Vec<ValueSegment>) -> Self {
        Self { segments }
    }

    /// Derive a value path from hops. Hops without a field name are skipped.
    #[must_use]
    pub fn from_hops(field_name: Option<&str>, hops: &[Hop]) -> Self {
        let mut segments = Vec::with_capacity(hops.len() * 2 + 1);
        for hop in hops {
            if let Some(field) = &hop.field_name {
                segments.push(ValueSegment::Field(field.clone()));
                if let Some(index) = hop.index {
                    segments.push(ValueSegment::Index(index));
                }
            }
        }
        if let Some(field) = field_name {
            segments.push(ValueSegment::Field(field.to_owned()));
        }
        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[ValueSegment] {
        &self.segments
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(ValueSegment::Field(name.into()));
        Self { segments }
    }

    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(ValueSegment::Index(index));
        Self { segments }
    }

    #[must_use]
    pub fn join(&self, other: &ValuePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// The path with its last segment removed; `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &ValuePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Whether one path is a prefix of the other.
    #[must_use]
    pub fn is_related(&self, other: &ValuePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Resolve a dependency reference against this path as scope.
    ///
    /// `"/a.b"` is absolute within the store; anything else is appended to
    /// `self`.
    pub fn resolve_reference(&self, reference: &str) -> Result<ValuePath, PathError> {
        match reference.strip_prefix('/') {
            Some(absolute) => absolute.parse(),
            None => Ok(self.join(&reference.parse()?)),
        }
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                ValueSegment::Field(name) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                ValueSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for ValuePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for token in s.split('.') {
            let (name, indices) = split_token(token, s)?;
            if !name.is_empty() {
                segments.push(ValueSegment::Field(name.to_owned()));
            }
            segments.extend(indices.into_iter().map(ValueSegment::Index));
        }
        Ok(Self { segments })
    }
}

impl TryFrom<String> for ValuePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValuePath> for String {
    fn from(path: ValuePath) -> Self {
        path.to_string()
    }
}

// ─── InstancePath ────────────────────────────────────────────────────────────

/// One step into the instance tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceSegment {
    Component(String),
    Children,
    Element(usize),
}

/// Structured address into the instance tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstancePath {
    segments: Vec<InstanceSegment>,
}

impl InstancePath {
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_segments(segments: Vec<InstanceSegment>) -> Self {
        Self { segments }
    }

    /// Derive an instance path from hops. Every hop contributes.
    #[must_use]
    pub fn from_hops(component_name: &str, hops: &[Hop]) -> Self {
        let mut segments = Vec::with_capacity(hops.len() * 3 + 1);
        for hop in hops {
            segments.push(InstanceSegment::Component(hop.component_name.clone()));
            segments.push(InstanceSegment::Children);
            if let Some(index) = hop.index {
                segments.push(InstanceSegment::Element(index));
            }
        }
        segments.push(InstanceSegment::Component(component_name.to_owned()));
        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[InstanceSegment] {
        &self.segments
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Name of the addressed component, if the path ends on one.
    #[must_use]
    pub fn component_name(&self) -> Option<&str> {
        match self.segments.last() {
            Some(InstanceSegment::Component(name)) => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &InstancePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for InstancePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                InstanceSegment::Component(name) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                InstanceSegment::Children => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(CHILDREN_MARKER)?;
                }
                InstanceSegment::Element(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for InstancePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for token in s.split('.') {
            let (name, indices) = split_token(token, s)?;
            if name.is_empty() {
                return Err(PathError::DanglingIndex { path: s.to_owned() });
            }
            if name == CHILDREN_MARKER {
                segments.push(InstanceSegment::Children);
            } else {
                segments.push(InstanceSegment::Component(name.to_owned()));
            }
            segments.extend(indices.into_iter().map(InstanceSegment::Element));
        }
        Ok(Self { segments })
    }
}

impl TryFrom<String> for InstancePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstancePath> for String {
    fn from(path: InstancePath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_hops(index: usize) -> Vec<Hop> {
        vec![
            Hop::new("form", ComponentKind::FormRoot),
            Hop::new("rows", ComponentKind::ArrayField)
                .with_field("rows")
                .with_index(index),
        ]
    }

    #[test]
    fn empty_hops_address_the_node_itself() {
        assert_eq!(resolve_value_path(Some("title"), &[]), "title");
        assert_eq!(resolve_instance_path("title", &[]), "title");
        assert_eq!(resolve_value_path(None, &[]), "");
    }

    #[test]
    fn array_element_paths() {
        let hops = rows_hops(2);
        assert_eq!(resolve_value_path(Some("name"), &hops), "rows[2].name");
        assert_eq!(
            resolve_instance_path("name", &hops),
            "form.__children.rows.__children[2].name"
        );
    }

    #[test]
    fn ui_hops_are_transparent_to_values() {
        let hops = vec![
            Hop::new("form", ComponentKind::FormRoot),
            Hop::new("card", ComponentKind::Container),
            Hop::new("address", ComponentKind::ObjectField).with_field("address"),
            Hop::new("row", ComponentKind::Container),
        ];
        assert_eq!(resolve_value_path(Some("city"), &hops), "address.city");
        assert_eq!(
            resolve_instance_path("city", &hops),
            "form.__children.card.__children.address.__children.row.__children.city"
        );
    }

    #[test]
    fn repeated_names_disambiguated_by_index() {
        let first = InstancePath::from_hops("name", &rows_hops(0));
        let second = InstancePath::from_hops("name", &rows_hops(1));
        assert_ne!(first, second);
        assert_eq!(first.component_name(), second.component_name());
    }

    #[test]
    fn data_scope_starts_below_nearest_form() {
        let hops = HopPath::new(vec![
            Hop::new("outer", ComponentKind::FormRoot),
            Hop::new("meta", ComponentKind::ObjectField).with_field("meta"),
            Hop::new("inner", ComponentKind::FormRoot),
        ]);
        assert_eq!(hops.form_boundary(), Some(2));
        assert!(hops.data_scope().is_empty());
        assert_eq!(hops.value_path(Some("x")).to_string(), "x");
    }

    #[test]
    fn ancestor_paths_walk_root_first() {
        let hops = HopPath::new(rows_hops(1));
        let ancestors: Vec<String> = hops.ancestor_paths().iter().map(ToString::to_string).collect();
        assert_eq!(ancestors, vec!["form", "form.__children.rows"]);
    }

    #[test]
    fn set_index_rewrites_single_hop() {
        let mut hops = HopPath::new(rows_hops(3));
        assert!(hops.set_index(1, 0));
        assert!(!hops.set_index(5, 0));
        assert_eq!(hops.value_path(Some("name")).to_string(), "rows[0].name");
    }

    #[test]
    fn value_path_parse() {
        let path: ValuePath = "rows[2].tags[0]".parse().unwrap();
        assert_eq!(
            path.segments(),
            &[
                ValueSegment::Field("rows".into()),
                ValueSegment::Index(2),
                ValueSegment::Field("tags".into()),
                ValueSegment::Index(0),
            ]
        );
        assert_eq!(path.to_string(), "rows[2].tags[0]");
        assert_eq!("".parse::<ValuePath>().unwrap(), ValuePath::root());
    }

    #[test]
    fn value_path_parse_errors() {
        assert!(matches!(
            "a..b".parse::<ValuePath>(),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            "a[1".parse::<ValuePath>(),
            Err(PathError::UnterminatedIndex { .. })
        ));
        assert!(matches!(
            "a[x]".parse::<ValuePath>(),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            "a[1]b".parse::<ValuePath>(),
            Err(PathError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn instance_path_parse() {
        let path: InstancePath = "form.__children.rows.__children[2].name".parse().unwrap();
        assert_eq!(path, InstancePath::from_hops("name", &rows_hops(2)));
        assert!(matches!(
            "[0].x".parse::<InstancePath>(),
            Err(PathError::DanglingIndex { .. })
        ));
    }

    #[test]
    fn parent_and_prefix() {
        let path: ValuePath = "rows[2].name".parse().unwrap();
        let parent = path.parent().unwrap();
        assert_eq!(parent.to_string(), "rows[2]");
        assert!(path.starts_with(&parent));
        assert!(parent.is_related(&path));
        assert!(ValuePath::root().parent().is_none());
    }

    #[test]
    fn references_resolve_relative_or_absolute() {
        let scope: ValuePath = "rows[1]".parse().unwrap();
        assert_eq!(scope.resolve_reference("start").unwrap().to_string(), "rows[1].start");
        assert_eq!(scope.resolve_reference("/currency").unwrap().to_string(), "currency");
        assert!(scope.resolve_reference("a..b").is_err());
    }

    #[test]
    fn addressable_names() {
        assert!(is_addressable_name("rows"));
        assert!(!is_addressable_name(""));
        assert!(!is_addressable_name("a.b"));
        assert!(!is_addressable_name("a[0]"));
        assert!(!is_addressable_name(CHILDREN_MARKER));
    }

    #[test]
    fn serde_uses_rendered_form() {
        let path: ValuePath = "rows[0].name".parse().unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"rows[0].name\"");
        let back: ValuePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
