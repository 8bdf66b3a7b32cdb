//! Namespace-agnostic navigation and mutation over an XML tree.
//!
//! [`XPathElement`] wraps either a whole document or a single element and
//! addresses children by local name only, so the same code fills templates
//! and reads responses regardless of the prefixes a service happens to use.
//! Results whose multiplicity is not known up front come back as a
//! [`Lookup`]: absent, a single value, or an ordered list.

use crate::error::{BusError, Result};
use crate::parser::{parse_document, Element, XmlNode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Suffix marking an accessor whose value is read as a boolean.
pub const BOOLEAN_MARKER: char = '?';

/// Zero, one, or many results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Absent,
    Single(T),
    Many(Vec<T>),
}

impl<T> Lookup<T> {
    /// Collapse a list: empty is absent, one item is single.
    pub fn from_vec(mut items: Vec<T>) -> Self {
        match items.len() {
            0 => Lookup::Absent,
            1 => match items.pop() {
                Some(item) => Lookup::Single(item),
                None => Lookup::Absent,
            },
            _ => Lookup::Many(items),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Lookup::Absent)
    }

    pub fn len(&self) -> usize {
        match self {
            Lookup::Absent => 0,
            Lookup::Single(_) => 1,
            Lookup::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value when there is exactly one.
    pub fn single(self) -> Option<T> {
        match self {
            Lookup::Single(item) => Some(item),
            _ => None,
        }
    }

    /// The first value, if any.
    pub fn first(self) -> Option<T> {
        self.into_vec().into_iter().next()
    }

    /// All values as a slice, in document order.
    pub fn as_slice(&self) -> &[T] {
        match self {
            Lookup::Absent => &[],
            Lookup::Single(item) => std::slice::from_ref(item),
            Lookup::Many(items) => items,
        }
    }

    /// All values, in document order.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Lookup::Absent => Vec::new(),
            Lookup::Single(item) => vec![item],
            Lookup::Many(items) => items,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Absent => Lookup::Absent,
            Lookup::Single(item) => Lookup::Single(f(item)),
            Lookup::Many(items) => Lookup::Many(items.into_iter().map(f).collect()),
        }
    }
}

impl<T> IntoIterator for Lookup<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

/// Where a named accessor finds its value: every element named `search`
/// (at any depth), then the text of its `leaf` children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub search: String,
    pub leaf: String,
}

/// Accessor name -> [`Location`] table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationMap {
    locations: HashMap<String, Location>,
}

impl LocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, accessor: &str, search: &str, leaf: &str) -> Self {
        self.insert(accessor, search, leaf);
        self
    }

    pub fn insert(&mut self, accessor: &str, search: &str, leaf: &str) {
        self.locations.insert(
            accessor.to_string(),
            Location {
                search: search.to_string(),
                leaf: leaf.to_string(),
            },
        );
    }

    /// Copy entries from `other` that are not already defined here.
    pub fn merge(&mut self, other: &LocationMap) {
        for (accessor, location) in &other.locations {
            self.locations
                .entry(accessor.clone())
                .or_insert_with(|| location.clone());
        }
    }

    /// Look up an accessor; a trailing boolean marker is ignored.
    pub fn get(&self, accessor: &str) -> Option<&Location> {
        self.locations.get(strip_marker(accessor).0)
    }

    pub fn contains(&self, accessor: &str) -> bool {
        self.get(accessor).is_some()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// Value read through a named accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    Absent,
    Text(String),
    List(Vec<String>),
    Flag(bool),
}

impl ElementValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, ElementValue::Absent)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ElementValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ElementValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Text values in order; a flag or absent value yields nothing.
    pub fn into_list(self) -> Vec<String> {
        match self {
            ElementValue::Text(text) => vec![text],
            ElementValue::List(list) => list,
            ElementValue::Absent | ElementValue::Flag(_) => Vec::new(),
        }
    }
}

enum Node<'a> {
    Owned(Element),
    Borrowed(&'a mut Element),
}

impl Node<'_> {
    fn get(&self) -> &Element {
        match self {
            Node::Owned(element) => element,
            Node::Borrowed(element) => &**element,
        }
    }

    fn get_mut(&mut self) -> &mut Element {
        match self {
            Node::Owned(element) => element,
            Node::Borrowed(element) => &mut **element,
        }
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Node").field(&self.get().name).finish()
    }
}

/// Wrapper over a document or element with local-name navigation.
#[derive(Debug)]
pub struct XPathElement<'a> {
    node: Node<'a>,
    locations: Option<Arc<LocationMap>>,
}

impl XPathElement<'static> {
    /// Parse markup into a new document wrapper.
    pub fn parse(markup: &str) -> Result<Self> {
        Ok(Self::from_element(parse_document(markup)?))
    }

    /// Take ownership of an already parsed node.
    pub fn from_element(element: Element) -> Self {
        Self {
            node: Node::Owned(element),
            locations: None,
        }
    }
}

impl<'a> XPathElement<'a> {
    /// Wrap an element in place; mutations go to the wrapped tree.
    pub fn wrap(element: &'a mut Element) -> Self {
        Self {
            node: Node::Borrowed(element),
            locations: None,
        }
    }

    /// Attach a location map for [`XPathElement::read`].
    pub fn with_locations(mut self, locations: Arc<LocationMap>) -> Self {
        self.locations = Some(locations);
        self
    }

    pub fn set_locations(&mut self, locations: Arc<LocationMap>) {
        self.locations = Some(locations);
    }

    pub fn locations(&self) -> Option<&LocationMap> {
        self.locations.as_deref()
    }

    /// The wrapped node.
    pub fn node(&self) -> &Element {
        self.node.get()
    }

    pub fn node_mut(&mut self) -> &mut Element {
        self.node.get_mut()
    }

    pub fn is_document(&self) -> bool {
        self.node().is_document()
    }

    /// Elements at `path` below the wrapped node, each segment matched by
    /// local name.
    pub fn get_element(&mut self, path: &[&str]) -> Lookup<XPathElement<'_>> {
        Lookup::from_vec(
            select_path(self.node.get_mut(), path)
                .into_iter()
                .map(XPathElement::wrap)
                .collect(),
        )
    }

    /// Like [`XPathElement::get_element`], calling `fill` on every match
    /// before returning.
    pub fn get_element_with<F>(&mut self, path: &[&str], mut fill: F) -> Lookup<XPathElement<'_>>
    where
        F: FnMut(&mut XPathElement<'_>),
    {
        let mut matches: Vec<XPathElement<'_>> = select_path(self.node.get_mut(), path)
            .into_iter()
            .map(XPathElement::wrap)
            .collect();
        if matches.is_empty() {
            debug!(path = %path.join("/"), "No element at path");
        }
        for element in matches.iter_mut() {
            fill(element);
        }
        Lookup::from_vec(matches)
    }

    /// Elements named `name` at any depth, the wrapped node included.
    pub fn find_element(&self, name: &str) -> Lookup<ElementView<'_>> {
        self.view().find_element(name)
    }

    /// Visit every element named `name` at any depth in document order.
    /// Returns the number of matches.
    pub fn find_element_with<F>(&mut self, name: &str, mut fill: F) -> usize
    where
        F: FnMut(&mut XPathElement<'_>),
    {
        let mut count = 0;
        visit_descendants(self.node.get_mut(), name, &mut fill, &mut count);
        count
    }

    /// Set the text of every direct child named `name`.
    pub fn set_text(&mut self, name: &str, value: &str) {
        let mut updated = 0usize;
        for child in self
            .node
            .get_mut()
            .child_elements_mut()
            .filter(|c| c.has_local_name(name))
        {
            child.set_text(value);
            updated += 1;
        }
        if updated == 0 {
            debug!(element = name, "No element to set text on");
        }
    }

    /// Text of every direct child named `name`.
    pub fn get_text(&self, name: &str) -> Lookup<String> {
        self.view().get_text(name)
    }

    /// Expand the placeholder child `name` into one sibling per value.
    ///
    /// The first value goes into the placeholder itself; each further value
    /// goes into a copy inserted right after the previous one. An empty
    /// `values` removes the placeholder.
    pub fn clone_with_text_values<S: AsRef<str>>(&mut self, name: &str, values: &[S]) {
        let parent = self.node.get_mut();
        let placeholder = parent.children.iter().enumerate().find_map(|(index, node)| {
            node.as_element()
                .filter(|e| e.has_local_name(name))
                .map(|e| (index, e.clone()))
        });

        let Some((index, template)) = placeholder else {
            debug!(element = name, "No placeholder element to clone");
            return;
        };

        let copies = values.iter().map(|value| {
            let mut copy = template.clone();
            copy.set_text(value.as_ref());
            XmlNode::Element(copy)
        });
        parent.children.splice(index..=index, copies);
    }

    /// Remove every direct child named `name`.
    pub fn delete(&mut self, name: &str) {
        let children = &mut self.node.get_mut().children;
        let before = children.len();
        children.retain(|node| !node.as_element().is_some_and(|e| e.has_local_name(name)));
        if children.len() == before {
            debug!(element = name, "No element to delete");
        }
    }

    /// Whether `accessor` is defined in the attached location map.
    pub fn responds_to(&self, accessor: &str) -> bool {
        self.view().responds_to(accessor)
    }

    /// Read a value through the attached location map. See
    /// [`ElementView::read`].
    pub fn read(&self, accessor: &str) -> Result<ElementValue> {
        self.view().read(accessor)
    }

    /// Read-only view of the wrapped node sharing its location map.
    pub fn view(&self) -> ElementView<'_> {
        ElementView {
            node: self.node(),
            locations: self.locations.clone(),
        }
    }

    /// For a document, its root element wrapped in place.
    pub fn root_mut(&mut self) -> Option<XPathElement<'_>> {
        if !self.is_document() {
            return None;
        }
        self.node
            .get_mut()
            .child_elements_mut()
            .next()
            .map(XPathElement::wrap)
    }

    /// Serialize the wrapped node and its subtree.
    pub fn to_xml(&self) -> Result<String> {
        self.node().to_xml()
    }

    /// Serialize the root element only, leaving out the document prolog.
    pub fn root_xml(&self) -> Result<String> {
        let node = self.node();
        match node.first_element() {
            Some(root) if node.is_document() => root.to_xml(),
            _ => node.to_xml(),
        }
    }
}

/// Read-only counterpart of [`XPathElement`], returned by searches.
#[derive(Debug, Clone)]
pub struct ElementView<'a> {
    node: &'a Element,
    locations: Option<Arc<LocationMap>>,
}

impl<'a> ElementView<'a> {
    pub fn node(&self) -> &'a Element {
        self.node
    }

    /// Text content of the viewed element itself.
    pub fn text(&self) -> String {
        self.node.text()
    }

    /// Text of every direct child named `name`.
    pub fn get_text(&self, name: &str) -> Lookup<String> {
        Lookup::from_vec(child_texts(self.node, name))
    }

    /// Elements named `name` at any depth, the viewed node included.
    pub fn find_element(&self, name: &str) -> Lookup<ElementView<'a>> {
        let mut found = Vec::new();
        collect_descendants(self.node, name, &mut found);
        Lookup::from_vec(
            found
                .into_iter()
                .map(|node| ElementView {
                    node,
                    locations: self.locations.clone(),
                })
                .collect(),
        )
    }

    pub fn responds_to(&self, accessor: &str) -> bool {
        self.locations.as_deref().is_some_and(|l| l.contains(accessor))
    }

    /// Read a value through the attached location map.
    ///
    /// Accessors ending in [`BOOLEAN_MARKER`] read a single value as a flag
    /// that is true when the text contains "true" in any case. Names missing
    /// from the map are an error.
    pub fn read(&self, accessor: &str) -> Result<ElementValue> {
        let location = self
            .locations
            .as_deref()
            .and_then(|l| l.get(accessor))
            .ok_or_else(|| BusError::UnknownAccessor(accessor.to_string()))?;
        let (_, boolean) = strip_marker(accessor);

        let mut found = Vec::new();
        collect_descendants(self.node, &location.search, &mut found);
        let texts: Vec<String> = found
            .into_iter()
            .flat_map(|element| child_texts(element, &location.leaf))
            .collect();

        Ok(match Lookup::from_vec(texts) {
            Lookup::Absent => ElementValue::Absent,
            Lookup::Single(text) if boolean => ElementValue::Flag(booleanize(&text)),
            Lookup::Single(text) => ElementValue::Text(text),
            Lookup::Many(texts) => ElementValue::List(texts),
        })
    }

    pub fn to_xml(&self) -> Result<String> {
        self.node.to_xml()
    }
}

fn strip_marker(accessor: &str) -> (&str, bool) {
    match accessor.strip_suffix(BOOLEAN_MARKER) {
        Some(name) => (name, true),
        None => (accessor, false),
    }
}

fn booleanize(text: &str) -> bool {
    text.to_ascii_lowercase().contains("true")
}

fn child_texts(element: &Element, name: &str) -> Vec<String> {
    element
        .child_elements()
        .filter(|c| c.has_local_name(name))
        .map(Element::text)
        .collect()
}

fn select_path<'e>(start: &'e mut Element, path: &[&str]) -> Vec<&'e mut Element> {
    let mut current = vec![start];
    for segment in path {
        let mut next = Vec::new();
        for element in current {
            next.extend(
                element
                    .child_elements_mut()
                    .filter(|c| c.has_local_name(segment)),
            );
        }
        current = next;
    }
    current
}

fn collect_descendants<'e>(element: &'e Element, name: &str, found: &mut Vec<&'e Element>) {
    if element.has_local_name(name) {
        found.push(element);
    }
    for child in element.child_elements() {
        collect_descendants(child, name, found);
    }
}

fn visit_descendants<F>(element: &mut Element, name: &str, fill: &mut F, count: &mut usize)
where
    F: FnMut(&mut XPathElement<'_>),
{
    if element.has_local_name(name) {
        *count += 1;
        fill(&mut XPathElement::wrap(element));
    }
    for child in element.child_elements_mut() {
        visit_descendants(child, name, fill, count);
    }
}
