use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use thiserror::Error;

/// Errors raised while parsing or serializing a world document.
#[derive(Debug, Error)]
pub enum DomError {
    /// The document text is not well-formed XML.
    #[error("malformed document: {0}")]
    Malformed(String),
    /// The document contains no root element.
    #[error("document has no root element")]
    NoRoot,
    /// More than one top-level element.
    #[error("document has multiple root elements")]
    MultipleRoots,
    /// Character data found outside the root element.
    #[error("text content outside the root element")]
    TextOutsideRoot,
}

#[derive(Debug)]
enum XmlChild {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug)]
struct ElementData {
    tag: String,
    attributes: IndexMap<String, String>,
    children: Vec<XmlChild>,
}

/// Shared handle to one element of a mutable XML tree.
///
/// Handles are reference-counted and stay valid across structural edits,
/// which is what lets a mutation script hold a node while reshaping the
/// tree around it. The tree is intentionally `!Send`: it only ever lives
/// inside one synchronous `apply` call.
#[derive(Debug, Clone)]
pub struct XmlElement {
    inner: Rc<RefCell<ElementData>>,
}

impl XmlElement {
    /// Creates a detached element.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ElementData {
                tag: tag.into(),
                attributes: IndexMap::new(),
                children: Vec::new(),
            })),
        }
    }

    /// Tag name.
    #[must_use]
    pub fn tag(&self) -> String {
        self.inner.borrow().tag.clone()
    }

    /// Concatenated text content of this element and its descendants.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Replaces all children with a single text node (or nothing when empty).
    pub fn set_text(&self, text: &str) {
        let mut data = self.inner.borrow_mut();
        data.children.clear();
        if !text.is_empty() {
            data.children.push(XmlChild::Text(text.to_string()));
        }
    }

    /// Attribute value, when present.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<String> {
        self.inner.borrow().attributes.get(name).cloned()
    }

    /// Sets or replaces an attribute.
    pub fn set_attr(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner
            .borrow_mut()
            .attributes
            .insert(name.into(), value.into());
    }

    /// Removes an attribute; returns whether it existed.
    pub fn remove_attr(&self, name: &str) -> bool {
        self.inner
            .borrow_mut()
            .attributes
            .shift_remove(name)
            .is_some()
    }

    /// Attribute pairs in document order.
    #[must_use]
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.inner
            .borrow()
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Appends a new child element and returns its handle.
    pub fn append_element(&self, tag: impl Into<String>) -> Self {
        let child = Self::new(tag);
        self.inner
            .borrow_mut()
            .children
            .push(XmlChild::Element(child.clone()));
        child
    }

    /// Appends a text node.
    pub fn append_text(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.inner
            .borrow_mut()
            .children
            .push(XmlChild::Text(text.to_string()));
    }

    /// Child elements (text nodes skipped).
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        self.inner
            .borrow()
            .children
            .iter()
            .filter_map(|child| match child {
                XmlChild::Element(el) => Some(el.clone()),
                XmlChild::Text(_) => None,
            })
            .collect()
    }

    /// Number of child elements.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner
            .borrow()
            .children
            .iter()
            .filter(|child| matches!(child, XmlChild::Element(_)))
            .count()
    }

    /// Removes a direct child element by handle identity.
    pub fn remove_child(&self, child: &Self) -> bool {
        let mut data = self.inner.borrow_mut();
        let before = data.children.len();
        data.children.retain(|existing| match existing {
            XmlChild::Element(el) => !Rc::ptr_eq(&el.inner, &child.inner),
            XmlChild::Text(_) => true,
        });
        data.children.len() != before
    }

    /// Drops every child node.
    pub fn clear_children(&self) {
        self.inner.borrow_mut().children.clear();
    }

    /// First descendant element with the given tag, depth first.
    #[must_use]
    pub fn select(&self, tag: &str) -> Option<Self> {
        for child in self.children() {
            if child.tag() == tag {
                return Some(child);
            }
            if let Some(found) = child.select(tag) {
                return Some(found);
            }
        }
        None
    }

    /// All descendant elements with the given tag, depth first.
    #[must_use]
    pub fn select_all(&self, tag: &str) -> Vec<Self> {
        let mut found = Vec::new();
        collect_matches(self, tag, &mut found);
        found
    }

    fn same_node(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

fn collect_text(element: &XmlElement, out: &mut String) {
    for child in &element.inner.borrow().children {
        match child {
            XmlChild::Text(text) => out.push_str(text),
            XmlChild::Element(el) => collect_text(el, out),
        }
    }
}

fn collect_matches(element: &XmlElement, tag: &str, out: &mut Vec<XmlElement>) {
    for child in element.children() {
        if child.tag() == tag {
            out.push(child.clone());
        }
        collect_matches(&child, tag, out);
    }
}

/// A parsed world document: a single root element plus selection helpers.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    root: XmlElement,
}

impl XmlDocument {
    /// Wraps an existing root element.
    #[must_use]
    pub const fn from_root(root: XmlElement) -> Self {
        Self { root }
    }

    /// Parses serialized XML into a mutable tree.
    pub fn parse(text: &str) -> Result<Self, DomError> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        loop {
            match reader.read_event() {
                Err(err) => return Err(DomError::Malformed(err.to_string())),
                Ok(Event::Eof) => break,
                Ok(Event::Start(start)) => {
                    let element = element_from_start(&start)?;
                    attach(stack.last(), &mut root, &element)?;
                    stack.push(element);
                }
                Ok(Event::Empty(start)) => {
                    let element = element_from_start(&start)?;
                    attach(stack.last(), &mut root, &element)?;
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(text)) => {
                    let content = text
                        .unescape()
                        .map_err(|err| DomError::Malformed(err.to_string()))?;
                    if content.is_empty() {
                        continue;
                    }
                    match stack.last() {
                        Some(parent) => parent.append_text(&content),
                        None => return Err(DomError::TextOutsideRoot),
                    }
                }
                Ok(Event::CData(data)) => {
                    let content = String::from_utf8_lossy(&data).into_owned();
                    match stack.last() {
                        Some(parent) => parent.append_text(&content),
                        None => return Err(DomError::TextOutsideRoot),
                    }
                }
                Ok(Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_)) => {}
            }
        }
        root.ok_or(DomError::NoRoot).map(|root| Self { root })
    }

    /// The root element.
    #[must_use]
    pub fn root(&self) -> XmlElement {
        self.root.clone()
    }

    /// First element with the given tag, root included.
    #[must_use]
    pub fn select(&self, tag: &str) -> Option<XmlElement> {
        if self.root.tag() == tag {
            return Some(self.root.clone());
        }
        self.root.select(tag)
    }

    /// All elements with the given tag, root included.
    #[must_use]
    pub fn select_all(&self, tag: &str) -> Vec<XmlElement> {
        let mut found = Vec::new();
        if self.root.tag() == tag {
            found.push(self.root.clone());
        }
        found.extend(self.root.select_all(tag));
        found
    }

    /// Serializes the tree back to text.
    ///
    /// Empty elements are written expanded (`<tag></tag>`) so the empty
    /// sentinel document survives a no-op mutation byte for byte.
    pub fn to_xml(&self) -> Result<String, DomError> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, &self.root)
            .map_err(|err| DomError::Malformed(err.to_string()))?;
        String::from_utf8(writer.into_inner()).map_err(|err| DomError::Malformed(err.to_string()))
    }

    /// Whether the given element is this document's root.
    #[must_use]
    pub fn is_root(&self, element: &XmlElement) -> bool {
        self.root.same_node(element)
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement, DomError> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let element = XmlElement::new(tag);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| DomError::Malformed(err.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| DomError::Malformed(err.to_string()))?
            .into_owned();
        element.set_attr(key, value);
    }
    Ok(element)
}

fn attach(
    parent: Option<&XmlElement>,
    root: &mut Option<XmlElement>,
    element: &XmlElement,
) -> Result<(), DomError> {
    if let Some(parent) = parent {
        parent
            .inner
            .borrow_mut()
            .children
            .push(XmlChild::Element(element.clone()));
        return Ok(());
    }
    if root.is_some() {
        return Err(DomError::MultipleRoots);
    }
    *root = Some(element.clone());
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> quick_xml::Result<()> {
    let data = element.inner.borrow();
    let mut start = BytesStart::new(data.tag.as_str());
    for (key, value) in &data.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Start(start))?;
    for child in &data.children {
        match child {
            XmlChild::Text(text) => {
                writer.write_event(Event::Text(BytesText::new(text)))?;
            }
            XmlChild::Element(el) => write_element(writer, el)?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(data.tag.as_str())))?;
    Ok(())
}
