//! Owned XML element tree built on quick-xml event parsing.
//!
//! The response validator needs more than a streaming read: it extracts
//! assertion subtrees, removes enveloped signatures, and re-serializes
//! fragments as standalone documents for canonicalization. Namespace
//! declarations in scope at an element are captured at parse time so a
//! subtree can be lifted out of its document without losing prefix
//! bindings.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;

pub const SAML2P_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const SAML2_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";
pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// A plain (non-namespace-declaration) attribute, name as written.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlAttribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An element with resolved namespace, attributes, the namespace
/// declarations written on it, and the full set in scope at its position.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    /// Qualified name as written, e.g. `saml2p:Response`.
    pub name: String,
    pub local_name: String,
    /// Resolved namespace URI of the element itself.
    pub namespace: Option<String>,
    pub attributes: Vec<XmlAttribute>,
    /// `xmlns`/`xmlns:p` declarations written on this element.
    pub namespace_decls: Vec<(Option<String>, String)>,
    /// All declarations in scope here, innermost winning per prefix.
    pub scope_decls: Vec<(Option<String>, String)>,
    pub children: Vec<XmlNode>,
}

fn resolve_prefix(scope: &[(Option<String>, String)], prefix: Option<&str>) -> Option<String> {
    scope
        .iter()
        .rev()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.clone())
        .filter(|uri| !uri.is_empty())
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

/// Merge a declaration into a scope list, innermost winning per prefix.
fn merge_decl(scope: &mut Vec<(Option<String>, String)>, prefix: Option<String>, uri: String) {
    if let Some(slot) = scope.iter_mut().find(|(p, _)| *p == prefix) {
        slot.1 = uri;
    } else {
        scope.push((prefix, uri));
    }
}

impl XmlElement {
    /// Parse a document and return its root element.
    ///
    /// The error string carries the parser diagnostic; callers wrap it into
    /// the crate error taxonomy.
    pub fn parse(xml: &str) -> Result<XmlElement, String> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        // Stack of open elements; the scope travels with each frame.
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let element = begin_element(&e, stack.last())?;
                    stack.push(element);
                }
                Ok(Event::Empty(e)) => {
                    let element = begin_element(&e, stack.last())?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Ok(Event::End(_)) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| "unexpected closing tag".to_string())?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Ok(Event::Text(e)) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = e
                            .unescape()
                            .map_err(|err| format!("invalid character data: {err}"))?;
                        push_text(parent, &text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&e).into_owned();
                        push_text(parent, &text);
                    }
                }
                Ok(Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_)) => {}
                Ok(Event::Eof) => break,
                Err(err) => return Err(format!("{err}")),
            }
        }

        if !stack.is_empty() {
            return Err("unexpected end of document".to_string());
        }
        root.ok_or_else(|| "the document contains no element".to_string())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn is_named(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Direct element children, in document order.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// First direct child with the given namespace and local name.
    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.is_named(namespace, local_name))
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> {
        self.elements()
            .filter(move |e| e.is_named(namespace, local_name))
    }

    /// Concatenated descendant text, trimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out.trim().to_string()
    }

    /// Clone of this element with the first matching direct child element
    /// removed. Used to strip an enveloped signature before digesting.
    pub fn without_child(&self, namespace: &str, local_name: &str) -> XmlElement {
        let mut clone = self.clone();
        let mut removed = false;
        clone.children.retain(|n| {
            if removed {
                return true;
            }
            match n {
                XmlNode::Element(e) if e.is_named(namespace, local_name) => {
                    removed = true;
                    false
                }
                _ => true,
            }
        });
        clone
    }

    /// Serialize using only the declarations written on each element.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, None);
        out
    }

    /// Serialize as a self-contained document: inherited in-scope namespace
    /// declarations are merged onto the root start tag so the fragment
    /// stays well-formed outside its original document. Only declarations
    /// for prefixes the subtree visibly uses are injected, matching what
    /// exclusive canonicalization will keep anyway.
    pub fn to_standalone_xml(&self) -> String {
        let mut used = HashSet::new();
        collect_used_prefixes(self, &mut used);
        let decls: Vec<(Option<String>, String)> = self
            .scope_decls
            .iter()
            .filter(|(prefix, _)| used.contains(prefix))
            .cloned()
            .collect();

        let mut out = String::new();
        self.write(&mut out, Some(&decls));
        out
    }

    fn write(&self, out: &mut String, scope_override: Option<&[(Option<String>, String)]>) {
        out.push('<');
        out.push_str(&self.name);

        let decls: Vec<(Option<String>, String)> = match scope_override {
            Some(scope) => {
                // Locals win over inherited scope entries.
                let mut merged: Vec<(Option<String>, String)> = scope.to_vec();
                for (p, u) in &self.namespace_decls {
                    merge_decl(&mut merged, p.clone(), u.clone());
                }
                merged
            }
            None => self.namespace_decls.clone(),
        };
        for (prefix, uri) in &decls {
            match prefix {
                Some(p) => {
                    out.push_str(&format!(" xmlns:{}=\"{}\"", p, escape_attr(uri)));
                }
                None => {
                    out.push_str(&format!(" xmlns=\"{}\"", escape_attr(uri)));
                }
            }
        }
        for attr in &self.attributes {
            out.push_str(&format!(" {}=\"{}\"", attr.name, escape_attr(&attr.value)));
        }

        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.write(out, None),
                XmlNode::Text(t) => out.push_str(&escape_text(t)),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn begin_element(
    e: &quick_xml::events::BytesStart<'_>,
    parent: Option<&XmlElement>,
) -> Result<XmlElement, String> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

    let mut attributes = Vec::new();
    let mut namespace_decls = Vec::new();
    let mut scope_decls = parent.map(|p| p.scope_decls.clone()).unwrap_or_default();

    for attr in e.attributes() {
        let attr = attr.map_err(|err| format!("invalid attribute: {err}"))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| format!("invalid attribute value: {err}"))?
            .into_owned();

        if key == "xmlns" {
            namespace_decls.push((None, value.clone()));
            merge_decl(&mut scope_decls, None, value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespace_decls.push((Some(prefix.to_string()), value.clone()));
            merge_decl(&mut scope_decls, Some(prefix.to_string()), value);
        } else {
            attributes.push(XmlAttribute { name: key, value });
        }
    }

    let (prefix, local_name) = split_qname(&name);
    let namespace = resolve_prefix(&scope_decls, prefix);
    let local_name = local_name.to_string();

    Ok(XmlElement {
        name,
        local_name,
        namespace,
        attributes,
        namespace_decls,
        scope_decls,
        children: Vec::new(),
    })
}

fn close_element(
    element: XmlElement,
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err("the document contains more than one root element".to_string());
            }
            *root = Some(element);
            Ok(())
        }
    }
}

fn push_text(parent: &mut XmlElement, text: &str) {
    if let Some(XmlNode::Text(existing)) = parent.children.last_mut() {
        existing.push_str(text);
    } else {
        parent.children.push(XmlNode::Text(text.to_string()));
    }
}

fn collect_used_prefixes(element: &XmlElement, used: &mut HashSet<Option<String>>) {
    let (prefix, _) = split_qname(&element.name);
    used.insert(prefix.map(str::to_string));
    // Unprefixed attributes live in no namespace; only prefixed ones pull
    // a declaration into scope.
    for attr in &element.attributes {
        if let (Some(prefix), _) = split_qname(&attr.name) {
            used.insert(Some(prefix.to_string()));
        }
    }
    for child in element.elements() {
        collect_used_prefixes(child, used);
    }
}

fn collect_text(element: &XmlElement, out: &mut String) {
    for child in &element.children {
        match child {
            XmlNode::Text(t) => out.push_str(t),
            XmlNode::Element(e) => collect_text(e, out),
        }
    }
}

pub fn escape_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            _ => result.push(c),
        }
    }
    result
}

pub fn escape_attr(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\r' => result.push_str("&#13;"),
            '\n' => result.push_str("&#10;"),
            '\t' => result.push_str("&#9;"),
            _ => result.push(c),
        }
    }
    result
}
