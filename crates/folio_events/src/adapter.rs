//! Namespace adapter for flat producers.
//!
//! Some producers only know raw element names and flat `name="value"`
//! attributes. [`NamespaceAdapter`] turns their calls into the
//! namespace-aware event stream: `xmlns` / `xmlns:*` pseudo-attributes
//! become prefix mappings, and every raw name is resolved against the
//! bindings in scope.
//!
//! An unprefixed attribute is in no namespace, even when the element has
//! a default namespace.

use crate::event::{Attribute, Event, QName};
use crate::handler::{ContentHandler, StreamError};

/// Namespace bound to the reserved `xml` prefix
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Translates flat element calls into namespace-aware events
pub struct NamespaceAdapter<H> {
    next: H,
    // (prefix, uri) in declaration order, innermost last
    bindings: Vec<(String, String)>,
    // prefixes declared by each open element
    scopes: Vec<Vec<String>>,
}

impl<H: ContentHandler> NamespaceAdapter<H> {
    /// Wrap `next`
    pub fn new(next: H) -> Self {
        Self {
            next,
            bindings: vec![("xml".to_string(), XML_NAMESPACE.to_string())],
            scopes: Vec::new(),
        }
    }

    /// Unwrap the downstream handler
    pub fn into_inner(self) -> H {
        self.next
    }

    /// Current element depth
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// URI bound to `prefix`, innermost binding first
    #[must_use]
    pub fn lookup(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Forward the document start
    ///
    /// # Errors
    ///
    /// Propagates downstream errors
    pub fn start_document(&mut self) -> Result<(), StreamError> {
        self.next.handle(Event::StartDocument)
    }

    /// Forward the document end
    ///
    /// # Errors
    ///
    /// Returns error if elements are still open, or propagates downstream errors
    pub fn end_document(&mut self) -> Result<(), StreamError> {
        if !self.scopes.is_empty() {
            return Err(StreamError::Unbalanced {
                position: 0,
                reason: format!("{} element(s) still open at end of document", self.scopes.len()),
            });
        }
        self.next.handle(Event::EndDocument)
    }

    /// Start an element given its raw name and flat attributes
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UndeclaredPrefix`] if a name uses an unbound prefix
    pub fn start_element<N, V>(&mut self, raw_name: &str, attributes: &[(N, V)]) -> Result<(), StreamError>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut declared = Vec::new();
        for (name, value) in attributes {
            if let Some(prefix) = declared_prefix(name.as_ref()) {
                declared.push((prefix.to_string(), value.as_ref().to_string()));
            }
        }

        for (prefix, uri) in &declared {
            self.next.handle(Event::StartPrefixMapping {
                prefix: prefix.clone(),
                uri: uri.clone(),
            })?;
            self.bindings.push((prefix.clone(), uri.clone()));
        }
        self.scopes
            .push(declared.into_iter().map(|(prefix, _)| prefix).collect());

        let name = self.resolve(raw_name, true)?;
        let mut resolved = Vec::with_capacity(attributes.len());
        for (attr_name, value) in attributes {
            let attr_name = attr_name.as_ref();
            if declared_prefix(attr_name).is_some() {
                continue;
            }
            resolved.push(Attribute {
                name: self.resolve(attr_name, false)?,
                value: value.as_ref().to_string(),
            });
        }

        self.next.handle(Event::StartElement {
            name,
            attributes: resolved,
        })
    }

    /// End the innermost element
    ///
    /// # Errors
    ///
    /// Returns error if no element is open or the name cannot be resolved
    pub fn end_element(&mut self, raw_name: &str) -> Result<(), StreamError> {
        if self.scopes.is_empty() {
            return Err(StreamError::Unbalanced {
                position: 0,
                reason: format!("end of <{}> with no open element", raw_name),
            });
        }
        let name = self.resolve(raw_name, true)?;
        self.next.handle(Event::EndElement { name })?;

        let declared = self.scopes.pop().unwrap_or_default();
        for prefix in declared.into_iter().rev() {
            self.bindings.pop();
            self.next.handle(Event::EndPrefixMapping { prefix })?;
        }
        Ok(())
    }

    /// Forward character data
    ///
    /// # Errors
    ///
    /// Propagates downstream errors
    pub fn characters(&mut self, text: &str) -> Result<(), StreamError> {
        self.next.handle(Event::Characters(text.to_string()))
    }

    fn resolve(&self, raw: &str, is_element: bool) -> Result<QName, StreamError> {
        match raw.split_once(':') {
            Some((prefix, local)) => {
                let uri = self
                    .lookup(prefix)
                    .ok_or_else(|| StreamError::UndeclaredPrefix {
                        prefix: prefix.to_string(),
                    })?;
                Ok(QName::prefixed(prefix, uri, local))
            }
            None if is_element => Ok(QName::namespaced(self.lookup("").unwrap_or(""), raw)),
            None => Ok(QName::local(raw)),
        }
    }
}

/// Prefix declared by a pseudo-attribute, `Some("")` for `xmlns`
fn declared_prefix(name: &str) -> Option<&str> {
    if name == "xmlns" {
        Some("")
    } else {
        name.strip_prefix("xmlns:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance;
    use proptest::prelude::*;

    const NO_ATTRS: &[(&str, &str)] = &[];

    #[test]
    fn test_default_namespace_applies_to_elements_only() {
        let mut adapter = NamespaceAdapter::new(Vec::new());
        adapter.start_document().unwrap();
        adapter
            .start_element("page", &[("xmlns", "urn:page"), ("id", "p1")])
            .unwrap();
        adapter.end_element("page").unwrap();
        adapter.end_document().unwrap();
        let events = adapter.into_inner();

        assert_eq!(
            events[1],
            Event::StartPrefixMapping {
                prefix: String::new(),
                uri: "urn:page".to_string()
            }
        );
        match &events[2] {
            Event::StartElement { name, attributes } => {
                assert_eq!(name, &QName::namespaced("urn:page", "page"));
                assert_eq!(attributes.len(), 1);
                assert_eq!(attributes[0].name, QName::local("id"));
                assert!(attributes[0].name.uri.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events[4],
            Event::EndPrefixMapping {
                prefix: String::new()
            }
        );
        assert!(balance::validate(&events).is_ok());
    }

    #[test]
    fn test_prefixed_attribute_resolves() {
        let mut adapter = NamespaceAdapter::new(Vec::new());
        adapter.start_document().unwrap();
        adapter
            .start_element("doc", &[("xmlns:i18n", "urn:i18n"), ("i18n:key", "title")])
            .unwrap();
        adapter.end_element("doc").unwrap();
        adapter.end_document().unwrap();
        let events = adapter.into_inner();

        let Event::StartElement { attributes, .. } = &events[2] else {
            panic!("expected element start");
        };
        assert_eq!(attributes[0].name, QName::prefixed("i18n", "urn:i18n", "key"));
    }

    #[test]
    fn test_unbinds_follow_end_element_in_reverse() {
        let mut adapter = NamespaceAdapter::new(Vec::new());
        adapter.start_document().unwrap();
        adapter
            .start_element("r", &[("xmlns:a", "urn:a"), ("xmlns:b", "urn:b")])
            .unwrap();
        adapter.end_element("r").unwrap();
        adapter.end_document().unwrap();
        let events = adapter.into_inner();

        assert_eq!(events[4], Event::end("r"));
        assert_eq!(events[5], Event::EndPrefixMapping { prefix: "b".into() });
        assert_eq!(events[6], Event::EndPrefixMapping { prefix: "a".into() });
    }

    #[test]
    fn test_inner_binding_shadows_outer() {
        let mut adapter = NamespaceAdapter::new(Vec::new());
        adapter.start_document().unwrap();
        adapter.start_element("p:outer", &[("xmlns:p", "urn:one")]).unwrap();
        adapter.start_element("p:inner", &[("xmlns:p", "urn:two")]).unwrap();
        assert_eq!(adapter.lookup("p"), Some("urn:two"));
        adapter.end_element("p:inner").unwrap();
        assert_eq!(adapter.lookup("p"), Some("urn:one"));
        adapter.end_element("p:outer").unwrap();
        assert_eq!(adapter.lookup("p"), None);
    }

    #[test]
    fn test_xml_prefix_is_predeclared() {
        let mut adapter = NamespaceAdapter::new(Vec::new());
        adapter.start_document().unwrap();
        adapter.start_element("doc", &[("xml:lang", "en")]).unwrap();
        let events = adapter.into_inner();
        let Event::StartElement { attributes, .. } = &events[1] else {
            panic!("expected element start");
        };
        assert_eq!(attributes[0].name.uri, XML_NAMESPACE);
    }

    #[test]
    fn test_undeclared_prefix() {
        let mut adapter = NamespaceAdapter::new(Vec::new());
        adapter.start_document().unwrap();
        let err = adapter.start_element("x:doc", NO_ATTRS).unwrap_err();
        assert_eq!(err, StreamError::UndeclaredPrefix { prefix: "x".into() });
    }

    #[test]
    fn test_end_without_start() {
        let mut adapter = NamespaceAdapter::new(Vec::new());
        adapter.start_document().unwrap();
        assert!(adapter.end_element("doc").is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_adapter_output_is_balanced(
            shape in proptest::collection::vec((any::<bool>(), 0usize..3), 0..40)
        ) {
            let mut adapter = NamespaceAdapter::new(Vec::new());
            adapter.start_document().unwrap();
            let mut open: Vec<String> = Vec::new();
            for (i, (push, decls)) in shape.into_iter().enumerate() {
                if push || open.is_empty() {
                    let attrs: Vec<(String, String)> = (0..decls)
                        .map(|d| (format!("xmlns:n{}", d), format!("urn:{}:{}", i, d)))
                        .collect();
                    let name = if decls > 0 { "n0:e".to_string() } else { "e".to_string() };
                    adapter.start_element(&name, &attrs).unwrap();
                    open.push(name);
                } else if let Some(name) = open.pop() {
                    adapter.end_element(&name).unwrap();
                }
            }
            while let Some(name) = open.pop() {
                adapter.end_element(&name).unwrap();
            }
            adapter.end_document().unwrap();
            let events = adapter.into_inner();
            let report = balance::validate(&events).unwrap();
            prop_assert_eq!(report.prefix_binds, report.prefix_unbinds);
        }
    }
}
