//! Built-in stages.
//!
//! A small set of stages that makes sitemaps runnable without custom
//! code: request parameters or literal text as sources, an identity and a
//! wrapping transform, and XML or plain-text serialization.

use crate::error::ProcessingError;
use crate::registry::{StageArgs, StageRegistry};
use crate::stage::{Cacheable, Sink, Source, StageEnv, Transform};
use folio_cache::{CacheKey, Validity};
use folio_core::{Hash, Parameters};
use folio_events::{ContentHandler, Event, NamespaceAdapter, QName, StreamError};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// Namespace of the document emitted by [`ParametersSource`]
pub const PARAMS_NAMESPACE: &str = "urn:folio:params";

/// Register every built-in stage
pub fn register(registry: &mut StageRegistry) {
    registry.register_source("parameters", |args| Ok(ParametersSource::new(args.request.clone())));
    registry.register_source("text", |args| {
        args.require("text", "content").map(TextSource::new)
    });
    registry.register_source("file", |args| args.require("file", "src").map(FileSource::new));
    registry.register_transform("identity", |_args| Ok(IdentityTransform));
    registry.register_transform("wrap", WrapTransform::from_args);
    registry.register_sink("xml", |_args| Ok(XmlSink::new()));
    registry.register_sink("text", |_args| Ok(TextSink::default()));
}

/// Emits the request parameters as a `params` document
///
/// Parameters are emitted ordered by name, so requests carrying the same
/// parameters in a different order produce the same document and share
/// one cache entry.
#[derive(Debug, Clone)]
pub struct ParametersSource {
    params: Parameters,
}

impl ParametersSource {
    /// Source over a name-ordered snapshot of `params`
    #[must_use]
    pub fn new(params: Parameters) -> Self {
        Self {
            params: params.sorted(),
        }
    }
}

impl Source for ParametersSource {
    fn produce(&mut self, _env: &StageEnv<'_>, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        let mut adapter = NamespaceAdapter::new(out);
        adapter.start_document()?;
        adapter.start_element("params", &[("xmlns", PARAMS_NAMESPACE)])?;
        for (name, value) in self.params.iter() {
            adapter.start_element("param", &[("name", name)])?;
            adapter.characters(value)?;
            adapter.end_element("param")?;
        }
        adapter.end_element("params")?;
        adapter.end_document()
    }

    fn cacheable(&self) -> Option<&dyn Cacheable> {
        Some(self)
    }
}

impl Cacheable for ParametersSource {
    fn cache_key(&self) -> Option<CacheKey> {
        Some(CacheKey::new(format!("parameters:{}", self.params.digest().to_hex())))
    }

    fn validity(&self) -> Option<Validity> {
        Some(Validity::Always)
    }
}

/// Emits `<text>` holding a literal string
#[derive(Debug, Clone)]
pub struct TextSource {
    content: String,
    digest: Hash,
}

impl TextSource {
    /// Source emitting `content`
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let digest = Hash::compute(content.as_bytes());
        Self { content, digest }
    }
}

impl Source for TextSource {
    fn produce(&mut self, _env: &StageEnv<'_>, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        out.handle(Event::StartDocument)?;
        out.handle(Event::start("text"))?;
        out.handle(Event::text(self.content.as_str()))?;
        out.handle(Event::end("text"))?;
        out.handle(Event::EndDocument)
    }

    fn cacheable(&self) -> Option<&dyn Cacheable> {
        Some(self)
    }
}

impl Cacheable for TextSource {
    fn cache_key(&self) -> Option<CacheKey> {
        Some(CacheKey::new(format!("text:{}", self.digest.to_hex())))
    }

    fn validity(&self) -> Option<Validity> {
        Some(Validity::Digest(self.digest))
    }
}

/// Emits the contents of a UTF-8 file as `<file name="...">`
///
/// Cached output stays valid while the file's modification time is
/// unchanged.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Source reading `path` at production time
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn modified_ms(&self) -> Option<u64> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        let since = modified.duration_since(UNIX_EPOCH).ok()?;
        u64::try_from(since.as_millis()).ok()
    }
}

impl Source for FileSource {
    fn produce(&mut self, _env: &StageEnv<'_>, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        let name = self.path.display().to_string();
        let content = std::fs::read_to_string(&self.path)
            .map_err(|err| StreamError::stage("file", format!("{}: {}", name, err)))?;

        let mut adapter = NamespaceAdapter::new(out);
        adapter.start_document()?;
        adapter.start_element("file", &[("name", name.as_str())])?;
        adapter.characters(&content)?;
        adapter.end_element("file")?;
        adapter.end_document()
    }

    fn cacheable(&self) -> Option<&dyn Cacheable> {
        Some(self)
    }
}

impl Cacheable for FileSource {
    fn cache_key(&self) -> Option<CacheKey> {
        Some(CacheKey::new(format!("file:{}", self.path.display())))
    }

    fn validity(&self) -> Option<Validity> {
        self.modified_ms().map(Validity::Timestamp)
    }
}

/// Forwards every event unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn transform(&mut self, event: Event, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        out.handle(event)
    }
}

/// Wraps the document element in one more element
#[derive(Debug, Clone)]
pub struct WrapTransform {
    name: QName,
}

impl WrapTransform {
    /// Wrap in `element`, in `namespace` under `prefix` when given
    #[must_use]
    pub fn new(element: &str, namespace: Option<&str>, prefix: Option<&str>) -> Self {
        let name = match namespace {
            Some(uri) => QName::prefixed(prefix.unwrap_or(""), uri, element),
            None => QName::local(element),
        };
        Self { name }
    }

    /// Construct from stage parameters `element`, `namespace` and `prefix`
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::StageInit`] if `element` is missing or
    /// `prefix` is given without `namespace`
    pub fn from_args(args: &StageArgs<'_>) -> Result<Self, ProcessingError> {
        let element = args.require("wrap", "element")?;
        let namespace = args.params.get("namespace");
        let prefix = args.params.get("prefix");
        if prefix.is_some() && namespace.is_none() {
            return Err(ProcessingError::StageInit {
                type_id: "wrap".to_string(),
                message: "'prefix' requires 'namespace'".to_string(),
            });
        }
        Ok(Self::new(element, namespace, prefix))
    }

    fn declares_namespace(&self) -> bool {
        !self.name.uri.is_empty()
    }
}

impl Transform for WrapTransform {
    fn transform(&mut self, event: Event, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        match event {
            Event::StartDocument => {
                out.handle(Event::StartDocument)?;
                if self.declares_namespace() {
                    out.handle(Event::StartPrefixMapping {
                        prefix: self.name.prefix.clone(),
                        uri: self.name.uri.clone(),
                    })?;
                }
                out.handle(Event::StartElement {
                    name: self.name.clone(),
                    attributes: Vec::new(),
                })
            }
            Event::EndDocument => {
                out.handle(Event::EndElement {
                    name: self.name.clone(),
                })?;
                if self.declares_namespace() {
                    out.handle(Event::EndPrefixMapping {
                        prefix: self.name.prefix.clone(),
                    })?;
                }
                out.handle(Event::EndDocument)
            }
            other => out.handle(other),
        }
    }

    fn cacheable(&self) -> Option<&dyn Cacheable> {
        Some(self)
    }
}

impl Cacheable for WrapTransform {
    fn cache_key(&self) -> Option<CacheKey> {
        let QName { uri, local, prefix } = &self.name;
        let parts = Hash::compute_parts([prefix.as_str(), uri.as_str(), local.as_str()]);
        Some(CacheKey::new(format!("wrap:{}", parts.to_hex())))
    }

    fn validity(&self) -> Option<Validity> {
        Some(Validity::Always)
    }
}

/// Serializes the stream as XML text
#[derive(Debug, Default)]
pub struct XmlSink {
    out: String,
    pending: Vec<(String, String)>,
    // default namespace in scope for each open element
    defaults: Vec<String>,
}

impl XmlSink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentHandler for XmlSink {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        match event {
            Event::StartDocument => self.out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"),
            Event::EndDocument | Event::EndPrefixMapping { .. } => {}
            Event::StartPrefixMapping { prefix, uri } => self.pending.push((prefix, uri)),
            Event::StartElement { name, attributes } => {
                self.out.push('<');
                self.out.push_str(&name.raw());
                let mut default = self.defaults.last().cloned().unwrap_or_default();
                let mut redeclared = false;
                for (prefix, uri) in self.pending.drain(..) {
                    if prefix.is_empty() {
                        self.out.push_str(" xmlns");
                        default.clone_from(&uri);
                        redeclared = true;
                    } else {
                        self.out.push_str(" xmlns:");
                        self.out.push_str(&prefix);
                    }
                    push_attribute_value(&mut self.out, &uri);
                }
                if name.prefix.is_empty() && name.uri != default && !redeclared {
                    self.out.push_str(" xmlns");
                    push_attribute_value(&mut self.out, &name.uri);
                    default = name.uri;
                }
                self.defaults.push(default);
                for attribute in &attributes {
                    self.out.push(' ');
                    self.out.push_str(&attribute.name.raw());
                    push_attribute_value(&mut self.out, &attribute.value);
                }
                self.out.push('>');
            }
            Event::EndElement { name } => {
                self.defaults.pop();
                self.out.push_str("</");
                self.out.push_str(&name.raw());
                self.out.push('>');
            }
            Event::Characters(text) => push_escaped(&mut self.out, &text, false),
            Event::Comment(text) => {
                self.out.push_str("<!--");
                push_comment(&mut self.out, &text);
                self.out.push_str("-->");
            }
            Event::ProcessingInstruction { target, data } => {
                self.out.push_str("<?");
                self.out.push_str(&target);
                if !data.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(&data);
                }
                self.out.push_str("?>");
            }
        }
        Ok(())
    }
}

impl Sink for XmlSink {
    fn mime_type(&self) -> &str {
        "text/xml"
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out).into_bytes()
    }

    fn recycle(&mut self) {
        self.out.clear();
        self.pending.clear();
        self.defaults.clear();
    }
}

fn push_attribute_value(out: &mut String, value: &str) {
    out.push_str("=\"");
    push_escaped(out, value, true);
    out.push('"');
}

// `--` may not appear inside a comment, nor may it end in `-`
fn push_comment(out: &mut String, text: &str) {
    let mut dash = false;
    for c in text.chars() {
        if c == '-' && dash {
            out.push(' ');
        }
        out.push(c);
        dash = c == '-';
    }
    if dash {
        out.push(' ');
    }
}

fn push_escaped(out: &mut String, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

/// Concatenates character data
#[derive(Debug, Default)]
pub struct TextSink {
    out: String,
}

impl ContentHandler for TextSink {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        if let Event::Characters(text) = event {
            self.out.push_str(&text);
        }
        Ok(())
    }
}

impl Sink for TextSink {
    fn mime_type(&self) -> &str {
        "text/plain"
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out).into_bytes()
    }

    fn recycle(&mut self) {
        self.out.clear();
    }
}
