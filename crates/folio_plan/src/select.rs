//! Conditional branching.
//!
//! A select node picks one branch per request. Ordinary selects hold an
//! ordered list of compiled tests and take the first that passes. Switch
//! selects compute one discriminant value and dispatch on it directly.
//! Either way the `otherwise` branch runs when nothing matched, and a
//! select without one contributes nothing.
//!
//! Expressions are compiled once, when the tree is built. Languages are
//! pluggable through [`LanguageRegistry`].

use folio_core::{NodeId, Parameters};
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// What a test can see about the current request
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Request path
    pub path: &'a str,
    /// Request parameters
    pub params: &'a Parameters,
}

impl<'a> EvalContext<'a> {
    /// Create a context
    #[must_use]
    pub fn new(path: &'a str, params: &'a Parameters) -> Self {
        Self { path, params }
    }
}

/// A compiled boolean condition
pub trait Test: Send + Sync + fmt::Debug {
    /// Evaluate against the request
    fn evaluate(&self, ctx: &EvalContext<'_>) -> bool;
}

/// A compiled discriminant for switch selects
pub trait Discriminant: Send + Sync + fmt::Debug {
    /// Value to dispatch on, `None` when the request has none
    fn discriminant(&self, ctx: &EvalContext<'_>) -> Option<String>;
}

/// Compiles `when test=".."` expressions
pub trait TestLanguage: Send + Sync {
    /// Compile one expression
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the expression is malformed
    fn compile(&self, expression: &str) -> Result<Arc<dyn Test>, String>;
}

/// Compiles the discriminant of a switch select from its attributes
pub trait SwitchLanguage: Send + Sync {
    /// Compile from the select's attributes
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the attributes are unusable
    fn compile(&self, attributes: &IndexMap<String, String>) -> Result<Arc<dyn Discriminant>, String>;
}

/// A registered language
#[derive(Clone)]
pub enum Language {
    /// First-match-wins tests
    Test(Arc<dyn TestLanguage>),
    /// Direct dispatch
    Switch(Arc<dyn SwitchLanguage>),
}

/// Named select languages
#[derive(Clone, Default)]
pub struct LanguageRegistry {
    languages: IndexMap<String, Language>,
}

impl LanguageRegistry {
    /// Name used when a select does not specify one
    pub const DEFAULT_LANGUAGE: &'static str = "parameter";

    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in languages
    ///
    /// - `parameter`: `name=value`, `name!=value`, or bare `name` (present and non-empty)
    /// - `path`: anchored regular expression over the request path
    /// - `parameter-switch`: dispatch on the parameter named by `on`
    /// - `path-switch`: dispatch on the request path
    #[must_use]
    pub fn builtins() -> Self {
        let mut registry = Self::new();
        registry.register_test("parameter", Arc::new(ParameterLanguage));
        registry.register_test("path", Arc::new(PathLanguage));
        registry.register_switch("parameter-switch", Arc::new(ParameterSwitchLanguage));
        registry.register_switch("path-switch", Arc::new(PathSwitchLanguage));
        registry
    }

    /// Register a first-match test language
    pub fn register_test(&mut self, name: impl Into<String>, language: Arc<dyn TestLanguage>) {
        self.languages.insert(name.into(), Language::Test(language));
    }

    /// Register a switch language
    pub fn register_switch(&mut self, name: impl Into<String>, language: Arc<dyn SwitchLanguage>) {
        self.languages.insert(name.into(), Language::Switch(language));
    }

    /// Look up a language
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Language> {
        self.languages.get(name)
    }

    /// Registered names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }
}

impl fmt::Debug for LanguageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.languages.keys()).finish()
    }
}

/// One `when` branch of an ordinary select
#[derive(Debug, Clone)]
pub struct Branch {
    /// Source expression, kept for diagnostics
    pub expression: String,
    /// Compiled test
    pub test: Arc<dyn Test>,
    /// Nodes to execute when the test passes
    pub children: Vec<NodeId>,
}

/// How a select chooses its branch
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Evaluate branches in order, first match wins
    Ordered(Vec<Branch>),
    /// Compute one value and look the branch up
    Switch {
        /// Compiled discriminant
        discriminant: Arc<dyn Discriminant>,
        /// Case value to branch children
        cases: IndexMap<String, Vec<NodeId>>,
    },
}

/// A conditional node
#[derive(Debug, Clone)]
pub struct SelectNode {
    /// Language name
    pub language: String,
    /// Branch selection
    pub dispatch: Dispatch,
    /// Fallback branch
    pub otherwise: Option<Vec<NodeId>>,
}

impl SelectNode {
    /// Children of the chosen branch, `None` when nothing applies
    #[must_use]
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Option<&[NodeId]> {
        let chosen = match &self.dispatch {
            Dispatch::Ordered(branches) => branches
                .iter()
                .find(|branch| branch.test.evaluate(ctx))
                .map(|branch| branch.children.as_slice()),
            Dispatch::Switch { discriminant, cases } => discriminant
                .discriminant(ctx)
                .and_then(|value| cases.get(&value))
                .map(Vec::as_slice),
        };
        chosen.or(self.otherwise.as_deref())
    }

    /// Number of branches, not counting `otherwise`
    #[must_use]
    pub fn branch_count(&self) -> usize {
        match &self.dispatch {
            Dispatch::Ordered(branches) => branches.len(),
            Dispatch::Switch { cases, .. } => cases.len(),
        }
    }
}

// Built-in languages

#[derive(Debug)]
enum ParameterTest {
    Present(String),
    Equals(String, String),
    NotEquals(String, String),
}

impl Test for ParameterTest {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Self::Present(name) => ctx.params.get(name).is_some_and(|v| !v.is_empty()),
            Self::Equals(name, value) => ctx.params.get(name) == Some(value.as_str()),
            Self::NotEquals(name, value) => ctx.params.get(name) != Some(value.as_str()),
        }
    }
}

struct ParameterLanguage;

impl TestLanguage for ParameterLanguage {
    fn compile(&self, expression: &str) -> Result<Arc<dyn Test>, String> {
        let expression = expression.trim();
        let test = if let Some((name, value)) = expression.split_once("!=") {
            ParameterTest::NotEquals(parameter_name(name)?, value.trim().to_string())
        } else if let Some((name, value)) = expression.split_once('=') {
            ParameterTest::Equals(parameter_name(name)?, value.trim().to_string())
        } else {
            ParameterTest::Present(parameter_name(expression)?)
        };
        Ok(Arc::new(test))
    }
}

fn parameter_name(raw: &str) -> Result<String, String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err("missing parameter name".to_string());
    }
    if name.chars().any(char::is_whitespace) {
        return Err(format!("parameter name '{}' contains whitespace", name));
    }
    Ok(name.to_string())
}

#[derive(Debug)]
struct PathTest {
    pattern: Regex,
}

impl Test for PathTest {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        self.pattern.is_match(ctx.path)
    }
}

struct PathLanguage;

impl TestLanguage for PathLanguage {
    fn compile(&self, expression: &str) -> Result<Arc<dyn Test>, String> {
        let pattern = Regex::new(&format!("^(?:{})$", expression)).map_err(|e| e.to_string())?;
        Ok(Arc::new(PathTest { pattern }))
    }
}

#[derive(Debug)]
struct ParameterSwitch {
    name: String,
}

impl Discriminant for ParameterSwitch {
    fn discriminant(&self, ctx: &EvalContext<'_>) -> Option<String> {
        ctx.params.get(&self.name).map(str::to_string)
    }
}

struct ParameterSwitchLanguage;

impl SwitchLanguage for ParameterSwitchLanguage {
    fn compile(&self, attributes: &IndexMap<String, String>) -> Result<Arc<dyn Discriminant>, String> {
        let on = attributes
            .get("on")
            .ok_or_else(|| "parameter switch requires an 'on' attribute".to_string())?;
        Ok(Arc::new(ParameterSwitch {
            name: parameter_name(on)?,
        }))
    }
}

#[derive(Debug)]
struct PathSwitch;

impl Discriminant for PathSwitch {
    fn discriminant(&self, ctx: &EvalContext<'_>) -> Option<String> {
        Some(ctx.path.to_string())
    }
}

struct PathSwitchLanguage;

impl SwitchLanguage for PathSwitchLanguage {
    fn compile(&self, _attributes: &IndexMap<String, String>) -> Result<Arc<dyn Discriminant>, String> {
        Ok(Arc::new(PathSwitch))
    }
}
