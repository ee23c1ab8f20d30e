//! Represents parsed manifest strings with embedded variable references,
//! e.g. `c++ $in -o $out`, and the scoped environments they are expanded in.

use crate::densemap::{self, DenseMap};
use crate::smallmap::SmallMap;
use std::borrow::Cow;

/// An environment providing a mapping of variable name to variable value.
/// A given EvalString may be expanded with multiple environments as possible
/// context.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// One token within an EvalString, either literal text or a variable
/// reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<T: AsRef<str>> {
    Literal(T),
    VarRef(T),
}

/// A parsed but unexpanded variable-reference string, e.g. "cc $in -o $out".
/// This is generic to support EvalString<&str>, which is used for
/// immediately-expanded evals like top-level bindings, and EvalString<String>,
/// which is used for delayed evals like in `rule` blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalString<T: AsRef<str>>(Vec<EvalPart<T>>);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(parts: Vec<EvalPart<T>>) -> Self {
        EvalString(parts)
    }

    /// Expand against a stack of environments; the first env that knows a
    /// variable wins, unknown variables expand to nothing.
    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut val = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => val.push_str(s.as_ref()),
                EvalPart::VarRef(v) => {
                    for env in envs {
                        if let Some(v) = env.get_var(v.as_ref()) {
                            val.push_str(&v);
                            break;
                        }
                    }
                }
            }
        }
        val
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl EvalString<&str> {
    pub fn into_owned(self) -> EvalString<String> {
        EvalString(
            self.0
                .into_iter()
                .map(|part| match part {
                    EvalPart::Literal(s) => EvalPart::Literal(s.to_owned()),
                    EvalPart::VarRef(s) => EvalPart::VarRef(s.to_owned()),
                })
                .collect(),
        )
    }
}

/// A single scope's worth of variable definitions, borrowed from the
/// manifest text during parsing.
#[derive(Debug, Default)]
pub struct Vars<'text>(SmallMap<&'text str, String>);

impl<'text> Vars<'text> {
    pub fn insert(&mut self, key: &'text str, val: String) {
        self.0.insert(key, val);
    }
    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }
}

impl<'text> Env for Vars<'text> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.0.get(var).map(|v| Cow::Borrowed(v.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl densemap::Index for ScopeId {
    fn index(self) -> usize {
        self.0 as usize
    }
    fn from_index(i: usize) -> Self {
        ScopeId(i as u32)
    }
}

/// One lexical scope of evaluated bindings.  `include` shares the including
/// file's scope; `subninja` introduces a child scope.
#[derive(Debug, Default)]
pub struct Scope {
    vars: SmallMap<String, String>,
    parent: Option<ScopeId>,
}

/// Arena of all scopes seen while loading manifests.  Edges hold a ScopeId
/// and resolve free variables up the parent chain.
#[derive(Debug)]
pub struct Scopes(DenseMap<ScopeId, Scope>);

impl Scopes {
    pub fn new() -> Self {
        let mut scopes = DenseMap::new();
        scopes.push(Scope::default());
        Scopes(scopes)
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn new_child(&mut self, parent: ScopeId) -> ScopeId {
        self.0.push(Scope {
            vars: SmallMap::default(),
            parent: Some(parent),
        })
    }

    pub fn add_binding(&mut self, id: ScopeId, key: String, val: String) {
        self.0.get_mut(id).vars.insert(key, val);
    }

    /// Look a variable up through the scope chain.
    pub fn lookup(&self, id: ScopeId, var: &str) -> Option<&str> {
        let mut scope = self.0.get(id);
        loop {
            if let Some(val) = scope.vars.get(var) {
                return Some(val);
            }
            scope = self.0.get(scope.parent?);
        }
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes::new()
    }
}
