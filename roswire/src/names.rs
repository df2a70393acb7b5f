//! ROS graph name resolution and command-line remapping.
//!
//! Names come in three flavors: global (`/foo`), relative (`foo`) and
//! private (`~foo`). A [Resolver] qualifies them against a node's namespace
//! and applies the remap table built from `key:=value` command-line
//! arguments. See <http://wiki.ros.org/Names> for the naming rules.

use std::collections::HashMap;

pub const REMAP_SEPARATOR: &str = ":=";

const SPECIAL_PREFIX: &str = "__";
const PARAM_PREFIX: char = '_';

pub type NameMap = HashMap<String, String>;

#[derive(thiserror::Error, Debug)]
pub enum NameError {
    #[error("Invalid node name: \"{0}\"")]
    InvalidNodeName(String),
}

/// Split command-line arguments into remappings, private parameters,
/// special keys and non-ROS arguments.
///
/// Tokens of the form `key:=value` are sorted by their prefix: `__key`
/// is a reserved special (`__name`, `__ns`, `__master`, ...), `_key` is a
/// private parameter destined for the parameter server, and anything else
/// is a name remapping. Tokens without `:=` are passed through untouched.
pub fn process_args(args: &[String]) -> (NameMap, NameMap, NameMap, Vec<String>) {
    let mut mapping = NameMap::new();
    let mut params = NameMap::new();
    let mut specials = NameMap::new();
    let mut rest = Vec::new();

    for arg in args {
        match arg.split_once(REMAP_SEPARATOR) {
            Some((key, value)) if key.starts_with(SPECIAL_PREFIX) => {
                specials.insert(key.to_string(), value.to_string());
            }
            Some((key, value)) if key.starts_with(PARAM_PREFIX) => {
                params.insert(key[1..].to_string(), value.to_string());
            }
            Some((key, value)) => {
                mapping.insert(key.to_string(), value.to_string());
            }
            None => rest.push(arg.clone()),
        }
    }

    (mapping, params, specials, rest)
}

/// Collapse duplicate separators and strip any trailing one.
fn canonicalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn join(namespace: &str, name: &str) -> String {
    canonicalize(&format!("{namespace}/{name}"))
}

/// Split a node name of the form `[/namespace/]name` into its namespace
/// and base name.
pub fn qualify_node_name(name: &str) -> Result<(String, String), NameError> {
    if name.is_empty() || name.contains('~') || name.contains(char::is_whitespace) {
        return Err(NameError::InvalidNodeName(name.to_string()));
    }

    let canon = canonicalize(name);
    let (namespace, base) = match canon.rfind('/') {
        Some(idx) => {
            let (ns, base) = canon.split_at(idx);
            let ns = if ns.is_empty() { "/" } else { ns };
            (ns.to_string(), base[1..].to_string())
        }
        None => ("/".to_string(), canon),
    };

    if base.is_empty() {
        return Err(NameError::InvalidNodeName(name.to_string()));
    }

    Ok((namespace, base))
}

/// Qualifies graph names against a node's namespace and applies the
/// remap table.
#[derive(Clone, Debug)]
pub struct Resolver {
    namespace: String,
    node_name: String,
    mapping: NameMap,
}

impl Resolver {
    /// Construct a resolver. The remap table keys and values are themselves
    /// resolved against the namespace up front, so lookups compare
    /// fully-qualified names only.
    pub fn new(namespace: &str, node_name: &str, mapping: &NameMap) -> Self {
        let mut resolver = Resolver {
            namespace: canonicalize(namespace),
            node_name: node_name.to_string(),
            mapping: NameMap::new(),
        };

        resolver.mapping = mapping
            .iter()
            .map(|(key, value)| (resolver.resolve(key), resolver.resolve(value)))
            .collect();

        resolver
    }

    /// Qualify a name to its global form.
    ///
    /// Global names pass through, private names are rooted at
    /// `<namespace>/<node_name>`, everything else at `<namespace>`.
    /// Resolution is idempotent.
    pub fn resolve(&self, name: &str) -> String {
        match name.chars().next() {
            None => self.namespace.clone(),
            Some('/') => canonicalize(name),
            Some('~') => join(&join(&self.namespace, &self.node_name), &name[1..]),
            Some(_) => join(&self.namespace, name),
        }
    }

    /// Resolve a name, then substitute it through the remap table.
    pub fn remap(&self, name: &str) -> String {
        let resolved = self.resolve(name);
        match self.mapping.get(&resolved) {
            Some(target) => target.clone(),
            None => resolved,
        }
    }
}
