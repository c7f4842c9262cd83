//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in registration order
//! - Look up the first route whose method and pattern both match
//! - Return the matched handler with its captures, or an explicit no-match
//!
//! # Design Decisions
//! - Registration order is precedence: first match wins, not best match
//! - O(1) update-by-pattern via a side index into the ordered list
//! - Exact verb is consulted before the ALL wildcard within one pattern

use std::collections::HashMap;
use std::sync::Arc;

use hyper::Method;

use crate::error::RouteError;
use crate::routing::matcher::RoutePattern;

/// Which verbs a handler answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodFilter {
    /// Every method.
    All,
    /// One specific method.
    Exact(Method),
}

impl MethodFilter {
    pub fn name(&self) -> String {
        match self {
            MethodFilter::All => "ALL".to_string(),
            MethodFilter::Exact(method) => method.to_string(),
        }
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        MethodFilter::Exact(method)
    }
}

/// One pattern with its per-method handlers.
#[derive(Debug)]
struct RouteEntry<H> {
    pattern: RoutePattern,
    handlers: HashMap<MethodFilter, Arc<H>>,
    /// Method registration order, for listing.
    order: Vec<MethodFilter>,
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<H> {
    pub handler: Arc<H>,
    /// Index 0 is the whole path, 1..n the capture groups.
    pub captures: Vec<String>,
    pub pattern: String,
}

/// Insertion-ordered route table.
#[derive(Debug)]
pub struct RouteTable<H> {
    entries: Vec<RouteEntry<H>>,
    index: HashMap<String, usize>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler for `(pattern, method)`.
    ///
    /// New patterns are appended; re-registering an existing pattern keeps
    /// its original position.
    pub fn register(
        &mut self,
        pattern: &str,
        method: impl Into<MethodFilter>,
        handler: H,
    ) -> Result<(), RouteError> {
        let method = method.into();
        let position = match self.index.get(pattern) {
            Some(&i) => i,
            None => {
                let compiled = RoutePattern::new(pattern)?;
                self.entries.push(RouteEntry {
                    pattern: compiled,
                    handlers: HashMap::new(),
                    order: Vec::new(),
                });
                let i = self.entries.len() - 1;
                self.index.insert(pattern.to_string(), i);
                i
            }
        };

        let entry = &mut self.entries[position];
        if entry.handlers.insert(method.clone(), Arc::new(handler)).is_none() {
            entry.order.push(method);
        }
        Ok(())
    }

    /// Find the first route matching `method` and `path` (query already stripped).
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<H>> {
        let exact = MethodFilter::Exact(method.clone());
        for entry in &self.entries {
            let handler = entry
                .handlers
                .get(&exact)
                .or_else(|| entry.handlers.get(&MethodFilter::All));

            let Some(handler) = handler else {
                continue;
            };

            if let Some(captures) = entry.pattern.captures(path) {
                return Some(RouteMatch {
                    handler: Arc::clone(handler),
                    captures,
                    pattern: entry.pattern.as_str().to_string(),
                });
            }
        }
        None
    }

    /// Find the first route whose pattern matches, ignoring methods.
    pub fn find_any(&self, path: &str) -> Option<RouteMatch<H>> {
        self.find_filtered(path, &MethodFilter::All)
    }

    fn find_filtered(&self, path: &str, filter: &MethodFilter) -> Option<RouteMatch<H>> {
        self.entries.iter().find_map(|entry| {
            let handler = entry.handlers.get(filter)?;
            entry.pattern.captures(path).map(|captures| RouteMatch {
                handler: Arc::clone(handler),
                captures,
                pattern: entry.pattern.as_str().to_string(),
            })
        })
    }

    /// Patterns in registration order with their method names.
    pub fn list(&self) -> Vec<(String, Vec<String>)> {
        self.entries
            .iter()
            .map(|entry| {
                (
                    entry.pattern.as_str().to_string(),
                    entry.order.iter().map(MethodFilter::name).collect(),
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
