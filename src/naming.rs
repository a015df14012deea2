//! Naming Module for the Binder Compiler
//!
//! Generated identifiers are derived from expression keys and made unique per
//! scope. The scope is always passed explicitly.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref NON_IDENTIFIER_RE: Regex = Regex::new(r"[^A-Za-z0-9_]+").unwrap();
}

/// Where a generated name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    Field,
    Method,
    Flag,
    ExecutePending,
    ConstructorParam,
}

/// Identifier built from a unique key: every run of non-identifier characters
/// starts a new camel-case word.
///
/// `user.name` becomes `userName`, `flag ? a : b` becomes `flagAB`.
pub fn readable_name(key: &str) -> String {
    let mut out = String::new();
    for (index, word) in NON_IDENTIFIER_RE
        .split(key)
        .filter(|w| !w.is_empty())
        .enumerate()
    {
        if index == 0 {
            out.push_str(word);
        } else {
            out.push_str(&capitalize(word));
        }
    }
    if out.is_empty() {
        out.push_str("expr");
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Per-unit registry of taken names.
#[derive(Debug, Default)]
pub struct NameRegistry {
    taken: HashMap<NameScope, HashSet<String>>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_taken(&self, scope: NameScope, name: &str) -> bool {
        let in_scope = |s: NameScope| self.taken.get(&s).is_some_and(|set| set.contains(name));
        // Everything except method locals shares the class member namespace.
        in_scope(scope) || (scope != NameScope::Method && in_scope(NameScope::Field))
    }

    /// Reserve `base` in `scope`, appending 1, 2, ... until it is free.
    pub fn unique(&mut self, base: &str, scope: NameScope) -> String {
        let base = match scope {
            NameScope::ExecutePending => decapitalize(base),
            _ => base.to_string(),
        };
        let mut candidate = base.clone();
        let mut suffix = 0;
        while self.is_taken(scope, &candidate) {
            suffix += 1;
            candidate = format!("{}{}", base, suffix);
        }
        self.taken.entry(scope).or_default().insert(candidate.clone());
        candidate
    }

    /// Mark a fixed name as used without suffixing it.
    pub fn reserve(&mut self, name: &str, scope: NameScope) {
        self.taken.entry(scope).or_default().insert(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_names_are_camel_cased_identifiers() {
        assert_eq!(readable_name("user.name"), "userName");
        assert_eq!(readable_name("flag ? a : b"), "flagAB");
        assert_eq!(readable_name("user.getAge() > 18"), "userGetAge18");
        assert_eq!(readable_name("3"), "_3");
        assert_eq!(readable_name("!"), "expr");
    }

    #[test]
    fn unique_names_get_numeric_suffixes() {
        let mut names = NameRegistry::new();
        assert_eq!(names.unique("user", NameScope::Method), "user");
        assert_eq!(names.unique("user", NameScope::Method), "user1");
        assert_eq!(names.unique("user", NameScope::Method), "user2");
    }

    #[test]
    fn member_scopes_collide_with_fields() {
        let mut names = NameRegistry::new();
        names.reserve("mUser", NameScope::Field);
        assert_eq!(names.unique("mUser", NameScope::Flag), "mUser1");
        assert_eq!(names.unique("mUser", NameScope::Method), "mUser");
    }

    #[test]
    fn execute_pending_names_are_decapitalized() {
        let mut names = NameRegistry::new();
        assert_eq!(names.unique("Handler", NameScope::ExecutePending), "handler");
    }
}
