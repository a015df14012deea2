//! Property id table (`BR`).
//!
//! `_all` is always id 0. Every other property name is numbered from 1 in
//! sorted order, so ids are stable across runs and across units.

use crate::kcode::KCode;
use crate::model::ExprModel;
use serde::Serialize;
use std::collections::BTreeSet;

pub const ALL_PROPERTY: &str = "_all";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyTable {
    /// Sorted, without `_all`.
    names: Vec<String>,
}

impl PropertyTable {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|n| n != ALL_PROPERTY)
            .collect();
        Self {
            names: set.into_iter().collect(),
        }
    }

    /// Variable names plus the bindable properties of used expressions.
    pub fn for_model(model: &ExprModel) -> Self {
        let variables = model.variables.iter().map(|v| v.name.clone());
        let properties = model
            .exprs
            .iter()
            .filter(|e| e.is_used)
            .flat_map(|e| e.bindable_properties.iter().cloned());
        Self::from_names(variables.chain(properties))
    }

    pub fn merge<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a PropertyTable>,
    {
        Self::from_names(tables.into_iter().flat_map(|t| t.names.iter().cloned()))
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        if name == ALL_PROPERTY {
            return Some(0);
        }
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok().map(|i| i + 1)
    }

    /// `(name, id)` including `_all`.
    pub fn entries(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        std::iter::once((ALL_PROPERTY, 0))
            .chain(self.names.iter().enumerate().map(|(i, n)| (n.as_str(), i + 1)))
    }

    pub fn len(&self) -> usize {
        self.names.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Source of the constants class.
    pub fn render(&self, package: &str, class_name: &str) -> String {
        let mut code = KCode::new();
        if !package.is_empty() {
            code.nl(format!("package {};", package)).nl("");
        }
        code.block(format!("public class {}", class_name), |k| {
            for (name, id) in self.entries() {
                k.nl(format!("public static final int {} = {};", name, id));
            }
        });
        code.finish()
    }
}
