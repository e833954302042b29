//! Sorted variable arrays.

use crate::error::{CoreError, CoreResult};
use crate::text::{VarKey, Variable};
use std::sync::{Arc, LazyLock};

static NO_VARS: LazyLock<Arc<[Variable]>> = LazyLock::new(|| Arc::from(Vec::new()));

/// Variables of one record, sorted by key and searched by bisection.
///
/// Cloning shares the array. `with` and `without` return a clone of `self`
/// when nothing changes.
#[derive(Debug, Clone)]
pub struct Variables(Arc<[Variable]>);

impl Default for Variables {
    fn default() -> Self {
        Self(Arc::clone(&*NO_VARS))
    }
}

impl Variables {
    /// Builds a variable array, rejecting duplicate keys.
    pub fn from_vec(mut vars: Vec<Variable>) -> CoreResult<Self> {
        if vars.is_empty() {
            return Ok(Self::default());
        }
        vars.sort_by(|a, b| a.key().cmp(b.key()));
        if let Some(w) = vars.windows(2).find(|w| w[0].key() == w[1].key()) {
            return Err(CoreError::duplicate_name(w[0].key().name()));
        }
        Ok(Self(Arc::from(vars)))
    }

    fn search(&self, key: &VarKey) -> Result<usize, usize> {
        self.0.binary_search_by(|v| v.key().cmp(key))
    }

    /// Looks up a variable.
    #[must_use]
    pub fn get(&self, key: &VarKey) -> Option<&Variable> {
        self.search(key).ok().map(|i| &self.0[i])
    }

    /// Returns the array with `var` added or replaced.
    #[must_use]
    pub fn with(&self, var: Variable) -> Self {
        match self.search(var.key()) {
            Ok(i) if self.0[i] == var => self.clone(),
            Ok(i) => {
                let mut next = self.0.to_vec();
                next[i] = var;
                Self(Arc::from(next))
            }
            Err(i) => {
                let mut next = Vec::with_capacity(self.0.len() + 1);
                next.extend_from_slice(&self.0[..i]);
                next.push(var);
                next.extend_from_slice(&self.0[i..]);
                Self(Arc::from(next))
            }
        }
    }

    /// Returns the array without `key`.
    #[must_use]
    pub fn without(&self, key: &VarKey) -> Self {
        match self.search(key) {
            Err(_) => self.clone(),
            Ok(_) if self.0.len() == 1 => Self::default(),
            Ok(i) => {
                let mut next = self.0.to_vec();
                next.remove(i);
                Self(Arc::from(next))
            }
        }
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates in key order.
    pub fn iter(&self) -> std::slice::Iter<'_, Variable> {
        self.0.iter()
    }

    /// True when both share one array.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Variables {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl<'a> IntoIterator for &'a Variables {
    type Item = &'a Variable;
    type IntoIter = std::slice::Iter<'a, Variable>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::VarValue;

    fn var(key: &str, v: i32) -> Variable {
        Variable::new(VarKey::new(key).unwrap(), VarValue::Int(v))
    }

    #[test]
    fn stays_sorted() {
        let vars = Variables::default()
            .with(var("c", 1))
            .with(var("a", 2))
            .with(var("b", 3));
        let keys: Vec<_> = vars.iter().map(|v| v.key().name().to_string()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(
            vars.get(&VarKey::new("b").unwrap()).map(Variable::value),
            Some(&VarValue::Int(3))
        );
    }

    #[test]
    fn unchanged_shares_array() {
        let vars = Variables::default().with(var("a", 1));
        assert!(vars.with(var("a", 1)).ptr_eq(&vars));
        assert!(!vars.with(var("a", 2)).ptr_eq(&vars));
        assert!(vars.without(&VarKey::new("zz").unwrap()).ptr_eq(&vars));
    }

    #[test]
    fn removing_last_gives_shared_empty() {
        let vars = Variables::default().with(var("a", 1));
        let empty = vars.without(&VarKey::new("a").unwrap());
        assert!(empty.is_empty());
        assert!(empty.ptr_eq(&Variables::default()));
    }

    #[test]
    fn from_vec_rejects_duplicates() {
        assert!(Variables::from_vec(vec![var("a", 1), var("a", 2)]).is_err());
        let vars = Variables::from_vec(vec![var("z", 1), var("m", 2)]).unwrap();
        assert_eq!(vars.iter().next().map(|v| v.key().name()), Some("m"));
    }
}
