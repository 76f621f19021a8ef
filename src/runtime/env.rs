use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// A chain of lexical scopes. Cloning shares the scope, so closures see later
/// assignments to the variables they captured.
#[derive(Debug, Clone, Default)]
pub(crate) struct Env(Rc<RefCell<Scope>>);

#[derive(Debug, Default)]
struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

impl Env {
    pub fn root(vars: impl IntoIterator<Item = (String, Value)>) -> Self {
        Env(Rc::new(RefCell::new(Scope {
            vars: vars.into_iter().collect(),
            parent: None,
        })))
    }

    /// A new innermost scope whose parent is `self`.
    pub fn child(&self) -> Self {
        Env(Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        match scope.vars.get(name) {
            Some(value) => Some(value.clone()),
            None => scope.parent.as_ref().and_then(|p| p.get(name)),
        }
    }

    /// Binds `name` in this scope, shadowing outer bindings.
    pub fn declare(&self, name: &str, value: Value) {
        self.0.borrow_mut().vars.insert(name.to_string(), value);
    }

    /// Assigns to the nearest scope that binds `name`, or declares it here.
    pub fn set(&self, name: &str, value: Value) {
        if !self.assign_existing(name, &value) {
            self.declare(name, value);
        }
    }

    fn assign_existing(&self, name: &str, value: &Value) -> bool {
        let mut scope = self.0.borrow_mut();
        if let Some(slot) = scope.vars.get_mut(name) {
            *slot = value.clone();
            return true;
        }
        let parent = scope.parent.clone();
        drop(scope);
        parent.is_some_and(|p| p.assign_existing(name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_reaches_enclosing_scope() {
        let root = Env::root([("a".to_string(), Value::Int(1))]);
        let inner = root.child();
        inner.set("a", Value::Int(2));
        inner.set("b", Value::Int(3));
        assert_eq!(root.get("a"), Some(Value::Int(2)));
        assert_eq!(root.get("b"), None);
        assert_eq!(inner.get("b"), Some(Value::Int(3)));
    }

    #[test]
    fn test_declare_shadows() {
        let root = Env::root([("x".to_string(), Value::Int(1))]);
        let inner = root.child();
        inner.declare("x", Value::Int(5));
        assert_eq!(inner.get("x"), Some(Value::Int(5)));
        assert_eq!(root.get("x"), Some(Value::Int(1)));
    }
}
