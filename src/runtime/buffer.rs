use std::collections::HashMap;
use std::rc::Rc;

use super::Proc;
use crate::error::{Error, Result, RuntimeErrorKind};
use crate::value::Value;

/// Output buffer shared by every unit taking part in one render.
///
/// Besides the text, a buffer holds the state that lives for exactly one render:
/// open deferred-output scopes, the JSON document under construction and the
/// instance variables (`@title`).
#[derive(Debug, Default)]
pub struct Buffer {
    text: String,
    scopes: Vec<Vec<Part>>,
    json: Vec<Option<serde_json::Value>>,
    ivars: HashMap<String, Value>,
}

/// A segment of a deferred-output scope.
#[derive(Debug)]
pub(crate) enum Part {
    Text(String),
    Deferred(Rc<Proc>),
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends text, into the innermost deferred scope when one is open.
    pub fn push_str(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.scopes.last_mut() {
            Some(parts) => match parts.last_mut() {
                Some(Part::Text(last)) => last.push_str(text),
                _ => parts.push(Part::Text(text.to_string())),
            },
            None => self.text.push_str(text),
        }
    }

    /// Text written so far outside any deferred scope.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// The JSON document built so far, serialized. `null` when nothing was emitted.
    pub fn json_output(&self) -> String {
        match self.json.first() {
            Some(Some(doc)) => doc.to_string(),
            _ => "null".to_string(),
        }
    }

    // =========================================================================
    // Deferred output
    // =========================================================================

    pub(crate) fn begin_defer(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub(crate) fn in_defer(&self) -> bool {
        !self.scopes.is_empty()
    }

    pub(crate) fn defer(&mut self, proc: Rc<Proc>) {
        if let Some(parts) = self.scopes.last_mut() {
            parts.push(Part::Deferred(proc));
        }
    }

    /// Closes the innermost scope and returns its parts in order.
    pub(crate) fn end_defer(&mut self) -> Vec<Part> {
        self.scopes.pop().unwrap_or_default()
    }

    pub(crate) fn defer_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Drops scopes opened after `depth`, after an error interrupted their unit.
    pub(crate) fn abandon_defer(&mut self, depth: usize) {
        if self.scopes.len() > depth {
            tracing::warn!(
                open = self.scopes.len() - depth,
                "deferred output scope left open by an error"
            );
            self.scopes.truncate(depth);
        }
    }

    // =========================================================================
    // Instance variables
    // =========================================================================

    pub(crate) fn ivar(&self, name: &str) -> Value {
        self.ivars.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn set_ivar(&mut self, name: &str, value: Value) {
        self.ivars.insert(name.to_string(), value);
    }

    // =========================================================================
    // JSON documents
    // =========================================================================

    fn json_frame(&mut self) -> &mut Option<serde_json::Value> {
        if self.json.is_empty() {
            self.json.push(None);
        }
        let last = self.json.len() - 1;
        &mut self.json[last]
    }

    /// Sets `key` on the current object.
    pub(crate) fn json_set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        let frame = self.json_frame();
        let object = frame.get_or_insert_with(|| serde_json::Value::Object(Default::default()));
        match object {
            serde_json::Value::Object(map) => {
                map.insert(key.to_string(), value);
                Ok(())
            }
            _ => Err(json_conflict("set a key on", "an array")),
        }
    }

    /// Appends to the current array.
    pub(crate) fn json_push(&mut self, value: serde_json::Value) -> Result<()> {
        let frame = self.json_frame();
        let array = frame.get_or_insert_with(|| serde_json::Value::Array(Vec::new()));
        match array {
            serde_json::Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(json_conflict("append to", "an object")),
        }
    }

    pub(crate) fn json_begin(&mut self) {
        self.json_frame();
        self.json.push(None);
    }

    /// Closes a nested value, returning what the block built.
    pub(crate) fn json_end(&mut self) -> serde_json::Value {
        if self.json.len() > 1 {
            self.json.pop().flatten().unwrap_or(serde_json::Value::Null)
        } else {
            serde_json::Value::Null
        }
    }
}

fn json_conflict(action: &str, current: &str) -> Error {
    Error::runtime(RuntimeErrorKind::Type(format!(
        "cannot {action} a JSON value that is already {current}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_goes_to_innermost_scope() {
        let mut buf = Buffer::new();
        buf.push_str("a");
        buf.begin_defer();
        buf.push_str("b");
        buf.push_str("c");
        assert_eq!(buf.as_str(), "a");
        let parts = buf.end_defer();
        assert!(matches!(parts.as_slice(), [Part::Text(t)] if t == "bc"));
    }

    #[test]
    fn test_abandon_drops_only_newer_scopes() {
        let mut buf = Buffer::new();
        buf.begin_defer();
        let depth = buf.defer_depth();
        buf.begin_defer();
        buf.begin_defer();
        buf.abandon_defer(depth);
        assert_eq!(buf.defer_depth(), 1);
    }

    #[test]
    fn test_json_objects_and_arrays() {
        let mut buf = Buffer::new();
        buf.json_set("name", json!("x")).unwrap();
        buf.json_begin();
        buf.json_push(json!(1)).unwrap();
        buf.json_push(json!(2)).unwrap();
        let items = buf.json_end();
        buf.json_set("items", items).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&buf.json_output()).unwrap();
        assert_eq!(doc, json!({"name": "x", "items": [1, 2]}));
        assert!(buf.json_push(json!(3)).is_err());
    }

    #[test]
    fn test_empty_json_document_is_null() {
        assert_eq!(Buffer::new().json_output(), "null");
    }

    #[test]
    fn test_ivars_default_to_nil() {
        let mut buf = Buffer::new();
        assert_eq!(buf.ivar("title"), Value::Nil);
        buf.set_ivar("title", Value::from("x"));
        assert_eq!(buf.ivar("title"), Value::from("x"));
    }
}
