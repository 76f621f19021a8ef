//! Generated-line to template-line maps and backtrace translation.
//!
//! Each compiled unit gets a synthetic identity (`compiled:7:card.tpl`). Backtrace
//! frames produced while its code runs carry that identity as their file name; the
//! translator looks the identity up in a process-wide store and rewrites the frame to
//! the original template location.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, RwLock};

use crate::error::{Error, RuntimeErrorKind};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

static STORE: LazyLock<RwLock<HashMap<String, Arc<SourceMap>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// A template location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMap {
    /// Synthetic identity of the compiled unit.
    pub id: String,
    pub file: String,
    lines: BTreeMap<usize, Location>,
}

impl SourceMap {
    /// Creates an empty map with a fresh synthetic identity.
    pub fn new(file: &str) -> Self {
        let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("compiled:{n}:{file}"),
            file: file.to_string(),
            lines: BTreeMap::new(),
        }
    }

    /// Records the template line for a generated line. The first writer wins.
    pub fn record(&mut self, generated: usize, line: usize) {
        if !self.lines.contains_key(&generated) {
            let file = self.file.clone();
            self.lines.insert(generated, Location { file, line });
        }
    }

    /// Looks up a generated line, falling back to the nearest mapped line above it.
    pub fn lookup(&self, generated: usize) -> Option<&Location> {
        self.lines.range(..=generated).next_back().map(|(_, loc)| loc)
    }

    pub fn get(&self, generated: usize) -> Option<&Location> {
        self.lines.get(&generated)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Registers the map in the process-wide store.
    pub fn register(self) -> Arc<SourceMap> {
        let map = Arc::new(self);
        tracing::debug!(id = %map.id, lines = map.len(), "registered source map");
        match STORE.write() {
            Ok(mut store) => store.insert(map.id.clone(), map.clone()),
            Err(poisoned) => poisoned.into_inner().insert(map.id.clone(), map.clone()),
        };
        map
    }
}

/// Finds a registered map by synthetic identity.
pub fn lookup(id: &str) -> Option<Arc<SourceMap>> {
    match STORE.read() {
        Ok(store) => store.get(id).cloned(),
        Err(poisoned) => poisoned.into_inner().get(id).cloned(),
    }
}

/// Rewrites runtime error backtraces to template locations.
///
/// Template errors pass through untouched. Frames with an unknown identity are kept
/// as they are. Arity counts that still include the synthetic buffer parameter are
/// decremented once. Translating twice is a no-op.
pub fn translate_error(error: Error) -> Error {
    let Error::Runtime(mut err) = error else {
        return error;
    };
    for frame in &mut err.backtrace {
        if !frame.file.starts_with("compiled:") {
            continue;
        }
        if let Some(map) = lookup(&frame.file)
            && let Some(loc) = map.lookup(frame.line)
        {
            frame.file = loc.file.clone();
            frame.line = loc.line;
        }
    }
    if let RuntimeErrorKind::Arity {
        given,
        expected,
        hidden_buffer,
    } = &mut err.kind
        && *hidden_buffer
    {
        *given = given.saturating_sub(1);
        *expected = expected.shifted_down();
        *hidden_buffer = false;
    }
    Error::Runtime(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Arity, Frame, RuntimeError};

    #[test]
    fn test_first_writer_wins_and_nearest_lookup() {
        let mut map = SourceMap::new("card.tpl");
        map.record(2, 1);
        map.record(2, 5);
        map.record(4, 3);
        assert_eq!(map.get(2).map(|l| l.line), Some(1));
        assert_eq!(map.lookup(3).map(|l| l.line), Some(1));
        assert_eq!(map.lookup(9).map(|l| l.to_string()), Some("card.tpl:3".into()));
        assert!(map.lookup(1).is_none());
    }

    #[test]
    fn test_identities_are_unique() {
        assert_ne!(SourceMap::new("a").id, SourceMap::new("a").id);
    }

    #[test]
    fn test_translates_registered_frames() {
        let mut map = SourceMap::new("page.tpl");
        map.record(3, 7);
        let map = map.register();

        let mut err = RuntimeError::new(RuntimeErrorKind::Raised("boom".into()));
        err.backtrace.push(Frame {
            file: map.id.clone(),
            line: 3,
            label: None,
        });
        err.backtrace.push(Frame {
            file: "native.rs".into(),
            line: 10,
            label: None,
        });
        let translated = translate_error(Error::Runtime(err));
        let runtime = translated.as_runtime().unwrap();
        assert_eq!(runtime.backtrace[0].to_string(), "page.tpl:7");
        assert_eq!(runtime.backtrace[1].to_string(), "native.rs:10");
    }

    #[test]
    fn test_hides_buffer_from_arity_once() {
        let err = Error::runtime(RuntimeErrorKind::Arity {
            given: 3,
            expected: Arity {
                min: 2,
                max: Some(2),
            },
            hidden_buffer: true,
        });
        let once = translate_error(err);
        let twice = translate_error(once.clone());
        assert_eq!(
            once.to_string(),
            "wrong number of arguments (given 2, expected 1)"
        );
        assert_eq!(once.to_string(), twice.to_string());
    }

    #[test]
    fn test_template_errors_pass_through() {
        let err = Error::MissingArgument {
            name: "a".into(),
            keyword: true,
        };
        assert!(matches!(
            translate_error(err),
            Error::MissingArgument { .. }
        ));
    }
}
