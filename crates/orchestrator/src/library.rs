use pattern_core::Pattern;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{OrchestratorError, Result};

/// Validated patterns keyed by id; shared read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    patterns: HashMap<String, Arc<Pattern>>,
}

impl PatternLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern; an id that is already present is rejected.
    pub fn insert(&mut self, pattern: Pattern) -> Result<Arc<Pattern>> {
        if self.patterns.contains_key(&pattern.id) {
            return Err(OrchestratorError::schema(
                format!("pattern {}", pattern.id),
                "duplicate pattern id",
            ));
        }
        let pattern = Arc::new(pattern);
        self.patterns
            .insert(pattern.id.clone(), Arc::clone(&pattern));
        Ok(pattern)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Pattern>> {
        self.patterns.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.patterns.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.patterns.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pattern_core::Step;

    fn pattern(id: &str) -> Pattern {
        Pattern {
            id: id.to_string(),
            version: "1".to_string(),
            description: None,
            inputs: Vec::new(),
            steps: vec![Step::new("s1", "x.y", "out")],
            outputs: vec!["out".to_string()],
        }
    }

    #[test]
    fn test_insert_and_get() {
        let mut library = PatternLibrary::new();
        library.insert(pattern("b")).unwrap();
        library.insert(pattern("a")).unwrap();

        assert_eq!(library.len(), 2);
        assert_eq!(library.ids(), vec!["a", "b"]);
        assert_eq!(library.get("a").unwrap().id, "a");
        assert!(library.get("zzz").is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut library = PatternLibrary::new();
        library.insert(pattern("a")).unwrap();
        let err = library.insert(pattern("a")).unwrap_err();
        assert!(matches!(err, OrchestratorError::Schema { .. }));
        assert_eq!(library.len(), 1);
    }
}
