//! Translation file formats.
//!
//! The engine never interprets repository files itself: a
//! [`TranslationFormat`] turns bytes into ordered [`StringUnit`]s and back.
//! Formats are looked up by name through a [`FormatRegistry`], which ships
//! with the built-in [`JsonFormat`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::FormatError;
use crate::models::{StringUnit, UnitState};

/// Parser / serializer for one file format.
pub trait TranslationFormat: Send + Sync {
    /// Registry name, as used in `[[repositories.files]] format = ...`.
    fn name(&self) -> &str;

    /// Parse file content into units, in file order.
    fn parse(&self, path: &str, bytes: &[u8]) -> Result<Vec<StringUnit>, FormatError>;

    /// Serialize units, in the given order.
    fn serialize(&self, path: &str, units: &[StringUnit]) -> Result<Vec<u8>, FormatError>;
}

/// Named collection of available formats.
#[derive(Clone)]
pub struct FormatRegistry {
    formats: HashMap<String, Arc<dyn TranslationFormat>>,
}

impl FormatRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            formats: HashMap::new(),
        }
    }

    pub fn register(&mut self, format: Arc<dyn TranslationFormat>) {
        self.formats.insert(format.name().to_string(), format);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TranslationFormat>, FormatError> {
        self.formats
            .get(name)
            .cloned()
            .ok_or_else(|| FormatError::UnknownFormat(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formats.contains_key(name)
    }
}

impl Default for FormatRegistry {
    /// Registry with the built-in formats.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonFormat));
        registry
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.formats.keys().collect();
        names.sort();
        f.debug_struct("FormatRegistry").field("formats", &names).finish()
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Bilingual JSON: an array of `{key, source, target, state}` objects.
///
/// ```json
/// [
///   {"key": "greeting", "source": "Hello", "target": "Hola", "state": "translated"}
/// ]
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

#[derive(Serialize, Deserialize)]
struct JsonEntry {
    key: String,
    source: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    state: Option<UnitState>,
}

impl TranslationFormat for JsonFormat {
    fn name(&self) -> &str {
        "json"
    }

    fn parse(&self, path: &str, bytes: &[u8]) -> Result<Vec<StringUnit>, FormatError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let entries: Vec<JsonEntry> =
            serde_json::from_slice(bytes).map_err(|e| FormatError::Parse {
                path: path.to_string(),
                detail: e.to_string(),
            })?;
        Ok(entries
            .into_iter()
            .map(|e| {
                // A missing state is inferred from whether a translation exists.
                let state = e.state.unwrap_or(if e.target.is_empty() {
                    UnitState::Empty
                } else {
                    UnitState::Translated
                });
                StringUnit {
                    key: e.key,
                    source: e.source,
                    target: e.target,
                    state,
                }
            })
            .collect())
    }

    fn serialize(&self, path: &str, units: &[StringUnit]) -> Result<Vec<u8>, FormatError> {
        let entries: Vec<JsonEntry> = units
            .iter()
            .map(|u| JsonEntry {
                key: u.key.clone(),
                source: u.source.clone(),
                target: u.target.clone(),
                state: Some(u.state),
            })
            .collect();
        let mut bytes =
            serde_json::to_vec_pretty(&entries).map_err(|e| FormatError::Serialize {
                path: path.to_string(),
                detail: e.to_string(),
            })?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_order_and_infers_state() {
        let raw = br#"[
            {"key": "b", "source": "Bye", "target": "Adios"},
            {"key": "a", "source": "Hi"},
            {"key": "c", "source": "Yes", "target": "Si", "state": "fuzzy"}
        ]"#;
        let units = JsonFormat.parse("es.json", raw).unwrap();
        let keys: Vec<&str> = units.iter().map(|u| u.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(units[0].state, UnitState::Translated);
        assert_eq!(units[1].state, UnitState::Empty);
        assert_eq!(units[2].state, UnitState::Fuzzy);
    }

    #[test]
    fn test_serialize_then_parse_keeps_units() {
        let units = vec![
            StringUnit::new("z", "Last", "Ultimo", UnitState::Approved),
            StringUnit::new("a", "First", "", UnitState::Empty),
        ];
        let bytes = JsonFormat.serialize("es.json", &units).unwrap();
        assert_eq!(JsonFormat.parse("es.json", &bytes).unwrap(), units);
    }

    #[test]
    fn test_empty_file_has_no_units() {
        assert!(JsonFormat.parse("es.json", b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = JsonFormat.parse("locale/es.json", b"{not json").unwrap_err();
        assert!(err.to_string().contains("locale/es.json"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = FormatRegistry::default();
        assert!(registry.contains("json"));
        assert!(matches!(
            registry.get("po"),
            Err(FormatError::UnknownFormat(ref name)) if name == "po"
        ));
    }
}
