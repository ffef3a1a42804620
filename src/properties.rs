//! String property bag shared between the harness and the adapters.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Ordered collection of `key=value` settings.
///
/// Later inserts win, so callers layer sources from lowest to highest
/// precedence: workload defaults, then a property file, then `-p` flags.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    inner: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).map(|s| s.as_str())
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Get and parse a value, falling back to `default` when unset.
    pub fn get_parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(name) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|e: T::Err| anyhow!("failed to parse property '{}': {}", name, e)),
            None => Ok(default),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(name.into(), value.into());
    }

    /// Overlay every entry of `other` on top of this bag.
    pub fn extend(&mut self, other: Properties) {
        self.inner.extend(other.inner);
    }

    /// Parse a single `key=value` assignment as given on the command line.
    pub fn parse_assignment(s: &str) -> Result<(String, String)> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got '{}'", s))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("empty property name in '{}'", s));
        }
        Ok((key.to_string(), value.trim().to_string()))
    }

    /// Parse `.properties` text: one `key=value` or `key: value` per line,
    /// `#` and `!` start comments, blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut props = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let split = line.find(|c: char| c == '=' || c == ':');
            let (key, value) = match split {
                Some(idx) => (&line[..idx], &line[idx + 1..]),
                None => (line, ""),
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(anyhow!("line {}: empty property name", lineno + 1));
            }
            props.insert(key, value.trim());
        }
        Ok(props)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read property file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid property file {}", path.display()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_properties_file_text() {
        // given
        let text = "# workload\nrecordcount=1000\n! legacy comment\nspongebase.bucket : bench\n\nspongebase.json=false\n";

        // when
        let props = Properties::parse(text).unwrap();

        // then
        assert_eq!(props.get("recordcount"), Some("1000"));
        assert_eq!(props.get("spongebase.bucket"), Some("bench"));
        assert_eq!(props.get("spongebase.json"), Some("false"));
        assert_eq!(props.iter().count(), 3);
    }

    #[test]
    fn should_keep_equals_signs_inside_values() {
        let (key, value) = Properties::parse_assignment("spongebase.url=http://h:8091/pools?a=b").unwrap();
        assert_eq!(key, "spongebase.url");
        assert_eq!(value, "http://h:8091/pools?a=b");
    }

    #[test]
    fn should_reject_assignment_without_equals() {
        assert!(Properties::parse_assignment("spongebase.json").is_err());
        assert!(Properties::parse_assignment("=true").is_err());
    }

    #[test]
    fn should_let_later_sources_win() {
        // given
        let mut props: Properties = [("scanproportion", "0.95"), ("fieldcount", "10")]
            .into_iter()
            .collect();
        let overrides: Properties = [("scanproportion", "0")].into_iter().collect();

        // when
        props.extend(overrides);

        // then
        assert_eq!(props.get("scanproportion"), Some("0"));
        assert_eq!(props.get("fieldcount"), Some("10"));
    }

    #[test]
    fn should_parse_typed_values_with_defaults() {
        let props: Properties = [("memory.nodes", " 3 "), ("bad", "x")].into_iter().collect();

        assert_eq!(props.get_parse_or("memory.nodes", 4usize).unwrap(), 3);
        assert_eq!(props.get_parse_or("missing", 4usize).unwrap(), 4);
        assert!(props.get_parse_or("bad", 0.0f64).is_err());
        assert_eq!(props.get_or("missing", "fallback"), "fallback");
    }
}
