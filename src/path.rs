//! Resource paths.
//!
//! Parsing rules: split on `/`, drop empty and single-dot segments, reject
//! any segment that isn't printable ASCII or contains `\`/`:`, reject any
//! segment made only of dots. Parts are stored back-to-front so popping the
//! next segment during dispatch is O(1).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    /// Reversed: `parts.last()` is the first path segment.
    parts: Vec<String>,
}

fn is_valid_segment(s: &str) -> bool {
    if s.is_empty() || s == "." {
        return false;
    }
    if s.chars().all(|c| c == '.') {
        return false;
    }
    s.chars().all(|c| c.is_ascii_graphic() || c == ' ') && !s.contains('\\') && !s.contains(':')
}

impl Path {
    pub fn root() -> Self {
        Path { parts: Vec::new() }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        for segment in s.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if !is_valid_segment(segment) {
                return Err(format!("invalid path segment: {segment:?}"));
            }
            parts.push(segment.to_string());
        }
        parts.reverse();
        Ok(Path { parts })
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// The first remaining segment, without consuming it.
    pub fn front(&self) -> Option<&str> {
        self.parts.last().map(|s| s.as_str())
    }

    /// Remove and return the first remaining segment.
    pub fn pop_front(&mut self) -> Option<String> {
        self.parts.pop()
    }

    pub fn join(&self, other: &Path) -> Path {
        let mut parts = other.parts.clone();
        parts.extend(self.parts.iter().cloned());
        Path { parts }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().rev().map(|s| s.as_str())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in self.segments() {
            if !first {
                write!(f, "/")?;
            }
            first = false;
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}
