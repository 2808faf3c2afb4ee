//! Minimal ordered deb822 paragraph rendering.

use std::fmt;

/// An ordered list of fields rendered as one deb822 paragraph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    fields: Vec<(String, String)>,
}

impl Paragraph {
    /// Create an empty paragraph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn push<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.fields.push((name.into(), value.into()));
    }

    /// Append a field if it has a value.
    pub fn push_opt<N: Into<String>>(&mut self, name: N, value: Option<&str>) {
        if let Some(value) = value {
            self.push(name, value);
        }
    }

    /// Get the value of a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Paragraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            let mut lines = value.split('\n');
            match lines.next() {
                Some(first) if !first.is_empty() => writeln!(f, "{}: {}", name, first)?,
                _ => writeln!(f, "{}:", name)?,
            }
            for line in lines {
                if line.trim().is_empty() {
                    writeln!(f, " .")?;
                } else if line.starts_with(' ') {
                    writeln!(f, "{}", line)?;
                } else {
                    writeln!(f, " {}", line)?;
                }
            }
        }
        Ok(())
    }
}
