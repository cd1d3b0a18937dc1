//! Hierarchical resource identifiers
//!
//! Control-plane identifiers are `/key/value` pairs such as
//! `/subscriptions/{s}/resourceGroups/{g}/providers/{ns}/{type}/{name}`.
//! The host persists them as strings; every Read/Update/Delete re-parses.

use crate::error::{CloudError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    segments: Vec<(String, String)>,
}

impl ResourceId {
    pub fn builder() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim_end_matches('/');
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Err(CloudError::InvalidId(format!("{:?} must start with '/'", input)));
        };

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() % 2 != 0 || parts.iter().any(|p| p.is_empty()) {
            return Err(CloudError::InvalidId(format!(
                "{:?} is not a sequence of /key/value segments",
                input
            )));
        }

        let segments = parts
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();
        Ok(Self { segments })
    }

    pub fn push(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.segments.push((key.into(), value.into()));
        self
    }

    /// Value of the first segment whose key matches (case-insensitive)
    pub fn get(&self, key: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| CloudError::InvalidId(format!("{} has no `{}` segment", self, key)))
    }

    pub fn segments(&self) -> &[(String, String)] {
        &self.segments
    }

    /// Keep the first `n` segments
    pub fn truncate(mut self, n: usize) -> Self {
        self.segments.truncate(n);
        self
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.segments {
            write!(f, "/{}/{}", key, value)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ResourceId {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
