// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering tests by name.
//!
//! A filter string holds one or more glob tokens separated by commas and/or spaces, for example
//! `"parse_* , http_?et   io*"`. In a token, `*` matches any run of characters and `?` matches a
//! single character. Every other character matches itself. A token must match the whole test
//! name.

use crate::errors::NameFilterParseError;
use regex::Regex;

/// A set of glob patterns that test names are matched against.
///
/// An empty filter matches every test.
#[derive(Clone, Debug, Default)]
pub struct NameFilter {
    patterns: Vec<Regex>,
}

impl NameFilter {
    /// Returns a filter that matches every test.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parses a filter string.
    ///
    /// A string with no tokens (empty, or only separators) produces a filter that matches every
    /// test.
    pub fn new(filter: &str) -> Result<Self, NameFilterParseError> {
        let patterns = filter
            .split([',', ' '])
            .filter(|token| !token.is_empty())
            .map(|token| {
                Regex::new(&glob_to_regex(token))
                    .map_err(|err| NameFilterParseError::new(token, err))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns true if this filter matches every test.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns true if `name` matches at least one token, or if the filter is empty.
    pub fn is_match(&self, name: &str) -> bool {
        self.is_empty() || self.patterns.iter().any(|pattern| pattern.is_match(name))
    }
}

fn glob_to_regex(token: &str) -> String {
    let mut regex = String::with_capacity(token.len() + 8);
    regex.push_str("^(?:");
    let mut buf = [0; 4];
    for c in token.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c => regex.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    regex.push_str(")$");
    regex
}
