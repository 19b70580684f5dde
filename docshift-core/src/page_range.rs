//! Page selection for multi-page sources.
//!
//! A custom range is a comma separated list of 1-based page numbers and
//! inclusive dashed ranges, e.g. `1,3,5-7`. Entries beyond the document are
//! dropped and ranges are clamped to it; malformed entries are an error, and
//! so is a selection that ends up empty.

use crate::error::{ConvertError, Result};
use std::collections::BTreeSet;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageSelection {
    #[default]
    All,
    First,
    Custom(String),
}

/// Sorted, de-duplicated, 1-based page numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPages(Vec<usize>);

impl ResolvedPages {
    pub fn pages(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Single(u64),
    Span(u64, u64),
}

impl FromStr for Entry {
    type Err = ConvertError;

    fn from_str(token: &str) -> Result<Self> {
        let number = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| ConvertError::InvalidPageSelection(format!("'{token}' is not a page number or range")))
        };

        match token.split_once('-') {
            None => Ok(Entry::Single(number(token)?)),
            Some((start, end)) => {
                let (start, end) = (number(start)?, number(end)?);
                if start > end {
                    return Err(ConvertError::InvalidPageSelection(format!(
                        "range '{token}' starts after it ends"
                    )));
                }
                Ok(Entry::Span(start, end))
            }
        }
    }
}

fn parse_entries(spec: &str) -> Result<Vec<Entry>> {
    let entries = spec
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Entry::from_str)
        .collect::<Result<Vec<_>>>()?;

    if entries.is_empty() {
        return Err(ConvertError::InvalidPageSelection("custom range is empty".to_string()));
    }
    Ok(entries)
}

impl PageSelection {
    /// Builds a selection from the `pageRange` / `customRange` form pair.
    pub fn from_fields(mode: Option<&str>, custom: Option<&str>) -> Result<Self> {
        let custom = custom.map(str::trim).filter(|c| !c.is_empty());
        match mode.map(|m| m.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") => Ok(custom.map_or(PageSelection::All, |c| PageSelection::Custom(c.to_string()))),
            Some("all") => Ok(PageSelection::All),
            Some("first") => Ok(PageSelection::First),
            Some("custom") => custom
                .map(|c| PageSelection::Custom(c.to_string()))
                .ok_or_else(|| ConvertError::invalid_option("customRange", "", "required when pageRange is 'custom'")),
            Some(other) => Err(ConvertError::invalid_option(
                "pageRange",
                other,
                "expected 'all', 'first' or 'custom'",
            )),
        }
    }

    /// Checks the syntax without knowing the page count.
    pub fn check_syntax(&self) -> Result<()> {
        if let PageSelection::Custom(spec) = self {
            parse_entries(spec)?;
        }
        Ok(())
    }

    pub fn resolve(&self, page_count: usize) -> Result<ResolvedPages> {
        let pages: Vec<usize> = match self {
            PageSelection::All => (1..=page_count).collect(),
            PageSelection::First => (1..=page_count.min(1)).collect(),
            PageSelection::Custom(spec) => {
                let last = page_count as u64;
                let mut set = BTreeSet::new();
                for entry in parse_entries(spec)? {
                    let (start, end) = match entry {
                        Entry::Single(n) => (n, n),
                        Entry::Span(a, b) => (a, b),
                    };
                    let start = start.max(1);
                    let end = end.min(last);
                    for page in start..=end {
                        set.insert(page as usize);
                    }
                }
                set.into_iter().collect()
            }
        };

        if pages.is_empty() {
            return Err(ConvertError::NoValidPages { page_count });
        }
        Ok(ResolvedPages(pages))
    }
}
