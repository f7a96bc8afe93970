//! Ordering and pagination options shared by both read paths.

use std::fmt;

use crate::error::ValidationError;

/// Ordering, offset and limit for a query.
///
/// `order` uses the textual form `"col1 asc, col2"`; a key without an
/// explicit direction sorts descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub order: Option<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(mut self, spec: &str) -> Self {
        self.order = Some(spec.to_string());
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parses `order` into sort keys.
    pub fn sort_keys(&self) -> Result<Vec<SortKey>, ValidationError> {
        match &self.order {
            Some(spec) => parse_sort(spec),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub name: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(name: &str, order: SortOrder) -> Self {
        Self {
            name: name.to_string(),
            order,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.order)
    }
}

/// Parses `"field1 order1, field2 order2"`.
///
/// Empty segments are skipped; an omitted order is descending.
pub fn parse_sort(spec: &str) -> Result<Vec<SortKey>, ValidationError> {
    let invalid = |message: &str| ValidationError::InvalidSort {
        spec: spec.to_string(),
        message: message.to_string(),
    };

    let mut keys = Vec::new();
    for segment in spec.split(',') {
        let mut parts = segment.split_whitespace();
        let Some(name) = parts.next() else {
            continue;
        };
        let order = match parts.next() {
            None => SortOrder::Desc,
            Some(word) if word.eq_ignore_ascii_case("asc") => SortOrder::Asc,
            Some(word) if word.eq_ignore_ascii_case("desc") => SortOrder::Desc,
            Some(_) => return Err(invalid("order must be 'asc' or 'desc'")),
        };
        if parts.next().is_some() {
            return Err(invalid("expected '<name> [asc|desc]'"));
        }
        keys.push(SortKey::new(name, order));
    }
    Ok(keys)
}

/// Renders sort keys back into the textual form.
pub fn format_sort(keys: &[SortKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sort_defaults_to_desc() {
        let keys = parse_sort("name, age asc,created_at DESC").unwrap();
        assert_eq!(
            keys,
            vec![
                SortKey::new("name", SortOrder::Desc),
                SortKey::new("age", SortOrder::Asc),
                SortKey::new("created_at", SortOrder::Desc),
            ]
        );
    }

    #[test]
    fn test_parse_sort_skips_empty_segments() {
        assert!(parse_sort("").unwrap().is_empty());
        assert_eq!(parse_sort("a,,").unwrap().len(), 1);
    }

    #[test]
    fn test_parse_sort_rejects_garbage() {
        assert!(parse_sort("name sideways").is_err());
        assert!(parse_sort("name asc extra").is_err());
    }

    #[test]
    fn test_format_sort() {
        let keys = parse_sort("b, a asc").unwrap();
        assert_eq!(format_sort(&keys), "b desc, a asc");
    }

    #[test]
    fn test_query_options_builder() {
        let opts = QueryOptions::new().order("name").offset(5).limit(10);
        assert_eq!(opts.sort_keys().unwrap()[0].order, SortOrder::Desc);
        assert_eq!(opts.offset, Some(5));
        assert_eq!(opts.limit, Some(10));
    }
}
