use std::collections::BTreeMap;

use url::form_urlencoded;

/// Decoded query string.
///
/// Map-style lookups see the last value given for a key; every occurrence
/// stays reachable through [`QueryMap::get_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMap {
    pairs: Vec<(String, String)>,
}

impl QueryMap {
    /// Last value given for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value given for `key`, in the order they appeared.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.to_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Raw pairs, duplicates included.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Collapses duplicates, keeping the last value of each key.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.pairs.iter().cloned().collect()
    }
}

/// Parses an `application/x-www-form-urlencoded` query.
///
/// Percent escapes are decoded and `+` becomes a space. Empty segments
/// (`&&`) and segments with an empty key are skipped; a key without `=` maps
/// to the empty string.
pub fn parse_query(input: &[u8]) -> QueryMap {
    let pairs = form_urlencoded::parse(input)
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    QueryMap { pairs }
}

/// Serializes a map as a query string, keys in sorted order.
pub fn stringify_query(map: &BTreeMap<String, String>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(map.iter())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_wins_in_map_form() {
        let q = parse_query(b"a=1&a=2&b=3");
        assert_eq!(q.get("a"), Some("2"));
        assert_eq!(q.get_all("a").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn plus_decodes_to_space() {
        let q = parse_query(b"greeting=hello+world");
        assert_eq!(q.get("greeting"), Some("hello world"));
    }
}
