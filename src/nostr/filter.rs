//! Subscription filters.
//!
//! A filter selects events by id, author, kind, tag references, and time
//! range. A relay returns events matching all present selectors, where a
//! list selector matches if any of its values match. Absent selectors are
//! omitted from the wire encoding entirely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A NIP-01 subscription filter.
///
/// Beyond the fixed selectors, any single-letter tag query (`#a`
/// through `#Z`, excluding the dedicated `#e`/`#p` fields) is kept in
/// [`Filter::tag_queries`] and round-trips through JSON unchanged, empty
/// lists included. Equality and hashing are value-based over all
/// selectors.
///
/// # Example
///
/// ```
/// use petrel_core::nostr::Filter;
///
/// let filter = Filter::new().kinds(vec![1]).limit(10);
/// let json = serde_json::to_string(&filter).unwrap();
/// assert_eq!(json, r#"{"kinds":[1],"limit":10}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    /// Event ids to match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Author public keys (hex) to match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds to match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Referenced event ids (`e` tags).
    #[serde(rename = "#e", skip_serializing_if = "Option::is_none")]
    pub event_refs: Option<Vec<String>>,

    /// Referenced public keys (`p` tags).
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub pubkey_refs: Option<Vec<String>>,

    /// Only events at or after this timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,

    /// Only events at or before this timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,

    /// Maximum number of events to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Any other `#<letter>` tag queries, keyed by the full `#x` name.
    #[serde(flatten)]
    pub tag_queries: BTreeMap<String, Vec<String>>,
}

impl Filter {
    /// Creates an empty filter matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to the given event ids.
    #[must_use]
    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Restricts to the given authors.
    #[must_use]
    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    /// Restricts to the given kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Restricts to events referencing the given event ids.
    #[must_use]
    pub fn event_refs(mut self, ids: Vec<String>) -> Self {
        self.event_refs = Some(ids);
        self
    }

    /// Restricts to events referencing the given public keys.
    #[must_use]
    pub fn pubkey_refs(mut self, pubkeys: Vec<String>) -> Self {
        self.pubkey_refs = Some(pubkeys);
        self
    }

    /// Restricts to events created at or after `timestamp`.
    #[must_use]
    pub const fn since(mut self, timestamp: i64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Restricts to events created at or before `timestamp`.
    #[must_use]
    pub const fn until(mut self, timestamp: i64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Caps the number of returned events.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Adds a `#<letter>` tag query.
    ///
    /// Letters `e` and `p` route to the dedicated selectors so the two
    /// spellings stay interchangeable.
    ///
    /// # Panics
    ///
    /// Panics if `letter` is not an ASCII letter.
    #[must_use]
    pub fn tag_query(mut self, letter: char, values: Vec<String>) -> Self {
        assert!(
            letter.is_ascii_alphabetic(),
            "tag queries are single ASCII letters"
        );
        match letter {
            'e' => self.event_refs = Some(values),
            'p' => self.pubkey_refs = Some(values),
            _ => {
                self.tag_queries.insert(format!("#{letter}"), values);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_encodes_to_empty_object() {
        let json = serde_json::to_string(&Filter::new()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn absent_selectors_are_omitted() {
        let filter = Filter::new().kinds(vec![1]).limit(10);
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, r#"{"kinds":[1],"limit":10}"#);
        assert!(!json.contains("null"));
    }

    #[test]
    fn full_filter_round_trips() {
        let filter = Filter::new()
            .ids(vec!["aa".to_string()])
            .authors(vec!["bb".to_string()])
            .kinds(vec![1, 7])
            .event_refs(vec!["cc".to_string()])
            .pubkey_refs(vec!["dd".to_string()])
            .since(1000)
            .until(2000)
            .limit(50);

        let json = serde_json::to_string(&filter).unwrap();
        let recovered: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(filter, recovered);
    }

    #[test]
    fn dedicated_refs_use_hash_names_on_the_wire() {
        let filter = Filter::new()
            .event_refs(vec!["cc".to_string()])
            .pubkey_refs(vec!["dd".to_string()]);
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains(r##""#e":["cc"]"##));
        assert!(json.contains(r##""#p":["dd"]"##));
    }

    #[test]
    fn generic_tag_query_round_trips() {
        let filter = Filter::new().tag_query('t', vec!["nostr".to_string()]);
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains(r##""#t":["nostr"]"##));

        let recovered: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(filter, recovered);
        assert_eq!(
            recovered.tag_queries.get("#t"),
            Some(&vec!["nostr".to_string()])
        );
    }

    #[test]
    fn uppercase_tag_query_round_trips() {
        let filter = Filter::new().tag_query('A', vec!["addr".to_string()]);
        let json = serde_json::to_string(&filter).unwrap();
        let recovered: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(filter, recovered);
    }

    #[test]
    fn empty_tag_query_list_round_trips() {
        let filter = Filter::new().tag_query('x', vec![]);
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains(r##""#x":[]"##));

        let recovered: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(filter, recovered);
        assert_eq!(recovered.tag_queries.get("#x"), Some(&vec![]));
    }

    #[test]
    fn e_and_p_letters_route_to_dedicated_fields() {
        let filter = Filter::new()
            .tag_query('e', vec!["ev".to_string()])
            .tag_query('p', vec!["pk".to_string()]);
        assert_eq!(filter.event_refs, Some(vec!["ev".to_string()]));
        assert_eq!(filter.pubkey_refs, Some(vec!["pk".to_string()]));
        assert!(filter.tag_queries.is_empty());
    }

    #[test]
    #[should_panic(expected = "single ASCII letters")]
    fn tag_query_rejects_non_letter() {
        let _ = Filter::new().tag_query('1', vec![]);
    }

    #[test]
    fn unknown_hash_keys_are_preserved_on_decode() {
        let json = r##"{"kinds":[1],"#t":["a","b"],"#r":[]}"##;
        let filter: Filter = serde_json::from_str(json).unwrap();
        assert_eq!(filter.kinds, Some(vec![1]));
        assert_eq!(
            filter.tag_queries.get("#t"),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(filter.tag_queries.get("#r"), Some(&vec![]));

        let encoded = serde_json::to_string(&filter).unwrap();
        let recovered: Filter = serde_json::from_str(&encoded).unwrap();
        assert_eq!(filter, recovered);
    }

    #[test]
    fn equality_is_value_based() {
        let a = Filter::new().kinds(vec![1]).tag_query('t', vec!["x".to_string()]);
        let b = Filter::new().kinds(vec![1]).tag_query('t', vec!["x".to_string()]);
        let c = Filter::new().kinds(vec![2]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_agrees_with_equality() {
        use std::collections::HashSet;

        let a = Filter::new().kinds(vec![1]).limit(10);
        let b = Filter::new().kinds(vec![1]).limit(10);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn missing_keys_decode_to_none() {
        let filter: Filter = serde_json::from_str("{}").unwrap();
        assert!(filter.ids.is_none());
        assert!(filter.authors.is_none());
        assert!(filter.kinds.is_none());
        assert!(filter.since.is_none());
        assert!(filter.limit.is_none());
        assert!(filter.tag_queries.is_empty());
    }
}
