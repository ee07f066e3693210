use crate::protocol::ApiKey;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionRange {
    pub min_version: i16,
    pub max_version: i16,
}

impl VersionRange {
    pub const fn new(min_version: i16, max_version: i16) -> Self {
        Self {
            min_version,
            max_version,
        }
    }

    pub const fn contains(self, version: i16) -> bool {
        self.min_version <= version && version <= self.max_version
    }
}

/// Row of the ApiVersions response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiVersionEntry {
    pub api_key: i16,
    pub min_version: i16,
    pub max_version: i16,
}

/// Supported api keys and their version ranges, in advertisement order.
///
/// Keyed on [`ApiKey`], so only keys the broker can dispatch are advertised.
#[derive(Debug, Clone)]
pub struct ApiRegistry {
    apis: IndexMap<ApiKey, VersionRange>,
}

impl Serialize for ApiRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries())
    }
}

impl Default for ApiRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ApiKey::ApiVersions, VersionRange::new(0, 4));
        registry.register(ApiKey::DescribeTopicPartitions, VersionRange::new(0, 0));
        registry
    }
}

impl ApiRegistry {
    pub fn empty() -> Self {
        Self {
            apis: IndexMap::new(),
        }
    }

    /// Adds or replaces the range for `api`. Replacing keeps the original position.
    pub fn register(&mut self, api: ApiKey, range: VersionRange) {
        self.apis.insert(api, range);
    }

    pub fn range(&self, api: ApiKey) -> Option<VersionRange> {
        self.apis.get(&api).copied()
    }

    pub fn supports(&self, api: ApiKey, version: i16) -> bool {
        self.range(api).is_some_and(|range| range.contains(version))
    }

    pub fn apis(&self) -> impl ExactSizeIterator<Item = ApiKey> + '_ {
        self.apis.keys().copied()
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = ApiVersionEntry> + '_ {
        self.apis.iter().map(|(api, range)| ApiVersionEntry {
            api_key: api.code(),
            min_version: range.min_version,
            max_version: range.max_version,
        })
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_two_entries_in_order() {
        let registry = ApiRegistry::default();
        let entries: Vec<_> = registry.entries().collect();
        assert_eq!(
            entries,
            vec![
                ApiVersionEntry { api_key: 18, min_version: 0, max_version: 4 },
                ApiVersionEntry { api_key: 75, min_version: 0, max_version: 0 },
            ]
        );
    }

    #[test]
    fn version_bounds_are_inclusive() {
        let registry = ApiRegistry::default();
        assert!(registry.supports(ApiKey::ApiVersions, 0));
        assert!(registry.supports(ApiKey::ApiVersions, 4));
        assert!(!registry.supports(ApiKey::ApiVersions, 5));
        assert!(!registry.supports(ApiKey::ApiVersions, -1));
        assert!(registry.supports(ApiKey::DescribeTopicPartitions, 0));
        assert!(!registry.supports(ApiKey::DescribeTopicPartitions, 1));
    }

    #[test]
    fn re_registering_keeps_position() {
        let mut registry = ApiRegistry::default();
        registry.register(ApiKey::ApiVersions, VersionRange::new(0, 3));
        let first = registry.entries().next().unwrap();
        assert_eq!(first.api_key, 18);
        assert_eq!(first.max_version, 3);
        assert_eq!(registry.len(), 2);
    }
}
