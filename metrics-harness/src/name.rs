use std::fmt;

use crate::error::ConfigurationError;

/// A key/value pair attached to a metric name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Creates a new `Tag`.
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Tag {
        Tag { key: key.into(), value: value.into() }
    }

    /// Key of this tag.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value of this tag.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A metric identifier.
///
/// A name always includes a non-empty string, and may include a set of tags used to further
/// describe the metric.  Tags are kept sorted by key, so two names built from the same tags in a
/// different order are equal and hash identically.  Keys are unique within a name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricName {
    name: String,
    tags: Vec<Tag>,
}

impl MetricName {
    /// Creates an untagged `MetricName`.
    pub fn new<N: Into<String>>(name: N) -> Result<MetricName, ConfigurationError> {
        MetricName::with_tags(name, std::iter::empty::<(String, String)>())
    }

    /// Creates a `MetricName` from a name and an iterator of key/value pairs.
    pub fn with_tags<N, I, K, V>(name: N, tags: I) -> Result<MetricName, ConfigurationError>
    where
        N: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigurationError::EmptyName);
        }

        let mut tags = tags.into_iter().map(|(k, v)| Tag::new(k, v)).collect::<Vec<_>>();
        tags.sort();

        for (idx, tag) in tags.iter().enumerate() {
            if tag.key.is_empty() {
                return Err(ConfigurationError::EmptyTagKey { name });
            }
            if idx > 0 && tags[idx - 1].key == tag.key {
                let key = tag.key.clone();
                return Err(ConfigurationError::DuplicateTag { name, key });
            }
        }

        Ok(MetricName { name, tags })
    }

    /// Creates a `MetricName` from a flat list of alternating keys and values.
    ///
    /// `["key1", "value1", "key2", "value2"]` yields two tags.
    pub fn from_pairs<N, S>(name: N, pairs: &[S]) -> Result<MetricName, ConfigurationError>
    where
        N: Into<String>,
        S: AsRef<str>,
    {
        let name = name.into();
        if pairs.len() % 2 != 0 {
            return Err(ConfigurationError::OddTagPairs { name, len: pairs.len() });
        }

        let tags = pairs.chunks_exact(2).map(|kv| (kv[0].as_ref(), kv[1].as_ref()));
        MetricName::with_tags(name, tags)
    }

    /// Name of this metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags of this metric, sorted by key.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Whether or not this metric has any tags.
    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.tags.is_empty() {
            f.write_str("{")?;
            for (idx, tag) in self.tags.iter().enumerate() {
                if idx > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}=\"{}\"", tag.key, tag.value)?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}
