use crate::address::{self, PayloadAddress};
use crate::core::ScanCursor;

/// Object key layout of one datastore.
///
/// Every payload lives at `{root}{payload path}`. The root ends with `/`
/// unless it is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Keyspace {
    root: String,
}

impl S3Keyspace {
    /// Joins the non-empty segments into a root prefix.
    pub fn new(segments: &[&str]) -> Self {
        let mut root = segments
            .iter()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        if !root.is_empty() {
            root.push('/');
        }
        Self { root }
    }

    /// The root prefix, `/`-terminated unless empty.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Object key of a payload.
    pub fn object_key(&self, address: &PayloadAddress) -> String {
        format!("{}{}", self.root, address)
    }

    /// Prefix shared by every version of a resource.
    pub fn logical_prefix(&self, resource_type_id: u32, logical_id: &str) -> String {
        format!(
            "{}{}",
            self.root,
            address::logical_prefix(resource_type_id, logical_id)
        )
    }

    /// Prefix shared by every payload of one resource version.
    pub fn version_prefix(&self, resource_type_id: u32, logical_id: &str, version: u32) -> String {
        format!(
            "{}{}",
            self.root,
            address::version_prefix(resource_type_id, logical_id, version)
        )
    }

    /// Strips the root from a listed key.
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.root.as_str())
    }

    /// A `start-after` key that sorts strictly below every key whose
    /// relative cursor is `>= start`, or `None` to list from the root.
    ///
    /// Cursors are arbitrary bytes while S3 keys are UTF-8, so the bound is
    /// the longest UTF-8 prefix of `start`, shortened by one character when
    /// it would otherwise equal `start` itself.
    pub fn start_after(&self, start: &ScanCursor) -> Option<String> {
        let bytes = start.as_bytes();
        let valid = match std::str::from_utf8(bytes) {
            Ok(text) => {
                let mut chars = text.chars();
                chars.next_back();
                chars.as_str()
            }
            Err(err) => {
                // Prefix up to the first invalid byte is valid UTF-8.
                std::str::from_utf8(&bytes[..err.valid_up_to()]).unwrap_or_default()
            }
        };
        if valid.is_empty() {
            None
        } else {
            Some(format!("{}{}", self.root, valid))
        }
    }
}
