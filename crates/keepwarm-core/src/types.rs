use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::defaults::{DEFAULT_LOCATION_HINT, SINGLETON_INSTANCE_NAME};

// ─── Singleton Key ────────────────────────────────────────────────

/// Identity of "the one instance".
///
/// Every caller derives the same key, which is what makes the instance a
/// singleton rather than one-per-caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SingletonKey(Cow<'static, str>);

impl SingletonKey {
    /// The process-wide key.
    pub const fn global() -> Self {
        Self(Cow::Borrowed(SINGLETON_INSTANCE_NAME))
    }

    /// A key with an arbitrary name. Used by tests and alternate deployments.
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SingletonKey {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for SingletonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Object Id ────────────────────────────────────────────────────

/// Backend address derived from a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Stable id for `name`: the 64-bit FNV-1a hash of its UTF-8 bytes in
    /// hex. Same name, same id, across callers, processes and builds.
    pub fn from_name(name: &str) -> Self {
        const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let hash = name
            .bytes()
            .fold(OFFSET_BASIS, |h, b| (h ^ u64::from(b)).wrapping_mul(PRIME));
        Self(format!("{hash:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Placement ────────────────────────────────────────────────────

/// Advisory placement for a newly obtained instance.
///
/// Never part of the instance identity: two resolutions with different
/// hints still land on the same instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_hint: Option<String>,
}

impl Placement {
    pub fn with_location_hint(hint: impl Into<String>) -> Self {
        Self {
            location_hint: Some(hint.into()),
        }
    }

    /// The fixed region the singleton is pinned to.
    pub fn preferred() -> Self {
        Self::with_location_hint(DEFAULT_LOCATION_HINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_key_is_constant() {
        assert_eq!(SingletonKey::global(), SingletonKey::default());
        assert_eq!(SingletonKey::global().as_str(), "cf-singleton-container");
    }

    #[test]
    fn object_id_is_deterministic() {
        let a = ObjectId::from_name("cf-singleton-container");
        let b = ObjectId::from_name("cf-singleton-container");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, ObjectId::from_name("other"));
    }

    #[test]
    fn object_id_is_pinned_to_fnv1a() {
        assert_eq!(ObjectId::from_name("").as_str(), "cbf29ce484222325");
        assert_eq!(ObjectId::from_name("a").as_str(), "af63dc4c8601ec8c");
        assert_eq!(ObjectId::from_name("cf-singleton-container").as_str(), "b9c8f64711b2ee1a");
    }

    #[test]
    fn preferred_placement_is_wnam() {
        assert_eq!(Placement::preferred().location_hint.as_deref(), Some("wnam"));
        assert!(Placement::default().location_hint.is_none());
    }

    #[test]
    fn placement_serde_omits_missing_hint() {
        let json = serde_json::to_string(&Placement::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
