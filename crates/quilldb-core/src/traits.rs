use serde::{Serialize, de::DeserializeOwned};

///
/// Record
///
/// A domain object that can be mapped to a document. The type tag is the
/// registry key for index-descriptor dispatch; it must be unique per store
/// and stable across sessions.
///

pub trait Record: Serialize + DeserializeOwned + 'static {
    /// Type tag persisted on the backing document.
    const TYPE: &'static str;
}
