use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

/// Stream of blob bytes, the unit every streaming stage passes along
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Identifier of an object in the catalog (what clients address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier handed out by the blob store. Either a structured UUID or an
/// opaque legacy key; resolution is the store's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub String);

impl BlobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A per-object key encrypted under the master wrapping key, base64 encoded.
///
/// Decoded layout: `[16-byte IV][AES-CBC ciphertext of the raw key]`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WrappedKey(pub String);

impl WrappedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // wrapped material is safe to print, but keep log lines short
        let head: String = self.0.chars().take(8).collect();
        write!(f, "WrappedKey({head}…)")
    }
}

/// Encryption state attached to a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedObjectDescriptor {
    pub is_encrypted: bool,
    pub wrapped_key: Option<WrappedKey>,
}

impl EncryptedObjectDescriptor {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn encrypted(wrapped_key: WrappedKey) -> Self {
        Self {
            is_encrypted: true,
            wrapped_key: Some(wrapped_key),
        }
    }

    /// An object counts as encrypted only when it also carries a key.
    pub fn wrapped_key(&self) -> Option<&WrappedKey> {
        if self.is_encrypted {
            self.wrapped_key.as_ref().filter(|k| !k.0.is_empty())
        } else {
            None
        }
    }
}

/// Fixed-schema metadata recorded for every stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub uploader_id: String,
    pub original_filename: String,
    pub content_type: String,
    /// Plaintext size in bytes
    pub size: u64,
    /// Unix timestamp (seconds)
    pub upload_timestamp: u64,
}

/// Catalog entry linking an object to its blob and encryption state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub blob_id: BlobId,
    pub metadata: ObjectMetadata,
    pub encryption: EncryptedObjectDescriptor,
    /// Plaintext chunk size used by the chunked cipher (0 for plain objects)
    #[serde(default)]
    pub chunk_size: u64,
    #[serde(default)]
    pub view_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_requires_key() {
        let d = EncryptedObjectDescriptor {
            is_encrypted: true,
            wrapped_key: Some(WrappedKey(String::new())),
        };
        assert!(d.wrapped_key().is_none());

        let d = EncryptedObjectDescriptor::encrypted(WrappedKey("abcd".into()));
        assert_eq!(d.wrapped_key().map(|k| k.as_str()), Some("abcd"));

        assert!(EncryptedObjectDescriptor::plain().wrapped_key().is_none());
    }

    #[test]
    fn test_record_json_shape() {
        let record = ObjectRecord {
            id: ObjectId("obj1".into()),
            blob_id: BlobId("blob1".into()),
            metadata: ObjectMetadata {
                uploader_id: "u1".into(),
                original_filename: "clip.mp4".into(),
                content_type: "video/mp4".into(),
                size: 42,
                upload_timestamp: 1_700_000_000,
            },
            encryption: EncryptedObjectDescriptor::plain(),
            chunk_size: 0,
            view_count: 3,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "obj1");
        assert_eq!(json["blob_id"], "blob1");
        assert_eq!(json["metadata"]["content_type"], "video/mp4");
        assert_eq!(json["encryption"]["is_encrypted"], false);

        let back: ObjectRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.view_count, 3);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ObjectId::new(), ObjectId::new());
        assert_ne!(BlobId::new(), BlobId::new());
    }
}
