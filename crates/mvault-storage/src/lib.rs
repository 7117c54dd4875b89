//! mvault-storage: blob store over OpenDAL with typed id resolution

pub mod blob;
pub mod error;
pub mod health;
pub mod operator;
pub mod resolve;

pub use blob::{BlobReader, BlobStore, OpenedBlob, StoredBlob};
pub use error::{StorageError, StorageResult};
pub use health::{check_health, is_healthy};
pub use operator::{build_operator, S3Credentials};
pub use resolve::{diagnose, resolve, DiagnosticReport, IdResolver, ResolverFinding};
