#![warn(missing_docs)]

//! Cryptpack key subsystem: vault key resolution, bearer-token boundary,
//! envelope key wrap/unwrap (DEK under vault-held KEK).
//!
//! Every vault call authenticates with a freshly acquired bearer token;
//! nothing is cached across calls.

pub mod error;
pub mod handle;
pub mod resolver;
pub mod token;
pub mod vault;

pub use error::{KeyError, KeyResult};
pub use handle::{DataKey, KekMaterial, KeyHandle, WrappedDek};
pub use resolver::{KeyResolver, KeyServiceConfig};
pub use token::{BearerToken, ClientCredentials, StaticTokenProvider, TokenProvider};
pub use vault::{InMemoryKeyVault, KeyVaultBackend};
