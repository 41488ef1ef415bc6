//! bunq provider integration
//!
//! Everything between bunq's REST API and the document bus:
//!
//! - per-verb token-bucket rate limiting
//! - the streaming client (accounts, payments, direct debits, schedules)
//!   with inline per-item errors and newer-than pagination
//! - the per-user refresher and the periodic refresh driver that owns
//!   the bus write half
//! - credential / refresh-timestamp / users stores
//! - the OAuth connect surface

pub mod client;
pub mod driver;
pub mod error;
pub mod mapping;
pub mod oauth;
pub mod ratelimit;
pub mod refresher;
pub mod stores;
pub mod wire;

pub use client::{
    ApiAccount, ApiContext, ApiDirectDebitTransaction, ApiGeolocation, ApiSchedule,
    ApiTransaction, BunqAccountId, BunqApi, HttpBunqApi,
};
pub use driver::{BunqApiFactory, HttpBunqApiFactory, RefreshDriver};
pub use error::{BunqError, Result};
pub use oauth::{BunqOAuth, OAuthConfig};
pub use ratelimit::{RateLimiter, TokenBucket};
pub use refresher::UserRefresher;
pub use stores::{
    Credential, CredentialsStore, InMemoryCredentialsStore, InMemoryRefreshTimestampStore,
    InMemoryUsersStore, RefreshTimestampStore, SledCredentialsStore, SledRefreshTimestampStore,
    UsersStore,
};
