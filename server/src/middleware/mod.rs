pub mod auth;
pub mod idempotency;

pub use auth::Identity;
pub use idempotency::IdempotencyMiddleware;
