/// Router Module Index
///
/// Splits the API into access-segregated modules. Each module's routes share one
/// access level, and the layer enforcing it is applied where the module is
/// merged in `create_router`.

/// Routes open to everyone: service endpoints and post reads.
pub mod public;

/// Credential-issuing routes, wrapped in the strict auth rate limiter.
pub mod auth;

/// Routes behind the `AuthUser` middleware. Post mutations additionally evaluate
/// their `AccessPolicy` inside the handler.
pub mod authenticated;
