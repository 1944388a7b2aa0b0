//! Request extractors for the tenant and idempotency headers.
//!
//! Tenant context is explicit everywhere: the `X-Tenant-ID` header is
//! extracted here and threaded as an argument, never stashed in ambient
//! state. The gateway enforces idempotency-key presence on POSTs; the
//! service itself treats the header as optional.

use crate::error::AppError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use rideflow_core::DEFAULT_TENANT;

/// Header carrying the tenant id.
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Header carrying the client idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Tenant id from `X-Tenant-ID`, defaulting to `"default"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantId(pub String);

impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(TENANT_HEADER) {
            None => Ok(Self(DEFAULT_TENANT.to_string())),
            Some(value) => value
                .to_str()
                .map(|v| Self(v.to_string()))
                .map_err(|_| AppError::validation("X-Tenant-ID header is not valid UTF-8")),
        }
    }
}

/// Optional `Idempotency-Key` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<String>);

impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(IDEMPOTENCY_HEADER) {
            None => Ok(Self(None)),
            Some(value) => value
                .to_str()
                .map(|v| Self(Some(v.to_string())))
                .map_err(|_| AppError::validation("Idempotency-Key header is not valid UTF-8")),
        }
    }
}
