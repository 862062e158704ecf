// Request-scoped tenant context, read from gateway-set headers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use gestor_core::{RoleLevel, TenantContext};

use crate::error_handling::AppError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ROLE_HEADER: &str = "x-role-level";
pub const DEPARTMENT_HEADER: &str = "x-department";

/// Extractor wrapper so handlers can take `Tenant(ctx)`.
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantContext);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn context_from_headers(headers: &HeaderMap) -> Result<TenantContext, AppError> {
    let tenant_id = header(headers, TENANT_HEADER)
        .ok_or_else(|| AppError::unauthorized(format!("{} header is required", TENANT_HEADER)))?;
    let actor_id = header(headers, ACTOR_HEADER).unwrap_or("anonymous");
    let role = match header(headers, ROLE_HEADER) {
        Some(level) => level
            .parse::<RoleLevel>()
            .map_err(|_| AppError::validation(format!("Unknown role level '{}'", level)))?,
        None => RoleLevel::Citizen,
    };

    let mut ctx = TenantContext::new(tenant_id, actor_id, role);
    if let Some(department) = header(headers, DEPARTMENT_HEADER) {
        ctx = ctx.with_department(department);
    }
    Ok(ctx)
}

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        context_from_headers(&parts.headers).map(Tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    #[test]
    fn test_context_defaults_to_citizen() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("city-a"));
        let ctx = context_from_headers(&headers).unwrap();
        assert_eq!(ctx.tenant_id, "city-a");
        assert_eq!(ctx.role, RoleLevel::Citizen);
        assert_eq!(ctx.actor_id, "anonymous");
    }

    #[test]
    fn test_missing_tenant_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(ROLE_HEADER, HeaderValue::from_static("manager"));
        assert_matches!(context_from_headers(&headers), Err(AppError::Unauthorized { .. }));

        headers.insert(TENANT_HEADER, HeaderValue::from_static("city-a"));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("mayor"));
        assert_matches!(context_from_headers(&headers), Err(AppError::Validation { .. }));
    }
}
