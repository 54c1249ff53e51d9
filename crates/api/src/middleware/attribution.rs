//! Caller attribution extractor.
//!
//! Intake routes record who sent a request from the `x-origin` and `x-issuer`
//! headers. Both are optional; a header that is present but not valid UTF-8
//! is rejected.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use herald_common::error::AppError;
use herald_common::types::Attribution;

pub const ORIGIN_HEADER: &str = "x-origin";
pub const ISSUER_HEADER: &str = "x-issuer";

/// Attribution extracted from request headers.
///
/// ```ignore
/// async fn handler(Attributed(attribution): Attributed) -> impl IntoResponse {
///     // attribution.origin, attribution.issuer
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Attributed(pub Attribution);

impl<S> FromRequestParts<S> for Attributed
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Attributed(Attribution {
            origin: header(parts, ORIGIN_HEADER)?,
            issuer: header(parts, ISSUER_HEADER)?,
        }))
    }
}

fn header(parts: &Parts, name: &str) -> Result<Option<String>, AppError> {
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| AppError::Validation(format!("Header {} is not valid UTF-8", name)))?
        .trim();

    if value.is_empty() {
        Ok(None)
    } else {
        Ok(Some(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, Request};

    use super::*;

    async fn extract(request: Request<()>) -> Result<Attribution, AppError> {
        let (mut parts, _) = request.into_parts();
        Attributed::from_request_parts(&mut parts, &())
            .await
            .map(|Attributed(attribution)| attribution)
    }

    #[tokio::test]
    async fn test_headers_are_optional() {
        let attribution = extract(Request::builder().body(()).unwrap()).await.unwrap();
        assert_eq!(attribution, Attribution::default());
    }

    #[tokio::test]
    async fn test_headers_are_trimmed() {
        let request = Request::builder()
            .header(ORIGIN_HEADER, " case-management ")
            .header(ISSUER_HEADER, "")
            .body(())
            .unwrap();

        let attribution = extract(request).await.unwrap();

        assert_eq!(attribution.origin.as_deref(), Some("case-management"));
        assert!(attribution.issuer.is_none());
    }

    #[tokio::test]
    async fn test_non_utf8_header_is_rejected() {
        let mut request = Request::builder().body(()).unwrap();
        request.headers_mut().insert(
            ORIGIN_HEADER,
            HeaderValue::from_bytes(&[0xfa, 0xfb]).unwrap(),
        );

        assert!(matches!(extract(request).await, Err(AppError::Validation(_))));
    }
}
