//! Identity extraction for authenticated endpoints (spec §4.14, §6.1).
//!
//! Wallet-signature verification is an external collaborator (spec §1 Out
//! of scope: "Signature verification for externally-owned and
//! contract-based signers"); this crate trusts that a gateway in front of
//! it has already verified the caller's token and attaches the resulting
//! claims as two headers. `IdentityClaims` only parses and validates their
//! shape.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::{
    errors::{ApiError, ErrorKind},
    ids::{Address, ChainId},
};

pub const ADDRESS_HEADER: &str = "x-market-address";
pub const CHAIN_ID_HEADER: &str = "x-market-chain-id";

/// The authenticated caller's `{address, chainId}` (spec §4.14
/// "identity claims from the request's token context").
#[derive(Debug, Clone)]
pub struct IdentityClaims {
    pub address: Address,
    pub chain_id: ChainId,
}

impl IdentityClaims {
    fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let address = headers
            .get(ADDRESS_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ErrorKind::Unauthenticated)?;
        let chain_id = headers
            .get(CHAIN_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ErrorKind::Unauthenticated)?;

        let address = Address::parse(address).map_err(|_| ApiError::from(ErrorKind::Unauthenticated))?;
        let chain_id: ChainId = chain_id.trim().parse().map_err(|_| ErrorKind::Unauthenticated)?;
        Ok(Self { address, chain_id })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for IdentityClaims
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn parses_valid_claims() {
        let mut headers = HeaderMap::new();
        headers.insert(ADDRESS_HEADER, HeaderValue::from_static("0xcccccccccccccccccccccccccccccccccccccccc"));
        headers.insert(CHAIN_ID_HEADER, HeaderValue::from_static("100"));
        let claims = IdentityClaims::from_headers(&headers).unwrap();
        assert_eq!(claims.chain_id, 100);
    }

    #[test]
    fn missing_header_is_unauthenticated() {
        let headers = HeaderMap::new();
        let err = IdentityClaims::from_headers(&headers).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Unauthenticated));
    }

    #[test]
    fn malformed_address_is_unauthenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(ADDRESS_HEADER, HeaderValue::from_static("not-an-address"));
        headers.insert(CHAIN_ID_HEADER, HeaderValue::from_static("100"));
        let err = IdentityClaims::from_headers(&headers).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Unauthenticated));
    }
}
