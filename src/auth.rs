use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const API_KEY_HEADERS: &[&str] = &["authorization", "x-api-key"];
const SIGNATURE_HEADERS: &[&str] = &["x-signature", "x-webhook-signature"];

/// Why an inbound call failed the credential checks. The precise reason goes
/// into the audit log; callers only ever see a generic credential error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingApiKey,
    InvalidApiKey,
    MissingSignature,
    InvalidSignature,
}

impl AuthFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::MissingApiKey => "missing API key header",
            AuthFailure::InvalidApiKey => "invalid API key",
            AuthFailure::MissingSignature => "missing signature header",
            AuthFailure::InvalidSignature => "invalid signature",
        }
    }
}

/// Run the credential checks configured on an endpoint against an inbound
/// request. Both checks must pass when both are configured; an absent
/// credential skips that check entirely.
pub fn verify_request(
    headers: &HashMap<String, Vec<String>>,
    body: &[u8],
    api_key: Option<&str>,
    secret_key: Option<&str>,
) -> Result<(), AuthFailure> {
    if let Some(key) = api_key {
        verify_api_key(headers, key)?;
    }
    if let Some(secret) = secret_key {
        verify_signature(headers, body, secret)?;
    }
    Ok(())
}

/// First value of the first present header out of `names` (header keys are
/// stored lowercased).
fn first_header<'a>(headers: &'a HashMap<String, Vec<String>>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|values| values.first()))
        .map(String::as_str)
}

/// Substring containment rather than equality: deployments send wrapped
/// header values such as `Bearer <key>`.
fn verify_api_key(
    headers: &HashMap<String, Vec<String>>,
    configured: &str,
) -> Result<(), AuthFailure> {
    let presented = first_header(headers, API_KEY_HEADERS).ok_or(AuthFailure::MissingApiKey)?;
    if presented.contains(configured) {
        Ok(())
    } else {
        Err(AuthFailure::InvalidApiKey)
    }
}

/// Verify an HMAC-SHA256 signature over the exact raw body.
///
/// Accepts a bare hex digest or a `sha256=`-prefixed one. A length mismatch
/// between the decoded digest and the expected MAC is a hard fail before the
/// constant-time comparison.
pub fn verify_signature(
    headers: &HashMap<String, Vec<String>>,
    body: &[u8],
    secret: &str,
) -> Result<(), AuthFailure> {
    let presented =
        first_header(headers, SIGNATURE_HEADERS).ok_or(AuthFailure::MissingSignature)?;
    let hex_digest = presented.strip_prefix("sha256=").unwrap_or(presented);
    let digest = hex::decode(hex_digest).map_err(|_| AuthFailure::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthFailure::InvalidSignature)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if digest.len() != expected.len() {
        return Err(AuthFailure::InvalidSignature);
    }
    if bool::from(expected.as_slice().ct_eq(&digest)) {
        Ok(())
    } else {
        Err(AuthFailure::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in pairs {
            map.entry(k.to_string()).or_default().push(v.to_string());
        }
        map
    }

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn api_key_accepts_exact_and_wrapped_values() {
        let key = "sk_live_abc123";
        assert!(verify_api_key(&headers(&[("x-api-key", "sk_live_abc123")]), key).is_ok());
        assert!(verify_api_key(&headers(&[("authorization", "Bearer sk_live_abc123")]), key).is_ok());
    }

    #[test]
    fn api_key_rejects_missing_and_wrong_values() {
        let key = "sk_live_abc123";
        assert_eq!(
            verify_api_key(&headers(&[]), key),
            Err(AuthFailure::MissingApiKey)
        );
        assert_eq!(
            verify_api_key(&headers(&[("x-api-key", "sk_live_other")]), key),
            Err(AuthFailure::InvalidApiKey)
        );
    }

    #[test]
    fn signature_accepts_exact_hex_digest() {
        let body = br#"{"lead":{"email":"a@b.com"}}"#;
        let sig = sign(body, "topsecret");
        let hdrs = headers(&[("x-signature", &sig)]);
        assert!(verify_signature(&hdrs, body, "topsecret").is_ok());
    }

    #[test]
    fn signature_accepts_sha256_prefixed_form() {
        let body = br#"{"lead":{"email":"a@b.com"}}"#;
        let sig = format!("sha256={}", sign(body, "topsecret"));
        let hdrs = headers(&[("x-webhook-signature", &sig)]);
        assert!(verify_signature(&hdrs, body, "topsecret").is_ok());
    }

    #[test]
    fn signature_rejects_tampered_body() {
        let body = br#"{"lead":{"email":"a@b.com"}}"#;
        let sig = sign(body, "topsecret");
        let hdrs = headers(&[("x-signature", &sig)]);
        let tampered = br#"{"lead":{"email":"evil@b.com"}}"#;
        assert_eq!(
            verify_signature(&hdrs, tampered, "topsecret"),
            Err(AuthFailure::InvalidSignature)
        );
    }

    #[test]
    fn signature_rejects_mutated_digest() {
        let body = br#"{"x":1}"#;
        let mut sig = sign(body, "topsecret");
        let flipped = if sig.ends_with('0') { "1" } else { "0" };
        sig.replace_range(sig.len() - 1.., flipped);
        let hdrs = headers(&[("x-signature", &sig)]);
        assert_eq!(
            verify_signature(&hdrs, body, "topsecret"),
            Err(AuthFailure::InvalidSignature)
        );
    }

    #[test]
    fn signature_rejects_wrong_length_and_bad_hex() {
        let body = br#"{"x":1}"#;
        let short = headers(&[("x-signature", "deadbeef")]);
        assert_eq!(
            verify_signature(&short, body, "topsecret"),
            Err(AuthFailure::InvalidSignature)
        );
        let garbage = headers(&[("x-signature", "not-hex-at-all")]);
        assert_eq!(
            verify_signature(&garbage, body, "topsecret"),
            Err(AuthFailure::InvalidSignature)
        );
    }

    #[test]
    fn signature_rejects_missing_header() {
        assert_eq!(
            verify_signature(&headers(&[]), b"{}", "topsecret"),
            Err(AuthFailure::MissingSignature)
        );
    }

    #[test]
    fn both_checks_required_when_both_configured() {
        let body = br#"{"x":1}"#;
        let sig = sign(body, "topsecret");
        // Valid signature but missing API key still fails.
        let hdrs = headers(&[("x-signature", &sig)]);
        assert_eq!(
            verify_request(&hdrs, body, Some("sk_live_abc123"), Some("topsecret")),
            Err(AuthFailure::MissingApiKey)
        );
        // Both present and valid passes.
        let hdrs = headers(&[("x-signature", &sig), ("x-api-key", "sk_live_abc123")]);
        assert!(verify_request(&hdrs, body, Some("sk_live_abc123"), Some("topsecret")).is_ok());
        // No credentials configured skips both checks.
        assert!(verify_request(&headers(&[]), body, None, None).is_ok());
    }
}
