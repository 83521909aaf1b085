//! AWS SigV4 request signing.
//!
//! Implemented by hand rather than via a high-level SDK: the testable
//! properties this client is held to (canonical-header sorting, the
//! `UNSIGNED-PAYLOAD` literal, the exact multipart XML shape) need direct
//! control over canonicalization that an SDK keeps hidden.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use vaulthalla_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Sentinel payload hash used for GET/HEAD/LIST and multipart-initiation
/// requests, where the body is empty or irrelevant to the signature.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

pub struct SigningCredentials<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
}

/// A signed request's derived `Authorization` header and the `x-amz-date`
/// it was computed against.
pub struct Signature {
    pub authorization: String,
    pub amz_date: String,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_raw(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Build the canonical request string per the SigV4 spec. `headers` must
/// already be lowercase and sorted lexicographically by the caller.
pub fn canonical_request(
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> (String, String) {
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );
    (canonical, signed_headers)
}

fn signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_raw(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_raw(&k_date, region.as_bytes());
    let k_service = hmac_raw(&k_region, service.as_bytes());
    hmac_raw(&k_service, b"aws4_request")
}

/// Sign a request, producing the `Authorization` header value.
///
/// `headers` must include every header that will actually be sent
/// (including `host` and `x-amz-date`/`x-amz-content-sha256`), lowercase
/// and lexicographically sorted — the caller builds this list, this
/// function only signs it.
#[allow(clippy::too_many_arguments)]
pub fn sign(
    creds: &SigningCredentials,
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &[(String, String)],
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Result<Signature> {
    if creds.access_key.is_empty() || creds.secret_key.is_empty() {
        return Err(Error::Permission("missing S3 credentials".to_string()));
    }

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let service = "s3";
    let credential_scope = format!("{date_stamp}/{}/{service}/aws4_request", creds.region);

    let (canonical, signed_headers) =
        canonical_request(method, canonical_uri, canonical_query, headers, payload_hash);
    let hashed_canonical = sha256_hex(canonical.as_bytes());

    let string_to_sign =
        format!("AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{hashed_canonical}");

    let signing_key = signing_key(creds.secret_key, &date_stamp, creds.region, service);
    let signature = hex::encode(hmac_raw(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key
    );

    Ok(Signature { authorization, amz_date })
}

/// `SHA256(body)` as lowercase hex, for requests small enough to sign the
/// actual payload rather than using [`UNSIGNED_PAYLOAD`].
pub fn payload_sha256_hex(body: &[u8]) -> String {
    sha256_hex(body)
}
