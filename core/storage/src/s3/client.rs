//! Wire-level S3 client: signed requests, multipart upload, metadata
//! round-trips, paginated listing.
//!
//! Structurally modeled on a Google Drive API client this crate's teacher
//! once carried (one struct holding an HTTP client, one async method per
//! wire operation, a shared response-to-error mapping helper) — the
//! protocol underneath is hand-rolled AWS SigV4 rather than OAuth2 bearer
//! tokens, because the canonicalization this module is held to (exact
//! header sorting, the `UNSIGNED-PAYLOAD` literal, multipart semantics)
//! needs direct control a high-level SDK hides.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use zeroize::Zeroizing;

use vaulthalla_common::{Error, Result};

use super::sigv4::{self, SigningCredentials, UNSIGNED_PAYLOAD};

/// Characters that must be percent-encoded in an S3 object key segment,
/// beyond the unreserved set RFC 3986 leaves alone.
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'^')
    .add(b'|')
    .add(b'\\');

/// Credentials and addressing for one (api_key, bucket) pair.
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: Zeroizing<String>,
    pub region: String,
    /// Scheme + host, e.g. `https://s3.us-east-1.amazonaws.com`.
    pub endpoint: String,
    pub bucket: String,
}

/// One entry returned by [`S3Client::list_objects`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Object {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// A completed part, as returned by [`S3Client::upload_part`].
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

pub struct S3Client {
    http: Client,
    creds: S3Credentials,
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|seg| utf8_percent_encode(seg, KEY_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

impl S3Client {
    pub fn new(creds: S3Credentials) -> Self {
        let http = Client::builder()
            .user_agent("vaulthalla/0.1")
            .build()
            .expect("failed to build HTTP client");
        Self { http, creds }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.creds.endpoint, self.creds.bucket, encode_key(key))
    }

    fn host(&self) -> Result<String> {
        url::Url::parse(&self.creds.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| Error::Usage(format!("invalid S3 endpoint: {}", self.creds.endpoint)))
    }

    /// Sign and send a request, returning the raw response.
    async fn signed_request(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &str,
        body: Option<&[u8]>,
        unsigned_payload: bool,
    ) -> Result<reqwest::Response> {
        let now = Utc::now();
        let host = self.host()?;
        let payload_hash = if unsigned_payload {
            UNSIGNED_PAYLOAD.to_string()
        } else {
            sigv4::payload_sha256_hex(body.unwrap_or(&[]))
        };

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_uri = format!("/{}/{}", self.creds.bucket, encode_key(key));
        let creds = SigningCredentials {
            access_key: &self.creds.access_key,
            secret_key: &self.creds.secret_key,
            region: &self.creds.region,
        };
        let signature = sigv4::sign(&creds, method.as_str(), &canonical_uri, query, &headers, &payload_hash, now)?;

        let url = if query.is_empty() {
            self.object_url(key)
        } else {
            format!("{}?{}", self.object_url(key), query)
        };

        let mut request = self
            .http
            .request(method, &url)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date)
            .header("Authorization", signature.authorization);

        if let Some(b) = body {
            request = request.body(b.to_vec());
        }

        request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("S3 request failed: {e}")))
    }

    async fn map_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Error::NotFound(format!("S3 object not found: {body}")),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                Error::Permission(format!("S3 auth failed: {status} - {body}"))
            }
            StatusCode::CONFLICT => Error::Conflict(format!("S3 conflict: {body}")),
            _ => Error::Transport(format!("S3 error: {status} - {body}")),
        }
    }

    pub async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let response = self
            .signed_request(reqwest::Method::PUT, key, "", Some(&body), false)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::map_error(response).await)
        }
    }

    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .signed_request(reqwest::Method::GET, key, "", None, true)
            .await?;
        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Transport(format!("failed reading S3 body: {e}")))
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        let response = self
            .signed_request(reqwest::Method::DELETE, key, "", None, true)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::map_error(response).await)
        }
    }

    /// Returns `None` on 404, per contract.
    pub async fn head_object(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let response = self
            .signed_request(reqwest::Method::HEAD, key, "", None, true)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
            .collect();
        Ok(Some(headers))
    }

    /// Drains every page, following `<NextContinuationToken>` until
    /// `<IsTruncated>false</IsTruncated>`.
    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<S3Object>> {
        let mut all = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = format!("list-type=2&prefix={}", encode_key(prefix));
            if let Some(token) = &continuation {
                query.push_str(&format!("&continuation-token={}", encode_key(token)));
            }

            let response = self
                .signed_request_on_bucket_root(reqwest::Method::GET, &query)
                .await?;
            if !response.status().is_success() {
                return Err(Self::map_error(response).await);
            }
            let body = response
                .text()
                .await
                .map_err(|e| Error::Transport(format!("failed reading list response: {e}")))?;

            let (objects, truncated, next_token) = parse_list_objects_xml(&body)?;
            all.extend(objects);

            if truncated {
                continuation = next_token;
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(all)
    }

    /// Same signing path as [`S3Client::signed_request`] but against the
    /// bucket root rather than a specific key, for listing.
    async fn signed_request_on_bucket_root(
        &self,
        method: reqwest::Method,
        query: &str,
    ) -> Result<reqwest::Response> {
        let now = Utc::now();
        let host = self.host()?;
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), UNSIGNED_PAYLOAD.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_uri = format!("/{}", self.creds.bucket);
        let creds = SigningCredentials {
            access_key: &self.creds.access_key,
            secret_key: &self.creds.secret_key,
            region: &self.creds.region,
        };
        let signature = sigv4::sign(
            &creds,
            method.as_str(),
            &canonical_uri,
            query,
            &headers,
            UNSIGNED_PAYLOAD,
            now,
        )?;

        let url = format!("{}/{}?{}", self.creds.endpoint, self.creds.bucket, query);
        self.http
            .request(method, &url)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-date", amz_date)
            .header("Authorization", signature.authorization)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("S3 request failed: {e}")))
    }

    /// Self-copy with `x-amz-meta-content-hash` set, per the metadata-only
    /// rewrite contract (no data re-upload).
    pub async fn set_object_content_hash(&self, key: &str, hash: &str) -> Result<()> {
        self.self_copy_with_metadata(key, &[("x-amz-meta-content-hash", hash)]).await
    }

    /// Self-copy with `x-amz-meta-vh-iv` / `x-amz-meta-vh-key-version` set.
    pub async fn set_object_encryption_metadata(&self, key: &str, iv_b64: &str, key_version: u32) -> Result<()> {
        self.self_copy_with_metadata(
            key,
            &[
                ("x-amz-meta-vh-iv", iv_b64),
                ("x-amz-meta-vh-key-version", &key_version.to_string()),
            ],
        )
        .await
    }

    /// Single self-copy stamping content hash and encryption metadata
    /// together, so a freshly uploaded object only takes one metadata
    /// round-trip instead of two.
    pub async fn set_object_vault_metadata(
        &self,
        key: &str,
        content_hash: &str,
        iv_b64: &str,
        key_version: u32,
    ) -> Result<()> {
        self.self_copy_with_metadata(
            key,
            &[
                ("x-amz-meta-content-hash", content_hash),
                ("x-amz-meta-vh-encrypted", "true"),
                ("x-amz-meta-vh-algo", "aes256gcm"),
                ("x-amz-meta-vh-iv", iv_b64),
                ("x-amz-meta-vh-key-version", &key_version.to_string()),
            ],
        )
        .await
    }

    async fn self_copy_with_metadata(&self, key: &str, metadata: &[(&str, &str)]) -> Result<()> {
        let now = Utc::now();
        let host = self.host()?;
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let copy_source = format!("{}/{}", self.creds.bucket, encode_key(key));

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), UNSIGNED_PAYLOAD.to_string()),
            ("x-amz-copy-source".to_string(), copy_source.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
            ("x-amz-metadata-directive".to_string(), "REPLACE".to_string()),
        ];
        for (k, v) in metadata {
            headers.push((k.to_lowercase(), v.to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_uri = format!("/{}/{}", self.creds.bucket, encode_key(key));
        let creds = SigningCredentials {
            access_key: &self.creds.access_key,
            secret_key: &self.creds.secret_key,
            region: &self.creds.region,
        };
        let signature = sigv4::sign(
            &creds,
            "PUT",
            &canonical_uri,
            "",
            &headers,
            UNSIGNED_PAYLOAD,
            now,
        )?;

        let mut request = self
            .http
            .put(self.object_url(key))
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-date", amz_date)
            .header("x-amz-copy-source", copy_source)
            .header("x-amz-metadata-directive", "REPLACE")
            .header("Authorization", signature.authorization);
        for (k, v) in metadata {
            request = request.header(*k, *v);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("S3 self-copy failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::map_error(response).await)
        }
    }

    pub async fn initiate_multipart(&self, key: &str) -> Result<String> {
        let response = self
            .signed_request(reqwest::Method::POST, key, "uploads", None, true)
            .await?;
        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed reading initiate-multipart response: {e}")))?;
        extract_xml_tag(&body, "UploadId")
            .ok_or_else(|| Error::Integrity("missing UploadId in initiate-multipart response".to_string()))
    }

    /// Part numbers are 1-based, contiguous, assigned in submission order
    /// by the caller. Returns the part's ETag for [`S3Client::complete_multipart`].
    pub async fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, body: Vec<u8>) -> Result<String> {
        let query = format!("partNumber={part_number}&uploadId={upload_id}");
        let response = self
            .signed_request(reqwest::Method::PUT, key, &query, Some(&body), false)
            .await?;
        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }
        response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string())
            .ok_or_else(|| Error::Integrity("missing ETag on part upload".to_string()))
    }

    /// `parts` must already be in ascending `part_number` order.
    pub async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[CompletedPart]) -> Result<()> {
        let mut body = String::from("<CompleteMultipartUpload>");
        for part in parts {
            body.push_str(&format!(
                "<Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag></Part>",
                part.part_number, part.etag
            ));
        }
        body.push_str("</CompleteMultipartUpload>");

        let query = format!("uploadId={upload_id}");
        let response = self
            .signed_request(reqwest::Method::POST, key, &query, Some(body.as_bytes()), false)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::map_error(response).await)
        }
    }

    pub async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let query = format!("uploadId={upload_id}");
        let response = self
            .signed_request(reqwest::Method::DELETE, key, &query, None, true)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::map_error(response).await)
        }
    }
}

fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut in_tag = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == tag.as_bytes() => in_tag = true,
            Ok(Event::Text(e)) if in_tag => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(Event::End(e)) if e.name().as_ref() == tag.as_bytes() => in_tag = false,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Parses a `ListObjectsV2` response. Tolerant of UTF-8 path bytes; keys
/// arrive in lexicographic order from S3 itself, so no re-sorting is done.
fn parse_list_objects_xml(xml: &str) -> Result<(Vec<S3Object>, bool, Option<String>)> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut objects = Vec::new();
    let mut truncated = false;
    let mut next_token = None;

    let mut current_tag: Option<String> = None;
    let mut key = None;
    let mut size: u64 = 0;
    let mut etag = String::new();
    let mut last_modified = Utc::now();
    let mut in_contents = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| {
            Error::Integrity(format!("malformed S3 list response: {e}"))
        })? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "Contents" {
                    in_contents = true;
                    key = None;
                    size = 0;
                    etag.clear();
                    last_modified = Utc::now();
                }
                current_tag = Some(name);
            }
            Event::Text(e) => {
                let text = e.unescape().unwrap_or_default().into_owned();
                match current_tag.as_deref() {
                    Some("Key") if in_contents => key = Some(text),
                    Some("Size") if in_contents => size = text.parse().unwrap_or(0),
                    Some("ETag") if in_contents => etag = text.trim_matches('"').to_string(),
                    Some("LastModified") if in_contents => {
                        if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
                            last_modified = parsed.with_timezone(&Utc);
                        }
                    }
                    Some("IsTruncated") => truncated = text == "true",
                    Some("NextContinuationToken") => next_token = Some(text),
                    _ => {}
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "Contents" {
                    if let Some(k) = key.take() {
                        objects.push(S3Object { key: k, size, etag: etag.clone(), last_modified });
                    }
                    in_contents = false;
                }
                current_tag = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok((objects, truncated, next_token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_key_preserves_slashes_and_escapes_spaces() {
        assert_eq!(encode_key("docs/my file.txt"), "docs/my%20file.txt");
    }

    #[test]
    fn parses_list_objects_single_page() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>docs/a.txt</Key><Size>10</Size><ETag>"abc"</ETag></Contents>
  <Contents><Key>docs/b.txt</Key><Size>20</Size><ETag>"def"</ETag></Contents>
</ListBucketResult>"#;
        let (objects, truncated, token) = parse_list_objects_xml(xml).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "docs/a.txt");
        assert_eq!(objects[1].size, 20);
        assert!(!truncated);
        assert!(token.is_none());
    }

    #[test]
    fn parses_last_modified_into_utc_timestamp() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>a</Key><Size>1</Size><ETag>"x"</ETag><LastModified>2024-03-01T12:00:00.000Z</LastModified></Contents>
</ListBucketResult>"#;
        let (objects, _, _) = parse_list_objects_xml(xml).unwrap();
        assert_eq!(objects[0].last_modified.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn parses_truncated_page_with_continuation_token() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc123</NextContinuationToken>
  <Contents><Key>a</Key><Size>1</Size><ETag>"x"</ETag></Contents>
</ListBucketResult>"#;
        let (objects, truncated, token) = parse_list_objects_xml(xml).unwrap();
        assert_eq!(objects.len(), 1);
        assert!(truncated);
        assert_eq!(token, Some("abc123".to_string()));
    }

    #[test]
    fn extracts_upload_id_from_initiate_response() {
        let xml = r#"<InitiateMultipartUploadResult><Bucket>b</Bucket><Key>k</Key><UploadId>upload-xyz</UploadId></InitiateMultipartUploadResult>"#;
        assert_eq!(extract_xml_tag(xml, "UploadId"), Some("upload-xyz".to_string()));
    }
}
