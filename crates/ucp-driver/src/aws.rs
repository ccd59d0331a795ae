use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use ucp_domain::CredentialKind;
use ucp_store::CredentialStore;

use crate::error::DriverError;
use crate::plane::{PlaneDriver, PlaneRequest, PlaneResponse};

/// `AWS.*` plane driver: reverse-proxies ARM-RPC requests onto the AWS
/// resource-control-plane endpoint, SigV4-signing every request with
/// credentials fetched from the Credential Store (§4.9) rather than ambient
/// SDK credential discovery — planes are configured per deployment, not
/// per-process environment.
pub struct AwsPlaneDriver {
    http: reqwest::Client,
    credentials: std::sync::Arc<dyn CredentialStore>,
    /// `planes.<name>.endpoint` from config, keyed by plane name. Falls back
    /// to the regional resource-control-plane host when a plane sets none —
    /// also how tests point a plane at a `wiremock` server.
    endpoints: HashMap<String, String>,
    default_region: String,
}

impl AwsPlaneDriver {
    pub fn new(
        http: reqwest::Client,
        credentials: std::sync::Arc<dyn CredentialStore>,
        endpoints: HashMap<String, String>,
        default_region: String,
    ) -> Self {
        Self { http, credentials, endpoints, default_region }
    }

    fn base_url(&self, plane_name: &str) -> String {
        self.endpoints
            .get(plane_name)
            .cloned()
            .unwrap_or_else(|| format!("https://{}", url_host(&self.default_region)))
    }

    async fn access_keys(&self, plane_name: &str) -> Result<(String, String, Option<String>), DriverError> {
        let record = self
            .credentials
            .get_for_plane(plane_name)
            .await?
            .ok_or_else(|| DriverError::MissingCredentials(plane_name.to_string()))?;
        if record.kind != CredentialKind::AccessKeyPair {
            return Err(DriverError::MissingCredentials(plane_name.to_string()));
        }
        let parsed: AccessKeyPair = serde_json::from_slice(&record.data)
            .map_err(|e| DriverError::Internal(format!("malformed aws credential blob: {e}")))?;
        Ok((parsed.access_key_id, parsed.secret_access_key, parsed.session_token))
    }
}

#[derive(serde::Deserialize)]
struct AccessKeyPair {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
}

#[async_trait]
impl PlaneDriver for AwsPlaneDriver {
    fn plane_type(&self) -> &'static str {
        "aws"
    }

    async fn dispatch(&self, plane_name: &str, request: PlaneRequest) -> Result<PlaneResponse, DriverError> {
        let (access_key, secret_key, session_token) = self.access_keys(plane_name).await?;
        let url = format!("{}{}", self.base_url(plane_name), request.upstream_path);
        let body_bytes = request
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| DriverError::Internal(e.to_string()))?
            .unwrap_or_default();

        let headers = sigv4_headers(
            request.method.as_str(),
            &url,
            &body_bytes,
            &access_key,
            &secret_key,
            session_token.as_deref(),
            &self.default_region,
        );

        let mut builder = self.http.request(request.method.clone(), &url);
        for (k, v) in &headers {
            builder = builder.header(k, v);
        }
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if !body_bytes.is_empty() {
            builder = builder.body(body_bytes);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let async_operation_url = resp
            .headers()
            .get("x-amzn-async-operation")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let location_url = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(DriverError::from_upstream_status(status, text));
        }

        let body = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).map_err(|e| DriverError::Internal(e.to_string()))?)
        };

        Ok(PlaneResponse { status: status.as_u16(), body, async_operation_url, location_url })
    }

    async fn poll_operation(&self, plane_name: &str, async_operation_url: &str) -> Result<PlaneResponse, DriverError> {
        let (access_key, secret_key, session_token) = self.access_keys(plane_name).await?;
        let headers = sigv4_headers(
            "GET",
            async_operation_url,
            &[],
            &access_key,
            &secret_key,
            session_token.as_deref(),
            &self.default_region,
        );
        let mut builder = self.http.get(async_operation_url);
        for (k, v) in &headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(DriverError::from_upstream_status(status, text));
        }
        let body = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).map_err(|e| DriverError::Internal(e.to_string()))?)
        };
        Ok(PlaneResponse { status: status.as_u16(), body, async_operation_url: None, location_url: None })
    }
}

fn url_host(region: &str) -> String {
    format!("resource-explorer-2.{region}.amazonaws.com")
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// AWS Signature Version 4, grounded in the teacher's AWS driver signing
/// helper: canonical request -> string-to-sign -> derived signing key ->
/// `Authorization` header, plus the `x-amz-date`/`x-amz-security-token`
/// headers the request needs alongside it.
fn sigv4_headers(
    method: &str,
    url: &str,
    body: &[u8],
    access_key: &str,
    secret_key: &str,
    session_token: Option<&str>,
    region: &str,
) -> Vec<(String, String)> {
    let service = "execute-api";
    let parsed = reqwest::Url::parse(url).expect("plane endpoint must be a valid URL");
    let host = parsed.host_str().unwrap_or_default().to_string();
    let path = if parsed.path().is_empty() { "/".to_string() } else { parsed.path().to_string() };
    let mut query_pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    query_pairs.sort();
    let canonical_query = query_pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let now = Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(body);

    let mut signed_header_names = vec!["host", "x-amz-content-sha256", "x-amz-date"];
    if session_token.is_some() {
        signed_header_names.push("x-amz-security-token");
    }
    signed_header_names.sort();

    let mut canonical_headers = String::new();
    for name in &signed_header_names {
        let value = match *name {
            "host" => host.clone(),
            "x-amz-content-sha256" => payload_hash.clone(),
            "x-amz-date" => amz_date.clone(),
            "x-amz-security-token" => session_token.unwrap_or_default().to_string(),
            _ => unreachable!(),
        };
        canonical_headers.push_str(&format!("{name}:{value}\n"));
    }
    let signed_headers = signed_header_names.join(";");

    let canonical_request = format!(
        "{method}\n{path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );
    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(secret_key, &date_stamp, region, service);
    let signature = hex_encode(&hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}"
    );

    let mut headers = vec![
        ("x-amz-date".to_string(), amz_date),
        ("x-amz-content-sha256".to_string(), payload_hash),
        ("authorization".to_string(), authorization),
    ];
    if let Some(token) = session_token {
        headers.push(("x-amz-security-token".to_string(), token.to_string()));
    }
    headers
}

fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigv4_headers_include_authorization_and_date() {
        let headers = sigv4_headers(
            "GET",
            "https://example.amazonaws.com/resource?b=2&a=1",
            b"",
            "AKIDEXAMPLE",
            "secret",
            None,
            "us-east-1",
        );
        let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
        assert!(names.contains(&"authorization"));
        assert!(names.contains(&"x-amz-date"));
        let auth = headers.iter().find(|(k, _)| k == "authorization").unwrap();
        assert!(auth.1.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
    }

    #[test]
    fn signature_changes_with_secret_key() {
        let a = sigv4_headers("GET", "https://h/x", b"", "AKID", "secret1", None, "us-east-1");
        let b = sigv4_headers("GET", "https://h/x", b"", "AKID", "secret2", None, "us-east-1");
        let sig_a = a.iter().find(|(k, _)| k == "authorization").unwrap().1.clone();
        let sig_b = b.iter().find(|(k, _)| k == "authorization").unwrap().1.clone();
        assert_ne!(sig_a, sig_b);
    }
}
