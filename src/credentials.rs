//! 服务账号凭据加载与访问令牌签发。
//!
//! The relay authenticates as a single Google service account. The key is
//! read once at startup; every call to [`TokenProvider::access_token`] signs a
//! fresh JWT assertion and exchanges it at the account's token endpoint.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::rand::SystemRandom;
use ring::signature::{RSA_PKCS1_SHA256, RsaKeyPair};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info};

use crate::config::TOKEN_LIFETIME_SECS;
use crate::error::AuthError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const PKCS8_PEM_TAG: &str = "PRIVATE KEY";

/// 凭据来源：密钥文件路径或内联 JSON。
#[derive(Clone)]
pub enum CredentialSource {
    KeyFile(PathBuf),
    Inline(String),
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            CredentialSource::Inline(_) => f.write_str("Inline(<redacted>)"),
        }
    }
}

impl CredentialSource {
    /// 读取并解析服务账号密钥。
    pub async fn load(&self) -> Result<ServiceAccountKey, AuthError> {
        let raw = match self {
            CredentialSource::KeyFile(path) => fs::read_to_string(path).await?,
            CredentialSource::Inline(json) => json.clone(),
        };
        serde_json::from_str(&raw).map_err(|err| AuthError::InvalidKey(err.to_string()))
    }
}

/// The subset of a service-account key file the relay needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("private_key_id", &self.private_key_id)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// 短期有效的 Bearer 令牌；过期时间由令牌端点决定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
}

/// Capability for minting bearer tokens for the service identity.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<AccessToken, AuthError>;
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// 基于服务账号 JWT 断言的令牌签发器。
pub struct ServiceAccountTokens {
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    scope: String,
    key_pair: RsaKeyPair,
    rng: SystemRandom,
    http: reqwest::Client,
}

impl ServiceAccountTokens {
    /// 解析私钥并构建签发器；私钥无效时返回错误。
    pub fn new(
        key: &ServiceAccountKey,
        scope: &str,
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        let der = pem_to_der(&key.private_key)?;
        let key_pair =
            RsaKeyPair::from_pkcs8(&der).map_err(|err| AuthError::InvalidKey(err.to_string()))?;
        Ok(Self {
            client_email: key.client_email.clone(),
            key_id: key.private_key_id.clone(),
            token_uri: key.token_uri.clone(),
            scope: scope.to_string(),
            key_pair,
            rng: SystemRandom::new(),
            http,
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// 生成 RS256 签名的 JWT 断言。
    fn sign_assertion(&self, issued_at: i64) -> Result<String, AuthError> {
        let header = JwtHeader {
            alg: "RS256",
            typ: "JWT",
            kid: self.key_id.as_deref(),
        };
        let claims = JwtClaims {
            iss: &self.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + TOKEN_LIFETIME_SECS,
        };
        let header =
            serde_json::to_vec(&header).map_err(|err| AuthError::InvalidKey(err.to_string()))?;
        let claims =
            serde_json::to_vec(&claims).map_err(|err| AuthError::InvalidKey(err.to_string()))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );

        let mut signature = vec![0; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &RSA_PKCS1_SHA256,
                &self.rng,
                signing_input.as_bytes(),
                &mut signature,
            )
            .map_err(|err| AuthError::InvalidKey(err.to_string()))?;
        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        let assertion = self.sign_assertion(chrono::Utc::now().timestamp())?;
        let response = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let TokenResponse { access_token } = response.json().await?;
        debug!(client_email = %self.client_email, "access token issued");
        Ok(AccessToken {
            token: access_token,
        })
    }
}

/// 将 PEM 编码的 PKCS#8 私钥解码为 DER。
fn pem_to_der(private_key: &str) -> Result<Vec<u8>, AuthError> {
    let parsed = pem::parse(private_key).map_err(|err| AuthError::InvalidKey(err.to_string()))?;
    if parsed.tag != PKCS8_PEM_TAG {
        return Err(AuthError::InvalidKey(format!(
            "expected a PKCS#8 \"{PKCS8_PEM_TAG}\" block, found \"{}\"",
            parsed.tag
        )));
    }
    Ok(parsed.contents)
}

/// Token source used when the service account could not be loaded.
///
/// Every request reports the startup failure instead of the process exiting.
pub struct MissingCredentials {
    reason: String,
}

#[async_trait]
impl TokenProvider for MissingCredentials {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        Err(AuthError::Unavailable(self.reason.clone()))
    }
}

/// 加载凭据并构建令牌签发器；失败时退化为始终报错的签发器。
pub async fn load_token_provider(
    source: &CredentialSource,
    scope: &str,
    http: reqwest::Client,
) -> Arc<dyn TokenProvider> {
    let loaded = match source.load().await {
        Ok(key) => ServiceAccountTokens::new(&key, scope, http).map(|tokens| (key, tokens)),
        Err(err) => Err(err),
    };
    match loaded {
        Ok((key, tokens)) => {
            info!(
                client_email = tokens.client_email(),
                project_id = key.project_id.as_deref().unwrap_or("-"),
                source = ?source,
                "loaded service account"
            );
            Arc::new(tokens)
        }
        Err(err) => {
            error!(error = %err, source = ?source, "failed to load service account");
            Arc::new(MissingCredentials {
                reason: err.to_string(),
            })
        }
    }
}
