//! 命令行参数、环境变量与服务常量。

use clap::Parser;
use std::path::PathBuf;

use crate::credentials::CredentialSource;

pub const USERS_FOLDER_NAME: &str = "users";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const SHARE_ROLE: &str = "writer";
pub const SHARE_GRANTEE_TYPE: &str = "user";
pub const DEFAULT_DRIVE_ENDPOINT: &str = "https://www.googleapis.com";
pub const DEFAULT_KEY_FILE: &str = "test-service-account.json";
pub const DEFAULT_PORT: u16 = 3000;
pub const TOKEN_LIFETIME_SECS: i64 = 60 * 60;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the relay.
#[derive(Parser, Debug)]
#[command(
    name = "drive-relay",
    version,
    about = "Google Drive token and sharing relay"
)]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "RELAY_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "RELAY_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 'k',
        long,
        env = "RELAY_KEY_FILE",
        default_value = DEFAULT_KEY_FILE,
        help = "Service account key file"
    )]
    pub key_file: PathBuf,
    #[arg(
        long,
        env = "RELAY_CREDENTIALS_JSON",
        hide_env_values = true,
        help = "Inline service account JSON (overrides --key-file)"
    )]
    pub credentials_json: Option<String>,
    #[arg(
        long,
        env = "RELAY_DRIVE_ENDPOINT",
        default_value = DEFAULT_DRIVE_ENDPOINT,
        help = "Drive API base URL"
    )]
    pub drive_endpoint: String,
    #[arg(long, env = "RELAY_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
}

impl Args {
    /// 选择凭据来源：内联 JSON 优先于密钥文件。
    pub fn credential_source(&self) -> CredentialSource {
        match self.credentials_json.as_deref() {
            Some(json) if !json.trim().is_empty() => CredentialSource::Inline(json.to_string()),
            _ => CredentialSource::KeyFile(self.key_file.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_port_3000() {
        let args = Args::try_parse_from(["drive-relay"]).expect("parse defaults");
        assert_eq!(args.port, 3000);
        assert_eq!(args.drive_endpoint, DEFAULT_DRIVE_ENDPOINT);
        assert!(matches!(
            args.credential_source(),
            CredentialSource::KeyFile(path) if path == PathBuf::from(DEFAULT_KEY_FILE)
        ));
    }

    #[test]
    fn inline_credentials_take_precedence() {
        let args = Args::try_parse_from([
            "drive-relay",
            "--key-file",
            "key.json",
            "--credentials-json",
            "{\"client_email\":\"a\"}",
        ])
        .expect("parse args");
        assert!(matches!(args.credential_source(), CredentialSource::Inline(_)));
    }

    #[test]
    fn blank_inline_credentials_fall_back_to_key_file() {
        let args = Args::try_parse_from(["drive-relay", "--credentials-json", "  "])
            .expect("parse args");
        assert!(matches!(args.credential_source(), CredentialSource::KeyFile(_)));
    }
}
