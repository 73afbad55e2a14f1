use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;
use tracing::debug;

use crate::errors::FetchError;

/// 20x21 black PNG, used when nothing better is available.
pub const PLACEHOLDER_ICON: &str = "iVBORw0KGgoAAAANSUhEUgAAABQAAAAVCAIAAADJt1n/AAAAKElEQVQ4EWPk5+RmIBcwkasRpG9UM4mhNxpgowFGMARGEwnBIEJVAAAdBgBNAZf+QAAAAABJRU5ErkJggg==";

pub const DEFAULT_AVATAR_URL: &str = "https://p.qlogo.cn/gh/{group}/{group}/640/";

/// Picks the icon to show next to a status, as base64 without a `data:` prefix.
pub struct IconExtractor {
    http_client: reqwest::Client,
    avatar_url_template: String,
    avatar_timeout: Duration,
}

impl IconExtractor {
    pub fn new(avatar_url_template: impl Into<String>, avatar_timeout_ms: u64) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            avatar_url_template: avatar_url_template.into(),
            avatar_timeout: Duration::from_millis(avatar_timeout_ms),
        }
    }

    /// First non-empty of: server icon, group default icon, group avatar,
    /// global default icon, placeholder.
    ///
    /// The group default icon is an extra step on top of the usual
    /// server icon / avatar / global icon / placeholder order. With no
    /// group icon configured the order is exactly that one.
    pub async fn extract(
        &self,
        raw_icon: Option<&str>,
        group_id: Option<i64>,
        group_default_icon: &str,
        global_default_icon: &str,
    ) -> String {
        if let Some(icon) = raw_icon.map(strip_data_url).filter(|icon| !icon.is_empty()) {
            return icon.to_string();
        }
        let group_default_icon = strip_data_url(group_default_icon);
        if !group_default_icon.is_empty() {
            return group_default_icon.to_string();
        }
        if let Some(group_id) = group_id {
            match self.fetch_avatar(group_id).await {
                Ok(icon) => return icon,
                Err(e) => debug!("Avatar fetch for group {} failed: {}", group_id, e),
            }
        }
        let global_default_icon = strip_data_url(global_default_icon);
        if !global_default_icon.is_empty() {
            return global_default_icon.to_string();
        }
        PLACEHOLDER_ICON.to_string()
    }

    async fn fetch_avatar(&self, group_id: i64) -> Result<String, FetchError> {
        let url = self.avatar_url_template.replace("{group}", &group_id.to_string());
        let response = self.http_client.get(&url).timeout(self.avatar_timeout).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }
        let bytes = response.bytes().await?;
        Ok(STANDARD.encode(&bytes))
    }
}

/// `data:image/png;base64,AAAA` -> `AAAA`. Anything else is returned as is.
pub fn strip_data_url(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.find(";base64,") {
        Some(idx) if raw.starts_with("data:") => &raw[idx + ";base64,".len()..],
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn spawn_avatar_server() -> u16 {
        let app = Router::new()
            .route("/avatar/42", get(|| async { vec![1u8, 2, 3] }))
            .route("/avatar/7", get(|| async { StatusCode::NOT_FOUND }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,iVBORw0KGgo="), "iVBORw0KGgo=");
        assert_eq!(strip_data_url("iVBORw0KGgo="), "iVBORw0KGgo=");
        assert_eq!(strip_data_url("data:image/png;base64,"), "");
    }

    #[tokio::test]
    async fn test_server_icon_wins() {
        let icons = IconExtractor::new(DEFAULT_AVATAR_URL, 100);
        let icon = icons
            .extract(Some("data:image/png;base64,SERVER"), Some(42), "GROUP", "GLOBAL")
            .await;
        assert_eq!(icon, "SERVER");
    }

    #[tokio::test]
    async fn test_group_default_before_avatar() {
        let icons = IconExtractor::new(DEFAULT_AVATAR_URL, 100);
        assert_eq!(icons.extract(Some(""), Some(42), "GROUP", "GLOBAL").await, "GROUP");
    }

    #[tokio::test]
    async fn test_without_group_icon_avatar_comes_before_global() {
        let port = spawn_avatar_server().await;
        let icons = IconExtractor::new(format!("http://127.0.0.1:{}/avatar/{{group}}", port), 2000);
        assert_eq!(icons.extract(Some(""), Some(42), "", "GLOBAL").await, "AQID");
    }

    #[tokio::test]
    async fn test_avatar_fetch_is_base64_encoded() {
        let port = spawn_avatar_server().await;
        let icons = IconExtractor::new(format!("http://127.0.0.1:{}/avatar/{{group}}", port), 2000);
        assert_eq!(icons.extract(None, Some(42), "", "GLOBAL").await, "AQID");
        // Non-success status falls through to the global default.
        assert_eq!(icons.extract(None, Some(7), "", "GLOBAL").await, "GLOBAL");
    }

    #[tokio::test]
    async fn test_failed_fetch_and_no_defaults_gives_placeholder() {
        let port = closed_port().await;
        let icons = IconExtractor::new(format!("http://127.0.0.1:{}/{{group}}", port), 500);
        assert_eq!(icons.extract(None, Some(42), "", "").await, PLACEHOLDER_ICON);
        assert_eq!(icons.extract(None, None, "", "").await, PLACEHOLDER_ICON);
    }

    #[tokio::test]
    async fn test_global_default_without_group() {
        let icons = IconExtractor::new(DEFAULT_AVATAR_URL, 100);
        assert_eq!(icons.extract(None, None, "", "data:image/png;base64,GLOBAL").await, "GLOBAL");
    }
}
