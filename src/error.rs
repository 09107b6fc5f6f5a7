use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("認証情報が不正です: {0}")]
    InvalidCredentials(String),

    #[error("サイト上での操作が必要です: {0}")]
    ActionRequired(String),

    #[error("未知のページ: {url}")]
    UnrecognizedPage { url: String },

    #[error("一時的な通信エラー ({attempts}回試行): {message}")]
    TransientNetwork { attempts: u32, message: String },

    #[error("サイトが応答しません (HTTP {status}): {url}")]
    UpstreamUnavailable { status: u16, url: String },

    #[error("HTTPエラー {status}: {url}")]
    Http { status: u16, url: String },

    #[error("未実装: {0}")]
    NotImplemented(&'static str),

    #[error("見つかりません: {0}")]
    NotFound(String),

    /// サイトの挙動が想定と異なる
    #[error("想定外のサイト挙動: {0}")]
    SiteAssertion(String),

    #[error("解析エラー: {0}")]
    Parse(String),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URLエラー: {0}")]
    Url(#[from] url::ParseError),

    #[error("通信エラー: {0}")]
    Transport(String),

    #[error("ブラウザエラー: {0}")]
    Browser(String),

    #[error("設定エラー: {0}")]
    Config(String),
}

pub type Result<T, E = ConnectorError> = std::result::Result<T, E>;

impl ConnectorError {
    /// 再送してよいのは接続レベルの失敗のみ
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            attempts: 1,
            message: message.into(),
        }
    }
}

/// 条件が成り立たなければ [`ConnectorError::SiteAssertion`] を返す
#[macro_export]
macro_rules! site_ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::ConnectorError::SiteAssertion(format!($($arg)+)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(value: usize) -> Result<usize> {
        site_ensure!(value < 15, "pagination needed: {} contracts", value);
        Ok(value)
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ConnectorError::transient("reset").is_retryable());
        assert!(!ConnectorError::InvalidCredentials("bad".into()).is_retryable());
        assert!(!ConnectorError::UpstreamUnavailable {
            status: 500,
            url: "https://x/".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_site_ensure() {
        assert_eq!(check(3).unwrap(), 3);
        let err = check(15).unwrap_err();
        assert!(matches!(err, ConnectorError::SiteAssertion(ref m) if m.contains("15 contracts")));
    }
}
