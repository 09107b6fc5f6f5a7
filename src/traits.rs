use async_trait::async_trait;

use crate::config::Credentials;
use crate::error::Result;
use crate::session::Session;

/// サイト固有のログイン手順 ([`Session`] に注入する)
#[async_trait]
pub trait LoginFlow<K>: Send + Sync {
    /// ログインページを巡る。サイトが拒否すれば `InvalidCredentials`
    /// または `ActionRequired` を返す
    async fn login(&self, session: &mut Session<K>, credentials: &Credentials) -> Result<()>;

    /// `kind` に着地したらログアウトされたとみなすか
    fn is_login_page(&self, kind: K) -> bool;

    async fn logout(&self, _session: &mut Session<K>) -> Result<()> {
        Ok(())
    }
}

/// 匿名で閲覧するサイト用
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLogin;

#[async_trait]
impl<K: Send + 'static> LoginFlow<K> for NoLogin {
    async fn login(&self, _session: &mut Session<K>, _credentials: &Credentials) -> Result<()> {
        Ok(())
    }

    fn is_login_page(&self, _kind: K) -> bool {
        false
    }
}

/// 全コネクタ共通のライフサイクル (必要時にログインし、終了は一度だけ)
#[async_trait]
pub trait Connector: Send {
    fn name(&self) -> &'static str;

    async fn ensure_authenticated(&mut self) -> Result<()>;

    /// 必要ならログアウトし、トランスポートを解放する。二度呼んでもよい
    async fn teardown(&mut self) -> Result<()>;
}

/// `session` フィールドを持つ構造体に [`Connector`] を実装する
macro_rules! impl_connector {
    ($ty:ty, $name:expr) => {
        #[async_trait::async_trait]
        impl $crate::traits::Connector for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            async fn ensure_authenticated(&mut self) -> $crate::error::Result<()> {
                self.session.ensure_authenticated().await
            }

            async fn teardown(&mut self) -> $crate::error::Result<()> {
                self.session.teardown().await
            }
        }
    };
}

pub(crate) use impl_connector;
