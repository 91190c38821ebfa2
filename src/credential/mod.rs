//! 上游凭证池：启动时从配置加载，管理接口可覆写或清空，但从不删除。

pub mod store;
pub mod types;

pub use store::Store;
pub use types::Credential;
