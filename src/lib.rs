//! 可按路径寻址、可监听的 JSON 状态容器
//!
//! 单一状态树，按路径读写，写入时通知监听该路径及其子路径的回调；
//! 支持中间件、批处理 / 原子事务、撤销重做、快照、动作回放与持久化。

pub mod model {
    pub mod config;
    pub mod data_core;
    pub mod envelope;
    pub mod history;
    pub mod path;
    pub mod performance;
    pub mod tree;
    pub mod watcher;
}

pub mod utils {
    pub mod fs;
    pub mod persistence;
}

pub mod vm {
    pub mod bridge;
    pub mod devtools;
}

// 重新导出主要类型
pub use model::config::StoreConfig;
pub use model::data_core::{Store, StoreBuilder, StoreError, WeakStore};
pub use model::envelope::{middleware, Middleware, Mutation, Next};
pub use model::history::{Action, Snapshot};
pub use model::path::{IntoPath, Path, Seg};
pub use model::watcher::{callback, Unwatch, WatchCallback, WatchOptions, WatcherId};
pub use utils::persistence::{
    create_custom_plugin, CustomPlugin, FilePlugin, MemoryPlugin, Persistence, PersistenceOptions,
    PersistencePlugin,
};
pub use vm::bridge::PathBinding;
pub use vm::devtools::{
    apply_devtools_message, DevtoolsAction, DevtoolsConnection, DevtoolsMessage, TracingDevtools,
};
