//! VM桥接层：把 store 中的某一路径绑定为可读写、可订阅的视图值
//!
//! 任何界面层（或命令行）都只通过 `get_item` / `set_item` / `watch_with` 与 store 交互。

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::data_core::{Store, StoreError};
use crate::model::path::{IntoPath, Path};
use crate::model::watcher::{Unwatch, WatchOptions};

// === 常量定义（消除魔法值） ===
pub const STATUS_READY: &str = "就绪";
pub const STATUS_LOADED: &str = "状态加载完成";
pub const STATUS_SAVED: &str = "状态已保存";
pub const STATUS_ERROR_PREFIX: &str = "错误: ";

/// 绑定到单一路径的句柄
#[derive(Clone, Debug)]
pub struct PathBinding {
    store: Store,
    path: Path,
}

impl PathBinding {
    pub fn new(store: &Store, path: impl IntoPath) -> Result<Self, StoreError> {
        Ok(Self {
            store: store.clone(),
            path: path.into_path()?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Option<Value> {
        self.store.get_item(&self.path).ok().flatten()
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        self.store.get_as(&self.path)
    }

    pub fn set(&self, value: Value) -> Result<(), StoreError> {
        self.store.set_item(&self.path, value)
    }

    /// 以当前值计算新值并写回
    pub fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let next = f(self.get());
        self.set(next)
    }

    /// 立即以当前值调用一次，之后每次变化时以新值调用
    pub fn subscribe<F>(&self, f: F) -> Result<Unwatch, StoreError>
    where
        F: Fn(Option<Value>) + 'static,
    {
        self.store
            .watch_with(&self.path, move |new, _old| f(new), WatchOptions { set: true })
    }
}
