//! 监听注册表：有序保存 (路径, 回调)，计算一次写入牵连到哪些注册，并隔离回调故障

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::model::path::Path;
use crate::model::tree::kind_of;

/// 监听回调，参数为 (新值, 旧值)；None 表示路径当前不存在
pub type WatchCallback = Rc<dyn Fn(Option<Value>, Option<Value>)>;

/// 把闭包包装为 [`WatchCallback`]，用于 `watch_all` 的映射形式
pub fn callback<F>(f: F) -> WatchCallback
where
    F: Fn(Option<Value>, Option<Value>) + 'static,
{
    Rc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

/// 注册选项
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// 注册时立即以 (当前值, None) 调用一次回调
    pub set: bool,
}

pub(crate) struct Registration {
    pub(crate) id: WatcherId,
    pub(crate) key: String,
    pub(crate) path: Path,
    callback: WatchCallback,
    active: Cell<bool>,
}

impl Registration {
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    /// 调用回调；回调 panic 时记录错误并返回 false，不影响注册表和状态树
    pub(crate) fn deliver(&self, new: Option<Value>, old: Option<Value>) -> bool {
        if !self.is_active() {
            return true;
        }
        if let (Some(n), Some(o)) = (&new, &old) {
            let (nk, ok) = (kind_of(n), kind_of(o));
            if nk != ok {
                tracing::warn!("类型变化: {} 从 {:?} 变为 {:?}", self.path, ok, nk);
            }
        }
        let callback = self.callback.clone();
        match catch_unwind(AssertUnwindSafe(move || (*callback)(new, old))) {
            Ok(()) => true,
            Err(_) => {
                tracing::error!("监听回调发生 panic，已跳过: {}", self.path);
                false
            }
        }
    }
}

#[derive(Default)]
pub struct WatcherRegistry {
    next_id: Cell<u64>,
    entries: RefCell<Vec<Rc<Registration>>>,
}

impl WatcherRegistry {
    pub(crate) fn register(&self, path: Path, callback: WatchCallback) -> Rc<Registration> {
        let id = WatcherId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let registration = Rc::new(Registration {
            id,
            key: path.canonical(),
            path,
            callback,
            active: Cell::new(true),
        });
        self.entries.borrow_mut().push(registration.clone());
        tracing::debug!("注册监听: {} ({:?})", registration.key, id);
        registration
    }

    /// 移除指定注册；已移除时返回 false
    pub(crate) fn unregister(&self, id: WatcherId) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|r| r.id == id) {
            Some(pos) => {
                let removed = entries.remove(pos);
                removed.active.set(false);
                tracing::debug!("移除监听: {} ({:?})", removed.key, id);
                true
            }
            None => false,
        }
    }

    /// 被写入路径牵连的注册：监听路径的规范标识以写入路径的规范标识开头。
    /// 返回快照，回调期间注册表可以被自由修改。
    pub(crate) fn implicated(&self, written: &Path) -> Vec<Rc<Registration>> {
        let prefix = written.canonical();
        self.entries
            .borrow()
            .iter()
            .filter(|r| r.key.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<Rc<Registration>> {
        self.entries.borrow().clone()
    }

    pub(crate) fn get(&self, id: WatcherId) -> Option<Rc<Registration>> {
        self.entries.borrow().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// 注销句柄。只有显式调用 [`Unwatch::unwatch`] 才会移除注册，丢弃句柄不会。
#[derive(Clone)]
pub struct Unwatch {
    registry: Weak<WatcherRegistry>,
    ids: Vec<WatcherId>,
}

impl Unwatch {
    pub(crate) fn new(registry: &Rc<WatcherRegistry>, ids: Vec<WatcherId>) -> Self {
        Self {
            registry: Rc::downgrade(registry),
            ids,
        }
    }

    /// 移除该句柄对应的全部注册；重复调用、或 store 已释放时为空操作
    pub fn unwatch(&self) {
        if let Some(registry) = self.registry.upgrade() {
            for id in &self.ids {
                registry.unregister(*id);
            }
        }
    }

    pub fn ids(&self) -> &[WatcherId] {
        &self.ids
    }
}

impl std::fmt::Debug for Unwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unwatch").field("ids", &self.ids).finish()
    }
}
