//! Store：唯一的状态树及其读写、监听、事务、历史入口
//!
//! 对外返回的值都是独立副本，传入的值在写入前被接管，
//! 因此外部代码无法绕过 store 修改内部状态。

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::model::config::StoreConfig;
use crate::model::envelope::{compose, Middleware, Mutation, Next, Transaction};
use crate::model::history::{Action, History, Snapshot};
use crate::model::path::{IntoPath, Path};
use crate::model::tree::{self, clone_value};
use crate::model::watcher::{
    callback, Registration, Unwatch, WatchCallback, WatchOptions, WatcherId, WatcherRegistry,
};
use crate::vm::devtools::{DevtoolsAction, DevtoolsConnection};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON解析失败: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("无效路径: {0}")]
    InvalidPath(String),
    #[error("无效参数: {0}")]
    InvalidArgument(String),
    #[error("状态尚未初始化")]
    Uninitialized,
    #[error("持久化失败: {0}")]
    Persistence(String),
}

struct StateCore {
    tree: Value,
    baseline: Value,
    history: Option<History>,
    tx: Transaction,
    actions: Vec<Action>,
}

impl StateCore {
    fn record_history(&mut self) {
        if let Some(history) = &mut self.history {
            history.record(&self.tree);
        }
    }
}

struct StoreInner {
    core: RefCell<StateCore>,
    watchers: Rc<WatcherRegistry>,
    middlewares: Vec<Middleware>,
    devtools: Option<Rc<dyn DevtoolsConnection>>,
    config: StoreConfig,
}

/// 一次待投递的通知
struct Notice {
    registration: Rc<Registration>,
    new: Option<Value>,
    old: Option<Value>,
    /// 整树替换时只在值不同的情况下投递
    gated: bool,
}

/// 状态容器句柄。克隆只复制句柄，所有克隆共享同一棵树。
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

/// 不持有 store 的弱句柄；store 释放后升级失败
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Result<Store, StoreError> {
        self.inner
            .upgrade()
            .map(|inner| Store { inner })
            .ok_or(StoreError::Uninitialized)
    }
}

pub struct StoreBuilder {
    initial: Value,
    middlewares: Vec<Middleware>,
    devtools: Option<Rc<dyn DevtoolsConnection>>,
    config: StoreConfig,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self {
            initial: json!({}),
            middlewares: Vec::new(),
            devtools: None,
            config: StoreConfig::default(),
        }
    }
}

impl StoreBuilder {
    pub fn initial(mut self, initial: Value) -> Self {
        self.initial = initial;
        self
    }

    /// 追加中间件；执行顺序即注册顺序
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn middlewares(mut self, middlewares: impl IntoIterator<Item = Middleware>) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    pub fn devtools(mut self, devtools: Rc<dyn DevtoolsConnection>) -> Self {
        self.devtools = Some(devtools);
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Store {
        let history = self
            .config
            .record_history
            .then(|| History::new(&self.initial, self.config.history_limit));
        if let Some(devtools) = &self.devtools {
            devtools.init(&self.initial);
        }
        let core = StateCore {
            tree: clone_value(&self.initial),
            baseline: self.initial,
            history,
            tx: Transaction::default(),
            actions: Vec::new(),
        };
        Store {
            inner: Rc::new(StoreInner {
                core: RefCell::new(core),
                watchers: Rc::new(WatcherRegistry::default()),
                middlewares: self.middlewares,
                devtools: self.devtools,
                config: self.config,
            }),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::builder().build()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.borrow();
        f.debug_struct("Store")
            .field("state", &core.tree)
            .field("watchers", &self.inner.watchers.len())
            .field("middlewares", &self.inner.middlewares.len())
            .finish()
    }
}

impl Store {
    pub fn new(initial: Value) -> Self {
        Store::builder().initial(initial).build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // === 读取 ===

    /// 整棵树的深拷贝
    pub fn get_state(&self) -> Value {
        clone_value(&self.inner.core.borrow().tree)
    }

    /// 路径上的值的副本；路径不存在时返回 None
    pub fn get_item(&self, path: impl IntoPath) -> Result<Option<Value>, StoreError> {
        let path = path.into_path()?;
        Ok(self.read(&path))
    }

    /// 读取并反序列化为指定类型
    pub fn get_as<T: DeserializeOwned>(
        &self,
        path: impl IntoPath,
    ) -> Result<Option<T>, StoreError> {
        match self.get_item(path)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn read(&self, path: &Path) -> Option<Value> {
        let core = self.inner.core.borrow();
        tree::read(&core.tree, path.segments()).map(clone_value)
    }

    // === 写入（经过中间件） ===

    /// 替换整棵树
    pub fn set_state(&self, tree: Value) -> Result<(), StoreError> {
        self.run_envelope(Mutation::SetState(tree))
    }

    /// 写入路径；父级不存在时写入被忽略
    pub fn set_item(&self, path: impl IntoPath, value: Value) -> Result<(), StoreError> {
        let path = path.into_path()?;
        self.run_envelope(Mutation::SetItem { path, value })
    }

    pub fn set_as<T: Serialize>(&self, path: impl IntoPath, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.set_item(path, value)
    }

    fn run_envelope(&self, mutation: Mutation) -> Result<(), StoreError> {
        if self.inner.middlewares.is_empty() {
            self.commit(mutation);
            return Ok(());
        }
        let weak = self.downgrade();
        let terminal = {
            let weak = weak.clone();
            Next::new(move |m| {
                weak.upgrade()?.commit(m);
                Ok(())
            })
        };
        let snapshot = move || weak.upgrade().ok().map(|store| store.get_state());
        compose(&self.inner.middlewares, snapshot, terminal).call(mutation)
    }

    fn commit(&self, mutation: Mutation) {
        tracing::debug!("提交 {}", mutation.name());
        match mutation {
            Mutation::SetState(tree) => self.commit_state(tree),
            Mutation::SetItem { path, value } => self.commit_item(path, value),
        }
    }

    fn commit_state(&self, tree: Value) {
        let action = self.inner.config.record_actions.then(|| Action::SetState(tree.clone()));
        let notices = self.replace_tree(tree, true);
        if let Some(action) = action {
            self.inner.core.borrow_mut().actions.push(action);
        }
        self.send_devtools("setState", None);
        self.dispatch(notices);
    }

    fn commit_item(&self, path: Path, value: Value) {
        let implicated = self.inner.watchers.implicated(&path);
        let notices = {
            let mut guard = self.inner.core.borrow_mut();
            let core = &mut *guard;

            let missing = tree::read(&core.tree, path.segments()).is_none();
            if missing && self.inner.config.warn_on_missing {
                tracing::warn!("尝试设置不存在的路径: {}", path);
            }

            let olds: Vec<Option<Value>> = implicated
                .iter()
                .map(|r| tree::read(&core.tree, r.path.segments()).map(clone_value))
                .collect();
            let action = self
                .inner
                .config
                .record_actions
                .then(|| Action::SetItem {
                    key: path.to_value(),
                    value: value.clone(),
                });
            let payload = json!({ "key": path.to_string(), "value": value.clone() });

            if !tree::write(&mut core.tree, path.segments(), value) {
                tracing::warn!("父级路径不存在，写入已忽略: {}", path);
                return;
            }
            core.record_history();
            if let Some(action) = action {
                core.actions.push(action);
            }

            let notices: Vec<Notice> = implicated
                .into_iter()
                .zip(olds)
                .map(|(registration, old)| Notice {
                    new: tree::read(&core.tree, registration.path.segments()).map(clone_value),
                    old,
                    registration,
                    gated: false,
                })
                .collect();
            drop(guard);
            self.send_devtools("setItem", Some(payload));
            notices
        };
        self.dispatch(notices);
    }

    /// 替换整棵树并为所有注册生成按相等性过滤的通知
    fn replace_tree(&self, next: Value, record: bool) -> Vec<Notice> {
        let registrations = self.inner.watchers.snapshot();
        let mut core = self.inner.core.borrow_mut();
        let previous = std::mem::replace(&mut core.tree, next);
        if record {
            core.record_history();
        }
        registrations
            .into_iter()
            .map(|registration| Notice {
                old: tree::read(&previous, registration.path.segments()).map(clone_value),
                new: tree::read(&core.tree, registration.path.segments()).map(clone_value),
                registration,
                gated: true,
            })
            .collect()
    }

    fn send_devtools(&self, name: &str, payload: Option<Value>) {
        if let Some(devtools) = &self.inner.devtools {
            let state = self.get_state();
            devtools.send(&DevtoolsAction::new(name, payload), &state);
        }
    }

    // === 监听分发 ===

    fn dispatch(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        {
            let mut core = self.inner.core.borrow_mut();
            if core.tx.is_atomic() {
                tracing::debug!("原子事务中，丢弃 {} 条通知", notices.len());
                return;
            }
            if core.tx.is_batching() {
                for notice in notices {
                    core.tx.defer(notice.registration.id, notice.gated);
                }
                return;
            }
        }
        for notice in notices {
            if notice.gated && notice.new == notice.old {
                continue;
            }
            notice.registration.deliver(notice.new, notice.old);
        }
    }

    /// 监听路径；回调参数为 (新值, 旧值)
    pub fn watch<F>(&self, path: impl IntoPath, f: F) -> Result<Unwatch, StoreError>
    where
        F: Fn(Option<Value>, Option<Value>) + 'static,
    {
        self.watch_with(path, f, WatchOptions::default())
    }

    pub fn watch_with<F>(
        &self,
        path: impl IntoPath,
        f: F,
        options: WatchOptions,
    ) -> Result<Unwatch, StoreError>
    where
        F: Fn(Option<Value>, Option<Value>) + 'static,
    {
        let path = path.into_path()?;
        let id = self.register(path, callback(f), options);
        Ok(Unwatch::new(&self.inner.watchers, vec![id]))
    }

    /// 映射形式：一次注册多个 (路径, 回调)，返回覆盖全部注册的注销句柄
    pub fn watch_all<P, I>(&self, entries: I, options: WatchOptions) -> Result<Unwatch, StoreError>
    where
        P: IntoPath,
        I: IntoIterator<Item = (P, WatchCallback)>,
    {
        let entries = entries
            .into_iter()
            .map(|(path, cb)| Ok((path.into_path()?, cb)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        if entries.is_empty() {
            return Err(StoreError::InvalidArgument("watch 映射不能为空".into()));
        }
        let ids = entries
            .into_iter()
            .map(|(path, cb)| self.register(path, cb, options))
            .collect();
        Ok(Unwatch::new(&self.inner.watchers, ids))
    }

    fn register(&self, path: Path, cb: WatchCallback, options: WatchOptions) -> WatcherId {
        let current = self.read(&path);
        if current.is_none() && self.inner.config.warn_on_missing {
            tracing::warn!("尝试监听不存在的路径: {}", path);
        }
        let registration = self.inner.watchers.register(path, cb);
        if options.set {
            registration.deliver(current, None);
        }
        registration.id
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    // === 事务 ===

    /// 批处理：同一注册在结束时只收到一次通知，旧值为批处理开始前的值
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut guard = self.inner.core.borrow_mut();
            let core = &mut *guard;
            core.tx.enter_batch(&core.tree);
        }
        let _guard = BatchGuard { store: self };
        f()
    }

    /// 原子事务：其中的写入不触发任何通知
    pub fn atomic<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.core.borrow_mut().tx.enter_atomic();
        let _guard = AtomicGuard { store: self };
        f()
    }

    fn finish_batch(&self) {
        let flushed = self.inner.core.borrow_mut().tx.exit_batch();
        let Some((base, pending)) = flushed else {
            return;
        };
        if std::thread::panicking() {
            return;
        }
        for p in pending {
            let Some(registration) = self.inner.watchers.get(p.id) else {
                continue;
            };
            let old = tree::read(&base, registration.path.segments()).map(clone_value);
            let new = self.read(&registration.path);
            if p.gated && new == old {
                continue;
            }
            registration.deliver(new, old);
        }
    }

    // === 重置 / 历史 / 快照 / 回放 ===

    /// 恢复构造时的初始树，清空事务状态，并对所有监听做相等性过滤的分发
    pub fn reset(&self) {
        let baseline = {
            let mut core = self.inner.core.borrow_mut();
            core.tx.clear();
            clone_value(&core.baseline)
        };
        let notices = self.replace_tree(baseline, true);
        if self.inner.config.record_actions {
            self.inner.core.borrow_mut().actions.push(Action::Reset);
        }
        self.dispatch(notices);
    }

    /// 撤销一步，返回恢复后的树；已在起点时返回 None。不经过中间件。
    pub fn undo(&self) -> Option<Value> {
        let restored = self.inner.core.borrow_mut().history.as_mut()?.undo()?;
        let notices = self.replace_tree(clone_value(&restored), false);
        self.dispatch(notices);
        Some(restored)
    }

    /// 重做一步；已在末尾时返回 None
    pub fn redo(&self) -> Option<Value> {
        let restored = self.inner.core.borrow_mut().history.as_mut()?.redo()?;
        let notices = self.replace_tree(clone_value(&restored), false);
        self.dispatch(notices);
        Some(restored)
    }

    pub fn can_undo(&self) -> bool {
        self.inner.core.borrow().history.as_ref().is_some_and(History::can_undo)
    }

    pub fn can_redo(&self) -> bool {
        self.inner.core.borrow().history.as_ref().is_some_and(History::can_redo)
    }

    pub fn history_len(&self) -> usize {
        self.inner.core.borrow().history.as_ref().map_or(0, History::len)
    }

    pub fn create_snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.inner.core.borrow().tree)
    }

    /// 恢复快照；不写入撤销历史
    pub fn restore_snapshot(&self, snapshot: &Snapshot) {
        let notices = self.replace_tree(clone_value(snapshot.tree()), false);
        self.dispatch(notices);
    }

    /// 回放一个动作，效果与直接调用对应方法相同（包括中间件）
    pub fn replay_action(&self, action: &Action) -> Result<(), StoreError> {
        tracing::debug!("回放动作: {:?}", action);
        match action {
            Action::SetItem { key, value } => self.set_item(key, value.clone()),
            Action::SetState(tree) => self.set_state(tree.clone()),
            Action::Reset => {
                self.reset();
                Ok(())
            }
        }
    }

    pub fn replay_actions<'a>(
        &self,
        actions: impl IntoIterator<Item = &'a Action>,
    ) -> Result<(), StoreError> {
        for action in actions {
            self.replay_action(action)?;
        }
        Ok(())
    }

    /// 已记录的动作日志（需开启 `record_actions`）
    pub fn actions(&self) -> Vec<Action> {
        self.inner.core.borrow().actions.clone()
    }
}

struct BatchGuard<'a> {
    store: &'a Store,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.store.finish_batch();
    }
}

struct AtomicGuard<'a> {
    store: &'a Store,
}

impl Drop for AtomicGuard<'_> {
    fn drop(&mut self) {
        self.store.inner.core.borrow_mut().tx.exit_atomic();
    }
}
