//! 持久化：把状态树（或其中若干路径）保存到插件，并在需要时加载回 store
//!
//! 插件依次尝试：保存时全部执行，失败记录日志后汇总为一个错误；
//! 加载时取第一个返回数据的插件。自动保存通过监听实现，并按 `throttle` 节流。

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::model::data_core::{Store, StoreError, WeakStore};
use crate::model::path::{Path, Seg};
use crate::model::tree;
use crate::model::watcher::Unwatch;
use crate::utils::fs::{read_json_file, remove_json_file, write_json_file};

pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(1000);

pub trait PersistencePlugin {
    fn name(&self) -> &str;
    /// 没有已保存的数据时返回 `Ok(None)`
    fn load(&self) -> Result<Option<Value>, StoreError>;
    fn save(&self, state: &Value) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// JSON 文件插件
#[derive(Debug, Clone)]
pub struct FilePlugin {
    path: PathBuf,
}

impl FilePlugin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl PersistencePlugin for FilePlugin {
    fn name(&self) -> &str {
        "file"
    }

    fn load(&self) -> Result<Option<Value>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        read_json_file(&self.path).map(Some)
    }

    fn save(&self, state: &Value) -> Result<(), StoreError> {
        write_json_file(&self.path, state)
    }

    fn clear(&self) -> Result<(), StoreError> {
        remove_json_file(&self.path)
    }
}

/// 进程内插件。克隆共享同一个存储槽。
#[derive(Debug, Clone, Default)]
pub struct MemoryPlugin {
    slot: Rc<RefCell<Option<Value>>>,
}

impl MemoryPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<Value> {
        self.slot.borrow().clone()
    }
}

impl PersistencePlugin for MemoryPlugin {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self) -> Result<Option<Value>, StoreError> {
        Ok(self.contents())
    }

    fn save(&self, state: &Value) -> Result<(), StoreError> {
        *self.slot.borrow_mut() = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.slot.borrow_mut().take();
        Ok(())
    }
}

type LoadFn = Box<dyn Fn() -> Result<Option<Value>, StoreError>>;
type SaveFn = Box<dyn Fn(&Value) -> Result<(), StoreError>>;
type ClearFn = Box<dyn Fn() -> Result<(), StoreError>>;

/// 由闭包组成的插件，见 [`create_custom_plugin`]
pub struct CustomPlugin {
    name: String,
    load: LoadFn,
    save: SaveFn,
    clear: Option<ClearFn>,
}

impl CustomPlugin {
    pub fn with_clear<C>(mut self, clear: C) -> Self
    where
        C: Fn() -> Result<(), StoreError> + 'static,
    {
        self.clear = Some(Box::new(clear));
        self
    }
}

impl PersistencePlugin for CustomPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Option<Value>, StoreError> {
        (self.load)()
    }

    fn save(&self, state: &Value) -> Result<(), StoreError> {
        (self.save)(state)
    }

    fn clear(&self) -> Result<(), StoreError> {
        match &self.clear {
            Some(clear) => clear(),
            None => Ok(()),
        }
    }
}

pub fn create_custom_plugin<L, S>(name: impl Into<String>, load: L, save: S) -> CustomPlugin
where
    L: Fn() -> Result<Option<Value>, StoreError> + 'static,
    S: Fn(&Value) -> Result<(), StoreError> + 'static,
{
    CustomPlugin {
        name: name.into(),
        load: Box::new(load),
        save: Box::new(save),
        clear: None,
    }
}

pub struct PersistenceOptions {
    pub plugins: Vec<Box<dyn PersistencePlugin>>,
    /// 为空时持久化整棵树
    pub paths: Vec<String>,
    pub throttle: Duration,
    pub auto_save: bool,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            paths: Vec::new(),
            throttle: DEFAULT_THROTTLE,
            auto_save: true,
        }
    }
}

impl PersistenceOptions {
    pub fn plugin(mut self, plugin: impl PersistencePlugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }
}

struct Shared {
    store: WeakStore,
    plugins: Vec<Box<dyn PersistencePlugin>>,
    paths: Vec<Path>,
    throttle: Duration,
    last_save: Cell<Option<Instant>>,
    pending: Cell<bool>,
    loading: Cell<bool>,
}

impl Shared {
    fn on_change(&self) {
        if self.loading.get() {
            return;
        }
        let due = self
            .last_save
            .get()
            .map_or(true, |at| at.elapsed() >= self.throttle);
        if !due {
            self.pending.set(true);
            return;
        }
        if let Err(e) = self.save() {
            tracing::warn!("自动保存失败: {}", e);
        }
    }

    fn collect(&self, store: &Store) -> Value {
        if self.paths.is_empty() {
            return store.get_state();
        }
        let mut data = json!({});
        for path in &self.paths {
            if let Ok(Some(value)) = store.get_item(path) {
                insert_nested(&mut data, path.segments(), value);
            }
        }
        data
    }

    fn save(&self) -> Result<(), StoreError> {
        let store = self.store.upgrade()?;
        let data = self.collect(&store);
        self.pending.set(false);
        self.last_save.set(Some(Instant::now()));

        let failures: Vec<String> = self
            .plugins
            .iter()
            .filter_map(|plugin| match plugin.save(&data) {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!("插件 {} 保存失败: {}", plugin.name(), e);
                    Some(format!("{}: {}", plugin.name(), e))
                }
            })
            .collect();
        aggregate(failures)
    }

    fn load(&self) -> Result<bool, StoreError> {
        let store = self.store.upgrade()?;
        for plugin in &self.plugins {
            let data = match plugin.load() {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("插件 {} 加载失败: {}", plugin.name(), e);
                    continue;
                }
            };
            tracing::info!("从插件 {} 加载状态", plugin.name());
            self.loading.set(true);
            let applied = self.apply(&store, data);
            self.loading.set(false);
            applied?;
            return Ok(true);
        }
        Ok(false)
    }

    fn apply(&self, store: &Store, data: Value) -> Result<(), StoreError> {
        if self.paths.is_empty() {
            return store.set_state(data);
        }
        for path in &self.paths {
            if let Some(value) = tree::read(&data, path.segments()) {
                store.set_item(path, value.clone())?;
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let failures: Vec<String> = self
            .plugins
            .iter()
            .filter_map(|plugin| match plugin.clear() {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!("插件 {} 清除失败: {}", plugin.name(), e);
                    Some(format!("{}: {}", plugin.name(), e))
                }
            })
            .collect();
        aggregate(failures)
    }
}

fn aggregate(failures: Vec<String>) -> Result<(), StoreError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Persistence(failures.join("; ")))
    }
}

/// 按段写入，沿途缺失或非对象的节点替换为空对象；下标段作为十进制键
fn insert_nested(target: &mut Value, segments: &[Seg], value: Value) {
    let mut node = target;
    for seg in segments {
        if !node.is_object() {
            *node = json!({});
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map.entry(seg.to_string()).or_insert(Value::Null);
    }
    *node = value;
}

/// 挂接在某个 store 上的持久化句柄
pub struct Persistence {
    shared: Rc<Shared>,
    unwatchers: Vec<Unwatch>,
}

impl Persistence {
    pub fn attach(store: &Store, options: PersistenceOptions) -> Result<Self, StoreError> {
        if options.plugins.is_empty() {
            tracing::warn!("持久化未配置任何插件");
        }
        let shared = Rc::new(Shared {
            store: store.downgrade(),
            plugins: options.plugins,
            paths: options.paths.iter().map(|p| Path::parse(p)).collect(),
            throttle: options.throttle,
            last_save: Cell::new(None),
            pending: Cell::new(false),
            loading: Cell::new(false),
        });

        let mut unwatchers = Vec::new();
        if options.auto_save {
            let targets: Vec<Path> = if shared.paths.is_empty() {
                match store.get_state() {
                    Value::Object(map) => {
                        map.keys().map(|k| Path::root().key(k.as_str())).collect()
                    }
                    _ => {
                        tracing::warn!("根节点不是对象，无法自动保存");
                        Vec::new()
                    }
                }
            } else {
                shared.paths.clone()
            };
            for path in targets {
                let handle = shared.clone();
                unwatchers.push(store.watch(path, move |_, _| handle.on_change())?);
            }
        }

        Ok(Self { shared, unwatchers })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        self.shared.save()
    }

    /// 返回是否有插件提供了数据
    pub fn load(&self) -> Result<bool, StoreError> {
        self.shared.load()
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.shared.clear()
    }

    /// 执行被节流推迟的保存；没有待保存内容时返回 false
    pub fn flush(&self) -> Result<bool, StoreError> {
        if !self.shared.pending.get() {
            return Ok(false);
        }
        self.shared.save()?;
        Ok(true)
    }

    pub fn has_pending(&self) -> bool {
        self.shared.pending.get()
    }

    /// 移除自动保存监听并丢弃待保存内容
    pub fn destroy(&mut self) {
        for unwatch in self.unwatchers.drain(..) {
            unwatch.unwatch();
        }
        self.shared.pending.set(false);
    }
}
