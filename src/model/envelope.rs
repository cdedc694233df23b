//! 变更信封：中间件链 + 批处理 / 原子事务状态
//!
//! 每次 `set_state` / `set_item` 都包装为 [`Mutation`]，依注册顺序穿过中间件，
//! 最内层是真正的提交。

use std::rc::Rc;

use serde_json::Value;

use crate::model::data_core::StoreError;
use crate::model::path::Path;
use crate::model::watcher::WatcherId;

/// 一次外部写入
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetState(Value),
    SetItem { path: Path, value: Value },
}

impl Mutation {
    /// devtools 中使用的动作名
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::SetState(_) => "setState",
            Mutation::SetItem { .. } => "setItem",
        }
    }
}

/// 中间件的后续调用。
///
/// 可以立即调用、改写参数后调用、保存起来稍后调用，或者不调用（短路）。
pub struct Next {
    run: Box<dyn FnOnce(Mutation) -> Result<(), StoreError>>,
}

impl Next {
    pub(crate) fn new<F>(run: F) -> Self
    where
        F: FnOnce(Mutation) -> Result<(), StoreError> + 'static,
    {
        Self { run: Box::new(run) }
    }

    pub fn call(self, mutation: Mutation) -> Result<(), StoreError> {
        (self.run)(mutation)
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Next")
    }
}

/// 中间件：(当前状态快照, next, 本次写入)
pub type Middleware = Rc<dyn Fn(&Value, Next, Mutation) -> Result<(), StoreError>>;

/// 把闭包包装为 [`Middleware`]
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(&Value, Next, Mutation) -> Result<(), StoreError> + 'static,
{
    Rc::new(f)
}

/// 从最后注册的中间件向前折叠，得到的调用链按注册顺序执行，最内层为 `terminal`。
///
/// `snapshot` 在每个中间件运行前取一次当前状态副本；返回 None 表示 store 已释放。
pub(crate) fn compose<S>(middlewares: &[Middleware], snapshot: S, terminal: Next) -> Next
where
    S: Fn() -> Option<Value> + Clone + 'static,
{
    middlewares.iter().rev().fold(terminal, |next, mw| {
        let mw = mw.clone();
        let snapshot = snapshot.clone();
        Next::new(move |mutation| {
            let state = snapshot().ok_or(StoreError::Uninitialized)?;
            (*mw)(&state, next, mutation)
        })
    })
}

/// 批处理期间被推迟的一次通知
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub(crate) id: WatcherId,
    /// 只有整树替换牵连到该注册时才按相等性过滤
    pub(crate) gated: bool,
}

/// 事务状态：嵌套深度、最外层批处理开始时的状态树与待发送通知
#[derive(Debug, Default)]
pub(crate) struct Transaction {
    batch_depth: usize,
    atomic_depth: usize,
    base: Option<Value>,
    pending: Vec<Pending>,
}

impl Transaction {
    pub(crate) fn is_atomic(&self) -> bool {
        self.atomic_depth > 0
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// 进入一层批处理；最外层进入时保存当前状态树，作为通知中旧值的来源
    pub(crate) fn enter_batch(&mut self, tree: &Value) {
        if self.batch_depth == 0 {
            self.base = Some(tree.clone());
        }
        self.batch_depth += 1;
    }

    /// 退出一层批处理。
    ///
    /// 回到最外层时取出批处理前的状态树与全部待发送通知（按注册顺序）。
    pub(crate) fn exit_batch(&mut self) -> Option<(Value, Vec<Pending>)> {
        if self.batch_depth == 0 {
            return None;
        }
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return None;
        }
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|p| p.id);
        let base = self.base.take()?;
        Some((base, pending))
    }

    pub(crate) fn enter_atomic(&mut self) {
        self.atomic_depth += 1;
    }

    pub(crate) fn exit_atomic(&mut self) {
        self.atomic_depth = self.atomic_depth.saturating_sub(1);
    }

    /// 记录一次被推迟的通知，同一注册只保留一条
    pub(crate) fn defer(&mut self, id: WatcherId, gated: bool) {
        match self.pending.iter_mut().find(|p| p.id == id) {
            Some(existing) => existing.gated &= gated,
            None => self.pending.push(Pending { id, gated }),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.batch_depth = 0;
        self.atomic_depth = 0;
        self.base = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::watcher::{callback, WatcherRegistry};
    use serde_json::json;
    use std::cell::RefCell;

    #[test]
    fn test_compose_runs_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mws: Vec<Middleware> = (1..=3)
            .map(|n| {
                let order = order.clone();
                middleware(move |_, next, m| {
                    order.borrow_mut().push(n);
                    next.call(m)
                })
            })
            .collect();
        let committed = Rc::new(RefCell::new(None));
        let sink = committed.clone();
        let terminal = Next::new(move |m| {
            *sink.borrow_mut() = Some(m);
            Ok(())
        });

        let chain = compose(&mws, || Some(json!({})), terminal);
        chain.call(Mutation::SetState(json!({ "a": 1 }))).unwrap();

        assert_eq!(*order.borrow(), vec![1, 2, 3]);
        assert_eq!(*committed.borrow(), Some(Mutation::SetState(json!({ "a": 1 }))));
    }

    #[test]
    fn test_compose_short_circuit() {
        let blocked = middleware(|_, _next, _m| Ok(()));
        let reached = Rc::new(RefCell::new(false));
        let flag = reached.clone();
        let terminal = Next::new(move |_| {
            *flag.borrow_mut() = true;
            Ok(())
        });
        compose(&[blocked], || Some(json!({})), terminal)
            .call(Mutation::SetState(json!(1)))
            .unwrap();
        assert!(!*reached.borrow());
    }

    #[test]
    fn test_compose_without_state_is_uninitialized() {
        let passthrough = middleware(|_, next, m| next.call(m));
        let terminal = Next::new(|_| Ok(()));
        let result = compose(&[passthrough], || None, terminal).call(Mutation::SetState(json!(1)));
        assert!(matches!(result, Err(StoreError::Uninitialized)));
    }

    #[test]
    fn test_transaction_defer_dedupes_and_keeps_base() {
        let registry = WatcherRegistry::default();
        let a = registry.register(Path::parse("a"), callback(|_, _| {}));
        let b = registry.register(Path::parse("b"), callback(|_, _| {}));

        let mut tx = Transaction::default();
        tx.enter_batch(&json!({ "a": 1, "b": 2 }));
        tx.enter_batch(&json!({ "a": 5, "b": 2 }));
        tx.defer(b.id, true);
        tx.defer(a.id, true);
        tx.defer(a.id, false);
        assert!(tx.exit_batch().is_none());

        let (base, pending) = tx.exit_batch().unwrap();
        assert_eq!(base, json!({ "a": 1, "b": 2 }));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, a.id);
        assert!(!pending[0].gated);
        assert!(pending[1].gated);
        assert!(!tx.is_batching());
    }

    #[test]
    fn test_transaction_clear() {
        let mut tx = Transaction::default();
        tx.enter_atomic();
        tx.enter_batch(&json!({}));
        assert!(tx.is_atomic());
        tx.clear();
        assert!(!tx.is_atomic());
        assert!(!tx.is_batching());
        assert!(tx.exit_batch().is_none());
    }
}
