//! 历史记录（线性撤销栈 + 游标）、快照与动作回放词汇

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::tree::clone_value;

/// 线性撤销栈：只追加的不可变副本序列，加一个当前位置游标。
/// 在游标之后记录会先截断“未来”条目。
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<Value>,
    cursor: usize,
    limit: Option<usize>,
}

impl History {
    pub fn new(initial: &Value, limit: Option<usize>) -> Self {
        Self {
            entries: vec![clone_value(initial)],
            cursor: 0,
            // 至少保留当前条目
            limit: limit.map(|l| l.max(1)),
        }
    }

    pub fn record(&mut self, state: &Value) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(clone_value(state));
        self.cursor = self.entries.len() - 1;

        if let Some(limit) = self.limit {
            if self.entries.len() > limit {
                let overflow = self.entries.len() - limit;
                self.entries.drain(..overflow);
                self.cursor -= overflow;
            }
        }
    }

    /// 后退一步并返回该条目的副本；已在起点时返回 None
    pub fn undo(&mut self) -> Option<Value> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(clone_value(&self.entries[self.cursor]))
    }

    /// 前进一步；已在末尾时返回 None
    pub fn redo(&mut self) -> Option<Value> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        Some(clone_value(&self.entries[self.cursor]))
    }

    pub fn current(&self) -> Option<Value> {
        self.entries.get(self.cursor).map(clone_value)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// 某一时刻状态树的独立副本，与撤销栈无关
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    tree: Value,
}

impl Snapshot {
    pub(crate) fn capture(tree: &Value) -> Self {
        Self {
            tree: clone_value(tree),
        }
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }
}

/// 可回放的动作。序列化形式为 `{"type": "SET_ITEM", "payload": {...}}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// 等同于 `set_item(key, value)`；key 可以是字符串、下标或段数组
    SetItem { key: Value, value: Value },
    SetState(Value),
    Reset,
}

impl Action {
    pub fn set_item(key: impl Into<Value>, value: Value) -> Self {
        Action::SetItem {
            key: key.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_undo_redo_walk() {
        let mut history = History::new(&json!({ "x": 0 }), None);
        history.record(&json!({ "x": 1 }));
        history.record(&json!({ "x": 2 }));

        assert_eq!(history.undo(), Some(json!({ "x": 1 })));
        assert_eq!(history.undo(), Some(json!({ "x": 0 })));
        assert_eq!(history.undo(), None);
        assert_eq!(history.redo(), Some(json!({ "x": 1 })));
        assert_eq!(history.redo(), Some(json!({ "x": 2 })));
        assert_eq!(history.redo(), None);
    }

    #[test]
    fn test_record_after_undo_truncates_future() {
        let mut history = History::new(&json!(0), None);
        history.record(&json!(1));
        history.record(&json!(2));
        history.undo();
        history.record(&json!(3));

        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);
        assert_eq!(history.current(), Some(json!(3)));
        assert_eq!(history.undo(), Some(json!(1)));
    }

    #[test]
    fn test_history_limit_drops_oldest() {
        let mut history = History::new(&json!(0), Some(2));
        history.record(&json!(1));
        history.record(&json!(2));
        assert_eq!(history.len(), 2);
        assert_eq!(history.cursor(), 1);
        assert_eq!(history.undo(), Some(json!(1)));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_entries_are_independent_copies() {
        let mut state = json!({ "a": [1] });
        let mut history = History::new(&state, None);
        state["a"][0] = json!(99);
        history.record(&state);
        assert_eq!(history.undo(), Some(json!({ "a": [1] })));
    }

    #[test]
    fn test_action_wire_format() {
        let action: Action = serde_json::from_value(json!({
            "type": "SET_ITEM",
            "payload": { "key": "x", "value": 10 }
        }))
        .unwrap();
        assert_eq!(action, Action::set_item("x", json!(10)));

        let reset: Action = serde_json::from_value(json!({ "type": "RESET" })).unwrap();
        assert_eq!(reset, Action::Reset);

        let encoded = serde_json::to_value(Action::SetState(json!({ "a": 1 }))).unwrap();
        assert_eq!(encoded, json!({ "type": "SET_STATE", "payload": { "a": 1 } }));

        let unknown = serde_json::from_value::<Action>(json!({ "type": "DELETE", "payload": {} }));
        assert!(unknown.is_err());
    }
}
