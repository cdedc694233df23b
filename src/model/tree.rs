//! 树访问器：按段序列对 JSON 值树做深读取 / 深写入
//!
//! 写入不会自动创建中间容器，父级不存在时直接放弃。

use serde_json::Value;

use crate::model::path::Seg;

/// JSON 节点类型（用于类型变化诊断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Object,
    Array,
    String,
    Number,
    Bool,
    Null,
}

pub fn kind_of(v: &Value) -> NodeKind {
    match v {
        Value::Object(_) => NodeKind::Object,
        Value::Array(_) => NodeKind::Array,
        Value::String(_) => NodeKind::String,
        Value::Number(_) => NodeKind::Number,
        Value::Bool(_) => NodeKind::Bool,
        Value::Null => NodeKind::Null,
    }
}

/// 是否为容器（对象或数组）
pub fn is_container(v: &Value) -> bool {
    matches!(v, Value::Object(_) | Value::Array(_))
}

fn child<'a>(node: &'a Value, seg: &Seg) -> Option<&'a Value> {
    match (node, seg) {
        (Value::Object(map), Seg::Key(k)) => map.get(k),
        // 对象上的下标按十进制键查找，与属性访问一致
        (Value::Object(map), Seg::Index(i)) => map.get(&i.to_string()),
        (Value::Array(arr), Seg::Index(i)) => arr.get(*i),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, seg: &Seg) -> Option<&'a mut Value> {
    match (node, seg) {
        (Value::Object(map), Seg::Key(k)) => map.get_mut(k),
        (Value::Object(map), Seg::Index(i)) => map.get_mut(&i.to_string()),
        (Value::Array(arr), Seg::Index(i)) => arr.get_mut(*i),
        _ => None,
    }
}

/// 逐段读取；任一中间段缺失或不是容器时返回 None
pub fn read<'a>(tree: &'a Value, segments: &[Seg]) -> Option<&'a Value> {
    segments.iter().try_fold(tree, |node, seg| child(node, seg))
}

/// 写入到最后一段。父级链不存在时放弃写入并返回 false，树保持不变。
///
/// 空段序列替换整棵树。数组下标超出长度时先用 null 补齐再赋值。
pub fn write(tree: &mut Value, segments: &[Seg], value: Value) -> bool {
    let Some((last, parent_segs)) = segments.split_last() else {
        *tree = value;
        return true;
    };

    let mut parent = tree;
    for seg in parent_segs {
        match child_mut(parent, seg) {
            Some(next) => parent = next,
            None => return false,
        }
    }

    match (parent, last) {
        (Value::Object(map), Seg::Key(k)) => {
            map.insert(k.clone(), value);
            true
        }
        (Value::Object(map), Seg::Index(i)) => {
            map.insert(i.to_string(), value);
            true
        }
        (Value::Array(arr), Seg::Index(i)) => {
            if *i >= arr.len() {
                arr.resize(*i + 1, Value::Null);
            }
            arr[*i] = value;
            true
        }
        _ => false,
    }
}

/// 深拷贝：标量原样返回，复合值的每一层都是新结构
pub fn clone_value(value: &Value) -> Value {
    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::path::Path;
    use serde_json::json;

    fn segs(p: &str) -> Vec<Seg> {
        Path::parse(p).segments().to_vec()
    }

    #[test]
    fn test_read_nested() {
        let tree = json!({ "a": { "b": { "c": 1 } }, "d": [2, { "e": 3 }] });
        assert_eq!(read(&tree, &segs("a.b.c")), Some(&json!(1)));
        assert_eq!(read(&tree, &segs("d[1]")), Some(&json!({ "e": 3 })));
        assert_eq!(read(&tree, &[]), Some(&tree));
    }

    #[test]
    fn test_read_missing_returns_none() {
        let tree = json!({ "a": { "b": { "c": 1 } }, "d": [2, { "e": 3 }] });
        assert_eq!(read(&tree, &segs("a.x.y")), None);
        assert_eq!(read(&tree, &segs("d[2]")), None);
        // 标量不是容器
        assert_eq!(read(&tree, &segs("a.b.c.z")), None);
    }

    #[test]
    fn test_write_nested() {
        let mut tree = json!({ "a": { "b": { "c": 1 } } });
        assert!(write(&mut tree, &segs("a.b.c"), json!(2)));
        assert_eq!(tree, json!({ "a": { "b": { "c": 2 } } }));
        // 父级存在时可以新增键
        assert!(write(&mut tree, &segs("a.b.d"), json!("x")));
        assert_eq!(tree["a"]["b"]["d"], json!("x"));
    }

    #[test]
    fn test_write_does_not_autovivify() {
        let mut tree = json!({ "a": {} });
        let before = tree.clone();
        assert!(!write(&mut tree, &segs("a.b.c"), json!(2)));
        assert_eq!(tree, before);
        assert!(!write(&mut tree, &segs("x.y"), json!(1)));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_write_array_bounds() {
        let mut tree = json!({ "items": [1, 2] });
        assert!(write(&mut tree, &segs("items[1]"), json!(20)));
        assert!(write(&mut tree, &segs("items[2]"), json!(30)));
        assert_eq!(tree["items"], json!([1, 20, 30]));
        assert!(!write(&mut tree, &segs("items.name"), json!(0)));
        assert_eq!(tree["items"], json!([1, 20, 30]));
    }

    #[test]
    fn test_write_past_end_pads_with_null() {
        let mut tree = json!({ "items": [1, 2] });
        assert!(write(&mut tree, &segs("items[4]"), json!(5)));
        assert_eq!(tree["items"], json!([1, 2, null, null, 5]));
    }

    #[test]
    fn test_write_root_replaces_tree() {
        let mut tree = json!({ "a": 1 });
        assert!(write(&mut tree, &[], json!({ "b": 2 })));
        assert_eq!(tree, json!({ "b": 2 }));
    }

    #[test]
    fn test_clone_value_is_independent() {
        let original = json!({ "a": [1, { "b": 2 }] });
        let mut copy = clone_value(&original);
        copy["a"][1]["b"] = json!(99);
        assert_eq!(original["a"][1]["b"], json!(2));
        assert_eq!(clone_value(&json!(1)), json!(1));
        assert_eq!(clone_value(&Value::Null), Value::Null);
    }

    #[test]
    fn test_kind_of() {
        assert_eq!(kind_of(&json!({})), NodeKind::Object);
        assert_eq!(kind_of(&json!([])), NodeKind::Array);
        assert_eq!(kind_of(&json!("s")), NodeKind::String);
        assert_eq!(kind_of(&json!(1)), NodeKind::Number);
        assert_eq!(kind_of(&json!(true)), NodeKind::Bool);
        assert_eq!(kind_of(&Value::Null), NodeKind::Null);
        assert!(is_container(&json!([])));
        assert!(!is_container(&json!(1)));
    }
}
