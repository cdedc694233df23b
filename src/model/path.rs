//! 路径解析：把 "user.addresses[0].city" 这类表达式规范化为段序列
//!
//! 段序列的规范标识（以 `/` 连接）用作监听注册表的索引键。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::data_core::StoreError;

/// 路径中的单个段：对象键或数组下标
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seg {
    Key(String),
    Index(usize),
}

impl Seg {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Seg::Key(k) => Some(k),
            Seg::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Seg::Key(_) => None,
            Seg::Index(i) => Some(*i),
        }
    }
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seg::Key(k) => write!(f, "{}", k),
            Seg::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for Seg {
    fn from(s: &str) -> Self {
        Seg::Key(s.to_owned())
    }
}

impl From<String> for Seg {
    fn from(s: String) -> Self {
        Seg::Key(s)
    }
}

impl From<usize> for Seg {
    fn from(i: usize) -> Self {
        Seg::Index(i)
    }
}

/// 规范化后的路径；空路径表示根
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Seg>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments(segments: Vec<Seg>) -> Self {
        Self(segments)
    }

    /// 解析字符串路径：按 `.`、`[`、`]` 切分，丢弃空片段，纯数字片段转为下标
    pub fn parse(expr: &str) -> Self {
        let segments = expr
            .split(['.', '[', ']'])
            .filter(|token| !token.is_empty())
            .map(token_to_seg)
            .collect();
        Self(segments)
    }

    pub fn key(mut self, k: impl Into<String>) -> Self {
        self.0.push(Seg::Key(k.into()));
        self
    }

    pub fn index(mut self, i: usize) -> Self {
        self.0.push(Seg::Index(i));
        self
    }

    pub fn segments(&self) -> &[Seg] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 拆成 (父路径段, 最后一段)；根路径返回 None
    pub fn split_last(&self) -> Option<(&[Seg], &Seg)> {
        self.0.split_last().map(|(last, parent)| (parent, last))
    }

    /// 规范标识：各段以 `/` 连接
    pub fn canonical(&self) -> String {
        canonical(&self.0)
    }

    /// 规范标识的字符串前缀判断；路径自身也算作自己的前缀。
    /// 注意 `a/b` 是 `a/bc` 的前缀，`l/1` 是 `l/10` 的前缀。
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.canonical().starts_with(&self.canonical())
    }

    /// 段数组形式的 JSON 值，可由 [`Path::from_value`] 还原
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|seg| match seg {
                    Seg::Key(k) => Value::String(k.clone()),
                    Seg::Index(i) => Value::from(*i),
                })
                .collect(),
        )
    }

    /// 从 JSON 值构造路径（回放动作的 key 即以此方式给出）
    pub fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::String(s) => Ok(Self::parse(s)),
            Value::Number(n) => n
                .as_u64()
                .map(|i| Self(vec![Seg::Index(i as usize)]))
                .ok_or_else(|| {
                    StoreError::InvalidPath(format!("下标必须是非负整数: {}", n))
                }),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(token_to_seg(s)),
                    Value::Number(n) => n.as_u64().map(|i| Seg::Index(i as usize)).ok_or_else(|| {
                        StoreError::InvalidPath(format!("下标必须是非负整数: {}", n))
                    }),
                    other => Err(StoreError::InvalidPath(format!(
                        "路径段必须是字符串或整数: {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self),
            other => Err(StoreError::InvalidPath(format!(
                "路径必须是字符串、整数或数组: {}",
                other
            ))),
        }
    }
}

fn token_to_seg(token: &str) -> Seg {
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = token.parse::<usize>() {
            return Seg::Index(i);
        }
    }
    Seg::Key(token.to_string())
}

/// 段序列的规范标识
pub fn canonical(segments: &[Seg]) -> String {
    segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.0 {
            match seg {
                Seg::Key(k) if first => write!(f, "{}", k)?,
                Seg::Key(k) => write!(f, ".{}", k)?,
                Seg::Index(i) => write!(f, "[{}]", i)?,
            }
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<Seg> for Path {
    fn from_iter<I: IntoIterator<Item = Seg>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

/// 可以转换为 [`Path`] 的输入：字符串、单个键或下标、预先切分的段序列、JSON 值
pub trait IntoPath {
    fn into_path(self) -> Result<Path, StoreError>;
}

impl IntoPath for Path {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(self)
    }
}

impl IntoPath for &Path {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(self.clone())
    }
}

impl IntoPath for &str {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(Path::parse(self))
    }
}

impl IntoPath for String {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(Path::parse(&self))
    }
}

impl IntoPath for &String {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(Path::parse(self))
    }
}

impl IntoPath for usize {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(Path(vec![Seg::Index(self)]))
    }
}

impl IntoPath for Seg {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(Path(vec![self]))
    }
}

impl IntoPath for Vec<Seg> {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(Path(self))
    }
}

impl IntoPath for &[Seg] {
    fn into_path(self) -> Result<Path, StoreError> {
        Ok(Path(self.to_vec()))
    }
}

impl IntoPath for &Value {
    fn into_path(self) -> Result<Path, StoreError> {
        Path::from_value(self)
    }
}
