//! 调试器旁路：初始化时发送初始状态，每次提交写入后发送 (动作, 新状态)，
//! 并接受 JUMP_TO_STATE 消息把整棵树推回 store（时间旅行）

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::data_core::{Store, StoreError};

pub const DISPATCH: &str = "DISPATCH";
pub const JUMP_TO_STATE: &str = "JUMP_TO_STATE";

/// 发送给调试器的动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevtoolsAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl DevtoolsAction {
    pub fn new(kind: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// 调试器连接
pub trait DevtoolsConnection {
    fn init(&self, state: &Value);
    fn send(&self, action: &DevtoolsAction, state: &Value);
}

/// 把状态变化输出到日志的连接
#[derive(Debug, Default)]
pub struct TracingDevtools;

impl DevtoolsConnection for TracingDevtools {
    fn init(&self, state: &Value) {
        tracing::info!("devtools 初始状态: {}", state);
    }

    fn send(&self, action: &DevtoolsAction, state: &Value) {
        tracing::info!(
            "devtools 动作: {} payload={:?} state={}",
            action.kind,
            action.payload,
            state
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevtoolsPayload {
    #[serde(rename = "type")]
    pub kind: String,
}

/// 调试器发回的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevtoolsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<DevtoolsPayload>,
    /// JSON 编码的完整状态树
    #[serde(default)]
    pub state: Option<String>,
}

impl DevtoolsMessage {
    pub fn jump_to_state(state: &Value) -> Self {
        Self {
            kind: DISPATCH.to_string(),
            payload: Some(DevtoolsPayload {
                kind: JUMP_TO_STATE.to_string(),
            }),
            state: Some(state.to_string()),
        }
    }

    fn is_jump(&self) -> bool {
        self.kind == DISPATCH && self.payload.as_ref().is_some_and(|p| p.kind == JUMP_TO_STATE)
    }
}

/// 处理调试器消息。JUMP_TO_STATE 通过 `set_state` 写回并返回 true，其它消息忽略。
pub fn apply_devtools_message(
    store: &Store,
    message: &DevtoolsMessage,
) -> Result<bool, StoreError> {
    if !message.is_jump() {
        tracing::debug!("忽略 devtools 消息: {}", message.kind);
        return Ok(false);
    }
    let encoded = message
        .state
        .as_deref()
        .ok_or_else(|| StoreError::InvalidArgument("JUMP_TO_STATE 缺少 state".into()))?;
    let state: Value = serde_json::from_str(encoded)?;
    store.set_state(state)?;
    Ok(true)
}
