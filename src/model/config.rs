//! Store 配置：可从 JSON 文件加载，缺省字段取默认值

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::data_core::StoreError;
use crate::utils::fs::read_json_file;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 是否记录撤销历史
    pub record_history: bool,
    /// 历史条目上限，None 表示不限
    pub history_limit: Option<usize>,
    /// 是否记录动作日志（用于回放）
    pub record_actions: bool,
    /// 写入或监听不存在的路径时是否输出警告
    pub warn_on_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            record_history: true,
            history_limit: None,
            record_actions: false,
            warn_on_missing: true,
        }
    }
}

impl StoreConfig {
    pub fn from_file(p: &Path) -> Result<Self, StoreError> {
        let value = read_json_file(p)?;
        Ok(serde_json::from_value(value)?)
    }
}
