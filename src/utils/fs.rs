//! IO helper: safe file read/write for JSON state files

use std::{fs::File, io::BufReader, io::ErrorKind, path::Path};

use serde_json::Value;
use crate::model::data_core::StoreError;

/// 从文件读取JSON数据
pub fn read_json_file(p: &Path) -> Result<Value, StoreError> {
    let f = File::open(p)?;
    let rdr = BufReader::new(f);
    let v: Value = serde_json::from_reader(rdr)?;
    Ok(v)
}

/// 将JSON数据保存到文件（格式化输出）
pub fn write_json_file(p: &Path, value: &Value) -> Result<(), StoreError> {
    if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let f = File::create(p)?;
    serde_json::to_writer_pretty(f, value)?;
    Ok(())
}

/// 删除状态文件；文件本就不存在时视为成功
pub fn remove_json_file(p: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
