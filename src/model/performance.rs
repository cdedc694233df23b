//! 性能基准测试模块
//!
//! 计时工具、状态体积估算，以及针对 store 读写与监听分发的基准

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::model::data_core::Store;

/// 性能测试结果
#[derive(Debug)]
pub struct PerformanceResult {
    pub operation: String,
    pub duration_ms: u128,
    pub memory_usage_mb: Option<f64>,
    pub success: bool,
    pub details: String,
}

impl PerformanceResult {
    pub fn new(operation: &str, duration_ms: u128, success: bool, details: &str) -> Self {
        Self {
            operation: operation.to_string(),
            duration_ms,
            memory_usage_mb: None,
            success,
            details: details.to_string(),
        }
    }

    pub fn with_memory(mut self, bytes: usize) -> Self {
        self.memory_usage_mb = Some(bytes as f64 / (1024.0 * 1024.0));
        self
    }
}

/// 执行闭包并记录耗时
pub fn track_performance<R>(name: &str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let result = f();
    tracing::info!("{} 耗时 {:?}", name, start.elapsed());
    result
}

/// 状态体积：序列化后的 JSON 字节数
pub fn state_memory_usage(state: &Value) -> usize {
    serde_json::to_vec(state).map_or(0, |bytes| bytes.len())
}

pub fn track_memory(state: &Value) -> usize {
    let bytes = state_memory_usage(state);
    tracing::info!("状态内存占用: {} 字节", bytes);
    bytes
}

/// 生成大型测试JSON数据
pub fn generate_large_json(depth: usize, width: usize) -> Value {
    fn create_nested_object(current_depth: usize, max_depth: usize, width: usize) -> Value {
        if current_depth >= max_depth {
            return json!("叶子节点值");
        }

        let mut obj = serde_json::Map::new();
        for i in 0..width {
            let key = format!("field_{}", i);
            let value = match i % 5 {
                0 => json!(format!("字符串值_{}", i)),
                1 => json!(i as i64),
                2 => json!(i % 2 == 0),
                3 => json!([1, 2, 3, i]),
                _ => create_nested_object(current_depth + 1, max_depth, width / 2),
            };
            obj.insert(key, value);
        }
        Value::Object(obj)
    }

    let items: Vec<Value> = (0..width * 10)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("项目_{}", i),
                "value": i * 2,
                "active": i % 3 == 0
            })
        })
        .collect();

    json!({
        "metadata": { "depth": depth, "width": width, "description": "性能测试用状态树" },
        "data": create_nested_object(0, depth, width),
        "items": items,
    })
}

/// 对 `items[i].value` 逐个写入
pub fn benchmark_set_item(store: &Store, count: usize) -> PerformanceResult {
    let start = Instant::now();
    let success = (0..count).all(|i| {
        store
            .set_item(format!("items[{}].value", i), json!(i))
            .is_ok()
    });
    PerformanceResult::new(
        "set_item",
        start.elapsed().as_millis(),
        success,
        &format!("写入了 {} 个路径", count),
    )
}

pub fn benchmark_get_item(store: &Store, count: usize) -> PerformanceResult {
    let start = Instant::now();
    let hits = (0..count)
        .filter(|i| matches!(store.get_item(format!("items[{}].name", i)), Ok(Some(_))))
        .count();
    PerformanceResult::new(
        "get_item",
        start.elapsed().as_millis(),
        hits == count,
        &format!("读取命中 {}/{}", hits, count),
    )
}

/// 为每个条目注册监听后整体写入 `items`，统计回调次数
pub fn benchmark_dispatch(store: &Store, watchers: usize) -> PerformanceResult {
    let fired = Rc::new(Cell::new(0usize));
    let mut handles = Vec::with_capacity(watchers);
    for i in 0..watchers {
        let fired = fired.clone();
        let watched = store.watch(format!("items[{}]", i), move |_, _| {
            fired.set(fired.get() + 1)
        });
        if let Ok(h) = watched {
            handles.push(h);
        }
    }

    let items = store.get_item("items").ok().flatten().unwrap_or_else(|| json!([]));
    let start = Instant::now();
    let success = store.set_item("items", items).is_ok();
    let duration = start.elapsed();

    for h in &handles {
        h.unwatch();
    }
    PerformanceResult::new(
        "监听分发",
        duration.as_millis(),
        success && fired.get() == handles.len(),
        &format!("触发了 {} 个回调", fired.get()),
    )
}

/// 运行综合性能测试
pub fn run_performance_suite() -> Vec<PerformanceResult> {
    let mut results = Vec::new();

    let test_cases = [
        (3, 10), // 小型：深度3，宽度10
        (4, 20), // 中型：深度4，宽度20
        (5, 30), // 大型：深度5，宽度30
    ];

    for (depth, width) in test_cases {
        tracing::info!("测试规模：深度{}，宽度{}", depth, width);

        let start = Instant::now();
        let json_data = generate_large_json(depth, width);
        let bytes = state_memory_usage(&json_data);
        results.push(
            PerformanceResult::new(
                &format!("数据生成({}x{})", depth, width),
                start.elapsed().as_millis(),
                true,
                &format!("生成了 {} 字节的状态树", bytes),
            )
            .with_memory(bytes),
        );

        let start = Instant::now();
        let store = Store::new(json_data);
        results.push(PerformanceResult::new(
            &format!("Store创建({}x{})", depth, width),
            start.elapsed().as_millis(),
            true,
            "构建了初始状态与历史",
        ));

        let count = width * 10;
        results.push(benchmark_set_item(&store, count));
        results.push(benchmark_get_item(&store, count));
        results.push(benchmark_dispatch(&store, count));
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_large_json() {
        let json = generate_large_json(2, 3);
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("metadata"));
        assert!(obj.contains_key("data"));
        assert_eq!(obj["items"].as_array().unwrap().len(), 30);
    }

    #[test]
    fn test_track_performance_returns_result() {
        assert_eq!(track_performance("加法", || 1 + 1), 2);
    }

    #[test]
    fn test_state_memory_usage() {
        assert_eq!(state_memory_usage(&json!({ "a": 1 })), r#"{"a":1}"#.len());
        assert_eq!(track_memory(&json!([])), 2);
    }

    #[test]
    fn test_store_benchmarks() {
        let store = Store::new(generate_large_json(2, 5));
        let set = benchmark_set_item(&store, 50);
        assert!(set.success, "{}", set.details);
        assert_eq!(store.get_item("items[49].value").unwrap(), Some(json!(49)));

        assert!(benchmark_get_item(&store, 50).success);

        let dispatch = benchmark_dispatch(&store, 50);
        assert!(dispatch.success, "{}", dispatch.details);
        assert_eq!(store.watcher_count(), 0);
    }
}
