//! BindSet：有序的占位符参数集合，一次编译一次消费。

use crate::value::BindValue;
use std::collections::HashMap;

/// 纯数字键对应位置占位符 `?`，其余对应命名占位符 `:name`。
pub(crate) fn is_positional_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

/// 把字段路径归一化为占位符名：非字母数字字符一律替换为 `_`。
pub(crate) fn normalize_name(field: &str) -> String {
    field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// BindSet 按插入顺序存储 `名字 -> 值`。
///
/// 编译期间由 SQL 编译器注册生成的占位符，执行（或出错）时整体取走并清空，
/// 因此同一个集合不会被两条语句复用。
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BindSet {
    entries: Vec<(String, BindValue)>,
    index: HashMap<String, usize>,
}

impl BindSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个命名参数；同名参数覆盖旧值（保持原有位置）。
    pub fn bind(&mut self, key: impl Into<String>, value: impl Into<BindValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(&i) = self.index.get(&key) {
            self.entries[i].1 = value;
            return;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
    }

    /// 追加一个位置参数（键为十进制序号，对应 `?` 占位符）。
    pub fn push_positional(&mut self, value: impl Into<BindValue>) {
        let key = self.entries.len().to_string();
        self.bind(key, value);
    }

    /// 为 `prefix` + 归一化字段名分配一个不冲突的占位符并注册值。
    ///
    /// 冲突时追加确定性的 `_2`、`_3`…… 后缀；同一条链两次编译得到的名字
    /// 逐字节一致。返回的名字不含 `:` 前缀。
    pub fn alloc(
        &mut self,
        prefix: &str,
        field: &str,
        value: impl Into<BindValue>,
    ) -> String {
        let base = format!("{prefix}{}", normalize_name(field));
        let mut name = base.clone();
        let mut probe = 2usize;
        while self.index.contains_key(&name) {
            name = format!("{base}_{probe}");
            probe += 1;
        }
        self.bind(name.clone(), value);
        name
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&BindValue> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, BindValue)> {
        self.entries.iter()
    }

    /// 合并另一组参数（例如调用方预先注册、SQL 中以 `:name` 引用的值）。
    pub fn merge(&mut self, other: BindSet) {
        for (k, v) in other.entries {
            self.bind(k, v);
        }
    }

    /// 取出全部参数并清空自身：一条语句只消费一次。
    pub fn take(&mut self) -> Vec<(String, BindValue)> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}
