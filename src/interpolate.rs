//! 调试 SQL 插值：把占位符替换回字面量，得到可直接执行的语句文本。
//!
//! 安全警告：插值产物仅用于 dry-run 展示与错误现场，不如预编译参数安全，
//! 不要把它拼回执行路径。

use crate::bind::is_positional_key;
use crate::driver::Driver;
use crate::value::BindValue;
use std::collections::HashMap;

/// 按 format description 文本格式化时间；格式非法时回退到默认显示形式。
pub(crate) fn format_datetime(dt: &time::OffsetDateTime, format: &str) -> String {
    time::format_description::parse(format)
        .ok()
        .and_then(|items| dt.format(&items).ok())
        .unwrap_or_else(|| dt.to_string())
}

/// 单个绑定值的字面量形式：字符串走驱动的引号转义，数值按原样，
/// 布尔按 1/0，NULL 按小写 null。
pub(crate) fn render_literal(
    driver: &dyn Driver,
    value: &BindValue,
    datetime_format: &str,
) -> String {
    match value {
        BindValue::Null => "null".to_string(),
        BindValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        BindValue::Int(n) => n.to_string(),
        BindValue::Float(n) => n.to_string(),
        BindValue::Str(s) => driver.quote_str(s),
        BindValue::DateTime(dt) => driver.quote_str(&format_datetime(dt, datetime_format)),
    }
}

/// 根据参数绑定组装最终的 SQL 语句，便于调试与错误复现。
///
/// - 命名占位符 `:name` 在词边界上整体替换，`:a` 不会蚕食 `:ab`；
/// - 位置占位符 `?` 按绑定顺序依次替换；
/// - 引号内的 `?`/`:` 原样保留。
pub fn real_sql(
    driver: &dyn Driver,
    sql: &str,
    binds: &[(String, BindValue)],
    datetime_format: &str,
) -> String {
    let named: HashMap<&str, &BindValue> = binds
        .iter()
        .filter(|(k, _)| !is_positional_key(k))
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    let mut positional = binds
        .iter()
        .filter(|(k, _)| is_positional_key(k))
        .map(|(_, v)| v);

    let mut out = String::with_capacity(sql.len() + binds.len() * 16);
    let mut quote: Option<char> = None;
    let mut escaping = false;

    let mut rest = sql;
    while let Some(c) = rest.chars().next() {
        let clen = c.len_utf8();

        if escaping {
            out.push(c);
            escaping = false;
            rest = &rest[clen..];
            continue;
        }

        match c {
            '\\' if quote.is_some() => {
                out.push(c);
                escaping = true;
                rest = &rest[clen..];
            }
            '\'' | '"' | '`' => {
                if quote == Some(c) {
                    quote = None;
                } else if quote.is_none() {
                    quote = Some(c);
                }
                out.push(c);
                rest = &rest[clen..];
            }
            '?' if quote.is_none() => {
                match positional.next() {
                    Some(v) => out.push_str(&render_literal(driver, v, datetime_format)),
                    None => out.push('?'),
                }
                rest = &rest[clen..];
            }
            ':' if quote.is_none() => {
                let ident_len = rest[1..]
                    .bytes()
                    .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                    .count();
                let ident = &rest[1..1 + ident_len];
                if let Some(v) = named.get(ident) {
                    out.push_str(&render_literal(driver, v, datetime_format));
                } else {
                    out.push(':');
                    out.push_str(ident);
                }
                rest = &rest[1 + ident_len..];
            }
            _ => {
                out.push(c);
                rest = &rest[clen..];
            }
        }
    }

    out
}
