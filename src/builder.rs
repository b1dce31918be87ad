//! SQL 编译器：把选项快照翻译成参数化 SQL 与绑定集合。
//!
//! 纯翻译过程：除选项与占位符分配器外不依赖任何状态，也不做 I/O。
//! 五类语句各有固定的子句模板，空子句一律渲染为空串，不留悬空关键字。

use crate::bind::BindSet;
use crate::driver::Driver;
use crate::interpolate::render_literal;
use crate::options::{
    CondValue, DataValue, JoinSpec, Limit, Operator, OrderItem, QueryOptions, TableRef, UnionItem,
    WherePart, WhereTree,
};
use crate::string_builder::{StringBuilder, filter_empty_strings};
use crate::value::BindValue;

const SELECT_SQL: &str =
    "SELECT%DISTINCT% %FIELD% FROM %TABLE%%FORCE%%JOIN%%WHERE%%GROUP%%HAVING%%ORDER%%LIMIT%%UNION%%LOCK%%COMMENT%";
const INSERT_SQL: &str = "%INSERT% INTO %TABLE% (%FIELD%) VALUES (%DATA%)%COMMENT%";
const INSERT_ALL_SQL: &str = "INSERT INTO %TABLE% (%FIELD%) VALUES %DATA%%COMMENT%";
const UPDATE_SQL: &str = "UPDATE %TABLE% SET %SET%%JOIN%%WHERE%%ORDER%%LIMIT%%LOCK%%COMMENT%";
const DELETE_SQL: &str =
    "DELETE FROM %TABLE%%USING%%JOIN%%WHERE%%ORDER%%LIMIT%%LOCK%%COMMENT%";

/// 模板填充：`%KEY%` 逐个查表替换；未知标记原样保留。
/// 单遍扫描，替换进去的内容不会被二次识别为标记。
fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        if let Some(end) = after.find('%')
            && let Some((_, v)) = pairs.iter().find(|(k, _)| *k == &after[..end])
        {
            out.push_str(v);
            rest = &after[end + 1..];
            continue;
        }
        out.push('%');
        rest = after;
    }
    out.push_str(rest);
    out
}

/// 一次编译的上下文：方言能力 + 占位符分配器。
pub struct SqlBuilder<'a> {
    driver: &'static dyn Driver,
    binds: &'a mut BindSet,
    datetime_format: &'a str,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(
        driver: &'static dyn Driver,
        binds: &'a mut BindSet,
        datetime_format: &'a str,
    ) -> Self {
        Self {
            driver,
            binds,
            datetime_format,
        }
    }

    /// 生成查询 SQL。
    pub fn select(&mut self, options: &QueryOptions) -> String {
        fill(
            SELECT_SQL,
            &[
                ("TABLE", self.parse_table(options).as_str()),
                ("DISTINCT", parse_distinct(options.distinct)),
                ("FIELD", self.parse_field(options).as_str()),
                ("JOIN", self.parse_join(options).as_str()),
                ("WHERE", self.parse_where(options).as_str()),
                ("GROUP", parse_group(&options.group).as_str()),
                ("HAVING", parse_having(&options.having).as_str()),
                ("ORDER", self.parse_order(options).as_str()),
                ("LIMIT", parse_limit(options.limit).as_str()),
                ("UNION", parse_union(&options.unions).as_str()),
                ("LOCK", parse_lock(options.lock)),
                ("COMMENT", parse_comment(&options.comment).as_str()),
                ("FORCE", parse_force(&options.force_index).as_str()),
            ],
        )
    }

    /// 生成单行写入 SQL；负载为空（或全部无效）时返回空串。
    pub fn insert(&mut self, options: &QueryOptions, replace: bool) -> String {
        let data = self.parse_data(&options.data, options);
        if data.is_empty() {
            return String::new();
        }
        let fields: Vec<String> = data.iter().map(|(k, _)| k.clone()).collect();
        let values: Vec<String> = data.into_iter().map(|(_, v)| v).collect();

        fill(
            INSERT_SQL,
            &[
                ("INSERT", if replace { "REPLACE" } else { "INSERT" }),
                ("TABLE", self.parse_table(options).as_str()),
                ("FIELD", fields.join(",").as_str()),
                ("DATA", values.join(",").as_str()),
                ("COMMENT", parse_comment(&options.comment).as_str()),
            ],
        )
    }

    /// 生成多行写入 SQL；列序取第一行，缺列的行补 NULL。
    pub fn insert_all(
        &mut self,
        rows: &[Vec<(String, DataValue)>],
        options: &QueryOptions,
    ) -> String {
        let Some(first) = rows.first() else {
            return String::new();
        };
        let head = self.parse_data(first, options);
        if head.is_empty() {
            return String::new();
        }
        let fields: Vec<String> = head.iter().map(|(k, _)| k.clone()).collect();

        let mut groups = Vec::with_capacity(rows.len());
        groups.push(format!(
            "({})",
            head.iter().map(|(_, v)| v.as_str()).collect::<Vec<_>>().join(",")
        ));
        for row in &rows[1..] {
            let parsed = self.parse_data(row, options);
            let values: Vec<String> = fields
                .iter()
                .map(|f| {
                    parsed
                        .iter()
                        .find(|(k, _)| k == f)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_else(|| "NULL".to_string())
                })
                .collect();
            groups.push(format!("({})", values.join(",")));
        }

        fill(
            INSERT_ALL_SQL,
            &[
                ("TABLE", self.parse_table(options).as_str()),
                ("FIELD", fields.join(",").as_str()),
                ("DATA", groups.join(",").as_str()),
                ("COMMENT", parse_comment(&options.comment).as_str()),
            ],
        )
    }

    /// 生成更新 SQL；负载为空（或全部无效）时返回空串。
    pub fn update(&mut self, options: &QueryOptions) -> String {
        let data = self.parse_data(&options.data, options);
        if data.is_empty() {
            return String::new();
        }
        let set: Vec<String> = data.into_iter().map(|(k, v)| format!("{k}={v}")).collect();

        fill(
            UPDATE_SQL,
            &[
                ("TABLE", self.parse_table(options).as_str()),
                ("SET", set.join(",").as_str()),
                ("JOIN", self.parse_join(options).as_str()),
                ("WHERE", self.parse_where(options).as_str()),
                ("ORDER", self.parse_order(options).as_str()),
                ("LIMIT", parse_limit(options.limit).as_str()),
                ("LOCK", parse_lock(options.lock)),
                ("COMMENT", parse_comment(&options.comment).as_str()),
            ],
        )
    }

    /// 生成删除 SQL。
    pub fn delete(&mut self, options: &QueryOptions) -> String {
        fill(
            DELETE_SQL,
            &[
                ("TABLE", self.parse_table(options).as_str()),
                ("USING", parse_using(&options.using).as_str()),
                ("JOIN", self.parse_join(options).as_str()),
                ("WHERE", self.parse_where(options).as_str()),
                ("ORDER", self.parse_order(options).as_str()),
                ("LIMIT", parse_limit(options.limit).as_str()),
                ("LOCK", parse_lock(options.lock)),
                ("COMMENT", parse_comment(&options.comment).as_str()),
            ],
        )
    }

    /// 表清单：逗号连接，别名取内联写法或显式别名映射。
    fn parse_table(&self, options: &QueryOptions) -> String {
        let items: Vec<String> = options
            .tables
            .iter()
            .map(|t| self.render_table(t, options))
            .collect();
        items.join(",")
    }

    fn render_table(&self, table: &TableRef, options: &QueryOptions) -> String {
        let alias = table
            .alias
            .as_deref()
            .or_else(|| options.alias_of(&table.name));
        match alias {
            Some(a) => format!("{} {}", table.name, a),
            None => table.name.clone(),
        }
    }

    /// 字段清单：应用排除列表；为空则回落到 `*`。
    fn parse_field(&self, options: &QueryOptions) -> String {
        let items: Vec<String> = options
            .fields
            .iter()
            .filter(|f| !options.field_excludes.contains(&f.name))
            .map(|f| match &f.alias {
                Some(a) => format!("{} AS {}", f.name, a),
                None => f.name.clone(),
            })
            .collect();
        if items.is_empty() {
            return "*".to_string();
        }
        items.join(",")
    }

    fn parse_where(&mut self, options: &QueryOptions) -> String {
        let clause = self.build_where(&options.wheres, options);
        if clause.is_empty() {
            String::new()
        } else {
            format!(" WHERE {clause}")
        }
    }

    /// 渲染 where 树。首个条件不带前导逻辑词；嵌套子组整体括号包裹。
    fn build_where(&mut self, tree: &WhereTree, options: &QueryOptions) -> String {
        let mut buf = StringBuilder::new();
        for group in &tree.groups {
            for part in &group.parts {
                let expr = match part {
                    WherePart::Cond { field, op, value } => self.render_cond(field, *op, value),
                    WherePart::Raw(raw) => raw.clone(),
                    WherePart::Group(sub) => {
                        let inner = self.build_where(sub, options);
                        if inner.is_empty() {
                            continue;
                        }
                        format!("( {inner} )")
                    }
                };
                if expr.is_empty() {
                    continue;
                }
                if !buf.is_empty() {
                    buf.write_leading(group.logic.as_str());
                }
                buf.write_leading(&expr);
            }
        }
        buf.into_string()
    }

    fn render_cond(&mut self, field: &str, op: Operator, value: &CondValue) -> String {
        if op.is_null_test() {
            return format!("{field} IS {}", op.as_str());
        }
        if op.is_membership() {
            let values = match value {
                CondValue::Many(vs) => vs.clone(),
                CondValue::One(v) => vec![v.clone()],
                CondValue::None => vec![BindValue::Null],
            };
            let holders: Vec<String> = values
                .into_iter()
                .map(|v| format!(":{}", self.binds.alloc("where_", field, v)))
                .collect();
            return format!("{field} {} ({})", op.as_str(), holders.join(","));
        }
        if op.is_pattern() {
            let literal = match value {
                CondValue::One(v) => render_literal(self.driver, v, self.datetime_format),
                CondValue::Many(vs) => vs
                    .first()
                    .map(|v| render_literal(self.driver, v, self.datetime_format))
                    .unwrap_or_else(|| "''".to_string()),
                CondValue::None => "''".to_string(),
            };
            return format!("{field} {} {literal}", op.as_str());
        }

        // 比较运算：值绑定为占位符；已是 `:已知绑定` 形式的引用原样引用。
        let value = match value {
            CondValue::One(v) => v.clone(),
            CondValue::Many(vs) => vs.first().cloned().unwrap_or(BindValue::Null),
            CondValue::None => BindValue::Null,
        };
        if let BindValue::Str(s) = &value
            && let Some(name) = s.strip_prefix(':')
            && self.binds.contains(name)
        {
            return format!("{field} {} :{name}", op.as_str());
        }
        let name = self.binds.alloc("where_", field, value);
        format!("{field} {} :{name}", op.as_str())
    }

    /// JOIN 清单。ON 片段在第一个 `=` 处拆成左右列引用；
    /// 不含 `=` 的片段按原样透传（值本身含 `=` 的场景不做转义）。
    fn parse_join(&self, options: &QueryOptions) -> String {
        let mut buf = StringBuilder::new();
        for JoinSpec { table, kind, on } in &options.joins {
            let conds: Vec<String> = on
                .iter()
                .map(|token| match token.split_once('=') {
                    Some((left, right)) => format!("{}={}", left.trim(), right.trim()),
                    None => token.clone(),
                })
                .collect();
            buf.write_leading(kind.as_str());
            buf.write_str(" JOIN ");
            buf.write_str(&self.render_table(table, options));
            if !conds.is_empty() {
                buf.write_str(" ON ");
                buf.write_strings(&filter_empty_strings(conds), " AND ");
            }
        }
        let joins = buf.into_string();
        if joins.is_empty() {
            String::new()
        } else {
            format!(" {joins}")
        }
    }

    /// 写入负载：NULL 原样、表达式原样、标量注册绑定；
    /// 非标量负载静默跳过，不视为错误。
    fn parse_data(
        &mut self,
        data: &[(String, DataValue)],
        _options: &QueryOptions,
    ) -> Vec<(String, String)> {
        let mut result = Vec::with_capacity(data.len());
        for (field, value) in data {
            match value {
                DataValue::Null => result.push((field.clone(), "NULL".to_string())),
                DataValue::Expr(expr) => result.push((field.clone(), expr.clone())),
                DataValue::Value(v) => {
                    if let BindValue::Str(s) = v
                        && let Some(name) = s.strip_prefix(':')
                        && self.binds.contains(name)
                    {
                        result.push((field.clone(), format!(":{name}")));
                        continue;
                    }
                    let name = self.binds.alloc("data_", field, v.clone());
                    result.push((field.clone(), format!(":{name}")));
                }
                DataValue::List(_) => {}
            }
        }
        result
    }

    fn parse_order(&self, options: &QueryOptions) -> String {
        if options.order.is_empty() {
            return String::new();
        }
        let items: Vec<String> = options
            .order
            .iter()
            .map(|item| match item {
                OrderItem::Rand => self.driver.random_order().to_string(),
                OrderItem::Raw(raw) => raw.clone(),
                OrderItem::Col { field, dir } => match dir {
                    Some(d) => format!("{field} {}", d.as_str()),
                    None => field.clone(),
                },
            })
            .collect();
        format!(" ORDER BY {}", items.join(","))
    }
}

fn parse_distinct(distinct: bool) -> &'static str {
    if distinct { " DISTINCT" } else { "" }
}

fn parse_group(group: &str) -> String {
    if group.is_empty() {
        String::new()
    } else {
        format!(" GROUP BY {group}")
    }
}

fn parse_having(having: &str) -> String {
    if having.is_empty() {
        String::new()
    } else {
        format!(" HAVING {having}")
    }
}

fn parse_limit(limit: Option<Limit>) -> String {
    match limit {
        None => String::new(),
        Some(Limit {
            offset,
            count: None,
        }) => format!(" LIMIT {offset}"),
        Some(Limit {
            offset,
            count: Some(count),
        }) => format!(" LIMIT {offset},{count}"),
    }
}

fn parse_union(unions: &[UnionItem]) -> String {
    let mut buf = StringBuilder::new();
    for UnionItem { kind, sql } in unions {
        buf.write_leading(kind.as_str());
        buf.write_str(" ");
        buf.write_str(sql);
    }
    let s = buf.into_string();
    if s.is_empty() { s } else { format!(" {s}") }
}

fn parse_lock(lock: bool) -> &'static str {
    if lock { " FOR UPDATE" } else { "" }
}

fn parse_comment(comment: &str) -> String {
    if comment.is_empty() {
        String::new()
    } else {
        format!(" /* {comment} */")
    }
}

fn parse_force(index: &[String]) -> String {
    if index.is_empty() {
        String::new()
    } else {
        format!(" FORCE INDEX ( {} )", index.join(","))
    }
}

fn parse_using(using: &str) -> String {
    if using.is_empty() {
        String::new()
    } else {
        format!(" USING {using}")
    }
}
