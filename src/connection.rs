//! 会话管理器：物理链接缓存、读写路由、嵌套事务与语句执行。
//!
//! 一个会话独占其创建的全部物理链接；内部不加锁，并发调用方各持
//! 独立会话。同一链接上的语句按发出顺序执行；跨读写链接之间没有
//! 顺序保证，因此事务开启期间的读一律路由到主库。

use crate::config::{Config, Deploy};
use crate::driver::{Backend, Driver, FieldInfo};
use crate::error::{DbError, DbResult};
use crate::interpolate::real_sql;
use crate::transport::{
    Link, QueryOutput, Row, Statement, Transport, TransportError, param_ref,
};
use crate::value::{BindType, BindValue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// 会话内的查询/执行计数（取代进程级全局计数器）。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub queries: u64,
    pub executes: u64,
}

impl Metrics {
    pub fn total(self) -> u64 {
        self.queries + self.executes
    }
}

/// 一个槽位：物理链接 + 它独占的预处理语句句柄。
struct Slot {
    link: Box<dyn Link>,
    stmt: Option<PreparedStmt>,
}

struct PreparedStmt {
    sql: String,
    handle: Box<dyn Statement>,
}

enum RunMode {
    Fetch,
    Cursor,
    Affected,
}

enum RunOutput {
    Rows(Vec<Row>),
    Sets(Vec<Vec<Row>>),
    Affected(u64),
    Cursor,
}

enum RunFailure {
    Bind(String, TransportError),
    Statement(TransportError),
}

/// 数据库会话。
pub struct Connection {
    config: Config,
    backend: Backend,
    transport: Box<dyn Transport>,
    slots: HashMap<usize, Slot>,
    active: Option<usize>,
    write_slot: Option<usize>,
    read_slot: Option<usize>,
    trans_depth: u32,
    metrics: Metrics,
    rng: StdRng,
    last_query: Option<(String, Vec<(String, BindValue)>)>,
    fields_cache: HashMap<String, Vec<FieldInfo>>,
    cursor_slot: Option<usize>,
}

impl Connection {
    /// 建立会话。后端标签未知时立刻失败，不做任何连接尝试。
    pub fn new(config: Config, transport: Box<dyn Transport>) -> DbResult<Self> {
        let backend = Backend::from_tag(&config.backend_type)?;
        Ok(Self {
            config,
            backend,
            transport,
            slots: HashMap::new(),
            active: None,
            write_slot: None,
            read_slot: None,
            trans_depth: 0,
            metrics: Metrics::default(),
            rng: StdRng::from_entropy(),
            last_query: None,
            fields_cache: HashMap::new(),
            cursor_slot: None,
        })
    }

    /// 指定路由随机数种子的会话，用于可复现的路由测试。
    pub fn with_seed(config: Config, transport: Box<dyn Transport>, seed: u64) -> DbResult<Self> {
        let mut conn = Self::new(config, transport)?;
        conn.rng = StdRng::seed_from_u64(seed);
        Ok(conn)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub(crate) fn driver(&self) -> &'static dyn Driver {
        self.backend.driver()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    /// 当前事务嵌套深度；0 表示没有开启事务。
    pub fn transaction_depth(&self) -> u32 {
        self.trans_depth
    }

    /// 执行查询，返回结果集。
    ///
    /// `master` 强制路由到写角色；`cursor` 让语句保持打开，之后用
    /// [`fetch_row`](Self::fetch_row) 逐行取回。
    pub fn query(
        &mut self,
        sql: &str,
        binds: Vec<(String, BindValue)>,
        master: bool,
        cursor: bool,
    ) -> DbResult<QueryOutput> {
        self.metrics.queries += 1;
        let mode = if cursor { RunMode::Cursor } else { RunMode::Fetch };
        match self.run(sql, binds, master, mode)? {
            RunOutput::Rows(rows) => Ok(QueryOutput::Rows(rows)),
            RunOutput::Sets(sets) => Ok(QueryOutput::Sets(sets)),
            RunOutput::Affected(_) | RunOutput::Cursor => Ok(QueryOutput::Rows(Vec::new())),
        }
    }

    /// 执行写入语句，返回影响行数。
    pub fn execute(&mut self, sql: &str, binds: Vec<(String, BindValue)>) -> DbResult<u64> {
        self.metrics.executes += 1;
        match self.run(sql, binds, true, RunMode::Affected)? {
            RunOutput::Affected(n) => Ok(n),
            _ => Ok(0),
        }
    }

    fn run(
        &mut self,
        sql: &str,
        binds: Vec<(String, BindValue)>,
        master: bool,
        mode: RunMode,
    ) -> DbResult<RunOutput> {
        self.last_query = Some((sql.to_string(), binds.clone()));

        if self.config.debug {
            debug!(sql = %self.get_real_sql(sql, &binds), "run statement");
        }

        let mut reconnected = false;
        loop {
            let index = self.init_connect(master)?;

            if self.config.sql_explain && first_keyword_is(sql, &["select"]) {
                self.log_explain(index, sql);
            }

            let procedure = first_keyword_is(sql, &["call", "exec"]);
            let kind = self.config.result_type;
            let slot = self
                .slots
                .get_mut(&index)
                .ok_or_else(|| DbError::Connection("connection slot vanished".to_string()))?;

            match perform(slot, sql, &binds, procedure, &mode, kind) {
                Ok(output) => {
                    if matches!(output, RunOutput::Cursor) {
                        self.cursor_slot = Some(index);
                    }
                    return Ok(output);
                }
                Err(RunFailure::Bind(placeholder, e)) => {
                    return Err(DbError::Binding {
                        placeholder,
                        message: e.message,
                    });
                }
                Err(RunFailure::Statement(e)) => {
                    if e.lost_connection
                        && self.config.break_reconnect
                        && self.trans_depth == 0
                        && !reconnected
                    {
                        warn!(slot = index, "link lost, reconnecting once");
                        reconnected = true;
                        self.drop_slot(index);
                        continue;
                    }
                    return Err(self.wrap_statement_error(e, sql, &binds));
                }
            }
        }
    }

    fn wrap_statement_error(
        &self,
        e: TransportError,
        sql: &str,
        binds: &[(String, BindValue)],
    ) -> DbError {
        DbError::execution(
            e.message,
            e.code,
            self.get_real_sql(sql, binds),
            binds.to_vec(),
            self.config.summary(),
        )
    }

    /// cursor 模式下逐行取回；结果耗尽返回 `None`。
    pub fn fetch_row(&mut self) -> DbResult<Option<Row>> {
        let Some(index) = self.cursor_slot else {
            return Ok(None);
        };
        let kind = self.config.result_type;
        let Some(stmt) = self
            .slots
            .get_mut(&index)
            .and_then(|slot| slot.stmt.as_mut())
        else {
            return Ok(None);
        };
        let row = stmt
            .handle
            .fetch_row(kind)
            .map_err(|e| DbError::execution(e.message, e.code, "", Vec::new(), self.config.summary()))?;
        if row.is_none() {
            self.cursor_slot = None;
        }
        Ok(row)
    }

    /// 初始化并返回本次操作使用的槽位。
    fn init_connect(&mut self, master: bool) -> DbResult<usize> {
        let index = if self.config.deploy == Deploy::Distributed {
            if master || self.trans_depth > 0 {
                match self.write_slot {
                    Some(i) => i,
                    None => {
                        let i = self.multi_connect(true)?;
                        self.write_slot = Some(i);
                        i
                    }
                }
            } else {
                match self.read_slot {
                    Some(i) => i,
                    None => {
                        let i = self.multi_connect(false)?;
                        self.read_slot = Some(i);
                        i
                    }
                }
            }
        } else {
            self.connect_slot(0, self.config.node(0), None)?
        };
        self.active = Some(index);
        Ok(index)
    }

    /// 分布式路由：解析出目标槽位并建立连接。
    ///
    /// 写操作（以及事务期间的一切操作）落在 `[0, master_num)` 内均匀
    /// 选出的主槽位；读写分离开启时普通读落在从库区间（或显式指定的
    /// 从库），否则全范围均匀选择。
    fn multi_connect(&mut self, master: bool) -> DbResult<usize> {
        let total = self.config.host_count().max(1);
        let masters = self.config.master_num.clamp(1, total);

        let m = self.rng.gen_range(0..masters);
        let r = if self.config.rw_separate {
            if master {
                m
            } else if let Some(slave) = self.config.slave_no.filter(|s| *s < total) {
                slave
            } else if masters < total {
                self.rng.gen_range(masters..total)
            } else {
                // 没有从库可用：读操作退回主库区间
                m
            }
        } else {
            self.rng.gen_range(0..total)
        };

        trace!(master, slot = r, "route statement");

        let fallback = if m != r { Some(self.config.node(m)) } else { None };
        self.connect_slot(r, self.config.node(r), fallback)
    }

    /// 建立（或复用）槽位连接；首连失败且有备用配置时改连备用一次。
    fn connect_slot(
        &mut self,
        index: usize,
        node: Config,
        fallback: Option<Config>,
    ) -> DbResult<usize> {
        if self.slots.contains_key(&index) {
            return Ok(index);
        }

        let mut node = node;
        if node.dsn.is_empty() {
            node.dsn = self.driver().build_dsn(&node);
        }

        let link = match self.transport.connect(&node) {
            Ok(link) => link,
            Err(e) => match fallback {
                Some(mut alt) => {
                    warn!(slot = index, error = %e, "connect failed, trying master fallback");
                    if alt.dsn.is_empty() {
                        alt.dsn = self.driver().build_dsn(&alt);
                    }
                    self.transport.connect(&alt).map_err(|e2| {
                        DbError::Connection(format!("{} (fallback: {})", e.message, e2.message))
                    })?
                }
                None => return Err(DbError::Connection(e.message)),
            },
        };

        self.slots.insert(index, Slot { link, stmt: None });
        Ok(index)
    }

    fn drop_slot(&mut self, index: usize) {
        self.slots.remove(&index);
        if self.active == Some(index) {
            self.active = None;
        }
        if self.write_slot == Some(index) {
            self.write_slot = None;
        }
        if self.read_slot == Some(index) {
            self.read_slot = None;
        }
        if self.cursor_slot == Some(index) {
            self.cursor_slot = None;
        }
    }

    /// 启动事务。深度 1 发出真正的 BEGIN；更深层在支持保存点的后端
    /// 上创建 `trans{depth}` 保存点，否则只推进计数。
    pub fn start_trans(&mut self) -> DbResult<()> {
        let index = self.init_connect(true)?;
        self.trans_depth += 1;
        let depth = self.trans_depth;
        let savepoint = self.driver().supports_savepoint();
        let summary = self.config.summary();
        let slot = self
            .slots
            .get_mut(&index)
            .ok_or_else(|| DbError::Connection("connection slot vanished".to_string()))?;

        let stmt_sql = if depth == 1 {
            "BEGIN".to_string()
        } else {
            parse_savepoint(depth)
        };
        let result = if depth == 1 {
            slot.link.begin()
        } else if savepoint {
            slot.link.exec(&stmt_sql).map(|_| ())
        } else {
            Ok(())
        };
        result.map_err(|e| DbError::execution(e.message, e.code, stmt_sql, Vec::new(), summary))
    }

    /// 提交。只有深度 1 发出真正的 COMMIT；任何深度都会递减计数。
    pub fn commit(&mut self) -> DbResult<()> {
        let index = self.init_connect(true)?;
        let depth = self.trans_depth;
        let summary = self.config.summary();
        if depth == 1 {
            let slot = self
                .slots
                .get_mut(&index)
                .ok_or_else(|| DbError::Connection("connection slot vanished".to_string()))?;
            slot.link.commit().map_err(|e| {
                DbError::execution(e.message, e.code, "COMMIT", Vec::new(), summary)
            })?;
        }
        self.trans_depth = self.trans_depth.saturating_sub(1);
        Ok(())
    }

    /// 回滚。深度 1 发出真正的 ROLLBACK，更深层回滚到对应保存点；
    /// 深度计数向下取整到 0。
    pub fn rollback(&mut self) -> DbResult<()> {
        let index = self.init_connect(true)?;
        let depth = self.trans_depth;
        let savepoint = self.driver().supports_savepoint();
        let summary = self.config.summary();
        let slot = self
            .slots
            .get_mut(&index)
            .ok_or_else(|| DbError::Connection("connection slot vanished".to_string()))?;

        let stmt_sql = if depth == 1 {
            "ROLLBACK".to_string()
        } else {
            parse_savepoint_rollback(depth)
        };
        let result = if depth == 1 {
            slot.link.rollback()
        } else if depth > 1 && savepoint {
            slot.link.exec(&stmt_sql).map(|_| ())
        } else {
            Ok(())
        };
        result.map_err(|e| DbError::execution(e.message, e.code, stmt_sql, Vec::new(), summary))?;

        self.trans_depth = self.trans_depth.saturating_sub(1);
        Ok(())
    }

    /// 事务闭包：开启事务执行 `f`，成功提交、失败回滚并透传错误。
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> DbResult<T>,
    ) -> DbResult<T> {
        self.start_trans()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.rollback()?;
                Err(e)
            }
        }
    }

    /// 最近插入行的自增 id。
    pub fn last_insert_id(&mut self, sequence: Option<&str>) -> DbResult<i64> {
        let index = self.init_connect(true)?;
        let summary = self.config.summary();
        let slot = self
            .slots
            .get_mut(&index)
            .ok_or_else(|| DbError::Connection("connection slot vanished".to_string()))?;
        slot.link
            .last_insert_id(sequence)
            .map_err(|e| DbError::execution(e.message, e.code, "", Vec::new(), summary))
    }

    /// 根据参数绑定组装实际执行的 SQL，便于调试。
    pub fn get_real_sql(&self, sql: &str, binds: &[(String, BindValue)]) -> String {
        real_sql(self.driver(), sql, binds, &self.config.datetime_format)
    }

    /// 最近一次语句的实际 SQL 文本。
    pub fn last_sql(&self) -> String {
        match &self.last_query {
            Some((sql, binds)) => self.get_real_sql(sql, binds),
            None => String::new(),
        }
    }

    /// 批处理执行：逐条直发，全部成功返回 `true`。
    pub fn batch_execute(&mut self, sqls: &[&str]) -> DbResult<bool> {
        let index = self.init_connect(true)?;
        let summary = self.config.summary();
        let slot = self
            .slots
            .get_mut(&index)
            .ok_or_else(|| DbError::Connection("connection slot vanished".to_string()))?;
        for sql in sqls {
            self.metrics.executes += 1;
            slot.link.exec(sql).map_err(|e| {
                DbError::execution(e.message, e.code, sql.to_string(), Vec::new(), summary.clone())
            })?;
        }
        Ok(true)
    }

    /// 取一条语句的执行计划。
    pub fn explain(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let explain_sql = self.driver().explain_sql(sql);
        Ok(self.query(&explain_sql, Vec::new(), false, false)?.into_rows())
    }

    fn log_explain(&mut self, index: usize, sql: &str) {
        let explain_sql = self.driver().explain_sql(sql);
        let kind = self.config.result_type;
        let Some(slot) = self.slots.get_mut(&index) else {
            return;
        };
        // 性能分析失败不影响主语句
        if let Ok(mut stmt) = slot.link.prepare(&explain_sql)
            && stmt.execute().is_ok()
            && let Ok(rows) = stmt.fetch_all(kind)
        {
            debug!(sql, plan_rows = rows.len(), "sql explain");
        }
    }

    /// 表字段元数据（带会话级缓存）。多表、子查询表名不取元数据。
    pub fn table_fields(&mut self, table: &str) -> DbResult<Vec<FieldInfo>> {
        if table.contains(',') || table.contains(')') {
            return Ok(Vec::new());
        }
        let name = table.split_whitespace().next().unwrap_or(table).to_string();
        if let Some(cached) = self.fields_cache.get(&name) {
            return Ok(cached.clone());
        }
        let sql = self.driver().fields_sql(&name);
        let rows = self.query(&sql, Vec::new(), false, false)?.into_rows();
        let fields = self.driver().parse_fields(&rows);
        self.fields_cache.insert(name, fields.clone());
        Ok(fields)
    }

    /// 各字段的绑定类型标签，按字段类型名推断。
    pub fn table_bind_types(&mut self, table: &str) -> DbResult<Vec<(String, BindType)>> {
        let driver = self.driver();
        Ok(self
            .table_fields(table)?
            .iter()
            .map(|f| (f.name.clone(), driver.field_bind_type(&f.type_name)))
            .collect())
    }

    /// 当前表的主键字段（联合主键取全部）。
    pub fn table_pk(&mut self, table: &str) -> DbResult<Vec<String>> {
        Ok(self
            .table_fields(table)?
            .iter()
            .filter(|f| f.primary)
            .map(|f| f.name.clone())
            .collect())
    }

    /// 释放当前所有预处理语句。
    pub fn free(&mut self) {
        for slot in self.slots.values_mut() {
            slot.stmt = None;
        }
        self.cursor_slot = None;
    }

    /// 关闭会话：释放全部缓存链接。
    pub fn close(&mut self) {
        self.free();
        self.slots.clear();
        self.active = None;
        self.write_slot = None;
        self.read_slot = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// 首个 SQL 关键字是否命中列表（存储过程检测等）。
fn first_keyword_is(sql: &str, keywords: &[&str]) -> bool {
    match sql.split_whitespace().next() {
        Some(word) => keywords.iter().any(|k| word.eq_ignore_ascii_case(k)),
        None => false,
    }
}

fn parse_savepoint(depth: u32) -> String {
    format!("SAVEPOINT trans{depth}")
}

fn parse_savepoint_rollback(depth: u32) -> String {
    format!("ROLLBACK TO SAVEPOINT trans{depth}")
}

/// 在指定槽位上完成 预处理 -> 绑定 -> 执行 -> 取数。
fn perform(
    slot: &mut Slot,
    sql: &str,
    binds: &[(String, BindValue)],
    procedure: bool,
    mode: &RunMode,
    kind: crate::config::ResultKind,
) -> Result<RunOutput, RunFailure> {
    // 语句文本变化时先释放旧句柄，再预处理新语句
    if slot
        .stmt
        .as_ref()
        .is_some_and(|prepared| prepared.sql != sql)
    {
        slot.stmt = None;
    }
    if slot.stmt.is_none() {
        let handle = slot.link.prepare(sql).map_err(RunFailure::Statement)?;
        slot.stmt = Some(PreparedStmt {
            sql: sql.to_string(),
            handle,
        });
    }
    let Some(prepared) = slot.stmt.as_mut() else {
        return Err(RunFailure::Statement(TransportError::new(
            "statement handle missing",
        )));
    };

    for (key, value) in binds {
        let param = param_ref(key);
        let bound = if procedure {
            prepared.handle.bind_param(param, value)
        } else {
            prepared.handle.bind_value(param, value)
        };
        bound.map_err(|e| RunFailure::Bind(key.clone(), e))?;
    }

    prepared.handle.execute().map_err(RunFailure::Statement)?;

    match mode {
        RunMode::Affected => Ok(RunOutput::Affected(prepared.handle.row_count())),
        RunMode::Cursor => Ok(RunOutput::Cursor),
        RunMode::Fetch => {
            if procedure {
                let mut sets = Vec::new();
                loop {
                    let rows = prepared.handle.fetch_all(kind).map_err(RunFailure::Statement)?;
                    if !rows.is_empty() {
                        sets.push(rows);
                    }
                    if !prepared.handle.next_rowset().map_err(RunFailure::Statement)? {
                        break;
                    }
                }
                Ok(RunOutput::Sets(sets))
            } else {
                let rows = prepared.handle.fetch_all(kind).map_err(RunFailure::Statement)?;
                Ok(RunOutput::Rows(rows))
            }
        }
    }
}
