//! 测试用传输层：脚本化的内存后端，记录全部链路交互。

use crate::config::{Config, ResultKind};
use crate::transport::{
    Link, ParamRef, Row, Statement, Transport, TransportError, TransportResult,
};
use crate::value::BindValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub(crate) type MockStateRef = Rc<RefCell<MockState>>;

/// 可脚本化的后端状态与事件日志。
#[derive(Default)]
pub(crate) struct MockState {
    /// 事件日志：`connect:<host>`、`prepare#<link>:<sql>`、
    /// `bind:<key>`、`execute#<link>:<sql>`、`exec#<link>:<sql>`、
    /// `begin#<link>`、`commit#<link>`、`rollback#<link>`。
    pub log: Vec<String>,
    /// 连接这些主机时直接失败。
    pub fail_connect_hosts: Vec<String>,
    /// SQL 含这些子串时 execute 报错。
    pub fail_execute: Vec<String>,
    /// SQL 含此子串时报“链路丢失”，次数用尽后恢复正常。
    pub lost_on_execute: HashMap<String, u32>,
    /// 绑定这些参数名时报错。
    pub fail_bind: Vec<String>,
    /// SQL 子串 -> 应答行。
    pub canned_rows: Vec<(String, Vec<Row>)>,
    /// SQL 子串 -> 多结果集应答（存储过程）。
    pub canned_sets: Vec<(String, Vec<Vec<Row>>)>,
    /// execute 之后 row_count 的返回值。
    pub affected: u64,
    pub last_insert_id: i64,
    next_link: usize,
}

impl MockState {
    pub fn new_ref() -> MockStateRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn events(&self, prefix: &str) -> Vec<String> {
        self.log
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }
}

pub(crate) struct MockTransport {
    state: MockStateRef,
}

impl MockTransport {
    pub fn new(state: MockStateRef) -> Box<dyn Transport> {
        Box::new(Self { state })
    }
}

impl Transport for MockTransport {
    fn connect(&self, config: &Config) -> TransportResult<Box<dyn Link>> {
        let mut state = self.state.borrow_mut();
        if state
            .fail_connect_hosts
            .iter()
            .any(|h| h == &config.hostname)
        {
            state.log.push(format!("connect-fail:{}", config.hostname));
            return Err(TransportError::new(format!(
                "refused: {}",
                config.hostname
            )));
        }
        let id = state.next_link;
        state.next_link += 1;
        state.log.push(format!("connect:{}", config.hostname));
        Ok(Box::new(MockLink {
            id,
            state: self.state.clone(),
        }))
    }
}

struct MockLink {
    id: usize,
    state: MockStateRef,
}

impl Link for MockLink {
    fn prepare(&mut self, sql: &str) -> TransportResult<Box<dyn Statement>> {
        let mut state = self.state.borrow_mut();
        state.log.push(format!("prepare#{}:{sql}", self.id));
        let sets = canned_for(&state, sql);
        Ok(Box::new(MockStatement {
            link: self.id,
            sql: sql.to_string(),
            state: self.state.clone(),
            sets,
            set_index: 0,
            row_index: 0,
        }))
    }

    fn exec(&mut self, sql: &str) -> TransportResult<u64> {
        let mut state = self.state.borrow_mut();
        state.log.push(format!("exec#{}:{sql}", self.id));
        if state.fail_execute.iter().any(|s| sql.contains(s.as_str())) {
            return Err(TransportError::new(format!("exec failed: {sql}")));
        }
        Ok(0)
    }

    fn begin(&mut self) -> TransportResult<()> {
        self.state.borrow_mut().log.push(format!("begin#{}", self.id));
        Ok(())
    }

    fn commit(&mut self) -> TransportResult<()> {
        self.state
            .borrow_mut()
            .log
            .push(format!("commit#{}", self.id));
        Ok(())
    }

    fn rollback(&mut self) -> TransportResult<()> {
        self.state
            .borrow_mut()
            .log
            .push(format!("rollback#{}", self.id));
        Ok(())
    }

    fn last_insert_id(&mut self, _sequence: Option<&str>) -> TransportResult<i64> {
        Ok(self.state.borrow().last_insert_id)
    }
}

fn canned_for(state: &MockState, sql: &str) -> Vec<Vec<Row>> {
    if let Some((_, sets)) = state
        .canned_sets
        .iter()
        .find(|(pat, _)| sql.contains(pat.as_str()))
    {
        return sets.clone();
    }
    if let Some((_, rows)) = state
        .canned_rows
        .iter()
        .find(|(pat, _)| sql.contains(pat.as_str()))
    {
        return vec![rows.clone()];
    }
    vec![Vec::new()]
}

struct MockStatement {
    link: usize,
    sql: String,
    state: MockStateRef,
    sets: Vec<Vec<Row>>,
    set_index: usize,
    row_index: usize,
}

impl Statement for MockStatement {
    fn bind_value(&mut self, param: ParamRef<'_>, value: &BindValue) -> TransportResult<()> {
        self.record_bind("bind", param, value)
    }

    fn bind_param(&mut self, param: ParamRef<'_>, value: &BindValue) -> TransportResult<()> {
        self.record_bind("bind-param", param, value)
    }

    fn execute(&mut self) -> TransportResult<()> {
        let mut state = self.state.borrow_mut();
        state.log.push(format!("execute#{}:{}", self.link, self.sql));

        let lost = state
            .lost_on_execute
            .iter_mut()
            .find(|(pat, left)| self.sql.contains(pat.as_str()) && **left > 0);
        if let Some((_, left)) = lost {
            *left -= 1;
            return Err(TransportError::lost("server has gone away"));
        }

        if state
            .fail_execute
            .iter()
            .any(|s| self.sql.contains(s.as_str()))
        {
            return Err(TransportError::with_code(
                format!("execute failed: {}", self.sql),
                1064,
            ));
        }
        self.set_index = 0;
        self.row_index = 0;
        Ok(())
    }

    fn row_count(&self) -> u64 {
        self.state.borrow().affected
    }

    fn fetch_all(&mut self, _kind: ResultKind) -> TransportResult<Vec<Row>> {
        let rows = self.sets.get(self.set_index).cloned().unwrap_or_default();
        self.row_index = rows.len();
        Ok(rows)
    }

    fn fetch_row(&mut self, _kind: ResultKind) -> TransportResult<Option<Row>> {
        let row = self
            .sets
            .get(self.set_index)
            .and_then(|rows| rows.get(self.row_index))
            .cloned();
        if row.is_some() {
            self.row_index += 1;
        }
        Ok(row)
    }

    fn next_rowset(&mut self) -> TransportResult<bool> {
        if self.set_index + 1 < self.sets.len() {
            self.set_index += 1;
            self.row_index = 0;
            return Ok(true);
        }
        Ok(false)
    }
}

impl MockStatement {
    fn record_bind(
        &mut self,
        kind: &str,
        param: ParamRef<'_>,
        value: &BindValue,
    ) -> TransportResult<()> {
        let key = match param {
            ParamRef::Named(name) => name.to_string(),
            ParamRef::Position(i) => i.to_string(),
        };
        let mut state = self.state.borrow_mut();
        if state.fail_bind.iter().any(|k| k == &key) {
            return Err(TransportError::new(format!("cannot bind '{key}'")));
        }
        state.log.push(format!("{kind}:{key}={value}"));
        Ok(())
    }
}
