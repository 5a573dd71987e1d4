//! Statement builders for the data access layer.
//!
//! Filters follow an "empty means absent" rule: a condition whose value is an
//! empty string, a number below one or an empty list never produces a clause.
//! Only an explicit [`Value::Null`] turns into `IS NULL`. Every builder emits
//! `?` placeholders with the values collected in [`Statement::params`], so
//! identical inputs always give byte-identical SQL.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    List(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Equal,
    In,
    IsNull,
    Absent,
}

impl Value {
    pub fn clause_kind(&self) -> ClauseKind {
        match self {
            Value::Null => ClauseKind::IsNull,
            Value::Int(v) if *v >= 1 => ClauseKind::Equal,
            Value::Text(s) if !s.trim().is_empty() => ClauseKind::Equal,
            Value::List(items) if !items.is_empty() => ClauseKind::In,
            _ => ClauseKind::Absent,
        }
    }

    /// Whether the value survives into an INSERT or UPDATE column list.
    fn is_storable(&self) -> bool {
        matches!(self.clause_kind(), ClauseKind::Equal | ClauseKind::IsNull)
    }

    fn flatten_into(&self, out: &mut Vec<Value>) {
        match self {
            Value::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
            other => out.push(other.clone()),
        }
    }

    fn literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::List(items) => items
                .iter()
                .map(Value::literal)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Int(if value { 1 } else { 0 })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

/// Raw SQL appended to the filter as-is, with its own bound values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    sql: String,
    params: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    fields: Vec<(String, Value)>,
    order: Option<String>,
    sort: Option<String>,
    limit: Option<u64>,
    custom: Vec<Fragment>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column filter. The `order`, `sort` and `limit` keys are taken
    /// out as modifiers and never become filters.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match key {
            "order" => {
                self.order = match value {
                    Value::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    _ => None,
                };
            }
            "sort" => {
                self.sort = match value {
                    Value::Text(s) => {
                        let upper = s.trim().to_ascii_uppercase();
                        matches!(upper.as_str(), "ASC" | "DESC").then_some(upper)
                    }
                    _ => None,
                };
            }
            "limit" => self.limit = numeric_limit(&value),
            _ => upsert(&mut self.fields, key, value),
        }
        self
    }

    pub fn order_by(self, column: &str) -> Self {
        self.with("order", column)
    }

    pub fn sort(self, direction: &str) -> Self {
        self.with("sort", direction)
    }

    pub fn limit(self, limit: u64) -> Self {
        self.with("limit", limit)
    }

    pub fn raw(self, sql: impl Into<String>) -> Self {
        self.raw_with(sql, Vec::new())
    }

    pub fn raw_with(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.custom.push(Fragment {
            sql: sql.into(),
            params,
        });
        self
    }
}

fn numeric_limit(value: &Value) -> Option<u64> {
    match value {
        Value::Int(v) if *v > 0 => Some(*v as u64),
        Value::Text(s) => s.trim().parse::<u64>().ok().filter(|v| *v > 0),
        _ => None,
    }
}

/// Column values for INSERT and UPDATE, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        upsert(&mut self.fields, column, value.into());
        self
    }

    pub fn columns(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn upsert(fields: &mut Vec<(String, Value)>, key: &str, value: Value) {
    if let Some(slot) = fields.iter_mut().find(|(k, _)| k == key) {
        slot.1 = value;
    } else {
        fields.push((key.to_string(), value));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Renders the statement with escaped literals in place of placeholders.
    /// Only meant for logs.
    pub fn inline(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut params = self.params.iter();
        let mut in_quote = false;
        for ch in self.sql.chars() {
            match ch {
                '\'' => {
                    in_quote = !in_quote;
                    out.push(ch);
                }
                '?' if !in_quote => match params.next() {
                    Some(value) => out.push_str(&value.literal()),
                    None => out.push(ch),
                },
                _ => out.push(ch),
            }
        }
        out
    }
}

pub struct InsertMany {
    pub statement: Statement,
    pub accepted: usize,
}

pub fn select(table: &str, conditions: &Conditions) -> Option<Statement> {
    if !is_identifier(table) {
        return None;
    }
    let mut sql = format!("SELECT * FROM {}", table);
    let mut params = Vec::new();
    let clauses = filter_clauses(conditions, &mut params)?;
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if let Some(order) = conditions.order.as_deref().filter(|c| is_identifier(c)) {
        sql.push_str(&format!(" ORDER BY {}", order));
        if let Some(sort) = &conditions.sort {
            sql.push_str(&format!(" {}", sort));
        }
    }
    if let Some(limit) = conditions.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Some(Statement { sql, params })
}

/// Returns `None` when no column survives, which callers treat as a no-op.
pub fn insert(table: &str, record: &Record) -> Option<Statement> {
    if !is_identifier(table) {
        return None;
    }
    let mut columns = Vec::new();
    let mut params = Vec::new();
    for (column, value) in &record.fields {
        if !value.is_storable() {
            continue;
        }
        if !is_identifier(column) {
            return None;
        }
        columns.push(column.as_str());
        params.push(value.clone());
    }
    if columns.is_empty() {
        return None;
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders(columns.len())
    );
    Some(Statement { sql, params })
}

/// Multi-row insert shaped by the first record. Records whose column list
/// differs from the first one (order included) are skipped, not reshaped.
pub fn insert_many(table: &str, records: &[Record]) -> Option<InsertMany> {
    if !is_identifier(table) {
        return None;
    }
    let keys = records.first()?.columns();
    if keys.is_empty() || keys.iter().any(|k| !is_identifier(k)) {
        return None;
    }
    let mut rows = Vec::new();
    let mut params = Vec::new();
    for record in records {
        if record.columns() != keys {
            continue;
        }
        if record.fields.iter().any(|(_, v)| matches!(v, Value::List(_))) {
            continue;
        }
        rows.push(format!("({})", placeholders(keys.len())));
        params.extend(record.fields.iter().map(|(_, v)| bulk_value(v)));
    }
    if rows.is_empty() {
        return None;
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        keys.join(", "),
        rows.join(", ")
    );
    Some(InsertMany {
        accepted: rows.len(),
        statement: Statement { sql, params },
    })
}

fn bulk_value(value: &Value) -> Value {
    match value {
        Value::Text(s) if s.is_empty() => Value::Null,
        Value::Text(s) => Value::Text(s.trim().to_string()),
        other => other.clone(),
    }
}

/// Rejects blanket updates: both the assignments and the filter must be
/// non-empty after the absent values are dropped.
pub fn update(table: &str, record: &Record, conditions: &Conditions) -> Option<Statement> {
    if !is_identifier(table) {
        return None;
    }
    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for (column, value) in &record.fields {
        if !value.is_storable() {
            continue;
        }
        if !is_identifier(column) {
            return None;
        }
        assignments.push(format!("{} = ?", column));
        params.push(value.clone());
    }
    let clauses = filter_clauses(conditions, &mut params)?;
    if assignments.is_empty() || clauses.is_empty() {
        return None;
    }
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        table,
        assignments.join(", "),
        clauses.join(" AND ")
    );
    Some(Statement { sql, params })
}

pub fn delete(table: &str, conditions: &Conditions) -> Option<Statement> {
    if !is_identifier(table) {
        return None;
    }
    let mut params = Vec::new();
    let clauses = filter_clauses(conditions, &mut params)?;
    if clauses.is_empty() {
        return None;
    }
    let sql = format!("DELETE FROM {} WHERE {}", table, clauses.join(" AND "));
    Some(Statement { sql, params })
}

fn filter_clauses(conditions: &Conditions, params: &mut Vec<Value>) -> Option<Vec<String>> {
    let mut clauses = Vec::new();
    for (column, value) in &conditions.fields {
        if !is_identifier(column) {
            return None;
        }
        match value.clause_kind() {
            ClauseKind::Equal => {
                clauses.push(format!("{} = ?", column));
                params.push(value.clone());
            }
            ClauseKind::In => {
                let mut items = Vec::new();
                value.flatten_into(&mut items);
                if items.is_empty() {
                    continue;
                }
                clauses.push(format!("{} IN ({})", column, placeholders(items.len())));
                params.extend(items);
            }
            ClauseKind::IsNull => clauses.push(format!("{} IS NULL", column)),
            ClauseKind::Absent => {}
        }
    }
    for fragment in &conditions.custom {
        if fragment.sql.trim().is_empty() {
            continue;
        }
        clauses.push(fragment.sql.clone());
        params.extend(fragment.params.iter().cloned());
    }
    Some(clauses)
}

pub(crate) fn placeholders(count: usize) -> String {
    std::iter::repeat("?")
        .take(count)
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
