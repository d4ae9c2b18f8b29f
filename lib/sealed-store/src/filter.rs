//! Field-value filters and their compilation to parameterized SQL.
//!
//! A [`Filter`] is an ordered list of [`FieldGroup`]s and a parallel list of
//! [`Operator`]s. Group `i` joins its own fields with `operators[i]` and is
//! joined to group `i + 1` with the same operator. Missing operators default
//! to `AND`.
//!
//! Compilation knows nothing about encryption: it works on field names and
//! values that have already been rewritten for search.

use serde_json::Value;

use crate::{Row, StorageError};

/// Boolean connective between comparisons and between groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    #[default]
    And,
    Or,
    /// "and not": `a NOT b` compiles to `a AND NOT b`.
    Not,
}

impl Operator {
    /// SQL text placed between two comparisons.
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "AND NOT",
        }
    }

    /// Parse an operator token (`AND`, `OR`, `NOT`, any case).
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "AND" => Some(Operator::And),
            "OR" => Some(Operator::Or),
            "NOT" => Some(Operator::Not),
            _ => None,
        }
    }
}

/// A chain of equality comparisons on one field: `v0 op1 v1 op2 v2 ...`.
///
/// The alternating literal form `[v, op, v, ..., v]` always has odd length;
/// this type cannot represent a dangling operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    first: Value,
    rest: Vec<(Operator, Value)>,
}

impl Chain {
    pub fn new(first: impl Into<Value>) -> Self {
        Self {
            first: first.into(),
            rest: Vec::new(),
        }
    }

    /// Append `op value` to the chain.
    pub fn then(mut self, op: Operator, value: impl Into<Value>) -> Self {
        self.rest.push((op, value.into()));
        self
    }

    pub fn or(self, value: impl Into<Value>) -> Self {
        self.then(Operator::Or, value)
    }

    pub fn and(self, value: impl Into<Value>) -> Self {
        self.then(Operator::And, value)
    }

    pub fn not(self, value: impl Into<Value>) -> Self {
        self.then(Operator::Not, value)
    }

    /// Parse the alternating literal form `[v, op, v, op, ..., v]`.
    ///
    /// Rejects empty and even-length sequences and non-operator tokens at odd
    /// positions. `null` is accepted at any value position.
    pub fn from_alternating(tokens: Vec<Value>) -> Result<Self, StorageError> {
        if tokens.is_empty() {
            return Err(StorageError::InvalidFilter(
                "empty value sequence".to_string(),
            ));
        }
        if tokens.len() % 2 == 0 {
            return Err(StorageError::InvalidFilter(format!(
                "value sequence must have odd length [v, op, ..., v], got {} elements",
                tokens.len()
            )));
        }

        let mut iter = tokens.into_iter();
        let mut chain = match iter.next() {
            Some(first) => Chain::new(first),
            None => return Err(StorageError::InvalidFilter("empty value sequence".to_string())),
        };

        while let (Some(token), Some(value)) = (iter.next(), iter.next()) {
            let op = token
                .as_str()
                .and_then(Operator::parse)
                .ok_or_else(|| StorageError::InvalidFilter(format!("not an operator: {}", token)))?;
            chain.rest.push((op, value));
        }

        Ok(chain)
    }

    /// Values in order, operators skipped.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        std::iter::once(&self.first).chain(self.rest.iter().map(|(_, value)| value))
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        std::iter::once(&mut self.first).chain(self.rest.iter_mut().map(|(_, value)| value))
    }

    pub fn operators(&self) -> impl Iterator<Item = Operator> + '_ {
        self.rest.iter().map(|(op, _)| *op)
    }
}

/// The condition placed on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field = value`, or `field IS NULL` when the value is null.
    Equals(Value),
    Chain(Chain),
}

impl Condition {
    /// Parse a caller literal: arrays are alternating chains, anything else equality.
    pub fn from_literal(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Array(tokens) => Ok(Condition::Chain(Chain::from_alternating(tokens)?)),
            other => Ok(Condition::Equals(other)),
        }
    }
}

/// Ordered field → condition mapping. Setting a field twice replaces it in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldGroup {
    fields: Vec<(String, Condition)>,
}

impl FieldGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.set(field.into(), condition);
        self
    }

    /// `field = value` (`IS NULL` for null).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Condition::Equals(value.into()))
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.condition(field, Condition::Equals(Value::Null))
    }

    pub fn chain(self, field: impl Into<String>, chain: Chain) -> Self {
        self.condition(field, Condition::Chain(chain))
    }

    /// Add a chain given in the alternating literal form.
    pub fn alternating(
        self,
        field: impl Into<String>,
        tokens: Vec<Value>,
    ) -> Result<Self, StorageError> {
        Ok(self.chain(field, Chain::from_alternating(tokens)?))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.fields.iter().map(|(name, cond)| (name.as_str(), cond))
    }

    pub fn get(&self, field: &str) -> Option<&Condition> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, cond)| cond)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Vec<(String, Condition)> {
        &mut self.fields
    }

    fn set(&mut self, field: String, condition: Condition) {
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = condition,
            None => self.fields.push((field, condition)),
        }
    }
}

impl TryFrom<Row> for FieldGroup {
    type Error = StorageError;

    /// Arrays are read as alternating chains.
    fn try_from(row: Row) -> Result<Self, Self::Error> {
        row.into_iter().try_fold(FieldGroup::new(), |group, (field, value)| {
            Ok(group.condition(field, Condition::from_literal(value)?))
        })
    }
}

/// One or more field groups with their operators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    groups: Vec<FieldGroup>,
    operators: Vec<Operator>,
}

impl Filter {
    /// The empty filter: matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// A single group joined with `AND`.
    pub fn new(group: FieldGroup) -> Self {
        Self::with_operator(group, Operator::And)
    }

    /// A single group joined with `operator`.
    pub fn with_operator(group: FieldGroup, operator: Operator) -> Self {
        Self {
            groups: vec![group],
            operators: vec![operator],
        }
    }

    /// Several groups with a parallel operator list. Missing operators default to `AND`.
    pub fn groups(groups: Vec<FieldGroup>, operators: Vec<Operator>) -> Self {
        Self { groups, operators }
    }

    /// Shorthand for a single `field = value` filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(FieldGroup::new().eq(field, value))
    }

    /// Append another group; `operator` joins its fields and follows it.
    pub fn push(mut self, group: FieldGroup, operator: Operator) -> Self {
        // Pad so the new group's operator lands at its own index.
        self.operators.resize(self.groups.len(), Operator::And);
        self.groups.push(group);
        self.operators.push(operator);
        self
    }

    pub fn field_groups(&self) -> &[FieldGroup] {
        &self.groups
    }

    /// Operator for group `idx`, `AND` when none was given.
    pub fn operator_at(&self, idx: usize) -> Operator {
        self.operators.get(idx).copied().unwrap_or_default()
    }

    /// True when the filter has no conditions at all.
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(FieldGroup::is_empty)
    }

    /// The first non-null equality value given for `field`, in group order.
    pub fn equality_value(&self, field: &str) -> Option<&Value> {
        self.groups
            .iter()
            .filter_map(|group| match group.get(field) {
                Some(Condition::Equals(value)) if !value.is_null() => Some(value),
                _ => None,
            })
            .next()
    }

    pub(crate) fn groups_mut(&mut self) -> &mut [FieldGroup] {
        &mut self.groups
    }
}

impl From<FieldGroup> for Filter {
    fn from(group: FieldGroup) -> Self {
        Filter::new(group)
    }
}

/// A compiled SQL fragment with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledClause {
    pub sql: String,
    pub params: Vec<Value>,
    /// The column each parameter is compared with or assigned to.
    pub columns: Vec<String>,
    /// The placeholder index the next fragment should start from.
    pub next_index: usize,
}

impl CompiledClause {
    fn empty(start_index: usize) -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            columns: Vec::new(),
            next_index: start_index,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Quote an identifier for PostgreSQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn push_comparison(clause: &mut String, field: &str, value: &Value, out: &mut CompiledClause) {
    if value.is_null() {
        clause.push_str(&format!("{} IS NULL", quote_ident(field)));
    } else {
        clause.push_str(&format!("{}=${}", quote_ident(field), out.next_index));
        out.params.push(value.clone());
        out.columns.push(field.to_string());
        out.next_index += 1;
    }
}

/// Compile one group, joining its fields with `operator`.
pub fn compile_group(group: &FieldGroup, operator: Operator, start_index: usize) -> CompiledClause {
    let mut out = CompiledClause::empty(start_index);
    let mut clauses = Vec::with_capacity(group.len());

    for (field, condition) in group.fields() {
        let mut clause = String::new();
        match condition {
            Condition::Equals(value) => {
                push_comparison(&mut clause, field, value, &mut out);
            }
            Condition::Chain(chain) => {
                push_comparison(&mut clause, field, &chain.first, &mut out);
                for (op, value) in &chain.rest {
                    clause.push(' ');
                    clause.push_str(op.as_sql());
                    clause.push(' ');
                    push_comparison(&mut clause, field, value, &mut out);
                }
            }
        }
        clauses.push(clause);
    }

    out.sql = clauses.join(&format!(" {} ", operator.as_sql()));
    out
}

/// Compile a filter into a WHERE body (without the `WHERE` keyword).
///
/// Placeholders start at `$start_index` and are numbered in field order
/// across all groups. When more than one group is non-empty each group is
/// parenthesized before being joined.
pub fn compile(filter: &Filter, start_index: usize) -> CompiledClause {
    let mut fragments: Vec<(String, Operator)> = Vec::new();
    let mut out = CompiledClause::empty(start_index);

    for (idx, group) in filter.groups.iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        let operator = filter.operator_at(idx);
        let compiled = compile_group(group, operator, out.next_index);
        out.next_index = compiled.next_index;
        out.params.extend(compiled.params);
        out.columns.extend(compiled.columns);
        fragments.push((compiled.sql, operator));
    }

    match fragments.len() {
        0 => out,
        1 => {
            let (sql, _) = fragments.remove(0);
            out.sql = sql;
            out
        }
        _ => {
            let mut sql = String::new();
            let mut previous: Option<Operator> = None;
            for (fragment, operator) in fragments {
                if let Some(op) = previous {
                    sql.push(' ');
                    sql.push_str(op.as_sql());
                    sql.push(' ');
                }
                sql.push('(');
                sql.push_str(&fragment);
                sql.push(')');
                previous = Some(operator);
            }
            out.sql = sql;
            out
        }
    }
}

/// Compile a `SET` list from a patch. Null values are written inline as `NULL`.
pub fn compile_assignments(patch: &Row, start_index: usize) -> CompiledClause {
    let mut out = CompiledClause::empty(start_index);

    let assignments: Vec<String> = patch
        .iter()
        .map(|(field, value)| {
            if value.is_null() {
                format!("{}=NULL", quote_ident(field))
            } else {
                let clause = format!("{}=${}", quote_ident(field), out.next_index);
                out.params.push(value.clone());
                out.columns.push(field.clone());
                out.next_index += 1;
                clause
            }
        })
        .collect();

    out.sql = assignments.join(", ");
    out
}
