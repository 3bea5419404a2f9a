//! Storage-independent predicate trees and the filter compiler.
//!
//! [`compile`] lowers an [`EventFilter`] into a [`Predicate`] using the
//! catalog to resolve parameter kinds and recognized claims. Backends lower
//! the tree to their native query language; [`Predicate::matches`] evaluates
//! it against an in-memory [`Event`] with the same semantics.
//!
//! Child-table conditions come in two shapes:
//!
//! - [`Predicate::ChildExists`]: the event has at least one child row
//!   satisfying every comparison in `row`.
//! - [`Predicate::ChildMatchAll`]: each group in `rows` names one distinct
//!   child (its first comparison is `Name = <name>`), and the event must have
//!   a matching row for every group. Backends express this as "group matching
//!   rows by event, require the distinct matched names to equal the number of
//!   groups", since children are stored one row per name.

use std::collections::HashSet;

use crate::{
  catalog::{Catalog, ParamKind},
  error::QueryError,
  event::{Event, ParamValue},
  filter::{
    ClaimCondition, EventFilter, FlatParamCondition, NameCondition, ParamCondition,
    TimeCondition, TypeCondition,
  },
};

/// Filters nested deeper than this are rejected.
pub const MAX_DEPTH: usize = 32;

// ─── Tree ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
  EventName,
  /// Unix milliseconds.
  CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildTable {
  Params,
  Claims,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildColumn {
  Name,
  Value,
  /// The stored text value cast to a real number.
  NumericValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Eq,
  Neq,
  Gte,
  Lte,
  In,
}

impl Op {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Eq => "eq",
      Self::Neq => "neq",
      Self::Gte => "gte",
      Self::Lte => "lte",
      Self::In => "in",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
  Text(String),
  Number(f64),
  Timestamp(i64),
  List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison<F> {
  pub field:   F,
  pub op:      Op,
  pub operand: Operand,
}

impl<F> Comparison<F> {
  pub fn new(field: F, op: Op, operand: Operand) -> Self { Self { field, op, operand } }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
  Always,
  And(Vec<Predicate>),
  Or(Vec<Predicate>),
  Not(Box<Predicate>),
  Compare(Comparison<EventField>),
  ChildExists {
    table: ChildTable,
    row:   Vec<Comparison<ChildColumn>>,
  },
  ChildMatchAll {
    table: ChildTable,
    rows:  Vec<Vec<Comparison<ChildColumn>>>,
  },
}

impl Predicate {
  /// Conjunction with `Always` terms removed and singletons unwrapped.
  pub fn and(parts: Vec<Predicate>) -> Predicate {
    let parts: Vec<Predicate> = parts
      .into_iter()
      .filter(|p| !matches!(p, Predicate::Always))
      .collect();
    match <[Predicate; 1]>::try_from(parts) {
      Ok([single]) => single,
      Err(parts) if parts.is_empty() => Predicate::Always,
      Err(parts) => Predicate::And(parts),
    }
  }

  pub fn not(inner: Predicate) -> Predicate { Predicate::Not(Box::new(inner)) }

  /// Evaluate against a fully loaded event.
  pub fn matches(&self, event: &Event) -> bool {
    match self {
      Self::Always => true,
      Self::And(parts) => parts.iter().all(|p| p.matches(event)),
      Self::Or(parts) => parts.iter().any(|p| p.matches(event)),
      Self::Not(inner) => !inner.matches(event),
      Self::Compare(c) => match c.field {
        EventField::EventName => compare_text(&event.event_name, c.op, &c.operand),
        EventField::CreatedAt => match c.operand {
          Operand::Timestamp(t) => compare_ord(event.created_at.timestamp_millis(), c.op, t),
          _ => false,
        },
      },
      Self::ChildExists { table, row } => child_rows(event, *table)
        .any(|(name, value)| row.iter().all(|c| c.matches_row(name, value))),
      Self::ChildMatchAll { table, rows } => {
        let matched: HashSet<&str> = child_rows(event, *table)
          .filter(|(name, value)| {
            rows
              .iter()
              .any(|group| group.iter().all(|c| c.matches_row(name, value)))
          })
          .map(|(name, _)| name)
          .collect();
        matched.len() == rows.len()
      }
    }
  }
}

impl Comparison<ChildColumn> {
  fn matches_row(&self, name: &str, value: &str) -> bool {
    match self.field {
      ChildColumn::Name => compare_text(name, self.op, &self.operand),
      ChildColumn::Value => compare_text(value, self.op, &self.operand),
      ChildColumn::NumericValue => match self.operand {
        Operand::Number(n) => compare_ord(text_as_real(value), self.op, n),
        _ => false,
      },
    }
  }
}

fn child_rows(event: &Event, table: ChildTable) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
  match table {
    ChildTable::Params => Box::new(
      event
        .params
        .iter()
        .map(|p| (p.param_name.as_str(), p.param_value.as_str())),
    ),
    ChildTable::Claims => Box::new(
      event
        .claims
        .iter()
        .map(|c| (c.claim_name.as_str(), c.claim_value.as_str())),
    ),
  }
}

fn compare_text(value: &str, op: Op, operand: &Operand) -> bool {
  match (op, operand) {
    (Op::In, Operand::List(list)) => list.iter().any(|item| item == value),
    (_, Operand::Text(t)) => compare_ord(value, op, t.as_str()),
    _ => false,
  }
}

fn compare_ord<T: PartialOrd>(value: T, op: Op, operand: T) -> bool {
  match op {
    Op::Eq => value == operand,
    Op::Neq => value != operand,
    Op::Gte => value >= operand,
    Op::Lte => value <= operand,
    Op::In => false,
  }
}

/// Text to real with SQLite `CAST(x AS REAL)` semantics: the longest numeric
/// prefix after leading whitespace, or `0.0` when there is none.
pub fn text_as_real(text: &str) -> f64 {
  let text = text.trim_start();
  let end = text
    .find(|c: char| !matches!(c, '0'..='9' | '+' | '-' | '.' | 'e' | 'E'))
    .unwrap_or(text.len());
  let mut candidate = &text[..end];
  while !candidate.is_empty() {
    if let Ok(n) = candidate.parse::<f64>() {
      return n;
    }
    candidate = &candidate[..candidate.len() - 1];
  }
  0.0
}

// ─── Compiler ────────────────────────────────────────────────────────────────

/// Compile `filter` into a predicate.
///
/// Conditions that reference event types, parameters, or claims unknown to
/// `catalog` contribute nothing, so filters written against a newer
/// configuration keep working.
pub fn compile(filter: &EventFilter, catalog: &Catalog) -> Result<Predicate, QueryError> {
  compile_at(filter, catalog, 0)
}

fn compile_at(filter: &EventFilter, catalog: &Catalog, depth: usize) -> Result<Predicate, QueryError> {
  if depth > MAX_DEPTH {
    return Err(QueryError::TooDeep(MAX_DEPTH));
  }

  let mut parts = Vec::new();

  if let Some(c) = &filter.event_name {
    parts.push(event_name(c)?);
  }
  if let Some(c) = &filter.event_type {
    parts.push(event_type(c)?);
  }
  if let Some(c) = &filter.created_at {
    parts.push(created_at(c)?);
  }
  for (name, c) in &filter.claims {
    parts.push(claim(catalog, name, c)?);
  }
  for (event_type, block) in &filter.params {
    parts.push(param_block(catalog, event_type, block)?);
  }
  for (name, c) in &filter.params_flat {
    parts.push(flat_param(catalog, name, c)?);
  }

  if !filter.and.is_empty() {
    let nested = filter
      .and
      .iter()
      .map(|f| compile_at(f, catalog, depth + 1))
      .collect::<Result<Vec<_>, _>>()?;
    parts.push(Predicate::and(nested));
  }
  if !filter.or.is_empty() {
    let nested = filter
      .or
      .iter()
      .map(|f| compile_at(f, catalog, depth + 1))
      .collect::<Result<Vec<_>, _>>()?;
    parts.push(Predicate::Or(nested));
  }
  if let Some(inner) = &filter.not {
    parts.push(Predicate::not(compile_at(inner, catalog, depth + 1)?));
  }

  Ok(Predicate::and(parts))
}

fn event_name(c: &NameCondition) -> Result<Predicate, QueryError> {
  let compare = |op, operand| Predicate::Compare(Comparison::new(EventField::EventName, op, operand));
  let mut parts = Vec::new();
  if let Some(v) = &c.eq {
    parts.push(compare(Op::Eq, Operand::Text(v.clone())));
  }
  if let Some(v) = &c.neq {
    parts.push(compare(Op::Neq, Operand::Text(v.clone())));
  }
  if let Some(list) = &c.in_ {
    if list.is_empty() {
      return Err(QueryError::EmptyInList("eventName".into()));
    }
    parts.push(compare(Op::In, Operand::List(list.clone())));
  }
  non_empty(parts, "eventName")
}

fn event_type(c: &TypeCondition) -> Result<Predicate, QueryError> {
  match &c.eq {
    Some(v) => Ok(Predicate::Compare(Comparison::new(
      EventField::EventName,
      Op::Eq,
      Operand::Text(v.clone()),
    ))),
    None => Err(QueryError::EmptyCondition("eventType".into())),
  }
}

fn created_at(c: &TimeCondition) -> Result<Predicate, QueryError> {
  let parts = [(Op::Eq, c.eq), (Op::Neq, c.neq), (Op::Gte, c.gte), (Op::Lte, c.lte)]
    .into_iter()
    .filter_map(|(op, v)| {
      v.map(|t| Predicate::Compare(Comparison::new(EventField::CreatedAt, op, Operand::Timestamp(t))))
    })
    .collect();
  non_empty(parts, "createdAt")
}

fn claim(catalog: &Catalog, name: &str, c: &ClaimCondition) -> Result<Predicate, QueryError> {
  let field = format!("claims.{name}");
  if c.eq.is_none() && c.neq.is_none() {
    return Err(QueryError::EmptyCondition(field));
  }
  if !catalog.is_claim(name) {
    return Ok(Predicate::Always);
  }

  let exists = |value: &str| Predicate::ChildExists {
    table: ChildTable::Claims,
    row:   vec![name_is(name), Comparison::new(ChildColumn::Value, Op::Eq, Operand::Text(value.to_owned()))],
  };

  let mut parts = Vec::new();
  if let Some(v) = &c.eq {
    parts.push(exists(v));
  }
  if let Some(v) = &c.neq {
    parts.push(Predicate::not(exists(v)));
  }
  Ok(Predicate::and(parts))
}

fn param_block(
  catalog: &Catalog,
  event_type: &str,
  block: &std::collections::BTreeMap<String, ParamCondition>,
) -> Result<Predicate, QueryError> {
  let definition = catalog.event_type(event_type);

  let mut groups = Vec::new();
  let mut negatives = Vec::new();
  for (name, c) in block {
    let field = format!("params.{event_type}.{name}");
    if c.is_empty() {
      return Err(QueryError::EmptyCondition(field));
    }
    // Operands are checked even when the parameter is unknown.
    let kind = definition.and_then(|d| d.param(name)).map(|p| p.kind);
    let ops = ParamOps { eq: c.eq.as_ref(), gte: c.gte.as_ref(), lte: c.lte.as_ref(), in_: None };
    let row = positive_row(name, kind.unwrap_or(ParamKind::String), &ops, &field)?;
    let negative = c
      .neq
      .as_ref()
      .map(|v| value_eq(kind.unwrap_or(ParamKind::String), v, &field, Op::Neq))
      .transpose()?;

    if kind.is_none() {
      continue;
    }
    if let Some(row) = row {
      groups.push(row);
    }
    if let Some(cmp) = negative {
      negatives.push(Predicate::not(Predicate::ChildExists {
        table: ChildTable::Params,
        row:   vec![name_is(name), cmp],
      }));
    }
  }

  if definition.is_none() {
    return Ok(Predicate::Always);
  }

  let mut parts = vec![Predicate::Compare(Comparison::new(
    EventField::EventName,
    Op::Eq,
    Operand::Text(event_type.to_owned()),
  ))];
  match <[Vec<Comparison<ChildColumn>>; 1]>::try_from(groups) {
    Ok([row]) => parts.push(Predicate::ChildExists { table: ChildTable::Params, row }),
    Err(groups) if groups.is_empty() => {}
    Err(rows) => parts.push(Predicate::ChildMatchAll { table: ChildTable::Params, rows }),
  }
  parts.extend(negatives);
  Ok(Predicate::and(parts))
}

fn flat_param(catalog: &Catalog, name: &str, c: &FlatParamCondition) -> Result<Predicate, QueryError> {
  let field = format!("paramsFlat.{name}");
  if c.is_empty() {
    return Err(QueryError::EmptyCondition(field));
  }
  let kind = catalog.flat_param(name).map(|p| p.kind);
  let ops = ParamOps {
    eq:  c.eq.as_ref(),
    gte: c.gte.as_ref(),
    lte: c.lte.as_ref(),
    in_: c.in_.as_deref(),
  };
  let row = positive_row(name, kind.unwrap_or(ParamKind::String), &ops, &field)?;
  let negative = c
    .neq
    .as_ref()
    .map(|v| value_eq(kind.unwrap_or(ParamKind::String), v, &field, Op::Neq))
    .transpose()?;

  if kind.is_none() {
    return Ok(Predicate::Always);
  }

  let mut parts = Vec::new();
  if let Some(row) = row {
    parts.push(Predicate::ChildExists { table: ChildTable::Params, row });
  }
  if let Some(cmp) = negative {
    parts.push(Predicate::not(Predicate::ChildExists {
      table: ChildTable::Params,
      row:   vec![name_is(name), cmp],
    }));
  }
  Ok(Predicate::and(parts))
}

struct ParamOps<'a> {
  eq:  Option<&'a ParamValue>,
  gte: Option<&'a ParamValue>,
  lte: Option<&'a ParamValue>,
  in_: Option<&'a [String]>,
}

/// All positive operators on one parameter, folded into a single row
/// condition. `None` when the parameter has only negative operators.
fn positive_row(
  name: &str,
  kind: ParamKind,
  ops: &ParamOps<'_>,
  field: &str,
) -> Result<Option<Vec<Comparison<ChildColumn>>>, QueryError> {
  let mut row = vec![name_is(name)];
  if let Some(v) = ops.eq {
    row.push(value_eq(kind, v, field, Op::Eq)?);
  }
  if let Some(v) = ops.gte {
    row.push(numeric(v, field, Op::Gte)?);
  }
  if let Some(v) = ops.lte {
    row.push(numeric(v, field, Op::Lte)?);
  }
  if let Some(list) = ops.in_ {
    if list.is_empty() {
      return Err(QueryError::EmptyInList(field.to_owned()));
    }
    row.push(Comparison::new(ChildColumn::Value, Op::In, Operand::List(list.to_vec())));
  }
  Ok((row.len() > 1).then_some(row))
}

/// Equality (or inequality) on a stored value, numeric or textual by kind.
fn value_eq(
  kind: ParamKind,
  value: &ParamValue,
  field: &str,
  op: Op,
) -> Result<Comparison<ChildColumn>, QueryError> {
  match kind {
    ParamKind::Numeric => numeric(value, field, op).map(|mut c| {
      // Negated existence is expressed as NOT EXISTS(... = v).
      c.op = Op::Eq;
      c
    }),
    ParamKind::String => Ok(Comparison::new(
      ChildColumn::Value,
      Op::Eq,
      Operand::Text(value.to_stored_text()),
    )),
  }
}

fn numeric(value: &ParamValue, field: &str, op: Op) -> Result<Comparison<ChildColumn>, QueryError> {
  let n = value.as_number().ok_or_else(|| QueryError::NonNumericOperand {
    field: field.to_owned(),
    op:    op.as_str(),
  })?;
  Ok(Comparison::new(ChildColumn::NumericValue, op, Operand::Number(n)))
}

fn name_is(name: &str) -> Comparison<ChildColumn> {
  Comparison::new(ChildColumn::Name, Op::Eq, Operand::Text(name.to_owned()))
}

fn non_empty(parts: Vec<Predicate>, field: &str) -> Result<Predicate, QueryError> {
  if parts.is_empty() {
    Err(QueryError::EmptyCondition(field.to_owned()))
  } else {
    Ok(Predicate::and(parts))
  }
}
