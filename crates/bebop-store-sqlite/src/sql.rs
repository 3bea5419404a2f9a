//! Lowering of [`Predicate`] trees to SQLite `WHERE` clauses.
//!
//! The clause refers to the `events` table under the alias `e` and uses
//! positional `?` placeholders; the returned values bind in order.

use bebop_core::predicate::{ChildColumn, ChildTable, Comparison, EventField, Op, Operand, Predicate};
use rusqlite::types::Value;

#[derive(Debug, Default)]
pub struct Clause {
  pub sql:    String,
  pub params: Vec<Value>,
}

pub fn lower(predicate: &Predicate) -> Clause {
  let mut clause = Clause::default();
  clause.push_predicate(predicate);
  clause
}

fn child_table(table: ChildTable) -> (&'static str, &'static str, &'static str) {
  match table {
    ChildTable::Params => ("event_params", "param_name", "param_value"),
    ChildTable::Claims => ("event_claims", "claim_name", "claim_value"),
  }
}

impl Clause {
  fn push_predicate(&mut self, predicate: &Predicate) {
    match predicate {
      Predicate::Always => self.sql.push('1'),
      Predicate::And(parts) => self.push_joined(parts, " AND ", "1"),
      Predicate::Or(parts) => self.push_joined(parts, " OR ", "0"),
      Predicate::Not(inner) => {
        self.sql.push_str("NOT (");
        self.push_predicate(inner);
        self.sql.push(')');
      }
      Predicate::Compare(c) => {
        let column = match c.field {
          EventField::EventName => "e.event_name",
          EventField::CreatedAt => "e.created_at",
        };
        self.push_comparison(column, c.op, &c.operand);
      }
      Predicate::ChildExists { table, row } => {
        let (name, ..) = child_table(*table);
        self.sql.push_str("EXISTS (SELECT 1 FROM ");
        self.sql.push_str(name);
        self.sql.push_str(" c WHERE c.event_id = e.event_id");
        for c in row {
          self.sql.push_str(" AND ");
          self.push_child_comparison(*table, c);
        }
        self.sql.push(')');
      }
      Predicate::ChildMatchAll { rows, .. } if rows.is_empty() => self.sql.push('1'),
      Predicate::ChildMatchAll { table, rows } => {
        let (name, name_column, _) = child_table(*table);
        self.sql.push_str("e.event_id IN (SELECT c.event_id FROM ");
        self.sql.push_str(name);
        self.sql.push_str(" c WHERE ");
        for (i, group) in rows.iter().enumerate() {
          if i > 0 {
            self.sql.push_str(" OR ");
          }
          self.sql.push('(');
          for (j, c) in group.iter().enumerate() {
            if j > 0 {
              self.sql.push_str(" AND ");
            }
            self.push_child_comparison(*table, c);
          }
          self.sql.push(')');
        }
        self.sql.push_str(&format!(
          " GROUP BY c.event_id HAVING COUNT(DISTINCT c.{name_column}) = {})",
          rows.len()
        ));
      }
    }
  }

  fn push_joined(&mut self, parts: &[Predicate], separator: &str, empty: &str) {
    if parts.is_empty() {
      self.sql.push_str(empty);
      return;
    }
    self.sql.push('(');
    for (i, part) in parts.iter().enumerate() {
      if i > 0 {
        self.sql.push_str(separator);
      }
      self.push_predicate(part);
    }
    self.sql.push(')');
  }

  fn push_child_comparison(&mut self, table: ChildTable, c: &Comparison<ChildColumn>) {
    let (_, name_column, value_column) = child_table(table);
    let column = match c.field {
      ChildColumn::Name => format!("c.{name_column}"),
      ChildColumn::Value => format!("c.{value_column}"),
      ChildColumn::NumericValue => format!("CAST(c.{value_column} AS REAL)"),
    };
    self.push_comparison(&column, c.op, &c.operand);
  }

  fn push_comparison(&mut self, column: &str, op: Op, operand: &Operand) {
    if let Operand::List(items) = operand {
      if op != Op::In || items.is_empty() {
        self.sql.push('0');
        return;
      }
      self.sql.push_str(column);
      self.sql.push_str(" IN (");
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          self.sql.push_str(", ");
        }
        self.sql.push('?');
        self.params.push(Value::Text(item.clone()));
      }
      self.sql.push(')');
      return;
    }

    let symbol = match op {
      Op::Eq => "=",
      Op::Neq => "!=",
      Op::Gte => ">=",
      Op::Lte => "<=",
      // `in` always carries a list operand.
      Op::In => {
        self.sql.push('0');
        return;
      }
    };
    self.sql.push_str(column);
    self.sql.push(' ');
    self.sql.push_str(symbol);
    self.sql.push_str(" ?");
    self.params.push(match operand {
      Operand::Text(t) => Value::Text(t.clone()),
      Operand::Number(n) => Value::Real(*n),
      Operand::Timestamp(t) => Value::Integer(*t),
      Operand::List(_) => Value::Null,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn name_eq(v: &str) -> Comparison<ChildColumn> {
    Comparison::new(ChildColumn::Name, Op::Eq, Operand::Text(v.into()))
  }

  #[test]
  fn always_is_true() {
    let clause = lower(&Predicate::Always);
    assert_eq!(clause.sql, "1");
    assert!(clause.params.is_empty());
  }

  #[test]
  fn empty_disjunction_is_false() {
    assert_eq!(lower(&Predicate::Or(vec![])).sql, "0");
  }

  #[test]
  fn event_fields_bind_in_order() {
    let clause = lower(&Predicate::And(vec![
      Predicate::Compare(Comparison::new(EventField::EventName, Op::In, Operand::List(vec!["a".into(), "b".into()]))),
      Predicate::Compare(Comparison::new(EventField::CreatedAt, Op::Gte, Operand::Timestamp(5))),
    ]));
    assert_eq!(clause.sql, "(e.event_name IN (?, ?) AND e.created_at >= ?)");
    assert_eq!(clause.params, vec![
      Value::Text("a".into()),
      Value::Text("b".into()),
      Value::Integer(5),
    ]);
  }

  #[test]
  fn child_exists_is_correlated() {
    let clause = lower(&Predicate::Not(Box::new(Predicate::ChildExists {
      table: ChildTable::Claims,
      row:   vec![name_eq("tenant"), Comparison::new(ChildColumn::Value, Op::Eq, Operand::Text("a".into()))],
    })));
    assert_eq!(
      clause.sql,
      "NOT (EXISTS (SELECT 1 FROM event_claims c WHERE c.event_id = e.event_id \
       AND c.claim_name = ? AND c.claim_value = ?))"
    );
  }

  #[test]
  fn match_all_counts_distinct_names() {
    let clause = lower(&Predicate::ChildMatchAll {
      table: ChildTable::Params,
      rows:  vec![
        vec![name_eq("a"), Comparison::new(ChildColumn::NumericValue, Op::Eq, Operand::Number(1.0))],
        vec![name_eq("b"), Comparison::new(ChildColumn::NumericValue, Op::Eq, Operand::Number(2.0))],
      ],
    });
    assert_eq!(
      clause.sql,
      "e.event_id IN (SELECT c.event_id FROM event_params c WHERE \
       (c.param_name = ? AND CAST(c.param_value AS REAL) = ?) OR \
       (c.param_name = ? AND CAST(c.param_value AS REAL) = ?) \
       GROUP BY c.event_id HAVING COUNT(DISTINCT c.param_name) = 2)"
    );
    assert_eq!(clause.params.len(), 4);
  }

  #[test]
  fn empty_membership_matches_nothing() {
    let clause = lower(&Predicate::Compare(Comparison::new(
      EventField::EventName,
      Op::In,
      Operand::List(vec![]),
    )));
    assert_eq!(clause.sql, "0");
  }
}
