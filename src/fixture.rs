//! The fixture table and the closed set of statements issued against it.
//!
//! Every scenario works on one table:
//!
//! ```sql
//! create table auto1(id bigint primary key auto_increment, uk bigint unique key, v bigint);
//! ```
//!
//! `uk` is the key the workers partition on, `id` is assigned by the server
//! and therefore reflects the endpoint's auto-increment settings. The `ddl`
//! scenario adds, widens and drops one extra integer column.

use std::fmt;

pub const FIXTURE_TABLE: &str = "auto1";

/// Server variables the harness sets and reads back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemVariable {
    AutoIncrementIncrement,
    AutoIncrementOffset,
}

impl SystemVariable {
    pub fn name(self) -> &'static str {
        match self {
            SystemVariable::AutoIncrementIncrement => "auto_increment_increment",
            SystemVariable::AutoIncrementOffset => "auto_increment_offset",
        }
    }
}

impl fmt::Display for SystemVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Auto-increment step and start for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoIncrementParams {
    pub increment: i64,
    pub offset: i64,
}

impl AutoIncrementParams {
    pub const fn new(increment: i64, offset: i64) -> Self {
        Self { increment, offset }
    }

    /// MySQL accepts both values in `1..=65535`.
    pub fn validate(&self) -> Result<(), String> {
        for (var, value) in self.pairs() {
            if !(1..=65535).contains(&value) {
                return Err(format!("{var} must be within 1..=65535, got {value}"));
            }
        }
        Ok(())
    }

    pub fn get(&self, var: SystemVariable) -> i64 {
        match var {
            SystemVariable::AutoIncrementIncrement => self.increment,
            SystemVariable::AutoIncrementOffset => self.offset,
        }
    }

    pub fn pairs(&self) -> [(SystemVariable, i64); 2] {
        [
            (SystemVariable::AutoIncrementIncrement, self.increment),
            (SystemVariable::AutoIncrementOffset, self.offset),
        ]
    }

    /// Statements run on every new connection, and again whenever a pooled
    /// connection is reset, when the params are session scoped.
    pub fn session_setup_statements(&self) -> Vec<String> {
        vec![format!(
            "SET @@SESSION.auto_increment_increment = {}, @@SESSION.auto_increment_offset = {}",
            self.increment, self.offset
        )]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    Int,
    BigInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnConstraint {
    Default(i64),
    NotNull,
}

/// Type of the extra column raced by the `ddl` scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnType {
    pub width: IntWidth,
    pub constraint: ColumnConstraint,
}

impl ColumnType {
    pub const fn int_with_default(default: i64) -> Self {
        Self {
            width: IntWidth::Int,
            constraint: ColumnConstraint::Default(default),
        }
    }

    pub const fn int_not_null() -> Self {
        Self {
            width: IntWidth::Int,
            constraint: ColumnConstraint::NotNull,
        }
    }

    /// Same constraint, `bigint` storage.
    pub fn widened(&self) -> Self {
        Self {
            width: IntWidth::BigInt,
            constraint: self.constraint,
        }
    }

    /// Value an insert that omits the column gets, if any.
    pub fn default_value(&self) -> Option<i64> {
        match self.constraint {
            ColumnConstraint::Default(v) => Some(v),
            ColumnConstraint::NotNull => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = match self.width {
            IntWidth::Int => "int",
            IntWidth::BigInt => "bigint",
        };
        match self.constraint {
            ColumnConstraint::Default(v) => write!(f, "{width} default {v}"),
            ColumnConstraint::NotNull => write!(f, "{width} not null"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn widened(&self) -> Self {
        Self {
            name: self.name.clone(),
            ty: self.ty.widened(),
        }
    }
}

/// Every statement the harness executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    DropFixture,
    CreateFixture,
    /// Keyed insert used by the load generator.
    InsertKeyed { uk: i64, v: i64 },
    /// Insert-or-replace by unique key.
    Upsert { uk: i64, v: i64 },
    UpdateValue { uk: i64, v: i64 },
    DeleteKey { uk: i64 },
    /// Insert that leaves both `uk` and any extra column to their defaults.
    InsertPayload { v: i64 },
    /// Insert that names the raced extra column.
    InsertWithColumn { column: String, v: i64, c: i64 },
    AddColumn { column: ColumnSpec },
    ModifyColumn { column: ColumnSpec },
    DropColumn { column: String },
    SetGlobal { variable: SystemVariable, value: i64 },
}

/// Categories used for fault injection and statement accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Setup,
    Insert,
    Upsert,
    Update,
    Delete,
    RaceInsert,
    Ddl,
    Admin,
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::DropFixture | Statement::CreateFixture => StatementKind::Setup,
            Statement::InsertKeyed { .. } => StatementKind::Insert,
            Statement::Upsert { .. } => StatementKind::Upsert,
            Statement::UpdateValue { .. } => StatementKind::Update,
            Statement::DeleteKey { .. } => StatementKind::Delete,
            Statement::InsertPayload { .. } | Statement::InsertWithColumn { .. } => {
                StatementKind::RaceInsert
            }
            Statement::AddColumn { .. }
            | Statement::ModifyColumn { .. }
            | Statement::DropColumn { .. } => StatementKind::Ddl,
            Statement::SetGlobal { .. } => StatementKind::Admin,
        }
    }

    /// SQL text sent over the text protocol. Every value is an integer and
    /// is rendered inline.
    pub fn sql(&self) -> String {
        let t = FIXTURE_TABLE;
        match self {
            Statement::DropFixture => format!("drop table if exists {t}"),
            Statement::CreateFixture => format!(
                "create table {t}(id bigint primary key auto_increment, uk bigint unique key, v bigint)"
            ),
            Statement::InsertKeyed { uk, v } => {
                format!("insert into {t}(uk, v) values({uk}, {v})")
            }
            Statement::Upsert { uk, v } => format!("replace into {t}(uk, v) values({uk}, {v})"),
            Statement::UpdateValue { uk, v } => format!("update {t} set v = {v} where uk = {uk}"),
            Statement::DeleteKey { uk } => format!("delete from {t} where uk = {uk}"),
            Statement::InsertPayload { v } => format!("insert into {t}(v) values({v})"),
            Statement::InsertWithColumn { column, v, c } => {
                format!("insert into {t}(v, {column}) values({v}, {c})")
            }
            Statement::AddColumn { column } => {
                format!("alter table {t} add column {} {}", column.name, column.ty)
            }
            Statement::ModifyColumn { column } => {
                format!("alter table {t} modify column {} {}", column.name, column.ty)
            }
            Statement::DropColumn { column } => format!("alter table {t} drop column {column}"),
            Statement::SetGlobal { variable, value } => {
                format!("SET @@GLOBAL.{variable} = {value}")
            }
        }
    }
}

/// Queries that return a single integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarQuery {
    /// Session-visible value of a server variable.
    Variable(SystemVariable),
    /// Rows whose `id` lies on the configured auto-increment stride.
    CountOnStride(AutoIncrementParams),
    CountRows,
}

impl ScalarQuery {
    pub fn sql(&self) -> String {
        let t = FIXTURE_TABLE;
        match self {
            ScalarQuery::Variable(var) => format!("SELECT @@{var}"),
            ScalarQuery::CountOnStride(p) => format!(
                "select count(*) from {t} where (id - {}) % {} = 0",
                p.offset, p.increment
            ),
            ScalarQuery::CountRows => format!("select count(*) from {t}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widened_column_keeps_constraint() {
        let ty = ColumnType::int_with_default(1);
        assert_eq!(ty.to_string(), "int default 1");
        assert_eq!(ty.widened().to_string(), "bigint default 1");
        assert_eq!(ColumnType::int_not_null().widened().to_string(), "bigint not null");
    }

    #[test]
    fn ddl_statements_render_column_type() {
        let column = ColumnSpec::new("c42", ColumnType::int_not_null());
        assert_eq!(
            Statement::AddColumn { column: column.clone() }.sql(),
            "alter table auto1 add column c42 int not null"
        );
        assert_eq!(
            Statement::ModifyColumn {
                column: column.widened()
            }
            .sql(),
            "alter table auto1 modify column c42 bigint not null"
        );
        assert_eq!(
            Statement::DropColumn {
                column: "c42".to_string()
            }
            .sql(),
            "alter table auto1 drop column c42"
        );
    }

    #[test]
    fn values_are_rendered_inline() {
        assert_eq!(
            Statement::UpdateValue { uk: -7, v: 99 }.sql(),
            "update auto1 set v = 99 where uk = -7"
        );
        assert_eq!(
            Statement::InsertKeyed { uk: -3, v: 2 }.sql(),
            "insert into auto1(uk, v) values(-3, 2)"
        );
        assert_eq!(
            Statement::InsertWithColumn {
                column: "c5".to_string(),
                v: 1,
                c: i64::MAX,
            }
            .sql(),
            format!("insert into auto1(v, c5) values(1, {})", i64::MAX)
        );
    }

    #[test]
    fn stride_query_matches_offset_check() {
        let q = ScalarQuery::CountOnStride(AutoIncrementParams::new(3, 2));
        assert_eq!(q.sql(), "select count(*) from auto1 where (id - 2) % 3 = 0");
    }

    #[test]
    fn params_outside_mysql_range_are_rejected() {
        assert!(AutoIncrementParams::new(2, 1).validate().is_ok());
        assert!(AutoIncrementParams::new(0, 1).validate().is_err());
        assert!(AutoIncrementParams::new(2, 70000).validate().is_err());
    }
}
