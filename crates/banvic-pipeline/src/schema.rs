//! Warehouse column typing and DDL generation
//!
//! Destination tables are recreated on every load, so their schema is
//! inferred from the landed values each time.

use crate::table::Table;

/// Postgres type chosen for a landed column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    DoublePrecision,
    Boolean,
    Text,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::DoublePrecision => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "TEXT",
        }
    }

    /// Narrowest type that accepts every non-null value
    ///
    /// Tried in order: BIGINT, DOUBLE PRECISION, BOOLEAN, TEXT. A column
    /// with no values at all is TEXT.
    pub fn infer<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let mut is_int = true;
        let mut is_float = true;
        let mut is_bool = true;
        let mut seen = false;

        for value in values.into_iter().flatten() {
            seen = true;
            let value = value.trim();
            is_int = is_int && value.parse::<i64>().is_ok();
            is_float = is_float && is_double_literal(value);
            is_bool = is_bool && (value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false"));

            if !is_int && !is_float && !is_bool {
                return ColumnType::Text;
            }
        }

        match (seen, is_int, is_float, is_bool) {
            (false, ..) => ColumnType::Text,
            (true, true, ..) => ColumnType::BigInt,
            (true, false, true, _) => ColumnType::DoublePrecision,
            (true, false, false, true) => ColumnType::Boolean,
            _ => ColumnType::Text,
        }
    }
}

/// Finite and representable as a Postgres DOUBLE PRECISION input
///
/// Rust rounds an underflowing literal such as `1e-400` to zero, which
/// Postgres rejects as out of range.
fn is_double_literal(value: &str) -> bool {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => v != 0.0 || !has_nonzero_mantissa(value),
        _ => false,
    }
}

fn has_nonzero_mantissa(value: &str) -> bool {
    value
        .split(['e', 'E'])
        .next()
        .is_some_and(|mantissa| mantissa.chars().any(|c| matches!(c, '1'..='9')))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

/// Infer one column definition per header field
pub fn infer_schema(table: &Table) -> Vec<ColumnDef> {
    table
        .columns()
        .iter()
        .enumerate()
        .map(|(index, name)| ColumnDef {
            name: name.clone(),
            ty: ColumnType::infer(table.column_values(index)),
        })
        .collect()
}

/// Quote an identifier for Postgres, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn create_table_sql(table: &str, columns: &[ColumnDef]) -> String {
    let columns = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_name()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(table), columns)
}
