//! Query compiler.
//!
//! Compiles an ordered list of [`QueryTerm`]s against one secondary index
//! into a parameterized `SELECT` of physical ids, with stable ordering,
//! offset pagination and quarantine filtering.

use sea_query::{Alias, Expr, Query, SelectStatement, SimpleExpr, Value};

use super::binding::{bind_attribute_value, bind_id_value};
use super::cursor::decode_token;
use super::naming::column_name;
use super::IndexTarget;
use crate::error::{Result, StoreError};
use crate::schema::{FieldValue, IndexAttribute, Schema, SortDirection, ID_ATTRIBUTE};
use crate::storage::schema::{KeyValues, FLAG_NO, FLAG_YES, INDEX_ID_COLUMN, QUARANTINED_COLUMN};
use crate::storage::{BoundStatement, SqlDatabase};

/// Comparison operator of a query term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermValue {
    Scalar(FieldValue),
    List(Vec<FieldValue>),
}

/// One predicate over an index attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub field: String,
    pub operator: QueryOperator,
    pub value: TermValue,
}

impl QueryTerm {
    pub fn new(field: impl Into<String>, operator: QueryOperator, value: TermValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    fn scalar(field: impl Into<String>, operator: QueryOperator, value: impl Into<FieldValue>) -> Self {
        Self::new(field, operator, TermValue::Scalar(value.into()))
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::scalar(field, QueryOperator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::scalar(field, QueryOperator::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::scalar(field, QueryOperator::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::scalar(field, QueryOperator::Ge, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::scalar(field, QueryOperator::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::scalar(field, QueryOperator::Le, value)
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        Self::new(
            field,
            QueryOperator::In,
            TermValue::List(values.into_iter().map(Into::into).collect()),
        )
    }

    fn is_bound_eq(&self) -> bool {
        self.operator == QueryOperator::Eq
            && matches!(&self.value, TermValue::Scalar(v) if !v.is_null())
    }
}

/// Query against one secondary index.
#[derive(Debug, Clone, Default)]
pub struct IndexQuery {
    pub terms: Vec<QueryTerm>,
    pub direction: SortDirection,
    pub token: Option<String>,
    pub page_size: Option<u64>,
    pub include_quarantined: bool,
}

impl IndexQuery {
    pub fn new(terms: Vec<QueryTerm>) -> Self {
        Self {
            terms,
            ..Default::default()
        }
    }

    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn include_quarantined(mut self, include: bool) -> Self {
        self.include_quarantined = include;
        self
    }
}

/// A compiled read.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub statement: BoundStatement,
    /// Scan offset the statement starts at.
    pub offset: u64,
    /// Requested page size. The statement fetches one extra row.
    pub page_size: Option<u64>,
    /// Bounded unique-index lookup that must yield at most one row.
    pub unique_lookup: bool,
}

/// Compile `query` against the index described by `target`.
///
/// `unique_lookup_limit` bounds the fast-path lookup on unique indexes.
pub fn compile_index_query<DB: SqlDatabase>(
    target: IndexTarget<'_>,
    query: &IndexQuery,
    unique_lookup_limit: u64,
) -> Result<CompiledQuery> {
    let IndexTarget {
        type_name,
        schema,
        index,
        names,
    } = target;

    for term in &query.terms {
        if term.field != ID_ATTRIBUTE && index.attribute(&term.field).is_none() {
            return Err(StoreError::QueryValidation(format!(
                "'{}' not in index {type_name}.{}",
                term.field, index.name
            )));
        }
    }

    if index.unique {
        for column in index.value_attributes() {
            let eq_terms = terms_for(&query.terms, &column.name)
                .filter(|t| t.operator == QueryOperator::Eq)
                .count();
            if eq_terms != 1 {
                return Err(StoreError::QueryValidation(format!(
                    "unique index {type_name}.{} requires exactly one EQ term for '{}'",
                    index.name, column.name
                )));
            }
        }
    }

    let mut stmt = Query::select();
    stmt.column(Alias::new(INDEX_ID_COLUMN))
        .from(Alias::new(&names.table));

    if !query.include_quarantined {
        stmt.and_where(Expr::col(Alias::new(QUARANTINED_COLUMN)).eq(FLAG_NO));
    }

    // Declared order, then `id` when the index does not declare it.
    let implicit_id = IndexAttribute::ascending(ID_ATTRIBUTE);
    let columns = index
        .attributes
        .iter()
        .chain(index.attribute(ID_ATTRIBUTE).is_none().then_some(&implicit_id));

    for column in columns {
        for term in terms_for(&query.terms, &column.name) {
            stmt.and_where(term_condition(type_name, schema, column, term)?);
        }
    }

    let fast_path = index.unique
        && query.token.is_none()
        && index.attributes.iter().all(|column| {
            let mut terms = terms_for(&query.terms, &column.name);
            matches!((terms.next(), terms.next()), (Some(t), None) if t.is_bound_eq())
        });

    if fast_path {
        stmt.limit(unique_lookup_limit.clamp(1, MAX_LIMIT));
        return Ok(CompiledQuery {
            statement: DB::build_query(&stmt),
            offset: 0,
            page_size: None,
            unique_lookup: true,
        });
    }

    for column in index.value_attributes() {
        let direction = if column.sort_direction == query.direction {
            column.sort_direction
        } else {
            column.sort_direction.invert()
        };
        stmt.order_by(Alias::new(column_name(&column.name)), direction.order());
    }
    stmt.order_by(Alias::new(INDEX_ID_COLUMN), query.direction.order());

    let offset = paginate(&mut stmt, query.token.as_deref(), query.page_size)?;

    Ok(CompiledQuery {
        statement: DB::build_query(&stmt),
        offset,
        page_size: query.page_size,
        unique_lookup: false,
    })
}

/// Compile a listing of every record id of one type from the primary table.
///
/// Deleted records are never listed; quarantined ones only on request.
pub fn compile_full_scan_query<DB: SqlDatabase>(
    type_id: u32,
    direction: SortDirection,
    token: Option<&str>,
    page_size: Option<u64>,
    include_quarantined: bool,
) -> Result<CompiledQuery> {
    let mut stmt = Query::select();
    stmt.column(KeyValues::KeyId)
        .from(KeyValues::Table)
        .and_where(Expr::col(KeyValues::KeyType).eq(type_id));

    if include_quarantined {
        stmt.and_where(Expr::col(KeyValues::IsDeleted).ne(FLAG_YES));
    } else {
        stmt.and_where(Expr::col(KeyValues::IsDeleted).eq(FLAG_NO));
    }

    stmt.order_by(KeyValues::KeyId, direction.order());

    let offset = paginate(&mut stmt, token, page_size)?;

    Ok(CompiledQuery {
        statement: DB::build_query(&stmt),
        offset,
        page_size,
        unique_lookup: false,
    })
}

fn terms_for<'q>(terms: &'q [QueryTerm], field: &'q str) -> impl Iterator<Item = &'q QueryTerm> {
    terms.iter().filter(move |t| t.field == field)
}

/// Largest row limit the drivers can bind.
const MAX_LIMIT: u64 = i64::MAX as u64;

fn paginate(stmt: &mut SelectStatement, token: Option<&str>, page_size: Option<u64>) -> Result<u64> {
    let offset = token.map(decode_token).transpose()?.unwrap_or(0);

    match page_size {
        Some(0) => {
            return Err(StoreError::QueryValidation(
                "page size must be positive".to_string(),
            ));
        }
        Some(size) if size >= MAX_LIMIT => {
            return Err(StoreError::QueryValidation(format!(
                "page size must be below {MAX_LIMIT}"
            )));
        }
        // One extra row tells the caller another page exists.
        Some(size) => {
            stmt.limit(size + 1);
        }
        None if offset > 0 => {
            stmt.limit(MAX_LIMIT);
        }
        None => {}
    }

    if offset > 0 {
        stmt.offset(offset);
    }

    Ok(offset)
}

fn term_condition(
    type_name: &str,
    schema: &Schema,
    column: &IndexAttribute,
    term: &QueryTerm,
) -> Result<SimpleExpr> {
    let col = || {
        if column.is_id() {
            Expr::col(Alias::new(INDEX_ID_COLUMN))
        } else {
            Expr::col(Alias::new(column_name(&column.name)))
        }
    };
    let invalid = |msg: String| StoreError::QueryValidation(format!("{}: {msg}", term.field));

    let bind = |value: &FieldValue| -> Result<Value> {
        if column.is_id() {
            bind_id_value(type_name, value).map_err(invalid)
        } else {
            let attribute = schema.require_attribute(&column.name)?;
            bind_attribute_value(attribute, column, value).map_err(invalid)
        }
    };

    let null_comparison = |op: QueryOperator| invalid(format!("{op:?} cannot compare with null"));

    match (term.operator, &term.value) {
        (QueryOperator::In, TermValue::List(values)) => {
            if values.is_empty() || values.iter().any(FieldValue::is_null) {
                return Err(invalid("malformed IN list".to_string()));
            }
            let bound = values.iter().map(bind).collect::<Result<Vec<_>>>()?;
            Ok(col().is_in(bound))
        }
        (QueryOperator::In, TermValue::Scalar(_)) => Err(invalid("malformed IN list".to_string())),
        (op, TermValue::List(_)) => Err(invalid(format!("{op:?} takes a single value"))),
        (QueryOperator::Eq, TermValue::Scalar(FieldValue::Null)) => Ok(col().is_null()),
        (QueryOperator::Ne, TermValue::Scalar(FieldValue::Null)) => Ok(col().is_not_null()),
        (op, TermValue::Scalar(FieldValue::Null)) => Err(null_comparison(op)),
        (QueryOperator::Eq, TermValue::Scalar(value)) => Ok(col().eq(bind(value)?)),
        (QueryOperator::Ne, TermValue::Scalar(value)) => Ok(col().ne(bind(value)?)),
        (QueryOperator::Gt, TermValue::Scalar(value)) => Ok(col().gt(bind(value)?)),
        (QueryOperator::Ge, TermValue::Scalar(value)) => Ok(col().gte(bind(value)?)),
        (QueryOperator::Lt, TermValue::Scalar(value)) => Ok(col().lt(bind(value)?)),
        (QueryOperator::Le, TermValue::Scalar(value)) => Ok(col().lte(bind(value)?)),
    }
}
