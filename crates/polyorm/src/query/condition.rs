//! Query condition types for WHERE and HAVING clauses.
//!
//! User input comes in as [`Op`], [`FindWhere`], [`RawCondition`] or
//! [`Brackets`] (collected in a [`WhereInput`]). The builders lower every form
//! into a [`Condition`] tree whose values are already bound to named
//! parameters, and the tree is rendered at compile time.

use std::collections::HashMap;

use super::alias::AliasRegistry;
use super::expression_map::ExpressionMap;
use super::replace::replace_property_names_in;
use super::where_builder::WhereExpression;
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{ColumnMetadata, EntityObject};
use crate::value::Value;

/// Query operator for building conditions.
///
/// # Example
/// ```ignore
/// use polyorm::Op;
///
/// Op::eq("value");
/// Op::gte(100);
/// Op::ilike("%timber%");
/// Op::in_list([1, 2, 3]);
/// Op::not(Op::is_null());
/// Op::raw("{col} > NOW() - {0}::interval").param("1 day");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Equal: column = value
    Eq(Value),
    /// Not equal: column != value
    Ne(Value),
    /// Greater than: column > value
    Gt(Value),
    /// Greater than or equal: column >= value
    Gte(Value),
    /// Less than: column < value
    Lt(Value),
    /// Less than or equal: column <= value
    Lte(Value),
    /// LIKE pattern match
    Like(Value),
    /// Case-insensitive LIKE (`UPPER(..) LIKE UPPER(..)` where ILIKE is missing)
    Ilike(Value),
    /// IN (list); an empty list matches nothing
    In(Vec<Value>),
    /// BETWEEN a AND b
    Between(Value, Value),
    /// IS NULL
    IsNull,
    /// column = ANY(array)
    Any(Vec<Value>),
    /// Array contains: column @> value
    ArrayContains(Value),
    /// Array is contained by: column <@ value
    ArrayContainedBy(Value),
    /// Arrays overlap: column && value
    ArrayOverlap(Value),
    /// SQL template; `{col}` is the column, `{0}`, `{1}`.. the parameters
    Raw { template: String, params: Vec<Value> },
    /// Negation of another operator
    Not(Box<Op>),
    /// Every operator must hold
    And(Vec<Op>),
    /// Any operator must hold
    Or(Vec<Op>),
}

impl Op {
    /// Create an equality condition.
    pub fn eq(val: impl Into<Value>) -> Self {
        Op::Eq(val.into())
    }

    /// Create a not-equal condition.
    pub fn ne(val: impl Into<Value>) -> Self {
        Op::Ne(val.into())
    }

    /// Create a greater-than condition.
    pub fn gt(val: impl Into<Value>) -> Self {
        Op::Gt(val.into())
    }

    /// Create a greater-than-or-equal condition.
    pub fn gte(val: impl Into<Value>) -> Self {
        Op::Gte(val.into())
    }

    /// Create a less-than condition.
    pub fn lt(val: impl Into<Value>) -> Self {
        Op::Lt(val.into())
    }

    /// Create a less-than-or-equal condition.
    pub fn lte(val: impl Into<Value>) -> Self {
        Op::Lte(val.into())
    }

    /// Create a LIKE pattern match condition.
    pub fn like(val: impl Into<Value>) -> Self {
        Op::Like(val.into())
    }

    /// Create a case-insensitive pattern match condition.
    pub fn ilike(val: impl Into<Value>) -> Self {
        Op::Ilike(val.into())
    }

    /// Create a NOT LIKE pattern match condition.
    pub fn not_like(val: impl Into<Value>) -> Self {
        Op::Not(Box::new(Op::Like(val.into())))
    }

    /// Create an IS NULL condition.
    pub fn is_null() -> Self {
        Op::IsNull
    }

    /// Create an IS NOT NULL condition.
    pub fn is_not_null() -> Self {
        Op::Not(Box::new(Op::IsNull))
    }

    /// Create an IN condition.
    pub fn in_list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Op::In(values.into_iter().map(Into::into).collect())
    }

    /// Create a NOT IN condition.
    pub fn not_in<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Op::Not(Box::new(Op::in_list(values)))
    }

    /// Create a BETWEEN condition.
    pub fn between(from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Op::Between(from.into(), to.into())
    }

    /// Create an `= ANY(..)` condition.
    pub fn any<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Op::Any(values.into_iter().map(Into::into).collect())
    }

    pub fn array_contains(val: impl Into<Value>) -> Self {
        Op::ArrayContains(val.into())
    }

    pub fn array_contained_by(val: impl Into<Value>) -> Self {
        Op::ArrayContainedBy(val.into())
    }

    pub fn array_overlap(val: impl Into<Value>) -> Self {
        Op::ArrayOverlap(val.into())
    }

    /// Create a raw template condition. Add parameters with [`Op::param`].
    pub fn raw(template: impl Into<String>) -> Self {
        Op::Raw {
            template: template.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter to a raw template. No effect on other operators.
    pub fn param(mut self, value: impl Into<Value>) -> Self {
        if let Op::Raw { params, .. } = &mut self {
            params.push(value.into());
        }
        self
    }

    pub fn not(op: Op) -> Self {
        Op::Not(Box::new(op))
    }

    pub fn and(ops: Vec<Op>) -> Self {
        Op::And(ops)
    }

    pub fn or(ops: Vec<Op>) -> Self {
        Op::Or(ops)
    }

    /// Bind every value to a fresh parameter of `map`.
    ///
    /// Values compared against a known column are coerced for that column first.
    pub(crate) fn bind(self, map: &mut ExpressionMap, column: Option<&ColumnMetadata>) -> BoundOp {
        let dialect = map.dialect;
        let prepare = |value: Value| match column {
            Some(column) if !value.is_null() => dialect.prepare_persistent_value(column, &value.to_json()),
            _ => value,
        };

        match self {
            Op::Eq(v) => BoundOp::Eq(map.bind(prepare(v))),
            Op::Ne(v) => BoundOp::Ne(map.bind(prepare(v))),
            Op::Gt(v) => BoundOp::Gt(map.bind(prepare(v))),
            Op::Gte(v) => BoundOp::Gte(map.bind(prepare(v))),
            Op::Lt(v) => BoundOp::Lt(map.bind(prepare(v))),
            Op::Lte(v) => BoundOp::Lte(map.bind(prepare(v))),
            Op::Like(v) => BoundOp::Like(map.bind(v)),
            Op::Ilike(v) => BoundOp::Ilike(map.bind(v)),
            Op::In(values) if values.is_empty() => BoundOp::EmptyIn,
            Op::In(values) => {
                let values = values.into_iter().map(prepare).collect();
                BoundOp::In(map.bind(Value::Array(values)))
            }
            Op::Between(from, to) => {
                let from = map.bind(prepare(from));
                let to = map.bind(prepare(to));
                BoundOp::Between(from, to)
            }
            Op::IsNull => BoundOp::IsNull,
            Op::Any(values) => BoundOp::Any(map.bind(Value::Array(values))),
            Op::ArrayContains(v) => BoundOp::ArrayContains(map.bind(v)),
            Op::ArrayContainedBy(v) => BoundOp::ArrayContainedBy(map.bind(v)),
            Op::ArrayOverlap(v) => BoundOp::ArrayOverlap(map.bind(v)),
            Op::Raw { template, params } => {
                let mut sql = template;
                for (index, value) in params.into_iter().enumerate() {
                    let name = map.bind(value);
                    sql = sql.replace(&format!("{{{index}}}"), &format!(":{name}"));
                }
                BoundOp::Raw(sql)
            }
            Op::Not(inner) => BoundOp::Not(Box::new(inner.bind(map, column))),
            Op::And(ops) => BoundOp::And(ops.into_iter().map(|op| op.bind(map, column)).collect()),
            Op::Or(ops) => BoundOp::Or(ops.into_iter().map(|op| op.bind(map, column)).collect()),
        }
    }
}

/// One entry of a [`FindWhere`].
#[derive(Debug, Clone, PartialEq)]
pub enum FindValue {
    Value(Value),
    Op(Op),
    Nested(FindWhere),
}

/// Property-keyed conditions, ANDed together.
///
/// Keys are property paths of the entity behind the alias. A nested entry
/// either descends into an embedded property or filters a relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindWhere {
    pub(crate) entries: Vec<(String, FindValue)>,
}

impl FindWhere {
    pub fn new() -> Self {
        Self::default()
    }

    /// `property = value`
    pub fn eq(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((property.into(), FindValue::Value(value.into())));
        self
    }

    /// `property IS NULL`
    pub fn null(mut self, property: impl Into<String>) -> Self {
        self.entries.push((property.into(), FindValue::Value(Value::Null)));
        self
    }

    pub fn op(mut self, property: impl Into<String>, op: Op) -> Self {
        self.entries.push((property.into(), FindValue::Op(op)));
        self
    }

    pub fn nested(mut self, property: impl Into<String>, inner: FindWhere) -> Self {
        self.entries.push((property.into(), FindValue::Nested(inner)));
        self
    }

    /// Build from a JSON object; nested objects become nested conditions.
    pub fn from_object(object: &EntityObject) -> Self {
        let entries = object
            .iter()
            .map(|(key, value)| {
                let entry = match value {
                    serde_json::Value::Object(inner) => FindValue::Nested(FindWhere::from_object(inner)),
                    other => FindValue::Value(Value::from_json(other)),
                };
                (key.clone(), entry)
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hand-written SQL condition with its named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCondition {
    pub(crate) sql: String,
    pub(crate) params: HashMap<String, Value>,
    /// Emitted as-is, without property name translation
    pub(crate) opaque: bool,
}

impl RawCondition {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: HashMap::new(),
            opaque: false,
        }
    }

    /// Condition whose text is never rewritten.
    pub fn opaque(sql: impl Into<String>) -> Self {
        Self {
            opaque: true,
            ..Self::new(sql)
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

impl From<&str> for RawCondition {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for RawCondition {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// Shorthand for [`RawCondition::new`].
pub fn raw(sql: impl Into<String>) -> RawCondition {
    RawCondition::new(sql)
}

/// A parenthesized group of conditions built by a closure.
pub struct Brackets<'a> {
    pub(crate) negate: bool,
    pub(crate) build: Box<dyn FnOnce(&mut WhereExpression) + 'a>,
}

impl<'a> Brackets<'a> {
    /// `( ... )`
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&mut WhereExpression) + 'a,
    {
        Self {
            negate: false,
            build: Box::new(build),
        }
    }

    /// `NOT( ... )`
    pub fn not<F>(build: F) -> Self
    where
        F: FnOnce(&mut WhereExpression) + 'a,
    {
        Self {
            negate: true,
            build: Box::new(build),
        }
    }
}

impl std::fmt::Debug for Brackets<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brackets").field("negate", &self.negate).finish()
    }
}

/// Anything accepted by `where_`, `and_where`, `or_where` and the HAVING methods.
#[derive(Debug)]
pub enum WhereInput<'a> {
    Raw(RawCondition),
    Find(FindWhere),
    /// Alternatives, ORed
    AnyOf(Vec<FindWhere>),
    Brackets(Brackets<'a>),
}

impl From<&str> for WhereInput<'_> {
    fn from(sql: &str) -> Self {
        WhereInput::Raw(RawCondition::new(sql))
    }
}

impl From<String> for WhereInput<'_> {
    fn from(sql: String) -> Self {
        WhereInput::Raw(RawCondition::new(sql))
    }
}

impl From<RawCondition> for WhereInput<'_> {
    fn from(raw: RawCondition) -> Self {
        WhereInput::Raw(raw)
    }
}

impl From<FindWhere> for WhereInput<'_> {
    fn from(find: FindWhere) -> Self {
        WhereInput::Find(find)
    }
}

impl From<Vec<FindWhere>> for WhereInput<'_> {
    fn from(any: Vec<FindWhere>) -> Self {
        WhereInput::AnyOf(any)
    }
}

impl<'a> From<Brackets<'a>> for WhereInput<'a> {
    fn from(brackets: Brackets<'a>) -> Self {
        WhereInput::Brackets(brackets)
    }
}

/// An operator whose values are bound to parameter names.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundOp {
    Eq(String),
    Ne(String),
    Gt(String),
    Gte(String),
    Lt(String),
    Lte(String),
    Like(String),
    Ilike(String),
    /// `IN (:...name)`
    In(String),
    /// Numeric literals inlined into `IN (..)`
    InLiteral(Vec<String>),
    EmptyIn,
    Between(String, String),
    IsNull,
    Any(String),
    ArrayContains(String),
    ArrayContainedBy(String),
    ArrayOverlap(String),
    Raw(String),
    Not(Box<BoundOp>),
    And(Vec<BoundOp>),
    Or(Vec<BoundOp>),
}

/// Lowered condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// SQL text whose `alias.property` references are translated at render time
    Raw(String),
    /// SQL text emitted verbatim
    Opaque(String),
    Predicate {
        alias: Option<String>,
        column: String,
        op: BoundOp,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Group { clauses: Vec<WhereClause>, negate: bool },
    /// Matches nothing
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereKind {
    Simple,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub kind: WhereKind,
    pub condition: Condition,
}

/// What a condition needs to know to render itself.
pub(crate) struct RenderContext<'a> {
    pub dialect: Dialect,
    pub aliases: &'a AliasRegistry,
    /// Qualify columns with their alias; off for UPDATE and DELETE targets
    pub prefix_alias: bool,
    pub escaping: bool,
}

impl<'a> RenderContext<'a> {
    pub fn new(map: &'a ExpressionMap, prefix_alias: bool) -> Self {
        Self {
            dialect: map.dialect,
            aliases: &map.aliases,
            prefix_alias,
            escaping: !map.disable_escaping,
        }
    }

    pub fn escape(&self, name: &str) -> String {
        if self.escaping {
            self.dialect.escape(name)
        } else {
            name.to_string()
        }
    }
}

/// Join clauses with their AND/OR connectors; the first connector is dropped.
pub(crate) fn render_clauses(clauses: &[WhereClause], ctx: &RenderContext<'_>) -> OrmResult<String> {
    let mut out = String::new();
    for (index, clause) in clauses.iter().enumerate() {
        let rendered = clause.condition.render(ctx)?;
        if index > 0 {
            match clause.kind {
                WhereKind::Or => out.push_str(" OR "),
                WhereKind::And | WhereKind::Simple => out.push_str(" AND "),
            }
        }
        out.push_str(&rendered);
    }
    Ok(out)
}

impl Condition {
    pub(crate) fn render(&self, ctx: &RenderContext<'_>) -> OrmResult<String> {
        match self {
            Condition::Raw(sql) => Ok(replace_property_names_in(sql, ctx.dialect, ctx.aliases, ctx.prefix_alias)),
            Condition::Opaque(sql) => Ok(sql.clone()),
            Condition::Predicate { alias, column, op } => {
                let column = match alias {
                    Some(alias) if ctx.prefix_alias => format!("{}.{}", ctx.escape(alias), ctx.escape(column)),
                    _ => ctx.escape(column),
                };
                render_op(op, &column, ctx.dialect)
            }
            Condition::And(items) => {
                let parts = items
                    .iter()
                    .map(|item| item.render(ctx))
                    .collect::<OrmResult<Vec<_>>>()?;
                Ok(parts.join(" AND "))
            }
            Condition::Or(items) => {
                let parts = items
                    .iter()
                    .map(|item| item.render(ctx))
                    .collect::<OrmResult<Vec<_>>>()?;
                Ok(wrap_any(parts))
            }
            Condition::Group { clauses, negate } => {
                let inner = if clauses.is_empty() {
                    "1=1".to_string()
                } else {
                    render_clauses(clauses, ctx)?
                };
                if *negate {
                    Ok(format!("NOT({inner})"))
                } else {
                    Ok(format!("({inner})"))
                }
            }
            Condition::False => Ok("0=1".to_string()),
        }
    }
}

fn wrap_any(parts: Vec<String>) -> String {
    match parts.len() {
        0 => "0=1".to_string(),
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => format!("({})", parts.join(" OR ")),
    }
}

fn render_op(op: &BoundOp, col: &str, dialect: Dialect) -> OrmResult<String> {
    let array_op = |symbol: &str, name: &str| {
        if dialect.supports_array_operators() {
            Ok(format!("{col} {symbol} :{name}"))
        } else {
            Err(OrmError::unsupported(dialect.name(), format!("array operator {symbol}")))
        }
    };

    Ok(match op {
        BoundOp::Eq(p) => format!("{col} = :{p}"),
        BoundOp::Ne(p) => format!("{col} != :{p}"),
        BoundOp::Gt(p) => format!("{col} > :{p}"),
        BoundOp::Gte(p) => format!("{col} >= :{p}"),
        BoundOp::Lt(p) => format!("{col} < :{p}"),
        BoundOp::Lte(p) => format!("{col} <= :{p}"),
        BoundOp::Like(p) => format!("{col} LIKE :{p}"),
        BoundOp::Ilike(p) if dialect.supports_ilike() => format!("{col} ILIKE :{p}"),
        BoundOp::Ilike(p) => format!("UPPER({col}) LIKE UPPER(:{p})"),
        BoundOp::In(p) => format!("{col} IN (:...{p})"),
        BoundOp::InLiteral(values) => format!("{col} IN ({})", values.join(", ")),
        BoundOp::EmptyIn => "0=1".to_string(),
        BoundOp::Between(a, b) => format!("{col} BETWEEN :{a} AND :{b}"),
        BoundOp::IsNull => format!("{col} IS NULL"),
        BoundOp::Any(p) => {
            if dialect.supports_array_operators() {
                format!("{col} = ANY(:{p})")
            } else {
                return Err(OrmError::unsupported(dialect.name(), "ANY operator"));
            }
        }
        BoundOp::ArrayContains(p) => array_op("@>", p)?,
        BoundOp::ArrayContainedBy(p) => array_op("<@", p)?,
        BoundOp::ArrayOverlap(p) => array_op("&&", p)?,
        BoundOp::Raw(template) => template.replace("{col}", col),
        BoundOp::Not(inner) => match inner.as_ref() {
            BoundOp::Eq(p) => format!("{col} != :{p}"),
            BoundOp::IsNull => format!("{col} IS NOT NULL"),
            BoundOp::Like(p) => format!("{col} NOT LIKE :{p}"),
            BoundOp::Ilike(p) if dialect.supports_ilike() => format!("{col} NOT ILIKE :{p}"),
            BoundOp::Ilike(p) => format!("UPPER({col}) NOT LIKE UPPER(:{p})"),
            BoundOp::In(p) => format!("{col} NOT IN (:...{p})"),
            BoundOp::InLiteral(values) => format!("{col} NOT IN ({})", values.join(", ")),
            BoundOp::Between(a, b) => format!("{col} NOT BETWEEN :{a} AND :{b}"),
            other => format!("NOT({})", render_op(other, col, dialect)?),
        },
        BoundOp::And(ops) => ops
            .iter()
            .map(|op| render_op(op, col, dialect))
            .collect::<OrmResult<Vec<_>>>()?
            .join(" AND "),
        BoundOp::Or(ops) => wrap_any(
            ops.iter()
                .map(|op| render_op(op, col, dialect))
                .collect::<OrmResult<Vec<_>>>()?,
        ),
    })
}
