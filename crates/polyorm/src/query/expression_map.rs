use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::QueryKind;
use super::alias::{Alias, AliasRegistry};
use super::condition::{Condition, WhereClause};
use crate::dialect::{Dialect, LockMode, OnLocked};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityObject, RelationMetadata};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nulls {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub expression: String,
    pub order: Order,
    pub nulls: Option<Nulls>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub selection: String,
    pub alias_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDirection {
    Inner,
    Left,
}

impl JoinDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// What a join reads.
#[derive(Debug, Clone)]
pub enum JoinTarget {
    /// `parent.property` of an already registered alias
    Relation {
        parent_alias: String,
        relation: RelationMetadata,
    },
    Entity(String),
    Table(String),
    SubQuery(String),
}

/// Where joined rows are hydrated into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMapping {
    pub parent_alias: String,
    pub property: String,
    pub many: bool,
}

#[derive(Debug, Clone)]
pub struct JoinAttribute {
    pub direction: JoinDirection,
    pub target: JoinTarget,
    pub alias: String,
    pub condition: Option<Condition>,
    /// Columns of the joined alias are part of the select list
    pub selected: bool,
    /// Explicit `*_and_map_one` / `*_and_map_many` target
    pub map_to: Option<JoinMapping>,
}

impl JoinAttribute {
    pub fn relation(&self) -> Option<&RelationMetadata> {
        match &self.target {
            JoinTarget::Relation { relation, .. } => Some(relation),
            _ => None,
        }
    }

    pub fn parent_alias(&self) -> Option<&str> {
        match &self.target {
            JoinTarget::Relation { parent_alias, .. } => Some(parent_alias),
            _ => self.map_to.as_ref().map(|m| m.parent_alias.as_str()),
        }
    }

    /// Alias of the junction table of a many-to-many join.
    pub fn junction_alias(&self) -> Option<String> {
        match &self.target {
            JoinTarget::Relation {
                parent_alias,
                relation,
            } if relation.junction.is_some() || relation.kind == crate::metadata::RelationKind::ManyToMany => {
                Some(format!("{parent_alias}_{}", self.alias))
            }
            _ => None,
        }
    }
}

/// Expected state of an optimistically locked entity.
#[derive(Debug, Clone, PartialEq)]
pub enum LockVersion {
    Version(i64),
    Date(DateTime<Utc>),
}

impl std::fmt::Display for LockVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Version(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

/// `ON CONFLICT ... DO UPDATE` / `ON DUPLICATE KEY UPDATE` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnUpdate {
    /// Columns overwritten from the proposed row
    pub columns: Vec<String>,
    /// Conflict target (unique columns)
    pub conflict_target: Vec<String>,
    pub skip_update_if_no_values_changed: bool,
}

/// Columns requested back from a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Returning {
    Columns(Vec<String>),
    Raw(String),
}

/// `load_relation_id_and_map` request.
#[derive(Debug, Clone)]
pub struct RelationIdAttribute {
    pub parent_alias: String,
    pub relation: RelationMetadata,
    /// Property of the parent entity receiving the ids
    pub map_to: String,
}

/// `load_relation_count_and_map` request.
#[derive(Debug, Clone)]
pub struct RelationCountAttribute {
    pub parent_alias: String,
    pub relation: RelationMetadata,
    pub map_to: String,
}

/// State of one in-progress query.
///
/// Parameter names are drawn from a counter that a derived child shares with
/// its parent, so a subquery or bracket never reuses a parent's name.
#[derive(Debug)]
pub struct ExpressionMap {
    pub dialect: Dialect,
    pub query_kind: QueryKind,
    pub aliases: AliasRegistry,
    pub wheres: Vec<WhereClause>,
    pub havings: Vec<WhereClause>,
    pub joins: Vec<JoinAttribute>,
    pub selects: Vec<SelectItem>,
    pub distinct: bool,
    pub order_bys: Vec<OrderBy>,
    pub group_bys: Vec<String>,
    pub parameters: HashMap<String, Value>,
    pub native_parameters: Vec<Value>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub lock_mode: Option<LockMode>,
    pub lock_version: Option<LockVersion>,
    pub lock_tables: Vec<String>,
    pub on_locked: Option<OnLocked>,
    pub cache: bool,
    pub cache_id: Option<String>,
    pub cache_duration: Option<Duration>,
    pub values_set: Vec<EntityObject>,
    /// `column = <sql>` assignments of an update, in call order
    pub assignments: Vec<(String, String)>,
    pub on_conflict: Option<String>,
    pub on_ignore: bool,
    pub on_update: Option<OnUpdate>,
    pub returning: Option<Returning>,
    pub update_entity: bool,
    pub use_transaction: bool,
    pub with_deleted: bool,
    pub call_listeners: bool,
    pub relation_id_attributes: Vec<RelationIdAttribute>,
    pub relation_count_attributes: Vec<RelationCountAttribute>,
    pub relation_property_path: Option<String>,
    pub of: Vec<serde_json::Value>,
    pub disable_escaping: bool,
    pub where_entities: Vec<EntityObject>,
    /// Raw condition ANDed to the user's wheres (second pagination phase)
    pub extra_where: Option<String>,
    /// Compiled SQL is wrapped in parentheses
    pub sub_query: bool,
    pub build_error: Option<OrmError>,
    counter: Arc<AtomicUsize>,
}

impl ExpressionMap {
    pub fn new(dialect: Dialect, query_kind: QueryKind) -> Self {
        Self {
            dialect,
            query_kind,
            aliases: AliasRegistry::new(),
            wheres: Vec::new(),
            havings: Vec::new(),
            joins: Vec::new(),
            selects: Vec::new(),
            distinct: false,
            order_bys: Vec::new(),
            group_bys: Vec::new(),
            parameters: HashMap::new(),
            native_parameters: Vec::new(),
            limit: None,
            offset: None,
            skip: None,
            take: None,
            lock_mode: None,
            lock_version: None,
            lock_tables: Vec::new(),
            on_locked: None,
            cache: false,
            cache_id: None,
            cache_duration: None,
            values_set: Vec::new(),
            assignments: Vec::new(),
            on_conflict: None,
            on_ignore: false,
            on_update: None,
            returning: None,
            update_entity: true,
            use_transaction: false,
            with_deleted: false,
            call_listeners: true,
            relation_id_attributes: Vec::new(),
            relation_count_attributes: Vec::new(),
            relation_property_path: None,
            of: Vec::new(),
            disable_escaping: false,
            where_entities: Vec::new(),
            extra_where: None,
            sub_query: false,
            build_error: None,
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Child state for a subquery or bracket.
    ///
    /// It sees the parent's aliases and joins and shares its parameter-name counter.
    pub fn derive_child(&self) -> Self {
        let mut child = Self::new(self.dialect, QueryKind::Select);
        child.aliases = self.aliases.clone();
        child.joins = self.joins.clone();
        child.counter = Arc::clone(&self.counter);
        child
    }

    /// Empty SELECT state for a subquery. Only the parameter-name counter is shared.
    pub fn derive_sub_query(&self) -> Self {
        let mut child = Self::new(self.dialect, QueryKind::Select);
        child.counter = Arc::clone(&self.counter);
        child.disable_escaping = self.disable_escaping;
        child.sub_query = true;
        child
    }

    /// Allocate a fresh parameter name.
    pub fn next_parameter_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("orm_param_{n}")
    }

    /// Store a value under a fresh name and return the name.
    pub fn bind(&mut self, value: Value) -> String {
        let name = self.next_parameter_name();
        self.parameters.insert(name.clone(), value);
        name
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.parameters.insert(name.into(), value);
    }

    pub fn merge_parameters(&mut self, parameters: HashMap<String, Value>) {
        self.parameters.extend(parameters);
    }

    /// Keep the first error; later fluent calls cannot hide it.
    pub fn fail(&mut self, err: OrmError) {
        if self.build_error.is_none() {
            self.build_error = Some(err);
        }
    }

    /// Record the error of a fluent call, if any.
    pub fn record<T>(&mut self, result: OrmResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }

    /// Deferred error of any earlier fluent call.
    pub fn check(&self) -> OrmResult<()> {
        match &self.build_error {
            Some(err) => Err(err.replicate()),
            None => Ok(()),
        }
    }

    /// Quote an identifier unless escaping was turned off.
    pub fn escape(&self, name: &str) -> String {
        if self.disable_escaping {
            name.to_string()
        } else {
            self.dialect.escape(name)
        }
    }

    pub fn main_alias(&self) -> OrmResult<&Alias> {
        self.aliases.main_alias()
    }

    /// Join registered under `alias`.
    pub fn find_join(&self, alias: &str) -> Option<&JoinAttribute> {
        self.joins.iter().find(|j| j.alias == alias)
    }

    /// Join of `parent.property`, if the relation was joined.
    pub fn find_relation_join(&self, parent: &str, property: &str) -> Option<&JoinAttribute> {
        self.joins.iter().find(|j| match &j.target {
            JoinTarget::Relation {
                parent_alias,
                relation,
            } => parent_alias == parent && relation.property_path == property,
            _ => false,
        })
    }

    /// Skip and take apply as LIMIT/OFFSET only when nothing is joined.
    pub fn effective_pagination(&self) -> (Option<u64>, Option<u64>) {
        if self.limit.is_none() && self.offset.is_none() && self.joins.is_empty() {
            (self.take, self.skip)
        } else {
            (self.limit, self.offset)
        }
    }

    /// Whether results need the distinct-id pagination pass.
    pub fn needs_two_phase_pagination(&self) -> bool {
        (self.skip.is_some() || self.take.is_some()) && !self.joins.is_empty()
    }
}

impl Clone for ExpressionMap {
    /// Independent copy: later parameters of the clone never affect the original.
    fn clone(&self) -> Self {
        Self {
            dialect: self.dialect,
            query_kind: self.query_kind,
            aliases: self.aliases.clone(),
            wheres: self.wheres.clone(),
            havings: self.havings.clone(),
            joins: self.joins.clone(),
            selects: self.selects.clone(),
            distinct: self.distinct,
            order_bys: self.order_bys.clone(),
            group_bys: self.group_bys.clone(),
            parameters: self.parameters.clone(),
            native_parameters: self.native_parameters.clone(),
            limit: self.limit,
            offset: self.offset,
            skip: self.skip,
            take: self.take,
            lock_mode: self.lock_mode,
            lock_version: self.lock_version.clone(),
            lock_tables: self.lock_tables.clone(),
            on_locked: self.on_locked,
            cache: self.cache,
            cache_id: self.cache_id.clone(),
            cache_duration: self.cache_duration,
            values_set: self.values_set.clone(),
            assignments: self.assignments.clone(),
            on_conflict: self.on_conflict.clone(),
            on_ignore: self.on_ignore,
            on_update: self.on_update.clone(),
            returning: self.returning.clone(),
            update_entity: self.update_entity,
            use_transaction: self.use_transaction,
            with_deleted: self.with_deleted,
            call_listeners: self.call_listeners,
            relation_id_attributes: self.relation_id_attributes.clone(),
            relation_count_attributes: self.relation_count_attributes.clone(),
            relation_property_path: self.relation_property_path.clone(),
            of: self.of.clone(),
            disable_escaping: self.disable_escaping,
            where_entities: self.where_entities.clone(),
            extra_where: self.extra_where.clone(),
            sub_query: self.sub_query,
            build_error: self.build_error.as_ref().map(OrmError::replicate),
            counter: Arc::new(AtomicUsize::new(self.counter.load(Ordering::Relaxed))),
        }
    }
}
