use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::metadata::EntityMetadata;

/// Role of an alias inside one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasType {
    From,
    Join,
    Other,
}

/// A named reference to a table, subquery or joined relation.
#[derive(Debug, Clone)]
pub struct Alias {
    pub kind: AliasType,
    pub name: String,
    pub metadata: Option<Arc<EntityMetadata>>,
    pub table_path: Option<String>,
    pub sub_query: Option<String>,
}

impl Alias {
    /// Property paths are translated to column names only for aliases with metadata.
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn metadata(&self) -> OrmResult<&Arc<EntityMetadata>> {
        self.metadata
            .as_ref()
            .ok_or_else(|| OrmError::usage(format!("alias \"{}\" is not bound to an entity", self.name)))
    }

    /// Table or subquery this alias reads from, ready to follow FROM / JOIN.
    pub(crate) fn source_sql(&self, dialect: Dialect) -> String {
        if let Some(sub_query) = &self.sub_query {
            return sub_query.clone();
        }
        let path = self
            .table_path
            .clone()
            .or_else(|| self.metadata.as_ref().map(|m| m.table_path()))
            .unwrap_or_else(|| self.name.clone());
        dialect.escape_path(&path)
    }
}

/// What to register with [`AliasRegistry::create_alias`].
#[derive(Debug, Clone)]
pub struct AliasDescriptor {
    pub kind: AliasType,
    /// Generated from the table name when `None`
    pub name: Option<String>,
    pub metadata: Option<Arc<EntityMetadata>>,
    pub table_path: Option<String>,
    pub sub_query: Option<String>,
}

impl AliasDescriptor {
    pub fn new(kind: AliasType) -> Self {
        Self {
            kind,
            name: None,
            metadata: None,
            table_path: None,
            sub_query: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn entity(mut self, metadata: Arc<EntityMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn table(mut self, path: impl Into<String>) -> Self {
        self.table_path = Some(path.into());
        self
    }

    pub fn sub_query(mut self, sql: impl Into<String>) -> Self {
        self.sub_query = Some(sql.into());
        self
    }
}

/// Ordered, name-unique set of aliases with at most one main alias.
#[derive(Debug, Clone, Default)]
pub struct AliasRegistry {
    aliases: Vec<Alias>,
    main: Option<usize>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new alias.
    ///
    /// Fails with [`OrmError::DuplicateAlias`] when an explicit name is taken.
    pub fn create_alias(&mut self, descriptor: AliasDescriptor) -> OrmResult<&Alias> {
        let name = match descriptor.name {
            Some(name) => {
                if self.find(&name).is_some() {
                    return Err(OrmError::DuplicateAlias(name));
                }
                name
            }
            None => {
                let base = descriptor
                    .table_path
                    .as_deref()
                    .map(|path| path.rsplit('.').next().unwrap_or(path).to_string())
                    .or_else(|| descriptor.metadata.as_ref().map(|m| m.table_name.clone()))
                    .unwrap_or_else(|| "subquery".to_string());
                self.generate_name(&base)
            }
        };

        self.aliases.push(Alias {
            kind: descriptor.kind,
            name,
            metadata: descriptor.metadata,
            table_path: descriptor.table_path,
            sub_query: descriptor.sub_query,
        });
        let index = self.aliases.len() - 1;
        Ok(&self.aliases[index])
    }

    fn generate_name(&self, base: &str) -> String {
        let mut n = 1;
        loop {
            let candidate = format!("{base}_{n}");
            if self.find(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Make `name` the main alias. A second, different main alias is rejected.
    pub fn set_main_alias(&mut self, name: &str) -> OrmResult<()> {
        let index = self
            .aliases
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| OrmError::usage(format!("alias \"{name}\" is not registered")))?;
        match self.main {
            Some(current) if current != index => Err(OrmError::usage(format!(
                "main alias is already set to \"{}\"",
                self.aliases[current].name
            ))),
            _ => {
                self.main = Some(index);
                Ok(())
            }
        }
    }

    pub fn has_main_alias(&self) -> bool {
        self.main.is_some()
    }

    pub fn main_alias(&self) -> OrmResult<&Alias> {
        self.main
            .map(|index| &self.aliases[index])
            .ok_or(OrmError::MissingMainAlias)
    }

    pub fn find(&self, name: &str) -> Option<&Alias> {
        self.aliases.iter().find(|a| a.name == name)
    }

    pub fn get(&self, name: &str) -> OrmResult<&Alias> {
        self.find(name)
            .ok_or_else(|| OrmError::usage(format!("alias \"{name}\" is not registered")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.aliases.iter()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Drop every alias of the given kind (used when a query is re-targeted).
    pub(crate) fn remove_kind(&mut self, kind: AliasType) {
        let main_name = self.main.map(|index| self.aliases[index].name.clone());
        self.aliases.retain(|a| a.kind != kind);
        self.main = main_name.and_then(|name| self.aliases.iter().position(|a| a.name == name));
    }
}
