//! Qualified names for database objects.

use std::fmt;

use crate::error::{QuiverError, Result};

/// The component delimiter in fully qualified names.
const DELIMITER: char = '.';

/// The wildcard character; only column components may carry it.
const WILDCARD: &str = "*";

/// A fully qualified name for a database object.
///
/// Names are a closed variant over the kinds of object the catalogue knows.
/// Components are lower-cased on construction and must not contain the
/// delimiter or wildcard characters, with one exception: a column component
/// may be `*` to match any column of its entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Name {
    /// The catalogue root
    Root,
    /// A registered function
    Function { function: String },
    /// A schema
    Schema { schema: String },
    /// An entity within a schema
    Entity { schema: String, entity: String },
    /// A named sequence within a schema
    Sequence { schema: String, sequence: String },
    /// An index on an entity
    Index {
        schema: String,
        entity: String,
        index: String,
    },
    /// A column of an entity
    Column {
        schema: String,
        entity: String,
        column: String,
    },
}

/// Validate and normalise one name component.
fn component(raw: &str, wildcard_ok: bool) -> Result<String> {
    let normalised = raw.to_lowercase();
    if normalised.is_empty() {
        return Err(QuiverError::schema("empty name component"));
    }
    if normalised == WILDCARD {
        if wildcard_ok {
            return Ok(normalised);
        }
        return Err(QuiverError::schema(
            "wildcard is only allowed in column names",
        ));
    }
    if normalised.contains(DELIMITER) || normalised.contains(WILDCARD) {
        return Err(QuiverError::schema(format!(
            "name component '{raw}' contains a reserved character"
        )));
    }
    Ok(normalised)
}

impl Name {
    /// Create a function name.
    pub fn function(function: &str) -> Result<Name> {
        Ok(Name::Function {
            function: component(function, false)?,
        })
    }

    /// Create a schema name.
    pub fn schema(schema: &str) -> Result<Name> {
        Ok(Name::Schema {
            schema: component(schema, false)?,
        })
    }

    /// Create an entity name.
    pub fn entity(schema: &str, entity: &str) -> Result<Name> {
        Ok(Name::Entity {
            schema: component(schema, false)?,
            entity: component(entity, false)?,
        })
    }

    /// Create a sequence name.
    pub fn sequence(schema: &str, sequence: &str) -> Result<Name> {
        Ok(Name::Sequence {
            schema: component(schema, false)?,
            sequence: component(sequence, false)?,
        })
    }

    /// Create an index name.
    pub fn index(schema: &str, entity: &str, index: &str) -> Result<Name> {
        Ok(Name::Index {
            schema: component(schema, false)?,
            entity: component(entity, false)?,
            index: component(index, false)?,
        })
    }

    /// Create a column name. The column component may be `*`.
    pub fn column(schema: &str, entity: &str, col: &str) -> Result<Name> {
        Ok(Name::Column {
            schema: component(schema, false)?,
            entity: component(entity, false)?,
            column: component(col, true)?,
        })
    }

    /// The unqualified last component of this name.
    pub fn simple(&self) -> &str {
        match self {
            Name::Root => "",
            Name::Function { function } => function,
            Name::Schema { schema } => schema,
            Name::Entity { entity, .. } => entity,
            Name::Sequence { sequence, .. } => sequence,
            Name::Index { index, .. } => index,
            Name::Column { column, .. } => column,
        }
    }

    /// Whether this is a wildcard column name.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Name::Column { column, .. } if column == WILDCARD)
    }

    /// The name of the entity this name belongs to, if any.
    pub fn entity_name(&self) -> Option<Name> {
        match self {
            Name::Entity { .. } => Some(self.clone()),
            Name::Index { schema, entity, .. } | Name::Column { schema, entity, .. } => {
                Some(Name::Entity {
                    schema: schema.clone(),
                    entity: entity.clone(),
                })
            }
            _ => None,
        }
    }

    /// Whether this name matches `other`, honouring column wildcards.
    pub fn matches(&self, other: &Name) -> bool {
        match (self, other) {
            (
                Name::Column {
                    schema: s1,
                    entity: e1,
                    column: c1,
                },
                Name::Column {
                    schema: s2,
                    entity: e2,
                    column: c2,
                },
            ) => s1 == s2 && e1 == e2 && (c1 == WILDCARD || c2 == WILDCARD || c1 == c2),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Root => write!(f, "quiver"),
            Name::Function { function } => write!(f, "function.{function}"),
            Name::Schema { schema } => write!(f, "{schema}"),
            Name::Entity { schema, entity } => write!(f, "{schema}.{entity}"),
            Name::Sequence { schema, sequence } => write!(f, "{schema}.{sequence}"),
            Name::Index {
                schema,
                entity,
                index,
            } => write!(f, "{schema}.{entity}.{index}"),
            Name::Column {
                schema,
                entity,
                column,
            } => write!(f, "{schema}.{entity}.{column}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_are_lowercased() {
        let name = Name::entity("Main", "Features").unwrap();
        assert_eq!(name.to_string(), "main.features");
    }

    #[test]
    fn test_delimiter_is_rejected() {
        assert!(Name::schema("a.b").is_err());
        assert!(Name::entity("main", "fea*tures").is_err());
    }

    #[test]
    fn test_wildcard_only_in_columns() {
        assert!(Name::column("main", "features", "*").is_ok());
        assert!(Name::entity("main", "*").is_err());
    }

    #[test]
    fn test_wildcard_matching() {
        let star = Name::column("main", "features", "*").unwrap();
        let id = Name::column("main", "features", "id").unwrap();
        let other = Name::column("main", "labels", "id").unwrap();
        assert!(star.matches(&id));
        assert!(id.matches(&star));
        assert!(!star.matches(&other));
    }

    #[test]
    fn test_entity_of_column() {
        let col = Name::column("main", "features", "id").unwrap();
        assert_eq!(
            col.entity_name().unwrap(),
            Name::entity("main", "features").unwrap()
        );
    }
}
