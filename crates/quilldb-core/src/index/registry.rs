use crate::{document::DocumentId, index::IndexRow, traits::Record, value::RowValues};
use std::{any::Any, collections::HashMap};
use thiserror::Error as ThisError;

///
/// RegistryError
///
/// Configuration failures. These surface at registration time, never during
/// save; a session can assume every descriptor it resolves is well-formed.
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("index '{index}' is already registered for type '{doc_type}'")]
    Duplicate {
        index: &'static str,
        doc_type: &'static str,
    },

    #[error("index '{index}' cannot project an object of type '{doc_type}'")]
    Projection {
        index: &'static str,
        doc_type: &'static str,
    },
}

///
/// IndexSpec
///
/// A named projection from one record type to zero or more index rows.
/// Projections producing no rows are valid (the object simply has no entry in
/// that index). Registering the same (name, type) pair twice is a
/// configuration error.
///

pub trait IndexSpec: 'static {
    type Entity: Record;

    const NAME: &'static str;

    fn project(entity: &Self::Entity) -> Vec<RowValues>;
}

///
/// Descriptor
///
/// Type-erased form of an [`IndexSpec`], resolved once at registration. The
/// erased closure downcasts back to the concrete entity type; a failed
/// downcast means the registry key and the session disagree about the type
/// tag, which registration makes unrepresentable.
///

pub struct Descriptor {
    name: &'static str,
    doc_type: &'static str,
    project: Box<dyn Fn(&dyn Any) -> Option<Vec<RowValues>> + Send + Sync>,
}

impl Descriptor {
    fn of<I: IndexSpec>() -> Self {
        Self {
            name: I::NAME,
            doc_type: <I::Entity as Record>::TYPE,
            project: Box::new(|object| object.downcast_ref::<I::Entity>().map(I::project)),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn doc_type(&self) -> &'static str {
        self.doc_type
    }

    /// Project `object` into rows owned by `doc`.
    pub fn project(&self, object: &dyn Any, doc: DocumentId) -> Result<Vec<IndexRow>, RegistryError> {
        let rows = (self.project)(object).ok_or(RegistryError::Projection {
            index: self.name,
            doc_type: self.doc_type,
        })?;

        Ok(rows
            .into_iter()
            .map(|values| IndexRow::new(self.name, doc, values))
            .collect())
    }
}

///
/// Registry
///
/// Process-wide descriptor registry keyed by entity type tag. Built at store
/// configuration time; read-only and safe for concurrent reads afterwards.
///

#[derive(Default)]
pub struct Registry {
    by_type: HashMap<&'static str, Vec<Descriptor>>,
}

impl Registry {
    pub fn register<I: IndexSpec>(&mut self) -> Result<(), RegistryError> {
        let descriptor = Descriptor::of::<I>();
        let entries = self.by_type.entry(descriptor.doc_type).or_default();

        if entries.iter().any(|d| d.name == descriptor.name) {
            return Err(RegistryError::Duplicate {
                index: descriptor.name,
                doc_type: descriptor.doc_type,
            });
        }
        entries.push(descriptor);

        Ok(())
    }

    /// Descriptors applicable to one type tag; empty for unindexed types.
    #[must_use]
    pub fn descriptors_for(&self, doc_type: &str) -> &[Descriptor] {
        self.by_type.get(doc_type).map_or(&[], Vec::as_slice)
    }

    /// Every registered descriptor, across all types.
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.by_type.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Article {
        title: String,
    }

    impl Record for Article {
        const TYPE: &'static str = "article";
    }

    struct ByTitle;

    impl IndexSpec for ByTitle {
        type Entity = Article;
        const NAME: &'static str = "by_title";

        fn project(entity: &Article) -> Vec<RowValues> {
            vec![RowValues::new().field("title", entity.title.clone())]
        }
    }

    #[test]
    fn duplicate_registration_is_a_configuration_error() {
        let mut registry = Registry::default();
        registry.register::<ByTitle>().unwrap();

        let err = registry.register::<ByTitle>().unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
    }

    #[test]
    fn descriptors_resolve_by_type_tag() {
        let mut registry = Registry::default();
        registry.register::<ByTitle>().unwrap();

        assert_eq!(registry.descriptors_for("article").len(), 1);
        assert!(registry.descriptors_for("comment").is_empty());
    }

    #[test]
    fn projection_produces_rows_bound_to_the_document() {
        let mut registry = Registry::default();
        registry.register::<ByTitle>().unwrap();

        let article = Article { title: "A".into() };
        let doc = DocumentId::new(7);
        let descriptor = &registry.descriptors_for("article")[0];
        let rows = descriptor.project(&article, doc).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].doc, doc);
        assert_eq!(rows[0].index, "by_title");
        assert_eq!(
            rows[0].values.get("title"),
            Some(&crate::value::Value::Text("A".into()))
        );
    }
}
