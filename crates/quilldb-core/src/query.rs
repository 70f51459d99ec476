//! Lazy query composition over documents and index rows.
//!
//! Builders are pure descriptions: no backing-store I/O happens until a
//! terminal is enumerated. Conditions compose as logical AND by successive
//! filter application. Every typed element, once materialized, is tracked
//! through the session's identity map exactly as `get` would track it.

use crate::{
    backend::fetch_by_index,
    document::{Document, DocumentId},
    error::Error,
    index::{IndexRow, IndexSpec},
    session::{DocRef, Session},
    traits::Record,
    value::RowValues,
};
use std::{collections::VecDeque, marker::PhantomData};

type RowFilter = Box<dyn Fn(&RowValues) -> bool>;

struct IndexClause {
    name: &'static str,
    predicate: Option<RowFilter>,
}

impl IndexClause {
    fn matches(&self, row: &IndexRow) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(&row.values))
    }
}

///
/// LoadQuery
///
/// Typed query over documents of `T`, optionally joined to one index's rows
/// by owning identity.
///

pub struct LoadQuery<'s, T: Record> {
    session: &'s mut Session,
    index: Option<IndexClause>,
    filters: Vec<Box<dyn Fn(&T) -> bool>>,
}

impl<'s, T: Record> LoadQuery<'s, T> {
    pub(crate) fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            index: None,
            filters: Vec::new(),
        }
    }

    /// Restrict to documents owning at least one row of `I`.
    #[must_use]
    pub fn with_index<I: IndexSpec<Entity = T>>(mut self) -> Self {
        self.index = Some(IndexClause {
            name: I::NAME,
            predicate: None,
        });
        self
    }

    /// Restrict to documents owning a row of `I` matching the predicate.
    #[must_use]
    pub fn index_where<I: IndexSpec<Entity = T>>(
        mut self,
        predicate: impl Fn(&RowValues) -> bool + 'static,
    ) -> Self {
        self.index = Some(IndexClause {
            name: I::NAME,
            predicate: Some(Box::new(predicate)),
        });
        self
    }

    /// Filter on the materialized object.
    #[must_use]
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.filters.push(Box::new(predicate));
        self
    }

    /// Lazy enumeration; candidate identities are resolved on the first
    /// `next` call, elements materialize one by one.
    #[must_use]
    pub fn iter(self) -> LoadIter<'s, T> {
        LoadIter {
            session: self.session,
            index: self.index,
            filters: self.filters,
            candidates: None,
            done: false,
        }
    }

    pub fn all(self) -> Result<Vec<DocRef<T>>, Error> {
        self.iter().collect()
    }

    pub fn first(self) -> Result<Option<DocRef<T>>, Error> {
        self.iter().next().transpose()
    }
}

///
/// LoadIter
///

pub struct LoadIter<'s, T: Record> {
    session: &'s mut Session,
    index: Option<IndexClause>,
    filters: Vec<Box<dyn Fn(&T) -> bool>>,
    candidates: Option<VecDeque<DocumentId>>,
    done: bool,
}

impl<T: Record> LoadIter<'_, T> {
    fn candidates(&mut self) -> Result<&mut VecDeque<DocumentId>, Error> {
        if self.candidates.is_none() {
            self.session.ensure_active("query")?;

            let ids = match &self.index {
                Some(clause) => {
                    fetch_by_index(self.session.backend(), clause.name, &|row| {
                        clause.matches(row)
                    })?
                }
                None => self.session.backend().scan()?,
            };
            self.candidates = Some(ids.into_iter().collect());
        }

        Ok(self.candidates.get_or_insert_with(VecDeque::new))
    }
}

impl<T: Record> Iterator for LoadIter<'_, T> {
    type Item = Result<DocRef<T>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let id = match self.candidates() {
                Ok(ids) => match ids.pop_front() {
                    Some(id) => id,
                    None => {
                        self.done = true;
                        return None;
                    }
                },
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };

            match self.session.materialize_for_query::<T>(id) {
                Ok(None) => {}
                Ok(Some(doc_ref)) => {
                    let object = match self.session.entity::<T>(doc_ref) {
                        Ok(object) => object,
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err));
                        }
                    };
                    if self.filters.iter().all(|predicate| predicate(object)) {
                        return Some(Ok(doc_ref));
                    }
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

///
/// DocQuery
///
/// Untyped query over the whole document set.
///

pub struct DocQuery<'s> {
    session: &'s mut Session,
    filters: Vec<Box<dyn Fn(&Document) -> bool>>,
}

impl<'s> DocQuery<'s> {
    pub(crate) fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter_doc(mut self, predicate: impl Fn(&Document) -> bool + 'static) -> Self {
        self.filters.push(Box::new(predicate));
        self
    }

    pub fn all(self) -> Result<Vec<Document>, Error> {
        self.session.ensure_active("query")?;

        let ids = self.session.backend().scan()?;
        let mut out = Vec::new();
        for id in ids {
            let Some(document) = self.session.get_document(id)? else {
                continue;
            };
            if self.filters.iter().all(|predicate| predicate(&document)) {
                out.push(document);
            }
        }

        Ok(out)
    }

    pub fn first(self) -> Result<Option<Document>, Error> {
        Ok(self.all()?.into_iter().next())
    }
}

///
/// IndexQuery
///
/// Query over one index's persisted row set. Reads only; no tracking.
///

pub struct IndexQuery<'s, I: IndexSpec> {
    session: &'s Session,
    predicate: Option<RowFilter>,
    _marker: PhantomData<fn() -> I>,
}

impl<'s, I: IndexSpec> IndexQuery<'s, I> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self {
            session,
            predicate: None,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn filter_rows(mut self, predicate: impl Fn(&RowValues) -> bool + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Matching persisted rows.
    pub fn rows(self) -> Result<Vec<IndexRow>, Error> {
        self.session.ensure_active("query_index")?;

        let predicate = self.predicate;
        Ok(self.session.backend().fetch_index(I::NAME, &|row| {
            predicate.as_ref().is_none_or(|p| p(&row.values))
        })?)
    }

    /// Owning identities of matching rows, deduplicated in row order.
    pub fn ids(self) -> Result<Vec<DocumentId>, Error> {
        self.session.ensure_active("query_index")?;

        let predicate = self.predicate;
        Ok(fetch_by_index(self.session.backend(), I::NAME, &|row| {
            predicate.as_ref().is_none_or(|p| p(&row.values))
        })?)
    }
}
