//! Query builder over managed instances.
//!
//! Results materialize row-by-row through the identity map, so a row
//! whose key is already managed in this session yields the identical
//! instance, regardless of which query path produced it.

use crate::SessionCore;
use entman_core::{Entity, EntityRef, Error, Result, Row, SourceHandle, Value, materialize};
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

/// A query for entities of type `T`: equality filters, ordering, limit.
///
/// Built from [`Session::query`](crate::Session::query); consumed by
/// [`iter`](Query::iter), [`all`](Query::all), or [`one`](Query::one).
pub struct Query<T: Entity> {
    core: Arc<RwLock<SessionCore>>,
    handle: SourceHandle,
    filters: Vec<(&'static str, Value)>,
    order_by: Option<(&'static str, bool)>,
    limit: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Query<T> {
    pub(crate) fn new(core: Arc<RwLock<SessionCore>>, handle: SourceHandle) -> Self {
        Self {
            core,
            handle,
            filters: Vec::new(),
            order_by: None,
            limit: None,
            _marker: PhantomData,
        }
    }

    /// Require a column to equal a value.
    #[must_use]
    pub fn filter(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push((column, value.into()));
        self
    }

    /// Order ascending by a column.
    #[must_use]
    pub fn order_by(mut self, column: &'static str) -> Self {
        self.order_by = Some((column, false));
        self
    }

    /// Order descending by a column.
    #[must_use]
    pub fn order_by_desc(mut self, column: &'static str) -> Self {
        self.order_by = Some((column, true));
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Execute the fetch and return a lazy sequence of managed
    /// instances: each row materializes (through the identity map) only
    /// when the iterator reaches it.
    pub fn iter(self) -> Result<QueryIter<T>> {
        let mut rows = {
            let mut core = self.core.write().expect("lock poisoned");
            if !core.open {
                return Err(Error::SessionClosed);
            }
            core.query_rows_for::<T>(&self.filters, self.order_by)?
        };
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        Ok(QueryIter {
            core: self.core,
            handle: self.handle,
            rows: rows.into_iter(),
            _marker: PhantomData,
        })
    }

    /// Execute and collect every result.
    pub fn all(self) -> Result<Vec<EntityRef<T>>> {
        self.iter()?.collect()
    }

    /// Execute and return the first result, if any.
    pub fn one(self) -> Result<Option<EntityRef<T>>> {
        self.limit(1).iter()?.next().transpose()
    }
}

/// Iterator over query results; each step resolves one row into a
/// managed instance.
pub struct QueryIter<T: Entity> {
    core: Arc<RwLock<SessionCore>>,
    handle: SourceHandle,
    rows: std::vec::IntoIter<Row>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Iterator for QueryIter<T> {
    type Item = Result<EntityRef<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        let mut core = self.core.write().expect("lock poisoned");
        if !core.open {
            return Some(Err(Error::SessionClosed));
        }
        Some(materialize::<T>(&mut *core, &self.handle, &row))
    }
}

impl<T: Entity> std::iter::FusedIterator for QueryIter<T> {}
