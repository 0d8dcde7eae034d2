/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An in-memory [`DocumentStore`], for tests and for single-process deployments.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use serde_json::Value;

use super::pluggables::{Collection, DocumentStore, Filter, GetOptions, StorageError, Update};

/// Collections held behind a shared mutex. Every operation takes the lock once, so each call is
/// atomic with respect to the others.
#[derive(Clone, Default)]
pub struct MemStore(Arc<Mutex<HashMap<Collection, Vec<Value>>>>);

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    fn collections(&self) -> Result<MutexGuard<'_, HashMap<Collection, Vec<Value>>>, StorageError> {
        self.0
            .lock()
            .map_err(|_| StorageError::Backend("in-memory store lock is poisoned".to_string()))
    }
}

impl DocumentStore for MemStore {
    fn get(
        &self,
        collection: Collection,
        filter: &Filter,
        options: &GetOptions,
    ) -> Result<Vec<Value>, StorageError> {
        let collections = self.collections()?;
        let mut documents: Vec<Value> = collections
            .get(&collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| filter.matches(document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        options.apply(&mut documents);
        Ok(documents)
    }

    fn put(&mut self, collection: Collection, documents: Vec<Value>) -> Result<(), StorageError> {
        self.collections()?
            .entry(collection)
            .or_default()
            .extend(documents);
        Ok(())
    }

    fn update(
        &mut self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StorageError> {
        let mut collections = self.collections()?;
        let mut matched = 0;
        if let Some(documents) = collections.get_mut(&collection) {
            for document in documents.iter_mut().filter(|document| filter.matches(document)) {
                update.apply(document);
                matched += 1;
            }
        }
        Ok(matched)
    }

    fn upsert(
        &mut self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<(), StorageError> {
        let mut collections = self.collections()?;
        let documents = collections.entry(collection).or_default();
        let mut matched = false;
        for document in documents.iter_mut().filter(|document| filter.matches(document)) {
            update.apply(document);
            matched = true;
        }
        if !matched {
            let mut document = filter.seed_document();
            update.apply(&mut document);
            documents.push(document);
        }
        Ok(())
    }

    fn remove(&mut self, collection: Collection, filter: &Filter) -> Result<usize, StorageError> {
        let mut collections = self.collections()?;
        let Some(documents) = collections.get_mut(&collection) else {
            return Ok(0);
        };
        let before = documents.len();
        documents.retain(|document| !filter.matches(document));
        Ok(before - documents.len())
    }
}
