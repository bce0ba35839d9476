//! Workload registry.
//!
//! Owned by the reconciler; nothing else reads or writes it while a run is in
//! progress. Records keep insertion order so listings and reports are stable.

use std::collections::HashMap;

use convoy_core::{Catalog, Error, Result, Workload, WorkloadId, WorkloadKind, WorkloadSpec};
use tracing::debug;

/// Workloads keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    workloads: Vec<Workload>,
    index: HashMap<WorkloadId, usize>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every catalog entry, services first, then drivers.
    ///
    /// # Errors
    ///
    /// Returns the first registration error: an invalid id or dependency, or
    /// a duplicate id.
    pub fn from_catalog(catalog: &Catalog) -> Result<Self> {
        catalog
            .entries()?
            .into_iter()
            .try_fold(Self::new(), |mut registry, entry| {
                registry.put(entry.id, entry.kind, entry.spec)?;
                Ok(registry)
            })
    }

    /// Insert a new workload in state `New`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `id` is already registered.
    pub fn put(&mut self, id: WorkloadId, kind: WorkloadKind, spec: WorkloadSpec) -> Result<()> {
        if self.index.contains_key(&id) {
            return Err(Error::duplicate_id(id.as_str()));
        }

        let workload = Workload::new(id.clone(), kind, spec)?;
        debug!(workload = %id, kind = %kind, "Registered workload");

        self.index.insert(id, self.workloads.len());
        self.workloads.push(workload);
        Ok(())
    }

    /// Look a workload up by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub fn get(&self, id: &str) -> Result<&Workload> {
        self.index
            .get(id)
            .and_then(|&position| self.workloads.get(position))
            .ok_or_else(|| Error::not_found(id))
    }

    /// Look a workload up by id for mutation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub fn get_mut(&mut self, id: &str) -> Result<&mut Workload> {
        match self.index.get(id) {
            Some(&position) => self
                .workloads
                .get_mut(position)
                .ok_or_else(|| Error::not_found(id)),
            None => Err(Error::not_found(id)),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All workloads in insertion order.
    pub fn list(&self) -> &[Workload] {
        &self.workloads
    }

    pub fn iter(&self) -> impl Iterator<Item = &Workload> {
        self.workloads.iter()
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    /// Consume the registry, yielding its workloads in insertion order.
    pub fn into_workloads(self) -> Vec<Workload> {
        self.workloads
    }
}
