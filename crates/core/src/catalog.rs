//! Workload catalog: the declarative YAML description of services and drivers.
//!
//! ```yaml
//! version: "1"
//! services:
//!   db:
//!     image: postgres:10
//!     check:
//!       docker-exec:
//!         user: postgres
//!         command: pg_isready
//! drivers:
//!   hello:
//!     image: debian:stretch-slim
//!     command: [echo, hello]
//!     depends_on: [db]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::workload::{WorkloadId, WorkloadKind, WorkloadSpec};

/// Parsed catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Free-form catalog version.
    #[serde(default)]
    pub version: Option<String>,
    /// Long-running workloads.
    #[serde(default)]
    pub services: BTreeMap<String, WorkloadSpec>,
    /// Run-once workloads.
    #[serde(default, alias = "tasks")]
    pub drivers: BTreeMap<String, WorkloadSpec>,
}

/// One catalog entry ready for registration.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: WorkloadId,
    pub kind: WorkloadKind,
    pub spec: WorkloadSpec,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from YAML text, then clean and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CatalogParse`] for malformed YAML and
    /// [`Error::InvalidCatalog`] for semantically invalid entries.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut catalog: Self =
            serde_yaml::from_str(text).map_err(|e| Error::catalog_parse(e.to_string()))?;
        catalog.clean();
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CatalogRead`] if the file cannot be read, otherwise
    /// the errors of [`Catalog::from_yaml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::catalog_read(path, e.to_string()))?;
        Self::from_yaml_str(&text)
    }

    /// Add a service.
    #[must_use]
    pub fn with_service(mut self, id: impl Into<String>, spec: WorkloadSpec) -> Self {
        self.services.insert(id.into(), spec);
        self
    }

    /// Add a driver.
    #[must_use]
    pub fn with_driver(mut self, id: impl Into<String>, spec: WorkloadSpec) -> Self {
        self.drivers.insert(id.into(), spec);
        self
    }

    /// Total number of declared workloads.
    pub fn len(&self) -> usize {
        self.services.len().saturating_add(self.drivers.len())
    }

    /// Check if the catalog declares nothing.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.drivers.is_empty()
    }

    /// Entries in registration order: services first, then drivers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkloadId`] for an id that is not a valid
    /// container name.
    pub fn entries(&self) -> Result<Vec<CatalogEntry>> {
        let services = self
            .services
            .iter()
            .map(|(id, spec)| (id, WorkloadKind::Service, spec));
        let drivers = self
            .drivers
            .iter()
            .map(|(id, spec)| (id, WorkloadKind::Driver, spec));

        services
            .chain(drivers)
            .map(|(id, kind, spec)| {
                Ok(CatalogEntry {
                    id: WorkloadId::parse(id.as_str())?,
                    kind,
                    spec: spec.clone(),
                })
            })
            .collect()
    }

    /// Drop self dependencies and repeated dependencies.
    fn clean(&mut self) {
        for (id, spec) in self.services.iter_mut().chain(self.drivers.iter_mut()) {
            if spec.depends_on.iter().any(|dep| dep == id) {
                debug!(workload = %id, "Removed self dependency");
            }
            spec.depends_on = std::mem::take(&mut spec.depends_on)
                .into_iter()
                .filter(|dep| dep != id)
                .unique()
                .collect();
        }
    }

    fn validate(&self) -> Result<()> {
        let empty_images = self
            .services
            .iter()
            .chain(self.drivers.iter())
            .filter(|(_, spec)| spec.image.trim().is_empty())
            .map(|(id, _)| id.as_str())
            .join(", ");
        if !empty_images.is_empty() {
            return Err(Error::invalid_catalog(format!(
                "workloads without an image: {empty_images}"
            )));
        }

        let both = self
            .services
            .keys()
            .filter(|id| self.drivers.contains_key(*id))
            .join(", ");
        if !both.is_empty() {
            return Err(Error::invalid_catalog(format!(
                "declared as both service and driver: {both}"
            )));
        }

        Ok(())
    }
}
