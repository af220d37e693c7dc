//! Store directory layout: routing instances to physical sub-areas.
//!
//! A store root contains one directory per configured area plus a default
//! `main` area. An instance belongs to the first configured area whose
//! root-type set subsumes its root type; areas may additionally split
//! assertions from queries into `assert/` and `query/` sub-directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::frame::FrameFunction;
use crate::identity::Identity;
use crate::store::serial::InstanceSerializer;
use crate::types::TypeSystem;

const MAIN_AREA: &str = "main";
const ASSERT_SUB: &str = "assert";
const QUERY_SUB: &str = "query";
const QUARANTINE: &str = "invalid";

#[derive(Debug)]
struct Area {
    name: String,
    root_types: Vec<Identity>,
    split_by_function: bool,
}

/// Deterministic type/function → directory routing for one store root.
pub struct StoreLayout {
    root: PathBuf,
    areas: Vec<Area>,
    types: Arc<dyn TypeSystem>,
}

impl StoreLayout {
    /// Build the layout for a store root from its config.
    pub fn new(root: &Path, config: &StoreConfig, types: Arc<dyn TypeSystem>) -> Self {
        let areas = config
            .areas
            .iter()
            .map(|a| Area {
                name: a.name.clone(),
                root_types: a.root_identities(),
                split_by_function: a.split_by_function,
            })
            .collect();
        Self {
            root: root.to_path_buf(),
            areas,
            types,
        }
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory owning instances of `ty` with the given function.
    ///
    /// First configured area whose root types subsume `ty` wins; untyped
    /// or unmatched instances go to the main area.
    pub fn area_dir(&self, ty: &Identity, function: FrameFunction) -> PathBuf {
        for area in &self.areas {
            if area.root_types.iter().any(|root| self.types.subsumes(root, ty)) {
                let dir = self.root.join(&area.name);
                return if area.split_by_function {
                    match function {
                        FrameFunction::Assertion => dir.join(ASSERT_SUB),
                        FrameFunction::Query => dir.join(QUERY_SUB),
                    }
                } else {
                    dir
                };
            }
        }
        self.root.join(MAIN_AREA)
    }

    /// Where fully-invalid instance files are parked for operator
    /// diagnosis. Never part of the start-up scan, so a quarantined file
    /// cannot shadow a later instance that reuses its index.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join(QUARANTINE)
    }

    /// Every directory the start-up scan must visit.
    pub fn all_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.root.join(MAIN_AREA)];
        for area in &self.areas {
            let dir = self.root.join(&area.name);
            if area.split_by_function {
                dirs.push(dir.join(ASSERT_SUB));
                dirs.push(dir.join(QUERY_SUB));
            } else {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// Move an instance's files between areas, keyed by index.
    ///
    /// Used at start-up when a type-system change means the properly-owned
    /// area differs from where the files were found.
    pub fn relocate(&self, index: usize, from: &Path, to: &Path) -> Result<(), StoreError> {
        std::fs::create_dir_all(to)?;
        for name in [
            InstanceSerializer::profile_file(index),
            InstanceSerializer::instance_file(index),
        ] {
            let src = from.join(&name);
            if src.exists() {
                std::fs::rename(&src, to.join(&name))?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StoreLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLayout")
            .field("root", &self.root)
            .field("areas", &self.areas)
            .finish()
    }
}
