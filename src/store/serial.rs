//! Serialization layer: durable profile + body files per slot index.
//!
//! Each stored instance is written as two JSON files in its area directory:
//!
//! - `profile-{index}.json` — lightweight summary: identity, type identity,
//!   referenced identities, function. Cheap to scan at start-up.
//! - `instance-{index}.json` — the full frame tree.
//!
//! Regeneration reads them back against the *current* type system. Outcomes
//! are a three-state [`RegenStatus`], never a silent drop: callers must be
//! able to distinguish "instance reconstructed but missing historical
//! content" from "no instance available".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::frame::{Frame, FrameFunction, Value};
use crate::identity::Identity;
use crate::types::TypeSystem;

const PROFILE_PREFIX: &str = "profile-";
const INSTANCE_PREFIX: &str = "instance-";
const FILE_SUFFIX: &str = ".json";

/// Compact durable summary of a stored instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// The instance's identity.
    pub identity: Identity,
    /// Root type identity.
    pub type_id: Identity,
    /// Identities of every instance this one references.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub references: Vec<Identity>,
    /// Assertion or query.
    pub function: FrameFunction,
}

/// How much reconstruction succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenStatus {
    /// Fully reconstructed.
    Valid,
    /// Reconstructed with some components pruned against the current type
    /// system; still usable.
    PartiallyValid,
    /// Root type no longer resolvable; no instance available.
    FullyInvalid,
}

/// Result of regenerating an instance from disk.
#[derive(Debug)]
pub struct Regen {
    /// Reconstruction outcome.
    pub status: RegenStatus,
    /// The profile as persisted.
    pub profile: Profile,
    /// The reconstructed frame; `None` iff fully invalid.
    pub frame: Option<Frame>,
    /// Identities of pruned components (types and slots).
    pub pruned: Vec<Identity>,
}

/// Whether a regenerated frame must honour durable constraints or may be
/// freely mutated by matcher-side code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Canonical read: the frame's function must match its profile.
    Durable,
    /// Free-copy read for matcher indexing and reference expansion.
    Editable,
}

/// Converts between in-memory frames and their durable representation.
pub struct InstanceSerializer {
    types: Arc<dyn TypeSystem>,
}

impl InstanceSerializer {
    /// Create a serializer validating against the given type system.
    pub fn new(types: Arc<dyn TypeSystem>) -> Self {
        Self { types }
    }

    /// Profile file name for an index.
    pub fn profile_file(index: usize) -> String {
        format!("{PROFILE_PREFIX}{index}{FILE_SUFFIX}")
    }

    /// Instance body file name for an index.
    pub fn instance_file(index: usize) -> String {
        format!("{INSTANCE_PREFIX}{index}{FILE_SUFFIX}")
    }

    /// Parse the index out of a profile file name.
    pub fn index_of_profile(file_name: &str) -> Option<usize> {
        file_name
            .strip_prefix(PROFILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }

    /// Write the profile and body for an instance into `dir`.
    pub fn write(
        &self,
        frame: &Frame,
        identity: &Identity,
        index: usize,
        dir: &Path,
    ) -> Result<(), StoreError> {
        std::fs::create_dir_all(dir)?;
        let profile = Profile {
            identity: identity.clone(),
            type_id: frame.ty.clone(),
            references: frame.references(),
            function: frame.function,
        };
        let profile_json =
            serde_json::to_vec_pretty(&profile).map_err(|e| StoreError::Serialization {
                message: format!("profile for \"{identity}\": {e}"),
            })?;
        let body_json = serde_json::to_vec_pretty(frame).map_err(|e| StoreError::Serialization {
            message: format!("body for \"{identity}\": {e}"),
        })?;
        std::fs::write(dir.join(Self::profile_file(index)), profile_json)?;
        std::fs::write(dir.join(Self::instance_file(index)), body_json)?;
        Ok(())
    }

    /// Read back the profile only.
    pub fn read_profile(&self, dir: &Path, index: usize) -> Result<Profile, StoreError> {
        let path = dir.join(Self::profile_file(index));
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
            message: format!("profile {}: {e}", path.display()),
        })
    }

    /// Read back the type identity without parsing the full body.
    pub fn read_type_id(&self, dir: &Path, index: usize) -> Result<Identity, StoreError> {
        Ok(self.read_profile(dir, index)?.type_id)
    }

    /// Regenerate an instance from `dir`, pruning components the current
    /// type system no longer recognizes.
    pub fn read(&self, dir: &Path, index: usize, mode: ReadMode) -> Result<Regen, StoreError> {
        let profile = self.read_profile(dir, index)?;
        let path = dir.join(Self::instance_file(index));
        let bytes = std::fs::read(&path)?;
        let mut frame: Frame =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
                message: format!("body {}: {e}", path.display()),
            })?;

        if mode == ReadMode::Durable && frame.function != profile.function {
            return Err(StoreError::Serialization {
                message: format!(
                    "function mismatch for \"{}\": profile says {}, body says {}",
                    profile.identity, profile.function, frame.function
                ),
            });
        }

        let mut pruned = Vec::new();
        if !self.prune(&mut frame, &mut pruned) {
            return Ok(Regen {
                status: RegenStatus::FullyInvalid,
                profile,
                frame: None,
                pruned,
            });
        }
        let status = if pruned.is_empty() {
            RegenStatus::Valid
        } else {
            RegenStatus::PartiallyValid
        };
        Ok(Regen {
            status,
            profile,
            frame: Some(frame),
            pruned,
        })
    }

    /// Remove both files for an index. Missing files are ignored.
    pub fn delete(&self, dir: &Path, index: usize) -> Result<(), StoreError> {
        for name in [Self::profile_file(index), Self::instance_file(index)] {
            match std::fs::remove_file(dir.join(&name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // Prune a frame against the current type system.
    //
    // Returns false when the frame's own type is unresolvable (the caller
    // drops it). Nested frames that fail resolve are removed from their
    // slot; slots whose identity is no longer declared on the (known)
    // declared-slot set of the type are removed. Every removal is recorded.
    fn prune(&self, frame: &mut Frame, pruned: &mut Vec<Identity>) -> bool {
        if !self.types.contains(&frame.ty) {
            return false;
        }
        let declared = self.types.slots_of(&frame.ty);
        frame.slots.retain(|slot| {
            // An empty declared set means the type system does not
            // enumerate slots for this type; nothing to check against.
            let keep = declared.is_empty() || declared.contains(&slot.id);
            if !keep {
                pruned.push(slot.id.clone());
            }
            keep
        });
        for slot in &mut frame.slots {
            slot.values.retain_mut(|value| match value {
                Value::Frame(nested) => {
                    let keep = self.prune(nested, pruned);
                    if !keep {
                        pruned.push(nested.ty.clone());
                    }
                    keep
                }
                _ => true,
            });
        }
        true
    }
}

impl std::fmt::Debug for InstanceSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceSerializer").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{NumberSpec, Slot};
    use crate::types::TypeCatalog;
    use tempfile::TempDir;

    fn catalog() -> TypeCatalog {
        let mut cat = TypeCatalog::new();
        cat.add_root("Thing");
        cat.add_subtype("Patient", "Thing");
        cat.add_subtype("Address", "Thing");
        cat
    }

    fn patient() -> Frame {
        Frame::assertion("Patient")
            .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::exact(42.0))))
            .with_slot(Slot::new("hasAddress").with_value(Value::Reference(Identity::new("addr1"))))
    }

    #[test]
    fn write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let ser = InstanceSerializer::new(Arc::new(catalog()));
        let frame = patient();
        ser.write(&frame, &Identity::new("p1"), 0, dir.path()).unwrap();

        let regen = ser.read(dir.path(), 0, ReadMode::Durable).unwrap();
        assert_eq!(regen.status, RegenStatus::Valid);
        assert_eq!(regen.frame.unwrap(), frame);
        assert_eq!(regen.profile.identity, Identity::new("p1"));
        assert_eq!(regen.profile.references, vec![Identity::new("addr1")]);
    }

    #[test]
    fn type_id_read_without_body() {
        let dir = TempDir::new().unwrap();
        let ser = InstanceSerializer::new(Arc::new(catalog()));
        ser.write(&patient(), &Identity::new("p1"), 3, dir.path()).unwrap();
        // Body gone; the profile alone still answers the type query.
        std::fs::remove_file(dir.path().join(InstanceSerializer::instance_file(3))).unwrap();
        assert_eq!(ser.read_type_id(dir.path(), 3).unwrap(), Identity::new("Patient"));
    }

    #[test]
    fn unknown_root_type_is_fully_invalid() {
        let dir = TempDir::new().unwrap();
        let writer = InstanceSerializer::new(Arc::new(catalog()));
        writer.write(&patient(), &Identity::new("p1"), 0, dir.path()).unwrap();

        // Second session with Patient gone from the type system.
        let mut shrunk = catalog();
        shrunk.remove_type(&Identity::new("Patient"));
        let reader = InstanceSerializer::new(Arc::new(shrunk));
        let regen = reader.read(dir.path(), 0, ReadMode::Durable).unwrap();
        assert_eq!(regen.status, RegenStatus::FullyInvalid);
        assert!(regen.frame.is_none());
    }

    #[test]
    fn unknown_nested_type_is_pruned_not_fatal() {
        let dir = TempDir::new().unwrap();
        let frame = Frame::assertion("Patient").with_slot(
            Slot::new("hasAddress").with_value(Value::Frame(Frame::assertion("Address"))),
        );
        let writer = InstanceSerializer::new(Arc::new(catalog()));
        writer.write(&frame, &Identity::new("p1"), 0, dir.path()).unwrap();

        let mut shrunk = catalog();
        shrunk.remove_type(&Identity::new("Address"));
        let reader = InstanceSerializer::new(Arc::new(shrunk));
        let regen = reader.read(dir.path(), 0, ReadMode::Editable).unwrap();
        assert_eq!(regen.status, RegenStatus::PartiallyValid);
        assert_eq!(regen.pruned, vec![Identity::new("Address")]);
        let frame = regen.frame.unwrap();
        assert!(frame.slot("hasAddress").unwrap().values.is_empty());
    }

    #[test]
    fn undeclared_slot_is_pruned_when_slots_enumerated() {
        let dir = TempDir::new().unwrap();
        let writer = InstanceSerializer::new(Arc::new(catalog()));
        writer.write(&patient(), &Identity::new("p1"), 0, dir.path()).unwrap();

        // The type system now enumerates Patient's slots, without hasAddress.
        let mut narrowed = catalog();
        narrowed.add_slot("Patient", "hasAge");
        let reader = InstanceSerializer::new(Arc::new(narrowed));
        let regen = reader.read(dir.path(), 0, ReadMode::Durable).unwrap();
        assert_eq!(regen.status, RegenStatus::PartiallyValid);
        assert_eq!(regen.pruned, vec![Identity::new("hasAddress")]);
        assert!(regen.frame.unwrap().slot("hasAddress").is_none());
    }

    #[test]
    fn delete_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let ser = InstanceSerializer::new(Arc::new(catalog()));
        ser.write(&patient(), &Identity::new("p1"), 0, dir.path()).unwrap();
        ser.delete(dir.path(), 0).unwrap();
        assert!(!dir.path().join(InstanceSerializer::profile_file(0)).exists());
        assert!(!dir.path().join(InstanceSerializer::instance_file(0)).exists());
        // Idempotent.
        ser.delete(dir.path(), 0).unwrap();
    }

    #[test]
    fn profile_index_parse() {
        assert_eq!(InstanceSerializer::index_of_profile("profile-17.json"), Some(17));
        assert_eq!(InstanceSerializer::index_of_profile("instance-17.json"), None);
        assert_eq!(InstanceSerializer::index_of_profile("profile-x.json"), None);
    }
}
