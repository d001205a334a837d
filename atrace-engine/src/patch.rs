//! Per-function patch state and the call path a traced invocation takes.
//!
//! `stub_gen.c` swapped a library's vector table entry with a generated
//! stub via `SetFunction()`, keeping the previous entry so the stub could
//! call through to it. There is no vector table here; `Engine::invoke`
//! plays the role of the patched entry point directly, and each `Patch`
//! keeps the "original" implementation as a plain closure instead of a
//! raw function pointer.

use std::sync::Arc;

use atrace_proto::{FunctionId, FunctionMetadata, lookup_by_id};
use dashmap::DashMap;

use crate::error::{EngineError, Result};
use crate::stub::StubProgram;

/// Arguments captured for one call, positional rather than register-frame
/// based.
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    pub args: [u32; 4],
    pub arg_count: u8,
    pub string: Option<String>,
}

pub type OriginalFn = dyn Fn(&CallArgs) -> u32 + Send + Sync;

/// One patched function: its static metadata, its slot in the control
/// region's patch status table, and the real implementation to call
/// through to.
pub struct Patch {
    pub metadata: &'static FunctionMetadata,
    pub index: u32,
    pub program: StubProgram,
    original: Arc<OriginalFn>,
}

impl Patch {
    pub fn call_original(&self, call: &CallArgs) -> u32 {
        (self.original)(call)
    }
}

/// Keyed by globally unique `FunctionId` rather than a (lib, LVO) pair —
/// resolves the original's LVO-collision-across-libraries ambiguity
/// (SPEC_FULL.md REDESIGN FLAGS item 3). `Arc<Patch>` lets `Engine::invoke`
/// hold a reference across the call without keeping the map locked, the
/// same reason `cognitod`'s program tables use `Arc` entries.
#[derive(Default)]
pub struct PatchTable {
    patches: DashMap<FunctionId, Arc<Patch>>,
}

impl PatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a patch for `name`, bound to `original`. `index` must match
    /// the function's position in the control region's patch status array.
    pub fn install(
        &self,
        name: &str,
        index: u32,
        original: Arc<OriginalFn>,
    ) -> Result<FunctionId> {
        let metadata = lookup_by_id_by_name(name)?;
        let patch = Arc::new(Patch {
            metadata,
            index,
            program: StubProgram::for_function(metadata),
            original,
        });
        self.patches.insert(metadata.id, patch);
        Ok(metadata.id)
    }

    pub fn get(&self, id: FunctionId) -> Option<Arc<Patch>> {
        self.patches.get(&id).map(|e| Arc::clone(&e))
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Patch>> {
        let meta = atrace_proto::lookup_by_name(name)?;
        self.get(meta.id)
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<Patch>> + '_ {
        self.patches.iter().map(|e| Arc::clone(e.value()))
    }
}

fn lookup_by_id_by_name(name: &str) -> Result<&'static FunctionMetadata> {
    atrace_proto::lookup_by_name(name).ok_or_else(|| EngineError::UnknownFunction(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_and_lookup_roundtrip() {
        let table = PatchTable::new();
        let original: Arc<OriginalFn> = Arc::new(|_call| 0);
        let id = table.install("OpenLibrary", 5, original).unwrap();
        assert_eq!(id.0, 5);
        assert!(table.get(id).is_some());
        assert!(table.get_by_name("openlibrary").is_some());
    }

    #[test]
    fn install_rejects_unknown_function() {
        let table = PatchTable::new();
        let original: Arc<OriginalFn> = Arc::new(|_call| 0);
        let err = table.install("NotARealFunction", 0, original).unwrap_err();
        assert!(matches!(err, EngineError::UnknownFunction(_)));
    }
}
