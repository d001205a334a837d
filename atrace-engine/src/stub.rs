//! Structured stand-in for the generated stub code.
//!
//! `stub_gen.c` assembled a patch out of three regions: a fixed prefix
//! (enabled/global-enable/task-filter checks, ring slot reservation), a
//! variable middle sized by the function's arg count and string-capture
//! bit, and a fixed suffix (call-through, return capture, publish,
//! use-count decrement). There is no machine code to generate here — calls
//! go through `Engine::invoke`, not a patched vector table entry — but the
//! same three-region shape is kept as data so a patch's call path is
//! still built once per function from its metadata rather than hand-coded
//! per call site (SPEC_FULL.md §4.3).

use atrace_proto::FunctionMetadata;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StubOp {
    CheckEnabled,
    CheckGlobalEnable,
    CheckTaskFilter,
    ReserveSlot,
    CaptureArg(u8),
    CaptureString(u8),
    PublishArgs,
    InvokeOriginal,
    CaptureReturn,
    PublishReturn,
    DecrementUseCount,
}

/// The ordered op list for one patched function, built once at install
/// time and reused on every call.
#[derive(Clone, Debug)]
pub struct StubProgram {
    pub ops: Vec<StubOp>,
}

impl StubProgram {
    pub fn for_function(meta: &FunctionMetadata) -> Self {
        let mut ops = vec![
            StubOp::CheckEnabled,
            StubOp::CheckGlobalEnable,
            StubOp::CheckTaskFilter,
            StubOp::ReserveSlot,
        ];
        for i in 0..meta.arg_count {
            ops.push(StubOp::CaptureArg(i));
        }
        if let Some(idx) = meta.string_arg_index() {
            ops.push(StubOp::CaptureString(idx as u8));
        }
        ops.push(StubOp::PublishArgs);
        ops.push(StubOp::InvokeOriginal);
        ops.push(StubOp::CaptureReturn);
        ops.push(StubOp::PublishReturn);
        ops.push(StubOp::DecrementUseCount);
        StubProgram { ops }
    }

    /// Analogue of the original's `stub_size`: a rough measure of how much
    /// work a call to this function does, reported by STATUS.
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrace_proto::lookup_by_name;

    #[test]
    fn arg_count_matches_metadata() {
        let meta = lookup_by_name("OpenLibrary").unwrap();
        let program = StubProgram::for_function(meta);
        let captures = program
            .ops
            .iter()
            .filter(|op| matches!(op, StubOp::CaptureArg(_)))
            .count();
        assert_eq!(captures, meta.arg_count as usize);
    }

    #[test]
    fn string_capture_present_only_when_flagged() {
        let with_string = lookup_by_name("Open").unwrap();
        assert!(
            StubProgram::for_function(with_string)
                .ops
                .contains(&StubOp::CaptureString(0))
        );

        let without_string = lookup_by_name("AllocMem").unwrap();
        assert!(
            !StubProgram::for_function(without_string)
                .ops
                .iter()
                .any(|op| matches!(op, StubOp::CaptureString(_)))
        );
    }
}
