//! Renders a drained `EventSlot` into the tab-separated line the daemon
//! streams to clients. Argument/return-value rendering is ported from
//! `format_args`/`format_retval`/`trace_format_event` in the original
//! daemon; the per-function dispatch table those functions open-coded is
//! replaced here by `FunctionMetadata::result_type`.

use std::collections::VecDeque;

use std::time::{SystemTime, UNIX_EPOCH};

use atrace_proto::{EventSlot, FunctionMetadata, ResultType};

use crate::filter::is_error;

const MODE_OLDFILE: u32 = 1005;
const MODE_NEWFILE: u32 = 1006;
const MODE_READWRITE: u32 = 1004;

const ACCESS_READ: u32 = 0xFFFF_FFFE; // -2 as u32
const ACCESS_WRITE: u32 = 0xFFFF_FFFF; // -1 as u32

const MEMF_PUBLIC: u32 = 0x1;
const MEMF_CHIP: u32 = 0x2;
const MEMF_FAST: u32 = 0x4;
const MEMF_CLEAR: u32 = 0x1_0000;

fn format_access_mode(mode: u32) -> String {
    match mode {
        MODE_OLDFILE => "OLDFILE".to_string(),
        MODE_NEWFILE => "NEWFILE".to_string(),
        MODE_READWRITE => "READWRITE".to_string(),
        other => format!("{other}"),
    }
}

fn format_lock_type(kind: u32) -> String {
    match kind {
        ACCESS_READ => "READ".to_string(),
        ACCESS_WRITE => "WRITE".to_string(),
        other => format!("{other}"),
    }
}

fn format_memf_flags(flags: u32) -> String {
    let mut parts = Vec::new();
    if flags & MEMF_PUBLIC != 0 {
        parts.push("PUBLIC");
    }
    if flags & MEMF_CHIP != 0 {
        parts.push("CHIP");
    }
    if flags & MEMF_FAST != 0 {
        parts.push("FAST");
    }
    if flags & MEMF_CLEAR != 0 {
        parts.push("CLEAR");
    }
    if parts.is_empty() {
        format!("{flags:#010x}")
    } else {
        parts.join("|")
    }
}

/// Renders a function's captured arguments, dispatching on name the same
/// way the original's `format_args` did.
pub fn format_args(meta: &FunctionMetadata, slot: &EventSlot) -> String {
    let string_arg = slot.string_lossy();
    match meta.name {
        "Open" => format!("\"{}\",{}", string_arg, format_access_mode(slot.args[1])),
        "Lock" => format!("\"{}\",{}", string_arg, format_lock_type(slot.args[1])),
        "OpenLibrary" => format!("\"{}\",{}", string_arg, slot.args[1]),
        "OpenDevice" => format!(
            "\"{}\",{},0x{:08x},0x{:08x}",
            string_arg, slot.args[1], slot.args[2], slot.args[3]
        ),
        "AllocMem" => format!("{},{}", slot.args[0], format_memf_flags(slot.args[1])),
        _ => {
            if let Some(idx) = meta.string_arg_index() {
                let mut parts = vec![format!("\"{}\"", string_arg)];
                for i in (idx + 1)..meta.arg_count as usize {
                    parts.push(format!("0x{:08x}", slot.args[i]));
                }
                parts.join(",")
            } else {
                (0..meta.arg_count as usize)
                    .map(|i| format!("0x{:08x}", slot.args[i]))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }
    }
}

/// 32-slot FIFO mapping a lock value to the path it was obtained for,
/// populated whenever a `Lock`/`CreateDir`-shaped call returns and
/// consulted when an `OldDirectoryLock`-shaped call (`CurrentDir`) hands
/// back a previous lock. Cleared at the start of each RUN session (S2).
pub struct LockPathCache {
    entries: VecDeque<(u32, String)>,
    capacity: usize,
}

impl LockPathCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn insert(&mut self, lock: u32, path: String) {
        if lock == 0 {
            return;
        }
        self.entries.retain(|(k, _)| *k != lock);
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((lock, path));
    }

    pub fn get(&self, lock: u32) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| *k == lock)
            .map(|(_, p)| p.as_str())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Renders a function's return value and records the lock-to-path cache
/// side effect where applicable.
pub fn format_retval(meta: &FunctionMetadata, slot: &EventSlot, cache: &mut LockPathCache) -> String {
    let retval = slot.retval;
    match meta.result_type {
        ResultType::Void => "(void)".to_string(),
        ResultType::Pointer | ResultType::MessagePointer => {
            if retval == 0 {
                "NULL".to_string()
            } else {
                format!("0x{retval:08x}")
            }
        }
        ResultType::DosBoolean => {
            if retval != 0 { "TRUE".to_string() } else { "FALSE".to_string() }
        }
        ResultType::NonZeroIsError => {
            if retval == 0 { "OK".to_string() } else { format!("error {retval}") }
        }
        ResultType::NumericReturnCode | ResultType::ByteCount => {
            if retval == u32::MAX { "-1".to_string() } else { format!("{retval}") }
        }
        ResultType::Lock => {
            if retval != 0 {
                cache.insert(retval, slot.string_lossy().into_owned());
            }
            if retval == 0 { "NULL".to_string() } else { format!("0x{retval:08x}") }
        }
        ResultType::OldDirectoryLock => match cache.get(retval) {
            Some(path) if retval != 0 => format!("0x{retval:08x} (\"{path}\")"),
            _ if retval == 0 => "NULL".to_string(),
            _ => format!("0x{retval:08x}"),
        },
    }
}

/// One-character call-outcome summary shown in a trace line's final field
/// and consulted by the filter engine's `ERRORS` predicate: `O` success,
/// `E` error, `-` void or no error convention. A call whose return value
/// hasn't been published yet renders `P` (pending) — new relative to the
/// original's single `valid` flag, which couldn't distinguish "in flight"
/// from "never produced" (SPEC_FULL.md REDESIGN FLAGS item 2).
pub fn status_char(meta: &FunctionMetadata, slot: &EventSlot, return_ready: bool) -> char {
    if !return_ready {
        return 'P';
    }
    match meta.error_check {
        atrace_proto::ErrorCheck::Void => '-',
        _ if is_error(meta, slot.retval) => 'E',
        _ => 'O',
    }
}

/// Formats the wall-clock instant a poll batch was drained, `HH:MM:SS.mmm`,
/// UTC. Computed once per batch by the caller and threaded into every
/// `trace_format_event` call for that batch, not recomputed per event.
pub fn format_timestamp_now() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let millis = since_epoch.as_millis();
    let ms = millis % 1000;
    let secs_today = (millis / 1000) % 86_400;
    let h = secs_today / 3600;
    let m = (secs_today % 3600) / 60;
    let s = secs_today % 60;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

/// Tab-separated trace line: `seq\ttime\tlib.func\ttask\targs\tretval\tstatus`.
pub fn trace_format_event(
    meta: &FunctionMetadata,
    slot: &EventSlot,
    task_name: &str,
    timestamp: &str,
    cache: &mut LockPathCache,
) -> String {
    let args = format_args(meta, slot);
    let return_ready = slot.flags & atrace_proto::FLAG_RETURN_READY != 0;
    let retval = if return_ready {
        format_retval(meta, slot, cache)
    } else {
        "...".to_string()
    };
    let status = status_char(meta, slot, return_ready);
    format!(
        "{}\t{}\t{}.{}\t{}\t{}\t{}\t{}",
        slot.sequence,
        timestamp,
        meta.lib_id.name(),
        meta.name,
        task_name,
        args,
        retval,
        status
    )
}

/// True if this event, once its return value is in, would be shown under
/// an `ERRORS` filter. Exposed for callers that want to decide before the
/// return value lands.
pub fn would_be_error(meta: &FunctionMetadata, slot: &EventSlot) -> bool {
    slot.flags & atrace_proto::FLAG_RETURN_READY != 0 && is_error(meta, slot.retval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrace_proto::lookup_by_name;

    fn sample_slot() -> EventSlot {
        let mut slot = EventSlot::zeroed();
        slot.flags = atrace_proto::FLAG_ARGS_READY | atrace_proto::FLAG_RETURN_READY;
        slot.arg_count = 2;
        slot
    }

    #[test]
    fn open_formats_name_and_mode() {
        let meta = lookup_by_name("Open").unwrap();
        let mut slot = sample_slot();
        slot.set_string("RAM:test");
        slot.args[1] = MODE_NEWFILE;
        assert_eq!(format_args(meta, &slot), "\"RAM:test\",NEWFILE");
    }

    #[test]
    fn alloc_mem_decodes_memf_flags() {
        let meta = lookup_by_name("AllocMem").unwrap();
        let mut slot = sample_slot();
        slot.args[0] = 1024;
        slot.args[1] = MEMF_PUBLIC | MEMF_CLEAR;
        assert_eq!(format_args(meta, &slot), "1024,PUBLIC|CLEAR");
    }

    #[test]
    fn lock_then_current_dir_resolves_path() {
        let lock_meta = lookup_by_name("Lock").unwrap();
        let mut lock_slot = sample_slot();
        lock_slot.set_string("RAM:");
        lock_slot.retval = 0x1000;
        let mut cache = LockPathCache::new(32);
        assert_eq!(format_retval(lock_meta, &lock_slot, &mut cache), "0x00001000");

        let cd_meta = lookup_by_name("CurrentDir").unwrap();
        let mut cd_slot = sample_slot();
        cd_slot.retval = 0x1000;
        assert_eq!(
            format_retval(cd_meta, &cd_slot, &mut cache),
            "0x00001000 (\"RAM:\")"
        );
    }

    #[test]
    fn pending_return_is_marked_and_not_an_error() {
        let meta = lookup_by_name("OpenDevice").unwrap();
        let mut slot = sample_slot();
        slot.flags = atrace_proto::FLAG_ARGS_READY;
        let mut cache = LockPathCache::new(32);
        let line = trace_format_event(meta, &slot, "shell.1", "00:00:00.000", &mut cache);
        assert!(line.ends_with('P'));
        assert!(!would_be_error(meta, &slot));
    }

    #[test]
    fn line_has_seven_tab_separated_fields_in_order() {
        let meta = lookup_by_name("OpenLibrary").unwrap();
        let mut slot = sample_slot();
        slot.set_string("dos.library");
        slot.retval = 0x2000;
        let mut cache = LockPathCache::new(32);
        let line = trace_format_event(meta, &slot, "shell.1", "12:34:56.789", &mut cache);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 7);
        assert_eq!(fields[1], "12:34:56.789");
        assert_eq!(fields[2], "exec.OpenLibrary");
        assert_eq!(fields[3], "shell.1");
        assert_eq!(fields[6], "O");
    }

    #[test]
    fn timestamp_format_is_hh_mm_ss_mmm() {
        let ts = format_timestamp_now();
        assert_eq!(ts.len(), 12);
        assert_eq!(ts.as_bytes()[2], b':');
        assert_eq!(ts.as_bytes()[5], b':');
        assert_eq!(ts.as_bytes()[8], b'.');
    }
}
