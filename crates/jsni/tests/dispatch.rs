//! End-to-end host calls from a WAT module.

use std::sync::Arc;
use std::time::Duration;

use jsni::jsni_core::{ExecutionError, ModuleError};
use jsni::jsni_wire::{CallFrame, SlotAllocations};
use jsni::prelude::*;
use tracing_subscriber::EnvFilter;

/// A module with a bump allocator and one export per host call.
///
/// Names live at 16.., each followed by a String slot pointing at it.
/// Argument slots are built at 512. 640..1024 is free for frames staged by
/// the host. The heap starts at 1024. `alloc_jsni_value` remembers the last
/// array it handed out so the test can play the module's bookkeeping.
const GUEST: &str = r#"
(module
    (import "env" "jsni_call" (func $jsni_call (param i32 i32 i32) (result i32)))
    (memory (export "memory") 1)
    (global $next (mut i32) (i32.const 1024))
    (global $last_slots (mut i64) (i64.const 0))
    (global $last_count (mut i32) (i32.const 0))

    (func $alloc (export "alloc") (param $size i32) (result i64)
        (local $ptr i32)
        (local $end i32)
        (local $have i32)
        (local.set $ptr
            (i32.and (i32.add (global.get $next) (i32.const 7)) (i32.const -8)))
        (local.set $end (i32.add (local.get $ptr) (local.get $size)))
        (local.set $have (i32.mul (memory.size) (i32.const 65536)))
        (if (i32.gt_u (local.get $end) (local.get $have))
            (then
                (if (i32.eq
                        (memory.grow
                            (i32.shr_u
                                (i32.add
                                    (i32.sub (local.get $end) (local.get $have))
                                    (i32.const 65535))
                                (i32.const 16)))
                        (i32.const -1))
                    (then unreachable))))
        (global.set $next (local.get $end))
        (i64.or
            (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
            (i64.extend_i32_u (local.get $ptr))))

    (func (export "alloc_jsni_value") (param $count i32) (result i64)
        (local $ptr i64)
        (local.set $ptr (call $alloc (i32.mul (local.get $count) (i32.const 16))))
        (global.set $last_slots (local.get $ptr))
        (global.set $last_count (local.get $count))
        (local.get $ptr))

    (data (i32.const 16) "add")
    (data (i32.const 32) "\10\00\00\00\03\00\00\00\0c")
    (data (i32.const 96) "status")
    (data (i32.const 112) "\60\00\00\00\06\00\00\00\0c")
    (data (i32.const 128) "noop")
    (data (i32.const 144) "\80\00\00\00\04\00\00\00\0c")
    (data (i32.const 160) "missing")
    (data (i32.const 176) "\a0\00\00\00\07\00\00\00\0c")
    (data (i32.const 192) "fail")
    (data (i32.const 208) "\c0\00\00\00\04\00\00\00\0c")
    (data (i32.const 224) "echo")
    (data (i32.const 240) "\e0\00\00\00\04\00\00\00\0c")
    (data (i32.const 256) "hello")
    (data (i32.const 272) "\00\01\00\00\05\00\00\00\0c")
    (data (i32.const 288) "big")
    (data (i32.const 304) "\20\01\00\00\03\00\00\00\0c")
    (data (i32.const 320) "slow")
    (data (i32.const 336) "\40\01\00\00\04\00\00\00\0c")

    (func (export "call_add") (param $a i32) (param $b i32) (result i64)
        (local $handle i32)
        (i64.store (i32.const 512) (i64.extend_i32_s (local.get $a)))
        (i32.store8 (i32.const 520) (i32.const 2))
        (i64.store (i32.const 528) (i64.extend_i32_s (local.get $b)))
        (i32.store8 (i32.const 536) (i32.const 2))
        (local.set $handle
            (call $jsni_call (i32.const 32) (i32.const 512) (i32.const 2)))
        (i64.load (local.get $handle)))

    (func (export "call_status") (result i32)
        (call $jsni_call (i32.const 112) (i32.const 0) (i32.const 0)))

    (func (export "call_noop") (result i32)
        (call $jsni_call (i32.const 144) (i32.const 0) (i32.const 0)))

    (func (export "call_missing") (result i32)
        (call $jsni_call (i32.const 176) (i32.const 0) (i32.const 0)))

    (func (export "call_fail") (result i32)
        (call $jsni_call (i32.const 208) (i32.const 0) (i32.const 0)))

    (func (export "call_echo") (result i32)
        (call $jsni_call (i32.const 240) (i32.const 272) (i32.const 1)))

    (func (export "call_big") (result i32)
        (call $jsni_call (i32.const 304) (i32.const 0) (i32.const 0)))

    (func (export "call_slow") (result i32)
        (call $jsni_call (i32.const 336) (i32.const 0) (i32.const 0)))

    (func (export "call_frame") (param i32 i32 i32) (result i32)
        (call $jsni_call (local.get 0) (local.get 1) (local.get 2)))

    (func (export "last_slot_array") (result i64)
        (global.get $last_slots))

    (func (export "last_slot_count") (result i32)
        (global.get $last_count))

    (func (export "heap_top") (result i32)
        (global.get $next))

    (func (export "spin")
        (loop $forever (br $forever)))
)
"#;

const BIG_LEN: usize = 200_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn builder() -> JsniBuilder {
    init_tracing();
    Jsni::builder()
        .register_sync("add", |args| {
            let sum = args.iter().filter_map(JsniValue::as_i64).sum();
            Ok(vec![JsniValue::I64(sum)])
        })
        .register_sync("status", |_| Ok(vec![JsniValue::from("ok")]))
        .register_sync("noop", |_| Ok(vec![]))
        .register_sync("fail", |_| Err(CallbackError::failed("backend unavailable")))
        .register_sync("echo", Ok)
        .register_sync("big", |_| Ok(vec![JsniValue::String("x".repeat(BIG_LEN))]))
        .register_async("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(vec![JsniValue::Bool(true)])
        })
}

async fn guest(runtime: &JsniRuntime) -> JsniInstance {
    let module = runtime.load_wat(GUEST).unwrap();
    runtime.instantiate(&module).await.unwrap()
}

/// Read the result slot at `handle` and the string it points at,
/// terminator included.
fn read_string_result(instance: &mut JsniInstance, handle: i32) -> (ValueKind, Vec<u8>) {
    let raw: [u8; 16] = instance
        .read_memory(handle as u32, 16)
        .unwrap()
        .try_into()
        .unwrap();
    let slot = Slot::from_bytes(&raw);
    let (offset, len) = slot.region_parts();
    let bytes = instance.read_memory(offset, len + 1).unwrap();
    (slot.kind().unwrap(), bytes)
}

#[tokio::test]
async fn add_returns_scalar_result() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let sum: i64 = instance.call("call_add", (5i32, 7i32)).await.unwrap();
    assert_eq!(sum, 12);

    let negative: i64 = instance.call("call_add", (-5i32, 2i32)).await.unwrap();
    assert_eq!(negative, -3);
}

#[tokio::test]
async fn string_result_is_zero_terminated() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let handle: i32 = instance.call("call_status", ()).await.unwrap();
    let (kind, bytes) = read_string_result(&mut instance, handle);

    assert_eq!(kind, ValueKind::String);
    assert_eq!(bytes, vec![0x6F, 0x6B, 0x00]);
}

#[tokio::test]
async fn string_argument_round_trips() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let handle: i32 = instance.call("call_echo", ()).await.unwrap();
    let (kind, bytes) = read_string_result(&mut instance, handle);

    assert_eq!(kind, ValueKind::String);
    assert_eq!(bytes, b"hello\0");
}

/// Stage `frame` in the module's scratch area and call through it.
async fn call_with_frame(instance: &mut JsniInstance, frame: &CallFrame) -> i32 {
    assert!(frame.base() >= 640 && frame.end() <= 1024);
    instance.write_memory(frame.base(), frame.bytes()).unwrap();
    instance
        .call("call_frame", (frame.name_ptr(), frame.args_ptr(), frame.args_count()))
        .await
        .unwrap()
}

#[tokio::test]
async fn frame_arguments_echo_back_by_handle() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let args = [
        JsniValue::from("wire"),
        JsniValue::Bytes(vec![1, 2, 3]),
        JsniValue::I16(-4),
        JsniValue::F32(1.5),
        JsniValue::Null,
    ];
    let frame = CallFrame::build(640, "echo", &args).unwrap();
    let returned = call_with_frame(&mut instance, &frame).await;

    let mut slots = SlotAllocations::new();
    let array: i64 = instance.call("last_slot_array", ()).await.unwrap();
    let count: i32 = instance.call("last_slot_count", ()).await.unwrap();
    slots.record(FatPtr::from_raw(array as u64), count as u32);

    let size = instance.memory_size().unwrap() as u32;
    let memory = instance.read_memory(0, size).unwrap();
    assert_eq!(slots.read_return(&memory, returned).unwrap(), args);
    assert!(slots.is_empty());
}

#[tokio::test]
async fn frame_call_with_no_results_reads_nothing() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let frame = CallFrame::build(640, "noop", &[JsniValue::U8(1)]).unwrap();
    let returned = call_with_frame(&mut instance, &frame).await;

    let mut slots = SlotAllocations::new();
    assert_eq!(returned, FatPtr::NO_RETURN);
    assert!(slots.read_return(&[], returned).unwrap().is_empty());
}

#[tokio::test]
async fn write_memory_is_bounds_checked() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;
    let size = instance.memory_size().unwrap() as u32;

    instance.write_memory(size - 2, &[7, 7]).unwrap();
    assert_eq!(instance.read_memory(size - 2, 2).unwrap(), vec![7, 7]);
    assert!(matches!(
        instance.write_memory(size - 1, &[0, 0]),
        Err(JsniError::Dispatch(HostError::MemoryAccessOutOfBounds { .. }))
    ));
}

#[tokio::test]
async fn empty_result_allocates_nothing() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let before: i32 = instance.call("heap_top", ()).await.unwrap();
    let handle: i32 = instance.call("call_noop", ()).await.unwrap();
    let after: i32 = instance.call("heap_top", ()).await.unwrap();

    assert_eq!(handle, -1);
    assert_eq!(before, after);
}

#[tokio::test]
async fn unresolved_name_fails_without_writing() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let before: i32 = instance.call("heap_top", ()).await.unwrap();
    let result = instance.call::<(), i32>("call_missing", ()).await;

    match result {
        Err(JsniError::Dispatch(HostError::UnresolvedFunction(name))) => {
            assert_eq!(name, "missing");
        }
        other => panic!("expected unresolved function, got {other:?}"),
    }

    let after: i32 = instance.call("heap_top", ()).await.unwrap();
    assert_eq!(before, after);

    let snapshot = runtime.metrics().snapshot();
    assert_eq!(snapshot.calls.unresolved_counts.get("missing"), Some(&1));
}

#[tokio::test]
async fn callback_failure_surfaces() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let result = instance.call::<(), i32>("call_fail", ()).await;

    match result {
        Err(JsniError::Dispatch(HostError::CallbackFailed { function, message })) => {
            assert_eq!(function, "fail");
            assert_eq!(message, "backend unavailable");
        }
        other => panic!("expected callback failure, got {other:?}"),
    }
}

#[tokio::test]
async fn large_result_grows_memory() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;
    assert_eq!(instance.memory_size().unwrap(), 65536);

    let handle: i32 = instance.call("call_big", ()).await.unwrap();

    assert!(instance.memory_size().unwrap() > BIG_LEN);
    let raw: [u8; 16] = instance
        .read_memory(handle as u32, 16)
        .unwrap()
        .try_into()
        .unwrap();
    let slot = Slot::from_bytes(&raw);
    let (offset, len) = slot.region_parts();
    assert_eq!(len as usize, BIG_LEN);

    let bytes = instance.read_memory(offset, len + 1).unwrap();
    assert!(bytes[..BIG_LEN].iter().all(|&b| b == b'x'));
    assert_eq!(bytes[BIG_LEN], 0);
}

#[tokio::test]
async fn slow_callback_hits_timeout() {
    let runtime = builder()
        .with_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut instance = guest(&runtime).await;

    let result = instance.call::<(), i32>("call_slow", ()).await;

    assert!(matches!(
        result,
        Err(JsniError::Execution(ExecutionError::Timeout(limit))) if limit == Duration::from_millis(50)
    ));
}

#[tokio::test]
async fn runaway_guest_runs_out_of_fuel() {
    let runtime = builder().with_fuel_limit(10_000).build().unwrap();
    let mut instance = guest(&runtime).await;

    let result = instance.call_void("spin").await;

    assert!(matches!(
        result,
        Err(JsniError::Execution(ExecutionError::OutOfFuel { limit: 10_000 }))
    ));
}

#[tokio::test]
async fn module_without_allocators_is_rejected() {
    let runtime = builder().build().unwrap();
    let module = runtime
        .load_wat(
            r#"
        (module
            (import "env" "jsni_call" (func (param i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "alloc") (param i32) (result i64) i64.const 0)
        )
    "#,
        )
        .unwrap();

    let err = runtime.instantiate(&module).await.unwrap_err();
    match err {
        JsniError::Module(ModuleError::AbiMismatch(message)) => {
            assert!(message.contains("alloc_jsni_value"));
        }
        other => panic!("expected ABI mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn calls_are_observed() {
    let collector = Arc::new(CollectingSubscriber::new(100));
    let runtime = builder()
        .with_event_subscriber(collector.clone())
        .build()
        .unwrap();
    let mut instance = guest(&runtime).await;

    let _: i64 = instance.call("call_add", (1i32, 2i32)).await.unwrap();
    let _ = instance.call::<(), i32>("call_fail", ()).await;

    assert_eq!(
        collector.event_types(),
        vec!["call_started", "call_completed", "call_started", "call_failed"]
    );

    let snapshot = runtime.metrics().snapshot();
    assert_eq!(snapshot.calls.call_counts.get("add"), Some(&1));
    assert_eq!(snapshot.calls.failure_counts.get("fail"), Some(&1));
    assert_eq!(snapshot.transfer.slots_decoded, 2);
    assert_eq!(snapshot.transfer.slots_encoded, 1);
}

#[tokio::test]
async fn late_registration_is_visible() {
    let runtime = builder().build().unwrap();
    let mut instance = guest(&runtime).await;

    let err = instance.call::<(), i32>("call_missing", ()).await;
    assert!(err.is_err());

    runtime
        .registry()
        .register_sync("missing", |_| Ok(vec![JsniValue::from("found")]));

    let handle: i32 = instance.call("call_missing", ()).await.unwrap();
    let (_, bytes) = read_string_result(&mut instance, handle);
    assert_eq!(bytes, b"found\0");
}
