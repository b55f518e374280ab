#![no_main]

use libfuzzer_sys::fuzz_target;
use salloc::{ArenaKind, ClassHooks, ClassId, Config, ReleasePolicy, SlabAllocator};
use std::ptr::NonNull;

/// Fuzz target that interprets a byte slice as a sequence of allocator operations.
///
/// The first byte picks the release policy and whether a fixed arena is
/// reserved. Each following operation is encoded as:
///   byte 0: opcode (0=allocate, 1=free, 2=class_allocate, 3=class_free)
///   byte 1-3: size (little-endian, 24 bits)
///   byte 4: slot index (which tracked pointer to operate on)
///
/// We track up to 64 live pointers and check each one still holds its fill
/// pattern when it is freed.
const MAX_SLOTS: usize = 64;

#[derive(Clone, Copy)]
struct Live {
    ptr: NonNull<u8>,
    size: usize,
    fill: u8,
    class: Option<ClassId>,
}

fuzz_target!(|data: &[u8]| {
    let Some((&setup, ops)) = data.split_first() else {
        return;
    };
    let policy = match setup & 0x03 {
        0 => ReleasePolicy::Retain,
        1 => ReleasePolicy::Advise,
        _ => ReleasePolicy::Unmap,
    };
    let fixed = if setup & 0x04 != 0 { 2 * salloc::util::SLAB_SIZE } else { 0 };
    let mut a = SlabAllocator::new(Config::new(fixed, 16, 1.5).with_release_policy(policy));
    let class = a
        .create_class(200, ArenaKind::Grow, ClassHooks::default(), Some("fuzz"))
        .unwrap();

    let mut slots: [Option<Live>; MAX_SLOTS] = [None; MAX_SLOTS];

    let release = |a: &mut SlabAllocator, live: Live| {
        let bytes = unsafe { std::slice::from_raw_parts(live.ptr.as_ptr(), live.size) };
        assert!(bytes.iter().all(|&b| b == live.fill), "item contents clobbered");
        unsafe {
            match live.class {
                Some(class) => a.class_free(class, live.ptr),
                None => a.free(live.ptr),
            }
        }
    };

    for (n, op) in ops.chunks_exact(5).enumerate() {
        let opcode = op[0] & 0x03;
        let size = u32::from_le_bytes([op[1], op[2], op[3], 0]) as usize;
        let slot = (op[4] as usize) % MAX_SLOTS;
        let fill = n as u8;

        match opcode {
            0 | 2 => {
                if let Some(live) = slots[slot].take() {
                    release(&mut a, live);
                }
                let (result, size, class) = if opcode == 0 {
                    (a.allocate(size), size, None)
                } else {
                    (a.class_allocate(class), 200, Some(class))
                };
                if let Ok(ptr) = result {
                    assert!(unsafe { a.usable_size(ptr) } >= size);
                    unsafe { std::ptr::write_bytes(ptr.as_ptr(), fill, size) };
                    slots[slot] = Some(Live { ptr, size, fill, class });
                }
            }
            _ => {
                if let Some(live) = slots[slot].take() {
                    release(&mut a, live);
                }
            }
        }
    }

    assert!(a.check_redzones().is_ok());

    // Cleanup
    for slot in &mut slots {
        if let Some(live) = slot.take() {
            release(&mut a, live);
        }
    }
    assert_eq!(a.stats().items, 0);
});
