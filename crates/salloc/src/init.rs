use crate::allocator::SlabAllocator;
use crate::config::Config;
use crate::hardening::{abort_with_message, ActiveInstrument};
use core::cell::RefCell;

thread_local! {
    static CONTEXT: RefCell<Option<SlabAllocator<ActiveInstrument>>> = const { RefCell::new(None) };
}

/// Create this thread's allocator unless it already exists.
/// Returns `false` when the thread was already initialized.
pub fn initialize_with(config: Config) -> bool {
    access(|slot| {
        if slot.is_some() {
            return false;
        }
        *slot = Some(SlabAllocator::with_instrument(
            config,
            ActiveInstrument::default(),
        ));
        true
    })
}

/// Drop this thread's allocator. Every pointer it returned dangles after.
pub fn teardown() {
    let context = access(Option::take);
    drop(context);
}

pub fn is_initialized() -> bool {
    access(|slot| slot.is_some())
}

/// Run `f` on this thread's allocator, creating it from the environment on
/// first use.
#[inline]
pub fn with_allocator<R>(f: impl FnOnce(&mut SlabAllocator<ActiveInstrument>) -> R) -> R {
    access(|slot| f(slot.get_or_insert_with(ensure_initialized)))
}

#[cold]
#[inline(never)]
fn ensure_initialized() -> SlabAllocator<ActiveInstrument> {
    SlabAllocator::with_instrument(Config::from_env(), ActiveInstrument::default())
}

fn access<R>(f: impl FnOnce(&mut Option<SlabAllocator<ActiveInstrument>>) -> R) -> R {
    let result = CONTEXT.try_with(|cell| match cell.try_borrow_mut() {
        Ok(mut slot) => f(&mut slot),
        Err(_) => abort_with_message("salloc: thread allocator re-entered from a class hook\n"),
    });
    match result {
        Ok(r) => r,
        Err(_) => abort_with_message("salloc: thread allocator used after thread exit\n"),
    }
}
