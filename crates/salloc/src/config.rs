/// What happens to a slab when its last item is freed, provided it filled
/// up since it was last released. Other emptied slabs are always pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Keep the pages; the slab waits in the arena pool.
    Retain,
    /// Advise the kernel to drop every page past the header, then pool it.
    Advise,
    /// Unmap grow-arena slabs. Fixed-arena slabs are pooled.
    Unmap,
}

impl Default for ReleasePolicy {
    fn default() -> Self {
        ReleasePolicy::Advise
    }
}

/// Settings of one allocator context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Bytes reserved up front for the fixed arena. Zero means no fixed arena.
    pub fixed_arena_size: usize,
    pub minimum_item_size: usize,
    pub growth_factor: f64,
    pub release_policy: ReleasePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fixed_arena_size: 0,
            minimum_item_size: 16,
            growth_factor: 2.0,
            release_policy: ReleasePolicy::default(),
        }
    }
}

impl Config {
    pub fn new(fixed_arena_size: usize, minimum_item_size: usize, growth_factor: f64) -> Self {
        Config {
            fixed_arena_size,
            minimum_item_size,
            growth_factor,
            ..Config::default()
        }
    }

    pub fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }

    /// Defaults overridden by `SALLOC_ARENA_SIZE`, `SALLOC_MIN_ITEM`,
    /// `SALLOC_FACTOR` and `SALLOC_RELEASE`. Malformed values are ignored.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        unsafe {
            if let Some(val) = getenv_usize(b"SALLOC_ARENA_SIZE\0") {
                config.fixed_arena_size = val;
            }
            if let Some(val) = getenv_usize(b"SALLOC_MIN_ITEM\0") {
                config.minimum_item_size = val;
            }
            if let Some(val) = getenv(b"SALLOC_FACTOR\0").and_then(parse_factor) {
                config.growth_factor = val;
            }
            if let Some(val) = getenv(b"SALLOC_RELEASE\0").and_then(parse_policy) {
                config.release_policy = val;
            }
        }
        config
    }
}

/// Raw bytes of an environment variable, without the terminating NUL.
///
/// # Safety
/// Calls libc::getenv, which races with concurrent `setenv`.
unsafe fn getenv(key: &[u8]) -> Option<&'static [u8]> {
    debug_assert_eq!(key.last(), Some(&0));
    let val = libc::getenv(key.as_ptr() as *const libc::c_char);
    if val.is_null() {
        return None;
    }
    Some(core::ffi::CStr::from_ptr(val).to_bytes())
}

/// Parse an environment variable as a usize.
///
/// # Safety
/// Calls libc::getenv.
unsafe fn getenv_usize(key: &[u8]) -> Option<usize> {
    getenv(key).and_then(parse_usize)
}

fn parse_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None; // Invalid
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
    }
    Some(result)
}

fn parse_factor(bytes: &[u8]) -> Option<f64> {
    let factor: f64 = core::str::from_utf8(bytes).ok()?.trim().parse().ok()?;
    if factor.is_finite() && factor > 0.0 {
        Some(factor)
    } else {
        None
    }
}

fn parse_policy(bytes: &[u8]) -> Option<ReleasePolicy> {
    match bytes {
        b"retain" => Some(ReleasePolicy::Retain),
        b"advise" => Some(ReleasePolicy::Advise),
        b"unmap" => Some(ReleasePolicy::Unmap),
        _ => None,
    }
}
