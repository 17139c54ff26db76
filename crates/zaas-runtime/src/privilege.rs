/// Source of truth for whether the process may provision this host.
pub trait Privilege {
    fn is_elevated(&self) -> bool;
}

/// Checks the effective uid of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveUid;

impl Privilege for EffectiveUid {
    fn is_elevated(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }
}
