//! Access rights
//!
//! Rights granted by a translation are the logical AND of the rights of every entry on the walk.

use vmx::EptRights;

/// What an access does.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum AccessKind {
    Read,
    Write,
    /// Instruction fetch.
    Fetch,
}

/// A memory access, from supervisor or user mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct Access {
    pub kind: AccessKind,
    /// Access from CPL 3.
    pub user: bool,
}

impl Access {
    pub const fn read() -> Self {
        Self {
            kind: AccessKind::Read,
            user: false,
        }
    }

    pub const fn write() -> Self {
        Self {
            kind: AccessKind::Write,
            user: false,
        }
    }

    pub const fn fetch() -> Self {
        Self {
            kind: AccessKind::Fetch,
            user: false,
        }
    }

    /// The same access, from user mode.
    pub const fn from_user(self) -> Self {
        Self { user: true, ..self }
    }
}

/// Rights granted by a translation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct AccessRights {
    pub read: bool,
    pub write: bool,
    /// User-mode accesses are allowed.
    pub user: bool,
    pub execute_supervisor: bool,
    pub execute_user: bool,
}

impl AccessRights {
    /// Rights before the first level of a walk.
    pub const ALL: AccessRights = AccessRights {
        read: true,
        write: true,
        user: true,
        execute_supervisor: true,
        execute_user: true,
    };

    /// Rights granted by a present 32-bit or 4-level paging entry.
    pub const fn paging(writable: bool, user: bool, execute_disabled: bool) -> Self {
        Self {
            read: true,
            write: writable,
            user,
            execute_supervisor: !execute_disabled,
            execute_user: user && !execute_disabled,
        }
    }

    /// Rights granted by an EPT entry. EPT does not distinguish user accesses, except for
    /// instruction fetches under mode-based execute control. Without it the supervisor execute bit
    /// governs all fetches.
    pub const fn ept(rights: EptRights, mode_based_execute: bool) -> Self {
        Self {
            read: rights.read,
            write: rights.write,
            user: true,
            execute_supervisor: rights.supervisor_execute,
            execute_user: if mode_based_execute {
                rights.user_execute
            } else {
                rights.supervisor_execute
            },
        }
    }

    pub const fn intersect(self, other: AccessRights) -> AccessRights {
        AccessRights {
            read: self.read && other.read,
            write: self.write && other.write,
            user: self.user && other.user,
            execute_supervisor: self.execute_supervisor && other.execute_supervisor,
            execute_user: self.execute_user && other.execute_user,
        }
    }

    /// Whether the rights allow `access`, supervisor writes honoring read-only pages (CR0.WP set).
    pub const fn permits(self, access: Access) -> bool {
        if access.user && !self.user {
            return false;
        }
        match access.kind {
            AccessKind::Read => self.read,
            AccessKind::Write => self.write,
            AccessKind::Fetch if access.user => self.execute_user,
            AccessKind::Fetch => self.execute_supervisor,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn paging_rights() {
        let kernel_rw = AccessRights::paging(true, false, true);
        assert!(kernel_rw.permits(Access::read()));
        assert!(kernel_rw.permits(Access::write()));
        assert!(!kernel_rw.permits(Access::fetch()));
        assert!(!kernel_rw.permits(Access::read().from_user()));

        let user_code = AccessRights::paging(false, true, false);
        assert!(user_code.permits(Access::fetch().from_user()));
        assert!(user_code.permits(Access::fetch()));
        assert!(!user_code.permits(Access::write().from_user()));
    }

    #[test]
    fn rights_accumulate() {
        let upper = AccessRights::paging(true, true, false);
        let lower = AccessRights::paging(false, true, true);
        let rights = AccessRights::ALL.intersect(upper).intersect(lower);
        assert_eq!(
            rights,
            AccessRights {
                read: true,
                write: false,
                user: true,
                execute_supervisor: false,
                execute_user: false,
            }
        );
    }

    #[test]
    fn ept_rights() {
        let rights = EptRights {
            read: true,
            write: false,
            supervisor_execute: false,
            user_execute: true,
        };
        let legacy = AccessRights::ept(rights, false);
        assert!(!legacy.permits(Access::fetch()));
        assert!(!legacy.permits(Access::fetch().from_user()));

        let mode_based = AccessRights::ept(rights, true);
        assert!(!mode_based.permits(Access::fetch()));
        assert!(mode_based.permits(Access::fetch().from_user()));
        assert!(mode_based.permits(Access::read().from_user()));
        assert!(!mode_based.permits(Access::write()));
    }
}
