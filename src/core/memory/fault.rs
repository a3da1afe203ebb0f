// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Host write-fault delivery
//!
//! On unix hosts tracked pages are write-protected with `mprotect`. A guest
//! write into such a page raises `SIGSEGV` (or `SIGBUS` on some platforms);
//! the handler installed here routes the faulting address to the global
//! [`FaultRouter`]. When a tracker claims the address it has already lifted
//! the protection, so returning from the handler retries the write. Faults no
//! tracker claims are handed back to the previously installed disposition.
//!
//! The handler locks tracker region tables. This is the one place where a
//! thread other than the GPU thread touches cache state.

use std::sync::OnceLock;

use super::tracking::{FaultRouter, PageProtect};
use super::MemoryError;

/// Install the process-wide write-fault handler
///
/// Idempotent; the first call's outcome is returned to every caller.
pub fn install_fault_handler() -> Result<(), MemoryError> {
    static INSTALLED: OnceLock<Result<(), MemoryError>> = OnceLock::new();
    INSTALLED
        .get_or_init(|| {
            let result = imp::install();
            if result.is_ok() {
                log::info!("Installed write-fault handler for page tracking");
            }
            result
        })
        .clone()
}

/// Page protection backed by the host MMU where available
pub fn host_page_protection() -> Box<dyn PageProtect> {
    #[cfg(unix)]
    {
        Box::new(imp::MprotectPages)
    }
    #[cfg(not(unix))]
    {
        Box::new(super::tracking::NoProtect)
    }
}

fn route_fault(addr: u64) -> bool {
    FaultRouter::global().dispatch(addr)
}

#[cfg(unix)]
mod imp {
    use std::ffi::c_void;
    use std::sync::OnceLock;

    use super::{route_fault, MemoryError, PageProtect};

    struct Previous {
        segv: libc::sigaction,
        bus: libc::sigaction,
    }

    // SAFETY: plain signal disposition data, written once before any fault is routed
    unsafe impl Send for Previous {}
    unsafe impl Sync for Previous {}

    static PREVIOUS: OnceLock<Previous> = OnceLock::new();

    /// `mprotect`-based page protection
    pub struct MprotectPages;

    fn mprotect(start: u64, len: u64, prot: libc::c_int) -> Result<(), MemoryError> {
        // SAFETY: tracked ranges are page aligned guest mappings
        let rc = unsafe { libc::mprotect(start as usize as *mut c_void, len as usize, prot) };
        if rc != 0 {
            return Err(MemoryError::Protect(format!(
                "mprotect(0x{:X}, {}) failed: {}",
                start,
                len,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    impl PageProtect for MprotectPages {
        fn protect(&self, start: u64, len: u64) -> Result<(), MemoryError> {
            mprotect(start, len, libc::PROT_READ)
        }

        fn unprotect(&self, start: u64, len: u64) -> Result<(), MemoryError> {
            mprotect(start, len, libc::PROT_READ | libc::PROT_WRITE)
        }

        fn is_hardware(&self) -> bool {
            true
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn fault_address(info: &libc::siginfo_t) -> u64 {
        // SAFETY: SIGSEGV/SIGBUS always carry a fault address
        unsafe { info.si_addr() as u64 }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn fault_address(info: &libc::siginfo_t) -> u64 {
        info.si_addr as u64
    }

    extern "C" fn handle_fault(sig: libc::c_int, info: *mut libc::siginfo_t, _ctx: *mut c_void) {
        // SAFETY: the kernel passes a valid siginfo for SA_SIGINFO handlers
        let addr = fault_address(unsafe { &*info });
        if route_fault(addr) {
            return;
        }

        // Not ours: restore the previous disposition and let the retried
        // access fault into it
        if let Some(previous) = PREVIOUS.get() {
            let action = if sig == libc::SIGBUS {
                &previous.bus
            } else {
                &previous.segv
            };
            // SAFETY: restoring a disposition captured at install time
            unsafe {
                libc::sigaction(sig, action, std::ptr::null_mut());
            }
        }
    }

    pub fn install() -> Result<(), MemoryError> {
        // SAFETY: sigaction structs are plain data; zeroed is a valid initial state
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void) =
                handle_fault;
            action.sa_sigaction = handler as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
            libc::sigemptyset(&mut action.sa_mask);

            let mut segv: libc::sigaction = std::mem::zeroed();
            let mut bus: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(libc::SIGSEGV, &action, &mut segv) != 0
                || libc::sigaction(libc::SIGBUS, &action, &mut bus) != 0
            {
                return Err(MemoryError::Protect(format!(
                    "sigaction failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            let _ = PREVIOUS.set(Previous { segv, bus });
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod imp {
    use super::MemoryError;

    pub fn install() -> Result<(), MemoryError> {
        Err(MemoryError::Protect(
            "write-fault tracking is not supported on this host".into(),
        ))
    }
}
