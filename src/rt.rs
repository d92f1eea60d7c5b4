/*
 *  rt.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  OS-level plumbing: interrupt flag, realtime scheduling, affinity,
 *  privilege drop
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

// Signal handlers can't carry context, so the interrupt flag is the
// one piece of process-wide state. Everything polls it cooperatively.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Route SIGINT and SIGTERM into the interrupt flag.
pub fn install_signal_handlers() {
    let handler: extern "C" fn(libc::c_int) = on_signal;
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

pub fn interrupt_requested() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Programmatic shutdown, same path as a signal.
pub fn request_interrupt() {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// SCHED_FIFO for the calling thread. False when the system says no
/// (missing privileges, rlimits); callers log and carry on.
pub fn set_realtime_priority(priority: i32) -> bool {
    let param = libc::sched_param { sched_priority: priority };
    unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) == 0 }
}

/// Pin the calling thread to one CPU.
pub fn pin_to_cpu(cpu: usize) -> bool {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu % online_cpus(), &mut set);
        libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        ) == 0
    }
}

pub fn online_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    n.max(1) as usize
}

/// Give up root once the GPIO window is mapped. No-op when not root.
pub fn drop_privileges() {
    unsafe {
        if libc::geteuid() != 0 {
            return;
        }
        let name = CString::new("daemon").expect("static name");
        let pw = libc::getpwnam(name.as_ptr());
        if pw.is_null() {
            warn!("FYI: no 'daemon' user, keeping root");
            return;
        }
        let uid = (*pw).pw_uid;
        let gid = (*pw).pw_gid;
        if libc::setgid(gid) != 0 || libc::setuid(uid) != 0 {
            warn!("FYI: dropping privileges failed, keeping root");
        } else {
            info!("dropped privileges to daemon ({}:{})", uid, gid);
        }
    }
}
