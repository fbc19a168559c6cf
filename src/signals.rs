//! シグナルハンドラと、子プロセス状態変化の同期的な反映。
//!
//! ハンドラはアトミック変数の読み書きと `kill` しかしない（async-signal-safe）。
//! ジョブテーブルの更新と通知の出力は、REPL ループが 1 周ごとに呼ぶ [`reconcile`] で行う。
//!
//! | シグナル | 動作 |
//! |---------|------|
//! | SIGCHLD | 保留フラグを立てるだけ |
//! | SIGINT / SIGTSTP | フォアグラウンドグループがあれば `kill(-pgid, sig)` で転送 |
//! | SIGTTIN / SIGTTOU | 無視（シェル自身が端末アクセスで止まらないように） |
//!
//! ジョブの状態遷移: `Running --停止--> Stopped --SIGCONT--> Running --終了/シグナル死--> (削除)`

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use libc::{c_int, pid_t};

use crate::job::{ChildEvent, JobTable};

/// SIGCHLD を受けたら立つ。クリアは [`reconcile`] だけが行う。
static CHILD_PENDING: AtomicBool = AtomicBool::new(false);

/// 端末を持っているフォアグラウンドグループ。0 はなし。
static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);

// ── フォアグラウンド記録 ─────────────────────────────────────────────

pub fn set_foreground(pgid: pid_t) {
    FOREGROUND_PGID.store(pgid, Ordering::SeqCst);
}

pub fn clear_foreground() {
    FOREGROUND_PGID.store(0, Ordering::SeqCst);
}

pub fn foreground() -> Option<pid_t> {
    match FOREGROUND_PGID.load(Ordering::SeqCst) {
        0 => None,
        pgid => Some(pgid),
    }
}

// ── ハンドラ ─────────────────────────────────────────────────────────

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__error()
}

extern "C" fn on_sigchld(_sig: c_int) {
    CHILD_PENDING.store(true, Ordering::SeqCst);
}

/// SIGINT / SIGTSTP をフォアグラウンドグループ全体に転送する。
extern "C" fn forward_to_foreground(sig: c_int) {
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    if pgid > 0 {
        unsafe {
            let errno = errno_location();
            let saved = *errno;
            libc::kill(-pgid, sig);
            *errno = saved;
        }
    }
}

fn set_handler(sig: c_int, handler: libc::sighandler_t) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// 起動時に 1 回だけ呼ぶ。
pub fn install() -> io::Result<()> {
    set_handler(libc::SIGCHLD, on_sigchld as extern "C" fn(c_int) as libc::sighandler_t)?;
    let forward = forward_to_foreground as extern "C" fn(c_int) as libc::sighandler_t;
    set_handler(libc::SIGINT, forward)?;
    set_handler(libc::SIGTSTP, forward)?;
    set_handler(libc::SIGTTIN, libc::SIG_IGN)?;
    set_handler(libc::SIGTTOU, libc::SIG_IGN)?;
    Ok(())
}

/// 子プロセス側で呼ぶ。シェルが変更したシグナルをすべて既定動作に戻す。
pub fn reset_to_default() {
    unsafe {
        for sig in [libc::SIGCHLD, libc::SIGINT, libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU] {
            libc::signal(sig, libc::SIG_DFL);
        }
    }
}

/// 保留フラグを取り出してクリアする。
pub fn take_pending() -> bool {
    CHILD_PENDING.swap(false, Ordering::SeqCst)
}

/// 保留フラグを立てる。SIGCHLD を待たずに次の [`reconcile`] で回収させたいときに使う。
pub fn mark_pending() {
    CHILD_PENDING.store(true, Ordering::SeqCst);
}

// ── 反映 ─────────────────────────────────────────────────────────────

/// 1 件の状態変化をジョブテーブルに反映し、必要な通知を `out` に書く。
///
/// テーブルにない PID は無視する。通知を書いたら `true`。
pub fn apply_event(jobs: &mut JobTable, pid: pid_t, event: ChildEvent, out: &mut dyn Write) -> io::Result<bool> {
    let Some(index) = jobs.position_by_pid(pid) else {
        log::debug!("untracked child {} changed state: {:?}", pid, event);
        return Ok(false);
    };
    match event {
        ChildEvent::Exited(_) => {
            if let Some(job) = jobs.remove(index) {
                writeln!(out, "{}", job.exit_notice())?;
            }
            Ok(true)
        }
        ChildEvent::Signaled(sig) => {
            if let Some(job) = jobs.remove(index) {
                writeln!(out, "{}", job.signal_notice(sig))?;
            }
            Ok(true)
        }
        ChildEvent::Stopped(_) => {
            if let Some(job) = jobs.mark_stopped(pid) {
                writeln!(out, "\n{}", job.stop_notice())?;
            }
            Ok(true)
        }
        ChildEvent::Continued => {
            jobs.mark_running(pid);
            Ok(false)
        }
    }
}

/// 保留フラグが立っていれば、回収可能な状態変化をすべてノンブロッキングで反映する。
///
/// REPL ループの 1 周ごとに呼ぶ。書いた通知の数を返す。
pub fn reconcile(jobs: &mut JobTable, out: &mut dyn Write) -> usize {
    if !take_pending() {
        return 0;
    }
    let mut notices = 0;
    loop {
        let mut raw_status: i32 = 0;
        let pid = unsafe {
            libc::waitpid(
                -1,
                &mut raw_status,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };
        // 0: 変化なし、-1: 子プロセスなし（ECHILD）
        if pid <= 0 {
            break;
        }
        let Some(event) = ChildEvent::from_raw(raw_status) else {
            continue;
        };
        match apply_event(jobs, pid, event, out) {
            Ok(true) => notices += 1,
            Ok(false) => {}
            Err(e) => log::warn!("failed to write job notice: {}", e),
        }
    }
    let _ = out.flush();
    notices
}
