//! フォアグラウンド制御: 端末の所有権を子プロセスグループに渡し、シェルに取り戻す。
//!
//! 「いま端末を持っているグループ」は [`signals`](crate::signals) のアトミック変数に記録する。
//! SIGINT / SIGTSTP ハンドラはそれを読んでフォアグラウンドグループへ転送する。
//! [`Foreground::acquire`] が返すガードは `Drop` で必ず [`Foreground::release`] を呼ぶので、
//! エラー経路でも端末が死んだグループに残らない。

use std::io;

use libc::pid_t;

use crate::signals;

/// 端末の所有権を管理する。
pub struct Foreground {
    /// シェル自身のプロセスグループ ID。
    shell_pgid: pid_t,
    /// 制御端末のファイルディスクリプタ（通常 STDIN_FILENO）。
    terminal_fd: i32,
}

impl Foreground {
    pub fn new(shell_pgid: pid_t, terminal_fd: i32) -> Self {
        Self {
            shell_pgid,
            terminal_fd,
        }
    }

    /// 端末を `pgid` に渡し、フォアグラウンドとして記録する。
    #[must_use = "dropping the guard immediately gives the terminal back"]
    pub fn acquire(&self, pgid: pid_t) -> ForegroundGuard<'_> {
        set_terminal_owner(self.terminal_fd, pgid);
        signals::set_foreground(pgid);
        ForegroundGuard { owner: self }
    }

    /// 端末をシェルのグループに戻し、フォアグラウンドの記録を消す。
    pub fn release(&self) {
        set_terminal_owner(self.terminal_fd, self.shell_pgid);
        signals::clear_foreground();
    }
}

/// [`Foreground::acquire`] のガード。
pub struct ForegroundGuard<'a> {
    owner: &'a Foreground,
}

impl Drop for ForegroundGuard<'_> {
    fn drop(&mut self) {
        self.owner.release();
    }
}

/// `tcsetpgrp` でターミナルのフォアグラウンドプロセスグループを設定する。
///
/// 制御端末がない（入力がパイプ等）場合は失敗するが、ジョブ制御を諦めるだけで実行は続ける。
/// シェルが SIGTTOU を無視しているため、バックグラウンドからの呼び出しでもブロックしない。
fn set_terminal_owner(terminal_fd: i32, pgid: pid_t) {
    if unsafe { libc::tcsetpgrp(terminal_fd, pgid) } != 0 {
        log::debug!("tcsetpgrp({}, {}): {}", terminal_fd, pgid, io::Error::last_os_error());
    }
}
