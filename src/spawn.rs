//! `fork()` / `execvp()` の薄いラッパー。
//!
//! 子プロセスで必要なもの（argv の C 文字列、リダイレクト先パス）はすべて fork 前に用意し、
//! fork 後の子では async-signal-safe な呼び出しだけで exec まで進む。
//!
//! ## 構成
//!
//! | 型・関数 | 役割 |
//! |---------|------|
//! | [`CStringVec`] | argv 用の NULL 終端ポインタ配列 |
//! | [`ChildPlan`] | 子のプロセスグループ、stdin/stdout 接続先、閉じる fd |
//! | [`fork_child`] | fork して子の環境を整える。親・子どちらに戻ったかを [`Forked`] で返す |
//! | [`exec`] / [`exit_child`] | 子プロセスの終わらせ方（exec するか、ビルトイン後に `_exit`） |

use std::ffi::CString;
use std::io::{self, Write};
use std::os::unix::io::RawFd;

use libc::pid_t;

use crate::error::{BuildError, ShellError};
use crate::redirect::{StdinSource, StdoutSink};
use crate::signals;

// ── CStringVec ────────────────────────────────────────────────────

/// argv 用の CString ベクタ。NULL 終端のポインタ配列を構築する。
pub struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
    /// exec 失敗時に子が書くメッセージ。子でヒープ確保しないよう fork 前に作る。
    not_found: Vec<u8>,
}

impl CStringVec {
    /// 引数リストから構築する。NUL を含む引数があれば [`BuildError::InteriorNul`]。
    pub fn from_args(args: &[&str]) -> Result<Self, BuildError> {
        let strings = args
            .iter()
            .map(|s| CString::new(*s).map_err(|_| BuildError::InteriorNul))
            .collect::<Result<Vec<CString>, _>>()?;
        if strings.is_empty() {
            return Err(BuildError::EmptyCommand);
        }
        let mut ptrs: Vec<*const libc::c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null()); // NULL 終端
        Ok(Self {
            _strings: strings,
            ptrs,
            not_found: format!("{}\n", ShellError::CommandNotFound).into_bytes(),
        })
    }

    fn program(&self) -> *const libc::c_char {
        self.ptrs[0]
    }

    fn as_ptr(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }
}

// ── fork ──────────────────────────────────────────────────────────

/// 子プロセスの環境。
#[derive(Debug)]
pub struct ChildPlan {
    /// 参加するプロセスグループ。0 なら子自身がリーダーになる。
    pub pgid: pid_t,
    pub stdin: StdinSource,
    pub stdout: StdoutSink,
    /// 子で閉じる fd（他のステージのパイプ端など）。
    pub close_fds: Vec<RawFd>,
}

impl ChildPlan {
    /// パイプのない、単独プロセスグループの計画。
    pub fn standalone(stdin: StdinSource, stdout: StdoutSink) -> Self {
        Self {
            pgid: 0,
            stdin,
            stdout,
            close_fds: Vec::new(),
        }
    }
}

/// [`fork_child`] の戻り先。
#[derive(Debug, PartialEq, Eq)]
pub enum Forked {
    /// 子プロセス側。環境は整っている。呼び出し側は [`exec`] か [`exit_child`] で終わること。
    Child,
    /// 親プロセス側。子の PID。
    Parent(pid_t),
}

/// fork して子プロセスの環境を `plan` どおりに整える。
///
/// fork 前に stdout/stderr を flush し、未出力のバッファが子に複製されないようにする。
/// 親・子の両方で `setpgid` を呼び、どちらが先に走ってもグループが確定している状態にする。
pub fn fork_child(plan: &ChildPlan) -> Result<Forked, ShellError> {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(ShellError::Launch(io::Error::last_os_error()));
    }
    if pid == 0 {
        setup_child(plan);
        return Ok(Forked::Child);
    }

    let pgid = if plan.pgid == 0 { pid } else { plan.pgid };
    unsafe {
        libc::setpgid(pid, pgid);
    }
    log::debug!("forked pid={} pgid={}", pid, pgid);
    Ok(Forked::Parent(pid))
}

/// 子プロセス側の初期化。失敗したらメッセージを stderr に書いて `_exit(1)`。
fn setup_child(plan: &ChildPlan) {
    unsafe {
        libc::setpgid(0, plan.pgid);
    }
    signals::reset_to_default();
    for &fd in &plan.close_fds {
        unsafe {
            libc::close(fd);
        }
    }
    if plan.stdin.apply().is_err() {
        die(b"No such file or directory\n");
    }
    if plan.stdout.apply().is_err() {
        die(b"Unable to create file for writing\n");
    }
}

/// プログラムを exec する。失敗したら [`ShellError::CommandNotFound`] の文言を stderr に書いて `_exit(1)`。
pub fn exec(argv: &CStringVec) -> ! {
    unsafe {
        libc::execvp(argv.program(), argv.as_ptr());
    }
    die(&argv.not_found)
}

/// 子プロセス内で実行したビルトインの後始末。stdout を flush して `_exit`。
pub fn exit_child(status: i32) -> ! {
    let _ = io::stdout().flush();
    unsafe { libc::_exit(status) }
}

fn die(msg: &[u8]) -> ! {
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(1)
    }
}

/// パイプを作る。`[読み取り端, 書き込み端]`。
pub fn pipe() -> Result<[RawFd; 2], ShellError> {
    let mut fds = [-1; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(ShellError::Pipe(io::Error::last_os_error()));
    }
    Ok(fds)
}

pub fn close(fd: RawFd) {
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{wait_for_pid, ChildEvent};
    use crate::parser::OutputMode;
    use std::fs;

    /// fork して exec する。子ではヒープ確保をしない。
    fn run(argv: &[&str], plan: ChildPlan) -> ChildEvent {
        let argv = CStringVec::from_args(argv).unwrap();
        match fork_child(&plan).unwrap() {
            Forked::Child => exec(&argv),
            Forked::Parent(pid) => wait_for_pid(pid).unwrap(),
        }
    }

    #[test]
    fn cstring_vec_rejects_nul_and_empty() {
        assert!(matches!(CStringVec::from_args(&["a\0b"]), Err(BuildError::InteriorNul)));
        assert!(matches!(CStringVec::from_args(&[]), Err(BuildError::EmptyCommand)));
        let v = CStringVec::from_args(&["ls", "-l"]).unwrap();
        assert_eq!(v.ptrs.len(), 3);
        assert!(v.ptrs[2].is_null());
        assert_eq!(v.not_found, b"Command not found!\n");
    }

    #[test]
    #[serial_test::serial]
    fn exec_reports_exit_status() {
        let plan = ChildPlan::standalone(StdinSource::DevNull, StdoutSink::Inherit);
        assert_eq!(run(&["sh", "-c", "exit 4"], plan), ChildEvent::Exited(4));
    }

    #[test]
    #[serial_test::serial]
    fn unknown_program_exits_with_failure() {
        let plan = ChildPlan::standalone(StdinSource::DevNull, StdoutSink::Inherit);
        assert_eq!(run(&["jobsh-no-such-program-xyz"], plan), ChildEvent::Exited(1));
    }

    #[test]
    #[serial_test::serial]
    fn child_gets_its_own_process_group() {
        let plan = ChildPlan::standalone(StdinSource::DevNull, StdoutSink::Inherit);
        let argv = CStringVec::from_args(&["sleep", "0.2"]).unwrap();
        let pid = match fork_child(&plan).unwrap() {
            Forked::Child => exec(&argv),
            Forked::Parent(pid) => pid,
        };
        assert_eq!(unsafe { libc::getpgid(pid) }, pid);
        assert_ne!(pid, unsafe { libc::getpgrp() });
        assert_eq!(wait_for_pid(pid).unwrap(), ChildEvent::Exited(0));
    }

    #[test]
    #[serial_test::serial]
    fn stdin_from_file_and_stdout_append() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "from file\n").unwrap();
        fs::write(&output, "first\n").unwrap();
        let plan = ChildPlan::standalone(
            StdinSource::File(CString::new(input.to_str().unwrap()).unwrap()),
            StdoutSink::File {
                path: CString::new(output.to_str().unwrap()).unwrap(),
                mode: OutputMode::Append,
            },
        );
        assert_eq!(run(&["cat"], plan), ChildEvent::Exited(0));
        assert_eq!(fs::read_to_string(&output).unwrap(), "first\nfrom file\n");
    }

    #[test]
    #[serial_test::serial]
    fn pipe_connects_two_children() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.txt");
        let [read_end, write_end] = pipe().unwrap();

        let writer = CStringVec::from_args(&["echo", "through the pipe"]).unwrap();
        let first = ChildPlan {
            pgid: 0,
            stdin: StdinSource::DevNull,
            stdout: StdoutSink::Pipe(write_end),
            close_fds: vec![read_end],
        };
        let leader = match fork_child(&first).unwrap() {
            Forked::Child => exec(&writer),
            Forked::Parent(pid) => pid,
        };
        close(write_end);

        let reader = CStringVec::from_args(&["cat"]).unwrap();
        let second = ChildPlan {
            pgid: leader,
            stdin: StdinSource::Pipe(read_end),
            stdout: StdoutSink::File {
                path: CString::new(output.to_str().unwrap()).unwrap(),
                mode: OutputMode::Truncate,
            },
            close_fds: Vec::new(),
        };
        let follower = match fork_child(&second).unwrap() {
            Forked::Child => exec(&reader),
            Forked::Parent(pid) => pid,
        };
        close(read_end);

        assert_eq!(wait_for_pid(leader).unwrap(), ChildEvent::Exited(0));
        assert_eq!(wait_for_pid(follower).unwrap(), ChildEvent::Exited(0));
        assert_eq!(fs::read_to_string(&output).unwrap(), "through the pipe\n");
    }
}
