//! リダイレクト: fork 前の二相検証、子プロセス側での適用、ビルトイン用の stdio 差し替え。
//!
//! | 型・関数 | 使う場所 | 役割 |
//! |---------|---------|------|
//! | [`validate`] | 親（fork 前） | すべての入出力先を試しに開き、失敗したら作ったファイルだけ消す |
//! | [`StdinSource`] / [`StdoutSink`] | 子（fork 後） | 最後の指定だけを fd 0 / 1 に `dup2` する |
//! | [`StdioSwap`] | 親（フォアグラウンドのビルトイン） | stdin/stdout を一時的に差し替え、`Drop` で戻す |
//!
//! 検証では各出力先を指定どおりのモード（`>` は切り詰め、`>>` は追記）で開く。
//! 失敗時に消すのは、この検証で新しく作ったファイルだけ。

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::{BuildError, ShellError};
use crate::parser::{Command, OutputMode, OutputRedirect};

/// 出力リダイレクトで新規作成するファイルのパーミッション。
const CREATE_MODE: u32 = 0o644;

// ── 二相検証 ─────────────────────────────────────────────────────────

/// コマンドのリダイレクトをすべて検証する。何も spawn していない段階で呼ぶ。
///
/// 1. 入力: 読み取り専用で開けなければ [`ShellError::NoSuchFile`]
/// 2. 出力: 作成 + 書き込み（`>` は切り詰め、`>>` は追記）で開けなければ、
///    このコマンドの検証で新たに作ったファイルを削除して [`ShellError::CannotCreate`]
///
/// 存在確認はシンボリックリンクをたどる。リンク切れの先に作ったファイルは、
/// リンクではなく実体のほうを消す。
///
/// 開いたディスクリプタはすべて `File` なので、どの経路でも関数を抜けるときに閉じられる。
pub fn validate(cmd: &Command<'_>) -> Result<(), ShellError> {
    for &input in &cmd.inputs {
        if let Err(e) = File::open(input) {
            log::debug!("input probe {:?} failed: {}", input, e);
            return Err(ShellError::NoSuchFile);
        }
    }

    let mut probes: Vec<File> = Vec::with_capacity(cmd.outputs.len());
    let mut created: Vec<PathBuf> = Vec::new();
    for output in &cmd.outputs {
        let path = Path::new(output.target);
        let existed = path.exists();
        match open_output(output.target, output.mode) {
            Ok(file) => {
                probes.push(file);
                if !existed {
                    created.push(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
                }
            }
            Err(e) => {
                log::debug!("output probe {:?} failed: {}", output.target, e);
                drop(probes);
                rollback(&created);
                return Err(ShellError::CannotCreate);
            }
        }
    }
    Ok(())
}

/// 検証で新たに作ったファイルを削除する。既存だったファイルには触れない。
fn rollback(created: &[PathBuf]) {
    for path in created {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("failed to roll back {}: {}", path.display(), e);
        }
    }
}

/// 出力先を開く。`>` は切り詰め、`>>` は追記。
fn open_output(target: &str, mode: OutputMode) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).mode(CREATE_MODE);
    match mode {
        OutputMode::Append => options.append(true),
        OutputMode::Truncate => options.write(true).truncate(true),
    };
    options.open(target)
}

// ── 子プロセス側の適用 ───────────────────────────────────────────────

/// 子プロセスの stdin の接続先。パスは fork 前に `CString` にしておく。
#[derive(Debug)]
pub enum StdinSource {
    /// シェルの stdin をそのまま使う。
    Inherit,
    /// 前段パイプの読み取り端。
    Pipe(RawFd),
    /// `< file` の最後の指定。
    File(CString),
    /// バックグラウンドで入力指定がないとき。端末入力を奪わない。
    DevNull,
}

/// 子プロセスの stdout の接続先。
#[derive(Debug)]
pub enum StdoutSink {
    Inherit,
    /// 次段パイプの書き込み端。
    Pipe(RawFd),
    /// `>` / `>>` の最後の指定。
    File { path: CString, mode: OutputMode },
}

impl StdinSource {
    /// ステージの stdin を決める。入力リダイレクトがパイプより優先される。
    pub fn for_stage(input: Option<&str>, pipe: Option<RawFd>, background: bool) -> Result<Self, ShellError> {
        if let Some(path) = input {
            return Ok(Self::File(to_cstring(path)?));
        }
        Ok(match pipe {
            Some(fd) => Self::Pipe(fd),
            None if background => Self::DevNull,
            None => Self::Inherit,
        })
    }

    /// 子プロセス内で fd 0 に接続する。fork 後に呼ぶので、ここではヒープ確保をしない。
    pub fn apply(&self) -> io::Result<()> {
        match self {
            Self::Inherit => Ok(()),
            Self::Pipe(fd) => move_fd(*fd, libc::STDIN_FILENO),
            Self::File(path) => open_onto(path, libc::O_RDONLY, libc::STDIN_FILENO),
            Self::DevNull => open_onto(c"/dev/null", libc::O_RDONLY, libc::STDIN_FILENO),
        }
    }
}

impl StdoutSink {
    /// ステージの stdout を決める。出力リダイレクトがパイプより優先される。
    pub fn for_stage(output: Option<OutputRedirect<'_>>, pipe: Option<RawFd>) -> Result<Self, ShellError> {
        if let Some(out) = output {
            return Ok(Self::File {
                path: to_cstring(out.target)?,
                mode: out.mode,
            });
        }
        Ok(match pipe {
            Some(fd) => Self::Pipe(fd),
            None => Self::Inherit,
        })
    }

    /// 子プロセス内で fd 1 に接続する。
    pub fn apply(&self) -> io::Result<()> {
        match self {
            Self::Inherit => Ok(()),
            Self::Pipe(fd) => move_fd(*fd, libc::STDOUT_FILENO),
            Self::File { path, mode } => {
                let flags = libc::O_WRONLY
                    | libc::O_CREAT
                    | match mode {
                        OutputMode::Truncate => libc::O_TRUNC,
                        OutputMode::Append => libc::O_APPEND,
                    };
                open_onto(path, flags, libc::STDOUT_FILENO)
            }
        }
    }
}

fn to_cstring(s: &str) -> Result<CString, ShellError> {
    CString::new(s).map_err(|_| ShellError::Build(BuildError::InteriorNul))
}

/// `fd` を `target` に複製して元を閉じる。
fn move_fd(fd: RawFd, target: RawFd) -> io::Result<()> {
    if fd == target {
        return Ok(());
    }
    unsafe {
        if libc::dup2(fd, target) < 0 {
            return Err(io::Error::last_os_error());
        }
        libc::close(fd);
    }
    Ok(())
}

fn open_onto(path: &std::ffi::CStr, flags: libc::c_int, target: RawFd) -> io::Result<()> {
    let fd = unsafe { libc::open(path.as_ptr(), flags, CREATE_MODE as libc::c_uint) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    move_fd(fd, target)
}

// ── StdioSwap ────────────────────────────────────────────────────────

/// フォアグラウンドのビルトインを fork せずに実行するための stdio 差し替え。
///
/// 最後の入力指定を fd 0 に、最後の出力指定を fd 1 に付け替え、`Drop` で元に戻す。
/// 戻す前に Rust 側の stdout バッファを flush するので、出力が戻し先に漏れない。
pub struct StdioSwap {
    saved_stdin: Option<RawFd>,
    saved_stdout: Option<RawFd>,
}

impl StdioSwap {
    pub fn apply(cmd: &Command<'_>) -> Result<Self, ShellError> {
        let mut swap = StdioSwap {
            saved_stdin: None,
            saved_stdout: None,
        };
        if let Some(input) = cmd.last_input() {
            let file = File::open(input).map_err(|_| ShellError::NoSuchFile)?;
            swap.saved_stdin = Some(swap_fd(file.as_raw_fd(), libc::STDIN_FILENO).map_err(|e| {
                log::warn!("stdin swap failed: {}", e);
                ShellError::NoSuchFile
            })?);
        }
        if let Some(output) = cmd.last_output() {
            let file = open_output(output.target, output.mode).map_err(|_| ShellError::CannotCreate)?;
            let _ = io::stdout().flush();
            swap.saved_stdout = Some(swap_fd(file.as_raw_fd(), libc::STDOUT_FILENO).map_err(|e| {
                log::warn!("stdout swap failed: {}", e);
                ShellError::CannotCreate
            })?);
        }
        Ok(swap)
    }
}

/// `target` を退避してから `fd` を複製する。退避した fd を返す。
fn swap_fd(fd: RawFd, target: RawFd) -> io::Result<RawFd> {
    unsafe {
        let saved = libc::dup(target);
        if saved < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::dup2(fd, target) < 0 {
            let err = io::Error::last_os_error();
            libc::close(saved);
            return Err(err);
        }
        Ok(saved)
    }
}

impl Drop for StdioSwap {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        unsafe {
            if let Some(fd) = self.saved_stdout.take() {
                libc::dup2(fd, libc::STDOUT_FILENO);
                libc::close(fd);
            }
            if let Some(fd) = self.saved_stdin.take() {
                libc::dup2(fd, libc::STDIN_FILENO);
                libc::close(fd);
            }
        }
    }
}
