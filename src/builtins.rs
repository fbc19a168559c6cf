//! ビルトインコマンドの実装。
//!
//! | 種類 | コマンド | 実行方法 |
//! |------|---------|---------|
//! | 制御 | `activities`, `ping`, `fg`, `bg`, `logout` | 常にシェル内で実行。リダイレクトは適用しない |
//! | ストリーム | `echo`, `hop`, `reveal`, `log` | フォアグラウンドならシェル内（stdio 差し替え）、`&` やパイプライン内では fork した子で実行 |
//!
//! どのビルトインも `(shell, args, out)` を受け取り終了ステータスを返す。
//! 失敗は [`ShellError`] の固定メッセージとして `out` に書く。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use libc::pid_t;

use crate::error::ShellError;
use crate::job::{self, ChildEvent, JobState};
use crate::shell::Shell;

/// `log execute` が履歴の行を再実行するための関数。通常は [`executor::run_line`](crate::executor::run_line)。
pub type LineRunner = fn(&mut Shell, &str) -> i32;

/// ビルトインの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Control,
    Stream,
}

/// コマンド名がビルトインなら、その種類を返す。
pub fn kind(name: &str) -> Option<Kind> {
    match name {
        "activities" | "ping" | "fg" | "bg" | "logout" => Some(Kind::Control),
        "echo" | "hop" | "reveal" | "log" => Some(Kind::Stream),
        _ => None,
    }
}

/// 何もしないランナー。パイプライン内の `log execute` に使う。
pub fn noop_runner(_shell: &mut Shell, _line: &str) -> i32 {
    0
}

/// 制御ビルトインを実行する。
pub fn run_control(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> i32 {
    let result = match args[0] {
        "activities" => builtin_activities(shell, out),
        "ping" => builtin_ping(args, out),
        "fg" => builtin_fg(shell, args, out),
        "bg" => builtin_bg(shell, args, out),
        "logout" => shell.shutdown(out).map(|()| 0).map_err(ShellError::from),
        other => unreachable!("not a control builtin: {other}"),
    };
    finish(result, out)
}

/// ストリームビルトインを実行する。
pub fn run_stream(shell: &mut Shell, args: &[&str], out: &mut dyn Write, runner: LineRunner) -> i32 {
    let result = match args[0] {
        "echo" => builtin_echo(args, out),
        "hop" => builtin_hop(shell, args),
        "reveal" => builtin_reveal(shell, args, out),
        "log" => builtin_log(shell, args, out, runner),
        other => unreachable!("not a stream builtin: {other}"),
    };
    finish(result, out)
}

/// エラーを固定メッセージとして `out` に書き、終了ステータスに変換する。
fn finish(result: Result<i32, ShellError>, out: &mut dyn Write) -> i32 {
    let status = match result {
        Ok(status) => status,
        Err(e) => {
            let _ = writeln!(out, "{}", e);
            e.exit_status()
        }
    };
    let _ = out.flush();
    status
}

// ── 制御ビルトイン ──────────────────────────────────────────────────

/// `activities` — ジョブ一覧をコマンド文字列順に表示する。
fn builtin_activities(shell: &Shell, out: &mut dyn Write) -> Result<i32, ShellError> {
    for job in shell.jobs.list() {
        writeln!(out, "{}", job.activity_line())?;
    }
    Ok(0)
}

/// `ping <pid> <signal>` — 任意のプロセスにシグナルを送る。シグナル番号は 32 の剰余。
fn builtin_ping(args: &[&str], out: &mut dyn Write) -> Result<i32, ShellError> {
    const USAGE: &str = "Usage: ping <pid> <signal_number>";
    let (Some(pid), Some(signal)) = (args.get(1), args.get(2)) else {
        return Err(ShellError::Usage(USAGE));
    };
    let signal = signal.parse::<i32>().map_err(|_| ShellError::Usage(USAGE))?.rem_euclid(32);
    // 0 以下の PID はプロセスグループ指定になるので受け付けない
    let pid = match pid.parse::<pid_t>() {
        Ok(pid) if pid > 0 => pid,
        _ => return Err(ShellError::SignalDelivery),
    };
    if unsafe { libc::kill(pid, signal) } != 0 {
        return Err(ShellError::SignalDelivery);
    }
    writeln!(out, "Sent signal {} to process with pid {}", signal, pid)?;
    Ok(0)
}

/// `fg [id]` — ジョブをフォアグラウンドに戻して待つ。省略時は最後に登録されたジョブ。
fn builtin_fg(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> Result<i32, ShellError> {
    let id = match args.get(1) {
        Some(arg) => arg.parse::<usize>().map_err(|_| ShellError::NoSuchJob)?,
        None => shell.jobs.last().ok_or(ShellError::NoSuchJob)?.id,
    };
    let job = shell.jobs.find_by_id(id).cloned().ok_or(ShellError::NoSuchJob)?;
    writeln!(out, "{}", job.command)?;
    out.flush()?;

    let waited = {
        let _guard = shell.foreground.acquire(job.pgid);
        if job.state == JobState::Stopped {
            unsafe {
                libc::kill(-job.pgid, libc::SIGCONT);
            }
        }
        shell.jobs.mark_running(job.pid);
        job::wait_for_pid(job.pid)
    };

    match waited {
        Ok(ChildEvent::Stopped(sig)) => {
            if let Some(stopped) = shell.jobs.mark_stopped(job.pid) {
                writeln!(out, "\n{}", stopped.stop_notice())?;
            }
            Ok(ChildEvent::Stopped(sig).exit_status())
        }
        Ok(event) => {
            if let Some(index) = shell.jobs.position_by_pid(job.pid) {
                shell.jobs.remove(index);
            }
            Ok(event.exit_status())
        }
        Err(e) => {
            // すでに回収済み（ECHILD）など。テーブルに残しても二度と待てない
            log::warn!("fg: waitpid({}) failed: {}", job.pid, e);
            if let Some(index) = shell.jobs.position_by_pid(job.pid) {
                shell.jobs.remove(index);
            }
            Err(ShellError::NoSuchJob)
        }
    }
}

/// `bg <id>` — 停止中のジョブをバックグラウンドで再開する。
fn builtin_bg(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> Result<i32, ShellError> {
    let arg = args.get(1).ok_or(ShellError::Usage("Usage: bg <job_number>"))?;
    let id = arg.parse::<usize>().map_err(|_| ShellError::NoSuchJob)?;
    let job = shell.jobs.find_by_id(id).ok_or(ShellError::NoSuchJob)?;
    if job.state == JobState::Running {
        return Err(ShellError::JobAlreadyRunning);
    }
    let (pid, pgid) = (job.pid, job.pgid);
    if unsafe { libc::kill(-pgid, libc::SIGCONT) } != 0 {
        return Err(ShellError::SignalDelivery);
    }
    if let Some(job) = shell.jobs.mark_running(pid) {
        writeln!(out, "{}", job.resume_notice())?;
    }
    Ok(0)
}

// ── ストリームビルトイン ────────────────────────────────────────────

/// `echo [args...]` — 引数を空白 1 つで連結して出力する。
fn builtin_echo(args: &[&str], out: &mut dyn Write) -> Result<i32, ShellError> {
    writeln!(out, "{}", args[1..].join(" "))?;
    Ok(0)
}

/// `hop [dir...]` — 引数を順にディレクトリ移動する。引数なしはホーム。
///
/// `~` はホーム、`-` は直前のディレクトリ。途中で失敗したらそこで止まる。
fn builtin_hop(shell: &mut Shell, args: &[&str]) -> Result<i32, ShellError> {
    if args.len() == 1 {
        let from = std::env::current_dir()?;
        std::env::set_current_dir(shell.home_dir()).map_err(|_| ShellError::HomeUnreachable)?;
        shell.set_prev_dir(from);
        return Ok(0);
    }
    for &arg in &args[1..] {
        let from = std::env::current_dir()?;
        let target: PathBuf = match arg {
            "-" => shell.prev_dir().ok_or(ShellError::NoPreviousDirectory)?.to_path_buf(),
            "~" => shell.home_dir().to_path_buf(),
            path => PathBuf::from(path),
        };
        std::env::set_current_dir(&target).map_err(|_| ShellError::NoSuchDirectory)?;
        log::debug!("hop {} -> {}", from.display(), target.display());
        shell.set_prev_dir(from);
    }
    Ok(0)
}

/// `reveal [-a] [-l] [dir]` — ディレクトリの中身をバイト順に並べて表示する。
///
/// `-a` は隠しファイル（`.`, `..` を含む）も表示、`-l` は 1 行 1 エントリ。
/// フラグは `-al` のようにまとめてもよい。
fn builtin_reveal(shell: &Shell, args: &[&str], out: &mut dyn Write) -> Result<i32, ShellError> {
    const INVALID: ShellError = ShellError::Usage("reveal: Invalid Syntax!");
    let mut show_all = false;
    let mut one_per_line = false;
    let mut target: Option<PathBuf> = None;

    for &arg in &args[1..] {
        if arg == "-" {
            if target.is_some() {
                return Err(INVALID);
            }
            target = Some(shell.prev_dir().ok_or(ShellError::NoSuchDirectory)?.to_path_buf());
        } else if let Some(flags) = arg.strip_prefix('-') {
            for flag in flags.chars() {
                match flag {
                    'a' => show_all = true,
                    'l' => one_per_line = true,
                    _ => return Err(INVALID),
                }
            }
        } else {
            if target.is_some() {
                return Err(INVALID);
            }
            target = Some(if arg == "~" {
                shell.home_dir().to_path_buf()
            } else {
                PathBuf::from(arg)
            });
        }
    }

    let dir = target.unwrap_or_else(|| PathBuf::from("."));
    let names = list_dir(&dir, show_all)?;
    if one_per_line {
        for name in &names {
            writeln!(out, "{}", name)?;
        }
    } else if !names.is_empty() {
        writeln!(out, "{}", names.join(" "))?;
    }
    Ok(0)
}

/// ディレクトリのエントリ名をバイト順で返す。
fn list_dir(dir: &Path, show_all: bool) -> Result<Vec<String>, ShellError> {
    let entries = fs::read_dir(dir).map_err(|_| ShellError::NoSuchDirectory)?;
    let mut names: Vec<String> = if show_all {
        vec![".".to_string(), "..".to_string()]
    } else {
        Vec::new()
    };
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if show_all || !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    Ok(names)
}

/// `log` / `log purge` / `log execute <index>`
///
/// 引数なし（および未知のサブコマンド）は古い順に一覧表示する。
/// `execute` は新しい順の番号（1 始まり）で指定した行を `runner` で再実行する。
fn builtin_log(shell: &mut Shell, args: &[&str], out: &mut dyn Write, runner: LineRunner) -> Result<i32, ShellError> {
    match args.get(1).copied() {
        Some("purge") => {
            shell.history.purge()?;
            Ok(0)
        }
        Some("execute") => {
            let arg = args.get(2).ok_or(ShellError::Usage("Usage: log execute <index>"))?;
            let index = arg.parse::<usize>().map_err(|_| ShellError::InvalidIndex)?;
            let line = shell.history.nth_newest(index)?.ok_or(ShellError::InvalidIndex)?;
            out.flush()?;
            Ok(runner(shell, &line))
        }
        _ => {
            for entry in shell.history.entries()? {
                writeln!(out, "{}", entry)?;
            }
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::os::unix::process::CommandExt;

    fn shell_in(dir: &Path) -> Shell {
        Shell::new(Config::with_home(dir))
    }

    fn stream(shell: &mut Shell, args: &[&str]) -> (i32, String) {
        let mut out = Vec::new();
        let status = run_stream(shell, args, &mut out, noop_runner);
        (status, String::from_utf8(out).unwrap())
    }

    fn control(shell: &mut Shell, args: &[&str]) -> (i32, String) {
        let mut out = Vec::new();
        let status = run_control(shell, args, &mut out);
        (status, String::from_utf8(out).unwrap())
    }

    /// テスト中にカレントディレクトリを変えても元に戻す。
    struct CwdGuard(PathBuf);

    impl CwdGuard {
        fn new() -> Self {
            Self(std::env::current_dir().unwrap())
        }
    }

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    // ── 分類 ──

    #[test]
    fn classification() {
        assert_eq!(kind("fg"), Some(Kind::Control));
        assert_eq!(kind("logout"), Some(Kind::Control));
        assert_eq!(kind("echo"), Some(Kind::Stream));
        assert_eq!(kind("log"), Some(Kind::Stream));
        assert_eq!(kind("ls"), None);
    }

    // ── echo ──

    #[test]
    fn echo_joins_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        assert_eq!(stream(&mut shell, &["echo", "a", "b", "c"]), (0, "a b c\n".into()));
        assert_eq!(stream(&mut shell, &["echo"]), (0, "\n".into()));
    }

    // ── activities / ping / fg / bg ──

    #[test]
    fn activities_lists_sorted_by_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        shell.jobs.register(300, 300, "sleep 9".into(), JobState::Running);
        shell.jobs.register(301, 301, "cat".into(), JobState::Stopped);
        let (status, text) = control(&mut shell, &["activities"]);
        assert_eq!(status, 0);
        assert_eq!(text, "[2] 301 : cat - Stopped\n[1] 300 : sleep 9 - Running\n");
    }

    #[test]
    fn ping_usage_and_missing_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        assert_eq!(
            control(&mut shell, &["ping", "1"]).1,
            "Usage: ping <pid> <signal_number>\n"
        );
        assert_eq!(
            control(&mut shell, &["ping", "0", "9"]).1,
            "No such process found\n"
        );
        // 存在しない PID
        assert_eq!(
            control(&mut shell, &["ping", "999999999", "0"]).1,
            "No such process found\n"
        );
    }

    #[test]
    #[serial_test::serial]
    fn ping_sends_signal_modulo_32() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as pid_t;
        let (status, text) = control(&mut shell, &["ping", &pid.to_string(), "41"]);
        assert_eq!(status, 0);
        assert_eq!(text, format!("Sent signal 9 to process with pid {}\n", pid));
        assert_eq!(job::wait_for_pid(pid).unwrap(), ChildEvent::Signaled(9));
    }

    #[test]
    fn fg_and_bg_without_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        assert_eq!(control(&mut shell, &["fg"]).1, "No such job\n");
        assert_eq!(control(&mut shell, &["fg", "3"]).1, "No such job\n");
        assert_eq!(control(&mut shell, &["bg"]).1, "Usage: bg <job_number>\n");
        assert_eq!(control(&mut shell, &["bg", "3"]).1, "No such job\n");
    }

    #[test]
    fn bg_on_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        shell.jobs.register(400, 400, "sleep 5".into(), JobState::Running);
        assert_eq!(control(&mut shell, &["bg", "1"]).1, "Job already running\n");
    }

    #[test]
    #[serial_test::serial]
    fn bg_resumes_stopped_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        // グループ宛てに SIGCONT を送るので、子を独立したプロセスグループで起動する
        let child = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id() as pid_t;
        unsafe { libc::kill(pid, libc::SIGSTOP) };
        shell.jobs.register(pid, pid, "sleep 30".into(), JobState::Stopped);

        let (status, text) = control(&mut shell, &["bg", "1"]);
        assert_eq!(status, 0);
        assert_eq!(text, "[1] sleep 30 &\n");
        assert_eq!(shell.jobs.find_by_id(1).unwrap().state, JobState::Running);

        unsafe { libc::kill(pid, libc::SIGKILL) };
        assert_eq!(job::wait_for_pid(pid).unwrap(), ChildEvent::Signaled(libc::SIGKILL));
    }

    #[test]
    #[serial_test::serial]
    fn fg_waits_and_removes_finished_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        let child = std::process::Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let pid = child.id() as pid_t;
        shell.jobs.register(pid, pid, "sh -c exit 3".into(), JobState::Running);

        let (status, text) = control(&mut shell, &["fg"]);
        assert_eq!(status, 3);
        assert_eq!(text, "sh -c exit 3\n");
        assert!(shell.jobs.is_empty());
    }

    // ── hop ──

    #[test]
    #[serial_test::serial]
    fn hop_sequence_home_and_previous() {
        let _cwd = CwdGuard::new();
        let home = tempfile::tempdir().unwrap();
        let home_path = home.path().canonicalize().unwrap();
        fs::create_dir(home_path.join("a")).unwrap();
        fs::create_dir(home_path.join("a").join("b")).unwrap();
        let mut shell = shell_in(&home_path);

        std::env::set_current_dir(&home_path).unwrap();
        assert_eq!(stream(&mut shell, &["hop", "a", "b"]).0, 0);
        assert_eq!(std::env::current_dir().unwrap(), home_path.join("a").join("b"));
        assert_eq!(shell.prev_dir(), Some(home_path.join("a").as_path()));

        assert_eq!(stream(&mut shell, &["hop", "-"]).0, 0);
        assert_eq!(std::env::current_dir().unwrap(), home_path.join("a"));

        assert_eq!(stream(&mut shell, &["hop"]).0, 0);
        assert_eq!(std::env::current_dir().unwrap(), home_path);

        stream(&mut shell, &["hop", "a"]);
        assert_eq!(stream(&mut shell, &["hop", "~"]).0, 0);
        assert_eq!(std::env::current_dir().unwrap(), home_path);
    }

    #[test]
    #[serial_test::serial]
    fn hop_errors() {
        let _cwd = CwdGuard::new();
        let home = tempfile::tempdir().unwrap();
        let mut shell = shell_in(home.path());
        assert_eq!(stream(&mut shell, &["hop", "-"]), (1, "No previous directory!\n".into()));
        let (status, text) = stream(&mut shell, &["hop", "/definitely/not/here"]);
        assert_eq!(status, 1);
        assert_eq!(text, "No such directory!\n");
    }

    // ── reveal ──

    fn populated_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["beta", "Alpha", ".hidden", "gamma"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        dir
    }

    #[test]
    fn reveal_sorted_without_hidden() {
        let dir = populated_dir();
        let mut shell = shell_in(dir.path());
        let path = dir.path().to_str().unwrap();
        assert_eq!(stream(&mut shell, &["reveal", path]), (0, "Alpha beta gamma\n".into()));
    }

    #[test]
    fn reveal_combined_flags() {
        let dir = populated_dir();
        let mut shell = shell_in(dir.path());
        let path = dir.path().to_str().unwrap();
        let expected = ".\n..\n.hidden\nAlpha\nbeta\ngamma\n";
        assert_eq!(stream(&mut shell, &["reveal", "-al", path]).1, expected);
        assert_eq!(stream(&mut shell, &["reveal", "-l", "-a", path]).1, expected);
    }

    #[test]
    fn reveal_home_and_errors() {
        let dir = populated_dir();
        let mut shell = shell_in(dir.path());
        assert_eq!(stream(&mut shell, &["reveal", "~"]).1, "Alpha beta gamma\n");
        assert_eq!(stream(&mut shell, &["reveal", "-x"]).1, "reveal: Invalid Syntax!\n");
        assert_eq!(stream(&mut shell, &["reveal", "a", "b"]).1, "reveal: Invalid Syntax!\n");
        assert_eq!(stream(&mut shell, &["reveal", "-"]).1, "No such directory!\n");
        assert_eq!(stream(&mut shell, &["reveal", "/no/such/dir"]).1, "No such directory!\n");
    }

    #[test]
    fn reveal_empty_directory_prints_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        assert_eq!(stream(&mut shell, &["reveal", "~"]), (0, String::new()));
    }

    // ── log ──

    fn recording_runner(shell: &mut Shell, line: &str) -> i32 {
        shell.last_status = line.len() as i32;
        42
    }

    #[test]
    fn log_list_purge_and_execute() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        shell.history.add("echo one").unwrap();
        shell.history.add("echo two").unwrap();

        assert_eq!(stream(&mut shell, &["log"]).1, "echo one\necho two\n");

        let mut out = Vec::new();
        let status = run_stream(&mut shell, &["log", "execute", "2"], &mut out, recording_runner);
        assert_eq!(status, 42);
        assert_eq!(shell.last_status, "echo one".len() as i32);

        assert_eq!(
            stream(&mut shell, &["log", "execute"]).1,
            "Usage: log execute <index>\n"
        );
        assert_eq!(stream(&mut shell, &["log", "execute", "9"]).1, "Invalid index.\n");
        assert_eq!(stream(&mut shell, &["log", "execute", "x"]).1, "Invalid index.\n");

        assert_eq!(stream(&mut shell, &["log", "purge"]).0, 0);
        assert_eq!(stream(&mut shell, &["log"]), (0, String::new()));
    }
}
