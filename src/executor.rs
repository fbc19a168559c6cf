//! コマンド実行: 入力行の検証・履歴記録・コマンドリストの条件付き実行、
//! 単一コマンドとパイプラインの起動、フォアグラウンド待機とバックグラウンド登録。
//!
//! - [`run_line`]: 1 行を検証してから実行する（REPL と `log execute` の入口）
//! - [`execute`]: コマンドリスト（`;` / `&&` / `&`）を順に実行
//! - 単一コマンド:
//!   - 制御ビルトイン → fork なしでそのまま実行
//!   - ストリームビルトイン（フォアグラウンド）→ [`StdioSwap`] で stdio を差し替えて fork なしで実行
//!   - それ以外 → fork。子は exec するか、ビルトインを実行して `_exit`
//! - パイプライン: 全ステージのリダイレクトを検証してから、先頭ステージをリーダーとする
//!   1 つのプロセスグループで順に fork する
//! - foreground: 端末をグループに渡し、`waitpid(WUNTRACED)` で全 PID を待つ。停止したらジョブとして登録
//! - background: PID ごとにジョブ登録して即座に返る

use std::io::{self, Write};
use std::os::unix::io::RawFd;

use libc::pid_t;

use crate::builtins::{self, Kind};
use crate::error::ShellError;
use crate::job::{self, ChildEvent, JobState};
use crate::parser::{self, Command, CommandList, Connector, Pipeline};
use crate::redirect::{self, StdinSource, StdioSwap, StdoutSink};
use crate::shell::Shell;
use crate::spawn::{self, CStringVec, ChildPlan, Forked};

/// 1 行を検証・記録・実行し、終了ステータスを返す。
///
/// 文法エラーは `Invalid Syntax!` を表示して何も実行しない。空行は何もしない。
/// 行の中に `log` コマンドが含まれない限り、行全体を履歴に記録する。
pub fn run_line(shell: &mut Shell, line: &str) -> i32 {
    let list = match parser::parse(line) {
        Ok(Some(list)) => list,
        Ok(None) => return shell.last_status,
        Err(e) => {
            report(&e);
            shell.last_status = e.exit_status();
            return shell.last_status;
        }
    };

    if !mentions_log(&list) {
        if let Err(e) = shell.history.add(line) {
            log::warn!("failed to record history in {}: {}", shell.history.path().display(), e);
        }
    }

    let status = execute(shell, &list);
    shell.last_status = status;
    status
}

fn mentions_log(list: &CommandList<'_>) -> bool {
    list.items
        .iter()
        .flat_map(|item| item.pipeline.commands.iter())
        .any(|cmd| cmd.name() == "log")
}

/// コマンドリスト全体を実行し、最後に実行したパイプラインの終了ステータスを返す。
///
/// `&&` の直後のパイプラインは、直前のステータスが 0 のときだけ実行する。
pub fn execute(shell: &mut Shell, list: &CommandList<'_>) -> i32 {
    let mut last_status = 0;

    for (i, item) in list.items.iter().enumerate() {
        if i > 0 && list.items[i - 1].connector == Connector::And && last_status != 0 {
            continue;
        }
        last_status = match execute_pipeline(shell, &item.pipeline) {
            Ok(status) => status,
            Err(e) => {
                report(&e);
                e.exit_status()
            }
        };
        if shell.should_exit {
            break;
        }
    }

    last_status
}

/// エラーの固定メッセージを stdout に出す。
fn report(err: &ShellError) {
    let mut stdout = io::stdout();
    let _ = writeln!(stdout, "{}", err);
    let _ = stdout.flush();
}

fn execute_pipeline(shell: &mut Shell, pipeline: &Pipeline<'_>) -> Result<i32, ShellError> {
    match pipeline.commands.as_slice() {
        [cmd] => execute_single(shell, cmd),
        _ => execute_stages(shell, pipeline),
    }
}

// ── 単一コマンド ─────────────────────────────────────────────────────

fn execute_single(shell: &mut Shell, cmd: &Command<'_>) -> Result<i32, ShellError> {
    let kind = builtins::kind(cmd.name());
    if kind == Some(Kind::Control) {
        return Ok(builtins::run_control(shell, &cmd.args, &mut io::stdout()));
    }

    redirect::validate(cmd)?;

    if kind == Some(Kind::Stream) && !cmd.background {
        let _swap = StdioSwap::apply(cmd)?;
        return Ok(builtins::run_stream(shell, &cmd.args, &mut io::stdout(), run_line));
    }

    let argv = match kind {
        Some(_) => None,
        None => Some(CStringVec::from_args(&cmd.args)?),
    };
    let plan = ChildPlan::standalone(
        StdinSource::for_stage(cmd.last_input(), None, cmd.background)?,
        StdoutSink::for_stage(cmd.last_output(), None)?,
    );

    let pid = match spawn::fork_child(&plan)? {
        Forked::Child => run_child(shell, &cmd.args, argv.as_ref(), run_line),
        Forked::Parent(pid) => pid,
    };

    let command = cmd.display_text();
    if cmd.background {
        register_background(shell, pid, pid, command);
        Ok(0)
    } else {
        Ok(wait_foreground(shell, pid, vec![(pid, command)]))
    }
}

/// 子プロセスの本体。`argv` があれば exec、なければストリームビルトインを実行して `_exit`。
fn run_child(shell: &mut Shell, args: &[&str], argv: Option<&CStringVec>, runner: builtins::LineRunner) -> ! {
    match argv {
        Some(argv) => spawn::exec(argv),
        None => {
            let status = builtins::run_stream(shell, args, &mut io::stdout(), runner);
            spawn::exit_child(status)
        }
    }
}

// ── パイプライン ─────────────────────────────────────────────────────

/// 2 段以上のパイプラインを起動する。
///
/// 1. 全ステージのリダイレクトを検証し、argv を C 文字列にする（ここまでは何も起動しない）
/// 2. ステージごとに、最後以外はパイプを作ってから fork
/// 3. 親は fork の直後に、前段の読み取り端と今段の書き込み端を閉じる
/// 4. 入力リダイレクトは先頭ステージ、出力リダイレクトは最終ステージにだけ適用する
fn execute_stages(shell: &mut Shell, pipeline: &Pipeline<'_>) -> Result<i32, ShellError> {
    for cmd in &pipeline.commands {
        redirect::validate(cmd)?;
    }
    let argvs = pipeline
        .commands
        .iter()
        .map(|cmd| match builtins::kind(cmd.name()) {
            Some(Kind::Stream) => Ok(None),
            _ => CStringVec::from_args(&cmd.args).map(Some),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let n = pipeline.commands.len();
    let background = pipeline.background;
    let mut launched: Vec<(pid_t, String)> = Vec::with_capacity(n);
    let mut pgid: pid_t = 0;
    let mut prev_read: Option<RawFd> = None;

    for (i, cmd) in pipeline.commands.iter().enumerate() {
        let last = i == n - 1;
        let step = launch_stage(shell, cmd, argvs[i].as_ref(), i == 0, last, background, pgid, prev_read);
        if let Some(fd) = prev_read.take() {
            spawn::close(fd);
        }
        match step {
            Ok((pid, next_read)) => {
                if pgid == 0 {
                    pgid = pid;
                }
                launched.push((pid, cmd.display_text()));
                prev_read = next_read;
            }
            Err(e) => {
                abort_launched(&launched);
                return Err(e);
            }
        }
    }

    if background {
        for (pid, command) in launched {
            register_background(shell, pid, pgid, command);
        }
        Ok(0)
    } else {
        Ok(wait_foreground(shell, pgid, launched))
    }
}

/// 1 ステージを fork する。子の PID と、次段が読むパイプの読み取り端を返す。
///
/// 親側では今段の書き込み端をここで閉じる。前段の読み取り端は呼び出し側が閉じる。
#[allow(clippy::too_many_arguments)]
fn launch_stage(
    shell: &mut Shell,
    cmd: &Command<'_>,
    argv: Option<&CStringVec>,
    first: bool,
    last: bool,
    background: bool,
    pgid: pid_t,
    prev_read: Option<RawFd>,
) -> Result<(pid_t, Option<RawFd>), ShellError> {
    let pipe_fds = if last { None } else { Some(spawn::pipe()?) };
    let close_pipe = |fds: Option<[RawFd; 2]>| {
        if let Some([r, w]) = fds {
            spawn::close(r);
            spawn::close(w);
        }
    };

    let input = if first { cmd.last_input() } else { None };
    let output = if last { cmd.last_output() } else { None };
    let plan = StdinSource::for_stage(input, prev_read, background && first).and_then(|stdin| {
        Ok(ChildPlan {
            pgid,
            stdin,
            stdout: StdoutSink::for_stage(output, pipe_fds.map(|[_, w]| w))?,
            close_fds: pipe_fds.map(|[r, _]| vec![r]).unwrap_or_default(),
        })
    });
    let plan = match plan {
        Ok(plan) => plan,
        Err(e) => {
            close_pipe(pipe_fds);
            return Err(e);
        }
    };

    match spawn::fork_child(&plan) {
        Ok(Forked::Child) => run_child(shell, &cmd.args, argv, builtins::noop_runner),
        Ok(Forked::Parent(pid)) => {
            let next_read = pipe_fds.map(|[r, w]| {
                spawn::close(w);
                r
            });
            Ok((pid, next_read))
        }
        Err(e) => {
            close_pipe(pipe_fds);
            Err(e)
        }
    }
}

/// 途中で起動に失敗したパイプラインの、起動済みステージを片付ける。
fn abort_launched(launched: &[(pid_t, String)]) {
    for &(pid, _) in launched {
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
        if let Err(e) = job::wait_for_pid(pid) {
            log::debug!("reaping aborted stage {}: {}", pid, e);
        }
    }
}

// ── 待機と登録 ───────────────────────────────────────────────────────

/// `[<id>] <pid>` を stderr に表示してジョブを登録する。
fn register_background(shell: &mut Shell, pid: pid_t, pgid: pid_t, command: String) {
    if let Some(id) = shell.jobs.register(pid, pgid, command, JobState::Running) {
        eprintln!("[{}] {}", id, pid);
    }
}

/// 端末を `pgid` に渡して全 PID を待つ。最後の PID のステータスを返す。
///
/// 停止した PID は Stopped ジョブとして登録し `[<id>] Stopped <command>` を表示する。
fn wait_foreground(shell: &mut Shell, pgid: pid_t, stages: Vec<(pid_t, String)>) -> i32 {
    let mut status = 0;
    let mut stopped = Vec::new();
    {
        let _guard = shell.foreground.acquire(pgid);
        for (pid, command) in stages {
            match job::wait_for_pid(pid) {
                Ok(event) => {
                    status = event.exit_status();
                    if let ChildEvent::Stopped(_) = event {
                        stopped.push((pid, command));
                    }
                }
                Err(e) => log::warn!("waitpid({}) failed: {}", pid, e),
            }
        }
    }

    let mut stdout = io::stdout();
    for (pid, command) in stopped {
        if shell.jobs.register(pid, pgid, command, JobState::Stopped).is_some() {
            if let Some(job) = shell.jobs.find_by_pid(pid) {
                let _ = writeln!(stdout, "\n{}", job.stop_notice());
            }
        }
    }
    let _ = stdout.flush();
    status
}
