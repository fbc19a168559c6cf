//! jobsh — ジョブ制御付きの対話シェル
//!
//! REPLループ: 状態変化の反映 → プロンプト表示 → 1 行読み取り → 状態変化の反映 → 検証 → 実行 → ループ
//!
//! 入力終端（Ctrl+D / パイプの EOF）では追跡中のジョブをすべて SIGKILL し、`logout` を表示して終了する。

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;
use log::LevelFilter;

use jobsh::config::Config;
use jobsh::shell::Shell;
use jobsh::{executor, prompt, signals};

#[derive(Debug, Parser)]
#[command(name = "jobsh", version, about = "Interactive command interpreter with job control", long_about = None)]
struct Cli {
    /// Directory shown as `~` in the prompt and used by `hop`/`reveal` (default: the startup directory).
    #[arg(long, value_name = "DIR")]
    home: Option<PathBuf>,

    /// History file for the `log` builtin (default: `<home>/.shell_history`).
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Never print the prompt, even when stdin is a terminal.
    #[arg(long, default_value_t = false)]
    no_prompt: bool,

    /// Log at debug level unless JOBSH_LOG says otherwise.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder = env_logger::Builder::from_env(Env::new().filter_or("JOBSH_LOG", default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn build_config(cli: Cli) -> io::Result<Config> {
    let home = match cli.home {
        Some(home) => home,
        None => std::env::current_dir()?,
    };
    let mut config = Config::with_home(home);
    if let Some(path) = cli.history {
        config.history_path = path;
    }
    config.show_prompt = !cli.no_prompt && io::stdin().is_terminal();
    Ok(config)
}

/// シェルを自身のプロセスグループリーダーにし、端末があれば掌握する。
fn take_terminal(interactive: bool) {
    unsafe {
        let shell_pid = libc::getpid();
        if libc::setpgid(shell_pid, shell_pid) != 0 {
            log::debug!("setpgid: {}", io::Error::last_os_error());
        }
        if interactive && libc::tcsetpgrp(libc::STDIN_FILENO, shell_pid) != 0 {
            log::debug!("tcsetpgrp: {}", io::Error::last_os_error());
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match build_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("jobsh: cannot determine home directory: {}", e);
            std::process::exit(1);
        }
    };

    // SIGTTOU を無視してから端末を掌握する（バックグラウンドからの tcsetpgrp で止まらないように）
    if let Err(e) = signals::install() {
        eprintln!("jobsh: cannot install signal handlers: {}", e);
        std::process::exit(1);
    }
    take_terminal(io::stdin().is_terminal());

    let mut shell = Shell::new(config);
    log::debug!(
        "home={} history={}",
        shell.home_dir().display(),
        shell.history.path().display()
    );

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut buf = Vec::new();

    loop {
        let mut stdout = io::stdout();
        signals::reconcile(&mut shell.jobs, &mut stdout);

        if shell.config().show_prompt {
            let _ = write!(stdout, "{}", prompt::render(&shell));
            let _ = stdout.flush();
        }

        buf.clear();
        match input.read_until(b'\n', &mut buf) {
            Ok(0) => {
                let _ = shell.shutdown(&mut stdout);
                break;
            }
            Ok(_) => {
                // 入力待ちの間に届いた状態変化を、行を実行する前に反映する
                signals::reconcile(&mut shell.jobs, &mut stdout);
                let line = String::from_utf8_lossy(&buf);
                executor::run_line(&mut shell, line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                log::warn!("read error: {}", e);
                let _ = shell.shutdown(&mut stdout);
                break;
            }
        }

        if shell.should_exit {
            break;
        }
    }

    std::process::exit(0);
}
