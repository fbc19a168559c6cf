//! シェルのグローバル状態を保持するモジュール。
//!
//! ジョブテーブル（[`JobTable`]）、端末の所有権（[`Foreground`]）、
//! 履歴（[`History`]）、`hop -` 用の直前ディレクトリを 1 つの構造体にまとめ、
//! REPL ループから各ビルトイン・executor に `&mut Shell` で渡す。
//! シグナルハンドラはこの構造体に触れない（[`signals`](crate::signals) のアトミック変数だけを使う）。

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::history::History;
use crate::job::JobTable;
use crate::terminal::Foreground;

/// シェルの実行状態。REPLループ全体で共有される。
pub struct Shell {
    /// 直前のコマンドの終了ステータス。
    pub last_status: i32,
    /// `logout` で true にセットされ、REPLループを終了させる。
    pub should_exit: bool,
    /// ジョブテーブル。バックグラウンド/停止ジョブを管理する。
    pub jobs: JobTable,
    /// 端末の所有権。シェル自身のプロセスグループを覚えている。
    pub foreground: Foreground,
    pub history: History,
    config: Config,
    /// `hop` で最後に離れたディレクトリ。
    prev_dir: Option<PathBuf>,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        let shell_pgid = unsafe { libc::getpgrp() };
        Self {
            last_status: 0,
            should_exit: false,
            jobs: JobTable::new(config.job_capacity),
            foreground: Foreground::new(shell_pgid, libc::STDIN_FILENO),
            history: History::new(config.history_path.clone(), config.history_capacity),
            config,
            prev_dir: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// プロンプトの `~` と `hop ~` / `reveal ~` が指すディレクトリ。
    pub fn home_dir(&self) -> &Path {
        &self.config.home
    }

    pub fn prev_dir(&self) -> Option<&Path> {
        self.prev_dir.as_deref()
    }

    pub fn set_prev_dir(&mut self, dir: PathBuf) {
        self.prev_dir = Some(dir);
    }

    /// 追跡中の全ジョブを SIGKILL し、`logout` を表示して終了フラグを立てる。
    ///
    /// `logout` ビルトインと入力終端（EOF）の両方から呼ばれる。
    pub fn shutdown(&mut self, out: &mut dyn Write) -> io::Result<()> {
        log::debug!("shutting down, killing {} job(s)", self.jobs.len());
        self.jobs.kill_all(libc::SIGKILL);
        self.should_exit = true;
        writeln!(out, "logout")?;
        out.flush()
    }
}
