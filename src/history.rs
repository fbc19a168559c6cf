//! コマンド履歴（`log` ビルトインの保存先）。
//!
//! ## ファイル形式
//!
//! - パス: `<home>/.shell_history`（`--history` で変更可）
//! - プレーンテキスト、1 行 1 コマンド、古い順
//! - 最大件数: [`HISTORY_CAPACITY`](crate::config::HISTORY_CAPACITY)（超過時は最も古いエントリを捨てる）
//! - 直前と同一のコマンドは追加しない（連続重複排除）
//! - 先頭ワードが `log` / `execute` の行は保存しない
//!
//! メモリ上にエントリを持たず、操作のたびにファイルを読み書きする。
//! バックグラウンドで fork した子プロセスが書いても、親と内容が食い違わない。

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// コマンド履歴。
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
    capacity: usize,
}

impl History {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 全エントリ（古い順）。ファイルがなければ空。
    pub fn entries(&self) -> io::Result<Vec<String>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.is_empty() {
                entries.push(line);
            }
        }
        if entries.len() > self.capacity {
            entries.drain(..entries.len() - self.capacity);
        }
        Ok(entries)
    }

    /// エントリを追加する。実際に追加したら `true`。
    ///
    /// 空行、`log` / `execute` で始まる行、直前と同じ行はスキップする。
    pub fn add(&self, line: &str) -> io::Result<bool> {
        let line = line.trim();
        if !is_recordable(line) {
            return Ok(false);
        }
        let mut entries = self.entries()?;
        if entries.last().is_some_and(|last| last == line) {
            return Ok(false);
        }
        entries.push(line.to_string());
        if entries.len() > self.capacity {
            entries.remove(0);
        }
        self.save(&entries)?;
        Ok(true)
    }

    /// 全エントリを消去する（`log purge`）。
    pub fn purge(&self) -> io::Result<()> {
        self.save(&[])
    }

    /// 新しい順で `index` 番目（1 始まり）のエントリ（`log execute <index>`）。
    pub fn nth_newest(&self, index: usize) -> io::Result<Option<String>> {
        let mut entries = self.entries()?;
        if index == 0 || index > entries.len() {
            return Ok(None);
        }
        Ok(Some(entries.swap_remove(entries.len() - index)))
    }

    fn save(&self, entries: &[String]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        for entry in entries {
            writeln!(file, "{}", entry)?;
        }
        Ok(())
    }
}

/// 履歴に保存してよい行か。
pub fn is_recordable(line: &str) -> bool {
    match line.split_whitespace().next() {
        None | Some("log") | Some("execute") => false,
        Some(_) => true,
    }
}
