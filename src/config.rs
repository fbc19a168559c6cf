//! 容量上限と実行時設定。
//!
//! 固定長テーブルの上限はここに集約する。上限を超えたときの扱いは各定数のコメントの通り。
//! [`Config`] は `main.rs` のコマンドライン引数から組み立てられ、[`Shell`](crate::shell::Shell) に渡される。

use std::path::{Path, PathBuf};

/// ジョブテーブルの最大エントリ数。超過した登録は拒否される（ユーザーには通知しない）。
pub const MAX_JOBS: usize = 1024;

/// 1 コマンドあたりの最大引数数（コマンド名を含む）。超過した行はビルドエラーで拒否。
pub const MAX_ARGS: usize = 64;

/// 1 パイプラインあたりの最大ステージ数。超過した行はビルドエラーで拒否。
pub const MAX_STAGES: usize = 10;

/// `log` が保持する履歴の最大件数。超過時は最も古いエントリを捨てる。
pub const HISTORY_CAPACITY: usize = 15;

/// 履歴ファイル名。ホームディレクトリ直下に置かれる。
pub const HISTORY_FILE_NAME: &str = ".shell_history";

/// シェルの実行時設定。
#[derive(Debug, Clone)]
pub struct Config {
    /// シェルにとっての「ホーム」。プロンプトの `~` 置換、`hop`/`reveal` の `~` に使う。
    pub home: PathBuf,
    /// 履歴ファイルのパス。
    pub history_path: PathBuf,
    /// 履歴の最大件数。
    pub history_capacity: usize,
    /// ジョブテーブルの最大エントリ数。
    pub job_capacity: usize,
    /// プロンプトを表示するか。
    pub show_prompt: bool,
}

impl Config {
    /// `home` を基準にデフォルト値で設定を作る。
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let history_path = default_history_path(&home);
        Self {
            home,
            history_path,
            history_capacity: HISTORY_CAPACITY,
            job_capacity: MAX_JOBS,
            show_prompt: true,
        }
    }
}

/// `<home>/.shell_history`
pub fn default_history_path(home: &Path) -> PathBuf {
    home.join(HISTORY_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_lives_under_home() {
        let cfg = Config::with_home("/tmp/somewhere");
        assert_eq!(cfg.history_path, PathBuf::from("/tmp/somewhere/.shell_history"));
        assert_eq!(cfg.history_capacity, HISTORY_CAPACITY);
        assert_eq!(cfg.job_capacity, MAX_JOBS);
        assert!(cfg.show_prompt);
    }
}
