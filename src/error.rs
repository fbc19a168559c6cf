//! シェル全体のエラー型。
//!
//! どのエラーも REPL ループに制御を戻すだけの回復可能な状態で、シェル自体は終了しない。
//! `Display` の文字列はユーザーに見える固定メッセージそのもの（文言を変えないこと）。

use std::io;

use thiserror::Error;

/// コマンド構築（[`parser`](crate::parser)）の失敗。構文エラーとは区別する。
#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    /// ステージに引数が 1 つもない（`&` だけのステージなど）。
    #[error("empty command")]
    EmptyCommand,
    /// リダイレクト演算子の後にファイル名がない。
    #[error("missing redirect target")]
    MissingRedirectTarget,
    /// 1 ステージ分の入力に `|`, `;`, `&&` が含まれていた。
    #[error("not a single pipeline stage")]
    NotAStage,
    /// 引数が [`MAX_ARGS`](crate::config::MAX_ARGS) を超えた。
    #[error("too many arguments (limit {0})")]
    TooManyArguments(usize),
    /// パイプラインのステージ数が [`MAX_STAGES`](crate::config::MAX_STAGES) を超えた。
    #[error("too many pipeline stages (limit {0})")]
    TooManyStages(usize),
    /// 引数に NUL バイトが含まれ、C 文字列に変換できない。
    #[error("argument contains a NUL byte")]
    InteriorNul,
}

/// 実行時に発生しうるエラー。
#[derive(Debug, Error)]
pub enum ShellError {
    /// 文法検証に失敗した。
    #[error("Invalid Syntax!")]
    Syntax,
    #[error("jobsh: {0}")]
    Build(#[from] BuildError),
    /// 入力リダイレクト先が開けない。
    #[error("No such file or directory")]
    NoSuchFile,
    /// 出力リダイレクト先が作成できない。
    #[error("Unable to create file for writing")]
    CannotCreate,
    /// `fork` の失敗。
    #[error("fork failed: {0}")]
    Launch(io::Error),
    /// `pipe` の失敗。
    #[error("pipe failed: {0}")]
    Pipe(io::Error),
    /// `execvp` の失敗。子プロセス側でのみ検出される。
    #[error("Command not found!")]
    CommandNotFound,
    /// 存在しないプロセスへのシグナル送信。
    #[error("No such process found")]
    SignalDelivery,
    #[error("No such job")]
    NoSuchJob,
    #[error("Job already running")]
    JobAlreadyRunning,
    /// ビルトインの使い方が誤っている。引数は usage 行。
    #[error("{0}")]
    Usage(&'static str),
    #[error("No such directory!")]
    NoSuchDirectory,
    /// `hop -` を直前のディレクトリなしで使った。
    #[error("No previous directory!")]
    NoPreviousDirectory,
    #[error("Cannot change to home directory!")]
    HomeUnreachable,
    /// `log execute` の番号が範囲外。
    #[error("Invalid index.")]
    InvalidIndex,
    /// ビルトインの出力先への書き込み失敗など。
    #[error("jobsh: {0}")]
    Io(#[from] io::Error),
}

impl ShellError {
    /// エラーに対応する終了ステータス。
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Syntax | Self::Build(_) | Self::Usage(_) => 2,
            Self::CommandNotFound => 127,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_messages_are_fixed() {
        assert_eq!(ShellError::Syntax.to_string(), "Invalid Syntax!");
        assert_eq!(ShellError::NoSuchFile.to_string(), "No such file or directory");
        assert_eq!(
            ShellError::CannotCreate.to_string(),
            "Unable to create file for writing"
        );
        assert_eq!(ShellError::CommandNotFound.to_string(), "Command not found!");
        assert_eq!(ShellError::NoSuchJob.to_string(), "No such job");
        assert_eq!(ShellError::JobAlreadyRunning.to_string(), "Job already running");
        assert_eq!(ShellError::NoSuchDirectory.to_string(), "No such directory!");
        assert_eq!(ShellError::InvalidIndex.to_string(), "Invalid index.");
    }

    #[test]
    fn build_error_is_not_a_syntax_error() {
        let err: ShellError = BuildError::TooManyArguments(64).into();
        assert!(matches!(err, ShellError::Build(_)));
        assert_eq!(err.to_string(), "jobsh: too many arguments (limit 64)");
    }

    #[test]
    fn exit_status_mapping() {
        assert_eq!(ShellError::Syntax.exit_status(), 2);
        assert_eq!(ShellError::CommandNotFound.exit_status(), 127);
        assert_eq!(ShellError::NoSuchFile.exit_status(), 1);
    }
}
