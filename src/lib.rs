//! jobsh ライブラリ — REPL 本体（`main.rs`）、ベンチマーク、テストから使うモジュール群。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`lexer`] | 共有トークナイザ（`|`, `&`, `&&`, `<`, `>`, `>>`, `;` とワード） |
//! | [`grammar`] | 文法検証（副作用の前に行全体を受理/拒否） |
//! | [`parser`] | コマンド構築（コマンドリスト → パイプライン → コマンド、リダイレクト、クォート除去、`&`） |
//! | [`redirect`] | リダイレクトの二相検証とロールバック、子プロセス側の適用、ビルトイン用 stdio 差し替え |
//! | [`spawn`] | `fork` / `execvp` ラッパー（プロセスグループ、パイプ、シグナル既定化） |
//! | [`executor`] | 行の実行（`;`/`&&`/`&`、単一コマンド、パイプライン、フォアグラウンド待機、バックグラウンド登録） |
//! | [`job`] | ジョブテーブルと子プロセスの待機 |
//! | [`signals`] | シグナルハンドラと、ループ 1 周ごとの状態変化の反映 |
//! | [`terminal`] | 端末の所有権の受け渡し（`tcsetpgrp`） |
//! | [`builtins`] | ビルトイン（`activities`, `ping`, `fg`, `bg`, `logout`, `echo`, `hop`, `reveal`, `log`） |
//! | [`history`] | `log` の保存先（`<home>/.shell_history`） |
//! | [`prompt`] | プロンプト `<user@host:path> ` |
//! | [`shell`] | シェルのグローバル状態（ジョブテーブル、端末、履歴、直前ディレクトリ） |
//! | [`config`] | 容量上限と実行時設定 |
//! | [`error`] | エラー型（ユーザーに見える固定メッセージ） |

pub mod builtins;
pub mod config;
pub mod error;
pub mod executor;
pub mod grammar;
pub mod history;
pub mod job;
pub mod lexer;
pub mod parser;
pub mod prompt;
pub mod redirect;
pub mod shell;
pub mod signals;
pub mod spawn;
pub mod terminal;
