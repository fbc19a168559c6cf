//! コマンド構築: 検証済みの入力行からコマンドリスト AST を組み立てる。
//!
//! [`lexer`](crate::lexer) のトークン列を 1 回だけ走査し、
//! `;` / `&&` / `&` でリスト要素に、`|` でステージに分割する。
//! 各ステージは [`Command`] になる。ワードは入力文字列を借用したまま保持する（ゼロコピー）。
//!
//! ## 対応構文
//!
//! - パイプライン: `cmd1 | cmd2 | cmd3`
//! - リダイレクト: `<`, `>`, `>>`（演算子とファイル名の間の空白は任意）
//! - クォート: ワード全体を囲む 1 組の `"..."` / `'...'` だけを除去する（エスケープ・入れ子なし）
//! - バックグラウンド実行: `cmd &`、`cmd & next`
//! - 複合コマンド: `;`（順次実行）、`&&`（直前が成功したときだけ次を実行）

use crate::config::{MAX_ARGS, MAX_STAGES};
use crate::error::{BuildError, ShellError};
use crate::grammar;
use crate::lexer::{self, Token};

// ── AST ─────────────────────────────────────────────────────────────

/// コマンドリスト: パイプラインを `;`, `&&`, `&` で連結した最上位構文。
/// `sleep 5 & ls | wc ; echo done` → 3 要素。
#[derive(Debug, PartialEq)]
pub struct CommandList<'a> {
    pub items: Vec<ListItem<'a>>,
}

/// リスト内の 1 要素。
#[derive(Debug, PartialEq)]
pub struct ListItem<'a> {
    pub pipeline: Pipeline<'a>,
    /// 次のパイプラインとの接続。最後の要素は `Connector::Seq`。
    pub connector: Connector,
}

/// パイプライン間の接続子。
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Connector {
    /// `;`、`&` またはリスト末尾 — 無条件に次を実行
    Seq,
    /// `&&` — 直前が成功 (status == 0) の場合のみ次を実行
    And,
}

/// パイプラインで接続されたコマンド列。`cmd1 | cmd2 | cmd3` → 3要素。
#[derive(Debug, PartialEq)]
pub struct Pipeline<'a> {
    pub commands: Vec<Command<'a>>,
    /// 直後に `&` が指定された場合に `true`。
    pub background: bool,
}

/// 出力リダイレクトのモード。
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum OutputMode {
    /// `>` — 上書き
    Truncate,
    /// `>>` — 追記
    Append,
}

/// 出力リダイレクト指定。
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct OutputRedirect<'a> {
    pub target: &'a str,
    pub mode: OutputMode,
}

/// パイプラインの 1 ステージ。
///
/// リダイレクトは指定順に保持する。検証はすべてに対して行うが、実行時に効くのは各種類の最後の 1 つ。
#[derive(Debug, PartialEq, Default)]
pub struct Command<'a> {
    /// コマンド名 + 引数。実行に到達するコマンドでは空にならない。
    pub args: Vec<&'a str>,
    /// `<` の対象ファイル（指定順）。
    pub inputs: Vec<&'a str>,
    /// `>` / `>>` の対象ファイル（指定順）。
    pub outputs: Vec<OutputRedirect<'a>>,
    pub background: bool,
}

impl<'a> Command<'a> {
    /// 1 ステージ分の文字列からコマンドを構築する。
    ///
    /// 単独の `&` はバックグラウンドフラグとして扱い、引数からは除く。
    /// `sleep 5&` のように末尾に付いた `&` はトークナイザが分離するので同じ扱いになる。
    pub fn parse(stage: &'a str) -> Result<Self, BuildError> {
        Self::from_tokens(&lexer::tokenize(stage))
    }

    /// トークン列からコマンドを構築する。`|`, `;`, `&&` を含んではならない。
    pub fn from_tokens(tokens: &[Token<'a>]) -> Result<Self, BuildError> {
        let mut cmd = Command::default();
        let mut iter = tokens.iter();
        while let Some(token) = iter.next() {
            match *token {
                Token::Word(w) => {
                    if cmd.args.len() == MAX_ARGS {
                        return Err(BuildError::TooManyArguments(MAX_ARGS));
                    }
                    cmd.args.push(strip_quotes(w));
                }
                Token::Amp => cmd.background = true,
                Token::Less | Token::Great | Token::GreatGreat => {
                    let target = match iter.next() {
                        Some(&Token::Word(w)) => strip_quotes(w),
                        _ => return Err(BuildError::MissingRedirectTarget),
                    };
                    match *token {
                        Token::Less => cmd.inputs.push(target),
                        Token::Great => cmd.outputs.push(OutputRedirect {
                            target,
                            mode: OutputMode::Truncate,
                        }),
                        _ => cmd.outputs.push(OutputRedirect {
                            target,
                            mode: OutputMode::Append,
                        }),
                    }
                }
                Token::Pipe | Token::Semi | Token::AndAnd => return Err(BuildError::NotAStage),
            }
        }
        if cmd.args.is_empty() {
            return Err(BuildError::EmptyCommand);
        }
        Ok(cmd)
    }

    /// コマンド名（`args[0]`）。
    pub fn name(&self) -> &'a str {
        self.args.first().copied().unwrap_or("")
    }

    /// 実行時に有効な入力リダイレクト（最後の指定）。
    pub fn last_input(&self) -> Option<&'a str> {
        self.inputs.last().copied()
    }

    /// 実行時に有効な出力リダイレクト（最後の指定）。
    pub fn last_output(&self) -> Option<OutputRedirect<'a>> {
        self.outputs.last().copied()
    }

    /// ジョブテーブルの表示用文字列。引数を空白 1 つで連結したもの。
    pub fn display_text(&self) -> String {
        self.args.join(" ")
    }
}

/// ワード全体を囲む 1 組の `"` または `'` を除去する。
fn strip_quotes(word: &str) -> &str {
    let bytes = word.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &word[1..word.len() - 1];
        }
    }
    word
}

// ── Parser ──────────────────────────────────────────────────────────

/// 入力行をパースしてコマンドリストを返す。
///
/// 空行なら `Ok(None)`。文法に適合しない行は何も構築せず [`ShellError::Syntax`] を返す。
pub fn parse(input: &str) -> Result<Option<CommandList<'_>>, ShellError> {
    let tokens = lexer::tokenize(input);
    if tokens.is_empty() {
        return Ok(None);
    }
    if !grammar::is_valid_tokens(&tokens) {
        return Err(ShellError::Syntax);
    }

    let mut items = Vec::new();
    let mut stages: Vec<Command<'_>> = Vec::new();
    let mut stage_start = 0;

    for (i, token) in tokens.iter().enumerate() {
        let (connector, background) = match token {
            Token::Pipe => {
                stages.push(build_stage(&tokens[stage_start..i], stages.len())?);
                stage_start = i + 1;
                continue;
            }
            Token::Semi => (Connector::Seq, false),
            Token::AndAnd => (Connector::And, false),
            Token::Amp => (Connector::Seq, true),
            _ => continue,
        };
        stages.push(build_stage(&tokens[stage_start..i], stages.len())?);
        stage_start = i + 1;
        items.push(finish_pipeline(std::mem::take(&mut stages), background, connector));
    }

    if stage_start < tokens.len() {
        stages.push(build_stage(&tokens[stage_start..], stages.len())?);
        items.push(finish_pipeline(stages, false, Connector::Seq));
    }

    Ok(Some(CommandList { items }))
}

fn build_stage<'a>(tokens: &[Token<'a>], index: usize) -> Result<Command<'a>, BuildError> {
    if index == MAX_STAGES {
        return Err(BuildError::TooManyStages(MAX_STAGES));
    }
    Command::from_tokens(tokens)
}

fn finish_pipeline(mut commands: Vec<Command<'_>>, background: bool, connector: Connector) -> ListItem<'_> {
    if background {
        for cmd in &mut commands {
            cmd.background = true;
        }
    }
    ListItem {
        pipeline: Pipeline { commands, background },
        connector,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// パース結果から最初のパイプラインの各コマンドの引数を文字列ベクタとして取り出す。
    fn parse_args(input: &str) -> Vec<Vec<String>> {
        let list = parse(input).unwrap().unwrap();
        list.items[0]
            .pipeline
            .commands
            .iter()
            .map(|cmd| cmd.args.iter().map(|a| a.to_string()).collect())
            .collect()
    }

    // ── 単純コマンド ──

    #[test]
    fn simple_command() {
        assert_eq!(
            parse_args("echo hello world"),
            vec![vec!["echo", "hello", "world"]],
        );
    }

    #[test]
    fn extra_whitespace() {
        assert_eq!(parse_args("  echo   hello  "), vec![vec!["echo", "hello"]]);
    }

    // ── クォート ──

    #[test]
    fn quoted_word_is_stripped_once() {
        assert_eq!(parse_args("echo 'hello' \"world\""), vec![vec!["echo", "hello", "world"]]);
        assert_eq!(parse_args("echo '\"x\"'"), vec![vec!["echo", "\"x\""]]);
    }

    #[test]
    fn mismatched_quotes_are_kept() {
        assert_eq!(parse_args("echo 'abc\""), vec![vec!["echo", "'abc\""]]);
        assert_eq!(parse_args("echo '"), vec![vec!["echo", "'"]]);
    }

    #[test]
    fn quotes_do_not_join_words() {
        assert_eq!(parse_args("echo \"a b\""), vec![vec!["echo", "\"a", "b\""]]);
    }

    #[test]
    fn empty_quotes() {
        assert_eq!(parse_args("echo ''"), vec![vec!["echo", ""]]);
    }

    // ── パイプライン ──

    #[test]
    fn three_stage_pipeline() {
        assert_eq!(
            parse_args("cat file | grep name | head -1"),
            vec![vec!["cat", "file"], vec!["grep", "name"], vec!["head", "-1"]],
        );
    }

    #[test]
    fn too_many_stages_is_a_build_error() {
        let line = vec!["true"; MAX_STAGES + 1].join(" | ");
        assert!(matches!(
            parse(&line),
            Err(ShellError::Build(BuildError::TooManyStages(_)))
        ));
        let line = vec!["true"; MAX_STAGES].join(" | ");
        assert!(parse(&line).is_ok());
    }

    // ── リダイレクト ──

    #[test]
    fn redirects_are_collected_in_order() {
        let cmd = Command::parse("sort < a.txt > out1 <b.txt >>out2").unwrap();
        assert_eq!(cmd.args, vec!["sort"]);
        assert_eq!(cmd.inputs, vec!["a.txt", "b.txt"]);
        assert_eq!(
            cmd.outputs,
            vec![
                OutputRedirect { target: "out1", mode: OutputMode::Truncate },
                OutputRedirect { target: "out2", mode: OutputMode::Append },
            ],
        );
        assert_eq!(cmd.last_input(), Some("b.txt"));
        assert_eq!(cmd.last_output().unwrap().target, "out2");
    }

    #[test]
    fn redirect_no_space() {
        let cmd = Command::parse("echo hello>out.txt").unwrap();
        assert_eq!(cmd.args, vec!["echo", "hello"]);
        assert_eq!(cmd.outputs[0].target, "out.txt");
    }

    #[test]
    fn pipeline_with_redirects() {
        let list = parse("cat < in.txt | sort > out.txt").unwrap().unwrap();
        let p = &list.items[0].pipeline;
        assert_eq!(p.commands[0].inputs, vec!["in.txt"]);
        assert!(p.commands[0].outputs.is_empty());
        assert_eq!(p.commands[1].outputs[0].target, "out.txt");
    }

    #[test]
    fn no_redirects() {
        let cmd = Command::parse("ls -l").unwrap();
        assert!(cmd.inputs.is_empty());
        assert!(cmd.outputs.is_empty());
    }

    // ── background (&) ──

    #[test]
    fn lone_ampersand_sets_background() {
        let cmd = Command::parse("sleep 10 &").unwrap();
        assert!(cmd.background);
        assert_eq!(cmd.args, vec!["sleep", "10"]);
    }

    #[test]
    fn glued_ampersand_sets_background() {
        let cmd = Command::parse("sleep 10&").unwrap();
        assert!(cmd.background);
        assert_eq!(cmd.args, vec!["sleep", "10"]);
    }

    #[test]
    fn background_pipeline_marks_every_stage() {
        let list = parse("a | b | c &").unwrap().unwrap();
        let p = &list.items[0].pipeline;
        assert!(p.background);
        assert!(p.commands.iter().all(|c| c.background));
    }

    #[test]
    fn background_followed_by_command() {
        let list = parse("cmd & extra").unwrap().unwrap();
        assert_eq!(list.items.len(), 2);
        assert!(list.items[0].pipeline.background);
        assert_eq!(list.items[0].pipeline.commands[0].args[0], "cmd");
        assert!(!list.items[1].pipeline.background);
        assert_eq!(list.items[1].pipeline.commands[0].args[0], "extra");
    }

    // ── コマンドリスト ──

    #[test]
    fn connectors() {
        let list = parse("a ; b && c & d").unwrap().unwrap();
        let connectors: Vec<Connector> = list.items.iter().map(|i| i.connector).collect();
        assert_eq!(
            connectors,
            vec![Connector::Seq, Connector::And, Connector::Seq, Connector::Seq],
        );
        let bg: Vec<bool> = list.items.iter().map(|i| i.pipeline.background).collect();
        assert_eq!(bg, vec![false, false, true, false]);
    }

    // ── エラーケース ──

    #[test]
    fn empty_input() {
        assert!(parse("").unwrap().is_none());
        assert!(parse(" \t ").unwrap().is_none());
    }

    #[test]
    fn invalid_syntax_builds_nothing() {
        for line in ["ls |", "cat <", "echo > | cat", "; ls"] {
            assert!(matches!(parse(line), Err(ShellError::Syntax)), "{line}");
        }
    }

    #[test]
    fn stage_errors() {
        assert_eq!(Command::parse("&"), Err(BuildError::EmptyCommand));
        assert_eq!(Command::parse("a | b"), Err(BuildError::NotAStage));
        assert_eq!(Command::parse("cat <"), Err(BuildError::MissingRedirectTarget));
    }

    #[test]
    fn too_many_arguments() {
        let line = vec!["x"; MAX_ARGS + 1].join(" ");
        assert_eq!(
            Command::parse(&line),
            Err(BuildError::TooManyArguments(MAX_ARGS)),
        );
        let line = vec!["x"; MAX_ARGS].join(" ");
        assert!(Command::parse(&line).is_ok());
    }

    #[test]
    fn display_text_joins_args() {
        let cmd = Command::parse("sleep   100 > /dev/null &").unwrap();
        assert_eq!(cmd.display_text(), "sleep 100");
    }
}
