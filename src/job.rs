//! ジョブテーブルと子プロセス待機ヘルパー。
//!
//! バックグラウンド実行（`&`）または Ctrl+Z による停止でジョブが登録され、
//! 終了・シグナル死が観測されるまでテーブルに残る。
//! テーブルの変更はすべてメインスレッドで行う（シグナルハンドラからは触らない）。
//! 非同期の状態変化の反映は [`signals::reconcile`](crate::signals::reconcile) が担う。

use std::io;

use libc::pid_t;

// ── データ構造 ───────────────────────────────────────────────────────

/// ジョブの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

/// ジョブ。1 プロセス（パイプラインなら 1 ステージ）に対応する。
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// `[N]` 形式で表示されるジョブ番号。単調増加で、1 セッション中に再利用されない。
    pub id: usize,
    pub pid: pid_t,
    /// `pid` が属するプロセスグループ。単一コマンドでは `pid` と同じ、パイプラインでは先頭ステージの PID。
    pub pgid: pid_t,
    pub state: JobState,
    /// 表示用コマンド文字列。
    pub command: String,
}

impl Job {
    /// `[1] sleep 5 with pid 1234 exited normally`
    pub fn exit_notice(&self) -> String {
        format!("[{}] {} with pid {} exited normally", self.id, self.command, self.pid)
    }

    /// `[1] sleep 5 with pid 1234 terminated by signal 9`
    pub fn signal_notice(&self, signal: i32) -> String {
        format!(
            "[{}] {} with pid {} terminated by signal {}",
            self.id, self.command, self.pid, signal
        )
    }

    /// `[1] Stopped sleep 5`
    pub fn stop_notice(&self) -> String {
        format!("[{}] Stopped {}", self.id, self.command)
    }

    /// `bg` で再開したときの表示。`[1] sleep 5 &`
    pub fn resume_notice(&self) -> String {
        format!("[{}] {} &", self.id, self.command)
    }

    /// `activities` の 1 行。`[1] 1234 : sleep 5 - Running`
    pub fn activity_line(&self) -> String {
        format!("[{}] {} : {} - {}", self.id, self.pid, self.command, self.state.as_str())
    }
}

// ── JobTable ─────────────────────────────────────────────────────────

/// ジョブテーブル。ジョブの追加・検索・状態更新・削除を管理する。
///
/// 正規の順序は登録順。[`list`](JobTable::list) のコマンド文字列順ソートは表示専用。
pub struct JobTable {
    jobs: Vec<Job>,
    next_id: usize,
    capacity: usize,
}

impl JobTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Vec::new(),
            next_id: 1,
            capacity,
        }
    }

    /// ジョブを登録し、割り当てた ID を返す。
    ///
    /// テーブルが満杯なら登録せず `None`（ユーザーには見せない既知の上限）。
    pub fn register(&mut self, pid: pid_t, pgid: pid_t, command: String, state: JobState) -> Option<usize> {
        if self.jobs.len() >= self.capacity {
            log::warn!("job table full ({}), pid {} is not tracked", self.capacity, pid);
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        log::debug!("register job [{}] pid={} pgid={} {:?}", id, pid, pgid, command);
        self.jobs.push(Job {
            id,
            pid,
            pgid,
            state,
            command,
        });
        Some(id)
    }

    pub fn find_by_pid(&self, pid: pid_t) -> Option<&Job> {
        self.jobs.iter().find(|j| j.pid == pid)
    }

    pub fn find_by_id(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn position_by_pid(&self, pid: pid_t) -> Option<usize> {
        self.jobs.iter().position(|j| j.pid == pid)
    }

    /// Running → Stopped。該当ジョブを返す（通知文字列は [`Job::stop_notice`]）。
    pub fn mark_stopped(&mut self, pid: pid_t) -> Option<&Job> {
        let job = self.jobs.iter_mut().find(|j| j.pid == pid)?;
        job.state = JobState::Stopped;
        Some(job)
    }

    /// Stopped → Running。
    pub fn mark_running(&mut self, pid: pid_t) -> Option<&Job> {
        let job = self.jobs.iter_mut().find(|j| j.pid == pid)?;
        job.state = JobState::Running;
        Some(job)
    }

    /// `index` のジョブを取り除く。残りの相対順序は保たれる。
    pub fn remove(&mut self, index: usize) -> Option<Job> {
        if index < self.jobs.len() {
            Some(self.jobs.remove(index))
        } else {
            None
        }
    }

    /// 表示用: コマンド文字列順（同じ文字列は登録順）に並べたジョブ一覧。
    pub fn list(&self) -> Vec<&Job> {
        let mut sorted: Vec<&Job> = self.jobs.iter().collect();
        sorted.sort_by(|a, b| a.command.cmp(&b.command));
        sorted
    }

    /// 最後に登録されたジョブ（`fg` の引数省略時）。
    pub fn last(&self) -> Option<&Job> {
        self.jobs.last()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 全ジョブの PID にシグナルを送る（`logout` / EOF 時）。
    pub fn kill_all(&self, signal: i32) {
        for job in &self.jobs {
            unsafe {
                libc::kill(job.pid, signal);
            }
        }
    }

    /// 登録順のイテレータ。
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }
}

// ── 子プロセスの状態変化 ─────────────────────────────────────────────

/// `waitpid` が報告した状態変化。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEvent {
    /// 正常終了。引数は終了コード。
    Exited(i32),
    /// シグナルで終了。引数はシグナル番号。
    Signaled(i32),
    /// 停止。引数はシグナル番号。
    Stopped(i32),
    /// SIGCONT で再開。
    Continued,
}

impl ChildEvent {
    /// `waitpid` の raw status を解釈する。
    pub fn from_raw(status: i32) -> Option<Self> {
        if libc::WIFEXITED(status) {
            Some(Self::Exited(libc::WEXITSTATUS(status)))
        } else if libc::WIFSIGNALED(status) {
            Some(Self::Signaled(libc::WTERMSIG(status)))
        } else if libc::WIFSTOPPED(status) {
            Some(Self::Stopped(libc::WSTOPSIG(status)))
        } else if libc::WIFCONTINUED(status) {
            Some(Self::Continued)
        } else {
            None
        }
    }

    /// シェルの終了ステータスとしての値。停止は 148（128 + SIGTSTP）扱い。
    pub fn exit_status(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(sig) => 128 + sig,
            Self::Stopped(_) => 148,
            Self::Continued => 0,
        }
    }
}

// ── 待機ヘルパー ─────────────────────────────────────────────────────

/// フォアグラウンドの子プロセスを待つ。
///
/// `waitpid(pid, WUNTRACED)` を終了・シグナル死・停止のいずれかが観測されるまで繰り返す。
/// `EINTR` は再試行する。
pub fn wait_for_pid(pid: pid_t) -> io::Result<ChildEvent> {
    loop {
        let mut raw_status: i32 = 0;
        let ret = unsafe { libc::waitpid(pid, &mut raw_status, libc::WUNTRACED) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        match ChildEvent::from_raw(raw_status) {
            Some(ChildEvent::Continued) | None => continue,
            Some(event) => return Ok(event),
        }
    }
}
