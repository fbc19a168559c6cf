//! プロンプト `<user@host:path> ` の生成。
//!
//! `path` はカレントディレクトリで、シェルのホーム配下なら先頭を `~` に置き換える。

use std::ffi::CStr;
use std::path::Path;

use crate::shell::Shell;

/// 現在の状態からプロンプト文字列を作る。
pub fn render(shell: &Shell) -> String {
    let cwd = match std::env::current_dir() {
        Ok(dir) => display_path(&dir, shell.home_dir()),
        Err(e) => {
            log::debug!("getcwd: {}", e);
            String::from("?")
        }
    };
    format!("<{}@{}:{}> ", user_name(), host_name(), cwd)
}

/// `home` 配下なら `~` 始まりに縮める。パスの比較は要素単位（`/home/ab` は `/home/a` 配下ではない）。
pub fn display_path(cwd: &Path, home: &Path) -> String {
    match cwd.strip_prefix(home) {
        Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Ok(rest) => format!("~/{}", rest.display()),
        Err(_) => cwd.display().to_string(),
    }
}

fn user_name() -> String {
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if !pw.is_null() && !(*pw).pw_name.is_null() {
            return CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned();
        }
    }
    std::env::var("USER").unwrap_or_else(|_| "user".to_string())
}

fn host_name() -> String {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if ret != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn home_itself_is_tilde() {
        assert_eq!(display_path(Path::new("/home/me"), Path::new("/home/me")), "~");
    }

    #[test]
    fn below_home_keeps_relative_part() {
        assert_eq!(
            display_path(Path::new("/home/me/src/jobsh"), Path::new("/home/me")),
            "~/src/jobsh"
        );
    }

    #[test]
    fn outside_home_is_absolute() {
        assert_eq!(display_path(Path::new("/tmp"), Path::new("/home/me")), "/tmp");
        assert_eq!(display_path(Path::new("/home/meow"), Path::new("/home/me")), "/home/meow");
    }

    #[test]
    fn render_has_expected_shape() {
        let shell = Shell::new(Config::with_home("/nonexistent-home"));
        let prompt = render(&shell);
        assert!(prompt.starts_with('<'), "{prompt}");
        assert!(prompt.ends_with("> "), "{prompt}");
        assert!(prompt.contains('@'));
        assert!(prompt.contains(':'));
    }
}
