//! Helpers for building remote shell command lines.

/// Quote `arg` for a POSIX shell using single quotes.
pub fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:@+,".contains(c))
    {
        return arg.to_string();
    }

    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Parent directory of a remote path, `/` for top-level entries.
pub fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// `command` with the values of its leading `NAME=value` environment
/// assignments masked. The rest of the command line is kept as is.
pub fn redact_env(command: &str) -> String {
    let mut rest = command.trim_start();
    let mut redacted = String::new();
    while let Some((name, value)) = leading_assignment(rest) {
        redacted.push_str(name);
        redacted.push_str("=******** ");
        rest = value[word_len(value)..].trim_start();
    }
    redacted.push_str(rest);

    redacted
}

fn leading_assignment(command: &str) -> Option<(&str, &str)> {
    let (name, value) = command.split_once('=')?;
    let is_name = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    is_name.then_some((name, value))
}

/// Byte length of the shell word `command` starts with.
fn word_len(command: &str) -> usize {
    let mut quoted = false;
    let mut escaped = false;
    for (idx, c) in command.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\'' => quoted = !quoted,
            '\\' if !quoted => escaped = true,
            c if c.is_whitespace() && !quoted => return idx,
            _ => {}
        }
    }

    command.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(quote("/var/www/app"), "/var/www/app");
        assert_eq!(quote("my dir"), "'my dir'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("$(reboot)"), "'$(reboot)'");
    }

    #[test]
    fn parents() {
        assert_eq!(parent_dir("/tmp/backup_1.zip"), "/tmp");
        assert_eq!(parent_dir("/backup_1.zip"), "/");
        assert_eq!(parent_dir("relative"), "/");
        assert_eq!(parent_dir("/a/b/c/"), "/a/b");
    }

    #[test]
    fn environment_values_are_masked() {
        assert_eq!(
            redact_env("MYSQL_PWD='s3cr3t pw' mysqldump --user=shop shop > /tmp/a.sql"),
            "MYSQL_PWD=******** mysqldump --user=shop shop > /tmp/a.sql"
        );
        assert_eq!(
            redact_env(&format!("PGPASSWORD={} pg_dump --file=/tmp/a.sql shop", quote("it's"))),
            "PGPASSWORD=******** pg_dump --file=/tmp/a.sql shop"
        );
        assert_eq!(redact_env("A=1 B='x y' env"), "A=******** B=******** env");
        assert_eq!(redact_env("du -sb /srv/app"), "du -sb /srv/app");
        assert_eq!(
            redact_env("cd /srv && zip -r -q a.zip . -x 'a=b/*'"),
            "cd /srv && zip -r -q a.zip . -x 'a=b/*'"
        );
    }
}
