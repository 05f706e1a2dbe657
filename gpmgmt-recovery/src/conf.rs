//! postgresql.conf single-key rewrite
//!
//! Only whole-line `key = value` settings are understood. Comments and
//! unrelated settings pass through untouched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::command::{CommandError, Result};

/// How a value is written into the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfValueType {
    /// Written bare, e.g. `port=7000`
    Number,
    /// Written single-quoted, e.g. `listen_addresses='*'`
    String,
}

impl ConfValueType {
    pub fn literal(&self, value: &str) -> String {
        match self {
            ConfValueType::Number => value.to_string(),
            ConfValueType::String => format!("'{}'", value.replace('\'', "''")),
        }
    }
}

/// Whether `line` is an active (uncommented) setting of `key`
fn is_active_setting(line: &str, key: &str) -> bool {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix(key) {
        Some(rest) => rest.trim_start().starts_with('='),
        None => false,
    }
}

/// Return `content` with `key` set to the already-formatted `literal`.
///
/// The first active setting is replaced in place, later active duplicates
/// are commented out, and the setting is appended when absent.
pub fn rewrite_setting(content: &str, key: &str, literal: &str) -> String {
    let setting = format!("{}={}", key, literal);
    let mut replaced = false;
    let mut out = String::with_capacity(content.len() + setting.len() + 1);

    for line in content.lines() {
        if is_active_setting(line, key) {
            if replaced {
                out.push('#');
                out.push_str(line);
            } else {
                out.push_str(&setting);
                replaced = true;
            }
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !replaced {
        out.push_str(&setting);
        out.push('\n');
    }

    out
}

/// Set one key in a configuration file in place
pub fn modify_conf_setting(
    path: &Path,
    key: &str,
    value: &str,
    value_type: ConfValueType,
) -> Result<()> {
    let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let updated = rewrite_setting(&content, key, &value_type.literal(value));
    write_atomically(path, &updated)
}

/// Replace a file's content through a sibling temporary file and a rename,
/// keeping the original permissions
pub fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let tmp = temp_path(path);
    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let mut file = fs::File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| io_error(&tmp, e))?;

    if let Some(permissions) = permissions {
        fs::set_permissions(&tmp, permissions).map_err(|e| io_error(&tmp, e))?;
    }

    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".gpmgmt.tmp");
    path.with_file_name(name)
}

fn io_error(path: &Path, source: std::io::Error) -> CommandError {
    CommandError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_existing_setting() {
        let content =
            "max_connections = 250\nport = 6000 # set by gpinitsystem\nshared_buffers = 125MB\n";
        let updated = rewrite_setting(content, "port", "7000");
        assert_eq!(updated, "max_connections = 250\nport=7000\nshared_buffers = 125MB\n");
    }

    #[test]
    fn test_appends_missing_setting() {
        let updated = rewrite_setting("max_connections = 250\n", "port", "7000");
        assert_eq!(updated, "max_connections = 250\nport=7000\n");
    }

    #[test]
    fn test_commented_setting_is_not_active() {
        let updated = rewrite_setting("#port = 5432\n", "port", "7000");
        assert_eq!(updated, "#port = 5432\nport=7000\n");
    }

    #[test]
    fn test_similar_key_untouched() {
        let updated = rewrite_setting("port_range = 10\nport=6000\n", "port", "7000");
        assert_eq!(updated, "port_range = 10\nport=7000\n");
    }

    #[test]
    fn test_duplicates_commented_out() {
        let updated = rewrite_setting("port=6000\nport = 6001\n", "port", "7000");
        assert_eq!(updated, "port=7000\n#port = 6001\n");
    }

    #[test]
    fn test_string_literal_quoted() {
        assert_eq!(ConfValueType::String.literal("it's"), "'it''s'");
        assert_eq!(ConfValueType::Number.literal("7000"), "7000");
    }

    #[test]
    fn test_modify_conf_setting_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgresql.conf");
        fs::write(&path, "listen_addresses = '*'\nport = 6000\n").unwrap();

        modify_conf_setting(&path, "port", "7002", ConfValueType::Number).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "listen_addresses = '*'\nport=7002\n"
        );
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgresql.conf");
        let err = modify_conf_setting(&path, "port", "7002", ConfValueType::Number).unwrap_err();
        assert!(matches!(err, CommandError::Io { .. }));
    }
}
