use std::{
    collections::HashMap,
    fs,
    path::{Component, Path, PathBuf},
};

use crate::{
    domain::{Role, UserId},
    errors::Error,
    Result,
};

// ============== Authorization ==============

/// Config-loaded mapping of user ids to roles.
#[derive(Clone, Debug, Default)]
pub struct RoleMap {
    roles: HashMap<i64, Role>,
}

impl RoleMap {
    pub fn new(roles: HashMap<i64, Role>) -> Self {
        Self { roles }
    }

    /// Parse `id:role,id:role`. Blank entries are skipped.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut roles = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((id, role)) = entry.split_once(':') else {
                return Err(Error::Config(format!(
                    "USER_ROLES entry `{entry}` must look like `<user id>:<role>`"
                )));
            };
            let id = id
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::Config(format!("USER_ROLES has a non-numeric id: {id}")))?;
            roles.insert(id, role.parse::<Role>()?);
        }
        Ok(Self { roles })
    }

    /// Role of `user_id`; unknown or anonymous callers are guests.
    pub fn role_of(&self, user_id: Option<UserId>) -> Role {
        user_id
            .and_then(|u| self.roles.get(&u.0).copied())
            .unwrap_or_default()
    }

    /// First configured user holding `role`, used for startup notices.
    pub fn first_with(&self, role: Role) -> Option<UserId> {
        let mut ids: Vec<i64> = self
            .roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.first().copied().map(UserId)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

pub fn is_allowed(role: Role, allowed: &[Role]) -> bool {
    allowed.contains(&role)
}

// ============== Path Validation ==============

/// Join a relative path onto `root`, refusing anything that would land
/// outside of it (traversal components, absolute paths, symlinked parents).
pub fn resolve_within(root: &Path, relative: &Path) -> Result<PathBuf> {
    for comp in relative.components() {
        match comp {
            Component::Normal(_) => {}
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidPath {
                    path: relative.to_path_buf(),
                    reason: "only plain relative segments are allowed".to_string(),
                })
            }
        }
    }

    let root_resolved = canonicalize_or_resolve(root)?;
    let joined = canonicalize_or_resolve(&root.join(relative))?;

    if joined == root_resolved || !joined.starts_with(&root_resolved) {
        return Err(Error::InvalidPath {
            path: joined,
            reason: format!("escapes download root {}", root_resolved.display()),
        });
    }

    Ok(joined)
}

/// Canonicalize the longest existing ancestor of `p` (resolving symlinks)
/// and re-append the not-yet-existing remainder lexically.
fn canonicalize_or_resolve(p: &Path) -> Result<PathBuf> {
    let absolute = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir().map_err(Error::Io)?.join(p)
    };
    let absolute = normalize_path(&absolute);

    let mut existing = absolute.as_path();
    let mut rest: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if let Ok(canon) = fs::canonicalize(existing) {
            let mut out = canon;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return Ok(out);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name);
                existing = parent;
            }
            _ => return Ok(absolute.clone()),
        }
    }
}

fn normalize_path(p: &Path) -> PathBuf {
    // Lexical only: drop `.` and fold `..` without consulting the filesystem.
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_map_parses_and_defaults_to_guest() {
        let map = RoleMap::parse("100:admin, 200:user,,").unwrap();
        assert_eq!(map.role_of(Some(UserId(100))), Role::Admin);
        assert_eq!(map.role_of(Some(UserId(200))), Role::User);
        assert_eq!(map.role_of(Some(UserId(300))), Role::Guest);
        assert_eq!(map.role_of(None), Role::Guest);
        assert_eq!(map.first_with(Role::Admin), Some(UserId(100)));
    }

    #[test]
    fn role_map_rejects_garbage() {
        assert!(RoleMap::parse("abc:admin").is_err());
        assert!(RoleMap::parse("100").is_err());
        assert!(RoleMap::parse("100:owner").is_err());
    }

    #[test]
    fn allows_nested_new_paths() {
        let root = tempfile::tempdir().unwrap();
        let out = resolve_within(root.path(), Path::new("movies/The Matrix (1999).mkv")).unwrap();
        let canon_root = fs::canonicalize(root.path()).unwrap();
        assert_eq!(out, canon_root.join("movies").join("The Matrix (1999).mkv"));
    }

    #[test]
    fn blocks_traversal_components() {
        let root = tempfile::tempdir().unwrap();
        assert!(resolve_within(root.path(), Path::new("movies/../../etc/passwd")).is_err());
        assert!(resolve_within(root.path(), Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn blocks_the_root_itself() {
        let root = tempfile::tempdir().unwrap();
        assert!(resolve_within(root.path(), Path::new(".")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn blocks_symlink_escape() {
        use std::os::unix::fs::symlink;

        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        symlink(outside.path(), root.path().join("movies")).unwrap();

        assert!(resolve_within(root.path(), Path::new("movies/file.mkv")).is_err());
    }
}
