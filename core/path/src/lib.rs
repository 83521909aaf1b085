//! Path Resolver: pure translation among the path namespaces a vault uses.
//!
//! A vault exposes the same tree through five different path spaces:
//!
//! - `FuseRoot` — the user-visible absolute path under the mount point.
//! - `VaultRoot` — the vault-relative path; also the wire identity used as
//!   the S3 object key.
//! - `BackingVaultRoot` — ciphertext on the host filesystem, one opaque
//!   base32 alias segment per directory level.
//! - `ThumbnailRoot` / `FileCacheRoot` — derived artifacts keyed off the
//!   same relative shape as `VaultRoot`.
//!
//! Everything here is a pure function over paths already in memory: no
//! filesystem access, no catalog lookups. The `BackingVaultRoot` mapping is
//! the one exception to "same relative shape everywhere" — each directory
//! contributes its stored alias, not its display name — so alias
//! substitution is threaded through explicitly rather than hidden inside a
//! lookup this crate performs itself.

use std::path::{Path, PathBuf};

use rand::RngCore;
use vaulthalla_common::{Error, Result};

/// One of the five path spaces a vault's tree is addressable through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    FuseRoot,
    VaultRoot,
    BackingVaultRoot,
    ThumbnailRoot,
    FileCacheRoot,
}

/// A lexically normalized, slash-separated path relative to a namespace root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RelPath(Vec<String>);

impl RelPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Normalize a raw relative path: drop `.` segments and repeated
    /// separators, reject empty components, and reject `..` — namespace
    /// translation never escapes its root.
    pub fn normalize(raw: &Path) -> Result<Self> {
        let mut out = Vec::new();
        for comp in raw.components() {
            match comp {
                std::path::Component::Normal(s) => {
                    let s = s.to_string_lossy().into_owned();
                    if s.is_empty() {
                        continue;
                    }
                    out.push(s);
                }
                std::path::Component::CurDir => continue,
                std::path::Component::ParentDir => {
                    return Err(Error::Usage(
                        "path component '..' is not allowed in namespace-relative paths".into(),
                    ));
                }
                std::path::Component::RootDir | std::path::Component::Prefix(_) => continue,
            }
        }
        Ok(Self(out))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::normalize(Path::new(raw))
    }

    pub fn join(&self, child: &str) -> Result<Self> {
        if child.is_empty() || child.contains('/') {
            return Err(Error::Usage(format!(
                "invalid path component: {child:?}"
            )));
        }
        let mut components = self.0.clone();
        components.push(child.to_string());
        Ok(Self(components))
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.0.clone();
            components.pop();
            Some(Self(components))
        }
    }

    pub fn to_path_string(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.0.join("/"))
        }
    }
}

/// A vault's four filesystem-backed namespace roots (`VaultRoot` has no host
/// filesystem root of its own — it is the abstract wire identity).
#[derive(Debug, Clone)]
pub struct Resolver {
    fuse_root: PathBuf,
    backing_vault_root: PathBuf,
    thumbnail_root: PathBuf,
    file_cache_root: PathBuf,
}

impl Resolver {
    pub fn new(
        fuse_root: impl Into<PathBuf>,
        backing_vault_root: impl Into<PathBuf>,
        thumbnail_root: impl Into<PathBuf>,
        file_cache_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fuse_root: fuse_root.into(),
            backing_vault_root: backing_vault_root.into(),
            thumbnail_root: thumbnail_root.into(),
            file_cache_root: file_cache_root.into(),
        }
    }

    fn root_for(&self, ns: Namespace) -> Option<&Path> {
        match ns {
            Namespace::FuseRoot => Some(&self.fuse_root),
            Namespace::VaultRoot => None,
            Namespace::BackingVaultRoot => Some(&self.backing_vault_root),
            Namespace::ThumbnailRoot => Some(&self.thumbnail_root),
            Namespace::FileCacheRoot => Some(&self.file_cache_root),
        }
    }

    /// `path` relative to the root of `ns`.
    pub fn rel(&self, path: &Path, ns: Namespace) -> Result<RelPath> {
        match self.root_for(ns) {
            Some(root) => {
                let stripped = path.strip_prefix(root).map_err(|_| {
                    Error::Usage(format!(
                        "invalid namespace: {path:?} is not under {root:?} ({ns:?})"
                    ))
                })?;
                RelPath::normalize(stripped)
            }
            None => RelPath::normalize(path),
        }
    }

    /// An absolute path for `rel` within `ns`.
    pub fn abs(&self, rel: &RelPath, ns: Namespace) -> PathBuf {
        match self.root_for(ns) {
            Some(root) => {
                let mut out = root.to_path_buf();
                for comp in rel.components() {
                    out.push(comp);
                }
                out
            }
            None => PathBuf::from(rel.to_path_string()),
        }
    }

    /// Translate `path`, given in `ns_a`, into its `ns_b` absolute form.
    ///
    /// Neither side may be `BackingVaultRoot` — that direction requires an
    /// alias chain and must go through [`Resolver::to_backing`] or
    /// [`Resolver::from_backing`].
    pub fn translate(&self, path: &Path, ns_a: Namespace, ns_b: Namespace) -> Result<PathBuf> {
        if matches!(ns_a, Namespace::BackingVaultRoot) || matches!(ns_b, Namespace::BackingVaultRoot) {
            return Err(Error::Usage(
                "translating to/from BackingVaultRoot requires an alias chain".into(),
            ));
        }
        let rel = self.rel(path, ns_a)?;
        Ok(self.abs(&rel, ns_b))
    }

    /// Map a vault-relative path to its backing (ciphertext) absolute path,
    /// substituting one base32 alias per directory level. `aliases` must
    /// have exactly one entry per component of `rel`, in order.
    pub fn to_backing(&self, rel: &RelPath, aliases: &[String]) -> Result<PathBuf> {
        if aliases.len() != rel.components().len() {
            return Err(Error::Usage(format!(
                "alias chain length {} does not match path depth {}",
                aliases.len(),
                rel.components().len()
            )));
        }
        let mut out = self.backing_vault_root.clone();
        for alias in aliases {
            out.push(alias);
        }
        Ok(out)
    }

    /// Reverse of [`Resolver::to_backing`]: reconstruct a vault-relative path
    /// from a backing-namespace path given the display name for each alias
    /// in the chain, in order.
    pub fn from_backing(&self, path: &Path, names: &[String]) -> Result<RelPath> {
        let backing_rel = self.rel(path, Namespace::BackingVaultRoot)?;
        if backing_rel.components().len() != names.len() {
            return Err(Error::Usage(format!(
                "name chain length {} does not match backing path depth {}",
                names.len(),
                backing_rel.components().len()
            )));
        }
        RelPath::normalize(Path::new(&names.join("/")))
    }
}

/// Generate a fresh opaque backing-path alias segment: 16 random bytes,
/// RFC4648 base32 without padding. Stable once assigned to an `FSEntry`.
pub fn generate_alias() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base32::encode(base32::Alphabet::RFC4648 { padding: false }, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::new("/mnt/vault", "/var/lib/vh/backing", "/var/lib/vh/thumbs", "/var/lib/vh/cache")
    }

    #[test]
    fn rel_strips_namespace_root() {
        let r = resolver();
        let rel = r.rel(Path::new("/mnt/vault/docs/report.pdf"), Namespace::FuseRoot).unwrap();
        assert_eq!(rel.components(), &["docs", "report.pdf"]);
    }

    #[test]
    fn rel_rejects_foreign_prefix() {
        let r = resolver();
        assert!(r.rel(Path::new("/somewhere/else"), Namespace::FuseRoot).is_err());
    }

    #[test]
    fn translate_fuse_to_vault_is_identity_shaped() {
        let r = resolver();
        let out = r
            .translate(Path::new("/mnt/vault/docs/report.pdf"), Namespace::FuseRoot, Namespace::VaultRoot)
            .unwrap();
        assert_eq!(out, PathBuf::from("/docs/report.pdf"));
    }

    #[test]
    fn translate_rejects_backing_namespace() {
        let r = resolver();
        assert!(r
            .translate(Path::new("/mnt/vault/docs"), Namespace::FuseRoot, Namespace::BackingVaultRoot)
            .is_err());
    }

    #[test]
    fn to_backing_substitutes_aliases_not_names() {
        let r = resolver();
        let rel = RelPath::parse("docs/report.pdf").unwrap();
        let aliases = vec!["AAAA".to_string(), "BBBB".to_string()];
        let backing = r.to_backing(&rel, &aliases).unwrap();
        assert_eq!(backing, PathBuf::from("/var/lib/vh/backing/AAAA/BBBB"));
    }

    #[test]
    fn to_backing_rejects_mismatched_alias_count() {
        let r = resolver();
        let rel = RelPath::parse("docs/report.pdf").unwrap();
        assert!(r.to_backing(&rel, &["only-one".to_string()]).is_err());
    }

    #[test]
    fn rel_path_rejects_parent_dir_escape() {
        assert!(RelPath::parse("../etc/passwd").is_err());
    }

    #[test]
    fn generated_aliases_are_distinct_and_well_formed() {
        let a = generate_alias();
        let b = generate_alias();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
