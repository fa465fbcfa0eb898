//! Keypair files: one line, the 64 hex character ed25519 secret.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tollgate_core::Keypair;

pub fn load_keypair(path: &Path) -> Result<Keypair> {
    let secret = fs::read_to_string(path)
        .with_context(|| format!("reading keypair {}", path.display()))?;
    Keypair::from_secret_hex(&secret).with_context(|| format!("decoding keypair {}", path.display()))
}

pub fn write_keypair(path: &Path, keypair: &Keypair, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, format!("{}\n", keypair.secret_hex().expose()))
        .with_context(|| format!("writing keypair {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::Signer;

    #[test]
    fn keypair_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("admin.key");
        let keypair = Keypair::generate();
        write_keypair(&path, &keypair, false).unwrap();
        assert_eq!(load_keypair(&path).unwrap().address(), keypair.address());
        assert!(write_keypair(&path, &Keypair::generate(), false).is_err());
    }

    #[test]
    fn garbage_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        fs::write(&path, "zz").unwrap();
        assert!(load_keypair(&path).is_err());
    }
}
