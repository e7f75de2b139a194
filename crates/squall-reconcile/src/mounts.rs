//! Host directories backing application mounts.
//!
//! Layout: `{volume_root}/{application_id}/{volume_name}`.

use std::path::{Path, PathBuf};

use squall_state::Application;
use tracing::debug;

use crate::engine::MountBinding;

/// Host bindings for every mount of `app`.
pub fn bindings(volume_root: &Path, app: &Application) -> Vec<MountBinding> {
    app.mounts
        .iter()
        .map(|(volume, container_path)| MountBinding {
            host_path: app_dir(volume_root, &app.id).join(sanitize(volume)),
            container_path: container_path.clone(),
        })
        .collect()
}

/// Create the host side of every binding.
pub async fn provision(bindings: &[MountBinding]) -> std::io::Result<()> {
    for binding in bindings {
        tokio::fs::create_dir_all(&binding.host_path).await?;
        debug!(path = %binding.host_path.display(), "mount directory ready");
    }
    Ok(())
}

/// Remove all mount directories of an application. Missing is fine.
pub async fn remove_all(volume_root: &Path, app_id: &str) -> std::io::Result<()> {
    let dir = app_dir(volume_root, app_id);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => {
            debug!(path = %dir.display(), "mount directories removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn app_dir(volume_root: &Path, app_id: &str) -> PathBuf {
    volume_root.join(sanitize(app_id))
}

/// Keep volume names from escaping their parent directory.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use squall_state::ApplicationStatus;
    use std::collections::BTreeMap;

    fn app_with_mounts() -> Application {
        Application {
            id: "app-1".to_string(),
            node: "n1".to_string(),
            name: "db".to_string(),
            image: "postgres:16".to_string(),
            hostname: "db".to_string(),
            namespace: "default".to_string(),
            env: BTreeMap::new(),
            ports: BTreeMap::new(),
            mounts: BTreeMap::from([
                ("data".to_string(), "/var/lib/postgresql/data".to_string()),
                ("../etc".to_string(), "/etc/extra".to_string()),
            ]),
            cpu: 1.0,
            memory: 1024,
            revision: 0,
            status: ApplicationStatus::default(),
        }
    }

    #[test]
    fn bindings_stay_under_app_dir() {
        let root = Path::new("/srv/squall");
        let bound = bindings(root, &app_with_mounts());
        assert_eq!(bound.len(), 2);
        for b in &bound {
            assert!(b.host_path.starts_with("/srv/squall/app-1"));
        }
        assert!(bound.iter().any(|b| b.host_path.ends_with("___etc")));
    }

    #[tokio::test]
    async fn provision_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with_mounts();
        let bound = bindings(dir.path(), &app);

        provision(&bound).await.unwrap();
        assert!(bound.iter().all(|b| b.host_path.is_dir()));

        remove_all(dir.path(), &app.id).await.unwrap();
        assert!(!dir.path().join("app-1").exists());
        remove_all(dir.path(), &app.id).await.unwrap();
    }
}
