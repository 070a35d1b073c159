use asgipack_models::{Config, PackError};
use asgipack_packaging::{ImageBackend, PackagingService};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every build request instead of talking to Docker.
#[derive(Default)]
struct RecordingBackend {
    builds: AtomicUsize,
    staged_files: Mutex<Vec<Vec<PathBuf>>>,
    dockerfiles: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBackend for RecordingBackend {
    async fn build(&self, _image_ref: &str, context_dir: &Path) -> Result<(), PackError> {
        self.builds.fetch_add(1, Ordering::SeqCst);

        let mut files = Vec::new();
        collect(context_dir, context_dir, &mut files);
        files.sort();
        self.staged_files.lock().unwrap().push(files);

        let dockerfile = std::fs::read_to_string(context_dir.join("Dockerfile")).unwrap();
        self.dockerfiles.lock().unwrap().push(dockerfile);
        Ok(())
    }
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            out.push(path.strip_prefix(root).unwrap().to_path_buf());
        }
    }
}

/// Fails the way `docker build` fails on an unresolvable dependency pin.
struct UnresolvableDependencyBackend;

#[async_trait]
impl ImageBackend for UnresolvableDependencyBackend {
    async fn build(&self, _image_ref: &str, _context_dir: &Path) -> Result<(), PackError> {
        Err(PackError::DependencyInstall {
            message: "ERROR: No matching distribution found for fastapi==999.0.0".to_string(),
        })
    }
}

fn sample_context(dir: &Path) {
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(
        dir.join("requirements.txt"),
        "fastapi==0.110.0\nuvicorn==0.29.0\n",
    )
    .unwrap();
    std::fs::write(dir.join("src/main.py"), "app = object()\n").unwrap();
}

fn config_with_data_dir(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.data.dir = data_dir.display().to_string();
    config
}

#[tokio::test]
async fn build_declares_uvicorn_command_and_runtime_env() {
    let context = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    sample_context(context.path());

    let backend = Arc::new(RecordingBackend::default());
    let mut service =
        PackagingService::with_backend(config_with_data_dir(data.path()), backend.clone()).unwrap();

    let artifact = service.build(context.path()).await.unwrap();

    assert_eq!(
        artifact.launch.command_line(),
        "uvicorn src.main:app --host 0.0.0.0 --port 8000"
    );
    assert!(artifact
        .launch
        .env
        .contains(&("PYTHONUNBUFFERED".to_string(), "1".to_string())));
    assert!(artifact
        .launch
        .env
        .contains(&("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string())));

    let dockerfiles = backend.dockerfiles.lock().unwrap();
    assert!(dockerfiles[0].contains("FROM python:3.11-slim"));
    assert!(dockerfiles[0].contains("ENV PYTHONUNBUFFERED=1"));
}

#[tokio::test]
async fn staged_context_contains_manifest_source_and_dockerfile() {
    let context = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    sample_context(context.path());

    let backend = Arc::new(RecordingBackend::default());
    let mut service =
        PackagingService::with_backend(config_with_data_dir(data.path()), backend.clone()).unwrap();
    service.build(context.path()).await.unwrap();

    let staged = backend.staged_files.lock().unwrap();
    assert_eq!(
        staged[0],
        vec![
            PathBuf::from("Dockerfile"),
            PathBuf::from("requirements.txt"),
            PathBuf::from("src/main.py"),
        ]
    );
}

#[tokio::test]
async fn rebuild_with_unchanged_inputs_hits_the_cache() {
    let context = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    sample_context(context.path());

    let backend = Arc::new(RecordingBackend::default());
    let mut service =
        PackagingService::with_backend(config_with_data_dir(data.path()), backend.clone()).unwrap();

    let first = service.build(context.path()).await.unwrap();
    let second = service.build(context.path()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.build_count(), 1);
}

#[tokio::test]
async fn source_edit_invalidates_source_digest_but_not_manifest_digest() {
    let context = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    sample_context(context.path());

    let backend = Arc::new(RecordingBackend::default());
    let mut service =
        PackagingService::with_backend(config_with_data_dir(data.path()), backend.clone()).unwrap();

    let first = service.build(context.path()).await.unwrap();
    std::fs::write(context.path().join("src/main.py"), "app = object()  # v2\n").unwrap();
    let second = service.build(context.path()).await.unwrap();

    assert_eq!(first.manifest_digest, second.manifest_digest);
    assert_ne!(first.source_digest, second.source_digest);
    assert_ne!(first.image_ref, second.image_ref);
    assert_eq!(backend.build_count(), 2);
}

#[tokio::test]
async fn unresolvable_dependency_aborts_without_artifact() {
    let context = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(context.path().join("src")).unwrap();
    std::fs::write(context.path().join("requirements.txt"), "fastapi==999.0.0\n").unwrap();
    std::fs::write(context.path().join("src/main.py"), "app = object()\n").unwrap();

    let mut service = PackagingService::with_backend(
        config_with_data_dir(data.path()),
        Arc::new(UnresolvableDependencyBackend),
    )
    .unwrap();

    let err = service.build(context.path()).await.unwrap_err();
    match &err {
        PackError::DependencyInstall { message } => {
            assert!(message.contains("No matching distribution"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), Some(asgipack_models::BuildStage::AppDepsInstalled));
    assert_ne!(err.exit_code(), 0);
}

#[tokio::test]
async fn malformed_manifest_aborts_before_any_build() {
    let context = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(context.path().join("src")).unwrap();
    std::fs::write(context.path().join("requirements.txt"), "??bad-requirement\n").unwrap();
    std::fs::write(context.path().join("src/main.py"), "app = object()\n").unwrap();

    let backend = Arc::new(RecordingBackend::default());
    let mut service =
        PackagingService::with_backend(config_with_data_dir(data.path()), backend.clone()).unwrap();

    let err = service.build(context.path()).await.unwrap_err();
    assert!(matches!(err, PackError::InvalidManifest { line: 1, .. }));
    assert_eq!(backend.build_count(), 0);
}
