use std::path::{Path, PathBuf};

/// Extensions of files written next to a media artifact under the same base name
/// (subtitles, metadata, thumbnails, caption tracks)
pub const SIDECAR_EXTENSIONS: &[&str] = &["srt", "meta", "ts", "jpg", "png", "ass", "vtt"];

/// Get the path of one sidecar variant for a given artifact
pub fn sidecar_path(artifact: &Path, extension: &str) -> PathBuf {
    let mut path = artifact.to_path_buf();
    path.set_extension(extension);
    path
}

/// All sidecar paths that may belong to an artifact, excluding the artifact itself
pub fn sidecar_paths(artifact: &Path) -> Vec<PathBuf> {
    SIDECAR_EXTENSIONS
        .iter()
        .map(|ext| sidecar_path(artifact, ext))
        .filter(|p| p != artifact)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecars_share_base_name() {
        let paths = sidecar_paths(Path::new("/scratch/show_Ep1.mp4"));
        assert_eq!(paths.len(), SIDECAR_EXTENSIONS.len());
        assert!(paths.contains(&PathBuf::from("/scratch/show_Ep1.srt")));
        assert!(paths.contains(&PathBuf::from("/scratch/show_Ep1.vtt")));
    }

    #[test]
    fn test_artifact_with_sidecar_extension_is_not_listed() {
        let artifact = Path::new("/scratch/segment.ts");
        let paths = sidecar_paths(artifact);
        assert!(!paths.iter().any(|p| p == artifact));
        assert_eq!(paths.len(), SIDECAR_EXTENSIONS.len() - 1);
    }
}
