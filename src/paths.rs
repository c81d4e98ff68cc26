use std::path::PathBuf;

/// Filesystem layout for one engine instance. Callers provide an
/// app-specific base directory; everything else derives from it.
#[derive(Debug, Clone)]
pub struct EnginePaths {
    pub base_dir: PathBuf,
}

impl EnginePaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.base_dir.join("temp")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn job_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("jobs")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn yt_dlp_bin_path(&self) -> PathBuf {
        let mut path = self.tools_dir().join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ffmpeg_bin_path(&self) -> PathBuf {
        let mut path = self.tools_dir().join("ffmpeg");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn yt_dlp_cmd(&self) -> PathBuf {
        let path = self.yt_dlp_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("yt-dlp")
        }
    }

    pub fn ffmpeg_cmd(&self) -> PathBuf {
        let path = self.ffmpeg_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("ffmpeg")
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.temp_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.job_logs_dir())?;
        std::fs::create_dir_all(self.tools_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_cmd_falls_back_to_path_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = EnginePaths::new(dir.path().to_path_buf());
        assert_eq!(paths.yt_dlp_cmd(), PathBuf::from("yt-dlp"));
        assert_eq!(paths.ffmpeg_cmd(), PathBuf::from("ffmpeg"));
    }

    #[test]
    fn tool_cmd_prefers_bundled_binary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = EnginePaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().expect("dirs");
        std::fs::write(paths.yt_dlp_bin_path(), b"").expect("write");
        assert_eq!(paths.yt_dlp_cmd(), paths.yt_dlp_bin_path());
    }
}
