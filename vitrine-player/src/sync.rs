//! Synchronized playback role
//!
//! A kiosk joins a synchronized installation when a flag file
//! (`sync-leader.txt` or `sync-player.txt`) and the shared `sync.mp4` are
//! found in one of the search directories: every collection directory under
//! the media root, then the configured extra directories (`/boot`).
//! The sync protocol itself belongs to the external sync player; this module
//! only picks the role and runs that program once at startup.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use vitrine_common::config::StartupConfig;

const LEADER_FLAG: &str = "sync-leader.txt";
const FOLLOWER_FLAG: &str = "sync-player.txt";
const SYNC_VIDEO: &str = "sync.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    Leader,
    Follower,
}

/// Resolved sync launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub role: SyncRole,
    pub video: PathBuf,
    pub program: String,
    pub args: Vec<String>,
}

/// Directories searched for flag files, in order
pub fn search_dirs(media_root: &Path, extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match fs::read_dir(media_root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .collect(),
        Err(_) => Vec::new(),
    };
    dirs.sort();
    dirs.extend(extra.iter().cloned());
    dirs
}

fn find(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(name)).find(|p| p.is_file())
}

/// Determine the sync role; the leader flag takes precedence
pub fn detect(dirs: &[PathBuf]) -> Option<(SyncRole, PathBuf)> {
    let video = find(dirs, SYNC_VIDEO)?;
    if find(dirs, LEADER_FLAG).is_some() {
        return Some((SyncRole::Leader, video));
    }
    if find(dirs, FOLLOWER_FLAG).is_some() {
        return Some((SyncRole::Follower, video));
    }
    debug!("{} found but no sync flag file", video.display());
    None
}

/// Build the launch for this kiosk, if it takes part in sync playback
pub fn plan(config: &StartupConfig, media_root: &Path) -> Option<SyncPlan> {
    if !config.sync_enabled {
        return None;
    }
    let dirs = search_dirs(media_root, &config.sync_search_dirs);
    let (role, video) = detect(&dirs)?;

    let template = match role {
        SyncRole::Leader => &config.sync_leader_command,
        SyncRole::Follower => &config.sync_follower_command,
    };
    let Some((program, args)) = template.split_first() else {
        warn!("Sync role {:?} detected but no command configured", role);
        return None;
    };

    let video_str = video.to_string_lossy();
    Some(SyncPlan {
        role,
        program: program.clone(),
        args: args.iter().map(|a| a.replace("{path}", &video_str)).collect(),
        video,
    })
}

/// Run the sync player until it exits
///
/// The child is killed if the returned future is dropped (shutdown signal).
pub async fn run(plan: &SyncPlan) -> Result<()> {
    info!(
        "Sync mode {:?}: {} {}",
        plan.role,
        plan.program,
        plan.args.join(" ")
    );
    let status = tokio::process::Command::new(&plan.program)
        .args(&plan.args)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| Error::EngineInit(format!("cannot start {}: {}", plan.program, e)))?;

    if status.success() {
        info!("Sync player exited");
    } else {
        warn!("Sync player exited with {}", status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_no_video_no_role() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        touch(&root.path().join("a").join(LEADER_FLAG));

        let dirs = search_dirs(root.path(), &[]);
        assert_eq!(detect(&dirs), None);
    }

    #[test]
    fn test_leader_wins_over_follower() {
        let root = TempDir::new().unwrap();
        let boot = TempDir::new().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        touch(&root.path().join("a").join(SYNC_VIDEO));
        touch(&root.path().join("a").join(FOLLOWER_FLAG));
        touch(&boot.path().join(LEADER_FLAG));

        let dirs = search_dirs(root.path(), &[boot.path().to_path_buf()]);
        let (role, video) = detect(&dirs).unwrap();
        assert_eq!(role, SyncRole::Leader);
        assert_eq!(video, root.path().join("a").join(SYNC_VIDEO));
    }

    #[test]
    fn test_plan_fills_command_template() {
        let root = TempDir::new().unwrap();
        let boot = TempDir::new().unwrap();
        touch(&boot.path().join(SYNC_VIDEO));
        touch(&boot.path().join(FOLLOWER_FLAG));

        let config = StartupConfig {
            sync_search_dirs: vec![boot.path().to_path_buf()],
            ..Default::default()
        };
        let plan = plan(&config, root.path()).unwrap();
        assert_eq!(plan.role, SyncRole::Follower);
        assert_eq!(plan.program, "omxplayer-sync");
        assert_eq!(
            plan.args.last().map(String::as_str),
            Some(boot.path().join(SYNC_VIDEO).to_str().unwrap())
        );

        let disabled = StartupConfig {
            sync_enabled: false,
            ..config
        };
        assert!(super::plan(&disabled, root.path()).is_none());
    }
}
