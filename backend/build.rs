// Build script for the reorg-server binary.
// - Captures Git commit hash, branch and build timestamp for the startup banner
// - Falls back to "unknown" when git is not available (e.g., source tarballs)

use std::path::{Path, PathBuf};
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf)
}

fn main() {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_default());

    let commit_hash =
        git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let branch =
        git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let build_date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", commit_hash);
    println!("cargo:rustc-env=GIT_BRANCH={}", branch);
    println!("cargo:rustc-env=BUILD_DATE={}", build_date);

    // Re-run when HEAD moves
    if let Some(root) = find_repo_root(&manifest_dir) {
        let git_head = root.join(".git").join("HEAD");
        let git_heads_dir = root.join(".git").join("refs").join("heads");
        if git_head.exists() {
            println!("cargo:rerun-if-changed={}", git_head.display());
        }
        if git_heads_dir.exists() {
            println!("cargo:rerun-if-changed={}", git_heads_dir.display());
        }
    }
}
