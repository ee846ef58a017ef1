use std::process::Command;

// The CLI version command reports which commit a binary was built from.
// Release pipelines can pin the value through APPC_GIT_COMMIT; local builds
// fall back to asking git. Dirty-tree detection is deliberately left out:
// the commit alone is enough to correlate a report with a source tree, and
// probing the worktree would re-run this script on every file save.
fn main() {
    println!("cargo:rerun-if-env-changed=APPC_GIT_COMMIT");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let commit = std::env::var("APPC_GIT_COMMIT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(commit_from_git);

    if let Some(commit) = commit {
        println!("cargo:rustc-env=APPC_GIT_COMMIT={commit}");
    }
}

fn commit_from_git() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short=12", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())?;
    let commit = String::from_utf8(out.stdout).ok()?;
    let commit = commit.trim();
    if commit.is_empty() {
        None
    } else {
        Some(commit.to_string())
    }
}
