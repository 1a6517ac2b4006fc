fn main() {
    // Re-run when HEAD moves or tags change
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    // "v0.1.0" on a release tag, "v0.1.0-3-gabc1234" after it, a bare hash
    // with no tags, empty outside a git checkout.
    let describe = std::process::Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default();

    println!("cargo:rustc-env=THUMBNAILER_GIT_DESCRIBE={describe}");
}
