//! Tests that run the `nourish` binary. None of them need a database.

use std::process::{Command, Output};

fn nourish(config_home: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nourish"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("NOURISH_DATABASE_URL")
        .env_remove("NOURISH_GENERATOR_CMD")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run nourish")
}

#[test]
fn help_lists_the_commands() {
    let tmp = tempfile::TempDir::new().unwrap();
    let out = nourish(tmp.path(), &["--help"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for command in ["init", "db-init", "profile", "chat", "history", "diary", "serve"] {
        assert!(stdout.contains(command), "missing {command} in:\n{stdout}");
    }
}

#[test]
fn bash_completions_are_printed() {
    let tmp = tempfile::TempDir::new().unwrap();
    let out = nourish(tmp.path(), &["completions", "bash"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("_nourish"));
}

#[test]
fn init_writes_a_private_config_once() {
    let tmp = tempfile::TempDir::new().unwrap();
    let out = nourish(
        tmp.path(),
        &[
            "init",
            "--db-url",
            "postgresql://db.internal:5432/meals",
            "--generator-cmd",
            "llm -m local",
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let path = tmp.path().join("nourish").join("config.toml");
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("postgresql://db.internal:5432/meals"));
    assert!(contents.contains("command = \"llm\""));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let again = nourish(tmp.path(), &["init"]);
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("--force"));

    let forced = nourish(tmp.path(), &["init", "--force"]);
    assert!(forced.status.success());
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("command = \"claude\""));
}

#[test]
fn profile_set_rejects_a_bad_enum_before_connecting() {
    let tmp = tempfile::TempDir::new().unwrap();
    let out = nourish(
        tmp.path(),
        &[
            "profile", "set", "asha", "--age", "30", "--sex", "robot", "--height-cm", "160",
            "--weight-kg", "60", "--budget", "50",
        ],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("robot"));
}
