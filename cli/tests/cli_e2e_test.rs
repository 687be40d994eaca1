use assert_cmd::{Command, cargo_bin_cmd};

fn group_sync() -> Command {
    let mut cmd = cargo_bin_cmd!("group-sync");
    for var in [
        "API_BASE_URL",
        "CLIENT_ID",
        "CLIENT_SECRET",
        "GSUITE_DOMAIN",
        "GSUITE_ADMIN_EMAIL",
        "GSUITE_GROUP_PREFIX",
        "GSUITE_API_BASE_URL",
        "GOOGLE_APPLICATION_CREDENTIALS",
        "SYNC_CONCURRENCY",
        "SYNC_DRY_RUN",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

mod help_and_version {
    use super::*;
    use predicates::prelude::predicate;

    #[test]
    fn test_help_flag() {
        group_sync()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Usage:"))
            .stdout(predicate::str::contains("sync"));
    }

    #[test]
    fn test_version_flag() {
        group_sync()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("group-sync"));
    }

    #[test]
    fn test_no_args_shows_help() {
        group_sync()
            .assert()
            .failure()
            .stderr(predicate::str::contains("Usage:"));
    }
}

mod sync_subcommand {
    use super::*;
    use predicates::prelude::PredicateBooleanExt;
    use predicates::prelude::predicate;

    #[test]
    fn test_sync_help_lists_flags_and_env() {
        group_sync()
            .args(["sync", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--gsuite-group-prefix"))
            .stdout(predicate::str::contains("GSUITE_GROUP_PREFIX"))
            .stdout(predicate::str::contains("--concurrency"))
            .stdout(predicate::str::contains("--dry-run"))
            .stdout(predicate::str::contains("GSUITE_API_BASE_URL"));
    }

    #[test]
    fn test_sync_requires_registry_flags() {
        group_sync()
            .arg("sync")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--api-base-url").and(predicate::str::contains("required")));
    }

    #[test]
    fn test_sync_rejects_zero_concurrency() {
        group_sync()
            .args([
                "sync",
                "--api-base-url",
                "http://127.0.0.1:9",
                "--client-id",
                "id",
                "--client-secret",
                "secret",
                "--gsuite-domain",
                "example.com",
                "--gsuite-admin-email",
                "admin@example.com",
                "--gsuite-group-prefix",
                "eng-",
                "--concurrency",
                "0",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("concurrency must be at least 1"));
    }
}
