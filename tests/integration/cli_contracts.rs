use chronofs::tooling::cli::{Cli, CliContext, Commands, OutputFormat};
use chronofs::MetaStore;
use clap::{CommandFactory, Parser};

use crate::integration::support::test_options;

#[test]
fn parse_valid_command_matrix() {
    let cases: Vec<Vec<&str>> = vec![
        vec!["chronofs", "init"],
        vec!["chronofs", "ls"],
        vec!["chronofs", "ls", "/a", "--at", "3", "--format", "json"],
        vec!["chronofs", "mkdir", "/a"],
        vec!["chronofs", "touch", "/a/b.txt"],
        vec!["chronofs", "rm", "/a/b.txt"],
        vec!["chronofs", "stat", "/a", "--at", "2"],
        vec!["chronofs", "log", "--format", "json"],
        vec!["chronofs", "history", "/a"],
        vec!["chronofs", "fsck"],
        vec!["chronofs", "--data-dir", "/tmp/x", "--log-level", "debug", "ls"],
    ];

    for args in cases {
        let parsed = Cli::try_parse_from(args.clone());
        assert!(parsed.is_ok(), "expected valid parse for args: {args:?}");
    }
}

#[test]
fn parse_rejects_bad_arguments() {
    assert!(Cli::try_parse_from(["chronofs", "ls", "--format", "yaml"]).is_err());
    assert!(Cli::try_parse_from(["chronofs", "ls", "--at", "latest"]).is_err());
    assert!(Cli::try_parse_from(["chronofs", "mkdir"]).is_err());
}

#[test]
fn help_lists_every_command() {
    let mut command = Cli::command();
    let mut output = Vec::new();
    command.write_long_help(&mut output).unwrap();
    let output = String::from_utf8(output).unwrap();
    for name in ["init", "ls", "mkdir", "touch", "rm", "stat", "log", "history", "fsck"] {
        assert!(output.contains(name), "help is missing {name}");
    }
}

#[test]
fn stat_json_contract_has_required_fields() {
    let cli = CliContext::with_store(MetaStore::in_memory(&test_options()).unwrap());
    cli.execute(&Commands::Mkdir { path: "/a".into() }).unwrap();

    let output = cli
        .execute(&Commands::Stat {
            path: "/a".into(),
            at: None,
            format: OutputFormat::Json,
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert!(parsed.get("inode").and_then(|v| v.as_u64()).is_some());
    assert!(parsed.get("node_id").and_then(|v| v.as_u64()).is_some());
    assert_eq!(parsed.get("name").and_then(|v| v.as_str()), Some("a"));
    assert_eq!(parsed.get("kind").and_then(|v| v.as_str()), Some("Directory"));
    assert!(parsed.get("revision_id").and_then(|v| v.as_u64()).is_some());
    assert_eq!(parsed.get("resolution").and_then(|v| v.as_str()), Some("Live"));
    assert_eq!(parsed.get("child_count").and_then(|v| v.as_u64()), Some(0));
}

#[test]
fn fsck_and_log_json_contracts() {
    let cli = CliContext::with_store(MetaStore::in_memory(&test_options()).unwrap());
    cli.execute(&Commands::Touch { path: "/f".into() }).unwrap();

    let fsck = cli
        .execute(&Commands::Fsck {
            format: OutputFormat::Json,
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&fsck).unwrap();
    assert_eq!(parsed["violations"].as_array().map(Vec::len), Some(0));
    assert_eq!(parsed["nodes"].as_u64(), Some(2));

    let log = cli
        .execute(&Commands::Log {
            format: OutputFormat::Json,
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&log).unwrap();
    let revisions = parsed.as_array().unwrap();
    assert_eq!(revisions.len(), 2);
    assert!(revisions[0].get("created_at").and_then(|v| v.as_str()).is_some());
}

#[test]
fn log_flags_override_config() {
    use chronofs::logging::{LogFormat, LogOutput};

    let cli = Cli::try_parse_from([
        "chronofs",
        "--log-format",
        "json",
        "--log-output",
        "file+stderr",
        "fsck",
    ])
    .unwrap();
    assert_eq!(cli.log_format, Some(LogFormat::Json));
    assert_eq!(cli.log_output, Some(LogOutput::FileAndStderr));
    assert!(Cli::try_parse_from(["chronofs", "--log-output", "syslog", "fsck"]).is_err());
}
