//! Command-line parsing of the `run` flags into resolved settings.

use std::time::Duration;

use clap::Parser;
use mongo_tail::config::{ParseMethod, SettingsFile};
use mongo_tail::RunArgs;
use tail_core::TransformMode;

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    run: RunArgs,
}

fn parse(args: &[&str]) -> RunArgs {
    let mut argv = vec!["mongo-tail"];
    argv.extend_from_slice(args);
    TestCli::try_parse_from(argv).unwrap().run
}

#[test]
fn test_full_flag_set() -> anyhow::Result<()> {
    let args = parse(&[
        "--uri",
        "mongodb://localhost:27017/logs",
        "--collection",
        "^events_",
        "--exclude-collections",
        "events_debug,events_tmp",
        "--batch-size",
        "50",
        "--retry-delay",
        "500ms",
        "--poll-floor",
        "0.05",
        "--poll-ceiling",
        "2m",
        "--parse-method",
        "dig",
        "--dig-fields",
        "info,request",
        "--dig-dig-fields",
        "headers",
        "--unpack-mongo-id",
        "--add-log-entry",
        "--reset-backoff-on-data",
        "--checkpoint-every",
        "10",
        "--channel-capacity",
        "64",
    ]);
    assert_eq!(args.parse_method, Some(ParseMethod::Dig));

    let settings = args.resolve_with(SettingsFile::default())?;
    let tail = &settings.tail;
    assert_eq!(tail.collection_pattern, "^events_");
    assert_eq!(tail.exclude_collections, vec!["events_debug", "events_tmp"]);
    assert_eq!(tail.batch_size, 50);
    assert_eq!(tail.retry_delay, Duration::from_millis(500));
    assert_eq!(tail.poll_floor, Duration::from_millis(50));
    assert_eq!(tail.poll_ceiling, Duration::from_secs(120));
    assert_eq!(tail.transform.mode, TransformMode::Dig);
    assert_eq!(tail.transform.dig_fields, vec!["info", "request"]);
    assert_eq!(tail.transform.dig_dig_fields, vec!["headers"]);
    assert!(tail.unpack_mongo_id);
    assert!(tail.add_log_entry);
    assert!(tail.reset_backoff_on_data);
    assert_eq!(tail.checkpoint_every, Some(10));
    assert_eq!(settings.channel_capacity, 64);
    Ok(())
}

#[test]
fn test_simple_is_an_alias_for_raw() {
    let args = parse(&["--parse-method", "simple"]);
    assert_eq!(args.parse_method, Some(ParseMethod::Raw));
}

#[test]
fn test_rejects_bad_values() {
    let bad = [
        vec!["mongo-tail", "--parse-method", "deep"],
        vec!["mongo-tail", "--retry-delay", "soon"],
        vec!["mongo-tail", "--batch-size", "-1"],
    ];
    for argv in bad {
        assert!(TestCli::try_parse_from(argv.clone()).is_err(), "{argv:?} parsed");
    }
}

#[test]
fn test_poll_bounds_checked_at_resolve() -> anyhow::Result<()> {
    let args = parse(&[
        "--uri",
        "mongodb://localhost/logs",
        "--collection",
        "events",
        "--poll-floor",
        "5s",
        "--poll-ceiling",
        "1s",
    ]);
    let err = args.resolve_with(SettingsFile::default()).unwrap_err();
    assert!(err.to_string().contains("poll_ceiling"));
    Ok(())
}
