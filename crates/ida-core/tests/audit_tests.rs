use ida_core::audit::{ChangeRequest, HistoryQuery, SERVICE_USER};
use ida_core::storage::models::{ChangeKind, ChangeMode};
use ida_core::storage::Database;
use ida_core::{AppConfig, ChangeAuditLog, Error, FixedClock};

const MIGRATION_EPOCH: &str = "2023-03-01T00:00:00Z";

fn clock() -> FixedClock {
    FixedClock::at("2024-02-01T08:00:00Z").unwrap()
}

fn make_test_change<'r>(change: &'r str, pathname: &'r str, timestamp: &'r str) -> ChangeRequest<'r> {
    ChangeRequest {
        project: "2017_1234",
        user: "alice",
        change,
        pathname,
        timestamp: Some(timestamp),
        ..ChangeRequest::default()
    }
}

#[test]
fn test_record_defaults() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    let recorded = log
        .record(ChangeRequest {
            project: "2017_1234",
            user: "alice",
            change: "add",
            pathname: "/2017_1234+/a.dat",
            ..ChangeRequest::default()
        })
        .unwrap();
    assert_eq!(recorded.timestamp, "2024-02-01T08:00:00Z");
    assert_eq!(recorded.mode, ChangeMode::Api);
    assert_eq!(recorded.target, None);
}

#[test]
fn test_record_validation() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    let bad = [
        ChangeRequest { project: "", ..make_test_change("add", "/a", "2024-01-01T00:00:00Z") },
        ChangeRequest { user: " ", ..make_test_change("add", "/a", "2024-01-01T00:00:00Z") },
        make_test_change("", "/a", "2024-01-01T00:00:00Z"),
        make_test_change("add", "", "2024-01-01T00:00:00Z"),
        make_test_change("archive", "/a", "2024-01-01T00:00:00Z"),
        make_test_change("add", "/a", "not a timestamp"),
        ChangeRequest { mode: Some("batch"), ..make_test_change("add", "/a", "2024-01-01T00:00:00Z") },
    ];
    for request in bad {
        let err = log.record(request).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{:?}", err);
    }
    assert_eq!(db.select_data_changes("2017_1234", &Default::default()).unwrap().len(), 0);
}

#[test]
fn test_rename_requires_target() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    for change in ["rename", "move", "copy"] {
        let err = log
            .record(make_test_change(change, "/2017_1234+/a", "2024-01-01T00:00:00Z"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    let recorded = log
        .record(ChangeRequest {
            target: Some("/2017_1234+/b"),
            ..make_test_change("rename", "/2017_1234+/a", "2024-01-01T00:00:00Z")
        })
        .unwrap();

    let history = log
        .history(
            "2017_1234",
            &HistoryQuery {
                change: Some(ChangeKind::Rename),
                ..HistoryQuery::default()
            },
        )
        .unwrap();
    assert_eq!(history, vec![recorded]);
    assert_eq!(history[0].target.as_deref(), Some("/2017_1234+/b"));
}

#[test]
fn test_service_users_are_collapsed() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    for user in ["admin", "PSO_2017_1234"] {
        let recorded = log
            .record(ChangeRequest { user, ..make_test_change("delete", "/2017_1234+/x", "2024-01-01T00:00:00Z") })
            .unwrap();
        assert_eq!(recorded.user, SERVICE_USER);
    }
    let recorded = log
        .record(make_test_change("delete", "/2017_1234+/y", "2024-01-01T00:00:00Z"))
        .unwrap();
    assert_eq!(recorded.user, "alice");

    // Filters are normalized the same way.
    let by_admin = log
        .history("2017_1234", &HistoryQuery { user: Some("admin"), ..HistoryQuery::default() })
        .unwrap();
    assert_eq!(by_admin.len(), 2);
}

#[test]
fn test_history_ordering_and_limit() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    log.record(make_test_change("add", "/2017_1234+/b", "2024-01-02T00:00:00Z")).unwrap();
    log.record(make_test_change("add", "/2017_1234+/a", "2024-01-01T00:00:00Z")).unwrap();
    log.record(make_test_change("modify", "/2017_1234+/a", "2024-01-03T00:00:00Z")).unwrap();

    let all = log.history("2017_1234", &HistoryQuery::default()).unwrap();
    let stamps: Vec<_> = all.iter().map(|c| c.timestamp.as_str()).collect();
    assert_eq!(
        stamps,
        vec!["2024-01-03T00:00:00Z", "2024-01-02T00:00:00Z", "2024-01-01T00:00:00Z"]
    );

    let limited = log
        .history("2017_1234", &HistoryQuery { limit: Some(2), ..HistoryQuery::default() })
        .unwrap();
    assert_eq!(limited.len(), 2);

    let last_add = log
        .last_for("2017_1234", &HistoryQuery { change: Some(ChangeKind::Add), ..HistoryQuery::default() })
        .unwrap()
        .unwrap();
    assert_eq!(last_add.pathname, "/2017_1234+/b");

    let err = log
        .history("2017_1234", &HistoryQuery { limit: Some(0), ..HistoryQuery::default() })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_history_falls_back_to_migration_epoch() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    let history = log.history("2019_0001", &HistoryQuery::default()).unwrap();
    assert_eq!(history.len(), 1);
    let init = &history[0];
    assert_eq!(init.change, ChangeKind::Init);
    assert_eq!(init.pathname, "/");
    assert_eq!(init.user, SERVICE_USER);
    assert_eq!(init.mode, ChangeMode::System);
    assert_eq!(init.timestamp, MIGRATION_EPOCH);
    assert_eq!(init.project, "2019_0001");

    let compatible = HistoryQuery {
        user: Some("service"),
        change: Some(ChangeKind::Init),
        mode: Some(ChangeMode::System),
        limit: None,
    };
    assert_eq!(log.last_for("2019_0001", &compatible).unwrap().unwrap(), init.clone());

    // Filters the synthetic record cannot satisfy get no fallback.
    for query in [
        HistoryQuery { user: Some("alice"), ..HistoryQuery::default() },
        HistoryQuery { change: Some(ChangeKind::Add), ..HistoryQuery::default() },
        HistoryQuery { mode: Some(ChangeMode::Gui), ..HistoryQuery::default() },
    ] {
        assert!(log.history("2019_0001", &query).unwrap().is_empty());
        assert!(log.last_for("2019_0001", &query).unwrap().is_none());
    }

    // No fallback for initialization details either.
    assert!(log.get_initialization_details("2019_0001").unwrap().is_none());
}

#[test]
fn test_fallback_only_when_nothing_matches() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    log.record(make_test_change("add", "/2017_1234+/a", "2024-01-01T00:00:00Z")).unwrap();

    let all = log.history("2017_1234", &HistoryQuery::default()).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].change, ChangeKind::Add);

    // Nothing of kind init exists, so the synthetic record answers.
    let init = log
        .last_for("2017_1234", &HistoryQuery { change: Some(ChangeKind::Init), ..HistoryQuery::default() })
        .unwrap()
        .unwrap();
    assert_eq!(init.timestamp, MIGRATION_EPOCH);
}

#[test]
fn test_initialization_details_is_earliest_init() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    for ts in ["2024-01-05T00:00:00Z", "2024-01-01T00:00:00Z", "2024-01-09T00:00:00Z"] {
        log.record(ChangeRequest {
            user: "admin",
            mode: Some("system"),
            ..make_test_change("init", "/", ts)
        })
        .unwrap();
    }
    let init = log.get_initialization_details("2017_1234").unwrap().unwrap();
    assert_eq!(init.timestamp, "2024-01-01T00:00:00Z");
}

#[test]
fn test_last_add_change_details() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    log.record(make_test_change("add", "/2017_1234+/dir/a.dat", "2024-01-01T00:00:00Z")).unwrap();
    log.record(make_test_change("add", "/2017_1234+/dir/a.dat", "2024-01-04T00:00:00Z")).unwrap();
    log.record(make_test_change("modify", "/2017_1234+/dir/a.dat", "2024-01-06T00:00:00Z")).unwrap();
    log.record(make_test_change("add", "/2017_1234/dir/a.dat", "2024-01-07T00:00:00Z")).unwrap();

    let last = log
        .get_last_add_change_details("2017_1234", "/dir/a.dat")
        .unwrap()
        .unwrap();
    assert_eq!(last.timestamp, "2024-01-04T00:00:00Z");
    assert_eq!(last.pathname, "/2017_1234+/dir/a.dat");

    assert!(log
        .get_last_add_change_details("2017_1234", "/dir/missing.dat")
        .unwrap()
        .is_none());
}

#[test]
fn test_last_add_timestamps_by_prefix() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    log.record(make_test_change("add", "/2017_1234+/dir/a.dat", "2024-01-01T00:00:00Z")).unwrap();
    log.record(make_test_change("add", "/2017_1234+/dir/a.dat", "2024-01-03T00:00:00Z")).unwrap();
    log.record(make_test_change("add", "/2017_1234+/dir/b.dat", "2024-01-02T00:00:00Z")).unwrap();
    log.record(make_test_change("add", "/2017_1234+/dir_other/c.dat", "2024-01-02T00:00:00Z")).unwrap();
    log.record(make_test_change("add", "/2017_1234+/other/d.dat", "2024-01-02T00:00:00Z")).unwrap();
    log.record(make_test_change("delete", "/2017_1234+/dir/e.dat", "2024-01-02T00:00:00Z")).unwrap();

    let latest = log.last_add_timestamps_by_prefix("2017_1234", "/dir/").unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest["/2017_1234+/dir/a.dat"], "2024-01-03T00:00:00Z");
    assert_eq!(latest["/2017_1234+/dir/b.dat"], "2024-01-02T00:00:00Z");

    // LIKE wildcards in the scope are matched literally.
    assert!(log.last_add_timestamps_by_prefix("2017_1234", "/d%").unwrap().is_empty());
}

#[test]
fn test_purge() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    log.record(make_test_change("add", "/2017_1234+/a", "2024-01-01T00:00:00Z")).unwrap();
    log.record(ChangeRequest { project: "2018_0001", ..make_test_change("add", "/2018_0001+/a", "2024-01-01T00:00:00Z") })
        .unwrap();

    assert_eq!(log.purge("2017_1234").unwrap(), 1);
    assert_eq!(log.purge("all").unwrap(), 1);
    assert!(matches!(log.purge(""), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_record_round_trip() {
    let db = Database::open_in_memory().unwrap();
    let clock = clock();
    let config = AppConfig::default();
    let log = ChangeAuditLog::new(&db, &clock, &config);

    let requests = [
        ChangeRequest { mode: Some("gui"), ..make_test_change("add", "/2017_1234+/a", "2024-01-01T00:00:00Z") },
        ChangeRequest {
            target: Some("/2017_1234+/c"),
            mode: Some("cli"),
            ..make_test_change("copy", "/2017_1234+/a", "2024-01-02T00:00:00Z")
        },
        ChangeRequest { user: "PSO_2017_1234", ..make_test_change("delete", "/2017_1234+/a", "2024-01-03T00:00:00Z") },
    ];
    for request in requests {
        let recorded = log.record(request).unwrap();
        let fetched = log
            .history(
                &recorded.project,
                &HistoryQuery {
                    user: Some(&recorded.user),
                    change: Some(recorded.change),
                    mode: Some(recorded.mode),
                    limit: Some(1),
                },
            )
            .unwrap();
        assert_eq!(fetched, vec![recorded]);
    }
}
