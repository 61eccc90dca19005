use std::io::Cursor;
use todo_core::db::open_db_in_memory;
use todo_core::{
    ingest_feed, ActionDispatcher, EngineConfig, ErrorKind, FeedError, SqliteTodoRepository,
    TodoListQuery,
};

const FEED: &str = r#"{"block_num":10,"trx_id":"aa01","account":"todo","name":"addtodo","authorization":[{"actor":"alice","permission":"active"}],"data":{"id":1,"text":"buy milk"}}
{"block_num":10,"trx_id":"aa01","account":"todo","name":"toggletodo","authorization":[{"actor":"alice","permission":"active"}],"data":{"id":1}}
{"block_num":11,"trx_id":"bb02","account":"eosio.token","name":"transfer","authorization":[{"actor":"alice"}],"data":{"from":"alice","to":"bob","quantity":"1.0000 EOS","memo":""}}

{"block_num":12,"trx_id":"cc03","account":"todo","name":"edittodo","authorization":[{"actor":"bob"}],"data":{"id":1,"text":"steal"}}
{"block_num":12,"trx_id":"cc04","account":"todo","name":"addtodo","authorization":[{"actor":"bob"}],"data":{"id":2,"text":"walk dog"}}
{"block_num":13,"trx_id":"dd05","account":"todo","name":"addtodo","authorization":[],"data":{"id":3,"text":"orphan"}}
"#;

#[test]
fn ingest_dispatches_subscribed_actions_and_reports_failures() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTodoRepository::try_new(&conn).unwrap();
    let dispatcher = ActionDispatcher::standalone(repo, EngineConfig::default());

    let report = ingest_feed(&dispatcher, Cursor::new(FEED)).unwrap();
    assert_eq!(report.applied, 3);
    assert_eq!(report.replayed, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failures.len(), 2);

    assert_eq!(report.failures[0].line, 5);
    assert_eq!(report.failures[0].kind, ErrorKind::NotOwner);
    assert_eq!(report.failures[0].trx_id, "cc03");
    assert_eq!(report.failures[1].line, 7);
    assert_eq!(report.failures[1].kind, ErrorKind::InvalidCall);

    let first = dispatcher.get(1).unwrap();
    assert_eq!(first.text, "buy milk");
    assert!(first.done);
    assert_eq!(first.version, 2);
    assert_eq!(dispatcher.get(2).unwrap().owner.as_str(), "bob");
}

#[test]
fn reingesting_same_feed_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTodoRepository::try_new(&conn).unwrap();
    let dispatcher = ActionDispatcher::standalone(repo, EngineConfig::default());

    ingest_feed(&dispatcher, Cursor::new(FEED)).unwrap();
    let before = dispatcher.list(&TodoListQuery::default()).unwrap();

    let report = ingest_feed(&dispatcher, Cursor::new(FEED)).unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.replayed, 3);

    let after = dispatcher.list(&TodoListQuery::default()).unwrap();
    assert_eq!(before, after);
    assert_eq!(dispatcher.history(1).unwrap().len(), 2);
}

#[test]
fn ingest_honors_configured_contract_account() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTodoRepository::try_new(&conn).unwrap();
    let config = EngineConfig {
        contract_account: "tasks".to_string(),
        ..EngineConfig::default()
    };
    let dispatcher = ActionDispatcher::standalone(repo, config);

    let report = ingest_feed(&dispatcher, Cursor::new(FEED)).unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 6);
    assert!(report.failures.is_empty());
}

#[test]
fn malformed_line_aborts_with_line_number() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTodoRepository::try_new(&conn).unwrap();
    let dispatcher = ActionDispatcher::standalone(repo, EngineConfig::default());
    let feed = format!("{}\n{{not json}}\n", FEED.lines().next().unwrap());

    let err = ingest_feed(&dispatcher, Cursor::new(feed)).unwrap_err();
    assert!(matches!(err, FeedError::Malformed { line: 2, .. }));
    // Lines before the malformed one stay committed.
    assert_eq!(dispatcher.get(1).unwrap().version, 1);
}

#[test]
fn foreign_actions_are_skipped_whatever_their_payload() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTodoRepository::try_new(&conn).unwrap();
    let dispatcher = ActionDispatcher::standalone(repo, EngineConfig::default());
    let feed = r#"{"block_num":20,"trx_id":"ee01","account":"eosio.token","name":"transfer","authorization":[{"actor":"alice","permission":"active"}],"data":{"from":"alice","to":"bob","quantity":"1.0000 EOS","memo":""}}
{"block_num":20,"trx_id":"ee02","account":"eosio","name":"onblock","authorization":[{"actor":"eosio"}],"data":"0000a1b2"}
{"block_num":21,"trx_id":"ee03","account":"todo","name":"addtodo","authorization":[{"actor":"alice"}],"data":{"id":1,"text":"buy milk"}}
"#;

    let report = ingest_feed(&dispatcher, Cursor::new(feed)).unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.applied, 1);
    assert!(report.failures.is_empty());
    assert_eq!(dispatcher.get(1).unwrap().text, "buy milk");
}

#[test]
fn undecodable_subscribed_payload_is_reported_and_ingest_continues() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTodoRepository::try_new(&conn).unwrap();
    let dispatcher = ActionDispatcher::standalone(repo, EngineConfig::default());
    let feed = r#"{"block_num":30,"trx_id":"ff01","account":"todo","name":"addtodo","authorization":[{"actor":"alice"}],"data":{"text":"no id"}}
{"block_num":31,"trx_id":"ff02","account":"todo","name":"addtodo","authorization":[{"actor":"alice"}],"data":{"id":4,"text":"has id"}}
"#;

    let report = ingest_feed(&dispatcher, Cursor::new(feed)).unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].line, 1);
    assert_eq!(report.failures[0].kind, ErrorKind::InvalidCall);
    assert_eq!(report.failures[0].trx_id, "ff01");
    assert_eq!(dispatcher.get(4).unwrap().version, 1);
}
