use super::*;
use crate::identity::identity_channel;
use tokio::time::{Duration, timeout};

fn user(raw: &str) -> UserId {
    UserId::new(raw).expect("valid user id")
}

#[test]
fn load_missing_file_is_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileIdentityStore::new(dir.path().join("currentUserId"));
    assert_eq!(store.load().expect("load"), None);
}

#[test]
fn store_then_load_trims_whitespace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileIdentityStore::new(dir.path().join("nested").join("currentUserId"));

    store.store(&user("alice")).expect("store");
    assert_eq!(store.load().expect("load"), Some(user("alice")));

    fs::write(store.path(), "  bob \n").expect("write");
    assert_eq!(store.load().expect("load"), Some(user("bob")));
}

#[test]
fn blank_file_is_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileIdentityStore::new(dir.path().join("currentUserId"));
    fs::write(store.path(), "\n").expect("write");
    assert_eq!(store.load().expect("load"), None);
}

#[test]
fn store_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileIdentityStore::new(dir.path().join("currentUserId"));
    store.store(&user("alice")).expect("store");

    let names: Vec<_> = fs::read_dir(dir.path())
        .expect("read_dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("currentUserId")]);
}

#[tokio::test]
async fn watch_republishes_identity_written_by_another_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("currentUserId");
    let store = FileIdentityStore::new(&path);

    let (publisher, mut watch) = identity_channel(None);
    let _watcher = store.watch(publisher).expect("watch");

    let other_process = FileIdentityStore::new(&path);
    other_process.store(&user("from-other-tab")).expect("store");

    let changed = timeout(Duration::from_secs(5), watch.changed())
        .await
        .expect("identity change observed");
    assert_eq!(changed, Some(user("from-other-tab")));
}
