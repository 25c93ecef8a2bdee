mod common;

use common::*;
use smb_remote_fs::{memory::Call, service::errno, Error, Op};

/// Builds
/// ```text
/// tree/
///   a.txt
///   sub/
///     b.txt
///     deeper/
///       c.txt
///   empty/
///   z.txt
/// ```
fn seed_tree(service: &smb_remote_fs::memory::MemoryConnector) {
    service.put_file(SERVER, PUBLIC, "tree/a.txt", b"a").unwrap();
    service.put_file(SERVER, PUBLIC, "tree/sub/b.txt", b"b").unwrap();
    service
        .put_file(SERVER, PUBLIC, "tree/sub/deeper/c.txt", b"c")
        .unwrap();
    service.create_dir(SERVER, PUBLIC, "tree/empty").unwrap();
    service.put_file(SERVER, PUBLIC, "tree/z.txt", b"z").unwrap();
}

fn position(journal: &[Call], call: &Call) -> usize {
    journal
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call:?} missing from {journal:?}"))
}

#[tokio::test]
async fn recursive_delete_is_post_order() {
    let service = memory_service();
    seed_tree(&service);

    guest_session(&service)
        .delete_recursive(&public("tree"))
        .await
        .unwrap();

    let journal = service.journal();
    assert_eq!(
        journal,
        vec![
            Call::Unlink(url("tree/a.txt")),
            Call::Unlink(url("tree/sub/b.txt")),
            Call::Unlink(url("tree/sub/deeper/c.txt")),
            Call::Rmdir(url("tree/sub/deeper")),
            Call::Rmdir(url("tree/sub")),
            Call::Rmdir(url("tree/empty")),
            Call::Unlink(url("tree/z.txt")),
            Call::Rmdir(url("tree")),
        ]
    );

    let leaf = position(&journal, &Call::Unlink(url("tree/sub/deeper/c.txt")));
    for ancestor in ["tree/sub/deeper", "tree/sub", "tree"] {
        assert!(leaf < position(&journal, &Call::Rmdir(url(ancestor))));
    }
    assert!(!service.exists(SERVER, PUBLIC, "tree"));
    assert_eq!(service.open_handles(), 0);
}

#[tokio::test]
async fn recursive_delete_of_plain_file_falls_back_to_unlink() {
    let service = memory_service();
    service.put_file(SERVER, PUBLIC, "lonely.txt", b"x").unwrap();

    guest_session(&service)
        .delete_recursive(&public("lonely.txt"))
        .await
        .unwrap();

    assert_eq!(service.journal(), vec![Call::Unlink(url("lonely.txt"))]);
    assert!(!service.exists(SERVER, PUBLIC, "lonely.txt"));
}

#[tokio::test]
async fn recursive_delete_of_missing_path_fails() {
    let service = memory_service();

    let err = guest_session(&service)
        .delete_recursive(&public("ghost"))
        .await
        .unwrap_err();

    match err {
        Error::Service { op, url, status } => {
            assert_eq!(op, Op::Unlink);
            assert_eq!(url, "smb://nas/public/ghost");
            assert_eq!(status.code, errno::ENOENT);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn child_failure_aborts_the_rest_of_the_tree() {
    let service = memory_service();
    seed_tree(&service);
    let faulty = FaultyConnector::new(
        service.clone(),
        Faults {
            deny_unlink: Some(url("tree/sub/b.txt")),
            ..Faults::default()
        },
    );

    let err = faulty
        .session()
        .delete_recursive(&public("tree"))
        .await
        .unwrap_err();

    assert_eq!(err.status().map(|s| s.code), Some(EIO));
    assert_eq!(service.journal(), vec![Call::Unlink(url("tree/a.txt"))]);
    assert!(service.exists(SERVER, PUBLIC, "tree/sub/deeper/c.txt"));
    assert!(service.exists(SERVER, PUBLIC, "tree/z.txt"));
    assert_eq!(service.open_handles(), 0);
}

#[tokio::test]
async fn single_delete_picks_primitive_by_kind() {
    let service = memory_service();
    service.put_file(SERVER, PUBLIC, "dir/f", b"x").unwrap();
    let session = guest_session(&service);

    let err = session.delete(&public("dir"), true).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Service {
            op: Op::Rmdir,
            ..
        }
    ));
    assert_eq!(err.status().map(|s| s.code), Some(errno::ENOTEMPTY));

    session.delete(&public("dir/f"), false).await.unwrap();
    session.delete(&public("dir"), true).await.unwrap();

    assert_eq!(
        service.journal(),
        vec![Call::Unlink(url("dir/f")), Call::Rmdir(url("dir"))]
    );
}

#[tokio::test]
async fn unlink_of_directory_is_refused() {
    let service = memory_service();
    service.create_dir(SERVER, PUBLIC, "dir").unwrap();

    let err = guest_session(&service)
        .delete(&public("dir"), false)
        .await
        .unwrap_err();

    assert_eq!(err.status().map(|s| s.code), Some(errno::EISDIR));
    assert!(service.exists(SERVER, PUBLIC, "dir"));
}

#[tokio::test]
async fn deep_tree_does_not_grow_the_stack() {
    let service = memory_service();
    let depth = 2_000;
    let path = (0..depth).map(|i| format!("d{i}")).collect::<Vec<_>>().join("/");
    service
        .put_file(SERVER, PUBLIC, &format!("{path}/leaf"), b"x")
        .unwrap();

    guest_session(&service)
        .delete_recursive(&public("d0"))
        .await
        .unwrap();

    assert!(!service.exists(SERVER, PUBLIC, "d0"));
    assert_eq!(service.journal().len(), depth + 1);
}
