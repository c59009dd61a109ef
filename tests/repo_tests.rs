#![cfg(feature = "inmem-store")]

use commune::{
    models::{Author, NewBranch, NewPost, NewTopic, PostDeletion},
    repo::{inmem::InMemRepo, RepoError},
};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use commune::repo::{BranchRepo, PostReader, PostWriter, ReadMarkRepo, TopicRepo};

fn ann() -> Author { Author { id: 1, name: "ann".into() } }
fn bob() -> Author { Author { id: 2, name: "bob".into() } }

async fn repo_with_topic() -> (InMemRepo, i64, i64) {
    let r = InMemRepo::ephemeral();
    let branch = r.create_branch(NewBranch { name: "General".into(), description: String::new() }).await.unwrap();
    let (topic, first) = r
        .create_topic(NewTopic { branch_id: branch.id, title: "Welcome all".into(), body: "first!".into(), code_review: false }, &ann())
        .await
        .unwrap();
    assert_eq!(first.topic_id, topic.id);
    (r, branch.id, topic.id)
}

#[tokio::test]
async fn branch_crud_and_conflict() {
    let r = InMemRepo::ephemeral();
    assert!(r.list_branches().await.unwrap().is_empty());
    let b = r.create_branch(NewBranch { name: "Rust".into(), description: "all things rust".into() }).await.unwrap();
    assert_eq!(r.get_branch(b.id).await.unwrap().name, "Rust");

    let err = r.create_branch(NewBranch { name: "Rust".into(), description: String::new() }).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
    assert!(matches!(r.get_branch(999).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn topic_requires_existing_branch() {
    let r = InMemRepo::ephemeral();
    let err = r
        .create_topic(NewTopic { branch_id: 77, title: "Orphan topic".into(), body: "body".into(), code_review: false }, &ann())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn replies_extend_the_ordered_sequence() {
    let (r, branch_id, topic_id) = repo_with_topic().await;
    let mut ids = r.ordered_post_ids(topic_id).await.unwrap();
    for i in 0..5 {
        let p = r.reply_to_topic(NewPost { topic_id, body: format!("reply {i}") }, &bob(), false).await.unwrap();
        ids.push(p.id);
    }
    assert_eq!(r.ordered_post_ids(topic_id).await.unwrap(), ids);
    assert_eq!(r.count_posts(topic_id).await.unwrap(), 6);

    let page: Vec<_> = r.list_posts(topic_id, 2, 3).await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(page, ids[2..5].to_vec());
    assert!(r.list_posts(topic_id, 10, 3).await.unwrap().is_empty());

    assert_eq!(r.list_topics(branch_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reply_to_missing_topic_is_not_found() {
    let r = InMemRepo::ephemeral();
    let err = r.reply_to_topic(NewPost { topic_id: 5, body: "hello".into() }, &bob(), false).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn edit_updates_body_and_stamp() {
    let (r, _, topic_id) = repo_with_topic().await;
    let post = r.reply_to_topic(NewPost { topic_id, body: "draft".into() }, &bob(), false).await.unwrap();
    let edited = r.update_post(post.id, "final".into()).await.unwrap();
    assert_eq!(edited.body, "final");
    assert!(edited.updated_at.is_some());
    assert_eq!(edited.created_at, post.created_at);
}

#[tokio::test]
async fn deleting_sole_post_removes_topic() {
    let (r, branch_id, topic_id) = repo_with_topic().await;
    let reply = r.reply_to_topic(NewPost { topic_id, body: "me too".into() }, &bob(), false).await.unwrap();
    r.subscribe(topic_id, 2).await.unwrap();

    assert_eq!(r.delete_post(reply.id).await.unwrap(), PostDeletion::PostRemoved { topic_id });
    assert!(r.get_topic(topic_id).await.is_ok());

    let first = r.ordered_post_ids(topic_id).await.unwrap()[0];
    assert_eq!(
        r.delete_post(first).await.unwrap(),
        PostDeletion::TopicRemoved { topic_id, branch_id }
    );
    assert!(matches!(r.get_topic(topic_id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.ordered_post_ids(topic_id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.subscribers(topic_id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.delete_post(first).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn close_and_subscriptions() {
    let (r, _, topic_id) = repo_with_topic().await;
    assert!(r.set_closed(topic_id, true).await.unwrap().closed);
    assert!(r.get_topic(topic_id).await.unwrap().closed);

    r.subscribe(topic_id, 3).await.unwrap();
    r.subscribe(topic_id, 2).await.unwrap();
    r.subscribe(topic_id, 3).await.unwrap();
    assert_eq!(r.subscribers(topic_id).await.unwrap(), vec![2, 3]);
    r.unsubscribe(topic_id, 3).await.unwrap();
    assert_eq!(r.subscribers(topic_id).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let topic_id = {
        let r = InMemRepo::with_snapshot(path.clone());
        let b = r.create_branch(NewBranch { name: "Persisted".into(), description: String::new() }).await.unwrap();
        let (t, _) = r
            .create_topic(NewTopic { branch_id: b.id, title: "Still here".into(), body: "yes".into(), code_review: false }, &ann())
            .await
            .unwrap();
        r.reply_to_topic(NewPost { topic_id: t.id, body: "reply".into() }, &bob(), false).await.unwrap();
        t.id
    };
    let reloaded = InMemRepo::with_snapshot(path);
    assert_eq!(reloaded.count_posts(topic_id).await.unwrap(), 2);
    // ids keep counting from where the snapshot left off
    let p = reloaded.reply_to_topic(NewPost { topic_id, body: "after restart".into() }, &bob(), false).await.unwrap();
    assert_eq!(*reloaded.ordered_post_ids(topic_id).await.unwrap().last().unwrap(), p.id);
}

#[tokio::test]
async fn closed_topic_gate_is_checked_on_insert() {
    let (r, _, topic_id) = repo_with_topic().await;
    r.set_closed(topic_id, true).await.unwrap();

    let err = r.reply_to_topic(NewPost { topic_id, body: "late".into() }, &bob(), false).await.unwrap_err();
    assert!(matches!(err, RepoError::Locked));
    assert_eq!(r.count_posts(topic_id).await.unwrap(), 1);

    r.reply_to_topic(NewPost { topic_id, body: "closing note".into() }, &ann(), true).await.unwrap();
    assert_eq!(r.count_posts(topic_id).await.unwrap(), 2);
}

#[tokio::test]
async fn code_review_takes_no_replies() {
    let r = InMemRepo::ephemeral();
    let b = r.create_branch(NewBranch { name: "Reviews".into(), description: String::new() }).await.unwrap();
    let (topic, _) = r
        .create_topic(NewTopic { branch_id: b.id, title: "Review my parser".into(), body: "fn main() {}".into(), code_review: true }, &ann())
        .await
        .unwrap();
    assert!(topic.code_review);
    for override_closed in [false, true] {
        let err = r
            .reply_to_topic(NewPost { topic_id: topic.id, body: "lgtm".into() }, &bob(), override_closed)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Locked));
    }
}

#[tokio::test]
async fn read_mark_only_moves_forward() {
    let (r, _, topic_id) = repo_with_topic().await;
    let first = r.ordered_post_ids(topic_id).await.unwrap()[0];
    let second = r.reply_to_topic(NewPost { topic_id, body: "two".into() }, &bob(), false).await.unwrap();

    assert_eq!(r.last_read(topic_id, 2).await.unwrap(), None);
    r.mark_read(topic_id, 2, second.id).await.unwrap();
    r.mark_read(topic_id, 2, first).await.unwrap();
    assert_eq!(r.last_read(topic_id, 2).await.unwrap(), Some(second.id));

    // a post from another topic is not a valid mark
    assert!(matches!(r.mark_read(topic_id, 2, 9_999).await, Err(RepoError::NotFound)));
    assert!(matches!(r.last_read(4_242, 2).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn deleting_marked_post_falls_back_to_previous() {
    let (r, _, topic_id) = repo_with_topic().await;
    let first = r.ordered_post_ids(topic_id).await.unwrap()[0];
    let second = r.reply_to_topic(NewPost { topic_id, body: "two".into() }, &bob(), false).await.unwrap();
    let third = r.reply_to_topic(NewPost { topic_id, body: "three".into() }, &bob(), false).await.unwrap();

    r.mark_read(topic_id, 2, third.id).await.unwrap();
    r.mark_read(topic_id, 3, second.id).await.unwrap();
    r.delete_post(third.id).await.unwrap();
    assert_eq!(r.last_read(topic_id, 2).await.unwrap(), Some(second.id));
    assert_eq!(r.last_read(topic_id, 3).await.unwrap(), Some(second.id));

    r.mark_read(topic_id, 4, first).await.unwrap();
    r.delete_post(first).await.unwrap();
    assert_eq!(r.last_read(topic_id, 4).await.unwrap(), None);
}

#[test]
fn concurrent_writers_leave_latest_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let repo = InMemRepo::with_snapshot(path.clone());

    let writers: Vec<_> = (0..6)
        .map(|w| {
            let repo = repo.clone();
            std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    for i in 0..20 {
                        repo.create_branch(NewBranch { name: format!("w{w}-{i}"), description: String::new() })
                            .await
                            .unwrap();
                    }
                });
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let live = rt.block_on(repo.list_branches()).unwrap().len();
    let reloaded = rt.block_on(InMemRepo::with_snapshot(path).list_branches()).unwrap().len();
    assert_eq!(live, 120);
    assert_eq!(reloaded, live);
}
