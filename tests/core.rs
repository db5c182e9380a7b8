use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use quill::auth::sign_up;
use quill::comments::add_comment;
use quill::config::Settings;
use quill::core::db::MemoryStore;
use quill::follow::{follow_author, is_following, unfollow_author, FollowOutcome};
use quill::groups::create_group;
use quill::models::{Actor, User};
use quill::page_cache::{get_or_render, home_page_key, KvPageCache, PageCache};
use quill::posts::{create_post, delete_post, edit_post, PostChanges, PostDraft};
use quill::query::{anchor_at, list_comments, list_feed, list_posts, paginate, PostFilter};
use quill::repository::{new_post, FollowRepository, KvRepository, PostRepository};
use quill::{Blog, BlogError};

fn blog() -> Blog<MemoryStore> {
    Blog::in_memory(Settings::default())
}

fn user(blog: &Blog<MemoryStore>, name: &str) -> (User, Actor) {
    let user = sign_up(&blog.repo, name, "password").unwrap();
    let actor = Actor::Authenticated(user.clone());
    (user, actor)
}

fn draft(text: &str) -> PostDraft {
    PostDraft {
        text: text.to_string(),
        ..PostDraft::default()
    }
}

fn texts(views: &[quill::query::PostView]) -> Vec<String> {
    views.iter().map(|v| v.post.text.clone()).collect()
}

#[test]
fn new_post_is_first_and_reaches_followers_feed() {
    let blog = blog();
    let (u, u_actor) = user(&blog, "HaHaHa");
    let (_, v_actor) = user(&blog, "Alice");

    create_post(&blog.repo, &blog.cache, &u_actor, draft("Older")).unwrap();
    let hello = create_post(&blog.repo, &blog.cache, &u_actor, draft("Hello")).unwrap();

    let posts = list_posts(&blog.repo, &PostFilter::default()).unwrap();
    assert_eq!(posts[0].post.id, hello.id);
    assert_eq!(posts[0].author.username, "HaHaHa");

    follow_author(&blog.repo, &blog.cache, &v_actor, &u.username).unwrap();
    let feed = list_feed(&blog.repo, v_actor.id().unwrap()).unwrap();
    assert_eq!(texts(&feed), vec!["Hello", "Older"]);

    unfollow_author(&blog.repo, &blog.cache, &v_actor, &u.username).unwrap();
    assert!(list_feed(&blog.repo, v_actor.id().unwrap()).unwrap().is_empty());
}

#[test]
fn feed_excludes_authors_not_followed() {
    let blog = blog();
    let (author, author_actor) = user(&blog, "author");
    let (_, other_actor) = user(&blog, "other");
    let (_, reader_actor) = user(&blog, "reader");

    assert!(list_feed(&blog.repo, reader_actor.id().unwrap()).unwrap().is_empty());

    create_post(&blog.repo, &blog.cache, &author_actor, draft("followed")).unwrap();
    create_post(&blog.repo, &blog.cache, &other_actor, draft("recent but not followed")).unwrap();
    follow_author(&blog.repo, &blog.cache, &reader_actor, &author.username).unwrap();

    let feed = list_feed(&blog.repo, reader_actor.id().unwrap()).unwrap();
    assert_eq!(texts(&feed), vec!["followed"]);
}

#[test]
fn following_twice_keeps_one_row_and_self_follow_is_rejected() {
    let blog = blog();
    let (author, _) = user(&blog, "author");
    let (reader, reader_actor) = user(&blog, "reader");

    let first = follow_author(&blog.repo, &blog.cache, &reader_actor, &author.username).unwrap();
    let second = follow_author(&blog.repo, &blog.cache, &reader_actor, &author.username).unwrap();
    assert_eq!(first, FollowOutcome::Followed);
    assert_eq!(second, FollowOutcome::AlreadyFollowing);
    assert_eq!(blog.repo.list_followings(&reader.id).unwrap(), vec![author.id.clone()]);
    assert_eq!(blog.repo.list_followers(&author.id).unwrap(), vec![reader.id.clone()]);
    assert!(is_following(&blog.repo, &reader_actor, &author.id).unwrap());

    let err = follow_author(&blog.repo, &blog.cache, &reader_actor, &reader.username).unwrap_err();
    assert!(matches!(err, BlogError::Validation { .. }));
    assert!(blog.repo.get_follow(&reader.id, &reader.id).unwrap().is_none());

    let err = follow_author(&blog.repo, &blog.cache, &Actor::Anonymous, &author.username).unwrap_err();
    assert!(matches!(err, BlogError::Unauthorized));
}

#[test]
fn unfollow_without_subscription_is_a_no_op() {
    let blog = blog();
    let (author, _) = user(&blog, "author");
    let (_, reader_actor) = user(&blog, "reader");
    unfollow_author(&blog.repo, &blog.cache, &reader_actor, &author.username).unwrap();
    assert!(!is_following(&blog.repo, &reader_actor, &author.id).unwrap());
}

#[test]
fn only_the_author_can_edit_and_only_supplied_fields_change() {
    let blog = blog();
    let (_, author_actor) = user(&blog, "author");
    let (_, intruder) = user(&blog, "intruder");
    create_group(&blog.repo, "Cats", Some("cats"), "").unwrap();

    let post = create_post(
        &blog.repo,
        &blog.cache,
        &author_actor,
        PostDraft {
            text: "original".into(),
            group: Some("cats".into()),
            image: Some("posts/small.gif".into()),
        },
    )
    .unwrap();

    let changes = PostChanges {
        text: Some("hijacked".into()),
        ..PostChanges::default()
    };
    let err = edit_post(&blog.repo, &blog.cache, &intruder, &post.id, changes.clone()).unwrap_err();
    assert!(matches!(err, BlogError::Unauthorized));
    assert_eq!(blog.repo.get_post(&post.id).unwrap().unwrap().text, "original");

    let err = edit_post(
        &blog.repo,
        &blog.cache,
        &author_actor,
        &post.id,
        PostChanges {
            text: Some("   ".into()),
            ..PostChanges::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, BlogError::Validation { field: "text", .. }));

    let edited = edit_post(
        &blog.repo,
        &blog.cache,
        &author_actor,
        &post.id,
        PostChanges {
            text: Some("changed".into()),
            ..PostChanges::default()
        },
    )
    .unwrap();
    assert_eq!(edited.text, "changed");
    assert_eq!(edited.group_slug.as_deref(), Some("cats"));
    assert_eq!(edited.image.as_deref(), Some("posts/small.gif"));
    assert_eq!(edited.author_id, post.author_id);
    assert!(edited.updated_at.is_some());
}

#[test]
fn create_post_validates_text_group_and_actor() {
    let blog = blog();
    let (_, actor) = user(&blog, "author");

    assert!(matches!(
        create_post(&blog.repo, &blog.cache, &actor, draft("")),
        Err(BlogError::Validation { field: "text", .. })
    ));
    assert!(matches!(
        create_post(
            &blog.repo,
            &blog.cache,
            &actor,
            PostDraft {
                text: "hi".into(),
                group: Some("missing".into()),
                image: None,
            }
        ),
        Err(BlogError::Validation { field: "group", .. })
    ));
    assert!(matches!(
        create_post(&blog.repo, &blog.cache, &Actor::Anonymous, draft("hi")),
        Err(BlogError::Unauthorized)
    ));
    assert!(list_posts(&blog.repo, &PostFilter::default()).unwrap().is_empty());
}

#[test]
fn group_and_author_filters() {
    let blog = blog();
    let (alice, alice_actor) = user(&blog, "alice");
    let (_, bob_actor) = user(&blog, "bob");
    create_group(&blog.repo, "Cats", None, "").unwrap();
    create_group(&blog.repo, "Dogs", None, "").unwrap();

    let in_cats = PostDraft {
        text: "meow".into(),
        group: Some("cats".into()),
        image: None,
    };
    create_post(&blog.repo, &blog.cache, &alice_actor, in_cats).unwrap();
    create_post(&blog.repo, &blog.cache, &bob_actor, draft("woof")).unwrap();

    let cats = list_posts(&blog.repo, &PostFilter::group("cats")).unwrap();
    assert_eq!(texts(&cats), vec!["meow"]);
    assert_eq!(cats[0].group.as_ref().map(|g| g.title.as_str()), Some("Cats"));
    assert!(list_posts(&blog.repo, &PostFilter::group("dogs")).unwrap().is_empty());
    assert_eq!(texts(&list_posts(&blog.repo, &PostFilter::author(&alice.id)).unwrap()), vec!["meow"]);
}

#[test]
fn duplicate_group_slug_is_a_conflict() {
    let blog = blog();
    create_group(&blog.repo, "Cats", Some("cats"), "").unwrap();
    assert!(matches!(
        create_group(&blog.repo, "Other cats", Some("cats"), ""),
        Err(BlogError::Conflict(_))
    ));
    assert!(matches!(
        create_group(&blog.repo, "Bad", Some("bad slug"), ""),
        Err(BlogError::Validation { field: "slug", .. })
    ));
}

#[test]
fn comments_are_chronological_and_anonymous_ones_are_dropped() {
    let blog = blog();
    let (_, author) = user(&blog, "author");
    let (_, reader) = user(&blog, "reader");
    let post = create_post(&blog.repo, &blog.cache, &author, draft("post")).unwrap();

    add_comment(&blog.repo, &blog.cache, &reader, &post.id, "first").unwrap();
    add_comment(&blog.repo, &blog.cache, &author, &post.id, "second").unwrap();
    let err = add_comment(&blog.repo, &blog.cache, &Actor::Anonymous, &post.id, "Spam").unwrap_err();
    assert!(matches!(err, BlogError::Unauthorized));
    let err = add_comment(&blog.repo, &blog.cache, &reader, &post.id, "").unwrap_err();
    assert!(matches!(err, BlogError::Validation { field: "text", .. }));

    let comments = list_comments(&blog.repo, &post.id).unwrap();
    let texts: Vec<_> = comments.iter().map(|c| c.comment.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert_eq!(comments[0].author.username, "reader");

    let listed = list_posts(&blog.repo, &PostFilter::default()).unwrap();
    assert_eq!(listed[0].comment_count, 2);
}

#[test]
fn deleting_a_post_removes_its_comments() {
    let blog = blog();
    let (_, author) = user(&blog, "author");
    let (_, reader) = user(&blog, "reader");
    let post = create_post(&blog.repo, &blog.cache, &author, draft("post")).unwrap();
    add_comment(&blog.repo, &blog.cache, &reader, &post.id, "comment").unwrap();

    assert!(matches!(
        delete_post(&blog.repo, &blog.cache, &reader, &post.id),
        Err(BlogError::Unauthorized)
    ));
    delete_post(&blog.repo, &blog.cache, &author, &post.id).unwrap();
    assert!(list_comments(&blog.repo, &post.id).unwrap().is_empty());
    assert!(list_posts(&blog.repo, &PostFilter::default()).unwrap().is_empty());
}

#[test]
fn last_page_size_follows_remainder() {
    let blog = blog();
    let (_, actor) = user(&blog, "author");
    for i in 0..13 {
        create_post(&blog.repo, &blog.cache, &actor, draft(&format!("post {}", i))).unwrap();
    }
    let posts = list_posts(&blog.repo, &PostFilter::default()).unwrap();

    let first = paginate(posts.clone(), 10, 1).unwrap();
    assert_eq!(first.items.len(), 10);
    assert_eq!(first.num_pages, 2);
    let last = paginate(posts, 10, 2).unwrap();
    assert_eq!(last.items.len(), 3);
}

#[test]
fn anchored_pages_do_not_shift_when_posts_arrive() {
    let blog = blog();
    let (_, actor) = user(&blog, "author");
    for i in 0..15 {
        create_post(&blog.repo, &blog.cache, &actor, draft(&format!("post {}", i))).unwrap();
    }
    let before = list_posts(&blog.repo, &PostFilter::default()).unwrap();
    let anchor = before[0].post.id.clone();
    let page_two = texts(&paginate(anchor_at(before, Some(&anchor)), 10, 2).unwrap().items);

    create_post(&blog.repo, &blog.cache, &actor, draft("brand new")).unwrap();
    let after = list_posts(&blog.repo, &PostFilter::default()).unwrap();
    let anchored = texts(&paginate(anchor_at(after.clone(), Some(&anchor)), 10, 2).unwrap().items);
    assert_eq!(page_two, anchored);

    // Without the anchor the newest post pushes everything down by one
    let unanchored = texts(&paginate(after, 10, 2).unwrap().items);
    assert_ne!(page_two, unanchored);
}

fn render_home(blog: &Blog<MemoryStore>) -> String {
    let blob = get_or_render(&blog.cache, &home_page_key("1", None), || {
        let posts = list_posts(&blog.repo, &PostFilter::default())?;
        Ok(texts(&posts).join(",").into_bytes())
    })
    .unwrap();
    String::from_utf8(blob).unwrap()
}

#[test]
fn cached_home_page_stays_stale_until_cleared() {
    let blog = blog();
    let (user, _) = user(&blog, "HaHaHa");
    let p1 = new_post(&user.id, "P1", None, None);
    blog.repo.insert_post(&p1).unwrap();

    let first = render_home(&blog);
    assert_eq!(first, "P1");

    blog.repo.insert_post(&new_post(&user.id, "P2", None, None)).unwrap();
    blog.repo.delete_post(&p1.id).unwrap();
    assert_eq!(render_home(&blog), first);

    blog.cache.clear().unwrap();
    let fresh = render_home(&blog);
    assert_eq!(fresh, "P2");
    assert!(!fresh.contains("P1"));
}

#[test]
fn cache_entry_expires_after_ttl() {
    let now = Arc::new(Mutex::new(Utc::now()));
    let handle = now.clone();
    let clock = Arc::new(move || -> DateTime<Utc> { *handle.lock().unwrap() });
    let cache = KvPageCache::with_clock(MemoryStore::new(), Duration::seconds(20), true, clock);
    let blog = Blog::with_cache(MemoryStore::new(), cache, Settings::default());
    let (user, _) = user(&blog, "HaHaHa");

    blog.repo.insert_post(&new_post(&user.id, "P1", None, None)).unwrap();
    assert_eq!(render_home(&blog), "P1");
    blog.repo.insert_post(&new_post(&user.id, "P2", None, None)).unwrap();
    assert_eq!(render_home(&blog), "P1");

    *now.lock().unwrap() += Duration::seconds(21);
    assert_eq!(render_home(&blog), "P2,P1");
}

#[test]
fn mutations_invalidate_pages_when_enabled() {
    let blog = blog();
    let (author, author_actor) = user(&blog, "author");
    let (_, reader_actor) = user(&blog, "reader");
    follow_author(&blog.repo, &blog.cache, &reader_actor, &author.username).unwrap();
    create_post(&blog.repo, &blog.cache, &author_actor, draft("P1")).unwrap();
    assert_eq!(render_home(&blog), "P1");

    create_post(&blog.repo, &blog.cache, &author_actor, draft("P2")).unwrap();
    assert_eq!(render_home(&blog), "P2,P1");
}

#[test]
fn mutations_leave_pages_stale_when_disabled() {
    let settings = Settings {
        invalidate_on_write: false,
        ..Settings::default()
    };
    let blog = Blog::in_memory(settings);
    let (_, actor) = user(&blog, "author");
    create_post(&blog.repo, &blog.cache, &actor, draft("P1")).unwrap();
    assert_eq!(render_home(&blog), "P1");

    create_post(&blog.repo, &blog.cache, &actor, draft("P2")).unwrap();
    assert_eq!(render_home(&blog), "P1");
}

#[test]
fn repository_is_shared_between_clones() {
    let repo = KvRepository::new(MemoryStore::new());
    let clone = repo.clone();
    repo.insert_post(&new_post("a", "shared", None, None)).unwrap();
    assert_eq!(clone.list_posts().unwrap().len(), 1);
}
